use pepix_cli::input::Input;
use pepix_cli::runner::Runner;
use pepix_core::index::IndexReader;

const FASTA: &str = r#">sp|Q99536|VAT1_HUMAN Synaptic vesicle membrane protein VAT-1 homolog
MSDEREVAEAATGEDASSPPPKTEAASDPQHPAASEGAAAAAASPPLLRCLVLTGFGGYD
KVKLQSRPAAPPAPGPGQLTLRLRACGLNFADLMARQGLYDRLPPLPVTPGMEGAGVVIA
VGEGVSDRKAGDRVMVLNRSGMWQEEVTVPSVQTFLIPEAMTFEEAAALLVNYITAYMVL
"#;

#[test]
fn integration() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let fasta = dir.path().join("db.fasta");
    std::fs::write(&fasta, FASTA)?;

    let out = dir.path().join("index");
    let params = serde_json::json!({
        "fasta": fasta,
        "output_directory": out,
        "mods_spec": "C+57.021464,2M+15.994915",
        "enzyme": { "missed_cleavages": 1, "min_len": 7, "cleave_at": "KR", "restrict": "P" },
        "decoy_format": "reverse",
        "memory_limit": 64,
    });
    let path = dir.path().join("params.json");
    std::fs::write(&path, serde_json::to_string_pretty(&params)?)?;

    let build = Input::load(path.to_string_lossy())?.build()?;
    assert_eq!(build.database.enzyme.missed_cleavages, 1);
    assert_eq!(build.database.enzyme.max_len, 50);
    assert_eq!(build.database.memory_limit, 64);

    let built = Runner::new(build).run()?;
    assert!(built.summary.runs > 1);
    assert!(built.summary.modified_variants > 0);

    let reader = IndexReader::open(&out)?;
    let peptides = reader.peptides()?.collect::<Result<Vec<_>, _>>()?;
    assert_eq!(peptides.len() as u64, built.summary.peptides_written);
    assert!(peptides.windows(2).all(|w| w[0].mass <= w[1].mass));
    assert!(peptides.iter().all(|p| p.length >= 7));
    assert!(peptides
        .iter()
        .any(|p| reader.sequence(p) == "LQSRPAAPPAPGPGQLTLR"));

    // Reversed decoys keep both termini, and directly follow their target
    let reversed = peptides
        .windows(2)
        .filter(|w| w[0].decoy.is_none() && w[1].decoy.is_some())
        .filter(|w| {
            let mut target = reader.residues(&w[0]);
            let n = target.len();
            target[1..n - 1].reverse();
            target == reader.residues(&w[1])
        })
        .count();
    assert!(reversed > 0);
    Ok(())
}

#[test]
fn missing_fasta() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("params.json");
    std::fs::write(&path, r#"{ "min_mass": 500.0 }"#)?;

    let input = Input::load(path.to_string_lossy())?;
    assert!(input.build().is_err());
    Ok(())
}

#[test]
fn existing_index_is_kept() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let fasta = dir.path().join("db.fasta");
    std::fs::write(&fasta, FASTA)?;
    let out = dir.path().join("index");
    let params = serde_json::json!({ "fasta": fasta, "output_directory": out });
    let path = dir.path().join("params.json");
    std::fs::write(&path, params.to_string())?;

    let first = Runner::new(Input::load(path.to_string_lossy())?.build()?).run()?;
    let again = Runner::new(Input::load(path.to_string_lossy())?.build()?).run();
    assert!(again.is_err());

    let reader = IndexReader::open(&out)?;
    assert_eq!(reader.header.peptides, first.summary.peptides_written);
    Ok(())
}
