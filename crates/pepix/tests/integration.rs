//! Build small indices end to end and read them back

use std::path::Path;

use pepix_core::database::{Builder, BuiltIndex};
use pepix_core::decoy::DecoyFormat;
use pepix_core::index::{IndexPeptide, IndexReader};
use pepix_core::mass::{FixedMass, MassTable};
use quickcheck_macros::quickcheck;

const FASTA: &str = r#"
>sp|Q99536|VAT1_HUMAN Synaptic vesicle membrane protein VAT-1 homolog OS=Homo sapiens OX=9606 GN=VAT1 PE=1 SV=2
MSDEREVAEAATGEDASSPPPKTEAASDPQHPAASEGAAAAAASPPLLRCLVLTGFGGYD
KVKLQSRPAAPPAPGPGQLTLRLRACGLNFADLMARQGLYDRLPPLPVTPGMEGAGVVIA
VGEGVSDRKAGDRVMVLNRSGMWQEEVTVPSVQTFLIPEAMTFEEAAALLVNYITAYMVL
FDFGNLQPGHSVLVHMAAGGVGMAAVQLCRTVENVTVFGTASASKHEALKENGVTHPIDY
HTTDYVDEIKKISPKGVDIVMDPLGGSDTAKGYNLLKPMGKVVTYGMANLLTGPKRNLMA
LARTWWNQFSVTALQLLQANRAVCGFHLGYLDGEVELVSGVVARLLALYNQGHIKPHIDS
VWPFEKVADAMKQMQEKKNVGKVLLVPGPEKEN
>sp|P00001|TEST
MADEEKVMVLNRAAAAK
"#;

fn builder(dir: &Path) -> Builder {
    let fasta = dir.join("Q99536.fasta");
    std::fs::write(&fasta, FASTA).unwrap();
    Builder {
        fasta: Some(fasta.to_string_lossy().into_owned()),
        output_directory: Some(dir.join("index")),
        mods_spec: Some("C+57.021464,1M+15.994915,2STY+79.966331".into()),
        nterm_protein_mods_spec: Some("1X+42.010565".into()),
        num_decoys_per_target: Some(2),
        ..Default::default()
    }
}

fn build(builder: Builder) -> (BuiltIndex, IndexReader, Vec<IndexPeptide>) {
    let built = builder.make_parameters().unwrap().build().unwrap();
    let reader = IndexReader::open(&built.directory).unwrap();
    let peptides = reader
        .peptides()
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    (built, reader, peptides)
}

#[test]
fn index_is_mass_ordered() {
    let dir = tempfile::tempdir().unwrap();
    let (built, reader, peptides) = build(builder(dir.path()));

    assert!(!peptides.is_empty());
    assert_eq!(reader.header.peptides, peptides.len() as u64);
    assert_eq!(built.summary.peptides_written, peptides.len() as u64);
    assert_eq!(
        built.summary.targets_written + built.summary.decoys_written,
        peptides.len() as u64
    );
    assert!(peptides.windows(2).all(|w| w[0].mass <= w[1].mass));

    let min = FixedMass::from_f64(reader.header.min_mass);
    for peptide in &peptides {
        assert!(peptide.length as usize >= reader.header.min_len);
        assert!(peptide.length as usize <= reader.header.max_len);
        // Modifications only ever add mass here
        assert!(peptide.mass >= min);
    }
}

#[test]
fn masses_match_residues_and_modifications() {
    let dir = tempfile::tempdir().unwrap();
    let (_, reader, peptides) = build(builder(dir.path()));
    let mods = &reader.header.mods;
    let masses = MassTable::new(reader.header.mass_type, mods);

    let mut phospho = 0;
    for peptide in &peptides {
        let residues = reader.residues(peptide);
        let protein = reader.proteins.get(peptide.protein_id);
        let cterm = peptide.offset as usize + peptide.length as usize == protein.residues.len();
        let mut expected = masses
            .candidate_mass(&residues, peptide.offset == 0, cterm)
            .unwrap();
        for p in &peptide.placements {
            let m = mods.get(p.mod_id);
            assert!(m.residues.contains(residues[p.index as usize] as char));
            expected += m.fixed;
        }
        for id in peptide.nterm.iter().chain(peptide.cterm.iter()) {
            expected += mods.get(*id).fixed;
        }
        assert_eq!(peptide.mass, expected, "{}", reader.sequence(peptide));

        // Protein N-terminal acetylation only at the protein N-terminus
        if peptide.nterm.is_some() {
            assert_eq!(peptide.offset, 0);
        }
        if peptide.placements.iter().any(|p| mods.get(p.mod_id).delta > 79.0) {
            phospho += 1;
            assert!(reader.sequence(peptide).contains("[+79.9663]"));
        }
    }
    assert!(phospho > 0);

    let acetylated = peptides
        .iter()
        .find(|p| p.nterm.is_some() && p.decoy.is_none())
        .map(|p| reader.sequence(p))
        .unwrap();
    assert!(acetylated.starts_with("[+42.0106]-M"), "{}", acetylated);
}

#[test]
fn decoys_follow_their_targets() {
    let dir = tempfile::tempdir().unwrap();
    let (built, reader, peptides) = build(builder(dir.path()));
    assert!(built.summary.decoys_generated > 0);

    let mut idx = 0;
    while idx < peptides.len() {
        let target = &peptides[idx];
        assert!(target.decoy.is_none(), "decoy without a target");
        let residues = reader.residues(target);
        let mut composition = residues.clone();
        composition.sort();

        idx += 1;
        let mut slots = Vec::new();
        while let Some(decoy) = peptides.get(idx).filter(|p| p.decoy.is_some()) {
            let (slot, _) = decoy.decoy.as_ref().unwrap();
            slots.push(*slot);

            let decoy_residues = reader.residues(decoy);
            assert_eq!(decoy.mass, target.mass);
            assert_eq!((decoy.protein_id, decoy.offset), (target.protein_id, target.offset));
            assert_ne!(decoy_residues, residues);
            assert_eq!(decoy_residues.first(), residues.first());
            assert_eq!(decoy_residues.last(), residues.last());

            let mut sorted = decoy_residues.clone();
            sorted.sort();
            assert_eq!(sorted, composition);

            // Modifications moved with their residues
            assert_eq!(decoy.placements.len(), target.placements.len());
            for p in &decoy.placements {
                let m = reader.header.mods.get(p.mod_id);
                assert!(m.residues.contains(decoy_residues[p.index as usize] as char));
            }
            idx += 1;
        }
        assert!(slots.len() <= 2);
        assert!(slots.windows(2).all(|w| w[0] < w[1]));
    }
}

#[test]
fn duplicate_peptides_share_one_record() {
    let dir = tempfile::tempdir().unwrap();
    let (built, reader, peptides) = build(builder(dir.path()));
    assert!(built.summary.duplicates > 0);

    let matches = peptides
        .iter()
        .filter(|p| p.decoy.is_none() && reader.residues(p) == b"VMVLNR")
        .collect::<Vec<_>>();
    // Unmodified and oxidized, each recorded once
    assert_eq!(matches.len(), 2);
    for peptide in matches {
        assert_eq!(peptide.protein_id, 0);
        let locations = reader.aux_locations(peptide);
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].protein_id, 1);
        assert_eq!(locations[0].offset, 6);
    }
}

#[test]
fn residue_statistics() {
    let dir = tempfile::tempdir().unwrap();
    let (built, reader, peptides) = build(builder(dir.path()));
    let stats = reader.residue_stats().unwrap();
    assert_eq!(stats, built.stats);

    let total = stats
        .iter()
        .map(|(_, counts)| counts.iter().sum::<u64>())
        .sum::<u64>();
    let residues = peptides.iter().map(|p| p.length as u64).sum::<u64>();
    assert_eq!(total, residues);

    // Every peptide ends in K or R, except at the protein C-terminus
    let masses = MassTable::new(reader.header.mass_type, &reader.header.mods);
    let k = masses.residue(b'K').unwrap();
    assert!(stats.get(k).unwrap()[2] > 0);
}

#[test]
fn protein_reverse_decoys() {
    let dir = tempfile::tempdir().unwrap();
    let (built, reader, peptides) = build(Builder {
        decoy_format: Some(DecoyFormat::ProteinReverse),
        num_decoys_per_target: Some(1),
        ..builder(dir.path())
    });
    assert_eq!(built.summary.proteins, 4);
    assert_eq!(built.summary.decoy_proteins, 2);
    assert_eq!(built.summary.decoys_generated, 0);
    assert_eq!(reader.header.decoys_per_target, 0);
    assert_eq!(reader.proteins.get(2).name, "decoy_sp|Q99536|VAT1_HUMAN");

    assert!(peptides.iter().all(|p| p.decoy.is_none()));
    let decoys = peptides
        .iter()
        .filter(|p| p.is_decoy(&reader.proteins))
        .count();
    assert!(decoys > 0);
    assert!(decoys < peptides.len());
}

#[test]
fn deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let (_, _, a) = build(Builder {
        output_directory: Some(dir.path().join("a")),
        ..builder(dir.path())
    });
    let (_, _, b) = build(Builder {
        output_directory: Some(dir.path().join("b")),
        ..builder(dir.path())
    });
    assert_eq!(a, b);
}

#[quickcheck]
fn memory_budget_does_not_change_output(budget: u8, width: u8) {
    let dir = tempfile::tempdir().unwrap();
    let (_, _, expected) = build(Builder {
        output_directory: Some(dir.path().join("default")),
        ..builder(dir.path())
    });

    let (built, _, peptides) = build(Builder {
        output_directory: Some(dir.path().join("small")),
        memory_limit: Some(16 * (1 + budget as usize % 8)),
        bucket_width: Some(0.25 + width as f64 / 8.0),
        ..builder(dir.path())
    });
    assert!(built.summary.runs > 1);
    assert_eq!(peptides, expected);

    // Sorted runs are cleaned up along the way
    let leftover = std::fs::read_dir(dir.path().join("small"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
        .count();
    assert_eq!(leftover, 0);
}
