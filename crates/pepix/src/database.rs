use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::assemble::{Assembler, ResidueStats};
use crate::bucket::MassBuckets;
use crate::collapse::{Collapse, UniqueTargetGroup};
use crate::decoy::{DecoyFormat, DecoyGenerator, DecoyParameters, DecoyRecord, KeepTerminal};
use crate::enzyme::{EnzymeParameters, EnzymeSettings};
use crate::expand::ModExpander;
use crate::fasta::{write_decoy_fasta, DecoySequences};
use crate::index::{self, AuxWriter, PeptideHeader, PeptideWriter};
use crate::mass::{FixedMass, MassTable, MassType};
use crate::modification::ModTable;
use crate::peptide::{Candidate, CandidateOrder, ModifiedOrder, ModifiedPeptide};
use crate::protein::{ProteinRecord, ProteinStore};
use crate::sort::ExternalSorter;
use crate::{Error, Result};

/// Proteins digested in parallel before their candidates are pushed, in
/// protein order, into the sorter
const DIGEST_CHUNK: usize = 4096;

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct EnzymeBuilder {
    /// How many missed cleavages to use
    pub missed_cleavages: Option<u8>,
    /// Minimum peptide length
    pub min_len: Option<usize>,
    /// Maximum peptide length
    pub max_len: Option<usize>,
    pub cleave_at: Option<String>,
    pub restrict: Option<char>,
    pub c_terminal: Option<bool>,
    pub semi_enzymatic: Option<bool>,
}

impl Default for EnzymeBuilder {
    fn default() -> Self {
        Self {
            missed_cleavages: Some(0),
            min_len: Some(6),
            max_len: Some(50),
            cleave_at: Some("KR".into()),
            restrict: Some('P'),
            c_terminal: Some(true),
            semi_enzymatic: Some(false),
        }
    }
}

impl EnzymeBuilder {
    fn make_settings(self, clip_nterm_methionine: bool) -> EnzymeSettings {
        EnzymeSettings {
            missed_cleavages: self.missed_cleavages.unwrap_or(0),
            min_len: self.min_len.unwrap_or(6),
            max_len: self.max_len.unwrap_or(50),
            cleave_at: self.cleave_at.unwrap_or_else(|| "KR".into()),
            restrict: self.restrict,
            c_terminal: self.c_terminal.unwrap_or(true),
            semi_enzymatic: self.semi_enzymatic.unwrap_or(false),
            clip_nterm_methionine,
        }
    }
}

#[derive(Deserialize, Serialize, Default, Clone, Debug)]
/// Parameters used for building a peptide index
pub struct Builder {
    /// Path to fasta database
    pub fasta: Option<String>,
    pub output_directory: Option<PathBuf>,
    /// Scratch space for sorted runs. Defaults to the output directory
    pub temp_directory: Option<PathBuf>,
    /// Replace an index already present in the output directory
    pub overwrite: Option<bool>,
    /// Memory budget in bytes for in-memory sort buffers
    pub memory_limit: Option<usize>,

    pub enzyme: Option<EnzymeBuilder>,
    pub clip_nterm_methionine: Option<bool>,
    /// Minimum peptide mass that will be indexed
    pub min_mass: Option<f64>,
    /// Maximum peptide mass that will be indexed
    pub max_mass: Option<f64>,
    pub mass_type: Option<MassType>,

    /// Residue modifications, e.g. `C+57.02146,3STY+79.966331`
    pub mods_spec: Option<String>,
    pub nterm_peptide_mods_spec: Option<String>,
    pub cterm_peptide_mods_spec: Option<String>,
    pub nterm_protein_mods_spec: Option<String>,
    pub cterm_protein_mods_spec: Option<String>,
    /// Minimum number of variable modifications on a peptide
    pub min_mods: Option<usize>,
    /// Limit number of variable modifications on a peptide
    pub max_mods: Option<usize>,
    /// Digits used when rendering modification masses
    pub mod_precision: Option<usize>,

    pub decoy_format: Option<DecoyFormat>,
    pub keep_terminal_aminos: Option<KeepTerminal>,
    pub num_decoys_per_target: Option<u16>,
    /// Skip uniqueness checks on peptides and decoys
    pub allow_dups: Option<bool>,
    pub decoy_attempts: Option<u32>,
    pub seed: Option<u64>,
    /// Use this prefix for decoy proteins
    pub decoy_tag: Option<String>,
    /// Also write the decoy proteins as a FASTA file
    pub decoy_fasta: Option<bool>,
    /// Width of a modified-peptide mass bucket, in Daltons
    pub bucket_width: Option<f64>,
}

impl Builder {
    pub fn make_parameters(self) -> Result<Parameters> {
        let fasta = self
            .fasta
            .ok_or_else(|| Error::Config("a fasta file must be provided".into()))?;
        let output_directory = self
            .output_directory
            .unwrap_or_else(|| PathBuf::from("pepix-index"));

        let mods_spec = self.mods_spec.unwrap_or_else(|| "C+57.02146".into());
        let nterm_peptide_mods_spec = self.nterm_peptide_mods_spec.unwrap_or_default();
        let cterm_peptide_mods_spec = self.cterm_peptide_mods_spec.unwrap_or_default();
        let nterm_protein_mods_spec = self.nterm_protein_mods_spec.unwrap_or_default();
        let cterm_protein_mods_spec = self.cterm_protein_mods_spec.unwrap_or_default();
        let mods = ModTable::parse(
            &mods_spec,
            &nterm_peptide_mods_spec,
            &cterm_peptide_mods_spec,
            &nterm_protein_mods_spec,
            &cterm_protein_mods_spec,
        )?;

        let parameters = Parameters {
            fasta,
            output_directory,
            temp_directory: self.temp_directory,
            overwrite: self.overwrite.unwrap_or(false),
            memory_limit: self.memory_limit.unwrap_or(1 << 30),
            enzyme: self
                .enzyme
                .unwrap_or_default()
                .make_settings(self.clip_nterm_methionine.unwrap_or(false)),
            min_mass: self.min_mass.unwrap_or(200.0),
            max_mass: self.max_mass.unwrap_or(7200.0),
            mass_type: self.mass_type.unwrap_or_default(),
            mods_spec,
            nterm_peptide_mods_spec,
            cterm_peptide_mods_spec,
            nterm_protein_mods_spec,
            cterm_protein_mods_spec,
            min_mods: self.min_mods.unwrap_or(0),
            max_mods: self.max_mods.unwrap_or(255),
            mod_precision: self.mod_precision.unwrap_or(4),
            decoy_format: self.decoy_format.unwrap_or_default(),
            keep_terminal_aminos: self.keep_terminal_aminos.unwrap_or_default(),
            num_decoys_per_target: self.num_decoys_per_target.unwrap_or(1),
            allow_dups: self.allow_dups.unwrap_or(false),
            decoy_attempts: self.decoy_attempts.unwrap_or(6),
            seed: self.seed.unwrap_or(1),
            decoy_tag: self.decoy_tag.unwrap_or_else(|| "decoy_".into()),
            decoy_fasta: self.decoy_fasta.unwrap_or(false),
            bucket_width: self.bucket_width.unwrap_or(1.0),
            mods,
        };
        parameters.validate()?;
        Ok(parameters)
    }

    pub fn update_fasta(&mut self, fasta: String) {
        self.fasta = Some(fasta)
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct Parameters {
    pub fasta: String,
    pub output_directory: PathBuf,
    pub temp_directory: Option<PathBuf>,
    pub overwrite: bool,
    pub memory_limit: usize,
    pub enzyme: EnzymeSettings,
    pub min_mass: f64,
    pub max_mass: f64,
    pub mass_type: MassType,
    pub mods_spec: String,
    pub nterm_peptide_mods_spec: String,
    pub cterm_peptide_mods_spec: String,
    pub nterm_protein_mods_spec: String,
    pub cterm_protein_mods_spec: String,
    pub min_mods: usize,
    pub max_mods: usize,
    pub mod_precision: usize,
    pub decoy_format: DecoyFormat,
    pub keep_terminal_aminos: KeepTerminal,
    pub num_decoys_per_target: u16,
    pub allow_dups: bool,
    pub decoy_attempts: u32,
    pub seed: u64,
    pub decoy_tag: String,
    pub decoy_fasta: bool,
    pub bucket_width: f64,
    #[serde(skip)]
    pub mods: ModTable,
}

/// Counters reported at the end of a build. Per-item failures are counted
/// here rather than raised
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub proteins: usize,
    pub decoy_proteins: usize,
    pub candidates: u64,
    /// Digests dropped for containing unrecognized residues
    pub invalid_peptides: u64,
    pub runs: usize,
    pub unique_peptides: u64,
    pub duplicates: u64,
    pub decoys_generated: u64,
    pub decoys_failed: u64,
    /// Decoy peptides dropped for matching a target sequence
    pub decoy_collisions: u64,
    pub modified_variants: u64,
    pub buckets: usize,
    pub bucket_runs: usize,
    pub aux_lists: u32,
    pub targets_written: u64,
    pub decoys_written: u64,
    pub peptides_written: u64,
    pub decoy_fasta_proteins: usize,
}

#[derive(Debug)]
pub struct BuiltIndex {
    pub directory: PathBuf,
    pub summary: BuildSummary,
    pub stats: ResidueStats,
}

#[derive(Serialize)]
struct SummaryFile<'a> {
    parameters: &'a Parameters,
    summary: &'a BuildSummary,
}

/// Removes every output file registered with it unless the build completes
struct OutputGuard {
    paths: Vec<PathBuf>,
    armed: bool,
}

impl OutputGuard {
    fn new() -> Self {
        OutputGuard {
            paths: Vec::new(),
            armed: true,
        }
    }

    fn register(&mut self, path: PathBuf) -> PathBuf {
        self.paths.push(path.clone());
        path
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for OutputGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for path in &self.paths {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    log::warn!("failed to remove partial output {}: {}", path.display(), e);
                }
            }
        }
    }
}

/// Sends each unique peptide either straight to the assembler, or through
/// modification expansion into the mass buckets
struct Router<'s> {
    store: &'s ProteinStore,
    clip_nterm_methionine: bool,
    aux: AuxWriter,
    expander: ModExpander<'s>,
    buckets: Option<MassBuckets<'s>>,
    assembler: Assembler<'s>,
    variants: u64,
    /// First decoy of each target, kept for the decoy FASTA
    decoy_sequences: Option<DecoySequences>,
}

impl<'s> Router<'s> {
    fn route(&mut self, group: UniqueTargetGroup, decoys: Vec<DecoyRecord>) -> Result<()> {
        let aux = match group.aux_locations.is_empty() {
            true => None,
            false => Some(self.aux.push(&group.aux_locations)?),
        };
        if let Some(sequences) = self.decoy_sequences.as_mut() {
            if let Some(decoy) = decoys.iter().find(|d| d.slot == 0) {
                let residues = group.representative.residues(self.store);
                sequences.insert(residues.to_vec(), decoy.apply(residues));
            }
        }
        let peptide = ModifiedPeptide::unmodified(group.representative, aux, decoys);

        match self.buckets.as_mut() {
            None => self.assembler.write(peptide),
            Some(buckets) => {
                let base = &peptide.base;
                let termini = base.protein_termini(self.store, self.clip_nterm_methionine);
                self.variants += self.expander.expand(
                    &peptide,
                    base.residues(self.store),
                    termini,
                    |variant| buckets.push(variant),
                )?;
                Ok(())
            }
        }
    }
}

impl Parameters {
    fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::Config(msg));
        if self.min_mass > self.max_mass {
            return fail(format!(
                "min_mass ({}) is greater than max_mass ({})",
                self.min_mass, self.max_mass
            ));
        }
        for mass in [self.min_mass, self.max_mass] {
            if FixedMass::try_from_f64(mass).is_none() {
                return fail(format!("mass bound {} cannot be represented", mass));
            }
        }
        if self.enzyme.min_len == 0 {
            return fail("min_len must be at least 1".into());
        }
        if self.enzyme.min_len > self.enzyme.max_len {
            return fail(format!(
                "min_len ({}) is greater than max_len ({})",
                self.enzyme.min_len, self.enzyme.max_len
            ));
        }
        if self.enzyme.max_len >= u16::MAX as usize {
            return fail(format!("max_len ({}) is too large", self.enzyme.max_len));
        }
        if self.min_mods > self.max_mods {
            return fail(format!(
                "min_mods ({}) is greater than max_mods ({})",
                self.min_mods, self.max_mods
            ));
        }
        if self.num_decoys_per_target > 1 && self.decoy_format != DecoyFormat::Shuffle {
            return fail(format!(
                "num_decoys_per_target ({}) > 1 requires decoy_format = shuffle",
                self.num_decoys_per_target
            ));
        }
        if self.decoy_fasta && self.decoy_format == DecoyFormat::None {
            return fail("decoy_fasta requires a decoy_format".into());
        }
        if self.decoy_attempts == 0 {
            return fail("decoy_attempts must be at least 1".into());
        }
        if self.memory_limit < std::mem::size_of::<Candidate>() {
            return fail(format!(
                "memory_limit ({} bytes) cannot hold a single record",
                self.memory_limit
            ));
        }
        if !(self.bucket_width.is_finite() && FixedMass::from_f64(self.bucket_width).0 > 0) {
            return fail(format!("bucket_width ({}) must be positive", self.bucket_width));
        }
        // Validates cleavage residues
        EnzymeParameters::from_settings(&self.enzyme)?;
        Ok(())
    }

    fn decoy_parameters(&self) -> DecoyParameters {
        DecoyParameters {
            format: self.decoy_format,
            keep_terminal: self.keep_terminal_aminos,
            num_decoys: match self.decoy_format.per_peptide() {
                true => self.num_decoys_per_target,
                false => 0,
            },
            allow_dups: self.allow_dups,
            attempts: self.decoy_attempts,
            seed: self.seed,
        }
    }

    fn header(&self) -> PeptideHeader {
        PeptideHeader {
            file_type: index::FileType::Pepix,
            version: index::VERSION,
            peptides: 0,
            min_mass: self.min_mass,
            max_mass: self.max_mass,
            min_len: self.enzyme.min_len,
            max_len: self.enzyme.max_len,
            enzyme: self.enzyme.clone(),
            mass_type: self.mass_type,
            mods: self.mods.clone(),
            min_mods: self.min_mods,
            max_mods: self.max_mods,
            mod_precision: self.mod_precision,
            decoy_format: self.decoy_format,
            keep_terminal_aminos: self.keep_terminal_aminos,
            decoys_per_target: self.decoy_parameters().num_decoys,
        }
    }

    fn prepare_output(&self) -> Result<()> {
        let out = &self.output_directory;
        if out.join(index::PEPTIDE_FILE).exists() && !self.overwrite {
            return Err(Error::Config(format!(
                "{} already holds an index, set `overwrite` to replace it",
                out.display()
            )));
        }
        std::fs::create_dir_all(out)?;
        // The peptide file marks a complete index, so it goes first
        for name in index::INDEX_FILES {
            let path = out.join(name);
            if path.exists() {
                log::info!("removing previous index file {}", path.display());
                std::fs::remove_file(&path)?;
            }
        }
        if let Some(tmp) = &self.temp_directory {
            std::fs::create_dir_all(tmp)?;
        }
        Ok(())
    }

    /// Load the protein database, adding reversed decoy proteins if requested
    fn proteins(&self) -> Result<ProteinStore> {
        let mut store = crate::read_fasta(
            &self.fasta,
            &self.decoy_tag,
            self.decoy_format != DecoyFormat::None,
        )?;
        if self.decoy_format == DecoyFormat::ProteinReverse {
            store.append_reversed(&self.decoy_tag);
        }
        Ok(store)
    }

    /// Digest every protein into fixed-point candidates, dropping those
    /// outside the mass bounds. Returns the candidates and the number of
    /// digests with unrecognized residues
    fn digest(
        &self,
        proteins: &[ProteinRecord],
        enzyme: &EnzymeParameters,
        masses: &MassTable,
    ) -> (Vec<Candidate>, u64) {
        let min = FixedMass::from_f64(self.min_mass);
        let max = FixedMass::from_f64(self.max_mass);
        let digested = proteins
            .par_iter()
            .map(|protein| {
                let mut invalid = 0;
                let candidates = enzyme
                    .digest(&protein.residues)
                    .into_iter()
                    .filter_map(|digest| {
                        let start = digest.offset as usize;
                        let residues = &protein.residues[start..start + digest.length as usize];
                        let mass = masses.candidate_mass(
                            residues,
                            digest.position.protein_nterm(),
                            digest.position.protein_cterm(),
                        );
                        match mass {
                            None => {
                                invalid += 1;
                                None
                            }
                            Some(mass) if mass < min || mass > max => None,
                            Some(mass) => Some(Candidate {
                                mass,
                                length: digest.length,
                                protein_id: protein.id,
                                offset: digest.offset,
                            }),
                        }
                    })
                    .collect::<Vec<_>>();
                (candidates, invalid)
            })
            .collect::<Vec<_>>();

        let mut invalid = 0;
        let candidates = digested
            .into_iter()
            .flat_map(|(candidates, n)| {
                invalid += n;
                candidates
            })
            .collect();
        (candidates, invalid)
    }

    pub fn build(&self) -> Result<BuiltIndex> {
        let start = Instant::now();
        self.prepare_output()?;
        let out: &Path = &self.output_directory;
        let mut guard = OutputGuard::new();
        let scratch = tempfile::Builder::new()
            .prefix(".pepix-tmp-")
            .tempdir_in(self.temp_directory.as_deref().unwrap_or(out))?;
        let tmp = scratch.path();

        let store = self.proteins()?;
        let mut summary = BuildSummary {
            proteins: store.len(),
            decoy_proteins: store.as_slice().iter().filter(|p| p.decoy).count(),
            ..Default::default()
        };
        log::info!(
            "loaded {} proteins ({} decoys) from {}",
            summary.proteins,
            summary.decoy_proteins,
            self.fasta
        );
        index::write_proteins(
            &guard.register(out.join(index::PROTEIN_FILE)),
            &store,
            &self.decoy_tag,
        )?;

        // Digest and sort
        let masses = MassTable::new(self.mass_type, &self.mods);
        let enzyme = EnzymeParameters::from_settings(&self.enzyme)?;
        let mut sorter = ExternalSorter::new(
            tmp,
            "candidates-",
            self.memory_limit,
            CandidateOrder { store: &store },
        );
        for chunk in store.as_slice().chunks(DIGEST_CHUNK) {
            let (candidates, invalid) = self.digest(chunk, &enzyme, &masses);
            summary.invalid_peptides += invalid;
            for candidate in candidates {
                sorter.push(candidate)?;
            }
        }
        summary.candidates = sorter.len();
        if sorter.is_empty() {
            return Err(Error::NoCandidates);
        }
        if summary.invalid_peptides > 0 {
            log::warn!(
                "skipped {} peptides containing unrecognized residues",
                summary.invalid_peptides
            );
        }
        // The buffered tail becomes one more run unless everything fit in memory
        summary.runs = sorter.runs() + (sorter.runs() > 0 && sorter.buffered() > 0) as usize;
        log::info!(
            "digested {} candidate peptides in {}ms",
            summary.candidates,
            start.elapsed().as_millis()
        );

        // Collapse, decoys, modifications
        let expander = ModExpander::new(&self.mods, self.min_mods, self.max_mods);
        let buckets = match expander.is_noop() {
            true => None,
            false => Some(MassBuckets::new(
                tmp,
                FixedMass::from_f64(self.bucket_width),
                self.memory_limit,
                ModifiedOrder { store: &store },
            )),
        };
        let mut router = Router {
            store: &store,
            clip_nterm_methionine: self.enzyme.clip_nterm_methionine,
            aux: AuxWriter::create(&guard.register(out.join(index::AUX_FILE)))?,
            expander,
            buckets,
            assembler: Assembler::new(
                &store,
                &masses,
                &self.mods,
                self.enzyme.clip_nterm_methionine,
                PeptideWriter::create(out)?,
            ),
            variants: 0,
            decoy_sequences: None,
        };

        let decoy_params = self.decoy_parameters();
        if self.decoy_fasta && decoy_params.num_decoys > 0 {
            router.decoy_sequences = Some(DecoySequences::default());
        }
        let mut decoys = match decoy_params.num_decoys {
            0 => None,
            _ => Some(DecoyGenerator::new(&store, decoy_params)),
        };

        let mut collapse = Collapse::new(sorter.finish()?, &store, self.allow_dups);
        for group in collapse.by_ref() {
            let group = group?;
            match decoys.as_mut() {
                None => router.route(group, Vec::new())?,
                Some(generator) => {
                    for (group, records) in generator.push(group) {
                        router.route(group, records)?;
                    }
                }
            }
        }
        if let Some(generator) = decoys.as_mut() {
            for (group, records) in generator.finish() {
                router.route(group, records)?;
            }
            summary.decoys_generated = generator.generated();
            summary.decoys_failed = generator.failed();
        }

        let counts = collapse.counts();
        summary.unique_peptides = counts.unique;
        summary.duplicates = counts.duplicates;
        summary.decoy_collisions = counts.collisions;
        log::info!(
            "collapsed into {} unique peptides ({} duplicates)",
            summary.unique_peptides,
            summary.duplicates
        );
        if summary.decoys_failed > 0 {
            log::warn!(
                "failed to generate {} of {} requested decoys",
                summary.decoys_failed,
                summary.decoys_failed + summary.decoys_generated
            );
        }

        // Final merge
        let Router {
            aux,
            buckets,
            mut assembler,
            variants,
            decoy_sequences,
            ..
        } = router;
        if let Some(buckets) = buckets {
            summary.modified_variants = variants;
            summary.buckets = buckets.buckets();
            summary.bucket_runs = buckets.runs();
            log::info!(
                "expanded into {} modified peptides across {} mass buckets",
                variants,
                summary.buckets
            );
            for peptide in buckets.finish() {
                assembler.write(peptide?)?;
            }
        }
        summary.aux_lists = aux.finish()?;
        (summary.targets_written, summary.decoys_written) = assembler.counts();
        let (writer, stats) = assembler.finish();

        // The header goes last: the peptide file only exists once it is complete
        summary.peptides_written =
            writer.commit(self.header(), &guard.register(out.join(index::PEPTIDE_FILE)))?;

        let stats_file = guard.register(out.join(index::STATS_FILE));
        let mut w = BufWriter::new(File::create(stats_file)?);
        serde_json::to_writer_pretty(&mut w, &stats)?;
        w.flush()?;

        if self.decoy_fasta {
            summary.decoy_fasta_proteins = write_decoy_fasta(
                &guard.register(out.join(index::DECOY_FASTA_FILE)),
                &store,
                &enzyme,
                decoy_sequences.as_ref(),
                &self.decoy_tag,
            )?;
            log::info!("wrote {} decoy proteins", summary.decoy_fasta_proteins);
        }

        let summary_file = guard.register(out.join(index::SUMMARY_FILE));
        let mut w = BufWriter::new(File::create(summary_file)?);
        serde_json::to_writer_pretty(
            &mut w,
            &SummaryFile {
                parameters: self,
                summary: &summary,
            },
        )?;
        w.flush()?;

        if let Err(e) = scratch.close() {
            log::warn!("failed to remove temporary directory: {}", e);
        }
        guard.disarm();

        log::info!(
            "wrote {} peptides to {} in {}ms",
            summary.peptides_written,
            out.display(),
            start.elapsed().as_millis()
        );
        Ok(BuiltIndex {
            directory: out.to_path_buf(),
            summary,
            stats,
        })
    }
}
