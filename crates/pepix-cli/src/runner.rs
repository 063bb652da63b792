use std::time::Instant;

use anyhow::Context;
use log::info;
use pepix_core::database::BuiltIndex;

use super::input::Build;

pub struct Runner {
    pub parameters: Build,
    start: Instant,
}

impl Runner {
    pub fn new(parameters: Build) -> Self {
        Runner {
            parameters,
            start: Instant::now(),
        }
    }

    pub fn run(self) -> anyhow::Result<BuiltIndex> {
        let database = &self.parameters.database;
        info!(
            "pepix {} building index of {} into {}",
            self.parameters.version,
            database.fasta,
            database.output_directory.display()
        );

        let built = database.build().with_context(|| {
            format!(
                "Failed to build index in `{}`",
                database.output_directory.display()
            )
        })?;

        let summary = &built.summary;
        info!(
            "- digest:  {:8} candidates from {} proteins ({} invalid)",
            summary.candidates, summary.proteins, summary.invalid_peptides
        );
        info!(
            "- unique:  {:8} peptides ({} duplicates, {} decoy collisions)",
            summary.unique_peptides, summary.duplicates, summary.decoy_collisions
        );
        info!(
            "- decoys:  {:8} generated ({} failed)",
            summary.decoys_generated, summary.decoys_failed
        );
        if summary.modified_variants > 0 {
            info!(
                "- mods:    {:8} variants across {} buckets",
                summary.modified_variants, summary.buckets
            );
        }
        if summary.decoy_fasta_proteins > 0 {
            info!(
                "- fasta:   {:8} decoy proteins",
                summary.decoy_fasta_proteins
            );
        }
        info!(
            "- written: {:8} peptides ({} targets, {} decoys)",
            summary.peptides_written, summary.targets_written, summary.decoys_written
        );
        info!(
            "finished in {}s",
            (Instant::now() - self.start).as_secs_f32()
        );

        println!("{}", serde_json::to_string_pretty(summary)?);
        Ok(built)
    }
}
