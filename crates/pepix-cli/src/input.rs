use anyhow::{ensure, Context};
use clap::ArgMatches;
use pepix_core::database::{Builder, Parameters};
use serde::Deserialize;

/// Actual build parameters - may include overrides or default values not set by user
pub struct Build {
    pub version: String,
    pub database: Parameters,
}

#[derive(Deserialize)]
/// Input parameters deserialized from JSON file
pub struct Input {
    #[serde(flatten)]
    database: Builder,
}

impl Input {
    pub fn from_arguments(matches: ArgMatches) -> anyhow::Result<Self> {
        let path = matches
            .get_one::<String>("parameters")
            .context("`parameters` must be set. For more information try '--help'")?;
        let mut input = Input::load(path)
            .with_context(|| format!("Failed to read parameters from `{path}`"))?;

        // Handle JSON configuration overrides
        if let Some(fasta) = matches.get_one::<String>("fasta") {
            log::trace!("overriding `fasta` parameter.");
            input.database.update_fasta(fasta.into());
        }
        if let Some(output_directory) = matches.get_one::<String>("output_directory") {
            log::trace!("overriding `output_directory` parameter.");
            input.database.output_directory = Some(output_directory.into());
        }
        if let Some(temp_directory) = matches.get_one::<String>("temp_directory") {
            log::trace!("overriding `temp_directory` parameter.");
            input.database.temp_directory = Some(temp_directory.into());
        }
        if let Some(mib) = matches.get_one::<u64>("memory-limit").copied() {
            log::trace!("overriding `memory_limit` parameter.");
            let bytes = mib
                .checked_mul(1 << 20)
                .and_then(|b| usize::try_from(b).ok())
                .context("`--memory-limit` is too large")?;
            input.database.memory_limit = Some(bytes);
        }
        if matches.get_flag("overwrite") {
            input.database.overwrite = Some(true);
        }

        ensure!(
            input.database.fasta.is_some(),
            "`fasta` must be set. For more information try '--help'"
        );

        Ok(input)
    }

    pub fn load<S: AsRef<str>>(path: S) -> anyhow::Result<Self> {
        pepix_core::read_json(path.as_ref()).map_err(anyhow::Error::from)
    }

    pub fn build(self) -> anyhow::Result<Build> {
        let database = self
            .database
            .make_parameters()
            .context("Invalid index parameters")?;

        if database.max_mods > 8 && !database.mods.variable.is_empty() {
            log::warn!(
                "max_mods = {} allows a combinatorial number of modified peptides",
                database.max_mods
            );
        }

        Ok(Build {
            version: clap::crate_version!().into(),
            database,
        })
    }
}
