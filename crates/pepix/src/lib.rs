pub mod assemble;
pub mod bucket;
pub mod collapse;
pub mod database;
pub mod decoy;
pub mod enzyme;
pub mod expand;
pub mod fasta;
pub mod heap;
pub mod index;
pub mod mass;
pub mod modification;
pub mod peptide;
pub mod protein;
pub mod sort;
pub mod spill;

use std::path::Path;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("invalid modification: {0}")]
    ModSpec(#[from] modification::InvalidModification),
    #[error("no candidate peptides were generated - is the protein database empty?")]
    NoCandidates,
    #[error("merge produced out-of-order record #{position} (mass {mass} after {previous})")]
    OutOfOrder {
        position: u64,
        mass: mass::FixedMass,
        previous: mass::FixedMass,
    },
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("unexpected index file format: {0}")]
    Format(String),
}

pub fn read_fasta<P: AsRef<Path>>(
    path: P,
    decoy_tag: &str,
    generate_decoys: bool,
) -> Result<protein::ProteinStore> {
    let contents = std::fs::read_to_string(path)?;
    Ok(fasta::Fasta::parse(contents, decoy_tag, generate_decoys).into_store())
}

pub fn read_json<P, T>(path: P) -> Result<T>
where
    P: AsRef<Path>,
    T: for<'de> serde::Deserialize<'de>,
{
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
