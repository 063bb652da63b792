use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use fnv::FnvHashMap;

use crate::enzyme::EnzymeParameters;
use crate::protein::ProteinStore;
use crate::Result;

pub struct Fasta {
    pub targets: Vec<(String, String)>,
    /// Entries whose accession contains the decoy tag, kept only when decoys
    /// are not generated internally
    pub decoys: Vec<(String, String)>,
}

impl Fasta {
    // Parse a string into a fasta database
    pub fn parse<S: Into<String>>(contents: String, decoy_tag: S, generate_decoys: bool) -> Fasta {
        let decoy_tag = decoy_tag.into();

        let mut fasta = Fasta {
            targets: Vec::new(),
            decoys: Vec::new(),
        };
        let mut last_id = "";
        let mut s = String::new();

        for line in contents.as_str().lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(id) = line.strip_prefix('>') {
                if !s.is_empty() {
                    let seq = std::mem::take(&mut s);
                    fasta.push(last_id, seq, &decoy_tag, generate_decoys);
                }
                last_id = id;
            } else {
                s.push_str(&line.to_ascii_uppercase());
            }
        }

        if !s.is_empty() {
            fasta.push(last_id, s, &decoy_tag, generate_decoys);
        }

        fasta
    }

    fn push(&mut self, header: &str, sequence: String, decoy_tag: &str, generate_decoys: bool) {
        let acc = header
            .split_ascii_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        if !acc.contains(decoy_tag) {
            self.targets.push((acc, sequence));
        } else if !generate_decoys {
            self.decoys.push((acc, sequence));
        } else {
            log::trace!("skipping decoy entry {}", acc);
        }
    }

    /// Move every entry into a [`ProteinStore`], targets first, ids assigned
    /// in file order
    pub fn into_store(self) -> ProteinStore {
        let mut store = ProteinStore::new();
        for (acc, seq) in self.targets {
            store.push(acc, seq.into_bytes(), false);
        }
        for (acc, seq) in self.decoys {
            store.push(acc, seq.into_bytes(), true);
        }
        store
    }
}

/// Target peptide sequences mapped to the decoy that replaces them
pub type DecoySequences = FnvHashMap<Vec<u8>, Vec<u8>>;

/// Write a decoy protein database. Without peptide-level decoys, the decoy
/// proteins already in the store are written as they are. Otherwise each
/// target protein is re-digested, every peptide with a decoy is overwritten
/// in place by that decoy, and the protein is written under `decoy_tag`
pub fn write_decoy_fasta(
    path: &Path,
    store: &ProteinStore,
    enzyme: &EnzymeParameters,
    decoys: Option<&DecoySequences>,
    decoy_tag: &str,
) -> Result<usize> {
    let mut writer = BufWriter::new(File::create(path)?);
    let mut written = 0;
    for protein in store.as_slice() {
        let (name, sequence) = match (decoys, protein.decoy) {
            (None, true) => (protein.name.clone(), protein.residues.clone()),
            (Some(decoys), false) => {
                let mut sequence = protein.residues.clone();
                for digest in enzyme.digest(&protein.residues) {
                    let start = digest.offset as usize;
                    let end = start + digest.length as usize;
                    if let Some(decoy) = decoys.get(&protein.residues[start..end]) {
                        sequence[start..end].copy_from_slice(decoy);
                    }
                }
                (format!("{}{}", decoy_tag, protein.name), sequence)
            }
            _ => continue,
        };
        writer.write_all(b">")?;
        writer.write_all(name.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.write_all(&sequence)?;
        writer.write_all(b"\n")?;
        written += 1;
    }
    writer.flush()?;
    Ok(written)
}
