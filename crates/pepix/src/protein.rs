use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProteinRecord {
    pub id: u32,
    /// Protein accession
    pub name: String,
    pub residues: Vec<u8>,
    /// Decoy proteins only exist when decoys are produced by reversing
    /// whole proteins
    pub decoy: bool,
}

/// Arena of every protein loaded for a build. Peptides never copy residues,
/// they refer back here through a `(protein_id, offset, length)` locator
#[derive(Clone, Debug, Default)]
pub struct ProteinStore {
    proteins: Vec<ProteinRecord>,
}

impl ProteinStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a protein, returning its id
    pub fn push<S: Into<String>>(&mut self, name: S, residues: Vec<u8>, decoy: bool) -> u32 {
        let id = self.proteins.len() as u32;
        self.proteins.push(ProteinRecord {
            id,
            name: name.into(),
            residues,
            decoy,
        });
        id
    }

    pub fn get(&self, id: u32) -> &ProteinRecord {
        &self.proteins[id as usize]
    }

    #[inline]
    pub fn residues(&self, protein_id: u32, offset: u32, length: u16) -> &[u8] {
        let start = offset as usize;
        &self.proteins[protein_id as usize].residues[start..start + length as usize]
    }

    #[inline]
    pub fn is_decoy(&self, protein_id: u32) -> bool {
        self.proteins[protein_id as usize].decoy
    }

    pub fn len(&self) -> usize {
        self.proteins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proteins.is_empty()
    }

    pub fn as_slice(&self) -> &[ProteinRecord] {
        &self.proteins
    }

    /// Append a reversed copy of every target protein, tagging the accession
    /// with `decoy_tag`. Returns the number of decoy proteins added
    pub fn append_reversed(&mut self, decoy_tag: &str) -> usize {
        let loaded = self.proteins.len();
        let targets = self.proteins.iter().filter(|p| !p.decoy).count();
        self.proteins.reserve(targets);
        for idx in 0..loaded {
            let target = &self.proteins[idx];
            if target.decoy {
                continue;
            }
            let name = format!("{}{}", decoy_tag, target.name);
            let residues = target.residues.iter().rev().copied().collect();
            self.push(name, residues, true);
        }
        targets
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reversed_proteins() {
        let mut store = ProteinStore::new();
        assert_eq!(store.push("sp|A", b"MADEEK".to_vec(), false), 0);
        assert_eq!(store.push("sp|B", b"PEPTIDEK".to_vec(), false), 1);
        assert_eq!(store.append_reversed("rev_"), 2);
        assert_eq!(store.len(), 4);

        assert_eq!(store.get(2).name, "rev_sp|A");
        assert_eq!(store.get(3).residues, b"KEDITPEP");
        assert!(store.is_decoy(3));
        assert!(!store.is_decoy(1));
        assert_eq!(store.residues(3, 1, 3), b"EDI");
    }
}
