use std::cmp::Ordering;
use std::io::{self, Read, Write};

use crate::decoy::DecoyRecord;
use crate::heap::Compare;
use crate::mass::FixedMass;
use crate::protein::ProteinStore;
use crate::spill::{read_body, read_head, Spill};
use crate::Result;

const NONE: u16 = u16::MAX;

/// A digested peptide before duplicates are collapsed. Only a locator into
/// the [`ProteinStore`] is kept, never the residues themselves
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Candidate {
    pub mass: FixedMass,
    pub length: u16,
    pub protein_id: u32,
    pub offset: u32,
}

impl Candidate {
    #[inline]
    pub fn residues<'s>(&self, store: &'s ProteinStore) -> &'s [u8] {
        store.residues(self.protein_id, self.offset, self.length)
    }

    /// Does the candidate start at the protein N-terminus, and end at the
    /// C-terminus? A clipped initiator methionine counts as the N-terminus
    pub fn protein_termini(&self, store: &ProteinStore, clip: bool) -> (bool, bool) {
        let protein = &store.get(self.protein_id).residues;
        let offset = self.offset as usize;
        let nterm = offset == 0 || (clip && offset == 1 && protein.first() == Some(&b'M'));
        let cterm = offset + self.length as usize == protein.len();
        (nterm, cterm)
    }

    /// Same mass, length and residues
    pub fn same_peptide(&self, other: &Candidate, store: &ProteinStore) -> bool {
        self.mass == other.mass
            && self.length == other.length
            && self.residues(store) == other.residues(store)
    }
}

impl Spill for Candidate {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.mass.0.to_le_bytes())?;
        writer.write_all(&self.protein_id.to_le_bytes())?;
        writer.write_all(&self.offset.to_le_bytes())?;
        writer.write_all(&(self.length as u32).to_le_bytes())
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Option<Self>> {
        let head = match read_head::<_, 16>(reader)? {
            Some(head) => head,
            None => return Ok(None),
        };
        let field = |i: usize| [head[i], head[i + 1], head[i + 2], head[i + 3]];
        let length = u32::from_le_bytes(field(12));
        let length = u16::try_from(length)
            .map_err(|_| crate::Error::Corrupt(format!("peptide length {} out of range", length)))?;
        Ok(Some(Candidate {
            mass: FixedMass(i32::from_le_bytes(field(0))),
            protein_id: u32::from_le_bytes(field(4)),
            offset: u32::from_le_bytes(field(8)),
            length,
        }))
    }

    fn mass(&self) -> FixedMass {
        self.mass
    }
}

/// Canonical candidate order: mass, length, residues, then targets before
/// decoys. Protein id and offset make the order total, so that the merged
/// stream never depends on how records were split into runs
#[derive(Copy, Clone)]
pub struct CandidateOrder<'s> {
    pub store: &'s ProteinStore,
}

impl<'s> Compare<Candidate> for CandidateOrder<'s> {
    fn compare(&self, a: &Candidate, b: &Candidate) -> Ordering {
        a.mass
            .cmp(&b.mass)
            .then_with(|| a.length.cmp(&b.length))
            .then_with(|| a.residues(self.store).cmp(b.residues(self.store)))
            .then_with(|| {
                self.store
                    .is_decoy(a.protein_id)
                    .cmp(&self.store.is_decoy(b.protein_id))
            })
            .then_with(|| a.protein_id.cmp(&b.protein_id))
            .then_with(|| a.offset.cmp(&b.offset))
    }
}

/// A variable modification placed on a residue
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Placement {
    pub index: u16,
    pub mod_id: u16,
}

/// A unique peptide as it moves from duplicate collapse to the index: the
/// representative locator, its (possibly modified) mass, the variable
/// modifications placed on it, and the decoys generated from it
#[derive(Clone, Debug, PartialEq)]
pub struct ModifiedPeptide {
    pub mass: FixedMass,
    pub base: Candidate,
    /// Index of this peptide's list in the auxiliary-locations file
    pub aux: Option<u32>,
    pub nterm: Option<u16>,
    pub cterm: Option<u16>,
    /// Sorted by residue index
    pub placements: Vec<Placement>,
    pub decoys: Vec<DecoyRecord>,
}

impl ModifiedPeptide {
    pub fn unmodified(base: Candidate, aux: Option<u32>, decoys: Vec<DecoyRecord>) -> Self {
        ModifiedPeptide {
            mass: base.mass,
            base,
            aux,
            nterm: None,
            cterm: None,
            placements: Vec::new(),
            decoys,
        }
    }

    pub fn is_modified(&self) -> bool {
        self.nterm.is_some() || self.cterm.is_some() || !self.placements.is_empty()
    }
}

pub(crate) fn read_u16<R: Read>(reader: &mut R) -> Result<u16> {
    Ok(u16::from_le_bytes(read_body(reader)?))
}

pub(crate) fn optional(id: Option<u16>) -> u16 {
    id.unwrap_or(NONE)
}

pub(crate) fn from_optional(id: u16) -> Option<u16> {
    (id != NONE).then_some(id)
}

impl Spill for ModifiedPeptide {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.mass.0.to_le_bytes())?;
        self.base.write_to(writer)?;
        writer.write_all(&self.aux.unwrap_or(u32::MAX).to_le_bytes())?;
        writer.write_all(&optional(self.nterm).to_le_bytes())?;
        writer.write_all(&optional(self.cterm).to_le_bytes())?;
        writer.write_all(&(self.placements.len() as u16).to_le_bytes())?;
        for p in &self.placements {
            writer.write_all(&p.index.to_le_bytes())?;
            writer.write_all(&p.mod_id.to_le_bytes())?;
        }
        writer.write_all(&(self.decoys.len() as u16).to_le_bytes())?;
        for decoy in &self.decoys {
            writer.write_all(&decoy.slot.to_le_bytes())?;
            for idx in &decoy.permutation {
                writer.write_all(&idx.to_le_bytes())?;
            }
        }
        Ok(())
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Option<Self>> {
        let mass = match read_head::<_, 4>(reader)? {
            Some(head) => FixedMass(i32::from_le_bytes(head)),
            None => return Ok(None),
        };
        let base = Candidate::read_from(reader)?
            .ok_or_else(|| crate::Error::Corrupt("file ended inside a record".into()))?;
        let aux = u32::from_le_bytes(read_body(reader)?);
        let nterm = from_optional(read_u16(reader)?);
        let cterm = from_optional(read_u16(reader)?);

        let n = read_u16(reader)?;
        let mut placements = Vec::with_capacity(n as usize);
        for _ in 0..n {
            placements.push(Placement {
                index: read_u16(reader)?,
                mod_id: read_u16(reader)?,
            });
        }

        let n = read_u16(reader)?;
        let mut decoys = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let slot = read_u16(reader)?;
            let permutation = (0..base.length)
                .map(|_| read_u16(reader))
                .collect::<Result<Vec<_>>>()?;
            decoys.push(DecoyRecord { slot, permutation });
        }

        Ok(Some(ModifiedPeptide {
            mass,
            base,
            aux: (aux != u32::MAX).then_some(aux),
            nterm,
            cterm,
            placements,
            decoys,
        }))
    }

    fn mass(&self) -> FixedMass {
        self.mass
    }

    fn footprint(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.placements.len() * std::mem::size_of::<Placement>()
            + self
                .decoys
                .iter()
                .map(|d| std::mem::size_of::<DecoyRecord>() + d.permutation.len() * 2)
                .sum::<usize>()
    }
}

/// Order of the final index: modified mass first, then the candidate order
/// of the base peptide, then the modification placements
#[derive(Copy, Clone)]
pub struct ModifiedOrder<'s> {
    pub store: &'s ProteinStore,
}

impl<'s> Compare<ModifiedPeptide> for ModifiedOrder<'s> {
    fn compare(&self, a: &ModifiedPeptide, b: &ModifiedPeptide) -> Ordering {
        let base = CandidateOrder { store: self.store };
        a.mass
            .cmp(&b.mass)
            .then_with(|| a.base.length.cmp(&b.base.length))
            .then_with(|| a.base.residues(self.store).cmp(b.base.residues(self.store)))
            .then_with(|| {
                self.store
                    .is_decoy(a.base.protein_id)
                    .cmp(&self.store.is_decoy(b.base.protein_id))
            })
            .then_with(|| a.nterm.cmp(&b.nterm))
            .then_with(|| a.cterm.cmp(&b.cterm))
            .then_with(|| a.placements.cmp(&b.placements))
            .then_with(|| base.compare(&a.base, &b.base))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::spill::write_run;

    fn store() -> ProteinStore {
        let mut store = ProteinStore::new();
        store.push("A", b"AAKAAKGGK".to_vec(), false);
        store.push("rev_A", b"KGGKAAKAA".to_vec(), true);
        store
    }

    #[test]
    fn protein_termini() {
        let mut store = ProteinStore::new();
        store.push("P", b"MADEEK".to_vec(), false);
        let candidate = |offset, length| Candidate {
            mass: FixedMass(0),
            length,
            protein_id: 0,
            offset,
        };
        assert_eq!(candidate(0, 6).protein_termini(&store, false), (true, true));
        assert_eq!(candidate(1, 5).protein_termini(&store, false), (false, true));
        assert_eq!(candidate(1, 3).protein_termini(&store, true), (true, false));
        assert_eq!(candidate(2, 3).protein_termini(&store, true), (false, false));
    }

    #[test]
    fn candidate_order() {
        let store = store();
        let order = CandidateOrder { store: &store };
        let aak = Candidate {
            mass: FixedMass(100),
            length: 3,
            protein_id: 0,
            offset: 0,
        };
        let aak_again = Candidate { offset: 3, ..aak };
        let ggk = Candidate { offset: 6, ..aak };
        let decoy_aak = Candidate {
            protein_id: 1,
            offset: 4,
            ..aak
        };

        assert_eq!(order.compare(&aak, &aak_again), Ordering::Less);
        assert_eq!(order.compare(&ggk, &aak), Ordering::Greater);
        assert_eq!(order.compare(&decoy_aak, &aak_again), Ordering::Greater);
        assert!(aak.same_peptide(&aak_again, &store));
        assert!(aak.same_peptide(&decoy_aak, &store));
        assert!(!aak.same_peptide(&ggk, &store));
    }

    #[test]
    fn modified_peptides_survive_a_run() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let peptide = ModifiedPeptide {
            mass: FixedMass(123_456),
            base: Candidate {
                mass: FixedMass(100_000),
                length: 3,
                protein_id: 0,
                offset: 3,
            },
            aux: Some(7),
            nterm: Some(2),
            cterm: None,
            placements: vec![Placement { index: 1, mod_id: 0 }],
            decoys: vec![DecoyRecord {
                slot: 0,
                permutation: vec![0, 2, 1],
            }],
        };
        let plain = ModifiedPeptide::unmodified(peptide.base, None, Vec::new());
        let path = write_run(&[peptide.clone(), plain.clone()], dir.path(), "mods")?;

        let mut reader = std::io::BufReader::new(std::fs::File::open(&path)?);
        assert_eq!(ModifiedPeptide::read_from(&mut reader)?, Some(peptide));
        assert_eq!(ModifiedPeptide::read_from(&mut reader)?, Some(plain));
        assert_eq!(ModifiedPeptide::read_from(&mut reader)?, None);
        Ok(())
    }
}
