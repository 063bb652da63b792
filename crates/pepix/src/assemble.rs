use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::index::{IndexPeptide, PeptideWriter};
use crate::mass::{FixedMass, MassTable};
use crate::modification::ModTable;
use crate::peptide::{ModifiedPeptide, Placement};
use crate::protein::ProteinStore;
use crate::{Error, Result};

/// Where in a peptide a residue was observed
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Terminus {
    N = 0,
    Internal = 1,
    C = 2,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResidueCount {
    pub mass: f64,
    pub fixed: FixedMass,
    pub nterm: u64,
    pub internal: u64,
    pub cterm: u64,
}

/// Residue frequencies keyed by exact (possibly modified) residue mass, at
/// the peptide N-terminus, internally, and at the C-terminus
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<ResidueCount>", into = "Vec<ResidueCount>")]
pub struct ResidueStats {
    counts: BTreeMap<FixedMass, [u64; 3]>,
}

impl ResidueStats {
    pub fn add(&mut self, mass: FixedMass, terminus: Terminus) {
        self.counts.entry(mass).or_default()[terminus as usize] += 1;
    }

    /// `[nterm, internal, cterm]` counts for a residue mass
    pub fn get(&self, mass: FixedMass) -> Option<[u64; 3]> {
        self.counts.get(&mass).copied()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FixedMass, [u64; 3])> + '_ {
        self.counts.iter().map(|(m, c)| (*m, *c))
    }
}

impl From<Vec<ResidueCount>> for ResidueStats {
    fn from(counts: Vec<ResidueCount>) -> Self {
        ResidueStats {
            counts: counts
                .into_iter()
                .map(|c| (c.fixed, [c.nterm, c.internal, c.cterm]))
                .collect(),
        }
    }
}

impl From<ResidueStats> for Vec<ResidueCount> {
    fn from(stats: ResidueStats) -> Self {
        stats
            .counts
            .into_iter()
            .map(|(fixed, [nterm, internal, cterm])| ResidueCount {
                mass: fixed.to_f64(),
                fixed,
                nterm,
                internal,
                cterm,
            })
            .collect()
    }
}

/// Writes the final, mass-ordered peptide stream: every target is directly
/// followed by its decoys, with modifications moved through each decoy's
/// permutation
pub struct Assembler<'a> {
    store: &'a ProteinStore,
    masses: &'a MassTable,
    mods: &'a ModTable,
    clip_nterm_methionine: bool,
    writer: PeptideWriter,
    stats: ResidueStats,
    previous: Option<FixedMass>,
    targets: u64,
    decoys: u64,
}

impl<'a> Assembler<'a> {
    pub fn new(
        store: &'a ProteinStore,
        masses: &'a MassTable,
        mods: &'a ModTable,
        clip_nterm_methionine: bool,
        writer: PeptideWriter,
    ) -> Self {
        Assembler {
            store,
            masses,
            mods,
            clip_nterm_methionine,
            writer,
            stats: ResidueStats::default(),
            previous: None,
            targets: 0,
            decoys: 0,
        }
    }

    pub fn write(&mut self, peptide: ModifiedPeptide) -> Result<()> {
        if let Some(previous) = self.previous.filter(|&p| p > peptide.mass) {
            return Err(Error::OutOfOrder {
                position: self.writer.len(),
                mass: peptide.mass,
                previous,
            });
        }
        self.previous = Some(peptide.mass);

        let residues = peptide.base.residues(self.store);
        let termini = peptide
            .base
            .protein_termini(self.store, self.clip_nterm_methionine);
        let record = IndexPeptide {
            mass: peptide.mass,
            protein_id: peptide.base.protein_id,
            offset: peptide.base.offset,
            length: peptide.base.length,
            aux: peptide.aux,
            nterm: peptide.nterm,
            cterm: peptide.cterm,
            placements: peptide.placements.clone(),
            decoy: None,
        };
        self.tally(residues, &record, termini);
        self.push(&record)?;
        self.targets += 1;

        for decoy in &peptide.decoys {
            let record = IndexPeptide {
                placements: decoy.reindex(&peptide.placements),
                decoy: Some((decoy.slot, decoy.permutation.clone())),
                ..record.clone()
            };
            self.tally(&decoy.apply(residues), &record, termini);
            self.push(&record)?;
            self.decoys += 1;
        }
        Ok(())
    }

    fn push(&mut self, record: &IndexPeptide) -> Result<()> {
        self.writer.push(record)?;
        if self.writer.len() % 1_000_000 == 0 {
            log::info!("- wrote {} peptides", self.writer.len());
        }
        Ok(())
    }

    fn tally(&mut self, residues: &[u8], record: &IndexPeptide, (nterm, cterm): (bool, bool)) {
        let (protein_nterm, protein_cterm) = self.masses.protein_termini();
        let mut deltas = vec![FixedMass::default(); residues.len()];
        for &Placement { index, mod_id } in &record.placements {
            deltas[index as usize] += self.mods.get(mod_id).fixed;
        }
        if let Some(first) = deltas.first_mut() {
            *first += self.masses.nterm();
            if nterm {
                *first += protein_nterm;
            }
            if let Some(id) = record.nterm {
                *first += self.mods.get(id).fixed;
            }
        }
        if let Some(last) = deltas.last_mut() {
            *last += self.masses.cterm();
            if cterm {
                *last += protein_cterm;
            }
            if let Some(id) = record.cterm {
                *last += self.mods.get(id).fixed;
            }
        }

        // A single residue is both the N- and the C-terminus
        if let ([aa], [delta]) = (residues, deltas.as_slice()) {
            if let Some(mass) = self.masses.residue(*aa) {
                self.stats.add(mass + *delta, Terminus::N);
                self.stats.add(mass + *delta, Terminus::C);
            }
            return;
        }

        let last = residues.len().saturating_sub(1);
        for (idx, (&aa, &delta)) in residues.iter().zip(&deltas).enumerate() {
            let mass = match self.masses.residue(aa) {
                Some(mass) => mass + delta,
                None => continue,
            };
            let terminus = match idx {
                0 => Terminus::N,
                i if i == last => Terminus::C,
                _ => Terminus::Internal,
            };
            self.stats.add(mass, terminus);
        }
    }

    /// Number of target and decoy records written
    pub fn counts(&self) -> (u64, u64) {
        (self.targets, self.decoys)
    }

    pub fn finish(self) -> (PeptideWriter, ResidueStats) {
        (self.writer, self.stats)
    }
}
