use fnv::FnvHashSet;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::collapse::UniqueTargetGroup;
use crate::mass::FixedMass;
use crate::peptide::Placement;
use crate::protein::ProteinStore;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecoyFormat {
    None,
    #[default]
    Shuffle,
    Reverse,
    /// Decoy proteins are reversed before digestion, and no peptide-level
    /// decoys are generated
    ProteinReverse,
}

impl DecoyFormat {
    /// Are decoys generated per peptide by [`DecoyGenerator`]?
    pub fn per_peptide(self) -> bool {
        matches!(self, DecoyFormat::Shuffle | DecoyFormat::Reverse)
    }
}

/// Residues held in place when a decoy is generated
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeepTerminal {
    None,
    N,
    C,
    #[default]
    NC,
}

impl KeepTerminal {
    /// Range of residue indices that may move
    fn movable(self, len: usize) -> std::ops::Range<usize> {
        let start = matches!(self, KeepTerminal::N | KeepTerminal::NC) as usize;
        let end = len - matches!(self, KeepTerminal::C | KeepTerminal::NC) as usize;
        start..end.max(start)
    }
}

/// A decoy generated from a target. `permutation[i]` is the decoy index of
/// target residue `i`, so composition and mass are unchanged
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DecoyRecord {
    pub slot: u16,
    pub permutation: Vec<u16>,
}

impl DecoyRecord {
    pub fn apply(&self, target: &[u8]) -> Vec<u8> {
        let mut decoy = vec![0; target.len()];
        for (i, &j) in self.permutation.iter().enumerate() {
            decoy[j as usize] = target[i];
        }
        decoy
    }

    /// Move the target's residue modifications to the decoy's residues
    pub fn reindex(&self, placements: &[Placement]) -> Vec<Placement> {
        let mut moved = placements
            .iter()
            .map(|p| Placement {
                index: self.permutation[p.index as usize],
                mod_id: p.mod_id,
            })
            .collect::<Vec<_>>();
        moved.sort();
        moved
    }
}

#[derive(Clone, Debug)]
pub struct DecoyParameters {
    pub format: DecoyFormat,
    pub keep_terminal: KeepTerminal,
    pub num_decoys: u16,
    pub allow_dups: bool,
    /// Permutations tried before a (target, slot) pair is given up on
    pub attempts: u32,
    pub seed: u64,
}

/// Generates decoys for a mass-ordered stream of unique targets. Only the
/// targets and decoys sharing the current mass are kept for the uniqueness
/// checks, since a permutation never changes mass
pub struct DecoyGenerator<'s> {
    store: &'s ProteinStore,
    params: DecoyParameters,
    rng: StdRng,
    mass: Option<FixedMass>,
    pending: Vec<UniqueTargetGroup>,
    generated: u64,
    failed: u64,
}

pub type Decoyed = (UniqueTargetGroup, Vec<DecoyRecord>);

impl<'s> DecoyGenerator<'s> {
    pub fn new(store: &'s ProteinStore, params: DecoyParameters) -> Self {
        DecoyGenerator {
            store,
            rng: StdRng::seed_from_u64(params.seed),
            params,
            mass: None,
            pending: Vec::new(),
            generated: 0,
            failed: 0,
        }
    }

    /// Add the next group. When it starts a new mass, the previous same-mass
    /// run is completed and returned with its decoys, in input order
    pub fn push(&mut self, group: UniqueTargetGroup) -> Vec<Decoyed> {
        let mass = group.representative.mass;
        let done = match self.mass {
            Some(current) if current != mass => self.finish(),
            _ => Vec::new(),
        };
        self.mass = Some(mass);
        self.pending.push(group);
        done
    }

    /// Complete the current same-mass run
    pub fn finish(&mut self) -> Vec<Decoyed> {
        let groups = std::mem::take(&mut self.pending);
        self.mass = None;
        if groups.is_empty() {
            return Vec::new();
        }

        let store = self.store;
        let targets = groups
            .iter()
            .map(|g| g.representative.residues(store))
            .collect::<FnvHashSet<_>>();
        let mut slots: Vec<FnvHashSet<Vec<u8>>> =
            vec![FnvHashSet::default(); self.params.num_decoys as usize];

        groups
            .into_iter()
            .map(|group| {
                let target = group.representative.residues(store);
                let mut decoys: Vec<DecoyRecord> = Vec::new();
                let mut own: Vec<Vec<u8>> = Vec::new();
                for slot in 0..self.params.num_decoys {
                    let seen = &mut slots[slot as usize];
                    match self.generate(target, &targets, seen, &own) {
                        Some((permutation, sequence)) => {
                            self.generated += 1;
                            seen.insert(sequence.clone());
                            own.push(sequence);
                            decoys.push(DecoyRecord { slot, permutation });
                        }
                        None => {
                            self.failed += 1;
                            log::debug!(
                                "failed to generate decoy {} for {}",
                                slot,
                                String::from_utf8_lossy(target)
                            );
                        }
                    }
                }
                (group, decoys)
            })
            .collect()
    }

    fn generate(
        &mut self,
        target: &[u8],
        targets: &FnvHashSet<&[u8]>,
        seen: &FnvHashSet<Vec<u8>>,
        own: &[Vec<u8>],
    ) -> Option<(Vec<u16>, Vec<u8>)> {
        let movable = self.params.keep_terminal.movable(target.len());
        if movable.len() < 2 {
            return None;
        }

        for attempt in 0..self.params.attempts {
            // `order[j]` is the target index placed at decoy index `j`
            let mut order = (0..target.len()).collect::<Vec<usize>>();
            match (attempt, self.params.format) {
                (0, DecoyFormat::Reverse) => order[movable.clone()].reverse(),
                _ => order[movable.clone()].shuffle(&mut self.rng),
            }
            let sequence = order.iter().map(|&i| target[i]).collect::<Vec<u8>>();

            let unique = sequence != target
                && (self.params.allow_dups
                    || (!targets.contains(sequence.as_slice())
                        && !seen.contains(&sequence)
                        && !own.contains(&sequence)));
            if unique {
                let mut permutation = vec![0u16; target.len()];
                for (j, &i) in order.iter().enumerate() {
                    permutation[i] = j as u16;
                }
                return Some((permutation, sequence));
            }
        }
        None
    }

    pub fn generated(&self) -> u64 {
        self.generated
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mass::{MassTable, MassType};
    use crate::modification::ModTable;
    use crate::peptide::Candidate;

    fn params(format: DecoyFormat, num_decoys: u16) -> DecoyParameters {
        DecoyParameters {
            format,
            keep_terminal: KeepTerminal::NC,
            num_decoys,
            allow_dups: false,
            attempts: 6,
            seed: 1,
        }
    }

    fn groups(store: &ProteinStore) -> Vec<UniqueTargetGroup> {
        let masses = MassTable::new(MassType::Monoisotopic, &ModTable::default());
        let mut groups = (0..store.len() as u32)
            .map(|protein_id| {
                let residues = &store.get(protein_id).residues;
                UniqueTargetGroup {
                    representative: Candidate {
                        mass: masses.peptide_mass(residues).unwrap(),
                        length: residues.len() as u16,
                        protein_id,
                        offset: 0,
                    },
                    aux_locations: Vec::new(),
                }
            })
            .collect::<Vec<_>>();
        groups.sort_by_key(|g| g.representative.mass);
        groups
    }

    fn run(store: &ProteinStore, params: DecoyParameters) -> (Vec<Decoyed>, u64, u64) {
        let mut generator = DecoyGenerator::new(store, params);
        let mut out = Vec::new();
        for group in groups(store) {
            out.extend(generator.push(group));
        }
        out.extend(generator.finish());
        (out, generator.generated(), generator.failed())
    }

    #[test]
    fn reverse_keeps_termini() {
        let mut store = ProteinStore::new();
        store.push("P", b"PEPTIDEK".to_vec(), false);
        let (out, generated, failed) = run(&store, params(DecoyFormat::Reverse, 1));
        assert_eq!((generated, failed), (1, 0));
        let decoy = &out[0].1[0];
        assert_eq!(decoy.apply(b"PEPTIDEK"), b"PEDITPEK");
        assert_eq!(decoy.permutation, vec![0, 6, 5, 4, 3, 2, 1, 7]);
    }

    #[test]
    fn scenario_two_decoys() {
        let mut store = ProteinStore::new();
        store.push("P", b"PEPTIDE".to_vec(), false);
        let masses = MassTable::new(MassType::Monoisotopic, &ModTable::default());

        let (out, generated, failed) = run(&store, params(DecoyFormat::Shuffle, 2));
        assert_eq!(generated + failed, 2);
        assert!(failed <= 2);

        let decoys = out[0]
            .1
            .iter()
            .map(|d| d.apply(b"PEPTIDE"))
            .collect::<Vec<_>>();
        for decoy in &decoys {
            assert_ne!(decoy.as_slice(), b"PEPTIDE");
            assert_eq!(decoy[0], b'P');
            assert_eq!(decoy[6], b'E');
            assert_eq!(masses.peptide_mass(decoy), masses.peptide_mass(b"PEPTIDE"));
        }
        if decoys.len() == 2 {
            assert_ne!(decoys[0], decoys[1]);
        }

        // Seeded, so a rerun yields the same decoys
        let (again, _, _) = run(&store, params(DecoyFormat::Shuffle, 2));
        assert_eq!(out, again);
    }

    #[test]
    fn same_mass_disjointness() {
        // Permutations of each other, so every target shares one mass
        let mut store = ProteinStore::new();
        for seq in [
            "KAVLEGTR", "KVALEGTR", "KLAVEGTR", "KEGLAVTR", "KTGELAVR", "KGTLEAVR",
        ] {
            store.push(seq, seq.as_bytes().to_vec(), false);
        }
        let (out, generated, failed) = run(&store, params(DecoyFormat::Shuffle, 1));
        assert_eq!(out.len(), 6);
        assert_eq!(generated + failed, 6);

        let targets = out
            .iter()
            .map(|(g, _)| g.representative.residues(&store).to_vec())
            .collect::<FnvHashSet<_>>();
        let mut decoys = FnvHashSet::default();
        for (group, records) in &out {
            let target = group.representative.residues(&store);
            for record in records {
                let decoy = record.apply(target);
                assert!(!targets.contains(&decoy));
                assert!(decoys.insert(decoy));
            }
        }
    }

    #[test]
    fn too_short_to_shuffle() {
        let mut store = ProteinStore::new();
        store.push("P", b"PEK".to_vec(), false);
        let (out, generated, failed) = run(&store, params(DecoyFormat::Shuffle, 1));
        assert_eq!((generated, failed), (0, 1));
        assert!(out[0].1.is_empty());
    }

    #[test]
    fn reindex_placements() {
        let decoy = DecoyRecord {
            slot: 0,
            permutation: vec![0, 3, 2, 1, 4],
        };
        let placements = vec![
            Placement { index: 0, mod_id: 5 },
            Placement { index: 1, mod_id: 7 },
        ];
        assert_eq!(
            decoy.reindex(&placements),
            vec![
                Placement { index: 0, mod_id: 5 },
                Placement { index: 3, mod_id: 7 },
            ]
        );
    }
}
