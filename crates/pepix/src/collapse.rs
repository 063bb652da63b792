use serde::{Deserialize, Serialize};

use crate::peptide::Candidate;
use crate::protein::ProteinStore;
use crate::Result;

/// An additional locus of an already emitted peptide
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    pub protein_id: u32,
    pub offset: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniqueTargetGroup {
    pub representative: Candidate,
    pub aux_locations: Vec<Location>,
}

impl UniqueTargetGroup {
    fn new(representative: Candidate) -> Self {
        UniqueTargetGroup {
            representative,
            aux_locations: Vec::new(),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CollapseCounts {
    /// Candidates folded into an earlier representative
    pub duplicates: u64,
    /// Groups emitted
    pub unique: u64,
    /// Decoy candidates dropped because a target has the same sequence
    pub collisions: u64,
}

/// Folds runs of identical peptides in a sorted candidate stream into one
/// [`UniqueTargetGroup`] each. Output order is the input order
pub struct Collapse<'s, I> {
    inner: I,
    store: &'s ProteinStore,
    current: Option<UniqueTargetGroup>,
    allow_dups: bool,
    counts: CollapseCounts,
}

impl<'s, I> Collapse<'s, I>
where
    I: Iterator<Item = Result<Candidate>>,
{
    /// With `allow_dups`, every candidate becomes its own group
    pub fn new(inner: I, store: &'s ProteinStore, allow_dups: bool) -> Self {
        Collapse {
            inner,
            store,
            current: None,
            allow_dups,
            counts: CollapseCounts::default(),
        }
    }

    pub fn counts(&self) -> CollapseCounts {
        self.counts
    }

    fn emit(&mut self, next: Option<Candidate>) -> Option<Result<UniqueTargetGroup>> {
        let done = match next {
            Some(candidate) => self.current.replace(UniqueTargetGroup::new(candidate)),
            None => self.current.take(),
        };
        if done.is_some() {
            self.counts.unique += 1;
        }
        done.map(Ok)
    }
}

impl<'s, I> Iterator for Collapse<'s, I>
where
    I: Iterator<Item = Result<Candidate>>,
{
    type Item = Result<UniqueTargetGroup>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let candidate = match self.inner.next() {
                Some(Ok(candidate)) => candidate,
                Some(Err(e)) => return Some(Err(e)),
                None => return self.emit(None),
            };

            let group = match self.current.as_mut() {
                Some(group) => group,
                None => {
                    self.current = Some(UniqueTargetGroup::new(candidate));
                    continue;
                }
            };

            let rep = &group.representative;
            if self.allow_dups || !rep.same_peptide(&candidate, self.store) {
                return self.emit(Some(candidate));
            }

            // Targets sort ahead of decoys with the same sequence
            if self.store.is_decoy(candidate.protein_id) && !self.store.is_decoy(rep.protein_id) {
                self.counts.collisions += 1;
            } else {
                self.counts.duplicates += 1;
                group.aux_locations.push(Location {
                    protein_id: candidate.protein_id,
                    offset: candidate.offset,
                });
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mass::FixedMass;

    fn candidate(mass: i32, protein_id: u32, offset: u32, length: u16) -> Candidate {
        Candidate {
            mass: FixedMass(mass),
            length,
            protein_id,
            offset,
        }
    }

    fn collapse(
        input: Vec<Candidate>,
        store: &ProteinStore,
        allow_dups: bool,
    ) -> (Vec<UniqueTargetGroup>, CollapseCounts) {
        let mut collapse = Collapse::new(input.into_iter().map(Ok), store, allow_dups);
        let groups = collapse.by_ref().collect::<Result<Vec<_>>>().unwrap();
        (groups, collapse.counts())
    }

    #[test]
    fn duplicate_aak() {
        let mut store = ProteinStore::new();
        store.push("P0", b"AAKGGG".to_vec(), false);
        store.push("P1", b"GGGGGAAK".to_vec(), false);

        let (groups, counts) = collapse(
            vec![candidate(50000, 0, 0, 3), candidate(50000, 1, 5, 3)],
            &store,
            false,
        );
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].representative, candidate(50000, 0, 0, 3));
        assert_eq!(
            groups[0].aux_locations,
            vec![Location {
                protein_id: 1,
                offset: 5
            }]
        );
        assert_eq!(counts.duplicates, 1);
        assert_eq!(counts.unique, 1);

        let (groups, counts) = collapse(
            vec![candidate(50000, 0, 0, 3), candidate(50000, 1, 5, 3)],
            &store,
            true,
        );
        assert_eq!(groups.len(), 2);
        assert_eq!(counts.duplicates, 0);
    }

    #[test]
    fn collapse_is_idempotent() {
        let mut store = ProteinStore::new();
        store.push("P0", b"AAKGGGAAKCCK".to_vec(), false);

        // Same mass but different residues, then a heavier peptide
        let input = vec![
            candidate(10, 0, 0, 3),
            candidate(10, 0, 3, 3),
            candidate(20, 0, 9, 3),
        ];
        let (groups, counts) = collapse(input.clone(), &store, false);
        assert_eq!(
            groups.iter().map(|g| g.representative).collect::<Vec<_>>(),
            input
        );
        assert!(groups.iter().all(|g| g.aux_locations.is_empty()));
        assert_eq!(counts.duplicates, 0);
        assert_eq!(counts.unique, 3);

        let (again, _) = collapse(
            groups.iter().map(|g| g.representative).collect(),
            &store,
            false,
        );
        assert_eq!(again, groups);
    }

    #[test]
    fn decoy_collisions() {
        let mut store = ProteinStore::new();
        store.push("P0", b"PEPTIDEK".to_vec(), false);
        store.push("rev_P0", b"KEDITPEP".to_vec(), true);
        store.push("rev_P1", b"PEPTIDEK".to_vec(), true);

        let (groups, counts) = collapse(
            vec![candidate(1, 0, 0, 8), candidate(1, 2, 0, 8)],
            &store,
            false,
        );
        assert_eq!(groups.len(), 1);
        assert!(groups[0].aux_locations.is_empty());
        assert_eq!(counts.collisions, 1);
    }

    #[test]
    fn empty_stream() {
        let store = ProteinStore::new();
        let (groups, counts) = collapse(Vec::new(), &store, false);
        assert!(groups.is_empty());
        assert_eq!(counts, CollapseCounts::default());
    }
}
