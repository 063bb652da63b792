use std::collections::btree_map::{BTreeMap, IntoIter};
use std::path::{Path, PathBuf};

use crate::mass::FixedMass;
use crate::peptide::{ModifiedOrder, ModifiedPeptide};
use crate::sort::ExternalSorter;
use crate::spill::{Sorted, Spill};
use crate::Result;

type Bucket<'s> = ExternalSorter<ModifiedPeptide, ModifiedOrder<'s>>;

/// Partitions modified peptides by coarse mass range. Each bucket is its own
/// external sort, and all buckets share one memory budget: when it is
/// exceeded the bucket holding the most bytes is flushed to a run
pub struct MassBuckets<'s> {
    dir: PathBuf,
    width: i64,
    memory_limit: usize,
    buffered: usize,
    order: ModifiedOrder<'s>,
    buckets: BTreeMap<i64, Bucket<'s>>,
    pushed: u64,
}

impl<'s> MassBuckets<'s> {
    pub fn new<P: AsRef<Path>>(
        dir: P,
        width: FixedMass,
        memory_limit: usize,
        order: ModifiedOrder<'s>,
    ) -> Self {
        MassBuckets {
            dir: dir.as_ref().to_path_buf(),
            width: (width.0 as i64).max(1),
            memory_limit,
            buffered: 0,
            order,
            buckets: BTreeMap::new(),
            pushed: 0,
        }
    }

    pub fn push(&mut self, peptide: ModifiedPeptide) -> Result<()> {
        let key = (peptide.mass.0 as i64).div_euclid(self.width);
        self.buffered += peptide.footprint();
        self.pushed += 1;

        let (dir, order) = (&self.dir, self.order);
        self.buckets
            .entry(key)
            .or_insert_with(|| ExternalSorter::new(dir, format!("bucket-{}-", key), usize::MAX, order))
            .push(peptide)?;

        if self.buffered >= self.memory_limit {
            if let Some(bucket) = self.buckets.values_mut().max_by_key(|b| b.buffered()) {
                self.buffered -= bucket.buffered();
                bucket.flush()?;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.pushed
    }

    pub fn is_empty(&self) -> bool {
        self.pushed == 0
    }

    pub fn buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Runs flushed across every bucket
    pub fn runs(&self) -> usize {
        self.buckets.values().map(|b| b.runs()).sum()
    }

    /// Merge the buckets back into one stream ordered by modified mass.
    /// Buckets cover disjoint mass ranges, so they are finished one at a
    /// time in key order
    pub fn finish(self) -> BucketStream<'s> {
        log::debug!(
            "finishing {} mass buckets ({} runs)",
            self.buckets(),
            self.runs()
        );
        BucketStream {
            buckets: self.buckets.into_iter(),
            current: None,
            failed: false,
        }
    }
}

pub struct BucketStream<'s> {
    buckets: IntoIter<i64, Bucket<'s>>,
    current: Option<Sorted<ModifiedPeptide, ModifiedOrder<'s>>>,
    failed: bool,
}

impl<'s> Iterator for BucketStream<'s> {
    type Item = Result<ModifiedPeptide>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(current) = self.current.as_mut() {
                match current.next() {
                    Some(Err(e)) => {
                        self.failed = true;
                        return Some(Err(e));
                    }
                    Some(record) => return Some(record),
                    // Drop the exhausted bucket before opening the next
                    None => self.current = None,
                }
            }

            let (key, bucket) = self.buckets.next()?;
            log::trace!("merging bucket {} ({} peptides)", key, bucket.len());
            match bucket.finish() {
                Ok(sorted) => self.current = Some(sorted),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
