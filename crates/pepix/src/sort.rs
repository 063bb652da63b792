use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tempfile::TempPath;

use crate::heap::Compare;
use crate::spill::{write_run, Merge, Sorted, Spill};
use crate::Result;

/// Sorts more records than fit in memory. Records are buffered until the
/// byte budget is reached, then sorted and flushed to a run on disk;
/// [`ExternalSorter::finish`] merges the runs back into one ordered stream
pub struct ExternalSorter<T, C> {
    buffer: Vec<T>,
    buffered_bytes: usize,
    memory_limit: usize,
    dir: PathBuf,
    prefix: String,
    runs: Vec<TempPath>,
    pushed: u64,
    cmp: C,
}

impl<T, C> ExternalSorter<T, C>
where
    T: Spill + Clone + Send,
    C: Compare<T> + Sync,
{
    /// `memory_limit` is in bytes, and is converted into a record count by
    /// each record's [`Spill::footprint`]
    pub fn new<P: AsRef<Path>, S: Into<String>>(
        dir: P,
        prefix: S,
        memory_limit: usize,
        cmp: C,
    ) -> Self {
        ExternalSorter {
            buffer: Vec::new(),
            buffered_bytes: 0,
            memory_limit,
            dir: dir.as_ref().to_path_buf(),
            prefix: prefix.into(),
            runs: Vec::new(),
            pushed: 0,
            cmp,
        }
    }

    pub fn push(&mut self, record: T) -> Result<()> {
        self.buffered_bytes += record.footprint();
        self.buffer.push(record);
        self.pushed += 1;
        if self.buffered_bytes >= self.memory_limit {
            self.flush()?;
        }
        Ok(())
    }

    /// Sort the buffer and write it to a new run
    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let cmp = &self.cmp;
        self.buffer.par_sort_unstable_by(|a, b| cmp.compare(a, b));
        let run = write_run(&self.buffer, &self.dir, &self.prefix)?;
        log::trace!(
            "flushed {} records to {}",
            self.buffer.len(),
            run.display()
        );
        self.runs.push(run);
        self.buffer.clear();
        self.buffered_bytes = 0;
        Ok(())
    }

    /// Total number of records pushed
    pub fn len(&self) -> u64 {
        self.pushed
    }

    pub fn is_empty(&self) -> bool {
        self.pushed == 0
    }

    /// Number of runs flushed to disk so far
    pub fn runs(&self) -> usize {
        self.runs.len()
    }

    /// Bytes currently held in the in-memory buffer
    pub fn buffered(&self) -> usize {
        self.buffered_bytes
    }

    /// Flush the remainder and merge every run. If nothing was ever flushed,
    /// the buffer is sorted in memory and never touches disk
    pub fn finish(mut self) -> Result<Sorted<T, C>> {
        if self.runs.is_empty() {
            let cmp = &self.cmp;
            self.buffer.par_sort_unstable_by(|a, b| cmp.compare(a, b));
            return Ok(Sorted::Memory(self.buffer.into_iter()));
        }
        self.flush()?;
        Ok(Sorted::Runs(Merge::open(self.runs, self.cmp)?))
    }
}
