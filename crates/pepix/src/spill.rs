//! On-disk sorted runs and the k-way merge that reads them back

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::Path;

use tempfile::{Builder as TempFileBuilder, TempPath};

use crate::heap::{Compare, MinHeap};
use crate::mass::FixedMass;
use crate::{Error, Result};

/// A record that can be written to, and read back from, a sorted run
pub trait Spill: Sized {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()>;

    /// Read the next record, or `None` on a clean end of file. A file that
    /// ends partway through a record is corrupt
    fn read_from<R: Read>(reader: &mut R) -> Result<Option<Self>>;

    /// Primary sort key, reported when a merge detects an ordering violation
    fn mass(&self) -> FixedMass;

    /// Approximate in-memory size, used to convert a byte budget into a
    /// buffer capacity
    fn footprint(&self) -> usize {
        std::mem::size_of::<Self>()
    }
}

/// Read the fixed-size head of a record. End of file is only clean at a
/// record boundary
pub fn read_head<R: Read, const N: usize>(reader: &mut R) -> Result<Option<[u8; N]>> {
    let mut buf = [0u8; N];
    let mut filled = 0;
    while filled < N {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    match filled {
        0 => Ok(None),
        n if n == N => Ok(Some(buf)),
        n => Err(Error::Corrupt(format!(
            "file ended {} bytes into a {} byte record",
            n, N
        ))),
    }
}

/// Read a fixed-size field that must be present
pub fn read_body<R: Read, const N: usize>(reader: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    match reader.read_exact(&mut buf) {
        Ok(()) => Ok(buf),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(Error::Corrupt("file ended inside a record".into()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Write already-sorted records to a new temporary run inside `dir`
pub fn write_run<T: Spill>(records: &[T], dir: &Path, prefix: &str) -> Result<TempPath> {
    let mut tmp = TempFileBuilder::new()
        .prefix(prefix)
        .suffix(".run")
        .tempfile_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        for record in records {
            record.write_to(&mut writer)?;
        }
        writer.flush()?;
    }
    Ok(tmp.into_temp_path())
}

pub struct RunReader<T> {
    reader: BufReader<File>,
    // Deleted from disk when the reader is dropped
    path: TempPath,
    _marker: PhantomData<T>,
}

impl<T: Spill> RunReader<T> {
    pub fn open(path: TempPath) -> Result<Self> {
        let file = File::open(&path)?;
        Ok(RunReader {
            reader: BufReader::new(file),
            path,
            _marker: PhantomData,
        })
    }

    pub fn next_record(&mut self) -> Result<Option<T>> {
        T::read_from(&mut self.reader).map_err(|e| match e {
            Error::Corrupt(msg) => Error::Corrupt(format!("{}: {}", self.path.display(), msg)),
            e => e,
        })
    }
}

/// Heap entry: a record tagged with the run it must be refilled from
struct Entry<T> {
    record: T,
    run: usize,
}

struct ByRecord<C>(C);

impl<T, C: Compare<T>> Compare<Entry<T>> for ByRecord<C> {
    fn compare(&self, a: &Entry<T>, b: &Entry<T>) -> std::cmp::Ordering {
        self.0
            .compare(&a.record, &b.record)
            .then_with(|| a.run.cmp(&b.run))
    }
}

/// K-way merge over sorted runs. Yields records in order, and fails if it
/// ever observes a record smaller than the one before it
pub struct Merge<T, C> {
    readers: Vec<Option<RunReader<T>>>,
    heap: MinHeap<Entry<T>, ByRecord<C>>,
    previous: Option<T>,
    position: u64,
    failed: bool,
}

impl<T, C> Merge<T, C>
where
    T: Spill + Clone,
    C: Compare<T>,
{
    pub fn open(runs: Vec<TempPath>, cmp: C) -> Result<Self> {
        let mut readers = Vec::with_capacity(runs.len());
        let mut heap = MinHeap::with_capacity(runs.len(), ByRecord(cmp));
        for (run, path) in runs.into_iter().enumerate() {
            let mut reader = RunReader::open(path)?;
            match reader.next_record()? {
                Some(record) => {
                    heap.push(Entry { record, run });
                    readers.push(Some(reader));
                }
                None => readers.push(None),
            }
        }
        log::trace!("merging {} runs", readers.len());
        Ok(Merge {
            readers,
            heap,
            previous: None,
            position: 0,
            failed: false,
        })
    }

    fn advance(&mut self) -> Result<Option<T>> {
        let Entry { record, run } = match self.heap.pop() {
            Some(entry) => entry,
            None => return Ok(None),
        };

        if let Some(reader) = self.readers[run].as_mut() {
            match reader.next_record()? {
                Some(next) => self.heap.push(Entry { record: next, run }),
                // Exhausted, drop the reader to delete the run
                None => self.readers[run] = None,
            }
        }

        if let Some(previous) = &self.previous {
            if self.heap.comparator().0.compare(previous, &record) == std::cmp::Ordering::Greater {
                return Err(Error::OutOfOrder {
                    position: self.position,
                    mass: record.mass(),
                    previous: previous.mass(),
                });
            }
        }
        self.position += 1;
        self.previous = Some(record.clone());
        Ok(Some(record))
    }
}

impl<T, C> Iterator for Merge<T, C>
where
    T: Spill + Clone,
    C: Compare<T>,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.advance() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// The output of an external sort: either the buffer sorted in memory, when
/// nothing was ever flushed, or a merge over the flushed runs
pub enum Sorted<T, C> {
    Memory(std::vec::IntoIter<T>),
    Runs(Merge<T, C>),
}

impl<T, C> Iterator for Sorted<T, C>
where
    T: Spill + Clone,
    C: Compare<T>,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Sorted::Memory(iter) => iter.next().map(Ok),
            Sorted::Runs(merge) => merge.next(),
        }
    }
}
