//! On-disk layout of a built index, and a reader for it
//!
//! Binary files start with a `u32` little-endian length followed by a JSON
//! header, then fixed-field little-endian records

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::collapse::Location;
use crate::decoy::{DecoyFormat, KeepTerminal};
use crate::enzyme::EnzymeSettings;
use crate::mass::{FixedMass, MassType};
use crate::modification::ModTable;
use crate::peptide::{from_optional, optional, read_u16, Placement};
use crate::protein::ProteinStore;
use crate::spill::{read_body, read_head, Spill};
use crate::{Error, Result};

pub const VERSION: u32 = 1;
pub const PROTEIN_FILE: &str = "protix";
pub const PEPTIDE_FILE: &str = "pepix";
pub const AUX_FILE: &str = "auxlocs";
pub const STATS_FILE: &str = "residue_stats.json";
pub const SUMMARY_FILE: &str = "summary.json";
pub const DECOY_FASTA_FILE: &str = "decoy.fasta";

/// Every file a build writes, in the order a stale index is removed
pub const INDEX_FILES: [&str; 6] = [
    PEPTIDE_FILE,
    PROTEIN_FILE,
    AUX_FILE,
    STATS_FILE,
    SUMMARY_FILE,
    DECOY_FASTA_FILE,
];

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Protix,
    Pepix,
    Auxlocs,
}

pub fn write_header<W: Write, H: Serialize>(writer: &mut W, header: &H) -> Result<()> {
    let json = serde_json::to_vec(header)?;
    let len = u32::try_from(json.len())
        .map_err(|_| Error::Format(format!("header of {} bytes is too large", json.len())))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&json)?;
    Ok(())
}

pub fn read_header<R: Read, H: DeserializeOwned>(reader: &mut R) -> Result<H> {
    let len = u32::from_le_bytes(
        read_head(reader)?.ok_or_else(|| Error::Format("missing header".into()))?,
    );
    let mut json = vec![0u8; len as usize];
    reader
        .read_exact(&mut json)
        .map_err(|_| Error::Format("truncated header".into()))?;
    Ok(serde_json::from_slice(&json)?)
}

fn expect(found: FileType, expected: FileType, version: u32) -> Result<()> {
    if found != expected {
        return Err(Error::Format(format!(
            "expected a {:?} file, found {:?}",
            expected, found
        )));
    }
    if version != VERSION {
        return Err(Error::Format(format!(
            "unsupported {:?} version {}",
            found, version
        )));
    }
    Ok(())
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProteinHeader {
    pub file_type: FileType,
    pub version: u32,
    pub proteins: u32,
    pub decoy_tag: String,
}

pub fn write_proteins(path: &Path, store: &ProteinStore, decoy_tag: &str) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    let header = ProteinHeader {
        file_type: FileType::Protix,
        version: VERSION,
        proteins: store.len() as u32,
        decoy_tag: decoy_tag.into(),
    };
    write_header(&mut writer, &header)?;
    for protein in store.as_slice() {
        writer.write_all(&protein.id.to_le_bytes())?;
        writer.write_all(&[protein.decoy as u8])?;
        writer.write_all(&(protein.name.len() as u32).to_le_bytes())?;
        writer.write_all(protein.name.as_bytes())?;
        writer.write_all(&(protein.residues.len() as u32).to_le_bytes())?;
        writer.write_all(&protein.residues)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_proteins(path: &Path) -> Result<(ProteinHeader, ProteinStore)> {
    let mut reader = BufReader::new(File::open(path)?);
    let header: ProteinHeader = read_header(&mut reader)?;
    expect(header.file_type, FileType::Protix, header.version)?;

    let bytes = |reader: &mut BufReader<File>| -> Result<Vec<u8>> {
        let len = u32::from_le_bytes(read_body(reader)?) as usize;
        let mut buf = vec![0u8; len];
        reader
            .read_exact(&mut buf)
            .map_err(|_| Error::Corrupt("protein record truncated".into()))?;
        Ok(buf)
    };

    let mut store = ProteinStore::new();
    while let Some(id) = read_head::<_, 4>(&mut reader)? {
        let id = u32::from_le_bytes(id);
        let [decoy] = read_body::<_, 1>(&mut reader)?;
        let name = String::from_utf8(bytes(&mut reader)?)
            .map_err(|_| Error::Corrupt(format!("protein {} name is not utf-8", id)))?;
        let residues = bytes(&mut reader)?;
        if store.push(name, residues, decoy != 0) != id {
            return Err(Error::Corrupt(format!("protein {} out of sequence", id)));
        }
    }
    if store.len() != header.proteins as usize {
        return Err(Error::Corrupt(format!(
            "expected {} proteins, found {}",
            header.proteins,
            store.len()
        )));
    }
    Ok((header, store))
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuxHeader {
    pub file_type: FileType,
    pub version: u32,
}

/// Writes auxiliary-location lists as they are produced. Each list is
/// referenced from the peptide file by its index
pub struct AuxWriter {
    writer: BufWriter<File>,
    count: u32,
}

impl AuxWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let mut writer = BufWriter::new(File::create(path)?);
        write_header(
            &mut writer,
            &AuxHeader {
                file_type: FileType::Auxlocs,
                version: VERSION,
            },
        )?;
        Ok(AuxWriter { writer, count: 0 })
    }

    pub fn push(&mut self, locations: &[Location]) -> Result<u32> {
        self.writer
            .write_all(&(locations.len() as u32).to_le_bytes())?;
        for loc in locations {
            self.writer.write_all(&loc.protein_id.to_le_bytes())?;
            self.writer.write_all(&loc.offset.to_le_bytes())?;
        }
        self.count += 1;
        Ok(self.count - 1)
    }

    /// Flush, returning the number of lists written
    pub fn finish(mut self) -> Result<u32> {
        self.writer.flush()?;
        Ok(self.count)
    }
}

pub fn read_aux(path: &Path) -> Result<Vec<Vec<Location>>> {
    let mut reader = BufReader::new(File::open(path)?);
    let header: AuxHeader = read_header(&mut reader)?;
    expect(header.file_type, FileType::Auxlocs, header.version)?;

    let mut lists = Vec::new();
    while let Some(len) = read_head::<_, 4>(&mut reader)? {
        let len = u32::from_le_bytes(len);
        let mut list = Vec::with_capacity(len as usize);
        for _ in 0..len {
            list.push(Location {
                protein_id: u32::from_le_bytes(read_body(&mut reader)?),
                offset: u32::from_le_bytes(read_body(&mut reader)?),
            });
        }
        lists.push(list);
    }
    Ok(lists)
}

/// Header of the peptide file. Everything a search needs to interpret the
/// records without re-deriving the build settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeptideHeader {
    pub file_type: FileType,
    pub version: u32,
    pub peptides: u64,
    pub min_mass: f64,
    pub max_mass: f64,
    pub min_len: usize,
    pub max_len: usize,
    pub enzyme: EnzymeSettings,
    pub mass_type: MassType,
    pub mods: ModTable,
    pub min_mods: usize,
    pub max_mods: usize,
    pub mod_precision: usize,
    pub decoy_format: DecoyFormat,
    pub keep_terminal_aminos: KeepTerminal,
    pub decoys_per_target: u16,
}

/// One record of the peptide file. Generated decoys share the locator of
/// their target and carry the permutation that produces their residues
#[derive(Clone, Debug, PartialEq)]
pub struct IndexPeptide {
    pub mass: FixedMass,
    pub protein_id: u32,
    pub offset: u32,
    pub length: u16,
    pub aux: Option<u32>,
    pub nterm: Option<u16>,
    pub cterm: Option<u16>,
    pub placements: Vec<Placement>,
    /// Decoy slot and permutation of a generated decoy
    pub decoy: Option<(u16, Vec<u16>)>,
}

impl IndexPeptide {
    /// Residues of this peptide, with decoy permutations applied
    pub fn residues(&self, store: &ProteinStore) -> Vec<u8> {
        let target = store.residues(self.protein_id, self.offset, self.length);
        match &self.decoy {
            Some((_, permutation)) => {
                let mut decoy = vec![0; target.len()];
                for (i, &j) in permutation.iter().enumerate() {
                    decoy[j as usize] = target[i];
                }
                decoy
            }
            None => target.to_vec(),
        }
    }

    pub fn is_decoy(&self, store: &ProteinStore) -> bool {
        self.decoy.is_some() || store.is_decoy(self.protein_id)
    }
}

impl Spill for IndexPeptide {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.mass.0.to_le_bytes())?;
        writer.write_all(&self.protein_id.to_le_bytes())?;
        writer.write_all(&self.offset.to_le_bytes())?;
        writer.write_all(&self.length.to_le_bytes())?;
        writer.write_all(&optional(self.decoy.as_ref().map(|(slot, _)| *slot)).to_le_bytes())?;
        writer.write_all(&self.aux.unwrap_or(u32::MAX).to_le_bytes())?;
        writer.write_all(&optional(self.nterm).to_le_bytes())?;
        writer.write_all(&optional(self.cterm).to_le_bytes())?;
        writer.write_all(&(self.placements.len() as u16).to_le_bytes())?;
        for p in &self.placements {
            writer.write_all(&p.index.to_le_bytes())?;
            writer.write_all(&p.mod_id.to_le_bytes())?;
        }
        if let Some((_, permutation)) = &self.decoy {
            for idx in permutation {
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
        let protein_id = u32::from_le_bytes(read_body(reader)?);
        let offset = u32::from_le_bytes(read_body(reader)?);
        let length = read_u16(reader)?;
        let slot = from_optional(read_u16(reader)?);
        let aux = u32::from_le_bytes(read_body(reader)?);
        let nterm = from_optional(read_u16(reader)?);
        let cterm = from_optional(read_u16(reader)?);
        let n = read_u16(reader)?;
        let placements = (0..n)
            .map(|_| {
                Ok(Placement {
                    index: read_u16(reader)?,
                    mod_id: read_u16(reader)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let decoy = match slot {
            Some(slot) => Some((
                slot,
                (0..length)
                    .map(|_| read_u16(reader))
                    .collect::<Result<Vec<_>>>()?,
            )),
            None => None,
        };
        Ok(Some(IndexPeptide {
            mass,
            protein_id,
            offset,
            length,
            aux: (aux != u32::MAX).then_some(aux),
            nterm,
            cterm,
            placements,
            decoy,
        }))
    }

    fn mass(&self) -> FixedMass {
        self.mass
    }
}

/// Writes peptide records to a staging file. The peptide file itself only
/// appears once [`PeptideWriter::commit`] has written the header, so a
/// failed build never leaves a readable index behind
pub struct PeptideWriter {
    dir: PathBuf,
    body: BufWriter<NamedTempFile>,
    count: u64,
}

impl PeptideWriter {
    pub fn create(dir: &Path) -> Result<Self> {
        let body = tempfile::Builder::new()
            .prefix(".pepix-body-")
            .tempfile_in(dir)?;
        Ok(PeptideWriter {
            dir: dir.to_path_buf(),
            body: BufWriter::new(body),
            count: 0,
        })
    }

    pub fn push(&mut self, peptide: &IndexPeptide) -> Result<()> {
        peptide.write_to(&mut self.body)?;
        self.count += 1;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Write `header`, then the staged records, and move the result to `path`
    pub fn commit(self, mut header: PeptideHeader, path: &Path) -> Result<u64> {
        header.peptides = self.count;
        let mut body = self.body.into_inner().map_err(|e| e.into_error())?;
        body.seek(SeekFrom::Start(0))?;

        let mut out = tempfile::Builder::new()
            .prefix(".pepix-")
            .tempfile_in(&self.dir)?;
        {
            let mut writer = BufWriter::new(out.as_file_mut());
            write_header(&mut writer, &header)?;
            io::copy(&mut body, &mut writer)?;
            writer.flush()?;
        }
        out.persist(path).map_err(|e| e.error)?;
        Ok(self.count)
    }
}

/// Read access to a built index directory
pub struct IndexReader {
    pub dir: PathBuf,
    pub proteins: ProteinStore,
    pub protein_header: ProteinHeader,
    pub header: PeptideHeader,
    pub aux: Vec<Vec<Location>>,
}

impl IndexReader {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let (protein_header, proteins) = read_proteins(&dir.join(PROTEIN_FILE))?;
        let aux = read_aux(&dir.join(AUX_FILE))?;

        let mut reader = BufReader::new(File::open(dir.join(PEPTIDE_FILE))?);
        let mut header: PeptideHeader = read_header(&mut reader)?;
        expect(header.file_type, FileType::Pepix, header.version)?;
        header.mods = header.mods.compile()?;

        Ok(IndexReader {
            dir,
            proteins,
            protein_header,
            header,
            aux,
        })
    }

    /// Iterate over the peptide records in mass order
    pub fn peptides(&self) -> Result<Peptides> {
        let mut reader = BufReader::new(File::open(self.dir.join(PEPTIDE_FILE))?);
        let _: PeptideHeader = read_header(&mut reader)?;
        Ok(Peptides { reader })
    }

    pub fn aux_locations(&self, peptide: &IndexPeptide) -> &[Location] {
        peptide
            .aux
            .and_then(|idx| self.aux.get(idx as usize))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn residues(&self, peptide: &IndexPeptide) -> Vec<u8> {
        peptide.residues(&self.proteins)
    }

    /// Render a peptide with its variable modifications, e.g.
    /// `[+42.0106]-PEPT[+79.9663]IDE`
    pub fn sequence(&self, peptide: &IndexPeptide) -> String {
        let precision = self.header.mod_precision;
        let delta = |id: u16| format!("[{:+.*}]", precision, self.header.mods.get(id).delta);

        let mut s = String::new();
        if let Some(id) = peptide.nterm {
            s.push_str(&delta(id));
            s.push('-');
        }
        let mut placements = peptide.placements.iter().peekable();
        for (idx, &aa) in self.residues(peptide).iter().enumerate() {
            s.push(aa as char);
            while let Some(p) = placements.next_if(|p| p.index as usize == idx) {
                s.push_str(&delta(p.mod_id));
            }
        }
        if let Some(id) = peptide.cterm {
            s.push('-');
            s.push_str(&delta(id));
        }
        s
    }

    pub fn residue_stats(&self) -> Result<crate::assemble::ResidueStats> {
        crate::read_json(self.dir.join(STATS_FILE))
    }
}

pub struct Peptides {
    reader: BufReader<File>,
}

impl Iterator for Peptides {
    type Item = Result<IndexPeptide>;

    fn next(&mut self) -> Option<Self::Item> {
        IndexPeptide::read_from(&mut self.reader).transpose()
    }
}
