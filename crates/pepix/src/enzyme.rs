use fnv::FnvHashSet;
use regex::bytes::Regex;
use serde::{Deserialize, Serialize};

use crate::mass::VALID_AA;
use crate::{Error, Result};

/// An enzymatic digest, located by offset into its protein. Residues are
/// never copied out of the protein
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest {
    pub offset: u32,
    pub length: u16,
    /// Missed cleavages
    pub missed_cleavages: u8,
    pub position: Position,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash, Default)]
pub enum Position {
    Nterm,
    Cterm,
    Full,
    #[default]
    Internal,
}

impl Position {
    /// Does the peptide start at the protein N-terminus (after optional
    /// methionine clipping)?
    pub fn protein_nterm(self) -> bool {
        matches!(self, Position::Nterm | Position::Full)
    }

    pub fn protein_cterm(self) -> bool {
        matches!(self, Position::Cterm | Position::Full)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// Digestion settings, recorded in the index header
pub struct EnzymeSettings {
    pub missed_cleavages: u8,
    pub min_len: usize,
    pub max_len: usize,
    /// Amino acids to cleave at, "" for a non-specific digest, "$" for none
    pub cleave_at: String,
    /// Skip cleaving if the site is followed by this amino acid
    pub restrict: Option<char>,
    /// Cleave at c-terminal?
    pub c_terminal: bool,
    pub semi_enzymatic: bool,
    pub clip_nterm_methionine: bool,
}

pub struct EnzymeParameters {
    /// Number of missed cleavages to produce
    pub missed_cleavages: u8,
    /// Inclusive
    pub min_len: usize,
    /// Inclusive
    pub max_len: usize,
    pub semi_enzymatic: bool,
    pub clip_nterm_methionine: bool,
    pub enzyme: Option<Enzyme>,
}

pub struct Enzyme {
    // Skip cleaving if the site is followed matching this AA
    pub skip_suffix: Option<u8>,
    // Regex for matching cleavage sites
    regex: Regex,
    // Cleave at c-terminal?
    pub c_terminal: bool,
}

impl Enzyme {
    pub fn new(cleave: &str, skip_suffix: Option<char>, c_terminal: bool) -> Result<Option<Self>> {
        if !(cleave.chars().all(|x| VALID_AA.contains(&(x as u8))) || cleave == "$") {
            return Err(Error::Config(format!(
                "enzyme cleavage sequence contains non-amino acid characters: {}",
                cleave
            )));
        }
        if let Some(x) = skip_suffix.filter(|x| !VALID_AA.contains(&(*x as u8))) {
            return Err(Error::Config(format!(
                "enzyme cleavage restriction is non-amino acid character: {}",
                x
            )));
        }

        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| Error::Config(format!("invalid enzyme: {}", e)))
        };

        // At this point, cleave can be three things: empty, "$", or a string of valid AA's
        match cleave {
            "" => Ok(None),
            "$" => Ok(Some(Enzyme {
                regex: compile("$")?,
                skip_suffix: None,
                c_terminal: true,
            })),
            _ => Ok(Some(Enzyme {
                regex: compile(&format!("[{}]", cleave))?,
                skip_suffix: skip_suffix.map(|c| c as u8),
                c_terminal,
            })),
        }
    }

    fn cleavage_sites(&self, sequence: &[u8]) -> Vec<std::ops::Range<usize>> {
        let mut ranges = Vec::new();
        let mut left = 0;
        for mat in self.regex.find_iter(sequence) {
            let right = match self.c_terminal {
                true => mat.end(),
                false => mat.start(),
            };
            if let Some(skip) = self.skip_suffix {
                if right < sequence.len() && sequence[right] == skip {
                    continue;
                }
            }
            ranges.push(left..right);
            left = right;
        }
        ranges.push(left..sequence.len());
        ranges
    }
}

impl EnzymeParameters {
    pub fn from_settings(settings: &EnzymeSettings) -> Result<Self> {
        Ok(EnzymeParameters {
            missed_cleavages: settings.missed_cleavages,
            min_len: settings.min_len,
            max_len: settings.max_len,
            semi_enzymatic: settings.semi_enzymatic,
            clip_nterm_methionine: settings.clip_nterm_methionine,
            enzyme: Enzyme::new(&settings.cleave_at, settings.restrict, settings.c_terminal)?,
        })
    }

    fn cleavage_sites(&self, sequence: &[u8]) -> Vec<std::ops::Range<usize>> {
        match &self.enzyme {
            Some(enzyme) => enzyme.cleavage_sites(sequence),
            None => {
                // Perform a non-specific digest
                let mut v = Vec::new();
                for len in self.min_len..=self.max_len.min(sequence.len()) {
                    for i in 0..=sequence.len().saturating_sub(len) {
                        v.push(i..i + len)
                    }
                }
                v
            }
        }
    }

    pub fn digest(&self, sequence: &[u8]) -> Vec<Digest> {
        let n = sequence.len();
        let mut digests = Vec::new();
        let sites = self.cleavage_sites(sequence);
        // Non-specific digests already produce every window
        let (missed_cleavages, semi) = match self.enzyme {
            None => (0, false),
            _ => (self.missed_cleavages, self.semi_enzymatic),
        };
        let clip = self.clip_nterm_methionine && sequence.first() == Some(&b'M');

        // The same range can be reached more than once by semi-enzymatic
        // windows; repeats of a sequence at different ranges are all kept
        let mut seen = FnvHashSet::default();
        let mut emit = |start: usize, end: usize, missed: u8| {
            let len = end - start;
            if len == 0 || len < self.min_len || len > self.max_len || !seen.insert((start, end)) {
                return;
            }
            // A clipped initiator methionine leaves the peptide at the protein N-terminus
            let position = match (start == 0 || (clip && start == 1), end == n) {
                (true, true) => Position::Full,
                (true, false) => Position::Nterm,
                (false, true) => Position::Cterm,
                (false, false) => Position::Internal,
            };
            digests.push(Digest {
                offset: start as u32,
                length: len as u16,
                missed_cleavages: missed,
                position,
            });
        };

        for cleavage in 1..=(1 + missed_cleavages) {
            // Generate missed cleavages
            for win in sites.windows(cleavage as usize) {
                let start = win[0].start;
                let end = win[cleavage as usize - 1].end;
                if end > n || start >= end {
                    continue;
                }

                emit(start, end, cleavage - 1);
                if clip && start == 0 {
                    emit(1, end, cleavage - 1);
                }
                if semi {
                    for cut in start + 1..end {
                        emit(start, cut, cleavage - 1);
                        emit(cut, end, cleavage - 1);
                    }
                }
            }
        }
        digests
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sequences<'a>(sequence: &'a str, digests: &[Digest]) -> Vec<&'a str> {
        digests
            .iter()
            .map(|d| &sequence[d.offset as usize..d.offset as usize + d.length as usize])
            .collect()
    }

    fn params(min_len: usize, max_len: usize, missed_cleavages: u8, enzyme: Option<Enzyme>) -> EnzymeParameters {
        EnzymeParameters {
            min_len,
            max_len,
            missed_cleavages,
            semi_enzymatic: false,
            clip_nterm_methionine: false,
            enzyme,
        }
    }

    #[test]
    fn trypsin() {
        let sequence = "MADEEKLPPGWEKRMSRSSGRVYYFNHITNASQWERPSGN";
        let expected = vec![
            ("MADEEK", Position::Nterm),
            ("LPPGWEK", Position::Internal),
            ("MSR", Position::Internal),
            ("SSGR", Position::Internal),
            ("VYYFNHITNASQWERPSGN", Position::Cterm),
        ];

        let tryp = params(2, 50, 0, Enzyme::new("KR", Some('P'), true).unwrap());
        let digests = tryp.digest(sequence.as_bytes());
        assert_eq!(
            expected,
            sequences(sequence, &digests)
                .into_iter()
                .zip(digests.iter().map(|d| d.position))
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn trypsin_missed_cleavage() {
        let sequence = "MADEEKLPPGWEKRMSRSSGRVYYFNHITNASQWERPSGN";
        let expected = vec![
            "MADEEK",
            "LPPGWEK",
            "R",
            "MSR",
            "SSGR",
            "VYYFNHITNASQWERPSGN",
            "MADEEKLPPGWEK",
            "LPPGWEKR",
            "RMSR",
            "MSRSSGR",
            "SSGRVYYFNHITNASQWERPSGN",
        ];

        let tryp = params(1, 50, 1, Enzyme::new("KR", Some('P'), true).unwrap());
        let digests = tryp.digest(sequence.as_bytes());
        assert_eq!(expected, sequences(sequence, &digests));
        assert_eq!(digests[6].missed_cleavages, 1);
    }

    #[test]
    fn repeated_peptides_are_kept() {
        let sequence = "PEPTIDEKPEPTIDEK";
        let tryp = params(2, 50, 0, Enzyme::new("KR", None, true).unwrap());
        let digests = tryp.digest(sequence.as_bytes());
        assert_eq!(sequences(sequence, &digests), vec!["PEPTIDEK", "PEPTIDEK"]);
        assert_eq!(digests[1].offset, 8);
    }

    #[test]
    fn asp_n() {
        let sequence = "MADEEKLPPGWEKRMSRSSGRVYYFNHITNASQWERPSGN";
        let tryp = params(1, 50, 0, Enzyme::new("D", None, false).unwrap());
        assert_eq!(
            sequences(sequence, &tryp.digest(sequence.as_bytes())),
            vec!["MA", "DEEKLPPGWEKRMSRSSGRVYYFNHITNASQWERPSGN"]
        );
    }

    #[test]
    fn nonspecific_digest_5_7() {
        let sequence = "MADEEKLPPGWEKRMSRSSGRVYYFNHITNASQWERPSGNW";

        let expected = (5..=7)
            .flat_map(|window| {
                sequence
                    .as_bytes()
                    .windows(window)
                    .flat_map(std::str::from_utf8)
            })
            .collect::<Vec<_>>();

        let tryp = params(5, 7, 2, Enzyme::new("", None, true).unwrap());
        assert_eq!(expected, sequences(sequence, &tryp.digest(sequence.as_bytes())));
    }

    #[test]
    fn no_digest() {
        let sequence = "MADEEKLPPGWEKRMSRSSGRVYYFNHITNASQWERPSGNW";
        let tryp = params(1, 100, 0, Enzyme::new("$", None, true).unwrap());
        let digests = tryp.digest(sequence.as_bytes());
        assert_eq!(vec![sequence], sequences(sequence, &digests));
        assert_eq!(digests[0].position, Position::Full);
    }

    #[test]
    fn semi_enzymatic() {
        let sequence = "MADEEKLPPGWEK";
        let mut semi = params(4, 50, 0, Enzyme::new("KR", Some('P'), true).unwrap());
        semi.semi_enzymatic = true;
        let digests = semi.digest(sequence.as_bytes());
        let found = sequences(sequence, &digests);

        for expected in ["MADEEK", "MADE", "ADEEK", "DEEK", "LPPGWEK", "LPPG", "PGWEK"] {
            assert!(found.contains(&expected), "{}", expected);
        }
        assert!(!found.contains(&"MAD"));
        let unique = digests.iter().map(|d| (d.offset, d.length)).collect::<FnvHashSet<_>>();
        assert_eq!(unique.len(), digests.len());
    }

    #[test]
    fn clip_methionine() {
        let sequence = "MADEEKLPPGWEK";
        let mut tryp = params(2, 50, 0, Enzyme::new("KR", Some('P'), true).unwrap());
        tryp.clip_nterm_methionine = true;
        let digests = tryp.digest(sequence.as_bytes());
        assert_eq!(
            sequences(sequence, &digests),
            vec!["MADEEK", "ADEEK", "LPPGWEK"]
        );
        assert!(digests[1].position.protein_nterm());
        assert!(!digests[2].position.protein_nterm());
        assert!(digests[2].position.protein_cterm());
    }

    #[test]
    fn invalid_enzyme() {
        assert!(Enzyme::new("KZ", None, true).is_err());
        assert!(Enzyme::new("KR", Some('B'), true).is_err());
    }
}
