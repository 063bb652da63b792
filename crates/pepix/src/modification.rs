use std::fmt::{Display, Write};

use serde::{Deserialize, Serialize};

use crate::mass::{FixedMass, VALID_AA};

/// Where a modification may be placed on a peptide
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModSite {
    Residue,
    PeptideN,
    PeptideC,
    ProteinN,
    ProteinC,
}

impl ModSite {
    const ALL: [ModSite; 5] = [
        ModSite::Residue,
        ModSite::PeptideN,
        ModSite::PeptideC,
        ModSite::ProteinN,
        ModSite::ProteinC,
    ];

    fn is_terminal(self) -> bool {
        self != ModSite::Residue
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl Display for ModSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModSite::Residue => Ok(()),
            ModSite::PeptideN => f.write_char('^'),
            ModSite::PeptideC => f.write_char('$'),
            ModSite::ProteinN => f.write_char('['),
            ModSite::ProteinC => f.write_char(']'),
        }
    }
}

#[derive(thiserror::Error, Clone, Debug, PartialEq)]
pub enum InvalidModification {
    #[error("empty modification string")]
    Empty,
    #[error("unrecognized residue ({0})")]
    InvalidResidue(char),
    #[error("`{0}` is missing a '+' or '-' mass delta")]
    MissingDelta(String),
    #[error("cannot parse mass delta in `{0}`")]
    InvalidDelta(String),
    #[error("static modification `{0}` must name exactly one residue")]
    StaticMultipleResidues(String),
    #[error("static terminal modification `{0}` must apply to any residue (X)")]
    StaticTerminalResidue(String),
    #[error("{site}{residue}{delta:+} appears more than once")]
    Duplicate {
        site: ModSite,
        residue: char,
        delta: f64,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariableMod {
    pub id: u16,
    pub site: ModSite,
    /// Residues this modification applies to, `X` meaning any residue
    pub residues: String,
    /// Maximum number of occurrences on a single peptide
    pub max_count: u16,
    pub delta: f64,
    pub fixed: FixedMass,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StaticMod {
    pub site: ModSite,
    pub residue: char,
    pub delta: f64,
}

/// Compiled modification table. Immutable for the duration of a build, and
/// serialized into the peptide index header
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModTable {
    pub variable: Vec<VariableMod>,
    pub fixed: Vec<StaticMod>,
    /// `possibles[site * 256 + residue]` holds the admissible variable mod ids
    #[serde(skip)]
    possibles: Vec<Vec<u16>>,
}

impl ModTable {
    /// Parse one mods-spec string per site class
    pub fn parse(
        residue: &str,
        nterm_peptide: &str,
        cterm_peptide: &str,
        nterm_protein: &str,
        cterm_protein: &str,
    ) -> Result<ModTable, InvalidModification> {
        let mut table = ModTable::default();
        table.parse_spec(residue, ModSite::Residue)?;
        table.parse_spec(nterm_peptide, ModSite::PeptideN)?;
        table.parse_spec(cterm_peptide, ModSite::PeptideC)?;
        table.parse_spec(nterm_protein, ModSite::ProteinN)?;
        table.parse_spec(cterm_protein, ModSite::ProteinC)?;
        table.compile()
    }

    /// Comma-separated list of `[limit]RESIDUES(+|-)delta`. A missing or zero
    /// limit denotes a static modification
    fn parse_spec(&mut self, spec: &str, site: ModSite) -> Result<(), InvalidModification> {
        for token in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let digits = token.chars().take_while(char::is_ascii_digit).count();
            let limit = match digits {
                0 => 0,
                _ => token[..digits]
                    .parse::<u16>()
                    .map_err(|_| InvalidModification::InvalidDelta(token.into()))?,
            };
            let rest = &token[digits..];
            let sign = rest
                .find(['+', '-'])
                .ok_or_else(|| InvalidModification::MissingDelta(token.into()))?;
            let (residues, delta) = rest.split_at(sign);
            if residues.is_empty() {
                return Err(InvalidModification::Empty);
            }
            for ch in residues.chars() {
                let any = ch == 'X' && site.is_terminal();
                if !ch.is_ascii() || (!any && !VALID_AA.contains(&(ch as u8))) {
                    return Err(InvalidModification::InvalidResidue(ch));
                }
            }
            let delta = delta
                .parse::<f64>()
                .map_err(|_| InvalidModification::InvalidDelta(token.into()))?;
            let fixed = FixedMass::try_from_f64(delta)
                .ok_or_else(|| InvalidModification::InvalidDelta(token.into()))?;

            if limit == 0 {
                let residue = match (site, residues) {
                    (ModSite::Residue, r) if r.len() == 1 => r.as_bytes()[0] as char,
                    (ModSite::Residue, _) => {
                        return Err(InvalidModification::StaticMultipleResidues(token.into()))
                    }
                    (_, "X") => 'X',
                    _ => return Err(InvalidModification::StaticTerminalResidue(token.into())),
                };
                self.fixed.push(StaticMod {
                    site,
                    residue,
                    delta,
                });
            } else {
                // Terminal modifications can only occur once per peptide
                let max_count = if site.is_terminal() { 1 } else { limit };
                self.variable.push(VariableMod {
                    id: self.variable.len() as u16,
                    site,
                    residues: residues.into(),
                    max_count,
                    delta,
                    fixed,
                });
            }
        }
        Ok(())
    }

    /// Build the per-site, per-residue lookup of admissible modification ids.
    /// Must be called on tables restored from an index header before
    /// [`ModTable::possibles`] is used
    pub fn compile(mut self) -> Result<ModTable, InvalidModification> {
        let mut possibles = vec![Vec::new(); ModSite::ALL.len() * 256];
        for m in &self.variable {
            for ch in m.residues.bytes() {
                let targets: &[u8] = if ch == b'X' { &VALID_AA } else { &[ch] };
                for &aa in targets {
                    let slot = &mut possibles[m.site.index() * 256 + aa as usize];
                    if slot
                        .iter()
                        .any(|&id: &u16| self.variable[id as usize].fixed == m.fixed)
                    {
                        return Err(InvalidModification::Duplicate {
                            site: m.site,
                            residue: aa as char,
                            delta: m.delta,
                        });
                    }
                    slot.push(m.id);
                }
            }
        }
        self.possibles = possibles;
        Ok(self)
    }

    /// Variable modification ids that may be placed on `aa` at `site`
    #[inline]
    pub fn possibles(&self, site: ModSite, aa: u8) -> &[u16] {
        self.possibles
            .get(site.index() * 256 + aa as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_variable(&self) -> bool {
        !self.variable.is_empty()
    }

    pub fn get(&self, id: u16) -> &VariableMod {
        &self.variable[id as usize]
    }

    pub fn max_counts(&self) -> Vec<u16> {
        self.variable.iter().map(|m| m.max_count).collect()
    }

    pub(crate) fn static_residue_deltas(&self) -> impl Iterator<Item = (u8, FixedMass)> + '_ {
        self.fixed
            .iter()
            .filter(|m| m.site == ModSite::Residue)
            .map(|m| (m.residue as u8, FixedMass::from_f64(m.delta)))
    }

    /// Sum of static terminal deltas for a terminal site class
    pub(crate) fn static_delta(&self, site: ModSite) -> FixedMass {
        self.fixed
            .iter()
            .filter(|m| m.site == site)
            .map(|m| FixedMass::from_f64(m.delta))
            .sum()
    }
}
