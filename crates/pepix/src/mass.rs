use std::{
    iter::Sum,
    ops::{Add, AddAssign, Sub},
};

use serde::{Deserialize, Serialize};

use crate::modification::{ModSite, ModTable};

pub const H2O: f64 = 18.010565;
pub const H2O_AVERAGE: f64 = 18.01528;
pub const PROTON: f64 = 1.0072764;

/// Every [`FixedMass`] is a Dalton value multiplied by this factor
pub const FIXED_POINT_SCALE: f64 = 1e5;

/// A mass stored as a scaled integer, so that equality and ordering are exact
/// and reproducible between runs
#[derive(
    Copy, Clone, Default, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct FixedMass(pub i32);

impl FixedMass {
    /// Convert a Dalton value, returning `None` if it cannot be represented
    pub fn try_from_f64(mass: f64) -> Option<Self> {
        let scaled = (mass * FIXED_POINT_SCALE).round();
        if scaled.is_finite() && scaled >= i32::MIN as f64 && scaled <= i32::MAX as f64 {
            Some(FixedMass(scaled as i32))
        } else {
            None
        }
    }

    pub fn from_f64(mass: f64) -> Self {
        FixedMass((mass * FIXED_POINT_SCALE).round() as i32)
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / FIXED_POINT_SCALE
    }
}

impl std::fmt::Display for FixedMass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.5}", self.to_f64())
    }
}

impl Add for FixedMass {
    type Output = FixedMass;

    fn add(self, rhs: Self) -> Self::Output {
        FixedMass(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for FixedMass {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for FixedMass {
    type Output = FixedMass;

    fn sub(self, rhs: Self) -> Self::Output {
        FixedMass(self.0.saturating_sub(rhs.0))
    }
}

impl Sum for FixedMass {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(FixedMass::default(), |acc, m| acc + m)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MassType {
    #[default]
    Monoisotopic,
    Average,
}

pub const VALID_AA: [u8; 22] = [
    b'A', b'C', b'D', b'E', b'F', b'G', b'H', b'I', b'K', b'L', b'M', b'N', b'P', b'Q', b'R', b'S',
    b'T', b'V', b'W', b'Y', b'U', b'O',
];

/// Unmodified residue mass in Daltons
pub fn residue_mass(aa: u8, mass_type: MassType) -> Option<f64> {
    let (mono, avg) = match aa {
        b'A' => (71.03711, 71.0788),
        b'R' => (156.10111, 156.1875),
        b'N' => (114.04293, 114.1038),
        b'D' => (115.02694, 115.0886),
        b'C' => (103.00919, 103.1388),
        b'E' => (129.04259, 129.1155),
        b'Q' => (128.05858, 128.1307),
        b'G' => (57.02146, 57.0519),
        b'H' => (137.05891, 137.1411),
        b'I' => (113.08406, 113.1594),
        b'L' => (113.08406, 113.1594),
        b'K' => (128.09496, 128.1741),
        b'M' => (131.04049, 131.1926),
        b'F' => (147.06841, 147.1766),
        b'P' => (97.05276, 97.1167),
        b'S' => (87.03203, 87.0782),
        b'T' => (101.04768, 101.1051),
        b'W' => (186.07931, 186.2132),
        b'Y' => (163.06333, 163.1760),
        b'V' => (99.06841, 99.1326),
        b'U' => (150.95363, 150.0388),
        b'O' => (237.14773, 237.3018),
        _ => return None,
    };
    match mass_type {
        MassType::Monoisotopic => Some(mono),
        MassType::Average => Some(avg),
    }
}

/// Fixed-point residue masses with static modifications already applied
#[derive(Clone, Debug)]
pub struct MassTable {
    residues: [Option<FixedMass>; 256],
    water: FixedMass,
    nterm: FixedMass,
    cterm: FixedMass,
    protein_nterm: FixedMass,
    protein_cterm: FixedMass,
}

impl MassTable {
    pub fn new(mass_type: MassType, mods: &ModTable) -> Self {
        let mut residues = [None; 256];
        for aa in VALID_AA {
            residues[aa as usize] = residue_mass(aa, mass_type).map(FixedMass::from_f64);
        }
        for (residue, delta) in mods.static_residue_deltas() {
            if let Some(mass) = residues[residue as usize].as_mut() {
                *mass += delta;
            }
        }
        let water = match mass_type {
            MassType::Monoisotopic => FixedMass::from_f64(H2O),
            MassType::Average => FixedMass::from_f64(H2O_AVERAGE),
        };

        MassTable {
            residues,
            water,
            nterm: mods.static_delta(ModSite::PeptideN),
            cterm: mods.static_delta(ModSite::PeptideC),
            protein_nterm: mods.static_delta(ModSite::ProteinN),
            protein_cterm: mods.static_delta(ModSite::ProteinC),
        }
    }

    #[inline]
    pub fn residue(&self, aa: u8) -> Option<FixedMass> {
        self.residues[aa as usize]
    }

    /// Static peptide N-terminal delta
    pub fn nterm(&self) -> FixedMass {
        self.nterm
    }

    /// Static peptide C-terminal delta
    pub fn cterm(&self) -> FixedMass {
        self.cterm
    }

    /// Static protein N- and C-terminal deltas
    pub fn protein_termini(&self) -> (FixedMass, FixedMass) {
        (self.protein_nterm, self.protein_cterm)
    }

    /// Neutral peptide mass, or `None` if any residue is unrecognized
    pub fn peptide_mass(&self, residues: &[u8]) -> Option<FixedMass> {
        let mut mass = self.water + self.nterm + self.cterm;
        for &aa in residues {
            mass += self.residue(aa)?;
        }
        Some(mass)
    }

    /// Peptide mass including static protein-terminal deltas, for a peptide
    /// that starts and/or ends at the protein terminus
    pub fn candidate_mass(
        &self,
        residues: &[u8],
        protein_nterm: bool,
        protein_cterm: bool,
    ) -> Option<FixedMass> {
        let mut mass = self.peptide_mass(residues)?;
        if protein_nterm {
            mass += self.protein_nterm;
        }
        if protein_cterm {
            mass += self.protein_cterm;
        }
        Some(mass)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn smoke() {
        for ch in VALID_AA {
            assert!(residue_mass(ch, MassType::Monoisotopic).unwrap() > 0.0);
            assert!(residue_mass(ch, MassType::Average).unwrap() > 0.0);
        }
        assert_eq!(residue_mass(b'B', MassType::Monoisotopic), None);
    }

    #[test]
    fn fixed_point() {
        assert_eq!(FixedMass::from_f64(500.0), FixedMass(50_000_000));
        assert_eq!(FixedMass::from_f64(0.000014), FixedMass(1));
        assert_eq!(FixedMass(123_456).to_f64(), 1.23456);
        assert_eq!(FixedMass::try_from_f64(1e9), None);
        assert_eq!(FixedMass(i32::MAX) + FixedMass(1), FixedMass(i32::MAX));
    }

    #[test]
    fn peptide_masses() {
        let table = MassTable::new(MassType::Monoisotopic, &ModTable::default());
        // PEPTIDE, monoisotopic 799.35997
        let mass = table.peptide_mass(b"PEPTIDE").unwrap();
        assert!((mass.to_f64() - 799.35997).abs() < 1e-4, "{}", mass);
        assert_eq!(table.peptide_mass(b"PEPXIDE"), None);

        // Mass is a sum of integers, so composition alone decides it
        assert_eq!(table.peptide_mass(b"PEPTIDE"), table.peptide_mass(b"EDITPEP"));
    }

    #[test]
    fn static_mods() {
        let mods = ModTable::parse("C+57.02146", "", "", "", "").unwrap();
        let table = MassTable::new(MassType::Monoisotopic, &mods);
        assert_eq!(
            table.residue(b'C').unwrap(),
            FixedMass::from_f64(103.00919) + FixedMass::from_f64(57.02146)
        );

        let mods = ModTable::parse("", "", "", "X+42.010565", "").unwrap();
        let table = MassTable::new(MassType::Monoisotopic, &mods);
        let base = table.peptide_mass(b"MADEEK").unwrap();
        assert_eq!(table.candidate_mass(b"MADEEK", false, true), Some(base));
        assert_eq!(
            table.candidate_mass(b"MADEEK", true, false),
            Some(base + FixedMass::from_f64(42.010565))
        );
    }
}
