use crate::mass::FixedMass;
use crate::modification::{ModSite, ModTable};
use crate::peptide::{ModifiedPeptide, Placement};
use crate::Result;

/// Every combination of `size` indices out of `0..n`, for each size in
/// `min..=max`, in lexicographic order within a size. Restart by building
/// a new iterator
pub struct Combinations {
    n: usize,
    max: usize,
    indices: Vec<usize>,
    done: bool,
}

impl Combinations {
    pub fn new(n: usize, min: usize, max: usize) -> Self {
        let max = max.min(n);
        Combinations {
            n,
            max,
            indices: (0..min).collect(),
            done: min > max,
        }
    }

    /// Advance `indices` to the next combination of the same size, or grow
    fn advance(&mut self) {
        let k = self.indices.len();
        for i in (0..k).rev() {
            if self.indices[i] < self.n - k + i {
                self.indices[i] += 1;
                for j in i + 1..k {
                    self.indices[j] = self.indices[j - 1] + 1;
                }
                return;
            }
        }
        if k < self.max {
            self.indices = (0..k + 1).collect();
        } else {
            self.done = true;
        }
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.indices.clone();
        self.advance();
        Some(item)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Target {
    Nterm,
    Residue(u16),
    Cterm,
}

/// A position that can carry a variable modification, with its admissible
/// modification ids
struct Site {
    target: Target,
    options: Vec<u16>,
}

/// Enumerates the variable-modification variants of a peptide
pub struct ModExpander<'m> {
    mods: &'m ModTable,
    deltas: Vec<FixedMass>,
    max_counts: Vec<u16>,
    min_mods: usize,
    max_mods: usize,
}

impl<'m> ModExpander<'m> {
    pub fn new(mods: &'m ModTable, min_mods: usize, max_mods: usize) -> Self {
        ModExpander {
            mods,
            deltas: mods.variable.iter().map(|m| m.fixed).collect(),
            max_counts: mods.max_counts(),
            min_mods,
            max_mods,
        }
    }

    /// With no variable modifications, peptides pass through unchanged
    pub fn is_noop(&self) -> bool {
        !self.mods.has_variable()
    }

    fn sites(&self, residues: &[u8], protein_nterm: bool, protein_cterm: bool) -> Vec<Site> {
        let mut sites = Vec::new();
        let (first, last) = match (residues.first(), residues.last()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => return sites,
        };

        let mut nterm = self.mods.possibles(ModSite::PeptideN, first).to_vec();
        if protein_nterm {
            nterm.extend_from_slice(self.mods.possibles(ModSite::ProteinN, first));
        }
        if !nterm.is_empty() {
            sites.push(Site {
                target: Target::Nterm,
                options: nterm,
            });
        }

        for (idx, &aa) in residues.iter().enumerate() {
            let options = self.mods.possibles(ModSite::Residue, aa);
            if !options.is_empty() {
                sites.push(Site {
                    target: Target::Residue(idx as u16),
                    options: options.to_vec(),
                });
            }
        }

        let mut cterm = self.mods.possibles(ModSite::PeptideC, last).to_vec();
        if protein_cterm {
            cterm.extend_from_slice(self.mods.possibles(ModSite::ProteinC, last));
        }
        if !cterm.is_empty() {
            sites.push(Site {
                target: Target::Cterm,
                options: cterm,
            });
        }
        sites
    }

    /// Pass every admissible variant of `peptide` to `sink`, returning the
    /// number of variants produced
    pub fn expand<F>(
        &self,
        peptide: &ModifiedPeptide,
        residues: &[u8],
        termini: (bool, bool),
        mut sink: F,
    ) -> Result<u64>
    where
        F: FnMut(ModifiedPeptide) -> Result<()>,
    {
        let sites = self.sites(residues, termini.0, termini.1);
        let mut counts = vec![0u16; self.deltas.len()];
        let mut emitted = 0;

        for combination in Combinations::new(sites.len(), self.min_mods, self.max_mods) {
            // Odometer over the options of each chosen site
            let mut digits = vec![0usize; combination.len()];
            loop {
                counts.iter_mut().for_each(|c| *c = 0);
                let admissible = combination.iter().zip(&digits).all(|(&site, &digit)| {
                    let id = sites[site].options[digit] as usize;
                    counts[id] += 1;
                    counts[id] <= self.max_counts[id]
                });

                if admissible {
                    let mut variant = ModifiedPeptide {
                        placements: Vec::with_capacity(combination.len()),
                        ..peptide.clone()
                    };
                    for (&site, &digit) in combination.iter().zip(&digits) {
                        let id = sites[site].options[digit];
                        variant.mass += self.deltas[id as usize];
                        match sites[site].target {
                            Target::Nterm => variant.nterm = Some(id),
                            Target::Cterm => variant.cterm = Some(id),
                            Target::Residue(index) => {
                                variant.placements.push(Placement { index, mod_id: id })
                            }
                        }
                    }
                    sink(variant)?;
                    emitted += 1;
                }

                if !increment(&mut digits, |i| sites[combination[i]].options.len()) {
                    break;
                }
            }
        }
        Ok(emitted)
    }
}

/// Step an odometer, returning `false` once every digit has wrapped
fn increment<F: Fn(usize) -> usize>(digits: &mut [usize], radix: F) -> bool {
    for i in (0..digits.len()).rev() {
        digits[i] += 1;
        if digits[i] < radix(i) {
            return true;
        }
        digits[i] = 0;
    }
    false
}
