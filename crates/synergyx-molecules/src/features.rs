//! Positional per-atom features.
//!
//! Layout (before padding to the configured width):
//!
//! | Slot | Feature |
//! |------|---------|
//! | 0..9 | atom type one-hot over [`ATOM_VOCABULARY`] |
//! | 9 | degree |
//! | 10 | formal charge |
//! | 11 | chiral tag |
//! | 12..15 | hybridization one-hot (SP, SP2, SP3) |
//! | 15 | aromatic flag |
//! | 16 | total hydrogen count |
//! | 17 | atomic mass / 100 |
//! | 18 | atomic number |

use crate::smiles::{Hybridization, Molecule};

pub const DEFAULT_NODE_FEATURES: usize = 64;

pub const ATOM_VOCABULARY: [&str; 9] = ["C", "N", "O", "S", "F", "Cl", "Br", "I", "P"];

const HYBRIDIZATIONS: [Hybridization; 3] = [Hybridization::Sp, Hybridization::Sp2, Hybridization::Sp3];

/// Number of meaningful slots; anything beyond is zero padding.
pub const RAW_ATOM_FEATURES: usize = ATOM_VOCABULARY.len() + 3 + HYBRIDIZATIONS.len() + 4;

/// Features of atom `idx`, truncated or zero-padded to `width`.
pub fn atom_features(mol: &Molecule, idx: usize, width: usize) -> Vec<f32> {
    let atom = &mol.atoms[idx];
    let mut features = Vec::with_capacity(RAW_ATOM_FEATURES.max(width));

    features.extend(
        ATOM_VOCABULARY
            .iter()
            .map(|s| if *s == atom.element.symbol { 1.0 } else { 0.0 }),
    );
    features.push(mol.degree(idx) as f32);
    features.push(f32::from(atom.charge));
    features.push(f32::from(atom.chirality.tag()));

    let hybridization = mol.hybridization(idx);
    features.extend(
        HYBRIDIZATIONS
            .iter()
            .map(|h| if *h == hybridization { 1.0 } else { 0.0 }),
    );
    features.push(if atom.aromatic { 1.0 } else { 0.0 });
    features.push(f32::from(mol.total_hydrogens(idx)));
    features.push(atom.mass() / 100.0);
    features.push(f32::from(atom.element.atomic_number));

    features.resize(width, 0.0);
    features
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smiles::{MoleculeParser, SmilesParser};

    #[test]
    fn test_carbonyl_oxygen_features() {
        let mol = SmilesParser.parse("CC=O").unwrap();
        let f = atom_features(&mol, 2, DEFAULT_NODE_FEATURES);
        assert_eq!(f.len(), 64);
        assert_eq!(f[2], 1.0, "oxygen one-hot");
        assert_eq!(f[0], 0.0);
        assert_eq!(f[9], 1.0, "degree");
        assert_eq!(f[13], 1.0, "sp2");
        assert_eq!(f[16], 0.0, "no hydrogens");
        assert!((f[17] - 0.15999).abs() < 1e-4);
        assert_eq!(f[18], 8.0);
        assert!(f[RAW_ATOM_FEATURES..].iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_unlisted_element_has_no_type_bit() {
        let mol = SmilesParser.parse("[Na+]").unwrap();
        let f = atom_features(&mol, 0, DEFAULT_NODE_FEATURES);
        assert!(f[..9].iter().all(|&x| x == 0.0));
        assert_eq!(f[10], 1.0);
        assert_eq!(f[18], 11.0);
    }

    #[test]
    fn test_truncation() {
        let mol = SmilesParser.parse("C").unwrap();
        let f = atom_features(&mol, 0, 8);
        assert_eq!(f, vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    }
}
