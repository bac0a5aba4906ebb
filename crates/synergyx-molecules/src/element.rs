//! Periodic table subset covering drug-like chemistry and common counter-ions.

#[derive(Debug, PartialEq)]
pub struct Element {
    pub symbol: &'static str,
    pub atomic_number: u8,
    /// Average atomic mass in daltons.
    pub mass: f32,
    /// Allowed valences for organic-subset atoms, ascending. Empty for
    /// elements that may only appear in brackets.
    pub valences: &'static [u8],
}

macro_rules! element {
    ($sym:expr, $z:expr, $mass:expr) => {
        Element { symbol: $sym, atomic_number: $z, mass: $mass, valences: &[] }
    };
    ($sym:expr, $z:expr, $mass:expr, $val:expr) => {
        Element { symbol: $sym, atomic_number: $z, mass: $mass, valences: $val }
    };
}

pub static WILDCARD: Element = element!("*", 0, 0.0);

static ELEMENTS: &[Element] = &[
    element!("H", 1, 1.008, &[1]),
    element!("He", 2, 4.003),
    element!("Li", 3, 6.94),
    element!("Be", 4, 9.012),
    element!("B", 5, 10.81, &[3]),
    element!("C", 6, 12.011, &[4]),
    element!("N", 7, 14.007, &[3, 5]),
    element!("O", 8, 15.999, &[2]),
    element!("F", 9, 18.998, &[1]),
    element!("Ne", 10, 20.180),
    element!("Na", 11, 22.990),
    element!("Mg", 12, 24.305),
    element!("Al", 13, 26.982),
    element!("Si", 14, 28.085),
    element!("P", 15, 30.974, &[3, 5]),
    element!("S", 16, 32.06, &[2, 4, 6]),
    element!("Cl", 17, 35.45, &[1]),
    element!("Ar", 18, 39.948),
    element!("K", 19, 39.098),
    element!("Ca", 20, 40.078),
    element!("Sc", 21, 44.956),
    element!("Ti", 22, 47.867),
    element!("V", 23, 50.942),
    element!("Cr", 24, 51.996),
    element!("Mn", 25, 54.938),
    element!("Fe", 26, 55.845),
    element!("Co", 27, 58.933),
    element!("Ni", 28, 58.693),
    element!("Cu", 29, 63.546),
    element!("Zn", 30, 65.38),
    element!("Ga", 31, 69.723),
    element!("Ge", 32, 72.630),
    element!("As", 33, 74.922),
    element!("Se", 34, 78.971),
    element!("Br", 35, 79.904, &[1]),
    element!("Kr", 36, 83.798),
    element!("Rb", 37, 85.468),
    element!("Sr", 38, 87.62),
    element!("Y", 39, 88.906),
    element!("Zr", 40, 91.224),
    element!("Mo", 42, 95.95),
    element!("Tc", 43, 98.0),
    element!("Ru", 44, 101.07),
    element!("Rh", 45, 102.91),
    element!("Pd", 46, 106.42),
    element!("Ag", 47, 107.87),
    element!("Cd", 48, 112.41),
    element!("In", 49, 114.82),
    element!("Sn", 50, 118.71),
    element!("Sb", 51, 121.76),
    element!("Te", 52, 127.60),
    element!("I", 53, 126.90, &[1]),
    element!("Xe", 54, 131.29),
    element!("Cs", 55, 132.91),
    element!("Ba", 56, 137.33),
    element!("La", 57, 138.91),
    element!("Gd", 64, 157.25),
    element!("Lu", 71, 174.97),
    element!("Hf", 72, 178.49),
    element!("W", 74, 183.84),
    element!("Re", 75, 186.21),
    element!("Os", 76, 190.23),
    element!("Ir", 77, 192.22),
    element!("Pt", 78, 195.08),
    element!("Au", 79, 196.97),
    element!("Hg", 80, 200.59),
    element!("Tl", 81, 204.38),
    element!("Pb", 82, 207.2),
    element!("Bi", 83, 208.98),
    element!("Ra", 88, 226.0),
    element!("U", 92, 238.03),
];

/// Looks up an element by its case-sensitive symbol.
pub fn lookup(symbol: &str) -> Option<&'static Element> {
    if symbol == "*" {
        return Some(&WILDCARD);
    }
    ELEMENTS.iter().find(|e| e.symbol == symbol)
}

/// Atoms allowed outside brackets.
pub fn is_organic_subset(symbol: &str) -> bool {
    matches!(symbol, "B" | "C" | "N" | "O" | "P" | "S" | "F" | "Cl" | "Br" | "I" | "*")
}

/// Elements that may be written in lowercase to mark aromaticity.
pub fn can_be_aromatic(symbol: &str) -> bool {
    matches!(symbol, "B" | "C" | "N" | "O" | "P" | "S" | "Se" | "As" | "Te")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_sensitive() {
        assert_eq!(lookup("Cl").map(|e| e.atomic_number), Some(17));
        assert!(lookup("CL").is_none());
        assert_eq!(lookup("*").map(|e| e.atomic_number), Some(0));
    }

    #[test]
    fn test_organic_subset_has_valences() {
        for symbol in ["B", "C", "N", "O", "P", "S", "F", "Cl", "Br", "I"] {
            let element = lookup(symbol).unwrap();
            assert!(is_organic_subset(symbol));
            assert!(!element.valences.is_empty(), "{} has no default valence", symbol);
        }
        assert!(!is_organic_subset("Na"));
    }
}
