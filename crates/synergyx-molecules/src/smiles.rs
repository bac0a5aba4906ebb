//! A SMILES reader covering what drug tables actually contain: the organic
//! subset, aromatic atoms, bracket atoms, branches, ring closures and
//! disconnected fragments. Stereo bond marks are read and treated as single
//! bonds; aromaticity is taken from the input as written.

use std::collections::HashMap;

use thiserror::Error;

use crate::element::{self, Element};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SmilesError {
    #[error("empty structure string")]
    Empty,

    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unknown element '{0}'")]
    UnknownElement(String),

    #[error("unterminated bracket atom starting at position {0}")]
    UnterminatedBracket(usize),

    #[error("unbalanced branch at position {0}")]
    UnbalancedBranch(usize),

    #[error("ring bond {0} was never closed")]
    UnclosedRing(u16),

    #[error("bond at position {0} has no atom on one side")]
    DanglingBond(usize),

    #[error("ring closure {0} bonds an atom to itself")]
    SelfBond(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondOrder {
    Single,
    Double,
    Triple,
    Quadruple,
    Aromatic,
}

impl BondOrder {
    /// Contribution to the atom's valence; aromatic bonds count one and the
    /// atom's shared pi electron is added separately.
    fn valence(self) -> u8 {
        match self {
            BondOrder::Single | BondOrder::Aromatic => 1,
            BondOrder::Double => 2,
            BondOrder::Triple => 3,
            BondOrder::Quadruple => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Chirality {
    #[default]
    Unspecified,
    /// `@@`
    Clockwise,
    /// `@`
    CounterClockwise,
}

impl Chirality {
    /// Numeric chiral tag used as an atom feature.
    pub fn tag(self) -> u8 {
        match self {
            Chirality::Unspecified => 0,
            Chirality::Clockwise => 1,
            Chirality::CounterClockwise => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hybridization {
    S,
    Sp,
    Sp2,
    Sp3,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    pub element: &'static Element,
    pub aromatic: bool,
    pub charge: i8,
    pub isotope: Option<u16>,
    pub chirality: Chirality,
    /// Hydrogen count written inside brackets; `None` for organic-subset
    /// atoms whose hydrogens are implicit.
    pub bracket_hydrogens: Option<u8>,
}

impl Atom {
    fn organic(element: &'static Element, aromatic: bool) -> Self {
        Self {
            element,
            aromatic,
            charge: 0,
            isotope: None,
            chirality: Chirality::Unspecified,
            bracket_hydrogens: None,
        }
    }

    /// Isotope mass when one is written, otherwise the average mass.
    pub fn mass(&self) -> f32 {
        self.isotope.map(f32::from).unwrap_or(self.element.mass)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bond {
    pub begin: usize,
    pub end: usize,
    pub order: BondOrder,
}

/// Parsed structure: heavy atoms plus the bonds between them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Molecule {
    pub atoms: Vec<Atom>,
    pub bonds: Vec<Bond>,
}

impl Molecule {
    pub fn num_atoms(&self) -> usize {
        self.atoms.len()
    }

    pub fn num_bonds(&self) -> usize {
        self.bonds.len()
    }

    pub fn neighbours(&self, idx: usize) -> impl Iterator<Item = (usize, BondOrder)> + '_ {
        self.bonds.iter().filter_map(move |b| {
            if b.begin == idx {
                Some((b.end, b.order))
            } else if b.end == idx {
                Some((b.begin, b.order))
            } else {
                None
            }
        })
    }

    /// Number of explicit (heavy-atom) neighbours.
    pub fn degree(&self, idx: usize) -> usize {
        self.neighbours(idx).count()
    }

    /// Explicit bracket hydrogens, or implicit hydrogens from the lowest
    /// default valence that accommodates the bonds.
    pub fn total_hydrogens(&self, idx: usize) -> u8 {
        let atom = &self.atoms[idx];
        if let Some(h) = atom.bracket_hydrogens {
            return h;
        }
        // Bond order sums are unbounded on heavily branched atoms.
        let mut used: usize = self.neighbours(idx).map(|(_, order)| usize::from(order.valence())).sum();
        if atom.aromatic {
            used += 1;
        }
        atom.element
            .valences
            .iter()
            .map(|&v| usize::from(v))
            .find(|&v| v >= used)
            .and_then(|v| u8::try_from(v - used).ok())
            .unwrap_or(0)
    }

    pub fn hybridization(&self, idx: usize) -> Hybridization {
        let atom = &self.atoms[idx];
        if atom.element.atomic_number <= 2 {
            return Hybridization::S;
        }
        if atom.aromatic {
            return Hybridization::Sp2;
        }
        let (mut doubles, mut triples) = (0, 0);
        for (_, order) in self.neighbours(idx) {
            match order {
                BondOrder::Double => doubles += 1,
                BondOrder::Triple | BondOrder::Quadruple => triples += 1,
                BondOrder::Aromatic => return Hybridization::Sp2,
                BondOrder::Single => {}
            }
        }
        let steric = self.degree(idx) + self.total_hydrogens(idx) as usize;
        if triples > 0 || doubles >= 2 {
            Hybridization::Sp
        } else if doubles == 1 {
            Hybridization::Sp2
        } else if steric > 4 {
            Hybridization::Other
        } else {
            Hybridization::Sp3
        }
    }
}

/// Turns a structure string into a [`Molecule`].
pub trait MoleculeParser: Send + Sync {
    fn parse(&self, input: &str) -> Result<Molecule, SmilesError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SmilesParser;

impl MoleculeParser for SmilesParser {
    fn parse(&self, input: &str) -> Result<Molecule, SmilesError> {
        Reader::new(input.trim()).read()
    }
}

struct RingOpening {
    atom: usize,
    order: Option<BondOrder>,
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    mol: Molecule,
    prev: Option<usize>,
    pending: Option<(BondOrder, usize)>,
    branches: Vec<usize>,
    rings: HashMap<u16, RingOpening>,
}

impl<'a> Reader<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            bytes: input.as_bytes(),
            pos: 0,
            mol: Molecule::default(),
            prev: None,
            pending: None,
            branches: Vec::new(),
            rings: HashMap::new(),
        }
    }

    fn read(mut self) -> Result<Molecule, SmilesError> {
        while let Some(&b) = self.bytes.get(self.pos) {
            match b {
                b'(' => {
                    let atom = self.prev.ok_or(SmilesError::UnbalancedBranch(self.pos))?;
                    self.branches.push(atom);
                    self.pos += 1;
                }
                b')' => {
                    if let Some((_, pos)) = self.pending {
                        return Err(SmilesError::DanglingBond(pos));
                    }
                    let atom = self.branches.pop().ok_or(SmilesError::UnbalancedBranch(self.pos))?;
                    self.prev = Some(atom);
                    self.pos += 1;
                }
                b'.' => {
                    if let Some((_, pos)) = self.pending {
                        return Err(SmilesError::DanglingBond(pos));
                    }
                    self.prev = None;
                    self.pos += 1;
                }
                b'-' | b'=' | b'#' | b'$' | b':' | b'/' | b'\\' => {
                    if self.pending.is_some() || self.prev.is_none() {
                        return Err(SmilesError::DanglingBond(self.pos));
                    }
                    let order = match b {
                        b'=' => BondOrder::Double,
                        b'#' => BondOrder::Triple,
                        b'$' => BondOrder::Quadruple,
                        b':' => BondOrder::Aromatic,
                        _ => BondOrder::Single,
                    };
                    self.pending = Some((order, self.pos));
                    self.pos += 1;
                }
                b'0'..=b'9' => {
                    let label = u16::from(b - b'0');
                    self.pos += 1;
                    self.ring_bond(label)?;
                }
                b'%' => {
                    let start = self.pos;
                    let digits = self.bytes.get(start + 1..start + 3).filter(|d| d.iter().all(u8::is_ascii_digit));
                    let label = match digits {
                        Some(d) => u16::from(d[0] - b'0') * 10 + u16::from(d[1] - b'0'),
                        None => return Err(SmilesError::UnexpectedChar { ch: '%', pos: start }),
                    };
                    self.pos += 3;
                    self.ring_bond(label)?;
                }
                b'[' => {
                    let atom = self.bracket_atom()?;
                    self.push_atom(atom);
                }
                _ => {
                    let atom = self.organic_atom()?;
                    self.push_atom(atom);
                }
            }
        }

        if let Some((_, pos)) = self.pending {
            return Err(SmilesError::DanglingBond(pos));
        }
        if !self.branches.is_empty() {
            return Err(SmilesError::UnbalancedBranch(self.pos));
        }
        if let Some(label) = self.rings.keys().min() {
            return Err(SmilesError::UnclosedRing(*label));
        }
        if self.mol.atoms.is_empty() {
            return Err(SmilesError::Empty);
        }
        Ok(self.mol)
    }

    fn default_order(&self, a: usize, b: usize) -> BondOrder {
        if self.mol.atoms[a].aromatic && self.mol.atoms[b].aromatic {
            BondOrder::Aromatic
        } else {
            BondOrder::Single
        }
    }

    fn push_atom(&mut self, atom: Atom) {
        let idx = self.mol.atoms.len();
        self.mol.atoms.push(atom);
        if let Some(prev) = self.prev {
            let order = match self.pending.take() {
                Some((order, _)) => order,
                None => self.default_order(prev, idx),
            };
            self.mol.bonds.push(Bond { begin: prev, end: idx, order });
        }
        self.prev = Some(idx);
    }

    fn ring_bond(&mut self, label: u16) -> Result<(), SmilesError> {
        let atom = self.prev.ok_or(SmilesError::DanglingBond(self.pos))?;
        let written = self.pending.take().map(|(order, _)| order);
        match self.rings.remove(&label) {
            Some(open) => {
                if open.atom == atom {
                    return Err(SmilesError::SelfBond(label));
                }
                let order = written
                    .or(open.order)
                    .unwrap_or_else(|| self.default_order(open.atom, atom));
                self.mol.bonds.push(Bond { begin: open.atom, end: atom, order });
            }
            None => {
                self.rings.insert(label, RingOpening { atom, order: written });
            }
        }
        Ok(())
    }

    fn unexpected(&self) -> SmilesError {
        match self.bytes.get(self.pos) {
            Some(&b) => SmilesError::UnexpectedChar { ch: b as char, pos: self.pos },
            None => SmilesError::Empty,
        }
    }

    fn slice(&self, len: usize) -> Option<&'a str> {
        self.bytes
            .get(self.pos..self.pos + len)
            .and_then(|s| std::str::from_utf8(s).ok())
    }

    fn organic_atom(&mut self) -> Result<Atom, SmilesError> {
        if let Some(sym @ ("Cl" | "Br")) = self.slice(2) {
            self.pos += 2;
            let element = element::lookup(sym).ok_or_else(|| SmilesError::UnknownElement(sym.into()))?;
            return Ok(Atom::organic(element, false));
        }
        let b = *self.bytes.get(self.pos).ok_or(SmilesError::Empty)?;
        let (symbol, aromatic) = match b {
            b'B' | b'C' | b'N' | b'O' | b'P' | b'S' | b'F' | b'I' | b'*' => ((b as char).to_string(), false),
            b'b' | b'c' | b'n' | b'o' | b'p' | b's' => ((b.to_ascii_uppercase() as char).to_string(), true),
            _ => return Err(self.unexpected()),
        };
        let element = element::lookup(&symbol).ok_or(SmilesError::UnknownElement(symbol))?;
        self.pos += 1;
        Ok(Atom::organic(element, aromatic))
    }

    fn number(&mut self) -> Option<u16> {
        let start = self.pos;
        let mut value: u16 = 0;
        while let Some(d) = self.bytes.get(self.pos).filter(|b| b.is_ascii_digit()) {
            value = value.saturating_mul(10).saturating_add(u16::from(d - b'0'));
            self.pos += 1;
        }
        (self.pos > start).then_some(value)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bracket_symbol(&mut self) -> Result<(&'static Element, bool), SmilesError> {
        let first = self.peek().ok_or(SmilesError::Empty)?;
        if first.is_ascii_lowercase() {
            if let Some(two) = self.slice(2).filter(|s| matches!(*s, "se" | "as" | "te")) {
                let symbol = format!("{}{}", two[..1].to_ascii_uppercase(), &two[1..]);
                let element = element::lookup(&symbol).ok_or(SmilesError::UnknownElement(symbol))?;
                self.pos += 2;
                return Ok((element, true));
            }
            let symbol = (first.to_ascii_uppercase() as char).to_string();
            if !element::can_be_aromatic(&symbol) {
                return Err(SmilesError::UnknownElement((first as char).to_string()));
            }
            let element = element::lookup(&symbol).ok_or(SmilesError::UnknownElement(symbol))?;
            self.pos += 1;
            return Ok((element, true));
        }
        if first.is_ascii_uppercase() || first == b'*' {
            if let Some(two) = self.slice(2).filter(|s| s.as_bytes()[1].is_ascii_lowercase()) {
                if let Some(element) = element::lookup(two) {
                    self.pos += 2;
                    return Ok((element, false));
                }
            }
            let symbol = (first as char).to_string();
            let element = element::lookup(&symbol).ok_or(SmilesError::UnknownElement(symbol))?;
            self.pos += 1;
            return Ok((element, false));
        }
        Err(self.unexpected())
    }

    fn bracket_atom(&mut self) -> Result<Atom, SmilesError> {
        let open = self.pos;
        self.pos += 1;
        if self.peek().is_none() {
            return Err(SmilesError::UnterminatedBracket(open));
        }
        let isotope = self.number();
        let (element, aromatic) = self.bracket_symbol()?;

        let mut chirality = Chirality::Unspecified;
        if self.peek() == Some(b'@') {
            self.pos += 1;
            chirality = if self.peek() == Some(b'@') {
                self.pos += 1;
                Chirality::Clockwise
            } else {
                Chirality::CounterClockwise
            };
            if matches!(self.slice(2), Some("TH" | "AL" | "SP" | "TB" | "OH")) {
                self.pos += 2;
                self.number();
            }
        }

        let mut hydrogens = 0u8;
        if self.peek() == Some(b'H') {
            self.pos += 1;
            hydrogens = self.number().map(|n| n.min(u16::from(u8::MAX)) as u8).unwrap_or(1);
        }

        let mut charge: i8 = 0;
        if let Some(sign @ (b'+' | b'-')) = self.peek() {
            self.pos += 1;
            let magnitude = match self.number() {
                Some(n) => n.min(15) as i8,
                None => {
                    let mut count = 1i8;
                    while self.peek() == Some(sign) && count < 15 {
                        self.pos += 1;
                        count += 1;
                    }
                    count
                }
            };
            charge = if sign == b'+' { magnitude } else { -magnitude };
        }

        if self.peek() == Some(b':') {
            self.pos += 1;
            self.number();
        }

        match self.peek() {
            Some(b']') => self.pos += 1,
            Some(_) => return Err(self.unexpected()),
            None => return Err(SmilesError::UnterminatedBracket(open)),
        }

        Ok(Atom {
            element,
            aromatic,
            charge,
            isotope,
            chirality,
            bracket_hydrogens: Some(hydrogens),
        })
    }
}
