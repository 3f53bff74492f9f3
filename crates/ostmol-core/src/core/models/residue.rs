use super::ids::{AtomId, ChainId};
use super::props::GenericPropContainer;
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A residue number with an optional insertion code, as used by PDB-style sources.
///
/// Numbers order first by the numeric part and then by insertion code, with a
/// residue without insertion code sorting before any coded residue of the same
/// number (`42 < 42A < 42B < 43`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResNum {
    pub num: i32,
    pub ins_code: Option<char>,
}

impl ResNum {
    pub fn new(num: i32) -> Self {
        Self {
            num,
            ins_code: None,
        }
    }

    pub fn with_ins_code(num: i32, ins_code: char) -> Self {
        Self {
            num,
            ins_code: Some(ins_code),
        }
    }

    /// The number following this one, dropping any insertion code.
    pub fn next(&self) -> Self {
        Self::new(self.num + 1)
    }
}

impl Ord for ResNum {
    fn cmp(&self, other: &Self) -> Ordering {
        self.num
            .cmp(&other.num)
            .then_with(|| self.ins_code.cmp(&other.ins_code))
    }
}

impl PartialOrd for ResNum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<i32> for ResNum {
    fn from(num: i32) -> Self {
        Self::new(num)
    }
}

impl fmt::Display for ResNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ins_code {
            Some(code) => write!(f, "{}{}", self.num, code),
            None => write!(f, "{}", self.num),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid residue number '{0}'")]
pub struct ParseResNumError(pub String);

impl FromStr for ResNum {
    type Err = ParseResNumError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let err = || ParseResNumError(s.to_string());
        let split = trimmed
            .char_indices()
            .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
            .map(|(i, _)| i)
            .unwrap_or(trimmed.len());
        let (digits, rest) = trimmed.split_at(split);
        let num: i32 = digits.parse().map_err(|_| err())?;
        let mut rest_chars = rest.chars();
        match (rest_chars.next(), rest_chars.next()) {
            (None, _) => Ok(Self::new(num)),
            (Some(code), None) if code.is_ascii_alphabetic() => Ok(Self::with_ins_code(num, code)),
            _ => Err(err()),
        }
    }
}

/// Chemical class of a residue, following the mmCIF chemical component vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChemClass {
    PeptideLinking,
    LPeptideLinking,
    DPeptideLinking,
    RnaLinking,
    DnaLinking,
    Saccharide,
    NonPolymer,
    Water,
    #[default]
    Unknown,
}

impl ChemClass {
    pub fn is_peptide_linking(&self) -> bool {
        matches!(
            self,
            ChemClass::PeptideLinking | ChemClass::LPeptideLinking | ChemClass::DPeptideLinking
        )
    }

    pub fn is_nucleotide_linking(&self) -> bool {
        matches!(self, ChemClass::RnaLinking | ChemClass::DnaLinking)
    }
}

#[derive(Debug, Error)]
#[error("Invalid chemical class string")]
pub struct ParseChemClassError;

impl FromStr for ChemClass {
    type Err = ParseChemClassError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "peptide-linking" | "peptide" => Ok(Self::PeptideLinking),
            "l-peptide-linking" => Ok(Self::LPeptideLinking),
            "d-peptide-linking" => Ok(Self::DPeptideLinking),
            "rna-linking" => Ok(Self::RnaLinking),
            "dna-linking" => Ok(Self::DnaLinking),
            "saccharide" => Ok(Self::Saccharide),
            "non-polymer" => Ok(Self::NonPolymer),
            "water" => Ok(Self::Water),
            "unknown" => Ok(Self::Unknown),
            _ => Err(ParseChemClassError),
        }
    }
}

impl fmt::Display for ChemClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::PeptideLinking => "peptide-linking",
                Self::LPeptideLinking => "l-peptide-linking",
                Self::DPeptideLinking => "d-peptide-linking",
                Self::RnaLinking => "rna-linking",
                Self::DnaLinking => "dna-linking",
                Self::Saccharide => "saccharide",
                Self::NonPolymer => "non-polymer",
                Self::Water => "water",
                Self::Unknown => "unknown",
            }
        )
    }
}

/// A residue: an ordered group of atoms with a compound key and a number.
#[derive(Debug, Clone, PartialEq)]
pub struct Residue {
    /// Compound key, e.g. "ALA" or "HOH".
    pub key: String,
    pub number: ResNum,
    pub one_letter_code: char,
    pub chem_class: ChemClass,
    pub is_ligand: bool,
    pub chain_id: ChainId,
    pub props: GenericPropContainer,
    pub(crate) atoms: Vec<AtomId>,
    atom_name_map: HashMap<String, AtomId>,
}

impl Residue {
    pub(crate) fn new(key: &str, number: ResNum, chain_id: ChainId) -> Self {
        Self {
            key: key.to_string(),
            number,
            one_letter_code: 'X',
            chem_class: ChemClass::Unknown,
            is_ligand: false,
            chain_id,
            props: GenericPropContainer::new(),
            atoms: Vec::new(),
            atom_name_map: HashMap::new(),
        }
    }

    pub(crate) fn add_atom(&mut self, atom_name: &str, atom_id: AtomId) {
        self.atoms.push(atom_id);
        self.atom_name_map.insert(atom_name.to_string(), atom_id);
    }

    pub(crate) fn remove_atoms(&mut self, doomed: &HashSet<AtomId>) {
        self.atoms.retain(|id| !doomed.contains(id));
        self.atom_name_map.retain(|_, id| !doomed.contains(id));
    }

    pub(crate) fn rename_atom(&mut self, old_name: &str, new_name: &str, atom_id: AtomId) {
        self.atom_name_map.remove(old_name);
        self.atom_name_map.insert(new_name.to_string(), atom_id);
    }

    pub fn atoms(&self) -> &[AtomId] {
        &self.atoms
    }

    pub fn atom_id_by_name(&self, name: &str) -> Option<AtomId> {
        self.atom_name_map.get(name).copied()
    }

    /// Position of `atom_id` within the residue, in insertion order.
    pub fn atom_index(&self, atom_id: AtomId) -> Option<usize> {
        self.atoms.iter().position(|&id| id == atom_id)
    }

    /// Peptide-linking residues count as amino acids.
    pub fn is_peptide(&self) -> bool {
        self.chem_class.is_peptide_linking()
    }

    /// Display name combining key and number, e.g. `ALA42A`.
    pub fn qualified_name(&self) -> String {
        format!("{}{}", self.key, self.number)
    }
}
