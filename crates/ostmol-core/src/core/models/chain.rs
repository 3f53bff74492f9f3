use super::ids::ResidueId;
use super::props::GenericPropContainer;
use super::residue::ResNum;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChainType {
    Polypeptide,
    Polynucleotide,
    NonPolymer,
    Water,
    #[default]
    Unknown,
}

#[derive(Debug, Error)]
#[error("Invalid chain type string")]
pub struct ParseChainTypeError;

impl FromStr for ChainType {
    type Err = ParseChainTypeError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "polypeptide" | "protein" => Ok(ChainType::Polypeptide),
            "polynucleotide" | "dna" | "rna" => Ok(ChainType::Polynucleotide),
            "non-polymer" | "nonpolymer" | "ligand" => Ok(ChainType::NonPolymer),
            "water" => Ok(ChainType::Water),
            "unknown" => Ok(ChainType::Unknown),
            _ => Err(ParseChainTypeError),
        }
    }
}

impl fmt::Display for ChainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ChainType::Polypeptide => "Polypeptide",
                ChainType::Polynucleotide => "Polynucleotide",
                ChainType::NonPolymer => "NonPolymer",
                ChainType::Water => "Water",
                ChainType::Unknown => "Unknown",
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    pub name: String,                              // Chain name, unique within an entity
    pub chain_type: ChainType,                     // Polymer type of the chain
    pub props: GenericPropContainer,               // User-defined properties
    pub(crate) residues: Vec<ResidueId>,           // Ordered residues owned by this chain
    residue_number_map: HashMap<ResNum, ResidueId>, // Residue number index
}

impl Chain {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            chain_type: ChainType::Unknown,
            props: GenericPropContainer::new(),
            residues: Vec::new(),
            residue_number_map: HashMap::new(),
        }
    }

    pub fn residues(&self) -> &[ResidueId] {
        &self.residues
    }

    pub fn residue_by_number(&self, number: ResNum) -> Option<ResidueId> {
        self.residue_number_map.get(&number).copied()
    }

    /// The number an appended residue receives when the caller does not pick one.
    pub fn next_residue_number(&self, last: Option<ResNum>) -> ResNum {
        last.map(|n| n.next()).unwrap_or(ResNum::new(1))
    }

    pub(crate) fn push_residue(&mut self, number: ResNum, residue_id: ResidueId) {
        self.residues.push(residue_id);
        self.residue_number_map.insert(number, residue_id);
    }

    pub(crate) fn remove_residues(&mut self, doomed: &HashSet<ResidueId>) {
        self.residues.retain(|id| !doomed.contains(id));
        self.residue_number_map.retain(|_, id| !doomed.contains(id));
    }

    pub(crate) fn renumber_residue(&mut self, old: ResNum, new: ResNum, residue_id: ResidueId) {
        self.residue_number_map.remove(&old);
        self.residue_number_map.insert(new, residue_id);
    }
}
