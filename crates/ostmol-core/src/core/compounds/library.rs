use crate::core::models::residue::ChemClass;
use crate::core::models::topology::BondOrder;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

const BUILTIN_COMPOUNDS: &str = include_str!("../../../data/compounds.toml");

fn default_one_letter_code() -> String {
    "X".to_string()
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CompoundBond {
    pub atoms: [String; 2],
    #[serde(default)]
    pub order: BondOrder,
}

/// Template for one chemical compound, keyed by its residue key in the library.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Compound {
    #[serde(default = "default_one_letter_code")]
    pub one_letter_code: String,
    pub chem_class: ChemClass,
    #[serde(default)]
    pub atoms: Vec<String>,
    #[serde(default)]
    pub bonds: Vec<CompoundBond>,
}

impl Compound {
    pub fn olc(&self) -> char {
        self.one_letter_code.chars().next().unwrap_or('X')
    }

    pub fn has_atom(&self, name: &str) -> bool {
        self.atoms.iter().any(|a| a == name)
    }

    fn validate(&self, key: &str) -> Result<(), String> {
        if self.one_letter_code.chars().count() != 1 {
            return Err(format!(
                "one_letter_code '{}' of {} must be a single character",
                self.one_letter_code, key
            ));
        }
        for bond in &self.bonds {
            for name in &bond.atoms {
                if !self.has_atom(name) {
                    return Err(format!("bond of {} refers to unknown atom '{}'", key, name));
                }
            }
        }
        Ok(())
    }
}

/// A registry of compound templates loaded from TOML.
#[derive(Debug, Clone, Default)]
pub struct CompoundLibrary {
    registry: HashMap<String, Compound>,
}

impl CompoundLibrary {
    /// Loads a library from a TOML file whose tables are compound keys.
    pub fn load(path: &Path) -> Result<Self, CompoundLoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| CompoundLoadError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        Self::parse(&content, &path.to_string_lossy())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, CompoundLoadError> {
        Self::parse(content, "<string>")
    }

    /// The embedded library of the 20 standard amino acids and water.
    pub fn builtin() -> Result<Self, CompoundLoadError> {
        Self::parse(BUILTIN_COMPOUNDS, "<builtin>")
    }

    fn parse(content: &str, origin: &str) -> Result<Self, CompoundLoadError> {
        let registry: HashMap<String, Compound> =
            toml::from_str(content).map_err(|e| CompoundLoadError::Toml {
                path: origin.to_string(),
                source: e,
            })?;
        for (key, compound) in &registry {
            compound
                .validate(key)
                .map_err(|message| CompoundLoadError::InvalidCompound {
                    key: key.clone(),
                    message,
                })?;
        }
        Ok(Self { registry })
    }

    pub fn get(&self, key: &str) -> Option<&Compound> {
        self.registry.get(key)
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Adds or replaces a compound.
    pub fn insert(&mut self, key: &str, compound: Compound) {
        self.registry.insert(key.to_string(), compound);
    }
}

#[derive(Debug, Error)]
pub enum CompoundLoadError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("Invalid compound '{key}': {message}")]
    InvalidCompound { key: String, message: String },
}
