use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
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
    #[error("Invalid value for '{parameter}': {reason}")]
    InvalidValue {
        parameter: &'static str,
        reason: String,
    },
}

/// Settings of the rule-based processor.
///
/// Every field has a default, so a TOML file only needs to name the values it
/// changes. Keys are kebab-case, e.g. `peptide-bond-cutoff = 1.9`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct ProcessorConfig {
    /// Copy chemical class and one-letter code from the compound library.
    pub assign_chem_class: bool,
    /// Connect atoms by the bonds of their compound template.
    pub connect_templates: bool,
    /// Link C of a peptide-linking residue to N of the next one.
    pub connect_peptides: bool,
    /// Longest C-N distance, in Angstroms, still linked as a peptide bond.
    pub peptide_bond_cutoff: f64,
    /// Connect residues missing from the library by interatomic distance.
    pub connect_unknown: bool,
    /// Slack added to the sum of covalent radii for distance-based bonds.
    pub bond_tolerance: f64,
    /// Bonds shorter than this are reported as implausible.
    pub min_bond_length: f64,
    /// Bonds longer than this are reported as implausible.
    pub max_bond_length: f64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            assign_chem_class: true,
            connect_templates: true,
            connect_peptides: true,
            peptide_bond_cutoff: 1.8,
            connect_unknown: true,
            bond_tolerance: 0.4,
            min_bond_length: 0.4,
            max_bond_length: 2.3,
        }
    }
}

impl ProcessorConfig {
    pub fn builder() -> ProcessorConfigBuilder {
        ProcessorConfigBuilder::new()
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading processor configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        Self::parse(&content, &path.to_string_lossy())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse(content, "<string>")
    }

    fn parse(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: ProcessorConfig = toml::from_str(content).map_err(|e| ConfigError::Toml {
            path: origin.to_string(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects negative or non-finite distances and an empty bond length window.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (parameter, value) in [
            ("peptide-bond-cutoff", self.peptide_bond_cutoff),
            ("bond-tolerance", self.bond_tolerance),
            ("min-bond-length", self.min_bond_length),
            ("max-bond-length", self.max_bond_length),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidValue {
                    parameter,
                    reason: format!("expected a non-negative distance, got {}", value),
                });
            }
        }
        if self.min_bond_length >= self.max_bond_length {
            return Err(ConfigError::InvalidValue {
                parameter: "min-bond-length",
                reason: format!(
                    "must be smaller than max-bond-length ({} >= {})",
                    self.min_bond_length, self.max_bond_length
                ),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct ProcessorConfigBuilder {
    assign_chem_class: Option<bool>,
    connect_templates: Option<bool>,
    connect_peptides: Option<bool>,
    peptide_bond_cutoff: Option<f64>,
    connect_unknown: Option<bool>,
    bond_tolerance: Option<f64>,
    min_bond_length: Option<f64>,
    max_bond_length: Option<f64>,
}

impl ProcessorConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign_chem_class(mut self, enabled: bool) -> Self {
        self.assign_chem_class = Some(enabled);
        self
    }
    pub fn connect_templates(mut self, enabled: bool) -> Self {
        self.connect_templates = Some(enabled);
        self
    }
    pub fn connect_peptides(mut self, enabled: bool) -> Self {
        self.connect_peptides = Some(enabled);
        self
    }
    pub fn peptide_bond_cutoff(mut self, cutoff: f64) -> Self {
        self.peptide_bond_cutoff = Some(cutoff);
        self
    }
    pub fn connect_unknown(mut self, enabled: bool) -> Self {
        self.connect_unknown = Some(enabled);
        self
    }
    pub fn bond_tolerance(mut self, tolerance: f64) -> Self {
        self.bond_tolerance = Some(tolerance);
        self
    }
    pub fn min_bond_length(mut self, length: f64) -> Self {
        self.min_bond_length = Some(length);
        self
    }
    pub fn max_bond_length(mut self, length: f64) -> Self {
        self.max_bond_length = Some(length);
        self
    }

    pub fn build(self) -> Result<ProcessorConfig, ConfigError> {
        let defaults = ProcessorConfig::default();
        let config = ProcessorConfig {
            assign_chem_class: self.assign_chem_class.unwrap_or(defaults.assign_chem_class),
            connect_templates: self.connect_templates.unwrap_or(defaults.connect_templates),
            connect_peptides: self.connect_peptides.unwrap_or(defaults.connect_peptides),
            peptide_bond_cutoff: self.peptide_bond_cutoff.unwrap_or(defaults.peptide_bond_cutoff),
            connect_unknown: self.connect_unknown.unwrap_or(defaults.connect_unknown),
            bond_tolerance: self.bond_tolerance.unwrap_or(defaults.bond_tolerance),
            min_bond_length: self.min_bond_length.unwrap_or(defaults.min_bond_length),
            max_bond_length: self.max_bond_length.unwrap_or(defaults.max_bond_length),
        };
        config.validate()?;
        Ok(config)
    }
}
