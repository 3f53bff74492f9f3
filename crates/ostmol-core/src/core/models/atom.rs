use super::ids::{BondId, ResidueId};
use super::props::GenericPropContainer;
use nalgebra::Point3;

/// Represents an atom of a molecular entity.
///
/// An atom is owned by exactly one residue. Its Cartesian position is the XCS
/// representation of its geometry; whether that position is current is tracked
/// by the owning entity's coordinate engine, so the position is only exposed
/// within the crate.
#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    /// The name of the atom (e.g., "CA", "N", "O").
    pub name: String,
    /// The chemical element symbol (e.g., "C", "FE").
    pub element: String,
    /// The ID of the residue this atom belongs to.
    pub residue_id: ResidueId,
    /// Occupancy in the range [0, 1].
    pub occupancy: f64,
    /// Isotropic temperature factor in square Angstroms.
    pub b_factor: f64,
    /// Formal or partial charge in elementary charge units.
    pub charge: f64,
    /// Whether the atom was declared as a hetero atom by its source.
    pub is_hetatm: bool,
    /// User-defined properties.
    pub props: GenericPropContainer,
    pub(crate) position: Point3<f64>,
    pub(crate) bonds: Vec<BondId>,
}

impl Atom {
    /// Creates a new atom with default occupancy (1.0) and zero B-factor and charge.
    ///
    /// # Arguments
    ///
    /// * `name` - The atom name.
    /// * `element` - The element symbol.
    /// * `residue_id` - The owning residue.
    /// * `position` - Initial Cartesian position.
    pub fn new(name: &str, element: &str, residue_id: ResidueId, position: Point3<f64>) -> Self {
        Self {
            name: name.to_string(),
            element: element.to_string(),
            residue_id,
            occupancy: 1.0,
            b_factor: 0.0,
            charge: 0.0,
            is_hetatm: false,
            props: GenericPropContainer::new(),
            position,
            bonds: Vec::new(),
        }
    }

    /// Incident bonds in the order they were created.
    pub fn bonds(&self) -> &[BondId] {
        &self.bonds
    }

    /// Hydrogen and deuterium atoms.
    pub fn is_hydrogen(&self) -> bool {
        matches!(self.element.as_str(), "H" | "D")
    }
}
