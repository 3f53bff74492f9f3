use super::entity::EntityHandle;
use super::error::EntityError;
use super::signals::PropertyTarget;
use crate::core::models::atom::Atom;
use crate::core::models::chain::{Chain, ChainType};
use crate::core::models::entity::EntityData;
use crate::core::models::ids::{AtomId, BondId, ChainId, ResidueId, TorsionId};
use crate::core::models::props::{GenericPropContainer, PropValue};
use crate::core::models::residue::{ChemClass, ResNum, Residue};
use crate::core::models::topology::{Bond, BondOrder};
use crate::core::utils::geometry;
use nalgebra::Point3;

/// Read access to the generic properties of a node.
///
/// Implemented by the entity handle and every node handle; views reach it
/// through `Deref`. Writes go through the editors.
pub trait PropertyOwner {
    fn with_props<R>(&self, f: impl FnOnce(&GenericPropContainer) -> R) -> Result<R, EntityError>;

    fn prop_target(&self) -> PropertyTarget;

    fn owning_entity(&self) -> &EntityHandle;

    fn has_prop(&self, key: &str) -> Result<bool, EntityError> {
        self.with_props(|p| p.has(key))
    }

    fn prop(&self, key: &str) -> Result<Option<PropValue>, EntityError> {
        self.with_props(|p| p.get(key).cloned())
    }

    fn prop_keys(&self) -> Result<Vec<String>, EntityError> {
        self.with_props(|p| p.keys().into_iter().map(str::to_string).collect())
    }

    fn string_prop(&self, key: &str) -> Result<String, EntityError> {
        Ok(self.with_props(|p| p.string(key).map(str::to_string))??)
    }

    fn float_prop(&self, key: &str) -> Result<f64, EntityError> {
        Ok(self.with_props(|p| p.float(key))??)
    }

    fn int_prop(&self, key: &str) -> Result<i32, EntityError> {
        Ok(self.with_props(|p| p.int(key))??)
    }

    fn bool_prop(&self, key: &str) -> Result<bool, EntityError> {
        Ok(self.with_props(|p| p.bool(key))??)
    }

    fn vec3_prop(&self, key: &str) -> Result<nalgebra::Vector3<f64>, EntityError> {
        Ok(self.with_props(|p| p.vec3(key))??)
    }

    fn string_prop_or(&self, key: &str, default: &str) -> Result<String, EntityError> {
        Ok(self.with_props(|p| p.string_or(key, default).map(str::to_string))??)
    }

    fn float_prop_or(&self, key: &str, default: f64) -> Result<f64, EntityError> {
        Ok(self.with_props(|p| p.float_or(key, default))??)
    }

    fn int_prop_or(&self, key: &str, default: i32) -> Result<i32, EntityError> {
        Ok(self.with_props(|p| p.int_or(key, default))??)
    }

    fn bool_prop_or(&self, key: &str, default: bool) -> Result<bool, EntityError> {
        Ok(self.with_props(|p| p.bool_or(key, default))??)
    }

    /// Canonical string rendering of a property, as used by exporters.
    fn prop_as_string(&self, key: &str) -> Result<String, EntityError> {
        Ok(self.with_props(|p| p.as_string(key))??)
    }
}

macro_rules! node_handle {
    ($(#[$meta:meta])* $name:ident, $id:ty, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash)]
        pub struct $name {
            entity: EntityHandle,
            id: $id,
        }

        impl $name {
            pub(crate) fn new(entity: EntityHandle, id: $id) -> Self {
                Self { entity, id }
            }

            pub fn id(&self) -> $id {
                self.id
            }

            pub fn entity(&self) -> &EntityHandle {
                &self.entity
            }

            fn invalid() -> EntityError {
                EntityError::InvalidHandle { kind: $kind }
            }
        }
    };
}

node_handle!(
    /// A reference to one chain of an entity.
    ChainHandle,
    ChainId,
    "chain"
);
node_handle!(
    /// A reference to one residue of an entity.
    ResidueHandle,
    ResidueId,
    "residue"
);
node_handle!(
    /// A reference to one atom of an entity.
    AtomHandle,
    AtomId,
    "atom"
);
node_handle!(BondHandle, BondId, "bond");
node_handle!(TorsionHandle, TorsionId, "torsion");

impl ChainHandle {
    fn with<R>(&self, f: impl FnOnce(&Chain, &EntityData) -> R) -> Result<R, EntityError> {
        self.entity
            .read(|data| data.chain(self.id).map(|c| f(c, data)))
            .ok_or_else(Self::invalid)
    }

    pub fn is_valid(&self) -> bool {
        self.with(|_, _| ()).is_ok()
    }

    pub fn name(&self) -> Result<String, EntityError> {
        self.with(|c, _| c.name.clone())
    }

    pub fn chain_type(&self) -> Result<ChainType, EntityError> {
        self.with(|c, _| c.chain_type)
    }

    pub fn residue_count(&self) -> Result<usize, EntityError> {
        self.with(|c, _| c.residues().len())
    }

    pub fn residues(&self) -> Result<Vec<ResidueHandle>, EntityError> {
        let ids = self.with(|c, _| c.residues().to_vec())?;
        Ok(ids
            .into_iter()
            .map(|id| ResidueHandle::new(self.entity.clone(), id))
            .collect())
    }

    pub fn atoms(&self) -> Result<Vec<AtomHandle>, EntityError> {
        let ids = self.with(|c, data| {
            c.residues()
                .iter()
                .filter_map(|&r| data.residue(r))
                .flat_map(|r| r.atoms().iter().copied())
                .collect::<Vec<_>>()
        })?;
        Ok(ids
            .into_iter()
            .map(|id| AtomHandle::new(self.entity.clone(), id))
            .collect())
    }

    pub fn find_residue(&self, number: impl Into<ResNum>) -> Result<Option<ResidueHandle>, EntityError> {
        let number = number.into();
        let id = self.with(|c, _| c.residue_by_number(number))?;
        Ok(id.map(|id| ResidueHandle::new(self.entity.clone(), id)))
    }
}

impl ResidueHandle {
    fn with<R>(&self, f: impl FnOnce(&Residue, &EntityData) -> R) -> Result<R, EntityError> {
        self.entity
            .read(|data| data.residue(self.id).map(|r| f(r, data)))
            .ok_or_else(Self::invalid)
    }

    pub fn is_valid(&self) -> bool {
        self.with(|_, _| ()).is_ok()
    }

    /// The compound key, e.g. `ALA`.
    pub fn name(&self) -> Result<String, EntityError> {
        self.with(|r, _| r.key.clone())
    }

    pub fn number(&self) -> Result<ResNum, EntityError> {
        self.with(|r, _| r.number)
    }

    pub fn one_letter_code(&self) -> Result<char, EntityError> {
        self.with(|r, _| r.one_letter_code)
    }

    pub fn chem_class(&self) -> Result<ChemClass, EntityError> {
        self.with(|r, _| r.chem_class)
    }

    pub fn is_ligand(&self) -> Result<bool, EntityError> {
        self.with(|r, _| r.is_ligand)
    }

    pub fn is_peptide(&self) -> Result<bool, EntityError> {
        self.with(|r, _| r.is_peptide())
    }

    /// Zero-based position of the residue within its chain.
    pub fn index(&self) -> Result<usize, EntityError> {
        self.with(|r, data| {
            data.chain(r.chain_id)
                .and_then(|c| c.residues().iter().position(|&id| id == self.id))
                .unwrap_or(0)
        })
    }

    pub fn chain(&self) -> Result<ChainHandle, EntityError> {
        let id = self.with(|r, _| r.chain_id)?;
        Ok(ChainHandle::new(self.entity.clone(), id))
    }

    pub fn atom_count(&self) -> Result<usize, EntityError> {
        self.with(|r, _| r.atoms().len())
    }

    pub fn atoms(&self) -> Result<Vec<AtomHandle>, EntityError> {
        let ids = self.with(|r, _| r.atoms().to_vec())?;
        Ok(ids
            .into_iter()
            .map(|id| AtomHandle::new(self.entity.clone(), id))
            .collect())
    }

    pub fn find_atom(&self, name: &str) -> Result<Option<AtomHandle>, EntityError> {
        let id = self.with(|r, _| r.atom_id_by_name(name))?;
        Ok(id.map(|id| AtomHandle::new(self.entity.clone(), id)))
    }

    /// `chain.KEYnum`, e.g. `A.ALA42`.
    pub fn qualified_name(&self) -> Result<String, EntityError> {
        self.with(|r, data| {
            let chain = data.chain(r.chain_id).map(|c| c.name.as_str()).unwrap_or("?");
            format!("{}.{}", chain, r.qualified_name())
        })
    }
}

impl AtomHandle {
    fn with<R>(&self, f: impl FnOnce(&Atom) -> R) -> Result<R, EntityError> {
        self.entity
            .read(|data| data.atom(self.id).map(f))
            .ok_or_else(Self::invalid)
    }

    pub fn is_valid(&self) -> bool {
        self.with(|_| ()).is_ok()
    }

    pub fn name(&self) -> Result<String, EntityError> {
        self.with(|a| a.name.clone())
    }

    pub fn element(&self) -> Result<String, EntityError> {
        self.with(|a| a.element.clone())
    }

    /// Cartesian position, rebuilt from internal coordinates first if stale.
    pub fn pos(&self) -> Result<Point3<f64>, EntityError> {
        self.entity
            .read_xcs(|data| data.atom_position(self.id))
            .ok_or_else(Self::invalid)
    }

    pub fn occupancy(&self) -> Result<f64, EntityError> {
        self.with(|a| a.occupancy)
    }

    pub fn b_factor(&self) -> Result<f64, EntityError> {
        self.with(|a| a.b_factor)
    }

    pub fn charge(&self) -> Result<f64, EntityError> {
        self.with(|a| a.charge)
    }

    pub fn is_hetatm(&self) -> Result<bool, EntityError> {
        self.with(|a| a.is_hetatm)
    }

    pub fn residue(&self) -> Result<ResidueHandle, EntityError> {
        let id = self.with(|a| a.residue_id)?;
        Ok(ResidueHandle::new(self.entity.clone(), id))
    }

    pub fn chain(&self) -> Result<ChainHandle, EntityError> {
        self.residue()?.chain()
    }

    pub fn bond_count(&self) -> Result<usize, EntityError> {
        self.with(|a| a.bonds().len())
    }

    /// Incident bonds in creation order.
    pub fn bonds(&self) -> Result<Vec<BondHandle>, EntityError> {
        let ids = self.with(|a| a.bonds().to_vec())?;
        Ok(ids
            .into_iter()
            .map(|id| BondHandle::new(self.entity.clone(), id))
            .collect())
    }

    pub fn bonded_atoms(&self) -> Result<Vec<AtomHandle>, EntityError> {
        if !self.is_valid() {
            return Err(Self::invalid());
        }
        let neighbors = self.entity.read(|data| data.neighbors(self.id));
        Ok(neighbors
            .into_iter()
            .map(|(_, partner)| AtomHandle::new(self.entity.clone(), partner))
            .collect())
    }

    pub fn is_bonded_to(&self, other: &AtomHandle) -> Result<bool, EntityError> {
        if !self.is_valid() {
            return Err(Self::invalid());
        }
        Ok(self.entity == other.entity
            && self.entity.read(|data| data.bond_between(self.id, other.id)).is_some())
    }

    /// `chain.residue.atom`, e.g. `A.ALA42.CA`.
    pub fn qualified_name(&self) -> Result<String, EntityError> {
        if !self.is_valid() {
            return Err(Self::invalid());
        }
        Ok(self.entity.read(|data| data.atom_label(self.id)))
    }
}

impl BondHandle {
    fn with<R>(&self, f: impl FnOnce(&Bond) -> R) -> Result<R, EntityError> {
        self.entity
            .read(|data| data.bond(self.id).map(f))
            .ok_or_else(Self::invalid)
    }

    pub fn is_valid(&self) -> bool {
        self.with(|_| ()).is_ok()
    }

    pub fn first(&self) -> Result<AtomHandle, EntityError> {
        let id = self.with(|b| b.first)?;
        Ok(AtomHandle::new(self.entity.clone(), id))
    }

    pub fn second(&self) -> Result<AtomHandle, EntityError> {
        let id = self.with(|b| b.second)?;
        Ok(AtomHandle::new(self.entity.clone(), id))
    }

    pub fn order(&self) -> Result<BondOrder, EntityError> {
        self.with(|b| b.order)
    }

    /// The atom at the other end of the bond from `atom`.
    pub fn partner(&self, atom: &AtomHandle) -> Result<Option<AtomHandle>, EntityError> {
        let partner = self.with(|b| b.partner(atom.id()))?;
        Ok(partner.map(|id| AtomHandle::new(self.entity.clone(), id)))
    }

    pub fn length(&self) -> Result<f64, EntityError> {
        let (first, second) = self.with(|b| (b.first, b.second))?;
        self.entity
            .read_xcs(|data| match (data.atom_position(first), data.atom_position(second)) {
                (Some(a), Some(b)) => Some(geometry::distance(&a, &b)),
                _ => None,
            })
            .ok_or_else(Self::invalid)
    }
}

impl TorsionHandle {
    pub fn is_valid(&self) -> bool {
        self.entity.read(|data| data.torsion(self.id).is_some())
    }

    pub fn name(&self) -> Result<String, EntityError> {
        self.entity
            .read(|data| data.torsion(self.id).map(|t| t.name.clone()))
            .ok_or_else(Self::invalid)
    }

    pub fn atoms(&self) -> Result<[AtomHandle; 4], EntityError> {
        let ids = self
            .entity
            .read(|data| data.torsion(self.id).map(|t| t.atoms))
            .ok_or_else(Self::invalid)?;
        Ok(ids.map(|id| AtomHandle::new(self.entity.clone(), id)))
    }

    /// The dihedral angle in radians, within (-pi, pi].
    ///
    /// Internal coordinates are rebuilt first if they are stale.
    pub fn angle(&self) -> Result<f64, EntityError> {
        self.entity
            .with_cell_mut(|cell| cell.coords.torsion_angle(&mut cell.data, self.id))
    }
}

impl PropertyOwner for ChainHandle {
    fn with_props<R>(&self, f: impl FnOnce(&GenericPropContainer) -> R) -> Result<R, EntityError> {
        self.with(|c, _| f(&c.props))
    }

    fn prop_target(&self) -> PropertyTarget {
        PropertyTarget::Chain(self.id)
    }

    fn owning_entity(&self) -> &EntityHandle {
        &self.entity
    }
}

impl PropertyOwner for ResidueHandle {
    fn with_props<R>(&self, f: impl FnOnce(&GenericPropContainer) -> R) -> Result<R, EntityError> {
        self.with(|r, _| f(&r.props))
    }

    fn prop_target(&self) -> PropertyTarget {
        PropertyTarget::Residue(self.id)
    }

    fn owning_entity(&self) -> &EntityHandle {
        &self.entity
    }
}

impl PropertyOwner for AtomHandle {
    fn with_props<R>(&self, f: impl FnOnce(&GenericPropContainer) -> R) -> Result<R, EntityError> {
        self.with(|a| f(&a.props))
    }

    fn prop_target(&self) -> PropertyTarget {
        PropertyTarget::Atom(self.id)
    }

    fn owning_entity(&self) -> &EntityHandle {
        &self.entity
    }
}

impl PropertyOwner for BondHandle {
    fn with_props<R>(&self, f: impl FnOnce(&GenericPropContainer) -> R) -> Result<R, EntityError> {
        self.with(|b| f(&b.props))
    }

    fn prop_target(&self) -> PropertyTarget {
        PropertyTarget::Bond(self.id)
    }

    fn owning_entity(&self) -> &EntityHandle {
        &self.entity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::props::PropertyError;
    use crate::engine::editor::EditMode;
    use nalgebra::Vector3;

    fn water() -> (EntityHandle, AtomHandle, AtomHandle, BondHandle) {
        let entity = EntityHandle::create("water");
        let mut ed = entity.edit_xcs(EditMode::Buffered).unwrap();
        let chain = ed.insert_chain("W").unwrap();
        let res = ed.append_residue(&chain, "HOH", None).unwrap();
        let o = ed.insert_atom(&res, "O", Point3::origin(), None).unwrap();
        let h = ed
            .insert_atom(&res, "H1", Point3::new(0.96, 0.0, 0.0), None)
            .unwrap();
        let bond = ed.connect(&o, &h, None).unwrap();
        drop(ed);
        (entity, o, h, bond)
    }

    #[test]
    fn node_accessors_read_live_data() {
        let (entity, o, h, bond) = water();
        assert_eq!(o.name().unwrap(), "O");
        assert_eq!(h.element().unwrap(), "H");
        assert_eq!(o.residue().unwrap().name().unwrap(), "HOH");
        assert_eq!(o.chain().unwrap().name().unwrap(), "W");
        assert_eq!(bond.partner(&o).unwrap(), Some(h.clone()));
        assert!((bond.length().unwrap() - 0.96).abs() < 1e-12);
        assert_eq!(o.bonded_atoms().unwrap(), vec![h.clone()]);
        assert!(o.is_bonded_to(&h).unwrap());
        assert_eq!(o.residue().unwrap().index().unwrap(), 0);
        assert_eq!(entity.residues()[0].qualified_name().unwrap(), "W.HOH1");
    }

    #[test]
    fn deleted_nodes_report_invalid_handles() {
        let (entity, o, h, bond) = water();
        {
            let mut ed = entity.edit_xcs(EditMode::Unbuffered).unwrap();
            ed.delete_atom(&h).unwrap();
        }
        assert!(!h.is_valid());
        assert_eq!(h.name().unwrap_err(), EntityError::InvalidHandle { kind: "atom" });
        assert_eq!(h.pos().unwrap_err(), EntityError::InvalidHandle { kind: "atom" });
        assert_eq!(bond.order().unwrap_err(), EntityError::InvalidHandle { kind: "bond" });
        assert!(o.is_valid());
        assert_eq!(o.bond_count().unwrap(), 0);
    }

    #[test]
    fn typed_property_reads_surface_property_errors() {
        let (entity, o, _, _) = water();
        {
            let mut ed = entity.edit_xcs(EditMode::Unbuffered).unwrap();
            ed.set_int_prop(&o, "index", 7).unwrap();
            ed.set_vec3_prop(&o, "dipole", Vector3::new(0.0, 1.0, 0.0)).unwrap();
        }
        assert_eq!(o.int_prop("index").unwrap(), 7);
        assert_eq!(o.float_prop("index").unwrap(), 7.0);
        assert_eq!(o.vec3_prop("dipole").unwrap(), Vector3::new(0.0, 1.0, 0.0));
        assert_eq!(o.prop_as_string("dipole").unwrap(), "0 1 0");
        assert_eq!(o.prop_keys().unwrap(), vec!["dipole", "index"]);
        assert_eq!(o.float_prop_or("missing", 2.5).unwrap(), 2.5);
        assert!(matches!(
            o.bool_prop("index"),
            Err(EntityError::Property {
                source: PropertyError::TypeMismatch { .. }
            })
        ));
        assert!(matches!(
            o.string_prop("missing"),
            Err(EntityError::Property {
                source: PropertyError::Missing { .. }
            })
        ));
    }
}
