use super::entity::{EntityCell, EntityHandle};
use super::error::EntityError;
use super::handle::{AtomHandle, BondHandle, ChainHandle, PropertyOwner, ResidueHandle, TorsionHandle};
use super::signals::{EntityEvent, GeometryChange, PropertyChange, PropertyTarget};
use super::coords;
use crate::core::compounds::elements;
use crate::core::models::atom::Atom;
use crate::core::models::chain::{Chain, ChainType};
use crate::core::models::entity::{EntityData, Removed};
use crate::core::models::ids::AtomId;
use crate::core::models::props::{GenericPropContainer, PropValue};
use crate::core::models::residue::{ChemClass, ResNum, Residue};
use crate::core::models::topology::{Bond, BondOrder};
use nalgebra::{Isometry3, Point3, Vector3};
use std::collections::HashSet;
use std::fmt;
use std::ops::{Deref, DerefMut};
use tracing::{debug, trace};

/// When an editor delivers notifications and resolves coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditMode {
    /// Every call notifies observers and resolves coordinates before returning.
    Unbuffered,
    /// Notifications are queued and coordinates resolved when the editor is dropped.
    Buffered,
}

impl fmt::Display for EditMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditMode::Unbuffered => write!(f, "unbuffered"),
            EditMode::Buffered => write!(f, "buffered"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditorKind {
    Xcs,
    Ics,
}

#[derive(Debug)]
enum Queued {
    Event(EntityEvent),
    Geometry,
    Properties,
}

/// Structural and attribute editing shared by both editor kinds.
///
/// An editor holds the entity's editor lock for its whole lifetime and
/// releases it on drop, after which queued notifications are delivered. The
/// lock is held even in unbuffered mode so that a buffered editor cannot be
/// opened while unbuffered edits are in flight.
pub struct EntityEditor {
    entity: EntityHandle,
    mode: EditMode,
    kind: EditorKind,
    queue: Vec<Queued>,
    geometry: Vec<AtomId>,
    geometry_seen: HashSet<AtomId>,
    geometry_queued: bool,
    properties: Vec<PropertyTarget>,
    properties_seen: HashSet<PropertyTarget>,
    properties_queued: bool,
}

impl fmt::Debug for EntityEditor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityEditor")
            .field("mode", &self.mode)
            .field("kind", &self.kind)
            .field("queued", &self.queue.len())
            .finish()
    }
}

fn target_kind(target: PropertyTarget) -> &'static str {
    match target {
        PropertyTarget::Entity => "entity",
        PropertyTarget::Chain(_) => "chain",
        PropertyTarget::Residue(_) => "residue",
        PropertyTarget::Atom(_) => "atom",
        PropertyTarget::Bond(_) => "bond",
    }
}

fn target_exists(data: &EntityData, target: PropertyTarget) -> bool {
    match target {
        PropertyTarget::Entity => true,
        PropertyTarget::Chain(id) => data.chain(id).is_some(),
        PropertyTarget::Residue(id) => data.residue(id).is_some(),
        PropertyTarget::Atom(id) => data.atom(id).is_some(),
        PropertyTarget::Bond(id) => data.bond(id).is_some(),
    }
}

impl EntityEditor {
    fn new(entity: EntityHandle, mode: EditMode, kind: EditorKind) -> Self {
        trace!(?mode, ?kind, "Editor opened.");
        Self {
            entity,
            mode,
            kind,
            queue: Vec::new(),
            geometry: Vec::new(),
            geometry_seen: HashSet::new(),
            geometry_queued: false,
            properties: Vec::new(),
            properties_seen: HashSet::new(),
            properties_queued: false,
        }
    }

    pub fn mode(&self) -> EditMode {
        self.mode
    }

    pub fn entity(&self) -> &EntityHandle {
        &self.entity
    }

    /// Delivers queued notifications now instead of at drop.
    pub fn flush(&mut self) {
        self.resolve();
        self.dispatch();
    }

    fn resolve(&self) {
        if self.kind == EditorKind::Ics {
            self.entity
                .with_cell_mut(|cell| cell.coords.ensure_xcs(&mut cell.data));
        }
    }

    fn dispatch(&mut self) {
        let events = self.take_events();
        if events.is_empty() {
            return;
        }
        debug!(mode = %self.mode, events = events.len(), "Delivering editor notifications.");
        let signals = self.entity.signals();
        for event in &events {
            signals.dispatch(event);
        }
    }

    fn take_events(&mut self) -> Vec<EntityEvent> {
        let mut geometry = std::mem::take(&mut self.geometry);
        let mut properties = std::mem::take(&mut self.properties);
        self.geometry_seen.clear();
        self.properties_seen.clear();
        self.geometry_queued = false;
        self.properties_queued = false;
        self.entity.read(|data| {
            geometry.retain(|&a| data.atom(a).is_some());
            properties.retain(|&t| target_exists(data, t));
        });

        let mut geometry = Some(geometry);
        let mut properties = Some(properties);
        std::mem::take(&mut self.queue)
            .into_iter()
            .filter_map(|queued| match queued {
                Queued::Event(event) => Some(event),
                Queued::Geometry => geometry
                    .take()
                    .filter(|atoms| !atoms.is_empty())
                    .map(|atoms| EntityEvent::GeometryChanged(GeometryChange { atoms })),
                Queued::Properties => properties
                    .take()
                    .filter(|targets| !targets.is_empty())
                    .map(|targets| EntityEvent::PropertiesChanged(PropertyChange { targets })),
            })
            .collect()
    }

    fn commit(&mut self) {
        if self.mode == EditMode::Unbuffered {
            self.flush();
        }
    }

    fn push(&mut self, event: EntityEvent) {
        self.queue.push(Queued::Event(event));
    }

    fn push_removed(&mut self, removed: Removed) {
        let Removed {
            torsions,
            bonds,
            atoms,
            residues,
            chains,
        } = removed;
        for id in torsions {
            self.push(EntityEvent::TorsionDeleted(id));
        }
        for id in bonds {
            self.push(EntityEvent::BondDeleted(id));
        }
        for id in atoms {
            self.push(EntityEvent::AtomDeleted(id));
        }
        for id in residues {
            self.push(EntityEvent::ResidueDeleted(id));
        }
        for id in chains {
            self.push(EntityEvent::ChainDeleted(id));
        }
    }

    pub(crate) fn touch_geometry(&mut self, atoms: impl IntoIterator<Item = AtomId>) {
        let mut touched = false;
        for atom in atoms {
            touched = true;
            if self.geometry_seen.insert(atom) {
                self.geometry.push(atom);
            }
        }
        if touched && !self.geometry_queued {
            self.geometry_queued = true;
            self.queue.push(Queued::Geometry);
        }
    }

    fn touch_property(&mut self, target: PropertyTarget) {
        if self.properties_seen.insert(target) {
            self.properties.push(target);
        }
        if !self.properties_queued {
            self.properties_queued = true;
            self.queue.push(Queued::Properties);
        }
    }

    fn check_owner(&self, entity: &EntityHandle) -> Result<(), EntityError> {
        if self.entity.same_entity(entity) {
            Ok(())
        } else {
            Err(EntityError::violation(
                "handle belongs to a different entity than the editor",
            ))
        }
    }

    /// Runs a topology change with internal coordinates marked stale beforehand.
    fn restructure<R>(
        &self,
        f: impl FnOnce(&mut EntityData) -> Result<R, EntityError>,
    ) -> Result<R, EntityError> {
        self.entity.with_cell_mut(|cell: &mut EntityCell| {
            cell.coords.mark_ics_dirty(&mut cell.data);
            f(&mut cell.data)
        })
    }

    pub fn insert_chain(&mut self, name: &str) -> Result<ChainHandle, EntityError> {
        let id = self.restructure(|data| Ok(data.add_chain(name)?))?;
        self.push(EntityEvent::ChainAdded(id));
        self.commit();
        Ok(ChainHandle::new(self.entity.clone(), id))
    }

    /// Appends a residue to a chain.
    ///
    /// # Arguments
    ///
    /// * `chain` - The owning chain.
    /// * `key` - The compound key, e.g. `ALA`.
    /// * `number` - The residue number; `None` continues the chain's numbering.
    pub fn append_residue(
        &mut self,
        chain: &ChainHandle,
        key: &str,
        number: Option<ResNum>,
    ) -> Result<ResidueHandle, EntityError> {
        self.check_owner(chain.entity())?;
        let id = self.restructure(|data| {
            let id = data.append_residue(chain.id(), key, number)?;
            if let Some(residue) = data.residue_mut(id) {
                residue.one_letter_code = elements::one_letter_code(key);
            }
            Ok(id)
        })?;
        self.push(EntityEvent::ResidueAdded(id));
        self.commit();
        Ok(ResidueHandle::new(self.entity.clone(), id))
    }

    /// Inserts an atom at the end of a residue.
    ///
    /// When `element` is `None` it is guessed from the atom name.
    pub fn insert_atom(
        &mut self,
        residue: &ResidueHandle,
        name: &str,
        pos: Point3<f64>,
        element: Option<&str>,
    ) -> Result<AtomHandle, EntityError> {
        self.check_owner(residue.entity())?;
        let element = element
            .map(str::to_string)
            .unwrap_or_else(|| elements::guess_element(name));
        let id = self.restructure(|data| Ok(data.add_atom(residue.id(), name, &element, pos)?))?;
        self.push(EntityEvent::AtomAdded(id));
        self.commit();
        Ok(AtomHandle::new(self.entity.clone(), id))
    }

    /// Bonds two atoms of this entity.
    ///
    /// Connecting already bonded atoms returns the existing bond unchanged.
    /// Geometry is not validated: zero-length bonds are accepted.
    pub fn connect(
        &mut self,
        first: &AtomHandle,
        second: &AtomHandle,
        order: Option<BondOrder>,
    ) -> Result<BondHandle, EntityError> {
        self.check_owner(first.entity())?;
        self.check_owner(second.entity())?;
        let (a, b) = (first.id(), second.id());
        if let Some(existing) = self.entity.read(|data| data.bond_between(a, b)) {
            return Ok(BondHandle::new(self.entity.clone(), existing));
        }
        let (id, created) =
            self.restructure(|data| Ok(data.add_bond(a, b, order.unwrap_or_default())?))?;
        if created {
            self.push(EntityEvent::BondAdded(id));
        }
        self.commit();
        Ok(BondHandle::new(self.entity.clone(), id))
    }

    /// Registers a named torsion over four consecutively bonded atoms.
    pub fn add_torsion(
        &mut self,
        name: &str,
        a1: &AtomHandle,
        a2: &AtomHandle,
        a3: &AtomHandle,
        a4: &AtomHandle,
    ) -> Result<TorsionHandle, EntityError> {
        for atom in [a1, a2, a3, a4] {
            self.check_owner(atom.entity())?;
        }
        let atoms = [a1.id(), a2.id(), a3.id(), a4.id()];
        let id = self.restructure(|data| {
            if atoms.iter().any(|&a| data.atom(a).is_none()) {
                return Err(EntityError::InvalidHandle { kind: "atom" });
            }
            coords::check_connected(data, &atoms)?;
            Ok(data.add_torsion(name, atoms)?)
        })?;
        self.push(EntityEvent::TorsionAdded(id));
        self.commit();
        Ok(TorsionHandle::new(self.entity.clone(), id))
    }

    /// Deletes an atom with every bond and torsion that refers to it.
    pub fn delete_atom(&mut self, atom: &AtomHandle) -> Result<(), EntityError> {
        self.check_owner(atom.entity())?;
        let removed = self.restructure(|data| {
            data.remove_atom(atom.id())
                .ok_or(EntityError::InvalidHandle { kind: "atom" })
        })?;
        self.push_removed(removed);
        self.commit();
        Ok(())
    }

    pub fn delete_bond(&mut self, bond: &BondHandle) -> Result<(), EntityError> {
        self.check_owner(bond.entity())?;
        let removed = self.restructure(|data| {
            data.remove_bond(bond.id())
                .ok_or(EntityError::InvalidHandle { kind: "bond" })
        })?;
        self.push_removed(removed);
        self.commit();
        Ok(())
    }

    pub fn delete_residue(&mut self, residue: &ResidueHandle) -> Result<(), EntityError> {
        self.check_owner(residue.entity())?;
        let removed = self.restructure(|data| {
            data.remove_residue(residue.id())
                .ok_or(EntityError::InvalidHandle { kind: "residue" })
        })?;
        self.push_removed(removed);
        self.commit();
        Ok(())
    }

    pub fn delete_chain(&mut self, chain: &ChainHandle) -> Result<(), EntityError> {
        self.check_owner(chain.entity())?;
        let removed = self.restructure(|data| {
            data.remove_chain(chain.id())
                .ok_or(EntityError::InvalidHandle { kind: "chain" })
        })?;
        self.push_removed(removed);
        self.commit();
        Ok(())
    }

    fn modify<R>(
        &mut self,
        target: PropertyTarget,
        f: impl FnOnce(&mut EntityData) -> Result<R, EntityError>,
    ) -> Result<R, EntityError> {
        let result = self.entity.with_cell_mut(|cell| f(&mut cell.data))?;
        self.touch_property(target);
        self.commit();
        Ok(result)
    }

    fn modify_chain(&mut self, chain: &ChainHandle, f: impl FnOnce(&mut Chain)) -> Result<(), EntityError> {
        self.check_owner(chain.entity())?;
        let id = chain.id();
        self.modify(PropertyTarget::Chain(id), |data| {
            data.chain_mut(id)
                .map(f)
                .ok_or(EntityError::InvalidHandle { kind: "chain" })
        })
    }

    fn modify_residue(&mut self, residue: &ResidueHandle, f: impl FnOnce(&mut Residue)) -> Result<(), EntityError> {
        self.check_owner(residue.entity())?;
        let id = residue.id();
        self.modify(PropertyTarget::Residue(id), |data| {
            data.residue_mut(id)
                .map(f)
                .ok_or(EntityError::InvalidHandle { kind: "residue" })
        })
    }

    fn modify_atom(&mut self, atom: &AtomHandle, f: impl FnOnce(&mut Atom)) -> Result<(), EntityError> {
        self.check_owner(atom.entity())?;
        let id = atom.id();
        self.modify(PropertyTarget::Atom(id), |data| {
            data.atom_mut(id)
                .map(f)
                .ok_or(EntityError::InvalidHandle { kind: "atom" })
        })
    }

    fn modify_bond(&mut self, bond: &BondHandle, f: impl FnOnce(&mut Bond)) -> Result<(), EntityError> {
        self.check_owner(bond.entity())?;
        let id = bond.id();
        self.modify(PropertyTarget::Bond(id), |data| {
            data.bond_mut(id)
                .map(f)
                .ok_or(EntityError::InvalidHandle { kind: "bond" })
        })
    }

    pub fn set_entity_name(&mut self, name: &str) -> Result<(), EntityError> {
        self.modify(PropertyTarget::Entity, |data| {
            data.name = name.to_string();
            Ok(())
        })
    }

    pub fn rename_chain(&mut self, chain: &ChainHandle, name: &str) -> Result<(), EntityError> {
        self.check_owner(chain.entity())?;
        let id = chain.id();
        self.modify(PropertyTarget::Chain(id), |data| Ok(data.rename_chain(id, name)?))
    }

    pub fn set_chain_type(&mut self, chain: &ChainHandle, chain_type: ChainType) -> Result<(), EntityError> {
        self.modify_chain(chain, |c| c.chain_type = chain_type)
    }

    /// Changes the compound key of a residue.
    pub fn rename_residue(&mut self, residue: &ResidueHandle, key: &str) -> Result<(), EntityError> {
        self.modify_residue(residue, |r| r.key = key.to_string())
    }

    pub fn set_residue_number(&mut self, residue: &ResidueHandle, number: ResNum) -> Result<(), EntityError> {
        self.check_owner(residue.entity())?;
        let id = residue.id();
        self.modify(PropertyTarget::Residue(id), |data| Ok(data.renumber_residue(id, number)?))
    }

    pub fn set_chem_class(&mut self, residue: &ResidueHandle, chem_class: ChemClass) -> Result<(), EntityError> {
        self.modify_residue(residue, |r| r.chem_class = chem_class)
    }

    pub fn set_one_letter_code(&mut self, residue: &ResidueHandle, olc: char) -> Result<(), EntityError> {
        self.modify_residue(residue, |r| r.one_letter_code = olc)
    }

    pub fn set_ligand(&mut self, residue: &ResidueHandle, is_ligand: bool) -> Result<(), EntityError> {
        self.modify_residue(residue, |r| r.is_ligand = is_ligand)
    }

    pub fn rename_atom(&mut self, atom: &AtomHandle, name: &str) -> Result<(), EntityError> {
        self.check_owner(atom.entity())?;
        let id = atom.id();
        self.modify(PropertyTarget::Atom(id), |data| Ok(data.rename_atom(id, name)?))
    }

    pub fn set_atom_element(&mut self, atom: &AtomHandle, element: &str) -> Result<(), EntityError> {
        self.modify_atom(atom, |a| a.element = element.to_string())
    }

    pub fn set_occupancy(&mut self, atom: &AtomHandle, occupancy: f64) -> Result<(), EntityError> {
        self.modify_atom(atom, |a| a.occupancy = occupancy)
    }

    pub fn set_b_factor(&mut self, atom: &AtomHandle, b_factor: f64) -> Result<(), EntityError> {
        self.modify_atom(atom, |a| a.b_factor = b_factor)
    }

    pub fn set_charge(&mut self, atom: &AtomHandle, charge: f64) -> Result<(), EntityError> {
        self.modify_atom(atom, |a| a.charge = charge)
    }

    pub fn set_hetatm(&mut self, atom: &AtomHandle, is_hetatm: bool) -> Result<(), EntityError> {
        self.modify_atom(atom, |a| a.is_hetatm = is_hetatm)
    }

    pub fn set_bond_order(&mut self, bond: &BondHandle, order: BondOrder) -> Result<(), EntityError> {
        self.modify_bond(bond, |b| b.order = order)
    }

    fn with_props_mut<O: PropertyOwner, R>(
        &mut self,
        owner: &O,
        f: impl FnOnce(&mut GenericPropContainer) -> R,
    ) -> Result<R, EntityError> {
        self.check_owner(owner.owning_entity())?;
        let target = owner.prop_target();
        self.modify(target, |data| {
            let props = match target {
                PropertyTarget::Entity => Some(&mut data.props),
                PropertyTarget::Chain(id) => data.chain_mut(id).map(|c| &mut c.props),
                PropertyTarget::Residue(id) => data.residue_mut(id).map(|r| &mut r.props),
                PropertyTarget::Atom(id) => data.atom_mut(id).map(|a| &mut a.props),
                PropertyTarget::Bond(id) => data.bond_mut(id).map(|b| &mut b.props),
            };
            props.map(f).ok_or(EntityError::InvalidHandle {
                kind: target_kind(target),
            })
        })
    }

    /// Sets a generic property, replacing any previous value of any kind.
    pub fn set_prop<O: PropertyOwner>(
        &mut self,
        owner: &O,
        key: &str,
        value: impl Into<PropValue>,
    ) -> Result<(), EntityError> {
        let value = value.into();
        self.with_props_mut(owner, |props| {
            props.set(key, value);
        })
    }

    pub fn set_string_prop<O: PropertyOwner>(&mut self, owner: &O, key: &str, value: &str) -> Result<(), EntityError> {
        self.set_prop(owner, key, value)
    }

    pub fn set_float_prop<O: PropertyOwner>(&mut self, owner: &O, key: &str, value: f64) -> Result<(), EntityError> {
        self.set_prop(owner, key, value)
    }

    pub fn set_int_prop<O: PropertyOwner>(&mut self, owner: &O, key: &str, value: i32) -> Result<(), EntityError> {
        self.set_prop(owner, key, value)
    }

    pub fn set_bool_prop<O: PropertyOwner>(&mut self, owner: &O, key: &str, value: bool) -> Result<(), EntityError> {
        self.set_prop(owner, key, value)
    }

    pub fn set_vec3_prop<O: PropertyOwner>(
        &mut self,
        owner: &O,
        key: &str,
        value: Vector3<f64>,
    ) -> Result<(), EntityError> {
        self.set_prop(owner, key, value)
    }

    pub fn remove_prop<O: PropertyOwner>(&mut self, owner: &O, key: &str) -> Result<Option<PropValue>, EntityError> {
        self.with_props_mut(owner, |props| props.remove(key))
    }

    /// Removes every generic property of a node; the node itself is untouched.
    pub fn clear_props<O: PropertyOwner>(&mut self, owner: &O) -> Result<(), EntityError> {
        self.with_props_mut(owner, GenericPropContainer::clear)
    }
}

impl Drop for EntityEditor {
    fn drop(&mut self) {
        self.resolve();
        self.entity.release_editor(self.mode);
        self.dispatch();
        trace!(mode = ?self.mode, kind = ?self.kind, "Editor closed.");
    }
}

/// Editor for Cartesian coordinates.
///
/// Position changes leave internal coordinates stale; they are rebuilt lazily
/// on the next read that needs them.
#[must_use = "dropping an editor closes it immediately"]
#[derive(Debug)]
pub struct XcsEditor {
    inner: EntityEditor,
}

impl XcsEditor {
    pub(crate) fn open(entity: EntityHandle, mode: EditMode) -> Result<Self, EntityError> {
        entity.acquire_editor(mode)?;
        Ok(Self {
            inner: EntityEditor::new(entity, mode, EditorKind::Xcs),
        })
    }

    pub fn set_atom_pos(&mut self, atom: &AtomHandle, pos: Point3<f64>) -> Result<(), EntityError> {
        self.set_atom_positions(&[(atom.clone(), pos)])
    }

    /// Moves several atoms at once; either all positions are applied or none.
    pub fn set_atom_positions(&mut self, updates: &[(AtomHandle, Point3<f64>)]) -> Result<(), EntityError> {
        for (atom, _) in updates {
            self.inner.check_owner(atom.entity())?;
        }
        self.inner.entity.with_cell_mut(|cell| {
            if updates.iter().any(|(atom, _)| cell.data.atom(atom.id()).is_none()) {
                return Err(EntityError::InvalidHandle { kind: "atom" });
            }
            cell.coords.mark_ics_dirty(&mut cell.data);
            for (atom, pos) in updates {
                if let Some(a) = cell.data.atom_mut(atom.id()) {
                    a.position = *pos;
                }
            }
            Ok(())
        })?;
        self.inner.touch_geometry(updates.iter().map(|(atom, _)| atom.id()));
        self.inner.commit();
        Ok(())
    }

    /// Applies a rigid transformation to every atom of the entity.
    pub fn apply_transform(&mut self, transform: &Isometry3<f64>) -> Result<(), EntityError> {
        let atoms = self.inner.entity.atoms();
        self.apply_transform_to(&atoms, transform)
    }

    pub fn apply_transform_to(&mut self, atoms: &[AtomHandle], transform: &Isometry3<f64>) -> Result<(), EntityError> {
        for atom in atoms {
            self.inner.check_owner(atom.entity())?;
        }
        self.inner.entity.with_cell_mut(|cell| {
            if atoms.iter().any(|atom| cell.data.atom(atom.id()).is_none()) {
                return Err(EntityError::InvalidHandle { kind: "atom" });
            }
            cell.coords.mark_ics_dirty(&mut cell.data);
            for atom in atoms {
                if let Some(a) = cell.data.atom_mut(atom.id()) {
                    a.position = transform * a.position;
                }
            }
            Ok(())
        })?;
        self.inner.touch_geometry(atoms.iter().map(AtomHandle::id));
        self.inner.commit();
        Ok(())
    }
}

impl Deref for XcsEditor {
    type Target = EntityEditor;

    fn deref(&self) -> &EntityEditor {
        &self.inner
    }
}

impl DerefMut for XcsEditor {
    fn deref_mut(&mut self) -> &mut EntityEditor {
        &mut self.inner
    }
}

/// Editor for internal coordinates.
///
/// Changes leave Cartesian positions stale until the editor flushes: after
/// every call in unbuffered mode, on drop in buffered mode.
#[must_use = "dropping an editor closes it immediately"]
#[derive(Debug)]
pub struct IcsEditor {
    inner: EntityEditor,
}

impl IcsEditor {
    pub(crate) fn open(entity: EntityHandle, mode: EditMode) -> Result<Self, EntityError> {
        entity.acquire_editor(mode)?;
        Ok(Self {
            inner: EntityEditor::new(entity, mode, EditorKind::Ics),
        })
    }

    fn internal_edit(
        &mut self,
        f: impl FnOnce(&mut EntityCell) -> Result<Vec<AtomId>, EntityError>,
    ) -> Result<(), EntityError> {
        let moved = self.inner.entity.with_cell_mut(f)?;
        self.inner.touch_geometry(moved);
        self.inner.commit();
        Ok(())
    }

    /// Sets the dihedral angle of a torsion, in radians.
    pub fn set_torsion_angle(&mut self, torsion: &TorsionHandle, angle: f64) -> Result<(), EntityError> {
        self.inner.check_owner(torsion.entity())?;
        let id = torsion.id();
        self.internal_edit(|cell| cell.coords.set_torsion_angle(&mut cell.data, id, angle))
    }

    /// Adds `delta` radians to the dihedral angle of a torsion.
    pub fn rotate_torsion_angle(&mut self, torsion: &TorsionHandle, delta: f64) -> Result<(), EntityError> {
        self.inner.check_owner(torsion.entity())?;
        let id = torsion.id();
        self.internal_edit(|cell| cell.coords.rotate_torsion(&mut cell.data, id, delta))
    }

    pub fn set_bond_length(&mut self, a: &AtomHandle, b: &AtomHandle, length: f64) -> Result<(), EntityError> {
        self.inner.check_owner(a.entity())?;
        self.inner.check_owner(b.entity())?;
        let (a, b) = (a.id(), b.id());
        self.internal_edit(|cell| cell.coords.set_bond_length(&mut cell.data, a, b, length))
    }

    /// Sets the angle `a-b-c` at `b`, in radians.
    pub fn set_bond_angle(
        &mut self,
        a: &AtomHandle,
        b: &AtomHandle,
        c: &AtomHandle,
        angle: f64,
    ) -> Result<(), EntityError> {
        for atom in [a, b, c] {
            self.inner.check_owner(atom.entity())?;
        }
        let (a, b, c) = (a.id(), b.id(), c.id());
        self.internal_edit(|cell| cell.coords.set_bond_angle(&mut cell.data, a, b, c, angle))
    }
}

impl Deref for IcsEditor {
    type Target = EntityEditor;

    fn deref(&self) -> &EntityEditor {
        &self.inner
    }
}

impl DerefMut for IcsEditor {
    fn deref_mut(&mut self) -> &mut EntityEditor {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::coords::CoordState;
    use crate::engine::signals::EntityEvent;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn record_all(entity: &EntityHandle) -> Rc<RefCell<Vec<String>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let s = entity.signals();
        let l = Rc::clone(&log);
        s.on_chain_added.attach(move |_| l.borrow_mut().push("chain+".to_string()));
        let l = Rc::clone(&log);
        s.on_residue_added.attach(move |_| l.borrow_mut().push("residue+".to_string()));
        let l = Rc::clone(&log);
        s.on_atom_added.attach(move |_| l.borrow_mut().push("atom+".to_string()));
        let l = Rc::clone(&log);
        s.on_bond_added.attach(move |_| l.borrow_mut().push("bond+".to_string()));
        let l = Rc::clone(&log);
        s.on_torsion_deleted.attach(move |_| l.borrow_mut().push("torsion-".to_string()));
        let l = Rc::clone(&log);
        s.on_bond_deleted.attach(move |_| l.borrow_mut().push("bond-".to_string()));
        let l = Rc::clone(&log);
        s.on_atom_deleted.attach(move |_| l.borrow_mut().push("atom-".to_string()));
        let l = Rc::clone(&log);
        s.on_geometry_changed
            .attach(move |c: &GeometryChange| l.borrow_mut().push(format!("geometry({})", c.atoms.len())));
        let l = Rc::clone(&log);
        s.on_properties_changed
            .attach(move |c: &PropertyChange| l.borrow_mut().push(format!("props({})", c.targets.len())));
        log
    }

    struct Chain4 {
        entity: EntityHandle,
        atoms: Vec<AtomHandle>,
        torsion: TorsionHandle,
    }

    fn chain4() -> Chain4 {
        let entity = EntityHandle::create("chain4");
        let mut ed = entity.edit_xcs(EditMode::Buffered).unwrap();
        let chain = ed.insert_chain("A").unwrap();
        let res = ed.append_residue(&chain, "UNK", None).unwrap();
        let positions = [
            Point3::new(0.0, 1.2, 0.3),
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.5, 0.0, 0.0),
            Point3::new(1.9, 1.1, -0.8),
        ];
        let atoms: Vec<AtomHandle> = ["A", "B", "C", "D"]
            .iter()
            .zip(positions)
            .map(|(name, pos)| ed.insert_atom(&res, name, pos, Some("C")).unwrap())
            .collect();
        for pair in atoms.windows(2) {
            ed.connect(&pair[0], &pair[1], None).unwrap();
        }
        let torsion = ed
            .add_torsion("t", &atoms[0], &atoms[1], &atoms[2], &atoms[3])
            .unwrap();
        drop(ed);
        Chain4 {
            entity,
            atoms,
            torsion,
        }
    }

    mod notifications {
        use super::*;

        #[test]
        fn unbuffered_editor_notifies_after_every_call() {
            let entity = EntityHandle::create("e");
            let log = record_all(&entity);
            let mut ed = entity.edit_xcs(EditMode::Unbuffered).unwrap();
            let chain = ed.insert_chain("A").unwrap();
            assert_eq!(*log.borrow(), vec!["chain+"]);
            let res = ed.append_residue(&chain, "GLY", None).unwrap();
            let atom = ed.insert_atom(&res, "CA", Point3::origin(), None).unwrap();
            ed.set_atom_pos(&atom, Point3::new(1.0, 0.0, 0.0)).unwrap();
            ed.set_atom_pos(&atom, Point3::new(2.0, 0.0, 0.0)).unwrap();
            assert_eq!(
                *log.borrow(),
                vec!["chain+", "residue+", "atom+", "geometry(1)", "geometry(1)"]
            );
        }

        #[test]
        fn buffered_editor_coalesces_geometry_at_first_mutation() {
            let entity = EntityHandle::create("e");
            let log = record_all(&entity);
            {
                let mut ed = entity.edit_xcs(EditMode::Buffered).unwrap();
                let chain = ed.insert_chain("A").unwrap();
                let res = ed.append_residue(&chain, "GLY", None).unwrap();
                let a = ed.insert_atom(&res, "N", Point3::origin(), None).unwrap();
                ed.set_atom_pos(&a, Point3::new(0.5, 0.0, 0.0)).unwrap();
                let b = ed.insert_atom(&res, "CA", Point3::origin(), None).unwrap();
                ed.set_atom_pos(&b, Point3::new(1.5, 0.0, 0.0)).unwrap();
                ed.set_atom_pos(&a, Point3::new(0.0, 0.0, 0.0)).unwrap();
                ed.set_b_factor(&a, 12.0).unwrap();
                ed.set_b_factor(&b, 14.0).unwrap();
                assert!(log.borrow().is_empty());
            }
            assert_eq!(
                *log.borrow(),
                vec![
                    "chain+",
                    "residue+",
                    "atom+",
                    "geometry(2)",
                    "atom+",
                    "props(2)"
                ]
            );
        }

        #[test]
        fn deletions_are_delivered_in_dependency_order() {
            let Chain4 { entity, atoms, .. } = chain4();
            let log = record_all(&entity);
            {
                let mut ed = entity.edit_xcs(EditMode::Buffered).unwrap();
                ed.delete_atom(&atoms[1]).unwrap();
            }
            assert_eq!(*log.borrow(), vec!["torsion-", "bond-", "bond-", "atom-"]);
        }

        #[test]
        fn observers_may_read_the_entity_during_delivery() {
            let Chain4 { entity, atoms, .. } = chain4();
            let seen = Rc::new(RefCell::new(None));
            let reader = entity.clone();
            let sink = Rc::clone(&seen);
            entity.signals().on_geometry_changed.attach(move |change: &GeometryChange| {
                let atom = AtomHandle::new(reader.clone(), change.atoms[0]);
                *sink.borrow_mut() = Some(atom.pos().unwrap());
            });
            let mut ed = entity.edit_xcs(EditMode::Unbuffered).unwrap();
            ed.set_atom_pos(&atoms[0], Point3::new(9.0, 9.0, 9.0)).unwrap();
            assert_eq!(*seen.borrow(), Some(Point3::new(9.0, 9.0, 9.0)));
        }

        #[test]
        fn explicit_flush_delivers_without_closing() {
            let entity = EntityHandle::create("e");
            let log = record_all(&entity);
            let mut ed = entity.edit_xcs(EditMode::Buffered).unwrap();
            ed.insert_chain("A").unwrap();
            ed.flush();
            assert_eq!(*log.borrow(), vec!["chain+"]);
            drop(ed);
            assert_eq!(log.borrow().len(), 1);
        }

        #[test]
        fn take_events_drops_geometry_of_deleted_atoms() {
            let Chain4 { entity, atoms, .. } = chain4();
            let mut ed = entity.edit_xcs(EditMode::Buffered).unwrap();
            ed.set_atom_pos(&atoms[3], Point3::origin()).unwrap();
            ed.delete_atom(&atoms[3]).unwrap();
            let events = ed.inner.take_events();
            assert!(
                !events
                    .iter()
                    .any(|e| matches!(e, EntityEvent::GeometryChanged(_)))
            );
        }
    }

    mod structure {
        use super::*;

        #[test]
        fn cross_entity_handles_are_rejected() {
            let Chain4 { atoms, .. } = chain4();
            let other = EntityHandle::create("other");
            let mut ed = other.edit_xcs(EditMode::Unbuffered).unwrap();
            let chain = ed.insert_chain("A").unwrap();
            let res = ed.append_residue(&chain, "GLY", None).unwrap();
            let local = ed.insert_atom(&res, "CA", Point3::origin(), None).unwrap();
            assert!(matches!(
                ed.connect(&local, &atoms[0], None),
                Err(EntityError::Integrity(_))
            ));
            assert!(matches!(
                ed.set_atom_pos(&atoms[0], Point3::origin()),
                Err(EntityError::Integrity(_))
            ));
        }

        #[test]
        fn duplicate_connect_returns_existing_bond() {
            let Chain4 { entity, atoms, .. } = chain4();
            let mut ed = entity.edit_xcs(EditMode::Unbuffered).unwrap();
            let first = ed.connect(&atoms[0], &atoms[1], None).unwrap();
            let again = ed.connect(&atoms[1], &atoms[0], Some(BondOrder::Double)).unwrap();
            assert_eq!(first, again);
            assert_eq!(again.order().unwrap(), BondOrder::Single);
            assert_eq!(entity.bond_count(), 3);
        }

        #[test]
        fn torsion_over_unbonded_atoms_is_rejected() {
            let Chain4 { entity, atoms, .. } = chain4();
            let mut ed = entity.edit_xcs(EditMode::Unbuffered).unwrap();
            let err = ed
                .add_torsion("bad", &atoms[0], &atoms[2], &atoms[1], &atoms[3])
                .unwrap_err();
            assert_eq!(
                err,
                EntityError::NotConnected {
                    first: atoms[0].id(),
                    second: atoms[2].id()
                }
            );
        }

        #[test]
        fn renames_and_attributes_are_applied() {
            let Chain4 { entity, atoms, .. } = chain4();
            let mut ed = entity.edit_xcs(EditMode::Unbuffered).unwrap();
            let chain = entity.find_chain("A").unwrap();
            let residue = atoms[0].residue().unwrap();
            ed.rename_chain(&chain, "Z").unwrap();
            ed.rename_residue(&residue, "LIG").unwrap();
            ed.set_residue_number(&residue, ResNum::with_ins_code(5, 'B')).unwrap();
            ed.set_ligand(&residue, true).unwrap();
            ed.rename_atom(&atoms[0], "A1").unwrap();
            ed.set_hetatm(&atoms[0], true).unwrap();
            ed.set_entity_name("renamed").unwrap();
            drop(ed);

            assert_eq!(entity.name(), "renamed");
            let found = entity
                .find_atom("Z", ResNum::with_ins_code(5, 'B'), "A1")
                .unwrap();
            assert_eq!(found, atoms[0]);
            assert!(found.is_hetatm().unwrap());
            assert_eq!(residue.qualified_name().unwrap(), "Z.LIG5B");
            assert!(residue.is_ligand().unwrap());
        }

        #[test]
        fn clearing_properties_keeps_the_node() {
            let Chain4 { entity, atoms, .. } = chain4();
            let mut ed = entity.edit_xcs(EditMode::Unbuffered).unwrap();
            ed.set_string_prop(&atoms[0], "tag", "x").unwrap();
            ed.set_bool_prop(&atoms[0], "flag", true).unwrap();
            assert_eq!(ed.remove_prop(&atoms[0], "tag").unwrap(), Some(PropValue::from("x")));
            ed.clear_props(&atoms[0]).unwrap();
            drop(ed);
            assert!(!atoms[0].has_prop("flag").unwrap());
            assert!(atoms[0].is_valid());
        }
    }

    mod coordinates {
        use super::*;

        #[test]
        fn xcs_edits_leave_ics_dirty_and_ics_edits_resolve_on_flush() {
            let Chain4 {
                entity,
                atoms,
                torsion,
            } = chain4();
            assert_eq!(entity.coord_state(), CoordState::IcsDirty);

            {
                let mut ed = entity.edit_ics(EditMode::Buffered).unwrap();
                ed.set_torsion_angle(&torsion, 1.0).unwrap();
                assert_eq!(entity.coord_state(), CoordState::XcsDirty);
            }
            assert_eq!(entity.coord_state(), CoordState::Clean);
            assert!((torsion.angle().unwrap() - 1.0).abs() < 1e-9);

            {
                let mut ed = entity.edit_xcs(EditMode::Unbuffered).unwrap();
                ed.set_atom_pos(&atoms[3], Point3::new(1.9, -1.1, -0.8)).unwrap();
            }
            assert_eq!(entity.coord_state(), CoordState::IcsDirty);
        }

        #[test]
        fn unbuffered_ics_editor_resolves_after_each_call() {
            let Chain4 {
                entity,
                atoms,
                torsion,
            } = chain4();
            let mut ed = entity.edit_ics(EditMode::Unbuffered).unwrap();
            ed.rotate_torsion_angle(&torsion, 0.25).unwrap();
            assert_eq!(entity.coord_state(), CoordState::Clean);
            ed.set_bond_length(&atoms[2], &atoms[3], 2.0).unwrap();
            assert_eq!(entity.coord_state(), CoordState::Clean);
            drop(ed);
            let d = (atoms[3].pos().unwrap() - atoms[2].pos().unwrap()).norm();
            assert!((d - 2.0).abs() < 1e-9);
        }

        #[test]
        fn apply_transform_moves_every_atom() {
            let Chain4 { entity, atoms, .. } = chain4();
            let before: Vec<Point3<f64>> = atoms.iter().map(|a| a.pos().unwrap()).collect();
            let shift = Isometry3::translation(1.0, -2.0, 3.0);
            {
                let mut ed = entity.edit_xcs(EditMode::Buffered).unwrap();
                ed.apply_transform(&shift).unwrap();
            }
            for (atom, old) in atoms.iter().zip(before) {
                assert!((atom.pos().unwrap() - (old + Vector3::new(1.0, -2.0, 3.0))).norm() < 1e-12);
            }
        }
    }
}
