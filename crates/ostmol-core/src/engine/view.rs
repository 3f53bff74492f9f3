use super::coords;
use super::entity::EntityHandle;
use super::error::EntityError;
use super::handle::{AtomHandle, BondHandle, ChainHandle, ResidueHandle};
use super::visitor::{self, EntityVisitor, Tree};
use crate::core::models::entity::EntityData;
use crate::core::models::ids::{AtomId, BondId, ChainId, ResidueId, TorsionId};
use crate::core::models::residue::ResNum;
use crate::core::utils::geometry;
use crate::query::select::{self, Selection};
use crate::query::{Query, QueryFlags};
use bitflags::bitflags;
use nalgebra::Point3;
use slotmap::SecondaryMap;
use std::collections::HashSet;
use std::fmt;
use std::ops::Deref;
use tracing::debug;

bitflags! {
    /// Which children come along when a chain or residue is added to a view.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ViewAddFlags: u32 {
        const INCLUDE_RESIDUES = 0x01;
        const INCLUDE_ATOMS = 0x02;
        const INCLUDE_ALL = Self::INCLUDE_RESIDUES.bits() | Self::INCLUDE_ATOMS.bits();
    }
}

/// A frozen subset of an entity.
///
/// A view records which chains, residues, atoms and bonds it contains and
/// never mutates the entity. Membership is fixed when the view is built and
/// only changes through the view's own `add_*`/`remove_*` methods, while all
/// attribute reads go through live handles: moving an atom with an editor is
/// visible through every view that contains it. Nodes deleted from the entity
/// silently drop out of listings and counts.
///
/// Listings are always in entity order, regardless of how the view was built.
#[derive(Clone)]
pub struct EntityView {
    entity: EntityHandle,
    chains: HashSet<ChainId>,
    residues: HashSet<ResidueId>,
    atoms: HashSet<AtomId>,
    bonds: HashSet<BondId>,
}

impl fmt::Debug for EntityView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityView")
            .field("entity", &self.entity)
            .field("chains", &self.chains.len())
            .field("residues", &self.residues.len())
            .field("atoms", &self.atoms.len())
            .field("bonds", &self.bonds.len())
            .finish()
    }
}

impl EntityView {
    pub(crate) fn empty(entity: EntityHandle) -> Self {
        Self {
            entity,
            chains: HashSet::new(),
            residues: HashSet::new(),
            atoms: HashSet::new(),
            bonds: HashSet::new(),
        }
    }

    pub(crate) fn full(entity: EntityHandle) -> Self {
        let (chains, residues, atoms, bonds) = entity.read(|data| {
            (
                data.chain_ids().iter().copied().collect(),
                data.residue_ids().into_iter().collect(),
                data.atom_ids().into_iter().collect(),
                data.bond_ids().iter().copied().collect(),
            )
        });
        Self {
            entity,
            chains,
            residues,
            atoms,
            bonds,
        }
    }

    fn from_selection(entity: EntityHandle, selection: Selection) -> Self {
        let mut view = Self::empty(entity);
        for (chain, residues) in selection.tree {
            view.chains.insert(chain);
            for (residue, atoms) in residues {
                view.residues.insert(residue);
                view.atoms.extend(atoms);
            }
        }
        view.bonds.extend(selection.bonds);
        view
    }

    pub fn entity(&self) -> &EntityHandle {
        &self.entity
    }

    /// Membership in entity order, restricted to live nodes.
    pub(crate) fn tree(&self, data: &EntityData) -> Tree {
        data.chain_ids()
            .iter()
            .copied()
            .filter(|c| self.chains.contains(c))
            .filter_map(|c| {
                let residues = data
                    .chain(c)?
                    .residues()
                    .iter()
                    .copied()
                    .filter(|r| self.residues.contains(r))
                    .filter_map(|r| {
                        let atoms = data
                            .residue(r)?
                            .atoms()
                            .iter()
                            .copied()
                            .filter(|a| self.atoms.contains(a))
                            .collect();
                        Some((r, atoms))
                    })
                    .collect();
                Some((c, residues))
            })
            .collect()
    }

    fn bond_list(&self, data: &EntityData) -> Vec<BondId> {
        data.bond_ids()
            .iter()
            .copied()
            .filter(|b| self.bonds.contains(b))
            .collect()
    }

    /// Torsions of the entity whose four atoms are all in the view.
    fn torsion_list(&self, data: &EntityData) -> Vec<TorsionId> {
        data.torsion_ids()
            .iter()
            .copied()
            .filter(|&t| {
                data.torsion(t)
                    .is_some_and(|torsion| torsion.atoms.iter().all(|a| self.atoms.contains(a)))
            })
            .collect()
    }

    pub fn chains(&self) -> Vec<ChainView<'_>> {
        self.entity.read(|data| {
            data.chain_ids()
                .iter()
                .copied()
                .filter(|c| self.chains.contains(c) && data.chain(*c).is_some())
                .map(|c| self.chain_view(c))
                .collect()
        })
    }

    pub fn residues(&self) -> Vec<ResidueView<'_>> {
        self.entity.read(|data| {
            self.tree(data)
                .into_iter()
                .flat_map(|(_, residues)| residues)
                .map(|(r, _)| self.residue_view(r))
                .collect()
        })
    }

    pub fn atoms(&self) -> Vec<AtomView<'_>> {
        self.entity.read(|data| {
            self.tree(data)
                .into_iter()
                .flat_map(|(_, residues)| residues)
                .flat_map(|(_, atoms)| atoms)
                .map(|a| self.atom_view(a))
                .collect()
        })
    }

    pub fn bonds(&self) -> Vec<BondView<'_>> {
        self.entity.read(|data| {
            self.bond_list(data)
                .into_iter()
                .map(|b| BondView {
                    view: self,
                    handle: BondHandle::new(self.entity.clone(), b),
                })
                .collect()
        })
    }

    pub fn chain_count(&self) -> usize {
        self.entity
            .read(|data| self.chains.iter().filter(|&&c| data.chain(c).is_some()).count())
    }

    pub fn residue_count(&self) -> usize {
        self.entity
            .read(|data| self.residues.iter().filter(|&&r| data.residue(r).is_some()).count())
    }

    pub fn atom_count(&self) -> usize {
        self.entity
            .read(|data| self.atoms.iter().filter(|&&a| data.atom(a).is_some()).count())
    }

    pub fn bond_count(&self) -> usize {
        self.entity
            .read(|data| self.bonds.iter().filter(|&&b| data.bond(b).is_some()).count())
    }

    pub fn is_empty(&self) -> bool {
        self.chain_count() == 0
    }

    pub fn contains_chain(&self, chain: &ChainHandle) -> bool {
        self.entity.same_entity(chain.entity()) && self.chains.contains(&chain.id()) && chain.is_valid()
    }

    pub fn contains_residue(&self, residue: &ResidueHandle) -> bool {
        self.entity.same_entity(residue.entity()) && self.residues.contains(&residue.id()) && residue.is_valid()
    }

    pub fn contains_atom(&self, atom: &AtomHandle) -> bool {
        self.entity.same_entity(atom.entity()) && self.atoms.contains(&atom.id()) && atom.is_valid()
    }

    pub fn contains_bond(&self, bond: &BondHandle) -> bool {
        self.entity.same_entity(bond.entity()) && self.bonds.contains(&bond.id()) && bond.is_valid()
    }

    pub fn find_chain(&self, name: &str) -> Option<ChainView<'_>> {
        let id = self.entity.read(|data| data.find_chain(name))?;
        self.chains.contains(&id).then(|| self.chain_view(id))
    }

    pub fn find_residue(&self, chain: &str, number: impl Into<ResNum>) -> Option<ResidueView<'_>> {
        let number = number.into();
        let id = self.entity.read(|data| data.find_residue(chain, number))?;
        self.residues.contains(&id).then(|| self.residue_view(id))
    }

    pub fn find_atom(&self, chain: &str, number: impl Into<ResNum>, name: &str) -> Option<AtomView<'_>> {
        let number = number.into();
        let id = self.entity.read(|data| data.find_atom(chain, number, name))?;
        self.atoms.contains(&id).then(|| self.atom_view(id))
    }

    fn chain_view(&self, id: ChainId) -> ChainView<'_> {
        ChainView {
            view: self,
            handle: ChainHandle::new(self.entity.clone(), id),
        }
    }

    fn residue_view(&self, id: ResidueId) -> ResidueView<'_> {
        ResidueView {
            view: self,
            handle: ResidueHandle::new(self.entity.clone(), id),
        }
    }

    fn atom_view(&self, id: AtomId) -> AtomView<'_> {
        AtomView {
            view: self,
            handle: AtomHandle::new(self.entity.clone(), id),
        }
    }

    fn check_owner(&self, entity: &EntityHandle) -> Result<(), EntityError> {
        if self.entity.same_entity(entity) {
            Ok(())
        } else {
            Err(EntityError::violation("handle belongs to a different entity than the view"))
        }
    }

    /// Adds a chain, optionally with its residues and their atoms.
    ///
    /// # Return
    ///
    /// Whether the chain was not yet part of the view.
    pub fn add_chain(&mut self, chain: &ChainHandle, flags: ViewAddFlags) -> Result<bool, EntityError> {
        self.check_owner(chain.entity())?;
        let residues = self.entity.read(|data| {
            data.chain(chain.id())
                .map(|c| c.residues().to_vec())
                .ok_or(EntityError::InvalidHandle { kind: "chain" })
        })?;
        let added = self.chains.insert(chain.id());
        if flags.contains(ViewAddFlags::INCLUDE_RESIDUES) {
            for residue in residues {
                self.insert_residue(residue, flags.contains(ViewAddFlags::INCLUDE_ATOMS));
            }
        }
        Ok(added)
    }

    /// Adds a residue and its chain, optionally with all of its atoms.
    pub fn add_residue(&mut self, residue: &ResidueHandle, flags: ViewAddFlags) -> Result<bool, EntityError> {
        self.check_owner(residue.entity())?;
        let chain = self.entity.read(|data| {
            data.residue(residue.id())
                .map(|r| r.chain_id)
                .ok_or(EntityError::InvalidHandle { kind: "residue" })
        })?;
        self.chains.insert(chain);
        Ok(self.insert_residue(residue.id(), flags.contains(ViewAddFlags::INCLUDE_ATOMS)))
    }

    fn insert_residue(&mut self, residue: ResidueId, with_atoms: bool) -> bool {
        if with_atoms {
            let atoms = self
                .entity
                .read(|data| data.residue(residue).map(|r| r.atoms().to_vec()).unwrap_or_default());
            self.atoms.extend(atoms);
        }
        self.residues.insert(residue)
    }

    /// Adds an atom together with its residue and chain.
    pub fn add_atom(&mut self, atom: &AtomHandle) -> Result<bool, EntityError> {
        self.check_owner(atom.entity())?;
        let (residue, chain) = self.entity.read(|data| {
            let residue = data
                .atom(atom.id())
                .map(|a| a.residue_id)
                .ok_or(EntityError::InvalidHandle { kind: "atom" })?;
            let chain = data
                .residue(residue)
                .map(|r| r.chain_id)
                .ok_or(EntityError::InvalidHandle { kind: "residue" })?;
            Ok::<_, EntityError>((residue, chain))
        })?;
        self.chains.insert(chain);
        self.residues.insert(residue);
        Ok(self.atoms.insert(atom.id()))
    }

    /// Adds a bond; atoms it joins are added as well.
    pub fn add_bond(&mut self, bond: &BondHandle) -> Result<bool, EntityError> {
        self.check_owner(bond.entity())?;
        let (first, second) = (bond.first()?, bond.second()?);
        self.add_atom(&first)?;
        self.add_atom(&second)?;
        Ok(self.bonds.insert(bond.id()))
    }

    /// Adds every bond of the entity whose two atoms are both in the view.
    ///
    /// # Return
    ///
    /// The number of bonds added.
    pub fn add_all_inclusive_bonds(&mut self) -> usize {
        let candidates: Vec<BondId> = self.entity.read(|data| {
            data.bond_ids()
                .iter()
                .copied()
                .filter(|b| {
                    data.bond(*b)
                        .is_some_and(|bond| self.atoms.contains(&bond.first) && self.atoms.contains(&bond.second))
                })
                .collect()
        });
        candidates.into_iter().filter(|&b| self.bonds.insert(b)).count()
    }

    /// Removes a bond from the view; the entity is not touched.
    pub fn remove_bond(&mut self, bond: &BondHandle) -> bool {
        self.entity.same_entity(bond.entity()) && self.bonds.remove(&bond.id())
    }

    /// Removes an atom and every bond of the view that involves it.
    ///
    /// The atom's residue stays in the view even when it becomes empty.
    pub fn remove_atom(&mut self, atom: &AtomHandle) -> bool {
        if !self.entity.same_entity(atom.entity()) || !self.atoms.remove(&atom.id()) {
            return false;
        }
        self.prune_bonds();
        true
    }

    /// Removes a residue with its atoms and their bonds.
    pub fn remove_residue(&mut self, residue: &ResidueHandle) -> bool {
        if !self.entity.same_entity(residue.entity()) || !self.residues.remove(&residue.id()) {
            return false;
        }
        let id = residue.id();
        let entity = self.entity.clone();
        entity.read(|data| {
            self.atoms
                .retain(|&a| data.atom(a).is_some_and(|atom| atom.residue_id != id));
        });
        self.prune_bonds();
        true
    }

    /// Removes a chain with everything the view holds below it.
    pub fn remove_chain(&mut self, chain: &ChainHandle) -> bool {
        if !self.entity.same_entity(chain.entity()) || !self.chains.remove(&chain.id()) {
            return false;
        }
        let id = chain.id();
        let entity = self.entity.clone();
        entity.read(|data| {
            self.residues
                .retain(|&r| data.residue(r).is_some_and(|residue| residue.chain_id != id));
            let residues = &self.residues;
            self.atoms
                .retain(|&a| data.atom(a).is_some_and(|atom| residues.contains(&atom.residue_id)));
        });
        self.prune_bonds();
        true
    }

    /// Drops bonds that lost an atom, or that no longer exist.
    fn prune_bonds(&mut self) {
        let entity = self.entity.clone();
        entity.read(|data| {
            let atoms = &self.atoms;
            self.bonds.retain(|&b| {
                data.bond(b)
                    .is_some_and(|bond| atoms.contains(&bond.first) && atoms.contains(&bond.second))
            });
        });
    }

    fn check_same_entity(&self, other: &EntityView) -> Result<(), EntityError> {
        if self.entity.same_entity(&other.entity) {
            Ok(())
        } else {
            Err(EntityError::violation("views of different entities cannot be combined"))
        }
    }

    /// Everything contained in either view.
    pub fn union(&self, other: &EntityView) -> Result<EntityView, EntityError> {
        self.check_same_entity(other)?;
        Ok(EntityView {
            entity: self.entity.clone(),
            chains: self.chains.union(&other.chains).copied().collect(),
            residues: self.residues.union(&other.residues).copied().collect(),
            atoms: self.atoms.union(&other.atoms).copied().collect(),
            bonds: self.bonds.union(&other.bonds).copied().collect(),
        })
    }

    /// Everything contained in both views.
    pub fn intersection(&self, other: &EntityView) -> Result<EntityView, EntityError> {
        self.check_same_entity(other)?;
        Ok(EntityView {
            entity: self.entity.clone(),
            chains: self.chains.intersection(&other.chains).copied().collect(),
            residues: self.residues.intersection(&other.residues).copied().collect(),
            atoms: self.atoms.intersection(&other.atoms).copied().collect(),
            bonds: self.bonds.intersection(&other.bonds).copied().collect(),
        })
    }

    /// This view without the atoms and bonds of `other`.
    ///
    /// Residues and chains of `other` are removed only when nothing of this
    /// view remains below them.
    pub fn difference(&self, other: &EntityView) -> Result<EntityView, EntityError> {
        self.check_same_entity(other)?;
        let atoms: HashSet<AtomId> = self.atoms.difference(&other.atoms).copied().collect();
        self.entity.read(|data| {
            let occupied_residues: HashSet<ResidueId> =
                atoms.iter().filter_map(|&a| data.atom(a).map(|atom| atom.residue_id)).collect();
            let residues: HashSet<ResidueId> = self
                .residues
                .iter()
                .copied()
                .filter(|r| !other.residues.contains(r) || occupied_residues.contains(r))
                .collect();
            let occupied_chains: HashSet<ChainId> = residues
                .iter()
                .filter_map(|&r| data.residue(r).map(|residue| residue.chain_id))
                .collect();
            let chains = self
                .chains
                .iter()
                .copied()
                .filter(|c| !other.chains.contains(c) || occupied_chains.contains(c))
                .collect();
            let bonds = self
                .bonds
                .iter()
                .copied()
                .filter(|b| !other.bonds.contains(b))
                .filter(|&b| {
                    data.bond(b)
                        .is_some_and(|bond| atoms.contains(&bond.first) && atoms.contains(&bond.second))
                })
                .collect();
            Ok(EntityView {
                entity: self.entity.clone(),
                chains,
                residues,
                atoms,
                bonds,
            })
        })
    }

    /// Selects within this view.
    pub fn select(&self, query: &Query, flags: QueryFlags) -> Result<EntityView, EntityError> {
        let selection = self.entity.read_xcs(|data| {
            let tree = self.tree(data);
            let bonds = self.bond_list(data);
            select::select(data, &tree, &bonds, query, flags)
        })?;
        Ok(Self::from_selection(self.entity.clone(), selection))
    }

    /// Walks the view's hierarchy, its bonds and the torsions it fully contains.
    pub fn apply<V: EntityVisitor + ?Sized>(&self, visitor: &mut V) {
        let (tree, bonds, torsions) =
            self.entity
                .read(|data| (self.tree(data), self.bond_list(data), self.torsion_list(data)));
        visitor::walk(&self.entity, &tree, &bonds, &torsions, visitor);
    }

    pub fn geometric_center(&self) -> Option<Point3<f64>> {
        self.entity.read_xcs(|data| {
            let points: Vec<Point3<f64>> = self
                .atoms
                .iter()
                .filter_map(|&a| data.atom_position(a))
                .collect();
            geometry::centroid(&points)
        })
    }

    /// Copies the view into a new, independent entity.
    ///
    /// Bonds of the view whose atoms are both copied come along, as do the
    /// torsions whose four atoms and three bonds made it into the copy.
    /// Generic properties of every copied node are preserved.
    pub fn to_entity(&self, name: &str) -> Result<EntityHandle, EntityError> {
        let data = self.entity.read_xcs(|source| self.materialise(source, name))?;
        debug!(
            name,
            atoms = data.atom_count(),
            bonds = data.bond_count(),
            "View materialised into a new entity."
        );
        Ok(EntityHandle::from_data(data))
    }

    fn materialise(&self, source: &EntityData, name: &str) -> Result<EntityData, EntityError> {
        let mut data = EntityData::new(name);
        let mut atom_map: SecondaryMap<AtomId, AtomId> = SecondaryMap::new();
        for (chain_id, residues) in self.tree(source) {
            let Some(chain) = source.chain(chain_id) else {
                continue;
            };
            let new_chain = data.add_chain(&chain.name)?;
            if let Some(c) = data.chain_mut(new_chain) {
                c.chain_type = chain.chain_type;
                c.props = chain.props.clone();
            }
            for (residue_id, atoms) in residues {
                let Some(residue) = source.residue(residue_id) else {
                    continue;
                };
                let new_residue = data.append_residue(new_chain, &residue.key, Some(residue.number))?;
                if let Some(r) = data.residue_mut(new_residue) {
                    r.one_letter_code = residue.one_letter_code;
                    r.chem_class = residue.chem_class;
                    r.is_ligand = residue.is_ligand;
                    r.props = residue.props.clone();
                }
                for atom_id in atoms {
                    let Some(atom) = source.atom(atom_id) else {
                        continue;
                    };
                    let new_atom = data.add_atom(new_residue, &atom.name, &atom.element, atom.position)?;
                    if let Some(a) = data.atom_mut(new_atom) {
                        a.occupancy = atom.occupancy;
                        a.b_factor = atom.b_factor;
                        a.charge = atom.charge;
                        a.is_hetatm = atom.is_hetatm;
                        a.props = atom.props.clone();
                    }
                    atom_map.insert(atom_id, new_atom);
                }
            }
        }

        for bond_id in self.bond_list(source) {
            let Some(bond) = source.bond(bond_id) else {
                continue;
            };
            let (Some(&first), Some(&second)) = (atom_map.get(bond.first), atom_map.get(bond.second)) else {
                continue;
            };
            let (new_bond, _) = data.add_bond(first, second, bond.order)?;
            if let Some(b) = data.bond_mut(new_bond) {
                b.props = bond.props.clone();
            }
        }

        for torsion_id in self.torsion_list(source) {
            let Some(torsion) = source.torsion(torsion_id) else {
                continue;
            };
            let mapped: Option<Vec<AtomId>> = torsion.atoms.iter().map(|&a| atom_map.get(a).copied()).collect();
            let Some(Ok(atoms)) = mapped.map(<[AtomId; 4]>::try_from) else {
                continue;
            };
            if coords::check_connected(&data, &atoms).is_ok() {
                data.add_torsion(&torsion.name, atoms)?;
            }
        }
        Ok(data)
    }
}

/// A chain seen through a view; reads are live, children are filtered.
#[derive(Debug, Clone)]
pub struct ChainView<'v> {
    view: &'v EntityView,
    handle: ChainHandle,
}

impl<'v> ChainView<'v> {
    pub fn handle(&self) -> &ChainHandle {
        &self.handle
    }

    pub fn view(&self) -> &'v EntityView {
        self.view
    }

    pub fn residues(&self) -> Vec<ResidueView<'v>> {
        let view = self.view;
        let id = self.handle.id();
        view.entity.read(|data| {
            data.chain(id)
                .map(|c| {
                    c.residues()
                        .iter()
                        .copied()
                        .filter(|r| view.residues.contains(r))
                        .map(|r| view.residue_view(r))
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    pub fn residue_count(&self) -> usize {
        self.residues().len()
    }

    pub fn atoms(&self) -> Vec<AtomView<'v>> {
        self.residues().iter().flat_map(|r| r.atoms()).collect()
    }

    pub fn find_residue(&self, number: impl Into<ResNum>) -> Option<ResidueView<'v>> {
        let number = number.into();
        let id = self
            .view
            .entity
            .read(|data| data.chain(self.handle.id())?.residue_by_number(number))?;
        self.view.residues.contains(&id).then(|| self.view.residue_view(id))
    }
}

impl Deref for ChainView<'_> {
    type Target = ChainHandle;

    fn deref(&self) -> &ChainHandle {
        &self.handle
    }
}

#[derive(Debug, Clone)]
pub struct ResidueView<'v> {
    view: &'v EntityView,
    handle: ResidueHandle,
}

impl<'v> ResidueView<'v> {
    pub fn handle(&self) -> &ResidueHandle {
        &self.handle
    }

    pub fn atoms(&self) -> Vec<AtomView<'v>> {
        let view = self.view;
        let id = self.handle.id();
        view.entity.read(|data| {
            data.residue(id)
                .map(|r| {
                    r.atoms()
                        .iter()
                        .copied()
                        .filter(|a| view.atoms.contains(a))
                        .map(|a| view.atom_view(a))
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    pub fn atom_count(&self) -> usize {
        self.atoms().len()
    }

    pub fn find_atom(&self, name: &str) -> Option<AtomView<'v>> {
        let id = self
            .view
            .entity
            .read(|data| data.residue(self.handle.id())?.atom_id_by_name(name))?;
        self.view.atoms.contains(&id).then(|| self.view.atom_view(id))
    }

    pub fn chain(&self) -> Result<ChainView<'v>, EntityError> {
        let chain = self.handle.chain()?;
        Ok(self.view.chain_view(chain.id()))
    }
}

impl Deref for ResidueView<'_> {
    type Target = ResidueHandle;

    fn deref(&self) -> &ResidueHandle {
        &self.handle
    }
}

#[derive(Debug, Clone)]
pub struct AtomView<'v> {
    view: &'v EntityView,
    handle: AtomHandle,
}

impl<'v> AtomView<'v> {
    pub fn handle(&self) -> &AtomHandle {
        &self.handle
    }

    pub fn residue(&self) -> Result<ResidueView<'v>, EntityError> {
        let residue = self.handle.residue()?;
        Ok(self.view.residue_view(residue.id()))
    }

    /// Bonds of the view that involve this atom.
    pub fn bonds(&self) -> Vec<BondView<'v>> {
        let view = self.view;
        let id = self.handle.id();
        view.entity.read(|data| {
            data.atom(id)
                .map(|a| {
                    a.bonds()
                        .iter()
                        .copied()
                        .filter(|b| view.bonds.contains(b))
                        .map(|b| BondView {
                            view,
                            handle: BondHandle::new(view.entity.clone(), b),
                        })
                        .collect()
                })
                .unwrap_or_default()
        })
    }
}

impl Deref for AtomView<'_> {
    type Target = AtomHandle;

    fn deref(&self) -> &AtomHandle {
        &self.handle
    }
}

#[derive(Debug, Clone)]
pub struct BondView<'v> {
    view: &'v EntityView,
    handle: BondHandle,
}

impl<'v> BondView<'v> {
    pub fn handle(&self) -> &BondHandle {
        &self.handle
    }

    pub fn view(&self) -> &'v EntityView {
        self.view
    }
}

impl Deref for BondView<'_> {
    type Target = BondHandle;

    fn deref(&self) -> &BondHandle {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::topology::BondOrder;
    use crate::engine::editor::EditMode;
    use crate::engine::handle::PropertyOwner;

    /// Two chains: A holds ALA and GLY, B holds one HOH.
    fn fixture() -> EntityHandle {
        let entity = EntityHandle::create("fixture");
        let mut ed = entity.edit_xcs(EditMode::Buffered).unwrap();
        let a = ed.insert_chain("A").unwrap();
        let mut previous: Option<AtomHandle> = None;
        for (i, key) in ["ALA", "GLY"].iter().enumerate() {
            let res = ed.append_residue(&a, key, None).unwrap();
            let x = i as f64 * 3.0;
            let n = ed.insert_atom(&res, "N", Point3::new(x, 0.0, 0.0), None).unwrap();
            let ca = ed.insert_atom(&res, "CA", Point3::new(x + 1.5, 0.0, 0.0), None).unwrap();
            let c = ed.insert_atom(&res, "C", Point3::new(x + 2.0, 1.4, 0.0), None).unwrap();
            ed.connect(&n, &ca, None).unwrap();
            ed.connect(&ca, &c, None).unwrap();
            if let Some(prev) = previous.take() {
                ed.connect(&prev, &n, Some(BondOrder::Single)).unwrap();
            }
            previous = Some(c);
        }
        let b = ed.insert_chain("B").unwrap();
        let hoh = ed.append_residue(&b, "HOH", None).unwrap();
        ed.insert_atom(&hoh, "O", Point3::new(20.0, 0.0, 0.0), None).unwrap();
        drop(ed);
        entity
    }

    fn names(view: &EntityView) -> Vec<String> {
        view.atoms().iter().map(|a| a.qualified_name().unwrap()).collect()
    }

    mod membership {
        use super::*;

        #[test]
        fn full_view_mirrors_the_entity() {
            let entity = fixture();
            let view = entity.create_full_view();
            assert_eq!(view.chain_count(), 2);
            assert_eq!(view.residue_count(), 3);
            assert_eq!(view.atom_count(), 7);
            assert_eq!(view.bond_count(), 5);
            assert_eq!(view.chains()[0].residues().len(), 2);
        }

        #[test]
        fn adding_an_atom_creates_its_parents() {
            let entity = fixture();
            let mut view = entity.create_empty_view();
            let ca = entity.find_atom("A", 2, "CA").unwrap();
            assert!(view.add_atom(&ca).unwrap());
            assert!(!view.add_atom(&ca).unwrap());
            assert_eq!(view.chain_count(), 1);
            assert_eq!(view.residue_count(), 1);
            assert_eq!(names(&view), vec!["A.GLY2.CA"]);
            assert!(view.contains_residue(&ca.residue().unwrap()));
        }

        #[test]
        fn add_flags_choose_the_children() {
            let entity = fixture();
            let chain = entity.find_chain("A").unwrap();

            let mut view = entity.create_empty_view();
            view.add_chain(&chain, ViewAddFlags::empty()).unwrap();
            assert_eq!((view.chain_count(), view.residue_count(), view.atom_count()), (1, 0, 0));

            view.add_chain(&chain, ViewAddFlags::INCLUDE_RESIDUES).unwrap();
            assert_eq!((view.residue_count(), view.atom_count()), (2, 0));

            view.add_chain(&chain, ViewAddFlags::INCLUDE_ALL).unwrap();
            assert_eq!(view.atom_count(), 6);
            assert_eq!(view.bond_count(), 0);
            assert_eq!(view.add_all_inclusive_bonds(), 5);
        }

        #[test]
        fn adding_a_bond_adds_both_atoms() {
            let entity = fixture();
            let mut view = entity.create_empty_view();
            let peptide = entity.bonds()[4].clone();
            view.add_bond(&peptide).unwrap();
            assert_eq!(names(&view), vec!["A.ALA1.C", "A.GLY2.N"]);
            assert_eq!(view.residue_count(), 2);
        }

        #[test]
        fn removing_nodes_cascades_inside_the_view_only() {
            let entity = fixture();
            let mut view = entity.create_full_view();
            let ca = entity.find_atom("A", 1, "CA").unwrap();
            assert!(view.remove_atom(&ca));
            assert_eq!(view.atom_count(), 6);
            assert_eq!(view.bond_count(), 3);
            assert_eq!(view.residue_count(), 3);

            let gly = entity.find_residue("A", 2).unwrap();
            assert!(view.remove_residue(&gly));
            assert_eq!(names(&view), vec!["A.ALA1.N", "A.ALA1.C", "B.HOH1.O"]);
            assert_eq!(view.bond_count(), 0);

            let chain_b = entity.find_chain("B").unwrap();
            assert!(view.remove_chain(&chain_b));
            assert_eq!(view.chain_count(), 1);
            assert!(!view.remove_chain(&chain_b));

            assert_eq!(entity.atom_count(), 7);
            assert_eq!(entity.bond_count(), 5);
        }

        #[test]
        fn node_views_filter_children() {
            let entity = fixture();
            let view = entity.select("aname=CA,C").unwrap();
            let residue = view.find_residue("A", 1).unwrap();
            assert_eq!(residue.atom_count(), 2);
            assert!(residue.find_atom("N").is_none());
            let ca = residue.find_atom("CA").unwrap();
            assert_eq!(ca.bonds().len(), 1);
            assert_eq!(ca.residue().unwrap().name().unwrap(), "ALA");
            assert_eq!(residue.chain().unwrap().residue_count(), 2);
            assert!(view.find_chain("B").is_none());
        }
    }

    mod algebra {
        use super::*;

        #[test]
        fn union_and_intersection_keep_entity_order() {
            let entity = fixture();
            let gly = entity.select("rname=GLY").unwrap();
            let ala = entity.select("rname=ALA").unwrap();
            let both = gly.union(&ala).unwrap();
            assert_eq!(
                names(&both),
                vec!["A.ALA1.N", "A.ALA1.CA", "A.ALA1.C", "A.GLY2.N", "A.GLY2.CA", "A.GLY2.C"]
            );
            assert_eq!(both.bond_count(), 4);

            let ca = entity.select("aname=CA").unwrap();
            assert_eq!(names(&ca.intersection(&gly).unwrap()), vec!["A.GLY2.CA"]);
        }

        #[test]
        fn difference_drops_emptied_parents() {
            let entity = fixture();
            let all = entity.create_full_view();
            let water = entity.select("rname=HOH").unwrap();
            let rest = all.difference(&water).unwrap();
            assert_eq!(rest.chain_count(), 1);
            assert_eq!(rest.atom_count(), 6);
            assert_eq!(rest.bond_count(), 5);

            let ca = entity.select("aname=CA").unwrap();
            let no_ca = all.difference(&ca).unwrap();
            assert_eq!(no_ca.residue_count(), 3);
            assert_eq!(no_ca.bond_count(), 1);
        }

        #[test]
        fn views_of_different_entities_do_not_combine() {
            let first = fixture();
            let second = fixture();
            let err = first
                .create_full_view()
                .union(&second.create_full_view())
                .unwrap_err();
            assert!(matches!(err, EntityError::Integrity(_)));
        }
    }

    mod behaviour {
        use super::*;

        #[test]
        fn views_see_live_positions_but_keep_membership() {
            let entity = fixture();
            let view = entity.select("aname=CA").unwrap();
            let ca = entity.find_atom("A", 1, "CA").unwrap();
            {
                let mut ed = entity.edit_xcs(EditMode::Unbuffered).unwrap();
                ed.set_atom_pos(&ca, Point3::new(5.0, 5.0, 5.0)).unwrap();
                ed.set_b_factor(&ca, 99.0).unwrap();
            }
            assert_eq!(view.atom_count(), 2);
            let seen = view.find_atom("A", 1, "CA").unwrap();
            assert_eq!(seen.pos().unwrap(), Point3::new(5.0, 5.0, 5.0));
            assert_eq!(seen.b_factor().unwrap(), 99.0);
        }

        #[test]
        fn deleted_atoms_drop_out_of_listings() {
            let entity = fixture();
            let view = entity.create_full_view();
            let o = entity.find_atom("B", 1, "O").unwrap();
            {
                let mut ed = entity.edit_xcs(EditMode::Buffered).unwrap();
                ed.delete_atom(&o).unwrap();
            }
            assert_eq!(view.atom_count(), 6);
            assert!(!view.contains_atom(&o));
        }

        #[test]
        fn select_within_a_view_stays_inside_it() {
            let entity = fixture();
            let chain_a = entity.select("cname=A").unwrap();
            let view = chain_a.select(&Query::new("x>1"), QueryFlags::default()).unwrap();
            assert_eq!(names(&view), vec!["A.ALA1.CA", "A.ALA1.C", "A.GLY2.N", "A.GLY2.CA", "A.GLY2.C"]);
            let near = chain_a
                .select(&Query::new("within 1.0 of aname=O"), QueryFlags::default())
                .unwrap();
            assert!(near.is_empty());
        }

        #[test]
        fn to_entity_copies_nodes_bonds_and_properties() {
            let entity = fixture();
            let ala_ca = entity.find_atom("A", 1, "CA").unwrap();
            {
                let mut ed = entity.edit_xcs(EditMode::Buffered).unwrap();
                ed.set_float_prop(&ala_ca, "weight", 2.5).unwrap();
                let [n, ca, c] = ["N", "CA", "C"].map(|name| entity.find_atom("A", 2, name).unwrap());
                let prev_c = entity.find_atom("A", 1, "C").unwrap();
                ed.add_torsion("phi", &prev_c, &n, &ca, &c).unwrap();
            }
            let view = entity.select("cname=A").unwrap();
            let copy = view.to_entity("copy").unwrap();
            assert!(!copy.same_entity(&entity));
            assert_eq!(copy.name(), "copy");
            assert_eq!((copy.chain_count(), copy.atom_count(), copy.bond_count()), (1, 6, 5));
            assert_eq!(copy.torsion_count(), 1);
            let copied = copy.find_atom("A", 1, "CA").unwrap();
            assert_eq!(copied.float_prop("weight").unwrap(), 2.5);
            assert_eq!(copied.pos().unwrap(), ala_ca.pos().unwrap());

            let partial = entity.select("rname=GLY").unwrap().to_entity("gly").unwrap();
            assert_eq!(partial.torsion_count(), 0);
        }

        #[test]
        fn geometric_center_covers_view_atoms() {
            let entity = fixture();
            let view = entity.select("aname=N").unwrap();
            assert_eq!(view.geometric_center(), Some(Point3::new(1.5, 0.0, 0.0)));
            assert_eq!(entity.create_empty_view().geometric_center(), None);
        }
    }
}
