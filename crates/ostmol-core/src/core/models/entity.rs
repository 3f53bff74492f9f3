use super::atom::Atom;
use super::chain::Chain;
use super::ids::{AtomId, BondId, ChainId, ResidueId, TorsionId};
use super::props::GenericPropContainer;
use super::residue::{ResNum, Residue};
use super::topology::{Bond, BondOrder, Neighbor, Torsion};
use nalgebra::Point3;
use slotmap::SlotMap;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Structural preconditions that the storage layer refuses to violate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("{kind} does not exist in this entity")]
    MissingNode { kind: &'static str },

    #[error("Chain '{0}' already exists")]
    DuplicateChain(String),

    #[error("Residue number {number} is already used in chain '{chain}'")]
    DuplicateResidue { chain: String, number: ResNum },

    #[error("Atom '{name}' already exists in residue {residue}")]
    DuplicateAtom { residue: String, name: String },

    #[error("Integrity violation: {0}")]
    Violation(String),
}

/// The set of nodes removed by a single structural deletion, in removal order.
///
/// Torsions are always removed before the bonds they span, bonds before the
/// atoms they join, atoms before their residue, residues before their chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Removed {
    pub torsions: Vec<TorsionId>,
    pub bonds: Vec<BondId>,
    pub atoms: Vec<AtomId>,
    pub residues: Vec<ResidueId>,
    pub chains: Vec<ChainId>,
}

/// Arena storage for every node of one molecular entity.
///
/// This is the owning container behind an entity handle. All chains, residues,
/// atoms, bonds and torsions live in slot maps, so node ids are generational
/// and a stale id is detected instead of aliasing a newer node. Ownership is a
/// strict tree (chain, residue, atom); bonds and torsions refer to atoms by id.
///
/// Ordering is explicit: chains keep insertion order, residues keep their
/// chain's order and atoms their residue's order. Bonds and torsions are listed
/// in creation order.
#[derive(Debug, Clone, Default)]
pub struct EntityData {
    /// The entity name.
    pub name: String,
    /// Entity-level user properties.
    pub props: GenericPropContainer,
    atoms: SlotMap<AtomId, Atom>,
    residues: SlotMap<ResidueId, Residue>,
    chains: SlotMap<ChainId, Chain>,
    bonds: SlotMap<BondId, Bond>,
    torsions: SlotMap<TorsionId, Torsion>,
    chain_order: Vec<ChainId>,
    bond_order: Vec<BondId>,
    torsion_order: Vec<TorsionId>,
    chain_name_map: HashMap<String, ChainId>,
}

impl EntityData {
    /// Creates a new, empty entity storage.
    ///
    /// # Arguments
    ///
    /// * `name` - The entity name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn atom(&self, id: AtomId) -> Option<&Atom> {
        self.atoms.get(id)
    }

    pub fn atom_mut(&mut self, id: AtomId) -> Option<&mut Atom> {
        self.atoms.get_mut(id)
    }

    pub fn residue(&self, id: ResidueId) -> Option<&Residue> {
        self.residues.get(id)
    }

    pub fn residue_mut(&mut self, id: ResidueId) -> Option<&mut Residue> {
        self.residues.get_mut(id)
    }

    pub fn chain(&self, id: ChainId) -> Option<&Chain> {
        self.chains.get(id)
    }

    pub fn chain_mut(&mut self, id: ChainId) -> Option<&mut Chain> {
        self.chains.get_mut(id)
    }

    pub fn bond(&self, id: BondId) -> Option<&Bond> {
        self.bonds.get(id)
    }

    pub fn bond_mut(&mut self, id: BondId) -> Option<&mut Bond> {
        self.bonds.get_mut(id)
    }

    pub fn torsion(&self, id: TorsionId) -> Option<&Torsion> {
        self.torsions.get(id)
    }

    pub fn atom_count(&self) -> usize {
        self.atoms.len()
    }

    pub fn residue_count(&self) -> usize {
        self.residues.len()
    }

    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }

    pub fn bond_count(&self) -> usize {
        self.bonds.len()
    }

    pub fn torsion_count(&self) -> usize {
        self.torsions.len()
    }

    /// Chains in insertion order.
    pub fn chain_ids(&self) -> &[ChainId] {
        &self.chain_order
    }

    /// Residues in entity order (chain order, then residue order).
    pub fn residue_ids(&self) -> Vec<ResidueId> {
        self.chain_order
            .iter()
            .filter_map(|&c| self.chains.get(c))
            .flat_map(|chain| chain.residues().iter().copied())
            .collect()
    }

    /// Atoms in entity order (chain, residue, then atom order).
    pub fn atom_ids(&self) -> Vec<AtomId> {
        self.residue_ids()
            .into_iter()
            .filter_map(|r| self.residues.get(r))
            .flat_map(|residue| residue.atoms().iter().copied())
            .collect()
    }

    /// Bonds in creation order.
    pub fn bond_ids(&self) -> &[BondId] {
        &self.bond_order
    }

    /// Torsions in creation order.
    pub fn torsion_ids(&self) -> &[TorsionId] {
        &self.torsion_order
    }

    pub fn find_chain(&self, name: &str) -> Option<ChainId> {
        self.chain_name_map.get(name).copied()
    }

    pub fn find_residue(&self, chain_name: &str, number: ResNum) -> Option<ResidueId> {
        let chain_id = self.find_chain(chain_name)?;
        self.chains.get(chain_id)?.residue_by_number(number)
    }

    pub fn find_atom(&self, chain_name: &str, number: ResNum, atom_name: &str) -> Option<AtomId> {
        let residue_id = self.find_residue(chain_name, number)?;
        self.residues.get(residue_id)?.atom_id_by_name(atom_name)
    }

    pub fn find_torsion(&self, name: &str) -> Option<TorsionId> {
        self.torsion_order
            .iter()
            .copied()
            .find(|&t| self.torsions.get(t).is_some_and(|torsion| torsion.name == name))
    }

    /// Returns the bonded neighbors of an atom in bond creation order.
    ///
    /// # Arguments
    ///
    /// * `atom_id` - The atom whose neighbors are requested.
    ///
    /// # Return
    ///
    /// A list of `(bond, partner)` pairs; empty if the atom does not exist.
    pub fn neighbors(&self, atom_id: AtomId) -> Vec<Neighbor> {
        let Some(atom) = self.atoms.get(atom_id) else {
            return Vec::new();
        };
        atom.bonds()
            .iter()
            .filter_map(|&b| {
                self.bonds
                    .get(b)
                    .and_then(|bond| bond.partner(atom_id))
                    .map(|partner| (b, partner))
            })
            .collect()
    }

    pub fn bond_between(&self, a: AtomId, b: AtomId) -> Option<BondId> {
        self.atoms.get(a)?.bonds().iter().copied().find(|&id| {
            self.bonds
                .get(id)
                .is_some_and(|bond| bond.connects(a, b))
        })
    }

    /// Torsions whose central bond joins `a` and `b`.
    pub fn torsions_around(&self, a: AtomId, b: AtomId) -> Vec<TorsionId> {
        self.torsion_order
            .iter()
            .copied()
            .filter(|&t| {
                self.torsions.get(t).is_some_and(|torsion| {
                    let (x, y) = torsion.central();
                    (x == a && y == b) || (x == b && y == a)
                })
            })
            .collect()
    }

    pub fn atom_position(&self, atom_id: AtomId) -> Option<Point3<f64>> {
        self.atoms.get(atom_id).map(|atom| atom.position)
    }

    /// Adds a new chain with a unique name.
    ///
    /// # Return
    ///
    /// The new chain id, or [`IntegrityError::DuplicateChain`] if the name is taken.
    pub fn add_chain(&mut self, name: &str) -> Result<ChainId, IntegrityError> {
        if self.chain_name_map.contains_key(name) {
            return Err(IntegrityError::DuplicateChain(name.to_string()));
        }
        let chain_id = self.chains.insert(Chain::new(name));
        self.chain_order.push(chain_id);
        self.chain_name_map.insert(name.to_string(), chain_id);
        Ok(chain_id)
    }

    /// Appends a residue to the end of a chain.
    ///
    /// # Arguments
    ///
    /// * `chain_id` - The owning chain.
    /// * `key` - The compound key (e.g. "ALA").
    /// * `number` - The residue number; when `None`, the number following the
    ///   last residue of the chain (or 1 for an empty chain) is used.
    pub fn append_residue(
        &mut self,
        chain_id: ChainId,
        key: &str,
        number: Option<ResNum>,
    ) -> Result<ResidueId, IntegrityError> {
        let chain = self
            .chains
            .get(chain_id)
            .ok_or(IntegrityError::MissingNode { kind: "chain" })?;
        let last = chain
            .residues()
            .last()
            .and_then(|&r| self.residues.get(r))
            .map(|r| r.number);
        let number = number.unwrap_or_else(|| chain.next_residue_number(last));
        if chain.residue_by_number(number).is_some() {
            return Err(IntegrityError::DuplicateResidue {
                chain: chain.name.clone(),
                number,
            });
        }

        let residue_id = self.residues.insert(Residue::new(key, number, chain_id));
        if let Some(chain) = self.chains.get_mut(chain_id) {
            chain.push_residue(number, residue_id);
        }
        Ok(residue_id)
    }

    /// Inserts an atom at the end of a residue; atom names are unique per residue.
    pub fn add_atom(
        &mut self,
        residue_id: ResidueId,
        name: &str,
        element: &str,
        position: Point3<f64>,
    ) -> Result<AtomId, IntegrityError> {
        let residue = self
            .residues
            .get(residue_id)
            .ok_or(IntegrityError::MissingNode { kind: "residue" })?;
        if residue.atom_id_by_name(name).is_some() {
            return Err(IntegrityError::DuplicateAtom {
                residue: residue.qualified_name(),
                name: name.to_string(),
            });
        }

        let atom_id = self
            .atoms
            .insert(Atom::new(name, element, residue_id, position));
        if let Some(residue) = self.residues.get_mut(residue_id) {
            residue.add_atom(name, atom_id);
        }
        Ok(atom_id)
    }

    /// Connects two atoms.
    ///
    /// This method is idempotent; if the atoms are already bonded, the existing
    /// bond is returned and its order is left untouched.
    ///
    /// # Return
    ///
    /// The bond id and whether a new bond was created.
    pub fn add_bond(
        &mut self,
        first: AtomId,
        second: AtomId,
        order: BondOrder,
    ) -> Result<(BondId, bool), IntegrityError> {
        if !self.atoms.contains_key(first) || !self.atoms.contains_key(second) {
            return Err(IntegrityError::MissingNode { kind: "atom" });
        }
        if first == second {
            return Err(IntegrityError::Violation(
                "an atom cannot be bonded to itself".to_string(),
            ));
        }
        if let Some(existing) = self.bond_between(first, second) {
            return Ok((existing, false));
        }

        let bond_id = self.bonds.insert(Bond::new(first, second, order));
        self.bond_order.push(bond_id);
        for atom_id in [first, second] {
            if let Some(atom) = self.atoms.get_mut(atom_id) {
                atom.bonds.push(bond_id);
            }
        }
        Ok((bond_id, true))
    }

    /// Registers a torsion; connectivity of the four atoms is checked by the caller.
    pub fn add_torsion(&mut self, name: &str, atoms: [AtomId; 4]) -> Result<TorsionId, IntegrityError> {
        if atoms.iter().any(|&a| !self.atoms.contains_key(a)) {
            return Err(IntegrityError::MissingNode { kind: "atom" });
        }
        let torsion_id = self.torsions.insert(Torsion::new(name, atoms));
        self.torsion_order.push(torsion_id);
        Ok(torsion_id)
    }

    fn remove_torsion(&mut self, torsion_id: TorsionId) -> Option<Torsion> {
        let torsion = self.torsions.remove(torsion_id)?;
        self.torsion_order.retain(|&t| t != torsion_id);
        Some(torsion)
    }

    /// Removes a bond together with every torsion spanning it.
    pub fn remove_bond(&mut self, bond_id: BondId) -> Option<Removed> {
        let bond = self.bonds.get(bond_id)?.clone();
        let mut removed = Removed::default();

        let spanning: Vec<TorsionId> = self
            .torsion_order
            .iter()
            .copied()
            .filter(|&t| self.torsions.get(t).is_some_and(|torsion| torsion.spans(&bond)))
            .collect();
        for torsion_id in spanning {
            self.remove_torsion(torsion_id);
            removed.torsions.push(torsion_id);
        }

        for atom_id in [bond.first, bond.second] {
            if let Some(atom) = self.atoms.get_mut(atom_id) {
                atom.bonds.retain(|&b| b != bond_id);
            }
        }
        self.bonds.remove(bond_id);
        self.bond_order.retain(|&b| b != bond_id);
        removed.bonds.push(bond_id);
        Some(removed)
    }

    /// Removes an atom from the entity.
    ///
    /// This method cascades: every incident bond and every torsion referring
    /// to the atom is removed before the atom itself, so no dangling reference
    /// survives the call.
    ///
    /// # Return
    ///
    /// The removed nodes, or `None` if the atom did not exist.
    pub fn remove_atom(&mut self, atom_id: AtomId) -> Option<Removed> {
        if !self.atoms.contains_key(atom_id) {
            return None;
        }
        Some(self.remove_atoms(&[atom_id]))
    }

    /// Removes a batch of atoms with their bonds and torsions.
    ///
    /// Every owner list is filtered once per batch, so removing a whole chain
    /// stays linear in its size.
    fn remove_atoms(&mut self, atom_ids: &[AtomId]) -> Removed {
        let mut removed = Removed::default();
        let doomed: HashSet<AtomId> = atom_ids
            .iter()
            .copied()
            .filter(|&a| self.atoms.contains_key(a))
            .collect();
        if doomed.is_empty() {
            return removed;
        }

        let mut doomed_bonds = HashSet::new();
        for &atom_id in atom_ids {
            if let Some(atom) = self.atoms.get(atom_id) {
                for &bond_id in atom.bonds() {
                    if doomed_bonds.insert(bond_id) {
                        removed.bonds.push(bond_id);
                    }
                }
            }
        }

        // A torsion through a removed bond always involves a removed atom.
        removed.torsions = self
            .torsion_order
            .iter()
            .copied()
            .filter(|&t| {
                self.torsions
                    .get(t)
                    .is_some_and(|torsion| torsion.atoms.iter().any(|a| doomed.contains(a)))
            })
            .collect();
        let doomed_torsions: HashSet<TorsionId> = removed.torsions.iter().copied().collect();
        for &torsion_id in &removed.torsions {
            self.torsions.remove(torsion_id);
        }
        self.torsion_order.retain(|t| !doomed_torsions.contains(t));

        for &bond_id in &removed.bonds {
            let Some(bond) = self.bonds.remove(bond_id) else {
                continue;
            };
            for atom_id in [bond.first, bond.second] {
                if doomed.contains(&atom_id) {
                    continue;
                }
                if let Some(atom) = self.atoms.get_mut(atom_id) {
                    atom.bonds.retain(|&b| b != bond_id);
                }
            }
        }
        self.bond_order.retain(|b| !doomed_bonds.contains(b));

        let mut owners = Vec::new();
        let mut seen = HashSet::new();
        for &atom_id in atom_ids {
            if let Some(atom) = self.atoms.remove(atom_id) {
                if seen.insert(atom.residue_id) {
                    owners.push(atom.residue_id);
                }
                removed.atoms.push(atom_id);
            }
        }
        for residue_id in owners {
            if let Some(residue) = self.residues.get_mut(residue_id) {
                residue.remove_atoms(&doomed);
            }
        }
        removed
    }

    /// Removes a residue and, transitively, all of its atoms.
    pub fn remove_residue(&mut self, residue_id: ResidueId) -> Option<Removed> {
        if !self.residues.contains_key(residue_id) {
            return None;
        }
        Some(self.remove_residues(&[residue_id]))
    }

    fn remove_residues(&mut self, residue_ids: &[ResidueId]) -> Removed {
        let atoms: Vec<AtomId> = residue_ids
            .iter()
            .filter_map(|&r| self.residues.get(r))
            .flat_map(|residue| residue.atoms().iter().copied())
            .collect();
        let mut removed = self.remove_atoms(&atoms);

        let doomed: HashSet<ResidueId> = residue_ids.iter().copied().collect();
        let mut owners = Vec::new();
        let mut seen = HashSet::new();
        for &residue_id in residue_ids {
            if let Some(residue) = self.residues.remove(residue_id) {
                if seen.insert(residue.chain_id) {
                    owners.push(residue.chain_id);
                }
                removed.residues.push(residue_id);
            }
        }
        for chain_id in owners {
            if let Some(chain) = self.chains.get_mut(chain_id) {
                chain.remove_residues(&doomed);
            }
        }
        removed
    }

    /// Removes a chain and everything it owns.
    pub fn remove_chain(&mut self, chain_id: ChainId) -> Option<Removed> {
        let residues = self.chains.get(chain_id)?.residues().to_vec();
        let mut removed = self.remove_residues(&residues);

        let chain = self.chains.remove(chain_id)?;
        self.chain_order.retain(|&c| c != chain_id);
        self.chain_name_map.remove(&chain.name);
        removed.chains.push(chain_id);
        Some(removed)
    }

    pub fn rename_chain(&mut self, chain_id: ChainId, new_name: &str) -> Result<(), IntegrityError> {
        let old_name = self
            .chains
            .get(chain_id)
            .ok_or(IntegrityError::MissingNode { kind: "chain" })?
            .name
            .clone();
        if old_name == new_name {
            return Ok(());
        }
        if self.chain_name_map.contains_key(new_name) {
            return Err(IntegrityError::DuplicateChain(new_name.to_string()));
        }
        self.chain_name_map.remove(&old_name);
        self.chain_name_map.insert(new_name.to_string(), chain_id);
        if let Some(chain) = self.chains.get_mut(chain_id) {
            chain.name = new_name.to_string();
        }
        Ok(())
    }

    pub fn renumber_residue(&mut self, residue_id: ResidueId, number: ResNum) -> Result<(), IntegrityError> {
        let residue = self
            .residues
            .get(residue_id)
            .ok_or(IntegrityError::MissingNode { kind: "residue" })?;
        let old = residue.number;
        if old == number {
            return Ok(());
        }
        let chain_id = residue.chain_id;
        let chain = self
            .chains
            .get_mut(chain_id)
            .ok_or(IntegrityError::MissingNode { kind: "chain" })?;
        if chain.residue_by_number(number).is_some() {
            return Err(IntegrityError::DuplicateResidue {
                chain: chain.name.clone(),
                number,
            });
        }
        chain.renumber_residue(old, number, residue_id);
        if let Some(residue) = self.residues.get_mut(residue_id) {
            residue.number = number;
        }
        Ok(())
    }

    pub fn rename_atom(&mut self, atom_id: AtomId, new_name: &str) -> Result<(), IntegrityError> {
        let atom = self
            .atoms
            .get(atom_id)
            .ok_or(IntegrityError::MissingNode { kind: "atom" })?;
        let old_name = atom.name.clone();
        if old_name == new_name {
            return Ok(());
        }
        let residue_id = atom.residue_id;
        let residue = self
            .residues
            .get_mut(residue_id)
            .ok_or(IntegrityError::MissingNode { kind: "residue" })?;
        if residue.atom_id_by_name(new_name).is_some() {
            return Err(IntegrityError::DuplicateAtom {
                residue: residue.qualified_name(),
                name: new_name.to_string(),
            });
        }
        residue.rename_atom(&old_name, new_name, atom_id);
        if let Some(atom) = self.atoms.get_mut(atom_id) {
            atom.name = new_name.to_string();
        }
        Ok(())
    }

    /// Qualified atom name `chain.residue.atom`, used in diagnostics.
    pub fn atom_label(&self, atom_id: AtomId) -> String {
        let Some(atom) = self.atoms.get(atom_id) else {
            return "<invalid atom>".to_string();
        };
        let Some(residue) = self.residues.get(atom.residue_id) else {
            return atom.name.clone();
        };
        let chain_name = self
            .chains
            .get(residue.chain_id)
            .map(|c| c.name.as_str())
            .unwrap_or("?");
        format!("{}.{}.{}", chain_name, residue.qualified_name(), atom.name)
    }
}
