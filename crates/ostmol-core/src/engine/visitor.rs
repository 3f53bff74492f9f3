use super::entity::EntityHandle;
use super::handle::{AtomHandle, BondHandle, ChainHandle, ResidueHandle, TorsionHandle};
use crate::core::models::entity::EntityData;
use crate::core::models::ids::{AtomId, BondId, ChainId, ResidueId, TorsionId};

/// Chains with their residues and atoms, as snapshotted for a walk.
pub(crate) type Tree = Vec<(ChainId, Vec<(ResidueId, Vec<AtomId>)>)>;

/// The whole hierarchy of an entity in entity order.
pub(crate) fn full_tree(data: &EntityData) -> Tree {
    data.chain_ids()
        .iter()
        .filter_map(|&c| {
            let residues: Vec<(ResidueId, Vec<AtomId>)> = data
                .chain(c)?
                .residues()
                .iter()
                .filter_map(|&r| Some((r, data.residue(r)?.atoms().to_vec())))
                .collect();
            Some((c, residues))
        })
        .collect()
}

/// Callbacks for a depth-first walk over an entity or a view.
///
/// Chains are visited in order, each followed by its residues and their
/// atoms; bonds and torsions follow the hierarchy. `visit_chain` and
/// `visit_residue` return whether to descend into the node's children. The
/// leaf callbacks return whether to keep visiting nodes of the same kind.
/// Chains and residues are still visited after `visit_atom` returns false.
///
/// The membership is captured before the first callback, and no storage
/// borrow is held while callbacks run, so visitors may freely read through
/// the handles they receive.
pub trait EntityVisitor {
    fn visit_chain(&mut self, _chain: &ChainHandle) -> bool {
        true
    }

    fn visit_residue(&mut self, _residue: &ResidueHandle) -> bool {
        true
    }

    fn visit_atom(&mut self, _atom: &AtomHandle) -> bool {
        true
    }

    fn visit_bond(&mut self, _bond: &BondHandle) -> bool {
        true
    }

    fn visit_torsion(&mut self, _torsion: &TorsionHandle) -> bool {
        true
    }
}

pub(crate) fn walk<V: EntityVisitor + ?Sized>(
    entity: &EntityHandle,
    tree: &Tree,
    bonds: &[BondId],
    torsions: &[TorsionId],
    visitor: &mut V,
) {
    let mut atoms_open = true;
    for (chain_id, residues) in tree {
        if !visitor.visit_chain(&ChainHandle::new(entity.clone(), *chain_id)) {
            continue;
        }
        for (residue_id, atoms) in residues {
            if !visitor.visit_residue(&ResidueHandle::new(entity.clone(), *residue_id)) || !atoms_open {
                continue;
            }
            for &atom_id in atoms {
                if !visitor.visit_atom(&AtomHandle::new(entity.clone(), atom_id)) {
                    atoms_open = false;
                    break;
                }
            }
        }
    }

    for &bond_id in bonds {
        if !visitor.visit_bond(&BondHandle::new(entity.clone(), bond_id)) {
            break;
        }
    }
    for &torsion_id in torsions {
        if !visitor.visit_torsion(&TorsionHandle::new(entity.clone(), torsion_id)) {
            break;
        }
    }
}
