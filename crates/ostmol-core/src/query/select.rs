use super::ast::Expr;
use super::error::QueryError;
use super::eval::{Scope, Tri, WithinTargets, evaluate};
use super::{Query, QueryFlags};
use crate::core::models::entity::EntityData;
use crate::core::models::ids::{AtomId, BondId, ResidueId};
use crate::engine::visitor::Tree;
use std::collections::{HashMap, HashSet};
use tracing::{debug, instrument};

/// Membership produced by a selection, in the order of its source.
#[derive(Debug, Clone, Default)]
pub(crate) struct Selection {
    pub tree: Tree,
    pub bonds: Vec<BondId>,
}

/// Selects the atoms of `source` that match `query`.
///
/// Chains and residues are pruned as soon as the query rejects them, atoms are
/// evaluated last. Residues and chains without selected atoms are dropped.
#[instrument(level = "debug", skip_all, fields(query = %query.text()))]
pub(crate) fn select(
    data: &EntityData,
    source: &Tree,
    source_bonds: &[BondId],
    query: &Query,
    flags: QueryFlags,
) -> Result<Selection, QueryError> {
    let parsed = query.checked()?;
    let expr = parsed.expr.as_ref();
    let targets = match expr {
        Some(expr) => resolve_targets(expr, parsed.within_slots, data, source),
        None => WithinTargets::new(),
    };
    let tree = matching(data, source, expr, &targets, flags.contains(QueryFlags::MATCH_RESIDUES));

    let bonds = if flags.contains(QueryFlags::NO_BONDS) {
        Vec::new()
    } else {
        let selected: HashSet<AtomId> = tree
            .iter()
            .flat_map(|(_, residues)| residues.iter().flat_map(|(_, atoms)| atoms.iter().copied()))
            .collect();
        let exclusive = flags.contains(QueryFlags::EXCLUSIVE_BONDS);
        source_bonds
            .iter()
            .copied()
            .filter(|&b| {
                data.bond(b).is_some_and(|bond| {
                    let (first, second) = (selected.contains(&bond.first), selected.contains(&bond.second));
                    if exclusive { first && second } else { first || second }
                })
            })
            .collect()
    };

    debug!(
        chains = tree.len(),
        bonds = bonds.len(),
        "Selection finished."
    );
    Ok(Selection { tree, bonds })
}

/// Resolves the target atoms of every `within` clause against `source`.
pub(crate) fn resolve_targets(expr: &Expr, slots: usize, data: &EntityData, source: &Tree) -> WithinTargets {
    let mut targets = vec![Vec::new(); slots];
    resolve(expr, data, source, &mut targets);
    targets
}

fn resolve(expr: &Expr, data: &EntityData, source: &Tree, targets: &mut WithinTargets) {
    match expr {
        Expr::And(a, b) | Expr::Or(a, b) => {
            resolve(a, data, source, targets);
            resolve(b, data, source, targets);
        }
        Expr::Not(e) => resolve(e, data, source, targets),
        Expr::Within { target, slot, .. } => {
            resolve(target, data, source, targets);
            let positions = matching(data, source, Some(target), targets, false)
                .iter()
                .flat_map(|(_, residues)| residues.iter().flat_map(|(_, atoms)| atoms.iter().copied()))
                .filter_map(|a| data.atom_position(a))
                .collect();
            if let Some(entry) = targets.get_mut(*slot) {
                *entry = positions;
            }
        }
        Expr::Compare(_) => {}
    }
}

fn matching(
    data: &EntityData,
    source: &Tree,
    expr: Option<&Expr>,
    targets: &WithinTargets,
    whole_residues: bool,
) -> Tree {
    let decide = |scope: &Scope<'_>| expr.map_or(Tri::True, |e| evaluate(e, scope, targets));
    let mut selected: Tree = Vec::new();
    for (chain_id, residues) in source {
        let Some(chain) = data.chain(*chain_id) else {
            continue;
        };
        if !decide(&Scope::chain(chain)).is_possible() {
            continue;
        }
        let index: HashMap<ResidueId, usize> = chain
            .residues()
            .iter()
            .enumerate()
            .map(|(i, &r)| (r, i))
            .collect();

        let mut kept = Vec::new();
        for (residue_id, atoms) in residues {
            let (Some(residue), Some(&i)) = (data.residue(*residue_id), index.get(residue_id)) else {
                continue;
            };
            if !decide(&Scope::residue(chain, residue, i)).is_possible() {
                continue;
            }
            let hits: Vec<AtomId> = atoms
                .iter()
                .copied()
                .filter(|&a| {
                    data.atom(a)
                        .is_some_and(|atom| decide(&Scope::atom(chain, residue, i, atom)) == Tri::True)
                })
                .collect();
            if hits.is_empty() {
                continue;
            }
            let hits = if whole_residues {
                atoms.iter().copied().filter(|&a| data.atom(a).is_some()).collect()
            } else {
                hits
            };
            kept.push((*residue_id, hits));
        }
        if !kept.is_empty() {
            selected.push((*chain_id, kept));
        }
    }
    selected
}
