use super::error::EntityError;
use crate::core::models::entity::EntityData;
use crate::core::models::ids::{AtomId, BondId, TorsionId};
use crate::core::utils::geometry;
use nalgebra::{Point3, Vector3};
use slotmap::SecondaryMap;
use std::collections::HashSet;
use tracing::{debug, instrument, trace};

/// How many ancestors of the parent atom are tried as angle/dihedral references
/// before falling back to the fragment axes.
const MAX_ANCESTOR_REFERENCES: usize = 3;

/// Ring closures whose reconstructed length drifts further than this are logged.
const RING_CLOSURE_TOLERANCE: f64 = 1e-3;

/// Which coordinate representation, if any, is stale.
///
/// Both representations can never be stale at the same time: every
/// transition into one dirty state first resolves the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordState {
    #[default]
    Clean,
    /// Cartesian positions are stale; internal coordinates are authoritative.
    XcsDirty,
    /// Internal coordinates are stale; Cartesian positions are authoritative.
    IcsDirty,
}

/// A fixed direction of a fragment frame, anchored at the fragment origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    fn unit(self) -> Vector3<f64> {
        match self {
            Axis::X => Vector3::x(),
            Axis::Y => Vector3::y(),
            Axis::Z => Vector3::z(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reference {
    Atom(AtomId),
    Axis(Axis),
}

/// Z-matrix row of one non-root atom.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IcsEntry {
    pub fragment: usize,
    pub parent: AtomId,
    pub angle_ref: Reference,
    pub dihedral_ref: Reference,
    pub length: f64,
    pub angle: f64,
    pub dihedral: f64,
}

/// One connected component of the bond graph.
#[derive(Debug, Clone)]
pub(crate) struct Fragment {
    pub root: AtomId,
    pub origin: Point3<f64>,
    /// Atoms in depth-first preorder; the root comes first.
    pub order: Vec<AtomId>,
}

/// A bond excluded from the spanning tree because it closes a cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RingClosure {
    pub bond: BondId,
    pub length: f64,
}

/// The internal coordinate cache of an entity.
#[derive(Debug, Clone, Default)]
pub(crate) struct InternalCoords {
    fragments: Vec<Fragment>,
    entries: SecondaryMap<AtomId, IcsEntry>,
    children: SecondaryMap<AtomId, Vec<AtomId>>,
    tree_bonds: SecondaryMap<AtomId, BondId>,
    ring_closures: Vec<RingClosure>,
    torsion_angles: SecondaryMap<TorsionId, f64>,
    torsions_valid: bool,
}

impl InternalCoords {
    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn entry(&self, atom_id: AtomId) -> Option<&IcsEntry> {
        self.entries.get(atom_id)
    }

    pub fn ring_closures(&self) -> &[RingClosure] {
        &self.ring_closures
    }

    pub fn is_ring_closure(&self, bond_id: BondId) -> bool {
        self.ring_closures.iter().any(|c| c.bond == bond_id)
    }

    fn parent(&self, atom_id: AtomId) -> Option<AtomId> {
        self.entries.get(atom_id).map(|e| e.parent)
    }

    fn children_of(&self, atom_id: AtomId) -> &[AtomId] {
        self.children.get(atom_id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn ancestors(&self, atom_id: AtomId, limit: usize) -> Vec<AtomId> {
        let mut out = Vec::with_capacity(limit);
        let mut current = atom_id;
        while out.len() < limit {
            match self.parent(current) {
                Some(parent) => {
                    out.push(parent);
                    current = parent;
                }
                None => break,
            }
        }
        out
    }

    /// The atom and all of its tree descendants, in preorder.
    fn subtree(&self, atom_id: AtomId) -> Vec<AtomId> {
        let mut out = Vec::new();
        let mut stack = vec![atom_id];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children_of(current).iter().rev().copied());
        }
        out
    }

    /// The tree edge `(parent, child)` realised by `bond`, if it is not a ring closure.
    fn tree_edge(&self, bond_id: BondId, a: AtomId, b: AtomId) -> Option<(AtomId, AtomId)> {
        if self.tree_bonds.get(b) == Some(&bond_id) {
            Some((a, b))
        } else if self.tree_bonds.get(a) == Some(&bond_id) {
            Some((b, a))
        } else {
            None
        }
    }

    fn resolve(&self, data: &EntityData, reference: Reference, origin: Point3<f64>) -> Point3<f64> {
        match reference {
            Reference::Atom(id) => data.atom_position(id).unwrap_or(origin),
            Reference::Axis(axis) => origin + axis.unit(),
        }
    }

    fn recompute_torsions(&mut self, data: &EntityData) {
        self.torsion_angles.clear();
        for &torsion_id in data.torsion_ids() {
            let Some(torsion) = data.torsion(torsion_id) else {
                continue;
            };
            let points: Option<Vec<Point3<f64>>> =
                torsion.atoms.iter().map(|&a| data.atom_position(a)).collect();
            if let Some(p) = points {
                self.torsion_angles
                    .insert(torsion_id, geometry::dihedral(&p[0], &p[1], &p[2], &p[3]));
            }
        }
        self.torsions_valid = true;
    }

    /// Derives the z-matrix row of `atom_id`, bonded to the already placed `parent`.
    fn compute_entry(
        &self,
        data: &EntityData,
        fragment: usize,
        origin: Point3<f64>,
        parent: AtomId,
        atom_id: AtomId,
    ) -> IcsEntry {
        let p = data.atom_position(parent).unwrap_or(origin);
        let q = data.atom_position(atom_id).unwrap_or(origin);

        let candidates: Vec<Reference> = self
            .ancestors(parent, MAX_ANCESTOR_REFERENCES)
            .into_iter()
            .map(Reference::Atom)
            .chain(Axis::ALL.into_iter().map(Reference::Axis))
            .collect();

        let angle_ref = candidates
            .iter()
            .copied()
            .find(|&c| (self.resolve(data, c, origin) - p).norm_squared() > geometry::DEGENERATE_EPSILON)
            .unwrap_or(Reference::Axis(Axis::X));
        let r = self.resolve(data, angle_ref, origin);

        let dihedral_ref = candidates
            .iter()
            .copied()
            .filter(|&c| c != angle_ref)
            .find(|&c| !geometry::is_collinear(&self.resolve(data, c, origin), &r, &p))
            .unwrap_or(Reference::Axis(Axis::Y));
        let s = self.resolve(data, dihedral_ref, origin);

        IcsEntry {
            fragment,
            parent,
            angle_ref,
            dihedral_ref,
            length: geometry::distance(&p, &q),
            angle: geometry::angle(&r, &p, &q),
            dihedral: geometry::dihedral(&s, &r, &p, &q),
        }
    }

    /// Builds the internal coordinates from the current Cartesian positions.
    ///
    /// Fragments are rooted at their first atom in entity order and explored
    /// depth-first, following each atom's bonds in creation order. A bond that
    /// reaches an already visited atom (other than the tree parent) closes a
    /// ring; it is kept out of the spanning tree and only its length is recorded.
    #[instrument(level = "debug", skip_all, fields(atoms = data.atom_count(), bonds = data.bond_count()))]
    fn build(data: &EntityData) -> Self {
        let mut ics = InternalCoords::default();
        let mut visited: HashSet<AtomId> = HashSet::new();
        let mut closures: HashSet<BondId> = HashSet::new();

        for root in data.atom_ids() {
            if visited.contains(&root) {
                continue;
            }
            let Some(origin) = data.atom_position(root) else {
                continue;
            };
            let fragment = ics.fragments.len();
            visited.insert(root);
            let mut order = vec![root];
            let mut stack: Vec<(AtomId, usize)> = vec![(root, 0)];

            while let Some(&(atom_id, cursor)) = stack.last() {
                let neighbors = data.neighbors(atom_id);
                let Some(&(bond_id, partner)) = neighbors.get(cursor) else {
                    stack.pop();
                    continue;
                };
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }

                if ics.tree_bonds.get(atom_id) == Some(&bond_id) {
                    continue;
                }
                if visited.contains(&partner) {
                    if closures.insert(bond_id) {
                        let length = match (data.atom_position(atom_id), data.atom_position(partner)) {
                            (Some(a), Some(b)) => geometry::distance(&a, &b),
                            _ => 0.0,
                        };
                        trace!(bond = ?bond_id, length, "Ring closure excluded from spanning tree.");
                        ics.ring_closures.push(RingClosure { bond: bond_id, length });
                    }
                    continue;
                }

                visited.insert(partner);
                let entry = ics.compute_entry(data, fragment, origin, atom_id, partner);
                ics.entries.insert(partner, entry);
                ics.tree_bonds.insert(partner, bond_id);
                match ics.children.get_mut(atom_id) {
                    Some(list) => list.push(partner),
                    None => {
                        ics.children.insert(atom_id, vec![partner]);
                    }
                }
                order.push(partner);
                stack.push((partner, 0));
            }

            if order.len() == 1 {
                trace!(atom = %data.atom_label(root), "Isolated atom contributes no internal coordinates.");
            }
            ics.fragments.push(Fragment { root, origin, order });
        }

        ics.recompute_torsions(data);
        debug!(
            fragments = ics.fragments.len(),
            ring_closures = ics.ring_closures.len(),
            "Internal coordinates rebuilt."
        );
        ics
    }

    /// Writes Cartesian positions derived from the internal coordinates.
    #[instrument(level = "debug", skip_all, fields(fragments = self.fragments.len()))]
    fn apply(&self, data: &mut EntityData) {
        for fragment in &self.fragments {
            if let Some(root) = data.atom_mut(fragment.root) {
                root.position = fragment.origin;
            }
            for &atom_id in fragment.order.iter().skip(1) {
                let Some(entry) = self.entries.get(atom_id) else {
                    continue;
                };
                let p = data.atom_position(entry.parent).unwrap_or(fragment.origin);
                let r = self.resolve(data, entry.angle_ref, fragment.origin);
                let s = self.resolve(data, entry.dihedral_ref, fragment.origin);
                let placed = geometry::place_atom(&s, &r, &p, entry.length, entry.angle, entry.dihedral);
                if let Some(atom) = data.atom_mut(atom_id) {
                    atom.position = placed;
                }
            }
        }

        for closure in &self.ring_closures {
            let Some(bond) = data.bond(closure.bond) else {
                continue;
            };
            if let (Some(a), Some(b)) = (data.atom_position(bond.first), data.atom_position(bond.second)) {
                let drift = (geometry::distance(&a, &b) - closure.length).abs();
                if drift > RING_CLOSURE_TOLERANCE {
                    debug!(
                        bond = %format!("{}-{}", data.atom_label(bond.first), data.atom_label(bond.second)),
                        drift,
                        "Ring closure length drifted after reconstruction."
                    );
                }
            }
        }
    }

    /// Whether rotating the subtree of `moving_root` about `pivot -> moving_root`
    /// can be expressed by adding to the dihedrals of its direct children.
    fn rotation_is_local(&self, pivot: AtomId, moving_root: AtomId, moving: &HashSet<AtomId>) -> bool {
        let children = self.children_of(moving_root);
        let children_ok = children.iter().all(|&c| {
            self.entries
                .get(c)
                .is_some_and(|e| e.angle_ref == Reference::Atom(pivot))
        });
        if !children_ok {
            return false;
        }
        let rigid = |r: Reference| match r {
            Reference::Atom(id) => id == pivot || moving.contains(&id),
            Reference::Axis(_) => false,
        };
        moving
            .iter()
            .filter(|&&id| id != moving_root && !children.contains(&id))
            .all(|&id| {
                self.entries
                    .get(id)
                    .is_some_and(|e| rigid(e.angle_ref) && rigid(e.dihedral_ref))
            })
    }
}

/// Keeps Cartesian and internal coordinates of one entity consistent.
///
/// Cartesian positions live in the entity storage; this engine owns the
/// internal coordinate cache and the dirty state. Every method that takes the
/// storage by `&mut` may resolve a stale Cartesian representation as a side
/// effect.
#[derive(Debug, Clone, Default)]
pub(crate) struct CoordEngine {
    state: CoordState,
    ics: InternalCoords,
}

impl CoordEngine {
    pub fn state(&self) -> CoordState {
        self.state
    }

    pub fn internal_coords(&self) -> &InternalCoords {
        &self.ics
    }

    /// Brings Cartesian positions up to date.
    pub fn ensure_xcs(&mut self, data: &mut EntityData) {
        if self.state == CoordState::XcsDirty {
            self.ics.apply(data);
            self.state = CoordState::Clean;
        }
    }

    /// Brings internal coordinates up to date.
    pub fn ensure_ics(&mut self, data: &EntityData) {
        if self.state == CoordState::IcsDirty {
            self.ics = InternalCoords::build(data);
            self.state = CoordState::Clean;
        }
    }

    /// Must be called before Cartesian positions or topology are modified.
    pub fn mark_ics_dirty(&mut self, data: &mut EntityData) {
        self.ensure_xcs(data);
        self.state = CoordState::IcsDirty;
    }

    /// Must be called before internal coordinates are modified.
    pub fn mark_xcs_dirty(&mut self, data: &EntityData) {
        self.ensure_ics(data);
        self.state = CoordState::XcsDirty;
    }

    pub fn rebuild_ics(&mut self, data: &mut EntityData) {
        self.ensure_xcs(data);
        self.ics = InternalCoords::build(data);
        self.state = CoordState::Clean;
    }

    pub fn rebuild_xcs(&mut self, data: &mut EntityData) {
        self.ensure_ics(data);
        self.ics.apply(data);
        self.state = CoordState::Clean;
    }

    pub fn torsion_angle(&mut self, data: &mut EntityData, torsion_id: TorsionId) -> Result<f64, EntityError> {
        let atoms = data
            .torsion(torsion_id)
            .ok_or(EntityError::InvalidHandle { kind: "torsion" })?
            .atoms;
        check_connected(data, &atoms)?;
        self.ensure_ics(data);
        if !self.ics.torsions_valid {
            self.ensure_xcs(data);
            self.ics.recompute_torsions(data);
        }
        if let Some(&angle) = self.ics.torsion_angles.get(torsion_id) {
            return Ok(angle);
        }
        self.ensure_xcs(data);
        let p: Vec<Point3<f64>> = atoms
            .iter()
            .map(|&a| data.atom_position(a).ok_or(EntityError::InvalidHandle { kind: "atom" }))
            .collect::<Result<_, _>>()?;
        Ok(geometry::dihedral(&p[0], &p[1], &p[2], &p[3]))
    }

    /// Rotates the part of the molecule on the far side of the torsion's
    /// central bond (seen from the fragment root) by `delta` radians.
    ///
    /// # Return
    ///
    /// The atoms whose Cartesian positions change.
    pub fn rotate_torsion(
        &mut self,
        data: &mut EntityData,
        torsion_id: TorsionId,
        delta: f64,
    ) -> Result<Vec<AtomId>, EntityError> {
        let torsion = data
            .torsion(torsion_id)
            .ok_or(EntityError::InvalidHandle { kind: "torsion" })?
            .clone();
        check_connected(data, &torsion.atoms)?;
        if !delta.is_finite() {
            return Err(EntityError::violation(format!(
                "rotation of torsion '{}' by a non-finite angle",
                torsion.name
            )));
        }
        self.ensure_ics(data);

        let (b, c) = torsion.central();
        let bond_id = data
            .bond_between(b, c)
            .ok_or(EntityError::NotConnected { first: b, second: c })?;
        if self.ics.is_ring_closure(bond_id) {
            return Err(EntityError::violation(format!(
                "central bond of torsion '{}' closes a ring and cannot be rotated",
                torsion.name
            )));
        }
        let (pivot, moving_root) = self.ics.tree_edge(bond_id, b, c).ok_or_else(|| {
            EntityError::violation(format!(
                "central bond of torsion '{}' is not part of the internal coordinates",
                torsion.name
            ))
        })?;

        let subtree = self.ics.subtree(moving_root);
        let moving: HashSet<AtomId> = subtree.iter().copied().collect();
        let crosses_ring = self.ics.ring_closures.iter().any(|closure| {
            data.bond(closure.bond)
                .is_some_and(|bond| moving.contains(&bond.first) != moving.contains(&bond.second))
        });
        if crosses_ring {
            return Err(EntityError::violation(format!(
                "torsion '{}' lies in a ring and cannot be rotated",
                torsion.name
            )));
        }

        let moved: Vec<AtomId> = subtree.into_iter().filter(|&a| a != moving_root).collect();
        if delta == 0.0 {
            return Ok(Vec::new());
        }

        if self.ics.rotation_is_local(pivot, moving_root, &moving) {
            let children = self.ics.children_of(moving_root).to_vec();
            for child in children {
                if let Some(entry) = self.ics.entries.get_mut(child) {
                    entry.dihedral = geometry::normalize_angle(entry.dihedral + delta);
                }
            }
            if self.ics.torsions_valid {
                for around in data.torsions_around(pivot, moving_root) {
                    if let Some(angle) = self.ics.torsion_angles.get_mut(around) {
                        *angle = geometry::normalize_angle(*angle + delta);
                    }
                }
            }
            self.state = CoordState::XcsDirty;
            trace!(torsion = %torsion.name, delta, "Torsion rotated in internal coordinates.");
        } else {
            self.ensure_xcs(data);
            let (Some(from), Some(to)) = (data.atom_position(pivot), data.atom_position(moving_root)) else {
                return Err(EntityError::InvalidHandle { kind: "atom" });
            };
            let rotation = geometry::rotation_about(&from, &to, delta).ok_or_else(|| {
                EntityError::violation(format!(
                    "central bond of torsion '{}' has zero length",
                    torsion.name
                ))
            })?;
            for &atom_id in &moved {
                if let Some(atom) = data.atom_mut(atom_id) {
                    atom.position = to + rotation * (atom.position - to);
                }
            }
            self.ics = InternalCoords::build(data);
            self.state = CoordState::Clean;
            debug!(torsion = %torsion.name, delta, "Torsion rotated in Cartesian space.");
        }
        Ok(moved)
    }

    pub fn set_torsion_angle(
        &mut self,
        data: &mut EntityData,
        torsion_id: TorsionId,
        angle: f64,
    ) -> Result<Vec<AtomId>, EntityError> {
        let current = self.torsion_angle(data, torsion_id)?;
        let delta = geometry::normalize_angle(angle - current);
        self.rotate_torsion(data, torsion_id, delta)
    }

    /// Changes the length of the bond `a-b`, keeping all other internal coordinates.
    pub fn set_bond_length(
        &mut self,
        data: &mut EntityData,
        a: AtomId,
        b: AtomId,
        length: f64,
    ) -> Result<Vec<AtomId>, EntityError> {
        let bond_id = data
            .bond_between(a, b)
            .ok_or(EntityError::NotConnected { first: a, second: b })?;
        if !length.is_finite() || length < 0.0 {
            return Err(EntityError::violation(format!("invalid bond length {}", length)));
        }
        self.ensure_ics(data);
        if self.ics.is_ring_closure(bond_id) {
            return Err(EntityError::violation(format!(
                "bond {}-{} closes a ring and has no internal coordinate",
                data.atom_label(a),
                data.atom_label(b)
            )));
        }
        let (_, child) = self.ics.tree_edge(bond_id, a, b).ok_or_else(|| {
            EntityError::violation(format!(
                "bond {}-{} is not part of the internal coordinates",
                data.atom_label(a),
                data.atom_label(b)
            ))
        })?;
        if let Some(entry) = self.ics.entries.get_mut(child) {
            entry.length = length;
        }
        self.ics.torsions_valid = false;
        self.state = CoordState::XcsDirty;
        Ok(self.ics.subtree(child))
    }

    /// Changes the angle `a-b-c` at `b` when it is one of the stored internal coordinates.
    pub fn set_bond_angle(
        &mut self,
        data: &mut EntityData,
        a: AtomId,
        b: AtomId,
        c: AtomId,
        angle: f64,
    ) -> Result<Vec<AtomId>, EntityError> {
        for (x, y) in [(a, b), (b, c)] {
            if data.bond_between(x, y).is_none() {
                return Err(EntityError::NotConnected { first: x, second: y });
            }
        }
        if !angle.is_finite() {
            return Err(EntityError::violation("bond angle must be finite"));
        }
        self.ensure_ics(data);
        let is_row = |atom: AtomId, reference: AtomId| {
            self.ics
                .entries
                .get(atom)
                .is_some_and(|e| e.parent == b && e.angle_ref == Reference::Atom(reference))
        };
        let target = if is_row(c, a) {
            c
        } else if is_row(a, c) {
            a
        } else {
            return Err(EntityError::violation(format!(
                "angle {}-{}-{} is not an internal coordinate",
                data.atom_label(a),
                data.atom_label(b),
                data.atom_label(c)
            )));
        };
        if let Some(entry) = self.ics.entries.get_mut(target) {
            entry.angle = angle;
        }
        self.ics.torsions_valid = false;
        self.state = CoordState::XcsDirty;
        Ok(self.ics.subtree(target))
    }
}

/// Verifies that consecutive torsion atoms are bonded.
pub(crate) fn check_connected(data: &EntityData, atoms: &[AtomId; 4]) -> Result<(), EntityError> {
    for pair in atoms.windows(2) {
        if data.bond_between(pair[0], pair[1]).is_none() {
            return Err(EntityError::NotConnected {
                first: pair[0],
                second: pair[1],
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::topology::BondOrder;
    use std::f64::consts::PI;

    fn assert_close(a: f64, b: f64, tol: f64) {
        assert!((a - b).abs() < tol, "{} != {}", a, b);
    }

    fn build(positions: &[[f64; 3]], bonds: &[(usize, usize)]) -> (EntityData, Vec<AtomId>) {
        let mut data = EntityData::new("test");
        let chain = data.add_chain("A").unwrap();
        let residue = data.append_residue(chain, "UNK", None).unwrap();
        let atoms: Vec<AtomId> = positions
            .iter()
            .enumerate()
            .map(|(i, p)| {
                data.add_atom(residue, &format!("X{}", i), "C", Point3::new(p[0], p[1], p[2]))
                    .unwrap()
            })
            .collect();
        for &(i, j) in bonds {
            data.add_bond(atoms[i], atoms[j], BondOrder::Single).unwrap();
        }
        (data, atoms)
    }

    fn dirty_engine(data: &mut EntityData) -> CoordEngine {
        let mut engine = CoordEngine::default();
        engine.mark_ics_dirty(data);
        engine
    }

    fn butane() -> (EntityData, Vec<AtomId>, TorsionId) {
        let (mut data, atoms) = build(
            &[[0.0, 1.2, 0.3], [0.0, 0.0, 0.0], [1.5, 0.0, 0.0], [1.9, 1.1, -0.8]],
            &[(0, 1), (1, 2), (2, 3)],
        );
        let torsion = data
            .add_torsion("chi", [atoms[0], atoms[1], atoms[2], atoms[3]])
            .unwrap();
        (data, atoms, torsion)
    }

    mod state_machine {
        use super::*;

        #[test]
        fn marking_one_side_dirty_resolves_the_other() {
            let (mut data, _, torsion) = butane();
            let mut engine = dirty_engine(&mut data);
            assert_eq!(engine.state(), CoordState::IcsDirty);

            engine.rotate_torsion(&mut data, torsion, 0.5).unwrap();
            assert_eq!(engine.state(), CoordState::XcsDirty);

            engine.mark_ics_dirty(&mut data);
            assert_eq!(engine.state(), CoordState::IcsDirty);

            engine.mark_xcs_dirty(&data);
            assert_eq!(engine.state(), CoordState::XcsDirty);

            engine.ensure_xcs(&mut data);
            assert_eq!(engine.state(), CoordState::Clean);
        }

        #[test]
        fn repeated_resolution_does_not_drift() {
            let (mut data, atoms, torsion) = butane();
            let mut engine = dirty_engine(&mut data);
            engine.rotate_torsion(&mut data, torsion, 1.0).unwrap();
            engine.ensure_xcs(&mut data);
            let first = data.atom_position(atoms[3]).unwrap();
            for _ in 0..10 {
                engine.rebuild_ics(&mut data);
                engine.rebuild_xcs(&mut data);
            }
            let last = data.atom_position(atoms[3]).unwrap();
            assert!((first - last).norm() < 1e-9);
        }
    }

    mod reconstruction {
        use super::*;

        #[test]
        fn branched_tree_round_trips_exactly() {
            let positions = [
                [0.1, 0.2, -0.3],
                [1.4, 0.5, 0.1],
                [2.2, -0.6, 0.7],
                [1.9, 1.8, -0.4],
                [3.6, -0.4, 0.2],
                [2.5, 2.9, 0.3],
            ];
            let (mut data, atoms) = build(&positions, &[(0, 1), (1, 2), (1, 3), (2, 4), (3, 5)]);
            let mut engine = dirty_engine(&mut data);
            engine.rebuild_ics(&mut data);

            for &a in &atoms {
                data.atom_mut(a).unwrap().position = Point3::origin();
            }
            engine.ics.apply(&mut data);

            for (i, p) in positions.iter().enumerate() {
                let pos = data.atom_position(atoms[i]).unwrap();
                assert!((pos - Point3::new(p[0], p[1], p[2])).norm() < 1e-9);
            }
        }

        #[test]
        fn collinear_backbone_uses_non_degenerate_references() {
            let (mut data, atoms) = build(
                &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0], [3.0, 0.0, 0.0], [3.5, 0.8, 0.4]],
                &[(0, 1), (1, 2), (2, 3), (3, 4)],
            );
            let mut engine = dirty_engine(&mut data);
            engine.rebuild_ics(&mut data);
            let entry = engine.internal_coords().entry(atoms[4]).unwrap();
            assert!(matches!(entry.dihedral_ref, Reference::Axis(_)));

            engine.rebuild_xcs(&mut data);
            let pos = data.atom_position(atoms[4]).unwrap();
            assert!((pos - Point3::new(3.5, 0.8, 0.4)).norm() < 1e-9);
        }

        #[test]
        fn disconnected_fragments_and_isolated_atoms_are_roots() {
            let (mut data, atoms) = build(
                &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [5.0, 5.0, 5.0], [9.0, 0.0, 0.0], [9.0, 1.0, 0.0]],
                &[(0, 1), (3, 4)],
            );
            let mut engine = dirty_engine(&mut data);
            engine.rebuild_ics(&mut data);
            let roots: Vec<AtomId> = engine
                .internal_coords()
                .fragments()
                .iter()
                .map(|f| f.root)
                .collect();
            assert_eq!(roots, vec![atoms[0], atoms[2], atoms[3]]);
            assert!(engine.internal_coords().entry(atoms[2]).is_none());
        }

        #[test]
        fn four_ring_closes_on_last_bond() {
            let (mut data, atoms) = build(
                &[[0.0, 0.0, 0.0], [1.5, 0.0, 0.0], [1.5, 1.5, 0.0], [0.0, 1.5, 0.0]],
                &[(0, 1), (1, 2), (2, 3), (3, 0)],
            );
            let closing = data.bond_between(atoms[3], atoms[0]).unwrap();
            let mut engine = dirty_engine(&mut data);
            engine.rebuild_ics(&mut data);

            let closures = engine.internal_coords().ring_closures();
            assert_eq!(closures.len(), 1);
            assert_eq!(closures[0].bond, closing);
            assert!(engine.internal_coords().is_ring_closure(closing));
            let first = data.bond_between(atoms[0], atoms[1]).unwrap();
            assert!(!engine.internal_coords().is_ring_closure(first));
            assert_close(closures[0].length, 1.5, 1e-12);

            engine.rebuild_xcs(&mut data);
            let expected = [[0.0, 0.0, 0.0], [1.5, 0.0, 0.0], [1.5, 1.5, 0.0], [0.0, 1.5, 0.0]];
            for (i, p) in expected.iter().enumerate() {
                let pos = data.atom_position(atoms[i]).unwrap();
                assert!((pos - Point3::new(p[0], p[1], p[2])).norm() < 1e-9);
            }
        }
    }

    mod editing {
        use super::*;

        #[test]
        fn set_torsion_angle_moves_only_the_far_side() {
            let (mut data, atoms, torsion) = butane();
            let before: Vec<Point3<f64>> = atoms.iter().map(|&a| data.atom_position(a).unwrap()).collect();
            let mut engine = dirty_engine(&mut data);

            let moved = engine.set_torsion_angle(&mut data, torsion, 2.0).unwrap();
            assert_eq!(moved, vec![atoms[3]]);
            assert_close(engine.torsion_angle(&mut data, torsion).unwrap(), 2.0, 1e-12);

            engine.ensure_xcs(&mut data);
            let after: Vec<Point3<f64>> = atoms.iter().map(|&a| data.atom_position(a).unwrap()).collect();
            for i in 0..3 {
                assert!((before[i] - after[i]).norm() < 1e-9);
            }
            assert_close(geometry::distance(&after[2], &after[3]), geometry::distance(&before[2], &before[3]), 1e-9);
            assert_close(geometry::dihedral(&after[0], &after[1], &after[2], &after[3]), 2.0, 1e-9);
        }

        #[test]
        fn set_torsion_angle_wraps_across_pi() {
            let (mut data, _, torsion) = butane();
            let mut engine = dirty_engine(&mut data);
            engine.set_torsion_angle(&mut data, torsion, PI - 0.1).unwrap();
            engine.rotate_torsion(&mut data, torsion, 0.3).unwrap();
            assert_close(engine.torsion_angle(&mut data, torsion).unwrap(), -PI + 0.2, 1e-12);
        }

        #[test]
        fn rotation_falls_back_to_cartesian_when_references_are_fixed() {
            let (mut data, atoms) = build(
                &[[0.0, 1.0, 0.0], [0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0], [2.5, 0.0, 0.9]],
                &[(0, 1), (1, 2), (2, 3), (3, 4)],
            );
            let torsion = data
                .add_torsion("t", [atoms[0], atoms[1], atoms[2], atoms[3]])
                .unwrap();
            let mut engine = dirty_engine(&mut data);
            let moved = engine.rotate_torsion(&mut data, torsion, PI / 2.0).unwrap();
            assert_eq!(moved, vec![atoms[3], atoms[4]]);
            assert_eq!(engine.state(), CoordState::Clean);

            let e = data.atom_position(atoms[4]).unwrap();
            assert!((e - Point3::new(2.5, -0.9, 0.0)).norm() < 1e-9);
            let d = data.atom_position(atoms[3]).unwrap();
            assert!((d - Point3::new(2.0, 0.0, 0.0)).norm() < 1e-9);
        }

        #[test]
        fn set_bond_length_translates_the_subtree() {
            let (mut data, atoms, _) = butane();
            let mut engine = dirty_engine(&mut data);
            let moved = engine.set_bond_length(&mut data, atoms[1], atoms[2], 2.5).unwrap();
            assert_eq!(moved, vec![atoms[2], atoms[3]]);
            engine.ensure_xcs(&mut data);
            let b = data.atom_position(atoms[1]).unwrap();
            let c = data.atom_position(atoms[2]).unwrap();
            let d = data.atom_position(atoms[3]).unwrap();
            assert_close(geometry::distance(&b, &c), 2.5, 1e-9);
            assert!((c - Point3::new(2.5, 0.0, 0.0)).norm() < 1e-9);
            assert!((d - Point3::new(2.9, 1.1, -0.8)).norm() < 1e-9);
        }

        #[test]
        fn set_bond_angle_updates_stored_angle() {
            let (mut data, atoms, _) = butane();
            let mut engine = dirty_engine(&mut data);
            engine
                .set_bond_angle(&mut data, atoms[1], atoms[2], atoms[3], 1.9)
                .unwrap();
            engine.ensure_xcs(&mut data);
            let p: Vec<Point3<f64>> = atoms.iter().map(|&a| data.atom_position(a).unwrap()).collect();
            assert_close(geometry::angle(&p[1], &p[2], &p[3]), 1.9, 1e-9);

            let err = engine
                .set_bond_angle(&mut data, atoms[0], atoms[2], atoms[3], 1.0)
                .unwrap_err();
            assert!(matches!(err, EntityError::NotConnected { .. }));
        }

        #[test]
        fn ring_bonds_cannot_be_rotated_or_stretched() {
            let (mut data, atoms) = build(
                &[[0.0, 0.0, 0.0], [1.5, 0.0, 0.0], [1.5, 1.5, 0.0], [0.0, 1.5, 0.0]],
                &[(0, 1), (1, 2), (2, 3), (3, 0)],
            );
            let inner = data
                .add_torsion("inner", [atoms[0], atoms[1], atoms[2], atoms[3]])
                .unwrap();
            let across = data
                .add_torsion("across", [atoms[2], atoms[3], atoms[0], atoms[1]])
                .unwrap();
            let mut engine = dirty_engine(&mut data);

            assert!(matches!(
                engine.rotate_torsion(&mut data, inner, 0.2),
                Err(EntityError::Integrity(_))
            ));
            assert!(matches!(
                engine.rotate_torsion(&mut data, across, 0.2),
                Err(EntityError::Integrity(_))
            ));
            assert!(matches!(
                engine.set_bond_length(&mut data, atoms[3], atoms[0], 1.0),
                Err(EntityError::Integrity(_))
            ));
            assert!(matches!(
                engine.set_bond_length(&mut data, atoms[0], atoms[2], 1.0),
                Err(EntityError::NotConnected { .. })
            ));
        }
    }
}
