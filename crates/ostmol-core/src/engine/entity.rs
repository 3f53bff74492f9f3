use super::coords::{CoordEngine, CoordState};
use super::editor::{EditMode, IcsEditor, XcsEditor};
use super::error::EntityError;
use super::handle::{AtomHandle, BondHandle, ChainHandle, PropertyOwner, ResidueHandle, TorsionHandle};
use super::signals::{EntitySignals, PropertyTarget};
use super::view::EntityView;
use super::visitor::{self, EntityVisitor};
use crate::core::models::entity::EntityData;
use crate::core::models::props::GenericPropContainer;
use crate::core::models::residue::ResNum;
use crate::core::utils::geometry;
use crate::query::{Query, QueryFlags};
use nalgebra::Point3;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

/// Storage and coordinate engine, borrowed together.
#[derive(Debug, Clone)]
pub(crate) struct EntityCell {
    pub data: EntityData,
    pub coords: CoordEngine,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct EditorLock {
    buffered: bool,
    unbuffered: usize,
}

#[derive(Debug)]
pub(crate) struct EntityShared {
    cell: RefCell<EntityCell>,
    signals: EntitySignals,
    lock: Cell<EditorLock>,
}

/// A shared reference to a molecular entity.
///
/// Cloning a handle is cheap and yields another reference to the same
/// structure; the storage lives as long as any handle, node handle or view
/// refers to it. Reads go through the handle, mutations through the editors
/// returned by [`edit_xcs`](Self::edit_xcs) and [`edit_ics`](Self::edit_ics).
///
/// Entities are single-threaded: a handle is neither `Send` nor `Sync`, and
/// callers that share an entity across threads must provide their own
/// synchronisation, with a single writer at a time and no readers while a
/// buffered editor is open.
#[derive(Clone)]
pub struct EntityHandle {
    shared: Rc<EntityShared>,
}

/// A non-owning reference to an entity.
#[derive(Clone, Debug)]
pub struct WeakEntityHandle {
    shared: Weak<EntityShared>,
}

impl WeakEntityHandle {
    pub fn upgrade(&self) -> Option<EntityHandle> {
        self.shared.upgrade().map(|shared| EntityHandle { shared })
    }
}

impl PartialEq for EntityHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for EntityHandle {}

impl Hash for EntityHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Rc::as_ptr(&self.shared), state);
    }
}

impl fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shared.cell.try_borrow() {
            Ok(cell) => f
                .debug_struct("EntityHandle")
                .field("name", &cell.data.name)
                .field("chains", &cell.data.chain_count())
                .field("atoms", &cell.data.atom_count())
                .field("coords", &cell.coords.state())
                .finish(),
            Err(_) => f.debug_struct("EntityHandle").finish_non_exhaustive(),
        }
    }
}

impl EntityHandle {
    /// Creates a new, empty entity.
    pub fn create(name: &str) -> Self {
        Self::from_cell(EntityCell {
            data: EntityData::new(name),
            coords: CoordEngine::default(),
        })
    }

    /// Wraps existing storage; internal coordinates are derived on first use.
    pub(crate) fn from_data(mut data: EntityData) -> Self {
        let mut coords = CoordEngine::default();
        coords.mark_ics_dirty(&mut data);
        Self::from_cell(EntityCell { data, coords })
    }

    fn from_cell(cell: EntityCell) -> Self {
        Self {
            shared: Rc::new(EntityShared {
                cell: RefCell::new(cell),
                signals: EntitySignals::default(),
                lock: Cell::new(EditorLock::default()),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakEntityHandle {
        WeakEntityHandle {
            shared: Rc::downgrade(&self.shared),
        }
    }

    /// Whether both handles refer to the same underlying structure.
    pub fn same_entity(&self, other: &EntityHandle) -> bool {
        self == other
    }

    pub fn signals(&self) -> &EntitySignals {
        &self.shared.signals
    }

    pub fn name(&self) -> String {
        self.read(|data| data.name.clone())
    }

    pub fn coord_state(&self) -> CoordState {
        self.shared.cell.borrow().coords.state()
    }

    pub fn chain_count(&self) -> usize {
        self.read(EntityData::chain_count)
    }

    pub fn residue_count(&self) -> usize {
        self.read(EntityData::residue_count)
    }

    pub fn atom_count(&self) -> usize {
        self.read(EntityData::atom_count)
    }

    pub fn bond_count(&self) -> usize {
        self.read(EntityData::bond_count)
    }

    pub fn torsion_count(&self) -> usize {
        self.read(EntityData::torsion_count)
    }

    pub fn chains(&self) -> Vec<ChainHandle> {
        self.read(|data| data.chain_ids().to_vec())
            .into_iter()
            .map(|id| ChainHandle::new(self.clone(), id))
            .collect()
    }

    pub fn residues(&self) -> Vec<ResidueHandle> {
        self.read(EntityData::residue_ids)
            .into_iter()
            .map(|id| ResidueHandle::new(self.clone(), id))
            .collect()
    }

    pub fn atoms(&self) -> Vec<AtomHandle> {
        self.read(EntityData::atom_ids)
            .into_iter()
            .map(|id| AtomHandle::new(self.clone(), id))
            .collect()
    }

    pub fn bonds(&self) -> Vec<BondHandle> {
        self.read(|data| data.bond_ids().to_vec())
            .into_iter()
            .map(|id| BondHandle::new(self.clone(), id))
            .collect()
    }

    pub fn torsions(&self) -> Vec<TorsionHandle> {
        self.read(|data| data.torsion_ids().to_vec())
            .into_iter()
            .map(|id| TorsionHandle::new(self.clone(), id))
            .collect()
    }

    pub fn find_chain(&self, name: &str) -> Option<ChainHandle> {
        self.read(|data| data.find_chain(name))
            .map(|id| ChainHandle::new(self.clone(), id))
    }

    pub fn find_residue(&self, chain: &str, number: impl Into<ResNum>) -> Option<ResidueHandle> {
        let number = number.into();
        self.read(|data| data.find_residue(chain, number))
            .map(|id| ResidueHandle::new(self.clone(), id))
    }

    pub fn find_atom(&self, chain: &str, number: impl Into<ResNum>, name: &str) -> Option<AtomHandle> {
        let number = number.into();
        self.read(|data| data.find_atom(chain, number, name))
            .map(|id| AtomHandle::new(self.clone(), id))
    }

    pub fn find_torsion(&self, name: &str) -> Option<TorsionHandle> {
        self.read(|data| data.find_torsion(name))
            .map(|id| TorsionHandle::new(self.clone(), id))
    }

    /// Opens an editor that works on Cartesian coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError::EditorActive`] if a buffered editor is open, or if
    /// a buffered editor is requested while any other editor is open.
    pub fn edit_xcs(&self, mode: EditMode) -> Result<XcsEditor, EntityError> {
        XcsEditor::open(self.clone(), mode)
    }

    /// Opens an editor that works on internal coordinates.
    pub fn edit_ics(&self, mode: EditMode) -> Result<IcsEditor, EntityError> {
        IcsEditor::open(self.clone(), mode)
    }

    /// Selects atoms with a query string using the default flags.
    pub fn select(&self, query: &str) -> Result<EntityView, EntityError> {
        self.select_with(&Query::new(query), QueryFlags::default())
    }

    pub fn select_with(&self, query: &Query, flags: QueryFlags) -> Result<EntityView, EntityError> {
        self.create_full_view().select(query, flags)
    }

    /// A view containing every chain, residue, atom and bond.
    pub fn create_full_view(&self) -> EntityView {
        EntityView::full(self.clone())
    }

    pub fn create_empty_view(&self) -> EntityView {
        EntityView::empty(self.clone())
    }

    pub fn apply<V: EntityVisitor + ?Sized>(&self, visitor: &mut V) {
        let (tree, bonds, torsions) = self.read(|data| {
            (
                visitor::full_tree(data),
                data.bond_ids().to_vec(),
                data.torsion_ids().to_vec(),
            )
        });
        visitor::walk(self, &tree, &bonds, &torsions, visitor);
    }

    /// A deep copy of the structure. Observers are not copied.
    pub fn copy(&self) -> EntityHandle {
        let cell = self.shared.cell.borrow().clone();
        Self::from_cell(cell)
    }

    pub fn geometric_center(&self) -> Option<Point3<f64>> {
        self.read_xcs(|data| {
            let points: Vec<Point3<f64>> = data
                .atom_ids()
                .into_iter()
                .filter_map(|a| data.atom_position(a))
                .collect();
            geometry::centroid(&points)
        })
    }

    /// Axis-aligned bounding box of all atoms as `(min, max)`.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        self.read_xcs(|data| {
            let points: Vec<Point3<f64>> = data
                .atom_ids()
                .into_iter()
                .filter_map(|a| data.atom_position(a))
                .collect();
            geometry::bounds(&points)
        })
    }

    /// Recomputes internal coordinates from the current Cartesian positions.
    pub fn rebuild_ics(&self) {
        self.with_cell_mut(|cell| cell.coords.rebuild_ics(&mut cell.data));
    }

    /// Recomputes Cartesian positions from the current internal coordinates.
    pub fn rebuild_xcs(&self) {
        self.with_cell_mut(|cell| cell.coords.rebuild_xcs(&mut cell.data));
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&EntityData) -> R) -> R {
        let cell = self.shared.cell.borrow();
        f(&cell.data)
    }

    /// Reads the storage after bringing Cartesian positions up to date.
    pub(crate) fn read_xcs<R>(&self, f: impl FnOnce(&EntityData) -> R) -> R {
        let mut cell = self.shared.cell.borrow_mut();
        let cell = &mut *cell;
        cell.coords.ensure_xcs(&mut cell.data);
        f(&cell.data)
    }

    pub(crate) fn with_cell_mut<R>(&self, f: impl FnOnce(&mut EntityCell) -> R) -> R {
        let mut cell = self.shared.cell.borrow_mut();
        f(&mut cell)
    }

    pub(crate) fn acquire_editor(&self, mode: EditMode) -> Result<(), EntityError> {
        let mut lock = self.shared.lock.get();
        if lock.buffered {
            return Err(EntityError::EditorActive {
                requested: mode,
                active: EditMode::Buffered,
            });
        }
        match mode {
            EditMode::Buffered if lock.unbuffered > 0 => {
                return Err(EntityError::EditorActive {
                    requested: mode,
                    active: EditMode::Unbuffered,
                });
            }
            EditMode::Buffered => lock.buffered = true,
            EditMode::Unbuffered => lock.unbuffered += 1,
        }
        self.shared.lock.set(lock);
        Ok(())
    }

    pub(crate) fn release_editor(&self, mode: EditMode) {
        let mut lock = self.shared.lock.get();
        match mode {
            EditMode::Buffered => lock.buffered = false,
            EditMode::Unbuffered => lock.unbuffered = lock.unbuffered.saturating_sub(1),
        }
        self.shared.lock.set(lock);
    }
}

impl PropertyOwner for EntityHandle {
    fn with_props<R>(&self, f: impl FnOnce(&GenericPropContainer) -> R) -> Result<R, EntityError> {
        Ok(self.read(|data| f(&data.props)))
    }

    fn prop_target(&self) -> PropertyTarget {
        PropertyTarget::Entity
    }

    fn owning_entity(&self) -> &EntityHandle {
        self
    }
}
