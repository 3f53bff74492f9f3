use crate::core::models::ids::{AtomId, BondId, ChainId, ResidueId, TorsionId};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Identifies one attached observer so it can be detached later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

pub type Callback<T> = Rc<dyn Fn(&T)>;

/// A synchronous multi-observer notification channel.
///
/// Observers are invoked in attachment order on the thread that emits. The
/// slot list is snapshotted before delivery, so an observer may attach or
/// detach observers (including itself) while being notified; such changes take
/// effect for the next emission.
pub struct Signal<T> {
    slots: RefCell<Vec<(ConnectionId, Callback<T>)>>,
    next_id: Cell<u64>,
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self {
            slots: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
        }
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("observers", &self.observer_count())
            .finish()
    }
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, callback: impl Fn(&T) + 'static) -> ConnectionId {
        let id = ConnectionId(self.next_id.get());
        self.next_id.set(self.next_id.get() + 1);
        self.slots.borrow_mut().push((id, Rc::new(callback)));
        id
    }

    /// Detaches an observer; returns `false` if it was not attached.
    pub fn detach(&self, id: ConnectionId) -> bool {
        let mut slots = self.slots.borrow_mut();
        let before = slots.len();
        slots.retain(|(slot_id, _)| *slot_id != id);
        slots.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.slots.borrow().len()
    }

    #[inline]
    pub(crate) fn emit(&self, event: &T) {
        let snapshot: Vec<Callback<T>> = self
            .slots
            .borrow()
            .iter()
            .map(|(_, cb)| Rc::clone(cb))
            .collect();
        for cb in snapshot {
            cb(event);
        }
    }
}

/// Atoms whose Cartesian positions changed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GeometryChange {
    pub atoms: Vec<AtomId>,
}

/// A node whose non-geometric attributes or generic properties changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyTarget {
    Entity,
    Chain(ChainId),
    Residue(ResidueId),
    Atom(AtomId),
    Bond(BondId),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PropertyChange {
    pub targets: Vec<PropertyTarget>,
}

/// One notification as queued by an editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityEvent {
    ChainAdded(ChainId),
    ResidueAdded(ResidueId),
    AtomAdded(AtomId),
    BondAdded(BondId),
    TorsionAdded(TorsionId),
    ChainDeleted(ChainId),
    ResidueDeleted(ResidueId),
    AtomDeleted(AtomId),
    BondDeleted(BondId),
    TorsionDeleted(TorsionId),
    GeometryChanged(GeometryChange),
    PropertiesChanged(PropertyChange),
}

/// The named signals of one entity.
#[derive(Debug, Default)]
pub struct EntitySignals {
    pub on_chain_added: Signal<ChainId>,
    pub on_residue_added: Signal<ResidueId>,
    pub on_atom_added: Signal<AtomId>,
    pub on_bond_added: Signal<BondId>,
    pub on_torsion_added: Signal<TorsionId>,
    pub on_chain_deleted: Signal<ChainId>,
    pub on_residue_deleted: Signal<ResidueId>,
    pub on_atom_deleted: Signal<AtomId>,
    pub on_bond_deleted: Signal<BondId>,
    pub on_torsion_deleted: Signal<TorsionId>,
    pub on_geometry_changed: Signal<GeometryChange>,
    pub on_properties_changed: Signal<PropertyChange>,
}

impl EntitySignals {
    pub(crate) fn dispatch(&self, event: &EntityEvent) {
        match event {
            EntityEvent::ChainAdded(id) => self.on_chain_added.emit(id),
            EntityEvent::ResidueAdded(id) => self.on_residue_added.emit(id),
            EntityEvent::AtomAdded(id) => self.on_atom_added.emit(id),
            EntityEvent::BondAdded(id) => self.on_bond_added.emit(id),
            EntityEvent::TorsionAdded(id) => self.on_torsion_added.emit(id),
            EntityEvent::ChainDeleted(id) => self.on_chain_deleted.emit(id),
            EntityEvent::ResidueDeleted(id) => self.on_residue_deleted.emit(id),
            EntityEvent::AtomDeleted(id) => self.on_atom_deleted.emit(id),
            EntityEvent::BondDeleted(id) => self.on_bond_deleted.emit(id),
            EntityEvent::TorsionDeleted(id) => self.on_torsion_deleted.emit(id),
            EntityEvent::GeometryChanged(change) => self.on_geometry_changed.emit(change),
            EntityEvent::PropertiesChanged(change) => self.on_properties_changed.emit(change),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observers_fire_in_attachment_order() {
        let signal: Signal<u32> = Signal::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let first = Rc::clone(&log);
        signal.attach(move |v| first.borrow_mut().push(("first", *v)));
        let second = Rc::clone(&log);
        signal.attach(move |v| second.borrow_mut().push(("second", *v)));

        signal.emit(&7);
        assert_eq!(*log.borrow(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn detach_removes_only_the_given_observer() {
        let signal: Signal<()> = Signal::new();
        let hits = Rc::new(Cell::new(0));

        let h1 = Rc::clone(&hits);
        let a = signal.attach(move |_| h1.set(h1.get() + 1));
        let h2 = Rc::clone(&hits);
        signal.attach(move |_| h2.set(h2.get() + 10));

        assert!(signal.detach(a));
        assert!(!signal.detach(a));
        signal.emit(&());
        assert_eq!(hits.get(), 10);
        assert_eq!(signal.observer_count(), 1);
    }

    #[test]
    fn observer_may_detach_itself_during_delivery() {
        let signal = Rc::new(Signal::<()>::new());
        let hits = Rc::new(Cell::new(0));
        let id_cell = Rc::new(Cell::new(None));

        let sig = Rc::clone(&signal);
        let h = Rc::clone(&hits);
        let ids = Rc::clone(&id_cell);
        let id = signal.attach(move |_| {
            h.set(h.get() + 1);
            if let Some(id) = ids.get() {
                sig.detach(id);
            }
        });
        id_cell.set(Some(id));

        signal.emit(&());
        signal.emit(&());
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn dispatch_routes_events_to_matching_signal() {
        let signals = EntitySignals::default();
        let geometry = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&geometry);
        signals
            .on_geometry_changed
            .attach(move |c: &GeometryChange| sink.borrow_mut().push(c.atoms.len()));

        signals.dispatch(&EntityEvent::GeometryChanged(GeometryChange::default()));
        signals.dispatch(&EntityEvent::PropertiesChanged(PropertyChange::default()));
        assert_eq!(*geometry.borrow(), vec![0]);
    }
}
