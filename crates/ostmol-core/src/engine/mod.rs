//! # Engine Module
//!
//! This module implements the stateful side of the entity model: shared
//! entities, node handles, the dual coordinate systems and the editors that
//! keep them consistent.
//!
//! ## Overview
//!
//! An [`entity::EntityHandle`] shares one molecular graph between any number
//! of handles and views. Reads go through cheap handles; every mutation goes
//! through an editor, which tracks which coordinate representation is
//! authoritative, batches notifications in buffered mode and flushes them when
//! it is dropped.
//!
//! ## Architecture
//!
//! - **Entities and Handles** ([`entity`], [`handle`]) - Shared entity ownership and live node handles
//! - **Coordinates** ([`coords`]) - Cartesian and internal coordinates with lazy, dirty-state driven rebuilds
//! - **Editors** ([`editor`]) - Buffered and unbuffered XCS and ICS editors
//! - **Observers** ([`signals`]) - Per-event signals attached to every entity
//! - **Views** ([`view`]) - Frozen subsets of an entity, produced by selections
//! - **Traversal** ([`visitor`]) - Hierarchical visitors over entities and views
//! - **Processing** ([`processor`], [`config`]) - Rule-based chemistry and connectivity assignment
//! - **Error Handling** ([`error`]) - Engine-level error types
//!
//! ## Key Capabilities
//!
//! - **Lazy coordinate conversion**, rebuilding internal coordinates only when they are read
//! - **Local torsion rotations** that move only the far side of a rotatable bond
//! - **Scoped editors** whose notifications are flushed exactly once on drop

pub mod config;
pub mod coords;
pub mod editor;
pub mod entity;
pub mod error;
pub mod handle;
pub mod processor;
pub mod signals;
pub mod view;
pub mod visitor;
