//! # ostmol
//!
//! A molecular entity model with dual Cartesian and internal coordinates,
//! transactional editors, change observers and an atom selection language.
//!
//! ## Architectural Philosophy
//!
//! The library is organised in three layers with a clear separation of concerns.
//!
//! - **[`core`]: The Foundation.** Plain data: the node types of the molecular
//!   graph and the arena that owns them, typed generic properties, geometry,
//!   and compound templates used by processors.
//!
//! - **[`engine`]: The Logic Core.** Shared entities and handles, the
//!   coordinate engine with its dirty-state machine, buffered and unbuffered
//!   editors, signals, views, visitors and the processor hook.
//!
//! - **[`query`]: The Selection Language.** Parsing and evaluation of queries
//!   such as `rname=ALA,GLY and aname=CA`, producing views.
//!
//! The [`prelude`] re-exports what most callers need.

pub mod core;
pub mod engine;
pub mod prelude;
pub mod query;
