//! # Core Models Module
//!
//! This module contains the data structures that represent a molecular entity.
//!
//! ## Overview
//!
//! An entity is a strict ownership tree (chains own residues, residues own
//! atoms) with two kinds of cross-tree edges, bonds and torsions. All nodes are
//! stored in generational arenas inside [`entity::EntityData`], so ids stay
//! small and copyable and a dangling id is detected rather than dereferenced.
//!
//! ## Key Components
//!
//! - [`atom`] - Atom with element, position, occupancy, B-factor and charge
//! - [`residue`] - Residue, residue numbers with insertion codes, chemical classes
//! - [`chain`] - Chain with its ordered residues and chain type
//! - [`topology`] - Bonds, bond orders and named torsions
//! - [`props`] - Typed generic properties attachable to every node
//! - [`entity`] - The arena that owns every node of one entity
//! - [`ids`] - Generational identifiers for all node kinds
//!
//! ## Usage
//!
//! The arena is normally reached through an [`EntityHandle`](crate::engine::entity::EntityHandle)
//! and mutated through its editors, which keep the coordinate systems and
//! observers in sync. Direct use is possible for plain data processing:
//!
//! ```ignore
//! use ostmol::core::models::entity::EntityData;
//!
//! let mut data = EntityData::new("crambin");
//! let chain = data.add_chain("A")?;
//! let residue = data.append_residue(chain, "THR", None)?;
//! let n = data.add_atom(residue, "N", "N", Point3::new(17.0, 14.1, 3.6))?;
//! ```

pub mod atom;
pub mod chain;
pub mod entity;
pub mod ids;
pub mod props;
pub mod residue;
pub mod topology;
