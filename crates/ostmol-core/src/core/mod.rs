//! # Core Module
//!
//! Stateless building blocks of the molecular data model.
//!
//! ## Overview
//!
//! The core module holds the plain data that every other layer works on: the
//! node types of the molecular graph and the arena that owns them, typed
//! generic properties, geometric primitives and the chemical knowledge used by
//! structure processors. Nothing in here knows about dirty coordinate state,
//! editors or observers; those live in [`crate::engine`].
//!
//! ## Architecture
//!
//! - **Molecular Representation** ([`models`]) - Ids, atoms, residues, chains, bonds, torsions, properties and the entity arena
//! - **Geometry** ([`utils`]) - Distances, angles, dihedrals and NeRF atom placement
//! - **Chemical Knowledge** ([`compounds`]) - Compound templates and element tables

pub mod compounds;
pub mod models;
pub mod utils;
