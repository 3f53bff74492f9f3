//! # Compounds Module
//!
//! Chemical knowledge consumed by structure processors: a library of compound
//! templates (atom names, intra-residue bonds, chemical class and one-letter
//! code) and per-element tables.

pub mod elements;
pub mod library;
