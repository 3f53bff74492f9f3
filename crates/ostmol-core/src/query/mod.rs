//! # Query Module
//!
//! The atom selection language.
//!
//! ## Overview
//!
//! A query is a boolean expression over chain, residue and atom properties,
//! for example `rname=ALA,GLY and aname=CA` or `within 5 of (ligand=true)`.
//! Parsing never fails outright: an invalid query reports what went wrong and
//! where through [`Query::error_description`], and only evaluating it is an
//! error. Selections freeze their membership into an
//! [`EntityView`](crate::engine::view::EntityView).
//!
//! ## Components
//!
//! - [`ast`] - Expression tree, properties and operators
//! - [`pattern`] - Wildcard string patterns and numeric ranges
//! - [`error`] - Parse error descriptions and evaluation errors

pub mod ast;
pub mod error;
mod eval;
mod lexer;
pub(crate) mod parser;
pub mod pattern;
pub(crate) mod select;

use crate::engine::error::EntityError;
use crate::engine::handle::{AtomHandle, ChainHandle, ResidueHandle};
use crate::engine::visitor;
use ast::Expr;
use bitflags::bitflags;
use error::{QueryError, QueryErrorDesc};
use eval::{Scope, Tri, WithinTargets, evaluate};
use parser::Parsed;
use std::fmt;

bitflags! {
    /// Flags controlling how a selection is materialised.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct QueryFlags: u32 {
        /// Leave all bonds out of the resulting view.
        const NO_BONDS = 0x01;
        /// Include a bond only if both of its atoms are selected.
        const EXCLUSIVE_BONDS = 0x02;
        /// Include every atom of a residue that has at least one matching atom.
        const MATCH_RESIDUES = 0x04;
    }
}

impl Default for QueryFlags {
    fn default() -> Self {
        QueryFlags::EXCLUSIVE_BONDS
    }
}

/// A parsed selection query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    text: String,
    parsed: Result<Parsed, QueryErrorDesc>,
}

impl Query {
    /// Parses a query. Invalid input yields a query with `is_valid() == false`.
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            parsed: parser::parse(text),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_valid(&self) -> bool {
        self.parsed.is_ok()
    }

    pub fn error_description(&self) -> Option<&QueryErrorDesc> {
        self.parsed.as_ref().err()
    }

    /// The parsed expression; `None` for invalid or blank queries.
    pub fn expr(&self) -> Option<&Expr> {
        self.parsed.as_ref().ok().and_then(|p| p.expr.as_ref())
    }

    /// Whether the query is blank and therefore selects everything.
    pub fn selects_all(&self) -> bool {
        matches!(&self.parsed, Ok(Parsed { expr: None, .. }))
    }

    pub(crate) fn checked(&self) -> Result<&Parsed, QueryError> {
        self.parsed
            .as_ref()
            .map_err(|desc| QueryError::from_desc(&self.text, desc))
    }

    /// Whether the atom matches, with `within` clauses resolved against its
    /// whole entity.
    pub fn is_atom_selected(&self, atom: &AtomHandle) -> Result<bool, EntityError> {
        let parsed = self.checked()?;
        atom.entity().read_xcs(|data| {
            let a = data.atom(atom.id()).ok_or(EntityError::InvalidHandle { kind: "atom" })?;
            let Some(expr) = &parsed.expr else {
                return Ok(true);
            };
            let residue = data
                .residue(a.residue_id)
                .ok_or(EntityError::InvalidHandle { kind: "residue" })?;
            let chain = data
                .chain(residue.chain_id)
                .ok_or(EntityError::InvalidHandle { kind: "chain" })?;
            let index = chain.residues().iter().position(|&r| r == a.residue_id).unwrap_or(0);
            let targets = select::resolve_targets(expr, parsed.within_slots, data, &visitor::full_tree(data));
            Ok(evaluate(expr, &Scope::atom(chain, residue, index, a), &targets) == Tri::True)
        })
    }

    /// Whether the residue may contain selected atoms.
    pub fn is_residue_selected(&self, residue: &ResidueHandle) -> Result<bool, EntityError> {
        let parsed = self.checked()?;
        residue.entity().read(|data| {
            let r = data
                .residue(residue.id())
                .ok_or(EntityError::InvalidHandle { kind: "residue" })?;
            let Some(expr) = &parsed.expr else {
                return Ok(true);
            };
            let chain = data
                .chain(r.chain_id)
                .ok_or(EntityError::InvalidHandle { kind: "chain" })?;
            let index = chain.residues().iter().position(|&id| id == residue.id()).unwrap_or(0);
            let scope = Scope::residue(chain, r, index);
            Ok(evaluate(expr, &scope, &WithinTargets::new()).is_possible())
        })
    }

    /// Whether the chain may contain selected atoms.
    pub fn is_chain_selected(&self, chain: &ChainHandle) -> Result<bool, EntityError> {
        let parsed = self.checked()?;
        chain.entity().read(|data| {
            let c = data
                .chain(chain.id())
                .ok_or(EntityError::InvalidHandle { kind: "chain" })?;
            Ok(parsed
                .expr
                .as_ref()
                .is_none_or(|expr| evaluate(expr, &Scope::chain(c), &WithinTargets::new()).is_possible()))
        })
    }
}

impl Default for Query {
    fn default() -> Self {
        Query::new("")
    }
}

impl From<&str> for Query {
    fn from(text: &str) -> Self {
        Query::new(text)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}
