//! Syntax tree of a parsed query.

use super::pattern::{NumberSpec, Pattern};
use std::fmt;

/// Comparison operators of a property predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn is_equality(self) -> bool {
        matches!(self, CompareOp::Eq | CompareOp::Ne)
    }

    pub fn compare(self, a: f64, b: f64) -> bool {
        match self {
            CompareOp::Eq => (a - b).abs() <= FLOAT_TOLERANCE,
            CompareOp::Ne => (a - b).abs() > FLOAT_TOLERANCE,
            CompareOp::Lt => a < b,
            CompareOp::Le => a <= b,
            CompareOp::Gt => a > b,
            CompareOp::Ge => a >= b,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        };
        write!(f, "{}", s)
    }
}

/// Absolute tolerance used by `=` and `!=` on floating point properties.
pub const FLOAT_TOLERANCE: f64 = 1e-6;

/// Hierarchy level a predicate needs data from.
///
/// Ordered from the top of the hierarchy down, so a predicate can be decided
/// while evaluating at `level` iff `predicate.level() <= level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Chain,
    Residue,
    Atom,
}

/// Built-in properties of the query language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    AtomName,
    Element,
    BFactor,
    Occupancy,
    AtomCharge,
    X,
    Y,
    Z,
    IsHetatm,
    ResidueName,
    ResidueNumber,
    ResidueIndex,
    OneLetterCode,
    ChemClass,
    Peptide,
    Ligand,
    ChainName,
}

/// Value type a built-in property compares as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Number,
    Bool,
}

impl Property {
    pub fn level(self) -> Level {
        use Property::*;
        match self {
            AtomName | Element | BFactor | Occupancy | AtomCharge | X | Y | Z | IsHetatm => Level::Atom,
            ResidueName | ResidueNumber | ResidueIndex | OneLetterCode | ChemClass | Peptide
            | Ligand => Level::Residue,
            ChainName => Level::Chain,
        }
    }

    pub fn kind(self) -> ValueKind {
        use Property::*;
        match self {
            AtomName | Element | ResidueName | OneLetterCode | ChemClass | ChainName => ValueKind::String,
            BFactor | Occupancy | AtomCharge | X | Y | Z | ResidueNumber | ResidueIndex => ValueKind::Number,
            IsHetatm | Peptide | Ligand => ValueKind::Bool,
        }
    }
}

/// A literal on the right-hand side of a generic property comparison.
///
/// Generic properties are typed only at evaluation time, so the raw text is
/// kept alongside every interpretation that parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericValue {
    pub text: String,
    pub pattern: Pattern,
    pub number: Option<NumberSpec>,
    pub boolean: Option<bool>,
}

/// The right-hand side of a comparison, typed by the property.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Matches when any pattern matches; `negate` flips the result.
    Str { patterns: Vec<Pattern>, negate: bool },
    /// With `=`/`!=` the specs form a list; other operators take one value.
    Num { op: CompareOp, specs: Vec<NumberSpec> },
    Bool { value: bool, negate: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    Builtin { property: Property, predicate: Predicate },
    Generic { level: Level, key: String, op: CompareOp, values: Vec<GenericValue> },
}

impl Comparison {
    pub fn level(&self) -> Level {
        match self {
            Comparison::Builtin { property, .. } => property.level(),
            Comparison::Generic { level, .. } => *level,
        }
    }
}

/// A query expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    /// Atoms closer than `radius` to any atom selected by `target`.
    ///
    /// `slot` indexes the target positions resolved before evaluation. Slots
    /// are numbered in post-order, so a target only refers to lower slots.
    Within { radius: f64, target: Box<Expr>, slot: usize },
    Compare(Comparison),
}

impl Expr {
    /// The deepest hierarchy level any part of the expression reads.
    pub fn level(&self) -> Level {
        match self {
            Expr::And(a, b) | Expr::Or(a, b) => a.level().max(b.level()),
            Expr::Not(e) => e.level(),
            Expr::Within { .. } => Level::Atom,
            Expr::Compare(c) => c.level(),
        }
    }
}
