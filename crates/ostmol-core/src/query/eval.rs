//! Three-valued evaluation of query expressions.
//!
//! A chain or residue can often be accepted or rejected before its atoms are
//! looked at. Predicates that need data from below the current level evaluate
//! to [`Tri::Unknown`], and the connectives follow Kleene's strong logic so an
//! unknown operand only matters when it can change the result.

use super::ast::{CompareOp, Comparison, Expr, GenericValue, Level, Predicate, Property};
use crate::core::models::atom::Atom;
use crate::core::models::chain::Chain;
use crate::core::models::props::{GenericPropContainer, PropValue};
use crate::core::models::residue::Residue;
use nalgebra::Point3;
use std::ops::Not;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tri {
    False,
    Unknown,
    True,
}

impl Not for Tri {
    type Output = Tri;

    fn not(self) -> Tri {
        match self {
            Tri::False => Tri::True,
            Tri::Unknown => Tri::Unknown,
            Tri::True => Tri::False,
        }
    }
}

impl Tri {
    /// Whether the node may still contain selected atoms.
    pub fn is_possible(self) -> bool {
        self != Tri::False
    }
}

impl From<bool> for Tri {
    fn from(value: bool) -> Self {
        if value { Tri::True } else { Tri::False }
    }
}

/// The node a query is evaluated against.
///
/// `residue` carries the residue's index in its chain. A scope without an
/// atom is evaluated at residue level, one without a residue at chain level.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub chain: &'a Chain,
    pub residue: Option<(&'a Residue, usize)>,
    pub atom: Option<&'a Atom>,
}

impl<'a> Scope<'a> {
    pub fn chain(chain: &'a Chain) -> Self {
        Self {
            chain,
            residue: None,
            atom: None,
        }
    }

    pub fn residue(chain: &'a Chain, residue: &'a Residue, index: usize) -> Self {
        Self {
            chain,
            residue: Some((residue, index)),
            atom: None,
        }
    }

    pub fn atom(chain: &'a Chain, residue: &'a Residue, index: usize, atom: &'a Atom) -> Self {
        Self {
            chain,
            residue: Some((residue, index)),
            atom: Some(atom),
        }
    }

    pub fn level(&self) -> Level {
        if self.atom.is_some() {
            Level::Atom
        } else if self.residue.is_some() {
            Level::Residue
        } else {
            Level::Chain
        }
    }
}

/// Positions selected by the target of each `within` clause, indexed by slot.
pub type WithinTargets = Vec<Vec<Point3<f64>>>;

pub fn evaluate(expr: &Expr, scope: &Scope<'_>, targets: &WithinTargets) -> Tri {
    match expr {
        Expr::And(a, b) => match evaluate(a, scope, targets) {
            Tri::False => Tri::False,
            left => match (left, evaluate(b, scope, targets)) {
                (_, Tri::False) => Tri::False,
                (Tri::True, Tri::True) => Tri::True,
                _ => Tri::Unknown,
            },
        },
        Expr::Or(a, b) => match evaluate(a, scope, targets) {
            Tri::True => Tri::True,
            left => match (left, evaluate(b, scope, targets)) {
                (_, Tri::True) => Tri::True,
                (Tri::False, Tri::False) => Tri::False,
                _ => Tri::Unknown,
            },
        },
        Expr::Not(e) => !evaluate(e, scope, targets),
        Expr::Within { radius, slot, .. } => match scope.atom {
            Some(atom) => {
                let r2 = radius * radius;
                let positions = targets.get(*slot).map(Vec::as_slice).unwrap_or(&[]);
                positions
                    .iter()
                    .any(|p| nalgebra::distance_squared(p, &atom.position) <= r2)
                    .into()
            }
            None => Tri::Unknown,
        },
        Expr::Compare(comparison) => {
            if comparison.level() > scope.level() {
                Tri::Unknown
            } else {
                compare(comparison, scope).into()
            }
        }
    }
}

fn compare(comparison: &Comparison, scope: &Scope<'_>) -> bool {
    match comparison {
        Comparison::Builtin { property, predicate } => builtin(*property, predicate, scope),
        Comparison::Generic { level, key, op, values } => {
            let props: Option<&GenericPropContainer> = match level {
                Level::Atom => scope.atom.map(|a| &a.props),
                Level::Residue => scope.residue.map(|(r, _)| &r.props),
                Level::Chain => Some(&scope.chain.props),
            };
            props
                .and_then(|p| p.get(key))
                .is_some_and(|value| generic(value, *op, values))
        }
    }
}

fn builtin(property: Property, predicate: &Predicate, scope: &Scope<'_>) -> bool {
    let (Some(atom), Some((residue, index))) = (scope.atom, scope.residue) else {
        return chain_or_residue(property, predicate, scope);
    };
    match property {
        Property::AtomName => string(predicate, &atom.name, true),
        Property::Element => string(predicate, &atom.element, false),
        Property::BFactor => number(predicate, atom.b_factor),
        Property::Occupancy => number(predicate, atom.occupancy),
        Property::AtomCharge => number(predicate, atom.charge),
        Property::X => number(predicate, atom.position.x),
        Property::Y => number(predicate, atom.position.y),
        Property::Z => number(predicate, atom.position.z),
        Property::IsHetatm => boolean(predicate, atom.is_hetatm),
        _ => chain_or_residue(property, predicate, &Scope::residue(scope.chain, residue, index)),
    }
}

fn chain_or_residue(property: Property, predicate: &Predicate, scope: &Scope<'_>) -> bool {
    if property == Property::ChainName {
        return string(predicate, &scope.chain.name, true);
    }
    let Some((residue, index)) = scope.residue else {
        return false;
    };
    match property {
        Property::ResidueName => string(predicate, &residue.key, true),
        Property::ResidueNumber => number(predicate, f64::from(residue.number.num)),
        Property::ResidueIndex => number(predicate, index as f64),
        Property::OneLetterCode => string(predicate, &residue.one_letter_code.to_string(), true),
        Property::ChemClass => string(predicate, &residue.chem_class.to_string(), false),
        Property::Peptide => boolean(predicate, residue.is_peptide()),
        Property::Ligand => boolean(predicate, residue.is_ligand),
        _ => false,
    }
}

fn string(predicate: &Predicate, value: &str, case_sensitive: bool) -> bool {
    match predicate {
        Predicate::Str { patterns, negate } => {
            patterns.iter().any(|p| p.matches(value, case_sensitive)) != *negate
        }
        _ => false,
    }
}

fn number(predicate: &Predicate, value: f64) -> bool {
    match predicate {
        Predicate::Num { op: CompareOp::Ne, specs } => specs.iter().all(|s| s.test(CompareOp::Ne, value)),
        Predicate::Num { op, specs } => specs.iter().any(|s| s.test(*op, value)),
        _ => false,
    }
}

fn boolean(predicate: &Predicate, value: bool) -> bool {
    match predicate {
        Predicate::Bool { value: expected, negate } => (value == *expected) != *negate,
        _ => false,
    }
}

fn generic(value: &PropValue, op: CompareOp, literals: &[GenericValue]) -> bool {
    match value {
        PropValue::String(s) => match op {
            CompareOp::Eq => literals.iter().any(|l| l.pattern.matches(s, true)),
            CompareOp::Ne => !literals.iter().any(|l| l.pattern.matches(s, true)),
            _ => false,
        },
        PropValue::Int(i) => generic_number(f64::from(*i), op, literals),
        PropValue::Float(f) => generic_number(*f, op, literals),
        PropValue::Bool(b) => match op {
            CompareOp::Eq => literals.iter().any(|l| l.boolean == Some(*b)),
            CompareOp::Ne => literals.iter().all(|l| l.boolean != Some(*b)),
            _ => false,
        },
        PropValue::Vec3(_) => false,
    }
}

fn generic_number(x: f64, op: CompareOp, literals: &[GenericValue]) -> bool {
    match op {
        CompareOp::Ne => literals
            .iter()
            .all(|l| l.number.is_none_or(|spec| spec.test(CompareOp::Ne, x))),
        _ => literals
            .iter()
            .any(|l| l.number.is_some_and(|spec| spec.test(op, x))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::entity::EntityData;
    use crate::core::models::residue::{ChemClass, ResNum};
    use crate::query::parser::parse;

    struct Fixture {
        data: EntityData,
    }

    impl Fixture {
        fn new() -> Self {
            let mut data = EntityData::new("eval");
            let chain = data.add_chain("A").unwrap();
            let ala = data.append_residue(chain, "ALA", Some(ResNum::new(7))).unwrap();
            data.add_atom(ala, "CA", "C", Point3::new(1.0, 2.0, 3.0)).unwrap();
            if let Some(r) = data.residue_mut(ala) {
                r.chem_class = ChemClass::LPeptideLinking;
                r.one_letter_code = 'A';
                r.props.set("score", 0.5);
            }
            Self { data }
        }

        fn scopes(&self) -> (Scope<'_>, Scope<'_>, Scope<'_>) {
            let chain_id = self.data.chain_ids()[0];
            let chain = self.data.chain(chain_id).unwrap();
            let residue = self.data.residue(chain.residues()[0]).unwrap();
            let atom = self.data.atom(residue.atoms()[0]).unwrap();
            (
                Scope::chain(chain),
                Scope::residue(chain, residue, 0),
                Scope::atom(chain, residue, 0, atom),
            )
        }

        fn eval(&self, query: &str) -> (Tri, Tri, Tri) {
            let expr = parse(query).unwrap().expr.unwrap();
            let (c, r, a) = self.scopes();
            let targets = WithinTargets::new();
            (
                evaluate(&expr, &c, &targets),
                evaluate(&expr, &r, &targets),
                evaluate(&expr, &a, &targets),
            )
        }
    }

    use Tri::{False, True, Unknown};

    #[test]
    fn lower_level_predicates_are_unknown_above_their_level() {
        let f = Fixture::new();
        assert_eq!(f.eval("aname=CA"), (Unknown, Unknown, True));
        assert_eq!(f.eval("rname=ALA"), (Unknown, True, True));
        assert_eq!(f.eval("cname=A"), (True, True, True));
    }

    #[test]
    fn kleene_connectives_decide_early_when_possible() {
        let f = Fixture::new();
        assert_eq!(f.eval("cname=B and aname=CA"), (False, False, False));
        assert_eq!(f.eval("cname=A or aname=N"), (True, True, True));
        assert_eq!(f.eval("cname=A and aname=N"), (Unknown, Unknown, False));
        assert_eq!(f.eval("not aname=N"), (Unknown, Unknown, True));
    }

    #[test]
    fn builtin_properties_read_node_data() {
        let f = Fixture::new();
        assert_eq!(f.eval("rnum=5:8").1, True);
        assert_eq!(f.eval("rindex=0").1, True);
        assert_eq!(f.eval("olc=A").1, True);
        assert_eq!(f.eval("peptide=true").1, True);
        assert_eq!(f.eval("chemclass=L-PEPTIDE*").1, True);
        assert_eq!(f.eval("ele=c and x<1.5 and z>=3").2, True);
        assert_eq!(f.eval("occ!=1").2, False);
        assert_eq!(f.eval("ishetatm=no").2, True);
    }

    #[test]
    fn generic_properties_compare_by_stored_kind() {
        let f = Fixture::new();
        assert_eq!(f.eval("gr:score<1").1, True);
        assert_eq!(f.eval("gr:score=0:0.4").1, False);
        assert_eq!(f.eval("gr:score=high").1, False);
        assert_eq!(f.eval("gr:missing=1").1, False);
        assert_eq!(f.eval("gr:missing!=1").1, False);
    }

    #[test]
    fn within_needs_atom_level_data() {
        let f = Fixture::new();
        let expr = parse("within 1.0 of aname=CB").unwrap().expr.unwrap();
        let (c, _, a) = f.scopes();
        let near: WithinTargets = vec![vec![Point3::new(1.0, 2.0, 3.9)]];
        let far: WithinTargets = vec![vec![Point3::new(1.0, 2.0, 4.5)]];
        assert_eq!(evaluate(&expr, &c, &near), Unknown);
        assert_eq!(evaluate(&expr, &a, &near), True);
        assert_eq!(evaluate(&expr, &a, &far), False);
    }
}
