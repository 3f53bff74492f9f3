//! Value patterns of query comparisons.
//!
//! String values may contain `*` (any run of characters, including none) and
//! `?` (exactly one character). Numeric values are single numbers or inclusive
//! `lo:hi` ranges.

use super::ast::CompareOp;

#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Exact(String),
    Wildcard(String),
}

impl Pattern {
    pub fn new(text: &str) -> Self {
        if text.contains(['*', '?']) {
            Pattern::Wildcard(text.to_string())
        } else {
            Pattern::Exact(text.to_string())
        }
    }

    pub fn matches(&self, value: &str, case_sensitive: bool) -> bool {
        match self {
            Pattern::Exact(p) if case_sensitive => p == value,
            Pattern::Exact(p) => p.eq_ignore_ascii_case(value),
            Pattern::Wildcard(p) => {
                let fold = |c: char| if case_sensitive { c } else { c.to_ascii_uppercase() };
                let pattern: Vec<char> = p.chars().map(fold).collect();
                let value: Vec<char> = value.chars().map(fold).collect();
                glob(&pattern, &value)
            }
        }
    }
}

/// Greedy glob matcher with single-star backtracking.
fn glob(pattern: &[char], value: &[char]) -> bool {
    let (mut p, mut v) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while v < value.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p, v));
                p += 1;
            }
            Some(&c) if c == '?' || c == value[v] => {
                p += 1;
                v += 1;
            }
            _ => match star {
                Some((sp, sv)) => {
                    p = sp + 1;
                    v = sv + 1;
                    star = Some((sp, sv + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumberSpec {
    Single(f64),
    /// Inclusive on both ends.
    Range(f64, f64),
}

impl NumberSpec {
    /// Parses `12`, `-3.5` or `1:10`; `None` if the text is not numeric.
    pub fn parse(text: &str) -> Option<Self> {
        match text.split_once(':') {
            Some((lo, hi)) => {
                let lo: f64 = lo.parse().ok()?;
                let hi: f64 = hi.parse().ok()?;
                Some(NumberSpec::Range(lo.min(hi), lo.max(hi)))
            }
            None => text.parse().ok().filter(|v: &f64| v.is_finite()).map(NumberSpec::Single),
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(self, NumberSpec::Range(..))
    }

    /// Whether `value op spec` holds; ranges only take part in equality tests.
    pub fn test(&self, op: CompareOp, value: f64) -> bool {
        match *self {
            NumberSpec::Single(v) => op.compare(value, v),
            NumberSpec::Range(lo, hi) => {
                let inside = value >= lo && value <= hi;
                match op {
                    CompareOp::Ne => !inside,
                    _ => inside,
                }
            }
        }
    }
}

/// Parses a boolean query literal.
pub fn parse_bool(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
