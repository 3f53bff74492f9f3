//! Recursive descent parser for the query language.
//!
//! ```text
//! or_expr    := and_expr ("or" and_expr)*
//! and_expr   := not_expr ("and" not_expr)*
//! not_expr   := ("not" | "!") not_expr | primary
//! primary    := "(" or_expr ")" | "within" NUMBER "of" primary | comparison
//! comparison := PROPERTY OP value ("," value)*
//! ```
//!
//! Keywords are case-insensitive. Values are typed against the property while
//! parsing, so a well-formed query cannot fail during evaluation.

use super::ast::{CompareOp, Comparison, Expr, GenericValue, Level, Predicate, Property, ValueKind};
use super::error::QueryErrorDesc;
use super::lexer::{Token, TokenKind, tokenize};
use super::pattern::{NumberSpec, Pattern, parse_bool};
use phf::phf_map;
use std::ops::Range;

static PROPERTIES: phf::Map<&'static str, Property> = phf_map! {
    "aname" => Property::AtomName,
    "ele" => Property::Element,
    "abfac" => Property::BFactor,
    "occ" => Property::Occupancy,
    "acharge" => Property::AtomCharge,
    "x" => Property::X,
    "y" => Property::Y,
    "z" => Property::Z,
    "ishetatm" => Property::IsHetatm,
    "rname" => Property::ResidueName,
    "rnum" => Property::ResidueNumber,
    "rindex" => Property::ResidueIndex,
    "olc" => Property::OneLetterCode,
    "chemclass" => Property::ChemClass,
    "peptide" => Property::Peptide,
    "ligand" => Property::Ligand,
    "cname" => Property::ChainName,
    "chain" => Property::ChainName,
};

/// Result of a successful parse.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed {
    /// `None` for a blank query, which selects everything.
    pub expr: Option<Expr>,
    /// Number of `within` target sets the expression refers to.
    pub within_slots: usize,
}

/// Deepest expression tree the parser builds; bounds recursion while parsing
/// and evaluating.
pub const MAX_DEPTH: usize = 256;

pub fn parse(input: &str) -> Result<Parsed, QueryErrorDesc> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: input.len(),
        slots: 0,
        nesting: 0,
    };
    if parser.tokens.is_empty() {
        return Ok(Parsed {
            expr: None,
            within_slots: 0,
        });
    }
    let (expr, _) = parser.or_expr()?;
    if let Some(token) = parser.peek() {
        return Err(QueryErrorDesc::new(
            format!("unexpected {}", token.kind.describe()),
            token.span.clone(),
        ));
    }
    Ok(Parsed {
        expr: Some(expr),
        within_slots: parser.slots,
    })
}

/// An expression together with the depth of its tree.
type Node = (Expr, usize);

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
    slots: usize,
    nesting: usize,
}

fn is_keyword(token: &Token, keyword: &str) -> bool {
    matches!(&token.kind, TokenKind::Word(w) if w.eq_ignore_ascii_case(keyword))
}

fn too_deep(span: Range<usize>) -> QueryErrorDesc {
    QueryErrorDesc::new(format!("query is nested deeper than {} levels", MAX_DEPTH), span)
}

/// Depth of a node over children of the given depths, rejected past [`MAX_DEPTH`].
fn deeper(children: usize, span: Range<usize>) -> Result<usize, QueryErrorDesc> {
    let depth = children + 1;
    if depth > MAX_DEPTH {
        return Err(too_deep(span));
    }
    Ok(depth)
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat_keyword(&mut self, keyword: &str) -> Option<Range<usize>> {
        let span = self.peek().filter(|t| is_keyword(t, keyword))?.span.clone();
        self.pos += 1;
        Some(span)
    }

    /// Consumes the current token and enters one level of nesting below it.
    fn descend(&mut self, span: Range<usize>) -> Result<(), QueryErrorDesc> {
        if self.nesting >= MAX_DEPTH {
            return Err(too_deep(span));
        }
        self.nesting += 1;
        self.pos += 1;
        Ok(())
    }

    fn ascend(&mut self) {
        self.nesting -= 1;
    }

    /// An error at the current token, or at the end of the query.
    fn error_here(&self, expected: &str) -> QueryErrorDesc {
        match self.peek() {
            Some(token) => QueryErrorDesc::new(
                format!("{}, found {}", expected, token.kind.describe()),
                token.span.clone(),
            ),
            None => QueryErrorDesc::new(
                format!("{}, found end of query", expected),
                self.end..self.end,
            ),
        }
    }

    fn or_expr(&mut self) -> Result<Node, QueryErrorDesc> {
        let (mut left, mut depth) = self.and_expr()?;
        while let Some(span) = self.eat_keyword("or") {
            let (right, right_depth) = self.and_expr()?;
            depth = deeper(depth.max(right_depth), span)?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok((left, depth))
    }

    fn and_expr(&mut self) -> Result<Node, QueryErrorDesc> {
        let (mut left, mut depth) = self.not_expr()?;
        while let Some(span) = self.eat_keyword("and") {
            let (right, right_depth) = self.not_expr()?;
            depth = deeper(depth.max(right_depth), span)?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok((left, depth))
    }

    fn not_expr(&mut self) -> Result<Node, QueryErrorDesc> {
        let negation = self
            .peek()
            .filter(|t| t.kind == TokenKind::Bang || is_keyword(t, "not"))
            .map(|t| t.span.clone());
        let Some(span) = negation else {
            return self.primary();
        };
        self.descend(span.clone())?;
        let (inner, depth) = self.not_expr()?;
        self.ascend();
        Ok((Expr::Not(Box::new(inner)), deeper(depth, span)?))
    }

    fn primary(&mut self) -> Result<Node, QueryErrorDesc> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error_here("expected an expression"));
        };
        match &token.kind {
            TokenKind::LParen => {
                self.descend(token.span.clone())?;
                let inner = self.or_expr()?;
                self.ascend();
                match self.peek() {
                    Some(t) if t.kind == TokenKind::RParen => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    _ => Err(self.error_here("expected ')'")),
                }
            }
            TokenKind::Word(_) if is_keyword(&token, "within") => {
                self.descend(token.span.clone())?;
                let node = self.within(token.span.clone());
                self.ascend();
                node
            }
            TokenKind::Word(word) => {
                self.pos += 1;
                Ok((self.comparison(word, token.span.clone())?, 1))
            }
            _ => Err(self.error_here("expected an expression")),
        }
    }

    fn within(&mut self, keyword_span: Range<usize>) -> Result<Node, QueryErrorDesc> {
        let radius = match self.peek() {
            Some(Token {
                kind: TokenKind::Word(w),
                span,
            }) => match w.parse::<f64>() {
                Ok(r) if r.is_finite() && r >= 0.0 => r,
                _ => {
                    return Err(QueryErrorDesc::new(
                        format!("invalid distance '{}'", w),
                        span.clone(),
                    ));
                }
            },
            _ => return Err(self.error_here("expected a distance after 'within'")),
        };
        self.pos += 1;
        if self.eat_keyword("of").is_none() {
            return Err(self.error_here("expected 'of'"));
        }
        let (target, depth) = self.primary()?;
        let slot = self.slots;
        self.slots += 1;
        let within = Expr::Within {
            radius,
            target: Box::new(target),
            slot,
        };
        Ok((within, deeper(depth, keyword_span)?))
    }

    fn comparison(&mut self, name: &str, name_span: Range<usize>) -> Result<Expr, QueryErrorDesc> {
        let lower = name.to_ascii_lowercase();
        let generic_level = match lower.get(..3) {
            Some("ga:") => Some(Level::Atom),
            Some("gr:") => Some(Level::Residue),
            Some("gc:") => Some(Level::Chain),
            _ => None,
        };
        let builtin = match generic_level {
            Some(_) => None,
            None => Some(*PROPERTIES.get(lower.as_str()).ok_or_else(|| {
                QueryErrorDesc::new(format!("unknown property '{}'", name), name_span.clone())
            })?),
        };

        let (op, op_span) = match self.peek() {
            Some(Token {
                kind: TokenKind::Op(op),
                span,
            }) => (*op, span.clone()),
            _ => {
                return Err(self.error_here(&format!("expected a comparison operator after '{}'", name)));
            }
        };
        self.pos += 1;

        let mut values = Vec::new();
        loop {
            match self.peek().map(|t| t.kind.clone()) {
                Some(TokenKind::Word(text)) => values.push((text, false, self.tokens[self.pos].span.clone())),
                Some(TokenKind::Quoted(text)) => values.push((text, true, self.tokens[self.pos].span.clone())),
                _ => return Err(self.error_here(&format!("expected a value after '{}'", op))),
            }
            self.pos += 1;
            match self.peek() {
                Some(t) if t.kind == TokenKind::Comma => self.pos += 1,
                _ => break,
            }
        }

        if !op.is_equality() && values.len() > 1 {
            return Err(QueryErrorDesc::new(
                format!("a value list requires '=' or '!=', not '{}'", op),
                op_span,
            ));
        }

        let comparison = match (builtin, generic_level) {
            (Some(property), _) => Comparison::Builtin {
                property,
                predicate: typed_predicate(name, property, op, op_span, values)?,
            },
            (None, level) => {
                let key = &name[3..];
                if key.is_empty() {
                    return Err(QueryErrorDesc::new("missing generic property key", name_span));
                }
                Comparison::Generic {
                    level: level.unwrap_or(Level::Atom),
                    key: key.to_string(),
                    op,
                    values: values
                        .into_iter()
                        .map(|(text, quoted, _)| GenericValue {
                            pattern: if quoted { Pattern::Exact(text.clone()) } else { Pattern::new(&text) },
                            number: NumberSpec::parse(&text),
                            boolean: parse_bool(&text),
                            text,
                        })
                        .collect(),
                }
            }
        };
        Ok(Expr::Compare(comparison))
    }
}

fn typed_predicate(
    name: &str,
    property: Property,
    op: CompareOp,
    op_span: Range<usize>,
    values: Vec<(String, bool, Range<usize>)>,
) -> Result<Predicate, QueryErrorDesc> {
    let negate = op == CompareOp::Ne;
    match property.kind() {
        ValueKind::String => {
            if !op.is_equality() {
                return Err(QueryErrorDesc::new(
                    format!("operator '{}' cannot be applied to string property '{}'", op, name),
                    op_span,
                ));
            }
            let patterns = values
                .into_iter()
                .map(|(text, quoted, _)| if quoted { Pattern::Exact(text) } else { Pattern::new(&text) })
                .collect();
            Ok(Predicate::Str { patterns, negate })
        }
        ValueKind::Number => {
            let specs = values
                .into_iter()
                .map(|(text, _, span)| {
                    let spec = NumberSpec::parse(&text)
                        .ok_or_else(|| QueryErrorDesc::new(format!("invalid number '{}'", text), span.clone()))?;
                    if spec.is_range() && !op.is_equality() {
                        return Err(QueryErrorDesc::new(
                            format!("a range requires '=' or '!=', not '{}'", op),
                            span,
                        ));
                    }
                    Ok(spec)
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Predicate::Num { op, specs })
        }
        ValueKind::Bool => {
            if !op.is_equality() {
                return Err(QueryErrorDesc::new(
                    format!("operator '{}' cannot be applied to boolean property '{}'", op, name),
                    op_span,
                ));
            }
            let mut parsed = values.into_iter().map(|(text, _, span)| {
                parse_bool(&text).ok_or_else(|| QueryErrorDesc::new(format!("invalid boolean '{}'", text), span))
            });
            let value = match (parsed.next(), parsed.next()) {
                (Some(first), None) => first?,
                _ => {
                    return Err(QueryErrorDesc::new(
                        format!("boolean property '{}' takes a single value", name),
                        op_span,
                    ));
                }
            };
            Ok(Predicate::Bool { value, negate })
        }
    }
}
