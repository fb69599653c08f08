mod parser;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{InvalidLogicSnafu, QueryError, Result};

/// A boolean expression over constraint codes.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum Logic {
    Code(char),
    And(Box<Logic>, Box<Logic>),
    Or(Box<Logic>, Box<Logic>),
}

impl Logic {
    /// Parses an expression such as `A and (B or C)`.
    ///
    /// `and`, `&` and `&&` bind tighter than `or`, `|` and `||`. Operators and codes are
    /// case-insensitive.
    pub fn parse(expr: &str) -> Result<Logic> {
        let (rest, logic) = parser::expression(expr).map_err(|e| {
            InvalidLogicSnafu {
                logic: expr,
                reason: e.to_string(),
            }
            .build()
        })?;

        if !rest.is_empty() {
            return InvalidLogicSnafu {
                logic: expr,
                reason: format!("unexpected input at '{}'", rest),
            }
            .fail();
        }

        Ok(logic)
    }

    /// ANDs every code together, in the given order.
    pub fn and_all<I: IntoIterator<Item = char>>(codes: I) -> Option<Logic> {
        codes
            .into_iter()
            .map(Logic::Code)
            .reduce(|acc, c| Logic::And(Box::new(acc), Box::new(c)))
    }

    /// The set of codes the expression mentions.
    pub fn codes(&self) -> BTreeSet<char> {
        let mut codes = BTreeSet::new();
        self.collect_codes(&mut codes);
        codes
    }

    fn collect_codes(&self, codes: &mut BTreeSet<char>) {
        match self {
            Logic::Code(c) => {
                codes.insert(*c);
            }
            Logic::And(a, b) | Logic::Or(a, b) => {
                a.collect_codes(codes);
                b.collect_codes(codes);
            }
        }
    }

    /// Drops a code from the expression, collapsing the operator it was part of.
    ///
    /// Returns `None` if nothing is left.
    pub fn without(&self, code: char) -> Option<Logic> {
        match self {
            Logic::Code(c) if *c == code => None,
            Logic::Code(c) => Some(Logic::Code(*c)),
            Logic::And(a, b) | Logic::Or(a, b) => {
                match (a.without(code), b.without(code)) {
                    (Some(a), Some(b)) => Some(match self {
                        Logic::And(..) => Logic::And(Box::new(a), Box::new(b)),
                        _ => Logic::Or(Box::new(a), Box::new(b)),
                    }),
                    (Some(only), None) | (None, Some(only)) => Some(only),
                    (None, None) => None,
                }
            }
        }
    }

    fn fmt_child(&self, child: &Logic, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only an OR under an AND needs grouping.
        match (self, child) {
            (Logic::And(..), Logic::Or(..)) => write!(f, "({})", child),
            _ => write!(f, "{}", child),
        }
    }
}

impl fmt::Display for Logic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Logic::Code(c) => write!(f, "{}", c),
            Logic::And(a, b) => {
                self.fmt_child(a, f)?;
                write!(f, " and ")?;
                self.fmt_child(b, f)
            }
            Logic::Or(a, b) => {
                self.fmt_child(a, f)?;
                write!(f, " or ")?;
                self.fmt_child(b, f)
            }
        }
    }
}

impl FromStr for Logic {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        Logic::parse(s)
    }
}
