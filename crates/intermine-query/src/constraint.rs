use std::fmt;
use std::str::FromStr;

use intermine_model::{AttributeType, Model, ResolvedPath, Subclasses};

use snafu::ensure;

use crate::error::{path_error, InvalidConstraintSnafu, InvalidPathSnafu, QueryError, Result};

/// Constraint operators, as understood by the service.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Operator {
    IsNull,
    IsNotNull,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Like,
    NotLike,
    OneOf,
    NoneOf,
    In,
    NotIn,
    Lookup,
    Is,
    IsNot,
    Within,
    Outside,
    Overlaps,
    DoesNotOverlap,
}

/// Groups operators by the shape of value they take and the kind of path they apply to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatorFamily {
    /// No value, any path.
    Unary,
    /// One value, attribute paths.
    Binary,
    /// Several values, attribute paths.
    Multi,
    /// A saved list name, class paths.
    List,
    /// A lookup term with an optional extra value, class paths.
    Lookup,
    /// Another path, class paths.
    Loop,
    /// Several ranges, class paths.
    Range,
}

const OPERATORS: &[(Operator, &str)] = &[
    (Operator::IsNull, "IS NULL"),
    (Operator::IsNotNull, "IS NOT NULL"),
    (Operator::Eq, "="),
    (Operator::Ne, "!="),
    (Operator::Lt, "<"),
    (Operator::Gt, ">"),
    (Operator::Le, "<="),
    (Operator::Ge, ">="),
    (Operator::Like, "LIKE"),
    (Operator::NotLike, "NOT LIKE"),
    (Operator::OneOf, "ONE OF"),
    (Operator::NoneOf, "NONE OF"),
    (Operator::In, "IN"),
    (Operator::NotIn, "NOT IN"),
    (Operator::Lookup, "LOOKUP"),
    (Operator::Is, "IS"),
    (Operator::IsNot, "IS NOT"),
    (Operator::Within, "WITHIN"),
    (Operator::Outside, "OUTSIDE"),
    (Operator::Overlaps, "OVERLAPS"),
    (Operator::DoesNotOverlap, "DOES NOT OVERLAP"),
];

impl Operator {
    pub fn as_str(&self) -> &'static str {
        OPERATORS
            .iter()
            .find(|(op, _)| op == self)
            .map(|(_, s)| *s)
            .unwrap_or_default()
    }

    pub fn family(&self) -> OperatorFamily {
        match self {
            Operator::IsNull | Operator::IsNotNull => OperatorFamily::Unary,
            Operator::Eq
            | Operator::Ne
            | Operator::Lt
            | Operator::Gt
            | Operator::Le
            | Operator::Ge
            | Operator::Like
            | Operator::NotLike => OperatorFamily::Binary,
            Operator::OneOf | Operator::NoneOf => OperatorFamily::Multi,
            Operator::In | Operator::NotIn => OperatorFamily::List,
            Operator::Lookup => OperatorFamily::Lookup,
            Operator::Is | Operator::IsNot => OperatorFamily::Loop,
            Operator::Within | Operator::Outside | Operator::Overlaps | Operator::DoesNotOverlap => {
                OperatorFamily::Range
            }
        }
    }

    fn is_ordering(&self) -> bool {
        matches!(self, Operator::Lt | Operator::Gt | Operator::Le | Operator::Ge)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct UnknownOperator(pub String);

impl fmt::Display for UnknownOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown operator '{}'", self.0)
    }
}

impl std::error::Error for UnknownOperator {}

impl FromStr for Operator {
    type Err = UnknownOperator;

    /// Case-insensitive, and tolerant of repeated whitespace (`"is  not null"`).
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_uppercase();
        let normalized = if normalized == "==" {
            String::from("=")
        } else {
            normalized
        };

        OPERATORS
            .iter()
            .find(|(_, repr)| *repr == normalized)
            .map(|(op, _)| *op)
            .ok_or_else(|| UnknownOperator(String::from(s)))
    }
}

/// The value side of a constraint.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum ConstraintValue {
    Empty,
    Single(String),
    Many(Vec<String>),
    Lookup {
        value: String,
        extra_value: Option<String>,
    },
}

impl ConstraintValue {
    pub fn lookup<S: Into<String>, E: Into<String>>(value: S, extra_value: E) -> Self {
        ConstraintValue::Lookup {
            value: value.into(),
            extra_value: Some(extra_value.into()),
        }
    }
}

impl From<()> for ConstraintValue {
    fn from(_: ()) -> Self {
        ConstraintValue::Empty
    }
}

impl From<&str> for ConstraintValue {
    fn from(v: &str) -> Self {
        ConstraintValue::Single(String::from(v))
    }
}

impl From<String> for ConstraintValue {
    fn from(v: String) -> Self {
        ConstraintValue::Single(v)
    }
}

macro_rules! scalar_value {
    ($($t:ty),*) => {
        $(impl From<$t> for ConstraintValue {
            fn from(v: $t) -> Self {
                ConstraintValue::Single(v.to_string())
            }
        })*
    };
}

scalar_value!(i32, i64, u32, u64, f64, bool);

impl From<Vec<String>> for ConstraintValue {
    fn from(v: Vec<String>) -> Self {
        ConstraintValue::Many(v)
    }
}

impl From<Vec<&str>> for ConstraintValue {
    fn from(v: Vec<&str>) -> Self {
        ConstraintValue::Many(v.into_iter().map(String::from).collect())
    }
}

impl<const N: usize> From<[&str; N]> for ConstraintValue {
    fn from(v: [&str; N]) -> Self {
        ConstraintValue::Many(v.iter().map(|s| String::from(*s)).collect())
    }
}

impl fmt::Display for ConstraintValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintValue::Empty => Ok(()),
            ConstraintValue::Single(v) => write!(f, "{}", v),
            ConstraintValue::Many(values) => write!(f, "[{}]", values.join(", ")),
            ConstraintValue::Lookup {
                value,
                extra_value: None,
            } => write!(f, "{}", value),
            ConstraintValue::Lookup {
                value,
                extra_value: Some(extra),
            } => write!(f, "{} IN {}", value, extra),
        }
    }
}

/// A filter carrying a code, so it can take part in the constraint logic.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct CodedConstraint {
    pub path: String,
    pub op: Operator,
    pub value: ConstraintValue,
    pub code: char,
}

/// Narrows the objects at a path to a subclass of the path's declared type.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct SubclassConstraint {
    pub path: String,
    pub subclass: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum Constraint {
    Coded(CodedConstraint),
    Subclass(SubclassConstraint),
}

impl Constraint {
    pub fn path(&self) -> &str {
        match self {
            Constraint::Coded(c) => &c.path,
            Constraint::Subclass(c) => &c.path,
        }
    }

    pub fn code(&self) -> Option<char> {
        match self {
            Constraint::Coded(c) => Some(c.code),
            Constraint::Subclass(_) => None,
        }
    }

    pub fn as_coded(&self) -> Option<&CodedConstraint> {
        match self {
            Constraint::Coded(c) => Some(c),
            Constraint::Subclass(_) => None,
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Coded(c) if c.value == ConstraintValue::Empty => {
                write!(f, "{} {}", c.path, c.op)
            }
            Constraint::Coded(c) => write!(f, "{} {} {}", c.path, c.op, c.value),
            Constraint::Subclass(c) => write!(f, "{} ISA {}", c.path, c.subclass),
        }
    }
}

/// Normalizes and checks a constraint code.
pub(crate) fn normalize_code(path: &str, code: char) -> Result<char> {
    let code = code.to_ascii_uppercase();
    ensure!(
        code.is_ascii_uppercase(),
        InvalidConstraintSnafu {
            path,
            reason: format!("'{}' is not a valid constraint code (expected A-Z)", code)
        }
    );
    Ok(code)
}

fn invalid<T>(path: &str, reason: String) -> Result<T> {
    InvalidConstraintSnafu { path, reason }.fail()
}

fn check_scalar(path: &str, op: Operator, ty: &AttributeType, value: &str) -> Result<()> {
    if matches!(op, Operator::Like | Operator::NotLike) && *ty != AttributeType::String {
        return invalid(path, format!("operator {} is not valid for {} fields", op, ty));
    }

    match ty {
        AttributeType::Boolean => {
            if op.is_ordering() {
                return invalid(path, format!("operator {} is not valid for Boolean fields", op));
            }
            ensure!(
                value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false"),
                InvalidConstraintSnafu {
                    path,
                    reason: format!("'{}' is not a Boolean value", value)
                }
            );
        }
        AttributeType::Integer => {
            ensure!(
                value.trim().parse::<i64>().is_ok(),
                InvalidConstraintSnafu {
                    path,
                    reason: format!("'{}' is not an Integer value", value)
                }
            );
        }
        AttributeType::Float => {
            ensure!(
                value.trim().parse::<f64>().is_ok(),
                InvalidConstraintSnafu {
                    path,
                    reason: format!("'{}' is not a Float value", value)
                }
            );
        }
        other if op.is_ordering() && !other.is_ordered() => {
            return invalid(path, format!("operator {} is not valid for {} fields", op, other));
        }
        _ => {}
    }

    Ok(())
}

fn require_attribute<'a>(path: &str, resolved: &'a ResolvedPath) -> Result<&'a AttributeType> {
    resolved.attribute_type().ok_or_else(|| {
        InvalidConstraintSnafu {
            path,
            reason: "the path does not represent an attribute",
        }
        .build()
    })
}

fn require_class<'a>(path: &str, resolved: &'a ResolvedPath) -> Result<&'a str> {
    resolved.end_class().ok_or_else(|| {
        InvalidConstraintSnafu {
            path,
            reason: "the path does not represent a class, or a reference to a class",
        }
        .build()
    })
}

/// Checks that `op` and `value` make sense on `path`, given the model and the subclasses in effect.
///
/// Returns the resolved path on success.
pub(crate) fn validate(
    model: &Model,
    subclasses: &Subclasses,
    path: &str,
    op: Operator,
    value: &ConstraintValue,
) -> Result<ResolvedPath> {
    let resolved = model
        .resolve_path_with(path, subclasses)
        .map_err(|e| path_error(path, e))?;

    match (op.family(), value) {
        (OperatorFamily::Unary, ConstraintValue::Empty) => {}
        (OperatorFamily::Unary, _) => {
            return invalid(path, format!("operator {} takes no value", op));
        }
        (OperatorFamily::Binary, ConstraintValue::Single(v)) => {
            let ty = require_attribute(path, &resolved)?;
            check_scalar(path, op, ty, v)?;
        }
        (OperatorFamily::Multi, ConstraintValue::Many(values)) => {
            let ty = require_attribute(path, &resolved)?;
            ensure!(
                !values.is_empty(),
                InvalidConstraintSnafu {
                    path,
                    reason: format!("operator {} needs at least one value", op)
                }
            );
            for v in values.iter() {
                check_scalar(path, op, ty, v)?;
            }
        }
        (OperatorFamily::List, ConstraintValue::Single(list_name)) => {
            require_class(path, &resolved)?;
            ensure!(
                !list_name.trim().is_empty(),
                InvalidConstraintSnafu {
                    path,
                    reason: "the list name is empty"
                }
            );
        }
        (OperatorFamily::Lookup, ConstraintValue::Single(_))
        | (OperatorFamily::Lookup, ConstraintValue::Lookup { .. }) => {
            require_class(path, &resolved)?;
        }
        (OperatorFamily::Loop, ConstraintValue::Single(loop_path)) => {
            let class = require_class(path, &resolved)?;
            let other = model
                .resolve_path_with(loop_path, subclasses)
                .map_err(|e| path_error(loop_path, e))?;
            let other_class = other.end_class().ok_or_else(|| {
                InvalidPathSnafu {
                    path: loop_path.as_str(),
                    reason: "the loop path does not represent a class",
                }
                .build()
            })?;
            ensure!(
                other.root() == resolved.root(),
                InvalidConstraintSnafu {
                    path,
                    reason: format!("loop path '{}' has a different root", loop_path)
                }
            );
            let compatible = match (model.get_class(class), model.get_class(other_class)) {
                (Ok(a), Ok(b)) => a.isa(&b.name) || b.isa(&a.name),
                _ => false,
            };
            ensure!(
                compatible,
                InvalidConstraintSnafu {
                    path,
                    reason: format!("'{}' and '{}' are not compatible classes", class, other_class)
                }
            );
        }
        (OperatorFamily::Range, ConstraintValue::Many(ranges)) => {
            require_class(path, &resolved)?;
            ensure!(
                !ranges.is_empty(),
                InvalidConstraintSnafu {
                    path,
                    reason: format!("operator {} needs at least one range", op)
                }
            );
        }
        (family, value) => {
            return invalid(
                path,
                format!("operator {} ({:?}) does not accept the value '{}'", op, family, value),
            );
        }
    }

    Ok(resolved)
}

impl From<UnknownOperator> for QueryError {
    fn from(e: UnknownOperator) -> Self {
        QueryError::DocumentError {
            reason: e.to_string(),
        }
    }
}
