//! Building, validating and serializing InterMine queries and templates.
mod constraint;
mod error;
mod logic;
mod query;
mod template;
mod wire;
mod xml;

pub use constraint::{
    CodedConstraint, Constraint, ConstraintValue, Operator, OperatorFamily, SubclassConstraint, UnknownOperator,
};
pub use error::{QueryError, Result};
pub use logic::Logic;
pub use query::{Direction, Join, JoinStyle, PathDescription, Query, QueryBuilder, SortOrder};
pub use template::{templates_from_json, Switchable, Template, TemplateSettings};
pub use wire::{ConstraintDocument, QueryDocument};
