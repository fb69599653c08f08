//! The document form of a query, shared by its JSON and XML renderings.
use std::sync::Arc;

use intermine_model::Model;

use serde::{Deserialize, Serialize};

use snafu::{ensure, ResultExt};

use crate::constraint::{Constraint, ConstraintValue, Operator, OperatorFamily};
use crate::error::{DeserializeSnafu, DocumentSnafu, Result, SerializeSnafu};
use crate::query::{Direction, Join, PathDescription, Query, QueryBuilder, SortOrder};
use crate::template::Switchable;

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintDocument {
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<char>,

    /// Set on subclass constraints only.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub subclass: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editable: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switchable: Option<Switchable>,
}

impl ConstraintDocument {
    fn is_subclass(&self) -> bool {
        self.subclass.is_some()
            && self
                .op
                .as_deref()
                .map_or(true, |op| op.trim().eq_ignore_ascii_case("ISA"))
    }

    fn constraint_value(&self, op: Operator) -> Result<ConstraintValue> {
        let missing = |field: &str| {
            DocumentSnafu {
                reason: format!(
                    "constraint on '{}' with operator {} has no '{}'",
                    self.path, op, field
                ),
            }
            .fail()
        };

        let value = match op.family() {
            OperatorFamily::Unary => ConstraintValue::Empty,
            OperatorFamily::Binary | OperatorFamily::List => match self.value.clone() {
                Some(v) => ConstraintValue::Single(v),
                None => return missing("value"),
            },
            OperatorFamily::Multi | OperatorFamily::Range => match self.values.clone() {
                Some(v) => ConstraintValue::Many(v),
                None => return missing("values"),
            },
            OperatorFamily::Lookup => match self.value.clone() {
                Some(value) => ConstraintValue::Lookup {
                    value,
                    extra_value: self.extra_value.clone(),
                },
                None => return missing("value"),
            },
            OperatorFamily::Loop => match self.loop_path.clone().or_else(|| self.value.clone()) {
                Some(v) => ConstraintValue::Single(v),
                None => return missing("loopPath"),
            },
        };
        Ok(value)
    }

    fn from_constraint(c: &Constraint) -> Self {
        match c {
            Constraint::Subclass(s) => ConstraintDocument {
                path: s.path.clone(),
                subclass: Some(s.subclass.clone()),
                ..Default::default()
            },
            Constraint::Coded(c) => {
                let mut doc = ConstraintDocument {
                    path: c.path.clone(),
                    op: Some(String::from(c.op.as_str())),
                    code: Some(c.code),
                    ..Default::default()
                };
                match (&c.value, c.op.family()) {
                    (ConstraintValue::Empty, _) => {}
                    (ConstraintValue::Single(v), OperatorFamily::Loop) => doc.loop_path = Some(v.clone()),
                    (ConstraintValue::Single(v), _) => doc.value = Some(v.clone()),
                    (ConstraintValue::Many(v), _) => doc.values = Some(v.clone()),
                    (ConstraintValue::Lookup { value, extra_value }, _) => {
                        doc.value = Some(value.clone());
                        doc.extra_value = extra_value.clone();
                    }
                }
                doc
            }
        }
    }
}

/// Wire form of a query.
///
/// Every category keeps its own insertion order, independently of the order categories were
/// filled in.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDocument {
    #[serde(default)]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub view: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort_order: Vec<SortOrder>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint_logic: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub joins: Vec<Join>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path_descriptions: Vec<PathDescription>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<ConstraintDocument>,
}

#[derive(PartialEq)]
enum ConstraintKey {
    Subclass(String),
    Code(char),
}

impl ConstraintKey {
    fn of(c: &Constraint) -> Self {
        match c {
            Constraint::Subclass(s) => ConstraintKey::Subclass(s.path.clone()),
            Constraint::Coded(c) => ConstraintKey::Code(c.code),
        }
    }
}

impl Query {
    pub fn to_document(&self) -> QueryDocument {
        let coded = self.coded_constraints().count();
        QueryDocument {
            model: String::from(self.model().name()),
            name: self.name().map(String::from),
            description: self.description().map(String::from),
            view: self.views().to_vec(),
            sort_order: self.sort_order(),
            constraint_logic: if coded > 1 {
                self.logic().map(|l| l.to_string())
            } else {
                None
            },
            joins: self.joins().to_vec(),
            path_descriptions: self.path_descriptions().to_vec(),
            constraints: self
                .constraints()
                .iter()
                .map(ConstraintDocument::from_constraint)
                .collect(),
        }
    }

    /// Renders the query as a JSON document.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&self.to_document()).context(SerializeSnafu)
    }

    /// Parses a query rendered by [`Query::to_json`], validating it against `model`.
    pub fn from_json(json: &str, model: Arc<Model>) -> Result<Query> {
        let document: QueryDocument = serde_json::from_str(json).context(DeserializeSnafu)?;
        Query::from_document(&document, model)
    }

    pub fn from_document(document: &QueryDocument, model: Arc<Model>) -> Result<Query> {
        builder_from_document(document, model)?.build()
    }
}

/// Replays a document into a builder. Every path and constraint is checked along the way.
pub(crate) fn builder_from_document(document: &QueryDocument, model: Arc<Model>) -> Result<QueryBuilder> {
    ensure!(
        document.model.is_empty() || document.model == model.name(),
        DocumentSnafu {
            reason: format!(
                "the query is for the '{}' model, not '{}'",
                document.model,
                model.name()
            )
        }
    );

    let mut builder = QueryBuilder::new(model);
    if let Some(name) = document.name.as_ref() {
        builder.set_name(name.as_str());
    }
    if let Some(description) = document.description.as_ref() {
        builder.set_description(description.as_str());
    }

    // Subclasses first: views and constraints may rely on them.
    for doc in document.constraints.iter().filter(|d| d.is_subclass()) {
        if let Some(subclass) = doc.subclass.as_ref() {
            builder.add_subclass_constraint(&doc.path, subclass)?;
        }
    }

    builder.add_views(document.view.iter())?;

    // Explicit codes are claimed before any missing ones get assigned.
    let mut slots: Vec<Option<ConstraintKey>> = Vec::with_capacity(document.constraints.len());
    let mut uncoded = Vec::new();
    for doc in document.constraints.iter() {
        if doc.is_subclass() {
            slots.push(Some(ConstraintKey::Subclass(doc.path.trim().to_string())));
            continue;
        }

        let op: Operator = match doc.op.as_ref() {
            Some(op) => op.parse()?,
            None => {
                return DocumentSnafu {
                    reason: format!("constraint on '{}' has no operator", doc.path),
                }
                .fail()
            }
        };
        let value = doc.constraint_value(op)?;
        match doc.code {
            Some(code) => {
                builder.add_constraint_with_code(&doc.path, op, value, code)?;
                slots.push(Some(ConstraintKey::Code(code.to_ascii_uppercase())));
            }
            None => {
                uncoded.push((slots.len(), doc.path.as_str(), op, value));
                slots.push(None);
            }
        }
    }
    for (slot, path, op, value) in uncoded {
        let code = builder.add_constraint(path, op, value)?;
        slots[slot] = Some(ConstraintKey::Code(code));
    }

    let order: Vec<ConstraintKey> = slots.into_iter().flatten().collect();
    builder
        .constraints
        .sort_by_key(|c| order.iter().position(|k| *k == ConstraintKey::of(c)));

    for join in document.joins.iter() {
        builder.add_join(&join.path, join.style)?;
    }
    for description in document.path_descriptions.iter() {
        builder.add_path_description(&description.path, &description.description)?;
    }

    // The default order is implied; keep it implicit.
    let implied = document.sort_order.len() == 1
        && document.view.first() == Some(&document.sort_order[0].path)
        && document.sort_order[0].direction == Direction::Asc;
    if !implied {
        for sort in document.sort_order.iter() {
            builder.add_sort_order(&sort.path, sort.direction)?;
        }
    }

    if let Some(logic) = document.constraint_logic.as_ref() {
        if !logic.trim().is_empty() {
            builder.set_logic(logic)?;
        }
    }

    Ok(builder)
}
