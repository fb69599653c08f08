use std::sync::Arc;

use intermine_model::{Model, PathEnd, Subclasses};

use serde::{Deserialize, Serialize};

use snafu::ensure;

use crate::constraint::{
    normalize_code, validate, CodedConstraint, Constraint, ConstraintValue, Operator, SubclassConstraint,
};
use crate::error::{
    path_error, EmptyViewSnafu, InvalidConstraintSnafu, InvalidLogicSnafu, InvalidPathSnafu,
    InvalidSortOrderSnafu, Result, UnknownCodeSnafu,
};
use crate::logic::Logic;

#[derive(Clone, Copy, Debug, Deserialize, Hash, PartialEq, Eq, Serialize)]
pub enum Direction {
    #[serde(rename = "ASC")]
    Asc,
    #[serde(rename = "DESC")]
    Desc,
}

#[derive(Clone, Debug, Deserialize, Hash, PartialEq, Eq, Serialize)]
pub struct SortOrder {
    pub path: String,
    pub direction: Direction,
}

#[derive(Clone, Copy, Debug, Deserialize, Hash, PartialEq, Eq, Serialize)]
pub enum JoinStyle {
    #[serde(rename = "INNER")]
    Inner,
    #[serde(rename = "OUTER")]
    Outer,
}

#[derive(Clone, Debug, Deserialize, Hash, PartialEq, Eq, Serialize)]
pub struct Join {
    pub path: String,
    pub style: JoinStyle,
}

/// A display label for a path.
#[derive(Clone, Debug, Deserialize, Hash, PartialEq, Eq, Serialize)]
pub struct PathDescription {
    pub path: String,
    pub description: String,
}

fn root_of(path: &str) -> &str {
    path.split('.').next().unwrap_or_default()
}

/// Builds a query, checking every path and constraint against the model as it is added.
///
/// All mutators return `Result<&mut Self>` so calls can be chained with `?`.
#[derive(Clone, Debug)]
pub struct QueryBuilder {
    pub(crate) model: Arc<Model>,
    pub(crate) name: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) root: Option<String>,
    pub(crate) views: Vec<String>,
    pub(crate) constraints: Vec<Constraint>,
    pub(crate) logic: Option<Logic>,
    pub(crate) sort_order: Vec<SortOrder>,
    pub(crate) joins: Vec<Join>,
    pub(crate) path_descriptions: Vec<PathDescription>,
}

impl QueryBuilder {
    pub fn new(model: Arc<Model>) -> Self {
        Self {
            model,
            name: None,
            description: None,
            root: None,
            views: Vec::new(),
            constraints: Vec::new(),
            logic: None,
            sort_order: Vec::new(),
            joins: Vec::new(),
            path_descriptions: Vec::new(),
        }
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn set_name<S: Into<String>>(&mut self, name: S) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    pub fn set_description<S: Into<String>>(&mut self, description: S) -> &mut Self {
        self.description = Some(description.into());
        self
    }

    pub fn views(&self) -> &[String] {
        &self.views
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn constraint(&self, code: char) -> Option<&CodedConstraint> {
        let code = code.to_ascii_uppercase();
        self.coded().find(|c| c.code == code)
    }

    fn coded(&self) -> impl Iterator<Item = &CodedConstraint> {
        self.constraints.iter().filter_map(Constraint::as_coded)
    }

    pub(crate) fn subclasses(&self) -> Subclasses {
        subclasses_of(&self.constraints)
    }

    fn check_root(&self, path: &str) -> Result<()> {
        if let Some(expected) = self.root.as_ref() {
            ensure!(
                expected == root_of(path),
                InvalidPathSnafu {
                    path,
                    reason: format!("all paths must start from the query root '{}'", expected)
                }
            );
        }
        Ok(())
    }

    fn claim_root(&mut self, path: &str) {
        if self.root.is_none() {
            self.root = Some(String::from(root_of(path)));
        }
    }

    /// Adds an output column. The path must end on an attribute.
    ///
    /// A path already in the view is not added twice.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn add_view(&mut self, path: &str) -> Result<&mut Self> {
        let path = path.trim();
        self.check_root(path)?;

        let resolved = self
            .model
            .resolve_path_with(path, &self.subclasses())
            .map_err(|e| path_error(path, e))?;

        ensure!(
            resolved.is_attribute(),
            InvalidPathSnafu {
                path,
                reason: "output paths must end on an attribute"
            }
        );

        self.claim_root(path);
        if !self.views.iter().any(|v| v == path) {
            self.views.push(String::from(path));
        }
        Ok(self)
    }

    pub fn add_views<I, P>(&mut self, paths: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        for path in paths {
            self.add_view(path.as_ref())?;
        }
        Ok(self)
    }

    /// Adds every path in a string separated by commas and/or whitespace.
    pub fn add_view_str(&mut self, paths: &str) -> Result<&mut Self> {
        self.add_views(
            paths
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|p| !p.is_empty()),
        )
    }

    fn next_code(&self, path: &str) -> Result<char> {
        ('A'..='Z')
            .find(|code| self.constraint(*code).is_none())
            .ok_or_else(|| {
                InvalidConstraintSnafu {
                    path,
                    reason: "all constraint codes (A-Z) are in use",
                }
                .build()
            })
    }

    /// Adds a constraint under the next free code, and returns that code.
    pub fn add_constraint<V: Into<ConstraintValue>>(
        &mut self,
        path: &str,
        op: Operator,
        value: V,
    ) -> Result<char> {
        let path = path.trim();
        let code = self.next_code(path)?;
        self.add_constraint_with_code(path, op, value, code)?;
        Ok(code)
    }

    pub fn add_constraint_with_code<V: Into<ConstraintValue>>(
        &mut self,
        path: &str,
        op: Operator,
        value: V,
        code: char,
    ) -> Result<&mut Self> {
        let path = path.trim();
        let code = normalize_code(path, code)?;
        ensure!(
            self.constraint(code).is_none(),
            InvalidConstraintSnafu {
                path,
                reason: format!("the code '{}' is already in use", code)
            }
        );

        self.check_root(path)?;
        let value = value.into();
        validate(&self.model, &self.subclasses(), path, op, &value)?;

        tracing::trace!(path, %op, %code, "adding constraint");
        self.claim_root(path);
        self.constraints.push(Constraint::Coded(CodedConstraint {
            path: String::from(path),
            op,
            value,
            code,
        }));
        Ok(self)
    }

    /// Narrows the objects at `path` to `subclass`. Replaces an earlier subclass constraint on
    /// the same path.
    pub fn add_subclass_constraint(&mut self, path: &str, subclass: &str) -> Result<&mut Self> {
        let path = path.trim();
        self.check_root(path)?;

        let mut subclasses = self.subclasses();
        subclasses.insert(String::from(path), String::from(subclass));
        let resolved = self
            .model
            .resolve_path_with(path, &subclasses)
            .map_err(|e| path_error(path, e))?;

        ensure!(
            !matches!(resolved.end(), PathEnd::Attribute { .. }),
            InvalidConstraintSnafu {
                path,
                reason: "only classes and references can be subclassed"
            }
        );

        self.claim_root(path);
        let constraint = Constraint::Subclass(SubclassConstraint {
            path: String::from(path),
            subclass: String::from(subclass),
        });
        match self
            .constraints
            .iter_mut()
            .find(|c| matches!(c, Constraint::Subclass(s) if s.path == path))
        {
            Some(existing) => *existing = constraint,
            None => self.constraints.push(constraint),
        }
        Ok(self)
    }

    /// Changes the operator and value of an existing constraint, keeping its path and code.
    pub fn replace_constraint<V: Into<ConstraintValue>>(
        &mut self,
        code: char,
        op: Operator,
        value: V,
    ) -> Result<&mut Self> {
        let code = code.to_ascii_uppercase();
        let path = match self.constraint(code) {
            Some(c) => c.path.clone(),
            None => return UnknownCodeSnafu { code }.fail(),
        };

        let value = value.into();
        validate(&self.model, &self.subclasses(), &path, op, &value)?;

        for c in self.constraints.iter_mut() {
            if let Constraint::Coded(coded) = c {
                if coded.code == code {
                    coded.op = op;
                    coded.value = value;
                    break;
                }
            }
        }
        Ok(self)
    }

    /// Removes a constraint and drops its code from the logic.
    pub fn remove_constraint(&mut self, code: char) -> Result<&mut Self> {
        let code = code.to_ascii_uppercase();
        ensure!(self.constraint(code).is_some(), UnknownCodeSnafu { code });

        self.constraints.retain(|c| c.code() != Some(code));
        self.logic = self.logic.take().and_then(|l| l.without(code));
        Ok(self)
    }

    /// Sets how coded constraints combine, e.g. `A and (B or C)`.
    pub fn set_logic(&mut self, expr: &str) -> Result<&mut Self> {
        let logic = Logic::parse(expr)?;
        for code in logic.codes() {
            ensure!(
                self.constraint(code).is_some(),
                InvalidLogicSnafu {
                    logic: expr,
                    reason: format!("there is no constraint with the code '{}'", code)
                }
            );
        }
        self.logic = Some(logic);
        Ok(self)
    }

    pub fn add_sort_order(&mut self, path: &str, direction: Direction) -> Result<&mut Self> {
        let path = path.trim();
        self.check_root(path)?;

        let resolved = self
            .model
            .resolve_path_with(path, &self.subclasses())
            .map_err(|e| path_error(path, e))?;
        ensure!(
            resolved.is_attribute(),
            InvalidSortOrderSnafu {
                path,
                reason: "only attributes can be sorted on"
            }
        );

        self.claim_root(path);
        self.sort_order.retain(|s| s.path != path);
        self.sort_order.push(SortOrder {
            path: String::from(path),
            direction,
        });
        Ok(self)
    }

    /// Sets the join style of a reference. Joins are inner unless made outer here.
    pub fn add_join(&mut self, path: &str, style: JoinStyle) -> Result<&mut Self> {
        let path = path.trim();
        self.check_root(path)?;

        let resolved = self
            .model
            .resolve_path_with(path, &self.subclasses())
            .map_err(|e| path_error(path, e))?;
        ensure!(
            resolved.is_reference(),
            InvalidPathSnafu {
                path,
                reason: "joins can only be made on references and collections"
            }
        );

        self.claim_root(path);
        match self.joins.iter_mut().find(|j| j.path == path) {
            Some(existing) => existing.style = style,
            None => self.joins.push(Join {
                path: String::from(path),
                style,
            }),
        }
        Ok(self)
    }

    pub fn add_path_description(&mut self, path: &str, description: &str) -> Result<&mut Self> {
        let path = path.trim();
        self.check_root(path)?;
        self.model
            .resolve_path_with(path, &self.subclasses())
            .map_err(|e| path_error(path, e))?;

        self.claim_root(path);
        self.path_descriptions.retain(|d| d.path != path);
        self.path_descriptions.push(PathDescription {
            path: String::from(path),
            description: String::from(description),
        });
        Ok(self)
    }

    /// Checks the query as a whole and freezes it.
    ///
    /// Individual paths were checked when added. This re-checks them against the final set of
    /// subclass constraints, then checks the view is not empty, that sort paths are in the
    /// view, and that the logic (if any) uses every coded constraint.
    pub fn build(&self) -> Result<Query> {
        ensure!(!self.views.is_empty(), EmptyViewSnafu);

        let subclasses = self.subclasses();
        for view in self.views.iter() {
            self.model
                .resolve_path_with(view, &subclasses)
                .map_err(|e| path_error(view, e))?;
        }
        for c in self.coded() {
            validate(&self.model, &subclasses, &c.path, c.op, &c.value)?;
        }

        for sort in self.sort_order.iter() {
            ensure!(
                self.views.contains(&sort.path),
                InvalidSortOrderSnafu {
                    path: sort.path.as_str(),
                    reason: "sort paths must be in the view"
                }
            );
        }

        if let Some(logic) = self.logic.as_ref() {
            let used = logic.codes();
            for c in self.coded() {
                ensure!(
                    used.contains(&c.code),
                    InvalidLogicSnafu {
                        logic: logic.to_string(),
                        reason: format!("constraint '{}' is not used", c.code)
                    }
                );
            }
        }

        Ok(Query {
            model: self.model.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            views: self.views.clone(),
            constraints: self.constraints.clone(),
            logic: self.logic.clone(),
            sort_order: self.sort_order.clone(),
            joins: self.joins.clone(),
            path_descriptions: self.path_descriptions.clone(),
        })
    }

    /// Builds the query and renders it as PathQuery XML.
    pub fn serialize(&self) -> Result<String> {
        self.build()?.to_xml()
    }
}

pub(crate) fn subclasses_of(constraints: &[Constraint]) -> Subclasses {
    constraints
        .iter()
        .filter_map(|c| match c {
            Constraint::Subclass(s) => Some((s.path.clone(), s.subclass.clone())),
            Constraint::Coded(_) => None,
        })
        .collect()
}

/// A validated, immutable query.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    model: Arc<Model>,
    name: Option<String>,
    description: Option<String>,
    views: Vec<String>,
    constraints: Vec<Constraint>,
    logic: Option<Logic>,
    sort_order: Vec<SortOrder>,
    joins: Vec<Join>,
    path_descriptions: Vec<PathDescription>,
}

impl Query {
    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The class every path of the query starts from.
    pub fn root(&self) -> &str {
        self.views.first().map(|v| root_of(v)).unwrap_or_default()
    }

    pub fn views(&self) -> &[String] {
        &self.views
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn coded_constraints(&self) -> impl Iterator<Item = &CodedConstraint> {
        self.constraints.iter().filter_map(Constraint::as_coded)
    }

    pub fn constraint(&self, code: char) -> Option<&CodedConstraint> {
        let code = code.to_ascii_uppercase();
        self.coded_constraints().find(|c| c.code == code)
    }

    pub fn subclasses(&self) -> Subclasses {
        subclasses_of(&self.constraints)
    }

    /// The logic in effect: the one that was set, or every code ANDed in code order.
    pub fn logic(&self) -> Option<Logic> {
        self.logic.clone().or_else(|| {
            let mut codes: Vec<char> = self.coded_constraints().map(|c| c.code).collect();
            codes.sort_unstable();
            Logic::and_all(codes)
        })
    }

    /// The sort order in effect: the one that was set, or the first view ascending.
    pub fn sort_order(&self) -> Vec<SortOrder> {
        if !self.sort_order.is_empty() {
            return self.sort_order.clone();
        }
        self.views
            .first()
            .map(|path| SortOrder {
                path: path.clone(),
                direction: Direction::Asc,
            })
            .into_iter()
            .collect()
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn path_descriptions(&self) -> &[PathDescription] {
        &self.path_descriptions
    }

    /// Copies the query back into a builder, to derive a new query from it.
    pub fn to_builder(&self) -> QueryBuilder {
        QueryBuilder {
            model: self.model.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            root: self.views.first().map(|v| String::from(root_of(v))),
            views: self.views.clone(),
            constraints: self.constraints.clone(),
            logic: self.logic.clone(),
            sort_order: self.sort_order.clone(),
            joins: self.joins.clone(),
            path_descriptions: self.path_descriptions.clone(),
        }
    }
}
