use std::collections::BTreeMap;
use std::fmt;

use snafu::ensure;

use crate::descriptor::{AttributeType, ClassDescriptor, FieldKind};
use crate::model::{InvalidPathSnafu, Model, Result};

/// Subclass constraints in effect while resolving a path.
///
/// Maps a path prefix (e.g. `Department.employees`) to the class it is narrowed to (e.g. `Manager`).
pub type Subclasses = BTreeMap<String, String>;

/// What a resolved path ends on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathEnd {
    /// The path is a bare class name.
    Root { class: String },
    /// The path ends on a data field.
    Attribute { field: String, ty: AttributeType },
    /// The path ends on a reference or collection to `class`.
    Reference {
        field: String,
        class: String,
        collection: bool,
    },
}

/// A path that was walked successfully through the class graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedPath {
    path: String,
    root: String,
    end: PathEnd,
}

impl ResolvedPath {
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// The class the path starts from.
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn end(&self) -> &PathEnd {
        &self.end
    }

    pub fn is_attribute(&self) -> bool {
        matches!(self.end, PathEnd::Attribute { .. })
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.end, PathEnd::Reference { .. })
    }

    /// Whether the path denotes objects (a root class or a reference) rather than values.
    pub fn is_class(&self) -> bool {
        self.end_class().is_some()
    }

    /// The class of the objects at the end of the path, if it doesn't end on an attribute.
    pub fn end_class(&self) -> Option<&str> {
        match &self.end {
            PathEnd::Root { class } => Some(class),
            PathEnd::Reference { class, .. } => Some(class),
            PathEnd::Attribute { .. } => None,
        }
    }

    pub fn attribute_type(&self) -> Option<&AttributeType> {
        match &self.end {
            PathEnd::Attribute { ty, .. } => Some(ty),
            _ => None,
        }
    }
}

impl fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

impl Model {
    /// Walks a dotted path through the class graph.
    ///
    /// Fails with `InvalidPathError` if the root is not a class, if a segment names a field the
    /// current class doesn't have, or if the path tries to continue past an attribute.
    ///
    /// ```
    /// # use intermine_model::Model;
    /// # fn check(model: &Model) -> Result<(), intermine_model::ModelError> {
    /// let path = model.resolve_path("Gene.organism.name")?;
    /// assert!(path.is_attribute());
    /// # Ok(())
    /// # }
    /// ```
    pub fn resolve_path(&self, path: &str) -> Result<ResolvedPath> {
        self.resolve_path_with(path, &Subclasses::new())
    }

    /// Same as [`Model::resolve_path`], following any subclass constraints along the way.
    pub fn resolve_path_with(&self, path: &str, subclasses: &Subclasses) -> Result<ResolvedPath> {
        let mut segments = path.split('.');
        let root_name = segments.next().unwrap_or_default();

        ensure!(
            path.split('.').all(|s| !s.is_empty()),
            InvalidPathSnafu {
                path,
                reason: "empty path segment"
            }
        );

        let declared_root = self.class(root_name).ok_or_else(|| {
            InvalidPathSnafu {
                path,
                reason: format!("'{}' is not a class in this model", root_name),
            }
            .build()
        })?;

        let root_class = match subclasses.get(root_name) {
            Some(sub) => self.subclass(path, root_name, sub)?,
            None => declared_root,
        };

        let mut current: Option<&ClassDescriptor> = Some(root_class);
        let mut end = PathEnd::Root {
            class: root_class.name.clone(),
        };
        let mut prefix = String::from(root_name);
        let mut previous = root_name;

        for segment in segments {
            let class = match current {
                Some(c) => c,
                None => {
                    return InvalidPathSnafu {
                        path,
                        reason: format!("'{}' is an attribute and cannot be traversed", previous),
                    }
                    .fail()
                }
            };

            let field = class.field(segment).ok_or_else(|| {
                InvalidPathSnafu {
                    path,
                    reason: format!("there is no field called '{}' in {}", segment, class.name),
                }
                .build()
            })?;

            prefix.push('.');
            prefix.push_str(segment);
            previous = segment;

            match &field.kind {
                FieldKind::Attribute { ty } => {
                    end = PathEnd::Attribute {
                        field: field.name.clone(),
                        ty: ty.clone(),
                    };
                    current = None;
                }
                FieldKind::Reference {
                    referenced_type, ..
                }
                | FieldKind::Collection {
                    referenced_type, ..
                } => {
                    let target = match subclasses.get(&prefix) {
                        Some(sub) => self.subclass(path, referenced_type, sub)?,
                        None => self.class(referenced_type).ok_or_else(|| {
                            InvalidPathSnafu {
                                path,
                                reason: format!(
                                    "'{}' references '{}', which is not in the model",
                                    segment, referenced_type
                                ),
                            }
                            .build()
                        })?,
                    };
                    end = PathEnd::Reference {
                        field: field.name.clone(),
                        class: target.name.clone(),
                        collection: field.is_collection(),
                    };
                    current = Some(target);
                }
            }
        }

        Ok(ResolvedPath {
            path: String::from(path),
            root: String::from(root_name),
            end,
        })
    }

    fn subclass(&self, path: &str, base: &str, sub: &str) -> Result<&ClassDescriptor> {
        let class = self.class(sub).ok_or_else(|| {
            InvalidPathSnafu {
                path,
                reason: format!("subclass '{}' is not in the model", sub),
            }
            .build()
        })?;

        ensure!(
            class.isa(base),
            InvalidPathSnafu {
                path,
                reason: format!("'{}' is not a subclass of '{}'", sub, base)
            }
        );

        Ok(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModelError;

    const TEST_MODEL: &str = include_str!("../testdata/testmodel.json");

    fn model() -> Model {
        Model::from_json(TEST_MODEL).unwrap()
    }

    fn invalid(result: Result<ResolvedPath>) -> String {
        match result {
            Err(ModelError::InvalidPathError { reason, .. }) => reason,
            other => panic!("expected an invalid path error, got {:?}", other),
        }
    }

    #[test]
    fn resolve_root() {
        let p = model().resolve_path("Employee").unwrap();
        assert_eq!(
            p.end(),
            &PathEnd::Root {
                class: "Employee".into()
            }
        );
        assert!(p.is_class());
        assert!(!p.is_reference());
    }

    #[test]
    fn resolve_attribute() {
        let p = model().resolve_path("Employee.department.company.vatNumber").unwrap();
        assert_eq!(p.root(), "Employee");
        assert_eq!(p.attribute_type(), Some(&AttributeType::Integer));
        assert!(p.end_class().is_none());
    }

    #[test]
    fn resolve_reference_and_collection() {
        let m = model();
        let r = m.resolve_path("Employee.department").unwrap();
        assert_eq!(
            r.end(),
            &PathEnd::Reference {
                field: "department".into(),
                class: "Department".into(),
                collection: false
            }
        );

        let c = m.resolve_path("Department.employees").unwrap();
        assert_eq!(c.end_class(), Some("Employee"));
        assert!(matches!(
            c.end(),
            PathEnd::Reference {
                collection: true,
                ..
            }
        ));
    }

    #[test]
    fn every_field_of_every_class_resolves_to_its_declared_type() {
        let m = model();
        for class in m.classes() {
            for field in class.fields() {
                let path = format!("{}.{}", class.name, field.name);
                let resolved = m.resolve_path(&path).unwrap();
                match &field.kind {
                    FieldKind::Attribute { ty } => {
                        assert_eq!(resolved.attribute_type(), Some(ty))
                    }
                    _ => assert_eq!(resolved.end_class(), field.referenced_type()),
                }

                let bogus = format!("{}.{}.nope", class.name, field.name);
                assert!(m.resolve_path(&bogus).is_err());
            }
        }
    }

    #[test]
    fn unknown_root() {
        assert_eq!(
            invalid(model().resolve_path("Foo.name")),
            "'Foo' is not a class in this model"
        );
    }

    #[test]
    fn unknown_field() {
        assert_eq!(
            invalid(model().resolve_path("Employee.department.nope")),
            "there is no field called 'nope' in Department"
        );
    }

    #[test]
    fn traversal_through_attribute() {
        assert_eq!(
            invalid(model().resolve_path("Employee.name.length")),
            "'name' is an attribute and cannot be traversed"
        );
    }

    #[test]
    fn empty_segments() {
        let m = model();
        for bad in ["", "Employee.", ".name", "Employee..name"] {
            assert_eq!(invalid(m.resolve_path(bad)), "empty path segment");
        }
    }

    #[test]
    fn subclass_opens_fields() {
        let m = model();
        assert!(m.resolve_path("Department.employees.seniority").is_err());

        let mut subclasses = Subclasses::new();
        subclasses.insert("Department.employees".into(), "Manager".into());
        let p = m
            .resolve_path_with("Department.employees.seniority", &subclasses)
            .unwrap();
        assert_eq!(p.attribute_type(), Some(&AttributeType::Integer));
    }

    #[test]
    fn subclass_on_root() {
        let m = model();
        let mut subclasses = Subclasses::new();
        subclasses.insert("Employee".into(), "CEO".into());
        let p = m.resolve_path_with("Employee.salary", &subclasses).unwrap();
        assert_eq!(p.root(), "Employee");
        assert!(p.is_attribute());
    }

    #[test]
    fn subclass_must_inherit() {
        let m = model();
        let mut subclasses = Subclasses::new();
        subclasses.insert("Department.employees".into(), "Company".into());
        assert_eq!(
            invalid(m.resolve_path_with("Department.employees.name", &subclasses)),
            "'Company' is not a subclass of 'Employee'"
        );
    }
}
