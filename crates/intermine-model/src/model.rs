use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Deserialize;

use snafu::{ResultExt, Snafu};

use crate::descriptor::{strip_java_prefix, AttributeType, ClassDescriptor, FieldDescriptor, FieldKind};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ModelError {
    #[snafu(display("'{}' is not a class in this model", name))]
    UnknownClassError { name: String },

    #[snafu(display("invalid path '{}': {}", path, reason))]
    InvalidPathError { path: String, reason: String },

    #[snafu(display("failed to parse model: {}", source))]
    ModelParseError { source: serde_json::Error },
}

pub(crate) type Result<T> = std::result::Result<T, ModelError>;

#[derive(Deserialize)]
struct ModelEnvelope {
    model: RawModel,
}

#[derive(Deserialize)]
struct RawModel {
    name: String,
    #[serde(default)]
    package: String,
    classes: BTreeMap<String, RawClass>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawClass {
    name: String,
    #[serde(default)]
    extends: Vec<String>,
    #[serde(default)]
    is_interface: bool,
    #[serde(default)]
    attributes: BTreeMap<String, RawAttribute>,
    #[serde(default)]
    references: BTreeMap<String, RawReference>,
    #[serde(default)]
    collections: BTreeMap<String, RawReference>,
}

#[derive(Deserialize)]
struct RawAttribute {
    name: String,
    #[serde(rename = "type")]
    ty: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReference {
    name: String,
    referenced_type: String,
    #[serde(default)]
    reverse_reference: Option<String>,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.is_empty())
}

/// The data model of a warehouse.
///
/// Maps class names to class descriptors. Inherited fields are merged into every class
/// when the model is built, and the model is never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Model {
    name: String,
    package: String,
    classes: BTreeMap<String, ClassDescriptor>,
}

impl Model {
    /// Parses the JSON model description served at `/model?format=json`.
    pub fn from_json<B: AsRef<[u8]>>(body: B) -> Result<Self> {
        let envelope: ModelEnvelope =
            serde_json::from_slice(body.as_ref()).context(ModelParseSnafu)?;
        Ok(Self::from_raw(envelope.model))
    }

    fn from_raw(raw: RawModel) -> Self {
        let mut declared: HashMap<String, ClassDescriptor> = HashMap::with_capacity(raw.classes.len());

        for (_, raw_class) in raw.classes.into_iter() {
            let class_name = raw_class.name.clone();
            let mut fields = BTreeMap::new();

            // Every persistent object carries an id.
            fields.insert(
                String::from("id"),
                FieldDescriptor {
                    name: String::from("id"),
                    kind: FieldKind::Attribute {
                        ty: AttributeType::Integer,
                    },
                    declared_in: class_name.clone(),
                },
            );

            for (_, attr) in raw_class.attributes {
                fields.insert(
                    attr.name.clone(),
                    FieldDescriptor {
                        name: attr.name,
                        kind: FieldKind::Attribute {
                            ty: AttributeType::from_java_name(&attr.ty),
                        },
                        declared_in: class_name.clone(),
                    },
                );
            }

            for (_, r) in raw_class.references {
                fields.insert(
                    r.name.clone(),
                    FieldDescriptor {
                        name: r.name,
                        kind: FieldKind::Reference {
                            referenced_type: strip_java_prefix(&r.referenced_type).to_string(),
                            reverse_reference: non_empty(r.reverse_reference),
                        },
                        declared_in: class_name.clone(),
                    },
                );
            }

            for (_, c) in raw_class.collections {
                fields.insert(
                    c.name.clone(),
                    FieldDescriptor {
                        name: c.name,
                        kind: FieldKind::Collection {
                            referenced_type: strip_java_prefix(&c.referenced_type).to_string(),
                            reverse_reference: non_empty(c.reverse_reference),
                        },
                        declared_in: class_name.clone(),
                    },
                );
            }

            let parents = raw_class
                .extends
                .iter()
                .map(|p| strip_java_prefix(p).to_string())
                .filter(|p| !p.is_empty())
                .collect();

            declared.insert(
                class_name.clone(),
                ClassDescriptor {
                    name: class_name,
                    is_interface: raw_class.is_interface,
                    parents,
                    ancestors: Vec::new(),
                    fields,
                },
            );
        }

        let mut classes = BTreeMap::new();
        for name in declared.keys() {
            let ancestors = ancestry(&declared, name);

            let mut class = declared[name].clone();
            for ancestor in ancestors.iter() {
                for (field_name, field) in declared[ancestor].fields.iter() {
                    // Fields declared closer to the class win over inherited ones.
                    class
                        .fields
                        .entry(field_name.clone())
                        .or_insert_with(|| field.clone());
                }
            }
            class.ancestors = ancestors;
            classes.insert(name.clone(), class);
        }

        tracing::debug!(model = %raw.name, classes = classes.len(), "built model");

        Self {
            name: raw.name,
            package: raw.package,
            classes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassDescriptor> {
        self.classes.values()
    }

    /// Returns the class with the given name.
    ///
    /// A dotted path is also accepted, in which case the class at the end of the path is returned.
    pub fn get_class(&self, name: &str) -> Result<&ClassDescriptor> {
        if name.contains('.') {
            let resolved = self
                .resolve_path(name)
                .map_err(|_| ModelError::UnknownClassError {
                    name: String::from(name),
                })?;
            let class_name = resolved.end_class().ok_or(ModelError::UnknownClassError {
                name: String::from(name),
            })?;
            return self.get_class(class_name);
        }

        self.classes.get(name).ok_or(ModelError::UnknownClassError {
            name: String::from(name),
        })
    }

    pub(crate) fn class(&self, name: &str) -> Option<&ClassDescriptor> {
        self.classes.get(name)
    }
}

/// Lists every known ancestor of a class, nearest first.
///
/// Parents missing from the model (e.g. `java.lang.Object`) are skipped. Cycles are cut.
fn ancestry(classes: &HashMap<String, ClassDescriptor>, name: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    seen.insert(name.to_string());

    let mut ancestors = Vec::new();
    let mut pending: Vec<String> = classes[name].parents.clone();
    pending.reverse();

    while let Some(parent) = pending.pop() {
        if !seen.insert(parent.clone()) {
            continue;
        }
        if let Some(parent_class) = classes.get(&parent) {
            ancestors.push(parent.clone());
            pending.extend(parent_class.parents.iter().rev().cloned());
        }
    }

    ancestors
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MODEL: &str = include_str!("../testdata/testmodel.json");

    fn model() -> Model {
        Model::from_json(TEST_MODEL).unwrap()
    }

    #[test]
    fn parses_all_classes() {
        let m = model();
        assert_eq!(m.name(), "testmodel");
        assert_eq!(m.package(), "org.intermine.model.testmodel");
        assert_eq!(m.classes().count(), 11);
    }

    #[test]
    fn get_class_by_name() {
        let m = model();
        for good in ["Employee", "Company", "Department"] {
            assert_eq!(m.get_class(good).unwrap().name, good);
        }
    }

    #[test]
    fn get_class_unknown() {
        let err = model().get_class("Foo").unwrap_err();
        assert!(matches!(err, ModelError::UnknownClassError { ref name } if name == "Foo"));
        assert_eq!(err.to_string(), "'Foo' is not a class in this model");
    }

    #[test]
    fn get_class_through_path() {
        let m = model();
        let ceo = m.get_class("Employee.department.company.CEO").unwrap();
        assert_eq!(ceo.name, "CEO");
        assert!(ceo.isa("Employee"));
        assert!(ceo.isa("Employable"));
        assert!(!ceo.isa("Company"));

        assert!(matches!(
            m.get_class("Employee.name"),
            Err(ModelError::UnknownClassError { .. })
        ));
    }

    #[test]
    fn inherited_fields_are_merged() {
        let m = model();
        let ceo = m.get_class("CEO").unwrap();
        for f in ["name", "age", "seniority", "address", "department", "salary", "id"] {
            assert_eq!(ceo.field(f).unwrap().name, f);
        }
        assert_eq!(ceo.field("name").unwrap().declared_in, "Employable");
        assert!(ceo.field("foo").is_none());
    }

    #[test]
    fn field_kinds() {
        let m = model();
        let dep = m.get_class("Department").unwrap();
        assert!(dep.field("name").unwrap().is_attribute());
        assert!(dep.field("employees").unwrap().is_collection());
        let company = dep.field("company").unwrap();
        assert!(company.is_reference() && !company.is_collection());
        assert_eq!(company.referenced_type(), Some("Company"));
        assert_eq!(
            dep.field("company").unwrap().kind,
            FieldKind::Reference {
                referenced_type: "Company".into(),
                reverse_reference: Some("departments".into())
            }
        );
    }

    #[test]
    fn unknown_java_parent_is_ignored() {
        let employable = model().get_class("Employable").unwrap().clone();
        assert_eq!(employable.parents, vec![String::from("Object")]);
        assert!(employable.ancestors().is_empty());
    }

    #[test]
    fn inheritance_cycles_terminate() {
        let json = r#"{"model": {"name": "loop", "classes": {
            "A": {"name": "A", "extends": ["B"], "attributes": {"a": {"name": "a", "type": "int"}}},
            "B": {"name": "B", "extends": ["A"], "attributes": {"b": {"name": "b", "type": "int"}}}
        }}}"#;
        let m = Model::from_json(json).unwrap();
        let a = m.get_class("A").unwrap();
        assert_eq!(a.ancestors(), &[String::from("B")]);
        assert!(a.field("b").is_some());
    }

    #[test]
    fn malformed_model() {
        assert!(matches!(
            Model::from_json("not json"),
            Err(ModelError::ModelParseError { .. })
        ));
    }
}
