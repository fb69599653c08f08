use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Strips the java package prefix from a type or class name.
///
/// `java.lang.String` becomes `String`, `org.intermine.model.bio.Gene` becomes `Gene`.
pub(crate) fn strip_java_prefix(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// The value type of an attribute.
#[derive(Clone, Debug, Deserialize, Hash, PartialEq, Eq, Serialize)]
pub enum AttributeType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    Other(String),
}

impl AttributeType {
    /// Maps a java type name (as found in the model description) to an attribute type.
    pub fn from_java_name(name: &str) -> Self {
        match strip_java_prefix(name) {
            "String" | "ClobAccess" => AttributeType::String,
            "int" | "Integer" | "short" | "Short" | "long" | "Long" => AttributeType::Integer,
            "float" | "Float" | "double" | "Double" | "BigDecimal" => AttributeType::Float,
            "boolean" | "Boolean" => AttributeType::Boolean,
            "Date" => AttributeType::Date,
            other => AttributeType::Other(other.to_string()),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, AttributeType::Integer | AttributeType::Float)
    }

    /// Whether values of this type have a meaningful order.
    pub fn is_ordered(&self) -> bool {
        matches!(
            self,
            AttributeType::Integer | AttributeType::Float | AttributeType::Date | AttributeType::String
        )
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeType::String => write!(f, "String"),
            AttributeType::Integer => write!(f, "Integer"),
            AttributeType::Float => write!(f, "Float"),
            AttributeType::Boolean => write!(f, "Boolean"),
            AttributeType::Date => write!(f, "Date"),
            AttributeType::Other(name) => write!(f, "{}", name),
        }
    }
}

/// What a field holds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// A data-carrying field.
    Attribute { ty: AttributeType },
    /// A link to a single object of another class.
    Reference {
        referenced_type: String,
        reverse_reference: Option<String>,
    },
    /// A link to many objects of another class.
    Collection {
        referenced_type: String,
        reverse_reference: Option<String>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    /// The class this field was declared in. Differs from the owning class for inherited fields.
    pub declared_in: String,
}

impl FieldDescriptor {
    pub fn is_attribute(&self) -> bool {
        matches!(self.kind, FieldKind::Attribute { .. })
    }

    /// Whether this field links to another class (either as a reference or a collection).
    pub fn is_reference(&self) -> bool {
        !self.is_attribute()
    }

    pub fn is_collection(&self) -> bool {
        matches!(self.kind, FieldKind::Collection { .. })
    }

    /// The class this field points to, if it points to one.
    pub fn referenced_type(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Attribute { .. } => None,
            FieldKind::Reference {
                referenced_type, ..
            }
            | FieldKind::Collection {
                referenced_type, ..
            } => Some(referenced_type),
        }
    }

    pub fn attribute_type(&self) -> Option<&AttributeType> {
        match &self.kind {
            FieldKind::Attribute { ty } => Some(ty),
            _ => None,
        }
    }
}

/// A class of the data model, with its inherited fields already merged in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassDescriptor {
    pub name: String,
    pub is_interface: bool,
    /// Direct parents, as declared.
    pub parents: Vec<String>,
    /// Every class this one inherits from, transitively.
    pub(crate) ancestors: Vec<String>,
    pub(crate) fields: BTreeMap<String, FieldDescriptor>,
}

impl ClassDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.values()
    }

    pub fn attributes(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields().filter(|f| f.is_attribute())
    }

    pub fn references(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields()
            .filter(|f| matches!(f.kind, FieldKind::Reference { .. }))
    }

    pub fn collections(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields().filter(|f| f.is_collection())
    }

    pub fn ancestors(&self) -> &[String] {
        &self.ancestors
    }

    /// Returns true if this class is `other`, or inherits from it.
    pub fn isa(&self, other: &str) -> bool {
        self.name == other || self.ancestors.iter().any(|a| a == other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn java_names_map_to_attribute_types() {
        assert_eq!(
            AttributeType::from_java_name("java.lang.String"),
            AttributeType::String
        );
        assert_eq!(AttributeType::from_java_name("int"), AttributeType::Integer);
        assert_eq!(
            AttributeType::from_java_name("java.lang.Long"),
            AttributeType::Integer
        );
        assert_eq!(
            AttributeType::from_java_name("java.math.BigDecimal"),
            AttributeType::Float
        );
        assert_eq!(
            AttributeType::from_java_name("boolean"),
            AttributeType::Boolean
        );
        assert_eq!(
            AttributeType::from_java_name("java.util.Date"),
            AttributeType::Date
        );
        assert_eq!(
            AttributeType::from_java_name("org.example.Blob"),
            AttributeType::Other("Blob".into())
        );
    }

    #[test]
    fn booleans_are_not_ordered() {
        assert!(!AttributeType::Boolean.is_ordered());
        assert!(AttributeType::Date.is_ordered());
        assert!(!AttributeType::Date.is_numeric());
    }
}
