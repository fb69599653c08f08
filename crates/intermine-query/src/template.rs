use std::collections::BTreeMap;
use std::sync::Arc;

use intermine_model::Model;

use serde::{Deserialize, Serialize};

use snafu::{ensure, ResultExt};

use crate::constraint::{ConstraintValue, Operator};
use crate::error::{DeserializeSnafu, InvalidConstraintSnafu, NotEditableSnafu, Result, UnknownCodeSnafu};
use crate::query::Query;
use crate::wire::{builder_from_document, QueryDocument};

/// Whether an optional constraint is in effect.
#[derive(Clone, Copy, Debug, Deserialize, Hash, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Switchable {
    /// Always in effect.
    Locked,
    On,
    Off,
}

impl Default for Switchable {
    fn default() -> Self {
        Switchable::Locked
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TemplateSettings {
    pub editable: bool,
    pub switchable: Switchable,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            editable: true,
            switchable: Switchable::Locked,
        }
    }
}

#[derive(Deserialize)]
struct TemplateDocument {
    #[serde(default)]
    title: String,
    #[serde(default)]
    comment: String,
    #[serde(flatten)]
    query: QueryDocument,
}

/// Templates are kept as raw JSON so one malformed entry can't sink the others.
#[derive(Deserialize)]
struct TemplatesEnvelope {
    templates: BTreeMap<String, serde_json::Value>,
}

/// A named, predefined query whose editable constraints take user values.
#[derive(Clone, Debug, PartialEq)]
pub struct Template {
    name: String,
    title: String,
    comment: String,
    query: Query,
    settings: BTreeMap<char, TemplateSettings>,
}

impl Template {
    fn from_document(name: &str, document: &TemplateDocument, model: Arc<Model>) -> Result<Template> {
        let builder = builder_from_document(&document.query, model)?;
        let query = builder.build()?;

        let mut settings = BTreeMap::new();
        for doc in document.query.constraints.iter() {
            let code = match doc.code {
                Some(code) => code.to_ascii_uppercase(),
                None => continue,
            };
            settings.insert(
                code,
                TemplateSettings {
                    editable: doc.editable.unwrap_or(true),
                    switchable: doc.switchable.unwrap_or_default(),
                },
            );
        }
        // Constraints whose code was assigned while parsing keep the defaults.
        for c in query.coded_constraints() {
            settings.entry(c.code).or_default();
        }

        Ok(Template {
            name: String::from(name),
            title: document.title.clone(),
            comment: document.comment.clone(),
            query,
            settings,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn settings(&self, code: char) -> Option<&TemplateSettings> {
        self.settings.get(&code.to_ascii_uppercase())
    }

    /// Codes of the constraints a user may fill in.
    pub fn editable_codes(&self) -> impl Iterator<Item = char> + '_ {
        self.settings
            .iter()
            .filter(|(_, s)| s.editable)
            .map(|(code, _)| *code)
    }

    fn editable_settings(&mut self, code: char) -> Result<&mut TemplateSettings> {
        let code = code.to_ascii_uppercase();
        let settings = self
            .settings
            .get_mut(&code)
            .ok_or_else(|| UnknownCodeSnafu { code }.build())?;
        ensure!(settings.editable, NotEditableSnafu { code });
        Ok(settings)
    }

    /// Sets the value of an editable constraint, keeping its operator.
    ///
    /// An optional constraint that was switched off is switched on.
    pub fn with_value<V: Into<ConstraintValue>>(&mut self, code: char, value: V) -> Result<&mut Self> {
        let op = match self.query.constraint(code) {
            Some(c) => c.op,
            None => {
                return UnknownCodeSnafu {
                    code: code.to_ascii_uppercase(),
                }
                .fail()
            }
        };
        self.with_constraint(code, op, value)
    }

    /// Sets the operator and value of an editable constraint.
    pub fn with_constraint<V: Into<ConstraintValue>>(
        &mut self,
        code: char,
        op: Operator,
        value: V,
    ) -> Result<&mut Self> {
        self.editable_settings(code)?;

        let mut builder = self.query.to_builder();
        builder.replace_constraint(code, op, value)?;
        self.query = builder.build()?;

        let settings = self.editable_settings(code)?;
        if settings.switchable == Switchable::Off {
            settings.switchable = Switchable::On;
        }
        Ok(self)
    }

    pub fn switch_off(&mut self, code: char) -> Result<&mut Self> {
        self.switch(code, Switchable::Off)
    }

    pub fn switch_on(&mut self, code: char) -> Result<&mut Self> {
        self.switch(code, Switchable::On)
    }

    fn switch(&mut self, code: char, to: Switchable) -> Result<&mut Self> {
        let path = self
            .query
            .constraint(code)
            .map(|c| c.path.clone())
            .unwrap_or_default();
        let settings = self.editable_settings(code)?;
        ensure!(
            settings.switchable != Switchable::Locked,
            InvalidConstraintSnafu {
                path,
                reason: format!("constraint '{}' is not optional", code.to_ascii_uppercase())
            }
        );
        settings.switchable = to;
        Ok(self)
    }

    /// The form parameters for `/template/results`.
    ///
    /// Editable constraints that are switched on are numbered from 1, in constraint order.
    /// Locked values are stored with the template on the service and are not sent.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![(String::from("name"), self.name.clone())];

        let sent = self.query.coded_constraints().filter(|c| {
            self.settings
                .get(&c.code)
                .map(|s| s.editable && s.switchable != Switchable::Off)
                .unwrap_or(false)
        });

        for (i, c) in sent.enumerate() {
            let n = i + 1;
            params.push((format!("constraint{}", n), c.path.clone()));
            params.push((format!("op{}", n), String::from(c.op.as_str())));
            match &c.value {
                ConstraintValue::Empty => {}
                ConstraintValue::Single(v) => params.push((format!("value{}", n), v.clone())),
                ConstraintValue::Many(values) => {
                    for v in values.iter() {
                        params.push((format!("value{}", n), v.clone()));
                    }
                }
                ConstraintValue::Lookup { value, extra_value } => {
                    params.push((format!("value{}", n), value.clone()));
                    if let Some(extra) = extra_value {
                        params.push((format!("extra{}", n), extra.clone()));
                    }
                }
            }
            params.push((format!("code{}", n), c.code.to_string()));
        }

        params
    }
}

/// Parses the service's template listing (`/templates?format=json`).
///
/// Templates that don't validate against `model` are skipped with a warning; services often
/// carry a few stale ones.
pub fn templates_from_json<B: AsRef<[u8]>>(body: B, model: &Arc<Model>) -> Result<BTreeMap<String, Template>> {
    let envelope: TemplatesEnvelope = serde_json::from_slice(body.as_ref()).context(DeserializeSnafu)?;

    let mut templates = BTreeMap::new();
    for (name, raw) in envelope.templates.into_iter() {
        let document = match serde_json::from_value::<TemplateDocument>(raw) {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!(template = %name, "skipping unreadable template: {}", e);
                continue;
            }
        };
        match Template::from_document(&name, &document, model.clone()) {
            Ok(template) => {
                templates.insert(name, template);
            }
            Err(e) => {
                tracing::warn!(template = %name, "skipping invalid template: {}", e);
            }
        }
    }

    tracing::debug!(count = templates.len(), "parsed templates");
    Ok(templates)
}

#[cfg(test)]
mod tests {
    use intermine_model::fixtures::test_model;

    use super::*;
    use crate::error::QueryError;

    const TEMPLATES: &str = r#"{"templates": {
        "employeesByAge": {
            "name": "employeesByAge",
            "title": "Employees --> age",
            "comment": "Employees in a department, by age",
            "view": ["Employee.name", "Employee.age"],
            "constraintLogic": "A and B and C",
            "constraints": [
                {"path": "Employee.age", "op": ">", "value": "30", "code": "A", "editable": true},
                {"path": "Employee.department.name", "op": "=", "value": "Sales", "code": "B", "editable": false},
                {"path": "Employee.fullTime", "op": "=", "value": "true", "code": "C", "editable": true, "switchable": "off"}
            ]
        },
        "stale": {
            "name": "stale",
            "view": ["Employee.shoeSize"]
        }
    }}"#;

    fn template() -> Template {
        let mut templates = templates_from_json(TEMPLATES, &test_model()).unwrap();
        templates.remove("employeesByAge").unwrap()
    }

    #[test]
    fn parses_templates_skipping_invalid_ones() {
        let templates = templates_from_json(TEMPLATES, &test_model()).unwrap();
        assert_eq!(templates.len(), 1);

        let t = &templates["employeesByAge"];
        assert_eq!(t.title(), "Employees --> age");
        assert_eq!(t.query().views(), &["Employee.name", "Employee.age"]);
        assert_eq!(t.editable_codes().collect::<String>(), "AC");
        assert_eq!(t.settings('c').unwrap().switchable, Switchable::Off);
    }

    #[test]
    fn unreadable_template_does_not_hide_the_others() {
        let body = r#"{"templates": {
            "good": {"name": "good", "view": ["Employee.name"]},
            "badCode": {
                "name": "badCode",
                "view": ["Employee.name"],
                "constraints": [{"path": "Employee.age", "op": ">", "value": "3", "code": "AB"}]
            },
            "notAnObject": 12
        }}"#;

        let templates = templates_from_json(body, &test_model()).unwrap();
        assert_eq!(templates.keys().collect::<Vec<_>>(), vec!["good"]);
    }

    #[test]
    fn params_skip_locked_and_switched_off_constraints() {
        let params = template().to_params();
        assert_eq!(
            params,
            vec![
                ("name".to_string(), "employeesByAge".to_string()),
                ("constraint1".to_string(), "Employee.age".to_string()),
                ("op1".to_string(), ">".to_string()),
                ("value1".to_string(), "30".to_string()),
                ("code1".to_string(), "A".to_string()),
            ]
        );
    }

    #[test]
    fn with_value_switches_on() {
        let mut t = template();
        t.with_value('C', false).unwrap();
        assert_eq!(t.settings('C').unwrap().switchable, Switchable::On);

        let params = t.to_params();
        assert!(params.contains(&("constraint2".to_string(), "Employee.fullTime".to_string())));
        assert!(params.contains(&("value2".to_string(), "false".to_string())));
    }

    #[test]
    fn with_constraint_changes_operator() {
        let mut t = template();
        t.with_constraint('a', Operator::OneOf, ["30", "40"]).unwrap();
        let params = t.to_params();
        let values: Vec<&str> = params
            .iter()
            .filter(|(k, _)| k == "value1")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(values, vec!["30", "40"]);
        assert!(params.contains(&("op1".to_string(), "ONE OF".to_string())));
    }

    #[test]
    fn locked_constraints_are_refused() {
        let mut t = template();
        assert!(matches!(
            t.with_value('B', "Accounting"),
            Err(QueryError::NotEditableError { code: 'B' })
        ));
        assert_eq!(
            t.query().constraint('B').unwrap().value,
            ConstraintValue::from("Sales")
        );
        assert!(matches!(
            t.with_value('Z', "x"),
            Err(QueryError::UnknownCodeError { code: 'Z' })
        ));
    }

    #[test]
    fn invalid_values_leave_template_untouched() {
        let mut t = template();
        let before = t.clone();
        assert!(t.with_value('A', "thirty").is_err());
        assert_eq!(t, before);
    }

    #[test]
    fn switching() {
        let mut t = template();
        t.switch_on('C').unwrap();
        assert_eq!(t.to_params().iter().filter(|(k, _)| k.starts_with("code")).count(), 2);
        t.switch_off('C').unwrap();
        assert_eq!(t.to_params().iter().filter(|(k, _)| k.starts_with("code")).count(), 1);
        assert!(matches!(
            t.switch_off('A'),
            Err(QueryError::InvalidConstraintError { .. })
        ));
    }
}
