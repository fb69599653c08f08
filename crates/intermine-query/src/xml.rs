//! PathQuery XML, the form the service's query endpoints take.
use std::collections::HashMap;
use std::sync::Arc;

use intermine_model::Model;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use snafu::{ensure, ResultExt};

use crate::error::{DocumentSnafu, Result, XmlSnafu};
use crate::query::{Direction, Join, JoinStyle, PathDescription, Query, SortOrder};
use crate::template::Switchable;
use crate::wire::{builder_from_document, ConstraintDocument, QueryDocument};

type Attributes = HashMap<String, String>;

fn join_style_str(style: JoinStyle) -> &'static str {
    match style {
        JoinStyle::Inner => "INNER",
        JoinStyle::Outer => "OUTER",
    }
}

fn switchable_str(switchable: Switchable) -> &'static str {
    match switchable {
        Switchable::Locked => "locked",
        Switchable::On => "on",
        Switchable::Off => "off",
    }
}

/// `Gene.symbol asc Gene.length desc`
fn format_sort_order(sort: &[SortOrder]) -> String {
    sort.iter()
        .map(|s| {
            let direction = match s.direction {
                Direction::Asc => "asc",
                Direction::Desc => "desc",
            };
            format!("{} {}", s.path, direction)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// A path without a direction sorts ascending.
fn parse_sort_order(attr: &str) -> Result<Vec<SortOrder>> {
    let mut sort: Vec<SortOrder> = Vec::new();
    for token in attr.split_whitespace() {
        let direction = match token.to_ascii_lowercase().as_str() {
            "asc" => Some(Direction::Asc),
            "desc" => Some(Direction::Desc),
            _ => None,
        };
        match (direction, sort.last_mut()) {
            (Some(direction), Some(last)) => last.direction = direction,
            (Some(_), None) => {
                return DocumentSnafu {
                    reason: format!("sort order '{}' starts with a direction", attr),
                }
                .fail()
            }
            (None, _) => sort.push(SortOrder {
                path: String::from(token),
                direction: Direction::Asc,
            }),
        }
    }
    Ok(sort)
}

fn write_constraint(writer: &mut Writer<Vec<u8>>, c: &ConstraintDocument) -> Result<()> {
    let mut element = BytesStart::new("constraint");
    element.push_attribute(("path", c.path.as_str()));
    if let Some(subclass) = c.subclass.as_deref() {
        element.push_attribute(("type", subclass));
    }
    if let Some(op) = c.op.as_deref() {
        element.push_attribute(("op", op));
    }
    if let Some(value) = c.value.as_deref() {
        element.push_attribute(("value", value));
    }
    if let Some(extra) = c.extra_value.as_deref() {
        element.push_attribute(("extraValue", extra));
    }
    if let Some(loop_path) = c.loop_path.as_deref() {
        element.push_attribute(("loopPath", loop_path));
    }
    if let Some(code) = c.code {
        element.push_attribute(("code", code.to_string().as_str()));
    }
    if let Some(editable) = c.editable {
        element.push_attribute(("editable", if editable { "true" } else { "false" }));
    }
    if let Some(switchable) = c.switchable {
        element.push_attribute(("switchable", switchable_str(switchable)));
    }

    match c.values.as_ref() {
        Some(values) => {
            writer.write_event(Event::Start(element)).context(XmlSnafu)?;
            for value in values.iter() {
                writer
                    .write_event(Event::Start(BytesStart::new("value")))
                    .context(XmlSnafu)?;
                writer
                    .write_event(Event::Text(BytesText::new(value)))
                    .context(XmlSnafu)?;
                writer
                    .write_event(Event::End(BytesEnd::new("value")))
                    .context(XmlSnafu)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new("constraint")))
                .context(XmlSnafu)?;
        }
        None => writer.write_event(Event::Empty(element)).context(XmlSnafu)?,
    }
    Ok(())
}

pub(crate) fn document_to_xml(doc: &QueryDocument) -> Result<String> {
    let mut writer = Writer::new(Vec::new());

    let mut query = BytesStart::new("query");
    query.push_attribute(("name", doc.name.as_deref().unwrap_or_default()));
    query.push_attribute(("model", doc.model.as_str()));
    query.push_attribute(("view", doc.view.join(" ").as_str()));
    if !doc.sort_order.is_empty() {
        query.push_attribute(("sortOrder", format_sort_order(&doc.sort_order).as_str()));
    }
    if let Some(description) = doc.description.as_deref() {
        query.push_attribute(("longDescription", description));
    }
    if let Some(logic) = doc.constraint_logic.as_deref() {
        query.push_attribute(("constraintLogic", logic));
    }
    writer.write_event(Event::Start(query)).context(XmlSnafu)?;

    for join in doc.joins.iter() {
        let mut element = BytesStart::new("join");
        element.push_attribute(("path", join.path.as_str()));
        element.push_attribute(("style", join_style_str(join.style)));
        writer.write_event(Event::Empty(element)).context(XmlSnafu)?;
    }
    for description in doc.path_descriptions.iter() {
        let mut element = BytesStart::new("pathDescription");
        element.push_attribute(("pathString", description.path.as_str()));
        element.push_attribute(("description", description.description.as_str()));
        writer.write_event(Event::Empty(element)).context(XmlSnafu)?;
    }
    for constraint in doc.constraints.iter() {
        write_constraint(&mut writer, constraint)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("query")))
        .context(XmlSnafu)?;

    String::from_utf8(writer.into_inner()).map_err(|e| {
        DocumentSnafu {
            reason: e.to_string(),
        }
        .build()
    })
}

/// Attributes of an element. Empty values count as absent.
fn attributes(element: &BytesStart) -> Result<Attributes> {
    let mut attrs = HashMap::new();
    for attr in element.attributes() {
        let attr = attr.map_err(quick_xml::Error::from).context(XmlSnafu)?;
        let value = attr.unescape_value().context(XmlSnafu)?;
        if !value.is_empty() {
            attrs.insert(
                String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                value.into_owned(),
            );
        }
    }
    Ok(attrs)
}

fn required(attrs: &Attributes, element: &str, name: &str) -> Result<String> {
    attrs.get(name).cloned().ok_or_else(|| {
        DocumentSnafu {
            reason: format!("<{}> has no '{}'", element, name),
        }
        .build()
    })
}

fn in_query<'a>(document: &'a mut Option<QueryDocument>, element: &str) -> Result<&'a mut QueryDocument> {
    document.as_mut().ok_or_else(|| {
        DocumentSnafu {
            reason: format!("<{}> outside of <query>", element),
        }
        .build()
    })
}

fn query_from_attributes(attrs: &Attributes) -> Result<QueryDocument> {
    let view = attrs
        .get("view")
        .map(|v| {
            v.split(|c: char| c == ',' || c.is_whitespace())
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let sort_order = match attrs.get("sortOrder") {
        Some(sort) => parse_sort_order(sort)?,
        None => Vec::new(),
    };

    Ok(QueryDocument {
        model: attrs.get("model").cloned().unwrap_or_default(),
        name: attrs.get("name").cloned(),
        description: attrs
            .get("longDescription")
            .or_else(|| attrs.get("description"))
            .cloned(),
        view,
        sort_order,
        constraint_logic: attrs.get("constraintLogic").cloned(),
        ..Default::default()
    })
}

fn join_from_attributes(attrs: &Attributes) -> Result<Join> {
    let style = match attrs.get("style").map(|s| s.to_ascii_uppercase()) {
        Some(s) if s == "INNER" => JoinStyle::Inner,
        Some(s) if s == "OUTER" => JoinStyle::Outer,
        None => JoinStyle::Outer,
        Some(other) => {
            return DocumentSnafu {
                reason: format!("unknown join style '{}'", other),
            }
            .fail()
        }
    };
    Ok(Join {
        path: required(attrs, "join", "path")?,
        style,
    })
}

fn constraint_from_attributes(attrs: &Attributes) -> Result<ConstraintDocument> {
    let path = required(attrs, "constraint", "path")?;
    let loop_path = attrs.get("loopPath").cloned();

    // Older services write loop constraints with `=` and `!=`.
    let op = match (attrs.get("op").map(String::as_str), loop_path.is_some()) {
        (Some("="), true) => Some(String::from("IS")),
        (Some("!="), true) => Some(String::from("IS NOT")),
        (op, _) => op.map(String::from),
    };

    let code = match attrs.get("code") {
        Some(code) => {
            let mut chars = code.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Some(c),
                _ => {
                    return DocumentSnafu {
                        reason: format!("'{}' is not a constraint code", code),
                    }
                    .fail()
                }
            }
        }
        None => None,
    };

    let switchable = match attrs.get("switchable").map(|s| s.to_ascii_lowercase()) {
        Some(s) if s == "locked" => Some(Switchable::Locked),
        Some(s) if s == "on" => Some(Switchable::On),
        Some(s) if s == "off" => Some(Switchable::Off),
        None => None,
        Some(other) => {
            return DocumentSnafu {
                reason: format!("unknown switchable state '{}'", other),
            }
            .fail()
        }
    };

    Ok(ConstraintDocument {
        path,
        op,
        value: attrs.get("value").cloned(),
        values: None,
        extra_value: attrs.get("extraValue").cloned(),
        loop_path,
        code,
        subclass: attrs.get("type").cloned(),
        editable: attrs.get("editable").map(|e| e.eq_ignore_ascii_case("true")),
        switchable,
    })
}

/// Reads the first `<query>` element of `xml`. Wrapping elements such as `<template>` are
/// skipped.
pub(crate) fn document_from_xml(xml: &str) -> Result<QueryDocument> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut document: Option<QueryDocument> = None;
    let mut open: Option<ConstraintDocument> = None;
    let mut value: Option<String> = None;

    loop {
        let event = reader.read_event().context(XmlSnafu)?;
        let empty = matches!(event, Event::Empty(_));
        match event {
            Event::Start(element) | Event::Empty(element) => match element.name().as_ref() {
                b"query" => {
                    ensure!(
                        document.is_none(),
                        DocumentSnafu {
                            reason: "more than one <query> in the document"
                        }
                    );
                    document = Some(query_from_attributes(&attributes(&element)?)?);
                }
                b"join" => {
                    let join = join_from_attributes(&attributes(&element)?)?;
                    in_query(&mut document, "join")?.joins.push(join);
                }
                b"pathDescription" => {
                    let attrs = attributes(&element)?;
                    let path = match attrs.get("pathString").or_else(|| attrs.get("path")) {
                        Some(path) => path.clone(),
                        None => required(&attrs, "pathDescription", "pathString")?,
                    };
                    let description = PathDescription {
                        path,
                        description: attrs.get("description").cloned().unwrap_or_default(),
                    };
                    in_query(&mut document, "pathDescription")?
                        .path_descriptions
                        .push(description);
                }
                b"constraint" => {
                    let constraint = constraint_from_attributes(&attributes(&element)?)?;
                    if empty {
                        in_query(&mut document, "constraint")?
                            .constraints
                            .push(constraint);
                    } else {
                        open = Some(constraint);
                    }
                }
                b"value" => {
                    let constraint = open.as_mut().ok_or_else(|| {
                        DocumentSnafu {
                            reason: "<value> outside of <constraint>",
                        }
                        .build()
                    })?;
                    if empty {
                        constraint
                            .values
                            .get_or_insert_with(Vec::new)
                            .push(String::new());
                    } else {
                        value = Some(String::new());
                    }
                }
                _ => {}
            },
            Event::Text(text) => {
                if let Some(value) = value.as_mut() {
                    value.push_str(&text.unescape().context(XmlSnafu)?);
                }
            }
            Event::CData(text) => {
                if let Some(value) = value.as_mut() {
                    value.push_str(&String::from_utf8_lossy(&text));
                }
            }
            Event::End(element) => match element.name().as_ref() {
                b"value" => {
                    if let (Some(text), Some(constraint)) = (value.take(), open.as_mut()) {
                        constraint.values.get_or_insert_with(Vec::new).push(text);
                    }
                }
                b"constraint" => {
                    if let Some(constraint) = open.take() {
                        in_query(&mut document, "constraint")?
                            .constraints
                            .push(constraint);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    document.ok_or_else(|| {
        DocumentSnafu {
            reason: "there is no <query> element",
        }
        .build()
    })
}

impl Query {
    /// Renders the query as PathQuery XML, the form `/query/results` takes.
    pub fn to_xml(&self) -> Result<String> {
        document_to_xml(&self.to_document())
    }

    /// Parses PathQuery XML, validating it against `model`.
    pub fn from_xml(xml: &str, model: Arc<Model>) -> Result<Query> {
        let document = document_from_xml(xml)?;
        builder_from_document(&document, model)?.build()
    }
}
