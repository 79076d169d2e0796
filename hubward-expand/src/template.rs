//! Template definitions: a named macro with a rendering body, optional
//! defaults, and an optional declarative input schema.

use std::path::Path;

use serde_yaml::{Mapping, Value};

use hubward_core::{Origin, RawDoc};

use crate::error::ExpandError;

/// The expected shape of one schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Str,
    Int,
    Float,
    Bool,
    List,
    Map,
    Any,
}

impl FieldType {
    fn parse(tag: &str) -> Option<FieldType> {
        match tag {
            "str" | "string" => Some(FieldType::Str),
            "int" | "integer" => Some(FieldType::Int),
            "float" | "number" => Some(FieldType::Float),
            "bool" | "boolean" => Some(FieldType::Bool),
            "list" | "seq" => Some(FieldType::List),
            "map" | "mapping" => Some(FieldType::Map),
            "any" => Some(FieldType::Any),
            _ => None,
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::Str => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_f64() || value.is_i64() || value.is_u64(),
            FieldType::Bool => value.is_bool(),
            FieldType::List => value.is_sequence(),
            FieldType::Map => value.is_mapping(),
            FieldType::Any => true,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            FieldType::Str => "a string",
            FieldType::Int => "an integer",
            FieldType::Float => "a number",
            FieldType::Bool => "a boolean",
            FieldType::List => "a list",
            FieldType::Map => "a mapping",
            FieldType::Any => "any value",
        }
    }
}

/// One declared schema field.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
}

/// A template's declared input schema.
///
/// Fields declared as a bare type tag are required; the mapping form makes
/// `required` explicit. Undeclared call fields pass through unchecked.
#[derive(Debug, Clone, Default)]
pub struct TemplateSchema {
    fields: Vec<FieldSpec>,
}

impl TemplateSchema {
    fn parse(mapping: &Mapping, template: &str, origin: &Origin) -> Result<Self, ExpandError> {
        let invalid = |field: &str, message: String| ExpandError::Validation {
            template: template.to_owned(),
            field: field.to_owned(),
            message,
            origin: origin.clone(),
        };

        let mut fields = Vec::new();
        for (key, value) in mapping {
            let Some(name) = key.as_str() else {
                return Err(invalid("<schema>", "schema field names must be strings".into()));
            };
            let spec = match value {
                Value::String(tag) => {
                    let field_type = FieldType::parse(tag)
                        .ok_or_else(|| invalid(name, format!("unknown schema type '{tag}'")))?;
                    FieldSpec {
                        name: name.to_owned(),
                        field_type,
                        required: true,
                    }
                }
                Value::Mapping(entry) => {
                    let tag = entry
                        .get(Value::from("type"))
                        .and_then(Value::as_str)
                        .unwrap_or("any");
                    let field_type = FieldType::parse(tag)
                        .ok_or_else(|| invalid(name, format!("unknown schema type '{tag}'")))?;
                    let required = entry
                        .get(Value::from("required"))
                        .and_then(Value::as_bool)
                        .unwrap_or(true);
                    FieldSpec {
                        name: name.to_owned(),
                        field_type,
                        required,
                    }
                }
                other => {
                    return Err(invalid(
                        name,
                        format!("schema entries must be a type tag or mapping, got {other:?}"),
                    ))
                }
            };
            fields.push(spec);
        }
        Ok(TemplateSchema { fields })
    }

    /// Validate merged call data. The error carries the offending field path.
    pub fn validate(
        &self,
        data: &Mapping,
        template: &str,
        origin: &Origin,
    ) -> Result<(), ExpandError> {
        for spec in &self.fields {
            match data.get(Value::from(spec.name.as_str())) {
                None | Some(Value::Null) => {
                    if spec.required {
                        return Err(ExpandError::Validation {
                            template: template.to_owned(),
                            field: spec.name.clone(),
                            message: "required field is missing".into(),
                            origin: origin.clone(),
                        });
                    }
                }
                Some(value) => {
                    if !spec.field_type.matches(value) {
                        return Err(ExpandError::Validation {
                            template: template.to_owned(),
                            field: spec.name.clone(),
                            message: format!("expected {}", spec.field_type.describe()),
                            origin: origin.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// A named macro producing a document sequence when called.
#[derive(Debug, Clone)]
pub struct Template {
    pub name: String,
    pub body: String,
    pub defaults: Mapping,
    pub schema: Option<TemplateSchema>,
    pub origin: Origin,
}

impl Template {
    /// Build a template from its declaration document.
    ///
    /// The rendering body is either inline (`template`) or read from an
    /// external file (`template-file`) relative to the declaring document.
    pub fn from_doc(doc: &RawDoc) -> Result<Template, ExpandError> {
        let name = doc.require_name()?.to_owned();

        let inline = doc
            .data
            .get(Value::from("template"))
            .and_then(Value::as_str)
            .map(str::to_owned);
        let external = doc
            .data
            .get(Value::from("template-file"))
            .and_then(Value::as_str)
            .map(str::to_owned);

        let body = match (inline, external) {
            (Some(body), None) => body,
            (None, Some(relative)) => {
                let base = doc.origin.file.parent().unwrap_or_else(|| Path::new("."));
                let path = base.join(&relative);
                std::fs::read_to_string(&path).map_err(|err| {
                    ExpandError::Expansion {
                        message: format!(
                            "template '{name}' body file '{}' could not be read: {err}",
                            path.display()
                        ),
                        origin: doc.origin.clone(),
                    }
                })?
            }
            (Some(_), Some(_)) => {
                return Err(ExpandError::Expansion {
                    message: format!(
                        "template '{name}' declares both 'template' and 'template-file'"
                    ),
                    origin: doc.origin.clone(),
                })
            }
            (None, None) => {
                return Err(ExpandError::Expansion {
                    message: format!(
                        "template '{name}' must declare 'template' or 'template-file'"
                    ),
                    origin: doc.origin.clone(),
                })
            }
        };

        let defaults = match doc.data.get(Value::from("defaults")) {
            Some(Value::Mapping(mapping)) => mapping.clone(),
            Some(other) => {
                return Err(ExpandError::Expansion {
                    message: format!("template '{name}' defaults must be a mapping, got {other:?}"),
                    origin: doc.origin.clone(),
                })
            }
            None => Mapping::new(),
        };

        let schema = match doc.data.get(Value::from("schema")) {
            Some(Value::Mapping(mapping)) => {
                Some(TemplateSchema::parse(mapping, &name, &doc.origin)?)
            }
            Some(other) => {
                return Err(ExpandError::Expansion {
                    message: format!("template '{name}' schema must be a mapping, got {other:?}"),
                    origin: doc.origin.clone(),
                })
            }
            None => None,
        };

        Ok(Template {
            name,
            body,
            defaults,
            schema,
            origin: doc.origin.clone(),
        })
    }

    /// Merge defaults under call data; call data wins on conflicts.
    pub fn merge_call_data(&self, call: &Mapping) -> Mapping {
        let mut merged = self.defaults.clone();
        for (key, value) in call {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }
}
