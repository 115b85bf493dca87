//! Custom attribute definitions and values.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Value type of a custom attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttributeType {
    /// Free text.
    #[default]
    String,
    /// RFC 3339 timestamp.
    Datetime,
    /// Exactly one value out of `options`.
    Options,
    /// Any subset of `options`.
    MultipleOptions,
    /// User name or e-mail.
    User,
    /// Boolean flag.
    Checkbox,
}

impl AttributeType {
    /// Whether values of this type must be one of the declared options.
    pub fn has_options(&self) -> bool {
        matches!(self, Self::Options | Self::MultipleOptions)
    }
}

impl std::fmt::Display for AttributeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Datetime => write!(f, "datetime"),
            Self::Options => write!(f, "options"),
            Self::MultipleOptions => write!(f, "multipleOptions"),
            Self::User => write!(f, "user"),
            Self::Checkbox => write!(f, "checkbox"),
        }
    }
}

/// A project-level custom attribute definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(rename = "type")]
    pub attribute_type: AttributeType,
    #[serde(default)]
    pub options: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Attribute {
    /// Creates an active, optional attribute without options.
    pub fn new(id: Uuid, name: impl Into<String>, attribute_type: AttributeType) -> Self {
        Self {
            id,
            name: name.into(),
            is_required: false,
            is_active: true,
            attribute_type,
            options: Vec::new(),
        }
    }

    /// Whether `value` is one of the declared options.
    pub fn has_option(&self, value: &str) -> bool {
        self.options.iter().any(|o| o == value)
    }
}

/// Value of an attribute on a test case or shared step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Text(String),
    List(Vec<String>),
}

impl AttributeValue {
    /// The option values this value selects, if any.
    pub fn option_values(&self) -> Vec<&str> {
        match self {
            Self::Bool(_) => Vec::new(),
            Self::Text(s) => vec![s.as_str()],
            Self::List(items) => items.iter().map(String::as_str).collect(),
        }
    }
}

/// An attribute value bound to an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseAttribute {
    pub id: Uuid,
    pub value: AttributeValue,
}
