//! Typed Schema Engine
//!
//! This module handles:
//! - Type descriptors for the six value kinds and their constraints
//! - Object schemas with inheritance from a base schema
//! - Parsing and validating JSON values against a type
//! - Serializing schemas back to JSON, either complete or as a diff

mod object_schema;
mod prop_type;
mod value;

use std::fmt;

pub use object_schema::ObjectSchema;
pub use prop_type::{Limits, PropType, TypeDetails};
pub use value::{values_to_json, PropValue, ValueMap};

/// Keys understood in property definition documents
pub mod attributes {
    pub const TYPE: &str = "type";
    pub const DISPLAY_NAME: &str = "displayName";
    pub const DEFAULT: &str = "default";
    pub const IS_REQUIRED: &str = "isRequired";
    pub const ENUM: &str = "enum";
    pub const MINIMUM: &str = "minimum";
    pub const MAXIMUM: &str = "maximum";
    pub const MIN_LENGTH: &str = "minLength";
    pub const MAX_LENGTH: &str = "maxLength";
    pub const PROPERTIES: &str = "properties";
    pub const ADDITIONAL_PROPERTIES: &str = "additionalProperties";
    pub const REQUIRED: &str = "required";
    pub const ITEMS: &str = "items";
}

/// Value kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Int,
    Double,
    String,
    Boolean,
    Object,
    Array,
}

impl ValueType {
    /// Name of the type in schema documents
    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::Int => "integer",
            ValueType::Double => "number",
            ValueType::String => "string",
            ValueType::Boolean => "boolean",
            ValueType::Object => "object",
            ValueType::Array => "array",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "integer" => Some(ValueType::Int),
            "number" => Some(ValueType::Double),
            "string" => Some(ValueType::String),
            "boolean" => Some(ValueType::Boolean),
            "object" => Some(ValueType::Object),
            "array" => Some(ValueType::Array),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A schema attribute together with where it came from.
///
/// `is_inherited` is true when the attribute was copied from a base
/// descriptor rather than given explicitly. Only explicit attributes are
/// written out by diff serialization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Inheritable<T> {
    pub value: T,
    pub is_inherited: bool,
}

impl<T> Inheritable<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            is_inherited: false,
        }
    }

    pub fn inherited(value: T) -> Self {
        Self {
            value,
            is_inherited: true,
        }
    }
}

impl<T: Clone> Inheritable<T> {
    /// Copy of this attribute marked as inherited
    pub fn to_inherited(&self) -> Self {
        Self::inherited(self.value.clone())
    }
}
