//! Object schemas: named property types with inheritance

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use super::{PropType, ValueMap};
use crate::error::{CommandError, ErrorCode, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectSchema {
    properties: BTreeMap<String, PropType>,
    /// Properties copied verbatim from the base schema because the
    /// definition document did not mention them
    carried_over: BTreeSet<String>,
    extra_properties_allowed: bool,
}

impl ObjectSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `name -> property definition` map.
    ///
    /// Properties also present in `base` are reconciled against the base
    /// property. Properties present only in `base` are inherited unchanged.
    /// Extra properties are not allowed until the caller says otherwise.
    pub fn from_json(doc: &Map<String, Value>, base: Option<&ObjectSchema>) -> Result<Self> {
        let mut schema = ObjectSchema::default();

        for (name, value) in doc {
            let base_prop = base.and_then(|b| b.get_prop(name));
            let prop = PropType::from_json(value, base_prop).map_err(|err| {
                err.wrap(
                    ErrorCode::InvalidPropDef,
                    format!("Error in definition of property '{name}'"),
                )
            })?;
            schema.properties.insert(name.clone(), prop);
        }

        if let Some(base) = base {
            for (name, prop) in &base.properties {
                if !schema.properties.contains_key(name) {
                    schema.properties.insert(name.clone(), prop.clone());
                    schema.carried_over.insert(name.clone());
                }
            }
        }

        Ok(schema)
    }

    /// Serialize the schema. Without `full_schema`, properties inherited
    /// untouched from the base schema are left out and the others are
    /// written as diffs.
    pub fn to_json(&self, full_schema: bool, in_command_def: bool) -> Value {
        let props = self
            .properties
            .iter()
            .filter(|(name, _)| full_schema || !self.carried_over.contains(*name))
            .map(|(name, prop)| (name.clone(), prop.to_json(full_schema, in_command_def)))
            .collect();
        Value::Object(props)
    }

    pub fn add_prop(&mut self, name: impl Into<String>, prop: PropType) {
        let name = name.into();
        self.carried_over.remove(&name);
        self.properties.insert(name, prop);
    }

    pub fn get_prop(&self, name: &str) -> Option<&PropType> {
        self.properties.get(name)
    }

    pub fn props(&self) -> &BTreeMap<String, PropType> {
        &self.properties
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn mark_prop_required(&mut self, name: &str) -> Result<()> {
        let prop = self.properties.get_mut(name).ok_or_else(|| {
            CommandError::new(ErrorCode::UnknownProperty, format!("Unknown property '{name}'"))
        })?;
        prop.make_required(true);
        self.carried_over.remove(name);
        Ok(())
    }

    pub fn extra_properties_allowed(&self) -> bool {
        self.extra_properties_allowed
    }

    pub fn set_extra_properties_allowed(&mut self, allowed: bool) {
        self.extra_properties_allowed = allowed;
    }

    /// Validate an object value against this schema.
    ///
    /// Omitted properties take their default; omitted required properties
    /// without a default are an error. Unknown properties are rejected
    /// unless the schema allows extra properties, in which case they are
    /// dropped.
    pub fn values_from_json(&self, doc: &Map<String, Value>) -> Result<ValueMap> {
        let mut values = ValueMap::new();

        for (name, prop) in &self.properties {
            if let Some(raw) = doc.get(name) {
                let value = prop.value_from_json(raw).map_err(|err| {
                    err.wrap(
                        ErrorCode::InvalidPropValue,
                        format!("Invalid value for property '{name}'"),
                    )
                })?;
                values.insert(name.clone(), value);
            } else if let Some(default) = prop.default_value() {
                values.insert(name.clone(), default.clone());
            } else if prop.is_required() {
                return Err(CommandError::new(
                    ErrorCode::PropertyMissing,
                    format!("Required parameter missing: {name}"),
                ));
            }
        }

        if !self.extra_properties_allowed {
            if let Some(key) = doc.keys().find(|key| !self.properties.contains_key(*key)) {
                return Err(CommandError::new(
                    ErrorCode::UnknownProperty,
                    format!("Unrecognized parameter '{key}'"),
                ));
            }
        }

        Ok(values)
    }

    /// Validate a partial object: every given property must be known and
    /// valid, but nothing is required and no defaults are filled in
    pub fn partial_values_from_json(&self, doc: &Map<String, Value>) -> Result<ValueMap> {
        let mut values = ValueMap::new();
        for (name, raw) in doc {
            match self.properties.get(name) {
                Some(prop) => {
                    let value = prop.value_from_json(raw).map_err(|err| {
                        err.wrap(
                            ErrorCode::InvalidPropValue,
                            format!("Invalid value for property '{name}'"),
                        )
                    })?;
                    values.insert(name.clone(), value);
                }
                None if self.extra_properties_allowed => {}
                None => {
                    return Err(CommandError::new(
                        ErrorCode::UnknownProperty,
                        format!("Unrecognized parameter '{name}'"),
                    ))
                }
            }
        }
        Ok(values)
    }
}
