//! Type descriptors
//!
//! A [`PropType`] describes one property: its kind, the constraints that
//! apply to its values, an optional default and a required flag. Every
//! attribute remembers whether it was inherited from a base descriptor so
//! that diff serialization can emit only the overrides.

use std::collections::HashSet;
use std::fmt::Display;

use serde_json::{Map, Value};

use super::attributes as attr;
use super::{Inheritable, ObjectSchema, PropValue, ValueType};
use crate::error::{CommandError, ErrorCode, Result};

/// Lower and upper bound of a numeric value or of a string length.
/// Both bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Limits<T> {
    pub min: Option<Inheritable<T>>,
    pub max: Option<Inheritable<T>>,
}

impl<T: Copy> Limits<T> {
    fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    fn is_overridden(&self) -> bool {
        self.min.as_ref().is_some_and(|m| !m.is_inherited)
            || self.max.as_ref().is_some_and(|m| !m.is_inherited)
    }

    fn inherit_from(&mut self, base: &Limits<T>) {
        self.min = base.min.map(|m| Inheritable::inherited(m.value));
        self.max = base.max.map(|m| Inheritable::inherited(m.value));
    }

    fn clear(&mut self) {
        self.min = None;
        self.max = None;
    }

    fn write_json(&self, dict: &mut Map<String, Value>, keys: (&str, &str), full_schema: bool)
    where
        T: Into<Value>,
    {
        if let Some(min) = self.min {
            if full_schema || !min.is_inherited {
                dict.insert(keys.0.to_owned(), min.value.into());
            }
        }
        if let Some(max) = self.max {
            if full_schema || !max.is_inherited {
                dict.insert(keys.1.to_owned(), max.value.into());
            }
        }
    }
}

/// Kind-specific part of a type descriptor
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDetails {
    Int(Limits<i32>),
    Double(Limits<f64>),
    /// Limits on the string length in characters
    String(Limits<i32>),
    Boolean,
    Object(Inheritable<ObjectSchema>),
    Array(Option<Inheritable<Box<PropType>>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropType {
    details: TypeDetails,
    one_of: Option<Inheritable<Vec<PropValue>>>,
    default: Inheritable<Option<PropValue>>,
    required: Inheritable<bool>,
    based_on_schema: bool,
}

impl PropType {
    /// Create an unconstrained descriptor of the given kind
    pub fn new(value_type: ValueType) -> Self {
        let details = match value_type {
            ValueType::Int => TypeDetails::Int(Limits::default()),
            ValueType::Double => TypeDetails::Double(Limits::default()),
            ValueType::String => TypeDetails::String(Limits::default()),
            ValueType::Boolean => TypeDetails::Boolean,
            ValueType::Object => TypeDetails::Object(Inheritable::new(ObjectSchema::new())),
            ValueType::Array => TypeDetails::Array(None),
        };
        Self {
            details,
            one_of: None,
            default: Inheritable::inherited(None),
            required: Inheritable::inherited(false),
            based_on_schema: false,
        }
    }

    /// Parse a property definition.
    ///
    /// `value` is a type name (`"integer"`), a bare array (an `enum`
    /// shorthand) or a definition object. When `base` is given the new
    /// descriptor must keep its kind and inherits every attribute it does not
    /// re-specify.
    pub fn from_json(value: &Value, base: Option<&PropType>) -> Result<PropType> {
        match value {
            Value::String(name) => {
                let value_type = ValueType::from_type_name(name).ok_or_else(|| {
                    CommandError::new(ErrorCode::UnknownType, format!("Unknown type name '{name}'"))
                })?;
                let mut prop = PropType::new(value_type);
                prop.load(&Map::new(), base)?;
                Ok(prop)
            }
            Value::Array(list) => {
                let mut prop = detect_array_type(list, base, true)?;
                let mut dict = Map::new();
                dict.insert(attr::ENUM.to_owned(), value.clone());
                prop.load(&dict, base)?;
                Ok(prop)
            }
            Value::Object(dict) => {
                let mut prop = detect_object_type(dict, base)?;
                prop.load(dict, base)?;
                Ok(prop)
            }
            other => Err(CommandError::new(
                ErrorCode::UnknownType,
                format!("Unexpected JSON value type: {other}"),
            )),
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self.details {
            TypeDetails::Int(_) => ValueType::Int,
            TypeDetails::Double(_) => ValueType::Double,
            TypeDetails::String(_) => ValueType::String,
            TypeDetails::Boolean => ValueType::Boolean,
            TypeDetails::Object(_) => ValueType::Object,
            TypeDetails::Array(_) => ValueType::Array,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.value_type().as_str()
    }

    pub fn details(&self) -> &TypeDetails {
        &self.details
    }

    /// Whether this descriptor was derived from a base descriptor
    pub fn is_based_on_schema(&self) -> bool {
        self.based_on_schema
    }

    pub fn default_value(&self) -> Option<&PropValue> {
        self.default.value.as_ref()
    }

    pub fn is_required(&self) -> bool {
        self.required.value
    }

    pub fn make_required(&mut self, required: bool) {
        self.required = Inheritable::new(required);
    }

    pub fn one_of(&self) -> Option<&[PropValue]> {
        self.one_of.as_ref().map(|o| o.value.as_slice())
    }

    pub fn object_schema(&self) -> Option<&ObjectSchema> {
        match &self.details {
            TypeDetails::Object(schema) => Some(&schema.value),
            _ => None,
        }
    }

    pub fn item_type(&self) -> Option<&PropType> {
        match &self.details {
            TypeDetails::Array(Some(item)) => Some(&item.value),
            _ => None,
        }
    }

    /// Effective lower bound of an integer type
    pub fn min_int(&self) -> Option<i32> {
        match &self.details {
            TypeDetails::Int(l) => Some(l.min.map_or(i32::MIN, |m| m.value)),
            _ => None,
        }
    }

    pub fn max_int(&self) -> Option<i32> {
        match &self.details {
            TypeDetails::Int(l) => Some(l.max.map_or(i32::MAX, |m| m.value)),
            _ => None,
        }
    }

    pub fn min_double(&self) -> Option<f64> {
        match &self.details {
            TypeDetails::Double(l) => Some(l.min.map_or(f64::MIN, |m| m.value)),
            _ => None,
        }
    }

    pub fn max_double(&self) -> Option<f64> {
        match &self.details {
            TypeDetails::Double(l) => Some(l.max.map_or(f64::MAX, |m| m.value)),
            _ => None,
        }
    }

    pub fn min_length(&self) -> Option<i32> {
        match &self.details {
            TypeDetails::String(l) => Some(l.min.map_or(0, |m| m.value)),
            _ => None,
        }
    }

    pub fn max_length(&self) -> Option<i32> {
        match &self.details {
            TypeDetails::String(l) => Some(l.max.map_or(i32::MAX, |m| m.value)),
            _ => None,
        }
    }

    /// True if any attribute was given explicitly rather than inherited
    pub fn has_overridden_attributes(&self) -> bool {
        if self.default.value.is_some() && !self.default.is_inherited {
            return true;
        }
        if self.one_of.as_ref().is_some_and(|o| !o.is_inherited) {
            return true;
        }
        match &self.details {
            TypeDetails::Int(l) | TypeDetails::String(l) => l.is_overridden(),
            TypeDetails::Double(l) => l.is_overridden(),
            TypeDetails::Boolean => false,
            TypeDetails::Object(schema) => !schema.is_inherited,
            TypeDetails::Array(item) => item.as_ref().is_some_and(|i| !i.is_inherited),
        }
    }

    /// Serialize the definition.
    ///
    /// With `full_schema` every attribute is written. Otherwise only the
    /// overrides are, using the shortest form that reparses to the same
    /// descriptor. `in_command_def` adds `isRequired` when it was given
    /// explicitly.
    pub fn to_json(&self, full_schema: bool, in_command_def: bool) -> Value {
        let include_required = in_command_def && !self.required.is_inherited;

        if !full_schema && !include_required {
            if !self.has_overridden_attributes() {
                return if self.based_on_schema {
                    Value::Object(Map::new())
                } else {
                    Value::String(self.type_name().to_owned())
                };
            }
            if self.is_enum_only_override() {
                if let Some(one_of) = &self.one_of {
                    return list_to_json(&one_of.value);
                }
            }
        }

        let mut dict = Map::new();
        if full_schema || (include_required && !self.based_on_schema) {
            dict.insert(attr::TYPE.to_owned(), Value::String(self.type_name().to_owned()));
        }

        match &self.details {
            TypeDetails::Int(l) => l.write_json(&mut dict, (attr::MINIMUM, attr::MAXIMUM), full_schema),
            TypeDetails::Double(l) => l.write_json(&mut dict, (attr::MINIMUM, attr::MAXIMUM), full_schema),
            TypeDetails::String(l) => {
                l.write_json(&mut dict, (attr::MIN_LENGTH, attr::MAX_LENGTH), full_schema)
            }
            _ => {}
        }

        if let Some(one_of) = &self.one_of {
            if full_schema || !one_of.is_inherited {
                dict.insert(attr::ENUM.to_owned(), list_to_json(&one_of.value));
            }
        }

        if let Some(default) = &self.default.value {
            if full_schema || !self.default.is_inherited {
                dict.insert(attr::DEFAULT.to_owned(), default.to_json());
            }
        }

        if include_required {
            dict.insert(attr::IS_REQUIRED.to_owned(), Value::Bool(self.required.value));
        }

        match &self.details {
            TypeDetails::Object(schema) if full_schema || !schema.is_inherited => {
                let schema = &schema.value;
                dict.insert(attr::PROPERTIES.to_owned(), schema.to_json(full_schema, false));
                dict.insert(
                    attr::ADDITIONAL_PROPERTIES.to_owned(),
                    Value::Bool(schema.extra_properties_allowed()),
                );
                let required: Vec<Value> = schema
                    .props()
                    .iter()
                    .filter(|(_, prop)| prop.is_required())
                    .map(|(name, _)| Value::String(name.clone()))
                    .collect();
                if !required.is_empty() {
                    dict.insert(attr::REQUIRED.to_owned(), Value::Array(required));
                }
            }
            TypeDetails::Array(Some(item)) if full_schema || !item.is_inherited => {
                dict.insert(attr::ITEMS.to_owned(), item.value.to_json(full_schema, false));
            }
            _ => {}
        }

        Value::Object(dict)
    }

    /// Parse and validate a JSON value against this type
    pub fn value_from_json(&self, value: &Value) -> Result<PropValue> {
        let parsed = match &self.details {
            TypeDetails::Int(_) => value
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(PropValue::Int),
            TypeDetails::Double(_) => value.as_f64().map(PropValue::Double),
            TypeDetails::String(_) => value.as_str().map(|s| PropValue::String(s.to_owned())),
            TypeDetails::Boolean => value.as_bool().map(PropValue::Boolean),
            TypeDetails::Object(schema) => match value.as_object() {
                Some(map) => Some(PropValue::Object(schema.value.values_from_json(map)?)),
                None => None,
            },
            TypeDetails::Array(item) => match value.as_array() {
                Some(list) => {
                    let item = item.as_ref().ok_or_else(|| {
                        CommandError::new(ErrorCode::InvalidObjectSchema, "Array type has no item type")
                    })?;
                    let items = list
                        .iter()
                        .map(|v| item.value.value_from_json(v))
                        .collect::<Result<Vec<_>>>()?;
                    Some(PropValue::Array(items))
                }
                None => None,
            },
        };

        let parsed = parsed.ok_or_else(|| type_mismatch(value, self.type_name()))?;
        self.validate_constraints(&parsed)?;
        Ok(parsed)
    }

    /// Check a JSON value without keeping the parsed result
    pub fn validate_value(&self, value: &Value) -> Result<()> {
        self.value_from_json(value).map(|_| ())
    }

    /// Build a value of this type from an existing value, converting
    /// integers to doubles where the type asks for it
    pub fn create_value(&self, value: &PropValue) -> Result<PropValue> {
        self.value_from_json(&value.to_json())
    }

    fn validate_constraints(&self, value: &PropValue) -> Result<()> {
        if let Some(one_of) = &self.one_of {
            if !one_of.value.iter().any(|choice| choice.is_equivalent(value)) {
                return Err(CommandError::new(
                    ErrorCode::OutOfRange,
                    format!(
                        "Value {value} is invalid. Expected one of {}",
                        PropValue::Array(one_of.value.clone())
                    ),
                ));
            }
        }

        match (&self.details, value) {
            (TypeDetails::Int(limits), PropValue::Int(v)) => check_bounds(limits, *v),
            (TypeDetails::Double(limits), PropValue::Double(v)) => check_bounds(limits, *v),
            (TypeDetails::String(limits), PropValue::String(s)) => check_length(limits, s),
            _ => Ok(()),
        }
    }

    fn is_enum_only_override(&self) -> bool {
        let limits_empty = match &self.details {
            TypeDetails::Int(l) | TypeDetails::String(l) => l.is_empty(),
            TypeDetails::Double(l) => l.is_empty(),
            TypeDetails::Boolean => true,
            TypeDetails::Object(_) | TypeDetails::Array(_) => false,
        };
        limits_empty
            && self.one_of.as_ref().is_some_and(|o| !o.is_inherited)
            && !(self.default.value.is_some() && !self.default.is_inherited)
    }

    /// Copy of this type with no constraints or default, used to parse the
    /// choices of an `enum`
    fn without_constraints(&self) -> PropType {
        let mut copy = self.clone();
        copy.one_of = None;
        copy.clear_limits();
        copy.default = Inheritable::inherited(None);
        copy
    }

    fn clear_limits(&mut self) {
        match &mut self.details {
            TypeDetails::Int(l) | TypeDetails::String(l) => l.clear(),
            TypeDetails::Double(l) => l.clear(),
            _ => {}
        }
    }

    /// Fill this descriptor from a definition object
    fn load(&mut self, dict: &Map<String, Value>, base: Option<&PropType>) -> Result<()> {
        if let Some(base) = base {
            if base.value_type() != self.value_type() {
                return Err(CommandError::new(
                    ErrorCode::PropTypeChanged,
                    format!(
                        "Redefining a property of type {} as {}",
                        base.type_name(),
                        self.type_name()
                    ),
                ));
            }
        }
        self.based_on_schema = base.is_some();
        self.one_of = None;
        self.clear_limits();

        let mut processed: HashSet<&'static str> =
            [attr::TYPE, attr::DISPLAY_NAME, attr::DEFAULT, attr::IS_REQUIRED]
                .into_iter()
                .collect();

        self.load_nested_schema(dict, base, &mut processed)?;
        if let Some(base) = base {
            self.inherit_constraints(base);
        }
        self.load_constraints(dict, &mut processed)?;

        if let Some(key) = dict.keys().find(|key| !processed.contains(key.as_str())) {
            return Err(CommandError::new(
                ErrorCode::UnknownProperty,
                format!("Unexpected property '{key}'"),
            ));
        }

        // The type must be complete before the default can be validated
        if let Some(default) = dict.get(attr::DEFAULT) {
            let value = self.value_from_json(default).map_err(|err| {
                err.wrap(
                    ErrorCode::InvalidPropValue,
                    format!("Invalid value for property '{}'", attr::DEFAULT),
                )
            })?;
            self.default = Inheritable::new(Some(value));
        } else if let Some(base) = base {
            self.default = base.default.to_inherited();
        }

        match dict.get(attr::IS_REQUIRED) {
            Some(Value::Bool(required)) => self.required = Inheritable::new(*required),
            Some(other) => return Err(type_mismatch(other, "boolean")),
            None => {
                if let Some(base) = base {
                    self.required = base.required.to_inherited();
                }
            }
        }

        Ok(())
    }

    fn load_nested_schema(
        &mut self,
        dict: &Map<String, Value>,
        base: Option<&PropType>,
        processed: &mut HashSet<&'static str>,
    ) -> Result<()> {
        match &mut self.details {
            TypeDetails::Object(schema) => {
                let base_schema = base.and_then(PropType::object_schema);

                let extra_allowed = match dict.get(attr::ADDITIONAL_PROPERTIES) {
                    Some(Value::Bool(allowed)) => {
                        processed.insert(attr::ADDITIONAL_PROPERTIES);
                        Some(*allowed)
                    }
                    Some(other) => return Err(type_mismatch(other, "boolean")),
                    None => None,
                };

                if let Some(props) = dict.get(attr::PROPERTIES) {
                    let props = props.as_object().ok_or_else(|| {
                        CommandError::new(
                            ErrorCode::InvalidObjectSchema,
                            format!("Property '{}' must be an object", attr::PROPERTIES),
                        )
                    })?;
                    let mut parsed = ObjectSchema::from_json(props, base_schema).map_err(|err| {
                        err.wrap(ErrorCode::InvalidObjectSchema, "Error parsing object property schema")
                    })?;
                    parsed.set_extra_properties_allowed(extra_allowed.unwrap_or(false));
                    *schema = Inheritable::new(parsed);
                    processed.insert(attr::PROPERTIES);
                } else if let Some(base_schema) = base_schema {
                    let mut parsed = base_schema.clone();
                    *schema = match extra_allowed {
                        Some(allowed) => {
                            parsed.set_extra_properties_allowed(allowed);
                            Inheritable::new(parsed)
                        }
                        None => Inheritable::inherited(parsed),
                    };
                } else {
                    return Err(CommandError::new(
                        ErrorCode::InvalidObjectSchema,
                        format!(
                            "Object type definition must include the object schema ('{}' field not found)",
                            attr::PROPERTIES
                        ),
                    ));
                }

                if let Some(required) = dict.get(attr::REQUIRED) {
                    processed.insert(attr::REQUIRED);
                    let list = required.as_array().ok_or_else(|| {
                        CommandError::new(
                            ErrorCode::InvalidObjectSchema,
                            format!("Property '{}' must be an array", attr::REQUIRED),
                        )
                    })?;
                    for item in list {
                        let name = item.as_str().ok_or_else(|| {
                            CommandError::new(
                                ErrorCode::InvalidObjectSchema,
                                format!("Property '{}' contains non-string items", attr::REQUIRED),
                            )
                        })?;
                        schema.value.mark_prop_required(name)?;
                    }
                    schema.is_inherited = false;
                }
            }
            TypeDetails::Array(item) => {
                let base_item = base.and_then(PropType::item_type);
                if let Some(items) = dict.get(attr::ITEMS) {
                    let item_type = PropType::from_json(items, base_item)?;
                    if item_type.value_type() == ValueType::Array {
                        return Err(CommandError::new(
                            ErrorCode::InvalidObjectSchema,
                            "Arrays of arrays are not supported",
                        ));
                    }
                    *item = Some(Inheritable::new(Box::new(item_type)));
                    processed.insert(attr::ITEMS);
                } else if item.is_none() {
                    let base_item = base_item.ok_or_else(|| {
                        CommandError::new(
                            ErrorCode::InvalidObjectSchema,
                            format!("Array must have '{}' field", attr::ITEMS),
                        )
                    })?;
                    *item = Some(Inheritable::inherited(Box::new(base_item.clone())));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn inherit_constraints(&mut self, base: &PropType) {
        self.one_of = base.one_of.as_ref().map(Inheritable::to_inherited);
        match (&mut self.details, &base.details) {
            (TypeDetails::Int(l), TypeDetails::Int(b)) => l.inherit_from(b),
            (TypeDetails::Double(l), TypeDetails::Double(b)) => l.inherit_from(b),
            (TypeDetails::String(l), TypeDetails::String(b)) => l.inherit_from(b),
            _ => {}
        }
    }

    /// `enum` wins over bounds: whichever is given explicitly removes the
    /// other, including an inherited one
    fn load_constraints(
        &mut self,
        dict: &Map<String, Value>,
        processed: &mut HashSet<&'static str>,
    ) -> Result<()> {
        if let Some(choices) = dict.get(attr::ENUM) {
            let list = choices
                .as_array()
                .ok_or_else(|| type_mismatch(choices, "array"))?;
            let item_type = self.without_constraints();
            let values = list
                .iter()
                .map(|v| item_type.value_from_json(v))
                .collect::<Result<Vec<_>>>()?;
            self.one_of = Some(Inheritable::new(values));
            self.clear_limits();
            processed.insert(attr::ENUM);
            return Ok(());
        }

        let keys = match self.details {
            TypeDetails::Int(_) | TypeDetails::Double(_) => (attr::MINIMUM, attr::MAXIMUM),
            TypeDetails::String(_) => (attr::MIN_LENGTH, attr::MAX_LENGTH),
            _ => return Ok(()),
        };
        let min = dict.get(keys.0);
        let max = dict.get(keys.1);
        if min.is_none() && max.is_none() {
            return Ok(());
        }
        self.one_of = None;

        match &mut self.details {
            TypeDetails::Int(limits) | TypeDetails::String(limits) => {
                if let Some(v) = min {
                    limits.min = Some(Inheritable::new(parse_i32(v)?));
                }
                if let Some(v) = max {
                    limits.max = Some(Inheritable::new(parse_i32(v)?));
                }
            }
            TypeDetails::Double(limits) => {
                if let Some(v) = min {
                    limits.min = Some(Inheritable::new(parse_f64(v)?));
                }
                if let Some(v) = max {
                    limits.max = Some(Inheritable::new(parse_f64(v)?));
                }
            }
            _ => {}
        }
        if min.is_some() {
            processed.insert(keys.0);
        }
        if max.is_some() {
            processed.insert(keys.1);
        }
        Ok(())
    }
}

/// Work out the kind of an `enum` list from its first element. One level of
/// nested arrays is allowed when `allow_arrays` is set.
fn detect_array_type(list: &[Value], base: Option<&PropType>, allow_arrays: bool) -> Result<PropType> {
    if let Some(base) = base {
        return Ok(PropType::new(base.value_type()));
    }
    let first = list.first().ok_or_else(no_type_info)?;
    match first {
        Value::Array(inner) if allow_arrays => {
            let item = detect_array_type(inner, None, false)?;
            Ok(array_of(item))
        }
        other => scalar_type_of(other).map(PropType::new).ok_or_else(no_type_info),
    }
}

/// Work out the kind of a definition object that may omit `type`
fn detect_object_type(dict: &Map<String, Value>, base: Option<&PropType>) -> Result<PropType> {
    if let Some(type_name) = dict.get(attr::TYPE) {
        let name = type_name
            .as_str()
            .ok_or_else(|| type_mismatch(type_name, "string"))?;
        let value_type = ValueType::from_type_name(name).ok_or_else(|| {
            CommandError::new(ErrorCode::UnknownType, format!("Unknown type name '{name}'"))
        })?;
        return Ok(PropType::new(value_type));
    }

    if let Some(base) = base {
        return Ok(PropType::new(base.value_type()));
    }

    if dict.contains_key(attr::PROPERTIES) {
        return Ok(PropType::new(ValueType::Object));
    }

    if dict.contains_key(attr::ITEMS) {
        return Ok(PropType::new(ValueType::Array));
    }

    let bounds: Vec<&Value> = [attr::MINIMUM, attr::MAXIMUM]
        .iter()
        .filter_map(|key| dict.get(*key))
        .collect();
    if !bounds.is_empty() {
        let fractional = bounds
            .iter()
            .any(|v| matches!(v, Value::Number(n) if n.is_f64()));
        let value_type = if fractional { ValueType::Double } else { ValueType::Int };
        return Ok(PropType::new(value_type));
    }

    if dict.contains_key(attr::MIN_LENGTH) || dict.contains_key(attr::MAX_LENGTH) {
        return Ok(PropType::new(ValueType::String));
    }

    if let Some(choices) = dict.get(attr::ENUM) {
        return match choices {
            Value::Array(list) => detect_array_type(list, None, true),
            _ => Err(no_type_info()),
        };
    }

    if let Some(default) = dict.get(attr::DEFAULT) {
        return match default {
            Value::Array(list) => Ok(array_of(detect_array_type(list, None, false)?)),
            other => scalar_type_of(other).map(PropType::new).ok_or_else(no_type_info),
        };
    }

    Err(no_type_info())
}

fn array_of(item: PropType) -> PropType {
    let mut prop = PropType::new(ValueType::Array);
    prop.details = TypeDetails::Array(Some(Inheritable::new(Box::new(item))));
    prop
}

fn scalar_type_of(value: &Value) -> Option<ValueType> {
    match value {
        Value::Bool(_) => Some(ValueType::Boolean),
        Value::Number(n) if n.is_f64() => Some(ValueType::Double),
        Value::Number(_) => Some(ValueType::Int),
        Value::String(_) => Some(ValueType::String),
        Value::Object(_) => Some(ValueType::Object),
        Value::Array(_) | Value::Null => None,
    }
}

fn check_bounds<T>(limits: &Limits<T>, value: T) -> Result<()>
where
    T: Copy + PartialOrd + Display,
{
    if let Some(min) = limits.min {
        if value < min.value {
            return Err(CommandError::new(
                ErrorCode::OutOfRange,
                format!(
                    "Value {value} is out of range. It must not be less than {}",
                    min.value
                ),
            ));
        }
    }
    if let Some(max) = limits.max {
        if value > max.value {
            return Err(CommandError::new(
                ErrorCode::OutOfRange,
                format!(
                    "Value {value} is out of range. It must not be greater than {}",
                    max.value
                ),
            ));
        }
    }
    Ok(())
}

fn check_length(limits: &Limits<i32>, value: &str) -> Result<()> {
    let len = i64::try_from(value.chars().count()).unwrap_or(i64::MAX);
    if let Some(min) = limits.min {
        if len < i64::from(min.value) {
            return Err(CommandError::new(
                ErrorCode::OutOfRange,
                format!(
                    "String '{value}' is too short. Expected at least {} characters",
                    min.value
                ),
            ));
        }
    }
    if let Some(max) = limits.max {
        if len > i64::from(max.value) {
            return Err(CommandError::new(
                ErrorCode::OutOfRange,
                format!(
                    "String '{value}' is too long. Expected at most {} characters",
                    max.value
                ),
            ));
        }
    }
    Ok(())
}

fn parse_i32(value: &Value) -> Result<i32> {
    value
        .as_i64()
        .and_then(|v| i32::try_from(v).ok())
        .ok_or_else(|| type_mismatch(value, ValueType::Int.as_str()))
}

fn parse_f64(value: &Value) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| type_mismatch(value, ValueType::Double.as_str()))
}

fn list_to_json(values: &[PropValue]) -> Value {
    Value::Array(values.iter().map(PropValue::to_json).collect())
}

fn type_mismatch(value: &Value, expected: &str) -> CommandError {
    CommandError::new(
        ErrorCode::TypeMismatch,
        format!("Unable to convert value {value} into {expected}"),
    )
}

fn no_type_info() -> CommandError {
    CommandError::new(ErrorCode::NoTypeInfo, "Unable to determine parameter type")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> PropType {
        PropType::from_json(&value, None).expect("valid property definition")
    }

    fn parse_err(value: Value) -> CommandError {
        PropType::from_json(&value, None).expect_err("definition should be rejected")
    }

    #[test]
    fn test_type_name_shorthand() {
        let prop = parse(json!("integer"));
        assert_eq!(prop.value_type(), ValueType::Int);
        assert_eq!(prop.min_int(), Some(i32::MIN));
        assert_eq!(prop.max_int(), Some(i32::MAX));
        assert_eq!(prop.to_json(false, false), json!("integer"));
        assert_eq!(prop.to_json(true, false), json!({"type": "integer"}));
    }

    #[test]
    fn test_deduce_kind_from_keys() {
        assert_eq!(parse(json!({"minimum": 2})).value_type(), ValueType::Int);
        assert_eq!(parse(json!({"minimum": 2, "maximum": 10.5})).value_type(), ValueType::Double);
        assert_eq!(parse(json!({"maxLength": 5})).value_type(), ValueType::String);
        assert_eq!(parse(json!({"default": true})).value_type(), ValueType::Boolean);
        assert_eq!(parse(json!({"enum": ["a", "b"]})).value_type(), ValueType::String);

        let arr = parse(json!({"default": [1, 2, 3]}));
        assert_eq!(arr.value_type(), ValueType::Array);
        assert_eq!(arr.item_type().map(PropType::value_type), Some(ValueType::Int));

        let arr = parse(json!({"items": "number", "default": []}));
        assert_eq!(arr.item_type().map(PropType::value_type), Some(ValueType::Double));
    }

    #[test]
    fn test_enum_shorthand_of_arrays() {
        let prop = parse(json!([[0, 1], [2, 3]]));
        assert_eq!(prop.value_type(), ValueType::Array);
        assert_eq!(prop.item_type().map(PropType::value_type), Some(ValueType::Int));
        assert_eq!(prop.one_of().map(<[PropValue]>::len), Some(2));

        assert!(prop.validate_value(&json!([2, 3])).is_ok());
        let err = prop.validate_value(&json!([2])).expect_err("not a choice");
        assert_eq!(err.code(), ErrorCode::OutOfRange);
        assert_eq!(err.message(), "Value [2] is invalid. Expected one of [[0,1],[2,3]]");
    }

    #[test]
    fn test_definition_errors() {
        assert_eq!(parse_err(json!({})).code(), ErrorCode::NoTypeInfo);
        assert_eq!(parse_err(json!([])).code(), ErrorCode::NoTypeInfo);
        assert_eq!(parse_err(json!({"default": []})).code(), ErrorCode::NoTypeInfo);
        assert_eq!(parse_err(json!([[[1]], [[2]]])).code(), ErrorCode::NoTypeInfo);
        assert_eq!(parse_err(json!({"enum": [[["foo"]]]})).code(), ErrorCode::NoTypeInfo);
        assert_eq!(parse_err(json!("foo")).code(), ErrorCode::UnknownType);
        assert_eq!(parse_err(json!({"type": "foo"})).code(), ErrorCode::UnknownType);
        assert_eq!(parse_err(json!({"minimum": "foo"})).code(), ErrorCode::TypeMismatch);
        assert_eq!(parse_err(json!([1, 2.2])).code(), ErrorCode::TypeMismatch);
        assert_eq!(parse_err(json!([[1, 2.3]])).code(), ErrorCode::TypeMismatch);
        assert_eq!(
            parse_err(json!({"minimum": 1, "enum": [1, 2, 3]})).code(),
            ErrorCode::UnknownProperty
        );
        assert_eq!(parse_err(json!({"type": "integer", "blah": 1})).code(), ErrorCode::UnknownProperty);
        assert_eq!(
            parse_err(json!({"items": {"items": "integer"}})).code(),
            ErrorCode::InvalidObjectSchema
        );
        assert_eq!(parse_err(json!("object")).code(), ErrorCode::InvalidObjectSchema);
        assert_eq!(parse_err(json!("array")).code(), ErrorCode::InvalidObjectSchema);
    }

    #[test]
    fn test_default_must_satisfy_constraints() {
        let err = parse_err(json!({"enum": [1, 2, 3], "default": 5}));
        assert_eq!(err.code(), ErrorCode::InvalidPropValue);
        assert_eq!(err.first_error().code(), ErrorCode::OutOfRange);

        let prop = parse(json!({"enum": [1, 2, 3], "default": 2}));
        assert_eq!(prop.default_value(), Some(&PropValue::Int(2)));
    }

    #[test]
    fn test_numeric_bounds_are_inclusive() {
        let prop = parse(json!({"type": "number", "minimum": 2.3, "maximum": 10.5}));
        assert!(prop.validate_value(&json!(2.3)).is_ok());
        assert!(prop.validate_value(&json!(10.5)).is_ok());
        assert!(prop.validate_value(&json!(7)).is_ok());

        let err = prop.validate_value(&json!(2)).expect_err("below minimum");
        assert_eq!(err.code(), ErrorCode::OutOfRange);
        assert_eq!(err.message(), "Value 2 is out of range. It must not be less than 2.3");

        let err = prop.validate_value(&json!(10.51)).expect_err("above maximum");
        assert_eq!(
            err.message(),
            "Value 10.51 is out of range. It must not be greater than 10.5"
        );
    }

    #[test]
    fn test_integer_rejects_fractional_values() {
        let prop = parse(json!("integer"));
        let err = prop.validate_value(&json!(3.0)).expect_err("not an integer");
        assert_eq!(err.code(), ErrorCode::TypeMismatch);
        assert_eq!(err.message(), "Unable to convert value 3.0 into integer");
        assert!(prop.validate_value(&json!("3")).is_err());
    }

    #[test]
    fn test_string_length() {
        let prop = parse(json!({"minLength": 2, "maxLength": 4}));
        assert!(prop.validate_value(&json!("ab")).is_ok());
        assert!(prop.validate_value(&json!("abcd")).is_ok());

        let err = prop.validate_value(&json!("a")).expect_err("too short");
        assert_eq!(err.message(), "String 'a' is too short. Expected at least 2 characters");
        let err = prop.validate_value(&json!("abcde")).expect_err("too long");
        assert_eq!(err.message(), "String 'abcde' is too long. Expected at most 4 characters");
    }

    #[test]
    fn test_enum_and_bounds_are_exclusive() {
        let base = parse(json!({"type": "integer", "minimum": 0, "maximum": 10}));

        let derived = PropType::from_json(&json!([1, 2, 3]), Some(&base)).expect("enum override");
        assert_eq!(derived.min_int(), Some(i32::MIN));
        assert_eq!(derived.max_int(), Some(i32::MAX));
        assert!(derived.validate_value(&json!(20)).is_err());

        let enum_base = parse(json!([1, 2, 3]));
        let derived = PropType::from_json(&json!({"minimum": 5}), Some(&enum_base)).expect("bound override");
        assert!(derived.one_of().is_none());
        assert_eq!(derived.min_int(), Some(5));
    }

    #[test]
    fn test_inherits_unspecified_attributes() {
        let base = parse(json!({"type": "integer", "minimum": 0, "maximum": 10, "default": 5, "isRequired": true}));
        let derived = PropType::from_json(&json!({"maximum": 8}), Some(&base)).expect("derived");

        assert!(derived.is_based_on_schema());
        assert_eq!(derived.min_int(), Some(0));
        assert_eq!(derived.max_int(), Some(8));
        assert_eq!(derived.default_value(), Some(&PropValue::Int(5)));
        assert!(derived.is_required());

        assert_eq!(derived.to_json(false, false), json!({"maximum": 8}));
        assert_eq!(
            derived.to_json(true, false),
            json!({"type": "integer", "minimum": 0, "maximum": 8, "default": 5})
        );
    }

    #[test]
    fn test_kind_change_rejected() {
        let base = parse(json!("string"));
        let err = PropType::from_json(&json!("integer"), Some(&base)).expect_err("kind changed");
        assert_eq!(err.code(), ErrorCode::PropTypeChanged);
        let err = PropType::from_json(&json!({"type": "integer"}), Some(&base)).expect_err("kind changed");
        assert_eq!(err.code(), ErrorCode::PropTypeChanged);
    }

    #[test]
    fn test_diff_shorthands() {
        let base = parse(json!({"type": "integer", "minimum": 0}));

        let unchanged = PropType::from_json(&json!({}), Some(&base)).expect("derived");
        assert_eq!(unchanged.to_json(false, false), json!({}));

        let enum_only = PropType::from_json(&json!({"enum": [1, 2, 3]}), Some(&base)).expect("derived");
        assert_eq!(enum_only.to_json(false, false), json!([1, 2, 3]));

        let boolean = parse(json!([true, false]));
        assert_eq!(boolean.to_json(false, false), json!([true, false]));
        assert_eq!(boolean.to_json(true, false), json!({"type": "boolean", "enum": [true, false]}));
    }

    #[test]
    fn test_diff_keeps_required_override() {
        let base = parse(json!({"properties": {"a": "integer"}}));
        let derived = PropType::from_json(&json!({"required": ["a"]}), Some(&base)).expect("derived");

        let diff = derived.to_json(false, false);
        assert_eq!(diff["required"], json!(["a"]));

        let reparsed = PropType::from_json(&diff, Some(&base)).expect("reparse");
        let a = reparsed
            .object_schema()
            .and_then(|schema| schema.get_prop("a"))
            .expect("property a");
        assert!(a.is_required());
    }

    #[test]
    fn test_required_flag_in_command_definitions() {
        let prop = parse(json!({"type": "string", "isRequired": true}));
        assert_eq!(prop.to_json(false, false), json!("string"));
        assert_eq!(prop.to_json(false, true), json!({"type": "string", "isRequired": true}));
        assert_eq!(
            PropType::from_json(&prop.to_json(false, true), None).expect("reparse"),
            prop
        );
    }

    #[test]
    fn test_object_type() {
        let prop = parse(json!({
            "properties": {
                "expires": "integer",
                "password": {"maxLength": 100, "minLength": 6}
            },
            "required": ["password"]
        }));
        assert_eq!(prop.value_type(), ValueType::Object);
        assert_eq!(
            prop.to_json(true, false),
            json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "expires": {"type": "integer"},
                    "password": {"type": "string", "minLength": 6, "maxLength": 100}
                },
                "required": ["password"]
            })
        );

        let value = prop
            .value_from_json(&json!({"expires": 10, "password": "abcdef"}))
            .expect("valid object");
        assert_eq!(value.as_object().map(|m| m.len()), Some(2));

        let err = prop.validate_value(&json!({"expires": 10})).expect_err("missing password");
        assert_eq!(err.code(), ErrorCode::PropertyMissing);

        let err = prop
            .validate_value(&json!({"expires": 10, "password": "abcde"}))
            .expect_err("short password");
        assert_eq!(err.code(), ErrorCode::InvalidPropValue);
        assert_eq!(err.first_error().code(), ErrorCode::OutOfRange);

        let err = prop.validate_value(&json!([1])).expect_err("not an object");
        assert_eq!(err.code(), ErrorCode::TypeMismatch);
    }

    #[test]
    fn test_array_type() {
        let prop = parse(json!({"items": {"type": "number", "minimum": 0}}));
        let value = prop.value_from_json(&json!([3, 4, 10.5])).expect("valid array");
        assert_eq!(
            value,
            PropValue::Array(vec![
                PropValue::Double(3.0),
                PropValue::Double(4.0),
                PropValue::Double(10.5)
            ])
        );
        let err = prop.validate_value(&json!([1, -1])).expect_err("negative item");
        assert_eq!(err.code(), ErrorCode::OutOfRange);
        assert_eq!(prop.to_json(false, false), json!({"items": {"minimum": 0.0}}));
    }

    #[test]
    fn test_value_round_trip() {
        let types = [
            json!("integer"),
            json!({"type": "number", "maximum": 100}),
            json!({"minLength": 1}),
            json!("boolean"),
            json!({"properties": {"a": "integer", "b": {"items": "string"}}}),
            json!({"items": {"properties": {"x": "number"}}}),
        ];
        let values = [
            json!(-12),
            json!(99.5),
            json!("x"),
            json!(false),
            json!({"a": 1, "b": ["p", "q"]}),
            json!([{"x": 1.5}, {"x": -2.25}]),
        ];
        for (schema, raw) in types.iter().zip(values.iter()) {
            let prop = parse(schema.clone());
            let value = prop.value_from_json(raw).expect("valid value");
            let reparsed = prop.value_from_json(&value.to_json()).expect("reparse");
            assert_eq!(reparsed, value);
        }
    }

    #[test]
    fn test_create_value_promotes_integers() {
        let prop = parse(json!("number"));
        assert_eq!(prop.create_value(&PropValue::Int(3)), Ok(PropValue::Double(3.0)));

        let prop = parse(json!("string"));
        let err = prop.create_value(&PropValue::Int(3)).expect_err("wrong kind");
        assert_eq!(err.code(), ErrorCode::TypeMismatch);
    }

    #[test]
    fn test_clone_is_independent() {
        let original = parse(json!({"properties": {"a": "integer"}}));
        let mut copy = original.clone();
        if let TypeDetails::Object(schema) = &mut copy.details {
            schema.value.add_prop("b", PropType::new(ValueType::String));
        }
        assert!(original.object_schema().and_then(|s| s.get_prop("b")).is_none());
        assert!(copy.object_schema().and_then(|s| s.get_prop("b")).is_some());
    }
}
