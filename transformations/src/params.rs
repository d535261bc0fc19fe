//! Typed access to an operation's JSON parameter mapping.
//!
//! Each node owns its own copy of the mapping. Accessors treat `null` as
//! absent and report a present-but-malformed value as
//! [`TransformationError::InvalidParameter`], which the node turns into a
//! degraded step rather than a failed request.

use crate::error::{Result, TransformationError};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationParams(Map<String, Value>);

impl OperationParams {
    pub fn new(values: Map<String, Value>) -> Self {
        Self(values)
    }

    /// Copies the `params` member of an operation spec. Absent or `null`
    /// yields an empty mapping; any other non-object is malformed.
    pub fn from_value(value: Option<&Value>) -> Result<Self> {
        match value {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(Value::Object(map)) => Ok(Self(map.clone())),
            Some(other) => Err(TransformationError::MalformedOperation(format!(
                "'params' must be an object, got {}",
                json_type_name(other)
            ))),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name).filter(|value| !value.is_null())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// A strictly positive pixel length.
    pub fn dimension(&self, name: &'static str) -> Result<Option<u32>> {
        match self.whole_number(name)? {
            None => Ok(None),
            Some(0) => Err(TransformationError::invalid_param(name, "must be greater than zero")),
            Some(value) => Ok(Some(value)),
        }
    }

    /// A pixel offset, zero allowed.
    pub fn offset(&self, name: &'static str) -> Result<Option<u32>> {
        self.whole_number(name)
    }

    pub fn number(&self, name: &'static str) -> Result<Option<f64>> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_f64()
                .filter(|value| value.is_finite())
                .map(Some)
                .ok_or_else(|| TransformationError::invalid_param(name, "must be a finite number")),
            Some(other) => Err(TransformationError::invalid_param(
                name,
                format!("expected a number, got {}", json_type_name(other)),
            )),
        }
    }

    pub fn text(&self, name: &'static str) -> Result<Option<&str>> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(TransformationError::invalid_param(
                name,
                format!("expected a string, got {}", json_type_name(other)),
            )),
        }
    }

    fn whole_number(&self, name: &'static str) -> Result<Option<u32>> {
        let number = match self.get(name) {
            None => return Ok(None),
            Some(Value::Number(n)) => n,
            Some(other) => {
                return Err(TransformationError::invalid_param(
                    name,
                    format!("expected an integer, got {}", json_type_name(other)),
                ))
            }
        };

        if let Some(value) = number.as_u64() {
            return u32::try_from(value)
                .map(Some)
                .map_err(|_| TransformationError::invalid_param(name, "is too large"));
        }
        match number.as_f64() {
            Some(value) if value.fract() == 0.0 && (0.0..=u32::MAX as f64).contains(&value) => {
                Ok(Some(value as u32))
            }
            _ => Err(TransformationError::invalid_param(
                name,
                format!("expected a non-negative integer, got {}", number),
            )),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
