//! Parameter validation helpers for step construction.
//!
//! Every step kind reads its parameter bag through [`ParamReader`], which
//! enforces presence, type, and declared ranges. Values written as numeric or
//! boolean strings by older authoring tools are accepted alongside native JSON
//! numbers and booleans.

use serde_json::Value as JsonValue;
use thiserror::Error;

use super::{ClickType, StepKind, StepParams};

/// Raised when a step record cannot become a valid [`Step`](super::Step).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// The `type` tag does not name a known step kind.
    #[error("unknown step type '{0}'")]
    UnknownKind(String),
    /// A parameter required by the kind is absent or null.
    #[error("{kind} step is missing required parameter '{param}'")]
    MissingParameter { kind: StepKind, param: &'static str },
    /// A parameter is present but has the wrong type or lies outside its range.
    #[error("{kind} step parameter '{param}' {message}")]
    InvalidParameter {
        kind: StepKind,
        param: &'static str,
        message: String,
    },
}

/// Typed, kind-aware view over a step's parameter bag.
pub(crate) struct ParamReader<'a> {
    kind: StepKind,
    params: &'a StepParams,
}

impl<'a> ParamReader<'a> {
    pub(crate) fn new(kind: StepKind, params: &'a StepParams) -> Self {
        Self { kind, params }
    }

    fn lookup(&self, names: &[&'static str]) -> Option<&'a JsonValue> {
        names
            .iter()
            .filter_map(|name| self.params.get(*name))
            .find(|value| !value.is_null())
    }

    fn missing(&self, param: &'static str) -> ValidationError {
        ValidationError::MissingParameter { kind: self.kind, param }
    }

    fn invalid(&self, param: &'static str, message: impl Into<String>) -> ValidationError {
        ValidationError::InvalidParameter {
            kind: self.kind,
            param,
            message: message.into(),
        }
    }

    /// Returns the text value of a required parameter; blank text is rejected.
    pub(crate) fn non_empty_string(&self, param: &'static str) -> Result<String, ValidationError> {
        let text = self.string(param)?;
        if text.trim().is_empty() {
            return Err(self.invalid(param, "must not be empty"));
        }
        Ok(text)
    }

    /// Returns the text value of a required parameter, allowing empty text.
    pub(crate) fn string(&self, param: &'static str) -> Result<String, ValidationError> {
        match self.lookup(&[param]) {
            Some(JsonValue::String(text)) => Ok(text.clone()),
            Some(other) => Err(self.invalid(param, format!("must be text, found {other}"))),
            None => Err(self.missing(param)),
        }
    }

    pub(crate) fn optional_string(&self, param: &'static str) -> Result<Option<String>, ValidationError> {
        match self.lookup(&[param]) {
            Some(JsonValue::String(text)) => Ok(Some(text.clone())),
            Some(other) => Err(self.invalid(param, format!("must be text, found {other}"))),
            None => Ok(None),
        }
    }

    pub(crate) fn integer(&self, param: &'static str) -> Result<i32, ValidationError> {
        let value = self.lookup(&[param]).ok_or_else(|| self.missing(param))?;
        self.to_integer(param, value)
    }

    pub(crate) fn optional_integer(&self, param: &'static str, default: i32) -> Result<i32, ValidationError> {
        match self.lookup(&[param]) {
            Some(value) => self.to_integer(param, value),
            None => Ok(default),
        }
    }

    /// Reads a loop/retry counter constrained to `minimum..`.
    pub(crate) fn count(&self, param: &'static str, default: Option<u32>, minimum: u32) -> Result<u32, ValidationError> {
        let value = match (self.lookup(&[param]), default) {
            (Some(value), _) => self.to_integer(param, value)?,
            (None, Some(default)) => return Ok(default),
            (None, None) => return Err(self.missing(param)),
        };
        if i64::from(value) < i64::from(minimum) {
            return Err(self.invalid(param, format!("must be at least {minimum}, found {value}")));
        }
        Ok(value as u32)
    }

    /// Reads a floating point value, falling back to `default` and enforcing `min..=max`.
    pub(crate) fn number_in(
        &self,
        names: &[&'static str],
        default: Option<f64>,
        min: f64,
        max: f64,
    ) -> Result<f64, ValidationError> {
        let param = names[0];
        let number = match (self.lookup(names), default) {
            (Some(value), _) => number_value(value).ok_or_else(|| self.invalid(param, format!("must be a number, found {value}")))?,
            (None, Some(default)) => return Ok(default),
            (None, None) => return Err(self.missing(param)),
        };
        if !number.is_finite() || number < min || number > max {
            let range = if max.is_infinite() {
                format!("must be at least {min}")
            } else {
                format!("must lie in [{min}, {max}]")
            };
            return Err(self.invalid(param, format!("{range}, found {number}")));
        }
        Ok(number)
    }

    pub(crate) fn flag(&self, param: &'static str, default: bool) -> Result<bool, ValidationError> {
        match self.lookup(&[param]) {
            Some(JsonValue::Bool(flag)) => Ok(*flag),
            Some(JsonValue::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" => Ok(false),
                _ => Err(self.invalid(param, format!("must be a boolean, found '{text}'"))),
            },
            Some(JsonValue::Number(number)) => Ok(number.as_f64().is_some_and(|value| value != 0.0)),
            Some(other) => Err(self.invalid(param, format!("must be a boolean, found {other}"))),
            None => Ok(default),
        }
    }

    /// Reads `click_type`; `None` means the parameter is absent and the caller applies its default.
    pub(crate) fn click_type(&self) -> Result<Option<ClickType>, ValidationError> {
        match self.optional_string("click_type")? {
            Some(text) => ClickType::parse(&text)
                .map(Some)
                .ok_or_else(|| self.invalid("click_type", format!("must be one of single, double, right; found '{text}'"))),
            None => Ok(None),
        }
    }

    fn to_integer(&self, param: &'static str, value: &JsonValue) -> Result<i32, ValidationError> {
        let number = number_value(value).ok_or_else(|| self.invalid(param, format!("must be an integer, found {value}")))?;
        if number.fract() != 0.0 || number < f64::from(i32::MIN) || number > f64::from(i32::MAX) {
            return Err(self.invalid(param, format!("must be an integer, found {number}")));
        }
        Ok(number as i32)
    }
}

fn number_value(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(number) => number.as_f64(),
        JsonValue::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}
