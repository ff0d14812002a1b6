//! Typed job parameters.
//!
//! Jobs receive an untyped [Parameters] mapping from the scheduler. A
//! [JobParams] type converts it once, through a [ParamReader], which records
//! every problem it finds instead of stopping at the first.

use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::job::Parameters;

/// What is wrong with a single parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldErrorKind {
    /// The parameter is required but absent.
    Missing,

    /// The parameter has the wrong JSON type.
    WrongType {
        /// JSON type the parameter must have.
        expected: &'static str,
        /// JSON type it had.
        found: &'static str,
    },

    /// The parameter has the right type but an unusable value.
    Invalid(String),
}

impl fmt::Display for FieldErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldErrorKind::Missing => f.write_str("not found"),
            FieldErrorKind::WrongType { expected, found } => {
                write!(f, "expected {expected}, found {found}")
            }
            FieldErrorKind::Invalid(reason) => f.write_str(reason),
        }
    }
}

/// A problem with one named parameter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("param {name} {kind}")]
pub struct FieldError {
    /// Parameter name.
    pub name: String,
    /// What is wrong with it.
    pub kind: FieldErrorKind,
}

/// Job parameters failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// No parameters were supplied to a job which requires them.
    #[error("missing job parameters")]
    MissingParameters,

    /// One or more parameters were missing or malformed.
    #[error("invalid job parameters: {}", FieldList(.0))]
    Fields(Vec<FieldError>),
}

impl ValidationError {
    /// The field errors, empty for [ValidationError::MissingParameters].
    pub fn fields(&self) -> &[FieldError] {
        match self {
            ValidationError::MissingParameters => &[],
            ValidationError::Fields(fields) => fields,
        }
    }
}

struct FieldList<'a>(&'a [FieldError]);

impl fmt::Display for FieldList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, error) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

/// Parameters with a typed form.
pub trait JobParams: Sized {
    /// Convert and validate the untyped mapping. Performs no I/O.
    fn from_params(params: Option<&Parameters>) -> Result<Self, ValidationError>;
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Reads fields out of a [Parameters] mapping, collecting errors.
#[derive(Debug)]
pub struct ParamReader<'a> {
    params: &'a Parameters,
    errors: Vec<FieldError>,
}

impl<'a> ParamReader<'a> {
    /// Start reading. Absent or empty parameters are rejected outright.
    pub fn new(params: Option<&'a Parameters>) -> Result<Self, ValidationError> {
        match params {
            Some(params) if !params.is_empty() => Ok(Self {
                params,
                errors: Vec::new(),
            }),
            _ => Err(ValidationError::MissingParameters),
        }
    }

    fn error(&mut self, name: &str, kind: FieldErrorKind) {
        self.errors.push(FieldError {
            name: name.to_owned(),
            kind,
        });
    }

    /// Record a problem found by the caller.
    pub fn invalid(&mut self, name: &str, reason: impl Into<String>) {
        self.error(name, FieldErrorKind::Invalid(reason.into()));
    }

    fn required(&mut self, name: &str) -> Option<&'a Value> {
        let value = self.params.get(name);
        if value.is_none() {
            self.error(name, FieldErrorKind::Missing);
        }
        value
    }

    /// A required string.
    pub fn string(&mut self, name: &str) -> Option<String> {
        let value = self.required(name)?;
        match value {
            Value::String(value) => Some(value.clone()),
            other => {
                self.error(
                    name,
                    FieldErrorKind::WrongType {
                        expected: "string",
                        found: json_type(other),
                    },
                );
                None
            }
        }
    }

    /// A required structured value, given either as a JSON object or as a
    /// string holding encoded JSON.
    pub fn json<T: DeserializeOwned>(&mut self, name: &str) -> Option<T> {
        let value = self.required(name)?;
        let parsed = match value {
            Value::String(encoded) => serde_json::from_str(encoded),
            Value::Object(_) => serde_json::from_value(value.clone()),
            other => {
                self.error(
                    name,
                    FieldErrorKind::WrongType {
                        expected: "object",
                        found: json_type(other),
                    },
                );
                return None;
            }
        };

        match parsed {
            Ok(parsed) => Some(parsed),
            Err(error) => {
                self.invalid(name, error.to_string());
                None
            }
        }
    }

    /// Finish reading, producing the typed value if no errors were recorded.
    pub fn finish<T>(self, build: impl FnOnce() -> Option<T>) -> Result<T, ValidationError> {
        match build() {
            Some(value) if self.errors.is_empty() => Ok(value),
            _ => Err(ValidationError::Fields(self.errors)),
        }
    }
}
