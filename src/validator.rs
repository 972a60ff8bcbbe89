//! The schema validator contract: `validate(value) →
//! value|errors`. Any engine meeting this contract is acceptable; this
//! crate only defines the seam and a passthrough default.

use serde_json::{Map, Value};

/// A single validation failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"age"` or `"address.zip"`.
    pub path: String,
    pub message: String,
}

impl ValidationError {
    #[must_use]
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// External schema validator contract. Implementations may transform the
/// value (e.g. applying defaults) as well as reject it.
pub trait Validator: Send + Sync {
    fn validate(&self, value: Map<String, Value>) -> Result<Map<String, Value>, Vec<ValidationError>>;
}

/// A validator that accepts everything unchanged. Useful for callers that
/// don't wire in a schema engine, or for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopValidator;

impl Validator for NoopValidator {
    fn validate(&self, value: Map<String, Value>) -> Result<Map<String, Value>, Vec<ValidationError>> {
        Ok(value)
    }
}
