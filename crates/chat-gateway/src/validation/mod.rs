//! Request payload validation.
//!
//! A schema is a `validator`-derived payload struct whose fields are all
//! optional at the serde level, so a missing field is reported as a rule
//! violation rather than aborting deserialization. Violations are collected in
//! one pass and reported as `"<field>: <reason>"`, ordered by the schema's
//! declared field order. Anything that cannot be read as the payload shape
//! fails closed with a single generic message.

pub mod schemas;

pub use schemas::{
    ChatMessageInput, ImageDownloadInput, ImagePromptInput, LoginInput, PasswordResetInput,
    PasswordUpdateInput, ProfileUpdateInput, RegistrationInput,
};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use validator::{Validate, ValidationErrors};

use crate::error::ApiError;

pub const GENERIC_VALIDATION_ERROR: &str = "Validation failed";

/// Either the typed input or the ordered list of violations, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult<T> {
    Valid(T),
    Invalid(Vec<String>),
}

impl<T> ValidationResult<T> {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid(_))
    }

    pub fn errors(&self) -> &[String] {
        match self {
            ValidationResult::Valid(_) => &[],
            ValidationResult::Invalid(errors) => errors,
        }
    }

    pub fn into_result(self) -> Result<T, ApiError> {
        match self {
            ValidationResult::Valid(data) => Ok(data),
            ValidationResult::Invalid(errors) => Err(ApiError::Validation(errors)),
        }
    }
}

/// A named request shape with its validated, typed form.
pub trait Schema: Sized {
    type Payload: DeserializeOwned + Validate;

    const NAME: &'static str;

    /// `(struct field, wire name)` in declaration order.
    const FIELDS: &'static [(&'static str, &'static str)];

    /// Build the typed value. Only called after `Payload::validate` passed,
    /// so required fields are present.
    fn from_payload(payload: Self::Payload) -> Self;
}

pub fn validate<S: Schema>(raw: &Value) -> ValidationResult<S> {
    if !raw.is_object() {
        debug!("{} payload is not a JSON object", S::NAME);
        return ValidationResult::Invalid(vec![GENERIC_VALIDATION_ERROR.to_string()]);
    }

    let payload: S::Payload = match serde_json::from_value(raw.clone()) {
        Ok(payload) => payload,
        Err(e) => {
            debug!("{} payload could not be read: {}", S::NAME, e);
            return ValidationResult::Invalid(vec![GENERIC_VALIDATION_ERROR.to_string()]);
        }
    };

    match payload.validate() {
        Ok(()) => ValidationResult::Valid(S::from_payload(payload)),
        Err(errors) => ValidationResult::Invalid(collect_messages::<S>(&errors)),
    }
}

fn collect_messages<S: Schema>(errors: &ValidationErrors) -> Vec<String> {
    let by_field = errors.field_errors();
    let mut messages = Vec::new();

    for (field, wire_name) in S::FIELDS {
        if let Some(field_errors) = by_field.get(field) {
            for err in field_errors.iter() {
                let reason = err
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| err.code.to_string());
                messages.push(format!("{}: {}", wire_name, reason));
            }
        }
    }

    if messages.is_empty() {
        messages.push(GENERIC_VALIDATION_ERROR.to_string());
    }
    messages
}

/// Parse a raw request body. Malformed JSON becomes `Value::Null`, which every
/// schema rejects with the generic message.
pub fn parse_body(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap_or_else(|e| {
        debug!("Request body is not valid JSON: {}", e);
        Value::Null
    })
}
