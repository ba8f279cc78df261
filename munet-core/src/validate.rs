//! Schema validation (§4.1, §10.4) — pluggable per spec.md.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One structured, path-pointed validation failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    /// JSON Pointer into the document, e.g. `/topology/nodes/r1/cmd`.
    pub pointer: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.pointer, self.message)
    }
}

/// A pluggable validator for the raw JSON form of a config (§4.1).
pub trait ConfigValidator: Send + Sync {
    fn validate(&self, document: &Value) -> Result<(), Vec<ValidationError>>;
}

/// Validates against the published JSON schema. The default validator for
/// the CLI driver.
pub struct JsonSchemaValidator {
    schema: jsonschema::Validator,
}

impl JsonSchemaValidator {
    /// Compile a validator from an already-parsed JSON schema document.
    pub fn compile(schema: &Value) -> Result<Self, String> {
        let schema = jsonschema::validator_for(schema).map_err(|e| e.to_string())?;
        Ok(JsonSchemaValidator { schema })
    }
}

impl ConfigValidator for JsonSchemaValidator {
    fn validate(&self, document: &Value) -> Result<(), Vec<ValidationError>> {
        let errors: Vec<ValidationError> = self
            .schema
            .iter_errors(document)
            .map(|e| ValidationError {
                pointer: e.instance_path.to_string(),
                message: e.to_string(),
            })
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Accepts every document. For tests and for embedders of the library that
/// do not want schema validation.
pub struct NullValidator;

impl ConfigValidator for NullValidator {
    fn validate(&self, _document: &Value) -> Result<(), Vec<ValidationError>> {
        Ok(())
    }
}

/// Invariant checks that are structural rather than schema-expressible
/// (§3 invariant 7: constraint-group field co-requirements).
pub fn check_constraint_invariants(
    pointer_prefix: &str,
    constraints: &crate::model::constraints::IntfConstraints,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if constraints.jitter.is_some() && constraints.delay.is_none() {
        errors.push(ValidationError {
            pointer: format!("{pointer_prefix}/jitter"),
            message: "jitter requires delay".to_string(),
        });
    }
    if constraints.jitter_correlation.is_some() && constraints.jitter.is_none() {
        errors.push(ValidationError {
            pointer: format!("{pointer_prefix}/jitter-correlation"),
            message: "jitter-correlation requires jitter".to_string(),
        });
    }
    if constraints.loss_correlation.is_some() && constraints.loss.is_none() {
        errors.push(ValidationError {
            pointer: format!("{pointer_prefix}/loss-correlation"),
            message: "loss-correlation requires loss".to_string(),
        });
    }
    if let Some(rate) = &constraints.rate {
        if rate.rate.is_empty() {
            errors.push(ValidationError {
                pointer: format!("{pointer_prefix}/rate/rate"),
                message: "rate.rate is required when rate.limit or rate.burst is set".to_string(),
            });
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::constraints::{IntfConstraints, RateConstraint};

    #[test]
    fn jitter_without_delay_is_invalid() {
        let c = IntfConstraints {
            jitter: Some("2ms".into()),
            ..Default::default()
        };
        let errors = check_constraint_invariants("/x", &c);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("jitter requires delay"));
    }

    #[test]
    fn delay_with_jitter_is_valid() {
        let c = IntfConstraints {
            delay: Some("10ms".into()),
            jitter: Some("2ms".into()),
            ..Default::default()
        };
        assert!(check_constraint_invariants("/x", &c).is_empty());
    }

    #[test]
    fn rate_fields_require_rate_rate() {
        let c = IntfConstraints {
            rate: Some(RateConstraint {
                rate: "10M".into(),
                limit: Some("1M".into()),
                burst: None,
            }),
            ..Default::default()
        };
        assert!(check_constraint_invariants("/x", &c).is_empty());
    }

    #[test]
    fn null_validator_accepts_anything() {
        let v = NullValidator;
        assert!(v.validate(&serde_json::json!({"anything": true})).is_ok());
    }
}
