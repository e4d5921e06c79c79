//! Shared error taxonomy.

use serde::Serialize;
use std::fmt;

/// Coarse classification every domain error maps onto.
///
/// Callers branch on this rather than on individual variants: `Validation` means the input
/// must change, `BusinessRule` means the request is well-formed but not allowed right now,
/// `Concurrency` means reload and try again, `Integrity` means the store itself failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Validation,
    BusinessRule,
    Concurrency,
    Integrity,
}

impl ErrorClass {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::Concurrency)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorClass::Validation => "validation",
            ErrorClass::BusinessRule => "business_rule",
            ErrorClass::Concurrency => "concurrency",
            ErrorClass::Integrity => "integrity",
        };
        f.write_str(label)
    }
}

/// Unrecognized value for a stored enum column (order type, bond status, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_enum_error_names_the_kind() {
        let err = ParseEnumError::new("order type", "hold");
        assert_eq!(err.to_string(), "unknown order type: hold");
        assert!(ErrorClass::Concurrency.is_retryable());
        assert!(!ErrorClass::Validation.is_retryable());
    }
}
