//! Validation utilities for edit payloads
//!
//! Quantities and prices arrive from the point-of-sale screens either as
//! JSON numbers or as numeric strings. Everything is parsed into `Decimal`
//! up front so a single malformed field rejects the whole edit.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;

use crate::reconcile::ReconcileError;

/// Parse a JSON number or numeric string into a `Decimal`
pub fn parse_decimal(field: &str, value: &Value) -> Result<Decimal, ReconcileError> {
    let invalid = || ReconcileError::InvalidNumber {
        field: field.to_string(),
        value: value.to_string(),
    };

    match value {
        Value::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .map_err(|_| invalid())
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Err(invalid());
            }
            Decimal::from_str(trimmed).map_err(|_| invalid())
        }
        _ => Err(invalid()),
    }
}

/// Parse an optional numeric field; `null` and absent both yield `None`
pub fn parse_optional_decimal(
    field: &str,
    value: Option<&Value>,
) -> Result<Option<Decimal>, ReconcileError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => parse_decimal(field, v).map(Some),
    }
}

/// Parse a quantity, rejecting negative values
pub fn parse_quantity(field: &str, value: &Value) -> Result<Decimal, ReconcileError> {
    let quantity = parse_decimal(field, value)?;
    if quantity < Decimal::ZERO {
        return Err(ReconcileError::NegativeQuantity {
            field: field.to_string(),
        });
    }
    Ok(quantity)
}

/// Validate a document number against the `{series}-{8 digits}` layout
pub fn validate_document_number(numero: &str) -> Result<(), &'static str> {
    let Some((serie, correlativo)) = numero.split_once('-') else {
        return Err("Document number must be SERIES-CORRELATIVE");
    };
    if serie.len() != 4 || !serie.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err("Series must be 4 alphanumeric characters");
    }
    if correlativo.len() != 8 || !correlativo.chars().all(|c| c.is_ascii_digit()) {
        return Err("Correlative must be 8 digits");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_numbers_and_numeric_strings() {
        assert_eq!(parse_decimal("cantidad", &json!(2)).unwrap(), Decimal::from(2));
        assert_eq!(
            parse_decimal("precio", &json!("10.50")).unwrap(),
            Decimal::from_str("10.50").unwrap()
        );
        assert_eq!(
            parse_decimal("precio", &json!(" 7 ")).unwrap(),
            Decimal::from(7)
        );
    }

    #[test]
    fn rejects_non_numeric_values() {
        assert!(parse_decimal("cantidad", &json!("abc")).is_err());
        assert!(parse_decimal("cantidad", &json!("")).is_err());
        assert!(parse_decimal("cantidad", &json!(true)).is_err());
        assert!(parse_decimal("cantidad", &json!(null)).is_err());
    }

    #[test]
    fn optional_null_is_none() {
        assert_eq!(parse_optional_decimal("precio", None).unwrap(), None);
        assert_eq!(parse_optional_decimal("precio", Some(&json!(null))).unwrap(), None);
        assert!(parse_optional_decimal("precio", Some(&json!("x"))).is_err());
    }

    #[test]
    fn negative_quantity_is_rejected() {
        let err = parse_quantity("productos[0].cantidad", &json!(-1)).unwrap_err();
        assert!(matches!(err, ReconcileError::NegativeQuantity { .. }));
    }

    #[test]
    fn document_number_layout() {
        assert!(validate_document_number("F001-00000001").is_ok());
        assert!(validate_document_number("F001-1").is_err());
        assert!(validate_document_number("F0001-00000001").is_err());
        assert!(validate_document_number("F00100000001").is_err());
    }
}
