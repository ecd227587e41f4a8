//! Structural validation shared by the services.

use chrono::{DateTime, Utc};

use arx_types::{ArxError, FieldViolation, Result};

const MAX_NAME_LEN: usize = 256;

pub(crate) fn check_name(field: &str, value: &str, violations: &mut Vec<FieldViolation>) {
    if value.is_empty() {
        violations.push(FieldViolation::new(field, "must not be empty"));
    } else if value.len() > MAX_NAME_LEN {
        violations.push(FieldViolation::new(
            field,
            format!("must be at most {MAX_NAME_LEN} characters"),
        ));
    } else if value.contains('/') || value.chars().any(|c| c.is_control()) {
        violations.push(FieldViolation::new(
            field,
            "must not contain '/' or control characters",
        ));
    }
}

pub(crate) fn check_max_reads(value: Option<i64>, violations: &mut Vec<FieldViolation>) {
    if let Some(max_reads) = value {
        if max_reads < 1 {
            violations.push(FieldViolation::new("max_reads", "must be at least 1"));
        }
    }
}

pub(crate) fn check_expiration(
    value: Option<DateTime<Utc>>,
    violations: &mut Vec<FieldViolation>,
) {
    if let Some(expires_at) = value {
        if expires_at <= Utc::now() {
            violations.push(FieldViolation::new("expiration", "must be in the future"));
        }
    }
}

pub(crate) fn finish(violations: Vec<FieldViolation>) -> Result<()> {
    if violations.is_empty() {
        Ok(())
    } else {
        Err(ArxError::invalid_fields("validation failed", violations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_rules() {
        let mut v = Vec::new();
        check_name("name", "db-password", &mut v);
        assert!(v.is_empty());

        check_name("name", "", &mut v);
        check_name("name", "a/b", &mut v);
        check_name("name", "bad\nname", &mut v);
        check_name("name", &"x".repeat(300), &mut v);
        assert_eq!(v.len(), 4);
    }

    #[test]
    fn violations_collapse_into_invalid_argument() {
        let mut v = Vec::new();
        check_max_reads(Some(0), &mut v);
        check_expiration(Some(Utc::now() - chrono::Duration::hours(1)), &mut v);

        let err = finish(v).unwrap_err();
        assert_eq!(err.kind(), arx_types::ErrorKind::InvalidArgument);
        assert_eq!(err.field_violations().len(), 2);
    }
}
