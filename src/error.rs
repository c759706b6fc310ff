//! Unified error type for the firewall control plane.
//!
//! The decision engine, rule store and telemetry pipeline never fail: every
//! fault there degrades to a state transition or a dropped unit of data.
//! `AppError` covers what is left, which is setting the system up.
//! It serializes as `{ "kind": "...", "message": "..." }` so a management
//! client can distinguish error categories.

use serde::ser::SerializeStruct;

/// Application-level error returned by setup and configuration entry points.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Invalid configuration value (environment overrides, durations, modes).
    #[error("{0}")]
    InvalidInput(String),

    /// No tokio runtime is available to drive background telemetry.
    #[error("{0}")]
    Runtime(String),
}

impl AppError {
    /// Returns the error kind as a string matching the variant name.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::Runtime(_) => "Runtime",
        }
    }
}

/// Custom Serialize: produces `{ "kind": "Variant", "message": "..." }`.
impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}

// ---- From implementations for ergonomic error conversion ----

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InvalidInput(format!("{err:#}"))
    }
}

impl From<tokio::runtime::TryCurrentError> for AppError {
    fn from(err: tokio::runtime::TryCurrentError) -> Self {
        AppError::Runtime(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_returns_correct_variant_name() {
        assert_eq!(AppError::InvalidInput("bad".into()).kind(), "InvalidInput");
        assert_eq!(AppError::Runtime("none".into()).kind(), "Runtime");
    }

    #[test]
    fn test_error_display_shows_message() {
        let err = AppError::InvalidInput("unknown mode: sometimes".into());
        assert_eq!(err.to_string(), "unknown mode: sometimes");
    }

    #[test]
    fn test_error_serializes_as_kind_and_message() {
        let err = AppError::Runtime("no reactor running".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "Runtime");
        assert_eq!(json["message"], "no reactor running");
    }

    #[test]
    fn test_from_anyhow_keeps_context_chain() {
        let anyhow_err = anyhow::anyhow!("expected a number").context("APPWALL_FLUSH_INTERVAL_MS");
        let app_err: AppError = anyhow_err.into();
        assert_eq!(app_err.kind(), "InvalidInput");
        assert!(app_err.to_string().contains("APPWALL_FLUSH_INTERVAL_MS"));
        assert!(app_err.to_string().contains("expected a number"));
    }

    #[test]
    fn test_from_try_current_produces_runtime_variant() {
        // No runtime is entered in a plain #[test].
        let err = tokio::runtime::Handle::try_current().unwrap_err();
        let app_err: AppError = err.into();
        assert_eq!(app_err.kind(), "Runtime");
    }

    #[test]
    fn test_all_variants_serialize_with_two_fields() {
        let variants: Vec<AppError> = vec![
            AppError::InvalidInput("a".into()),
            AppError::Runtime("b".into()),
        ];
        for err in variants {
            let json = serde_json::to_value(&err).unwrap();
            let obj = json.as_object().unwrap();
            assert_eq!(obj.len(), 2, "Expected exactly 2 fields for {err:?}");
            assert!(obj.contains_key("kind"));
            assert!(obj.contains_key("message"));
        }
    }
}
