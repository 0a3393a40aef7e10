// ⚠️ Error taxonomy
// Network-boundary errors (ApiError) and edit-workflow errors (EditError)

use crate::workflow::EditPhase;
use chrono::NaiveDate;
use thiserror::Error;

// ============================================================================
// API ERRORS
// ============================================================================

/// Failure of a single call to the remote API.
///
/// The three server error payload shapes (`error`, `detail`,
/// `non_field_errors[0]`) are collapsed into `Rejected::message` by the client,
/// so nothing above the network layer ever inspects raw payloads.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    /// No bearer token available; the request was never sent
    #[error("Not authenticated. Please login again.")]
    Unauthenticated,

    /// Network unreachable, or the server answered with something that is not JSON
    #[error("{0}")]
    Transport(String),

    /// JSON error payload with a 4xx/5xx status
    #[error("{}", rejected_text(.status, .message))]
    Rejected { status: u16, message: Option<String> },

    /// 2xx JSON that does not match the expected shape
    #[error("Unexpected response: {0}")]
    Decode(String),

    /// A local file selected for upload could not be read
    #[error("{0}")]
    Attachment(String),
}

fn rejected_text(status: &u16, message: &Option<String>) -> String {
    match message {
        Some(message) => message.clone(),
        None => format!("HTTP {}", status),
    }
}

impl ApiError {
    /// Text shown to the user.
    ///
    /// Server-provided messages are passed through verbatim; transport and
    /// decode failures collapse to `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            ApiError::Rejected {
                message: Some(message),
                ..
            } => message.clone(),
            ApiError::Unauthenticated | ApiError::Attachment(_) => self.to_string(),
            ApiError::Rejected { message: None, .. }
            | ApiError::Transport(_)
            | ApiError::Decode(_) => fallback.to_string(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// ============================================================================
// FIELD ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        FieldError {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for FieldError {}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// EDIT WORKFLOW ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EditError {
    /// Record is outside the editable window; no network call was made
    #[error("Editing allowed only for records up to 2 days old")]
    NotEditable {
        record_date: NaiveDate,
        today: NaiveDate,
    },

    #[error("Please enter OTP.")]
    EmptyOtp,

    /// Server answered but did not confirm the OTP
    #[error("{0}")]
    VerificationFailed(String),

    #[error("{}", join_field_errors(.0))]
    Validation(Vec<FieldError>),

    /// A remote call failed; `message` is what the user sees
    #[error("{message}")]
    Api { source: ApiError, message: String },

    #[error("Cannot {action} while {phase}")]
    InvalidState {
        action: &'static str,
        phase: EditPhase,
    },

    #[error("Edit aborted")]
    Aborted,
}

impl EditError {
    pub fn api(source: ApiError, fallback: &str) -> Self {
        let message = source.user_message(fallback);
        EditError::Api { source, message }
    }

    /// Single user-facing message regardless of variant
    pub fn message(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_message_passes_through() {
        let err = ApiError::Rejected {
            status: 400,
            message: Some("OTP expired".to_string()),
        };
        assert_eq!(err.user_message("Failed to request OTP"), "OTP expired");
        assert_eq!(err.to_string(), "OTP expired");
    }

    #[test]
    fn test_rejected_without_message_uses_fallback() {
        let err = ApiError::Rejected {
            status: 502,
            message: None,
        };
        assert_eq!(err.user_message("Failed to request OTP"), "Failed to request OTP");
        assert_eq!(err.to_string(), "HTTP 502");
        assert_eq!(err.status(), Some(502));
    }

    #[test]
    fn test_transport_is_generic() {
        let err = ApiError::Transport("Server error 500: Internal Server Error".to_string());
        assert_eq!(err.user_message("OTP verification failed"), "OTP verification failed");
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_validation_message_joins_fields() {
        let err = EditError::Validation(vec![
            FieldError::new("amount", "Amount must be greater than 0"),
            FieldError::new("description", "Description is required"),
        ]);
        assert_eq!(
            err.message(),
            "Amount must be greater than 0; Description is required"
        );
    }

    #[test]
    fn test_edit_error_api_keeps_source() {
        let err = EditError::api(ApiError::Unauthenticated, "Failed to update record");
        match err {
            EditError::Api { source, message } => {
                assert_eq!(source, ApiError::Unauthenticated);
                assert_eq!(message, "Not authenticated. Please login again.");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
