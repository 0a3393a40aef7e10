// 🔐 OTP gateway - request / verify one-time passcodes for sensitive edits

use crate::error::ApiError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Which class of record an OTP authorizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationType {
    BookingEdit,
    /// Expenses and salary expenses
    ExpenseEdit,
    SalesIncomeEdit,
    OtherIncomeEdit,
}

impl VerificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationType::BookingEdit => "booking_edit",
            VerificationType::ExpenseEdit => "expense_edit",
            VerificationType::SalesIncomeEdit => "sales_income_edit",
            VerificationType::OtherIncomeEdit => "other_income_edit",
        }
    }
}

impl std::fmt::Display for VerificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VerificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "booking_edit" => Ok(VerificationType::BookingEdit),
            "expense_edit" => Ok(VerificationType::ExpenseEdit),
            "sales_income_edit" => Ok(VerificationType::SalesIncomeEdit),
            "other_income_edit" => Ok(VerificationType::OtherIncomeEdit),
            other => Err(format!("unknown verification type '{}'", other)),
        }
    }
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtpRequest {
    pub verification_type: VerificationType,
    pub object_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct OtpVerification {
    pub verification_type: VerificationType,
    pub otp: String,
}

// The code itself is never printed
impl std::fmt::Debug for OtpVerification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtpVerification")
            .field("verification_type", &self.verification_type)
            .field("otp", &"******")
            .finish()
    }
}

/// Response to `request-otp`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OtpIssued {
    #[serde(default)]
    pub message: Option<String>,
}

/// Response to `verify-otp`; anything but `verified: true` is a failure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OtpVerdict {
    #[serde(default)]
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Server side of the OTP handshake
#[async_trait]
pub trait OtpGateway: Send + Sync {
    async fn request_otp(&self, request: &OtpRequest) -> Result<OtpIssued, ApiError>;

    async fn verify_otp(&self, verification: &OtpVerification) -> Result<OtpVerdict, ApiError>;
}
