// 🧾 Records - the five editable record kinds and their edit forms
//
// Each record kind has:
// - a list row as returned by the remote `list-*` endpoint (lenient serde)
// - an edit form prefilled from a snapshot of that row
// - local validation run before any `update-*` call

pub mod attachment;
pub mod booking;
pub mod de;
pub mod expense;
pub mod income;

pub use attachment::Attachment;
pub use booking::{Booking, BookingForm};
pub use expense::{Expense, ExpenseForm, SalaryExpense, SALARY_CATEGORY};
pub use income::{IncomeEntry, IncomeForm, OtherIncome, SalesIncome};

use crate::error::FieldError;
use chrono::NaiveDate;

// ============================================================================
// TRAITS
// ============================================================================

/// A fetched row that can enter the edit workflow
pub trait EditableRecord: Clone + Send + Sync + 'static {
    /// Server-assigned id
    fn id(&self) -> i64;

    /// Immutable record date used by the editable window
    fn record_date(&self) -> NaiveDate;

    /// One-line description for prompts and tables
    fn summary(&self) -> String;
}

/// Mutable fields of a record, prefilled from its snapshot
pub trait EditForm: Clone + Send + Sync + 'static {
    /// All field errors, or Ok when the form may be sent
    fn validate(&self) -> Result<(), Vec<FieldError>>;

    /// Current values in display order
    fn fields(&self) -> Vec<FormField>;

    /// Set one field from text input
    fn set_field(&mut self, name: &str, value: &str) -> Result<(), FieldError>;
}

/// One row of a rendered form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub name: &'static str,
    pub label: &'static str,
    pub value: String,
    pub editable: bool,
}

impl FormField {
    pub fn new(name: &'static str, label: &'static str, value: String) -> Self {
        FormField {
            name,
            label,
            value,
            editable: true,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.editable = false;
        self
    }
}

// ============================================================================
// SHARED FIELD HELPERS
// ============================================================================

/// Blank input clears the amount; anything else must be a finite number
pub fn parse_amount_input(field: &str, value: &str) -> Result<Option<f64>, FieldError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    match trimmed.parse::<f64>() {
        Ok(amount) if amount.is_finite() => Ok(Some(amount)),
        _ => Err(FieldError::new(field, format!("'{}' is not a valid amount", trimmed))),
    }
}

pub fn format_amount(amount: Option<f64>) -> String {
    match amount {
        Some(a) => format!("{:.2}", a),
        None => String::new(),
    }
}

/// Amount present and > 0, description non-blank
pub(crate) fn check_amount_and_description(
    amount: Option<f64>,
    description: &str,
    errors: &mut Vec<FieldError>,
) {
    match amount {
        None => errors.push(FieldError::new("amount", "Amount is required")),
        Some(a) if !a.is_finite() || a <= 0.0 => {
            errors.push(FieldError::new("amount", "Amount must be greater than 0"))
        }
        Some(_) => {}
    }

    if description.trim().is_empty() {
        errors.push(FieldError::new("description", "Description is required"));
    }
}

pub(crate) fn unknown_field(name: &str) -> FieldError {
    FieldError::new(name, format!("Unknown field '{}'", name))
}

pub(crate) fn into_result(errors: Vec<FieldError>) -> Result<(), Vec<FieldError>> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount_input() {
        assert_eq!(parse_amount_input("amount", " 250.5 ").unwrap(), Some(250.5));
        assert_eq!(parse_amount_input("amount", "").unwrap(), None);
        assert!(parse_amount_input("amount", "12abc").is_err());
        assert!(parse_amount_input("amount", "NaN").is_err());
    }

    #[test]
    fn test_amount_and_description_rules() {
        let mut errors = Vec::new();
        check_amount_and_description(Some(0.0), "   ", &mut errors);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].field, "amount");
        assert_eq!(errors[1].field, "description");

        let mut errors = Vec::new();
        check_amount_and_description(Some(-5.0), "Linen", &mut errors);
        assert_eq!(errors.len(), 1);

        let mut errors = Vec::new();
        check_amount_and_description(Some(0.01), "Linen", &mut errors);
        assert!(errors.is_empty());
    }
}
