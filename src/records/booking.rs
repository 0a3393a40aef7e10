// 🛏️ Booking - room booking with paid / pending split

use super::{de, format_amount, into_result, parse_amount_input, unknown_field};
use super::{EditForm, EditableRecord, FormField};
use crate::error::FieldError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,

    #[serde(deserialize_with = "de::date")]
    pub booking_date: NaiveDate,

    #[serde(default, deserialize_with = "de::text")]
    pub guest_name: String,

    #[serde(default, deserialize_with = "de::opt_text", skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,

    #[serde(default, deserialize_with = "de::opt_text", skip_serializing_if = "Option::is_none")]
    pub room_no: Option<String>,

    #[serde(default, deserialize_with = "de::opt_text", skip_serializing_if = "Option::is_none")]
    pub checkin_date: Option<String>,

    #[serde(default, deserialize_with = "de::opt_text", skip_serializing_if = "Option::is_none")]
    pub checkout_date: Option<String>,

    #[serde(default, deserialize_with = "de::amount")]
    pub booking_price: f64,

    #[serde(default, deserialize_with = "de::amount")]
    pub paid_amount: f64,

    #[serde(default, deserialize_with = "de::amount")]
    pub pending_amount: f64,

    #[serde(default, deserialize_with = "de::opt_text", skip_serializing_if = "Option::is_none")]
    pub invoice_no: Option<String>,

    #[serde(default, deserialize_with = "de::opt_amount", skip_serializing_if = "Option::is_none")]
    pub gst_percentage: Option<f64>,

    #[serde(default, deserialize_with = "de::opt_text", skip_serializing_if = "Option::is_none")]
    pub gstin: Option<String>,
}

impl EditableRecord for Booking {
    fn id(&self) -> i64 {
        self.id
    }

    fn record_date(&self) -> NaiveDate {
        self.booking_date
    }

    fn summary(&self) -> String {
        let room = self.room_no.as_deref().unwrap_or("-");
        format!(
            "Booking #{} {} (room {}) paid {:.2} / pending {:.2}",
            self.id, self.guest_name, room, self.paid_amount, self.pending_amount
        )
    }
}

impl Booking {
    pub fn to_form(&self) -> BookingForm {
        BookingForm {
            paid_amount: Some(self.paid_amount),
            pending_amount: Some(self.pending_amount),
        }
    }
}

// ============================================================================
// EDIT FORM
// ============================================================================

/// Only the money split is editable on a booking
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BookingForm {
    pub paid_amount: Option<f64>,
    pub pending_amount: Option<f64>,
}

fn check_booking_amount(field: &str, label: &str, value: Option<f64>, errors: &mut Vec<FieldError>) {
    match value {
        None => errors.push(FieldError::new(field, format!("{} is required", label))),
        Some(v) if !v.is_finite() || v < 0.0 => {
            errors.push(FieldError::new(field, format!("{} cannot be negative", label)))
        }
        Some(_) => {}
    }
}

impl EditForm for BookingForm {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        check_booking_amount("paid_amount", "Paid amount", self.paid_amount, &mut errors);
        check_booking_amount("pending_amount", "Pending amount", self.pending_amount, &mut errors);

        if errors.is_empty() {
            let total = self.paid_amount.unwrap_or_default() + self.pending_amount.unwrap_or_default();
            if total <= 0.0 {
                errors.push(FieldError::new(
                    "paid_amount",
                    "Paid and pending amounts cannot both be zero",
                ));
            }
        }

        into_result(errors)
    }

    fn fields(&self) -> Vec<FormField> {
        vec![
            FormField::new("paid_amount", "Paid Amount", format_amount(self.paid_amount)),
            FormField::new("pending_amount", "Pending Amount", format_amount(self.pending_amount)),
        ]
    }

    fn set_field(&mut self, name: &str, value: &str) -> Result<(), FieldError> {
        match name {
            "paid_amount" => self.paid_amount = parse_amount_input(name, value)?,
            "pending_amount" => self.pending_amount = parse_amount_input(name, value)?,
            _ => return Err(unknown_field(name)),
        }
        Ok(())
    }
}
