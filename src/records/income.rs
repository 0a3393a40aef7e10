// 💰 Income - sales income and other income rows (same shape)

use super::{check_amount_and_description, de, format_amount, into_result, parse_amount_input, unknown_field};
use super::{EditForm, EditableRecord, FormField};
use crate::error::FieldError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomeEntry {
    pub id: i64,

    #[serde(deserialize_with = "de::date")]
    pub date: NaiveDate,

    #[serde(default, deserialize_with = "de::amount")]
    pub amount: f64,

    #[serde(default, deserialize_with = "de::text")]
    pub description: String,

    #[serde(default, deserialize_with = "de::text")]
    pub category: String,
}

/// Row of `list-sales-income`
pub type SalesIncome = IncomeEntry;

/// Row of `list-other-income`
pub type OtherIncome = IncomeEntry;

impl IncomeEntry {
    pub fn to_form(&self) -> IncomeForm {
        IncomeForm {
            amount: Some(self.amount),
            description: self.description.clone(),
            category: self.category.clone(),
        }
    }
}

impl EditableRecord for IncomeEntry {
    fn id(&self) -> i64 {
        self.id
    }

    fn record_date(&self) -> NaiveDate {
        self.date
    }

    fn summary(&self) -> String {
        format!(
            "Income #{} [{}] {} ({:.2})",
            self.id, self.category, self.description, self.amount
        )
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IncomeForm {
    pub amount: Option<f64>,
    pub description: String,
    pub category: String,
}

impl EditForm for IncomeForm {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        check_amount_and_description(self.amount, &self.description, &mut errors);
        into_result(errors)
    }

    fn fields(&self) -> Vec<FormField> {
        vec![
            FormField::new("amount", "Amount", format_amount(self.amount)),
            FormField::new("description", "Description", self.description.clone()),
            FormField::new("category", "Category", self.category.clone()),
        ]
    }

    fn set_field(&mut self, name: &str, value: &str) -> Result<(), FieldError> {
        match name {
            "amount" => self.amount = parse_amount_input(name, value)?,
            "description" => self.description = value.to_string(),
            "category" => self.category = value.trim().to_string(),
            _ => return Err(unknown_field(name)),
        }
        Ok(())
    }
}
