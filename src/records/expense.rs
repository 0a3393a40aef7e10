// 💸 Expense - categorised spend with optional bill / voucher files
// Salary expenses share the row shape; their category is always "Salary"

use super::{check_amount_and_description, de, format_amount, into_result, parse_amount_input, unknown_field};
use super::{Attachment, EditForm, EditableRecord, FormField};
use crate::error::FieldError;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::ops::Deref;

pub const SALARY_CATEGORY: &str = "Salary";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: i64,

    #[serde(deserialize_with = "de::date")]
    pub date: NaiveDate,

    #[serde(default, deserialize_with = "de::text")]
    pub category: String,

    #[serde(default, deserialize_with = "de::amount")]
    pub amount: f64,

    #[serde(default, deserialize_with = "de::text")]
    pub description: String,

    #[serde(default, deserialize_with = "de::text")]
    pub staff_code: String,

    #[serde(default, deserialize_with = "de::opt_text", skip_serializing_if = "Option::is_none")]
    pub bill_file: Option<String>,

    #[serde(default, deserialize_with = "de::opt_text", skip_serializing_if = "Option::is_none")]
    pub voucher_file: Option<String>,

    #[serde(default, deserialize_with = "de::opt_text", skip_serializing_if = "Option::is_none")]
    pub voucher_no: Option<String>,
}

impl Expense {
    pub fn is_salary(&self) -> bool {
        self.category.eq_ignore_ascii_case(SALARY_CATEGORY)
    }

    pub fn to_form(&self) -> ExpenseForm {
        ExpenseForm {
            category: self.category.clone(),
            date: self.date,
            amount: Some(self.amount),
            description: self.description.clone(),
            staff_code: self.staff_code.clone(),
            bill_file: Attachment::from_existing(self.bill_file.as_deref()),
            voucher_file: Attachment::from_existing(self.voucher_file.as_deref()),
            voucher_no: self.voucher_no.clone().unwrap_or_default(),
            category_locked: false,
        }
    }
}

impl EditableRecord for Expense {
    fn id(&self) -> i64 {
        self.id
    }

    fn record_date(&self) -> NaiveDate {
        self.date
    }

    fn summary(&self) -> String {
        format!(
            "Expense #{} [{}] {} ({:.2})",
            self.id, self.category, self.description, self.amount
        )
    }
}

// ============================================================================
// SALARY EXPENSE
// ============================================================================

/// Expense row from `list-salary-expenses`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SalaryExpense(pub Expense);

impl<'de> Deserialize<'de> for SalaryExpense {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut expense = Expense::deserialize(deserializer)?;
        expense.category = SALARY_CATEGORY.to_string();
        Ok(SalaryExpense(expense))
    }
}

impl Deref for SalaryExpense {
    type Target = Expense;

    fn deref(&self) -> &Expense {
        &self.0
    }
}

impl SalaryExpense {
    pub fn to_form(&self) -> ExpenseForm {
        ExpenseForm {
            category: SALARY_CATEGORY.to_string(),
            category_locked: true,
            ..self.0.to_form()
        }
    }
}

impl EditableRecord for SalaryExpense {
    fn id(&self) -> i64 {
        self.0.id
    }

    fn record_date(&self) -> NaiveDate {
        self.0.date
    }

    fn summary(&self) -> String {
        format!(
            "Salary #{} staff {} {} ({:.2})",
            self.0.id, self.0.staff_code, self.0.description, self.0.amount
        )
    }
}

// ============================================================================
// EDIT FORM
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ExpenseForm {
    pub category: String,
    /// Sent back unchanged; the record date is immutable
    pub date: NaiveDate,
    pub amount: Option<f64>,
    pub description: String,
    pub staff_code: String,
    pub bill_file: Attachment,
    pub voucher_file: Attachment,
    pub voucher_no: String,
    /// Salary forms cannot move the row to another category
    pub category_locked: bool,
}

impl ExpenseForm {
    pub fn is_salary(&self) -> bool {
        self.category.trim().eq_ignore_ascii_case(SALARY_CATEGORY)
    }
}

impl EditForm for ExpenseForm {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        if self.category.trim().is_empty() {
            errors.push(FieldError::new("category", "Category is required"));
        }

        check_amount_and_description(self.amount, &self.description, &mut errors);

        if self.is_salary() && self.staff_code.trim().is_empty() {
            errors.push(FieldError::new(
                "staff_code",
                "Staff code is required for Salary expenses",
            ));
        }

        if self.voucher_file.is_present() && self.voucher_no.trim().is_empty() {
            errors.push(FieldError::new(
                "voucher_no",
                "Voucher number required when voucher file exists.",
            ));
        }

        into_result(errors)
    }

    fn fields(&self) -> Vec<FormField> {
        let category = FormField::new("category", "Category", self.category.clone());
        vec![
            if self.category_locked {
                category.read_only()
            } else {
                category
            },
            FormField::new("date", "Date", self.date.to_string()).read_only(),
            FormField::new("amount", "Amount", format_amount(self.amount)),
            FormField::new("description", "Description", self.description.clone()),
            FormField::new("staff_code", "Staff Code", self.staff_code.clone()),
            FormField::new("bill_file", "Bill File", self.bill_file.display()),
            FormField::new("voucher_file", "Voucher File", self.voucher_file.display()),
            FormField::new("voucher_no", "Voucher No", self.voucher_no.clone()),
        ]
    }

    fn set_field(&mut self, name: &str, value: &str) -> Result<(), FieldError> {
        match name {
            "category" if self.category_locked => {
                return Err(FieldError::new(name, "Category is fixed for salary expenses"))
            }
            "category" => self.category = value.trim().to_string(),
            "date" => return Err(FieldError::new(name, "Record date cannot be changed")),
            "amount" => self.amount = parse_amount_input(name, value)?,
            "description" => self.description = value.to_string(),
            "staff_code" => self.staff_code = value.trim().to_string(),
            "bill_file" => {
                self.bill_file = Attachment::from_input(value);
                if self.bill_file.is_present() {
                    self.voucher_file = Attachment::None;
                    self.voucher_no.clear();
                }
            }
            "voucher_file" => {
                self.voucher_file = Attachment::from_input(value);
                if self.voucher_file.is_present() {
                    self.bill_file = Attachment::None;
                }
            }
            "voucher_no" => self.voucher_no = value.trim().to_string(),
            _ => return Err(unknown_field(name)),
        }
        Ok(())
    }
}
