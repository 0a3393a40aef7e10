// 📚 Resources - per-record-kind strategy for the edit workflow
//
// One workflow drives all five record kinds; a Resource supplies what differs:
// verification type, OTP category, list / update endpoints and form prefill.

use crate::api::{paths, ApiClient, FormPart, UpdateBody};
use crate::error::ApiError;
use crate::otp::VerificationType;
use crate::records::{
    Booking, BookingForm, EditForm, EditableRecord, Expense, ExpenseForm, IncomeForm,
    OtherIncome, SalaryExpense, SalesIncome, SALARY_CATEGORY,
};
use async_trait::async_trait;
use serde_json::json;

#[async_trait]
pub trait Resource: Send + Sync + 'static {
    type Record: EditableRecord;
    type Form: EditForm;

    fn verification_type(&self) -> VerificationType;

    /// Human label ("Booking", "Salary Expense", ...)
    fn label(&self) -> &'static str;

    /// Category sent with `request-otp` (expense-like resources only)
    fn otp_category(&self, _record: &Self::Record) -> Option<String> {
        None
    }

    /// Edit form populated from the record snapshot
    fn prefill(&self, record: &Self::Record) -> Self::Form;

    async fn list(&self) -> Result<Vec<Self::Record>, ApiError>;

    /// Exactly one `update-*` call for `id`
    async fn update(&self, id: i64, form: &Self::Form) -> Result<(), ApiError>;
}

// ============================================================================
// RESOURCE KINDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Bookings,
    Expenses,
    SalaryExpenses,
    SalesIncome,
    OtherIncome,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Bookings,
        ResourceKind::Expenses,
        ResourceKind::SalaryExpenses,
        ResourceKind::SalesIncome,
        ResourceKind::OtherIncome,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Bookings => "bookings",
            ResourceKind::Expenses => "expenses",
            ResourceKind::SalaryExpenses => "salary",
            ResourceKind::SalesIncome => "sales",
            ResourceKind::OtherIncome => "other-income",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ResourceKind::Bookings => "Bookings",
            ResourceKind::Expenses => "Expenses",
            ResourceKind::SalaryExpenses => "Salary Expenses",
            ResourceKind::SalesIncome => "Sales Income",
            ResourceKind::OtherIncome => "Other Income",
        }
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bookings" | "booking" => Ok(ResourceKind::Bookings),
            "expenses" | "expense" => Ok(ResourceKind::Expenses),
            "salary" | "salary-expenses" => Ok(ResourceKind::SalaryExpenses),
            "sales" | "sales-income" => Ok(ResourceKind::SalesIncome),
            "other-income" | "other" => Ok(ResourceKind::OtherIncome),
            other => Err(format!(
                "unknown resource '{}' (bookings, expenses, salary, sales, other-income)",
                other
            )),
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// REQUEST BODIES
// ============================================================================

pub fn booking_body(form: &BookingForm) -> UpdateBody {
    UpdateBody::Json(json!({
        "paid_amount": form.paid_amount.unwrap_or_default(),
        "pending_amount": form.pending_amount.unwrap_or_default(),
    }))
}

pub fn income_body(form: &IncomeForm) -> UpdateBody {
    UpdateBody::Json(json!({
        "amount": form.amount.unwrap_or_default(),
        "description": form.description.trim(),
        "category": form.category,
    }))
}

fn attachment_parts(form: &ExpenseForm, parts: &mut Vec<FormPart>) {
    // Existing server files are left alone; only new local files are uploaded
    if let Some(path) = form.bill_file.upload_path() {
        parts.push(FormPart::File {
            name: "bill_file",
            path: path.to_path_buf(),
        });
    }

    if let Some(path) = form.voucher_file.upload_path() {
        parts.push(FormPart::File {
            name: "voucher_file",
            path: path.to_path_buf(),
        });
    }

    if !form.voucher_no.trim().is_empty() {
        parts.push(FormPart::text("voucher_no", form.voucher_no.trim()));
    }
}

/// Multipart body for `update-expense`
pub fn expense_parts(form: &ExpenseForm) -> Vec<FormPart> {
    let mut parts = vec![
        FormPart::text("category", form.category.trim()),
        FormPart::text("amount", form.amount.unwrap_or_default().to_string()),
        FormPart::text("description", form.description.trim()),
        FormPart::text("date", form.date.format("%Y-%m-%d").to_string()),
    ];
    if form.is_salary() {
        parts.push(FormPart::text("staff_code", form.staff_code.trim()));
    }
    attachment_parts(form, &mut parts);
    parts
}

/// Multipart body for `update-salary-expense` (no category field)
pub fn salary_parts(form: &ExpenseForm) -> Vec<FormPart> {
    let mut parts = vec![
        FormPart::text("amount", form.amount.unwrap_or_default().to_string()),
        FormPart::text("description", form.description.trim()),
        FormPart::text("staff_code", form.staff_code.trim()),
        FormPart::text("date", form.date.format("%Y-%m-%d").to_string()),
    ];
    attachment_parts(form, &mut parts);
    parts
}

// ============================================================================
// IMPLEMENTATIONS
// ============================================================================

pub struct BookingResource {
    client: ApiClient,
}

impl BookingResource {
    pub fn new(client: ApiClient) -> Self {
        BookingResource { client }
    }
}

#[async_trait]
impl Resource for BookingResource {
    type Record = Booking;
    type Form = BookingForm;

    fn verification_type(&self) -> VerificationType {
        VerificationType::BookingEdit
    }

    fn label(&self) -> &'static str {
        "Booking"
    }

    fn prefill(&self, record: &Booking) -> BookingForm {
        record.to_form()
    }

    async fn list(&self) -> Result<Vec<Booking>, ApiError> {
        self.client.list(paths::LIST_BOOKINGS).await
    }

    async fn update(&self, id: i64, form: &BookingForm) -> Result<(), ApiError> {
        self.client
            .update(paths::UPDATE_BOOKING, id, &booking_body(form))
            .await
    }
}

pub struct ExpenseResource {
    client: ApiClient,
}

impl ExpenseResource {
    pub fn new(client: ApiClient) -> Self {
        ExpenseResource { client }
    }
}

#[async_trait]
impl Resource for ExpenseResource {
    type Record = Expense;
    type Form = ExpenseForm;

    fn verification_type(&self) -> VerificationType {
        VerificationType::ExpenseEdit
    }

    fn label(&self) -> &'static str {
        "Expense"
    }

    fn otp_category(&self, record: &Expense) -> Option<String> {
        Some(record.category.clone())
    }

    fn prefill(&self, record: &Expense) -> ExpenseForm {
        record.to_form()
    }

    async fn list(&self) -> Result<Vec<Expense>, ApiError> {
        self.client.list(paths::LIST_EXPENSES).await
    }

    async fn update(&self, id: i64, form: &ExpenseForm) -> Result<(), ApiError> {
        let body = UpdateBody::Multipart(expense_parts(form));
        self.client.update(paths::UPDATE_EXPENSE, id, &body).await
    }
}

pub struct SalaryExpenseResource {
    client: ApiClient,
}

impl SalaryExpenseResource {
    pub fn new(client: ApiClient) -> Self {
        SalaryExpenseResource { client }
    }
}

#[async_trait]
impl Resource for SalaryExpenseResource {
    type Record = SalaryExpense;
    type Form = ExpenseForm;

    fn verification_type(&self) -> VerificationType {
        VerificationType::ExpenseEdit
    }

    fn label(&self) -> &'static str {
        "Salary Expense"
    }

    fn otp_category(&self, _record: &SalaryExpense) -> Option<String> {
        Some(SALARY_CATEGORY.to_string())
    }

    fn prefill(&self, record: &SalaryExpense) -> ExpenseForm {
        record.to_form()
    }

    async fn list(&self) -> Result<Vec<SalaryExpense>, ApiError> {
        self.client.list(paths::LIST_SALARY_EXPENSES).await
    }

    async fn update(&self, id: i64, form: &ExpenseForm) -> Result<(), ApiError> {
        let body = UpdateBody::Multipart(salary_parts(form));
        self.client
            .update(paths::UPDATE_SALARY_EXPENSE, id, &body)
            .await
    }
}

pub struct SalesIncomeResource {
    client: ApiClient,
}

impl SalesIncomeResource {
    pub fn new(client: ApiClient) -> Self {
        SalesIncomeResource { client }
    }
}

#[async_trait]
impl Resource for SalesIncomeResource {
    type Record = SalesIncome;
    type Form = IncomeForm;

    fn verification_type(&self) -> VerificationType {
        VerificationType::SalesIncomeEdit
    }

    fn label(&self) -> &'static str {
        "Sales Income"
    }

    fn prefill(&self, record: &SalesIncome) -> IncomeForm {
        record.to_form()
    }

    async fn list(&self) -> Result<Vec<SalesIncome>, ApiError> {
        self.client.list(paths::LIST_SALES_INCOME).await
    }

    async fn update(&self, id: i64, form: &IncomeForm) -> Result<(), ApiError> {
        self.client
            .update(paths::UPDATE_SALES_INCOME, id, &income_body(form))
            .await
    }
}

pub struct OtherIncomeResource {
    client: ApiClient,
}

impl OtherIncomeResource {
    pub fn new(client: ApiClient) -> Self {
        OtherIncomeResource { client }
    }
}

#[async_trait]
impl Resource for OtherIncomeResource {
    type Record = OtherIncome;
    type Form = IncomeForm;

    fn verification_type(&self) -> VerificationType {
        VerificationType::OtherIncomeEdit
    }

    fn label(&self) -> &'static str {
        "Other Income"
    }

    fn prefill(&self, record: &OtherIncome) -> IncomeForm {
        record.to_form()
    }

    async fn list(&self) -> Result<Vec<OtherIncome>, ApiError> {
        self.client.list(paths::LIST_OTHER_INCOME).await
    }

    async fn update(&self, id: i64, form: &IncomeForm) -> Result<(), ApiError> {
        self.client
            .update(paths::UPDATE_OTHER_INCOME, id, &income_body(form))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Attachment;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn expense_form() -> ExpenseForm {
        ExpenseForm {
            category: "Laundry".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(),
            amount: Some(850.0),
            description: " Bedsheets ".to_string(),
            staff_code: String::new(),
            bill_file: Attachment::Existing("/media/bills/31.pdf".to_string()),
            voucher_file: Attachment::Upload(PathBuf::from("voucher.png")),
            voucher_no: "V-7".to_string(),
            category_locked: false,
        }
    }

    #[test]
    fn test_expense_parts_skip_existing_files() {
        let parts = expense_parts(&expense_form());
        let names: Vec<&str> = parts.iter().map(|p| p.name()).collect();

        assert_eq!(
            names,
            vec!["category", "amount", "description", "date", "voucher_file", "voucher_no"]
        );
        assert_eq!(parts[2], FormPart::text("description", "Bedsheets"));
        assert_eq!(parts[3], FormPart::text("date", "2024-06-10"));
    }

    #[test]
    fn test_salary_parts_carry_staff_code() {
        let mut form = expense_form();
        form.category = SALARY_CATEGORY.to_string();
        form.staff_code = "ST-004".to_string();
        form.voucher_file = Attachment::None;

        let parts = salary_parts(&form);
        let names: Vec<&str> = parts.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["amount", "description", "staff_code", "date", "voucher_no"]);

        let expense = expense_parts(&form);
        assert!(expense.iter().any(|p| p.name() == "staff_code"));
    }

    #[test]
    fn test_json_bodies() {
        let body = booking_body(&BookingForm {
            paid_amount: Some(3000.0),
            pending_amount: Some(1500.0),
        });
        assert_eq!(
            body,
            UpdateBody::Json(json!({"paid_amount": 3000.0, "pending_amount": 1500.0}))
        );

        let body = income_body(&IncomeForm {
            amount: Some(75.5),
            description: "Parking ".to_string(),
            category: "Misc".to_string(),
        });
        assert_eq!(
            body,
            UpdateBody::Json(json!({"amount": 75.5, "description": "Parking", "category": "Misc"}))
        );
    }

    #[test]
    fn test_resource_kind_parse() {
        assert_eq!("salary".parse::<ResourceKind>().unwrap(), ResourceKind::SalaryExpenses);
        assert_eq!("Bookings".parse::<ResourceKind>().unwrap(), ResourceKind::Bookings);
        assert!("stock".parse::<ResourceKind>().is_err());
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_otp_categories() {
        let client = ApiClient::new("http://localhost:8000");
        let expense: Expense = serde_json::from_str(
            r#"{"id": 1, "date": "2024-06-10", "category": "Mess", "amount": 10, "description": "x"}"#,
        )
        .unwrap();
        let salary = SalaryExpense(expense.clone());

        assert_eq!(
            ExpenseResource::new(client.clone()).otp_category(&expense).as_deref(),
            Some("Mess")
        );
        assert_eq!(
            SalaryExpenseResource::new(client.clone()).otp_category(&salary).as_deref(),
            Some("Salary")
        );
        assert_eq!(
            SalaryExpenseResource::new(client).verification_type(),
            VerificationType::ExpenseEdit
        );
    }
}
