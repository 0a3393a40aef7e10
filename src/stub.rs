// 🧪 API stub - in-memory implementation of the back-office REST API
//
// Used by the `backoffice-stub` binary for local demos and by the integration
// tests. It enforces what the real server must enforce:
// - bearer token on every call except login
// - OTP verification before any update, one grant per verified OTP
// - the editable window on request-otp and on update
// - OTP expiry (10 minutes); codes are stored as SHA-256 digests

use crate::editable::{is_editable, Clock, SystemClock};
use crate::ledger::LedgerAccount;
use crate::otp::{OtpRequest, OtpVerification, VerificationType};
use crate::records::{Booking, Expense, IncomeEntry, SALARY_CATEGORY};
use crate::session::{LoginRequest, LoginType};
use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub const ADMIN_USERNAME: &str = "admin";
pub const ADMIN_PASSWORD: &str = "admin123";

// ============================================================================
// STORE
// ============================================================================

struct PendingOtp {
    digest: String,
    object_id: i64,
    issued_at: DateTime<Utc>,
}

/// OTP as "delivered" to the admin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredOtp {
    pub verification_type: VerificationType,
    pub object_id: i64,
    pub code: String,
}

#[derive(Default)]
struct StubStore {
    bookings: Vec<Booking>,
    expenses: Vec<Expense>,
    sales_income: Vec<IncomeEntry>,
    other_income: Vec<IncomeEntry>,

    tokens: HashSet<String>,
    pending: HashMap<(String, VerificationType), PendingOtp>,
    grants: HashSet<(String, VerificationType, i64)>,
    outbox: Vec<DeliveredOtp>,
    hits: HashMap<&'static str, usize>,
}

impl StubStore {
    fn hit(&mut self, endpoint: &'static str) {
        *self.hits.entry(endpoint).or_insert(0) += 1;
    }

    fn record_date(&self, verification_type: VerificationType, id: i64) -> Option<NaiveDate> {
        match verification_type {
            VerificationType::BookingEdit => self
                .bookings
                .iter()
                .find(|b| b.id == id)
                .map(|b| b.booking_date),
            VerificationType::ExpenseEdit => self.expenses.iter().find(|e| e.id == id).map(|e| e.date),
            VerificationType::SalesIncomeEdit => {
                self.sales_income.iter().find(|e| e.id == id).map(|e| e.date)
            }
            VerificationType::OtherIncomeEdit => {
                self.other_income.iter().find(|e| e.id == id).map(|e| e.date)
            }
        }
    }
}

fn digest(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Six digits from a fresh uuid
fn generate_code() -> String {
    let n = uuid::Uuid::new_v4().as_u128() % 1_000_000;
    format!("{:06}", n)
}

// ============================================================================
// STATE
// ============================================================================

#[derive(Clone)]
pub struct StubState {
    store: Arc<Mutex<StubStore>>,
    clock: Arc<dyn Clock>,
    fixed_otp: Option<String>,
    otp_ttl: Duration,
    print_otps: bool,
}

impl StubState {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        StubState {
            store: Arc::new(Mutex::new(StubStore::default())),
            clock,
            fixed_otp: None,
            otp_ttl: Duration::minutes(10),
            print_otps: false,
        }
    }

    /// Store with a few records of every kind around today
    pub fn seeded(clock: Arc<dyn Clock>) -> Self {
        let state = StubState::new(clock);
        state.seed();
        state
    }

    pub fn system() -> Self {
        StubState::seeded(Arc::new(SystemClock))
    }

    /// Every OTP issued will be `code`
    pub fn with_fixed_otp(mut self, code: impl Into<String>) -> Self {
        self.fixed_otp = Some(code.into());
        self
    }

    pub fn with_otp_ttl(mut self, ttl: Duration) -> Self {
        self.otp_ttl = ttl;
        self
    }

    /// Print issued OTPs to stdout, standing in for delivery to the admin
    pub fn with_printed_otps(mut self) -> Self {
        self.print_otps = true;
        self
    }

    /// Accept `token` without a login
    pub fn with_token(self, token: impl Into<String>) -> Self {
        self.store().tokens.insert(token.into());
        self
    }

    fn store(&self) -> MutexGuard<'_, StubStore> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn hits(&self, endpoint: &str) -> usize {
        self.store().hits.get(endpoint).copied().unwrap_or(0)
    }

    pub fn outbox(&self) -> Vec<DeliveredOtp> {
        self.store().outbox.clone()
    }

    pub fn last_otp(&self) -> Option<String> {
        self.store().outbox.last().map(|d| d.code.clone())
    }

    pub fn bookings(&self) -> Vec<Booking> {
        self.store().bookings.clone()
    }

    pub fn expenses(&self) -> Vec<Expense> {
        self.store().expenses.clone()
    }

    pub fn sales_income(&self) -> Vec<IncomeEntry> {
        self.store().sales_income.clone()
    }

    pub fn other_income(&self) -> Vec<IncomeEntry> {
        self.store().other_income.clone()
    }

    fn seed(&self) {
        let today = self.clock.today();
        let days_ago = |n: i64| today - Duration::days(n);
        let mut store = self.store();

        store.bookings = vec![
            Booking {
                id: 1,
                booking_date: days_ago(0),
                guest_name: "Asha Rao".to_string(),
                phone_number: Some("9876543210".to_string()),
                room_no: Some("204".to_string()),
                checkin_date: Some(days_ago(0).to_string()),
                checkout_date: Some((today + Duration::days(2)).to_string()),
                booking_price: 4500.0,
                paid_amount: 3000.0,
                pending_amount: 1500.0,
                invoice_no: Some("INV-0001".to_string()),
                gst_percentage: Some(12.0),
                gstin: None,
            },
            Booking {
                id: 2,
                booking_date: days_ago(5),
                guest_name: "Vikram Das".to_string(),
                phone_number: None,
                room_no: Some("101".to_string()),
                checkin_date: Some(days_ago(5).to_string()),
                checkout_date: Some(days_ago(3).to_string()),
                booking_price: 2000.0,
                paid_amount: 2000.0,
                pending_amount: 0.0,
                invoice_no: Some("INV-0002".to_string()),
                gst_percentage: None,
                gstin: None,
            },
        ];

        let expense = |id: i64, date: NaiveDate, category: &str, amount: f64, description: &str, staff: &str| Expense {
            id,
            date,
            category: category.to_string(),
            amount,
            description: description.to_string(),
            staff_code: staff.to_string(),
            bill_file: None,
            voucher_file: None,
            voucher_no: None,
        };
        store.expenses = vec![
            expense(10, days_ago(1), "Laundry", 850.0, "Bedsheets", ""),
            expense(11, days_ago(0), "Mess", 1200.0, "Vegetables", ""),
            expense(12, days_ago(2), SALARY_CATEGORY, 12000.0, "Monthly salary", "ST-004"),
            expense(13, days_ago(4), "Maintenance", 3000.0, "Plumbing", ""),
        ];

        let income = |id: i64, date: NaiveDate, amount: f64, description: &str, category: &str| IncomeEntry {
            id,
            date,
            amount,
            description: description.to_string(),
            category: category.to_string(),
        };
        store.sales_income = vec![
            income(20, days_ago(0), 1500.0, "Cafeteria sales", "Cafeteria"),
            income(21, days_ago(3), 900.0, "Room service", "Food"),
        ];
        store.other_income = vec![
            income(30, days_ago(1), 300.0, "Parking", "Misc"),
            income(31, days_ago(6), 150.0, "Lost key fee", "Misc"),
        ];
    }
}

// ============================================================================
// RESPONSES
// ============================================================================

struct Reject(StatusCode, Value);

impl IntoResponse for Reject {
    fn into_response(self) -> Response {
        (self.0, Json(self.1)).into_response()
    }
}

fn error(status: StatusCode, message: &str) -> Reject {
    Reject(status, json!({ "error": message }))
}

fn detail(status: StatusCode, message: &str) -> Reject {
    Reject(status, json!({ "detail": message }))
}

fn field_errors(messages: Vec<String>) -> Reject {
    Reject(StatusCode::BAD_REQUEST, json!({ "non_field_errors": messages }))
}

type StubResult = Result<Json<Value>, Reject>;

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn authenticate(store: &StubStore, headers: &HeaderMap) -> Result<String, Reject> {
    match bearer(headers) {
        Some(token) if store.tokens.contains(&token) => Ok(token),
        _ => Err(detail(
            StatusCode::UNAUTHORIZED,
            "Authentication credentials were not provided.",
        )),
    }
}

fn value_amount(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text_amount(value: Option<&String>) -> Option<f64> {
    value?.trim().parse().ok()
}

fn check_amount(amount: Option<f64>, errors: &mut Vec<String>) {
    match amount {
        Some(a) if a.is_finite() && a > 0.0 => {}
        _ => errors.push("Amount must be greater than 0".to_string()),
    }
}

// ============================================================================
// AUTH + OTP HANDLERS
// ============================================================================

async fn login(State(state): State<StubState>, Json(request): Json<LoginRequest>) -> StubResult {
    let mut store = state.store();
    store.hit("login");

    if request.login_type != LoginType::Admin
        || request.username != ADMIN_USERNAME
        || request.password != ADMIN_PASSWORD
    {
        return Err(error(StatusCode::UNAUTHORIZED, "Invalid credentials"));
    }

    let access = uuid::Uuid::new_v4().to_string();
    store.tokens.insert(access.clone());
    info!(username = %request.username, "stub login");

    Ok(Json(json!({
        "token": { "access": access, "refresh": uuid::Uuid::new_v4().to_string() },
        "role": "ADMIN",
        "username": request.username,
    })))
}

async fn request_otp(
    State(state): State<StubState>,
    headers: HeaderMap,
    Json(request): Json<OtpRequest>,
) -> StubResult {
    let today = state.clock.today();
    let mut store = state.store();
    store.hit("request-otp");
    let token = authenticate(&store, &headers)?;

    let record_date = store
        .record_date(request.verification_type, request.object_id)
        .ok_or_else(|| error(StatusCode::NOT_FOUND, "Record not found"))?;
    if !is_editable(record_date, today) {
        return Err(error(
            StatusCode::BAD_REQUEST,
            "Editing allowed only for records up to 2 days old",
        ));
    }

    let code = state.fixed_otp.clone().unwrap_or_else(generate_code);
    store.pending.insert(
        (token, request.verification_type),
        PendingOtp {
            digest: digest(&code),
            object_id: request.object_id,
            issued_at: Utc::now(),
        },
    );
    store.outbox.push(DeliveredOtp {
        verification_type: request.verification_type,
        object_id: request.object_id,
        code: code.clone(),
    });

    info!(
        verification_type = %request.verification_type,
        object_id = request.object_id,
        category = ?request.category,
        "OTP issued"
    );
    if state.print_otps {
        println!(
            "📨 OTP for {} #{}: {}",
            request.verification_type, request.object_id, code
        );
    }

    Ok(Json(json!({ "message": "OTP sent to admin" })))
}

async fn verify_otp(
    State(state): State<StubState>,
    headers: HeaderMap,
    Json(verification): Json<OtpVerification>,
) -> StubResult {
    let mut store = state.store();
    store.hit("verify-otp");
    let token = authenticate(&store, &headers)?;
    let key = (token.clone(), verification.verification_type);

    let (expired, matches, object_id) = match store.pending.get(&key) {
        None => return Err(error(StatusCode::BAD_REQUEST, "No OTP requested")),
        Some(pending) => (
            Utc::now() - pending.issued_at >= state.otp_ttl,
            pending.digest == digest(verification.otp.trim()),
            pending.object_id,
        ),
    };

    if expired {
        store.pending.remove(&key);
        return Err(error(StatusCode::BAD_REQUEST, "OTP expired"));
    }
    if !matches {
        return Ok(Json(json!({ "verified": false, "message": "Invalid OTP" })));
    }

    store.pending.remove(&key);
    store
        .grants
        .insert((token, verification.verification_type, object_id));
    Ok(Json(json!({ "verified": true, "message": "OTP verified" })))
}

/// Grant, record and window checks shared by every update
fn authorize_update(
    store: &StubStore,
    token: &str,
    verification_type: VerificationType,
    id: i64,
    today: NaiveDate,
) -> Result<(), Reject> {
    if !store
        .grants
        .contains(&(token.to_string(), verification_type, id))
    {
        return Err(detail(StatusCode::FORBIDDEN, "OTP verification required"));
    }
    let record_date = store
        .record_date(verification_type, id)
        .ok_or_else(|| error(StatusCode::NOT_FOUND, "Record not found"))?;
    if !is_editable(record_date, today) {
        return Err(error(
            StatusCode::BAD_REQUEST,
            "Editing allowed only for records up to 2 days old",
        ));
    }
    Ok(())
}

// ============================================================================
// UPDATE HANDLERS
// ============================================================================

async fn update_booking(
    State(state): State<StubState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StubResult {
    let today = state.clock.today();
    let mut store = state.store();
    store.hit("update-booking");
    let token = authenticate(&store, &headers)?;
    authorize_update(&store, &token, VerificationType::BookingEdit, id, today)?;

    let paid = value_amount(body.get("paid_amount"));
    let pending = value_amount(body.get("pending_amount"));
    let (paid, pending) = match (paid, pending) {
        (Some(p), Some(q)) if p >= 0.0 && q >= 0.0 && p + q > 0.0 => (p, q),
        _ => {
            return Err(field_errors(vec![
                "Paid and pending amounts must be non-negative and not both zero".to_string(),
            ]))
        }
    };

    if let Some(booking) = store.bookings.iter_mut().find(|b| b.id == id) {
        booking.paid_amount = paid;
        booking.pending_amount = pending;
    }
    store.grants.remove(&(token, VerificationType::BookingEdit, id));

    Ok(Json(json!({ "message": "Booking updated successfully" })))
}

/// Text fields and uploaded file names of a multipart body
async fn read_multipart(
    mut multipart: Multipart,
) -> Result<(HashMap<String, String>, HashMap<String, String>), Reject> {
    let mut fields = HashMap::new();
    let mut files = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| error(StatusCode::BAD_REQUEST, &e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                field
                    .bytes()
                    .await
                    .map_err(|e| error(StatusCode::BAD_REQUEST, &e.to_string()))?;
                files.insert(name, file_name);
            }
            None => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| error(StatusCode::BAD_REQUEST, &e.to_string()))?;
                fields.insert(name, value);
            }
        }
    }

    Ok((fields, files))
}

fn apply_expense_update(
    expense: &mut Expense,
    fields: &HashMap<String, String>,
    files: &HashMap<String, String>,
    amount: f64,
) {
    if let Some(category) = fields.get("category") {
        expense.category = category.clone();
    }
    expense.amount = amount;
    if let Some(description) = fields.get("description") {
        expense.description = description.clone();
    }
    if let Some(staff_code) = fields.get("staff_code") {
        expense.staff_code = staff_code.clone();
    }
    if let Some(voucher_no) = fields.get("voucher_no") {
        expense.voucher_no = Some(voucher_no.clone());
    }
    // A row holds a bill or a voucher, not both
    if let Some(name) = files.get("bill_file") {
        expense.bill_file = Some(format!("/media/bills/{}_{}", expense.id, name));
        expense.voucher_file = None;
        expense.voucher_no = None;
    }
    if let Some(name) = files.get("voucher_file") {
        expense.voucher_file = Some(format!("/media/vouchers/{}_{}", expense.id, name));
        expense.bill_file = None;
    }
}

async fn update_expense_with(
    state: StubState,
    id: i64,
    headers: HeaderMap,
    multipart: Multipart,
    endpoint: &'static str,
    salary: bool,
) -> StubResult {
    {
        let mut store = state.store();
        store.hit(endpoint);
        authenticate(&store, &headers)?;
    }

    let (fields, files) = read_multipart(multipart).await?;

    let today = state.clock.today();
    let mut store = state.store();
    let token = authenticate(&store, &headers)?;
    authorize_update(&store, &token, VerificationType::ExpenseEdit, id, today)?;

    let amount = text_amount(fields.get("amount"));
    let mut errors = Vec::new();
    check_amount(amount, &mut errors);
    if fields.get("description").map_or(true, |d| d.trim().is_empty()) {
        errors.push("Description is required".to_string());
    }
    let is_salary = salary
        || fields
            .get("category")
            .is_some_and(|c| c.eq_ignore_ascii_case(SALARY_CATEGORY));
    if is_salary && fields.get("staff_code").map_or(true, |s| s.trim().is_empty()) {
        errors.push("Staff code is required for Salary expenses".to_string());
    }
    if files.contains_key("voucher_file") && fields.get("voucher_no").map_or(true, |v| v.trim().is_empty()) {
        errors.push("Voucher number required when voucher file exists.".to_string());
    }
    if !errors.is_empty() {
        return Err(field_errors(errors));
    }

    if let Some(expense) = store.expenses.iter_mut().find(|e| e.id == id) {
        apply_expense_update(expense, &fields, &files, amount.unwrap_or_default());
        if salary {
            expense.category = SALARY_CATEGORY.to_string();
        }
    }
    store.grants.remove(&(token, VerificationType::ExpenseEdit, id));

    Ok(Json(json!({ "message": "Expense updated successfully" })))
}

async fn update_expense(
    State(state): State<StubState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    multipart: Multipart,
) -> StubResult {
    update_expense_with(state, id, headers, multipart, "update-expense", false).await
}

async fn update_salary_expense(
    State(state): State<StubState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    multipart: Multipart,
) -> StubResult {
    update_expense_with(state, id, headers, multipart, "update-salary-expense", true).await
}

fn update_income(
    state: &StubState,
    id: i64,
    headers: &HeaderMap,
    body: &Value,
    verification_type: VerificationType,
    endpoint: &'static str,
) -> StubResult {
    let today = state.clock.today();
    let mut store = state.store();
    store.hit(endpoint);
    let token = authenticate(&store, headers)?;
    authorize_update(&store, &token, verification_type, id, today)?;

    let amount = value_amount(body.get("amount"));
    let description = body
        .get("description")
        .and_then(|d| d.as_str())
        .unwrap_or_default()
        .to_string();
    let mut errors = Vec::new();
    check_amount(amount, &mut errors);
    if description.trim().is_empty() {
        errors.push("Description is required".to_string());
    }
    if !errors.is_empty() {
        return Err(field_errors(errors));
    }

    let rows = match verification_type {
        VerificationType::SalesIncomeEdit => &mut store.sales_income,
        _ => &mut store.other_income,
    };
    if let Some(entry) = rows.iter_mut().find(|e| e.id == id) {
        entry.amount = amount.unwrap_or_default();
        entry.description = description;
        if let Some(category) = body.get("category").and_then(|c| c.as_str()) {
            entry.category = category.to_string();
        }
    }
    store.grants.remove(&(token, verification_type, id));

    Ok(Json(json!({ "message": "Income updated successfully" })))
}

async fn update_sales_income(
    State(state): State<StubState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StubResult {
    update_income(&state, id, &headers, &body, VerificationType::SalesIncomeEdit, "update-sales-income")
}

async fn update_other_income(
    State(state): State<StubState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StubResult {
    update_income(&state, id, &headers, &body, VerificationType::OtherIncomeEdit, "update-other-income")
}

// ============================================================================
// LIST + REPORT HANDLERS
// ============================================================================

fn listed<T: serde::Serialize>(
    state: &StubState,
    headers: &HeaderMap,
    endpoint: &'static str,
    rows: impl FnOnce(&StubStore) -> Vec<T>,
) -> StubResult {
    let mut store = state.store();
    store.hit(endpoint);
    authenticate(&store, headers)?;
    Ok(Json(json!({ "data": rows(&*store) })))
}

async fn list_bookings(State(state): State<StubState>, headers: HeaderMap) -> StubResult {
    listed(&state, &headers, "list-bookings", |s| s.bookings.clone())
}

async fn list_expenses(State(state): State<StubState>, headers: HeaderMap) -> StubResult {
    listed(&state, &headers, "list-expenses", |s| s.expenses.clone())
}

async fn list_salary_expenses(State(state): State<StubState>, headers: HeaderMap) -> StubResult {
    listed(&state, &headers, "list-salary-expenses", |s| {
        s.expenses
            .iter()
            .filter(|e| e.is_salary())
            .cloned()
            .collect::<Vec<_>>()
    })
}

async fn list_sales_income(State(state): State<StubState>, headers: HeaderMap) -> StubResult {
    listed(&state, &headers, "list-sales-income", |s| s.sales_income.clone())
}

async fn list_other_income(State(state): State<StubState>, headers: HeaderMap) -> StubResult {
    listed(&state, &headers, "list-other-income", |s| s.other_income.clone())
}

/// Credit / debit movements of every record, tagged with their ledger account
fn movements(store: &StubStore) -> Vec<(LedgerAccount, NaiveDate, String, f64, f64)> {
    let mut out = Vec::new();
    for b in &store.bookings {
        out.push((
            LedgerAccount::Booking,
            b.booking_date,
            format!("Booking - {}", b.guest_name),
            b.paid_amount,
            0.0,
        ));
    }
    for e in &store.sales_income {
        out.push((LedgerAccount::SalesIncome, e.date, e.description.clone(), e.amount, 0.0));
    }
    for e in &store.other_income {
        out.push((LedgerAccount::OtherIncome, e.date, e.description.clone(), e.amount, 0.0));
    }
    for e in &store.expenses {
        out.push((
            expense_account(&e.category),
            e.date,
            format!("{} - {}", e.category, e.description),
            0.0,
            e.amount,
        ));
    }
    out
}

fn expense_account(category: &str) -> LedgerAccount {
    match category.to_ascii_lowercase().as_str() {
        "laundry" => LedgerAccount::LaundryExpense,
        "cleaning" => LedgerAccount::CleaningExpense,
        "mess" => LedgerAccount::MessExpense,
        "cafeteria" => LedgerAccount::CafeteriaExpense,
        "rental" => LedgerAccount::RentalExpense,
        "salary" => LedgerAccount::SalaryExpense,
        "miscellaneous" => LedgerAccount::MiscellaneousExpense,
        "maintenance" => LedgerAccount::MaintenanceExpense,
        "capital" => LedgerAccount::CapitalExpense,
        _ => LedgerAccount::OtherExpense,
    }
}

#[derive(Deserialize)]
struct DayBookParams {
    date: String,
}

async fn daybook_entries(
    State(state): State<StubState>,
    headers: HeaderMap,
    Query(params): Query<DayBookParams>,
) -> StubResult {
    let date = crate::records::de::parse_date(&params.date)
        .ok_or_else(|| error(StatusCode::BAD_REQUEST, "Invalid date"))?;

    listed(&state, &headers, "daybook-entries", |s| {
        movements(s)
            .into_iter()
            .filter(|m| m.1 == date)
            .enumerate()
            .map(|(i, (_, date, description, credit, debit))| {
                json!({
                    "id": i + 1,
                    "date": date,
                    "description": description,
                    "credit": format!("{:.2}", credit),
                    "debit": format!("{:.2}", debit),
                })
            })
            .collect::<Vec<_>>()
    })
}

#[derive(Deserialize)]
struct LedgerParams {
    account: String,
    year: i32,
}

async fn monthly_ledger_summary(
    State(state): State<StubState>,
    headers: HeaderMap,
    Query(params): Query<LedgerParams>,
) -> StubResult {
    let mut store = state.store();
    store.hit("monthly-ledger-summary");
    authenticate(&store, &headers)?;

    let account: LedgerAccount = params
        .account
        .parse()
        .map_err(|e: String| error(StatusCode::BAD_REQUEST, &e))?;

    let mut months: BTreeMap<u32, (f64, f64)> = BTreeMap::new();
    for (acct, date, _, credit, debit) in movements(&store) {
        if acct == account && date.year() == params.year {
            let totals = months.entry(date.month()).or_insert((0.0, 0.0));
            totals.0 += credit;
            totals.1 += debit;
        }
    }

    let results: Vec<Value> = months
        .into_iter()
        .filter_map(|(month, (credit, debit))| {
            let first = NaiveDate::from_ymd_opt(params.year, month, 1)?;
            Some(json!({
                "month": first.format("%B").to_string(),
                "year": params.year,
                "credit": credit,
                "debit": debit,
            }))
        })
        .collect();

    Ok(Json(json!({ "results": results })))
}

async fn unified_income(State(state): State<StubState>, headers: HeaderMap) -> StubResult {
    listed(&state, &headers, "unified-income", |s| {
        let mut rows = Vec::new();
        for b in &s.bookings {
            rows.push(json!({
                "id": b.id,
                "type": "Booking",
                "date": b.booking_date,
                "amount": b.paid_amount,
                "description": format!("Room {}", b.room_no.as_deref().unwrap_or("-")),
                "details": { "guest_name": b.guest_name, "invoice_no": b.invoice_no },
            }));
        }
        for e in &s.sales_income {
            rows.push(json!({
                "id": e.id, "type": "Sales Income", "date": e.date, "amount": e.amount,
                "description": e.description, "details": { "category": e.category },
            }));
        }
        for e in &s.other_income {
            rows.push(json!({
                "id": e.id, "type": "Other Income", "date": e.date, "amount": e.amount,
                "description": e.description, "details": { "category": e.category },
            }));
        }
        rows
    })
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn router(state: StubState) -> Router {
    let staff = Router::new()
        .route("/list-bookings", get(list_bookings))
        .route("/list-expenses", get(list_expenses))
        .route("/list-salary-expenses", get(list_salary_expenses))
        .route("/list-sales-income", get(list_sales_income))
        .route("/list-other-income", get(list_other_income))
        .route("/update-booking/:id", put(update_booking))
        .route("/update-expense/:id", put(update_expense))
        .route("/update-salary-expense/:id", put(update_salary_expense))
        .route("/update-sales-income/:id", put(update_sales_income))
        .route("/update-other-income/:id", put(update_other_income))
        .route("/daybook-entries", get(daybook_entries))
        .route("/monthly-ledger-summary", get(monthly_ledger_summary))
        .route("/unified-income", get(unified_income));

    let admin = Router::new()
        .route("/request-otp", post(request_otp))
        .route("/verify-otp", post(verify_otp));

    Router::new()
        .route("/login/login", post(login))
        .nest("/admin-management", admin)
        .nest("/staff-management", staff)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve until the listener fails
pub async fn serve(listener: tokio::net::TcpListener, state: StubState) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}
