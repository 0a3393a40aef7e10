// Hotel Back-Office - Core Library
// Exposes all modules for use in the CLI, the TUI, the API stub, and tests

pub mod config;     // Settings: TOML file + environment
pub mod session;    // Bearer token and login payloads
pub mod error;      // API and edit errors
pub mod api;        // REST client for the back-office API
pub mod otp;        // OTP request / verify contract
pub mod records;    // Bookings, expenses, income entries and their edit forms
pub mod resources;  // Per-kind strategy for the edit workflow
pub mod editable;   // Two-day editability window
pub mod workflow;   // OTP-gated edit state machine
pub mod notify;     // User notices
pub mod audit;      // Append-only edit journal (SQLite)
pub mod ledger;     // Day-book running balance and monthly ledger
pub mod reports;    // Income / expense reports

#[cfg(feature = "server")]
pub mod stub;       // In-memory API stub (axum)

// Re-export commonly used types
pub use api::{ApiClient, UpdateBody};
pub use config::{Config, ConfigError};
pub use editable::{is_editable, Clock, FixedClock, SystemClock, MAX_EDIT_AGE_DAYS};
pub use error::{ApiError, EditError, FieldError};
pub use notify::{ConsoleNotifier, Notice, NoticeBuffer, NoticeLevel, Notifier, TracingNotifier};
pub use otp::{OtpGateway, OtpIssued, OtpRequest, OtpVerdict, OtpVerification, VerificationType};
pub use records::{
    Attachment, Booking, BookingForm, EditForm, EditableRecord, Expense, ExpenseForm, FormField,
    IncomeEntry, IncomeForm, OtherIncome, SalaryExpense, SalesIncome,
};
pub use resources::{
    BookingResource, ExpenseResource, OtherIncomeResource, Resource, ResourceKind,
    SalaryExpenseResource, SalesIncomeResource,
};
pub use session::{LoginRequest, LoginType, Session};
pub use workflow::{AbortHandle, EditPhase, EditSession, EditWorkflow, SaveOutcome};
pub use audit::{AuditEvent, AuditSink, NoAudit, SqliteAuditLog};
pub use ledger::{
    build_day_book, build_monthly_ledger, running_balances, BalanceBasis, DayBookEntry,
    DayBookQuery, DayBookSort, DayBookView, LedgerAccount, MonthlySort, MonthlySummary,
};
pub use reports::{build_report, IncomeRow, Report, ReportFilter, ReportRow, ReportSort};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
