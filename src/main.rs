// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Datelike, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use hotel_backoffice::api::paths;
use hotel_backoffice::config::{self, Config};
use hotel_backoffice::ledger::{write_day_book_csv, write_monthly_csv};
use hotel_backoffice::reports::write_report_csv;
use hotel_backoffice::{
    build_day_book, AbortHandle, build_monthly_ledger, build_report, ApiClient, AuditSink, BalanceBasis,
    BookingResource, Clock, ConsoleNotifier, DayBookQuery, DayBookSort, EditError, EditForm,
    EditPhase, EditSession, EditWorkflow, EditableRecord, Expense, ExpenseResource, LedgerAccount, LoginRequest,
    LoginType, MonthlySort, NoAudit, OtherIncomeResource, ReportFilter, ReportRow, ReportSort,
    Resource, ResourceKind, SalaryExpenseResource, SalesIncomeResource, SqliteAuditLog,
    SystemClock,
};
use std::fs::File;
use std::future::Future;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "backoffice", version, about = "Hotel back-office: OTP-gated edits, day-book, ledgers and reports")]
struct Cli {
    /// Config file (defaults to ./backoffice.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Bearer token (defaults to BACKOFFICE_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and print the access token
    Login {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        /// Log in as staff instead of admin
        #[arg(long)]
        staff: bool,
        #[arg(long)]
        staff_id: Option<String>,
    },

    /// List records of one kind
    List {
        /// bookings, expenses, salary, sales, other-income
        kind: ResourceKind,
    },

    /// Edit one record after OTP verification
    Edit {
        kind: ResourceKind,
        id: i64,
        /// OTP code (prompted when omitted)
        #[arg(long)]
        otp: Option<String>,
        /// field=value to change (prompted for every field when omitted)
        #[arg(long = "set")]
        sets: Vec<String>,
    },

    /// Day-book for one date with running balance
    Daybook {
        /// Defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long, default_value = "")]
        search: String,
        /// income_low, income_high, expense_low, expense_high, balance_low, balance_high
        #[arg(long, default_value = "none")]
        sort: DayBookSort,
        /// chronological or display
        #[arg(long, default_value = "chronological")]
        basis: BalanceBasis,
        /// Write CSV here instead of printing
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Monthly ledger summary of one account
    Ledger {
        /// Account value or label, e.g. salesincome or "Mess Expense"
        #[arg(long)]
        account: LedgerAccount,
        /// Defaults to the current year
        #[arg(long)]
        year: Option<i32>,
        #[arg(long, default_value = "")]
        search: String,
        #[arg(long, default_value = "none")]
        sort: MonthlySort,
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Income or expense report
    Report {
        #[arg(value_enum)]
        source: ReportSource,
        /// Source type or category; "All" keeps everything
        #[arg(long)]
        kind: Option<String>,
        #[arg(long, default_value = "")]
        search: String,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
        /// date_newest, date_oldest, amount_low, amount_high
        #[arg(long, default_value = "none")]
        sort: ReportSort,
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Show the local edit journal
    Audit {
        /// Limit to one record: <verification_type> <id>
        #[arg(long, num_args = 2, value_names = ["TYPE", "ID"])]
        entity: Option<Vec<String>>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Interactive terminal UI
    Tui,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ReportSource {
    Income,
    Expenses,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .compact()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    init_logging(&config.log_level);

    let mut client = ApiClient::from_config(&config);
    if let Some(session) = cli
        .token
        .clone()
        .map(hotel_backoffice::Session::from_token)
        .or_else(config::token_from_env)
    {
        client.set_session(session);
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;

    let result = match cli.command {
        Command::Login {
            username,
            password,
            staff,
            staff_id,
        } => runtime.block_on(run_login(client, username, password, staff, staff_id)),
        Command::List { kind } => runtime.block_on(run_list(kind, client, &config)),
        Command::Edit { kind, id, otp, sets } => {
            runtime.block_on(run_edit(kind, client, &config, id, otp, sets))
        }
        Command::Daybook {
            date,
            search,
            sort,
            basis,
            csv,
        } => runtime.block_on(run_daybook(client, date, DayBookQuery { search, sort, basis }, csv)),
        Command::Ledger {
            account,
            year,
            search,
            sort,
            csv,
        } => runtime.block_on(run_ledger(client, account, year, search, sort, csv)),
        Command::Report {
            source,
            kind,
            search,
            from,
            to,
            sort,
            csv,
        } => {
            let filter = ReportFilter {
                kind,
                search,
                from,
                to,
                sort,
            };
            runtime.block_on(run_report(client, source, filter, csv))
        }
        Command::Audit { entity, limit } => run_audit(&config, entity, limit),
        Command::Tui => run_ui_mode(&runtime, client, &config),
    };

    // An interrupted prompt leaves its stdin reader behind
    runtime.shutdown_background();
    result
}

// ============================================================================
// Shared helpers
// ============================================================================

fn audit_sink(config: &Config) -> Result<Arc<dyn AuditSink>> {
    match &config.audit.db_path {
        Some(path) => Ok(Arc::new(SqliteAuditLog::open(path)?)),
        None => Ok(Arc::new(NoAudit)),
    }
}

fn actor(client: &ApiClient) -> String {
    client
        .session()
        .and_then(|s| s.username.clone())
        .unwrap_or_else(|| "staff".to_string())
}

fn workflow<R: Resource>(resource: R, client: &ApiClient, config: &Config) -> Result<EditWorkflow<R>> {
    Ok(EditWorkflow::new(resource, Arc::new(client.clone()))
        .with_notifier(Arc::new(ConsoleNotifier))
        .with_audit(audit_sink(config)?)
        .with_actor(actor(client)))
}

/// Read one line from stdin; Ctrl-C gives up on the prompt
async fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let read = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line).map(|_| line)
    });
    tokio::select! {
        line = read => Ok(line??.trim_end_matches(['\r', '\n']).to_string()),
        _ = tokio::signal::ctrl_c() => bail!("Interrupted"),
    }
}

fn output(csv: &Option<PathBuf>) -> Result<Option<File>> {
    csv.as_ref()
        .map(|path| File::create(path).with_context(|| format!("Cannot create {}", path.display())))
        .transpose()
}

// ============================================================================
// Commands
// ============================================================================

async fn run_login(
    mut client: ApiClient,
    username: String,
    password: String,
    staff: bool,
    staff_id: Option<String>,
) -> Result<()> {
    let request = LoginRequest {
        login_type: if staff { LoginType::Staff } else { LoginType::Admin },
        username,
        password,
        staff_unique_id: staff_id,
    };

    let session = client
        .login(&request)
        .await
        .map_err(|e| anyhow!(e.user_message("Login failed")))?;

    println!("✅ Logged in as {}", session.username.as_deref().unwrap_or(&request.username));
    if let Some(role) = &session.role {
        println!("   Role: {}", role);
    }
    println!("\n   export {}={}", config::ENV_TOKEN, session.access_token);
    Ok(())
}

async fn run_list(kind: ResourceKind, client: ApiClient, config: &Config) -> Result<()> {
    match kind {
        ResourceKind::Bookings => list_records(workflow(BookingResource::new(client.clone()), &client, config)?).await,
        ResourceKind::Expenses => list_records(workflow(ExpenseResource::new(client.clone()), &client, config)?).await,
        ResourceKind::SalaryExpenses => {
            list_records(workflow(SalaryExpenseResource::new(client.clone()), &client, config)?).await
        }
        ResourceKind::SalesIncome => {
            list_records(workflow(SalesIncomeResource::new(client.clone()), &client, config)?).await
        }
        ResourceKind::OtherIncome => {
            list_records(workflow(OtherIncomeResource::new(client.clone()), &client, config)?).await
        }
    }
}

async fn list_records<R: Resource>(workflow: EditWorkflow<R>) -> Result<()> {
    let label = workflow.resource().label();
    let records = workflow
        .list()
        .await
        .map_err(|e| anyhow!(e.user_message(&format!("Failed to load {} records", label))))?;

    println!("📋 {} ({} records)", label, records.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for record in &records {
        let marker = if workflow.is_editable(record) { "✏️ " } else { "🔒" };
        println!("{} {}  {}", marker, record.record_date(), record.summary());
    }
    Ok(())
}

async fn run_edit(
    kind: ResourceKind,
    client: ApiClient,
    config: &Config,
    id: i64,
    otp: Option<String>,
    sets: Vec<String>,
) -> Result<()> {
    let sets = sets
        .iter()
        .map(|s| {
            s.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.to_string()))
                .ok_or_else(|| anyhow!("--set expects field=value, got '{}'", s))
        })
        .collect::<Result<Vec<_>>>()?;

    match kind {
        ResourceKind::Bookings => {
            edit_record(workflow(BookingResource::new(client.clone()), &client, config)?, id, otp, sets).await
        }
        ResourceKind::Expenses => {
            edit_record(workflow(ExpenseResource::new(client.clone()), &client, config)?, id, otp, sets).await
        }
        ResourceKind::SalaryExpenses => {
            edit_record(workflow(SalaryExpenseResource::new(client.clone()), &client, config)?, id, otp, sets).await
        }
        ResourceKind::SalesIncome => {
            edit_record(workflow(SalesIncomeResource::new(client.clone()), &client, config)?, id, otp, sets).await
        }
        ResourceKind::OtherIncome => {
            edit_record(workflow(OtherIncomeResource::new(client.clone()), &client, config)?, id, otp, sets).await
        }
    }
}

/// begin → OTP → fields → save, prompting on stdin where needed
async fn edit_record<R: Resource>(
    workflow: EditWorkflow<R>,
    id: i64,
    otp: Option<String>,
    sets: Vec<(String, String)>,
) -> Result<()> {
    let label = workflow.resource().label();
    let records = workflow
        .list()
        .await
        .map_err(|e| anyhow!(e.user_message(&format!("Failed to load {} records", label))))?;
    let record = records
        .into_iter()
        .find(|r| r.id() == id)
        .ok_or_else(|| anyhow!("{} #{} not found", label, id))?;

    println!("✏️  {}", record.summary());
    let mut session = workflow.session();
    let result = drive_edit(&mut session, &record, otp, &sets).await;

    // Whatever happened, nothing of this edit outlives the command
    if session.phase() != EditPhase::Idle {
        session.cancel();
    }
    result
}

async fn drive_edit<R: Resource>(
    session: &mut EditSession<R>,
    record: &R::Record,
    otp: Option<String>,
    sets: &[(String, String)],
) -> Result<()> {
    interruptible(session.abort_handle(), session.begin(record)).await?;

    // OTP
    match otp {
        Some(code) => interruptible(session.abort_handle(), session.submit_otp(&code)).await?,
        None => loop {
            let code = prompt("Enter OTP (blank to cancel): ").await?;
            if code.trim().is_empty() {
                println!("ℹ️  Edit cancelled");
                return Ok(());
            }
            match interruptible(session.abort_handle(), session.submit_otp(&code)).await {
                Ok(()) => break,
                Err(EditError::VerificationFailed(_)) | Err(EditError::Api { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        },
    }

    // Fields
    if sets.is_empty() {
        let fields = session.form().map(|f| f.fields()).unwrap_or_default();
        for field in fields.into_iter().filter(|f| f.editable) {
            let value = prompt(&format!("{} [{}]: ", field.label, field.value)).await?;
            if !value.is_empty() {
                set_or_report(session, field.name, &value);
            }
        }
    } else {
        for (name, value) in sets {
            session.set_field(name, value)?;
        }
    }

    // Save
    loop {
        match interruptible(session.abort_handle(), session.save()).await {
            Ok(outcome) => {
                if let Some(records) = outcome.records {
                    if let Some(updated) = records.iter().find(|r| r.id() == outcome.record_id) {
                        println!("   {}", updated.summary());
                    }
                }
                return Ok(());
            }
            Err(e) if session.phase() == EditPhase::EditUnlocked && sets.is_empty() => {
                tracing::debug!(error = %e, "save rejected, asking again");
                let answer = prompt("Fix a field? name=value (blank to cancel): ").await?;
                match answer.split_once('=') {
                    Some((name, value)) => set_or_report(session, name.trim(), value),
                    None => {
                        println!("ℹ️  Edit cancelled");
                        return Ok(());
                    }
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Await one workflow call; Ctrl-C aborts it through the session's abort handle
async fn interruptible<F: Future>(abort: AbortHandle, call: F) -> F::Output {
    tokio::pin!(call);
    tokio::select! {
        out = &mut call => out,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n⚠️  Interrupted, aborting pending call");
            abort.abort();
            call.await
        }
    }
}

fn set_or_report<R: Resource>(session: &mut EditSession<R>, name: &str, value: &str) {
    if let Err(e) = session.set_field(name, value) {
        eprintln!("❌ {}", e.message());
    }
}

async fn run_daybook(
    client: ApiClient,
    date: Option<NaiveDate>,
    query: DayBookQuery,
    csv: Option<PathBuf>,
) -> Result<()> {
    let date = date.unwrap_or_else(|| SystemClock.today());
    let entries = client
        .daybook_entries(date)
        .await
        .map_err(|e| anyhow!(e.user_message("Failed to load day-book")))?;
    let view = build_day_book(&entries, &query);

    if let Some(file) = output(&csv)? {
        write_day_book_csv(&view, file)?;
        println!("✅ Day-book written to {}", csv.unwrap_or_default().display());
        return Ok(());
    }

    println!("📒 Day-book {}", date);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("{:>4}  {:<32} {:>12} {:>12} {:>12}", "#", "Description", "Income", "Expense", "Balance");
    for (index, row) in view.rows.iter().enumerate() {
        println!(
            "{:>4}  {:<32} {:>12.2} {:>12.2} {:>12.2}",
            index + 1,
            truncate(&row.entry.description, 32),
            row.entry.credit,
            row.entry.debit,
            row.balance
        );
    }
    println!(
        "\n      {:<32} {:>12.2} {:>12.2} {:>12.2}",
        "TOTAL", view.totals.total_income, view.totals.total_expense, view.totals.final_balance
    );
    Ok(())
}

async fn run_ledger(
    client: ApiClient,
    account: LedgerAccount,
    year: Option<i32>,
    search: String,
    sort: MonthlySort,
    csv: Option<PathBuf>,
) -> Result<()> {
    let year = year.unwrap_or_else(|| SystemClock.today().year());
    let rows = client
        .monthly_ledger(account, year)
        .await
        .map_err(|e| anyhow!(e.user_message("Failed to load ledger")))?;
    let view = build_monthly_ledger(&rows, &search, sort);

    if let Some(file) = output(&csv)? {
        write_monthly_csv(&view, account, year, file)?;
        println!("✅ Ledger written to {}", csv.unwrap_or_default().display());
        return Ok(());
    }

    println!("📗 {} - {}", account.label(), year);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("{:<12} {:>6} {:>12} {:>12} {:>12}", "Month", "Year", "Credit", "Debit", "Net");
    for row in &view.rows {
        println!(
            "{:<12} {:>6} {:>12.2} {:>12.2} {:>12.2}",
            row.month,
            row.year,
            row.credit,
            row.debit,
            row.net()
        );
    }
    println!(
        "\n{:<19} {:>12.2} {:>12.2} {:>12.2}",
        "TOTAL", view.totals.credit, view.totals.debit, view.totals.net
    );
    Ok(())
}

async fn run_report(
    client: ApiClient,
    source: ReportSource,
    filter: ReportFilter,
    csv: Option<PathBuf>,
) -> Result<()> {
    match source {
        ReportSource::Income => {
            let rows = client
                .unified_income()
                .await
                .map_err(|e| anyhow!(e.user_message("Failed to load income")))?;
            print_report(&rows, &filter, "TOTAL INCOME", csv)
        }
        ReportSource::Expenses => {
            let rows: Vec<Expense> = client
                .list(paths::LIST_EXPENSES)
                .await
                .map_err(|e| anyhow!(e.user_message("Failed to load expenses")))?;
            print_report(&rows, &filter, "TOTAL EXPENSE", csv)
        }
    }
}

fn print_report<R: ReportRow>(rows: &[R], filter: &ReportFilter, total_label: &str, csv: Option<PathBuf>) -> Result<()> {
    let report = build_report(rows, filter);

    if let Some(file) = output(&csv)? {
        write_report_csv(&report, total_label, file)?;
        println!("✅ Report written to {}", csv.unwrap_or_default().display());
        return Ok(());
    }

    println!("📊 {} rows", report.rows.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for row in &report.rows {
        println!(
            "{:>6}  {}  {:<16} {:<32} {:>12.2}",
            row.id(),
            row.date(),
            truncate(row.kind(), 16),
            truncate(row.description(), 32),
            row.amount()
        );
    }
    println!();
    for (kind, total) in &report.by_kind {
        println!("   {:<20} {:>12.2}", kind, total);
    }
    println!("   {:<20} {:>12.2}", total_label, report.total);
    Ok(())
}

fn run_audit(config: &Config, entity: Option<Vec<String>>, limit: usize) -> Result<()> {
    let path = config
        .audit
        .db_path
        .as_ref()
        .ok_or_else(|| anyhow!("No audit journal configured (set audit.db_path or {})", config::ENV_AUDIT_DB))?;
    let log = SqliteAuditLog::open(path)?;

    let events = match entity.as_deref() {
        Some([entity_type, entity_id]) => log.events_for_entity(entity_type, entity_id)?,
        Some(_) => bail!("--entity expects TYPE ID"),
        None => log.recent(limit)?,
    };

    println!("🧾 Audit journal: {} events total", log.count()?);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for event in events.iter().take(limit) {
        println!(
            "{}  {:<20} {}#{:<8} {:<10} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.event_type,
            event.entity_type,
            event.entity_id,
            event.actor,
            event.data
        );
    }
    Ok(())
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let cut: String = text.chars().take(width.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

#[cfg(feature = "tui")]
fn run_ui_mode(runtime: &tokio::runtime::Runtime, client: ApiClient, config: &Config) -> Result<()> {
    if client.session().and_then(|s| s.bearer()).is_none() {
        bail!("Not logged in: run `backoffice login` and export {}", config::ENV_TOKEN);
    }

    println!("🖥️  Loading Hotel Back-Office UI...\n");
    let mut app = ui::App::new(runtime.handle().clone(), client.clone(), audit_sink(config)?, actor(&client));
    ui::run_ui(&mut app)?;

    println!("\n✅ UI closed successfully");
    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_runtime: &tokio::runtime::Runtime, _client: ApiClient, _config: &Config) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    std::process::exit(1);
}
