// 📒 Ledger - day book running balance and monthly account summaries
//
// Running balance: balance[i] = balance[i-1] + credit[i] - debit[i], balance[-1] = 0
//
// BalanceBasis decides which order the fold runs in:
// - Chronological (default): date order, ties by id; each row keeps its balance
//   through any display sort
// - DisplayOrder: fold in the order rows are shown (legacy dashboard behaviour)

use crate::records::de;
use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::io::Write;

// ============================================================================
// DAY BOOK
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayBookEntry {
    pub id: i64,

    #[serde(deserialize_with = "de::date")]
    pub date: NaiveDate,

    #[serde(default, deserialize_with = "de::text")]
    pub description: String,

    /// Income
    #[serde(default, deserialize_with = "de::amount")]
    pub credit: f64,

    /// Expense
    #[serde(default, deserialize_with = "de::amount")]
    pub debit: f64,
}

/// Running balance over `entries` in the given order
pub fn running_balances(entries: &[DayBookEntry]) -> Vec<f64> {
    entries
        .iter()
        .scan(0.0, |balance, e| {
            *balance += e.credit - e.debit;
            Some(*balance)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BalanceBasis {
    #[default]
    Chronological,
    DisplayOrder,
}

impl std::str::FromStr for BalanceBasis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chronological" => Ok(BalanceBasis::Chronological),
            "display" | "display-order" => Ok(BalanceBasis::DisplayOrder),
            other => Err(format!("unknown balance basis '{}' (chronological, display)", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DayBookSort {
    /// Order returned by the server
    #[default]
    Unsorted,
    IncomeLow,
    IncomeHigh,
    ExpenseLow,
    ExpenseHigh,
    BalanceLow,
    BalanceHigh,
}

impl DayBookSort {
    fn sorts_by_balance(&self) -> bool {
        matches!(self, DayBookSort::BalanceLow | DayBookSort::BalanceHigh)
    }
}

impl std::str::FromStr for DayBookSort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "none" => Ok(DayBookSort::Unsorted),
            "income_low" => Ok(DayBookSort::IncomeLow),
            "income_high" => Ok(DayBookSort::IncomeHigh),
            "expense_low" => Ok(DayBookSort::ExpenseLow),
            "expense_high" => Ok(DayBookSort::ExpenseHigh),
            "balance_low" => Ok(DayBookSort::BalanceLow),
            "balance_high" => Ok(DayBookSort::BalanceHigh),
            other => Err(format!("unknown sort '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DayBookQuery {
    /// Matched case-insensitively against description, and against the date text
    pub search: String,
    pub sort: DayBookSort,
    pub basis: BalanceBasis,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DayBookRow {
    pub entry: DayBookEntry,
    pub balance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DayBookTotals {
    pub total_income: f64,
    pub total_expense: f64,
    pub final_balance: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DayBookView {
    pub rows: Vec<DayBookRow>,
    pub totals: DayBookTotals,
}

fn matches_search(entry: &DayBookEntry, search: &str) -> bool {
    if search.is_empty() {
        return true;
    }
    entry.description.to_lowercase().contains(&search.to_lowercase())
        || entry.date.to_string().contains(search)
}

fn compare_entries(a: &DayBookEntry, b: &DayBookEntry, sort: DayBookSort) -> Ordering {
    match sort {
        DayBookSort::IncomeLow => a.credit.total_cmp(&b.credit),
        DayBookSort::IncomeHigh => b.credit.total_cmp(&a.credit),
        DayBookSort::ExpenseLow => a.debit.total_cmp(&b.debit),
        DayBookSort::ExpenseHigh => b.debit.total_cmp(&a.debit),
        _ => Ordering::Equal,
    }
}

fn sort_rows(rows: &mut [DayBookRow], sort: DayBookSort) {
    match sort {
        DayBookSort::Unsorted => {}
        DayBookSort::BalanceLow => rows.sort_by(|a, b| a.balance.total_cmp(&b.balance)),
        DayBookSort::BalanceHigh => rows.sort_by(|a, b| b.balance.total_cmp(&a.balance)),
        other => rows.sort_by(|a, b| compare_entries(&a.entry, &b.entry, other)),
    }
}

fn with_balances(entries: Vec<DayBookEntry>) -> Vec<DayBookRow> {
    let balances = running_balances(&entries);
    entries
        .into_iter()
        .zip(balances)
        .map(|(entry, balance)| DayBookRow { entry, balance })
        .collect()
}

/// Filter, fold and sort one day's entries
pub fn build_day_book(entries: &[DayBookEntry], query: &DayBookQuery) -> DayBookView {
    let search = query.search.trim();
    let filtered: Vec<DayBookEntry> = entries
        .iter()
        .filter(|e| matches_search(e, search))
        .cloned()
        .collect();

    let total_income: f64 = filtered.iter().map(|e| e.credit).sum();
    let total_expense: f64 = filtered.iter().map(|e| e.debit).sum();

    let rows = match query.basis {
        BalanceBasis::Chronological => {
            // Fold in (date, id) order, then restore the display order
            let mut order: Vec<usize> = (0..filtered.len()).collect();
            order.sort_by(|&a, &b| {
                filtered[a]
                    .date
                    .cmp(&filtered[b].date)
                    .then(filtered[a].id.cmp(&filtered[b].id))
            });

            let mut balances = vec![0.0; filtered.len()];
            let mut balance = 0.0;
            for index in order {
                balance += filtered[index].credit - filtered[index].debit;
                balances[index] = balance;
            }

            let mut rows: Vec<DayBookRow> = filtered
                .into_iter()
                .zip(balances)
                .map(|(entry, balance)| DayBookRow { entry, balance })
                .collect();
            sort_rows(&mut rows, query.sort);
            rows
        }
        BalanceBasis::DisplayOrder => {
            let mut ordered = filtered;
            if !query.sort.sorts_by_balance() {
                ordered.sort_by(|a, b| compare_entries(a, b, query.sort));
            }
            let mut rows = with_balances(ordered);
            if query.sort.sorts_by_balance() {
                sort_rows(&mut rows, query.sort);
            }
            rows
        }
    };

    DayBookView {
        rows,
        totals: DayBookTotals {
            total_income,
            total_expense,
            final_balance: total_income - total_expense,
        },
    }
}

/// `#, Date, Description, Income, Expense, Balance` rows followed by a TOTAL row
pub fn write_day_book_csv<W: Write>(view: &DayBookView, out: W) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().flexible(true).from_writer(out);

    wtr.write_record(["#", "Date", "Description", "Income", "Expense", "Balance"])?;
    for (index, row) in view.rows.iter().enumerate() {
        wtr.write_record([
            (index + 1).to_string(),
            row.entry.date.to_string(),
            row.entry.description.clone(),
            format!("{:.2}", row.entry.credit),
            format!("{:.2}", row.entry.debit),
            format!("{:.2}", row.balance),
        ])?;
    }

    wtr.write_record(["", "", "", "", "", ""])?;
    wtr.write_record([
        String::new(),
        String::new(),
        "TOTAL".to_string(),
        format!("{:.2}", view.totals.total_income),
        format!("{:.2}", view.totals.total_expense),
        format!("{:.2}", view.totals.final_balance),
    ])?;

    wtr.flush()?;
    Ok(())
}

// ============================================================================
// MONTHLY LEDGER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerAccount {
    SalesIncome,
    OtherIncome,
    Booking,
    LaundryExpense,
    CleaningExpense,
    MessExpense,
    CafeteriaExpense,
    RentalExpense,
    SalaryExpense,
    MiscellaneousExpense,
    MaintenanceExpense,
    CapitalExpense,
    OtherExpense,
}

impl LedgerAccount {
    pub const ALL: [LedgerAccount; 13] = [
        LedgerAccount::SalesIncome,
        LedgerAccount::OtherIncome,
        LedgerAccount::Booking,
        LedgerAccount::LaundryExpense,
        LedgerAccount::CleaningExpense,
        LedgerAccount::MessExpense,
        LedgerAccount::CafeteriaExpense,
        LedgerAccount::RentalExpense,
        LedgerAccount::SalaryExpense,
        LedgerAccount::MiscellaneousExpense,
        LedgerAccount::MaintenanceExpense,
        LedgerAccount::CapitalExpense,
        LedgerAccount::OtherExpense,
    ];

    /// Query value sent to `monthly-ledger-summary`
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerAccount::SalesIncome => "salesincome",
            LedgerAccount::OtherIncome => "otherincome",
            LedgerAccount::Booking => "booking",
            LedgerAccount::LaundryExpense => "laundryexpense",
            LedgerAccount::CleaningExpense => "cleaningexpense",
            LedgerAccount::MessExpense => "messexpense",
            LedgerAccount::CafeteriaExpense => "cafeteriaexpense",
            LedgerAccount::RentalExpense => "rentalexpense",
            LedgerAccount::SalaryExpense => "salaryexpense",
            LedgerAccount::MiscellaneousExpense => "miscellaneousexpense",
            LedgerAccount::MaintenanceExpense => "maintenanceexpense",
            LedgerAccount::CapitalExpense => "capitalexpense",
            LedgerAccount::OtherExpense => "otherexpense",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LedgerAccount::SalesIncome => "Sales Income",
            LedgerAccount::OtherIncome => "Other Income",
            LedgerAccount::Booking => "Booking Income",
            LedgerAccount::LaundryExpense => "Laundry Expense",
            LedgerAccount::CleaningExpense => "Cleaning Expense",
            LedgerAccount::MessExpense => "Mess Expense",
            LedgerAccount::CafeteriaExpense => "Cafeteria Expense",
            LedgerAccount::RentalExpense => "Rental Expense",
            LedgerAccount::SalaryExpense => "Salary Expense",
            LedgerAccount::MiscellaneousExpense => "Miscellaneous Expense",
            LedgerAccount::MaintenanceExpense => "Maintenance Expense",
            LedgerAccount::CapitalExpense => "Capital Expense",
            LedgerAccount::OtherExpense => "Other Expense",
        }
    }

    pub fn is_income(&self) -> bool {
        matches!(
            self,
            LedgerAccount::SalesIncome | LedgerAccount::OtherIncome | LedgerAccount::Booking
        )
    }
}

impl std::str::FromStr for LedgerAccount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        LedgerAccount::ALL
            .into_iter()
            .find(|a| a.as_str() == wanted || a.label().to_ascii_lowercase() == wanted)
            .ok_or_else(|| format!("unknown ledger account '{}'", s))
    }
}

impl std::fmt::Display for LedgerAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlySummary {
    #[serde(default, deserialize_with = "de::text")]
    pub month: String,

    #[serde(deserialize_with = "de::int")]
    pub year: i64,

    #[serde(default, deserialize_with = "de::amount")]
    pub credit: f64,

    #[serde(default, deserialize_with = "de::amount")]
    pub debit: f64,
}

impl MonthlySummary {
    pub fn net(&self) -> f64 {
        self.credit - self.debit
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonthlySort {
    #[default]
    Unsorted,
    CreditLow,
    CreditHigh,
    DebitLow,
    DebitHigh,
    NetLow,
    NetHigh,
}

impl std::str::FromStr for MonthlySort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "none" => Ok(MonthlySort::Unsorted),
            "credit_low" => Ok(MonthlySort::CreditLow),
            "credit_high" => Ok(MonthlySort::CreditHigh),
            "debit_low" => Ok(MonthlySort::DebitLow),
            "debit_high" => Ok(MonthlySort::DebitHigh),
            "balance_low" | "net_low" => Ok(MonthlySort::NetLow),
            "balance_high" | "net_high" => Ok(MonthlySort::NetHigh),
            other => Err(format!("unknown sort '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MonthlyTotals {
    pub credit: f64,
    pub debit: f64,
    pub net: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MonthlyView {
    pub rows: Vec<MonthlySummary>,
    pub totals: MonthlyTotals,
}

/// Filter by month name or year, sort, and total
pub fn build_monthly_ledger(rows: &[MonthlySummary], search: &str, sort: MonthlySort) -> MonthlyView {
    let search = search.trim();
    let lower = search.to_lowercase();
    let mut rows: Vec<MonthlySummary> = rows
        .iter()
        .filter(|r| {
            search.is_empty()
                || r.month.to_lowercase().contains(&lower)
                || r.year.to_string().contains(search)
        })
        .cloned()
        .collect();

    match sort {
        MonthlySort::Unsorted => {}
        MonthlySort::CreditLow => rows.sort_by(|a, b| a.credit.total_cmp(&b.credit)),
        MonthlySort::CreditHigh => rows.sort_by(|a, b| b.credit.total_cmp(&a.credit)),
        MonthlySort::DebitLow => rows.sort_by(|a, b| a.debit.total_cmp(&b.debit)),
        MonthlySort::DebitHigh => rows.sort_by(|a, b| b.debit.total_cmp(&a.debit)),
        MonthlySort::NetLow => rows.sort_by(|a, b| a.net().total_cmp(&b.net())),
        MonthlySort::NetHigh => rows.sort_by(|a, b| b.net().total_cmp(&a.net())),
    }

    let credit: f64 = rows.iter().map(|r| r.credit).sum();
    let debit: f64 = rows.iter().map(|r| r.debit).sum();

    MonthlyView {
        rows,
        totals: MonthlyTotals {
            credit,
            debit,
            net: credit - debit,
        },
    }
}

pub fn write_monthly_csv<W: Write>(
    view: &MonthlyView,
    account: LedgerAccount,
    year: i32,
    out: W,
) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().flexible(true).from_writer(out);

    wtr.write_record(["MONTHLY LEDGER SUMMARY"])?;
    wtr.write_record([format!("Account: {}", account.label())])?;
    wtr.write_record([format!("Year: {}", year)])?;
    wtr.write_record(["#", "Month", "Year", "Credit", "Debit", "Net"])?;

    for (index, row) in view.rows.iter().enumerate() {
        wtr.write_record([
            (index + 1).to_string(),
            row.month.clone(),
            row.year.to_string(),
            format!("{:.2}", row.credit),
            format!("{:.2}", row.debit),
            format!("{:.2}", row.net()),
        ])?;
    }

    wtr.write_record([
        String::new(),
        "TOTAL".to_string(),
        String::new(),
        format!("{:.2}", view.totals.credit),
        format!("{:.2}", view.totals.debit),
        format!("{:.2}", view.totals.net),
    ])?;

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i64, day: u32, description: &str, credit: f64, debit: f64) -> DayBookEntry {
        DayBookEntry {
            id,
            date: NaiveDate::from_ymd_opt(2024, 6, day).unwrap(),
            description: description.to_string(),
            credit,
            debit,
        }
    }

    fn sample() -> Vec<DayBookEntry> {
        vec![
            entry(1, 10, "Room 101 booking", 100.0, 0.0),
            entry(2, 10, "Laundry", 0.0, 40.0),
            entry(3, 10, "Cafeteria sale / supplies", 50.0, 10.0),
        ]
    }

    #[test]
    fn test_running_balances() {
        assert_eq!(running_balances(&sample()), vec![100.0, 60.0, 100.0]);
        assert!(running_balances(&[]).is_empty());
    }

    #[test]
    fn test_chronological_balance_survives_sorting() {
        let query = DayBookQuery {
            sort: DayBookSort::ExpenseHigh,
            ..Default::default()
        };
        let view = build_day_book(&sample(), &query);

        let ids: Vec<i64> = view.rows.iter().map(|r| r.entry.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);

        let balances: Vec<f64> = view.rows.iter().map(|r| r.balance).collect();
        assert_eq!(balances, vec![60.0, 100.0, 100.0]);

        assert_eq!(view.totals.total_income, 150.0);
        assert_eq!(view.totals.total_expense, 50.0);
        assert_eq!(view.totals.final_balance, 100.0);

        println!("✅ Chronological balance test PASSED");
    }

    #[test]
    fn test_display_order_folds_after_sort() {
        let query = DayBookQuery {
            sort: DayBookSort::ExpenseHigh,
            basis: BalanceBasis::DisplayOrder,
            ..Default::default()
        };
        let view = build_day_book(&sample(), &query);

        let balances: Vec<f64> = view.rows.iter().map(|r| r.balance).collect();
        assert_eq!(balances, vec![-40.0, 0.0, 100.0]);
        assert_eq!(view.totals.final_balance, 100.0);
    }

    #[test]
    fn test_chronological_uses_date_then_id() {
        let entries = vec![
            entry(9, 11, "late", 10.0, 0.0),
            entry(4, 10, "early b", 5.0, 0.0),
            entry(2, 10, "early a", 1.0, 0.0),
        ];
        let view = build_day_book(&entries, &DayBookQuery::default());

        // Server order kept, balances from (date, id) order: 2 → 1, 4 → 6, 9 → 16
        let pairs: Vec<(i64, f64)> = view.rows.iter().map(|r| (r.entry.id, r.balance)).collect();
        assert_eq!(pairs, vec![(9, 16.0), (4, 6.0), (2, 1.0)]);
    }

    #[test]
    fn test_search_filters_before_fold() {
        let query = DayBookQuery {
            search: "LAUNDRY".to_string(),
            ..Default::default()
        };
        let view = build_day_book(&sample(), &query);
        assert_eq!(view.rows.len(), 1);
        assert_eq!(view.rows[0].balance, -40.0);

        let by_date = DayBookQuery {
            search: "2024-06-10".to_string(),
            ..Default::default()
        };
        assert_eq!(build_day_book(&sample(), &by_date).rows.len(), 3);
    }

    #[test]
    fn test_balance_sort() {
        let query = DayBookQuery {
            sort: DayBookSort::BalanceLow,
            ..Default::default()
        };
        let view = build_day_book(&sample(), &query);
        assert_eq!(view.rows[0].balance, 60.0);
    }

    #[test]
    fn test_day_book_csv() {
        let view = build_day_book(&sample(), &DayBookQuery::default());
        let mut out = Vec::new();
        write_day_book_csv(&view, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "#,Date,Description,Income,Expense,Balance");
        assert_eq!(lines[1], "1,2024-06-10,Room 101 booking,100.00,0.00,100.00");
        assert_eq!(lines.last().copied(), Some(",,TOTAL,150.00,50.00,100.00"));
    }

    #[test]
    fn test_monthly_ledger() {
        let rows: Vec<MonthlySummary> = serde_json::from_str(
            r#"[
                {"month": "January", "year": 2024, "credit": "1000.00", "debit": "200.00"},
                {"month": "February", "year": "2024", "credit": 300, "debit": 900},
                {"month": "March", "year": 2024, "credit": null, "debit": "50"}
            ]"#,
        )
        .unwrap();

        let view = build_monthly_ledger(&rows, "", MonthlySort::NetHigh);
        let months: Vec<&str> = view.rows.iter().map(|r| r.month.as_str()).collect();
        assert_eq!(months, vec!["January", "March", "February"]);
        assert_eq!(view.totals.credit, 1300.0);
        assert_eq!(view.totals.debit, 1150.0);
        assert_eq!(view.totals.net, 150.0);

        let view = build_monthly_ledger(&rows, "feb", MonthlySort::Unsorted);
        assert_eq!(view.rows.len(), 1);

        let mut out = Vec::new();
        write_monthly_csv(&view, LedgerAccount::SalaryExpense, 2024, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Account: Salary Expense"));
        assert!(text.contains(",TOTAL,,300.00,900.00,-600.00"));
    }

    #[test]
    fn test_account_catalogue() {
        assert_eq!(LedgerAccount::ALL.len(), 13);
        assert_eq!("salaryexpense".parse::<LedgerAccount>().unwrap(), LedgerAccount::SalaryExpense);
        assert_eq!("Booking Income".parse::<LedgerAccount>().unwrap(), LedgerAccount::Booking);
        assert!("stock".parse::<LedgerAccount>().is_err());
        assert!(LedgerAccount::OtherIncome.is_income());
        assert!(!LedgerAccount::MessExpense.is_income());
    }
}
