// 📊 Reports - income and expense listings with filters, totals and CSV export

use crate::records::{de, Expense};
use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;

/// Row of `unified-income` (bookings, sales income and other income in one list)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomeRow {
    pub id: i64,

    /// "Booking", "Sales Income" or "Other Income"
    #[serde(rename = "type", default, deserialize_with = "de::text")]
    pub source_type: String,

    #[serde(deserialize_with = "de::date")]
    pub date: NaiveDate,

    #[serde(default, deserialize_with = "de::amount")]
    pub amount: f64,

    #[serde(default, deserialize_with = "de::text")]
    pub description: String,

    /// Source-specific extras (booking type, guest, ...)
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Anything that can appear in a report
pub trait ReportRow: Clone {
    fn id(&self) -> i64;
    /// Income source type or expense category
    fn kind(&self) -> &str;
    fn date(&self) -> NaiveDate;
    fn amount(&self) -> f64;
    fn description(&self) -> &str;

    /// Lowercase text matched by free-text search
    fn search_text(&self) -> String {
        format!(
            "{} {} {} {}",
            self.id(),
            self.description(),
            self.kind(),
            self.amount()
        )
        .to_lowercase()
    }
}

impl ReportRow for IncomeRow {
    fn id(&self) -> i64 {
        self.id
    }

    fn kind(&self) -> &str {
        &self.source_type
    }

    fn date(&self) -> NaiveDate {
        self.date
    }

    fn amount(&self) -> f64 {
        self.amount
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn search_text(&self) -> String {
        format!(
            "{} {} {} {} {}",
            self.id, self.description, self.source_type, self.amount, self.details
        )
        .to_lowercase()
    }
}

impl ReportRow for Expense {
    fn id(&self) -> i64 {
        self.id
    }

    fn kind(&self) -> &str {
        &self.category
    }

    fn date(&self) -> NaiveDate {
        self.date
    }

    fn amount(&self) -> f64 {
        self.amount
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn search_text(&self) -> String {
        format!(
            "{} {} {} {} {} {}",
            self.id,
            self.description,
            self.category,
            self.amount,
            self.staff_code,
            self.voucher_no.as_deref().unwrap_or_default()
        )
        .to_lowercase()
    }
}

// ============================================================================
// FILTERING
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportSort {
    #[default]
    Unsorted,
    DateNewest,
    DateOldest,
    AmountLow,
    AmountHigh,
}

impl std::str::FromStr for ReportSort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "none" => Ok(ReportSort::Unsorted),
            "date_newest" => Ok(ReportSort::DateNewest),
            "date_oldest" => Ok(ReportSort::DateOldest),
            "amount_low" => Ok(ReportSort::AmountLow),
            "amount_high" => Ok(ReportSort::AmountHigh),
            other => Err(format!("unknown sort '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    /// Exact source type / category; None or "All" keeps everything
    pub kind: Option<String>,
    pub search: String,
    /// Inclusive
    pub from: Option<NaiveDate>,
    /// Inclusive
    pub to: Option<NaiveDate>,
    pub sort: ReportSort,
}

impl ReportFilter {
    fn accepts<R: ReportRow>(&self, row: &R) -> bool {
        if let Some(kind) = self.kind.as_deref() {
            if kind != "All" && row.kind() != kind {
                return false;
            }
        }

        let search = self.search.trim().to_lowercase();
        if !search.is_empty() && !row.search_text().contains(&search) {
            return false;
        }

        if self.from.is_some_and(|from| row.date() < from) {
            return false;
        }
        if self.to.is_some_and(|to| row.date() > to) {
            return false;
        }

        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report<R> {
    pub rows: Vec<R>,
    pub total: f64,
    /// Total per source type / category
    pub by_kind: BTreeMap<String, f64>,
}

pub fn build_report<R: ReportRow>(rows: &[R], filter: &ReportFilter) -> Report<R> {
    let mut rows: Vec<R> = rows.iter().filter(|r| filter.accepts(*r)).cloned().collect();

    match filter.sort {
        ReportSort::Unsorted => {}
        ReportSort::DateNewest => rows.sort_by(|a, b| b.date().cmp(&a.date())),
        ReportSort::DateOldest => rows.sort_by(|a, b| a.date().cmp(&b.date())),
        ReportSort::AmountLow => rows.sort_by(|a, b| a.amount().total_cmp(&b.amount())),
        ReportSort::AmountHigh => rows.sort_by(|a, b| b.amount().total_cmp(&a.amount())),
    }

    let mut by_kind: BTreeMap<String, f64> = BTreeMap::new();
    for row in &rows {
        *by_kind.entry(row.kind().to_string()).or_insert(0.0) += row.amount();
    }
    let total = rows.iter().map(|r| r.amount()).sum();

    Report {
        rows,
        total,
        by_kind,
    }
}

/// `ID, Type, Description, Amount, Date` rows followed by a total row
pub fn write_report_csv<R: ReportRow, W: Write>(report: &Report<R>, total_label: &str, out: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);

    wtr.write_record(["ID", "Type", "Description", "Amount", "Date"])?;
    for row in &report.rows {
        wtr.write_record([
            row.id().to_string(),
            row.kind().to_string(),
            row.description().to_string(),
            format!("{:.2}", row.amount()),
            row.date().to_string(),
        ])?;
    }

    wtr.write_record(["", "", "", "", ""])?;
    wtr.write_record([
        String::new(),
        String::new(),
        total_label.to_string(),
        format!("{:.2}", report.total),
        String::new(),
    ])?;

    wtr.flush()?;
    Ok(())
}
