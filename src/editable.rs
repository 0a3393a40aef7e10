// ⏰ Editable window
// One shared rule for every record kind: editable for two calendar days after its date

use chrono::{Local, NaiveDate};

/// Oldest record age (in whole calendar days) that may still be edited
pub const MAX_EDIT_AGE_DAYS: i64 = 2;

/// Source of "today" in local time.
///
/// Injected so the editable window can be evaluated against a fixed day in tests
/// and in the API stub.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Local wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Clock pinned to one day
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

/// Whole calendar days between `record_date` and `today` (negative for future dates)
pub fn age_in_days(record_date: NaiveDate, today: NaiveDate) -> i64 {
    today.signed_duration_since(record_date).num_days()
}

/// True iff the record is 0, 1 or 2 calendar days old.
///
/// Both sides are calendar dates, so this is a day window and not a rolling
/// 48-hour window: a record from the day before yesterday stays editable until
/// local midnight. Future-dated records are never editable.
pub fn is_editable(record_date: NaiveDate, today: NaiveDate) -> bool {
    let age = age_in_days(record_date, today);
    (0..=MAX_EDIT_AGE_DAYS).contains(&age)
}
