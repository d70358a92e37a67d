//! Timesheet arithmetic: minute rounding and aggregation.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::billing::amount_for_minutes;
use crate::db::TimeEntryRecord;

/// Longest single entry accepted, in minutes.
pub const MAX_ENTRY_MINUTES: i64 = 24 * 60;

/// How raw minutes are brought onto the rounding grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundingMode {
    Up,
    Nearest,
    Down,
}

impl RoundingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Nearest => "nearest",
            Self::Down => "down",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "up" => Some(Self::Up),
            "nearest" => Some(Self::Nearest),
            "down" => Some(Self::Down),
            _ => None,
        }
    }
}

/// Round `minutes` to a multiple of `increment`.
///
/// An increment of 0 or 1 leaves the value unchanged. Negative input is
/// clamped to zero; callers validate entries before getting here.
pub fn round_minutes(minutes: i64, increment: u32, mode: RoundingMode) -> i64 {
    let minutes = minutes.max(0);
    let step = i64::from(increment);
    if step <= 1 || minutes == 0 {
        return minutes;
    }
    let whole = minutes / step;
    let rest = minutes % step;
    let units = match mode {
        RoundingMode::Up if rest > 0 => whole + 1,
        RoundingMode::Up => whole,
        RoundingMode::Down => whole,
        RoundingMode::Nearest if rest * 2 >= step => whole + 1,
        RoundingMode::Nearest => whole,
    };
    units * step
}

/// Minutes as decimal hours, rounded to 2 dp.
pub fn minutes_to_hours(minutes: i64) -> Decimal {
    (Decimal::from(minutes) / Decimal::from(60)).round_dp(2)
}

/// Validate raw minutes for a new or edited entry.
pub fn validate_minutes(minutes: i64) -> Result<(), String> {
    if minutes <= 0 {
        return Err("minutes must be greater than 0".to_string());
    }
    if minutes > MAX_ENTRY_MINUTES {
        return Err(format!(
            "minutes must be at most {MAX_ENTRY_MINUTES} (24 hours)"
        ));
    }
    Ok(())
}

/// Grouping key for [`summarize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    Day,
    Week,
    Matter,
    Profile,
}

impl GroupBy {
    pub fn from_query(value: &str) -> Option<Self> {
        match value {
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "matter" => Some(Self::Matter),
            "profile" => Some(Self::Profile),
            _ => None,
        }
    }

    fn key(self, entry: &TimeEntryRecord) -> String {
        match self {
            Self::Day => entry.work_date.format("%Y-%m-%d").to_string(),
            Self::Week => iso_week_key(entry.work_date),
            Self::Matter => entry.matter_id.to_string(),
            Self::Profile => entry.profile_id.to_string(),
        }
    }
}

/// `YYYY-Www` with the ISO week-numbering year.
pub fn iso_week_key(date: NaiveDate) -> String {
    let week = date.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

/// One aggregated row of a timesheet summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub key: String,
    pub entries: usize,
    pub billable_minutes: i64,
    pub non_billable_minutes: i64,
    pub billable_hours: Decimal,
    pub billable_amount: Decimal,
}

/// Totals across all rows of a summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryTotals {
    pub entries: usize,
    pub billable_minutes: i64,
    pub non_billable_minutes: i64,
    pub billable_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub group_by: GroupBy,
    pub rows: Vec<SummaryRow>,
    pub totals: SummaryTotals,
}

/// Group entries and total their rounded minutes.
///
/// `rate_for` supplies the resolved hourly rate of a billable entry; entries
/// it returns `None` for contribute minutes but no amount.
pub fn summarize<F>(entries: &[TimeEntryRecord], group_by: GroupBy, mut rate_for: F) -> Summary
where
    F: FnMut(&TimeEntryRecord) -> Option<Decimal>,
{
    let mut groups: BTreeMap<String, SummaryRow> = BTreeMap::new();

    for entry in entries {
        let key = group_by.key(entry);
        let row = groups.entry(key.clone()).or_insert_with(|| SummaryRow {
            key,
            entries: 0,
            billable_minutes: 0,
            non_billable_minutes: 0,
            billable_hours: Decimal::ZERO,
            billable_amount: Decimal::ZERO,
        });
        row.entries += 1;
        if entry.billable {
            row.billable_minutes += entry.billed_minutes;
            if let Some(rate) = rate_for(entry) {
                row.billable_amount += amount_for_minutes(entry.billed_minutes, rate);
            }
        } else {
            row.non_billable_minutes += entry.billed_minutes;
        }
    }

    let mut rows: Vec<SummaryRow> = groups.into_values().collect();
    for row in &mut rows {
        row.billable_hours = minutes_to_hours(row.billable_minutes);
    }

    let totals = SummaryTotals {
        entries: rows.iter().map(|r| r.entries).sum(),
        billable_minutes: rows.iter().map(|r| r.billable_minutes).sum(),
        non_billable_minutes: rows.iter().map(|r| r.non_billable_minutes).sum(),
        billable_amount: rows
            .iter()
            .fold(Decimal::ZERO, |acc, r| acc + r.billable_amount),
    };

    Summary {
        group_by,
        rows,
        totals,
    }
}

/// Distinct matter ids referenced by `entries`, in first-seen order.
pub fn matter_ids(entries: &[TimeEntryRecord]) -> Vec<Uuid> {
    let mut seen = std::collections::HashSet::new();
    entries
        .iter()
        .filter(|e| seen.insert(e.matter_id))
        .map(|e| e.matter_id)
        .collect()
}
