//! Builds gateway request payloads from form input.
//!
//! Everything here is pure apart from the clock, which is injected so the
//! time-derived parts (idempotency keys, "today") can be pinned in tests.

use chrono::{DateTime, Datelike, Local, Months, NaiveDate, SecondsFormat, Utc};

use crate::model::{Client, CreateSendRequest, InvoiceData, InvoiceItem, PeriodExportRequest};

pub const PROVIDER: &str = "sevdesk";
pub const CURRENCY: &str = "EUR";
pub const DEFAULT_ITEM_DESCRIPTION: &str = "Therapie Sitzung";
pub const EXPORT_FORMAT: &str = "json";

pub const INVOICE_KEY_PREFIX: &str = "ui_";
pub const EXPORT_KEY_PREFIX: &str = "ui_export_";

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    /// Calendar date in the user's timezone.
    fn today(&self) -> NaiveDate;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

#[cfg(test)]
impl FixedClock {
    pub fn at(rfc3339: &str) -> Self {
        FixedClock(DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc))
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }

    fn today(&self) -> NaiveDate {
        self.0.date_naive()
    }
}

/// Timestamp format used for receipts and episodes (`2026-10-19T08:15:00.123Z`).
pub fn iso_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn iso_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Time-derived label, not a content hash: retries of the same submission
/// get different keys.
pub fn idempotency_key(prefix: &str, now: DateTime<Utc>) -> String {
    format!("{}{}", prefix, now.timestamp_millis())
}

// ==========================================
// Periods
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodPreset {
    ThisQuarter,
    LastQuarter,
    Custom {
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },
}

/// Calendar quarter containing `date`.
pub fn quarter_range(date: NaiveDate) -> Option<Period> {
    let start_month0 = date.month0() / 3 * 3;
    let start = NaiveDate::from_ymd_opt(date.year(), start_month0 + 1, 1)?;
    // Day before the next quarter starts, so month length and leap years fall out.
    let end = start.checked_add_months(Months::new(3))?.pred_opt()?;
    Some(Period { start, end })
}

/// Quarter before the one containing `date`; Q1 wraps to last year's Q4.
pub fn last_quarter_range(date: NaiveDate) -> Option<Period> {
    let current = quarter_range(date)?;
    quarter_range(current.start.checked_sub_months(Months::new(3))?)
}

/// `None` when a custom range is missing either bound.
pub fn resolve_period(preset: PeriodPreset, today: NaiveDate) -> Option<Period> {
    match preset {
        PeriodPreset::ThisQuarter => quarter_range(today),
        PeriodPreset::LastQuarter => last_quarter_range(today),
        PeriodPreset::Custom { start, end } => Some(Period { start: start?, end: end? }),
    }
}

// ==========================================
// Payloads
// ==========================================

pub fn build_create_send(
    client: &Client,
    amount: f64,
    due_date: NaiveDate,
    dry_run: bool,
    note: &str,
    now: DateTime<Utc>,
) -> CreateSendRequest {
    let due = iso_date(due_date);
    let description = match note.trim() {
        "" => DEFAULT_ITEM_DESCRIPTION.to_string(),
        trimmed => trimmed.to_string(),
    };

    CreateSendRequest {
        provider: PROVIDER.to_string(),
        dry_run,
        idempotency_key: idempotency_key(INVOICE_KEY_PREFIX, now),
        customer_id: client.id.clone(),
        invoice_data: InvoiceData {
            invoice_number: format!("INV-{}", due),
            amount,
            currency: CURRENCY.to_string(),
            due_date: due,
            items: vec![InvoiceItem {
                description,
                quantity: 1,
                unit_price: amount,
            }],
        },
    }
}

pub fn build_period_export(period: Period, dry_run: bool, now: DateTime<Utc>) -> PeriodExportRequest {
    PeriodExportRequest {
        provider: PROVIDER.to_string(),
        dry_run,
        idempotency_key: idempotency_key(EXPORT_KEY_PREFIX, now),
        period_start: iso_date(period.start),
        period_end: iso_date(period.end),
        export_format: EXPORT_FORMAT.to_string(),
    }
}
