//! Datasource records, the snapshot source, and derived analytics.
//!
//! The assistant can be grounded in the dashboard's datasource table. A
//! [`DatasourceSource`] yields a read-only snapshot per request; the
//! [`DatasourceContext`] wraps that snapshot for prompt assembly, either with
//! precomputed [`DatasourceAnalytics`] or as the raw record list.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// A file or connection shown in the dashboard's datasource table.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Datasource {
    pub id: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    /// Human-entered date such as `"Jan 6 2024"` or `"Sept 21 2024"`.
    pub created_at: String,
    pub created_by: String,
}

impl Datasource {
    /// Parsed creation date, if `created_at` is in a recognised format.
    pub fn created_date(&self) -> Option<NaiveDate> {
        parse_created_at(&self.created_at)
    }
}

/// Parse the dashboard's creation dates.
///
/// Accepts `"<month> <day> <year>"` with full (`March`), abbreviated
/// (`Mar`) or four-letter (`Sept`) month names, an optional comma after the
/// day, and ISO `YYYY-MM-DD`.
pub fn parse_created_at(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }

    let mut parts = value.split_whitespace();
    let month = month_number(parts.next()?)?;
    let day: u32 = parts.next()?.trim_end_matches(',').parse().ok()?;
    let year: i32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "january",
        "february",
        "march",
        "april",
        "may",
        "june",
        "july",
        "august",
        "september",
        "october",
        "november",
        "december",
    ];
    let name = name.trim_end_matches('.').to_lowercase();
    if name.len() < 3 {
        return None;
    }
    MONTHS
        .iter()
        .position(|m| m.starts_with(&name))
        .map(|i| i as u32 + 1)
}

// ── Analytics ─────────────────────────────────────────────────────────

/// A record reference used for newest/oldest reporting.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceRef {
    pub id: u64,
    pub name: String,
    pub created_at: String,
    pub created_by: String,
}

impl From<&Datasource> for DatasourceRef {
    fn from(d: &Datasource) -> Self {
        Self {
            id: d.id,
            name: d.name.clone(),
            created_at: d.created_at.clone(),
            created_by: d.created_by.clone(),
        }
    }
}

/// Aggregates precomputed over a snapshot.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceAnalytics {
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub by_creator: BTreeMap<String, usize>,
    pub newest: Option<DatasourceRef>,
    pub oldest: Option<DatasourceRef>,
}

impl DatasourceAnalytics {
    /// Compute counts and newest/oldest over `records`.
    ///
    /// Records whose date does not parse are counted but never chosen as
    /// newest or oldest. On equal dates the earliest record in input order
    /// wins.
    pub fn compute(records: &[Datasource]) -> Self {
        let mut by_type = BTreeMap::new();
        let mut by_status = BTreeMap::new();
        let mut by_creator = BTreeMap::new();
        let mut newest: Option<(NaiveDate, &Datasource)> = None;
        let mut oldest: Option<(NaiveDate, &Datasource)> = None;

        for record in records {
            *by_type.entry(record.kind.clone()).or_insert(0) += 1;
            *by_status.entry(record.status.clone()).or_insert(0) += 1;
            *by_creator.entry(record.created_by.clone()).or_insert(0) += 1;

            let Some(date) = record.created_date() else {
                continue;
            };
            if newest.is_none_or(|(d, _)| date > d) {
                newest = Some((date, record));
            }
            if oldest.is_none_or(|(d, _)| date < d) {
                oldest = Some((date, record));
            }
        }

        Self {
            total: records.len(),
            by_type,
            by_status,
            by_creator,
            newest: newest.map(|(_, r)| r.into()),
            oldest: oldest.map(|(_, r)| r.into()),
        }
    }
}

/// Grounding data handed to the context assembler.
///
/// The variant is fixed at construction; consumers match on it instead of
/// inspecting the payload's shape.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatasourceContext {
    /// Aggregates plus the records they were computed from.
    Analytics {
        summary: DatasourceAnalytics,
        records: Vec<Datasource>,
    },
    /// The raw record list only.
    Records { records: Vec<Datasource> },
}

impl DatasourceContext {
    pub fn analyze(records: Vec<Datasource>) -> Self {
        Self::Analytics {
            summary: DatasourceAnalytics::compute(&records),
            records,
        }
    }

    pub fn raw(records: Vec<Datasource>) -> Self {
        Self::Records { records }
    }

    pub fn records(&self) -> &[Datasource] {
        match self {
            Self::Analytics { records, .. } | Self::Records { records } => records,
        }
    }
}

// ── Filtering ─────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortField {
    #[serde(rename = "createdAt")]
    CreatedAt,
    #[serde(rename = "createdBy")]
    CreatedBy,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortField {
    pub fn as_str(self) -> &'static str {
        match self {
            SortField::CreatedAt => "createdAt",
            SortField::CreatedBy => "createdBy",
        }
    }
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// Search, filter, and sort options for the datasource table.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct DatasourceQuery {
    /// Case-insensitive substring matched against name and creator.
    pub search: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub status: Option<String>,
    pub sort: Option<SortField>,
    pub direction: SortDirection,
}

impl DatasourceQuery {
    /// Apply the query to a snapshot. Sorting is stable in both directions:
    /// equal keys keep snapshot order. Records with unparseable dates sort
    /// first when ascending by `createdAt` and last when descending.
    pub fn apply(&self, records: &[Datasource]) -> Vec<Datasource> {
        let needle = self
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let mut out: Vec<Datasource> = records
            .iter()
            .filter(|d| {
                needle.as_ref().is_none_or(|n| {
                    d.name.to_lowercase().contains(n) || d.created_by.to_lowercase().contains(n)
                })
            })
            .filter(|d| {
                self.kind
                    .as_ref()
                    .is_none_or(|k| d.kind.eq_ignore_ascii_case(k))
            })
            .filter(|d| {
                self.status
                    .as_ref()
                    .is_none_or(|s| d.status.eq_ignore_ascii_case(s))
            })
            .cloned()
            .collect();

        if let Some(field) = self.sort {
            out.sort_by(|a, b| {
                let ordering = match field {
                    SortField::CreatedAt => a.created_date().cmp(&b.created_date()),
                    SortField::CreatedBy => a.created_by.cmp(&b.created_by),
                };
                match self.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            });
        }
        out
    }
}

// ── Snapshot source ───────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read datasource file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid datasource file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("datasource store unavailable: {0}")]
    Unavailable(String),
}

/// Where the relay reads its read-only datasource snapshot from.
pub trait DatasourceSource: Send + Sync {
    /// Take a snapshot of all records.
    fn snapshot(&self) -> BoxFuture<'_, Result<Vec<Datasource>, StoreError>>;
}

/// A fixed in-memory record list.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatasources {
    records: Vec<Datasource>,
}

impl InMemoryDatasources {
    pub fn new(records: Vec<Datasource>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[Datasource] {
        &self.records
    }

    /// Load records from a JSON array file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let text = std::fs::read_to_string(path)?;
        let records: Vec<Datasource> = serde_json::from_str(&text)?;
        Ok(Self::new(records))
    }

    /// The dashboard's demo table.
    pub fn demo() -> Self {
        let rows: [(&str, &str, &str, &str, &str); 16] = [
            ("website - data", "PDF", "Uploaded", "Jan 6 2024", "Olivia Ryhe"),
            ("website - data", "PDF", "Uploaded", "Jan 28 2024", "Natalie Crag"),
            ("Products", "CSV", "Uploaded", "Feb 4 2024", "Phoenix Baker"),
            ("user - data", "CSV", "Connected", "Feb 8 2024", "Natalie Crag"),
            ("website - data", "DOCX", "Uploaded", "March 7 2024", "Olivia Ryhe"),
            ("website - data", "CSV", "Uploaded", "March 7 2024", "Phoenix Baker"),
            ("Server Files", "DOCX", "Uploaded", "March 21 2024", "Natalie Crag"),
            ("website - data", "CSV", "Uploaded", "March 28 2024", "Olivia Ryhe"),
            ("user - data", "PDF", "Connected", "June 9 2024", "Natalie Crag"),
            ("user - data", "DOCX", "Connected", "June 29 2024", "Olivia Ryhe"),
            ("user - data", "DOCX", "Connected", "July 2 2024", "Phoenix Baker"),
            ("user - data", "DOCX", "Uploaded", "Aug 1 2024", "Natalie Crag"),
            ("website - data", "PDF", "Uploaded", "Sept 21 2024", "Olivia Ryhe"),
            ("Server Files", "CSV", "Connected", "Sept 21 2024", "Natalie Crag"),
            ("website - data", "PDF", "Uploaded", "Sept 21 2024", "Olivia Ryhe"),
            ("Server Files", "CSV", "Connected", "Sept 21 2024", "Natalie Crag"),
        ];
        let records = rows
            .iter()
            .enumerate()
            .map(|(i, (name, kind, status, created_at, created_by))| Datasource {
                id: i as u64 + 1,
                name: (*name).into(),
                kind: (*kind).into(),
                status: (*status).into(),
                created_at: (*created_at).into(),
                created_by: (*created_by).into(),
            })
            .collect();
        Self::new(records)
    }
}

impl DatasourceSource for InMemoryDatasources {
    fn snapshot(&self) -> BoxFuture<'_, Result<Vec<Datasource>, StoreError>> {
        let records = self.records.clone();
        Box::pin(async move { Ok(records) })
    }
}
