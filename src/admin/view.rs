//! Filter, sort and pagination over a snapshot of pending registrations.
//! Everything here is a pure function of its inputs.
use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;
use std::str::FromStr;

use crate::model::{AdminStats, PendingRegistration, UrgencyLevel};

/// Inclusive bounds on `created_at`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// All set criteria must match. Empty strings and `None` match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterState {
    /// Case-insensitive substring of username or email.
    pub search: String,
    /// Case-insensitive substring of email.
    pub email: String,
    pub urgency: Option<UrgencyLevel>,
    pub date_range: DateRange,
}

impl FilterState {
    pub fn matches(&self, reg: &PendingRegistration) -> bool {
        let search = self.search.trim().to_lowercase();
        if !search.is_empty()
            && !reg.user.username.to_lowercase().contains(&search)
            && !reg.user.email.to_lowercase().contains(&search)
        {
            return false;
        }
        let email = self.email.trim().to_lowercase();
        if !email.is_empty() && !reg.user.email.to_lowercase().contains(&email) {
            return false;
        }
        if let Some(level) = self.urgency {
            if reg.urgency_level != level {
                return false;
            }
        }
        if let Some(start) = self.date_range.start {
            if reg.created_at < start {
                return false;
            }
        }
        if let Some(end) = self.date_range.end {
            if reg.created_at > end {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    CreatedAt,
    Email,
    Username,
    DaysPending,
}

impl FromStr for SortColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "created_at" | "created" => Ok(SortColumn::CreatedAt),
            "email" => Ok(SortColumn::Email),
            "username" => Ok(SortColumn::Username),
            "days_pending" | "days" => Ok(SortColumn::DaysPending),
            other => Err(format!("unknown sort column '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortState {
    pub column: SortColumn,
    pub direction: SortDirection,
}

impl Default for SortState {
    fn default() -> Self {
        Self {
            column: SortColumn::CreatedAt,
            direction: SortDirection::Desc,
        }
    }
}

impl SortState {
    /// Clicking a column header: ascending first, descending on the second
    /// click of the same column.
    pub fn toggled(self, column: SortColumn) -> Self {
        let direction = if self.column == column && self.direction == SortDirection::Asc {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        };
        Self { column, direction }
    }

    fn compare(&self, a: &PendingRegistration, b: &PendingRegistration) -> Ordering {
        let ord = match self.column {
            SortColumn::CreatedAt => a.created_at.cmp(&b.created_at),
            SortColumn::Email => a.user.email.cmp(&b.user.email),
            SortColumn::Username => a.user.username.cmp(&b.user.username),
            SortColumn::DaysPending => a.days_pending.cmp(&b.days_pending),
        };
        match self.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// 1-based.
    pub page: usize,
    pub page_size: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageView {
    pub items: Vec<PendingRegistration>,
    pub page: usize,
    pub page_size: usize,
    /// Size of the filtered list.
    pub total: usize,
    pub total_pages: usize,
}

/// Filter, then stable-sort: records with equal keys keep their relative order
/// in both directions.
pub fn filter_and_sort(
    registrations: &[PendingRegistration],
    filters: &FilterState,
    sort: SortState,
) -> Vec<PendingRegistration> {
    let mut out: Vec<PendingRegistration> = registrations
        .iter()
        .filter(|reg| filters.matches(reg))
        .cloned()
        .collect();
    out.sort_by(|a, b| sort.compare(a, b));
    out
}

pub fn paginate(items: &[PendingRegistration], pagination: Pagination) -> PageView {
    let page_size = pagination.page_size.max(1);
    let page = pagination.page.max(1);
    let total = items.len();
    let start = (page - 1).saturating_mul(page_size).min(total);
    let end = start.saturating_add(page_size).min(total);
    PageView {
        items: items[start..end].to_vec(),
        page,
        page_size,
        total,
        total_pages: total.div_ceil(page_size),
    }
}

/// Counts over the unfiltered list. "Today" starts at UTC midnight and the
/// week window reaches seven days back from it.
pub fn admin_stats(registrations: &[PendingRegistration], now: DateTime<Utc>) -> AdminStats {
    let today = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now);
    let week_ago = today - Duration::days(7);
    AdminStats {
        total_pending: registrations.len(),
        urgent_count: registrations
            .iter()
            .filter(|r| r.urgency_level != UrgencyLevel::Normal)
            .count(),
        today_count: registrations.iter().filter(|r| r.created_at >= today).count(),
        weekly_count: registrations
            .iter()
            .filter(|r| r.created_at >= week_ago)
            .count(),
    }
}
