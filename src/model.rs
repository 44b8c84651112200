//! Per-run domain facts: tasks, technicians, buffer slots and zones.
//!
//! Everything here is built once by [`Problem`](crate::problem::Problem) and is
//! read-only while searching. Cross references use indices into the problem's
//! vectors.

use std::collections::HashMap;

/// Epoch seconds.
pub type Timestamp = i64;

pub const MINUTE: i64 = 60;
pub const HOUR: i64 = 60 * MINUTE;
pub const DAY: i64 = 24 * HOUR;

/// Something a technician schedule can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Item {
    Task(usize),
    Slot(usize),
}

impl Item {
    pub fn is_task(&self) -> bool {
        matches!(self, Item::Task(_))
    }
}

/// Map an input priority level to its scheduling weight.
///
/// Level 1 dominates every combination of lower levels.
pub fn priority_weight(level: i32) -> u32 {
    match level {
        1 => 4096,
        2 => 256,
        3 => 16,
        4 => 2,
        _ => 1,
    }
}

/// A locked appointment. It keeps its technicians and start time.
#[derive(Debug, Clone)]
pub struct FixedAssignment {
    pub technicians: Vec<usize>,
    pub duration: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub location: String,
    pub zone: Option<String>,
    pub business_unit: String,
    /// Weight from [`priority_weight`], not the raw level.
    pub priority: u32,
    pub window_start: Timestamp,
    pub window_end: Timestamp,
    /// Requested length in seconds.
    pub duration: i64,
    pub optimize_for_score: bool,
    /// Start the task is pinned to (fixed tasks, or every task when scheduled
    /// times are respected).
    pub scheduled_start: Option<Timestamp>,
    pub fixed: Option<FixedAssignment>,
    /// Technicians allowed to perform the task. For fixed tasks these are the
    /// fixed technicians.
    pub eligible: Vec<usize>,
    /// Seconds per eligible technician.
    pub durations: HashMap<usize, i64>,
    /// Normalized revenue per eligible technician, in `[1.00, 1.99]`.
    pub revenues: HashMap<usize, f64>,
    pub max_revenue: f64,
    /// Composite ordering score used by the constructive heuristic.
    pub score: f64,
}

impl Task {
    pub fn is_fixed(&self) -> bool {
        self.fixed.is_some()
    }

    /// Processing time in seconds for the given technician.
    pub fn duration_for(&self, technician: usize) -> Option<i64> {
        match &self.fixed {
            Some(fixed) => Some(fixed.duration),
            None => self.durations.get(&technician).copied(),
        }
    }

    pub fn revenue_for(&self, technician: usize) -> f64 {
        self.revenues.get(&technician).copied().unwrap_or(0.0)
    }

    pub fn is_eligible(&self, technician: usize) -> bool {
        self.eligible.contains(&technician)
    }
}

/// Where a technician continues from after an unavailable period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitLocation {
    LastJob,
    Home,
    #[default]
    Office,
}

impl ExitLocation {
    pub fn parse(value: &str) -> Self {
        match value {
            "last_job" => ExitLocation::LastJob,
            "home" => ExitLocation::Home,
            _ => ExitLocation::Office,
        }
    }
}

/// Half-open `[start, end)` interval the technician cannot work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnavailablePeriod {
    pub start: Timestamp,
    pub end: Timestamp,
    pub exit: ExitLocation,
}

impl UnavailablePeriod {
    pub fn contains(&self, t: Timestamp) -> bool {
        self.start <= t && t < self.end
    }
}

/// Sort periods and merge the overlapping or touching ones.
///
/// A merged period leaves through the exit of whichever part ends last.
pub fn merge_periods(mut periods: Vec<UnavailablePeriod>) -> Vec<UnavailablePeriod> {
    periods.retain(|p| p.end > p.start);
    periods.sort_by_key(|p| (p.start, p.end));

    let mut merged: Vec<UnavailablePeriod> = Vec::with_capacity(periods.len());
    for period in periods {
        match merged.last_mut() {
            Some(last) if period.start <= last.end => {
                if period.end >= last.end {
                    last.end = period.end;
                    last.exit = period.exit;
                }
            }
            _ => merged.push(period),
        }
    }
    merged
}

#[derive(Debug, Clone)]
pub struct Technician {
    pub id: String,
    pub location: String,
    pub zone: Option<String>,
    pub start: Timestamp,
    pub end: Timestamp,
    /// Sorted, disjoint.
    pub unavailable: Vec<UnavailablePeriod>,
}

impl Technician {
    /// The period containing `t`, if any.
    pub fn unavailable_at(&self, t: Timestamp) -> Option<&UnavailablePeriod> {
        self.unavailable.iter().find(|p| p.contains(t))
    }

    /// First period that has not yet finished at `t` and starts within the workday.
    pub fn next_unavailable(&self, t: Timestamp) -> Option<&UnavailablePeriod> {
        self.unavailable
            .iter()
            .find(|p| p.end > t && p.start < self.end)
    }

    /// Seconds of unavailability overlapping `[from, to)`.
    pub fn unavailable_within(&self, from: Timestamp, to: Timestamp) -> i64 {
        self.unavailable
            .iter()
            .map(|p| (p.end.min(to) - p.start.max(from)).max(0))
            .sum()
    }
}

/// A business unit that asks for a number of buffer slots to be reserved.
#[derive(Debug, Clone)]
pub struct MasterUnit {
    pub id: String,
    pub disregard_limits: bool,
    pub slot_count: usize,
    /// Seconds.
    pub slot_length: i64,
    pub eligible: Vec<usize>,
    pub expected_revenue: f64,
    pub slots: Vec<usize>,
}

/// One reservable instance of a master unit's buffer capacity.
#[derive(Debug, Clone)]
pub struct BufferSlot {
    pub id: String,
    pub master: usize,
    pub length: i64,
}

#[derive(Debug, Clone, Default)]
pub struct Zone {
    pub id: String,
    pub can_go_with: Vec<String>,
}

impl Zone {
    pub fn can_visit(&self, other: &str) -> bool {
        self.id == other || self.can_go_with.iter().any(|z| z == other)
    }
}
