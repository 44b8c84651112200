//! Business options that shape feasibility and the objective.

use std::time::Duration;

use crate::model::{ExitLocation, Timestamp};

/// Run-time budget when the request does not carry one.
pub const DEFAULT_RUN_TIME_LIMIT: Duration = Duration::from_secs(420);

/// Lunch window. Lunch is skipped entirely when `after` equals the horizon end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LunchBreak {
    pub after: Timestamp,
    pub before: Timestamp,
    /// Seconds.
    pub duration: i64,
}

/// Weights of the composite score that orders the constructive pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub window_slack: f64,
    pub skill_scarcity: f64,
    pub priority: f64,
    pub duration: f64,
    pub revenue: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            window_slack: 1.0,
            skill_scarcity: 1.0,
            priority: 1.0,
            duration: 1.0,
            revenue: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlannerOptions {
    pub horizon_start: Timestamp,
    pub horizon_end: Timestamp,
    pub office: String,
    /// `1 - capacity_weight`: 1 ranks by revenue, 0 by workload equity.
    pub best_tech: f64,
    pub distance_weight: f64,
    /// Maximum distance between consecutive stops.
    pub dispatch_distance: f64,
    /// Maximum drive minutes between consecutive stops.
    pub dispatch_minutes: i64,
    pub start_day_at_office: bool,
    pub exit_after_unavailability: ExitLocation,
    pub respect_scheduled_times: bool,
    pub disable_drive_time: bool,
    pub use_service_zones: bool,
    pub first_call_zone: bool,
    pub last_job_close_to_home: bool,
    pub assign_priority_first: bool,
    pub minimize_wct: bool,
    pub lunch: LunchBreak,
    pub run_time_limit: Duration,
    pub score_weights: ScoreWeights,
}

impl PlannerOptions {
    /// Options for a horizon with every feature switched off.
    pub fn for_horizon(start: Timestamp, end: Timestamp) -> Self {
        Self {
            horizon_start: start,
            horizon_end: end,
            office: String::new(),
            best_tech: 1.0,
            distance_weight: 0.0,
            dispatch_distance: i32::MAX as f64,
            dispatch_minutes: i64::MAX,
            start_day_at_office: false,
            exit_after_unavailability: ExitLocation::Office,
            respect_scheduled_times: false,
            disable_drive_time: false,
            use_service_zones: false,
            first_call_zone: false,
            last_job_close_to_home: false,
            assign_priority_first: false,
            minimize_wct: false,
            lunch: LunchBreak {
                after: end,
                before: end,
                duration: 0,
            },
            run_time_limit: DEFAULT_RUN_TIME_LIMIT,
            score_weights: ScoreWeights::default(),
        }
    }

    /// Technician choice is scored by marginal profit rather than workload spread.
    pub fn scores_by_profit(&self) -> bool {
        self.best_tech > 0.0
    }

    /// The objective and the comparator treat the run as a pure equity run.
    pub fn is_equity(&self) -> bool {
        self.best_tech <= 0.0
    }

    /// The comparator uses the revenue chain only when revenue has full weight.
    pub fn ranks_by_revenue(&self) -> bool {
        self.best_tech >= 1.0
    }

    pub fn lunch_enabled(&self) -> bool {
        self.lunch.after != self.horizon_end
    }
}
