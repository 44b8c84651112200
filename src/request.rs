//! Request document accepted by the planner.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::traits::TableMatrix;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub board_id: String,
    #[serde(default)]
    pub appointments: Vec<Appointment>,
    #[serde(default)]
    pub business_units: Vec<BusinessUnitRequest>,
    #[serde(default)]
    pub zones: Vec<ZoneRequest>,
    #[serde(default)]
    pub technicians: Vec<TechnicianRequest>,
    pub options: OptionsRequest,
    #[serde(default)]
    pub matrix: MatrixRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub location: LocationRequest,
    #[serde(default)]
    pub arrival_window: Option<ArrivalWindow>,
    #[serde(default)]
    pub business_unit_id: String,
    #[serde(default)]
    pub eligible_technicians: Vec<EligibleTechnician>,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    /// Non-empty means the appointment is locked to these technicians.
    #[serde(default)]
    pub technician_ids: Vec<String>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default, alias = "rescuhedule_count")]
    pub reschedule_count: i32,
    /// `"score"` or `"route"`.
    #[serde(default)]
    pub optimize_for: String,
}

fn default_priority() -> i32 {
    5
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArrivalWindow {
    pub start: Option<DateTime<FixedOffset>>,
    pub end: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibleTechnician {
    pub id: String,
    pub score: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationRequest {
    pub coordinate: String,
    #[serde(default)]
    pub zone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessUnitRequest {
    pub id: String,
    #[serde(default)]
    pub technician_ids: Vec<String>,
    #[serde(default)]
    pub buffer_slot_count: u32,
    /// Seconds.
    #[serde(default)]
    pub buffer_slot_length: i64,
    #[serde(default, alias = "disregard_distance_and_zone_limits")]
    pub disregard_distance_and_zone_limits_for_assignment: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneRequest {
    pub id: String,
    #[serde(default)]
    pub can_go_with: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicianRequest {
    pub id: String,
    #[serde(default)]
    pub home: Option<LocationRequest>,
    #[serde(default)]
    pub work_time: Option<StartEnd>,
    #[serde(default)]
    pub non_availabilities: Vec<StartEnd>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StartEnd {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LunchBreakRequest {
    pub after: DateTime<FixedOffset>,
    pub before: DateTime<FixedOffset>,
    pub duration_in_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionsRequest {
    pub office: LocationRequest,
    /// Non-positive or absent means no limit.
    #[serde(default)]
    pub distance_limit_between_jobs: Option<f64>,
    #[serde(default)]
    pub start_day_at_office: bool,
    /// `"home"`, `"office"` or `"last_job"`.
    #[serde(default)]
    pub start_point_after_unavailability: String,
    #[serde(default)]
    pub respect_scheduled_times: bool,
    #[serde(default)]
    pub call_grouping: bool,
    #[serde(default)]
    pub lunch_break: Option<LunchBreakRequest>,
    #[serde(default)]
    pub disable_drive_time_inclusion: bool,
    #[serde(default)]
    pub use_service_zones: bool,
    #[serde(default)]
    pub last_job_close_to_home: bool,
    #[serde(default)]
    pub assign_priority_jobs_first: bool,
    #[serde(default)]
    pub first_call_zone: bool,
    #[serde(default)]
    pub capacity_weight: f64,
    #[serde(default)]
    pub distance_weight: f64,
    pub planning_horizon: StartEnd,
    #[serde(default)]
    pub can_reschedule_low_priority_appointment: bool,
    #[serde(default)]
    pub minimize_weighted_completion_time: bool,
    /// Seconds.
    #[serde(default)]
    pub run_time_limit: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatrixRequest {
    #[serde(default)]
    pub duration: HashMap<String, HashMap<String, i64>>,
    #[serde(default)]
    pub distance: HashMap<String, HashMap<String, f64>>,
}

impl From<MatrixRequest> for TableMatrix {
    fn from(matrix: MatrixRequest) -> Self {
        TableMatrix {
            duration: matrix.duration,
            distance: matrix.distance,
        }
    }
}

impl DispatchRequest {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
