//! Request builders shared by unit tests.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};

use crate::request::{
    Appointment, ArrivalWindow, BusinessUnitRequest, DispatchRequest, EligibleTechnician,
    LocationRequest, MatrixRequest, OptionsRequest, StartEnd, TechnicianRequest,
};

/// A wall-clock time on the test day, in UTC.
pub(crate) fn at(hour: u32, minute: u32) -> DateTime<FixedOffset> {
    let utc = FixedOffset::east_opt(0).unwrap();
    let naive = NaiveDate::from_ymd_opt(2024, 1, 15)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap();
    utc.from_local_datetime(&naive).unwrap()
}

pub(crate) fn ts(hour: u32, minute: u32) -> i64 {
    at(hour, minute).timestamp()
}

fn location(coordinate: &str) -> LocationRequest {
    LocationRequest {
        coordinate: coordinate.to_string(),
        zone: None,
    }
}

/// Request with an 08:00-17:00 horizon and technicians living at `home-<id>`.
pub(crate) fn request(technicians: &[&str]) -> DispatchRequest {
    DispatchRequest {
        board_id: "board".into(),
        appointments: Vec::new(),
        business_units: Vec::new(),
        zones: Vec::new(),
        technicians: technicians
            .iter()
            .map(|id| TechnicianRequest {
                id: id.to_string(),
                home: Some(location(&format!("home-{id}"))),
                work_time: None,
                non_availabilities: Vec::new(),
            })
            .collect(),
        options: OptionsRequest {
            office: location("office"),
            distance_limit_between_jobs: None,
            start_day_at_office: false,
            start_point_after_unavailability: "office".into(),
            respect_scheduled_times: false,
            call_grouping: false,
            lunch_break: None,
            disable_drive_time_inclusion: false,
            use_service_zones: false,
            last_job_close_to_home: false,
            assign_priority_jobs_first: false,
            first_call_zone: false,
            capacity_weight: 0.0,
            distance_weight: 0.0,
            planning_horizon: StartEnd {
                start: at(8, 0),
                end: at(17, 0),
            },
            can_reschedule_low_priority_appointment: false,
            minimize_weighted_completion_time: false,
            run_time_limit: Some(1.0),
        },
        matrix: MatrixRequest::default(),
    }
}

/// Free appointment at its own location, open all day, scored equally for every technician.
pub(crate) fn appointment(id: &str, minutes: u32, eligible: &[&str]) -> Appointment {
    let end = at(8, 0) + chrono::Duration::minutes(i64::from(minutes));
    Appointment {
        id: id.to_string(),
        location: location(&format!("loc-{id}")),
        arrival_window: None,
        business_unit_id: "bu".into(),
        eligible_technicians: eligible
            .iter()
            .map(|tech| EligibleTechnician {
                id: tech.to_string(),
                score: 1.0,
            })
            .collect(),
        start: at(8, 0),
        end,
        technician_ids: Vec::new(),
        priority: 5,
        reschedule_count: 0,
        optimize_for: "score".into(),
    }
}

pub(crate) fn with_window(mut appt: Appointment, start: (u32, u32), end: (u32, u32)) -> Appointment {
    appt.arrival_window = Some(ArrivalWindow {
        start: Some(at(start.0, start.1)),
        end: Some(at(end.0, end.1)),
    });
    appt
}

/// Lock an appointment to technicians at a fixed start.
pub(crate) fn pinned_to(mut appt: Appointment, technicians: &[&str], start: (u32, u32)) -> Appointment {
    let length = appt.end - appt.start;
    appt.start = at(start.0, start.1);
    appt.end = appt.start + length;
    appt.technician_ids = technicians.iter().map(|t| t.to_string()).collect();
    appt
}

pub(crate) fn business_unit(id: &str, slots: u32, minutes: i64, technicians: &[&str]) -> BusinessUnitRequest {
    BusinessUnitRequest {
        id: id.to_string(),
        technician_ids: technicians.iter().map(|t| t.to_string()).collect(),
        buffer_slot_count: slots,
        buffer_slot_length: minutes * 60,
        disregard_distance_and_zone_limits_for_assignment: None,
    }
}

/// Same drive time and distance between every pair of known locations.
pub(crate) fn uniform_matrix(request: &mut DispatchRequest, minutes: i64, distance: f64) {
    let mut locations: Vec<String> = request
        .appointments
        .iter()
        .map(|a| a.location.coordinate.clone())
        .collect();
    locations.extend(
        request
            .technicians
            .iter()
            .filter_map(|t| t.home.as_ref().map(|h| h.coordinate.clone())),
    );
    locations.push(request.options.office.coordinate.clone());
    locations.sort();
    locations.dedup();

    let mut duration: HashMap<String, HashMap<String, i64>> = HashMap::new();
    let mut distances: HashMap<String, HashMap<String, f64>> = HashMap::new();
    for from in &locations {
        for to in &locations {
            if from == to {
                continue;
            }
            duration
                .entry(from.clone())
                .or_default()
                .insert(to.clone(), minutes * 60);
            distances
                .entry(from.clone())
                .or_default()
                .insert(to.clone(), distance);
        }
    }
    request.matrix = MatrixRequest {
        duration,
        distance: distances,
    };
}
