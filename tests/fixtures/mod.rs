//! Test fixtures for dispatch-planner.
//!
//! Builders for requests, appointments and business units on a fixed test
//! day (2024-01-15, UTC), plus a uniform travel matrix.

#![allow(dead_code)]

use std::collections::HashMap;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone};
use dispatch_planner::request::{
    Appointment, ArrivalWindow, BusinessUnitRequest, DispatchRequest, EligibleTechnician,
    LocationRequest, LunchBreakRequest, MatrixRequest, OptionsRequest, StartEnd, TechnicianRequest,
    ZoneRequest,
};

pub fn at(hour: u32, minute: u32) -> DateTime<FixedOffset> {
    let naive = NaiveDate::from_ymd_opt(2024, 1, 15)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap();
    FixedOffset::east_opt(0)
        .unwrap()
        .from_local_datetime(&naive)
        .unwrap()
}

fn location(coordinate: &str) -> LocationRequest {
    LocationRequest {
        coordinate: coordinate.to_string(),
        zone: None,
    }
}

// ============================================================================
// Appointments
// ============================================================================

/// Builder for appointments with sensible defaults: 30 minutes, open all day,
/// priority 5, located at `loc-<id>`.
#[derive(Clone, Debug)]
pub struct TestAppointment {
    id: String,
    minutes: i64,
    eligible: Vec<(String, f64)>,
    window: Option<((u32, u32), (u32, u32))>,
    pinned: Option<(Vec<String>, (u32, u32))>,
    priority: i32,
    business_unit: String,
    zone: Option<String>,
}

impl TestAppointment {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            minutes: 30,
            eligible: Vec::new(),
            window: None,
            pinned: None,
            priority: 5,
            business_unit: "bu".into(),
            zone: None,
        }
    }

    pub fn minutes(mut self, minutes: i64) -> Self {
        self.minutes = minutes;
        self
    }

    pub fn eligible(mut self, technicians: &[&str]) -> Self {
        self.eligible = technicians.iter().map(|t| (t.to_string(), 1.0)).collect();
        self
    }

    pub fn scored(mut self, technician: &str, score: f64) -> Self {
        self.eligible.push((technician.to_string(), score));
        self
    }

    pub fn window(mut self, start: (u32, u32), end: (u32, u32)) -> Self {
        self.window = Some((start, end));
        self
    }

    pub fn pinned(mut self, technicians: &[&str], start: (u32, u32)) -> Self {
        self.pinned = Some((technicians.iter().map(|t| t.to_string()).collect(), start));
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn zone(mut self, zone: &str) -> Self {
        self.zone = Some(zone.to_string());
        self
    }

    pub fn build(self) -> Appointment {
        let (start, technician_ids) = match self.pinned {
            Some((techs, (h, m))) => (at(h, m), techs),
            None => (at(8, 0), Vec::new()),
        };
        Appointment {
            id: self.id.clone(),
            location: LocationRequest {
                coordinate: format!("loc-{}", self.id),
                zone: self.zone,
            },
            arrival_window: self.window.map(|(s, e)| ArrivalWindow {
                start: Some(at(s.0, s.1)),
                end: Some(at(e.0, e.1)),
            }),
            business_unit_id: self.business_unit,
            eligible_technicians: self
                .eligible
                .into_iter()
                .map(|(id, score)| EligibleTechnician { id, score })
                .collect(),
            start,
            end: start + Duration::minutes(self.minutes),
            technician_ids,
            priority: self.priority,
            reschedule_count: 0,
            optimize_for: "score".into(),
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Builder for a whole request. Technicians live at `home-<id>` and the
/// horizon runs 08:00-17:00.
#[derive(Clone, Debug)]
pub struct TestRequest {
    request: DispatchRequest,
    matrix: Option<(i64, f64)>,
    legs: Vec<(String, String, i64, f64)>,
}

impl TestRequest {
    pub fn new(technicians: &[&str]) -> Self {
        let request = DispatchRequest {
            board_id: "test-board".into(),
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
        };
        Self {
            request,
            matrix: None,
            legs: Vec::new(),
        }
    }

    pub fn appointment(mut self, appointment: TestAppointment) -> Self {
        self.request.appointments.push(appointment.build());
        self
    }

    pub fn business_unit(mut self, id: &str, slots: u32, minutes: i64, technicians: &[&str]) -> Self {
        self.request.business_units.push(BusinessUnitRequest {
            id: id.to_string(),
            technician_ids: technicians.iter().map(|t| t.to_string()).collect(),
            buffer_slot_count: slots,
            buffer_slot_length: minutes * 60,
            disregard_distance_and_zone_limits_for_assignment: None,
        });
        self
    }

    pub fn lunch(mut self, after: (u32, u32), before: (u32, u32), minutes: i64) -> Self {
        self.request.options.lunch_break = Some(LunchBreakRequest {
            after: at(after.0, after.1),
            before: at(before.0, before.1),
            duration_in_minutes: minutes,
        });
        self
    }

    pub fn unavailable(mut self, technician: &str, start: (u32, u32), end: (u32, u32)) -> Self {
        if let Some(tech) = self.request.technicians.iter_mut().find(|t| t.id == technician) {
            tech.non_availabilities.push(StartEnd {
                start: at(start.0, start.1),
                end: at(end.0, end.1),
            });
        }
        self
    }

    pub fn run_time_limit(mut self, seconds: f64) -> Self {
        self.request.options.run_time_limit = Some(seconds);
        self
    }

    /// Zones only restrict first calls when both switches are on.
    pub fn service_zones(mut self) -> Self {
        self.request.options.use_service_zones = true;
        self.request.options.first_call_zone = true;
        self
    }

    pub fn zone(mut self, id: &str, can_go_with: &[&str]) -> Self {
        self.request.zones.push(ZoneRequest {
            id: id.to_string(),
            can_go_with: can_go_with.iter().map(|z| z.to_string()).collect(),
        });
        self
    }

    pub fn home_zone(mut self, technician: &str, zone: &str) -> Self {
        if let Some(home) = self
            .request
            .technicians
            .iter_mut()
            .find(|t| t.id == technician)
            .and_then(|t| t.home.as_mut())
        {
            home.zone = Some(zone.to_string());
        }
        self
    }

    pub fn distance_limit(mut self, limit: f64) -> Self {
        self.request.options.distance_limit_between_jobs = Some(limit);
        self
    }

    pub fn capacity_weight(mut self, weight: f64) -> Self {
        self.request.options.capacity_weight = weight;
        self
    }

    /// Same drive time and distance between every pair of distinct locations.
    pub fn uniform_matrix(mut self, minutes: i64, distance: f64) -> Self {
        self.matrix = Some((minutes, distance));
        self
    }

    /// Override one directed leg of the matrix.
    pub fn leg(mut self, from: &str, to: &str, minutes: i64, distance: f64) -> Self {
        self.legs.push((from.to_string(), to.to_string(), minutes, distance));
        self
    }

    pub fn build(self) -> DispatchRequest {
        let mut request = self.request;
        if let Some((minutes, distance)) = self.matrix {
            request.matrix = uniform_matrix(&request, minutes, distance);
        }
        for (from, to, minutes, distance) in self.legs {
            request
                .matrix
                .duration
                .entry(from.clone())
                .or_default()
                .insert(to.clone(), minutes * 60);
            request.matrix.distance.entry(from).or_default().insert(to, distance);
        }
        request
    }
}

fn uniform_matrix(request: &DispatchRequest, minutes: i64, distance: f64) -> MatrixRequest {
    let mut locations: Vec<String> = request
        .appointments
        .iter()
        .map(|a| a.location.coordinate.clone())
        .chain(
            request
                .technicians
                .iter()
                .filter_map(|t| t.home.as_ref().map(|h| h.coordinate.clone())),
        )
        .collect();
    locations.push(request.options.office.coordinate.clone());
    locations.sort();
    locations.dedup();

    let mut matrix = MatrixRequest {
        duration: HashMap::new(),
        distance: HashMap::new(),
    };
    for from in &locations {
        for to in locations.iter().filter(|to| *to != from) {
            matrix
                .duration
                .entry(from.clone())
                .or_default()
                .insert(to.clone(), minutes * 60);
            matrix
                .distance
                .entry(from.clone())
                .or_default()
                .insert(to.clone(), distance);
        }
    }
    matrix
}
