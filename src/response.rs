//! Response document produced from a solved [`Solution`].

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::model::{Item, Timestamp};
use crate::problem::Problem;
use crate::solution::Solution;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub assignments: Vec<AssignmentResponse>,
    /// Key spelling is part of the published contract.
    pub nonavailibilities: Vec<TechnicianNonAvailability>,
    pub technicians: Vec<TechnicianSummary>,
    pub suggestions: Suggestions,
    pub objective: ObjectiveResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Assigned,
    PreAssigned,
    Outlier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentResponse {
    pub id: String,
    pub start: Option<DateTime<FixedOffset>>,
    pub end: Option<DateTime<FixedOffset>>,
    pub technician_ids: Option<Vec<String>>,
    pub status: AssignmentStatus,
    pub route: Option<RouteResponse>,
    /// Why an outlier could not be placed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RouteResponse {
    pub distance: f64,
    /// Minutes.
    pub duration: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicianNonAvailability {
    pub technician_id: String,
    pub non_availabilities: Vec<NonAvailability>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonAvailability {
    pub start: Option<DateTime<FixedOffset>>,
    pub finish: Option<DateTime<FixedOffset>>,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicianSummary {
    pub id: String,
    pub lunch_break: Option<LunchBreakResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LunchBreakResponse {
    pub start: Option<DateTime<FixedOffset>>,
    pub end: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Suggestions {
    pub overtime: Vec<Overtime>,
    pub buffer_slots: Vec<BufferSlotResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Overtime {
    pub technician_id: String,
    pub appointment_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferSlotResponse {
    pub technician_id: String,
    pub business_unit_id: String,
    pub start: Option<DateTime<FixedOffset>>,
    pub end: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectiveResponse {
    pub value: f64,
    pub total_profit: f64,
    pub total_weighted_start_time: f64,
    pub unserved_task_cost: f64,
    pub unserved_bu_cost: f64,
    pub workload_deviation: f64,
    pub num_techs_at_min_workload: usize,
    pub total_cost: f64,
}

fn stamp(problem: &Problem, at: Timestamp) -> Option<DateTime<FixedOffset>> {
    DateTime::from_timestamp(at, 0).map(|utc| utc.with_timezone(&problem.offset))
}

impl DispatchResponse {
    pub fn from_solution(solution: &Solution<'_>) -> Self {
        let problem = solution.problem();
        let options = &problem.options;

        let mut assignments = Vec::new();
        let mut reported = vec![false; problem.tasks.len()];
        let mut buffer_slots = Vec::new();
        for schedule in solution.schedules() {
            let tech = &problem.technicians[schedule.technician()];
            for (visit, leg) in schedule.visits().iter().zip(schedule.route_legs()) {
                match visit.item {
                    Item::Task(t) => {
                        if std::mem::replace(&mut reported[t], true) {
                            continue;
                        }
                        let task = &problem.tasks[t];
                        let (technician_ids, status) = match &task.fixed {
                            Some(fixed) => (
                                fixed
                                    .technicians
                                    .iter()
                                    .map(|&i| problem.technicians[i].id.clone())
                                    .collect(),
                                AssignmentStatus::PreAssigned,
                            ),
                            None => (vec![tech.id.clone()], AssignmentStatus::Assigned),
                        };
                        assignments.push(AssignmentResponse {
                            id: task.id.clone(),
                            start: stamp(problem, visit.arrival),
                            end: stamp(problem, visit.arrival + task.duration),
                            technician_ids: Some(technician_ids),
                            status,
                            route: Some(RouteResponse {
                                distance: leg.distance,
                                duration: leg.minutes as f64,
                            }),
                            reason: None,
                        });
                    }
                    Item::Slot(s) => {
                        let slot = &problem.slots[s];
                        buffer_slots.push(BufferSlotResponse {
                            technician_id: tech.id.clone(),
                            business_unit_id: problem.masters[slot.master].id.clone(),
                            start: stamp(problem, visit.arrival),
                            end: stamp(problem, visit.arrival + slot.length),
                        });
                    }
                }
            }
        }
        for t in solution.unserved_tasks() {
            assignments.push(AssignmentResponse {
                id: problem.tasks[t].id.clone(),
                start: None,
                end: None,
                technician_ids: None,
                status: AssignmentStatus::Outlier,
                route: None,
                reason: solution.reason(Item::Task(t)).map(|r| r.to_string()),
            });
        }

        let nonavailibilities = problem
            .technicians
            .iter()
            .map(|tech| TechnicianNonAvailability {
                technician_id: tech.id.clone(),
                non_availabilities: tech
                    .unavailable
                    .iter()
                    .map(|p| NonAvailability {
                        start: stamp(problem, p.start),
                        finish: stamp(problem, p.end),
                        kind: "unavailability".into(),
                        title: None,
                    })
                    .collect(),
            })
            .collect();

        let fallback_lunch = if options.lunch_enabled() {
            options.lunch.after
        } else {
            options.horizon_start
        };
        let technicians = solution
            .schedules()
            .iter()
            .map(|schedule| {
                let start = if schedule.is_empty() {
                    fallback_lunch
                } else {
                    schedule.lunch_start().unwrap_or(fallback_lunch)
                };
                TechnicianSummary {
                    id: problem.technicians[schedule.technician()].id.clone(),
                    lunch_break: Some(LunchBreakResponse {
                        start: stamp(problem, start),
                        end: stamp(problem, start + options.lunch.duration),
                    }),
                }
            })
            .collect();

        let overtime = (0..problem.technicians.len())
            .filter_map(|tech| {
                let ids: Vec<String> = solution
                    .suggestions(tech)
                    .into_iter()
                    .map(|t| problem.tasks[t].id.clone())
                    .collect();
                (!ids.is_empty()).then(|| Overtime {
                    technician_id: problem.technicians[tech].id.clone(),
                    appointment_ids: ids,
                })
            })
            .collect();

        let kpis = solution.kpis();
        DispatchResponse {
            assignments,
            nonavailibilities,
            technicians,
            suggestions: Suggestions {
                overtime,
                buffer_slots,
            },
            objective: ObjectiveResponse {
                value: kpis.objective(options),
                total_profit: kpis.profit,
                total_weighted_start_time: kpis.weighted_start,
                unserved_task_cost: kpis.unserved_task_cost,
                unserved_bu_cost: kpis.unserved_slot_cost,
                workload_deviation: kpis.workload_deviation,
                num_techs_at_min_workload: kpis.min_workload_count,
                total_cost: kpis.cost,
            },
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
