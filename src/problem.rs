//! The read-only planning context shared by every search worker.
//!
//! [`Problem`] is built once from a [`DispatchRequest`]. It owns the tasks,
//! technicians, buffer slots and zones, the per-task-per-technician tables, the
//! travel matrix and the business options.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use chrono::FixedOffset;
use tracing::{debug, warn};

use crate::error::PlannerError;
use crate::model::{
    BufferSlot, ExitLocation, FixedAssignment, Item, MINUTE, MasterUnit, Task, Technician,
    Timestamp, UnavailablePeriod, Zone, merge_periods, priority_weight,
};
use crate::options::{DEFAULT_RUN_TIME_LIMIT, LunchBreak, PlannerOptions, ScoreWeights};
use crate::request::DispatchRequest;
use crate::traits::{TableMatrix, TravelMatrix};

/// Drive minutes assumed for a leg missing from the matrix.
pub const UNREACHABLE_MINUTES: i64 = 5_256_000;

pub struct Problem {
    pub board_id: String,
    pub options: PlannerOptions,
    pub tasks: Vec<Task>,
    pub technicians: Vec<Technician>,
    pub masters: Vec<MasterUnit>,
    pub slots: Vec<BufferSlot>,
    pub zones: HashMap<String, Zone>,
    /// Offset used when reporting timestamps.
    pub offset: FixedOffset,
    matrix: Arc<dyn TravelMatrix>,
    /// Priority-weighted best-case revenue of all free tasks.
    pub ideal_prioritized_revenue: f64,
    /// Average leg minutes scaled by the number of tasks and technicians.
    pub ideal_travel_time: f64,
    ideal_workload: OnceLock<f64>,
    /// Latest window end and window start over all tasks; slots sort by these.
    latest_window_end: Timestamp,
    latest_window_start: Timestamp,
}

impl std::fmt::Debug for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Problem")
            .field("board_id", &self.board_id)
            .field("tasks", &self.tasks.len())
            .field("technicians", &self.technicians.len())
            .field("slots", &self.slots.len())
            .finish()
    }
}

impl Problem {
    pub fn from_request(request: &DispatchRequest) -> Result<Self, PlannerError> {
        Self::from_request_with_weights(request, ScoreWeights::default())
    }

    pub fn from_request_with_weights(
        request: &DispatchRequest,
        weights: ScoreWeights,
    ) -> Result<Self, PlannerError> {
        let opts = &request.options;
        let horizon_start = opts.planning_horizon.start.timestamp();
        let horizon_end = opts.planning_horizon.end.timestamp();
        if horizon_end <= horizon_start {
            return Err(PlannerError::InvalidInput(format!(
                "planning horizon ends at or before its start ({} >= {})",
                opts.planning_horizon.start, opts.planning_horizon.end
            )));
        }

        let mut options = PlannerOptions::for_horizon(horizon_start, horizon_end);
        options.office = opts.office.coordinate.clone();
        options.best_tech = 1.0 - opts.capacity_weight;
        options.distance_weight = opts.distance_weight;
        if let Some(limit) = opts.distance_limit_between_jobs.filter(|d| *d > 0.0) {
            options.dispatch_distance = limit;
        }
        options.start_day_at_office = opts.start_day_at_office;
        options.exit_after_unavailability = ExitLocation::parse(&opts.start_point_after_unavailability);
        options.respect_scheduled_times = opts.respect_scheduled_times;
        options.disable_drive_time = opts.disable_drive_time_inclusion;
        options.use_service_zones = opts.use_service_zones;
        options.first_call_zone = opts.first_call_zone;
        options.last_job_close_to_home = opts.last_job_close_to_home;
        options.assign_priority_first = opts.assign_priority_jobs_first;
        options.minimize_wct = opts.minimize_weighted_completion_time;
        if let Some(lunch) = &opts.lunch_break {
            options.lunch = LunchBreak {
                after: lunch.after.timestamp(),
                before: lunch.before.timestamp(),
                duration: lunch.duration_in_minutes.max(0) * MINUTE,
            };
        }
        options.run_time_limit = opts
            .run_time_limit
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(std::time::Duration::from_secs_f64)
            .unwrap_or(DEFAULT_RUN_TIME_LIMIT);
        options.score_weights = weights;

        let technicians = build_technicians(request, &options)?;
        let tech_index: HashMap<&str, usize> = technicians
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.as_str(), i))
            .collect();

        let mut tasks = Vec::with_capacity(request.appointments.len());
        for appt in &request.appointments {
            let mut window_start = appt
                .arrival_window
                .as_ref()
                .and_then(|w| w.start)
                .map_or(horizon_start, |t| t.timestamp());
            let window_end = appt
                .arrival_window
                .as_ref()
                .and_then(|w| w.end)
                .map_or(horizon_end, |t| t.timestamp());
            let start = appt.start.timestamp();
            let duration = (appt.end.timestamp() - start).max(0);
            let is_fixed = !appt.technician_ids.is_empty();

            let fixed = if is_fixed {
                window_start = start;
                let technicians: Vec<usize> = appt
                    .technician_ids
                    .iter()
                    .filter_map(|id| lookup(&tech_index, id, &appt.id))
                    .collect();
                let revenue = appt
                    .eligible_technicians
                    .iter()
                    .find(|e| e.id == appt.technician_ids[0])
                    .map_or(0.0, |e| e.score);
                Some(FixedAssignment { technicians, duration, revenue })
            } else {
                None
            };

            let mut durations = HashMap::new();
            let mut revenues = HashMap::new();
            if !is_fixed && !appt.eligible_technicians.is_empty() {
                let max = appt.eligible_technicians.iter().map(|e| e.score).fold(f64::MIN, f64::max);
                let min = appt.eligible_technicians.iter().map(|e| e.score).fold(f64::MAX, f64::min);
                let range = max - min;
                for eligible in &appt.eligible_technicians {
                    let Some(tech) = lookup(&tech_index, &eligible.id, &appt.id) else {
                        continue;
                    };
                    let normalized = if range == 0.0 {
                        1.99
                    } else {
                        1.00 + (eligible.score - min) * 0.99 / range
                    };
                    durations.entry(tech).or_insert(duration);
                    revenues.entry(tech).or_insert(normalized);
                }
            }

            let eligible = match &fixed {
                Some(f) => f.technicians.clone(),
                None => {
                    let mut techs: Vec<usize> = revenues.keys().copied().collect();
                    techs.sort_unstable();
                    techs
                }
            };
            let max_revenue = revenues.values().copied().fold(0.0, f64::max);

            tasks.push(Task {
                id: appt.id.clone(),
                location: appt.location.coordinate.clone(),
                zone: appt.location.zone.clone().filter(|z| !z.is_empty()),
                business_unit: appt.business_unit_id.clone(),
                priority: priority_weight(appt.priority),
                window_start,
                window_end,
                duration,
                optimize_for_score: appt.optimize_for == "score",
                scheduled_start: (is_fixed || options.respect_scheduled_times).then_some(start),
                fixed,
                eligible,
                durations,
                revenues,
                max_revenue,
                score: 0.0,
            });
        }
        assign_task_scores(&mut tasks, &weights);

        let mut masters = Vec::with_capacity(request.business_units.len());
        let mut slots = Vec::new();
        for unit in &request.business_units {
            let eligible: Vec<usize> = unit
                .technician_ids
                .iter()
                .filter_map(|id| lookup(&tech_index, id, &unit.id))
                .collect();
            let siblings: Vec<f64> = tasks
                .iter()
                .filter(|t| t.business_unit == unit.id)
                .map(|t| t.max_revenue)
                .collect();
            let expected_revenue = if siblings.is_empty() {
                0.0
            } else {
                siblings.iter().sum::<f64>() / siblings.len() as f64
            };
            let master = masters.len();
            let slot_ids: Vec<usize> = (1..=unit.buffer_slot_count as usize)
                .map(|i| {
                    slots.push(BufferSlot {
                        id: format!("{}_{}", unit.id, i),
                        master,
                        length: unit.buffer_slot_length.max(0),
                    });
                    slots.len() - 1
                })
                .collect();
            masters.push(MasterUnit {
                id: unit.id.clone(),
                disregard_limits: unit
                    .disregard_distance_and_zone_limits_for_assignment
                    .unwrap_or(false),
                slot_count: unit.buffer_slot_count as usize,
                slot_length: unit.buffer_slot_length.max(0),
                eligible,
                expected_revenue,
                slots: slot_ids,
            });
        }

        let zones = request
            .zones
            .iter()
            .map(|z| {
                (
                    z.id.clone(),
                    Zone {
                        id: z.id.clone(),
                        can_go_with: z.can_go_with.clone(),
                    },
                )
            })
            .collect();

        let matrix = TableMatrix::from(request.matrix.clone());
        let ideal_travel_time = matrix
            .mean_duration()
            .map_or(0.0, |mean| mean * (tasks.len() + technicians.len()) as f64 / 60.0);
        let ideal_prioritized_revenue = tasks
            .iter()
            .filter(|t| !t.is_fixed())
            .map(|t| t.priority as f64 * t.max_revenue)
            .sum();

        let latest_window_end = tasks.iter().map(|t| t.window_end).max().unwrap_or(horizon_end);
        let latest_window_start = tasks
            .iter()
            .map(|t| t.window_start)
            .max()
            .unwrap_or(horizon_start);

        Ok(Self {
            board_id: request.board_id.clone(),
            options,
            tasks,
            technicians,
            masters,
            slots,
            zones,
            offset: *opts.planning_horizon.start.offset(),
            matrix: Arc::new(matrix),
            ideal_prioritized_revenue,
            ideal_travel_time,
            ideal_workload: OnceLock::new(),
            latest_window_end,
            latest_window_start,
        })
    }

    /// Whole drive minutes between two locations, in seconds.
    ///
    /// Drive time is ignored while scheduling when the options disable it;
    /// `reporting` always returns the real value.
    pub fn drive_seconds(&self, from: &str, to: &str, reporting: bool) -> i64 {
        self.drive_minutes(from, to, reporting) * MINUTE
    }

    pub fn drive_minutes(&self, from: &str, to: &str, reporting: bool) -> i64 {
        if self.options.disable_drive_time && !reporting {
            return 0;
        }
        if from == to {
            return 0;
        }
        self.matrix
            .duration(from, to)
            .map_or(UNREACHABLE_MINUTES, |secs| secs / 60)
    }

    pub fn travel_cost(&self, from: &str, to: &str) -> f64 {
        if from == to {
            return 0.0;
        }
        self.matrix.distance(from, to).unwrap_or(f64::MAX)
    }

    /// Processing seconds of an item on a technician, `None` when ineligible.
    pub fn processing_time(&self, item: Item, technician: usize) -> Option<i64> {
        match item {
            Item::Task(t) => self.tasks[t].duration_for(technician),
            Item::Slot(s) => Some(self.slots[s].length),
        }
    }

    pub fn eligible_technicians(&self, item: Item) -> &[usize] {
        match item {
            Item::Task(t) => &self.tasks[t].eligible,
            Item::Slot(s) => &self.masters[self.slots[s].master].eligible,
        }
    }

    pub fn is_fixed(&self, item: Item) -> bool {
        matches!(item, Item::Task(t) if self.tasks[t].is_fixed())
    }

    /// Priority weight; slots carry none.
    pub fn priority(&self, item: Item) -> u32 {
        match item {
            Item::Task(t) => self.tasks[t].priority,
            Item::Slot(_) => 0,
        }
    }

    /// Arrival window of an item. Slots use the latest window over all tasks.
    pub fn window(&self, item: Item) -> (Timestamp, Timestamp) {
        match item {
            Item::Task(t) => (self.tasks[t].window_start, self.tasks[t].window_end),
            Item::Slot(_) => (self.latest_window_start, self.latest_window_end),
        }
    }

    pub fn item_id(&self, item: Item) -> &str {
        match item {
            Item::Task(t) => &self.tasks[t].id,
            Item::Slot(s) => &self.slots[s].id,
        }
    }

    /// Whether the master unit of a task ignores distance and zone limits.
    pub fn disregards_limits(&self, task: usize) -> bool {
        let unit = &self.tasks[task].business_unit;
        self.masters
            .iter()
            .any(|m| &m.id == unit && m.disregard_limits)
    }

    /// Technicians allowed to serve a task once zones are taken into account.
    pub fn zone_compatible(&self, task: usize, technicians: &[usize]) -> Vec<usize> {
        let task_zone = self.tasks[task].zone.as_deref();
        technicians
            .iter()
            .copied()
            .filter(|&tech| {
                let (Some(task_zone), Some(tech_zone)) =
                    (task_zone, self.technicians[tech].zone.as_deref())
                else {
                    return true;
                };
                match self.zones.get(tech_zone) {
                    Some(zone) => zone.can_visit(task_zone),
                    None => true,
                }
            })
            .collect()
    }

    /// Location a technician continues from after an unavailable period.
    pub fn exit_location<'a>(&'a self, technician: usize, period: &UnavailablePeriod, current: &'a str) -> &'a str {
        match period.exit {
            ExitLocation::LastJob => current,
            ExitLocation::Home => &self.technicians[technician].location,
            ExitLocation::Office => &self.options.office,
        }
    }

    /// Served minutes over working minutes of the first constructive solution.
    pub fn ideal_workload(&self) -> f64 {
        self.ideal_workload.get().copied().unwrap_or(0.0)
    }

    /// The first solve fixes the target; later solves of the same problem keep it.
    pub(crate) fn set_ideal_workload(&self, value: f64) {
        if let Err(ignored) = self.ideal_workload.set(value) {
            debug!(kept = self.ideal_workload(), ignored, "ideal workload already set by an earlier solve");
        }
    }
}

fn lookup(index: &HashMap<&str, usize>, technician: &str, referrer: &str) -> Option<usize> {
    let found = index.get(technician).copied();
    if found.is_none() {
        warn!(technician, referrer, "skipping unknown technician reference");
    }
    found
}

fn build_technicians(
    request: &DispatchRequest,
    options: &PlannerOptions,
) -> Result<Vec<Technician>, PlannerError> {
    let office = &request.options.office;
    let zoned = options.use_service_zones && options.first_call_zone;

    request
        .technicians
        .iter()
        .map(|tech| {
            let start_point = match &tech.home {
                Some(home) if !options.start_day_at_office => home,
                _ => office,
            };
            let (start, end) = match &tech.work_time {
                Some(w) => (w.start.timestamp(), w.end.timestamp()),
                None => (options.horizon_start, options.horizon_end),
            };
            if end < start {
                return Err(PlannerError::InvalidInput(format!(
                    "technician {} work time ends before it starts",
                    tech.id
                )));
            }
            let periods = tech
                .non_availabilities
                .iter()
                .map(|p| UnavailablePeriod {
                    start: p.start.timestamp(),
                    end: p.end.timestamp(),
                    exit: options.exit_after_unavailability,
                })
                .collect();
            Ok(Technician {
                id: tech.id.clone(),
                location: start_point.coordinate.clone(),
                zone: if zoned {
                    start_point.zone.clone().filter(|z| !z.is_empty())
                } else {
                    None
                },
                start,
                end,
                unavailable: merge_periods(periods),
            })
        })
        .collect()
}

/// Composite ordering score. Lower scores are constructed first.
fn assign_task_scores(tasks: &mut [Task], weights: &ScoreWeights) {
    let slack = |t: &Task| ((t.window_end - t.window_start - t.duration) / MINUTE) as f64;
    let skill = |t: &Task| t.eligible.len().max(1) as f64;
    let duration = |t: &Task| (t.duration / MINUTE) as f64;

    let max_slack = tasks.iter().map(slack).fold(0.0, f64::max);
    let max_skill = tasks.iter().map(skill).fold(0.0, f64::max);
    let max_priority = tasks.iter().map(|t| t.priority as f64).fold(0.0, f64::max);
    let max_duration = tasks.iter().map(duration).fold(0.0, f64::max);

    let ratio = |value: f64, max: f64| if max > 0.0 { value / max } else { 0.0 };
    for task in tasks.iter_mut() {
        task.score = weights.window_slack * ratio(slack(task), max_slack)
            + weights.skill_scarcity * ratio(skill(task), max_skill)
            + weights.priority * ratio(task.priority as f64, max_priority)
            + weights.duration * ratio(duration(task), max_duration)
            + weights.revenue * task.max_revenue;
    }
}
