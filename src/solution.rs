//! One schedule per technician plus the bookkeeping around them.
//!
//! Every view and KPI is derived from the schedules on demand; the only state
//! kept next to them is why each unserved item ended up outside.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::model::{DAY, HOUR, Item, MINUTE, Timestamp};
use crate::options::PlannerOptions;
use crate::problem::Problem;
use crate::schedule::TechnicianSchedule;
use crate::traits::UnservedReason;

/// Penalty for an unserved task or an unserved business unit.
const UNSERVED_PENALTY: f64 = 100_000.0;
/// Per-day penalty for a task whose window closed well before the horizon.
const OVERDUE_DAY_PENALTY: f64 = 10_000.0;

/// Items and technicians touched since the changes were last taken.
#[derive(Debug, Clone, Default)]
pub struct Changes {
    pub items: BTreeSet<Item>,
    pub technicians: BTreeSet<usize>,
}

impl Changes {
    pub fn record(&mut self, item: Item, technician: usize) {
        self.items.insert(item);
        self.technicians.insert(technician);
    }
}

#[derive(Debug, Clone)]
pub struct Solution<'p> {
    pub(crate) problem: &'p Problem,
    pub(crate) schedules: Vec<TechnicianSchedule<'p>>,
    pub(crate) reasons: BTreeMap<Item, UnservedReason>,
    pub(crate) changes: Changes,
}

impl<'p> Solution<'p> {
    /// Every technician with an empty schedule.
    pub fn new(problem: &'p Problem) -> Self {
        Self {
            problem,
            schedules: (0..problem.technicians.len())
                .map(|tech| TechnicianSchedule::new(problem, tech))
                .collect(),
            reasons: BTreeMap::new(),
            changes: Changes::default(),
        }
    }

    pub fn problem(&self) -> &'p Problem {
        self.problem
    }

    pub fn schedules(&self) -> &[TechnicianSchedule<'p>] {
        &self.schedules
    }

    pub fn schedule(&self, technician: usize) -> &TechnicianSchedule<'p> {
        &self.schedules[technician]
    }

    pub fn reasons(&self) -> &BTreeMap<Item, UnservedReason> {
        &self.reasons
    }

    pub fn reason(&self, item: Item) -> Option<UnservedReason> {
        self.reasons.get(&item).copied()
    }

    /// Hand over the changes recorded so far and start a fresh record.
    pub fn take_changes(&mut self) -> Changes {
        std::mem::take(&mut self.changes)
    }

    /// First technician whose schedule holds the item.
    pub fn technician_of(&self, item: Item) -> Option<usize> {
        self.schedules
            .iter()
            .position(|schedule| schedule.contains(item))
    }

    pub fn is_served(&self, item: Item) -> bool {
        self.technician_of(item).is_some()
    }

    /// Technician and start time of a served item.
    pub fn start_of(&self, item: Item) -> Option<(usize, Timestamp)> {
        self.schedules
            .iter()
            .find_map(|s| s.arrival_of(item).map(|at| (s.technician(), at)))
    }

    pub fn served_tasks(&self) -> Vec<usize> {
        let held = self.held_items();
        (0..self.problem.tasks.len())
            .filter(|&t| held.contains(&Item::Task(t)))
            .collect()
    }

    pub fn unserved_tasks(&self) -> Vec<usize> {
        let held = self.held_items();
        (0..self.problem.tasks.len())
            .filter(|&t| !held.contains(&Item::Task(t)))
            .collect()
    }

    pub fn served_slots(&self) -> Vec<usize> {
        let held = self.held_items();
        (0..self.problem.slots.len())
            .filter(|&s| held.contains(&Item::Slot(s)))
            .collect()
    }

    /// Slots not placed whose business unit is still short of its quota.
    pub fn unserved_slots(&self) -> Vec<usize> {
        let held = self.held_items();
        (0..self.problem.slots.len())
            .filter(|&s| {
                !held.contains(&Item::Slot(s)) && !self.is_master_served(self.problem.slots[s].master)
            })
            .collect()
    }

    pub fn is_slot_unserved(&self, slot: usize) -> bool {
        !self.is_served(Item::Slot(slot)) && !self.is_master_served(self.problem.slots[slot].master)
    }

    /// Whether the unit's technicians hold enough of its slots.
    pub fn is_master_served(&self, master: usize) -> bool {
        let unit = &self.problem.masters[master];
        if unit.slot_count == 0 {
            return true;
        }
        let held = unit
            .eligible
            .iter()
            .flat_map(|&tech| self.schedules[tech].items())
            .filter(|item| match item {
                Item::Slot(s) => {
                    let slot = &self.problem.slots[*s];
                    slot.master == master && slot.length >= unit.slot_length
                }
                Item::Task(_) => false,
            })
            .count();
        held >= unit.slot_count
    }

    pub fn unserved_masters(&self) -> Vec<usize> {
        (0..self.problem.masters.len())
            .filter(|&m| !self.is_master_served(m))
            .collect()
    }

    /// Unserved tasks the technician could take.
    pub fn suggestions(&self, technician: usize) -> Vec<usize> {
        self.unserved_tasks()
            .into_iter()
            .filter(|&t| self.problem.tasks[t].is_eligible(technician))
            .collect()
    }

    fn held_items(&self) -> BTreeSet<Item> {
        self.schedules.iter().flat_map(|s| s.items()).collect()
    }

    /// Whether a technician may take an item at all, before any timing check.
    pub fn can_serve(&self, item: Item, technician: usize) -> bool {
        if self.problem.processing_time(item, technician).is_none() {
            return false;
        }
        match item {
            Item::Task(t) if self.zone_filtered(t) => {
                !self.problem.zone_compatible(t, &[technician]).is_empty()
            }
            _ => true,
        }
    }

    pub(crate) fn zone_filtered(&self, task: usize) -> bool {
        self.problem.options.first_call_zone && !self.problem.disregards_limits(task)
    }

    pub fn kpis(&self) -> Kpis {
        let problem = self.problem;
        let options = &problem.options;

        let unserved = self.unserved_tasks();
        let max_unserved_priority = unserved
            .iter()
            .map(|&t| problem.tasks[t].priority)
            .max()
            .unwrap_or(0);
        let unserved_task_cost = unserved
            .iter()
            .map(|&t| {
                let task = &problem.tasks[t];
                let base = if task.window_end + 3 * HOUR < options.horizon_start {
                    ((options.horizon_start - task.window_start) / DAY) as f64 * OVERDUE_DAY_PENALTY
                } else {
                    UNSERVED_PENALTY
                };
                if options.assign_priority_first {
                    base * task.priority as f64
                } else {
                    base
                }
            })
            .sum();
        let unserved_slot_cost = UNSERVED_PENALTY * self.unserved_masters().len() as f64;

        let mut profit = 0.0;
        let mut cost = 0.0;
        let mut prioritized_revenue = 0.0;
        let mut travel_minutes = 0i64;
        let mut served_priority = 0u64;
        let mut max_drive_home = 0i64;
        let mut weighted_start = 0.0;
        for schedule in &self.schedules {
            let route_cost = schedule.cost();
            profit += schedule.revenue() * 1000.0 - route_cost;
            cost += route_cost;
            prioritized_revenue += schedule.prioritized_revenue();
            travel_minutes += schedule.travel_minutes();
            served_priority += schedule.served_priority();
            max_drive_home = max_drive_home.max(schedule.drive_home_minutes());
            for visit in schedule.visits() {
                if let Item::Task(t) = visit.item {
                    let task = &problem.tasks[t];
                    weighted_start +=
                        task.priority as f64 * ((visit.arrival - task.window_start) / MINUTE) as f64;
                }
            }
        }

        let workloads: Vec<f64> = self
            .schedules
            .iter()
            .filter(|s| s.working_minutes() > 0.0)
            .map(|s| s.workload())
            .collect();
        let max_workload = workloads.iter().copied().fold(f64::MIN, f64::max);
        let min_workload = workloads.iter().copied().fold(f64::MAX, f64::min);
        let (workload_deviation, min_workload_count) = if workloads.is_empty() {
            (0.0, 0)
        } else {
            (
                max_workload - min_workload,
                workloads.iter().filter(|&&w| w == min_workload).count(),
            )
        };

        let ideal = problem.ideal_workload();
        let total_workload_deviation: f64 = workloads.iter().map(|w| (w - ideal).abs()).sum();
        let normalized_workload_deviation = ratio(total_workload_deviation, ideal * workloads.len() as f64);
        let normalized_prioritized_revenue = ratio(prioritized_revenue, problem.ideal_prioritized_revenue);
        let normalized_travel_time = ratio(travel_minutes as f64, problem.ideal_travel_time);

        let bt = options.best_tech;
        let dw = options.distance_weight;
        Kpis {
            max_unserved_priority,
            unserved_task_cost,
            unserved_slot_cost,
            served_priority,
            profit,
            cost,
            weighted_start,
            prioritized_revenue,
            normalized_prioritized_revenue,
            workload_deviation,
            min_workload_count,
            total_workload_deviation,
            normalized_workload_deviation,
            tpr_workload: normalized_prioritized_revenue * bt - normalized_workload_deviation * (1.0 - bt),
            travel_minutes,
            normalized_travel_time,
            tpr_distance: normalized_prioritized_revenue * (1.0 - dw) - normalized_travel_time * dw,
            max_drive_home,
        }
    }

    pub fn objective(&self) -> f64 {
        self.kpis().objective(&self.problem.options)
    }

    /// Whether `other` should replace this solution.
    pub fn is_worse_than(&self, other: &Solution<'_>) -> bool {
        self.kpis().is_worse_than(&other.kpis(), &self.problem.options)
    }
}

fn ratio(value: f64, target: f64) -> f64 {
    if target != 0.0 && target.is_finite() {
        value / target
    } else {
        0.0
    }
}

/// Aggregate indicators of a solution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Kpis {
    pub max_unserved_priority: u32,
    pub unserved_task_cost: f64,
    pub unserved_slot_cost: f64,
    pub served_priority: u64,
    /// Σ(revenue × 1000 − cost) over technicians.
    pub profit: f64,
    pub cost: f64,
    /// Σ priority × minutes after window start.
    pub weighted_start: f64,
    pub prioritized_revenue: f64,
    pub normalized_prioritized_revenue: f64,
    pub workload_deviation: f64,
    pub min_workload_count: usize,
    pub total_workload_deviation: f64,
    pub normalized_workload_deviation: f64,
    pub tpr_workload: f64,
    pub travel_minutes: i64,
    pub normalized_travel_time: f64,
    pub tpr_distance: f64,
    pub max_drive_home: i64,
}

/// `Less` means the left side loses.
type Verdict = Option<bool>;

fn decide(goodness: Ordering) -> Verdict {
    match goodness {
        Ordering::Less => Some(true),
        Ordering::Greater => Some(false),
        Ordering::Equal => None,
    }
}

impl Kpis {
    pub fn unserved_penalty(&self) -> f64 {
        self.unserved_task_cost + self.unserved_slot_cost
    }

    pub fn objective(&self, options: &PlannerOptions) -> f64 {
        let priority_term = if options.assign_priority_first {
            10.0 * self.weighted_start
        } else {
            0.0
        };
        let base = self.profit - self.unserved_penalty();
        if options.is_equity() {
            base - priority_term
                - 1e7 * self.workload_deviation
                - 1e7 * self.min_workload_count as f64
        } else if !options.minimize_wct {
            base
        } else {
            base - priority_term
        }
    }

    /// Lexicographic comparison; `true` when `other` is strictly preferred.
    pub fn is_worse_than(&self, other: &Kpis, options: &PlannerOptions) -> bool {
        let higher = |a: f64, b: f64| decide(a.total_cmp(&b));
        let lower = |a: f64, b: f64| decide(b.total_cmp(&a));
        let drive_home = || {
            if options.last_job_close_to_home {
                decide(other.max_drive_home.cmp(&self.max_drive_home))
            } else {
                None
            }
        };

        let verdict = decide(other.max_unserved_priority.cmp(&self.max_unserved_priority))
            .or_else(|| lower(self.unserved_penalty(), other.unserved_penalty()))
            .or_else(|| {
                if options.ranks_by_revenue() {
                    if options.assign_priority_first || options.minimize_wct {
                        decide(self.served_priority.cmp(&other.served_priority)).or_else(|| {
                            if options.assign_priority_first {
                                higher(self.tpr_distance, other.tpr_distance)
                                    .or_else(|| lower(self.weighted_start, other.weighted_start))
                                    .or_else(|| lower(self.cost, other.cost))
                                    .or_else(drive_home)
                            } else {
                                self.guarded_start(other)
                                    .or_else(drive_home)
                                    .or_else(|| higher(self.profit, other.profit))
                            }
                        })
                    } else {
                        higher(self.profit, other.profit)
                    }
                } else {
                    decide(self.served_priority.cmp(&other.served_priority)).or_else(|| {
                        if options.assign_priority_first {
                            higher(self.tpr_workload, other.tpr_workload)
                        } else {
                            self.guarded_start(other)
                                .or_else(|| lower(self.workload_deviation, other.workload_deviation))
                                .or_else(|| decide(other.min_workload_count.cmp(&self.min_workload_count)))
                                .or_else(drive_home)
                                .or_else(|| higher(self.profit, other.profit))
                                .or_else(|| {
                                    higher(
                                        self.normalized_prioritized_revenue,
                                        other.normalized_prioritized_revenue,
                                    )
                                })
                        }
                    })
                }
            });
        verdict.unwrap_or(false)
    }

    /// A lower weighted start time only wins if it keeps 95 % of the profit.
    fn guarded_start(&self, other: &Kpis) -> Verdict {
        if other.weighted_start < self.weighted_start {
            (other.profit >= 0.95 * self.profit).then_some(true)
        } else if other.weighted_start > self.weighted_start {
            Some(false)
        } else {
            None
        }
    }
}
