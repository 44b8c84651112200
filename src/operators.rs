//! Destroy and repair operators.

use rand::Rng;
use rand::seq::IteratorRandom;

use crate::cancel::CancelToken;
use crate::error::Cancelled;
use crate::model::Item;
use crate::roulette::roulette;
use crate::schedule::TechnicianSchedule;
use crate::solution::Solution;
use crate::traits::UnservedReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyKind {
    Random,
    WorstTech,
    WorstTask,
    Related,
    Opportunity,
    Equity,
}

impl DestroyKind {
    pub const COUNT: usize = 6;
    pub const ALL: [DestroyKind; Self::COUNT] = [
        DestroyKind::Random,
        DestroyKind::WorstTech,
        DestroyKind::WorstTask,
        DestroyKind::Related,
        DestroyKind::Opportunity,
        DestroyKind::Equity,
    ];

    /// Operator name recorded in removal reasons.
    pub fn label(self) -> &'static str {
        match self {
            DestroyKind::Random => "RandomTaskRemoval",
            DestroyKind::WorstTech => "WorstTechRemoval",
            DestroyKind::WorstTask => "WorstTaskRemoval",
            DestroyKind::Related => "RelatedTaskRemoval",
            DestroyKind::Opportunity => "OpportunityTaskRemoval",
            DestroyKind::Equity => "EquityTargetedTaskRemoval",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairKind {
    Greedy,
    GreedyRandomized,
    Random,
    Equity,
}

impl RepairKind {
    pub const COUNT: usize = 4;
    pub const ALL: [RepairKind; Self::COUNT] = [
        RepairKind::Greedy,
        RepairKind::GreedyRandomized,
        RepairKind::Random,
        RepairKind::Equity,
    ];
}

/// A successful trial placement.
struct Trial<'p> {
    technician: usize,
    score: f64,
    schedule: TechnicianSchedule<'p>,
}

impl<'p> Solution<'p> {
    // ============================================================================
    // Destroy
    // ============================================================================

    /// Remove a share of the served free items.
    ///
    /// Fixed tasks are never candidates.
    pub fn destroy<R: Rng>(
        &mut self,
        kind: DestroyKind,
        degree: f64,
        rng: &mut R,
        token: &CancelToken,
    ) -> Result<(), Cancelled> {
        let served_free = self
            .schedules
            .iter()
            .flat_map(|s| s.items())
            .filter(|&item| !self.problem.is_fixed(item))
            .count();
        let quota = (degree * served_free as f64).ceil() as usize;
        if quota == 0 {
            return Ok(());
        }
        let label = kind.label();

        match kind {
            DestroyKind::Random | DestroyKind::Related => {
                let pool = self.free_items(|_, _| true);
                self.remove_uniform(pool, quota, label, rng, token)
            }
            DestroyKind::Opportunity => {
                let unserved = self.unserved_tasks();
                let pool = self.free_items(|solution, tech| {
                    unserved
                        .iter()
                        .any(|&t| solution.problem.tasks[t].is_eligible(tech))
                });
                let pool = pool.into_iter().filter(|item| item.is_task()).collect();
                self.remove_uniform(pool, quota, label, rng, token)
            }
            DestroyKind::Equity => {
                let idle: Vec<usize> = self
                    .schedules
                    .iter()
                    .filter(|s| s.is_empty() && s.working_minutes() > 0.0)
                    .map(|s| s.technician())
                    .collect();
                let pool = self
                    .free_items(|_, _| true)
                    .into_iter()
                    .filter(|item| match item {
                        Item::Task(t) => idle.iter().any(|&tech| self.problem.tasks[*t].is_eligible(tech)),
                        Item::Slot(_) => false,
                    })
                    .collect();
                self.remove_uniform(pool, quota, label, rng, token)
            }
            DestroyKind::WorstTask => {
                let mut pool = self.free_items(|_, _| true);
                for _ in 0..quota {
                    token.check()?;
                    let weights: Vec<f64> = pool.iter().map(|&item| self.held_revenue(item)).collect();
                    let Some(pick) = roulette(&weights, true, rng) else {
                        break;
                    };
                    let item = pool.swap_remove(pick);
                    self.remove_item(item, label, token)?;
                }
                Ok(())
            }
            DestroyKind::WorstTech => {
                let busy: Vec<(usize, f64)> = self
                    .schedules
                    .iter()
                    .filter(|s| s.working_minutes() > 0.0 && s.workload() > 0.0)
                    .map(|s| (s.technician(), s.workload() * 100.0))
                    .collect();
                let weights: Vec<f64> = busy.iter().map(|(_, w)| *w).collect();
                let Some(pick) = roulette(&weights, false, rng) else {
                    return Ok(());
                };
                let tech = busy[pick].0;
                let items: Vec<Item> = self.schedules[tech]
                    .items()
                    .filter(|&item| item.is_task() && !self.problem.is_fixed(item))
                    .collect();
                for item in items {
                    self.remove_item(item, label, token)?;
                }
                Ok(())
            }
        }
    }

    /// Served items that are not fixed, on technicians accepted by `filter`.
    fn free_items(&self, filter: impl Fn(&Solution<'p>, usize) -> bool) -> Vec<Item> {
        self.schedules
            .iter()
            .filter(|s| filter(self, s.technician()))
            .flat_map(|s| s.items())
            .filter(|&item| !self.problem.is_fixed(item))
            .collect()
    }

    fn held_revenue(&self, item: Item) -> f64 {
        match item {
            Item::Task(t) => self
                .technician_of(item)
                .map_or(0.0, |tech| self.problem.tasks[t].revenue_for(tech)),
            Item::Slot(s) => self.problem.masters[self.problem.slots[s].master].expected_revenue,
        }
    }

    fn remove_uniform<R: Rng>(
        &mut self,
        pool: Vec<Item>,
        quota: usize,
        label: &'static str,
        rng: &mut R,
        token: &CancelToken,
    ) -> Result<(), Cancelled> {
        let picks = pool.into_iter().choose_multiple(rng, quota);
        for item in picks {
            self.remove_item(item, label, token)?;
        }
        Ok(())
    }

    pub(crate) fn remove_item(
        &mut self,
        item: Item,
        label: &'static str,
        token: &CancelToken,
    ) -> Result<(), Cancelled> {
        if self.problem.is_fixed(item) {
            return Ok(());
        }
        if let Some(tech) = self.technician_of(item) {
            if self.schedules[tech].remove(item, token)? {
                self.reasons.insert(item, UnservedReason::Removed(label));
                self.changes.record(item, tech);
            }
        }
        Ok(())
    }

    // ============================================================================
    // Repair
    // ============================================================================

    /// Re-insert unserved tasks, then unserved slots.
    pub fn repair<R: Rng>(
        &mut self,
        kind: RepairKind,
        rng: &mut R,
        token: &CancelToken,
    ) -> Result<(), Cancelled> {
        let draws = self.unserved_tasks().len();
        for _ in 0..draws {
            token.check()?;
            let unserved = self.unserved_tasks();
            if unserved.is_empty() {
                break;
            }
            let task = unserved[rng.random_range(0..unserved.len())];
            if self.problem.tasks[task].is_fixed() {
                self.assign_fixed(task, token)?;
            } else {
                self.serve_task(task, kind, rng, token)?;
            }
        }

        let draws = self.unserved_slots().len();
        for _ in 0..draws {
            token.check()?;
            let unserved = self.unserved_slots();
            if unserved.is_empty() {
                break;
            }
            let slot = unserved[rng.random_range(0..unserved.len())];
            self.serve_slot(slot, kind, rng, token)?;
        }
        Ok(())
    }

    /// Place a fixed task on each of its technicians.
    pub fn assign_fixed(&mut self, task: usize, token: &CancelToken) -> Result<bool, Cancelled> {
        let item = Item::Task(task);
        let Some(fixed) = &self.problem.tasks[task].fixed else {
            return Ok(false);
        };
        if fixed.technicians.is_empty() {
            self.reasons.insert(item, UnservedReason::NoSkilledTechnician);
            return Ok(false);
        }
        let mut placed = true;
        for &tech in &fixed.technicians {
            if self.schedules[tech].assign(item, token)? {
                self.changes.record(item, tech);
            } else {
                placed = false;
            }
        }
        if placed {
            self.reasons.remove(&item);
        } else {
            self.reasons.insert(item, UnservedReason::NoFeasibleTechnician);
        }
        Ok(placed)
    }

    /// Place a free task on the technician chosen by the repair rule.
    pub fn serve_task<R: Rng>(
        &mut self,
        task: usize,
        kind: RepairKind,
        rng: &mut R,
        token: &CancelToken,
    ) -> Result<bool, Cancelled> {
        let item = Item::Task(task);
        let eligible = self.problem.eligible_technicians(item);
        if eligible.is_empty() {
            self.reasons.insert(item, UnservedReason::NoSkilledTechnician);
            return Ok(false);
        }
        let candidates = if self.zone_filtered(task) {
            self.problem.zone_compatible(task, eligible)
        } else {
            eligible.to_vec()
        };
        if candidates.is_empty() {
            self.reasons.insert(item, UnservedReason::NoZoneCompatibleTechnician);
            return Ok(false);
        }
        let trials = self.trials(item, &candidates, kind, token)?;
        self.commit(item, trials, kind, rng)
    }

    /// Place a business-unit slot on one of the unit's technicians.
    pub fn serve_slot<R: Rng>(
        &mut self,
        slot: usize,
        kind: RepairKind,
        rng: &mut R,
        token: &CancelToken,
    ) -> Result<bool, Cancelled> {
        let item = Item::Slot(slot);
        let candidates = self.problem.eligible_technicians(item).to_vec();
        if candidates.is_empty() {
            self.reasons.insert(item, UnservedReason::NoTechnicianForBusinessUnit);
            return Ok(false);
        }
        let trials = self.trials(item, &candidates, kind, token)?;
        self.commit(item, trials, kind, rng)
    }

    /// Assign the item on a copy of each candidate schedule and score the result.
    fn trials(
        &self,
        item: Item,
        candidates: &[usize],
        kind: RepairKind,
        token: &CancelToken,
    ) -> Result<Vec<Trial<'p>>, Cancelled> {
        let options = &self.problem.options;
        let workloads: Vec<f64> = self
            .schedules
            .iter()
            .filter(|s| s.working_minutes() > 0.0)
            .map(|s| s.workload())
            .collect();
        let max_workload = workloads.iter().copied().fold(0.0, f64::max);
        let min_workload = workloads.iter().copied().fold(f64::MAX, f64::min).min(max_workload);
        let deviation = max_workload - min_workload;

        let mut trials = Vec::with_capacity(candidates.len());
        for &tech in candidates {
            token.check()?;
            let current = &self.schedules[tech];
            let mut schedule = current.clone();
            if !schedule.assign(item, token)? {
                continue;
            }
            let score = if kind == RepairKind::Equity {
                let gained = schedule.visits().len() as f64 - current.visits().len() as f64;
                if current.is_empty() { gained * 3.0 } else { gained }
            } else if options.scores_by_profit() {
                (schedule.revenue() - schedule.cost()) - (current.revenue() - current.cost())
            } else {
                let workload = schedule.workload();
                (workload.max(max_workload) - workload.min(min_workload)) - deviation
            };
            trials.push(Trial {
                technician: tech,
                score,
                schedule,
            });
        }
        Ok(trials)
    }

    fn commit<R: Rng>(
        &mut self,
        item: Item,
        mut trials: Vec<Trial<'p>>,
        kind: RepairKind,
        rng: &mut R,
    ) -> Result<bool, Cancelled> {
        if trials.is_empty() {
            self.reasons.insert(item, UnservedReason::NoFeasibleTechnician);
            return Ok(false);
        }
        let by_profit = self.problem.options.scores_by_profit();
        let scores: Vec<f64> = trials.iter().map(|t| t.score).collect();
        let pick = match kind {
            RepairKind::Greedy => {
                let better = |a: f64, b: f64| if by_profit { a > b } else { a < b };
                let mut best = 0;
                for (i, &score) in scores.iter().enumerate().skip(1) {
                    if better(score, scores[best]) {
                        best = i;
                    }
                }
                best
            }
            RepairKind::GreedyRandomized => roulette(&scores, by_profit, rng).unwrap_or(0),
            RepairKind::Random => rng.random_range(0..trials.len()),
            RepairKind::Equity => roulette(&scores, true, rng).unwrap_or(0),
        };
        let trial = trials.swap_remove(pick);
        self.schedules[trial.technician] = trial.schedule;
        self.reasons.remove(&item);
        self.changes.record(item, trial.technician);
        Ok(true)
    }
}
