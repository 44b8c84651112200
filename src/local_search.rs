//! Local search moves over whole solutions.
//!
//! Every move works on copies and returns the improved solution, leaving the
//! receiver untouched.

use std::collections::BTreeSet;

use crate::cancel::CancelToken;
use crate::error::Cancelled;
use crate::model::Item;
use crate::solution::{Changes, Solution};

/// Items and technicians whose neighbourhood is known not to improve.
#[derive(Debug, Clone, Default)]
pub struct NoChange {
    pub items: BTreeSet<Item>,
    pub technicians: BTreeSet<usize>,
}

impl NoChange {
    /// Mark every served item and every technician as settled.
    pub fn everything(solution: &Solution<'_>) -> Self {
        Self {
            items: solution.schedules().iter().flat_map(|s| s.items()).collect(),
            technicians: (0..solution.schedules().len()).collect(),
        }
    }

    /// Re-open whatever an accepted move touched.
    pub fn forget(&mut self, changes: &Changes) {
        self.items.retain(|item| !changes.items.contains(item));
        self.technicians.retain(|tech| !changes.technicians.contains(tech));
    }

    fn covers(&self, a: Item, b: Item, first: usize, second: usize) -> bool {
        self.items.contains(&a)
            && self.items.contains(&b)
            && self.technicians.contains(&first)
            && self.technicians.contains(&second)
    }
}

impl<'p> Solution<'p> {
    /// Items a move may relocate: not fixed and with somewhere else to go.
    fn movable(&self, item: Item) -> bool {
        !self.problem.is_fixed(item) && self.problem.eligible_technicians(item).len() > 1
    }

    /// Exchange two items between technicians; first improvement wins.
    pub fn swap_first_improvement(
        &self,
        no_change: &NoChange,
        token: &CancelToken,
    ) -> Result<Option<Solution<'p>>, Cancelled> {
        let n = self.schedules.len();
        for first in 0..n {
            for second in first + 1..n {
                let left: Vec<Item> = self.schedules[first].items().filter(|&i| self.movable(i)).collect();
                let right: Vec<Item> = self.schedules[second].items().filter(|&i| self.movable(i)).collect();
                for &a in &left {
                    for &b in &right {
                        token.check()?;
                        if no_change.covers(a, b, first, second) {
                            continue;
                        }
                        if !self.can_serve(a, second) || !self.can_serve(b, first) {
                            continue;
                        }
                        let mut one = self.schedules[first].clone();
                        let mut two = self.schedules[second].clone();
                        if !one.remove(a, token)? || !two.remove(b, token)? {
                            continue;
                        }
                        if !one.assign(b, token)? || !two.assign(a, token)? {
                            continue;
                        }
                        let mut candidate = self.clone();
                        candidate.schedules[first] = one;
                        candidate.schedules[second] = two;
                        if self.is_worse_than(&candidate) {
                            candidate.changes.record(a, second);
                            candidate.changes.record(b, first);
                            return Ok(Some(candidate));
                        }
                    }
                }
            }
        }
        Ok(None)
    }

    /// Move one item to another technician; best improvement wins.
    pub fn remove_and_insert_best(
        &self,
        no_change: &NoChange,
        token: &CancelToken,
    ) -> Result<Option<Solution<'p>>, Cancelled> {
        let mut best: Option<Solution<'p>> = None;
        for from in 0..self.schedules.len() {
            let items: Vec<Item> = self.schedules[from].items().filter(|&i| self.movable(i)).collect();
            for item in items {
                for to in 0..self.schedules.len() {
                    token.check()?;
                    if to == from
                        || !self.can_serve(item, to)
                        || no_change.covers(item, item, from, to)
                    {
                        continue;
                    }
                    let mut target = self.schedules[to].clone();
                    if !target.assign(item, token)? {
                        continue;
                    }
                    let mut source = self.schedules[from].clone();
                    if !source.remove(item, token)? {
                        continue;
                    }

                    let mut candidate = self.clone();
                    candidate.schedules[from] = source;
                    candidate.schedules[to] = target;
                    let reference = best.as_ref().unwrap_or(self);
                    if reference.is_worse_than(&candidate) {
                        candidate.changes.record(item, to);
                        best = Some(candidate);
                    }
                }
            }
        }
        Ok(best)
    }

    /// Place an unserved task on some technician; best improvement wins.
    pub fn insert_best(&self, token: &CancelToken) -> Result<Option<Solution<'p>>, Cancelled> {
        let mut best: Option<Solution<'p>> = None;
        for task in self.unserved_tasks() {
            let item = Item::Task(task);
            if self.problem.is_fixed(item) {
                continue;
            }
            for &tech in self.problem.eligible_technicians(item) {
                token.check()?;
                if !self.can_serve(item, tech) {
                    continue;
                }
                let mut schedule = self.schedules[tech].clone();
                if !schedule.assign(item, token)? {
                    continue;
                }
                let mut candidate = self.clone();
                candidate.schedules[tech] = schedule;
                candidate.reasons.remove(&item);
                let reference = best.as_ref().unwrap_or(self);
                if reference.is_worse_than(&candidate) {
                    candidate.changes.record(item, tech);
                    best = Some(candidate);
                }
            }
        }
        Ok(best)
    }

    /// Run swap, remove-and-insert and insert once, in that order.
    ///
    /// Returns the improved solution, if any move improved.
    pub fn local_search(
        &self,
        no_change: &NoChange,
        token: &CancelToken,
    ) -> Result<Option<Solution<'p>>, Cancelled> {
        let mut improved: Option<Solution<'p>> = None;
        let current = improved.as_ref().unwrap_or(self);
        if let Some(found) = current.swap_first_improvement(no_change, token)? {
            improved = Some(found);
        }
        let current = improved.as_ref().unwrap_or(self);
        if let Some(found) = current.remove_and_insert_best(no_change, token)? {
            improved = Some(found);
        }
        let current = improved.as_ref().unwrap_or(self);
        if let Some(found) = current.insert_best(token)? {
            improved = Some(found);
        }
        Ok(improved)
    }

    /// Shift block-opening visits as late as their successors allow.
    pub fn rescheduled(&mut self, token: &CancelToken) -> Result<(), Cancelled> {
        for schedule in &mut self.schedules {
            schedule.reschedule(token)?;
        }
        Ok(())
    }
}
