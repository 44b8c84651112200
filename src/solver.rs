//! Parallel ALNS solve under a wall-clock deadline.

use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::alns::{AlnsConfig, AlnsFramework};
use crate::cancel::CancelToken;
use crate::error::{Cancelled, PlannerError};
use crate::model::Item;
use crate::operators::RepairKind;
use crate::problem::Problem;
use crate::solution::Solution;

#[derive(Debug, Clone)]
pub struct SolveOptions {
    /// Wall-clock budget for the whole solve.
    pub run_time_limit: Duration,
    /// Independent ALNS workers.
    pub workers: usize,
    /// Worker `i` seeds its RNG with `seed + i`.
    pub seed: u64,
    pub alns: AlnsConfig,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            run_time_limit: crate::options::DEFAULT_RUN_TIME_LIMIT,
            workers: default_workers(),
            seed: 0,
            alns: AlnsConfig::default(),
        }
    }
}

impl SolveOptions {
    /// Defaults with the run-time limit taken from the request.
    pub fn for_problem(problem: &Problem) -> Self {
        Self {
            run_time_limit: problem.options.run_time_limit,
            ..Self::default()
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_alns(mut self, alns: AlnsConfig) -> Self {
        self.alns = alns;
        self
    }
}

/// One worker unless `IS_PROD` is set, then all cores but one.
fn default_workers() -> usize {
    if std::env::var_os("IS_PROD").is_none() {
        return 1;
    }
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

impl Problem {
    /// Solve with the request's run-time limit and default search parameters.
    pub fn solve_by_alns(&self) -> Result<Solution<'_>, PlannerError> {
        self.solve_with(&SolveOptions::for_problem(self))
    }

    #[tracing::instrument(skip_all, fields(board = %self.board_id, tasks = self.tasks.len(), technicians = self.technicians.len()))]
    pub fn solve_with(&self, options: &SolveOptions) -> Result<Solution<'_>, PlannerError> {
        options.alns.validate()?;
        let started = Instant::now();
        let token = CancelToken::with_deadline(options.run_time_limit);
        info!(workers = options.workers, limit_secs = options.run_time_limit.as_secs_f64(), "solve started");

        let initial = construct(self, &token);
        let working: f64 = initial.schedules().iter().map(|s| s.working_minutes()).sum();
        let served: f64 = initial.schedules().iter().map(|s| s.served_minutes()).sum();
        self.set_ideal_workload(if working > 0.0 { served / working } else { 0.0 });
        debug!(
            objective = initial.objective(),
            unserved = initial.unserved_tasks().len(),
            remaining = ?token.remaining(),
            "constructive solution ready"
        );

        let workers = options.workers.max(1);
        let run = |index: usize| {
            let rng = StdRng::seed_from_u64(options.seed.wrapping_add(index as u64));
            let best = AlnsFramework::new(&options.alns, &token, rng).run(initial.clone());
            debug!(worker = index, objective = best.objective(), "worker finished");
            best
        };
        let results: Vec<Solution<'_>> = match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => pool.install(|| (0..workers).into_par_iter().map(run).collect()),
            Err(err) => {
                warn!(%err, "falling back to the global thread pool");
                (0..workers).into_par_iter().map(run).collect()
            }
        };
        if token.is_cancelled() {
            warn!("deadline reached, returning best solution found");
        }

        let best = results
            .into_iter()
            .reduce(|best, other| if best.is_worse_than(&other) { other } else { best })
            .unwrap_or(initial);
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            objective = best.objective(),
            served = best.served_tasks().len(),
            unserved = best.unserved_tasks().len(),
            "solve finished"
        );
        Ok(best)
    }
}

// ============================================================================
// Constructive heuristic
// ============================================================================

/// Place fixed tasks, then serve tasks by ascending score and slots by
/// ascending expected revenue, merged.
///
/// Fixed tasks are placed even when the token has already tripped. A deadline
/// later in the pass keeps whatever was served up to that point.
pub fn construct<'p>(problem: &'p Problem, token: &CancelToken) -> Solution<'p> {
    let mut order: Vec<(f64, Item)> = problem
        .tasks
        .iter()
        .enumerate()
        .map(|(i, task)| (task.score, Item::Task(i)))
        .chain(
            problem
                .slots
                .iter()
                .enumerate()
                .map(|(i, slot)| (problem.masters[slot.master].expected_revenue, Item::Slot(i))),
        )
        .collect();
    order.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut solution = Solution::new(problem);
    let outcome = place_fixed(&mut solution, &order, &CancelToken::new())
        .and_then(|()| serve_in_order(&mut solution, &order, token));
    if let Err(Cancelled) = outcome {
        warn!(
            served = solution.served_tasks().len(),
            "deadline reached during construction, keeping the partial solution"
        );
    }
    solution.take_changes();
    solution
}

fn place_fixed(solution: &mut Solution<'_>, order: &[(f64, Item)], token: &CancelToken) -> Result<(), Cancelled> {
    let problem = solution.problem();
    for &(_, item) in order {
        if let Item::Task(t) = item {
            if problem.tasks[t].is_fixed() {
                solution.assign_fixed(t, token)?;
            }
        }
    }
    Ok(())
}

fn serve_in_order(solution: &mut Solution<'_>, order: &[(f64, Item)], token: &CancelToken) -> Result<(), Cancelled> {
    let problem = solution.problem();
    // Greedy choice never draws; the RNG only satisfies the signature.
    let mut rng = StdRng::seed_from_u64(0);
    for &(_, item) in order {
        token.check()?;
        match item {
            Item::Task(t) if problem.tasks[t].is_fixed() => {}
            Item::Task(t) => {
                solution.serve_task(t, RepairKind::Greedy, &mut rng, token)?;
            }
            Item::Slot(s) => {
                if solution.is_slot_unserved(s) {
                    solution.serve_slot(s, RepairKind::Greedy, &mut rng, token)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{appointment, business_unit, pinned_to, request, uniform_matrix};

    #[test]
    fn test_construct_serves_by_score_and_fills_quota() {
        let mut req = request(&["t1", "t2"]);
        req.appointments
            .push(pinned_to(appointment("fixed", 60, &["t1"]), &["t1"], (9, 0)));
        req.appointments.push(appointment("a", 60, &["t1", "t2"]));
        req.business_units.push(business_unit("bu", 2, 60, &["t1", "t2"]));
        uniform_matrix(&mut req, 10, 1.0);
        let problem = Problem::from_request(&req).unwrap();

        let solution = construct(&problem, &CancelToken::new());
        assert!(solution.unserved_tasks().is_empty());
        assert!(solution.is_master_served(0));
        assert_eq!(solution.technician_of(Item::Task(0)), Some(0));
    }

    #[test]
    fn test_solve_reports_ideal_workload() {
        let mut req = request(&["t1"]);
        req.appointments.push(appointment("a", 54, &["t1"]));
        uniform_matrix(&mut req, 10, 1.0);
        let problem = Problem::from_request(&req).unwrap();

        let options = SolveOptions::for_problem(&problem)
            .with_workers(1)
            .with_alns(AlnsConfig::default().with_iterations(5, 5));
        let solution = problem.solve_with(&options).unwrap();
        assert!(solution.unserved_tasks().is_empty());
        assert!((problem.ideal_workload() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_tripped_token_still_places_fixed_tasks() {
        let mut req = request(&["t1", "t2"]);
        req.appointments
            .push(pinned_to(appointment("fixed", 60, &["t1", "t2"]), &["t1"], (9, 0)));
        req.appointments.push(appointment("a", 60, &["t1", "t2"]));
        uniform_matrix(&mut req, 10, 1.0);
        let problem = Problem::from_request(&req).unwrap();
        let token = CancelToken::new();
        token.cancel();

        let solution = construct(&problem, &token);
        assert_eq!(solution.technician_of(Item::Task(0)), Some(0));
        assert!(!solution.is_served(Item::Task(1)));
    }

    #[test]
    fn test_second_solve_keeps_the_first_ideal_workload() {
        let mut req = request(&["t1"]);
        req.appointments.push(appointment("a", 54, &["t1"]));
        uniform_matrix(&mut req, 10, 1.0);
        let problem = Problem::from_request(&req).unwrap();
        let options = SolveOptions::for_problem(&problem)
            .with_workers(1)
            .with_alns(AlnsConfig::default().with_iterations(5, 5));

        problem.solve_with(&options).unwrap();
        let first = problem.ideal_workload();
        problem.set_ideal_workload(0.9);
        problem.solve_with(&options).unwrap();
        assert_eq!(problem.ideal_workload(), first);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let req = request(&["t1"]);
        let problem = Problem::from_request(&req).unwrap();
        let options = SolveOptions::default().with_alns(AlnsConfig::default().with_temperature(0.9, 2.0));
        assert!(matches!(problem.solve_with(&options), Err(PlannerError::InvalidConfig(_))));
    }
}
