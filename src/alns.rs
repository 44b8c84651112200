//! Adaptive large neighbourhood search.
//!
//! One [`AlnsFramework`] drives one worker: it owns the worker's RNG and
//! operator weights and hands back the best solution it has seen, including
//! when the deadline cuts the search short.

use rand::Rng;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::{Cancelled, PlannerError};
use crate::local_search::NoChange;
use crate::operators::{DestroyKind, RepairKind};
use crate::roulette::select_operator;
use crate::solution::Solution;

/// Search parameters.
///
/// # Scoring
///
/// An accepted destroy/repair pair earns `score_new_best` (σ1) for a new
/// global best, `score_improved` (σ2) for beating the current solution and
/// `score_accepted` (σ3) otherwise. Every `weight_adjustment_period`
/// iterations each weight becomes `(1 − ρ)·w + ρ·points/uses`.
///
/// # Acceptance
///
/// Simulated annealing with `T0 = ω·|objective| / ln 2`, cooled by `α` after
/// every decision.
#[derive(Debug, Clone)]
pub struct AlnsConfig {
    /// Iteration cap.
    pub iterations: usize,
    /// Stop after this many iterations without a new best.
    pub max_non_improving: usize,
    pub weight_adjustment_period: usize,
    pub relocation_period: usize,
    pub local_search_period: usize,
    pub score_new_best: f64,
    pub score_improved: f64,
    pub score_accepted: f64,
    /// ρ
    pub reaction_factor: f64,
    /// ω
    pub start_temperature_control: f64,
    /// α
    pub cooling_rate: f64,
    pub min_destroy_degree: f64,
    pub max_destroy_degree: f64,
    pub initial_weight: f64,
}

impl Default for AlnsConfig {
    fn default() -> Self {
        Self {
            iterations: 1000,
            max_non_improving: 100,
            weight_adjustment_period: 5,
            relocation_period: 6,
            local_search_period: 5,
            score_new_best: 70.0,
            score_improved: 50.0,
            score_accepted: 20.0,
            reaction_factor: 0.6,
            start_temperature_control: 0.9,
            cooling_rate: 0.99,
            min_destroy_degree: 0.01,
            max_destroy_degree: 0.4,
            initial_weight: 1000.0,
        }
    }
}

impl AlnsConfig {
    pub fn with_iterations(mut self, iterations: usize, max_non_improving: usize) -> Self {
        self.iterations = iterations;
        self.max_non_improving = max_non_improving;
        self
    }

    pub fn with_periods(mut self, adjust: usize, relocation: usize, local_search: usize) -> Self {
        self.weight_adjustment_period = adjust.max(1);
        self.relocation_period = relocation.max(1);
        self.local_search_period = local_search.max(1);
        self
    }

    pub fn with_scores(mut self, new_best: f64, improved: f64, accepted: f64) -> Self {
        self.score_new_best = new_best;
        self.score_improved = improved;
        self.score_accepted = accepted;
        self
    }

    pub fn with_temperature(mut self, omega: f64, alpha: f64) -> Self {
        self.start_temperature_control = omega;
        self.cooling_rate = alpha;
        self
    }

    pub fn with_destroy_degree(mut self, min: f64, max: f64) -> Self {
        self.min_destroy_degree = min.clamp(0.0, 1.0);
        self.max_destroy_degree = max.clamp(self.min_destroy_degree, 1.0);
        self
    }

    pub fn validate(&self) -> Result<(), PlannerError> {
        let invalid = |msg: String| Err(PlannerError::InvalidConfig(msg));
        if self.weight_adjustment_period == 0 || self.relocation_period == 0 || self.local_search_period == 0 {
            return invalid("periods must be positive".into());
        }
        if !(self.reaction_factor > 0.0 && self.reaction_factor <= 1.0) {
            return invalid(format!("reaction_factor must be in (0, 1], got {}", self.reaction_factor));
        }
        if !(self.cooling_rate > 0.0 && self.cooling_rate < 1.0) {
            return invalid(format!("cooling_rate must be in (0, 1), got {}", self.cooling_rate));
        }
        if self.start_temperature_control <= 0.0 {
            return invalid("start_temperature_control must be positive".into());
        }
        if !(0.0..=1.0).contains(&self.min_destroy_degree)
            || !(0.0..=1.0).contains(&self.max_destroy_degree)
            || self.min_destroy_degree > self.max_destroy_degree
        {
            return invalid(format!(
                "destroy degree range [{}, {}] must lie within [0, 1]",
                self.min_destroy_degree, self.max_destroy_degree
            ));
        }
        if self.initial_weight <= 0.0 {
            return invalid("initial_weight must be positive".into());
        }
        Ok(())
    }
}

/// Adaptive weights for `N` operators.
#[derive(Debug, Clone)]
pub struct OperatorWeights<const N: usize> {
    weights: [f64; N],
    points: [f64; N],
    uses: [u32; N],
}

impl<const N: usize> OperatorWeights<N> {
    pub fn new(initial: f64) -> Self {
        Self {
            weights: [initial; N],
            points: [0.0; N],
            uses: [0; N],
        }
    }

    pub fn weights(&self) -> &[f64; N] {
        &self.weights
    }

    pub fn select<R: Rng>(&self, rng: &mut R) -> usize {
        select_operator(&self.weights, rng)
    }

    pub fn used(&mut self, index: usize) {
        self.uses[index] += 1;
    }

    pub fn reward(&mut self, index: usize, points: f64) {
        self.points[index] += points;
    }

    /// Blend each weight with its average reward and reset the counters.
    pub fn adjust(&mut self, reaction: f64) {
        for i in 0..N {
            let average = if self.uses[i] > 0 {
                self.points[i] / f64::from(self.uses[i])
            } else {
                0.0
            };
            self.weights[i] = (1.0 - reaction) * self.weights[i] + reaction * average;
        }
        self.points = [0.0; N];
        self.uses = [0; N];
    }
}

/// Simulated-annealing acceptance.
#[derive(Debug, Clone)]
pub struct Annealing {
    temperature: f64,
    cooling_rate: f64,
}

impl Annealing {
    pub fn new(objective: f64, omega: f64, cooling_rate: f64) -> Self {
        let temperature = if objective == 0.0 || !objective.is_finite() {
            1.0
        } else {
            omega * objective.abs() / std::f64::consts::LN_2
        };
        Self {
            temperature,
            cooling_rate,
        }
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Decide on a candidate and cool down.
    pub fn accepts<R: Rng>(&mut self, current: &Solution<'_>, candidate: &Solution<'_>, rng: &mut R) -> bool {
        let accepted = current.is_worse_than(candidate) || {
            let delta = candidate.objective() - current.objective();
            let probability = (delta / self.temperature).exp();
            rng.random::<f64>() < probability
        };
        self.temperature *= self.cooling_rate;
        accepted
    }
}

pub struct AlnsFramework<'a, R> {
    config: &'a AlnsConfig,
    token: &'a CancelToken,
    rng: R,
}

impl<'a, R: Rng> AlnsFramework<'a, R> {
    pub fn new(config: &'a AlnsConfig, token: &'a CancelToken, rng: R) -> Self {
        Self { config, token, rng }
    }

    /// Improve `initial` until a stopping rule fires and return the best solution seen.
    pub fn run<'p>(&mut self, initial: Solution<'p>) -> Solution<'p> {
        let mut best = initial.clone();
        if let Err(Cancelled) = self.search(initial, &mut best) {
            debug!("search stopped by deadline, keeping best so far");
        }
        best
    }

    fn search<'p>(&mut self, mut current: Solution<'p>, best: &mut Solution<'p>) -> Result<(), Cancelled> {
        let config = self.config;
        let token = self.token;
        let mut destroy = OperatorWeights::<{ DestroyKind::COUNT }>::new(config.initial_weight);
        let mut repair = OperatorWeights::<{ RepairKind::COUNT }>::new(config.initial_weight);
        let mut annealing = Annealing::new(current.objective(), config.start_temperature_control, config.cooling_rate);
        let mut no_change = NoChange::default();
        let mut non_improving = 0usize;

        for iteration in 1..=config.iterations {
            if non_improving > config.max_non_improving {
                debug!(iteration, "no improvement for too long");
                break;
            }
            token.check()?;

            if iteration % config.weight_adjustment_period == 0 {
                destroy.adjust(config.reaction_factor);
                repair.adjust(config.reaction_factor);
            }
            if iteration % config.relocation_period == 0 {
                if let Some(relocated) = current.remove_and_insert_best(&no_change, token)? {
                    current = relocated;
                }
            }
            if iteration % config.local_search_period == 0 {
                let searched = best.local_search(&no_change, token)?;
                if let Some(improved) = searched {
                    if best.is_worse_than(&improved) {
                        *best = improved.clone();
                        debug!(iteration, objective = best.objective(), "local search improved best");
                    }
                    current = improved;
                }
                no_change = NoChange::everything(&current);
            }

            let d = destroy.select(&mut self.rng);
            let r = repair.select(&mut self.rng);
            let degree = self
                .rng
                .random_range(config.min_destroy_degree..=config.max_destroy_degree);

            let mut candidate = current.clone();
            candidate.take_changes();
            candidate.destroy(DestroyKind::ALL[d], degree, &mut self.rng, token)?;
            candidate.repair(RepairKind::ALL[r], &mut self.rng, token)?;
            destroy.used(d);
            repair.used(r);

            if annealing.accepts(&current, &candidate, &mut self.rng) {
                let points = if best.is_worse_than(&candidate) {
                    *best = candidate.clone();
                    non_improving = 1;
                    debug!(
                        iteration,
                        destroy = ?DestroyKind::ALL[d],
                        repair = ?RepairKind::ALL[r],
                        objective = best.objective(),
                        "new best solution"
                    );
                    config.score_new_best
                } else if current.is_worse_than(&candidate) {
                    non_improving += 1;
                    config.score_improved
                } else {
                    non_improving += 1;
                    config.score_accepted
                };
                destroy.reward(d, points);
                repair.reward(r, points);
                no_change.forget(&candidate.take_changes());
                current = candidate;
            } else {
                non_improving += 1;
            }
        }

        loop {
            match best.local_search(&NoChange::default(), token)? {
                Some(improved) if best.is_worse_than(&improved) => *best = improved,
                _ => break,
            }
        }
        let options = &best.problem().options;
        if !options.assign_priority_first && !options.minimize_wct {
            let mut shifted = best.clone();
            shifted.rescheduled(token)?;
            *best = shifted;
        }
        Ok(())
    }
}
