//! Per-technician route construction.
//!
//! A [`TechnicianSchedule`] is never patched in place: every change of its
//! item set re-simulates the technician's whole day, because one insertion can
//! shift every later visit, the lunch break and how the route meets
//! unavailable periods.

use std::cmp::Ordering;

use crate::cancel::CancelToken;
use crate::error::Cancelled;
use crate::model::{Item, MINUTE, Timestamp, UnavailablePeriod};
use crate::problem::Problem;

/// A placed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Visit {
    pub item: Item,
    /// Service start.
    pub arrival: Timestamp,
    /// When the technician left for this item.
    pub dispatch: Timestamp,
}

/// Rule used to pick the next free item during simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Earliest,
    NearestNeighbor,
    ClosestEarliestStart,
    LargestPriorityFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Select(Selection),
    /// Consume items in the given order.
    Ordered,
    /// Ordered, and every item starts exactly at its scheduled start.
    Pinned,
}

/// Cumulative distance and reported drive minutes up to an item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteLeg {
    pub item: Item,
    pub distance: f64,
    pub minutes: i64,
}

#[derive(Debug, Clone)]
struct Route {
    visits: Vec<Visit>,
    lunch_start: Option<Timestamp>,
    before_lunch: Option<Item>,
}

/// Whatever ends the current stretch of free time.
#[derive(Debug, Clone, Copy)]
enum Blocker {
    Unavailable(UnavailablePeriod),
    Fixed { item: Item, start: Timestamp, end: Timestamp },
    EndOfDay(Timestamp),
}

impl Blocker {
    fn start(&self) -> Timestamp {
        match self {
            Blocker::Unavailable(p) => p.start,
            Blocker::Fixed { start, .. } => *start,
            Blocker::EndOfDay(t) => *t,
        }
    }

    fn end(&self) -> Timestamp {
        match self {
            Blocker::Unavailable(p) => p.end,
            Blocker::Fixed { end, .. } => *end,
            Blocker::EndOfDay(t) => *t,
        }
    }
}

/// Outcome of checking the head of an ordered list.
enum HeadFit {
    Fits(i64),
    /// Does not fit before the current blocker, may fit after it.
    Later,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct RouteRank {
    priority: u64,
    profit: f64,
    weighted_start: f64,
}

impl RouteRank {
    /// Higher served priority, then higher profit, then earlier weighted starts.
    fn compare(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.profit.total_cmp(&other.profit))
            .then_with(|| other.weighted_start.total_cmp(&self.weighted_start))
    }
}

#[derive(Debug, Clone)]
pub struct TechnicianSchedule<'p> {
    problem: &'p Problem,
    technician: usize,
    visits: Vec<Visit>,
    lunch_start: Option<Timestamp>,
    before_lunch: Option<Item>,
}

impl<'p> TechnicianSchedule<'p> {
    pub fn new(problem: &'p Problem, technician: usize) -> Self {
        Self {
            problem,
            technician,
            visits: Vec::new(),
            lunch_start: None,
            before_lunch: None,
        }
    }

    pub fn technician(&self) -> usize {
        self.technician
    }

    /// Visits in service order.
    pub fn visits(&self) -> &[Visit] {
        &self.visits
    }

    pub fn items(&self) -> impl Iterator<Item = Item> + '_ {
        self.visits.iter().map(|v| v.item)
    }

    pub fn is_empty(&self) -> bool {
        self.visits.is_empty()
    }

    pub fn contains(&self, item: Item) -> bool {
        self.visits.iter().any(|v| v.item == item)
    }

    pub fn arrival_of(&self, item: Item) -> Option<Timestamp> {
        self.visits.iter().find(|v| v.item == item).map(|v| v.arrival)
    }

    pub fn lunch_start(&self) -> Option<Timestamp> {
        self.lunch_start
    }

    /// Item served right before lunch, when lunch is taken away from the start location.
    pub fn before_lunch(&self) -> Option<Item> {
        self.before_lunch
    }

    /// Add an item to the route and keep the best feasible variant.
    ///
    /// Returns whether the item ended up placed.
    pub fn assign(&mut self, item: Item, token: &CancelToken) -> Result<bool, Cancelled> {
        if self.contains(item) {
            return Ok(true);
        }
        if self.problem.processing_time(item, self.technician).is_none() {
            return Ok(false);
        }
        let current: Vec<Item> = self.items().collect();
        let mut items = current.clone();
        items.push(item);

        if self.problem.options.respect_scheduled_times {
            if let Some(route) = self.generate_fixed_schedule(&items, token)? {
                self.apply(route);
            }
            return Ok(self.contains(item));
        }

        let options = &self.problem.options;
        let mut variants = vec![Selection::Earliest, Selection::ClosestEarliestStart];
        if options.distance_weight > 0.0 {
            variants.push(Selection::NearestNeighbor);
        }
        if options.assign_priority_first || options.minimize_wct {
            variants.push(Selection::LargestPriorityFirst);
        }

        let mut best: Option<(TechnicianSchedule<'p>, RouteRank)> = None;
        let mut consider = |route: Route| {
            let candidate = self.with_route(route);
            let rank = candidate.rank();
            let replace = match &best {
                Some((_, best_rank)) => rank.compare(best_rank) != Ordering::Less,
                None => true,
            };
            if replace {
                best = Some((candidate, rank));
            }
        };

        for selection in variants {
            if let Some(route) = self.simulate(&items, Mode::Select(selection), token)? {
                consider(route);
            }
        }
        for position in 0..=current.len() {
            let mut order = current.clone();
            order.insert(position, item);
            if let Some(route) = self.simulate(&order, Mode::Ordered, token)? {
                consider(route);
            }
        }

        match best {
            Some((schedule, _)) => {
                *self = schedule;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drop an item and rebuild the route from scratch.
    ///
    /// Returns whether the item was taken out. The schedule is left untouched
    /// when the item is absent or the remaining items no longer form a route.
    pub fn remove(&mut self, item: Item, token: &CancelToken) -> Result<bool, Cancelled> {
        if !self.contains(item) {
            return Ok(false);
        }
        let remaining: Vec<Item> = self.items().filter(|&i| i != item).collect();

        let rebuilt = if self.problem.options.respect_scheduled_times {
            let mut order = remaining.clone();
            order.sort_by_key(|&i| self.scheduled_start(i));
            self.simulate(&order, Mode::Pinned, token)?
        } else {
            match self.simulate(&remaining, Mode::Select(Selection::Earliest), token)? {
                Some(route) => Some(route),
                None => self.simulate(&remaining, Mode::Ordered, token)?,
            }
        };

        match rebuilt {
            Some(route) => {
                self.apply(route);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Start from the fixed items and add the others by descending priority,
    /// keeping each one only if every item still starts at its scheduled time.
    fn generate_fixed_schedule(
        &self,
        items: &[Item],
        token: &CancelToken,
    ) -> Result<Option<Route>, Cancelled> {
        let mut order: Vec<Item> = items
            .iter()
            .copied()
            .filter(|&i| self.problem.is_fixed(i))
            .collect();
        order.sort_by_key(|&i| self.scheduled_start(i));

        let mut by_priority: Vec<Item> = items
            .iter()
            .copied()
            .filter(|&i| !self.problem.is_fixed(i))
            .collect();
        by_priority.sort_by_key(|&i| std::cmp::Reverse(self.problem.priority(i).max(1)));

        let mut route = self.simulate(&order, Mode::Pinned, token)?;
        for item in by_priority {
            let mut candidate = order.clone();
            candidate.push(item);
            candidate.sort_by_key(|&i| self.scheduled_start(i));
            if let Some(found) = self.simulate(&candidate, Mode::Pinned, token)? {
                order = candidate;
                route = Some(found);
            }
        }
        Ok(route)
    }

    /// Shift items that open a block of work (first of the day, or first after
    /// an unavailable period) as late as their successor allows.
    ///
    /// The set and order of visited items never changes.
    pub fn reschedule(&mut self, token: &CancelToken) -> Result<(), Cancelled> {
        let problem = self.problem;
        let tech = &problem.technicians[self.technician];
        let day_start = problem.options.horizon_start.max(tech.start);

        let mut from = 0usize;
        let mut t = day_start;
        let mut location: &str = &tech.location;
        let mut first = true;

        loop {
            token.check()?;
            self.visits.sort_by_key(|v| v.arrival);
            let occupancies = self.occupancies(day_start);
            let mut post_slack = vec![0i64; occupancies.len()];
            let mut ending = vec![location; occupancies.len()];

            for i in from..occupancies.len() {
                match occupancies[i] {
                    Occupancy::Away(period) => {
                        t = t.max(period.end);
                        location = problem.exit_location(self.technician, &period, location);
                    }
                    Occupancy::Visit(vi) => {
                        let item = self.visits[vi].item;
                        let target = destination(problem, item, location);
                        let drive = if first || !item.is_task() {
                            0
                        } else {
                            problem.drive_seconds(location, target, false)
                        };
                        let arrival = match self.anchor(item) {
                            Some(anchor) => anchor,
                            None => self
                                .clamp_arrival(item, t + drive)
                                .max(self.visits[vi].arrival),
                        };
                        self.visits[vi].arrival = arrival;

                        if i > from {
                            if let Occupancy::Visit(pi) = occupancies[i - 1] {
                                if let Some(slack) = self.post_slack(pi, arrival, drive) {
                                    post_slack[i - 1] = slack;
                                }
                            }
                        }

                        location = target;
                        t = arrival + self.processing(item);
                        first = false;
                    }
                }
                ending[i] = location;
            }

            let last = occupancies.len().saturating_sub(1);
            let opener = (from..last).find(|&i| {
                matches!(occupancies[i], Occupancy::Visit(_))
                    && post_slack[i] > 0
                    && (i == 0 || matches!(occupancies[i - 1], Occupancy::Away(_)))
            });
            let Some(i) = opener else {
                break;
            };
            if let Occupancy::Visit(vi) = occupancies[i] {
                self.visits[vi].arrival += post_slack[i];
                t = self.visits[vi].arrival + self.processing(self.visits[vi].item);
            }
            location = ending[i];
            from = i + 1;
        }
        self.visits.sort_by_key(|v| v.arrival);
        Ok(())
    }

    /// Seconds the visit at `index` could start later and still reach the next
    /// stop at `next_arrival`.
    fn post_slack(&self, index: usize, next_arrival: Timestamp, drive: i64) -> Option<i64> {
        let visit = self.visits[index];
        if self.anchor(visit.item).is_some() {
            return None;
        }
        let processing = self.processing(visit.item);
        let mut latest = next_arrival - drive - processing;
        if let Item::Task(x) = visit.item {
            latest = latest.min(self.problem.tasks[x].window_end);
        }
        if let Some(lunch) = self.lunch_start {
            if visit.arrival + processing <= lunch {
                latest = latest.min(lunch - processing);
            }
        }
        Some(latest - visit.arrival)
    }

    fn occupancies(&self, day_start: Timestamp) -> Vec<Occupancy> {
        let tech = &self.problem.technicians[self.technician];
        let mut spans: Vec<(Timestamp, Timestamp, Occupancy)> = self
            .visits
            .iter()
            .enumerate()
            .map(|(i, v)| (v.arrival, v.arrival + self.processing(v.item), Occupancy::Visit(i)))
            .collect();
        spans.extend(
            tech.unavailable
                .iter()
                .filter(|p| p.end > day_start && p.start < tech.end)
                .map(|p| (p.start, p.end, Occupancy::Away(*p))),
        );
        spans.sort_by_key(|(start, end, _)| (*start, *end));
        spans.into_iter().map(|(_, _, o)| o).collect()
    }

    fn with_route(&self, route: Route) -> TechnicianSchedule<'p> {
        let mut schedule = TechnicianSchedule::new(self.problem, self.technician);
        schedule.apply(route);
        schedule
    }

    fn apply(&mut self, route: Route) {
        self.visits = route.visits;
        self.visits.sort_by_key(|v| v.arrival);
        self.lunch_start = route.lunch_start;
        self.before_lunch = route.before_lunch;
    }

    fn rank(&self) -> RouteRank {
        RouteRank {
            priority: self.served_priority(),
            profit: self.revenue() - self.cost(),
            weighted_start: self.weighted_start_minutes(),
        }
    }

    fn processing(&self, item: Item) -> i64 {
        self.problem.processing_time(item, self.technician).unwrap_or(0)
    }

    fn scheduled_start(&self, item: Item) -> Timestamp {
        match item {
            Item::Task(x) => {
                let task = &self.problem.tasks[x];
                task.scheduled_start.unwrap_or(task.window_start)
            }
            Item::Slot(_) => Timestamp::MAX,
        }
    }

    /// Start time an item may not leave.
    fn anchor(&self, item: Item) -> Option<Timestamp> {
        let Item::Task(x) = item else {
            return None;
        };
        let task = &self.problem.tasks[x];
        if task.is_fixed() || self.problem.options.respect_scheduled_times {
            task.scheduled_start
        } else {
            None
        }
    }

    fn clamp_arrival(&self, item: Item, arrival: Timestamp) -> Timestamp {
        match item {
            Item::Task(x) => {
                let task = &self.problem.tasks[x];
                let arrival = arrival.max(task.window_start);
                if task.is_fixed() {
                    arrival
                } else {
                    arrival.max(self.problem.options.horizon_start)
                }
            }
            Item::Slot(_) => arrival,
        }
    }

    fn next_blocker(&self, t: Timestamp) -> Blocker {
        let tech = &self.problem.technicians[self.technician];
        match tech.next_unavailable(t) {
            Some(period) => Blocker::Unavailable(*period),
            None => Blocker::EndOfDay(tech.end),
        }
    }

    /// Start of the next unavailability, fixed item or end of day after `t`.
    fn free_until(&self, t: Timestamp, fixed: &[Item]) -> Timestamp {
        let blocker = self.next_blocker(t).start();
        match fixed.first() {
            Some(&next) => blocker.min(self.scheduled_start(next)),
            None => blocker,
        }
    }

    fn dispatch_allowed(&self, drive: i64, distance: f64) -> bool {
        let options = &self.problem.options;
        drive / MINUTE <= options.dispatch_minutes && distance <= options.dispatch_distance
    }

    /// Drive seconds if a free item can be served next from `location` at `t`.
    fn fits(&self, item: Item, t: Timestamp, location: &str, first: bool, limit: Timestamp) -> Option<i64> {
        let duration = self.problem.processing_time(item, self.technician)?;
        match item {
            Item::Task(x) => {
                let task = &self.problem.tasks[x];
                let drive = if first {
                    0
                } else {
                    self.problem.drive_seconds(location, &task.location, false)
                };
                let distance = self.problem.travel_cost(location, &task.location);
                let fits = t + drive <= task.window_end
                    && t + drive + duration <= limit
                    && task.window_start + drive + duration <= limit
                    && self.dispatch_allowed(drive, distance);
                fits.then_some(drive)
            }
            Item::Slot(_) => (t + duration <= limit).then_some(0),
        }
    }

    fn check_head(
        &self,
        item: Item,
        t: Timestamp,
        location: &str,
        first: bool,
        mode: Mode,
        blocker: Blocker,
    ) -> HeadFit {
        let Some(duration) = self.problem.processing_time(item, self.technician) else {
            return HeadFit::Never;
        };
        let later = || match blocker {
            Blocker::EndOfDay(_) => HeadFit::Never,
            _ => HeadFit::Later,
        };
        let limit = blocker.start();

        let Item::Task(x) = item else {
            return if t + duration <= limit { HeadFit::Fits(0) } else { later() };
        };
        let task = &self.problem.tasks[x];
        let drive = if first {
            0
        } else {
            self.problem.drive_seconds(location, &task.location, false)
        };
        let distance = self.problem.travel_cost(location, &task.location);
        if t + drive > task.window_end || !self.dispatch_allowed(drive, distance) {
            return HeadFit::Never;
        }
        let mut start = self.clamp_arrival(item, t + drive);
        if mode == Mode::Pinned {
            if let Some(scheduled) = task.scheduled_start {
                if start > scheduled {
                    return HeadFit::Never;
                }
                start = scheduled;
            }
        }
        if start + duration > limit {
            return later();
        }
        HeadFit::Fits(drive)
    }

    /// Simulate the technician's day over `items`.
    ///
    /// Returns `None` when any item cannot be placed.
    fn simulate(&self, items: &[Item], mode: Mode, token: &CancelToken) -> Result<Option<Route>, Cancelled> {
        let problem = self.problem;
        let options = &problem.options;
        let tech = &problem.technicians[self.technician];
        let lunch = options.lunch;

        let start_location = tech.location.as_str();
        let mut location = start_location;
        let mut t = options.horizon_start.max(tech.start);
        if let Some(period) = tech.unavailable_at(t) {
            t = period.end;
        }

        let mut lunch_taken = !options.lunch_enabled();
        let mut lunch_postponed = false;
        let mut lunch_start: Option<Timestamp> = None;
        let mut before_lunch: Option<Item> = None;

        let (mut fixed, mut free): (Vec<Item>, Vec<Item>) =
            items.iter().copied().partition(|&i| problem.is_fixed(i));
        fixed.sort_by_key(|&i| self.scheduled_start(i));

        let mut visits: Vec<Visit> = Vec::with_capacity(items.len());
        let mut busy_until = t;
        let mut first = true;

        while t < tech.end {
            token.check()?;

            let mut blocker = self.next_blocker(t);
            if let Blocker::Unavailable(period) = blocker {
                if period.start <= t {
                    t = period.end;
                    location = problem.exit_location(self.technician, &period, location);
                    continue;
                }
            }
            if let Some(&next_fixed) = fixed.first() {
                let start = self.scheduled_start(next_fixed);
                if start < blocker.start() {
                    blocker = Blocker::Fixed {
                        item: next_fixed,
                        start,
                        end: start + self.processing(next_fixed),
                    };
                }
            }
            let limit = blocker.start();

            let pick = match mode {
                Mode::Select(selection) => {
                    let expired = free.iter().any(|&i| match i {
                        Item::Task(x) => problem.tasks[x].window_end < t,
                        Item::Slot(_) => false,
                    });
                    if expired {
                        return Ok(None);
                    }
                    let mut candidates: Vec<(Item, i64)> = free
                        .iter()
                        .filter_map(|&i| self.fits(i, t, location, first, limit).map(|d| (i, d)))
                        .collect();
                    self.order_candidates(&mut candidates, selection, t);
                    candidates.first().copied()
                }
                Mode::Ordered | Mode::Pinned => match free.first() {
                    None => None,
                    Some(&head) => match self.check_head(head, t, location, first, mode, blocker) {
                        HeadFit::Fits(drive) => Some((head, drive)),
                        HeadFit::Later => None,
                        HeadFit::Never => return Ok(None),
                    },
                },
            };

            let chosen = match (pick, blocker) {
                (Some(found), _) => Some(found),
                (None, Blocker::Fixed { item, .. }) => {
                    if let (Some(prev), Item::Task(x)) = (visits.last(), item) {
                        let target = &problem.tasks[x];
                        let drive = problem.drive_seconds(location, &target.location, false);
                        let distance = problem.travel_cost(location, &target.location);
                        let stranded = prev.item.is_task()
                            && t + drive >= target.window_end
                            && drive / MINUTE > options.dispatch_minutes
                            && distance > options.dispatch_distance;
                        if stranded {
                            return Ok(None);
                        }
                    }
                    Some((item, 0))
                }
                (None, _) => None,
            };

            match chosen {
                Some((item, drive)) => {
                    let dispatch = t;
                    let is_fixed = problem.is_fixed(item);
                    let mut arrival = if is_fixed {
                        self.scheduled_start(item)
                    } else {
                        let reached = if item.is_task() { t + drive } else { t };
                        let reached = self.clamp_arrival(item, reached);
                        match (mode, self.anchor(item)) {
                            (Mode::Pinned, Some(scheduled)) => scheduled,
                            _ => reached,
                        }
                    };

                    if is_fixed {
                        fixed.retain(|&f| f != item);
                    } else if let Some(pos) = free.iter().position(|&f| f == item) {
                        free.remove(pos);
                    }
                    location = destination(problem, item, location);
                    let processing = self.processing(item);

                    if !lunch_taken && (arrival + processing).max(busy_until) >= lunch.after {
                        let window_end = match item {
                            Item::Task(x) => problem.tasks[x].window_end,
                            Item::Slot(_) => options.horizon_end,
                        };
                        let end_now = (arrival + processing).max(busy_until);
                        let mut placed_around = false;
                        if !first {
                            if dispatch >= lunch.after
                                && end_now >= lunch.before
                                && dispatch + lunch.duration <= window_end
                            {
                                // Break first, then travel; the service moves behind it.
                                let deferred = arrival.max(dispatch + lunch.duration + drive);
                                let movable = !is_fixed && self.anchor(item).is_none();
                                let feasible = deferred == arrival
                                    || (movable
                                        && deferred <= window_end
                                        && deferred + processing <= limit);
                                if feasible {
                                    arrival = deferred;
                                    lunch_start = Some(lunch.after.max(dispatch));
                                    placed_around = true;
                                }
                            } else if dispatch < lunch.after
                                && arrival > lunch.after
                                && lunch.after + lunch.duration <= arrival
                                && dispatch + drive <= lunch.after
                            {
                                // Break fits in the wait before service.
                                lunch_start = Some(lunch.after);
                                placed_around = true;
                            }
                        }
                        visits.push(Visit { item, arrival, dispatch });
                        busy_until = busy_until.max(arrival + processing);
                        t = busy_until;
                        if placed_around {
                            lunch_taken = true;
                        } else if t + lunch.duration <= self.free_until(t, &fixed) {
                            lunch_start = Some(t);
                            t += lunch.duration;
                            lunch_taken = true;
                        } else {
                            // The next blocker leaves no room; retry at the next gap.
                            lunch_postponed = true;
                        }
                        if lunch_taken && lunch_postponed && lunch_start.is_some_and(|s| s > lunch.before) {
                            return Ok(None);
                        }
                        if lunch_taken && location != start_location {
                            before_lunch = latest_before(&visits, lunch_start);
                        }
                    } else {
                        visits.push(Visit { item, arrival, dispatch });
                        busy_until = busy_until.max(arrival + processing);
                        t = busy_until;
                    }
                    first = false;
                    t = t.max(tech.start);
                }
                None => {
                    if !lunch_taken && t >= lunch.after && t + lunch.duration <= limit {
                        if lunch_postponed && t > lunch.before {
                            return Ok(None);
                        }
                        lunch_start = Some(t);
                        t += lunch.duration;
                        lunch_taken = true;
                        if location != start_location {
                            before_lunch = latest_before(&visits, lunch_start);
                        }
                    }
                    t = t.max(blocker.end());
                    if let Blocker::Unavailable(period) = blocker {
                        location = problem.exit_location(self.technician, &period, location);
                    }
                }
            }

            if free.is_empty() && fixed.is_empty() {
                break;
            }
        }

        if !free.is_empty() {
            return Ok(None);
        }
        if !lunch_taken && lunch_postponed {
            if t > lunch.before || t + lunch.duration > self.free_until(t, &fixed) {
                return Ok(None);
            }
            lunch_start = Some(t);
            lunch_taken = true;
            if location != start_location {
                before_lunch = latest_before(&visits, lunch_start);
            }
        }
        for item in fixed {
            let start = self.scheduled_start(item);
            visits.push(Visit { item, arrival: start, dispatch: start });
        }
        if !lunch_taken && options.lunch_enabled() && t <= lunch.after && location != start_location {
            lunch_start = Some(lunch.after);
            before_lunch = latest_before(&visits, lunch_start);
        }

        Ok(Some(Route {
            visits,
            lunch_start,
            before_lunch,
        }))
    }

    fn order_candidates(&self, candidates: &mut [(Item, i64)], selection: Selection, t: Timestamp) {
        let gap = |x: Timestamp| if x <= t { 0 } else { x - t };
        let problem = self.problem;
        match selection {
            Selection::Earliest => candidates.sort_by_key(|&(i, _)| {
                let (start, end) = problem.window(i);
                (gap(end), gap(start))
            }),
            Selection::NearestNeighbor => candidates.sort_by_key(|&(i, drive)| {
                let (start, _) = problem.window(i);
                (drive, gap(start))
            }),
            Selection::ClosestEarliestStart => candidates.sort_by_key(|&(i, _)| {
                let (start, end) = problem.window(i);
                (gap(start), gap(end))
            }),
            Selection::LargestPriorityFirst => candidates.sort_by_key(|&(i, _)| {
                let (start, end) = problem.window(i);
                (std::cmp::Reverse(problem.priority(i)), gap(start), gap(end))
            }),
        }
    }

    // ============================================================================
    // Metrics
    // ============================================================================

    /// Cumulative distance and reported drive minutes at each visit.
    ///
    /// The first leg's drive is not counted.
    pub fn route_legs(&self) -> Vec<RouteLeg> {
        let mut location = self.problem.technicians[self.technician].location.as_str();
        let mut distance = 0.0_f64;
        let mut minutes = 0_i64;
        let mut legs = Vec::with_capacity(self.visits.len());
        for (i, visit) in self.visits.iter().enumerate() {
            if let Item::Task(x) = visit.item {
                let destination = &self.problem.tasks[x].location;
                distance = (distance + self.problem.travel_cost(location, destination)).min(f64::MAX);
                if i > 0 {
                    minutes += self.problem.drive_minutes(location, destination, true);
                }
                location = destination;
            }
            legs.push(RouteLeg {
                item: visit.item,
                distance,
                minutes,
            });
        }
        legs
    }

    fn last_location(&self) -> &str {
        self.visits
            .iter()
            .rev()
            .find_map(|v| match v.item {
                Item::Task(x) => Some(self.problem.tasks[x].location.as_str()),
                Item::Slot(_) => None,
            })
            .unwrap_or(&self.problem.technicians[self.technician].location)
    }

    /// Distance from home over every task and back home.
    pub fn cost(&self) -> f64 {
        let outbound = self.route_legs().last().map_or(0.0, |leg| leg.distance);
        let home = &self.problem.technicians[self.technician].location;
        (outbound + self.problem.travel_cost(self.last_location(), home)).min(f64::MAX)
    }

    pub fn travel_minutes(&self) -> i64 {
        self.route_legs().last().map_or(0, |leg| leg.minutes)
    }

    /// Reported drive minutes from the last task back home.
    pub fn drive_home_minutes(&self) -> i64 {
        if self.visits.is_empty() {
            return 0;
        }
        let home = &self.problem.technicians[self.technician].location;
        self.problem.drive_minutes(self.last_location(), home, true)
    }

    /// Minutes the technician can work within the horizon.
    pub fn working_minutes(&self) -> f64 {
        let problem = self.problem;
        let tech = &problem.technicians[self.technician];
        let start = problem.options.horizon_start.max(tech.start);
        let end = problem.options.horizon_end.min(tech.end);
        let away = tech.unavailable_within(start, end);
        (tech.end - start - away) as f64 / MINUTE as f64
    }

    pub fn served_minutes(&self) -> f64 {
        self.visits
            .iter()
            .map(|v| self.processing(v.item))
            .sum::<i64>() as f64
            / MINUTE as f64
    }

    /// Share of working time spent serving items.
    pub fn workload(&self) -> f64 {
        let working = self.working_minutes();
        if working > 0.0 {
            self.served_minutes() / working
        } else {
            0.0
        }
    }

    pub fn revenue(&self) -> f64 {
        self.visits.iter().map(|v| self.item_revenue(v.item)).sum()
    }

    fn item_revenue(&self, item: Item) -> f64 {
        let problem = self.problem;
        let by_profit = problem.options.scores_by_profit();
        match item {
            Item::Task(x) => {
                let task = &problem.tasks[x];
                if let Some(fixed) = &task.fixed {
                    return fixed.revenue;
                }
                let rev = task.revenue_for(self.technician);
                if by_profit {
                    if task.optimize_for_score {
                        rev
                    } else if rev < -10.0 {
                        -50_000.0
                    } else {
                        0.0
                    }
                } else if task.optimize_for_score && rev >= 0.0 {
                    1000.0
                } else if task.optimize_for_score && rev == -1.0 {
                    0.0
                } else if rev < -1.0 {
                    -50_000.0
                } else {
                    0.0
                }
            }
            Item::Slot(s) => {
                if by_profit {
                    problem.masters[problem.slots[s].master].expected_revenue
                } else {
                    500.0
                }
            }
        }
    }

    pub fn prioritized_revenue(&self) -> f64 {
        let problem = self.problem;
        self.visits
            .iter()
            .map(|v| match v.item {
                Item::Task(x) => {
                    let task = &problem.tasks[x];
                    let rev = task.revenue_for(self.technician);
                    if task.is_fixed() {
                        0.0
                    } else if task.optimize_for_score {
                        task.priority as f64 * rev
                    } else if rev < -10.0 {
                        -50_000.0
                    } else {
                        0.0
                    }
                }
                Item::Slot(s) => problem.masters[problem.slots[s].master].expected_revenue,
            })
            .sum()
    }

    /// Sum of task priority weights on the route.
    pub fn served_priority(&self) -> u64 {
        self.visits
            .iter()
            .map(|v| u64::from(self.problem.priority(v.item)))
            .sum()
    }

    /// Priority-weighted minutes from the horizon start to each task start.
    pub fn weighted_start_minutes(&self) -> f64 {
        let horizon_start = self.problem.options.horizon_start;
        self.visits
            .iter()
            .filter(|v| v.item.is_task())
            .map(|v| {
                self.problem.priority(v.item) as f64 * ((v.arrival - horizon_start) / MINUTE) as f64
            })
            .sum()
    }
}

#[derive(Debug, Clone, Copy)]
enum Occupancy {
    Visit(usize),
    Away(UnavailablePeriod),
}

/// Where the technician stands after serving `item`; slots do not move them.
fn destination<'a>(problem: &'a Problem, item: Item, current: &'a str) -> &'a str {
    match item {
        Item::Task(x) => &problem.tasks[x].location,
        Item::Slot(_) => current,
    }
}

fn latest_before(visits: &[Visit], at: Option<Timestamp>) -> Option<Item> {
    let at = at?;
    visits
        .iter()
        .filter(|v| v.arrival <= at)
        .max_by_key(|v| v.arrival)
        .map(|v| v.item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::LunchBreakRequest;
    use crate::test_support::{
        appointment, at, pinned_to, request, ts, uniform_matrix, with_window,
    };

    fn problem_with(configure: impl FnOnce(&mut crate::request::DispatchRequest)) -> Problem {
        let mut req = request(&["t1"]);
        configure(&mut req);
        uniform_matrix(&mut req, 10, 5.0);
        Problem::from_request(&req).unwrap()
    }

    fn arrivals(schedule: &TechnicianSchedule<'_>) -> Vec<Timestamp> {
        schedule.visits().iter().map(|v| v.arrival).collect()
    }

    #[test]
    fn test_first_visit_skips_drive_and_later_ones_include_it() {
        let problem = problem_with(|req| {
            req.appointments.push(appointment("a", 60, &["t1"]));
            req.appointments.push(appointment("b", 60, &["t1"]));
        });
        let token = CancelToken::new();
        let mut schedule = TechnicianSchedule::new(&problem, 0);
        assert!(schedule.assign(Item::Task(0), &token).unwrap());
        assert!(schedule.assign(Item::Task(1), &token).unwrap());

        assert_eq!(arrivals(&schedule), vec![ts(8, 0), ts(9, 10)]);
        // Two legs out and one back.
        assert_eq!(schedule.cost(), 15.0);
        assert_eq!(schedule.travel_minutes(), 10);
        assert_eq!(schedule.drive_home_minutes(), 10);
    }

    #[test]
    fn test_arrival_waits_for_window_start() {
        let problem = problem_with(|req| {
            req.appointments
                .push(with_window(appointment("a", 30, &["t1"]), (10, 0), (11, 0)));
        });
        let mut schedule = TechnicianSchedule::new(&problem, 0);
        assert!(schedule.assign(Item::Task(0), &CancelToken::new()).unwrap());
        assert_eq!(schedule.arrival_of(Item::Task(0)), Some(ts(10, 0)));
    }

    #[test]
    fn test_unavailable_period_pushes_work_past_it() {
        let problem = problem_with(|req| {
            req.technicians[0].non_availabilities.push(crate::request::StartEnd {
                start: at(9, 0),
                end: at(12, 0),
            });
            req.appointments.push(appointment("a", 120, &["t1"]));
        });
        let mut schedule = TechnicianSchedule::new(&problem, 0);
        assert!(schedule.assign(Item::Task(0), &CancelToken::new()).unwrap());
        assert_eq!(schedule.arrival_of(Item::Task(0)), Some(ts(12, 0)));
    }

    fn order(route: &Route) -> Vec<Item> {
        route.visits.iter().map(|v| v.item).collect()
    }

    fn set_drive(req: &mut crate::request::DispatchRequest, from: &str, to: &str, minutes: i64) {
        req.matrix.duration.get_mut(from).unwrap().insert(to.into(), minutes * 60);
    }

    #[test]
    fn test_nearest_neighbor_follows_the_shortest_drive() {
        let mut req = request(&["t1"]);
        for id in ["a", "b", "c"] {
            req.appointments.push(appointment(id, 30, &["t1"]));
        }
        uniform_matrix(&mut req, 30, 5.0);
        set_drive(&mut req, "loc-a", "loc-c", 5);
        let problem = Problem::from_request(&req).unwrap();
        let token = CancelToken::new();
        let schedule = TechnicianSchedule::new(&problem, 0);
        let items = [Item::Task(0), Item::Task(1), Item::Task(2)];

        let earliest = schedule
            .simulate(&items, Mode::Select(Selection::Earliest), &token)
            .unwrap()
            .unwrap();
        let nearest = schedule
            .simulate(&items, Mode::Select(Selection::NearestNeighbor), &token)
            .unwrap()
            .unwrap();
        assert_eq!(order(&earliest), items.to_vec());
        assert_eq!(order(&nearest), vec![Item::Task(0), Item::Task(2), Item::Task(1)]);
        assert_eq!(nearest.visits[1].arrival, ts(8, 35));
    }

    #[test]
    fn test_largest_priority_first_serves_the_urgent_job_first() {
        let problem = problem_with(|req| {
            req.appointments.push(appointment("routine", 60, &["t1"]));
            let mut urgent = appointment("urgent", 60, &["t1"]);
            urgent.priority = 1;
            req.appointments.push(urgent);
        });
        let token = CancelToken::new();
        let schedule = TechnicianSchedule::new(&problem, 0);
        let items = [Item::Task(0), Item::Task(1)];

        let earliest = schedule
            .simulate(&items, Mode::Select(Selection::Earliest), &token)
            .unwrap()
            .unwrap();
        let urgent_first = schedule
            .simulate(&items, Mode::Select(Selection::LargestPriorityFirst), &token)
            .unwrap()
            .unwrap();
        assert_eq!(order(&earliest), vec![Item::Task(0), Item::Task(1)]);
        assert_eq!(order(&urgent_first), vec![Item::Task(1), Item::Task(0)]);
    }

    #[test]
    fn test_work_resumes_from_the_exit_location_after_unavailability() {
        for (exit, minutes) in [("office", 5), ("home", 30), ("last_job", 15)] {
            let mut req = request(&["t1"]);
            req.options.start_point_after_unavailability = exit.into();
            req.technicians[0].non_availabilities.push(crate::request::StartEnd {
                start: at(9, 0),
                end: at(10, 0),
            });
            req.appointments.push(appointment("a", 60, &["t1"]));
            req.appointments
                .push(with_window(appointment("b", 30, &["t1"]), (10, 0), (12, 0)));
            uniform_matrix(&mut req, 10, 5.0);
            set_drive(&mut req, "office", "loc-b", 5);
            set_drive(&mut req, "home-t1", "loc-b", 30);
            set_drive(&mut req, "loc-a", "loc-b", 15);
            let problem = Problem::from_request(&req).unwrap();
            let schedule = TechnicianSchedule::new(&problem, 0);

            let route = schedule
                .simulate(
                    &[Item::Task(0), Item::Task(1)],
                    Mode::Select(Selection::Earliest),
                    &CancelToken::new(),
                )
                .unwrap()
                .unwrap();
            let arrivals: Vec<Timestamp> = route.visits.iter().map(|v| v.arrival).collect();
            assert_eq!(arrivals, vec![ts(8, 0), ts(10, minutes)], "exit to {exit}");
        }
    }

    #[test]
    fn test_item_longer_than_the_day_is_rejected() {
        let problem = problem_with(|req| {
            req.appointments.push(appointment("a", 600, &["t1"]));
        });
        let mut schedule = TechnicianSchedule::new(&problem, 0);
        assert!(!schedule.assign(Item::Task(0), &CancelToken::new()).unwrap());
        assert!(schedule.is_empty());
    }

    #[test]
    fn test_ineligible_technician_is_rejected() {
        let problem = problem_with(|req| {
            req.technicians.push(crate::request::TechnicianRequest {
                id: "t2".into(),
                home: None,
                work_time: None,
                non_availabilities: Vec::new(),
            });
            req.appointments.push(appointment("a", 30, &["t2"]));
        });
        let mut schedule = TechnicianSchedule::new(&problem, 0);
        assert!(!schedule.assign(Item::Task(0), &CancelToken::new()).unwrap());
    }

    #[test]
    fn test_fixed_task_keeps_its_start_and_free_work_fits_around_it() {
        let problem = problem_with(|req| {
            req.appointments
                .push(pinned_to(appointment("fixed", 60, &["t1"]), &["t1"], (13, 0)));
            req.appointments.push(appointment("free", 60, &["t1"]));
        });
        let token = CancelToken::new();
        let mut schedule = TechnicianSchedule::new(&problem, 0);
        assert!(schedule.assign(Item::Task(0), &token).unwrap());
        assert!(schedule.assign(Item::Task(1), &token).unwrap());

        assert_eq!(schedule.arrival_of(Item::Task(0)), Some(ts(13, 0)));
        assert_eq!(schedule.arrival_of(Item::Task(1)), Some(ts(8, 0)));
    }

    #[test]
    fn test_lunch_taken_after_the_job_that_crosses_the_break() {
        let problem = problem_with(|req| {
            req.options.lunch_break = Some(LunchBreakRequest {
                after: at(12, 0),
                before: at(13, 0),
                duration_in_minutes: 30,
            });
            for id in ["a", "b", "c"] {
                req.appointments.push(appointment(id, 120, &["t1"]));
            }
        });
        let token = CancelToken::new();
        let mut schedule = TechnicianSchedule::new(&problem, 0);
        for task in 0..3 {
            assert!(schedule.assign(Item::Task(task), &token).unwrap());
        }

        assert_eq!(schedule.lunch_start(), Some(ts(12, 10)));
        assert_eq!(arrivals(&schedule), vec![ts(8, 0), ts(10, 10), ts(12, 50)]);
        assert!(schedule.before_lunch().is_some());
    }

    #[test]
    fn test_lunch_waits_for_a_gap_after_a_fixed_task() {
        let problem = problem_with(|req| {
            req.options.lunch_break = Some(LunchBreakRequest {
                after: at(12, 0),
                before: at(14, 0),
                duration_in_minutes: 60,
            });
            req.appointments
                .push(with_window(appointment("a", 60, &["t1"]), (11, 0), (11, 30)));
            req.appointments
                .push(pinned_to(appointment("fixed", 30, &["t1"]), &["t1"], (12, 30)));
        });
        let token = CancelToken::new();
        let mut schedule = TechnicianSchedule::new(&problem, 0);
        assert!(schedule.assign(Item::Task(1), &token).unwrap());
        assert!(schedule.assign(Item::Task(0), &token).unwrap());

        // 12:00 to 12:30 is too short, so lunch follows the fixed task.
        assert_eq!(arrivals(&schedule), vec![ts(11, 0), ts(12, 30)]);
        assert_eq!(schedule.lunch_start(), Some(ts(13, 0)));
    }

    #[test]
    fn test_route_fails_when_postponed_lunch_misses_its_latest_start() {
        let problem = problem_with(|req| {
            req.options.lunch_break = Some(LunchBreakRequest {
                after: at(12, 0),
                before: at(12, 30),
                duration_in_minutes: 60,
            });
            req.appointments
                .push(with_window(appointment("a", 60, &["t1"]), (11, 0), (11, 0)));
            req.appointments
                .push(pinned_to(appointment("fixed", 60, &["t1"]), &["t1"], (12, 30)));
        });
        let token = CancelToken::new();
        let mut schedule = TechnicianSchedule::new(&problem, 0);
        assert!(schedule.assign(Item::Task(1), &token).unwrap());
        assert!(!schedule.assign(Item::Task(0), &token).unwrap());
        assert_eq!(arrivals(&schedule), vec![ts(12, 30)]);
    }

    #[test]
    fn test_arrival_exactly_at_window_end_is_accepted_by_every_mode() {
        let problem = problem_with(|req| {
            req.appointments
                .push(with_window(appointment("a", 30, &["t1"]), (8, 0), (8, 0)));
            req.appointments
                .push(with_window(appointment("b", 30, &["t1"]), (8, 40), (8, 40)));
        });
        let token = CancelToken::new();
        let schedule = TechnicianSchedule::new(&problem, 0);
        let items = [Item::Task(0), Item::Task(1)];

        let selected = schedule
            .simulate(&items, Mode::Select(Selection::Earliest), &token)
            .unwrap()
            .expect("earliest variant reaches both windows");
        let ordered = schedule
            .simulate(&items, Mode::Ordered, &token)
            .unwrap()
            .expect("ordered mode reaches both windows");
        let times = |route: &Route| route.visits.iter().map(|v| v.arrival).collect::<Vec<_>>();
        assert_eq!(times(&selected), vec![ts(8, 0), ts(8, 40)]);
        assert_eq!(times(&ordered), times(&selected));
    }

    #[test]
    fn test_respecting_scheduled_times_pins_every_start() {
        let problem = problem_with(|req| {
            req.options.respect_scheduled_times = true;
            let mut a = appointment("a", 60, &["t1"]);
            a.start = at(9, 0);
            a.end = at(10, 0);
            let mut b = appointment("b", 60, &["t1"]);
            b.start = at(11, 0);
            b.end = at(12, 0);
            let mut clash = appointment("clash", 60, &["t1"]);
            clash.start = at(9, 30);
            clash.end = at(10, 30);
            clash.priority = 5;
            req.appointments.extend([a, b, clash]);
        });
        let token = CancelToken::new();
        let mut schedule = TechnicianSchedule::new(&problem, 0);
        assert!(schedule.assign(Item::Task(0), &token).unwrap());
        assert!(schedule.assign(Item::Task(1), &token).unwrap());
        assert_eq!(arrivals(&schedule), vec![ts(9, 0), ts(11, 0)]);

        assert!(!schedule.assign(Item::Task(2), &token).unwrap());
        assert_eq!(arrivals(&schedule), vec![ts(9, 0), ts(11, 0)]);
    }

    #[test]
    fn test_remove_rebuilds_remaining_route() {
        let problem = problem_with(|req| {
            for id in ["a", "b", "c"] {
                req.appointments.push(appointment(id, 60, &["t1"]));
            }
        });
        let token = CancelToken::new();
        let mut schedule = TechnicianSchedule::new(&problem, 0);
        for task in 0..3 {
            assert!(schedule.assign(Item::Task(task), &token).unwrap());
        }
        let middle = schedule.visits()[1].item;

        assert!(schedule.remove(middle, &token).unwrap());
        assert!(!schedule.contains(middle));
        assert_eq!(arrivals(&schedule), vec![ts(8, 0), ts(9, 10)]);
        assert!(!schedule.remove(middle, &token).unwrap());
    }

    #[test]
    fn test_remove_keeps_route_when_the_rest_cannot_be_rebuilt() {
        let mut req = request(&["t1"]);
        req.options.distance_limit_between_jobs = Some(10.0);
        for id in ["a", "b", "c"] {
            req.appointments.push(appointment(id, 60, &["t1"]));
        }
        uniform_matrix(&mut req, 10, 5.0);
        // a and c are only close to each other through b.
        for (from, to) in [("loc-a", "loc-c"), ("loc-c", "loc-a")] {
            req.matrix.distance.get_mut(from).unwrap().insert(to.into(), 50.0);
        }
        let problem = Problem::from_request(&req).unwrap();
        let token = CancelToken::new();
        let mut schedule = TechnicianSchedule::new(&problem, 0);
        for task in 0..3 {
            assert!(schedule.assign(Item::Task(task), &token).unwrap());
        }
        let before = arrivals(&schedule);

        assert!(!schedule.remove(Item::Task(1), &token).unwrap());
        assert!(schedule.contains(Item::Task(1)));
        assert_eq!(arrivals(&schedule), before);
    }

    #[test]
    fn test_reschedule_moves_opening_job_next_to_its_successor() {
        let problem = problem_with(|req| {
            req.appointments.push(appointment("a", 60, &["t1"]));
            req.appointments
                .push(with_window(appointment("b", 60, &["t1"]), (14, 0), (15, 0)));
        });
        let token = CancelToken::new();
        let mut schedule = TechnicianSchedule::new(&problem, 0);
        assert!(schedule.assign(Item::Task(0), &token).unwrap());
        assert!(schedule.assign(Item::Task(1), &token).unwrap());
        assert_eq!(arrivals(&schedule), vec![ts(8, 0), ts(14, 0)]);

        schedule.reschedule(&token).unwrap();
        assert_eq!(schedule.arrival_of(Item::Task(0)), Some(ts(12, 50)));
        assert_eq!(schedule.arrival_of(Item::Task(1)), Some(ts(14, 0)));
    }

    #[test]
    fn test_workload_is_served_share_of_working_time() {
        let problem = problem_with(|req| {
            req.appointments.push(appointment("a", 54, &["t1"]));
        });
        let mut schedule = TechnicianSchedule::new(&problem, 0);
        assert_eq!(schedule.workload(), 0.0);
        assert!(schedule.assign(Item::Task(0), &CancelToken::new()).unwrap());
        assert_eq!(schedule.working_minutes(), 540.0);
        assert!((schedule.workload() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_cancelled_token_aborts_simulation() {
        let problem = problem_with(|req| {
            req.appointments.push(appointment("a", 60, &["t1"]));
        });
        let token = CancelToken::new();
        token.cancel();
        let mut schedule = TechnicianSchedule::new(&problem, 0);
        assert!(schedule.assign(Item::Task(0), &token).is_err());
    }
}
