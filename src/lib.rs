//! dispatch-planner
//!
//! Daily technician dispatch: assigns appointments and business-unit buffer
//! slots to technicians with an adaptive large neighbourhood search.

pub mod alns;
pub mod cancel;
pub mod error;
pub mod local_search;
pub mod model;
pub mod operators;
pub mod options;
pub mod problem;
pub mod request;
pub mod response;
pub mod roulette;
pub mod schedule;
pub mod solution;
pub mod solver;
pub mod traits;

#[cfg(test)]
mod test_support;
