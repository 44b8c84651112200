//! Solve one dispatch request file and print the response document.
//!
//! Usage: `dispatch-planner <request.json> [response.json]`

use std::path::PathBuf;

use dispatch_planner::error::PlannerError;
use dispatch_planner::problem::Problem;
use dispatch_planner::request::DispatchRequest;
use dispatch_planner::response::DispatchResponse;
use tracing_subscriber::EnvFilter;

fn enable_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<(), PlannerError> {
    let mut args = std::env::args_os().skip(1);
    let input = args
        .next()
        .map(PathBuf::from)
        .ok_or_else(|| PlannerError::InvalidInput("usage: dispatch-planner <request.json> [response.json]".into()))?;
    let output = args.next().map(PathBuf::from);

    let raw = std::fs::read_to_string(&input)?;
    let request = DispatchRequest::from_json(&raw)?;
    let problem = Problem::from_request(&request)?;
    tracing::info!(
        path = %input.display(),
        tasks = problem.tasks.len(),
        technicians = problem.technicians.len(),
        slots = problem.slots.len(),
        "request loaded"
    );

    let solution = problem.solve_by_alns()?;
    let json = DispatchResponse::from_solution(&solution).to_json_pretty()?;
    match output {
        Some(path) => {
            std::fs::write(&path, json)?;
            tracing::info!(path = %path.display(), "response written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn main() {
    enable_tracing();
    if let Err(err) = run() {
        tracing::error!(%err, "dispatch planning failed");
        std::process::exit(1);
    }
}
