//! Seams between the engine and its data sources.

use std::collections::HashMap;
use std::fmt;

/// Provides point-to-point driving time and distance between locations.
///
/// Locations are identified by their coordinate key. `None` means the leg is
/// unknown and is treated as unreachable by the engine.
pub trait TravelMatrix: Send + Sync {
    /// Driving time in seconds.
    fn duration(&self, from: &str, to: &str) -> Option<i64>;

    fn distance(&self, from: &str, to: &str) -> Option<f64>;

    /// Mean of all known durations in seconds, used for normalization targets.
    fn mean_duration(&self) -> Option<f64>;
}

/// Nested lookup tables keyed `from -> to`, as delivered by the request.
#[derive(Debug, Clone, Default)]
pub struct TableMatrix {
    pub duration: HashMap<String, HashMap<String, i64>>,
    pub distance: HashMap<String, HashMap<String, f64>>,
}

impl TravelMatrix for TableMatrix {
    fn duration(&self, from: &str, to: &str) -> Option<i64> {
        self.duration.get(from).and_then(|row| row.get(to)).copied()
    }

    fn distance(&self, from: &str, to: &str) -> Option<f64> {
        self.distance.get(from).and_then(|row| row.get(to)).copied()
    }

    fn mean_duration(&self) -> Option<f64> {
        let (sum, count) = self
            .duration
            .values()
            .flat_map(|row| row.values())
            .fold((0.0, 0usize), |(sum, count), &secs| (sum + secs as f64, count + 1));
        (count > 0).then(|| sum / count as f64)
    }
}

/// Why an item ended up outside every schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnservedReason {
    NoSkilledTechnician,
    NoZoneCompatibleTechnician,
    NoFeasibleTechnician,
    NoTechnicianForBusinessUnit,
    /// Taken out by the named destroy operator and not re-inserted.
    Removed(&'static str),
}

impl fmt::Display for UnservedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnservedReason::NoSkilledTechnician => {
                write!(f, "No eligible technician in terms of skill compatibility.")
            }
            UnservedReason::NoZoneCompatibleTechnician => {
                write!(f, "No eligible technician in terms of zone compatibility.")
            }
            UnservedReason::NoFeasibleTechnician => {
                write!(f, "No eligible technician in terms of time or zone compatibility.")
            }
            UnservedReason::NoTechnicianForBusinessUnit => {
                write!(f, "BU: No eligible technician in the input.")
            }
            UnservedReason::Removed(operator) => write!(
                f,
                "Removed in {operator} destroy operation of ALNS but couldn't be assigned later."
            ),
        }
    }
}
