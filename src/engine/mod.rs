pub mod config;
mod simulation;

pub use config::{BlockPolicy, Schedule, SimulationConfig};
pub use simulation::Simulation;
