//! Compute module - simulation and evolution of ragdoll walkers.

pub mod evolution;
mod generation;
mod individual;
mod ragdoll;
mod trace;

pub use generation::{FrameObserver, FrameView, GenerationRunner, ObservedRun, run_generation};
pub use individual::{DeathCause, Individual, SimulationError};
pub use ragdoll::{Placement, Ragdoll, place_parts};
pub use trace::{IndividualPose, RecorderConfig, TraceRecord, TraceRecorder, TraceStats, read_trace};
