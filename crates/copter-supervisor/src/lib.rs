//! Event-driven supervisor of the companion computer.
//!
//! The [`Supervisor`] receives runtime events and routes them to the
//! [`FailsafeSequencer`], the [`CameraController`] and the
//! [`ShutdownCoordinator`]. All shared flags live in one [`SharedState`].

pub mod camera;
pub mod config;
pub mod doctor;
pub mod failsafe;
pub mod shutdown;
pub mod state;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use camera::CameraController;
pub use config::{ConfigSnapshot, FailsafeSequence, ModeStep};
pub use failsafe::{FailsafeSequencer, SequenceOutcome};
pub use shutdown::{run_exit_action, ExitActions, PowerControl, ShutdownCoordinator, SystemPower};
pub use state::{SharedState, SupervisorState};
pub use supervisor::Supervisor;
