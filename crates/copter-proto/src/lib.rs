pub mod event;
pub mod params;
pub mod runtime;

pub use event::{Event, ExitKind};
pub use runtime::VehicleRuntime;
