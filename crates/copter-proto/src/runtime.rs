use anyhow::Result;

/// What the supervisor needs from the vehicle side of the companion computer.
///
/// Implementations are shared across tasks, so every method takes `&self` and
/// must be cheap: no call here may block on the network.
pub trait VehicleRuntime: Send + Sync {
    fn is_vehicle_connected(&self) -> bool;

    /// A locally attached HMI peripheral suppresses camera auto-start.
    fn is_hmi_device_connected(&self) -> bool;

    /// Current flight mode name as last reported by the autopilot.
    fn vehicle_mode(&self) -> Option<String>;

    fn set_vehicle_mode(&self, mode: &str) -> Result<()>;
}
