use serde::{Deserialize, Serialize};

/// Signals delivered by the vehicle runtime and the network watchdog.
/// Transient: each occurrence is consumed once and never replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Event {
    VehicleReady,
    PeerConnected,
    PeerDisconnected,
    NetworkDisconnected,
    NetworkReconnected,
    RecTriggerToggle,
    RebootRequested,
    ShutdownRequested,
}

impl Event {
    pub const ALL: [Event; 8] = [
        Event::VehicleReady,
        Event::PeerConnected,
        Event::PeerDisconnected,
        Event::NetworkDisconnected,
        Event::NetworkReconnected,
        Event::RecTriggerToggle,
        Event::RebootRequested,
        Event::ShutdownRequested,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Event::VehicleReady => "vehicle-ready",
            Event::PeerConnected => "peer-connected",
            Event::PeerDisconnected => "peer-disconnected",
            Event::NetworkDisconnected => "network-disconnected",
            Event::NetworkReconnected => "network-reconnected",
            Event::RecTriggerToggle => "rec-trigger-toggle",
            Event::RebootRequested => "reboot-requested",
            Event::ShutdownRequested => "shutdown-requested",
        }
    }

    /// The OS-level action this event asks for, if any.
    pub fn exit_kind(self) -> Option<ExitKind> {
        match self {
            Event::RebootRequested => Some(ExitKind::Reboot),
            Event::ShutdownRequested => Some(ExitKind::Shutdown),
            _ => None,
        }
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitKind {
    Reboot,
    Shutdown,
}

impl std::fmt::Display for ExitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitKind::Reboot => f.write_str("reboot"),
            ExitKind::Shutdown => f.write_str("shutdown"),
        }
    }
}
