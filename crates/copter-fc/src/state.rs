use std::time::{Duration, Instant};

/// Heartbeat-driven presence with a silence timeout. Both the autopilot
/// connection and the GCS peer are tracked this way.
#[derive(Debug, Clone)]
pub struct Presence {
    timeout: Duration,
    last_seen: Option<Instant>,
    present: bool,
}

impl Presence {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, last_seen: None, present: false }
    }

    /// Returns true on the absent -> present edge.
    pub fn seen(&mut self, now: Instant) -> bool {
        self.last_seen = Some(now);
        let rising = !self.present;
        self.present = true;
        rising
    }

    /// Returns true on the present -> absent edge.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.last_seen {
            Some(t) if self.present && now.duration_since(t) >= self.timeout => {
                self.present = false;
                true
            }
            _ => false,
        }
    }

    pub fn is_present(&self) -> bool {
        self.present
    }

    pub fn age(&self) -> Option<Duration> {
        self.last_seen.map(|t| t.elapsed())
    }
}

#[derive(Debug, Clone)]
pub struct VehicleStatus {
    pub vehicle: Presence,
    pub peer: Presence,
    pub mode: Option<String>,
    pub armed: bool,
}

impl VehicleStatus {
    pub fn new(vehicle_timeout: Duration, peer_timeout: Duration) -> Self {
        Self {
            vehicle: Presence::new(vehicle_timeout),
            peer: Presence::new(peer_timeout),
            mode: None,
            armed: false,
        }
    }
}
