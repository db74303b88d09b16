use copter_proto::{params, Event};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct WatchdogConfig {
    /// `host:port` probed with a TCP connect.
    pub address: String,
    pub interval: Duration,
    pub max_failures: u32,
}

impl WatchdogConfig {
    /// `None` when no probe address is configured.
    pub fn from_params(root: &Value) -> Option<Self> {
        let Some(address) = params::str_param(root, "network_watchdog_params.CHECK_ADDRESS") else {
            warn!("network watchdog disabled: network_watchdog_params.CHECK_ADDRESS missing");
            return None;
        };
        Some(Self {
            address,
            interval: Duration::from_secs(
                params::u64_param(root, "network_watchdog_params.CHECK_INTERVAL_S", 2).max(1),
            ),
            max_failures: params::u64_param(root, "network_watchdog_params.MAX_FAILURES", 3)
                .clamp(1, u32::MAX as u64) as u32,
        })
    }
}

/// Edge detector over probe outcomes. The link is assumed up at start.
#[derive(Debug, Clone)]
pub struct LinkWatch {
    max_failures: u32,
    failures: u32,
    up: bool,
}

impl LinkWatch {
    pub fn new(max_failures: u32) -> Self {
        Self { max_failures: max_failures.max(1), failures: 0, up: true }
    }

    pub fn observe(&mut self, ok: bool) -> Option<Event> {
        if ok {
            self.failures = 0;
            if !self.up {
                self.up = true;
                return Some(Event::NetworkReconnected);
            }
            return None;
        }
        self.failures = self.failures.saturating_add(1);
        if self.up && self.failures >= self.max_failures {
            self.up = false;
            return Some(Event::NetworkDisconnected);
        }
        None
    }

    pub fn is_up(&self) -> bool {
        self.up
    }
}

async fn probe(address: &str, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!("watchdog: probe {} failed: {}", address, e);
            false
        }
        Err(_) => {
            debug!("watchdog: probe {} timed out", address);
            false
        }
    }
}

pub async fn run_watchdog(cfg: WatchdogConfig, events: mpsc::Sender<Event>, token: CancellationToken) {
    info!("watchdog: probing {} every {:?}", cfg.address, cfg.interval);
    let mut watch = LinkWatch::new(cfg.max_failures);
    let mut tick = tokio::time::interval(cfg.interval);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tick.tick() => {}
        }
        let ok = tokio::select! {
            _ = token.cancelled() => break,
            ok = probe(&cfg.address, cfg.interval) => ok,
        };
        if let Some(ev) = watch.observe(ok) {
            info!("watchdog: {}", ev);
            if events.send(ev).await.is_err() {
                break;
            }
        }
    }
    debug!("watchdog: stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn edges_after_consecutive_failures() {
        let mut w = LinkWatch::new(3);
        assert_eq!(w.observe(false), None);
        assert_eq!(w.observe(true), None);
        assert_eq!(w.observe(false), None);
        assert_eq!(w.observe(false), None);
        assert_eq!(w.observe(false), Some(Event::NetworkDisconnected));
        assert!(!w.is_up());
        assert_eq!(w.observe(false), None);
        assert_eq!(w.observe(true), Some(Event::NetworkReconnected));
        assert_eq!(w.observe(true), None);
    }

    #[test]
    fn disabled_without_address() {
        assert!(WatchdogConfig::from_params(&json!({})).is_none());
        let cfg = WatchdogConfig::from_params(&json!({
            "network_watchdog_params": { "CHECK_ADDRESS": "10.0.0.1:5760", "MAX_FAILURES": 0 }
        }))
        .unwrap();
        assert_eq!(cfg.max_failures, 1);
        assert_eq!(cfg.interval, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn reports_loss_and_recovery_against_a_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, mut rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        let cfg = WatchdogConfig {
            address: addr.to_string(),
            interval: Duration::from_millis(20),
            max_failures: 2,
        };
        let task = tokio::spawn(run_watchdog(cfg, tx, token.clone()));

        assert_eq!(rx.recv().await, Some(Event::NetworkDisconnected));
        let _listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        assert_eq!(rx.recv().await, Some(Event::NetworkReconnected));

        token.cancel();
        task.await.unwrap();
    }
}
