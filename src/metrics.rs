//! Process-wide counters for every accept/drop/fan-out path, surfaced as
//! JSON by `GET /metrics`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Default)]
pub struct Metrics {
    // Ingest
    pub ingested: AtomicU64,
    pub collapsed: AtomicU64,
    pub scoring_failures: AtomicU64,
    pub score_recomputed: AtomicU64,
    // Alerts
    pub alerts_created: AtomicU64,
    pub alerts_deduped: AtomicU64,
    pub panic_alerts: AtomicU64,
    // Hub
    pub hub_published: AtomicU64,
    pub hub_remote_out: AtomicU64,
    pub hub_remote_in: AtomicU64,
    pub hub_echo_suppressed: AtomicU64,
    pub hub_dropped: AtomicU64,
    pub broker_failures: AtomicU64,
    // Gateway
    pub ws_opened: AtomicU64,
    pub ws_closed: AtomicU64,
    pub ws_closed_idle: AtomicU64,
    pub ws_auth_failures: AtomicU64,
    pub ws_replayed: AtomicU64,
    // Broadcasts
    pub broadcasts_sent: AtomicU64,
    pub broadcast_acks: AtomicU64,
    pub push_submitted: AtomicU64,
    pub sms_submitted: AtomicU64,
    pub notify_failures: AtomicU64,
    // E-FIR
    pub efir_issued: AtomicU64,
    pub efir_verified: AtomicU64,
    pub efir_verify_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub ingested: u64,
    pub collapsed: u64,
    pub scoring_failures: u64,
    pub score_recomputed: u64,
    pub alerts_created: u64,
    pub alerts_deduped: u64,
    pub panic_alerts: u64,
    pub hub_published: u64,
    pub hub_remote_out: u64,
    pub hub_remote_in: u64,
    pub hub_echo_suppressed: u64,
    pub hub_dropped: u64,
    pub broker_failures: u64,
    pub ws_opened: u64,
    pub ws_closed: u64,
    pub ws_closed_idle: u64,
    pub ws_auth_failures: u64,
    pub ws_replayed: u64,
    pub broadcasts_sent: u64,
    pub broadcast_acks: u64,
    pub push_submitted: u64,
    pub sms_submitted: u64,
    pub notify_failures: u64,
    pub efir_issued: u64,
    pub efir_verified: u64,
    pub efir_verify_failures: u64,
}

impl Metrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        let ld = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            ingested: ld(&self.ingested),
            collapsed: ld(&self.collapsed),
            scoring_failures: ld(&self.scoring_failures),
            score_recomputed: ld(&self.score_recomputed),
            alerts_created: ld(&self.alerts_created),
            alerts_deduped: ld(&self.alerts_deduped),
            panic_alerts: ld(&self.panic_alerts),
            hub_published: ld(&self.hub_published),
            hub_remote_out: ld(&self.hub_remote_out),
            hub_remote_in: ld(&self.hub_remote_in),
            hub_echo_suppressed: ld(&self.hub_echo_suppressed),
            hub_dropped: ld(&self.hub_dropped),
            broker_failures: ld(&self.broker_failures),
            ws_opened: ld(&self.ws_opened),
            ws_closed: ld(&self.ws_closed),
            ws_closed_idle: ld(&self.ws_closed_idle),
            ws_auth_failures: ld(&self.ws_auth_failures),
            ws_replayed: ld(&self.ws_replayed),
            broadcasts_sent: ld(&self.broadcasts_sent),
            broadcast_acks: ld(&self.broadcast_acks),
            push_submitted: ld(&self.push_submitted),
            sms_submitted: ld(&self.sms_submitted),
            notify_failures: ld(&self.notify_failures),
            efir_issued: ld(&self.efir_issued),
            efir_verified: ld(&self.efir_verified),
            efir_verify_failures: ld(&self.efir_verify_failures),
        }
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_bumps() {
        let m = Metrics::new();
        Metrics::bump(&m.ingested);
        Metrics::bump(&m.ingested);
        Metrics::add(&m.hub_dropped, 5);
        let s = m.snapshot();
        assert_eq!(s.ingested, 2);
        assert_eq!(s.hub_dropped, 5);
        assert_eq!(s.alerts_created, 0);
    }
}
