use core::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Request counters plus the one counter the wire protocol itself can't
/// surface: TSIG verification failures on inbound messages. Modeled on the
/// teacher's own `Stats` (service/middleware/metric.rs), collapsed into a
/// single struct since Hive has no per-connection middleware stack to hang
/// counters off of.
#[derive(Default)]
pub struct Stats {
    num_reqs: u64,
    num_updates: u64,
    num_transfers: u64,
    tsig_failures: u64,
}

impl Stats {
    pub fn new_shared() -> Arc<RwLock<Stats>> {
        Arc::new(RwLock::new(Stats::default()))
    }

    pub fn record_request(&mut self) {
        self.num_reqs += 1;
    }

    pub fn record_update(&mut self) {
        self.num_updates += 1;
    }

    pub fn record_transfer(&mut self) {
        self.num_transfers += 1;
    }

    pub fn record_tsig_failure(&mut self) {
        self.tsig_failures += 1;
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#reqs={} #updates={} #transfers={} #tsig_failures={}",
            self.num_reqs, self.num_updates, self.num_transfers, self.tsig_failures,
        )
    }
}

pub async fn log_svc(stats: Arc<RwLock<Stats>>) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        log::info!(target: "metrics", "{}", stats.read().unwrap());
    }
}
