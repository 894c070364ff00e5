use scale_core::{ScaleHandle, SerializerStats};
use scale_io::metrics::{
    init_metrics, serve_metrics, CACHE_HITS, EXCHANGES, EXCHANGE_FAILURES, LAST_UNSTABLE,
    LAST_WEIGHT,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::Duration;
use tracing::info;

pub fn init() {
    init_metrics();
}

pub fn start_metrics_server(addr: &Option<String>) -> Option<thread::JoinHandle<()>> {
    addr.as_ref().map(|addr| {
        info!(addr = %addr, "Starting metrics server");
        serve_metrics(addr.clone())
    })
}

/// Counter values already pushed to Prometheus.
#[derive(Debug, Default)]
struct Published {
    exchanges: u64,
    failures: u64,
    cache_hits: u64,
}

impl Published {
    fn publish(&mut self, stats: &SerializerStats) {
        EXCHANGES.inc_by(stats.exchanges.saturating_sub(self.exchanges));
        EXCHANGE_FAILURES.inc_by(stats.exchange_failures.saturating_sub(self.failures));
        CACHE_HITS.inc_by(stats.cache_hits.saturating_sub(self.cache_hits));
        self.exchanges = stats.exchanges;
        self.failures = stats.exchange_failures;
        self.cache_hits = stats.cache_hits;

        if let Some(weight) = stats.last_weight {
            LAST_WEIGHT.set(weight);
            LAST_UNSTABLE.set(if stats.last_unstable { 1.0 } else { 0.0 });
        }
    }
}

pub fn start_metrics_updater(scale: ScaleHandle, stop: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut published = Published::default();
        while !stop.load(Ordering::Relaxed) {
            published.publish(&scale.stats());
            thread::sleep(Duration::from_millis(200));
        }
        published.publish(&scale.stats());
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_deltas_are_added_to_counters() {
        init();
        let mut published = Published::default();
        let before = EXCHANGES.get();

        let mut stats = SerializerStats {
            exchanges: 3,
            last_weight: Some(42.5),
            last_unstable: true,
            ..Default::default()
        };
        published.publish(&stats);
        published.publish(&stats);
        assert_eq!(EXCHANGES.get() - before, 3);

        stats.exchanges = 5;
        published.publish(&stats);
        assert_eq!(EXCHANGES.get() - before, 5);
        assert_eq!(LAST_WEIGHT.get(), 42.5);
        assert_eq!(LAST_UNSTABLE.get(), 1.0);
    }
}
