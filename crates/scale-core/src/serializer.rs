//! Single-flight access to the scale.
//!
//! One worker thread owns the device and the cache of the last outcome.
//! Callers talk to it only through a FIFO mailbox, so at most one exchange is
//! ever in flight and the cache is never shared.

use crate::error::ScaleError;
use crate::reading::ExchangeOutcome;
use log::{debug, info, trace, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

/// Performs one complete exchange with the device.
pub trait Exchanger: Send + 'static {
    fn exchange(&mut self) -> ExchangeOutcome;
}

#[derive(Debug, Clone)]
pub struct SerializerConfig {
    /// A successful reading older than this is refreshed.
    pub staleness: Duration,
    pub thread_name: String,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            staleness: Duration::from_secs(1),
            thread_name: "scale-access".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SerializerStats {
    pub requests_served: u64,
    pub exchanges: u64,
    pub exchange_failures: u64,
    pub cache_hits: u64,
    pub last_weight: Option<f64>,
    pub last_unstable: bool,
}

const NO_READING: u8 = 0;
const STABLE_READING: u8 = 1;
const UNSTABLE_READING: u8 = 2;

#[derive(Debug, Default)]
struct StatsCell {
    requests_served: AtomicU64,
    exchanges: AtomicU64,
    exchange_failures: AtomicU64,
    cache_hits: AtomicU64,
    last_weight_bits: AtomicU64,
    last_reading: AtomicU8,
}

impl StatsCell {
    fn snapshot(&self) -> SerializerStats {
        let last_reading = self.last_reading.load(Ordering::Acquire);
        SerializerStats {
            requests_served: self.requests_served.load(Ordering::Relaxed),
            exchanges: self.exchanges.load(Ordering::Relaxed),
            exchange_failures: self.exchange_failures.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            last_weight: (last_reading != NO_READING)
                .then(|| f64::from_bits(self.last_weight_bits.load(Ordering::Relaxed))),
            last_unstable: last_reading == UNSTABLE_READING,
        }
    }

    fn note_exchange(&self, outcome: &ExchangeOutcome) {
        self.exchanges.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Ok(reading) => {
                self.last_weight_bits
                    .store(reading.weight.to_bits(), Ordering::Relaxed);
                let flag = if reading.unstable {
                    UNSTABLE_READING
                } else {
                    STABLE_READING
                };
                self.last_reading.store(flag, Ordering::Release);
            }
            Err(_) => {
                self.exchange_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Last exchange outcome and when it was attempted. `None` until the first
/// exchange, which forces it.
#[derive(Debug, Default)]
struct CacheState {
    last_outcome: Option<ExchangeOutcome>,
    last_attempt: Option<Instant>,
}

impl CacheState {
    fn is_fresh(&self, now: Instant, staleness: Duration) -> bool {
        match (&self.last_outcome, self.last_attempt) {
            (Some(Ok(_)), Some(at)) => now.saturating_duration_since(at) <= staleness,
            // errors are always stale
            _ => false,
        }
    }
}

struct PendingRequest {
    reply: mpsc::SyncSender<ExchangeOutcome>,
}

enum Command {
    Read(PendingRequest),
    Shutdown,
}

struct AccessWorker<E: Exchanger> {
    exchanger: E,
    staleness: Duration,
    cache: CacheState,
    closed: Arc<AtomicBool>,
    stats: Arc<StatsCell>,
}

impl<E: Exchanger> AccessWorker<E> {
    fn run(mut self, mailbox: mpsc::Receiver<Command>) {
        info!("scale access worker started (staleness {:?})", self.staleness);
        while let Ok(command) = mailbox.recv() {
            match command {
                Command::Read(request) => {
                    let outcome = if self.closed.load(Ordering::Acquire) {
                        Err(ScaleError::Closed)
                    } else {
                        self.serve()
                    };
                    // the caller may have gone away; nothing to do then
                    let _ = request.reply.send(outcome);
                }
                Command::Shutdown => {
                    for command in mailbox.try_iter() {
                        if let Command::Read(request) = command {
                            let _ = request.reply.send(Err(ScaleError::Closed));
                        }
                    }
                    break;
                }
            }
        }
        debug!("scale access worker stopped");
    }

    fn serve(&mut self) -> ExchangeOutcome {
        self.stats.requests_served.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        if self.cache.is_fresh(now, self.staleness) {
            if let Some(outcome) = &self.cache.last_outcome {
                trace!("serving cached reading");
                self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                return outcome.clone();
            }
        }

        let outcome = self.exchanger.exchange();
        match &outcome {
            Ok(reading) => trace!(
                "exchange ok: weight={} unstable={}",
                reading.weight,
                reading.unstable
            ),
            Err(e) => warn!("scale exchange failed: {}", e),
        }
        self.stats.note_exchange(&outcome);
        self.cache.last_outcome = Some(outcome.clone());
        self.cache.last_attempt = Some(Instant::now());
        outcome
    }
}

/// Reply slot for a submitted request.
pub struct ReadingTicket {
    reply: mpsc::Receiver<ExchangeOutcome>,
}

impl ReadingTicket {
    /// Block until the worker answers.
    pub fn wait(self) -> ExchangeOutcome {
        self.reply.recv().unwrap_or(Err(ScaleError::Closed))
    }
}

/// Cloneable client side of the access serializer.
#[derive(Clone)]
pub struct ScaleHandle {
    mailbox: mpsc::Sender<Command>,
    closed: Arc<AtomicBool>,
    stats: Arc<StatsCell>,
}

impl ScaleHandle {
    /// Queue a request without waiting for it.
    pub fn submit(&self) -> Result<ReadingTicket, ScaleError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ScaleError::Closed);
        }
        let (reply, ticket) = mpsc::sync_channel(1);
        self.mailbox
            .send(Command::Read(PendingRequest { reply }))
            .map_err(|_| ScaleError::Closed)?;
        Ok(ReadingTicket { reply: ticket })
    }

    pub fn request_reading(&self) -> ExchangeOutcome {
        self.submit()?.wait()
    }

    /// Stop accepting requests. Requests still queued are answered with
    /// `Closed`; an exchange already in flight completes.
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.mailbox.send(Command::Shutdown);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SerializerStats {
        self.stats.snapshot()
    }
}

pub struct AccessSerializer {
    handle: ScaleHandle,
    worker: Option<thread::JoinHandle<()>>,
}

impl AccessSerializer {
    pub fn spawn<E: Exchanger>(exchanger: E, config: SerializerConfig) -> std::io::Result<Self> {
        let (mailbox, inbox) = mpsc::channel();
        let closed = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(StatsCell::default());

        let worker = AccessWorker {
            exchanger,
            staleness: config.staleness,
            cache: CacheState::default(),
            closed: Arc::clone(&closed),
            stats: Arc::clone(&stats),
        };
        let join = thread::Builder::new()
            .name(config.thread_name)
            .spawn(move || worker.run(inbox))?;

        Ok(Self {
            handle: ScaleHandle {
                mailbox,
                closed,
                stats,
            },
            worker: Some(join),
        })
    }

    pub fn handle(&self) -> ScaleHandle {
        self.handle.clone()
    }

    /// Shut down and wait for the worker to finish its current exchange.
    pub fn join(mut self) {
        self.handle.shutdown();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("scale access worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::reading::WeightReading;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Counts calls, fails the test on re-entrant use, and replays scripted
    /// outcomes (the last one repeats).
    struct CountingExchanger {
        calls: Arc<AtomicUsize>,
        busy: Arc<AtomicBool>,
        script: Vec<ExchangeOutcome>,
        delay: Duration,
    }

    impl CountingExchanger {
        fn new(script: Vec<ExchangeOutcome>) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let exchanger = Self {
                calls: Arc::clone(&calls),
                busy: Arc::new(AtomicBool::new(false)),
                script,
                delay: Duration::ZERO,
            };
            (exchanger, calls)
        }
    }

    impl Exchanger for CountingExchanger {
        fn exchange(&mut self) -> ExchangeOutcome {
            assert!(
                !self.busy.swap(true, Ordering::SeqCst),
                "exchange entered twice"
            );
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            let outcome = self
                .script
                .get(n)
                .or_else(|| self.script.last())
                .cloned()
                .unwrap_or(Ok(WeightReading::stable(n as f64 + 1.0)));
            self.busy.store(false, Ordering::SeqCst);
            outcome
        }
    }

    fn timeout_error() -> ScaleError {
        ScaleError::Io {
            stage: "read ACK",
            message: "timed out".to_string(),
            timed_out: true,
        }
    }

    fn config(staleness: Duration) -> SerializerConfig {
        SerializerConfig {
            staleness,
            ..Default::default()
        }
    }

    #[test]
    fn fresh_reading_is_served_from_cache() {
        let (exchanger, calls) = CountingExchanger::new(vec![Ok(WeightReading::stable(7.5))]);
        let serializer = AccessSerializer::spawn(exchanger, config(Duration::from_secs(60))).unwrap();
        let handle = serializer.handle();

        let first = handle.request_reading();
        let second = handle.request_reading();
        assert_eq!(first, Ok(WeightReading::stable(7.5)));
        assert_eq!(second, first);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = handle.stats();
        assert_eq!(stats.requests_served, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.last_weight, Some(7.5));
        serializer.join();
    }

    #[test]
    fn stale_reading_triggers_new_exchange() {
        let (exchanger, calls) = CountingExchanger::new(Vec::new());
        let serializer =
            AccessSerializer::spawn(exchanger, config(Duration::from_millis(20))).unwrap();
        let handle = serializer.handle();

        assert_eq!(handle.request_reading(), Ok(WeightReading::stable(1.0)));
        thread::sleep(Duration::from_millis(80));
        assert_eq!(handle.request_reading(), Ok(WeightReading::stable(2.0)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        serializer.join();
    }

    #[test]
    fn failed_exchange_is_retried_on_next_request() {
        let (exchanger, calls) = CountingExchanger::new(vec![
            Err(timeout_error()),
            Ok(WeightReading::unstable(3.0)),
        ]);
        let serializer = AccessSerializer::spawn(exchanger, config(Duration::from_secs(60))).unwrap();
        let handle = serializer.handle();

        let first = handle.request_reading().unwrap_err();
        assert_eq!(first.kind(), ErrorKind::Io);
        assert_eq!(handle.request_reading(), Ok(WeightReading::unstable(3.0)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let stats = handle.stats();
        assert_eq!(stats.exchange_failures, 1);
        assert!(stats.last_unstable);
        serializer.join();
    }

    #[test]
    fn requests_are_served_in_submission_order() {
        let (mut exchanger, calls) = CountingExchanger::new(Vec::new());
        exchanger.delay = Duration::from_millis(2);
        let serializer = AccessSerializer::spawn(exchanger, config(Duration::ZERO)).unwrap();
        let handle = serializer.handle();

        let tickets: Vec<_> = (0..10).map(|_| handle.submit().unwrap()).collect();
        let weights: Vec<f64> = tickets
            .into_iter()
            .map(|t| t.wait().unwrap().weight)
            .collect();
        let expected: Vec<f64> = (1..=10).map(|n| n as f64).collect();
        assert_eq!(weights, expected);
        assert_eq!(calls.load(Ordering::SeqCst), 10);
        serializer.join();
    }

    #[test]
    fn concurrent_callers_never_overlap_exchanges() {
        let (mut exchanger, calls) = CountingExchanger::new(Vec::new());
        exchanger.delay = Duration::from_millis(1);
        let serializer = AccessSerializer::spawn(exchanger, config(Duration::ZERO)).unwrap();
        let results = Arc::new(Mutex::new(Vec::new()));

        let callers: Vec<_> = (0..16)
            .map(|_| {
                let handle = serializer.handle();
                let results = Arc::clone(&results);
                thread::spawn(move || {
                    let outcome = handle.request_reading();
                    results.lock().unwrap().push(outcome);
                })
            })
            .collect();
        for caller in callers {
            caller.join().unwrap();
        }

        let results = results.lock().unwrap();
        assert_eq!(results.len(), 16);
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(calls.load(Ordering::SeqCst), 16);
        serializer.join();
    }

    struct GatedExchanger {
        entered: mpsc::Sender<()>,
        release: mpsc::Receiver<()>,
    }

    impl Exchanger for GatedExchanger {
        fn exchange(&mut self) -> ExchangeOutcome {
            let _ = self.entered.send(());
            let _ = self.release.recv();
            Ok(WeightReading::stable(1.0))
        }
    }

    #[test]
    fn shutdown_closes_queued_and_later_requests() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let exchanger = GatedExchanger {
            entered: entered_tx,
            release: release_rx,
        };
        let serializer = AccessSerializer::spawn(exchanger, config(Duration::ZERO)).unwrap();
        let handle = serializer.handle();

        let in_flight = handle.submit().unwrap();
        entered_rx.recv().unwrap();
        let queued_a = handle.submit().unwrap();
        let queued_b = handle.submit().unwrap();

        handle.shutdown();
        release_tx.send(()).unwrap();

        assert_eq!(in_flight.wait(), Ok(WeightReading::stable(1.0)));
        assert_eq!(queued_a.wait(), Err(ScaleError::Closed));
        assert_eq!(queued_b.wait(), Err(ScaleError::Closed));
        assert_eq!(handle.request_reading(), Err(ScaleError::Closed));
        assert!(handle.is_closed());
        serializer.join();
    }

    #[test]
    fn join_closes_every_handle() {
        let (exchanger, _calls) = CountingExchanger::new(Vec::new());
        let serializer = AccessSerializer::spawn(exchanger, config(Duration::ZERO)).unwrap();
        let other = serializer.handle();
        serializer.join();
        assert_eq!(other.request_reading(), Err(ScaleError::Closed));
    }
}
