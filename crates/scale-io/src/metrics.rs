//! Prometheus metrics for the scale bridge.
//!
//! Exchange counters mirror the access serializer's statistics; HTTP metrics
//! are recorded by the facade itself.

use prometheus::{Encoder, Gauge, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::sync::LazyLock;
use std::thread;
use tiny_http::{Header, Response, Server};

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

fn counter(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("valid counter definition");
    if let Err(e) = REGISTRY.register(Box::new(counter.clone())) {
        tracing::warn!(metric = name, error = %e, "Metric registration failed");
    }
    counter
}

fn gauge(name: &str, help: &str) -> Gauge {
    let gauge = Gauge::new(name, help).expect("valid gauge definition");
    if let Err(e) = REGISTRY.register(Box::new(gauge.clone())) {
        tracing::warn!(metric = name, error = %e, "Metric registration failed");
    }
    gauge
}

// ============================================================================
// Device Metrics
// ============================================================================

/// Exchanges performed with the device
pub static EXCHANGES: LazyLock<IntCounter> =
    LazyLock::new(|| counter("scale_exchanges_total", "Exchanges performed with the scale"));

/// Exchanges that ended in an error
pub static EXCHANGE_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "scale_exchange_failures_total",
        "Scale exchanges that failed (I/O, protocol or format errors)",
    )
});

/// Requests answered from the cached reading
pub static CACHE_HITS: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "scale_cache_hits_total",
        "Weight requests served from the cached reading",
    )
});

/// Most recent successfully read weight
pub static LAST_WEIGHT: LazyLock<Gauge> =
    LazyLock::new(|| gauge("scale_last_weight", "Most recent weight read from the scale"));

/// Stability of the most recent reading (1 = unstable)
pub static LAST_UNSTABLE: LazyLock<Gauge> = LazyLock::new(|| {
    gauge(
        "scale_last_unstable",
        "Whether the most recent reading was unstable (1=unstable, 0=stable)",
    )
});

// ============================================================================
// HTTP Metrics
// ============================================================================

pub static HTTP_REQUESTS: LazyLock<IntCounter> =
    LazyLock::new(|| counter("scale_http_requests_total", "Weight requests received over HTTP"));

/// Time from request arrival to response, including any device exchange
pub static HTTP_REQUEST_SECONDS: LazyLock<Histogram> = LazyLock::new(|| {
    let histogram = Histogram::with_opts(
        HistogramOpts::new(
            "scale_http_request_seconds",
            "Weight request latency in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
    )
    .expect("valid histogram definition");
    if let Err(e) = REGISTRY.register(Box::new(histogram.clone())) {
        tracing::warn!(error = %e, "Metric registration failed");
    }
    histogram
});

// ============================================================================
// Metrics HTTP Server
// ============================================================================

/// Render the registry in the Prometheus text format.
pub fn render() -> Result<Vec<u8>, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(buffer)
}

/// Start the metrics HTTP server on the given address.
/// Returns a join handle for the server thread.
pub fn serve_metrics(bind_addr: String) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let server = match Server::http(&bind_addr) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to start metrics server on {}: {}", bind_addr, e);
                return;
            }
        };

        tracing::info!("Metrics server listening on http://{}/metrics", bind_addr);

        for request in server.incoming_requests() {
            let path = request.url().to_string();
            let result = match path.as_str() {
                "/metrics" => match render() {
                    Ok(buffer) => {
                        let mut response = Response::from_data(buffer);
                        if let Ok(header) = Header::from_bytes(
                            &b"Content-Type"[..],
                            &b"text/plain; version=0.0.4"[..],
                        ) {
                            response = response.with_header(header);
                        }
                        request.respond(response)
                    }
                    Err(e) => {
                        tracing::warn!("Failed to encode metrics: {}", e);
                        request.respond(
                            Response::from_string("Internal Server Error").with_status_code(500),
                        )
                    }
                },
                "/health" => request.respond(Response::from_string("OK")),
                _ => request.respond(Response::from_string("Not Found").with_status_code(404)),
            };
            if let Err(e) = result {
                tracing::debug!(error = %e, "Metrics client went away");
            }
        }
    })
}

/// Initialize all metrics (forces lazy initialization)
pub fn init_metrics() {
    let _ = EXCHANGES.get();
    let _ = EXCHANGE_FAILURES.get();
    let _ = CACHE_HITS.get();
    let _ = LAST_WEIGHT.get();
    let _ = LAST_UNSTABLE.get();
    let _ = HTTP_REQUESTS.get();
    let _ = HTTP_REQUEST_SECONDS.get_sample_count();
}
