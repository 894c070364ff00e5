//! HTTP facade: every request, whatever its path, is answered with the current
//! reading as JSON. Each request runs on its own thread and blocks on the
//! access serializer.

use crate::metrics::{HTTP_REQUESTS, HTTP_REQUEST_SECONDS};
use crate::protocol::{WeightResponse, CONTENT_TYPE};
use scale_core::ScaleHandle;
use std::net::SocketAddr;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tiny_http::{Header, Request, Response, Server};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub bind_addr: String,
    /// How long `start` waits for the listener to come up or fail.
    pub startup_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:1133".to_string(),
            startup_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },
    #[error("failed to start server thread: {0}")]
    Spawn(#[from] std::io::Error),
}

type Startup = Result<Arc<Server>, String>;

pub struct HttpFacade {
    bind_addr: String,
    server: Option<Arc<Server>>,
    pending: Option<mpsc::Receiver<Startup>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl HttpFacade {
    /// Bind and start serving. Returns once the listener is up, binding
    /// failed, or `startup_timeout` elapsed (treated as started).
    pub fn start(config: &HttpConfig, scale: ScaleHandle) -> Result<Self, HttpError> {
        let (ready_tx, ready_rx) = mpsc::channel::<Startup>();
        let bind_addr = config.bind_addr.clone();

        let thread = thread::Builder::new()
            .name("http-facade".to_string())
            .spawn(move || {
                let server = match Server::http(&bind_addr) {
                    Ok(server) => Arc::new(server),
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(Arc::clone(&server)));
                serve(&server, &scale);
            })?;

        let mut facade = Self {
            bind_addr: config.bind_addr.clone(),
            server: None,
            pending: None,
            thread: Some(thread),
        };

        match ready_rx.recv_timeout(config.startup_timeout) {
            Ok(Ok(server)) => {
                info!(addr = %facade.bind_addr, "HTTP facade listening");
                facade.server = Some(server);
                Ok(facade)
            }
            Ok(Err(reason)) => {
                facade.join_thread();
                Err(HttpError::Bind {
                    addr: facade.bind_addr.clone(),
                    reason,
                })
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(
                    addr = %facade.bind_addr,
                    timeout_ms = config.startup_timeout.as_millis() as u64,
                    "HTTP listener still starting; assuming it is up"
                );
                facade.pending = Some(ready_rx);
                Ok(facade)
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                facade.join_thread();
                Err(HttpError::Bind {
                    addr: facade.bind_addr.clone(),
                    reason: "server thread exited during startup".to_string(),
                })
            }
        }
    }

    /// Address actually bound, useful when the configured port was 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server
            .as_ref()
            .and_then(|server| server.server_addr().to_ip())
    }

    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }

    /// Stop accepting connections and wait for the listener thread.
    /// Requests already being answered finish on their own threads.
    pub fn stop(mut self) {
        if self.server.is_none() {
            if let Some(pending) = self.pending.take() {
                if let Ok(Ok(server)) = pending.recv() {
                    self.server = Some(server);
                }
            }
        }
        if let Some(server) = self.server.take() {
            server.unblock();
        }
        self.join_thread();
        info!(addr = %self.bind_addr, "HTTP facade stopped");
    }

    fn join_thread(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("HTTP facade thread panicked");
            }
        }
    }
}

fn serve(server: &Server, scale: &ScaleHandle) {
    for request in server.incoming_requests() {
        let scale = scale.clone();
        let spawned = thread::Builder::new()
            .name("http-request".to_string())
            .spawn(move || answer(request, &scale));
        if let Err(e) = spawned {
            warn!(error = %e, "Failed to spawn request thread");
        }
    }
    debug!("HTTP accept loop finished");
}

fn answer(request: Request, scale: &ScaleHandle) {
    let started = Instant::now();
    HTTP_REQUESTS.inc();
    debug!(method = %request.method(), url = %request.url(), "Weight request");

    let outcome = scale.request_reading();
    let body = WeightResponse::from_outcome(&outcome);
    let payload = match body.to_json() {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "Failed to encode weight response");
            WeightResponse::from_outcome(&Err(scale_core::ScaleError::Format {
                field: "response",
                reason: e.to_string(),
            }))
            .to_json()
            .unwrap_or_default()
        }
    };

    let mut response = Response::from_data(payload);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], CONTENT_TYPE.as_bytes()) {
        response = response.with_header(header);
    }
    if let Err(e) = request.respond(response) {
        debug!(error = %e, "Client went away before the response was sent");
    }
    HTTP_REQUEST_SECONDS.observe(started.elapsed().as_secs_f64());
}
