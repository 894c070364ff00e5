pub mod http;
pub mod metrics;
pub mod protocol;
pub mod serial;

pub use http::{HttpConfig, HttpError, HttpFacade};
pub use metrics::{init_metrics, serve_metrics};
pub use protocol::{WeightResponse, CONTENT_TYPE};
pub use serial::{available_ports, SerialChannel, SerialConnector, SerialSettings};
