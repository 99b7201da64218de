//! Protocol adapters: MLLP, HTTP, and File endpoints, inbound and outbound.
//!
//! An adapter owns its transport resources and has its own lifecycle,
//! independent of the host that carries it. Inbound adapters hand raw bytes
//! to their host through [`IngressHandler`] and write back whatever reply
//! the host produced (an HL7 ACK, an HTTP body). Outbound adapters expose
//! [`OutboundAdapter::send`] with retry-and-backoff per their settings.

pub mod file_in;
pub mod file_out;
pub mod http_in;
pub mod http_out;
pub mod mllp_in;
pub mod mllp_out;
pub mod traits;

pub use file_in::FileInboundAdapter;
pub use file_out::FileOutboundAdapter;
pub use http_in::HttpInboundAdapter;
pub use http_out::HttpOutboundAdapter;
pub use mllp_in::MllpInboundAdapter;
pub use mllp_out::MllpOutboundAdapter;
pub use traits::{
    Adapter, AdapterCore, AdapterMetrics, AdapterMetricsSnapshot, AdapterState, IngressHandler,
    OutboundAdapter,
};
