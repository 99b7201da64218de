//! Hosts: supervised worker pools with protocol adapters and hooks.
//!
//! A host owns one managed queue and `pool_size` workers. The shared
//! runtime ([`Host`]) drives the lifecycle and the worker loop; the three
//! specialisations (inbound services, routing processes, outbound
//! operations) are [`HostBehavior`] implementations plugged into it.

pub mod behavior;
pub mod file;
pub mod hl7;
pub mod http;
pub mod reply;
pub mod routing;
pub mod runtime;
pub mod types;

pub use behavior::{AdapterSpec, HostBehavior, HostContext, IngressOutcome};
pub use file::{FileOperation, FileService};
pub use hl7::{Hl7MllpOperation, Hl7MllpService};
pub use http::{HttpOperation, HttpService};
pub use reply::{AckAction, ReplyCodeActions};
pub use routing::{PassthroughProcess, RoutingProcess};
pub use runtime::Host;
pub use types::{HostKind, HostMetrics, HostMetricsSnapshot, HostState};
