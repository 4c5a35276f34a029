//! Backend plumbing for the confab control plane.
//!
//! - [`driver`]: the semantic contract a concrete media server driver must
//!   fulfil (pipelines, elements, SDP processing, element events)
//! - [`balancer`]: host registry with per-profile load and selection policy
//! - [`pipeline`]: one-pipeline-per-(room, host) bookkeeping with coalesced
//!   creation
//! - [`transposer`]: cross-host RTP bridges
//! - [`adapter`]: the session-facing adapter built on top of the above, and
//!   its composed (per-profile) variant

pub mod adapter;
pub mod balancer;
pub mod composed;
pub mod driver;
pub mod pipeline;
pub mod testing;
pub mod transposer;

pub use adapter::{BackendAdapter, MediaAdapter, NegotiateOptions, NegotiatedMedia};
pub use balancer::{BalanceStrategy, Balancer, HealthProber, Host};
pub use composed::ComposedAdapter;
pub use driver::{BackendEvent, ElementHandle, ElementKind, ElementState, MediaDriver};
pub use pipeline::{Pipeline, PipelineRegistry};
pub use transposer::TransposerManager;
