//! Proxy module
//!
//! Resolves upstream endpoints, builds outbound calls and relays responses,
//! cancelling the upstream call when the client goes away.

pub mod cancel;
pub mod endpoint;
pub mod headers;
pub mod logging;
pub mod relay;
pub mod request;

pub use cancel::{AbortGuard, CancellationBridge, RelayState};
pub use endpoint::resolve;
pub use logging::RequestContext;
pub use relay::{relay_chunks, ChannelSink, ClientSink, StreamRelay};
pub use request::{ProxyRequest, TargetKind, UpstreamCall};
