pub mod request;
pub mod response;

pub use request::{read_request, InboundRequest, ProxyRequest};
pub use response::ProxyResponse;

/// Upper bound on the buffered header + body region of an inbound request.
pub const MAX_REQUEST_SIZE: usize = 32 << 20;

/// Value of the `Server` header stamped on every response leaving the proxy.
pub(crate) const SERVER_TOKEN: &str = concat!("grx/", env!("CARGO_PKG_VERSION"));
