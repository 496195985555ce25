//! HTTP transport seam and the shared retry policy

mod retry;
mod transport;

pub use retry::{is_transient_status, RetryPolicy, TRANSIENT_STATUSES};
pub use transport::{
    Credentials, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError,
    TransportErrorKind, USER_AGENT,
};
