mod sds;
pub mod stream;

pub use sds::SdsService;
pub use stream::{classify_request, run_secret_stream, LastDiscoverySnapshot, RequestKind};
