pub mod http;
pub mod mock;
pub mod progress_stream;

pub use http::{HttpTransport, DEFAULT_CHUNK_SIZE};
pub use mock::MockBackend;
pub use progress_stream::ProgressStream;
