pub mod poller;
mod worker;

pub use poller::{JobPoller, JobPollerHandle, DEFAULT_POLL_INTERVAL};
pub use worker::MIN_INTERVAL;
