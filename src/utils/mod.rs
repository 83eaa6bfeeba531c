pub mod progress;

pub use progress::{format_elapsed, format_kib, percentage};
