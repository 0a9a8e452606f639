pub mod backoff;
pub mod backpressure;

pub use backoff::SimpleBackoff;
pub use backpressure::Admission;
