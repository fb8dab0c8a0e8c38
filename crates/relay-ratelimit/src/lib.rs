pub mod bucket;
pub mod limiter;

pub use limiter::{Operation, RateLimiter};
