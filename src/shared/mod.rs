pub mod config;
pub mod error;
pub mod rate_limiter;

pub use config::AppConfig;
pub use error::{AppError, Result};
pub use rate_limiter::{AbuseAction, Admission, Classification, RateLimiter};
