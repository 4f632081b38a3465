pub mod config;
pub mod error;
pub mod limiter;
pub mod types;

pub use config::Config;
pub use error::MurmurError;
pub use limiter::RateLimiter;
pub use types::*;
