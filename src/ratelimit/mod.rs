//! Fixed-window admission control and counter backends.

mod backend;
mod limiter;
mod local;
mod redis;
mod window;

pub use backend::{build_backend, Admission, ClientState, CounterBackend};
pub use limiter::RateLimiter;
pub use local::LocalBackend;
pub use redis::RedisBackend;
pub use window::{LimiterSettings, MAX_WINDOW_MS, MIN_WINDOW};
