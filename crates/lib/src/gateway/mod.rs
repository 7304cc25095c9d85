//! Gateway: local HTTP control API.
//!
//! `GET /` and `GET /remote-test` are open liveness routes. Everything under `/api` passes the
//! per-IP rate limiter, then the token gate, then the routed handlers.

mod auth;
mod protocol;
mod rate_limit;
mod server;

pub use auth::{credential, ApiAuth, AuthDenied, API_KEY_HEADER};
pub use protocol::{ApiResponse, CheckParams, SetConfigParams};
pub use rate_limit::{
    RateLimitDecision, RateLimitRecord, RateLimiter, MAX_REQUESTS, SWEEP_INTERVAL, WINDOW_MS,
};
pub use server::{router, run_http_api, ApiState, HttpServer};
