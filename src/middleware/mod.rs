mod auth;
mod error_handler;
mod rate_limit;

pub use auth::{CallerIdentity, Claims, TrustTier, auth_middleware, generate_token, verify_token};
pub use error_handler::log_errors;
pub use rate_limit::{
    ActionClass, FailMode, RateLimitDecision, RateLimitGuard, RateLimiter, rate_limit,
};
