/// Middleware module
///
/// Access-token admission for protected scopes and per-IP throttling of the
/// credential endpoints.

mod auth_middleware;
mod rate_limit;

pub use auth_middleware::{bearer_token, AuthMiddleware};
pub use rate_limit::RateLimitMiddleware;
