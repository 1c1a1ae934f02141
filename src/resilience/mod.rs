//! Failure handling around the generator backend: a per-backend circuit
//! breaker and the per-task retry policy.

mod breaker;
mod retry;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::RetryPolicy;
