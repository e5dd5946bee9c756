pub mod retry;
pub mod timeout;

pub use retry::{retry_with_policy, RetryConfig, RetryPolicy};
pub use timeout::{TimeoutConfig, TimeoutExt};
