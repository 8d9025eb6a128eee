//! Store-backed request gating: quota counters and cached read responses.

pub mod keys;
pub mod quota;
pub mod response;

pub use keys::CacheScope;
pub use quota::{FixedWindow, QuotaCounter, QuotaUsage};
pub use response::{CachePolicy, ResponseCache};
