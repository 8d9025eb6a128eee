use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

const QUOTA_PREFIX: &str = "quota:";
const RESPONSE_PREFIX: &str = "response:";

/// Who a cached response belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope<'a> {
    /// Data visible only to this subject.
    Caller(&'a str),
    /// Data identical for every caller.
    Public,
}

/// Counter key for one subject, action and window start.
pub fn quota_key(action: &str, subject_id: &str, window_start: DateTime<Utc>) -> String {
    format!(
        "{}{}:{}:{}",
        QUOTA_PREFIX,
        action,
        subject_id,
        window_start.timestamp()
    )
}

/// Cache key for a read response.
///
/// Query parameters are order-insensitive. Every component is length-prefixed
/// before hashing so distinct inputs cannot concatenate to the same digest.
pub fn response_key(route: &str, scope: CacheScope<'_>, params: &[(&str, &str)]) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    let mut feed = |part: &str| {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    };
    feed(route);
    match scope {
        CacheScope::Caller(subject) => {
            feed("caller");
            feed(subject);
        }
        CacheScope::Public => feed("public"),
    }
    for &(name, value) in &sorted {
        feed(name);
        feed(value);
    }

    let digest = hex::encode(hasher.finalize());
    format!("{}{}:{}", RESPONSE_PREFIX, route, digest)
}
