mod handler;

pub use handler::quota_usage;
