mod handler;
mod model;

pub use handler::{media_details, stream_url, upload};
pub use model::MediaDetails;
