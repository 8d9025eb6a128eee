mod handler;
mod model;

pub use handler::{create_preview, list_previews, open_preview, revoke_preview};
