// Persistent collaborators: preview link records and the media catalog.

pub mod memory;
pub mod models;
pub mod repositories;

pub use memory::{MemoryLinkStore, MemoryResourceDirectory};
pub use models::media::MediaResource;
pub use models::preview_link::PreviewLink;
pub use repositories::media::{PgResourceDirectory, ResourceDirectory};
pub use repositories::preview_link::{LinkStore, PgLinkStore};
