pub mod media;
pub mod preview_link;
