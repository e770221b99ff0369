pub mod system;
pub mod videos;
