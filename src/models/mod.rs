pub mod job;
pub mod media;
