pub mod job;
pub mod payloads;
