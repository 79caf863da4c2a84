//! Application layer - Services built on the ports.

pub mod lifecycle;
pub mod orchestrator;
pub mod streaming;
pub mod upload;
pub mod videos;
pub mod worker;
