//! Ports - Trait definitions for the collaborators the services depend on.

pub mod queue;
pub mod repository;
pub mod storage;
pub mod transcoder;
