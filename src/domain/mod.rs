//! Domain layer - Pure business logic.

pub mod dash;
pub mod jobs;
pub mod progress;
pub mod sanitize;
pub mod validator;
