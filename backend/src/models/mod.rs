//! Domain models for the pre-sale billing service
//!
//! Re-exports models from the shared crate; database row types live next to
//! the services that query them

pub use shared::models::*;
