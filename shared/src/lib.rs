//! Shared types and domain logic for the pre-sale billing service
//!
//! This crate holds the I/O-free half of the pre-sale (`preventa`) editing
//! workflow: the edit request shape, line item reconciliation, stock delta
//! computation, document numbering and the UBL invoice composer. The backend
//! wires these into database transactions.

pub mod models;
pub mod reconcile;
pub mod stock;
pub mod tax_document;
pub mod types;
pub mod validation;

pub use models::*;
pub use reconcile::*;
pub use stock::*;
pub use tax_document::*;
pub use types::*;
pub use validation::*;
