//! Domain models for the pre-sale billing service

mod business;
mod preventa;
mod series;

pub use business::*;
pub use preventa::*;
pub use series::*;
