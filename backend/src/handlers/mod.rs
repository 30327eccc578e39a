//! HTTP request handlers

pub mod health;
pub mod preventa;
pub mod series;

pub use health::*;
pub use preventa::*;
pub use series::*;
