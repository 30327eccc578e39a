//! Business logic services for the pre-sale billing service

pub mod canonical;
pub mod preventa;
pub mod series;
pub mod stock;
pub mod xml_signer;

pub use preventa::PreventaService;
pub use series::SeriesService;
pub use xml_signer::CertificateBundle;
