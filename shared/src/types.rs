//! Common types used across the platform

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// IGV (value-added tax) rate applied to taxed lines: 18%
pub const IGV_RATE: Decimal = Decimal::from_parts(18, 0, 0, false, 2);

/// Unit-of-measure code used when neither the request nor the product names one
pub const DEFAULT_UNIT_CODE: &str = "NIU";

/// Tax-affectation code of a line item (catalog 07)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaxAffectation {
    /// "10" - taxed, onerous operation
    #[serde(rename = "10")]
    Gravado,
    /// "20" - exempt, onerous operation
    #[serde(rename = "20")]
    Exonerado,
}

impl TaxAffectation {
    pub fn from_taxable(tiene_igv: bool) -> Self {
        if tiene_igv {
            TaxAffectation::Gravado
        } else {
            TaxAffectation::Exonerado
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "10" => Some(TaxAffectation::Gravado),
            "20" => Some(TaxAffectation::Exonerado),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            TaxAffectation::Gravado => "10",
            TaxAffectation::Exonerado => "20",
        }
    }

    pub fn is_taxed(&self) -> bool {
        matches!(self, TaxAffectation::Gravado)
    }

    /// Tax rate contributed by a line with this affectation
    pub fn rate(&self) -> Decimal {
        match self {
            TaxAffectation::Gravado => IGV_RATE,
            TaxAffectation::Exonerado => Decimal::ZERO,
        }
    }
}

/// Identity document of a counterparty (catalog 06)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IdentityDocumentType {
    Ruc,
    Dni,
    Otros,
}

impl IdentityDocumentType {
    /// Infer the document type from the number: 11 digits is a RUC,
    /// 8 digits a DNI, anything else falls into "other"
    pub fn infer(numero: &str) -> Self {
        let numero = numero.trim();
        let all_digits = !numero.is_empty() && numero.chars().all(|c| c.is_ascii_digit());
        match (all_digits, numero.len()) {
            (true, 11) => IdentityDocumentType::Ruc,
            (true, 8) => IdentityDocumentType::Dni,
            _ => IdentityDocumentType::Otros,
        }
    }

    /// `schemeID` used in the UBL party identification
    pub fn scheme_id(&self) -> &'static str {
        match self {
            IdentityDocumentType::Ruc => "6",
            IdentityDocumentType::Dni => "1",
            IdentityDocumentType::Otros => "0",
        }
    }
}
