//! Document series and correlative numbering

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Width of the zero-padded correlative in a document number
pub const CORRELATIVE_WIDTH: usize = 8;

/// Class of tax document a series belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentClass {
    /// Code "01"
    Factura,
    /// Code "03"
    Boleta,
}

impl DocumentClass {
    /// Map a two-character document-class code to its class
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "01" => Some(DocumentClass::Factura),
            "03" => Some(DocumentClass::Boleta),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            DocumentClass::Factura => "01",
            DocumentClass::Boleta => "03",
        }
    }

    /// Name stored in the `clase` column of `serie_documento`
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentClass::Factura => "FACTURA",
            DocumentClass::Boleta => "BOLETA",
        }
    }

    /// Starting series code when no series row exists yet
    pub fn default_series(&self) -> &'static str {
        match self {
            DocumentClass::Factura => "F001",
            DocumentClass::Boleta => "B001",
        }
    }

    /// Invoices go to RUC holders; everyone else gets a receipt
    pub fn for_customer(tipo: crate::types::IdentityDocumentType) -> Self {
        match tipo {
            crate::types::IdentityDocumentType::Ruc => DocumentClass::Factura,
            _ => DocumentClass::Boleta,
        }
    }
}

/// Starting series codes per document class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesDefaults {
    pub factura: String,
    pub boleta: String,
}

impl SeriesDefaults {
    pub fn series_for(&self, class: DocumentClass) -> &str {
        match class {
            DocumentClass::Factura => &self.factura,
            DocumentClass::Boleta => &self.boleta,
        }
    }
}

impl Default for SeriesDefaults {
    fn default() -> Self {
        Self {
            factura: DocumentClass::Factura.default_series().to_string(),
            boleta: DocumentClass::Boleta.default_series().to_string(),
        }
    }
}

/// A number handed out by the series allocator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocatedNumber {
    pub serie_id: Uuid,
    pub serie: String,
    pub correlativo: i64,
    /// `{serie}-{correlativo:08}`
    pub numero: String,
}

impl AllocatedNumber {
    pub fn new(serie_id: Uuid, serie: String, correlativo: i64) -> Self {
        let numero = format_document_number(&serie, correlativo);
        Self {
            serie_id,
            serie,
            correlativo,
            numero,
        }
    }
}

/// Format a document number as `{series}-{correlative zero-padded to 8}`
pub fn format_document_number(serie: &str, correlativo: i64) -> String {
    format!("{}-{:0width$}", serie, correlativo, width = CORRELATIVE_WIDTH)
}

/// Split a formatted number back into series and correlative
pub fn parse_document_number(numero: &str) -> Option<(&str, i64)> {
    let (serie, correlativo) = numero.split_once('-')?;
    let correlativo = correlativo.parse().ok()?;
    Some((serie, correlativo))
}
