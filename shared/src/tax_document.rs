//! UBL 2.1 invoice composition
//!
//! Builds the XML tax document for a reconciled pre-sale. The output is
//! regenerated in full on every edit and is byte-for-byte deterministic for
//! the same input: fixed element order, fixed indentation, two-decimal
//! amounts, quantities as stored, no self-closing tags.
//!
//! The empty `ext:ExtensionContent` element is the slot the XML signer fills.

use chrono::NaiveDateTime;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{ClienteRef, DocumentClass, InfoEmpresa};
use crate::reconcile::Totales;
use crate::types::{IdentityDocumentType, TaxAffectation};

pub const NS_INVOICE: &str = "urn:oasis:names:specification:ubl:schema:xsd:Invoice-2";
pub const NS_CAC: &str = "urn:oasis:names:specification:ubl:schema:xsd:CommonAggregateComponents-2";
pub const NS_CBC: &str = "urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2";
pub const NS_EXT: &str = "urn:oasis:names:specification:ubl:schema:xsd:CommonExtensionComponents-2";
pub const NS_DS: &str = "http://www.w3.org/2000/09/xmldsig#";

/// Empty extension element the signature block is inserted into
pub const SIGNATURE_SLOT: &str = "<ext:ExtensionContent></ext:ExtensionContent>";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ComposeError {
    #[error("Amount out of range in {field}")]
    Overflow { field: String },
}

fn overflow(field: impl Into<String>) -> ComposeError {
    ComposeError::Overflow { field: field.into() }
}

/// A line as it appears on the tax document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineaComprobante {
    pub codigo: String,
    pub descripcion: String,
    pub unidad_medida: String,
    pub cantidad: Decimal,
    pub precio_unitario: Decimal,
    pub total: Decimal,
    pub tipo_afectacion: TaxAffectation,
}

impl LineaComprobante {
    fn igv(&self) -> Option<Decimal> {
        self.total.checked_mul(self.tipo_afectacion.rate())
    }

    /// Unit price including tax (`PricingReference`)
    fn precio_con_igv(&self) -> Option<Decimal> {
        self.precio_unitario
            .checked_mul(Decimal::ONE + self.tipo_afectacion.rate())
    }
}

/// Everything needed to compose one invoice or receipt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comprobante {
    pub clase: DocumentClass,
    /// Formatted `{serie}-{correlativo}`
    pub numero: String,
    pub emitido: NaiveDateTime,
    pub moneda: String,
    pub metodo_pago: String,
    pub emisor: InfoEmpresa,
    pub cliente: ClienteRef,
    pub lineas: Vec<LineaComprobante>,
    pub totales: Totales,
}

/// Compose the UBL invoice XML for a document. Fails only when a derived
/// amount does not fit in a `Decimal`.
pub fn compose_invoice(doc: &Comprobante) -> Result<String, ComposeError> {
    let mut xml = String::with_capacity(8192);
    let moneda = xml_escape(&doc.moneda);

    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str(&format!(
        "<Invoice xmlns=\"{NS_INVOICE}\" xmlns:cac=\"{NS_CAC}\" xmlns:cbc=\"{NS_CBC}\" xmlns:ds=\"{NS_DS}\" xmlns:ext=\"{NS_EXT}\">\n"
    ));

    // === Signature slot ===
    xml.push_str("  <ext:UBLExtensions>\n");
    xml.push_str("    <ext:UBLExtension>\n");
    xml.push_str("      ");
    xml.push_str(SIGNATURE_SLOT);
    xml.push('\n');
    xml.push_str("    </ext:UBLExtension>\n");
    xml.push_str("  </ext:UBLExtensions>\n");

    // === Header ===
    xml_tag(&mut xml, 2, "cbc:UBLVersionID", "2.1");
    xml_tag(&mut xml, 2, "cbc:CustomizationID", "2.0");
    xml_tag(&mut xml, 2, "cbc:ID", &xml_escape(&doc.numero));
    xml_tag(&mut xml, 2, "cbc:IssueDate", &doc.emitido.format("%Y-%m-%d").to_string());
    xml_tag(&mut xml, 2, "cbc:IssueTime", &doc.emitido.format("%H:%M:%S").to_string());
    xml_tag_attr(&mut xml, 2, "cbc:InvoiceTypeCode", "listID", "0101", doc.clase.code());
    xml_tag(&mut xml, 2, "cbc:DocumentCurrencyCode", &moneda);
    xml_tag(&mut xml, 2, "cbc:LineCountNumeric", &doc.lineas.len().to_string());

    // === Signature reference ===
    xml.push_str("  <cac:Signature>\n");
    xml_tag(&mut xml, 4, "cbc:ID", &xml_escape(&doc.emisor.ruc));
    xml.push_str("    <cac:SignatoryParty>\n");
    xml.push_str("      <cac:PartyIdentification>\n");
    xml_tag(&mut xml, 8, "cbc:ID", &xml_escape(&doc.emisor.ruc));
    xml.push_str("      </cac:PartyIdentification>\n");
    xml.push_str("      <cac:PartyName>\n");
    xml_tag(&mut xml, 8, "cbc:Name", &xml_escape(&doc.emisor.razon_social));
    xml.push_str("      </cac:PartyName>\n");
    xml.push_str("    </cac:SignatoryParty>\n");
    xml.push_str("    <cac:DigitalSignatureAttachment>\n");
    xml.push_str("      <cac:ExternalReference>\n");
    xml_tag(&mut xml, 8, "cbc:URI", "#SignatureSP");
    xml.push_str("      </cac:ExternalReference>\n");
    xml.push_str("    </cac:DigitalSignatureAttachment>\n");
    xml.push_str("  </cac:Signature>\n");

    // === Supplier ===
    xml.push_str("  <cac:AccountingSupplierParty>\n");
    xml.push_str("    <cac:Party>\n");
    xml.push_str("      <cac:PartyIdentification>\n");
    xml_tag_attr(&mut xml, 8, "cbc:ID", "schemeID", IdentityDocumentType::Ruc.scheme_id(), &xml_escape(&doc.emisor.ruc));
    xml.push_str("      </cac:PartyIdentification>\n");
    if let Some(ref nombre) = doc.emisor.nombre_comercial {
        if !nombre.trim().is_empty() {
            xml.push_str("      <cac:PartyName>\n");
            xml_tag(&mut xml, 8, "cbc:Name", &xml_escape(nombre));
            xml.push_str("      </cac:PartyName>\n");
        }
    }
    xml.push_str("      <cac:PartyLegalEntity>\n");
    xml_tag(&mut xml, 8, "cbc:RegistrationName", &xml_escape(&doc.emisor.razon_social));
    xml.push_str("        <cac:RegistrationAddress>\n");
    xml_tag(&mut xml, 10, "cbc:AddressTypeCode", "0000");
    xml.push_str("          <cac:AddressLine>\n");
    xml_tag(&mut xml, 12, "cbc:Line", &xml_escape(&doc.emisor.direccion));
    xml.push_str("          </cac:AddressLine>\n");
    xml.push_str("        </cac:RegistrationAddress>\n");
    xml.push_str("      </cac:PartyLegalEntity>\n");
    xml.push_str("    </cac:Party>\n");
    xml.push_str("  </cac:AccountingSupplierParty>\n");

    // === Customer ===
    let tipo_cliente = doc.cliente.tipo_documento();
    xml.push_str("  <cac:AccountingCustomerParty>\n");
    xml.push_str("    <cac:Party>\n");
    xml.push_str("      <cac:PartyIdentification>\n");
    xml_tag_attr(&mut xml, 8, "cbc:ID", "schemeID", tipo_cliente.scheme_id(), &xml_escape(&doc.cliente.numero_documento));
    xml.push_str("      </cac:PartyIdentification>\n");
    xml.push_str("      <cac:PartyLegalEntity>\n");
    xml_tag(&mut xml, 8, "cbc:RegistrationName", &xml_escape(&doc.cliente.razon_social));
    if let Some(ref dir) = doc.cliente.direccion {
        if !dir.trim().is_empty() {
            xml.push_str("        <cac:RegistrationAddress>\n");
            xml.push_str("          <cac:AddressLine>\n");
            xml_tag(&mut xml, 12, "cbc:Line", &xml_escape(dir));
            xml.push_str("          </cac:AddressLine>\n");
            xml.push_str("        </cac:RegistrationAddress>\n");
        }
    }
    xml.push_str("      </cac:PartyLegalEntity>\n");
    xml.push_str("    </cac:Party>\n");
    xml.push_str("  </cac:AccountingCustomerParty>\n");

    // === Payment terms ===
    xml.push_str("  <cac:PaymentTerms>\n");
    xml_tag(&mut xml, 4, "cbc:ID", "FormaPago");
    xml_tag(&mut xml, 4, "cbc:PaymentMeansID", &xml_escape(&doc.metodo_pago));
    xml.push_str("  </cac:PaymentTerms>\n");

    // === Tax totals ===
    let gravado = sum_by(&doc.lineas, TaxAffectation::Gravado)?;
    let exonerado = sum_by(&doc.lineas, TaxAffectation::Exonerado)?;

    xml.push_str("  <cac:TaxTotal>\n");
    xml_amount(&mut xml, 4, "cbc:TaxAmount", &moneda, doc.totales.igv);
    if gravado > Decimal::ZERO || exonerado.is_zero() {
        tax_subtotal(&mut xml, 4, &moneda, gravado, doc.totales.igv, TaxAffectation::Gravado);
    }
    if exonerado > Decimal::ZERO {
        tax_subtotal(&mut xml, 4, &moneda, exonerado, Decimal::ZERO, TaxAffectation::Exonerado);
    }
    xml.push_str("  </cac:TaxTotal>\n");

    // === Monetary totals ===
    xml.push_str("  <cac:LegalMonetaryTotal>\n");
    xml_amount(&mut xml, 4, "cbc:LineExtensionAmount", &moneda, doc.totales.valor_venta);
    xml_amount(&mut xml, 4, "cbc:TaxInclusiveAmount", &moneda, doc.totales.total);
    xml_amount(&mut xml, 4, "cbc:PayableAmount", &moneda, doc.totales.total);
    xml.push_str("  </cac:LegalMonetaryTotal>\n");

    // === Lines ===
    for (idx, linea) in doc.lineas.iter().enumerate() {
        let igv = linea.igv().ok_or_else(|| overflow(format!("lineas[{idx}].igv")))?;
        let precio_con_igv = linea
            .precio_con_igv()
            .ok_or_else(|| overflow(format!("lineas[{idx}].precioUnitario")))?;

        xml.push_str("  <cac:InvoiceLine>\n");
        xml_tag(&mut xml, 4, "cbc:ID", &(idx + 1).to_string());
        xml_tag_attr(&mut xml, 4, "cbc:InvoicedQuantity", "unitCode", &xml_escape(&linea.unidad_medida), &quantity(linea.cantidad));
        xml_amount(&mut xml, 4, "cbc:LineExtensionAmount", &moneda, linea.total);

        xml.push_str("    <cac:PricingReference>\n");
        xml.push_str("      <cac:AlternativeConditionPrice>\n");
        xml_amount(&mut xml, 8, "cbc:PriceAmount", &moneda, precio_con_igv);
        xml_tag(&mut xml, 8, "cbc:PriceTypeCode", "01");
        xml.push_str("      </cac:AlternativeConditionPrice>\n");
        xml.push_str("    </cac:PricingReference>\n");

        xml.push_str("    <cac:TaxTotal>\n");
        xml_amount(&mut xml, 6, "cbc:TaxAmount", &moneda, igv);
        tax_subtotal(&mut xml, 6, &moneda, linea.total, igv, linea.tipo_afectacion);
        xml.push_str("    </cac:TaxTotal>\n");

        xml.push_str("    <cac:Item>\n");
        xml_tag(&mut xml, 6, "cbc:Description", &xml_escape(&linea.descripcion));
        xml.push_str("      <cac:SellersItemIdentification>\n");
        xml_tag(&mut xml, 8, "cbc:ID", &xml_escape(&linea.codigo));
        xml.push_str("      </cac:SellersItemIdentification>\n");
        xml.push_str("    </cac:Item>\n");

        xml.push_str("    <cac:Price>\n");
        xml_amount(&mut xml, 6, "cbc:PriceAmount", &moneda, linea.precio_unitario);
        xml.push_str("    </cac:Price>\n");
        xml.push_str("  </cac:InvoiceLine>\n");
    }

    xml.push_str("</Invoice>");
    Ok(xml)
}

/// File name the tax-authority transmitter expects for a document:
/// `{ruc}-{class}-{series}-{correlative}-{yyyymmddHHMMSS}.xml`
pub fn submission_file_name(ruc: &str, clase: DocumentClass, numero: &str, emitido: NaiveDateTime) -> String {
    format!(
        "{}-{}-{}-{}.xml",
        ruc,
        clase.code(),
        numero,
        emitido.format("%Y%m%d%H%M%S")
    )
}

fn sum_by(lineas: &[LineaComprobante], afectacion: TaxAffectation) -> Result<Decimal, ComposeError> {
    lineas
        .iter()
        .filter(|l| l.tipo_afectacion == afectacion)
        .try_fold(Decimal::ZERO, |acc, l| acc.checked_add(l.total))
        .ok_or_else(|| overflow(format!("{}.taxableAmount", afectacion.code())))
}

/// `cac:TaxSubtotal` block for one tax scheme
fn tax_subtotal(
    xml: &mut String,
    indent: usize,
    moneda: &str,
    base: Decimal,
    impuesto: Decimal,
    afectacion: TaxAffectation,
) {
    let pad = " ".repeat(indent);
    let (scheme_id, scheme_name, type_code, category) = match afectacion {
        TaxAffectation::Gravado => ("1000", "IGV", "VAT", "S"),
        TaxAffectation::Exonerado => ("9997", "EXO", "VAT", "E"),
    };
    let percent = (afectacion.rate() * Decimal::ONE_HUNDRED).normalize();

    xml.push_str(&format!("{pad}<cac:TaxSubtotal>\n"));
    xml_amount(xml, indent + 2, "cbc:TaxableAmount", moneda, base);
    xml_amount(xml, indent + 2, "cbc:TaxAmount", moneda, impuesto);
    xml.push_str(&format!("{pad}  <cac:TaxCategory>\n"));
    xml_tag(xml, indent + 4, "cbc:ID", category);
    xml_tag(xml, indent + 4, "cbc:Percent", &percent.to_string());
    xml_tag(xml, indent + 4, "cbc:TaxExemptionReasonCode", afectacion.code());
    xml.push_str(&format!("{pad}    <cac:TaxScheme>\n"));
    xml_tag(xml, indent + 6, "cbc:ID", scheme_id);
    xml_tag(xml, indent + 6, "cbc:Name", scheme_name);
    xml_tag(xml, indent + 6, "cbc:TaxTypeCode", type_code);
    xml.push_str(&format!("{pad}    </cac:TaxScheme>\n"));
    xml.push_str(&format!("{pad}  </cac:TaxCategory>\n"));
    xml.push_str(&format!("{pad}</cac:TaxSubtotal>\n"));
}

/// Amount rendered with two decimals, half away from zero
pub fn money(value: Decimal) -> String {
    format!(
        "{:.2}",
        value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    )
}

/// Quantity rendered exactly as stored, without trailing zeros
pub fn quantity(value: Decimal) -> String {
    value.normalize().to_string()
}

fn xml_amount(xml: &mut String, indent: usize, tag: &str, moneda: &str, value: Decimal) {
    xml_tag_attr(xml, indent, tag, "currencyID", moneda, &money(value));
}

/// Writes `<tag>value</tag>`; never self-closing
fn xml_tag(xml: &mut String, indent: usize, tag: &str, value: &str) {
    let spaces = " ".repeat(indent);
    xml.push_str(&format!("{}<{}>{}</{}>\n", spaces, tag, value, tag));
}

fn xml_tag_attr(xml: &mut String, indent: usize, tag: &str, attr: &str, attr_value: &str, value: &str) {
    let spaces = " ".repeat(indent);
    xml.push_str(&format!(
        "{}<{} {}=\"{}\">{}</{}>\n",
        spaces, tag, attr, attr_value, value, tag
    ));
}

/// Strip control characters and collapse whitespace runs
fn normalize_text(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Escape XML special characters (after normalization)
pub fn xml_escape(s: &str) -> String {
    normalize_text(s)
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_and_normalizes_text() {
        assert_eq!(xml_escape("A & B <C>"), "A &amp; B &lt;C&gt;");
        assert_eq!(xml_escape("  dos   espacios \n"), "dos espacios");
        assert_eq!(xml_escape("O'Brien \"SAC\""), "O&apos;Brien &quot;SAC&quot;");
    }

    #[test]
    fn money_rounds_half_away_from_zero() {
        assert_eq!(money(Decimal::new(3605, 3)), "3.61");
        assert_eq!(money(Decimal::new(20, 0)), "20.00");
        assert_eq!(money(Decimal::new(36, 1)), "3.60");
    }

    #[test]
    fn quantities_keep_their_precision() {
        assert_eq!(quantity(Decimal::new(2125, 3)), "2.125");
        assert_eq!(quantity(Decimal::new(500, 2)), "5");
        assert_eq!(quantity(Decimal::ZERO), "0");
    }
}
