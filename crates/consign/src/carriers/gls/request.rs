use chrono::NaiveDate;
use consign_types::{Address, ShipmentContext, ShipmentDetails};

use crate::carriers::{AddressRules, decimal};

/// `(service, schedule)` used when `shipment_type` is absent or unknown.
pub const ECONOMY_SERVICE: (u32, u32) = (96, 18);

const SERVICE_TABLE: &[(&str, (u32, u32))] = &[
    ("courier", (1, 3)),
    ("express", (1, 3)),
    ("express_1030", (1, 2)),
    ("express_1400", (1, 19)),
    ("saturday", (1, 5)),
    ("economy", ECONOMY_SERVICE),
    ("business_parcel", ECONOMY_SERVICE),
    ("international", (74, 3)),
    ("euro_business_parcel", (74, 3)),
];

/// Resolve a logical service name to the carrier's `(Servicio, Horario)`.
pub fn service_codes(shipment_type: Option<&str>) -> (u32, u32) {
    let Some(name) = shipment_type.map(str::trim).filter(|n| !n.is_empty()) else {
        return ECONOMY_SERVICE;
    };
    SERVICE_TABLE
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, codes)| *codes)
        .unwrap_or(ECONOMY_SERVICE)
}

pub(crate) fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Wrap free text in CDATA. An embedded `]]>` is split across two sections.
pub(crate) fn cdata(text: &str) -> String {
    format!("<![CDATA[{}]]>", text.replace("]]>", "]]]]><![CDATA[>"))
}

/// Shipment date: the payload pickup date when it is a valid `YYYY-MM-DD`,
/// otherwise `today`.
fn shipment_date(details: &ShipmentDetails, today: NaiveDate) -> NaiveDate {
    details
        .pickup_date
        .as_deref()
        .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok())
        .unwrap_or(today)
}

fn element(xml: &mut String, tag: &str, value: &str) {
    xml.push_str(&format!("<{tag}>{}</{tag}>", escape(value.trim())));
}

fn text_element(xml: &mut String, tag: &str, value: &str) {
    xml.push_str(&format!("<{tag}>{}</{tag}>", cdata(value.trim())));
}

fn party(xml: &mut String, tag: &str, address: &Address, rules: &AddressRules, free_text: bool) {
    let write_text = if free_text { text_element } else { element };

    xml.push_str(&format!("<{tag}>"));
    write_text(xml, "Nombre", address.display_name());
    write_text(xml, "Direccion", &address.address);
    write_text(xml, "Poblacion", &address.city);
    element(xml, "Pais", rules.country(address));
    element(xml, "CP", &rules.postcode(address));
    element(xml, "Telefono", &address.phone);
    element(xml, "Email", &address.email);
    if !address.contact.trim().is_empty() {
        write_text(xml, "ATT", &address.contact);
    }
    if !address.vat.trim().is_empty() {
        element(xml, "NIF", &address.vat);
    }
    xml.push_str(&format!("</{tag}>"));
}

/// SOAP envelope for the `GrabaServicios` call.
pub fn build_request(
    context: &ShipmentContext,
    details: &ShipmentDetails,
    guid: &str,
    today: NaiveDate,
    rules: &AddressRules,
) -> String {
    let (service, schedule) = service_codes(details.shipment_type.as_deref());
    let weight = details.weight_or(1.0).max(0.01);

    let mut xml = String::with_capacity(2048);
    xml.push_str(r#"<?xml version="1.0" encoding="utf-8"?>"#);
    xml.push_str(concat!(
        r#"<soap12:Envelope xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" "#,
        r#"xmlns:xsd="http://www.w3.org/2001/XMLSchema" "#,
        r#"xmlns:soap12="http://www.w3.org/2003/05/soap-envelope">"#,
        r#"<soap12:Body><GrabaServicios xmlns="http://www.asmred.com/"><docIn>"#,
    ));
    xml.push_str(&format!(
        r#"<Servicios uidcliente="{}" xmlns="http://www.asmred.com/"><Envio codbarras="">"#,
        escape(guid.trim())
    ));

    element(&mut xml, "Fecha", &shipment_date(details, today).format("%d/%m/%Y").to_string());
    element(&mut xml, "Servicio", &service.to_string());
    element(&mut xml, "Horario", &schedule.to_string());
    element(&mut xml, "Bultos", &details.packages.to_string());
    element(&mut xml, "Peso", &decimal(weight));
    if let Some(volume) = details.volume_m3() {
        element(&mut xml, "Volumen", &format!("{volume:.3}"));
    }
    element(&mut xml, "Portes", "P");
    element(&mut xml, "Retorno", "0");
    element(&mut xml, "Pod", "N");
    element(&mut xml, "DNINomb", "0");

    party(&mut xml, "Remite", &details.sender, rules, false);
    party(&mut xml, "Destinatario", &details.receiver, rules, true);
    if let Some(message) = details.message.as_deref().filter(|m| !m.trim().is_empty()) {
        text_element(&mut xml, "Observaciones", message);
    }

    xml.push_str(&format!(
        r#"<Referencias><Referencia tipo="C">{}</Referencia><Referencia tipo="0">{}</Referencia></Referencias>"#,
        escape(&context.reference()),
        escape(context.shipment_number()),
    ));

    if let Some(incoterm) = details.incoterm.as_deref().filter(|i| !i.trim().is_empty()) {
        xml.push_str("<Aduanas>");
        element(&mut xml, "Incoterm", incoterm);
        xml.push_str("</Aduanas>");
    }
    if let Some(cod) = details.cod_amount.filter(|c| *c > 0.0) {
        xml.push_str("<Importes>");
        element(&mut xml, "Reembolso", &decimal(cod));
        xml.push_str("</Importes>");
    }
    if let Some(insured) = details.insured_value.filter(|v| *v > 0.0) {
        xml.push_str(r#"<Seguro tipo="1">"#);
        element(&mut xml, "Importe", &decimal(insured));
        xml.push_str("</Seguro>");
    }

    xml.push_str(r#"<DevuelveAdicionales><Etiqueta tipo="PDF"></Etiqueta></DevuelveAdicionales>"#);
    xml.push_str("</Envio></Servicios></docIn></GrabaServicios></soap12:Body></soap12:Envelope>");
    xml
}
