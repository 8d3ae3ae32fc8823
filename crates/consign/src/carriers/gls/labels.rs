use roxmltree::{Document, Node};
use thiserror::Error;

use crate::carriers::decode_label;

/// Element names the carrier has used for base64 label content.
pub const LABEL_TAGS: &[&str] = &[
    "Etiqueta",
    "Etiquetas",
    "EtiquetaPDF",
    "Label",
    "LabelPDF",
    "base64Binary",
];

/// Attributes naming the package a label belongs to, in preference order.
const PACKAGE_ATTRS: &[&str] = &["bulto", "codbarras"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedLabel {
    pub package_id: Option<String>,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedResponse {
    /// `codbarras`, else `codexp`, of the `Envio` element.
    pub shipment_number: Option<String>,
    pub labels: Vec<ExtractedLabel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    #[error("response is not well-formed XML: {0}")]
    Malformed(String),
    #[error("carrier rejected the shipment (code {code}): {message}")]
    Rejected { code: i64, message: String },
}

fn named<'a, 'input>(node: &Node<'a, 'input>, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

fn attribute<'a>(node: &Node<'a, '_>, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .filter_map(|name| node.attribute(*name))
        .map(str::trim)
        .find(|v| !v.is_empty())
}

/// Text of the direct text children only; nested elements are ignored.
fn own_text(node: &Node<'_, '_>) -> String {
    node.children()
        .filter(Node::is_text)
        .filter_map(|n| n.text())
        .collect::<String>()
        .trim()
        .to_string()
}

fn all_text(node: &Node<'_, '_>) -> String {
    node.descendants()
        .filter(Node::is_text)
        .filter_map(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Parse a `GrabaServicios` answer.
///
/// Tags are matched by local name. Label text that does not decode as base64
/// is skipped, and a block reported under more than one tag is kept once.
pub fn parse_response(xml: &str) -> Result<ParsedResponse, ResponseError> {
    let doc = Document::parse(xml).map_err(|e| ResponseError::Malformed(e.to_string()))?;
    let root = doc.root();

    let code = root
        .descendants()
        .find(|n| named(n, "Resultado") && n.has_attribute("return"))
        .and_then(|n| n.attribute("return"))
        .map(|raw| {
            raw.trim()
                .parse::<i64>()
                .map_err(|_| ResponseError::Malformed(format!("non-numeric result code '{raw}'")))
        })
        .transpose()?;

    let errors = root
        .descendants()
        .filter(|n| named(n, "Errores"))
        .map(|n| all_text(&n))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("; ");

    match code {
        Some(code) if code < 0 => {
            let message = if errors.is_empty() {
                format!("result code {code}")
            } else {
                errors
            };
            return Err(ResponseError::Rejected { code, message });
        }
        _ if !errors.is_empty() => {
            return Err(ResponseError::Rejected {
                code: code.unwrap_or(-1),
                message: errors,
            });
        }
        _ => {}
    }

    let shipment_number = root
        .descendants()
        .find(|n| named(n, "Envio"))
        .and_then(|envio| attribute(&envio, &["codbarras", "codexp"]))
        .map(str::to_string);

    let mut labels: Vec<ExtractedLabel> = Vec::new();
    for node in root
        .descendants()
        .filter(|n| n.is_element() && LABEL_TAGS.contains(&n.tag_name().name()))
    {
        let text = own_text(&node);
        if text.is_empty() {
            continue;
        }
        let Ok(content) = decode_label(&text) else {
            tracing::debug!(tag = node.tag_name().name(), "label text is not base64; skipped");
            continue;
        };
        if content.is_empty() || labels.iter().any(|l| l.content == content) {
            continue;
        }
        labels.push(ExtractedLabel {
            package_id: attribute(&node, PACKAGE_ATTRS).map(str::to_string),
            content,
        });
    }

    Ok(ParsedResponse {
        shipment_number,
        labels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::pdf_base64;

    fn envelope(inner: &str) -> String {
        format!(
            concat!(
                r#"<?xml version="1.0" encoding="utf-8"?>"#,
                r#"<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope">"#,
                r#"<soap:Body><GrabaServiciosResponse xmlns="http://www.asmred.com/">"#,
                r#"<GrabaServiciosResult><Servicios>{}</Servicios></GrabaServiciosResult>"#,
                r#"</GrabaServiciosResponse></soap:Body></soap:Envelope>"#,
            ),
            inner
        )
    }

    #[test]
    fn extracts_every_label_block() {
        let xml = envelope(&format!(
            r#"<Envio codbarras="6123456789" codexp="998877">
                 <Resultado return="0"/>
                 <Etiquetas>
                   <Etiqueta bulto="1">{}</Etiqueta>
                   <Etiqueta bulto="2">
                     {}
                   </Etiqueta>
                 </Etiquetas>
               </Envio>"#,
            pdf_base64("one"),
            pdf_base64("two"),
        ));

        let parsed = parse_response(&xml).expect("parse");
        assert_eq!(parsed.shipment_number.as_deref(), Some("6123456789"));
        assert_eq!(parsed.labels.len(), 2);
        assert_eq!(parsed.labels[0].package_id.as_deref(), Some("1"));
        assert_eq!(parsed.labels[1].content, b"%PDF-1.4 two");
    }

    #[test]
    fn prefixed_tags_match_by_local_name() {
        let xml = format!(
            r#"<s:Envelope xmlns:s="urn:s" xmlns:g="urn:g"><s:Body>
                 <g:Envio g:x="1" codexp="5550"><g:Resultado return="0"/>
                 <g:base64Binary>{}</g:base64Binary></g:Envio>
               </s:Body></s:Envelope>"#,
            pdf_base64("ns"),
        );

        let parsed = parse_response(&xml).expect("parse");
        assert_eq!(parsed.shipment_number.as_deref(), Some("5550"));
        assert_eq!(parsed.labels.len(), 1);
        assert_eq!(parsed.labels[0].package_id, None);
    }

    #[test]
    fn duplicate_and_undecodable_blocks_are_skipped() {
        let label = pdf_base64("same");
        let xml = envelope(&format!(
            r#"<Envio codbarras="1"><Resultado return="0"/>
                 <Etiqueta>{label}</Etiqueta>
                 <LabelPDF>{label}</LabelPDF>
                 <Label>not base64 at all!</Label>
               </Envio>"#
        ));

        let parsed = parse_response(&xml).expect("parse");
        assert_eq!(parsed.labels.len(), 1);
    }

    #[test]
    fn no_recognized_tags_yields_no_labels() {
        let xml = envelope(r#"<Envio codbarras="1"><Resultado return="0"/><Pdf>JVBERi0=</Pdf></Envio>"#);
        let parsed = parse_response(&xml).expect("parse");
        assert!(parsed.labels.is_empty());
    }

    #[test]
    fn negative_result_is_rejected_with_errors() {
        let xml = envelope(
            r#"<Envio><Resultado return="-33"/><Errores><Error>Codigo postal incorrecto</Error></Errores></Envio>"#,
        );
        let err = parse_response(&xml).expect_err("rejected");
        insta::assert_snapshot!(err.to_string(), @"carrier rejected the shipment (code -33): Codigo postal incorrecto");
    }

    #[test]
    fn errors_without_result_code_are_rejected() {
        let xml = envelope(r#"<Envio><Errores><Error>GUID no valido</Error></Errores></Envio>"#);
        assert_eq!(
            parse_response(&xml),
            Err(ResponseError::Rejected {
                code: -1,
                message: "GUID no valido".into()
            })
        );
    }

    #[test]
    fn empty_errors_element_is_not_a_rejection() {
        let xml = envelope(&format!(
            r#"<Envio codbarras="7"><Resultado return="0"/><Errores/><Etiqueta>{}</Etiqueta></Envio>"#,
            pdf_base64("ok")
        ));
        assert_eq!(parse_response(&xml).expect("parse").labels.len(), 1);
    }

    #[test]
    fn malformed_xml_is_reported() {
        assert!(matches!(
            parse_response("<Envio><Etiqueta>"),
            Err(ResponseError::Malformed(_))
        ));
        assert!(matches!(
            parse_response(r#"<Envio><Resultado return="abc"/></Envio>"#),
            Err(ResponseError::Malformed(_))
        ));
    }
}
