use std::collections::{BTreeMap, VecDeque};
use std::io::Read;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use consign_config::{CarrierSettings, MapSource, PlainSecrets};
use consign_http::{HttpClient, HttpOptions};
use consign_types::{Payload, ShipmentContext};
use serde_json::{Value, json};
use tiny_http::{Header, Response, Server, StatusCode};

use crate::render::{LabelRenderer, RenderRequest};

/// Canned answer of the fake carrier.
#[derive(Debug, Clone)]
pub(crate) struct Reply {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Reply {
    pub(crate) fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.to_string().into_bytes(),
        }
    }

    pub(crate) fn xml(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/xml; charset=utf-8",
            body: body.as_bytes().to_vec(),
        }
    }

    pub(crate) fn pdf(body: &[u8]) -> Self {
        Self {
            status: 200,
            content_type: "application/pdf",
            body: body.to_vec(),
        }
    }

    pub(crate) fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.as_bytes().to_vec(),
        }
    }
}

/// One request the fake carrier received.
#[derive(Debug, Clone)]
pub(crate) struct Recorded {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Recorded {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub(crate) fn json(&self) -> Value {
        serde_json::from_str(&self.body).expect("request body is JSON")
    }

    pub(crate) fn route(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

pub(crate) struct FakeCarrier {
    pub base_url: String,
    seen: Arc<Mutex<Vec<Recorded>>>,
}

impl FakeCarrier {
    pub(crate) fn requests(&self) -> Vec<Recorded> {
        self.seen.lock().expect("lock").clone()
    }

    pub(crate) fn count(&self, route: &str) -> usize {
        self.requests().iter().filter(|r| r.route() == route).count()
    }

    pub(crate) fn routes(&self) -> Vec<String> {
        self.requests().iter().map(Recorded::route).collect()
    }
}

/// Start a fake carrier answering `"METHOD /path"` routes (query string
/// ignored). Replies for a route are consumed in order and the last one
/// repeats; unknown routes get 404.
pub(crate) fn spawn_carrier(routes: Vec<(&str, Vec<Reply>)>) -> FakeCarrier {
    let mut routes: BTreeMap<String, VecDeque<Reply>> = routes
        .into_iter()
        .map(|(route, replies)| (route.to_string(), replies.into_iter().collect()))
        .collect();

    let server = Server::http("127.0.0.1:0").expect("server");
    let base_url = format!("http://{}", server.server_addr());
    let seen = Arc::new(Mutex::new(Vec::<Recorded>::new()));
    let seen_thread = Arc::clone(&seen);

    thread::spawn(move || {
        for mut req in server.incoming_requests() {
            let mut body = String::new();
            let _ = req.as_reader().read_to_string(&mut body);

            let url = req.url().to_string();
            let (path, query) = match url.split_once('?') {
                Some((p, q)) => (p.to_string(), Some(q.to_string())),
                None => (url.clone(), None),
            };
            let recorded = Recorded {
                method: req.method().to_string(),
                path,
                query,
                headers: req
                    .headers()
                    .iter()
                    .map(|h| (h.field.to_string(), h.value.to_string()))
                    .collect(),
                body,
            };
            let route = recorded.route();
            seen_thread.lock().expect("lock").push(recorded);

            let reply = match routes.get_mut(&route) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
            .unwrap_or_else(|| Reply::text(404, "no route"));

            let resp = Response::from_data(reply.body)
                .with_status_code(StatusCode(reply.status))
                .with_header(
                    Header::from_bytes("Content-Type", reply.content_type).expect("header"),
                );
            let _ = req.respond(resp);
        }
    });

    FakeCarrier { base_url, seen }
}

pub(crate) fn settings(code: &str, pairs: &[(&str, &str)]) -> CarrierSettings {
    let source: MapSource = pairs.iter().copied().collect();
    CarrierSettings::new(code, Arc::new(source), Arc::new(PlainSecrets))
}

pub(crate) fn http() -> HttpClient {
    HttpClient::new(HttpOptions::default().with_timeout(Duration::from_secs(5))).expect("client")
}

pub(crate) fn payload(value: Value) -> Payload {
    value.as_object().cloned().expect("payload object")
}

/// Two-package domestic shipment from Madrid to Barcelona.
pub(crate) fn sample_payload() -> Payload {
    payload(json!({
        "sender": {
            "name": "Acme Tools SL",
            "contact": "Ana Ruiz",
            "address": "Calle Mayor 1",
            "city": "Madrid",
            "postcode": "28013",
            "country": "ES",
            "phone": "910000000",
            "email": "dispatch@acme.example"
        },
        "receiver": {
            "name": "Bruno Costa",
            "address": "Carrer de Balmes 10",
            "city": "Barcelona",
            "postcode": "8001",
            "phone": "930000000",
            "email": "bruno@example.com"
        },
        "packages": 2,
        "weight": "3,5",
        "length": 30,
        "width": 20,
        "height": 10,
        "message": "Leave at reception"
    }))
}

pub(crate) fn context(code: &str, payload: Payload) -> ShipmentContext {
    ShipmentContext::builder(code, "ORD-1")
        .order_reference(Some("REF-1"))
        .shipment_number(Some("SHIP-1"))
        .payload(payload)
        .build()
}

/// Renderer that returns `%PDF <shipment>/<index>`.
pub(crate) fn pdf_renderer() -> Arc<dyn LabelRenderer> {
    Arc::new(|req: &RenderRequest<'_>| -> anyhow::Result<Vec<u8>> {
        Ok(format!("%PDF {}/{}", req.shipment_number, req.package_index).into_bytes())
    })
}

/// Base64 of `%PDF-1.4 <tag>`.
pub(crate) fn pdf_base64(tag: &str) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(format!("%PDF-1.4 {tag}"))
}
