use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use serde::{Deserialize, Serialize};

use crate::gate::Gate;
use crate::metrics::Metrics;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed()
}

fn json_response(status: u16, body: String) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(full_body(body))
        .unwrap()
}

#[derive(Clone)]
pub struct AdminState {
    pub gate: Arc<Gate>,
    pub metrics: Metrics,
}

fn query_param<'a>(uri: &'a hyper::Uri, name: &str) -> Option<&'a str> {
    uri.query()?.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next()?;
        let value = parts.next().unwrap_or("");
        if key == name {
            Some(value)
        } else {
            None
        }
    })
}

#[derive(Serialize)]
struct StatusBody {
    open: bool,
    timestamp: String,
}

#[derive(Deserialize)]
struct FilterBody {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Values", default)]
    values: Vec<String>,
}

/// Dispatches the gate admin HTTP surface (§6), plus `/healthz` and
/// `/metrics`. Mirrors the flat `match req.uri().path()` style the proxy's
/// admin handler uses for its own surface.
pub async fn handle_admin(
    req: Request<Incoming>,
    state: AdminState,
) -> Result<Response<BoxBody>, hyper::Error> {
    match req.uri().path() {
        "/healthz" => Ok(json_response(200, r#"{"status":"ok"}"#.to_string())),

        "/metrics" => Ok(Response::builder()
            .status(200)
            .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
            .body(full_body(state.metrics.render()))
            .unwrap()),

        "/status" => match query_param(req.uri(), "open") {
            None => {
                let status = state.gate.state();
                let body = StatusBody {
                    open: status.open,
                    timestamp: humantime::format_rfc3339(status.since).to_string(),
                };
                Ok(json_response(200, serde_json::to_string(&body).unwrap()))
            }
            Some(raw) => {
                let changed = match raw {
                    "true" => state.gate.raise(),
                    "false" => state.gate.lower(),
                    _ => {
                        return Ok(json_response(
                            400,
                            r#"{"error":"open must be true or false"}"#.to_string(),
                        ))
                    }
                };
                let status = if changed { 201 } else { 200 };
                Ok(json_response(status, r#"{"status":"ok"}"#.to_string()))
            }
        },

        "/filters" => match *req.method() {
            Method::GET => {
                let filters = state.gate.filters_snapshot();
                Ok(json_response(200, serde_json::to_string(&filters).unwrap()))
            }
            Method::POST | Method::PUT => {
                let body = req.into_body().collect().await?.to_bytes();
                let Ok(parsed) = serde_json::from_slice::<FilterBody>(&body) else {
                    return Ok(json_response(400, r#"{"error":"malformed body"}"#.to_string()));
                };
                let values: HashSet<String> = parsed.values.into_iter().collect();
                state.gate.edit_filters(&parsed.key, values, true);
                Ok(json_response(200, r#"{"status":"ok"}"#.to_string()))
            }
            Method::DELETE => {
                let body = req.into_body().collect().await?.to_bytes();
                let Ok(parsed) = serde_json::from_slice::<FilterBody>(&body) else {
                    return Ok(json_response(400, r#"{"error":"malformed body"}"#.to_string()));
                };
                state.gate.edit_filters(&parsed.key, HashSet::new(), false);
                Ok(json_response(200, r#"{"status":"ok"}"#.to_string()))
            }
            _ => Ok(json_response(405, r#"{"error":"method not allowed"}"#.to_string())),
        },

        _ => Ok(json_response(404, r#"{"error":"not found"}"#.to_string())),
    }
}
