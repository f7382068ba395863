/*
 * bridge.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Inbound calls from the external process.
 */

//! The inbound side of the gateway.
//!
//! The external process sends one JSON request per line:
//!
//! ```text
//! {"id": 1, "method": "getItemIdRaw", "params": ["ABCD1234"]}
//! ```
//!
//! and receives one response per line. Successful results are wire-encoded
//! with [`crate::escape::encode`] and carried as a string, so the caller
//! decodes `result` to recover the value:
//!
//! ```text
//! {"id": 1, "result": "17"}
//! {"id": 2, "error": "No%20item%20found%20for%20key%20%270_ZZZZ%27"}
//! ```

use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::engine::EngineFactory;
use crate::error::{Error, Result};
use crate::escape::{encode, escape};
use crate::host::Host;
use crate::key::ItemId;
use crate::session::{FuzzyQuery, Session};

/// Operations an external process can call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Method {
    GetItemIdRaw,
    GetItemIdRawBatch,
    InstantiateCiteProc,
    UpdateItems,
    AppendCitationCluster,
    AppendCitationClusterBatch,
    MakeBibliography,
    RegisterLocalItems,
    IsInTextStyle,
    GetItemIdDynamic,
    GetItemIdDynamicBatch,
}

impl Method {
    pub fn parse(name: &str) -> Result<Self> {
        serde_json::from_value(Value::String(name.to_string()))
            .map_err(|_| Error::InvalidRequest(format!("unknown method '{}'", name)))
    }
}

/// A decoded request line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// A response line. Exactly one of `result` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    fn success(id: Value, value: &Value) -> Self {
        match encode(value) {
            Ok(result) => Self {
                id,
                result: Some(result),
                error: None,
            },
            Err(e) => Self::failure(id, &e),
        }
    }

    fn failure(id: Value, error: &Error) -> Self {
        Self {
            id,
            result: None,
            error: Some(escape(&error.to_string())),
        }
    }
}

fn param(params: &[Value], index: usize) -> &Value {
    params.get(index).unwrap_or(&Value::Null)
}

fn string_param<'a>(params: &'a [Value], index: usize, name: &str) -> Result<&'a str> {
    param(params, index)
        .as_str()
        .ok_or_else(|| Error::InvalidRequest(format!("'{}' must be a string", name)))
}

fn optional_string(value: &Value, name: &str) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        _ => Err(Error::InvalidRequest(format!(
            "'{}' must be a string or null",
            name
        ))),
    }
}

fn array_param<'a>(params: &'a [Value], index: usize, name: &str) -> Result<&'a [Value]> {
    param(params, index)
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| Error::InvalidRequest(format!("'{}' must be an array", name)))
}

/// `[creator, title | null, date | null]`
fn fuzzy_query(value: &Value) -> Result<FuzzyQuery> {
    let fields = value.as_array().ok_or_else(|| {
        Error::InvalidRequest("lookup must be an array [creator, title, date]".to_string())
    })?;
    let creator = fields
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidRequest("lookup creator must be a string".to_string()))?;

    Ok(FuzzyQuery {
        creator: creator.to_string(),
        title: optional_string(fields.get(1).unwrap_or(&Value::Null), "title")?,
        date: optional_string(fields.get(2).unwrap_or(&Value::Null), "date")?,
    })
}

/// Run one request against the session and return its (unencoded) result.
pub fn dispatch<H: Host, F: EngineFactory>(
    session: &mut Session<H, F>,
    method: Method,
    params: &[Value],
) -> Result<Value> {
    debug!(?method, "Dispatching request");

    match method {
        Method::GetItemIdRaw => {
            let key = string_param(params, 0, "key")?;
            Ok(json!(session.item_id(key)?))
        }
        Method::GetItemIdRawBatch => {
            let keys = array_param(params, 0, "keys")?
                .iter()
                .map(|k| {
                    k.as_str()
                        .ok_or_else(|| Error::InvalidRequest("keys must be strings".to_string()))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(json!(session.item_ids(&keys)?))
        }
        Method::InstantiateCiteProc => {
            let style = string_param(params, 0, "style")?;
            let locale = optional_string(param(params, 1), "locale")?;
            Ok(Value::String(session.instantiate(style, locale.as_deref())?))
        }
        Method::UpdateItems => {
            let ids: Vec<ItemId> =
                serde_json::from_value(param(params, 0).clone()).map_err(|_| {
                    Error::InvalidRequest("'ids' must be an array of integers".to_string())
                })?;
            session.update_items(&ids)?;
            Ok(Value::Null)
        }
        Method::AppendCitationCluster => {
            let text = session.append_citation_cluster(param(params, 0))?;
            Ok(json!(text))
        }
        Method::AppendCitationClusterBatch => {
            let citations = array_param(params, 0, "citations")?;
            Ok(json!(session.append_citation_clusters(citations)?))
        }
        Method::MakeBibliography => {
            let options = match param(params, 0) {
                Value::Null => None,
                other => Some(other),
            };
            Ok(session
                .make_bibliography(options)?
                .unwrap_or_else(|| Value::String(String::new())))
        }
        Method::RegisterLocalItems => {
            session.register_local_items(param(params, 0))?;
            Ok(Value::Null)
        }
        Method::IsInTextStyle => Ok(Value::Bool(session.is_in_text_style()?)),
        Method::GetItemIdDynamic => {
            let query = fuzzy_query(param(params, 0))?;
            Ok(json!(session.fuzzy_item_id(&query)?.to_wire()))
        }
        Method::GetItemIdDynamicBatch => {
            let queries = array_param(params, 0, "lookups")?
                .iter()
                .map(fuzzy_query)
                .collect::<Result<Vec<_>>>()?;
            let found: Vec<i64> = session
                .fuzzy_item_ids(&queries)?
                .into_iter()
                .map(|m| m.to_wire())
                .collect();
            Ok(json!(found))
        }
    }
}

/// Handle one request line and produce the response.
pub fn handle_request<H: Host, F: EngineFactory>(
    session: &mut Session<H, F>,
    line: &str,
) -> Response {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            let err = Error::InvalidRequest(e.to_string());
            warn!(error = %err, "Malformed request");
            return Response::failure(Value::Null, &err);
        }
    };

    let outcome =
        Method::parse(&request.method).and_then(|method| dispatch(session, method, &request.params));

    match outcome {
        Ok(value) => Response::success(request.id, &value),
        Err(e) => {
            warn!(method = %request.method, error = %e, "Request failed");
            Response::failure(request.id, &e)
        }
    }
}

/// Serve requests from `reader` until EOF, writing one response per line.
/// Returns the number of requests handled.
pub fn serve<H: Host, F: EngineFactory, R: BufRead, W: Write>(
    session: &mut Session<H, F>,
    reader: R,
    mut writer: W,
) -> Result<usize> {
    let mut handled = 0;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_request(session, &line);
        serde_json::to_writer(&mut writer, &response)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        handled += 1;
    }
    debug!(handled, "Request stream closed");
    Ok(handled)
}
