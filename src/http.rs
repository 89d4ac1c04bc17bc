//! Stateless JSON-over-HTTP transport: one POST per call.

use std::{collections::BTreeMap, path::Path};

use reqwest::{
    blocking::Client,
    header::{ACCEPT, CONTENT_TYPE},
};
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    config::Config,
    error::{Result, SprocketError},
    session::{Action, Fragment, Session},
};

const FETCH_METHOD: &str = "torrent-get";
const ADD_METHOD: &str = "torrent-add";

/// Daemon field name to canonical record field.
const TORRENT_FIELDS: &[(&str, &str)] = &[
    ("id", "id"),
    ("name", "name"),
    ("hashString", "hash"),
    ("error", "error"),
    ("errorString", "error-string"),
    ("eta", "eta"),
    ("rateDownload", "rate-download"),
    ("rateUpload", "rate-upload"),
    ("status", "status-actual"),
    ("sizeWhenDone", "size-when-done"),
    ("totalSize", "size"),
    ("uploadRatio", "upload-ratio"),
    ("downloadEver", "downloaded"),
    ("uploadEver", "uploaded"),
];

pub struct HttpSession {
    client: Client,
    url: String,
}

impl HttpSession {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|err| {
                SprocketError::Connection(format!("failed to build http client: {err}"))
            })?;
        Ok(Self {
            client,
            url: config.rpc_url(),
        })
    }

    /// Posts one `{method, arguments}` call; a non-success result is
    /// reported against `command`, the user-facing command word.
    fn call(&self, method: &str, command: &str, arguments: Value) -> Result<Value> {
        let body = json!({ "method": method, "arguments": arguments });
        debug!(method, "sending rpc request");
        let response = self
            .client
            .post(&self.url)
            .header(ACCEPT, "*/*")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body.to_string())
            .send()
            .map_err(|err| {
                SprocketError::Connection(format!(
                    "failed to reach daemon at {}: {err}",
                    self.url
                ))
            })?;
        let reply: Value = response.json().map_err(|err| {
            SprocketError::Protocol(format!("daemon reply is not valid json: {err}"))
        })?;
        let result = reply
            .get("result")
            .and_then(Value::as_str)
            .ok_or_else(|| SprocketError::Protocol("daemon reply has no result field".into()))?;
        if result != "success" {
            return Err(SprocketError::Command {
                command: command.to_string(),
                message: result.to_string(),
            });
        }
        Ok(reply.get("arguments").cloned().unwrap_or(Value::Null))
    }
}

impl Session for HttpSession {
    fn fetch_fragments(&mut self) -> Result<Vec<Fragment>> {
        let fields: Vec<&str> = TORRENT_FIELDS.iter().map(|(wire, _)| *wire).collect();
        let arguments = self.call(FETCH_METHOD, FETCH_METHOD, json!({ "fields": fields }))?;
        let torrents = arguments
            .get("torrents")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                SprocketError::Protocol("torrent-get reply has no torrents list".into())
            })?;

        let mut fragments = Vec::with_capacity(torrents.len());
        for torrent in torrents {
            let entries = torrent.as_object().ok_or_else(|| {
                SprocketError::Protocol("torrent entry is not an object".into())
            })?;
            let mut mapped = BTreeMap::new();
            for (wire, canonical) in TORRENT_FIELDS {
                if let Some(value) = entries.get(*wire) {
                    mapped.insert((*canonical).to_string(), value.clone());
                }
            }
            let id = mapped
                .get("id")
                .and_then(Value::as_i64)
                .ok_or_else(|| SprocketError::Protocol("torrent entry is missing an id".into()))?;
            fragments.push(Fragment { id, fields: mapped });
        }
        Ok(fragments)
    }

    fn mutate(&mut self, action: Action, ids: &[i64]) -> Result<()> {
        self.call(action.http_method(), action.name(), json!({ "ids": ids }))?;
        Ok(())
    }

    fn add(&mut self, path: &Path) -> Result<()> {
        let filename = path.display().to_string();
        self.call(ADD_METHOD, "add", json!({ "filename": filename }))?;
        Ok(())
    }
}
