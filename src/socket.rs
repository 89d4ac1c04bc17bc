//! Persistent binary-socket transport: handshake once, then framed
//! bencode envelopes for every request.

use std::{
    collections::BTreeMap,
    io::{self, Read, Write},
    net::TcpStream,
    path::Path,
    time::Duration,
};

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use serde_json::Value as Json;
use tracing::debug;

use crate::{
    bencode::{self, Value},
    config::{Config, SocketEndpoint, HANDSHAKE_LABEL, PROTOCOL_MAX, PROTOCOL_MIN},
    error::{Result, SprocketError},
    framing,
    session::{Action, Fragment, Session},
};

const INFO_COMMAND: &str = "get-info-all";
const INFO_REPLY: &str = "info";
const STATUS_COMMAND: &str = "get-status-all";
const STATUS_REPLY: &str = "status";
const ADD_COMMAND: &str = "addfiles";
const REPLY_SUCCEEDED: &str = "succeeded";
const REPLY_FAILED: &str = "failed";

/// Wire field name to canonical record field, per fetch category.
const INFO_FIELDS: &[(&str, &str)] = &[
    ("id", "id"),
    ("name", "name"),
    ("hash", "hash"),
    ("size", "size"),
];
const STATUS_FIELDS: &[(&str, &str)] = &[
    ("id", "id"),
    ("state", "status-actual"),
    ("eta", "eta"),
    ("rate-download", "rate-download"),
    ("rate-upload", "rate-upload"),
    ("uploaded", "uploaded"),
    ("downloaded", "downloaded"),
    ("error", "error"),
    ("error-string", "error-string"),
];

trait Transport: Read + Write {}

impl<T: Read + Write> Transport for T {}

pub struct SocketSession {
    stream: Box<dyn Transport>,
}

impl SocketSession {
    pub fn connect(config: &Config) -> Result<Self> {
        let timeout = config.timeout();
        let stream: Box<dyn Transport> = match config.socket_endpoint() {
            SocketEndpoint::Tcp(addr) => {
                let stream = TcpStream::connect(&addr).map_err(|err| {
                    SprocketError::Connection(format!(
                        "failed to connect to daemon at {addr}: {err}"
                    ))
                })?;
                configure_timeouts(
                    &addr,
                    stream.set_read_timeout(Some(timeout)),
                    stream.set_write_timeout(Some(timeout)),
                )?;
                Box::new(stream)
            }
            SocketEndpoint::Unix(path) => connect_unix(&path, timeout)?,
        };

        let mut session = Self { stream };
        session.handshake()?;
        Ok(session)
    }

    fn handshake(&mut self) -> Result<()> {
        let mut version = BTreeMap::new();
        version.insert(b"label".to_vec(), Value::str(HANDSHAKE_LABEL));
        version.insert(b"max".to_vec(), Value::Int(PROTOCOL_MAX));
        version.insert(b"min".to_vec(), Value::Int(PROTOCOL_MIN));
        let mut envelope = BTreeMap::new();
        envelope.insert(b"version".to_vec(), Value::Dict(version));
        self.send(&Value::Dict(envelope))?;

        let reply = self.receive()?;
        let version = reply.dict_get("version").ok_or_else(|| {
            SprocketError::Connection("daemon handshake is missing a version envelope".into())
        })?;
        let min = version
            .dict_get("min")
            .and_then(Value::as_int)
            .ok_or_else(|| {
                SprocketError::Connection("daemon handshake is missing a minimum version".into())
            })?;
        let max = version
            .dict_get("max")
            .and_then(Value::as_int)
            .ok_or_else(|| {
                SprocketError::Connection("daemon handshake is missing a maximum version".into())
            })?;
        if min > PROTOCOL_MAX || max < PROTOCOL_MIN {
            return Err(SprocketError::Connection(format!(
                "daemon speaks protocol versions {min} through {max}, \
                 client supports {PROTOCOL_MIN} through {PROTOCOL_MAX}"
            )));
        }
        let label = version.dict_get("label").and_then(Value::as_str).unwrap_or("");
        debug!(label, min, max, "daemon handshake complete");
        Ok(())
    }

    fn send(&mut self, message: &Value) -> Result<()> {
        let payload = bencode::encode(message);
        framing::write_frame(&mut self.stream, &payload)
    }

    fn receive(&mut self) -> Result<Value> {
        let payload = framing::read_frame(&mut self.stream)?;
        bencode::decode(&payload)
    }

    /// Sends a `[command, argument]` envelope and splits the reply into
    /// its envelope name and body.
    fn request(&mut self, command: &str, argument: Value) -> Result<(String, Option<Value>)> {
        debug!(command, "sending request");
        self.send(&Value::List(vec![Value::str(command), argument]))?;
        let reply = self.receive()?;
        let items = reply.as_list().ok_or_else(|| {
            SprocketError::Protocol("reply is not an envelope list".into())
        })?;
        let name = items
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| SprocketError::Protocol("reply envelope has no name".into()))?;
        Ok((name.to_string(), items.get(1).cloned()))
    }

    fn expect_success(&mut self, command: &str, argument: Value) -> Result<()> {
        let (name, body) = self.request(command, argument)?;
        match name.as_str() {
            REPLY_SUCCEEDED => Ok(()),
            REPLY_FAILED => Err(SprocketError::Command {
                command: command.to_string(),
                message: reply_message(body.as_ref()),
            }),
            other => Err(SprocketError::Protocol(format!(
                "unexpected reply '{other}' to {command}"
            ))),
        }
    }

    fn fetch_category(
        &mut self,
        command: &str,
        expect: &str,
        fields: &[(&str, &str)],
    ) -> Result<Vec<Fragment>> {
        let field_list = Value::List(fields.iter().map(|(wire, _)| Value::str(wire)).collect());
        let (name, body) = self.request(command, field_list)?;
        if name == REPLY_FAILED {
            return Err(SprocketError::Command {
                command: command.to_string(),
                message: reply_message(body.as_ref()),
            });
        }
        if name != expect {
            return Err(SprocketError::Protocol(format!(
                "expected '{expect}' reply to {command}, got '{name}'"
            )));
        }
        let body = body.ok_or_else(|| {
            SprocketError::Protocol(format!("'{expect}' reply carries no records"))
        })?;
        let records = body.as_list().ok_or_else(|| {
            SprocketError::Protocol(format!("'{expect}' reply body is not a list"))
        })?;

        let mut fragments = Vec::with_capacity(records.len());
        for record in records {
            let entries = record.as_dict().ok_or_else(|| {
                SprocketError::Protocol(format!("'{expect}' record is not a dictionary"))
            })?;
            let mut mapped = BTreeMap::new();
            for (wire, canonical) in fields {
                if let Some(value) = entries.get(wire.as_bytes()) {
                    mapped.insert((*canonical).to_string(), to_json(value));
                }
            }
            let id = mapped
                .get("id")
                .and_then(Json::as_i64)
                .ok_or_else(|| {
                    SprocketError::Protocol(format!("'{expect}' record is missing an id"))
                })?;
            fragments.push(Fragment { id, fields: mapped });
        }
        Ok(fragments)
    }
}

impl Session for SocketSession {
    fn fetch_fragments(&mut self) -> Result<Vec<Fragment>> {
        let mut fragments = self.fetch_category(INFO_COMMAND, INFO_REPLY, INFO_FIELDS)?;
        fragments.extend(self.fetch_category(STATUS_COMMAND, STATUS_REPLY, STATUS_FIELDS)?);
        Ok(fragments)
    }

    fn mutate(&mut self, action: Action, ids: &[i64]) -> Result<()> {
        let id_list = Value::List(ids.iter().map(|id| Value::Int(*id)).collect());
        self.expect_success(action.name(), id_list)
    }

    fn add(&mut self, path: &Path) -> Result<()> {
        let paths = Value::List(vec![Value::str(&path.display().to_string())]);
        self.expect_success(ADD_COMMAND, paths)
    }
}

fn connect_unix(path: &Path, timeout: Duration) -> Result<Box<dyn Transport>> {
    #[cfg(unix)]
    {
        let stream = UnixStream::connect(path).map_err(|err| {
            SprocketError::Connection(format!(
                "failed to connect to daemon socket {}: {err}",
                path.display()
            ))
        })?;
        let addr = path.display().to_string();
        configure_timeouts(
            &addr,
            stream.set_read_timeout(Some(timeout)),
            stream.set_write_timeout(Some(timeout)),
        )?;
        Ok(Box::new(stream))
    }
    #[cfg(not(unix))]
    {
        let _ = timeout;
        Err(SprocketError::Config(format!(
            "unix domain socket {} is not supported on this platform; set tcp_addr",
            path.display()
        )))
    }
}

fn configure_timeouts(
    endpoint: &str,
    read: io::Result<()>,
    write: io::Result<()>,
) -> Result<()> {
    read.and(write).map_err(|err| {
        SprocketError::Connection(format!(
            "failed to configure timeouts for {endpoint}: {err}"
        ))
    })
}

fn reply_message(body: Option<&Value>) -> String {
    body.and_then(Value::as_str)
        .unwrap_or("daemon reported failure")
        .to_string()
}

fn to_json(value: &Value) -> Json {
    match value {
        Value::Int(number) => Json::from(*number),
        Value::Bytes(bytes) => Json::String(String::from_utf8_lossy(bytes).into_owned()),
        Value::List(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Dict(entries) => Json::Object(
            entries
                .iter()
                .map(|(key, item)| {
                    (String::from_utf8_lossy(key).into_owned(), to_json(item))
                })
                .collect(),
        ),
    }
}
