//! Typed operations against the daemon, independent of transport.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use crate::{
    config::{Config, Mode},
    error::Result,
    http::HttpSession,
    socket::SocketSession,
};

/// One partial record as returned by a single fetch, keyed by the
/// daemon-assigned id. Field names are already canonical.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub id: i64,
    pub fields: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Remove,
    Start,
    Stop,
    Verify,
}

impl Action {
    /// User-facing command word; also the socket wire command.
    pub fn name(self) -> &'static str {
        match self {
            Action::Remove => "remove",
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Verify => "verify",
        }
    }

    pub(crate) fn http_method(self) -> &'static str {
        match self {
            Action::Remove => "torrent-remove",
            Action::Start => "torrent-start",
            Action::Stop => "torrent-stop",
            Action::Verify => "torrent-verify",
        }
    }
}

pub trait Session {
    /// Fetches every record's field sets; fragments sharing an id are
    /// merged downstream.
    fn fetch_fragments(&mut self) -> Result<Vec<Fragment>>;

    fn mutate(&mut self, action: Action, ids: &[i64]) -> Result<()>;

    fn add(&mut self, path: &Path) -> Result<()>;
}

pub fn connect(config: &Config) -> Result<Box<dyn Session>> {
    match config.mode {
        Mode::Socket => Ok(Box::new(SocketSession::connect(config)?)),
        Mode::Http => Ok(Box::new(HttpSession::new(config)?)),
    }
}
