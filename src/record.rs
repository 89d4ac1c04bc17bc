//! The in-process snapshot of daemon-side torrents.
//!
//! Records are assembled by merging the partial field sets each fetch
//! returns, keyed by the daemon-assigned id, then enriched with fields
//! derived at merge time. The snapshot is fetched once per run and
//! read-only afterwards.

use std::collections::BTreeMap;

use serde_json::{Number, Value};
use tracing::debug;

use crate::{
    error::{Result, SprocketError},
    session::Session,
};

/// Daemon status bitfield labels, taken from libtransmission.
const STATUS_LABELS: &[(i64, &str)] = &[
    (1 << 0, "waiting to check"),
    (1 << 1, "checking"),
    (1 << 2, "downloading"),
    (1 << 3, "seeding"),
    (1 << 4, "stopped"),
];

pub fn status_label(code: i64) -> Option<&'static str> {
    STATUS_LABELS
        .iter()
        .find(|(bit, _)| *bit == code)
        .map(|(_, label)| *label)
}

#[derive(Debug, Clone, Default)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn from_fields(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }

    pub fn id(&self) -> Option<i64> {
        self.get("id").and_then(Value::as_i64)
    }

    pub fn name(&self) -> Option<&str> {
        self.get("name").and_then(Value::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// String form used by equality and regex filters and by templates.
    pub fn string_form(&self, field: &str) -> Option<String> {
        self.get(field).map(value_to_string)
    }

    /// Numeric form used by comparison filters; strings holding numbers
    /// are accepted, anything else is not a number.
    pub fn numeric_form(&self, field: &str) -> Option<f64> {
        match self.get(field)? {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    /// Folds one fetched field set into the record. A field arriving
    /// twice with the same value is tolerated (the id key is present in
    /// every fragment); a differing value is a protocol fault.
    fn absorb(&mut self, fields: BTreeMap<String, Value>) -> Result<()> {
        for (key, value) in fields {
            match self.fields.get(&key) {
                Some(existing) if *existing != value => {
                    return Err(SprocketError::Protocol(format!(
                        "conflicting values for field '{key}': {existing} vs {value}"
                    )));
                }
                Some(_) => {}
                None => {
                    self.fields.insert(key, value);
                }
            }
        }
        Ok(())
    }

    /// Computes the fields derived from merged data: the human status
    /// label and the upload ratio, quantized to two decimal places. A
    /// zero-size torrent has ratio 0.00.
    fn finalize(&mut self) {
        if let Some(code) = self.get("status-actual").and_then(Value::as_i64) {
            if let Some(label) = status_label(code) {
                self.fields
                    .insert("status".to_string(), Value::String(label.to_string()));
            }
        }

        let uploaded = self.numeric_form("uploaded");
        let size = self.numeric_form("size");
        if let (Some(uploaded), Some(size)) = (uploaded, size) {
            let ratio = if size > 0.0 {
                (uploaded / size * 100.0).round() / 100.0
            } else {
                0.0
            };
            if let Some(number) = Number::from_f64(ratio) {
                self.fields.insert("ratio".to_string(), Value::Number(number));
            }
        }
    }
}

pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct TorrentStore {
    records: Vec<Record>,
    by_name: BTreeMap<String, i64>,
    populated: bool,
}

impl TorrentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetches and merges the snapshot. A no-op once populated: repeated
    /// calls cost no further round trips.
    pub fn populate(&mut self, session: &mut dyn Session) -> Result<()> {
        if self.populated {
            return Ok(());
        }

        let fragments = session.fetch_fragments()?;
        let mut order = Vec::new();
        let mut merged: BTreeMap<i64, Record> = BTreeMap::new();
        for fragment in fragments {
            let record = merged.entry(fragment.id).or_insert_with(|| {
                order.push(fragment.id);
                Record::default()
            });
            record.absorb(fragment.fields)?;
        }

        let mut records = Vec::with_capacity(order.len());
        for id in order {
            if let Some(mut record) = merged.remove(&id) {
                record.finalize();
                if let Some(name) = record.name() {
                    self.by_name.insert(name.to_string(), id);
                }
                records.push(record);
            }
        }

        debug!(count = records.len(), "populated torrent snapshot");
        self.records = records;
        self.populated = true;
        Ok(())
    }

    /// Records in daemon enumeration order.
    pub fn all(&self) -> &[Record] {
        &self.records
    }

    pub fn id_for_name(&self, name: &str) -> Option<i64> {
        self.by_name.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::Path;

    use serde_json::json;

    use crate::session::{Action, Fragment};

    /// Scripted session handing out canned fragments and counting calls.
    struct MockSession {
        fragments: Vec<Fragment>,
        fetch_calls: usize,
    }

    impl MockSession {
        fn new(fragments: Vec<Fragment>) -> Self {
            Self {
                fragments,
                fetch_calls: 0,
            }
        }
    }

    impl Session for MockSession {
        fn fetch_fragments(&mut self) -> Result<Vec<Fragment>> {
            self.fetch_calls += 1;
            Ok(self.fragments.clone())
        }

        fn mutate(&mut self, _action: Action, _ids: &[i64]) -> Result<()> {
            Ok(())
        }

        fn add(&mut self, _path: &Path) -> Result<()> {
            Ok(())
        }
    }

    fn fragment(id: i64, fields: Value) -> Fragment {
        let entries = fields
            .as_object()
            .expect("fields literal is an object")
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Fragment {
            id,
            fields: entries,
        }
    }

    #[test]
    fn merges_info_and_status_into_one_record() {
        let mut session = MockSession::new(vec![
            fragment(1, json!({"id": 1, "name": "a", "size": 100})),
            fragment(1, json!({"id": 1, "uploaded": 50})),
        ]);
        let mut store = TorrentStore::new();
        store.populate(&mut session).expect("populate succeeds");

        let records = store.all();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.id(), Some(1));
        assert_eq!(record.name(), Some("a"));
        assert_eq!(record.numeric_form("size"), Some(100.0));
        assert_eq!(record.numeric_form("uploaded"), Some(50.0));
        assert_eq!(record.numeric_form("ratio"), Some(0.5));
        assert_eq!(store.id_for_name("a"), Some(1));
    }

    #[test]
    fn populate_is_idempotent() {
        let mut session = MockSession::new(vec![fragment(
            1,
            json!({"id": 1, "name": "a", "size": 10, "uploaded": 5}),
        )]);
        let mut store = TorrentStore::new();
        store.populate(&mut session).expect("first populate");
        store.populate(&mut session).expect("second populate");
        store.populate(&mut session).expect("third populate");
        assert_eq!(session.fetch_calls, 1);
        assert_eq!(store.all().len(), 1);
    }

    #[test]
    fn ratio_quantizes_and_guards_zero_size() {
        let mut session = MockSession::new(vec![
            fragment(1, json!({"id": 1, "name": "a", "size": 3, "uploaded": 1})),
            fragment(2, json!({"id": 2, "name": "b", "size": 0, "uploaded": 9})),
        ]);
        let mut store = TorrentStore::new();
        store.populate(&mut session).expect("populate succeeds");

        assert_eq!(store.all()[0].numeric_form("ratio"), Some(0.33));
        assert_eq!(store.all()[1].numeric_form("ratio"), Some(0.0));
    }

    #[test]
    fn derives_status_label_and_keeps_raw_code() {
        let mut session = MockSession::new(vec![fragment(
            1,
            json!({"id": 1, "name": "a", "status-actual": 8}),
        )]);
        let mut store = TorrentStore::new();
        store.populate(&mut session).expect("populate succeeds");

        let record = &store.all()[0];
        assert_eq!(record.string_form("status").as_deref(), Some("seeding"));
        assert_eq!(record.numeric_form("status-actual"), Some(8.0));
    }

    #[test]
    fn conflicting_merge_values_fail_fast() {
        let mut session = MockSession::new(vec![
            fragment(1, json!({"id": 1, "name": "a"})),
            fragment(1, json!({"id": 1, "name": "b"})),
        ]);
        let mut store = TorrentStore::new();
        let err = store
            .populate(&mut session)
            .expect_err("conflict must fail");
        assert!(matches!(err, SprocketError::Protocol(_)), "got {err:?}");
    }

    #[test]
    fn preserves_daemon_enumeration_order() {
        let mut session = MockSession::new(vec![
            fragment(5, json!({"id": 5, "name": "e"})),
            fragment(2, json!({"id": 2, "name": "b"})),
            fragment(9, json!({"id": 9, "name": "j"})),
            fragment(2, json!({"id": 2, "eta": 60})),
        ]);
        let mut store = TorrentStore::new();
        store.populate(&mut session).expect("populate succeeds");

        let ids: Vec<_> = store.all().iter().filter_map(Record::id).collect();
        assert_eq!(ids, vec![5, 2, 9]);
    }
}
