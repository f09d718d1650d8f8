use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use relay_wire::AthleteRecord;
use serde::{Deserialize, Serialize};

/// `device_id -> AthleteRecord` table, hot-reloadable.
///
/// Hot reload replaces the whole table atomically (copy-on-write): readers
/// `load()` a snapshot `Arc` and never observe a mix of the old and new
/// mapping, per the single-writer/atomic-replacement discipline.
#[derive(Clone, Default, Debug)]
pub struct AthleteTable(HashMap<u32, AthleteRecord>);

impl AthleteTable {
    pub fn from_records(records: Vec<AthleteRecord>) -> Self {
        Self(records.into_iter().map(|r| (r.device_id, r)).collect())
    }

    pub fn lookup(&self, device_id: u32) -> AthleteRecord {
        self.0
            .get(&device_id)
            .cloned()
            .unwrap_or_else(|| AthleteRecord::unknown(device_id))
    }

    pub fn all(&self) -> Vec<AthleteRecord> {
        let mut v: Vec<_> = self.0.values().cloned().collect();
        v.sort_by_key(|r| r.device_id);
        v
    }
}

pub struct AthleteRegistry {
    table: ArcSwap<AthleteTable>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryDocument {
    athletes: Vec<AthleteRecord>,
}

impl AthleteRegistry {
    pub fn new(initial: AthleteTable) -> Self {
        Self {
            table: ArcSwap::from_pointee(initial),
        }
    }

    /// Load from a JSON document at startup. A missing file yields an empty
    /// registry (every device id then resolves to its synthetic record);
    /// an unreadable-but-present file is a configuration fault.
    pub fn load_from_path(path: &std::path::Path) -> Result<AthleteTable, crate::error::RelayError> {
        if !path.exists() {
            return Ok(AthleteTable::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let doc: RegistryDocument = serde_json::from_str(&raw)
            .map_err(|e| crate::error::RelayError::Config(format!("invalid athletes_config: {e}")))?;
        Ok(AthleteTable::from_records(doc.athletes))
    }

    pub fn snapshot(&self) -> Arc<AthleteTable> {
        self.table.load_full()
    }

    pub fn lookup(&self, device_id: u32) -> AthleteRecord {
        self.table.load().lookup(device_id)
    }

    /// Atomically replace the entire table.
    pub fn replace(&self, table: AthleteTable) {
        self.table.store(Arc::new(table));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: u32) -> AthleteRecord {
        AthleteRecord {
            athlete_id: format!("A{id}"),
            device_id: id,
            name: format!("Athlete {id}"),
            team: "Blue".into(),
        }
    }

    #[test]
    fn unknown_device_returns_synthetic_record() {
        let reg = AthleteRegistry::new(AthleteTable::default());
        let r = reg.lookup(7);
        assert_eq!(r.athlete_id, "T7");
        assert_eq!(r.name, "Unknown 7");
    }

    #[test]
    fn lookup_resolves_known_device() {
        let reg = AthleteRegistry::new(AthleteTable::from_records(vec![rec(1)]));
        assert_eq!(reg.lookup(1).name, "Athlete 1");
    }

    #[test]
    fn replace_is_visible_to_subsequent_lookups_in_entirety() {
        let reg = AthleteRegistry::new(AthleteTable::from_records(vec![rec(1)]));
        let before = reg.snapshot();
        assert_eq!(before.lookup(1).name, "Athlete 1");
        assert_eq!(before.lookup(2).athlete_id, "T2");

        reg.replace(AthleteTable::from_records(vec![rec(1), rec(2)]));

        // Previously taken snapshot still sees the old table (no torn read).
        assert_eq!(before.lookup(2).athlete_id, "T2");
        // Fresh lookup sees the new table in entirety.
        let after = reg.snapshot();
        assert_eq!(after.lookup(2).name, "Athlete 2");
    }
}
