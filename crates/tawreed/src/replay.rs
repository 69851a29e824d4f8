// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Offline replay of recorded change-feed captures.
//!
//! Each line is one raw change payload. Lines are normalized and folded into
//! one reconciler per entity exactly as a live collection would fold them.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use serde_json::{Map, Value};
use tawreed_core::{EntityKind, RawChange, ReceiptStamp, TawreedError};
use tawreed_live::{EventNormalizer, Reconciler};
use tracing::{info, warn};

/// Outcome of folding a capture.
#[derive(Debug)]
pub struct Replay {
    pub collections: BTreeMap<String, Reconciler>,
    pub applied: usize,
    pub dropped: usize,
}

impl Replay {
    /// Collections as a JSON object keyed by entity name.
    pub fn to_json(&self) -> Value {
        let collections: Map<String, Value> = self
            .collections
            .iter()
            .map(|(name, reconciler)| {
                let rows = reconciler
                    .collection()
                    .iter()
                    .filter_map(|row| serde_json::to_value(row).ok())
                    .collect();
                (name.clone(), Value::Array(rows))
            })
            .collect();
        Value::Object(collections)
    }
}

pub fn run(file: &Path, entity: Option<EntityKind>) -> Result<(), TawreedError> {
    let replay = if file == Path::new("-") {
        replay_lines(io::stdin().lock(), entity)?
    } else {
        let handle = File::open(file)
            .map_err(|e| TawreedError::Internal(format!("cannot open {}: {e}", file.display())))?;
        replay_lines(BufReader::new(handle), entity)?
    };
    info!(applied = replay.applied, dropped = replay.dropped, "replay finished");
    let rendered = serde_json::to_string_pretty(&replay.to_json())
        .map_err(|e| TawreedError::Internal(e.to_string()))?;
    println!("{rendered}");
    Ok(())
}

/// Folds every line of `reader`. Malformed lines are logged and skipped.
pub fn replay_lines(reader: impl BufRead, entity: Option<EntityKind>) -> Result<Replay, TawreedError> {
    let normalizer = EventNormalizer::new();
    let mut replay = Replay {
        collections: BTreeMap::new(),
        applied: 0,
        dropped: 0,
    };

    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| TawreedError::Internal(format!("read failed: {e}")))?;
        let line_no = index + 1;
        if line.trim().is_empty() {
            continue;
        }
        let raw: RawChange = match serde_json::from_str(&line) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(line = line_no, error = %err, "skipping unparseable line");
                replay.dropped += 1;
                continue;
            }
        };
        let Some(kind) = entity.or_else(|| raw.table.as_deref().and_then(EntityKind::from_table))
        else {
            warn!(line = line_no, table = ?raw.table, "skipping change for unknown table");
            replay.dropped += 1;
            continue;
        };
        match normalizer.normalize(kind, &raw, ReceiptStamp(line_no as u64)) {
            Ok(event) => {
                replay
                    .collections
                    .entry(kind.to_string())
                    .or_insert_with(|| Reconciler::new(kind))
                    .apply(&event);
                replay.applied += 1;
            }
            Err(warning) => {
                warn!(line = line_no, entity = %kind, error = %warning, "dropping malformed change event");
                replay.dropped += 1;
            }
        }
    }
    Ok(replay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const CAPTURE: &str = r#"
{"eventType":"INSERT","table":"requests","new":{"id":"r1","created_at":"2024-01-01T10:00:00Z","title":"Audio gear"}}
{"eventType":"INSERT","table":"requests","new":{"id":"r2","created_at":"2024-01-01T10:05:00Z","title":"Desks"}}
{"eventType":"UPDATE","table":"requests","new":{"id":"r1","title":"Audio gear v2"}}
{"eventType":"INSERT","table":"offers","new":{"id":"o1","request_id":"r1","price":250}}
{"eventType":"DELETE","table":"requests","old":{"id":"r2"}}
not json
{"eventType":"INSERT","table":"audit_log","new":{"id":"a1"}}
{"eventType":"INSERT","table":"requests","new":{"title":"no id"}}
"#;

    #[test]
    fn replay_folds_capture_per_entity() {
        let replay = replay_lines(Cursor::new(CAPTURE), None).unwrap();
        assert_eq!(replay.applied, 5);
        assert_eq!(replay.dropped, 3);

        let json = replay.to_json();
        let requests = json["request"].as_array().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0]["title"], "Audio gear v2");
        assert_eq!(json["offer"][0]["price_display"], "250 SAR");
    }

    #[test]
    fn explicit_entity_overrides_table() {
        let capture = r#"{"eventType":"INSERT","new":{"id":"m1","sender_id":"u1","body":"hi"}}"#;
        let replay = replay_lines(Cursor::new(capture), Some(EntityKind::Message)).unwrap();
        assert_eq!(replay.applied, 1);
        assert!(replay.collections.contains_key("message"));
    }
}
