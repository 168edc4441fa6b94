// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `emv.properties` persistence (spec §6): two `yyyyMMddHHmmss` timestamps,
//! read-if-exists / write-atomically / warn-and-default-on-parse-failure,
//! in the shape of the teacher's credential persistence helper.

use std::path::Path;

use chrono::NaiveDateTime;

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const KEY_LAST_TMS: &str = "emv_last_tms";
const KEY_LAST_CLOSURE: &str = "emv_last_closure";

/// The two timestamps tracked in `emv.properties` (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmvProperties {
    pub emv_last_tms: NaiveDateTime,
    pub emv_last_closure: NaiveDateTime,
}

impl Default for EmvProperties {
    fn default() -> Self {
        let sentinel = default_sentinel();
        Self { emv_last_tms: sentinel, emv_last_closure: sentinel }
    }
}

fn default_sentinel() -> NaiveDateTime {
    NaiveDateTime::parse_from_str("20240101000000", TIMESTAMP_FORMAT).expect("valid constant timestamp")
}

/// Loads `emv.properties` from `path`; a missing file, unreadable file, or a
/// field that fails to parse falls back to the `2024-01-01 00:00:00`
/// sentinel for that field rather than failing the whole load.
pub fn load(path: &Path) -> EmvProperties {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(err) => {
            tracing::warn!(?path, %err, "emv.properties unreadable, using defaults");
            return EmvProperties::default();
        }
    };

    let mut props = EmvProperties::default();
    for line in contents.lines() {
        let Some((key, value)) = line.split_once('=') else { continue };
        let (key, value) = (key.trim(), value.trim());
        let parsed = NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT);
        match (key, parsed) {
            (KEY_LAST_TMS, Ok(ts)) => props.emv_last_tms = ts,
            (KEY_LAST_CLOSURE, Ok(ts)) => props.emv_last_closure = ts,
            (KEY_LAST_TMS | KEY_LAST_CLOSURE, Err(err)) => {
                tracing::warn!(%key, %value, %err, "malformed emv.properties timestamp, using default");
            }
            _ => {}
        }
    }
    props
}

/// Writes `emv.properties` atomically: the new contents are written to a
/// sibling temp file, then renamed over the target (same-filesystem rename
/// is atomic), matching the teacher's persisted-credential save shape.
pub fn save(path: &Path, props: &EmvProperties) -> std::io::Result<()> {
    let contents = format!(
        "{KEY_LAST_TMS}={}\n{KEY_LAST_CLOSURE}={}\n",
        props.emv_last_tms.format(TIMESTAMP_FORMAT),
        props.emv_last_closure.format(TIMESTAMP_FORMAT),
    );

    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_default_sentinel() {
        let props = load(Path::new("/nonexistent/emv.properties"));
        assert_eq!(props, EmvProperties::default());
        assert_eq!(props.emv_last_tms, default_sentinel());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = std::env::temp_dir().join(format!("emv-props-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join("emv.properties");

        let props = EmvProperties {
            emv_last_tms: NaiveDateTime::parse_from_str("20250304050607", TIMESTAMP_FORMAT).expect("parse"),
            emv_last_closure: NaiveDateTime::parse_from_str("20250304060000", TIMESTAMP_FORMAT).expect("parse"),
        };
        save(&path, &props).expect("save");
        let loaded = load(&path);
        assert_eq!(loaded, props);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn malformed_field_falls_back_to_default_for_that_field() {
        let dir = std::env::temp_dir().join(format!("emv-props-test-bad-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join("emv.properties");
        std::fs::write(&path, "emv_last_tms=not-a-timestamp\nemv_last_closure=20250304060000\n").expect("write");

        let props = load(&path);
        assert_eq!(props.emv_last_tms, default_sentinel());
        assert_eq!(
            props.emv_last_closure,
            NaiveDateTime::parse_from_str("20250304060000", TIMESTAMP_FORMAT).expect("parse")
        );

        let _ = std::fs::remove_dir_all(&dir);
    }
}
