//! Structured test logging.
//!
//! Emits JSONL entries to `target/test-logs` so integration test runs
//! (especially the skip-guarded privileged ones) leave a machine-parsable
//! trace of what actually executed.

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

fn log_file_path() -> PathBuf {
    let target = std::env::var("CARGO_TARGET_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../target"));
    target
        .join("test-logs")
        .join(format!("cgkit-core-tests-{}.jsonl", std::process::id()))
}

/// Emit a structured JSONL log entry for tests.
pub fn log_event(level: &str, msg: &str, file: &str, line: u32, fields: &[(&str, Value)]) {
    let mut map = Map::new();
    map.insert(
        "ts".into(),
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
    );
    map.insert("level".into(), Value::String(level.into()));
    map.insert("msg".into(), Value::String(msg.into()));
    map.insert("file".into(), Value::String(file.into()));
    map.insert("line".into(), Value::Number(line.into()));
    map.insert(
        "test".into(),
        Value::String(
            std::thread::current()
                .name()
                .unwrap_or("unnamed")
                .to_string(),
        ),
    );
    for (key, value) in fields {
        map.insert((*key).into(), value.clone());
    }

    let path = log_file_path();
    if let Some(parent) = path.parent() {
        if fs::create_dir_all(parent).is_err() {
            return;
        }
    }
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&path) {
        let line = Value::Object(map).to_string();
        let _ = file.write_all(line.as_bytes());
        let _ = file.write_all(b"\n");
    }
}

#[macro_export]
macro_rules! test_log {
    ($level:ident, $msg:expr $(, $key:ident = $val:expr )* $(,)?) => {{
        let fields = vec![
            $( (stringify!($key), serde_json::json!($val)), )*
        ];
        $crate::test_log::log_event(stringify!($level), &$msg.to_string(), file!(), line!(), &fields);
    }};
}
