use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Event type written to the JSONL log for every progress record.
pub const PROGRESS_EVENT_TYPE: &str = "progress";

/// One page of the finished comic as shown to the display client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    /// 1-based position in narrative order.
    pub id: usize,
    pub prompt: String,
}

/// A single record on the progress stream.
///
/// Intermediate records always carry `is_generating = true`. A run ends with
/// exactly one terminal record (`is_generating = false`) holding either
/// `comic_image` or `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub is_generating: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comic_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<Vec<PageMeta>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn step(current_step: impl Into<String>, progress: u8) -> Self {
        Self {
            is_generating: true,
            current_step: Some(current_step.into()),
            progress: Some(progress.min(100)),
            character_image: None,
            comic_image: None,
            pages: None,
            error: None,
        }
    }

    pub fn with_character_image(mut self, data_url: impl Into<String>) -> Self {
        self.character_image = Some(data_url.into());
        self
    }

    pub fn completed(
        current_step: impl Into<String>,
        comic_image: impl Into<String>,
        pages: Vec<PageMeta>,
    ) -> Self {
        Self {
            is_generating: false,
            current_step: Some(current_step.into()),
            progress: Some(100),
            character_image: None,
            comic_image: Some(comic_image.into()),
            pages: Some(pages),
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            is_generating: false,
            current_step: None,
            progress: None,
            character_image: None,
            comic_image: None,
            pages: None,
            error: Some(message.into()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_generating
    }

    pub fn to_payload(&self) -> anyhow::Result<EventPayload> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => anyhow::bail!("progress event serialized to non-object: {other}"),
        }
    }
}

/// Append-only writer for `events.jsonl`.
///
/// - default fields are `type`, `run_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    run_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                run_id: run_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "run_id".to_string(),
            Value::String(self.inner.run_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }

    pub fn emit_progress(&self, event: &ProgressEvent) -> anyhow::Result<Value> {
        self.emit(PROGRESS_EVENT_TYPE, event.to_payload()?)
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
