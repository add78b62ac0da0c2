use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcomeKind {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub outcome: RunOutcomeKind,
    pub story_prompt: String,
    /// Pages listed in the final metadata, including failed ones.
    pub planned_pages: u64,
    /// Pages that actually landed on the composed canvas.
    pub rendered_pages: u64,
    pub grid: Option<String>,
    pub error: Option<String>,
}

pub fn write_summary(
    path: &Path,
    summary: &RunSummary,
    extra: Option<&Map<String, Value>>,
) -> anyhow::Result<()> {
    let mut payload = match serde_json::to_value(summary)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    payload.insert(
        "failed_pages".to_string(),
        Value::Number(
            summary
                .planned_pages
                .saturating_sub(summary.rendered_pages)
                .into(),
        ),
    );
    payload.insert("ts".to_string(), Value::String(now_utc_iso()));
    if let Some(extra) = extra {
        for (key, value) in extra {
            payload.insert(key.clone(), value.clone());
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)?;
    Ok(())
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{write_summary, RunOutcomeKind, RunSummary};

    #[test]
    fn write_summary_generates_expected_payload() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("summary.json");

        let summary = RunSummary {
            run_id: "run-123".to_string(),
            started_at: "2026-02-19T00:00:00+00:00".to_string(),
            finished_at: "2026-02-19T00:10:00+00:00".to_string(),
            outcome: RunOutcomeKind::Completed,
            story_prompt: "A robot learns to paint".to_string(),
            planned_pages: 6,
            rendered_pages: 4,
            grid: Some("2x2".to_string()),
            error: None,
        };
        let mut extra = Map::new();
        extra.insert("out".to_string(), Value::String("comic.png".to_string()));
        write_summary(&path, &summary, Some(&extra))?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        assert_eq!(parsed["run_id"], json!("run-123"));
        assert_eq!(parsed["outcome"], json!("completed"));
        assert_eq!(parsed["failed_pages"], json!(2));
        assert_eq!(parsed["grid"], json!("2x2"));
        assert_eq!(parsed["out"], json!("comic.png"));
        assert!(parsed.get("ts").and_then(Value::as_str).is_some());
        Ok(())
    }

    #[test]
    fn failed_summary_keeps_error_message() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("out").join("summary.json");

        let summary = RunSummary {
            run_id: "run-9".to_string(),
            started_at: "2026-02-19T00:00:00+00:00".to_string(),
            finished_at: "2026-02-19T00:00:05+00:00".to_string(),
            outcome: RunOutcomeKind::Failed,
            story_prompt: "x".to_string(),
            planned_pages: 0,
            rendered_pages: 0,
            grid: None,
            error: Some("Character generation failed".to_string()),
        };
        write_summary(&path, &summary, None)?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        assert_eq!(parsed["outcome"], json!("failed"));
        assert_eq!(parsed["error"], json!("Character generation failed"));
        assert_eq!(parsed["failed_pages"], json!(0));
        Ok(())
    }
}
