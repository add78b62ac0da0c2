use anyhow::{anyhow, Result};
use serde_json::{Map, Value};

use crate::client::{ChatMessage, GenerationClient};
use crate::config::{ComicConfig, MAX_PAGE_COUNT, MIN_PAGE_COUNT};
use crate::story::StoryPrompt;

const PLANNER_SYSTEM: &str = "You are an expert comic book writer and planner. Your task is to analyze a story concept and determine how many pages a comic adaptation should have.";

/// Number of pages for the comic; always within `MIN_PAGE_COUNT..=MAX_PAGE_COUNT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePlan {
    page_count: u32,
}

impl PagePlan {
    pub fn page_count(self) -> u32 {
        self.page_count
    }
}

/// Asks the text model for a page count. Any failure yields the configured
/// default; this never errors.
pub fn plan_pages(
    client: &dyn GenerationClient,
    story: &StoryPrompt,
    config: &ComicConfig,
) -> PagePlan {
    let messages = planner_messages(story);
    let reply = client.generate_text(&messages, &config.text_model);
    let parsed = reply.and_then(|text| parse_page_count(&text));
    let page_count = match parsed {
        Ok(count) => count,
        Err(err) => {
            tracing::warn!(
                error = %err,
                fallback = config.default_page_count,
                "page planning failed; using default page count"
            );
            config.default_page_count.clamp(MIN_PAGE_COUNT, MAX_PAGE_COUNT)
        }
    };
    PagePlan { page_count }
}

fn planner_messages(story: &StoryPrompt) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(PLANNER_SYSTEM),
        ChatMessage::user(format!(
            "Story concept: \"{story}\"\n\n\
Determine the appropriate number of comic pages ({MIN_PAGE_COUNT}-{MAX_PAGE_COUNT} pages) needed to tell this story effectively.\n\
Consider:\n\
- Story complexity\n\
- Key plot points\n\
- Character development moments\n\
- Pacing\n\n\
Respond in this exact JSON format:\n\
{{\"pageCount\": <number>}}\n\n\
Only respond with valid JSON, no other text."
        )),
    ]
}

/// Extracts `pageCount` from a reply and checks it is an integer in range.
pub(crate) fn parse_page_count(text: &str) -> Result<u32> {
    let object = extract_json_object_from_text(text)
        .ok_or_else(|| anyhow!("planner reply is not a JSON object"))?;
    let value = object
        .get("pageCount")
        .ok_or_else(|| anyhow!("planner reply has no pageCount"))?;
    let count = whole_number(value)
        .ok_or_else(|| anyhow!("pageCount is not a non-negative integer: {value}"))?;
    if !(MIN_PAGE_COUNT as u64..=MAX_PAGE_COUNT as u64).contains(&count) {
        return Err(anyhow!(
            "pageCount {count} outside {MIN_PAGE_COUNT}..={MAX_PAGE_COUNT}"
        ));
    }
    Ok(count as u32)
}

/// Integral JSON numbers, including float spellings like `5.0`.
fn whole_number(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|n| n.is_finite() && *n >= 0.0 && n.fract() == 0.0 && *n <= u64::MAX as f64)
            .map(|n| n as u64)
    })
}

fn strip_code_fence(text: &str) -> String {
    let raw = text.trim();
    if !(raw.starts_with("```") && raw.ends_with("```")) {
        return raw.to_string();
    }
    let lines: Vec<&str> = raw.lines().collect();
    if lines.len() < 2 {
        return raw.to_string();
    }
    let mut body = lines[1..lines.len() - 1].join("\n").trim().to_string();
    if body.to_ascii_lowercase().starts_with("json") {
        body = body[4..].trim().to_string();
    }
    body
}

fn extract_json_object_from_text(text: &str) -> Option<Map<String, Value>> {
    let raw = strip_code_fence(text);
    if raw.trim().is_empty() {
        return None;
    }
    let mut candidates = vec![raw.clone()];
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if end > start {
            candidates.push(raw[start..=end].to_string());
        }
    }
    for candidate in candidates {
        if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(&candidate) {
            return Some(object);
        }
    }
    None
}
