use std::io::Cursor;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response as HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::config::{non_empty_env, ComicConfig, Transport};

const OPENROUTER_DEFAULT_BASE: &str = "https://openrouter.ai/api/v1";
const TEXT_TEMPERATURE: f64 = 0.7;
const TEXT_MAX_TOKENS: u64 = 2000;
const REFERENCE_SUFFIX: &str = "Keep the character consistent with the provided reference image.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Remote text/image generation as seen by the pipeline stages.
///
/// Image methods return bare base64 (no data-URL prefix). Every method fails
/// on a non-2xx response, an explicit error payload, or an empty result.
pub trait GenerationClient: Send + Sync {
    fn name(&self) -> &str;

    fn generate_text(&self, messages: &[ChatMessage], model: &str) -> Result<String>;

    fn generate_image(&self, prompt: &str, width: u32, height: u32) -> Result<String>;

    fn generate_image_to_image(
        &self,
        prompt: &str,
        reference_b64: &str,
        strength: f64,
        width: u32,
        height: u32,
    ) -> Result<String>;
}

pub fn build_client(config: &ComicConfig) -> Result<Box<dyn GenerationClient>> {
    match config.transport {
        Transport::Dryrun => Ok(Box::new(DryrunClient)),
        Transport::OpenRouter => {
            let Some(api_key) = non_empty_env("OPENROUTER_API_KEY") else {
                bail!("OPENROUTER_API_KEY not set (use INKFRAME_TRANSPORT=dryrun to run offline)");
            };
            Ok(Box::new(OpenRouterClient::new(api_key, config)?))
        }
    }
}

pub struct OpenRouterClient {
    api_base: String,
    api_key: String,
    image_model: String,
    referer: String,
    title: String,
    http: HttpClient,
}

impl OpenRouterClient {
    pub fn new(api_key: String, config: &ComicConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build OpenRouter HTTP client")?;
        Ok(Self {
            api_base: openrouter_api_base(),
            api_key,
            image_model: config.image_model.clone(),
            referer: non_empty_env("OPENROUTER_HTTP_REFERER")
                .or_else(|| non_empty_env("APP_URL"))
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            title: non_empty_env("OPENROUTER_X_TITLE")
                .unwrap_or_else(|| "AI Comics Generator".to_string()),
            http,
        })
    }

    fn apply_headers(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("HTTP-Referer", self.referer.as_str())
            .header("X-Title", self.title.as_str())
    }

    fn post_chat(&self, payload: &Value) -> Result<Value> {
        let endpoint = format!("{}/chat/completions", self.api_base);
        tracing::debug!(%endpoint, model = ?payload.get("model"), "posting chat completion");
        let request = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(payload);
        let response = self
            .apply_headers(request)
            .send()
            .with_context(|| format!("OpenRouter request failed ({endpoint})"))?;
        let parsed = response_json_or_error("OpenRouter", response)?;
        if let Some(message) = error_message(&parsed) {
            bail!("OpenRouter error: {message}");
        }
        Ok(parsed)
    }

    fn image_payload(&self, content: Value, width: u32, height: u32) -> Value {
        json!({
            "model": self.image_model,
            "messages": [{
                "role": "user",
                "content": content,
            }],
            "modalities": ["image", "text"],
            "image_config": {
                "aspect_ratio": aspect_ratio(width, height),
            },
        })
    }
}

impl GenerationClient for OpenRouterClient {
    fn name(&self) -> &str {
        "openrouter"
    }

    fn generate_text(&self, messages: &[ChatMessage], model: &str) -> Result<String> {
        let payload = json!({
            "model": model,
            "messages": messages,
            "temperature": TEXT_TEMPERATURE,
            "max_tokens": TEXT_MAX_TOKENS,
        });
        let response = self.post_chat(&payload)?;
        extract_text_content(&response)
    }

    fn generate_image(&self, prompt: &str, width: u32, height: u32) -> Result<String> {
        let payload = self.image_payload(Value::String(prompt.to_string()), width, height);
        let response = self.post_chat(&payload)?;
        extract_image_payload(&response)
    }

    fn generate_image_to_image(
        &self,
        prompt: &str,
        reference_b64: &str,
        strength: f64,
        width: u32,
        height: u32,
    ) -> Result<String> {
        // Chat-completions image models take no strength parameter.
        tracing::debug!(strength, "reference strength is advisory on OpenRouter");
        let content = json!([
            {
                "type": "text",
                "text": format!("{prompt}. {REFERENCE_SUFFIX}"),
            },
            {
                "type": "image_url",
                "image_url": { "url": to_data_url(reference_b64) },
            },
        ]);
        let payload = self.image_payload(content, width, height);
        let response = self.post_chat(&payload)?;
        extract_image_payload(&response)
    }
}

/// Offline transport: no text model, solid-color images keyed by prompt.
pub struct DryrunClient;

impl GenerationClient for DryrunClient {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate_text(&self, _messages: &[ChatMessage], model: &str) -> Result<String> {
        bail!("dryrun transport does not generate text (model '{model}')")
    }

    fn generate_image(&self, prompt: &str, width: u32, height: u32) -> Result<String> {
        solid_png_base64(prompt, width, height)
    }

    fn generate_image_to_image(
        &self,
        prompt: &str,
        _reference_b64: &str,
        _strength: f64,
        width: u32,
        height: u32,
    ) -> Result<String> {
        solid_png_base64(prompt, width, height)
    }
}

fn solid_png_base64(prompt: &str, width: u32, height: u32) -> Result<String> {
    let (r, g, b) = color_from_prompt(prompt);
    let image = RgbImage::from_pixel(width.max(1), height.max(1), Rgb([r, g, b]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("dryrun image encode failed")?;
    Ok(BASE64.encode(bytes))
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn openrouter_api_base() -> String {
    let raw = non_empty_env("OPENROUTER_API_BASE")
        .or_else(|| non_empty_env("OPENROUTER_BASE_URL"))
        .unwrap_or_else(|| OPENROUTER_DEFAULT_BASE.to_string());
    let mut base = raw.trim().trim_end_matches('/').to_string();
    if let Ok(parsed) = reqwest::Url::parse(&base) {
        if parsed.path().trim().is_empty() || parsed.path() == "/" {
            base = format!("{base}/api/v1");
        }
    }
    base.trim_end_matches('/').to_string()
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        let detail = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|parsed| error_message(&parsed))
            .unwrap_or_else(|| truncate_text(&body, 512));
        bail!("{provider} request failed ({code}): {detail}");
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn error_message(payload: &Value) -> Option<String> {
    let error = payload.get("error")?;
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error.as_str())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("unknown error");
    Some(message.to_string())
}

fn first_message(payload: &Value) -> Option<&Value> {
    payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(|row| row.get("message"))
}

pub(crate) fn extract_text_content(payload: &Value) -> Result<String> {
    let content = first_message(payload)
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string);
    match content {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => bail!("OpenRouter returned no text content"),
    }
}

pub(crate) fn extract_image_payload(payload: &Value) -> Result<String> {
    if let Some(message) = error_message(payload) {
        bail!("{message}");
    }
    let url = first_message(payload)
        .and_then(|message| message.get("images"))
        .and_then(Value::as_array)
        .and_then(|images| images.first())
        .and_then(|image| image.get("image_url"))
        .and_then(|image_url| image_url.get("url"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|url| !url.is_empty());
    let Some(url) = url else {
        bail!("No image generated");
    };
    Ok(strip_data_url(url))
}

/// Returns the base64 part of a `data:image/...;base64,` URL, or the input
/// unchanged when it is not one.
pub fn strip_data_url(value: &str) -> String {
    if value.starts_with("data:image") {
        if let Some((_, payload)) = value.split_once("base64,") {
            return payload.to_string();
        }
    }
    value.to_string()
}

pub fn to_data_url(base64_png: &str) -> String {
    if base64_png.starts_with("data:") {
        return base64_png.to_string();
    }
    format!("data:image/png;base64,{base64_png}")
}

pub fn aspect_ratio(width: u32, height: u32) -> String {
    if width == 0 || height == 0 {
        return "1:1".to_string();
    }
    let divisor = gcd(width, height);
    format!("{}:{}", width / divisor, height / divisor)
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;
    use serde_json::json;

    use super::{
        aspect_ratio, extract_image_payload, extract_text_content, strip_data_url, to_data_url,
        truncate_text, ChatMessage, DryrunClient, GenerationClient, BASE64,
    };

    #[test]
    fn aspect_ratio_reduces_by_gcd() {
        assert_eq!(aspect_ratio(1024, 1024), "1:1");
        assert_eq!(aspect_ratio(1200, 1600), "3:4");
        assert_eq!(aspect_ratio(1920, 1080), "16:9");
        assert_eq!(aspect_ratio(0, 512), "1:1");
    }

    #[test]
    fn chat_messages_serialize_with_lowercase_roles() -> anyhow::Result<()> {
        let value = serde_json::to_value(vec![
            ChatMessage::system("plan"),
            ChatMessage::user("story"),
        ])?;
        assert_eq!(
            value,
            json!([
                {"role": "system", "content": "plan"},
                {"role": "user", "content": "story"},
            ])
        );
        Ok(())
    }

    #[test]
    fn text_content_comes_from_first_choice() -> anyhow::Result<()> {
        let payload = json!({
            "choices": [
                {"message": {"role": "assistant", "content": "{\"pageCount\": 5}"}},
                {"message": {"role": "assistant", "content": "ignored"}},
            ]
        });
        assert_eq!(extract_text_content(&payload)?, "{\"pageCount\": 5}");
        assert!(extract_text_content(&json!({"choices": []})).is_err());
        assert!(extract_text_content(&json!({"choices": [{"message": {"content": "  "}}]})).is_err());
        Ok(())
    }

    #[test]
    fn image_payload_strips_data_url_prefix() -> anyhow::Result<()> {
        let payload = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "images": [
                        {"type": "image_url", "image_url": {"url": "data:image/png;base64,QUJD"}}
                    ]
                }
            }]
        });
        assert_eq!(extract_image_payload(&payload)?, "QUJD");
        Ok(())
    }

    #[test]
    fn image_payload_fails_on_error_or_missing_images() {
        let error = json!({"error": {"message": "rate limited"}});
        let err = extract_image_payload(&error).unwrap_err();
        assert_eq!(err.to_string(), "rate limited");

        let empty = json!({"choices": [{"message": {"images": []}}]});
        let err = extract_image_payload(&empty).unwrap_err();
        assert_eq!(err.to_string(), "No image generated");

        let text_only = json!({"choices": [{"message": {"content": "sorry"}}]});
        assert!(extract_image_payload(&text_only).is_err());
    }

    #[test]
    fn data_url_helpers_round_trip_plain_base64() {
        assert_eq!(strip_data_url("data:image/jpeg;base64,AAAA"), "AAAA");
        assert_eq!(strip_data_url("https://cdn.example/x.png"), "https://cdn.example/x.png");
        assert_eq!(to_data_url("AAAA"), "data:image/png;base64,AAAA");
        assert_eq!(
            to_data_url("data:image/webp;base64,AAAA"),
            "data:image/webp;base64,AAAA"
        );
    }

    #[test]
    fn truncate_text_appends_ellipsis() {
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("abc", 3), "abc");
    }

    #[test]
    fn dryrun_images_are_decodable_and_prompt_keyed() -> anyhow::Result<()> {
        let client = DryrunClient;
        let first = client.generate_image("a robot", 64, 32)?;
        let again = client.generate_image("a robot", 64, 32)?;
        let other = client.generate_image("a painter", 64, 32)?;
        assert_eq!(first, again);
        assert_ne!(first, other);

        let decoded = image::load_from_memory(&BASE64.decode(first)?)?;
        assert_eq!((decoded.width(), decoded.height()), (64, 32));
        Ok(())
    }

    #[test]
    fn dryrun_text_generation_fails() {
        let err = DryrunClient
            .generate_text(&[ChatMessage::user("hi")], "dryrun-text-1")
            .unwrap_err();
        assert!(err.to_string().contains("does not generate text"));
    }
}
