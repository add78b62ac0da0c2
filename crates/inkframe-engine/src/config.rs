use std::env;
use std::path::PathBuf;
use std::time::Duration;

use inkframe_contracts::models::{ModelSelector, CAPABILITY_EDIT, CAPABILITY_IMAGE, CAPABILITY_TEXT};

pub const MIN_PAGE_COUNT: u32 = 3;
pub const MAX_PAGE_COUNT: u32 = 10;
pub const DEFAULT_PAGE_COUNT: u32 = 4;
pub const DEFAULT_REQUEST_SPACING_MS: u64 = 500;
pub const DEFAULT_TEXT_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_IMAGE_MODEL: &str = "google/gemini-2.5-flash-image-preview";
pub const DEFAULT_IMAGE_SIZE: u32 = 1024;
pub const DEFAULT_REFERENCE_STRENGTH: f64 = 0.7;
pub const DEFAULT_REQUEST_TIMEOUT_S: f64 = 120.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    OpenRouter,
    Dryrun,
}

impl Transport {
    pub fn provider_name(self) -> &'static str {
        match self {
            Transport::OpenRouter => "openrouter",
            Transport::Dryrun => "dryrun",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "openrouter" => Some(Transport::OpenRouter),
            "dryrun" | "dry-run" | "offline" => Some(Transport::Dryrun),
            _ => None,
        }
    }
}

/// Fixed output canvas for the composed comic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasSpec {
    pub width: u32,
    pub height: u32,
    pub padding: u32,
}

impl Default for CanvasSpec {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 1600,
            padding: 20,
        }
    }
}

/// Tuning knobs for one pipeline run.
///
/// | Env Var                          | Default                                  |
/// |----------------------------------|------------------------------------------|
/// | `INKFRAME_TRANSPORT`             | `openrouter`                             |
/// | `INKFRAME_TEXT_MODEL`            | `openai/gpt-4o-mini`                     |
/// | `INKFRAME_IMAGE_MODEL`           | `google/gemini-2.5-flash-image-preview`  |
/// | `INKFRAME_DEFAULT_PAGE_COUNT`    | `4` (clamped to 3..=10)                  |
/// | `INKFRAME_REQUEST_SPACING_MS`    | `500`                                    |
/// | `INKFRAME_REFERENCE_CHARACTER`   | `false`                                  |
/// | `INKFRAME_REFERENCE_STRENGTH`    | `0.7`                                    |
/// | `INKFRAME_REQUEST_TIMEOUT_S`     | `120`                                    |
/// | `INKFRAME_SCRATCH_DIR`           | `$TMPDIR/inkframe`                       |
#[derive(Debug, Clone)]
pub struct ComicConfig {
    pub transport: Transport,
    pub text_model: String,
    pub image_model: String,
    pub default_page_count: u32,
    pub request_spacing: Duration,
    pub image_width: u32,
    pub image_height: u32,
    pub reference_character: bool,
    pub reference_strength: f64,
    pub request_timeout: Duration,
    pub canvas: CanvasSpec,
    pub scratch_dir: PathBuf,
}

impl Default for ComicConfig {
    fn default() -> Self {
        Self {
            transport: Transport::OpenRouter,
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            default_page_count: DEFAULT_PAGE_COUNT,
            request_spacing: Duration::from_millis(DEFAULT_REQUEST_SPACING_MS),
            image_width: DEFAULT_IMAGE_SIZE,
            image_height: DEFAULT_IMAGE_SIZE,
            reference_character: false,
            reference_strength: DEFAULT_REFERENCE_STRENGTH,
            request_timeout: Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_S),
            canvas: CanvasSpec::default(),
            scratch_dir: env::temp_dir().join("inkframe"),
        }
    }
}

impl ComicConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    /// Builds a config from any key lookup; unset or unparsable keys keep
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(transport) = lookup("INKFRAME_TRANSPORT").and_then(|raw| Transport::parse(&raw))
        {
            config.transport = transport;
        }
        if let Some(model) = lookup("INKFRAME_TEXT_MODEL") {
            config.text_model = model;
        }
        if let Some(model) = lookup("INKFRAME_IMAGE_MODEL") {
            config.image_model = model;
        }
        if let Some(count) = lookup("INKFRAME_DEFAULT_PAGE_COUNT").and_then(|raw| raw.parse().ok())
        {
            config.set_default_page_count(count);
        }
        if let Some(ms) = lookup("INKFRAME_REQUEST_SPACING_MS").and_then(|raw| raw.parse().ok()) {
            config.request_spacing = Duration::from_millis(ms);
        }
        if let Some(flag) = lookup("INKFRAME_REFERENCE_CHARACTER").and_then(|raw| parse_bool(&raw))
        {
            config.reference_character = flag;
        }
        if let Some(strength) = lookup("INKFRAME_REFERENCE_STRENGTH")
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|value| value.is_finite())
        {
            config.reference_strength = strength.clamp(0.0, 1.0);
        }
        if let Some(timeout) = lookup("INKFRAME_REQUEST_TIMEOUT_S")
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|value| value.is_finite() && *value > 0.0)
        {
            config.request_timeout = Duration::from_secs_f64(timeout);
        }
        if let Some(dir) = lookup("INKFRAME_SCRATCH_DIR") {
            config.scratch_dir = PathBuf::from(dir);
        }
        config
    }

    pub fn set_default_page_count(&mut self, count: u32) {
        self.default_page_count = count.clamp(MIN_PAGE_COUNT, MAX_PAGE_COUNT);
    }

    /// Checks the configured models against the registry for the active
    /// transport, replacing unknown ones with the registry default. Reference
    /// mode needs an image model that also accepts an input image.
    /// Returns the fallback reasons so the caller can log them.
    pub fn resolve_models(&mut self, selector: &ModelSelector) -> Result<Vec<String>, String> {
        let provider = self.transport.provider_name();
        let mut reasons = Vec::new();

        let text = selector.select(Some(&self.text_model), CAPABILITY_TEXT, provider)?;
        if let Some(reason) = text.fallback_reason {
            reasons.push(reason);
        }
        self.text_model = text.model.name;

        let image_capability = if self.reference_character {
            CAPABILITY_EDIT
        } else {
            CAPABILITY_IMAGE
        };
        let image = selector.select(Some(&self.image_model), image_capability, provider)?;
        if let Some(reason) = image.fallback_reason {
            reasons.push(reason);
        }
        self.image_model = image.model.name;

        Ok(reasons)
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
