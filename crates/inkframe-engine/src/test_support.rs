use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::client::{ChatMessage, DryrunClient, GenerationClient};
use crate::config::ComicConfig;

/// Client double that replays queued outcomes in call order.
///
/// Text calls pop `text`; an empty queue is a failure. Image calls pop
/// `images`; an empty queue succeeds with a small dry-run PNG.
#[derive(Default)]
pub(crate) struct ScriptedClient {
    text: Mutex<VecDeque<Result<String, String>>>,
    images: Mutex<VecDeque<Result<(), String>>>,
    image_prompts: Mutex<Vec<String>>,
    reference_prompts: Mutex<Vec<String>>,
    text_models: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_text(self, reply: &str) -> Self {
        self.push_text(Ok(reply.to_string()));
        self
    }

    pub(crate) fn with_text_error(self, message: &str) -> Self {
        self.push_text(Err(message.to_string()));
        self
    }

    pub(crate) fn with_image_ok(self) -> Self {
        self.push_image(Ok(()));
        self
    }

    pub(crate) fn with_image_error(self, message: &str) -> Self {
        self.push_image(Err(message.to_string()));
        self
    }

    pub(crate) fn image_prompts(&self) -> Vec<String> {
        self.image_prompts.lock().unwrap().clone()
    }

    pub(crate) fn reference_prompts(&self) -> Vec<String> {
        self.reference_prompts.lock().unwrap().clone()
    }

    pub(crate) fn text_models(&self) -> Vec<String> {
        self.text_models.lock().unwrap().clone()
    }

    fn push_text(&self, reply: Result<String, String>) {
        self.text.lock().unwrap().push_back(reply);
    }

    fn push_image(&self, outcome: Result<(), String>) {
        self.images.lock().unwrap().push_back(outcome);
    }

    fn next_image(&self, prompt: &str, width: u32, height: u32) -> Result<String> {
        let outcome = self.images.lock().unwrap().pop_front().unwrap_or(Ok(()));
        match outcome {
            Ok(()) => DryrunClient.generate_image(prompt, width, height),
            Err(message) => Err(anyhow!(message)),
        }
    }
}

impl GenerationClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    fn generate_text(&self, _messages: &[ChatMessage], model: &str) -> Result<String> {
        self.text_models.lock().unwrap().push(model.to_string());
        match self.text.lock().unwrap().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted text reply")),
        }
    }

    fn generate_image(&self, prompt: &str, width: u32, height: u32) -> Result<String> {
        self.image_prompts.lock().unwrap().push(prompt.to_string());
        self.next_image(prompt, width, height)
    }

    fn generate_image_to_image(
        &self,
        prompt: &str,
        _reference_b64: &str,
        _strength: f64,
        width: u32,
        height: u32,
    ) -> Result<String> {
        self.image_prompts.lock().unwrap().push(prompt.to_string());
        self.reference_prompts.lock().unwrap().push(prompt.to_string());
        self.next_image(prompt, width, height)
    }
}

/// Small images and no request spacing so tests stay fast.
pub(crate) fn test_config(scratch: &Path) -> ComicConfig {
    ComicConfig {
        image_width: 48,
        image_height: 64,
        request_spacing: Duration::ZERO,
        scratch_dir: scratch.to_path_buf(),
        ..ComicConfig::default()
    }
}
