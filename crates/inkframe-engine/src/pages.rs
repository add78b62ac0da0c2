use std::thread;

use crate::character::CharacterAsset;
use crate::client::GenerationClient;
use crate::config::ComicConfig;

/// Outcome for one page, aligned with its prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageImage {
    /// Base64 PNG payload.
    Generated(String),
    /// Placeholder; the page is left out of the composed layout.
    Failed { reason: String },
}

impl PageImage {
    pub fn payload(&self) -> Option<&str> {
        match self {
            PageImage::Generated(base64) => Some(base64),
            PageImage::Failed { .. } => None,
        }
    }

    pub fn is_generated(&self) -> bool {
        matches!(self, PageImage::Generated(_))
    }
}

/// Requests one image per prompt, in order, waiting `request_spacing`
/// between requests. A failed page becomes [`PageImage::Failed`] and the
/// batch continues, so the result always has `prompts.len()` entries.
pub fn generate_page_images(
    client: &dyn GenerationClient,
    prompts: &[String],
    character: &CharacterAsset,
    config: &ComicConfig,
) -> Vec<PageImage> {
    let total = prompts.len();
    let mut images = Vec::with_capacity(total);
    for (index, prompt) in prompts.iter().enumerate() {
        if index > 0 && !config.request_spacing.is_zero() {
            thread::sleep(config.request_spacing);
        }
        let enhanced = enhanced_prompt(prompt, index + 1, total);
        let result = if config.reference_character {
            client.generate_image_to_image(
                &enhanced,
                character.base64(),
                config.reference_strength,
                config.image_width,
                config.image_height,
            )
        } else {
            client.generate_image(&enhanced, config.image_width, config.image_height)
        };
        match result {
            Ok(base64) if !base64.trim().is_empty() => {
                tracing::debug!(page = index + 1, total, "page image generated");
                images.push(PageImage::Generated(base64));
            }
            Ok(_) => {
                tracing::warn!(page = index + 1, total, "page image payload was empty");
                images.push(PageImage::Failed {
                    reason: "empty image payload".to_string(),
                });
            }
            Err(err) => {
                tracing::warn!(page = index + 1, total, error = %err, "page image failed");
                images.push(PageImage::Failed {
                    reason: err.to_string(),
                });
            }
        }
    }
    images
}

/// Wraps a scene prompt with its position and a consistency instruction.
pub fn enhanced_prompt(prompt: &str, page: usize, total: usize) -> String {
    format!(
        "{prompt}\n\n\
IMPORTANT: This is page {page} of {total} in a comic series. The main character should be recognizable and consistent throughout.\n\
Maintain the character's appearance, clothing style, and design from previous panels.\n\
Focus on: character actions, expressions, and the scene context.\n\
Professional comic book art style with clear panel composition."
    )
}
