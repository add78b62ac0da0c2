use crate::client::{to_data_url, GenerationClient};
use crate::config::ComicConfig;
use crate::error::ComicError;
use crate::story::StoryPrompt;

/// Fixed description for the reference character. The story is not part of
/// the request; a uniform chroma-key backdrop keeps the subject easy to cut out.
pub const CHARACTER_DESCRIPTION: &str = "Professional character illustration for a comic series. \
Main character with distinctive appearance designed for consistency across multiple panels. \
Character stands confidently in a neutral standing pose on a bright green screen background (RGB 0,255,0). \
Full-body shot, centered composition, the character filling about 60% of the frame. \
Professional comic book illustration style. Vibrant colors, clear linework, dynamic lighting. \
Suitable for compositing into various comic panel scenes. \
The character's design is memorable and instantly recognizable. \
Green screen background is solid and uniform for easy removal.";

/// Base64 PNG of the protagonist; created once per run and only read after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterAsset {
    base64: String,
}

impl CharacterAsset {
    pub fn base64(&self) -> &str {
        &self.base64
    }

    pub fn data_url(&self) -> String {
        to_data_url(&self.base64)
    }
}

/// One image request, no retry. Any failure aborts the run.
pub fn generate_character(
    client: &dyn GenerationClient,
    story: &StoryPrompt,
    config: &ComicConfig,
) -> Result<CharacterAsset, ComicError> {
    tracing::info!(story = %story, "requesting reference character");
    let base64 = client
        .generate_image(CHARACTER_DESCRIPTION, config.image_width, config.image_height)
        .map_err(ComicError::Character)?;
    if base64.trim().is_empty() {
        return Err(ComicError::Character(anyhow::anyhow!(
            "character image payload was empty"
        )));
    }
    Ok(CharacterAsset { base64 })
}
