use std::fmt;

use crate::error::ComicError;

/// User-supplied story text. The only validation is that it is not blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryPrompt(String);

impl StoryPrompt {
    pub fn new(raw: impl AsRef<str>) -> Result<Self, ComicError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(ComicError::EmptyPrompt);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoryPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
