use thiserror::Error;

/// Failures of the layout compositor.
#[derive(Debug, Error)]
pub enum CompositionError {
    /// Every page was a placeholder or could not be decoded.
    #[error("No valid images to compose")]
    NoUsableImages,

    #[error("Failed to encode comic canvas: {0}")]
    Encode(#[from] image::ImageError),
}

/// Errors that end a run (or reject it before it starts).
///
/// Recoverable stage failures never surface as a `ComicError`; they are
/// absorbed by the stage that produced them.
#[derive(Debug, Error)]
pub enum ComicError {
    #[error("Story prompt is required")]
    EmptyPrompt,

    #[error("Character generation failed: {0}")]
    Character(#[source] anyhow::Error),

    #[error(transparent)]
    Composition(#[from] CompositionError),
}
