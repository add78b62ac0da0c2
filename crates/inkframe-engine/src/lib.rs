pub mod character;
pub mod client;
pub mod config;
pub mod error;
pub mod layout;
pub mod pages;
pub mod pipeline;
pub mod planner;
pub mod prompts;
pub mod storage;
pub mod story;

#[cfg(test)]
mod test_support;

pub use client::{build_client, GenerationClient};
pub use config::{ComicConfig, Transport};
pub use error::{ComicError, CompositionError};
pub use pipeline::{ComicLayout, ComicPipeline, ProgressSink, RunOutcome};
pub use story::StoryPrompt;
