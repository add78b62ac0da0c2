use std::sync::mpsc::Sender;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use inkframe_contracts::events::{EventWriter, PageMeta, ProgressEvent};

use crate::character::{generate_character, CharacterAsset};
use crate::client::{to_data_url, GenerationClient};
use crate::config::ComicConfig;
use crate::error::ComicError;
use crate::layout::{compose_layout, Grid};
use crate::pages::{generate_page_images, PageImage};
use crate::planner::plan_pages;
use crate::prompts::generate_page_prompts;
use crate::storage::TempStore;
use crate::story::StoryPrompt;

const COMPLETE_MESSAGE: &str = "Comic generation complete!";

/// Receives progress records in emission order. Delivery is fire-and-forget:
/// a sink that can no longer deliver must drop the event, not block or fail.
pub trait ProgressSink {
    fn deliver(&mut self, event: ProgressEvent);
}

impl ProgressSink for Sender<ProgressEvent> {
    fn deliver(&mut self, event: ProgressEvent) {
        // Receiver gone means the client went away; the run carries on.
        let _ = self.send(event);
    }
}

impl ProgressSink for Vec<ProgressEvent> {
    fn deliver(&mut self, event: ProgressEvent) {
        self.push(event);
    }
}

impl ProgressSink for EventWriter {
    fn deliver(&mut self, event: ProgressEvent) {
        if let Err(err) = self.emit_progress(&event) {
            tracing::warn!(path = %self.path().display(), error = %err, "failed to append progress event");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Character,
    Planning,
    Prompts,
    Images,
    Compose,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Character,
        Stage::Planning,
        Stage::Prompts,
        Stage::Images,
        Stage::Compose,
    ];

    /// (start, done) progress values.
    pub fn checkpoints(self) -> (u8, u8) {
        match self {
            Stage::Character => (10, 20),
            Stage::Planning => (30, 40),
            Stage::Prompts => (50, 60),
            Stage::Images => (70, 85),
            Stage::Compose => (90, 100),
        }
    }

    fn start_message(self) -> &'static str {
        match self {
            Stage::Character => "Generating main character with green screen...",
            Stage::Planning => "Planning comic narrative...",
            Stage::Prompts => "Creating prompts for each page...",
            Stage::Images => "Generating page images...",
            Stage::Compose => "Arranging pages into comic layout...",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Character => "character",
            Stage::Planning => "planning",
            Stage::Prompts => "prompts",
            Stage::Images => "images",
            Stage::Compose => "compose",
        }
    }
}

/// Where a run stands. Each non-final state owns exactly what later stages
/// still need.
enum PipelineState {
    Idle,
    CharacterReady {
        character: CharacterAsset,
    },
    PlanReady {
        character: CharacterAsset,
        page_count: u32,
    },
    PromptsReady {
        character: CharacterAsset,
        prompts: Vec<String>,
    },
    ImagesReady {
        prompts: Vec<String>,
        images: Vec<PageImage>,
    },
}

impl PipelineState {
    fn next_stage(&self) -> Stage {
        match self {
            PipelineState::Idle => Stage::Character,
            PipelineState::CharacterReady { .. } => Stage::Planning,
            PipelineState::PlanReady { .. } => Stage::Prompts,
            PipelineState::PromptsReady { .. } => Stage::Images,
            PipelineState::ImagesReady { .. } => Stage::Compose,
        }
    }
}

/// Result of one stage: either more work or the finished comic.
enum Step {
    Next(PipelineState),
    Composed(ComicLayout),
}

/// The finished comic. Intermediate page images are not retained.
#[derive(Debug, Clone)]
pub struct ComicLayout {
    pub png: Vec<u8>,
    pub grid: Grid,
    /// Every planned page, including ones left off the canvas.
    pub pages: Vec<PageMeta>,
    pub rendered_pages: usize,
}

impl ComicLayout {
    pub fn data_url(&self) -> String {
        to_data_url(&BASE64.encode(&self.png))
    }

    pub fn failed_pages(&self) -> usize {
        self.pages.len().saturating_sub(self.rendered_pages)
    }
}

/// Handed back after the terminal event has been emitted.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(ComicLayout),
    Failed(String),
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }
}

/// Sequences the stages for one story and reports progress.
pub struct ComicPipeline<'a> {
    client: &'a dyn GenerationClient,
    config: &'a ComicConfig,
    store: TempStore,
}

impl<'a> ComicPipeline<'a> {
    pub fn new(client: &'a dyn GenerationClient, config: &'a ComicConfig) -> Self {
        Self {
            client,
            config,
            store: TempStore::new(config.scratch_dir.clone()),
        }
    }

    /// Runs every stage and emits exactly one terminal event, always last.
    /// Failures are reported through the sink and the outcome; this never
    /// returns an error.
    pub fn run(&self, story: &StoryPrompt, sink: &mut dyn ProgressSink) -> RunOutcome {
        tracing::info!(client = self.client.name(), story = %story, "comic run started");
        let mut state = PipelineState::Idle;
        loop {
            let stage = state.next_stage();
            state = match self.advance(state, stage, story, sink) {
                Ok(Step::Next(next)) => next,
                Ok(Step::Composed(layout)) => {
                    tracing::info!(
                        grid = %layout.grid,
                        rendered = layout.rendered_pages,
                        planned = layout.pages.len(),
                        "comic run complete"
                    );
                    sink.deliver(ProgressEvent::completed(
                        COMPLETE_MESSAGE,
                        layout.data_url(),
                        layout.pages.clone(),
                    ));
                    return RunOutcome::Completed(layout);
                }
                Err(err) => {
                    let message = err.to_string();
                    tracing::warn!(stage = stage.as_str(), error = %message, "comic run failed");
                    sink.deliver(ProgressEvent::failed(message.clone()));
                    return RunOutcome::Failed(message);
                }
            };
        }
    }

    /// Performs one stage: start event, work, done event. The compose stage
    /// has no done event here; its checkpoint is the terminal record.
    fn advance(
        &self,
        state: PipelineState,
        stage: Stage,
        story: &StoryPrompt,
        sink: &mut dyn ProgressSink,
    ) -> Result<Step, ComicError> {
        let (start, done) = stage.checkpoints();
        tracing::info!(stage = stage.as_str(), progress = start, "stage started");
        sink.deliver(ProgressEvent::step(stage.start_message(), start));

        let next = match state {
            PipelineState::Idle => {
                let character = generate_character(self.client, story, self.config)?;
                sink.deliver(
                    ProgressEvent::step("Character generated!", done)
                        .with_character_image(character.data_url()),
                );
                Step::Next(PipelineState::CharacterReady { character })
            }
            PipelineState::CharacterReady { character } => {
                let page_count = plan_pages(self.client, story, self.config).page_count();
                sink.deliver(ProgressEvent::step(
                    format!("Planning {page_count} pages..."),
                    done,
                ));
                Step::Next(PipelineState::PlanReady {
                    character,
                    page_count,
                })
            }
            PipelineState::PlanReady {
                character,
                page_count,
            } => {
                let prompts = generate_page_prompts(self.client, story, page_count, self.config);
                sink.deliver(ProgressEvent::step(
                    format!("Generated {} page prompts", prompts.len()),
                    done,
                ));
                Step::Next(PipelineState::PromptsReady { character, prompts })
            }
            PipelineState::PromptsReady { character, prompts } => {
                let images = generate_page_images(self.client, &prompts, &character, self.config);
                let generated = images.iter().filter(|image| image.is_generated()).count();
                if generated < images.len() {
                    tracing::warn!(
                        failed = images.len() - generated,
                        total = images.len(),
                        "some page images failed"
                    );
                }
                sink.deliver(ProgressEvent::step(
                    format!("Generated {generated} images"),
                    done,
                ));
                Step::Next(PipelineState::ImagesReady { prompts, images })
            }
            PipelineState::ImagesReady { prompts, images } => {
                let composed = compose_layout(&images, &self.config.canvas, &self.store)?;
                let pages = prompts
                    .into_iter()
                    .enumerate()
                    .map(|(index, prompt)| PageMeta {
                        id: index + 1,
                        prompt,
                    })
                    .collect();
                Step::Composed(ComicLayout {
                    png: composed.png,
                    grid: composed.grid,
                    pages,
                    rendered_pages: composed.rendered,
                })
            }
        };
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use inkframe_contracts::events::{EventWriter, ProgressEvent};

    use super::{ComicPipeline, ProgressSink, RunOutcome, Stage};
    use crate::layout::Grid;
    use crate::story::StoryPrompt;
    use crate::test_support::{test_config, ScriptedClient};

    fn story() -> StoryPrompt {
        StoryPrompt::new("A robot learns to paint").unwrap()
    }

    fn numbered(count: usize) -> String {
        (1..=count)
            .map(|i| format!("{i}. The robot paints scene number {i} at dawn"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn assert_single_terminal_last(events: &[ProgressEvent]) {
        let terminal: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, event)| event.is_terminal())
            .map(|(index, _)| index)
            .collect();
        assert_eq!(terminal, vec![events.len() - 1]);
    }

    fn progress_values(events: &[ProgressEvent]) -> Vec<u8> {
        events.iter().filter_map(|event| event.progress).collect()
    }

    #[test]
    fn checkpoint_table_is_increasing() {
        let mut last = 0;
        for stage in Stage::ALL {
            let (start, done) = stage.checkpoints();
            assert!(start > last && done > start);
            last = done;
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn five_page_story_completes_on_two_by_three() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = test_config(temp.path());
        let client = ScriptedClient::new()
            .with_text("{\"pageCount\": 5}")
            .with_text(&numbered(5));
        let mut events = Vec::new();

        let outcome = ComicPipeline::new(&client, &config).run(&story(), &mut events);

        let RunOutcome::Completed(layout) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(layout.grid, Grid { rows: 2, cols: 3 });
        assert_eq!(layout.pages.len(), 5);
        assert_eq!(layout.rendered_pages, 5);
        assert_eq!(
            progress_values(&events),
            vec![10, 20, 30, 40, 50, 60, 70, 85, 90, 100]
        );
        assert_single_terminal_last(&events);
        assert!(events[..events.len() - 1].iter().all(|event| event.is_generating));

        let last = events.last().unwrap();
        assert!(last.comic_image.as_deref().unwrap().starts_with("data:image/png;base64,"));
        let pages = last.pages.as_ref().unwrap();
        assert_eq!(pages.len(), 5);
        assert_eq!(pages[0].id, 1);
        assert!(pages[4].prompt.contains("scene number 5"));
        assert!(events[1].character_image.is_some());
        assert_eq!(events[3].current_step.as_deref(), Some("Planning 5 pages..."));
        Ok(())
    }

    #[test]
    fn character_failure_ends_with_single_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = test_config(temp.path());
        let client = ScriptedClient::new().with_image_error("No image generated");
        let mut events = Vec::new();

        let outcome = ComicPipeline::new(&client, &config).run(&story(), &mut events);

        assert!(matches!(outcome, RunOutcome::Failed(_)));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].progress, Some(10));
        assert_single_terminal_last(&events);
        let last = events.last().unwrap();
        assert!(!last.is_generating);
        assert!(last.comic_image.is_none());
        assert!(last
            .error
            .as_deref()
            .unwrap()
            .starts_with("Character generation failed"));
        assert!(client.text_models().is_empty());
        Ok(())
    }

    #[test]
    fn character_failure_reports_client_message() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = test_config(temp.path());
        let client = ScriptedClient::new()
            .with_image_error("OpenRouter request failed (401): invalid api key");
        let mut events = Vec::new();

        let outcome = ComicPipeline::new(&client, &config).run(&story(), &mut events);

        let expected = "Character generation failed: OpenRouter request failed (401): invalid api key";
        let RunOutcome::Failed(message) = outcome else {
            panic!("expected failed run");
        };
        assert_eq!(message, expected);
        assert_eq!(events.last().unwrap().error.as_deref(), Some(expected));
        Ok(())
    }

    #[test]
    fn planning_failure_defaults_to_four_pages() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = test_config(temp.path());
        let client = ScriptedClient::new()
            .with_text("no idea, maybe a few?")
            .with_text(&numbered(4));
        let mut events = Vec::new();

        let outcome = ComicPipeline::new(&client, &config).run(&story(), &mut events);

        let RunOutcome::Completed(layout) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(layout.pages.len(), 4);
        assert_eq!(layout.grid, Grid { rows: 2, cols: 2 });
        assert_eq!(events[3].current_step.as_deref(), Some("Planning 4 pages..."));
        assert_single_terminal_last(&events);
        Ok(())
    }

    #[test]
    fn partial_image_failures_still_list_every_page() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = test_config(temp.path());
        let client = ScriptedClient::new()
            .with_text("{\"pageCount\": 6}")
            .with_text(&numbered(6))
            // character
            .with_image_ok()
            .with_image_ok()
            .with_image_error("No image generated")
            .with_image_ok()
            .with_image_ok()
            .with_image_error("OpenRouter request failed (500): upstream")
            .with_image_ok();
        let mut events = Vec::new();

        let outcome = ComicPipeline::new(&client, &config).run(&story(), &mut events);

        let RunOutcome::Completed(layout) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(layout.rendered_pages, 4);
        assert_eq!(layout.failed_pages(), 2);
        assert_eq!(layout.grid, Grid { rows: 2, cols: 2 });
        assert_eq!(events.last().unwrap().pages.as_ref().unwrap().len(), 6);
        assert_eq!(events[7].current_step.as_deref(), Some("Generated 4 images"));
        Ok(())
    }

    #[test]
    fn all_pages_failing_is_a_terminal_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = test_config(temp.path());
        let mut client = ScriptedClient::new()
            .with_text("{\"pageCount\": 3}")
            .with_text(&numbered(3))
            .with_image_ok();
        for _ in 0..3 {
            client = client.with_image_error("No image generated");
        }
        let mut events = Vec::new();

        let outcome = ComicPipeline::new(&client, &config).run(&story(), &mut events);

        match outcome {
            RunOutcome::Failed(message) => assert_eq!(message, "No valid images to compose"),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(progress_values(&events), vec![10, 20, 30, 40, 50, 60, 70, 85, 90]);
        assert_single_terminal_last(&events);
        assert_eq!(std::fs::read_dir(temp.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = test_config(temp.path());
        let client = ScriptedClient::new();
        let (mut tx, rx) = mpsc::channel::<ProgressEvent>();
        drop(rx);

        let outcome = ComicPipeline::new(&client, &config).run(&story(), &mut tx);

        assert!(outcome.is_completed());
        Ok(())
    }

    #[test]
    fn event_writer_sink_appends_jsonl() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = test_config(&temp.path().join("scratch"));
        let client = ScriptedClient::new();
        let path = temp.path().join("events.jsonl");
        let mut writer = EventWriter::new(&path, "run-test");
        writer.deliver(ProgressEvent::step("Generating main character with green screen...", 10));

        let outcome = ComicPipeline::new(&client, &config).run(&story(), &mut writer);

        assert!(outcome.is_completed());
        let lines: Vec<String> = std::fs::read_to_string(&path)?
            .lines()
            .map(str::to_string)
            .collect();
        assert_eq!(lines.len(), 11);
        let last: serde_json::Value = serde_json::from_str(lines.last().unwrap())?;
        assert_eq!(last["isGenerating"], false);
        assert_eq!(last["run_id"], "run-test");
        Ok(())
    }
}
