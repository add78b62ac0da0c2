use crate::client::{ChatMessage, GenerationClient};
use crate::config::ComicConfig;
use crate::story::StoryPrompt;

const PROMPTS_SYSTEM: &str = "You are an expert comic book artist and storyboard creator. Generate detailed visual descriptions for comic panels.";
const MIN_PROMPT_CHARS: usize = 10;

/// Produces exactly `page_count` scene descriptions in narrative order.
///
/// The model's numbered list is used where it parses; missing positions are
/// filled with [`fallback_prompt`]. A client failure or an unusable reply
/// yields a fully templated list.
pub fn generate_page_prompts(
    client: &dyn GenerationClient,
    story: &StoryPrompt,
    page_count: u32,
    config: &ComicConfig,
) -> Vec<String> {
    let total = page_count as usize;
    let messages = prompt_messages(story, page_count);
    let mut prompts = match client.generate_text(&messages, &config.text_model) {
        Ok(reply) => parse_numbered_prompts(&reply),
        Err(err) => {
            tracing::warn!(error = %err, "prompt generation failed; using templated prompts");
            Vec::new()
        }
    };
    if prompts.is_empty() {
        tracing::warn!(pages = total, "no usable prompt lines; using templated prompts");
    } else if prompts.len() < total {
        tracing::info!(
            parsed = prompts.len(),
            pages = total,
            "padding short prompt list with templated entries"
        );
    }
    prompts.truncate(total);
    for index in prompts.len()..total {
        prompts.push(fallback_prompt(story, index + 1, page_count));
    }
    prompts
}

fn prompt_messages(story: &StoryPrompt, page_count: u32) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(PROMPTS_SYSTEM),
        ChatMessage::user(format!(
            "Story concept: \"{story}\"\n\n\
Create {page_count} detailed visual prompts for comic panels that tell this story.\n\n\
Each prompt should:\n\
1. Be a detailed scene description optimized for AI image generation\n\
2. Include specific details about character appearance and positioning\n\
3. Describe background, lighting, and mood\n\
4. Suggest panel composition and framing\n\
5. Include dialogue or caption suggestions\n\
6. Be realistic and achievable in 1024x1024 dimensions\n\n\
Format your response as a numbered list (1., 2., 3., etc.) with each prompt on its own line.\n\
Make sure each panel progresses the narrative naturally."
        )),
    ]
}

/// Keeps lines shaped like `N. text`, stripped of the marker. Lines whose
/// remaining text is shorter than ten characters are noise.
pub fn parse_numbered_prompts(reply: &str) -> Vec<String> {
    reply
        .lines()
        .filter_map(|line| strip_number_marker(line.trim()))
        .map(str::trim)
        .filter(|text| text.chars().count() >= MIN_PROMPT_CHARS)
        .map(str::to_string)
        .collect()
}

fn strip_number_marker(line: &str) -> Option<&str> {
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    line[digits..].strip_prefix('.')
}

/// Templated scene for 1-based page `index` of `total`.
pub fn fallback_prompt(story: &StoryPrompt, index: usize, total: u32) -> String {
    format!(
        "Comic panel {index}: Scene from the story \"{story}\". Professional comic book illustration, vibrant colors, dynamic composition, detailed background, dramatic lighting. Part {index} of {total}."
    )
}
