//! Prompts for turning a text chunk into a Stable Diffusion directive.
//!
//! Every prompt lives here so it can be changed (or inspected by tests)
//! without touching retry or error-handling logic in
//! [`crate::pipeline::llm`].
//!
//! Callers can override the system prompt via
//! [`crate::config::GenerationConfig::system_prompt`] and the quality prefix
//! via [`crate::config::GenerationConfig::quality_prefix`].

/// Keywords the final directive must start with.
pub const DEFAULT_QUALITY_PREFIX: &str =
    "(masterpiece, best quality), beautiful detailed eyes, perfect face, detailed hair";

/// Negative prompt sent with every txt2img request unless overridden.
pub const DEFAULT_NEGATIVE_PROMPT: &str = "ugly, blurry, low quality, deformed, disfigured";

/// Default system prompt for directive synthesis.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert Stable Diffusion prompt writer. \
You read a passage of narrative text and turn one concrete scene from it into a precise, \
purely visual English text-to-image prompt.";

/// User message template. `{quality_prefix}`, `{chunk}` and `{characters}`
/// are substituted by [`build_user_prompt`].
pub const USER_PROMPT_TEMPLATE: &str = r#"Write a Stable Diffusion text-to-image prompt for the passage below. Follow these rules precisely:

1. READ THE PASSAGE
   - Read the whole passage, but focus on the descriptions closest to its end.

2. PICK ONE SCENE
   - Choose exactly one concrete, complete scene from the END of the passage.
   - Ignore earlier events; pick the last scene that can be drawn.

3. WRITE THE PROMPT
   - English only, comma-separated keywords and short phrases.
   - Only visible things: actions, clothing, setting, lighting, objects, poses.
   - No emotions, inner thoughts or abstract concepts ("happy", "sad", "brave", …).
   - Start the prompt with exactly: {quality_prefix}
   - For every character present in the scene, find the matching appearance
     keywords in the character list below and insert them at a fitting place,
     separated by commas, so each character looks the same in every image.

4. OUTPUT FORMAT
   - Output ONLY the prompt text.
   - No explanations, no labels, no quotes, no code fences.

Passage:
"""
{chunk}
"""

Character appearance keywords: {characters}"#;

/// Fill [`USER_PROMPT_TEMPLATE`] for one chunk.
pub fn build_user_prompt(chunk_text: &str, character_corpus: &str, quality_prefix: &str) -> String {
    let characters = if character_corpus.trim().is_empty() {
        "(none)"
    } else {
        character_corpus
    };
    USER_PROMPT_TEMPLATE
        .replace("{quality_prefix}", quality_prefix)
        .replace("{characters}", characters)
        .replace("{chunk}", chunk_text)
}
