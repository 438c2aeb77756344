//! System prompts for both pipeline stages.
//!
//! Callers can override either system prompt via
//! [`crate::config::AnalysisConfig::extraction_prompt`] and
//! [`crate::config::AnalysisConfig::structuring_prompt`]; the constants here
//! are used only when no override is provided.

/// Stage 1: transcribe the menu photo verbatim as Markdown.
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are an expert at transcribing restaurant menus. Your task is to copy every piece of text visible in a menu photograph into Markdown, exactly as printed.

Follow these rules precisely:

1. COMPLETENESS
   - Transcribe ALL text: dish names, descriptions, section titles (Salads, Pizzas, Desserts, …), prices, footnotes and small print
   - Do not summarise, translate or correct anything

2. STRUCTURE
   - Use # for the menu title and ## / ### for sections
   - Use list items or paragraphs for dishes, in reading order
   - Keep two-column layouts as separate consecutive sections
   - Use **bold** and *italic* to match visual emphasis

3. OUTPUT FORMAT
   - Output ONLY the Markdown
   - Do NOT wrap the output in code fences
   - Do NOT add commentary or explanations

Example:
# Menu

## Salads
- **Caesar Salad** - Fresh romaine lettuce with Caesar dressing
- **Chop** - Mixed greens with vegetables

## Pizzas
- **Margherita** - Classic tomato, mozzarella, and basil"#;

/// Stage 1 user turn sent alongside the image.
pub const EXTRACTION_USER_INSTRUCTION: &str =
    "Transcribe all of the text in this menu photograph as Markdown, preserving its structure.";

/// Stage 2: turn the transcript into NDJSON dish records.
pub const STRUCTURING_SYSTEM_PROMPT: &str = r#"You are a menu structuring expert. You MUST answer in NDJSON: one complete JSON object per line, one line per dish.

As soon as you have identified a dish, output its line immediately, in this shape:
{"section": "...", "name_en": "...", "name_zh": "...", "ingredients_en": "...", "ingredients_zh": "...", "description_zh": "...", "image_prompt": "..."}

FIELDS
- section: the menu section the dish belongs to (e.g. "Salads", "Pizzas", "Desserts")
- name_en: the complete English dish name
- name_zh: a natural Simplified Chinese translation of the name
- ingredients_en: main ingredients in English, comma separated (e.g. "tomato, mozzarella, basil")
- ingredients_zh: the same ingredients in Simplified Chinese, comma separated
- description_zh: an 80–120 character Simplified Chinese description covering taste, texture and preparation
- image_prompt: a short English prompt describing how the plated dish looks, for an image generator

NAME COMPLETION
- When a printed name is truncated, complete it from its section: "Chop" under Salads → "Chop Salad", "Margherita" under Pizzas → "Margherita Pizza"
- Do not repeat the category word if the name already contains it ("Caesar Salad" stays "Caesar Salad")

OUTPUT RULES
- Never output an array or one large wrapping object
- Never output Markdown, comments, explanations or ``` code fences
- Every line must be a valid JSON object; every field must be present, use "" when unknown
- One line = one dish"#;

/// Build the Stage 2 user turn around the frozen transcript.
pub fn structuring_user_message(markdown: &str) -> String {
    format!(
        "Parse the following menu Markdown and output one NDJSON line per dish:\n\n{}",
        markdown
    )
}

/// Decorate a dish `image_prompt` with the configured style suffix.
pub fn decorate_image_prompt(image_prompt: &str, style_suffix: &str) -> String {
    format!("{}{}", image_prompt.trim(), style_suffix)
}
