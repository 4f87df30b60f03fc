//! Prompts for the vision-model OCR engine.
//!
//! Callers can override the default via
//! [`crate::config::ConversionConfig::ocr_prompt`]; the constant here is used
//! only when no override is provided.

/// Default system prompt for transcribing an embedded image.
///
/// The reply is fed through the same cleanup as any other OCR output, so the
/// model is asked for bare text only.
pub const DEFAULT_OCR_PROMPT: &str = r#"You are an OCR engine. Transcribe every piece of text visible in the image.

Follow these rules precisely:

1. Output ONLY the text that appears in the image, in reading order
2. Keep the original line breaks between separate lines of text
3. Do NOT describe the image, its layout, colors or graphics
4. Do NOT add Markdown, code fences, quotes or commentary
5. If the image contains no legible text, output nothing"#;
