//! Text helpers for titles and filenames

use std::borrow::Cow;

pub const TITLE_MAX_CHARS: usize = 50;

pub struct TextUtils;

impl TextUtils {
    /// First `max_chars` characters, with `...` appended when cut.
    pub fn truncate_chars(text: &str, max_chars: usize) -> Cow<'_, str> {
        match text.char_indices().nth(max_chars) {
            Some((byte_pos, _)) => Cow::Owned(format!("{}...", &text[..byte_pos])),
            None => Cow::Borrowed(text),
        }
    }

    /// Session title derived from the first user message.
    pub fn derive_title(message: &str) -> String {
        Self::truncate_chars(message, TITLE_MAX_CHARS).into_owned()
    }
}
