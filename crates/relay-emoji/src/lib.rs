//! Bidirectional emoji name/unicode translation.
//!
//! Reactions arrive from platforms in wildly different shapes: Discord gives
//! unicode codepoints or custom-emoji ids, Telegram gives unicode only,
//! Slack and Zulip give colon-wrapped names (`:thumbsup:`). The converter
//! normalizes everything the core sees to a unicode string, and can go the
//! other way when an outgoing reaction needs a platform-native name.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// A single overlay entry read from a per-platform JSON file, mapping a
/// platform-native name to the unicode glyph it represents.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OverlayEntry {
    name: String,
    unicode: String,
}

/// Bidirectional name<->unicode table, seeded with a small builtin core set
/// and optionally extended by a per-platform overlay file at startup.
#[derive(Debug, Clone, Default)]
pub struct EmojiConverter {
    name_to_unicode: HashMap<String, String>,
    unicode_to_name: HashMap<String, String>,
}

const BUILTIN: &[(&str, &str)] = &[
    ("thumbsup", "\u{1F44D}"),
    ("thumbsdown", "\u{1F44E}"),
    ("heart", "\u{2764}\u{FE0F}"),
    ("joy", "\u{1F602}"),
    ("fire", "\u{1F525}"),
    ("eyes", "\u{1F440}"),
    ("tada", "\u{1F389}"),
    ("rocket", "\u{1F680}"),
    ("white_check_mark", "\u{2705}"),
    ("x", "\u{274C}"),
    ("warning", "\u{26A0}\u{FE0F}"),
    ("thinking", "\u{1F914}"),
];

impl EmojiConverter {
    /// Build a converter seeded with the builtin core table.
    pub fn new() -> Self {
        let mut conv = Self::default();
        for (name, unicode) in BUILTIN {
            conv.insert(name, unicode);
        }
        conv
    }

    fn insert(&mut self, name: &str, unicode: &str) {
        self.name_to_unicode.insert(name.to_string(), unicode.to_string());
        self.unicode_to_name.insert(unicode.to_string(), name.to_string());
    }

    /// Load a per-platform overlay file (JSON array of `{name, unicode}`)
    /// on top of the builtin table. Entries here take precedence over the
    /// builtin set. Missing files are not an error — overlays are optional.
    pub fn with_overlay(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Vec<OverlayEntry>>(&contents) {
                Ok(entries) => {
                    for entry in entries {
                        self.insert(&entry.name, &entry.unicode);
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "emoji overlay: malformed JSON, skipping"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "emoji overlay: unreadable, skipping"),
        }
        self
    }

    /// Resolve a platform-native name (without colons) to its unicode form.
    /// Returns the input unchanged if it is already a bare unicode glyph or
    /// has no known mapping.
    pub fn to_unicode(&self, name_or_unicode: &str) -> String {
        let trimmed = name_or_unicode.trim_matches(':');
        self.name_to_unicode
            .get(trimmed)
            .cloned()
            .unwrap_or_else(|| name_or_unicode.to_string())
    }

    /// Resolve a unicode glyph back to its platform-native name, if known.
    pub fn to_name(&self, unicode: &str) -> Option<&str> {
        self.unicode_to_name.get(unicode).map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_round_trips() {
        let conv = EmojiConverter::new();
        let unicode = conv.to_unicode("thumbsup");
        assert_eq!(unicode, "\u{1F44D}");
        assert_eq!(conv.to_name(&unicode), Some("thumbsup"));
    }

    #[test]
    fn unknown_name_passes_through() {
        let conv = EmojiConverter::new();
        assert_eq!(conv.to_unicode("not_a_real_emoji"), "not_a_real_emoji");
    }

    #[test]
    fn missing_overlay_file_is_not_an_error() {
        let conv = EmojiConverter::new().with_overlay("/nonexistent/overlay.json");
        assert_eq!(conv.to_unicode("thumbsup"), "\u{1F44D}");
    }

    #[test]
    fn colon_wrapped_name_resolves() {
        let conv = EmojiConverter::new();
        assert_eq!(conv.to_unicode(":fire:"), "\u{1F525}");
    }
}
