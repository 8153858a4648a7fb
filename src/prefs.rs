use std::sync::Arc;

use dashmap::DashMap;
use teloxide::types::ChatId;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Quality {
    P480,
    P720,
    P1080,
}

impl Quality {
    pub fn height(self) -> u32 {
        match self {
            Self::P480 => 480,
            Self::P720 => 720,
            Self::P1080 => 1080,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::P480 => "480",
            Self::P720 => "720",
            Self::P1080 => "1080",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::P480 => "480p",
            Self::P720 => "720p",
            Self::P1080 => "1080p",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "480" => Some(Self::P480),
            "720" => Some(Self::P720),
            "1080" => Some(Self::P1080),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutputKind {
    Video,
    Audio,
    Document,
}

impl OutputKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }

    /// Extension of the file the post-processing step is expected to leave
    /// behind, substituted into the yt-dlp-reported filename.
    pub fn final_ext(self) -> &'static str {
        match self {
            Self::Audio => "mp3",
            Self::Video | Self::Document => "mp4",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "document" => Some(Self::Document),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Preferences {
    pub quality: Quality,
    pub kind: OutputKind,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            quality: Quality::P720,
            kind: OutputKind::Video,
        }
    }
}

/// Per-chat download preferences. Missing entries are synthesized with the
/// defaults on first access; mutations are per-field and keep both fields
/// defined. Lives for the process lifetime only.
#[derive(Clone, Default)]
pub struct PrefStore {
    inner: Arc<DashMap<ChatId, Preferences>>,
}

impl PrefStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, chat_id: ChatId) -> Preferences {
        *self.inner.entry(chat_id).or_default()
    }

    pub fn set_quality(&self, chat_id: ChatId, quality: Quality) {
        self.inner.entry(chat_id).or_default().quality = quality;
    }

    pub fn set_kind(&self, chat_id: ChatId, kind: OutputKind) {
        self.inner.entry(chat_id).or_default().kind = kind;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_synthesized_on_first_access() {
        let store = PrefStore::new();
        let prefs = store.get(ChatId(7));
        assert_eq!(prefs.quality, Quality::P720);
        assert_eq!(prefs.kind, OutputKind::Video);
        // A second read returns the same record, not a fresh synthesis.
        assert_eq!(store.get(ChatId(7)), prefs);
    }

    #[test]
    fn set_mutates_single_field() {
        let store = PrefStore::new();
        store.set_quality(ChatId(1), Quality::P480);
        let prefs = store.get(ChatId(1));
        assert_eq!(prefs.quality, Quality::P480);
        assert_eq!(prefs.kind, OutputKind::Video);

        store.set_kind(ChatId(1), OutputKind::Audio);
        let prefs = store.get(ChatId(1));
        assert_eq!(prefs.quality, Quality::P480);
        assert_eq!(prefs.kind, OutputKind::Audio);
    }

    #[test]
    fn chats_are_isolated() {
        let store = PrefStore::new();
        store.set_kind(ChatId(1), OutputKind::Document);
        assert_eq!(store.get(ChatId(2)), Preferences::default());
        assert_eq!(store.get(ChatId(1)).kind, OutputKind::Document);
    }

    #[test]
    fn enum_parsing_rejects_unknown_values() {
        assert_eq!(Quality::parse("720"), Some(Quality::P720));
        assert_eq!(Quality::parse("4320"), None);
        assert_eq!(OutputKind::parse("audio"), Some(OutputKind::Audio));
        assert_eq!(OutputKind::parse("gif"), None);
    }

    #[test]
    fn final_extension_per_kind() {
        assert_eq!(OutputKind::Audio.final_ext(), "mp3");
        assert_eq!(OutputKind::Video.final_ext(), "mp4");
        assert_eq!(OutputKind::Document.final_ext(), "mp4");
    }
}
