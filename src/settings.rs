use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use url::Url;

use crate::prefs::{OutputKind, Preferences, Quality};

pub const OWNER_URL: &str = "https://t.me/FILMWORLDOFFICIA";
pub const REPO_STICKER_ID: &str =
    "CAACAgIAAxkBAAE7p09o1ilNV72lFmr4Z4_r6mkRg9L_twACTAADJHFiGkVXuTkHH0tVNgQ";

const SETTINGS_CALLBACK_PREFIX: &str = "settings:";
pub const REPO_CALLBACK: &str = "repo";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SettingChange {
    Quality(Quality),
    Kind(OutputKind),
}

pub fn build_quality_callback(quality: Quality) -> String {
    format!("{SETTINGS_CALLBACK_PREFIX}quality:{}", quality.as_str())
}

pub fn build_kind_callback(kind: OutputKind) -> String {
    format!("{SETTINGS_CALLBACK_PREFIX}format:{}", kind.as_str())
}

pub fn parse_setting_callback(data: &str) -> Option<SettingChange> {
    let payload = data.strip_prefix(SETTINGS_CALLBACK_PREFIX)?;
    let (category, value) = payload.split_once(':')?;
    match category {
        "quality" => Quality::parse(value).map(SettingChange::Quality),
        "format" => OutputKind::parse(value).map(SettingChange::Kind),
        _ => None,
    }
}

pub fn settings_text(prefs: Preferences) -> String {
    format!(
        "Configure your download settings:\n\nCurrent Quality: {}\nCurrent Format: {}",
        prefs.quality.label(),
        prefs.kind.as_str(),
    )
}

pub fn settings_keyboard(prefs: Preferences) -> InlineKeyboardMarkup {
    let kind_button = |icon: &str, kind: OutputKind, label: &str| {
        let marker = if prefs.kind == kind { "✅" } else { icon };
        InlineKeyboardButton::callback(format!("{marker} {label}"), build_kind_callback(kind))
    };
    let quality_button = |icon: &str, quality: Quality| {
        let marker = if prefs.quality == quality { "✅" } else { icon };
        InlineKeyboardButton::callback(
            format!("{marker} {}", quality.label()),
            build_quality_callback(quality),
        )
    };

    InlineKeyboardMarkup::new([
        vec![
            kind_button("📄", OutputKind::Document, "Document"),
            kind_button("🎬", OutputKind::Video, "Video"),
            kind_button("🎵", OutputKind::Audio, "Audio"),
        ],
        vec![
            quality_button("🔼", Quality::P1080),
            quality_button("▶️", Quality::P720),
            quality_button("🔽", Quality::P480),
        ],
    ])
}

pub fn start_keyboard() -> InlineKeyboardMarkup {
    let mut row = Vec::new();
    if let Ok(owner) = Url::parse(OWNER_URL) {
        row.push(InlineKeyboardButton::url("😎 Owner", owner));
    }
    row.push(InlineKeyboardButton::callback("🤩 Repo", REPO_CALLBACK));
    InlineKeyboardMarkup::new([row])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_callback_roundtrip() {
        let data = build_quality_callback(Quality::P1080);
        assert_eq!(data, "settings:quality:1080");
        assert_eq!(
            parse_setting_callback(&data),
            Some(SettingChange::Quality(Quality::P1080))
        );
    }

    #[test]
    fn kind_callback_roundtrip() {
        let data = build_kind_callback(OutputKind::Audio);
        assert_eq!(data, "settings:format:audio");
        assert_eq!(
            parse_setting_callback(&data),
            Some(SettingChange::Kind(OutputKind::Audio))
        );
    }

    #[test]
    fn malformed_callbacks_are_rejected() {
        assert_eq!(parse_setting_callback("settings:quality:999"), None);
        assert_eq!(parse_setting_callback("settings:volume:11"), None);
        assert_eq!(parse_setting_callback("settings:quality"), None);
        assert_eq!(parse_setting_callback("task:abc:140"), None);
        assert_eq!(parse_setting_callback(""), None);
    }

    #[test]
    fn keyboard_marks_active_selections() {
        let prefs = Preferences {
            quality: Quality::P480,
            kind: OutputKind::Audio,
        };
        let keyboard = settings_keyboard(prefs);
        let labels: Vec<String> = keyboard
            .inline_keyboard
            .iter()
            .flatten()
            .map(|b| b.text.clone())
            .collect();
        assert!(labels.contains(&"✅ Audio".to_string()));
        assert!(labels.contains(&"✅ 480p".to_string()));
        assert!(labels.contains(&"🎬 Video".to_string()));
        assert!(labels.contains(&"▶️ 720p".to_string()));
    }

    #[test]
    fn settings_text_reflects_preferences() {
        let text = settings_text(Preferences::default());
        assert!(text.contains("Current Quality: 720p"));
        assert!(text.contains("Current Format: video"));
    }
}
