use std::env;
use std::path::PathBuf;

/// Process configuration, read once at startup and passed through the
/// dispatcher's dependency map. `BOT_TOKEN` is consumed separately by
/// `Bot::from_env_with_client`.
#[derive(Clone, Debug)]
pub struct Config {
    pub ytdlp_bin: String,
    pub download_dir: PathBuf,
    pub ffmpeg_path: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            ytdlp_bin: env::var("YTDLP_BIN").unwrap_or_else(|_| "yt-dlp".to_string()),
            download_dir: env::var("DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("downloads")),
            ffmpeg_path: env::var("FFMPEG_PATH").ok().filter(|p| !p.is_empty()),
        }
    }
}
