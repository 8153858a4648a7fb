use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
    sync::mpsc,
};
use tracing::{debug, error, info, instrument, trace, warn, Instrument};

use crate::config::Config;
use crate::error::{FailureKind, FetchError};
use crate::prefs::{OutputKind, Quality};
use crate::progress::ProgressSample;

pub type ProgressSink = mpsc::Sender<ProgressSample>;

const IMPERSONATE_TARGET: &str = "chrome-120";
const FALLBACK_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36";
const FALLBACK_ACCEPT_LANGUAGE: &str = "Accept-Language:en-US,en;q=0.5";
const AUDIO_BITRATE: &str = "192K";
const STDERR_TAIL_LINES: usize = 8;

// Progress events and the final result cross the subprocess boundary as
// tagged JSON lines on stdout; yt-dlp's %(...)j conversion keeps every
// field valid JSON even when it is null mid-download.
const PROGRESS_TEMPLATE: &str = r#"download:{"event":"progress","status":%(progress.status)j,"downloaded_bytes":%(progress.downloaded_bytes)j,"total_bytes":%(progress.total_bytes)j,"total_bytes_estimate":%(progress.total_bytes_estimate)j,"speed":%(progress.speed)j,"eta":%(progress.eta)j}"#;
const RESULT_TEMPLATE: &str = r#"after_move:{"event":"result","filepath":%(filepath)j,"title":%(title)j,"duration":%(duration)j}"#;

#[derive(Clone, Debug)]
pub struct FetchRequest {
    pub url: String,
    pub quality: Quality,
    pub kind: OutputKind,
}

#[derive(Clone, Debug)]
pub struct FetchOutcome {
    pub path: PathBuf,
    pub title: Option<String>,
    pub duration: Option<f64>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Strategy {
    Impersonate,
    PlainHeaders,
}

pub(crate) const STRATEGIES: [Strategy; 2] = [Strategy::Impersonate, Strategy::PlainHeaders];

impl Strategy {
    pub fn label(self) -> &'static str {
        match self {
            Self::Impersonate => "browser impersonation",
            Self::PlainHeaders => "plain headers",
        }
    }

    fn push_args(self, args: &mut Vec<String>) {
        match self {
            Self::Impersonate => {
                args.extend(["--impersonate".to_string(), IMPERSONATE_TARGET.to_string()]);
            }
            Self::PlainHeaders => {
                args.extend([
                    "--user-agent".to_string(),
                    FALLBACK_USER_AGENT.to_string(),
                    "--add-headers".to_string(),
                    FALLBACK_ACCEPT_LANGUAGE.to_string(),
                ]);
            }
        }
    }
}

/// Outcome of a single strategy attempt. `Retryable` falls through to the
/// next strategy in the list; `Fatal` stops the whole executor (nothing a
/// different transport profile could fix).
pub(crate) enum Attempt {
    Success(FetchOutcome),
    Retryable(String),
    Fatal(FetchError),
}

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(
        &self,
        req: FetchRequest,
        progress: ProgressSink,
    ) -> Result<FetchOutcome, FetchError>;
}

#[derive(Clone)]
pub struct YtDlpFetcher {
    bin: String,
    download_dir: PathBuf,
    ffmpeg_path: Option<String>,
}

impl YtDlpFetcher {
    pub fn new(config: &Config) -> Self {
        Self {
            bin: config.ytdlp_bin.clone(),
            download_dir: config.download_dir.clone(),
            ffmpeg_path: config.ffmpeg_path.clone(),
        }
    }

    #[instrument(skip(self, req, progress))]
    async fn run_attempt(
        &self,
        req: &FetchRequest,
        strategy: Strategy,
        progress: &ProgressSink,
    ) -> Attempt {
        let args = build_args(req, &self.download_dir, self.ffmpeg_path.as_deref(), strategy);
        debug!(event = "ytdlp_spawn", bin = %self.bin, args = ?args);

        let mut child = match Command::new(&self.bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Attempt::Fatal(FetchError::Launch {
                    bin: self.bin.clone(),
                    source: err,
                });
            }
            Err(err) => return Attempt::Retryable(format!("failed to spawn {}: {err}", self.bin)),
        };

        let Some(stdout) = child.stdout.take() else {
            return Attempt::Retryable("yt-dlp stdout unavailable".to_string());
        };
        let Some(stderr) = child.stderr.take() else {
            return Attempt::Retryable("yt-dlp stderr unavailable".to_string());
        };

        // Drain stderr concurrently, keeping only the tail for diagnostics.
        let stderr_task = tokio::spawn(
            async move {
                let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    trace!(event = "ytdlp_stderr_line", line = line.as_str());
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                tail
            }
            .in_current_span(),
        );

        let mut result: Option<ResultLine> = None;
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match parse_event_line(&line) {
                Some(EventLine::Progress(sample)) => {
                    // Never block on a slow consumer: a dropped sample is
                    // superseded by the next one within moments.
                    let _ = progress.try_send(sample);
                }
                Some(EventLine::Result(reported)) => result = Some(reported),
                None => trace!(event = "ytdlp_stdout_line", line = line.as_str()),
            }
        }

        let status = match child.wait().await {
            Ok(status) => status,
            Err(err) => return Attempt::Retryable(format!("failed to wait for yt-dlp: {err}")),
        };
        let tail = stderr_task.await.unwrap_or_default();
        let detail = tail.into_iter().collect::<Vec<_>>().join("\n");

        if !status.success() {
            return Attempt::Retryable(if detail.is_empty() {
                format!("yt-dlp exited with {status}")
            } else {
                detail
            });
        }
        let Some(reported) = result else {
            return Attempt::Retryable("yt-dlp reported no output file".to_string());
        };

        let path = finalize_path(&reported.filepath, req.kind);
        info!(event = "ytdlp_attempt_complete", path = %path.display());
        Attempt::Success(FetchOutcome {
            path,
            title: reported.title,
            duration: reported.duration,
        })
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    #[instrument(skip(self, req, progress), fields(url = %req.url, kind = req.kind.as_str()))]
    async fn fetch(
        &self,
        req: FetchRequest,
        progress: ProgressSink,
    ) -> Result<FetchOutcome, FetchError> {
        let url = req.url.clone();
        try_strategies(&url, |strategy| {
            let fetcher = self.clone();
            let req = req.clone();
            let progress = progress.clone();
            async move { fetcher.run_attempt(&req, strategy, &progress).await }
        })
        .await
    }
}

/// Runs the ordered strategy list: first success wins, `Retryable` falls
/// through, `Fatal` short-circuits. After the last strategy the failure is
/// classified from the most recent diagnostic tail.
pub(crate) async fn try_strategies<F, Fut>(
    url: &str,
    mut attempt: F,
) -> Result<FetchOutcome, FetchError>
where
    F: FnMut(Strategy) -> Fut,
    Fut: Future<Output = Attempt>,
{
    let mut last_failure = String::new();
    for strategy in STRATEGIES {
        info!(event = "fetch_attempt", url = %url, strategy = strategy.label());
        match attempt(strategy).await {
            Attempt::Success(outcome) => {
                info!(event = "fetch_success", url = %url, strategy = strategy.label());
                return Ok(outcome);
            }
            Attempt::Retryable(detail) => {
                warn!(
                    event = "fetch_attempt_failed",
                    url = %url,
                    strategy = strategy.label(),
                    detail = last_line(&detail)
                );
                last_failure = detail;
            }
            Attempt::Fatal(err) => return Err(err),
        }
    }
    error!(event = "fetch_exhausted", url = %url, detail = %last_failure);
    Err(FetchError::Exhausted {
        kind: classify(&last_failure),
        detail: last_line(&last_failure).to_string(),
    })
}

pub(crate) fn build_args(
    req: &FetchRequest,
    download_dir: &Path,
    ffmpeg_path: Option<&str>,
    strategy: Strategy,
) -> Vec<String> {
    let mut args = vec![
        "-o".to_string(),
        download_dir
            .join("%(title)s.%(ext)s")
            .to_string_lossy()
            .into_owned(),
        "--no-playlist".to_string(),
        "--no-check-certificate".to_string(),
        "--no-warnings".to_string(),
        "--newline".to_string(),
        "--progress".to_string(),
        "--progress-template".to_string(),
        PROGRESS_TEMPLATE.to_string(),
        "--no-simulate".to_string(),
        "--print".to_string(),
        RESULT_TEMPLATE.to_string(),
    ];

    match req.kind {
        OutputKind::Audio => {
            // Audio-only selection: the quality ceiling applies to video
            // streams, never to audio extraction.
            args.extend([
                "-f".to_string(),
                "bestaudio/best".to_string(),
                "-x".to_string(),
                "--audio-format".to_string(),
                "mp3".to_string(),
                "--audio-quality".to_string(),
                AUDIO_BITRATE.to_string(),
            ]);
        }
        OutputKind::Video | OutputKind::Document => {
            let height = req.quality.height();
            args.extend([
                "-f".to_string(),
                format!("bestvideo[height<={height}]+bestaudio/best[height<={height}]"),
                "--remux-video".to_string(),
                "mp4".to_string(),
            ]);
        }
    }

    if let Some(ffmpeg) = ffmpeg_path {
        args.extend(["--ffmpeg-location".to_string(), ffmpeg.to_string()]);
    }

    strategy.push_args(&mut args);
    args.push(req.url.clone());
    args
}

#[derive(Debug, Deserialize)]
struct ResultLine {
    filepath: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum EventLine {
    Progress(ProgressSample),
    Result(ResultLine),
}

fn parse_event_line(line: &str) -> Option<EventLine> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }
    serde_json::from_str(line).ok()
}

/// The post-processing step leaves a file with a known extension next to
/// whatever yt-dlp reported; substitute it in.
fn finalize_path(reported: &str, kind: OutputKind) -> PathBuf {
    PathBuf::from(reported).with_extension(kind.final_ext())
}

pub(crate) fn classify(detail: &str) -> FailureKind {
    let lower = detail.to_lowercase();
    let matches_any = |phrases: &[&str]| phrases.iter().any(|p| lower.contains(p));

    if matches_any(&["sign in to confirm", "403", "forbidden", "captcha"]) {
        FailureKind::Blocked
    } else if matches_any(&["unsupported url", "is not a valid url", "unable to extract"]) {
        FailureKind::Unsupported
    } else if matches_any(&["ffmpeg", "postprocess"]) {
        FailureKind::Postprocess
    } else if matches_any(&["unable to download", "timed out", "timeout", "connection", "network"])
    {
        FailureKind::Network
    } else {
        FailureKind::Unknown
    }
}

fn last_line(detail: &str) -> &str {
    detail
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("")
        .trim()
}
