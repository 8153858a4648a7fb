use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use sysinfo::{Disks, System};
use teloxide::{
    dispatching::DpHandlerDescription,
    prelude::*,
    types::{FileId, InputFile, MessageId},
    utils::command::BotCommands,
    ApiError, RequestError,
};
use tokio::sync::mpsc;
use tracing::{error, info, warn, Instrument};

use crate::config::Config;
use crate::error::{AppError, FetchError};
use crate::fetch::{FetchOutcome, FetchRequest, MediaFetcher, YtDlpFetcher};
use crate::prefs::{OutputKind, PrefStore, Preferences};
use crate::progress::{format_duration, render_panel, Phase, ProgressSample};
use crate::settings::{
    parse_setting_callback, settings_keyboard, settings_text, start_keyboard, SettingChange,
    REPO_CALLBACK, REPO_STICKER_ID,
};
use crate::throttle::{ProgressThrottle, ThrottleKey};

const PROGRESS_QUEUE_DEPTH: usize = 32;

const WELCOME_TEXT: &str = "Welcome! I am a YouTube Downloader Bot.\n\n\
     Send me any video URL and I will download and send it back to you.";
const VALIDATION_TEXT: &str = "Please send a valid URL (http:// or https://).";

#[derive(Clone)]
pub struct AppServices {
    prefs: PrefStore,
    throttle: ProgressThrottle,
    fetcher: Arc<dyn MediaFetcher>,
    started_at: Instant,
}

impl AppServices {
    pub fn new(config: &Config) -> Self {
        Self {
            prefs: PrefStore::new(),
            throttle: ProgressThrottle::new(),
            fetcher: Arc::new(YtDlpFetcher::new(config)),
            started_at: Instant::now(),
        }
    }
}

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
enum Command {
    #[command(description = "show the welcome message")]
    Start,
    #[command(description = "show bot statistics")]
    Stats,
    #[command(description = "configure download settings")]
    Settings,
}

pub fn build_handler() -> Handler<'static, Result<(), AppError>, DpHandlerDescription>
{
    dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(Update::filter_message().filter_map(extract_url).endpoint(handle_url))
        .branch(
            Update::filter_message()
                .filter_map(non_url_text)
                .endpoint(handle_invalid),
        )
        .branch(Update::filter_callback_query().endpoint(handle_callback))
}

fn is_supported_url(text: &str) -> bool {
    text.starts_with("http://") || text.starts_with("https://")
}

fn extract_url(msg: Message) -> Option<(Message, String)> {
    let text = msg.text()?.trim().to_string();
    if is_supported_url(&text) {
        Some((msg, text))
    } else {
        None
    }
}

fn non_url_text(msg: Message) -> Option<Message> {
    let text = msg.text()?.trim();
    if is_supported_url(text) {
        None
    } else {
        Some(msg)
    }
}

async fn handle_command(
    bot: Bot,
    services: AppServices,
    msg: Message,
    cmd: Command,
) -> Result<(), AppError> {
    let chat_id = msg.chat.id;
    match cmd {
        Command::Start => {
            bot.send_message(chat_id, WELCOME_TEXT)
                .reply_markup(start_keyboard())
                .await?;
        }
        Command::Stats => {
            let text = stats_text(services.started_at).await;
            bot.send_message(chat_id, text).await?;
        }
        Command::Settings => {
            let prefs = services.prefs.get(chat_id);
            bot.send_message(chat_id, settings_text(prefs))
                .reply_markup(settings_keyboard(prefs))
                .await?;
        }
    }
    Ok(())
}

async fn stats_text(started_at: Instant) -> String {
    let mut sys = System::new();
    sys.refresh_cpu_usage();
    tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let cpu = sys.global_cpu_usage();
    let ram = if sys.total_memory() > 0 {
        sys.used_memory() as f64 / sys.total_memory() as f64 * 100.0
    } else {
        0.0
    };
    let disks = Disks::new_with_refreshed_list();
    let (total, available) = disks
        .iter()
        .fold((0u64, 0u64), |(total, available), disk| {
            (total + disk.total_space(), available + disk.available_space())
        });
    let disk = if total > 0 {
        (total - available) as f64 / total as f64 * 100.0
    } else {
        0.0
    };

    format!(
        "⌬─────「 Bot Stats 」─────⌬\n\n\
         CPU Usage: {cpu:.1}%\nRAM Usage: {ram:.1}%\nDISK Usage: {disk:.1}%\n\n\
         Bot Uptime: {}",
        format_duration(started_at.elapsed().as_secs()),
    )
}

async fn handle_invalid(bot: Bot, msg: Message) -> Result<(), AppError> {
    bot.send_message(msg.chat.id, VALIDATION_TEXT).await?;
    Ok(())
}

async fn handle_url(
    bot: Bot,
    services: AppServices,
    msg_and_url: (Message, String),
) -> Result<(), AppError> {
    let (msg, url) = msg_and_url;
    let chat_id = msg.chat.id;
    let prefs = services.prefs.get(chat_id);

    let status = bot.send_message(chat_id, "Preparing download…").await?;
    info!(event = "request_accepted", chat = chat_id.0, url = %url);

    tokio::spawn(
        run_download(bot, services, chat_id, status.id, url, prefs).in_current_span(),
    );
    Ok(())
}

async fn run_download(
    bot: Bot,
    services: AppServices,
    chat_id: ChatId,
    status_id: MessageId,
    url: String,
    prefs: Preferences,
) {
    let key: ThrottleKey = (chat_id, status_id);
    let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_QUEUE_DEPTH);
    let relay = tokio::spawn(
        progress_relay(bot.clone(), services.throttle.clone(), key, progress_rx).in_current_span(),
    );

    let fetched = services
        .fetcher
        .fetch(
            FetchRequest {
                url: url.clone(),
                quality: prefs.quality,
                kind: prefs.kind,
            },
            progress_tx,
        )
        .await;

    // The sender side is gone once fetch returns, so the relay drains and exits.
    let _ = relay.await;
    services.throttle.forget(&key);

    let outcome = match fetched {
        Ok(outcome) => outcome,
        Err(err) => {
            error!("Download failed for {url}: {err}");
            edit_status(&bot, chat_id, status_id, failure_text(&err)).await;
            return;
        }
    };

    // Removal runs on every exit path from here on, delivery failures included.
    let _cleanup = TempFileGuard::new(outcome.path.clone());

    edit_status(
        &bot,
        chat_id,
        status_id,
        "Download complete. Uploading…".to_string(),
    )
    .await;

    if let Err(err) = deliver(&bot, chat_id, &outcome, prefs.kind).await {
        error!("Upload failed for {url}: {err}");
        edit_status(
            &bot,
            chat_id,
            status_id,
            format!("❌ Upload failed.\n\nError: {err}"),
        )
        .await;
        return;
    }

    if let Err(err) = bot.delete_message(chat_id, status_id).await {
        warn!("Failed to delete status message: {err}");
    }
    info!(event = "request_complete", chat = chat_id.0, url = %url);
}

async fn progress_relay(
    bot: Bot,
    throttle: ProgressThrottle,
    key: ThrottleKey,
    mut rx: mpsc::Receiver<ProgressSample>,
) {
    let (chat_id, message_id) = key;
    while let Some(sample) = rx.recv().await {
        if sample.phase() != Phase::Downloading {
            continue;
        }
        if !throttle.should_emit(key, Instant::now()) {
            continue;
        }
        edit_status(&bot, chat_id, message_id, render_panel(&sample)).await;
    }
}

async fn deliver(
    bot: &Bot,
    chat_id: ChatId,
    outcome: &FetchOutcome,
    kind: OutputKind,
) -> Result<(), AppError> {
    let caption = outcome
        .title
        .clone()
        .unwrap_or_else(|| "Untitled Video".to_string());
    let file = InputFile::file(outcome.path.clone());
    match kind {
        OutputKind::Audio => {
            bot.send_audio(chat_id, file).title(caption).await?;
        }
        OutputKind::Document => {
            bot.send_document(chat_id, file).caption(caption).await?;
        }
        OutputKind::Video => {
            bot.send_video(chat_id, file)
                .caption(caption)
                .supports_streaming(true)
                .await?;
        }
    }
    Ok(())
}

async fn handle_callback(bot: Bot, services: AppServices, q: CallbackQuery) -> Result<(), AppError> {
    let Some(data) = q.data.clone() else {
        bot.answer_callback_query(q.id).await?;
        return Ok(());
    };
    let Some(message) = q.regular_message().cloned() else {
        return Ok(());
    };
    let chat_id = message.chat.id;

    if data == REPO_CALLBACK {
        bot.answer_callback_query(q.id).await?;
        bot.send_sticker(chat_id, InputFile::file_id(FileId(REPO_STICKER_ID.to_string())))
            .await?;
        return Ok(());
    }

    let Some(change) = parse_setting_callback(&data) else {
        bot.answer_callback_query(q.id).await?;
        return Ok(());
    };
    let confirmation = match change {
        SettingChange::Quality(quality) => {
            services.prefs.set_quality(chat_id, quality);
            format!("Set quality to {}", quality.label())
        }
        SettingChange::Kind(kind) => {
            services.prefs.set_kind(chat_id, kind);
            format!("Set format to {}", kind.as_str())
        }
    };
    bot.answer_callback_query(q.id).text(confirmation).await?;

    let prefs = services.prefs.get(chat_id);
    if let Err(err) = bot
        .edit_message_text(chat_id, message.id, settings_text(prefs))
        .reply_markup(settings_keyboard(prefs))
        .await
    {
        if !is_message_not_modified(&err) {
            warn!("Failed to refresh settings message: {err}");
        }
    }
    Ok(())
}

async fn edit_status(bot: &Bot, chat_id: ChatId, message_id: MessageId, text: String) {
    if let Err(err) = bot.edit_message_text(chat_id, message_id, text).await {
        if is_message_not_modified(&err) {
            return;
        }
        warn!("Failed to edit status message: {err}");
    }
}

fn is_message_not_modified(err: &RequestError) -> bool {
    matches!(err, RequestError::Api(ApiError::MessageNotModified))
}

fn failure_text(err: &FetchError) -> String {
    match err {
        FetchError::Exhausted { kind, detail } => {
            format!("❌ Download failed.\n\nREASON: {kind}\nDETAIL: {detail}")
        }
        other => format!("❌ Download failed.\n\nError: {other}"),
    }
}

struct TempFileGuard {
    path: PathBuf,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!(event = "temp_file_removed", path = %self.path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!("Failed to remove temp file {}: {err}", self.path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    #[test]
    fn url_validation_accepts_both_schemes() {
        assert!(is_supported_url("http://example.com/video1"));
        assert!(is_supported_url("https://example.com/video1"));
        assert!(!is_supported_url("not-a-url"));
        assert!(!is_supported_url("ftp://example.com/file"));
        assert!(!is_supported_url("httpsnot-a-url"));
    }

    #[test]
    fn message_not_modified_is_not_a_failure() {
        let err = RequestError::Api(ApiError::MessageNotModified);
        assert!(is_message_not_modified(&err));
    }

    #[test]
    fn failure_text_carries_classification_and_detail() {
        let err = FetchError::Exhausted {
            kind: FailureKind::Blocked,
            detail: "ERROR: HTTP Error 403: Forbidden".to_string(),
        };
        let text = failure_text(&err);
        assert!(text.contains("REASON: blocked by source"));
        assert!(text.contains("DETAIL: ERROR: HTTP Error 403: Forbidden"));
    }

    #[test]
    fn temp_file_guard_removes_the_file() {
        let path = std::env::temp_dir().join(format!(
            "tubefetch-guard-test-{}-{:?}",
            std::process::id(),
            std::thread::current().id(),
        ));
        std::fs::write(&path, b"media").unwrap();
        assert!(path.exists());
        drop(TempFileGuard::new(path.clone()));
        assert!(!path.exists());
    }

    #[test]
    fn temp_file_guard_tolerates_missing_file() {
        let path = std::env::temp_dir().join("tubefetch-guard-test-missing");
        // Dropping must not panic when there is nothing to remove.
        drop(TempFileGuard::new(path));
    }
}
