use serde::Deserialize;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Downloading,
    Postprocessing,
    Finished,
}

/// One progress event as reported by yt-dlp's `--progress-template` line
/// protocol. Byte counts arrive as floats because fragmented downloads
/// report fractional estimates; any field may be null mid-download.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProgressSample {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub downloaded_bytes: Option<f64>,
    #[serde(default)]
    pub total_bytes: Option<f64>,
    #[serde(default)]
    pub total_bytes_estimate: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub eta: Option<f64>,
}

impl ProgressSample {
    pub fn phase(&self) -> Phase {
        match self.status.as_str() {
            "downloading" => Phase::Downloading,
            "finished" => Phase::Finished,
            _ => Phase::Postprocessing,
        }
    }

    /// Known total, or the extractor's estimate, or 0 for chunked sources
    /// that report neither.
    pub fn total(&self) -> f64 {
        self.total_bytes
            .filter(|v| *v > 0.0)
            .or(self.total_bytes_estimate)
            .unwrap_or(0.0)
    }

    /// Percent done; 0 when the total is unknown rather than an error, so
    /// streamed sources render as a flat bar instead of failing.
    pub fn percent(&self) -> f64 {
        let total = self.total();
        if total > 0.0 {
            self.downloaded_bytes.unwrap_or(0.0) / total * 100.0
        } else {
            0.0
        }
    }
}

const BAR_SLOTS: usize = 10;

pub fn render_panel(sample: &ProgressSample) -> String {
    let pct = sample.percent();
    let filled = ((pct / 10.0) as usize).min(BAR_SLOTS);
    let bar: String = "█".repeat(filled) + &"░".repeat(BAR_SLOTS - filled);
    let eta = sample.eta.unwrap_or(0.0).max(0.0) as u64;
    format!(
        "Downloading…\n\n{bar} {pct:.1}%\nSize: {} / {}\nSpeed: {}/s | ETA: {}",
        human_bytes(sample.downloaded_bytes.unwrap_or(0.0)),
        human_bytes(sample.total()),
        human_bytes(sample.speed.unwrap_or(0.0)),
        format_duration(eta),
    )
}

pub fn human_bytes(size: f64) -> String {
    const LABELS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if size <= 0.0 {
        return "0B".to_string();
    }
    let mut size = size;
    let mut unit = 0;
    while size > 1024.0 && unit < LABELS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.2} {}", LABELS[unit])
}

pub fn format_duration(total_seconds: u64) -> String {
    let (minutes, seconds) = (total_seconds / 60, total_seconds % 60);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    let (days, hours) = (hours / 24, hours % 24);

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if seconds > 0 {
        parts.push(format!("{seconds}s"));
    }
    if parts.is_empty() {
        return "0s".to_string();
    }
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(downloaded: f64, total: Option<f64>, estimate: Option<f64>) -> ProgressSample {
        ProgressSample {
            status: "downloading".into(),
            downloaded_bytes: Some(downloaded),
            total_bytes: total,
            total_bytes_estimate: estimate,
            speed: Some(1024.0 * 1024.0),
            eta: Some(35.0),
        }
    }

    #[test]
    fn percent_is_zero_when_total_unknown() {
        assert_eq!(sample(5000.0, None, None).percent(), 0.0);
        // A reported zero total must not divide either.
        assert_eq!(sample(5000.0, Some(0.0), None).percent(), 0.0);
    }

    #[test]
    fn estimate_is_used_when_total_missing() {
        let s = sample(50.0, None, Some(200.0));
        assert_eq!(s.total(), 200.0);
        assert_eq!(s.percent(), 25.0);
    }

    #[test]
    fn phase_mapping() {
        let mut s = ProgressSample::default();
        s.status = "downloading".into();
        assert_eq!(s.phase(), Phase::Downloading);
        s.status = "finished".into();
        assert_eq!(s.phase(), Phase::Finished);
        s.status = "started".into();
        assert_eq!(s.phase(), Phase::Postprocessing);
    }

    #[test]
    fn panel_bar_tracks_percent() {
        let empty = render_panel(&sample(0.0, Some(100.0), None));
        assert!(empty.contains("░░░░░░░░░░ 0.0%"));

        let half = render_panel(&sample(50.0, Some(100.0), None));
        assert!(half.contains("█████░░░░░ 50.0%"));

        let full = render_panel(&sample(100.0, Some(100.0), None));
        assert!(full.contains("██████████ 100.0%"));
    }

    #[test]
    fn panel_includes_size_speed_and_eta() {
        let text = render_panel(&sample(512.0 * 1024.0, Some(1024.0 * 1024.0), None));
        assert!(text.contains("Size: 512.00 KB / 1024.00 KB"));
        assert!(text.contains("Speed: 1024.00 KB/s"));
        assert!(text.contains("ETA: 35s"));
    }

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(0.0), "0B");
        assert_eq!(human_bytes(512.0), "512.00 B");
        assert_eq!(human_bytes(2048.0), "2.00 KB");
        assert_eq!(human_bytes(3.5 * 1024.0 * 1024.0), "3.50 MB");
        assert_eq!(human_bytes(1024.0 * 1024.0 * 1024.0 * 2.0), "2.00 GB");
    }

    #[test]
    fn duration_formatting_skips_zero_units() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(35), "35s");
        assert_eq!(format_duration(70), "1m, 10s");
        assert_eq!(format_duration(3600), "1h");
        assert_eq!(format_duration(90_061), "1d, 1h, 1m, 1s");
    }
}
