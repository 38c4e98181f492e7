use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    Off,
    One,
    All,
}

impl RepeatMode {
    pub fn next(self) -> Self {
        match self {
            Self::Off => Self::One,
            Self::One => Self::All,
            Self::All => Self::Off,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::One => "one",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    M4a,
    Opus,
}

impl AudioFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
            Self::Opus => "opus",
        }
    }
}

impl FromStr for AudioFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mp3" => Ok(Self::Mp3),
            "m4a" => Ok(Self::M4a),
            "opus" => Ok(Self::Opus),
            other => anyhow::bail!("unsupported audio format {other}"),
        }
    }
}

/// Length as reported by the backend: plain seconds from the extractor, or a
/// preformatted string for entries written by older backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrackDuration {
    Seconds(f64),
    Display(String),
}

impl TrackDuration {
    pub fn as_seconds(&self) -> Option<f64> {
        match self {
            Self::Seconds(seconds) => Some(*seconds),
            Self::Display(_) => None,
        }
    }
}

impl fmt::Display for TrackDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seconds(seconds) => f.write_str(&format_clock(*seconds)),
            Self::Display(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub uploader: String,
    #[serde(default)]
    pub duration: Option<TrackDuration>,
    #[serde(default, rename = "thumbnail")]
    pub thumbnail_url: Option<String>,
    #[serde(default, rename = "audio")]
    pub audio_url: String,
    #[serde(default)]
    pub upload_date: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl Track {
    /// Stand-in for a finished download the catalog does not list yet.
    pub fn placeholder(id: &str, audio_url: String) -> Self {
        Self {
            id: id.to_string(),
            title: id.to_string(),
            uploader: String::from("Unknown Artist"),
            duration: None,
            thumbnail_url: None,
            audio_url,
            upload_date: None,
            status: None,
        }
    }

    /// The key every dedup comparison uses: the audio URL, or the id when the
    /// backend did not report one.
    pub fn identity_key(&self) -> &str {
        if self.audio_url.trim().is_empty() {
            &self.id
        } else {
            &self.audio_url
        }
    }

    pub fn display_duration(&self) -> String {
        self.duration
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| String::from("0:00"))
    }

    pub fn matches_query(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        needle.is_empty()
            || self.title.to_lowercase().contains(&needle)
            || self.uploader.to_lowercase().contains(&needle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Downloading,
    Completed,
    Error,
}

impl JobStatus {
    /// Maps a backend status word. `None` means the backend has no record of
    /// the job or answered with a word outside the contract.
    pub fn from_wire(status: &str) -> Option<Self> {
        match status {
            "queued" => Some(Self::Queued),
            "downloading" | "processing" | "finalizing" => Some(Self::Downloading),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadJob {
    pub id: String,
    pub source_url: String,
    pub status: JobStatus,
    pub message: String,
    pub resolved_track: Option<Track>,
}

impl DownloadJob {
    pub fn queued(id: &str, source_url: &str) -> Self {
        Self {
            id: id.to_string(),
            source_url: source_url.to_string(),
            status: JobStatus::Queued,
            message: String::from("Waiting to start..."),
            resolved_track: None,
        }
    }

    pub fn failed(id: &str, source_url: &str, message: &str) -> Self {
        Self {
            status: JobStatus::Error,
            message: message.to_string(),
            ..Self::queued(id, source_url)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Applies one poll response. Terminal jobs are frozen; returns whether
    /// anything visible changed.
    pub fn apply_wire_status(&mut self, status: &str, message: &str) -> bool {
        if self.is_terminal() {
            return false;
        }

        let (next, message) = match JobStatus::from_wire(status) {
            Some(next) => (next, message.to_string()),
            None if status == "unknown" => (
                JobStatus::Error,
                String::from("backend has no record of this job"),
            ),
            None => (JobStatus::Error, format!("unrecognized job status {status}")),
        };

        let changed = next != self.status || message != self.message;
        self.status = next;
        self.message = message;
        changed
    }
}

pub fn format_clock(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return String::from("0:00");
    }

    let total = seconds.floor() as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}
