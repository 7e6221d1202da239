use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const ANALYZE: &str = "analyze";
pub const LOUDNESS: &str = "loudness";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkType {
    /// Thumbnail plus duration/dimension probing.
    Analyze,
    Loudness,
}

impl WorkType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Analyze => ANALYZE,
            Self::Loudness => LOUDNESS,
        }
    }
}

impl std::fmt::Display for WorkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ANALYZE => Ok(Self::Analyze),
            LOUDNESS => Ok(Self::Loudness),
            _ => Err(format!("unknown work type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
    Canceled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Error => "error",
            Self::Canceled => "canceled",
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Canceled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            "canceled" => Ok(Self::Canceled),
            _ => Err(format!("unknown job status: {s}")),
        }
    }
}

/// The catalog state a job was scheduled against. A job whose snapshot no longer matches
/// the record is superseded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSnapshot {
    pub media_id: String,
    pub path: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub mtime_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    Analyze(MediaSnapshot),
    Loudness(MediaSnapshot),
}

impl JobPayload {
    pub fn work_type(&self) -> WorkType {
        match self {
            Self::Analyze(_) => WorkType::Analyze,
            Self::Loudness(_) => WorkType::Loudness,
        }
    }

    pub fn snapshot(&self) -> &MediaSnapshot {
        match self {
            Self::Analyze(snapshot) | Self::Loudness(snapshot) => snapshot,
        }
    }

    pub fn media_id(&self) -> &str {
        &self.snapshot().media_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: i64,
    /// Raw tag as stored; rows written by a newer build may carry a type this one does not know.
    pub work_type: String,
    pub media_id: String,
    pub status: JobStatus,
    pub priority: i64,
    pub payload: String,
    pub error: Option<String>,
    pub created_at_ms: i64,
    pub started_at_ms: Option<i64>,
    pub finished_at_ms: Option<i64>,
}

impl Job {
    pub fn decode_payload(&self) -> Result<JobPayload, AppError> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub work_type: Option<WorkType>,
    pub media_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Inserted(i64),
    /// A queued job for the same media and work type already existed; its snapshot was
    /// replaced with the new one.
    Refreshed(i64),
}

impl EnqueueOutcome {
    pub fn job_id(self) -> i64 {
        match self {
            Self::Inserted(id) | Self::Refreshed(id) => id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCounts {
    pub queued: usize,
    pub running: usize,
    pub done: usize,
    pub error: usize,
    pub canceled: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> MediaSnapshot {
        MediaSnapshot {
            media_id: "m-1".to_string(),
            path: "/vault/clip.mp4".to_string(),
            size: 42,
            mtime_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn payload_is_tagged_by_work_type() {
        let payload = JobPayload::Analyze(snapshot());
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "analyze");
        assert_eq!(json["media_id"], "m-1");
        assert_eq!(payload.work_type(), WorkType::Analyze);
    }

    #[test]
    fn payload_without_snapshot_fields_still_decodes() {
        let payload: JobPayload =
            serde_json::from_str(r#"{"type":"loudness","media_id":"m-2","path":"/a.mkv"}"#)
                .unwrap();
        assert_eq!(payload.work_type(), WorkType::Loudness);
        assert_eq!(payload.snapshot().size, 0);
        assert_eq!(payload.media_id(), "m-2");
    }

    #[test]
    fn status_tags_parse() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Done,
            JobStatus::Error,
            JobStatus::Canceled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
        assert!(!JobStatus::Running.is_finished());
        assert!(JobStatus::Canceled.is_finished());
    }
}
