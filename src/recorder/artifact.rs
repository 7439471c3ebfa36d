use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stand-in for a blank participant label
pub const UNKNOWN_PARTICIPANT: &str = "unknown";

/// The two people on a recording; only affects the artifact name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantsInfo {
    pub staff: String,
    pub client: String,
}

impl ParticipantsInfo {
    pub fn new(staff: impl Into<String>, client: impl Into<String>) -> Self {
        Self {
            staff: staff.into(),
            client: client.into(),
        }
    }
}

/// A finished (or pending) recording
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub recording_id: Uuid,
    pub file_name: String,
    pub mime_type: String,
    /// None until the recorder has stopped and the chunks are assembled
    #[serde(skip)]
    pub data: Option<Arc<Vec<u8>>>,
}

impl Artifact {
    pub fn pending(recording_id: Uuid, file_name: String, mime_type: &str) -> Self {
        Self {
            recording_id,
            file_name,
            mime_type: mime_type.to_string(),
            data: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.data.is_some()
    }

    pub fn size_bytes(&self) -> usize {
        self.data.as_ref().map_or(0, |data| data.len())
    }

    /// Write the assembled bytes to `dir/<file_name>`, creating `dir` if needed
    pub async fn write_to(&self, dir: &Path) -> io::Result<PathBuf> {
        let data = self.data.as_ref().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} has not been assembled yet", self.file_name),
            )
        })?;

        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(&self.file_name);
        tokio::fs::write(&path, data.as_slice()).await?;
        Ok(path)
    }
}

fn label_or_unknown(label: &str) -> String {
    let label = label.trim();
    if label.is_empty() {
        return UNKNOWN_PARTICIPANT.to_string();
    }
    label
        .chars()
        .map(|c| match c {
            '/' | '\\' | '"' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect()
}

/// `<staff>-<client>-<YYYY-MM-DD>.<ext>`
pub fn artifact_file_name(participants: &ParticipantsInfo, date: NaiveDate, extension: &str) -> String {
    format!(
        "{}-{}-{}.{}",
        label_or_unknown(&participants.staff),
        label_or_unknown(&participants.client),
        date.format("%Y-%m-%d"),
        extension
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn may_day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    #[test]
    fn test_named_participants() {
        let name = artifact_file_name(&ParticipantsInfo::new("Aoi", "Bex"), may_day(), "webm");
        assert_eq!(name, "Aoi-Bex-2024-05-01.webm");
    }

    #[test]
    fn test_blank_participants_are_unknown() {
        let name = artifact_file_name(&ParticipantsInfo::default(), may_day(), "webm");
        assert_eq!(name, "unknown-unknown-2024-05-01.webm");

        let name = artifact_file_name(&ParticipantsInfo::new("  ", "Bex"), may_day(), "wav");
        assert_eq!(name, "unknown-Bex-2024-05-01.wav");
    }

    #[test]
    fn test_path_separators_are_replaced() {
        let name = artifact_file_name(&ParticipantsInfo::new("a/b", "c\\d"), may_day(), "webm");
        assert_eq!(name, "a-b-c-d-2024-05-01.webm");
    }

    #[test]
    fn test_control_characters_are_replaced() {
        let name = artifact_file_name(&ParticipantsInfo::new("Aoi\nX", "Bex\t\u{7f}"), may_day(), "webm");
        assert_eq!(name, "Aoi-X-Bex---2024-05-01.webm");
    }

    #[test]
    fn test_pending_artifact() {
        let artifact = Artifact::pending(Uuid::new_v4(), "x.webm".to_string(), "audio/webm");
        assert!(!artifact.is_ready());
        assert_eq!(artifact.size_bytes(), 0);
    }

    #[tokio::test]
    async fn test_pending_artifact_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = Artifact::pending(Uuid::new_v4(), "x.webm".to_string(), "audio/webm");

        let err = artifact.write_to(dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(!dir.path().join("x.webm").exists());
    }
}
