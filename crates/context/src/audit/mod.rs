//! Audit recorder
//!
//! Persists one human-readable markdown file per query into the audit
//! directory. File names are `<local time>_<question slug>.md`; a clash gets a
//! numeric suffix instead of overwriting. Writes go to a temporary file first
//! and are linked into place, so a reader never sees a partial record.

mod markdown;

pub use markdown::render_markdown;

use docnav_common::errors::{AppError, Result};
use docnav_common::models::QaRecord;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Characters of the question kept in the file name
const SLUG_CHARS: usize = 20;

/// Suffixes tried before giving up on a free file name
const MAX_NAME_ATTEMPTS: usize = 1000;

pub struct AuditRecorder {
    dir: PathBuf,
}

impl AuditRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `record` and return the path of the new file
    #[instrument(skip_all, fields(query_id = %record.query_id))]
    pub async fn record(&self, record: QaRecord) -> Result<PathBuf> {
        let content = render_markdown(&record)?;
        let write_error = |path: &Path, e: std::io::Error| AppError::AuditWrite {
            path: path.display().to_string(),
            message: e.to_string(),
        };

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| write_error(&self.dir, e))?;

        let stem = file_stem(&record);
        let temp = self.dir.join(format!(".{}.{}.tmp", stem, record.query_id));
        tokio::fs::write(&temp, content.as_bytes())
            .await
            .map_err(|e| write_error(&temp, e))?;

        let linked = self.link_unique(&temp, &stem).await;
        if let Err(e) = tokio::fs::remove_file(&temp).await {
            warn!(path = %temp.display(), error = %e, "Failed to remove temporary audit file");
        }
        let path = linked?;

        info!(path = %path.display(), "Audit record written");
        Ok(path)
    }

    async fn link_unique(&self, temp: &Path, stem: &str) -> Result<PathBuf> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                format!("{}.md", stem)
            } else {
                format!("{}-{}.md", stem, attempt)
            };
            let target = self.dir.join(name);
            match tokio::fs::hard_link(temp, &target).await {
                Ok(()) => return Ok(target),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(AppError::AuditWrite {
                        path: target.display().to_string(),
                        message: e.to_string(),
                    })
                }
            }
        }
        Err(AppError::AuditWrite {
            path: self.dir.join(format!("{}.md", stem)).display().to_string(),
            message: format!("no free file name after {} attempts", MAX_NAME_ATTEMPTS),
        })
    }
}

fn file_stem(record: &QaRecord) -> String {
    let local = record.started_at.with_timezone(&chrono::Local);
    format!("{}_{}", local.format("%Y-%m-%d_%H-%M-%S"), slugify(&record.question))
}

/// File-name-safe prefix of the question: word characters, whitespace and
/// hyphens only, at most 20 characters, whitespace turned into underscores
pub fn slugify(question: &str) -> String {
    let kept: String = question
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .take(SLUG_CHARS)
        .collect();
    let slug: String = kept
        .trim()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();

    if slug.is_empty() {
        "unnamed".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docnav_common::models::RecordOutcome;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("合同的违约责任是什么？"), "合同的违约责任是什么");
        assert_eq!(slugify("  What is the late-payment fee?"), "What_is_the_late-p");
        assert_eq!(slugify("？？？"), "unnamed");
        assert_eq!(slugify(""), "unnamed");
    }

    #[tokio::test]
    async fn test_record_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = AuditRecorder::new(dir.path().join("qa_logs"));
        let mut record = QaRecord::begin("付款期限是多久？", "/docs/contract.pdf");
        record.finish(RecordOutcome::NoRelevantContent);

        let path = recorder.record(record).await.unwrap();

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("_付款期限是多久.md"), "unexpected name {}", name);
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("付款期限是多久？"));

        let leftovers: Vec<_> = std::fs::read_dir(recorder.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_name_collision_gets_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = AuditRecorder::new(dir.path());
        let mut first = QaRecord::begin("same question", "/docs/a.txt");
        first.finish(RecordOutcome::Answered);
        let mut second = QaRecord::begin("same question", "/docs/b.txt");
        second.started_at = first.started_at;
        second.finish(RecordOutcome::Answered);

        let a = recorder.record(first).await.unwrap();
        let b = recorder.record(second).await.unwrap();

        assert_ne!(a, b);
        assert!(b.to_string_lossy().ends_with("_same_question-1.md"));
        assert!(std::fs::read_to_string(&a).is_ok());
    }
}
