//! Calendar feed read from exported event-list documents on disk.
//!
//! Each calendar is one file, `<calendar_dir>/<calendar_id>.json`, in the
//! provider's event-list shape:
//!
//! ```json
//! {
//!   "summary": "Spring timetable",
//!   "timeZone": "Europe/Madrid",
//!   "primary": false,
//!   "items": [
//!     { "summary": "Algebra",
//!       "start": { "dateTime": "2024-03-04T09:00:00+01:00" },
//!       "end":   { "dateTime": "2024-03-04T10:30:00+01:00" } }
//!   ]
//! }
//! ```
//!
//! An external exporter keeps these files fresh; the agent only reads them.
//! A file the agent may not read is reported as an authorization failure,
//! everything else as a transport failure.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use classgate_core::RawEvent;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::application::sync_calendar::{
    CalendarSummary, EventBatch, EventSource, FetchError, TimeRange,
};

/// On-disk event-list document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CalendarDocument {
    summary: Option<String>,
    time_zone: Option<String>,
    primary: bool,
    access_role: Option<String>,
    items: Vec<RawEvent>,
}

/// [`EventSource`] over a directory of calendar documents.
#[derive(Debug, Clone)]
pub struct FileEventSource {
    dir: PathBuf,
}

impl FileEventSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn calendar_path(&self, calendar_id: &str) -> Result<PathBuf, FetchError> {
        let invalid = calendar_id.is_empty()
            || calendar_id.contains(['/', '\\'])
            || calendar_id.starts_with('.');
        if invalid {
            return Err(FetchError::Transport(format!(
                "invalid calendar id {calendar_id:?}"
            )));
        }
        Ok(self.dir.join(format!("{calendar_id}.json")))
    }

    async fn read_document(&self, path: &Path) -> Result<CalendarDocument, FetchError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            ErrorKind::PermissionDenied => {
                FetchError::Auth(format!("{}: {e}", path.display()))
            }
            ErrorKind::NotFound => {
                FetchError::Transport(format!("calendar not found at {}", path.display()))
            }
            _ => FetchError::Transport(format!("{}: {e}", path.display())),
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| FetchError::Transport(format!("{}: {e}", path.display())))
    }
}

/// Keeps events intersecting `range`; events without timed bounds pass
/// through for the window transformer to discard.
fn within(range: TimeRange, items: Vec<RawEvent>) -> Vec<RawEvent> {
    items
        .into_iter()
        .filter(|e| {
            e.timed_bounds()
                .map_or(true, |(start, end)| range.overlaps(start, end))
        })
        .collect()
}

#[async_trait]
impl EventSource for FileEventSource {
    async fn fetch_events(
        &self,
        calendar_id: &str,
        range: TimeRange,
        _interactive: bool,
    ) -> Result<EventBatch, FetchError> {
        let path = self.calendar_path(calendar_id)?;
        let doc = self.read_document(&path).await?;
        let total = doc.items.len();
        let items = within(range, doc.items);
        debug!(
            "read {} of {total} events from {}",
            items.len(),
            path.display()
        );
        Ok(EventBatch {
            time_zone: doc.time_zone,
            items,
        })
    }

    async fn list_calendars(&self, _interactive: bool) -> Result<Vec<CalendarSummary>, FetchError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            FetchError::Transport(format!("cannot list {}: {e}", self.dir.display()))
        })?;

        let mut calendars = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|x| x.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            match self.read_document(&path).await {
                Ok(doc) => calendars.push(CalendarSummary {
                    id,
                    summary: doc.summary,
                    primary: doc.primary,
                    access_role: doc.access_role,
                    time_zone: doc.time_zone,
                }),
                Err(e) => warn!("skipping unreadable calendar {}: {e}", path.display()),
            }
        }

        calendars.sort_by(|a, b| b.primary.cmp(&a.primary).then_with(|| a.id.cmp(&b.id)));
        Ok(calendars)
    }

    async fn invalidate_credentials(&self) {
        debug!("file calendar source holds no credentials");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("classgate_test_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn ms(rfc3339: &str) -> i64 {
        chrono::DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .timestamp_millis()
    }

    const TIMETABLE: &str = r#"{
        "summary": "Timetable",
        "timeZone": "Europe/Madrid",
        "items": [
            { "summary": "Past",   "start": {"dateTime": "2024-03-01T09:00:00Z"}, "end": {"dateTime": "2024-03-01T10:00:00Z"} },
            { "summary": "Today",  "start": {"dateTime": "2024-03-04T09:00:00Z"}, "end": {"dateTime": "2024-03-04T10:00:00Z"} },
            { "summary": "Allday", "start": {"date": "2024-03-04"}, "end": {"date": "2024-03-05"} }
        ]
    }"#;

    #[tokio::test]
    async fn test_fetch_filters_items_to_range() {
        // Arrange
        let dir = temp_dir();
        std::fs::write(dir.join("classes.json"), TIMETABLE).unwrap();
        let source = FileEventSource::new(&dir);
        let range = TimeRange {
            start_ms: ms("2024-03-04T00:00:00Z"),
            end_ms: ms("2024-03-11T00:00:00Z"),
        };

        // Act
        let batch = source.fetch_events("classes", range, false).await.unwrap();

        // Assert
        assert_eq!(batch.time_zone.as_deref(), Some("Europe/Madrid"));
        let names: Vec<_> = batch
            .items
            .iter()
            .filter_map(|e| e.summary.as_deref())
            .collect();
        assert_eq!(names, vec!["Today", "Allday"]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_missing_calendar_is_transport_error() {
        let dir = temp_dir();
        let source = FileEventSource::new(&dir);
        let range = TimeRange {
            start_ms: 0,
            end_ms: 1,
        };

        let result = source.fetch_events("nope", range, true).await;

        assert!(matches!(result, Err(FetchError::Transport(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_path_like_calendar_ids_are_rejected() {
        let source = FileEventSource::new("/tmp");
        let range = TimeRange {
            start_ms: 0,
            end_ms: 1,
        };
        for id in ["../etc/passwd", "a/b", ".hidden", ""] {
            let result = source.fetch_events(id, range, false).await;
            assert!(matches!(result, Err(FetchError::Transport(_))), "{id}");
        }
    }

    #[tokio::test]
    async fn test_list_calendars_scans_directory() {
        // Arrange
        let dir = temp_dir();
        std::fs::write(dir.join("zeta.json"), TIMETABLE).unwrap();
        std::fs::write(
            dir.join("alpha.json"),
            r#"{"summary":"Personal","items":[]}"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("main.json"),
            r#"{"summary":"Main","primary":true,"accessRole":"owner"}"#,
        )
        .unwrap();
        std::fs::write(dir.join("broken.json"), "{").unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        // Act
        let calendars = FileEventSource::new(&dir)
            .list_calendars(false)
            .await
            .unwrap();

        // Assert: primary first, then by id; broken and non-json skipped
        let ids: Vec<_> = calendars.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["main", "alpha", "zeta"]);
        assert_eq!(calendars[0].access_role.as_deref(), Some("owner"));
        assert_eq!(calendars[2].time_zone.as_deref(), Some("Europe/Madrid"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_list_calendars_in_missing_dir_is_transport_error() {
        let source = FileEventSource::new("/nonexistent/classgate/calendars");
        let result = source.list_calendars(false).await;
        assert!(matches!(result, Err(FetchError::Transport(_))));
    }
}
