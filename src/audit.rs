/// Audit logging for privileged operations
///
/// Every change vpnfw makes to the kernel ruleset (policy applications,
/// resets and shutdowns) is appended as one JSON object per line.
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Types of auditable events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
    ApplyPolicy,
    Reset,
    Shutdown,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    pub event_type: EventType,

    /// Whether the operation succeeded
    pub success: bool,

    /// Additional structured data about the event
    pub details: serde_json::Value,

    /// Error message if operation failed
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(
        event_type: EventType,
        success: bool,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            event_type,
            success,
            details,
            error,
        }
    }
}

impl std::fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}  {:<12} {:<6} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.event_type.to_string(),
            if self.success { "ok" } else { "FAILED" },
            self.details
        )?;
        if let Some(error) = &self.error {
            write!(f, "  ({error})")?;
        }
        Ok(())
    }
}

/// Audit log writer
#[derive(Debug)]
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    /// Opens the log at `<state dir>/audit.log`
    ///
    /// # Errors
    ///
    /// Returns `Err` if state directory cannot be determined
    pub fn new() -> std::io::Result<Self> {
        let mut log_path = crate::utils::get_state_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "State directory not found")
        })?;
        log_path.push("audit.log");

        Ok(Self { log_path })
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: path.into(),
        }
    }

    /// Appends an event to the audit log
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be opened or written
    pub fn log(&self, event: &AuditEvent) -> std::io::Result<()> {
        let json = serde_json::to_string(event)?;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;

        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;

        Ok(())
    }

    /// Reads up to `count` events, newest first. Unparsable lines are skipped
    /// and a log that does not exist yet holds no events.
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be read
    pub fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = match std::fs::read_to_string(&self.log_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let events: Vec<AuditEvent> = content
            .lines()
            .rev()
            .filter_map(|line| serde_json::from_str(line).ok())
            .take(count)
            .collect();

        Ok(events)
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }
}

fn record(event_type: EventType, success: bool, details: serde_json::Value, error: Option<String>) {
    if let Ok(audit) = AuditLog::new() {
        let event = AuditEvent::new(event_type, success, details, error);
        if let Err(e) = audit.log(&event) {
            tracing::warn!("Failed to write audit log: {}", e);
        }
    }
}

/// Logs a policy application
///
/// * `state` - Name of the requested policy state
/// * `filter_count` - Filters installed (0 on failure)
/// * `checksum` - SHA-256 of the committed batch, if the backend records one
pub fn log_apply_policy(
    state: &str,
    filter_count: usize,
    checksum: Option<&str>,
    success: bool,
    error: Option<String>,
) {
    record(
        EventType::ApplyPolicy,
        success,
        serde_json::json!({
            "state": state,
            "filter_count": filter_count,
            "checksum": checksum,
        }),
        error,
    );
}

/// Logs a reset of every known object
pub fn log_reset(success: bool, error: Option<String>) {
    record(EventType::Reset, success, serde_json::json!({}), error);
}

/// Logs removal of the installed policy at shutdown
pub fn log_shutdown(success: bool, error: Option<String>) {
    record(EventType::Shutdown, success, serde_json::json!({}), error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = AuditEvent::new(
            EventType::ApplyPolicy,
            false,
            serde_json::json!({"state": "connected"}),
            Some("nft rejected the batch".to_string()),
        );

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("apply_policy"));
        assert!(json.contains("nft rejected the batch"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"timestamp":"2024-01-01T00:00:00Z","event_type":"reset","success":true,"details":{},"error":null}"#;
        let event: AuditEvent = serde_json::from_str(json).unwrap();

        assert!(event.success);
        assert_eq!(event.event_type, EventType::Reset);
    }

    #[test]
    fn test_read_recent_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::at(dir.path().join("audit.log"));

        for (i, kind) in [EventType::ApplyPolicy, EventType::Reset, EventType::Shutdown]
            .into_iter()
            .enumerate()
        {
            audit
                .log(&AuditEvent::new(kind, true, serde_json::json!({ "n": i }), None))
                .unwrap();
        }
        std::fs::OpenOptions::new()
            .append(true)
            .open(audit.path())
            .unwrap()
            .write_all(b"garbage\n")
            .unwrap();

        let recent = audit.read_recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].event_type, EventType::Shutdown);
        assert_eq!(recent[1].event_type, EventType::Reset);
    }

    #[test]
    fn test_missing_log_has_no_events() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::at(dir.path().join("audit.log"));
        assert!(audit.read_recent(10).unwrap().is_empty());
    }

    #[test]
    fn test_event_line() {
        let json = r#"{"timestamp":"2024-01-01T12:30:00Z","event_type":"apply_policy","success":false,"details":{"state":"blocked"},"error":"nft missing"}"#;
        let event: AuditEvent = serde_json::from_str(json).unwrap();

        let line = event.to_string();
        assert!(line.starts_with("2024-01-01 12:30:00  apply_policy"));
        assert!(line.contains("FAILED"));
        assert!(line.contains(r#"{"state":"blocked"}"#));
        assert!(line.ends_with("(nft missing)"));
    }
}
