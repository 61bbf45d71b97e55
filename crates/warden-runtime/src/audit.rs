//! Sandbox audit logging
//!
//! Structured record of the runtime's enforcement decisions (capability
//! denials, illegal constants, exceeded limits) for monitoring a host's
//! scripts.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Audit event types
#[derive(Debug, Clone, PartialEq)]
pub enum AuditEvent {
    /// The policy refused a call on a proxied value
    CapabilityDenied { operation: String, target: String },
    /// A proxy was requested for a constant that is not allowed
    IllegalConstant { name: String },
    /// A loop ran past the iteration limit
    IterationLimitExceeded { count: u64, limit: u64 },
    /// A method was called more often than its limit allows
    InvocationLimitExceeded {
        method: String,
        count: u64,
        limit: u64,
    },
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditEvent::CapabilityDenied { operation, target } => {
                write!(f, "Capability denied: {} on {}", operation, target)
            }
            AuditEvent::IllegalConstant { name } => {
                write!(f, "Illegal constant access: {}", name)
            }
            AuditEvent::IterationLimitExceeded { count, limit } => {
                write!(f, "Iteration limit exceeded: {} (limit: {})", count, limit)
            }
            AuditEvent::InvocationLimitExceeded {
                method,
                count,
                limit,
            } => {
                write!(
                    f,
                    "Invocation limit exceeded for {}: {} (limit: {})",
                    method, count, limit
                )
            }
        }
    }
}

/// Audit log entry with timestamp
#[derive(Debug, Clone)]
pub struct AuditEntry {
    /// Event timestamp (Unix timestamp in milliseconds)
    pub timestamp: u64,
    /// Audit event
    pub event: AuditEvent,
}

impl AuditEntry {
    /// Create a new audit entry with current timestamp
    pub fn new(event: AuditEvent) -> Self {
        Self {
            timestamp: current_timestamp_ms(),
            event,
        }
    }

    /// Format as log line
    pub fn to_log_line(&self) -> String {
        format!("[{}] {}", format_timestamp(self.timestamp), self.event)
    }
}

/// Current Unix timestamp in milliseconds; 0 if the clock is before the epoch
fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn format_timestamp(timestamp_ms: u64) -> String {
    format!("{}+{:03}ms", timestamp_ms / 1000, timestamp_ms % 1000)
}

/// Audit logger trait for customizable logging backends
pub trait AuditLogger: Send + Sync {
    /// Log an audit event
    fn log(&self, event: AuditEvent);

    /// Get all logged entries (for testing)
    fn entries(&self) -> Vec<AuditEntry>;

    /// Clear all logged entries (for testing)
    fn clear(&self);
}

/// In-memory audit logger
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditLogger {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl MemoryAuditLogger {
    /// Create a new in-memory audit logger
    pub fn new() -> Self {
        Self::default()
    }

    /// Logged events without their timestamps
    pub fn events(&self) -> Vec<AuditEvent> {
        self.entries().into_iter().map(|entry| entry.event).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<AuditEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AuditLogger for MemoryAuditLogger {
    fn log(&self, event: AuditEvent) {
        let entry = AuditEntry::new(event);
        self.lock().push(entry);
    }

    fn entries(&self) -> Vec<AuditEntry> {
        self.lock().clone()
    }

    fn clear(&self) {
        self.lock().clear();
    }
}

/// Null audit logger (no-op, the default)
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAuditLogger;

impl NullAuditLogger {
    /// Create a new null audit logger
    pub fn new() -> Self {
        Self
    }
}

impl AuditLogger for NullAuditLogger {
    fn log(&self, _event: AuditEvent) {
        // No-op
    }

    fn entries(&self) -> Vec<AuditEntry> {
        Vec::new()
    }

    fn clear(&self) {
        // No-op
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_display() {
        let event = AuditEvent::CapabilityDenied {
            operation: "delete".to_string(),
            target: "[1, 2]".to_string(),
        };
        assert_eq!(event.to_string(), "Capability denied: delete on [1, 2]");
    }

    #[test]
    fn test_audit_entry_log_line_format() {
        let entry = AuditEntry::new(AuditEvent::IterationLimitExceeded { count: 4, limit: 3 });
        let log_line = entry.to_log_line();

        assert!(log_line.contains("Iteration limit exceeded: 4 (limit: 3)"));
        assert!(log_line.starts_with('['));
        assert!(entry.timestamp > 0);
    }

    #[test]
    fn test_memory_logger_stores_events() {
        let logger = MemoryAuditLogger::new();

        logger.log(AuditEvent::IllegalConstant {
            name: "File".to_string(),
        });
        logger.log(AuditEvent::InvocationLimitExceeded {
            method: "notify".to_string(),
            count: 3,
            limit: 2,
        });

        assert_eq!(logger.entries().len(), 2);
        assert_eq!(
            logger.events()[0],
            AuditEvent::IllegalConstant {
                name: "File".to_string()
            }
        );
    }

    #[test]
    fn test_memory_logger_clones_share_entries() {
        let logger = MemoryAuditLogger::new();
        let handle = logger.clone();

        handle.log(AuditEvent::IllegalConstant {
            name: "Kernel".to_string(),
        });
        assert_eq!(logger.entries().len(), 1);

        logger.clear();
        assert!(handle.entries().is_empty());
    }

    #[test]
    fn test_null_logger_no_op() {
        let logger = NullAuditLogger::new();
        logger.log(AuditEvent::IllegalConstant {
            name: "File".to_string(),
        });
        assert!(logger.entries().is_empty());
    }
}
