//! Event log backends.
//!
//! The reference persisted layout is Redis-shaped: events live in a sorted
//! set `oao:events:{execution_id}` scored by sequence with a TTL refreshed
//! on every append. Backends are pluggable behind [`EventLog`]; the
//! in-memory backend implements the same observable semantics and is the
//! default for tests and single-process deployments.

use crate::bus::EventBus;
use crate::event::{Event, EventDraft, EventPayload, ToolCallRecord};
use oao_core::{Digest, EventId, ExecutionId, Timestamp};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

/// Default event retention: 7 days
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Event log errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    /// A concurrent append raced for the same sequence
    DuplicateSequence {
        /// Owning execution
        execution_id: ExecutionId,
        /// The contested sequence
        sequence: u64,
    },
    /// An imported event's sequence is not the next dense position
    SequenceGap {
        /// Owning execution
        execution_id: ExecutionId,
        /// The next dense position
        expected: u64,
        /// The sequence actually supplied
        actual: u64,
    },
    /// The execution already has a terminal event
    TerminalAlreadyRecorded {
        /// Owning execution
        execution_id: ExecutionId,
    },
    /// Backing store failure
    Backend {
        /// What went wrong
        reason: String,
    },
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateSequence {
                execution_id,
                sequence,
            } => write!(f, "Duplicate sequence {} for {}", sequence, execution_id),
            Self::SequenceGap {
                execution_id,
                expected,
                actual,
            } => write!(
                f,
                "Sequence gap for {}: expected {}, got {}",
                execution_id, expected, actual
            ),
            Self::TerminalAlreadyRecorded { execution_id } => {
                write!(f, "Terminal event already recorded for {}", execution_id)
            }
            Self::Backend { reason } => write!(f, "Event log backend error: {}", reason),
        }
    }
}

impl std::error::Error for LogError {}

/// The append-only event log.
///
/// Appends are serialized per execution id and readers always observe a
/// prefix-consistent view. The log is the write-ahead record: a state
/// transition has not happened until its append returns success.
pub trait EventLog: Send + Sync {
    /// Append a draft, assigning the next dense sequence atomically.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::TerminalAlreadyRecorded`] if the execution is
    /// already terminal, or a backend error.
    fn append(&self, execution_id: ExecutionId, draft: EventDraft) -> Result<Event, LogError>;

    /// Re-insert a fully formed event, validating sequence density.
    ///
    /// Used when transferring a log between stores, never by the engine.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::DuplicateSequence`] or [`LogError::SequenceGap`]
    /// when the supplied sequence is not the next dense position.
    fn import(&self, event: Event) -> Result<(), LogError>;

    /// Read the ordered event stream from a sequence onward.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the store is unavailable.
    fn read(&self, execution_id: ExecutionId, from_sequence: u64) -> Result<Vec<Event>, LogError>;

    /// Look up a prior successful tool call by canonical argument hash.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the store is unavailable.
    fn exists_tool_success(
        &self,
        execution_id: ExecutionId,
        arg_hash: &Digest,
    ) -> Result<Option<ToolCallRecord>, LogError>;

    /// Set the retention TTL for an execution's events.
    ///
    /// The expiry is re-extended on every subsequent append so that
    /// long-running executions never lose their own history.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the store is unavailable.
    fn set_retention(&self, execution_id: ExecutionId, ttl: Duration) -> Result<(), LogError>;

    /// Number of events recorded for an execution.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the store is unavailable.
    fn count(&self, execution_id: ExecutionId) -> Result<u64, LogError>;
}

/// Append a draft and fold the resulting event into derived state.
///
/// This is the only sanctioned way to advance in-memory state: the
/// mutation happens strictly after the append succeeds, so the state can
/// never run ahead of the log.
///
/// # Errors
///
/// Propagates the append error; on error the state is untouched.
pub fn append_applying(
    log: &dyn EventLog,
    state: &mut crate::state::ExecutionState,
    execution_id: ExecutionId,
    draft: EventDraft,
) -> Result<Event, LogError> {
    let event = log.append(execution_id, draft)?;
    state.apply(&event);
    Ok(event)
}

struct LogEntry {
    events: Vec<Event>,
    ttl: Duration,
    expires_at: Timestamp,
}

impl LogEntry {
    fn new(ttl: Duration) -> Self {
        Self {
            events: Vec::new(),
            ttl,
            expires_at: Timestamp::now().plus(ttl),
        }
    }

    fn touch(&mut self) {
        self.expires_at = Timestamp::now().plus(self.ttl);
    }

    fn is_expired(&self) -> bool {
        Timestamp::now() > self.expires_at
    }

    fn has_terminal(&self) -> bool {
        self.events.last().is_some_and(Event::is_terminal)
    }
}

/// In-memory event log.
///
/// Suitable for tests and single-process deployments. Not durable across
/// restarts.
pub struct MemoryEventLog {
    inner: Mutex<HashMap<ExecutionId, LogEntry>>,
    bus: Option<EventBus>,
    default_ttl: Duration,
}

impl MemoryEventLog {
    /// Create a log with the default 7-day retention
    #[must_use]
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    /// Create a log with a custom default retention
    #[must_use]
    pub fn with_retention(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            bus: None,
            default_ttl: ttl,
        }
    }

    /// Publish every appended event to the given bus
    #[must_use]
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<ExecutionId, LogEntry>>, LogError> {
        self.inner.lock().map_err(|_| LogError::Backend {
            reason: "event log mutex poisoned".to_string(),
        })
    }
}

impl Default for MemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog for MemoryEventLog {
    fn append(&self, execution_id: ExecutionId, draft: EventDraft) -> Result<Event, LogError> {
        let event = {
            let mut inner = self.lock()?;
            let entry = inner
                .entry(execution_id)
                .or_insert_with(|| LogEntry::new(self.default_ttl));
            if entry.is_expired() {
                entry.events.clear();
            }
            if entry.has_terminal() {
                return Err(LogError::TerminalAlreadyRecorded { execution_id });
            }

            let event = Event {
                event_id: EventId::new(),
                execution_id,
                sequence: entry.events.len() as u64,
                step_number: draft.step_number,
                kind: draft.payload.kind(),
                timestamp: Timestamp::now(),
                payload: draft.payload,
                trace_context: draft.trace_context,
            };
            entry.events.push(event.clone());
            entry.touch();
            event
        };

        tracing::debug!(
            execution_id = %execution_id,
            sequence = event.sequence,
            kind = ?event.kind,
            "event appended"
        );
        if let Some(bus) = &self.bus {
            bus.publish(&event);
        }
        Ok(event)
    }

    fn import(&self, event: Event) -> Result<(), LogError> {
        let mut inner = self.lock()?;
        let entry = inner
            .entry(event.execution_id)
            .or_insert_with(|| LogEntry::new(self.default_ttl));

        let next = entry.events.len() as u64;
        if event.sequence < next {
            return Err(LogError::DuplicateSequence {
                execution_id: event.execution_id,
                sequence: event.sequence,
            });
        }
        if event.sequence > next {
            return Err(LogError::SequenceGap {
                execution_id: event.execution_id,
                expected: next,
                actual: event.sequence,
            });
        }
        if entry.has_terminal() {
            return Err(LogError::TerminalAlreadyRecorded {
                execution_id: event.execution_id,
            });
        }
        entry.events.push(event);
        entry.touch();
        Ok(())
    }

    fn read(&self, execution_id: ExecutionId, from_sequence: u64) -> Result<Vec<Event>, LogError> {
        let inner = self.lock()?;
        Ok(inner
            .get(&execution_id)
            .filter(|entry| !entry.is_expired())
            .map(|entry| {
                entry
                    .events
                    .iter()
                    .filter(|e| e.sequence >= from_sequence)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn exists_tool_success(
        &self,
        execution_id: ExecutionId,
        arg_hash: &Digest,
    ) -> Result<Option<ToolCallRecord>, LogError> {
        let inner = self.lock()?;
        Ok(inner
            .get(&execution_id)
            .filter(|entry| !entry.is_expired())
            .and_then(|entry| {
                entry.events.iter().find_map(|e| match &e.payload {
                    EventPayload::ToolCallSuccess(record) if record.arg_hash == *arg_hash => {
                        Some(record.clone())
                    }
                    _ => None,
                })
            }))
    }

    fn set_retention(&self, execution_id: ExecutionId, ttl: Duration) -> Result<(), LogError> {
        let mut inner = self.lock()?;
        let entry = inner
            .entry(execution_id)
            .or_insert_with(|| LogEntry::new(ttl));
        entry.ttl = ttl;
        entry.touch();
        Ok(())
    }

    fn count(&self, execution_id: ExecutionId) -> Result<u64, LogError> {
        let inner = self.lock()?;
        Ok(inner
            .get(&execution_id)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.events.len() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, LifecycleState};
    use proptest::prelude::*;
    use serde_json::json;

    fn started_draft() -> EventDraft {
        EventDraft::new(EventPayload::ExecutionStarted {
            task: json!("t"),
            execution_hash: Digest::empty(),
            agent_name: "a".to_string(),
        })
    }

    fn completed_draft() -> EventDraft {
        EventDraft::new(EventPayload::ExecutionCompleted {
            final_output: json!("out"),
            total_steps: 1,
            token_usage: 10,
        })
    }

    #[test]
    fn test_append_assigns_dense_sequences() {
        let log = MemoryEventLog::new();
        let id = ExecutionId::new();

        let e0 = log.append(id, started_draft()).unwrap();
        let e1 = log
            .append(
                id,
                EventDraft::new(EventPayload::StateEnter {
                    state: LifecycleState::Plan,
                }),
            )
            .unwrap();

        assert_eq!(e0.sequence, 0);
        assert_eq!(e1.sequence, 1);
        assert_eq!(log.count(id).unwrap(), 2);
    }

    #[test]
    fn test_append_after_terminal_is_rejected() {
        let log = MemoryEventLog::new();
        let id = ExecutionId::new();

        log.append(id, started_draft()).unwrap();
        log.append(id, completed_draft()).unwrap();

        let err = log.append(id, started_draft()).unwrap_err();
        assert_eq!(err, LogError::TerminalAlreadyRecorded { execution_id: id });
    }

    #[test]
    fn test_read_from_sequence() {
        let log = MemoryEventLog::new();
        let id = ExecutionId::new();

        log.append(id, started_draft()).unwrap();
        log.append(
            id,
            EventDraft::new(EventPayload::StepStarted { step: 0 }).with_step(0),
        )
        .unwrap();

        let tail = log.read(id, 1).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].kind, EventKind::StepStarted);
    }

    #[test]
    fn test_read_unknown_execution_is_empty() {
        let log = MemoryEventLog::new();
        assert!(log.read(ExecutionId::new(), 0).unwrap().is_empty());
    }

    #[test]
    fn test_exists_tool_success() {
        let log = MemoryEventLog::new();
        let id = ExecutionId::new();
        let hash = Digest::compute(b"search:x");

        log.append(id, started_draft()).unwrap();
        assert!(log.exists_tool_success(id, &hash).unwrap().is_none());

        log.append(
            id,
            EventDraft::new(EventPayload::ToolCallSuccess(ToolCallRecord {
                tool_name: "search".to_string(),
                arg_hash: hash,
                result: json!("R"),
                token_cost: None,
            }))
            .with_step(2),
        )
        .unwrap();

        let record = log.exists_tool_success(id, &hash).unwrap().unwrap();
        assert_eq!(record.result, json!("R"));
        assert!(log
            .exists_tool_success(id, &Digest::compute(b"other"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_import_enforces_density() {
        let log = MemoryEventLog::new();
        let id = ExecutionId::new();
        let e0 = log.append(id, started_draft()).unwrap();

        let fresh = MemoryEventLog::new();
        fresh.import(e0.clone()).unwrap();

        // Same sequence again: duplicate
        let err = fresh.import(e0.clone()).unwrap_err();
        assert!(matches!(err, LogError::DuplicateSequence { sequence: 0, .. }));

        // Skipping ahead: gap
        let mut gapped = e0;
        gapped.sequence = 5;
        let err = fresh.import(gapped).unwrap_err();
        assert!(matches!(
            err,
            LogError::SequenceGap {
                expected: 1,
                actual: 5,
                ..
            }
        ));
    }

    #[test]
    fn test_set_retention_extends_expiry() {
        let log = MemoryEventLog::with_retention(Duration::ZERO);
        let id = ExecutionId::new();
        log.append(id, started_draft()).unwrap();

        // A longer TTL set before expiry keeps the log readable.
        log.set_retention(id, Duration::from_secs(60)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(log.count(id).unwrap(), 1);
    }

    #[test]
    fn test_expired_log_reads_empty() {
        let log = MemoryEventLog::with_retention(Duration::ZERO);
        let id = ExecutionId::new();
        log.append(id, started_draft()).unwrap();

        std::thread::sleep(Duration::from_millis(5));
        assert!(log.read(id, 0).unwrap().is_empty());
        assert_eq!(log.count(id).unwrap(), 0);
    }

    proptest! {
        #[test]
        fn prop_sequences_are_dense(steps in 1u64..20) {
            let log = MemoryEventLog::new();
            let id = ExecutionId::new();

            log.append(id, started_draft()).unwrap();
            for n in 0..steps {
                log.append(
                    id,
                    EventDraft::new(EventPayload::StepStarted { step: n }).with_step(n),
                )
                .unwrap();
                log.append(
                    id,
                    EventDraft::new(EventPayload::StepCompleted {
                        step: n,
                        output: json!(n),
                        step_tokens: 1,
                        cumulative_tokens: n + 1,
                    })
                    .with_step(n),
                )
                .unwrap();
            }

            let events = log.read(id, 0).unwrap();
            for (i, event) in events.iter().enumerate() {
                prop_assert_eq!(event.sequence, i as u64);
            }
        }
    }
}
