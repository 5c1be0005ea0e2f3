//! Rehydration: state reconstruction without side effects.

use crate::error::ReplayError;
use oao_core::ExecutionId;
use oao_log::{EventLog, ExecutionState, ExecutionTimeline};

/// Fold an execution's log into derived state.
///
/// Invokes neither the adapter nor any tool; safe to call at any time,
/// any number of times.
///
/// # Errors
///
/// Returns a log error if the store is unavailable.
pub fn rehydrate(
    log: &dyn EventLog,
    execution_id: ExecutionId,
) -> Result<ExecutionState, ReplayError> {
    let events = log.read(execution_id, 0)?;
    Ok(ExecutionState::fold(execution_id, &events))
}

/// Derive a human-readable timeline of an execution.
///
/// # Errors
///
/// Returns a log error if the store is unavailable.
pub fn timeline(
    log: &dyn EventLog,
    execution_id: ExecutionId,
) -> Result<ExecutionTimeline, ReplayError> {
    let events = log.read(execution_id, 0)?;
    Ok(ExecutionTimeline::from_events(execution_id, &events))
}
