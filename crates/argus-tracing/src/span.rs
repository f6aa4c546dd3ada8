//! Span capability and implementations
//!
//! Instrumentation call sites hold an `Arc<dyn Span>` and call it
//! unconditionally. Two variants implement the capability: the recording
//! spans owned by a [`Transaction`] and the inert [`NoOpSpan`] handed out
//! when tracing is disabled or the owner already finished. Which variant a
//! caller gets is decided once, at span start, so no call site branches on
//! whether tracing is active.

use crate::context::{SpanContext, TraceHeader};
use crate::sink::SpanRecord;
use crate::transaction::Transaction;
use argus_types::{SpanId, SpanStatus};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::trace;

/// A single timed unit of work with status and metadata.
///
/// Every operation is a silent no-op once the span is finished; the first
/// finish freezes the span and later calls never alter the recorded
/// outcome.
pub trait Span: Send + Sync {
    /// The span's immutable identity.
    fn context(&self) -> SpanContext;

    /// When the span started.
    fn start_timestamp(&self) -> DateTime<Utc>;

    /// When the span finished, if it has.
    fn end_timestamp(&self) -> Option<DateTime<Utc>>;

    /// The recorded outcome, if the span finished or had a status set.
    fn status(&self) -> Option<SpanStatus>;

    /// Whether the span is frozen.
    fn is_finished(&self) -> bool;

    /// Finish the span, recording `status` (or [`SpanStatus::Ok`] when
    /// `None`). The first call wins; later calls are ignored.
    fn finish(&self, status: Option<SpanStatus>);

    /// Set a tag. Ignored once finished.
    fn set_tag(&self, key: &str, value: &str);

    /// Remove a tag. Ignored once finished.
    fn remove_tag(&self, key: &str);

    /// Attach an arbitrary data value. Ignored once finished.
    fn set_data(&self, key: &str, value: Value);

    /// Remove a data value. Ignored once finished.
    fn remove_data(&self, key: &str);

    /// Start a child span under this span.
    fn start_child(&self, operation: &str, description: Option<&str>) -> Arc<dyn Span>;

    /// Start a child span under an explicitly supplied ancestor, for
    /// resuming detached work whose logical parent is known but is not
    /// this span.
    fn start_child_with_parent(
        &self,
        parent_span_id: SpanId,
        operation: &str,
        description: Option<&str>,
    ) -> Arc<dyn Span>;

    /// The propagation header identifying this span to downstream calls.
    fn to_trace_header(&self) -> TraceHeader;

    /// Elapsed time between start and finish, once finished.
    fn duration(&self) -> Option<Duration> {
        self.end_timestamp().map(|end| end - self.start_timestamp())
    }
}

/// Mutable portion of a recording span, guarded by the span's mutex.
///
/// Freezing is enforced here: after [`SpanState::try_finish`] succeeds,
/// every mutator becomes a no-op.
#[derive(Debug, Default)]
pub(crate) struct SpanState {
    pub(crate) end_timestamp: Option<DateTime<Utc>>,
    pub(crate) status: Option<SpanStatus>,
    pub(crate) tags: HashMap<String, String>,
    pub(crate) data: HashMap<String, Value>,
    pub(crate) finished: bool,
}

impl SpanState {
    /// Attempt the finish transition. Returns `false` when the span was
    /// already frozen, in which case nothing changes.
    pub(crate) fn try_finish(&mut self, status: SpanStatus) -> bool {
        if self.finished {
            return false;
        }
        self.finished = true;
        self.end_timestamp = Some(Utc::now());
        self.status = Some(status);
        true
    }

    pub(crate) fn set_tag(&mut self, key: &str, value: &str) {
        if self.finished {
            return;
        }
        self.tags.insert(key.to_string(), value.to_string());
    }

    pub(crate) fn remove_tag(&mut self, key: &str) {
        if self.finished {
            return;
        }
        self.tags.remove(key);
    }

    pub(crate) fn set_data(&mut self, key: &str, value: Value) {
        if self.finished {
            return;
        }
        self.data.insert(key.to_string(), value);
    }

    pub(crate) fn remove_data(&mut self, key: &str) {
        if self.finished {
            return;
        }
        self.data.remove(key);
    }
}

/// A recording span owned by a [`Transaction`].
pub struct ChildSpan {
    context: SpanContext,
    start_timestamp: DateTime<Utc>,
    state: Mutex<SpanState>,
    owner: Weak<Transaction>,
}

impl ChildSpan {
    pub(crate) fn new(context: SpanContext, owner: Weak<Transaction>) -> Self {
        Self {
            context,
            start_timestamp: Utc::now(),
            state: Mutex::new(SpanState::default()),
            owner,
        }
    }

    /// Finish without notifying the owner. Used by the transaction when it
    /// sweeps up children abandoned by their callers.
    pub(crate) fn force_finish(&self, status: SpanStatus) -> bool {
        self.state.lock().try_finish(status)
    }

    /// Snapshot this span for the flattened submission payload.
    pub(crate) fn to_record(&self) -> SpanRecord {
        let state = self.state.lock();
        SpanRecord {
            context: self.context.clone(),
            start_timestamp: self.start_timestamp,
            end_timestamp: state.end_timestamp,
            status: state.status,
            tags: state.tags.clone(),
            data: state.data.clone(),
        }
    }
}

impl Span for ChildSpan {
    fn context(&self) -> SpanContext {
        self.context.clone()
    }

    fn start_timestamp(&self) -> DateTime<Utc> {
        self.start_timestamp
    }

    fn end_timestamp(&self) -> Option<DateTime<Utc>> {
        self.state.lock().end_timestamp
    }

    fn status(&self) -> Option<SpanStatus> {
        self.state.lock().status
    }

    fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    fn finish(&self, status: Option<SpanStatus>) {
        // Transition under the span's own lock, notify the owner after
        // releasing it: the owner's completion check takes the transaction
        // lock and must never nest inside ours.
        let finished_now = self
            .state
            .lock()
            .try_finish(status.unwrap_or(SpanStatus::Ok));

        if !finished_now {
            trace!(span_id = %self.context.span_id, "finish on frozen span ignored");
            return;
        }

        if let Some(owner) = self.owner.upgrade() {
            owner.on_child_finished();
        }
    }

    fn set_tag(&self, key: &str, value: &str) {
        self.state.lock().set_tag(key, value);
    }

    fn remove_tag(&self, key: &str) {
        self.state.lock().remove_tag(key);
    }

    fn set_data(&self, key: &str, value: Value) {
        self.state.lock().set_data(key, value);
    }

    fn remove_data(&self, key: &str) {
        self.state.lock().remove_data(key);
    }

    fn start_child(&self, operation: &str, description: Option<&str>) -> Arc<dyn Span> {
        match self.owner.upgrade() {
            Some(owner) => owner.spawn_child(self.context.span_id, operation, description),
            None => NoOpSpan::arc(),
        }
    }

    fn start_child_with_parent(
        &self,
        parent_span_id: SpanId,
        operation: &str,
        description: Option<&str>,
    ) -> Arc<dyn Span> {
        match self.owner.upgrade() {
            Some(owner) => owner.spawn_child(parent_span_id, operation, description),
            None => NoOpSpan::arc(),
        }
    }

    fn to_trace_header(&self) -> TraceHeader {
        self.context.trace_header()
    }
}

/// Inert span variant that records nothing and owns nothing.
pub struct NoOpSpan {
    context: SpanContext,
    timestamp: DateTime<Utc>,
}

impl NoOpSpan {
    pub fn new() -> Self {
        Self {
            context: SpanContext::disabled(),
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn arc() -> Arc<dyn Span> {
        Arc::new(Self::new())
    }
}

impl Default for NoOpSpan {
    fn default() -> Self {
        Self::new()
    }
}

impl Span for NoOpSpan {
    fn context(&self) -> SpanContext {
        self.context.clone()
    }

    fn start_timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn end_timestamp(&self) -> Option<DateTime<Utc>> {
        None
    }

    fn status(&self) -> Option<SpanStatus> {
        None
    }

    fn is_finished(&self) -> bool {
        true
    }

    fn finish(&self, _status: Option<SpanStatus>) {}

    fn set_tag(&self, _key: &str, _value: &str) {}

    fn remove_tag(&self, _key: &str) {}

    fn set_data(&self, _key: &str, _value: Value) {}

    fn remove_data(&self, _key: &str) {}

    fn start_child(&self, _operation: &str, _description: Option<&str>) -> Arc<dyn Span> {
        Self::arc()
    }

    fn start_child_with_parent(
        &self,
        _parent_span_id: SpanId,
        _operation: &str,
        _description: Option<&str>,
    ) -> Arc<dyn Span> {
        Self::arc()
    }

    fn to_trace_header(&self) -> TraceHeader {
        self.context.trace_header()
    }
}
