//! Transaction root span and finish coordination
//!
//! A [`Transaction`] is the root span of a trace. It owns every child span
//! started through it, decides when the whole tree is complete, and hands
//! the finished result to the submission sink exactly once.
//!
//! Completion is event-driven: when `wait_for_children` is set and a finish
//! request arrives while children are still running, the request is parked
//! and re-evaluated on each child's finish notification. An optional
//! auto-finish timer covers transactions whose callers never finish them.

use crate::context::{SamplingDecision, SpanContext, TraceHeader};
use crate::sink::{FinishedTransaction, TransactionSink};
use crate::span::{ChildSpan, NoOpSpan, Span, SpanState};
use argus_types::{SpanId, SpanStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Default cap on the number of child spans one transaction records.
pub const DEFAULT_MAX_SPANS: usize = 1000;

/// Construction-time options for a [`Transaction`].
#[derive(Debug, Clone)]
pub struct TransactionOptions {
    /// Defer completion until every child span has finished.
    pub wait_for_children: bool,

    /// Finish the transaction automatically after this much idle time,
    /// unless it finished earlier by other means.
    pub auto_finish_after: Option<Duration>,

    /// Cap on the child collection; children started past the cap get the
    /// inert span.
    pub max_spans: usize,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            wait_for_children: false,
            auto_finish_after: None,
            max_spans: DEFAULT_MAX_SPANS,
        }
    }
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether completion waits for all children.
    pub fn with_wait_for_children(mut self, wait: bool) -> Self {
        self.wait_for_children = wait;
        self
    }

    /// Set the auto-finish deadline.
    pub fn with_auto_finish_after(mut self, delay: Duration) -> Self {
        self.auto_finish_after = Some(delay);
        self
    }

    /// Set the child span cap.
    pub fn with_max_spans(mut self, max_spans: usize) -> Self {
        self.max_spans = max_spans;
        self
    }
}

/// State guarded by the transaction's mutex: the root span, the child
/// collection, and the finish bookkeeping.
#[derive(Default)]
struct TransactionState {
    span: SpanState,
    children: Vec<Arc<ChildSpan>>,
    finish_requested: Option<SpanStatus>,
    auto_finish: Option<JoinHandle<()>>,
}

/// Everything finalization needs once the finished transition has been
/// taken, moved out of the lock so the sweep and submission run unlocked.
struct Finalization {
    end_timestamp: DateTime<Utc>,
    status: SpanStatus,
    children: Vec<Arc<ChildSpan>>,
    timer: Option<JoinHandle<()>>,
}

/// Root span of a trace, owner of its child spans.
///
/// All operations may be called from any task or thread; the transaction
/// serializes access internally. `finish` never blocks: when completion is
/// deferred it returns immediately and the last child's finish notification
/// (or the auto-finish timer) completes the transaction later. Use
/// [`Transaction::wait_finished`] to await actual completion.
pub struct Transaction {
    name: String,
    context: SpanContext,
    start_timestamp: DateTime<Utc>,
    wait_for_children: bool,
    max_spans: usize,
    sink: Arc<dyn TransactionSink>,
    state: Mutex<TransactionState>,
    self_handle: Weak<Transaction>,
    finished_tx: watch::Sender<bool>,
    finished_rx: watch::Receiver<bool>,
}

impl Transaction {
    /// Start a transaction.
    ///
    /// Must be called within a Tokio runtime when `auto_finish_after` is
    /// set; finishing always requires one for the submission dispatch.
    pub fn start(
        name: impl Into<String>,
        operation: impl Into<String>,
        sampled: SamplingDecision,
        sink: Arc<dyn TransactionSink>,
        options: TransactionOptions,
    ) -> Arc<Self> {
        let (finished_tx, finished_rx) = watch::channel(false);

        let transaction = Arc::new_cyclic(|weak: &Weak<Self>| Self {
            name: name.into(),
            context: SpanContext::new_root(operation, sampled),
            start_timestamp: Utc::now(),
            wait_for_children: options.wait_for_children,
            max_spans: options.max_spans,
            sink,
            state: Mutex::new(TransactionState::default()),
            self_handle: weak.clone(),
            finished_tx,
            finished_rx,
        });

        if let Some(delay) = options.auto_finish_after {
            let weak = Arc::downgrade(&transaction);
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(transaction) = weak.upgrade() {
                    debug!(transaction = %transaction.name, "auto-finish deadline elapsed");
                    transaction.finish(None);
                }
            });
            transaction.state.lock().auto_finish = Some(handle);
        }

        debug!(
            transaction = %transaction.name,
            trace_id = %transaction.context.trace_id,
            span_id = %transaction.context.span_id,
            "transaction started"
        );

        transaction
    }

    /// The transaction's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolves once the transaction has actually completed (the deferred
    /// finish included), never before.
    pub async fn wait_finished(&self) {
        let mut rx = self.finished_rx.clone();
        let _ = rx.wait_for(|finished| *finished).await;
    }

    /// Number of child spans registered so far.
    pub fn child_count(&self) -> usize {
        self.state.lock().children.len()
    }

    /// Register a new child span, or hand out the inert span when the
    /// transaction is finishing, finished, or full.
    pub(crate) fn spawn_child(
        &self,
        parent_span_id: SpanId,
        operation: &str,
        description: Option<&str>,
    ) -> Arc<dyn Span> {
        let child = {
            let mut state = self.state.lock();

            if state.span.finished || state.finish_requested.is_some() {
                trace!(
                    transaction = %self.name,
                    "child started on finishing transaction, returning inert span"
                );
                return NoOpSpan::arc();
            }

            if state.children.len() >= self.max_spans {
                debug!(
                    transaction = %self.name,
                    max_spans = self.max_spans,
                    "span cap reached, dropping child"
                );
                return NoOpSpan::arc();
            }

            let context = SpanContext {
                trace_id: self.context.trace_id,
                span_id: SpanId::generate(),
                parent_span_id: Some(parent_span_id),
                operation: operation.to_string(),
                description: description.map(str::to_string),
                sampled: self.context.sampled,
            };

            let child = Arc::new(ChildSpan::new(context, self.self_handle.clone()));
            state.children.push(child.clone());
            child
        };

        debug!(
            transaction = %self.name,
            span_id = %child.context().span_id,
            operation,
            "child span started"
        );

        child
    }

    /// Completion re-evaluation, called by each child after it finishes.
    /// Completes a parked finish request once no child remains unfinished.
    pub(crate) fn on_child_finished(&self) {
        let finalization = {
            let mut state = self.state.lock();
            if state.span.finished {
                return;
            }
            let Some(requested) = state.finish_requested else {
                return;
            };
            if state.children.iter().any(|child| !child.is_finished()) {
                return;
            }
            self.finalize_locked(&mut state, requested)
        };

        self.complete(finalization);
    }

    /// Take the finished transition. Callers must have verified the
    /// transaction is not yet finished.
    fn finalize_locked(&self, state: &mut TransactionState, status: SpanStatus) -> Finalization {
        state.span.try_finish(status);
        Finalization {
            end_timestamp: state.span.end_timestamp.unwrap_or_else(Utc::now),
            status,
            children: state.children.clone(),
            timer: state.auto_finish.take(),
        }
    }

    /// Finalization tail, run outside the transaction lock: cancel the
    /// timer, sweep up abandoned children, flatten, signal completion, and
    /// dispatch submission.
    fn complete(&self, finalization: Finalization) {
        if let Some(timer) = finalization.timer {
            timer.abort();
        }

        for child in &finalization.children {
            if child.force_finish(SpanStatus::DeadlineExceeded) {
                trace!(
                    transaction = %self.name,
                    span_id = %child.context().span_id,
                    "abandoned child forced to deadline_exceeded"
                );
            }
        }

        let spans = finalization
            .children
            .iter()
            .map(|child| child.to_record())
            .collect::<Vec<_>>();

        let (tags, data) = {
            let state = self.state.lock();
            (state.span.tags.clone(), state.span.data.clone())
        };

        let transaction = FinishedTransaction {
            name: self.name.clone(),
            context: self.context.clone(),
            start_timestamp: self.start_timestamp,
            end_timestamp: finalization.end_timestamp,
            status: finalization.status,
            tags,
            data,
            spans,
        };

        debug!(
            transaction = %self.name,
            trace_id = %self.context.trace_id,
            status = %transaction.status,
            spans = transaction.spans.len(),
            "transaction finished"
        );

        let _ = self.finished_tx.send(true);

        let sink = self.sink.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            if let Err(error) = sink.submit(transaction).await {
                warn!(transaction = %name, %error, "transaction submission failed");
            }
        });
    }
}

impl Span for Transaction {
    fn context(&self) -> SpanContext {
        self.context.clone()
    }

    fn start_timestamp(&self) -> DateTime<Utc> {
        self.start_timestamp
    }

    fn end_timestamp(&self) -> Option<DateTime<Utc>> {
        self.state.lock().span.end_timestamp
    }

    fn status(&self) -> Option<SpanStatus> {
        self.state.lock().span.status
    }

    fn is_finished(&self) -> bool {
        self.state.lock().span.finished
    }

    fn finish(&self, status: Option<SpanStatus>) {
        let requested = status.unwrap_or(SpanStatus::Ok);

        let finalization = {
            let mut state = self.state.lock();

            if state.span.finished || state.finish_requested.is_some() {
                trace!(transaction = %self.name, "repeated finish ignored");
                return;
            }

            if self.wait_for_children
                && state.children.iter().any(|child| !child.is_finished())
            {
                state.finish_requested = Some(requested);
                debug!(
                    transaction = %self.name,
                    "finish deferred until all children complete"
                );
                return;
            }

            self.finalize_locked(&mut state, requested)
        };

        self.complete(finalization);
    }

    fn set_tag(&self, key: &str, value: &str) {
        self.state.lock().span.set_tag(key, value);
    }

    fn remove_tag(&self, key: &str) {
        self.state.lock().span.remove_tag(key);
    }

    fn set_data(&self, key: &str, value: Value) {
        self.state.lock().span.set_data(key, value);
    }

    fn remove_data(&self, key: &str) {
        self.state.lock().span.remove_data(key);
    }

    fn start_child(&self, operation: &str, description: Option<&str>) -> Arc<dyn Span> {
        self.spawn_child(self.context.span_id, operation, description)
    }

    fn start_child_with_parent(
        &self,
        parent_span_id: SpanId,
        operation: &str,
        description: Option<&str>,
    ) -> Arc<dyn Span> {
        self.spawn_child(parent_span_id, operation, description)
    }

    fn to_trace_header(&self) -> TraceHeader {
        self.context.trace_header()
    }
}

/// Start a transaction for the given sampling decision.
///
/// An unsampled trace gets the inert span, so instrumentation call sites
/// never branch on whether tracing is active.
pub fn start_transaction(
    name: impl Into<String>,
    operation: impl Into<String>,
    sampled: SamplingDecision,
    sink: Arc<dyn TransactionSink>,
    options: TransactionOptions,
) -> Arc<dyn Span> {
    if sampled == SamplingDecision::Unsampled {
        trace!("trace unsampled, returning inert span");
        return NoOpSpan::arc();
    }
    Transaction::start(name, operation, sampled, sink, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    fn sampled(sink: Arc<MemorySink>, options: TransactionOptions) -> Arc<Transaction> {
        Transaction::start(
            "test-transaction",
            "task",
            SamplingDecision::Sampled,
            sink,
            options,
        )
    }

    async fn drain_submissions() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_children_inherit_trace_and_parent() {
        let sink = Arc::new(MemorySink::new());
        let transaction = sampled(sink.clone(), TransactionOptions::default());

        let child = transaction.start_child("db.query", Some("SELECT 1"));
        let context = child.context();

        assert_eq!(context.trace_id, transaction.context().trace_id);
        assert_eq!(context.parent_span_id, Some(transaction.context().span_id));
        assert_eq!(context.operation, "db.query");
        assert_eq!(transaction.child_count(), 1);
    }

    #[tokio::test]
    async fn test_explicit_parent_is_recorded() {
        let sink = Arc::new(MemorySink::new());
        let transaction = sampled(sink.clone(), TransactionOptions::default());

        let detached_parent = SpanId::generate();
        let child = transaction.start_child_with_parent(detached_parent, "queue.process", None);

        assert_eq!(child.context().parent_span_id, Some(detached_parent));
        // Still owned by the transaction for lifecycle purposes.
        assert_eq!(transaction.child_count(), 1);
    }

    #[tokio::test]
    async fn test_start_child_after_finish_is_inert() {
        let sink = Arc::new(MemorySink::new());
        let transaction = sampled(sink.clone(), TransactionOptions::default());

        transaction.finish(None);
        let late = transaction.start_child("too.late", None);

        assert!(late.context().span_id.is_nil());
        assert_eq!(transaction.child_count(), 0);

        drain_submissions().await;
        assert_eq!(sink.transactions()[0].spans.len(), 0);
    }

    #[tokio::test]
    async fn test_span_cap_hands_out_inert_spans() {
        let sink = Arc::new(MemorySink::new());
        let transaction = sampled(
            sink.clone(),
            TransactionOptions::default().with_max_spans(2),
        );

        let a = transaction.start_child("op", None);
        let b = transaction.start_child("op", None);
        let over = transaction.start_child("op", None);

        assert!(!a.context().span_id.is_nil());
        assert!(!b.context().span_id.is_nil());
        assert!(over.context().span_id.is_nil());
        assert_eq!(transaction.child_count(), 2);
    }

    #[tokio::test]
    async fn test_finish_submits_exactly_once() {
        let sink = Arc::new(MemorySink::new());
        let transaction = sampled(sink.clone(), TransactionOptions::default());

        transaction.finish(Some(SpanStatus::Ok));
        transaction.finish(Some(SpanStatus::Cancelled));
        transaction.finish(None);

        drain_submissions().await;
        let submitted = sink.transactions();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].status, SpanStatus::Ok);
    }

    #[tokio::test]
    async fn test_unsampled_start_transaction_is_inert() {
        let sink = Arc::new(MemorySink::new());
        let span = start_transaction(
            "unsampled",
            "task",
            SamplingDecision::Unsampled,
            sink.clone(),
            TransactionOptions::default(),
        );

        span.start_child("ignored", None).finish(None);
        span.finish(None);

        drain_submissions().await;
        assert!(sink.transactions().is_empty());
    }

    #[tokio::test]
    async fn test_deferred_finish_waits_for_every_child() {
        let sink = Arc::new(MemorySink::new());
        let transaction = sampled(
            sink.clone(),
            TransactionOptions::default().with_wait_for_children(true),
        );

        let a = transaction.start_child("a", None);
        let b = transaction.start_child("b", None);

        transaction.finish(None);
        assert!(!transaction.is_finished());

        a.finish(None);
        assert!(!transaction.is_finished());

        b.finish(None);
        assert!(transaction.is_finished());
        transaction.wait_finished().await;

        drain_submissions().await;
        assert_eq!(sink.transactions().len(), 1);
    }

    #[tokio::test]
    async fn test_deferred_finish_status_is_preserved() {
        let sink = Arc::new(MemorySink::new());
        let transaction = sampled(
            sink.clone(),
            TransactionOptions::default().with_wait_for_children(true),
        );

        let child = transaction.start_child("a", None);
        transaction.finish(Some(SpanStatus::Aborted));
        // A competing finish after the request is parked must not win.
        transaction.finish(Some(SpanStatus::Ok));

        child.finish(None);
        transaction.wait_finished().await;

        drain_submissions().await;
        assert_eq!(sink.transactions()[0].status, SpanStatus::Aborted);
    }

    #[tokio::test]
    async fn test_abandoned_children_get_deadline_exceeded() {
        let sink = Arc::new(MemorySink::new());
        let transaction = sampled(sink.clone(), TransactionOptions::default());

        let finished = transaction.start_child("done", None);
        let _abandoned = transaction.start_child("stuck", None);
        finished.finish(Some(SpanStatus::Ok));

        transaction.finish(None);
        drain_submissions().await;

        let submitted = sink.transactions();
        let spans = &submitted[0].spans;
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].status, Some(SpanStatus::Ok));
        assert_eq!(spans[1].status, Some(SpanStatus::DeadlineExceeded));
        assert!(spans[1].end_timestamp.is_some());
    }

    #[tokio::test]
    async fn test_auto_finish_fires_with_ok_status() {
        let sink = Arc::new(MemorySink::new());
        let transaction = sampled(
            sink.clone(),
            TransactionOptions::default().with_auto_finish_after(Duration::from_millis(50)),
        );

        assert!(!transaction.is_finished());
        transaction.wait_finished().await;

        assert!(transaction.is_finished());
        drain_submissions().await;
        assert_eq!(sink.transactions()[0].status, SpanStatus::Ok);
    }

    #[tokio::test]
    async fn test_auto_finish_timer_is_cancelled_by_explicit_finish() {
        let sink = Arc::new(MemorySink::new());
        let transaction = sampled(
            sink.clone(),
            TransactionOptions::default().with_auto_finish_after(Duration::from_millis(30)),
        );

        transaction.finish(Some(SpanStatus::Cancelled));
        tokio::time::sleep(Duration::from_millis(80)).await;

        let submitted = sink.transactions();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].status, SpanStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_transaction_tags_freeze_on_finish() {
        let sink = Arc::new(MemorySink::new());
        let transaction = sampled(sink.clone(), TransactionOptions::default());

        transaction.set_tag("env", "prod");
        transaction.finish(None);
        transaction.set_tag("env", "dev");

        drain_submissions().await;
        assert_eq!(
            sink.transactions()[0].tags.get("env").map(String::as_str),
            Some("prod")
        );
    }
}
