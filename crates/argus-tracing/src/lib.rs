//! # Argus Tracing - Transaction and span tracing core
//!
//! This crate models a distributed-tracing transaction as a tree of timed
//! spans, coordinates finish ordering between child spans and their root
//! transaction, and hands completed transactions to a submission sink
//! exactly once.
//!
//! ## Key components
//!
//! - [`Span`]: the span capability, implemented both by recording spans and
//!   by an inert no-op variant so call sites never branch on whether
//!   tracing is active
//! - [`Transaction`]: the root span of a trace, owner of its children and
//!   of the completion decision
//! - [`TransactionSink`]: the external collaborator that accepts finished
//!   transactions for transport
//!
//! ## Lifecycle
//!
//! A transaction is started from a sampling decision; children are started
//! through it and notify it as they finish. Depending on its options the
//! transaction completes on whichever comes first of the explicit `finish`
//! call, the last child's finish, or the auto-finish timer expiring.
//! At completion, children abandoned by their callers are
//! forced to `deadline_exceeded`, the tree is flattened in registration
//! order, and the result is submitted once.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use argus_tracing::{
//!     MemorySink, SamplingDecision, Span, Transaction, TransactionOptions,
//! };
//! use argus_types::SpanStatus;
//!
//! # async fn example() {
//! let sink = Arc::new(MemorySink::new());
//!
//! let transaction = Transaction::start(
//!     "checkout",
//!     "http.server",
//!     SamplingDecision::Sampled,
//!     sink.clone(),
//!     TransactionOptions::default().with_wait_for_children(true),
//! );
//!
//! let query = transaction.start_child("db.query", Some("SELECT * FROM carts"));
//! query.set_tag("db.system", "postgres");
//! query.finish(None);
//!
//! transaction.finish(Some(SpanStatus::Ok));
//! transaction.wait_finished().await;
//! # }
//! ```

pub mod context;
pub mod error;
pub mod sink;
pub mod span;
pub mod transaction;

pub use context::{ParseHeaderError, SamplingDecision, SpanContext, TraceHeader};
pub use error::{Result, TracingError};
pub use sink::{FinishedTransaction, JsonLinesSink, MemorySink, SpanRecord, TransactionSink};
pub use span::{ChildSpan, NoOpSpan, Span};
pub use transaction::{
    start_transaction, Transaction, TransactionOptions, DEFAULT_MAX_SPANS,
};
