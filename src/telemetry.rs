//! # Trace Propagation
//!
//! Orders are submitted in one request and their jobs are dispatched seconds or
//! minutes later by the scheduler, so the trace that submitted an order has to
//! survive in storage. [`TraceContext`] is an explicit value passed through the
//! service calls (there is no process-wide tracer): it serializes to a W3C
//! `traceparent` token that is stored on every job, and the scheduler resumes a
//! child context from that token before dispatching.
//!
//! ```text
//! 00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01
//! ^^ ^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^ ^^^^^^^^^^^^^^^^ ^^
//! |  trace id                         span id          flags
//! version
//! ```

use crate::error::{OrderflowError, Result};
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState};
use opentelemetry::Context;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{IdGenerator, RandomIdGenerator};
use std::collections::HashMap;
use std::fmt;

/// Header used to forward the context on outbound HTTP calls
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Expected length of each `-` separated field of a version 00 token
const FIELD_LENGTHS: [usize; 4] = [2, 32, 16, 2];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: TraceId,
    span_id: SpanId,
    flags: TraceFlags,
}

impl TraceContext {
    /// Start a new, sampled trace
    pub fn new_root() -> Self {
        let ids = RandomIdGenerator::default();
        Self {
            trace_id: ids.new_trace_id(),
            span_id: ids.new_span_id(),
            flags: TraceFlags::SAMPLED,
        }
    }

    /// A new span within the same trace
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: RandomIdGenerator::default().new_span_id(),
            flags: self.flags,
        }
    }

    /// Serialize this context for storage or transport
    pub fn to_token(&self) -> String {
        let context = Context::new().with_remote_span_context(self.span_context());
        let mut carrier: HashMap<String, String> = HashMap::new();
        TraceContextPropagator::new().inject_context(&context, &mut carrier);
        carrier.remove(TRACEPARENT_HEADER).unwrap_or_default()
    }

    /// Parse a stored token back into the exact context it was produced from.
    ///
    /// Only canonical version 00 tokens are accepted: four fields of fixed
    /// length, lowercase hex only, non-zero identifiers.
    pub fn from_token(token: &str) -> Result<Self> {
        check_canonical(token)?;

        let carrier = HashMap::from([(TRACEPARENT_HEADER.to_string(), token.to_string())]);
        let context = TraceContextPropagator::new().extract(&carrier);
        let span = context.span();
        let span_context = span.span_context();
        if !span_context.is_valid() {
            return Err(invalid(token, "not a valid traceparent"));
        }

        Ok(Self {
            trace_id: span_context.trace_id(),
            span_id: span_context.span_id(),
            flags: span_context.trace_flags(),
        })
    }

    /// Continue a stored trace: same trace id, fresh span id
    pub fn resume(token: &str) -> Result<Self> {
        Self::from_token(token).map(|parent| parent.child())
    }

    pub fn trace_id_hex(&self) -> String {
        self.trace_id.to_string()
    }

    pub fn span_id_hex(&self) -> String {
        self.span_id.to_string()
    }

    pub fn is_sampled(&self) -> bool {
        self.flags.is_sampled()
    }

    /// OpenTelemetry view of this context, marked remote since it crossed storage
    pub fn span_context(&self) -> SpanContext {
        SpanContext::new(
            self.trace_id,
            self.span_id,
            self.flags,
            true,
            TraceState::default(),
        )
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_token())
    }
}

/// Tokens are written by [`TraceContext::to_token`], so anything other than the
/// exact canonical form is corruption rather than a variant to normalize.
fn check_canonical(token: &str) -> Result<()> {
    let fields: Vec<&str> = token.split('-').collect();
    if fields.len() != FIELD_LENGTHS.len() {
        return Err(invalid(token, "expected four '-' separated fields"));
    }
    if fields[0] != "00" {
        return Err(invalid(token, "unsupported version"));
    }
    for (field, expected) in fields.iter().zip(FIELD_LENGTHS) {
        if field.len() != expected {
            return Err(invalid(token, "field has the wrong length"));
        }
        if !field.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(invalid(token, "fields must be lowercase hex"));
        }
    }
    Ok(())
}

fn invalid(token: &str, reason: &str) -> OrderflowError {
    OrderflowError::InvalidTraceToken(format!("'{token}': {reason}"))
}
