//! Exception propagation tracing.
//!
//! Provides a trait-based tracing system for the propagation engine with zero-cost
//! abstraction. When using [`NoopTracer`], all trace methods compile away entirely via
//! monomorphization, the same way [`NoLimitTracker`](crate::resource::NoLimitTracker)
//! eliminates resource checking.
//!
//! # Architecture
//!
//! The [`ExceptionTracer`] trait defines hook points at protocol events (scope entry and
//! exit, first-chance throws, catches, finally blocks, escapes). Concrete
//! implementations collect different kinds of data:
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost no-op (production default) |
//! | [`StderrTracer`] | Human-readable propagation log to stderr |
//! | [`StatsTracer`] | Per-type throw counts and nesting depth |
//! | [`RecordingTracer`] | Full event recording for post-mortem analysis |
//!
//! The first-chance hook is the runtime's "first-chance exception" notification: it
//! fires once per newly constructed exception, before any handler runs, and can only
//! observe.
//!
//! # Usage
//!
//! ```
//! use seh::{Engine, EngineConfig, NoLimitTracker, NoWriter, StatsTracer};
//!
//! let engine = Engine::new(EngineConfig::default(), NoLimitTracker, NoWriter, StatsTracer::new());
//! // ... run ...
//! let report = engine.tracer().report();
//! assert_eq!(report.total_throws, 0);
//! ```

use std::fmt;

use ahash::AHashMap;

use crate::{
    exception_private::{CodeLoc, ExcType, ExceptionView},
    exception_public::Exception,
};

/// Trace event emitted by the engine.
///
/// Used by [`RecordingTracer`] to capture the full propagation history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// A protected scope was entered.
    ScopeEnter {
        /// Resumption stack depth after the push.
        depth: usize,
        /// Where the scope was opened.
        loc: CodeLoc,
    },
    /// A protected scope was closed by `end_try`.
    ScopeExit {
        /// Resumption stack depth after the pop.
        depth: usize,
    },
    /// A new exception was thrown.
    FirstChance {
        exc_type: ExcType,
        /// The explicit message, if one was given.
        message: Option<String>,
        loc: CodeLoc,
    },
    /// A catch clause claimed the in-flight exception.
    Catch {
        /// Type of the exception that was claimed.
        exc_type: ExcType,
        /// Tag the clause tested for.
        handler: ExcType,
        /// Resumption stack depth at the claiming level.
        depth: usize,
    },
    /// A finally clause started running.
    Finally {
        depth: usize,
    },
    /// A throw replaced an exception that was still in flight.
    Superseded {
        old: ExcType,
        new: ExcType,
    },
    /// An exception escaped every scope.
    Unhandled {
        exc_type: ExcType,
    },
    /// An allocation failure was reported through the emergency reserve.
    ReserveUsed {
        loc: CodeLoc,
        /// Whether every reserved buffer was already in use, so one had to be shared.
        exhausted: bool,
    },
}

/// Trait for exception propagation tracing.
///
/// All methods have default no-op implementations, so [`NoopTracer`] requires zero
/// lines of code and compiles to zero instructions. Implementations only override the
/// hooks they care about.
///
/// The engine carries the tracer as a type parameter `Tr: ExceptionTracer`, so the
/// compiler can inline and eliminate no-op calls at compile time.
pub trait ExceptionTracer: fmt::Debug {
    /// Called after `begin_try` pushes a resumption point.
    ///
    /// # Arguments
    /// * `depth` - Resumption stack depth after the push
    /// * `loc` - Where the scope was opened
    #[inline(always)]
    fn on_scope_enter(&mut self, _depth: usize, _loc: CodeLoc) {}

    /// Called when `end_try` closes a scope, before any propagation.
    ///
    /// # Arguments
    /// * `depth` - Resumption stack depth after the pop
    #[inline(always)]
    fn on_scope_exit(&mut self, _depth: usize) {}

    /// First-chance notification: called once per newly thrown exception, before
    /// unwinding starts. Rethrows do not trigger it.
    #[inline(always)]
    fn on_first_chance(&mut self, _exc: &ExceptionView<'_>) {}

    /// Called when a catch clause claims the in-flight exception.
    ///
    /// # Arguments
    /// * `exc_type` - Type of the claimed exception
    /// * `handler` - Tag the clause tested for (an ancestor of `exc_type`)
    /// * `depth` - Resumption stack depth at the claiming level
    #[inline(always)]
    fn on_catch(&mut self, _exc_type: ExcType, _handler: ExcType, _depth: usize) {}

    /// Called when a finally clause starts running.
    #[inline(always)]
    fn on_finally(&mut self, _depth: usize) {}

    /// Called when a throw replaces an exception that was still in flight; the old
    /// exception has been released.
    #[inline(always)]
    fn on_superseded(&mut self, _old: ExcType, _new: ExcType) {}

    /// Called when an exception escapes every scope, before the diagnostic is written.
    #[inline(always)]
    fn on_unhandled(&mut self, _exc: &Exception) {}

    /// Called when an allocation failure is reported through the emergency reserve.
    ///
    /// # Arguments
    /// * `loc` - Throw site stamped onto the reserved exception
    /// * `exhausted` - Whether every reserved buffer was already in use
    #[inline(always)]
    fn on_reserve_used(&mut self, _loc: CodeLoc, _exhausted: bool) {}
}

// ============================================================================
// NoopTracer - zero-cost production default
// ============================================================================

/// A tracer that does nothing.
///
/// All trait methods use the default no-op implementations. Because the engine
/// carries the tracer as a type parameter, every hook inlines to nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl ExceptionTracer for NoopTracer {}

// ============================================================================
// StderrTracer - human-readable propagation log
// ============================================================================

/// Tracer that prints a human-readable propagation log to stderr.
///
/// Output format:
/// ```text
///   >>> TRY                 depth=1  at src/lib.rs:10
///   !!! THROW ArgumentNullException at src/lib.rs:12: x cannot be null
///   ... CATCH ArgumentNullException as ArgumentException  depth=1
///   <<< END TRY             depth=0
/// ```
#[derive(Debug, Default)]
pub struct StderrTracer {
    /// Maximum number of lines to print before going quiet. None = unlimited.
    limit: Option<usize>,
    /// Number of lines printed so far.
    count: usize,
}

impl StderrTracer {
    /// Creates a new stderr tracer with no line limit.
    #[must_use]
    pub fn new() -> Self {
        Self { limit: None, count: 0 }
    }

    /// Creates a new stderr tracer that stops after `limit` lines.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            count: 0,
        }
    }

    fn emit(&mut self, line: fmt::Arguments<'_>) {
        if self.limit.is_some_and(|limit| self.count >= limit) {
            return;
        }
        eprintln!("{line}");
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count == limit
        {
            eprintln!("--- trace limit reached ({limit} lines) ---");
        }
    }
}

impl ExceptionTracer for StderrTracer {
    fn on_scope_enter(&mut self, depth: usize, loc: CodeLoc) {
        self.emit(format_args!("  >>> TRY                 depth={depth}  at {loc}"));
    }

    fn on_scope_exit(&mut self, depth: usize) {
        self.emit(format_args!("  <<< END TRY             depth={depth}"));
    }

    fn on_first_chance(&mut self, exc: &ExceptionView<'_>) {
        let exc_type = exc.exc_type();
        let loc = exc.loc();
        match exc.explicit_message() {
            Some(message) => self.emit(format_args!("  !!! THROW {exc_type} at {loc}: {message}")),
            None => self.emit(format_args!("  !!! THROW {exc_type} at {loc}")),
        }
    }

    fn on_catch(&mut self, exc_type: ExcType, handler: ExcType, depth: usize) {
        self.emit(format_args!("  ... CATCH {exc_type} as {handler}  depth={depth}"));
    }

    fn on_finally(&mut self, depth: usize) {
        self.emit(format_args!("  ... FINALLY             depth={depth}"));
    }

    fn on_superseded(&mut self, old: ExcType, new: ExcType) {
        self.emit(format_args!("  !!! {new} supersedes {old}"));
    }

    fn on_unhandled(&mut self, exc: &Exception) {
        self.emit(format_args!("  *** UNHANDLED {}", exc.exc_type));
    }

    fn on_reserve_used(&mut self, loc: CodeLoc, exhausted: bool) {
        if exhausted {
            self.emit(format_args!("  !!! OUT OF MEMORY at {loc} (reserve exhausted, sharing)"));
        } else {
            self.emit(format_args!("  !!! OUT OF MEMORY at {loc}"));
        }
    }
}

// ============================================================================
// StatsTracer - throw statistics
// ============================================================================

/// Tracer that collects propagation statistics.
///
/// Tracks per-type first-chance counts, catches, finally runs, nesting depth and
/// reserve usage. Retrieve results via [`StatsTracer::report`].
#[derive(Debug, Default)]
pub struct StatsTracer {
    throws_by_type: AHashMap<ExcType, u64>,
    total_throws: u64,
    total_catches: u64,
    total_finally: u64,
    total_superseded: u64,
    total_unhandled: u64,
    reserve_used: u64,
    max_depth: usize,
}

/// Summary report from a [`StatsTracer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsReport {
    /// First-chance counts per type, most frequent first (ties by name).
    pub throws_by_type: Vec<(ExcType, u64)>,
    pub total_throws: u64,
    pub total_catches: u64,
    pub total_finally: u64,
    pub total_superseded: u64,
    pub total_unhandled: u64,
    /// Number of throws that had to come from the emergency reserve.
    pub reserve_used: u64,
    /// Deepest scope nesting observed.
    pub max_depth: usize,
}

impl StatsTracer {
    /// Creates a new stats tracer with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates a report from the collected data.
    #[must_use]
    pub fn report(&self) -> StatsReport {
        let mut throws_by_type: Vec<_> = self.throws_by_type.iter().map(|(&k, &v)| (k, v)).collect();
        throws_by_type.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.name().cmp(b.0.name())));
        StatsReport {
            throws_by_type,
            total_throws: self.total_throws,
            total_catches: self.total_catches,
            total_finally: self.total_finally,
            total_superseded: self.total_superseded,
            total_unhandled: self.total_unhandled,
            reserve_used: self.reserve_used,
            max_depth: self.max_depth,
        }
    }
}

impl ExceptionTracer for StatsTracer {
    #[inline]
    fn on_scope_enter(&mut self, depth: usize, _loc: CodeLoc) {
        self.max_depth = self.max_depth.max(depth);
    }

    #[inline]
    fn on_first_chance(&mut self, exc: &ExceptionView<'_>) {
        *self.throws_by_type.entry(exc.exc_type()).or_insert(0) += 1;
        self.total_throws += 1;
    }

    fn on_catch(&mut self, _exc_type: ExcType, _handler: ExcType, _depth: usize) {
        self.total_catches += 1;
    }

    fn on_finally(&mut self, _depth: usize) {
        self.total_finally += 1;
    }

    fn on_superseded(&mut self, _old: ExcType, _new: ExcType) {
        self.total_superseded += 1;
    }

    fn on_unhandled(&mut self, _exc: &Exception) {
        self.total_unhandled += 1;
    }

    fn on_reserve_used(&mut self, _loc: CodeLoc, _exhausted: bool) {
        self.reserve_used += 1;
    }
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Exception Statistics ===")?;
        writeln!(f, "Throws:        {}", self.total_throws)?;
        writeln!(f, "Catches:       {}", self.total_catches)?;
        writeln!(f, "Finally runs:  {}", self.total_finally)?;
        writeln!(f, "Superseded:    {}", self.total_superseded)?;
        writeln!(f, "Unhandled:     {}", self.total_unhandled)?;
        writeln!(f, "Reserve used:  {}", self.reserve_used)?;
        writeln!(f, "Max depth:     {}", self.max_depth)?;
        writeln!(f)?;
        writeln!(f, "--- Throws by Type ---")?;
        for (exc_type, count) in &self.throws_by_type {
            #[expect(clippy::cast_precision_loss, reason = "percentages only need to be approximate")]
            let pct = (*count as f64 / self.total_throws as f64) * 100.0;
            writeln!(f, "  {:<30} {count:>8}  ({pct:>5.1}%)", exc_type.name())?;
        }
        Ok(())
    }
}

// ============================================================================
// RecordingTracer - full event recording
// ============================================================================

/// Tracer that records every event for post-mortem analysis.
///
/// Captures each trace event into a `Vec<TraceEvent>`. This is the most expensive
/// tracer (it allocates per event and copies messages), so use it for tests and for
/// debugging specific issues.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    /// All recorded events in chronological order.
    events: Vec<TraceEvent>,
    /// Optional limit on number of events recorded.
    limit: Option<usize>,
}

impl RecordingTracer {
    /// Creates a new recording tracer with no event limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new recording tracer that stops recording after `limit` events.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Vec::with_capacity(limit.min(1024)),
            limit: Some(limit),
        }
    }

    /// Returns the recorded events.
    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Consumes the tracer and returns the recorded events.
    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    /// Forgets everything recorded so far.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    fn record(&mut self, event: TraceEvent) {
        if self.limit.is_some_and(|limit| self.events.len() >= limit) {
            return;
        }
        self.events.push(event);
    }
}

impl ExceptionTracer for RecordingTracer {
    fn on_scope_enter(&mut self, depth: usize, loc: CodeLoc) {
        self.record(TraceEvent::ScopeEnter { depth, loc });
    }

    fn on_scope_exit(&mut self, depth: usize) {
        self.record(TraceEvent::ScopeExit { depth });
    }

    fn on_first_chance(&mut self, exc: &ExceptionView<'_>) {
        self.record(TraceEvent::FirstChance {
            exc_type: exc.exc_type(),
            message: exc.explicit_message().map(String::from),
            loc: exc.loc(),
        });
    }

    fn on_catch(&mut self, exc_type: ExcType, handler: ExcType, depth: usize) {
        self.record(TraceEvent::Catch {
            exc_type,
            handler,
            depth,
        });
    }

    fn on_finally(&mut self, depth: usize) {
        self.record(TraceEvent::Finally { depth });
    }

    fn on_superseded(&mut self, old: ExcType, new: ExcType) {
        self.record(TraceEvent::Superseded { old, new });
    }

    fn on_unhandled(&mut self, exc: &Exception) {
        self.record(TraceEvent::Unhandled { exc_type: exc.exc_type });
    }

    fn on_reserve_used(&mut self, loc: CodeLoc, exhausted: bool) {
        self.record(TraceEvent::ReserveUsed { loc, exhausted });
    }
}
