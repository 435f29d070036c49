//! The propagation engine: per-context state for protected scopes and the exception
//! currently in flight.
//!
//! A throw does not transfer control by itself. It installs the exception in the
//! engine and hands the caller a [`Thrown`] marker inside `Err`; `?` carries the marker
//! out to the innermost open scope, whose catch tests and finally clause then run. The
//! protocol is split across submodules the same way the engine's `impl` blocks are:
//!
//! | module | operations |
//! |--------|------------|
//! | `protocol` | `begin_try`, `catch_test`, `finally`, `end_try`, `throw_new`, `rethrow`, `throw_again`, fail-fast |
//! | `try_block` | [`TryBlock`], closure-based builder over the raw protocol |
//! | `reserve` | pre-allocated out-of-memory exceptions |
//! | `validate` | argument checks that throw through the engine |

mod protocol;
mod reserve;
mod try_block;
mod validate;

use smallvec::SmallVec;

pub use self::try_block::TryBlock;
use self::reserve::Reserve;
use crate::{
    config::EngineConfig,
    exception_private::{CodeLoc, ExceptionView},
    exception_public::Exception,
    heap::{ContainsHeap, Heap, HeapId},
    io::{DiagnosticWriter, StdErr},
    resource::{LimitedTracker, NoLimitTracker, ResourceTracker},
    tracer::{ExceptionTracer, NoopTracer},
};

/// Marker proving that an exception is in flight in the engine that produced it.
///
/// Only the engine can construct one, so an `Err(Thrown)` always has a matching
/// exception installed. The exception itself stays in the engine; read it with
/// [`Engine::current_exception`] inside a catch clause.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a thrown exception must be propagated with `?` or reach a catch test"]
pub struct Thrown {
    _private: (),
}

impl Thrown {
    fn new() -> Self {
        Self { _private: () }
    }
}

/// Result of any operation that may throw.
pub type SehResult<T> = Result<T, Thrown>;

/// A recorded resumption point: where control goes when the matching scope unwinds.
#[derive(Debug, Clone, Copy)]
struct ResumptionPoint {
    id: u64,
    loc: CodeLoc,
}

/// An exception held by an open scope after its catch test or finally captured it.
#[derive(Debug, Clone, Copy)]
struct CaughtEntry {
    id: HeapId,
    /// Set once a catch clause at this level matched.
    claimed: bool,
    /// Thrown by this level's handler and parked while its finally clause runs, so
    /// scopes nested in the finally body never see it.
    pending: Option<HeapId>,
}

impl CaughtEntry {
    /// The exception this level is dealing with: the handler's throw if one is parked,
    /// else the captured one.
    fn current(&self) -> HeapId {
        self.pending.unwrap_or(self.id)
    }
}

/// Handle for one open protected scope, returned by [`Engine::begin_try`].
///
/// Must be closed by passing it to [`Engine::end_try`]. Scopes nest strictly: an inner
/// scope has to be closed before its enclosing scope's catch test, finally or end
/// runs, otherwise the engine panics.
#[derive(Debug)]
#[must_use = "every scope must be closed with `Engine::end_try`"]
pub struct Scope {
    point: u64,
    /// Resumption stack depth just after this scope's point was pushed.
    depth: usize,
    should_pop: bool,
    /// Whether this level holds an entry on the exception stack.
    captured: bool,
}

impl Scope {
    /// Nesting depth of this scope, starting at 1 for the outermost.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Exception handling state for one execution context.
///
/// Owns the object heap, the stack of resumption points, the exception in flight and
/// the exceptions currently held by handlers. Everything is per engine: two engines
/// never share state, and an engine is only ever driven from one thread at a time.
///
/// Generic over:
/// - `T: ResourceTracker` - the allocator policy for the heap
/// - `W: DiagnosticWriter` - where the unhandled-exception report goes
/// - `Tr: ExceptionTracer` - propagation hooks, including first-chance notification
#[derive(Debug)]
pub struct Engine<T: ResourceTracker = NoLimitTracker, W: DiagnosticWriter = StdErr, Tr: ExceptionTracer = NoopTracer>
{
    heap: Heap<T>,
    /// Resumption points, innermost last.
    scopes: SmallVec<[ResumptionPoint; 8]>,
    /// Scopes opened and not yet closed by `end_try`. Unlike `scopes.len()` this still
    /// counts a level whose point was popped by its catch test, so a throw from a handler
    /// reaches that level's finally clause before fail-fast runs.
    open_scopes: usize,
    next_point: u64,
    /// The exception being propagated, owned by the engine.
    in_flight: Option<HeapId>,
    /// Exceptions captured by open scopes, innermost last. Gives handlers and finally
    /// clauses access to "the current exception" and lets `rethrow` find it.
    exception_stack: Vec<CaughtEntry>,
    reserve: Reserve,
    writer: W,
    tracer: Tr,
    config: EngineConfig,
}

impl Engine {
    /// An engine with no allocation limits that reports to stderr and aborts on an
    /// unhandled exception.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(EngineConfig::default(), NoLimitTracker, StdErr, NoopTracer)
    }
}

impl<W: DiagnosticWriter, Tr: ExceptionTracer> Engine<LimitedTracker, W, Tr> {
    /// An engine whose heap enforces `config.limits`.
    #[must_use]
    pub fn limited(config: EngineConfig, writer: W, tracer: Tr) -> Self {
        let tracker = config.tracker();
        Self::new(config, tracker, writer, tracer)
    }
}

impl<T: ResourceTracker, W: DiagnosticWriter, Tr: ExceptionTracer> Engine<T, W, Tr> {
    /// Creates an engine and allocates its out-of-memory reserve.
    ///
    /// The reserve bypasses `tracker`, so it is available even when the tracker refuses
    /// every allocation from the start.
    pub fn new(config: EngineConfig, tracker: T, writer: W, tracer: Tr) -> Self {
        let mut heap = Heap::new(config.heap_capacity, tracker);
        let reserve = Reserve::new(&mut heap, config.emergency_buffers.max(1));
        Self {
            heap,
            scopes: SmallVec::new(),
            open_scopes: 0,
            next_point: 0,
            in_flight: None,
            exception_stack: Vec::new(),
            reserve,
            writer,
            tracer,
            config,
        }
    }

    #[must_use]
    pub fn heap(&self) -> &Heap<T> {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap<T> {
        &mut self.heap
    }

    #[must_use]
    pub fn tracer(&self) -> &Tr {
        &self.tracer
    }

    pub fn tracer_mut(&mut self) -> &mut Tr {
        &mut self.tracer
    }

    #[must_use]
    pub fn writer(&self) -> &W {
        &self.writer
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of resumption points currently recorded.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Number of scopes opened and not yet closed, including levels whose point has
    /// already been popped by a catch test or finally.
    #[must_use]
    pub fn open_scopes(&self) -> usize {
        self.open_scopes
    }

    /// Where the innermost recorded scope was opened.
    #[must_use]
    pub fn innermost_scope(&self) -> Option<CodeLoc> {
        self.scopes.last().map(|point| point.loc)
    }

    /// The exception the caller is currently dealing with: the one in flight if any,
    /// else the one held by the innermost handler or finally clause.
    ///
    /// The handle is borrowed from the engine; acquire it to keep it past the scope.
    #[must_use]
    pub fn current_exception(&self) -> Option<HeapId> {
        self.in_flight.or_else(|| self.exception_stack.last().map(CaughtEntry::current))
    }

    /// False while a throw is in flight or parked for a finally clause, and while the
    /// innermost captured exception has not been claimed by a catch clause.
    #[must_use]
    pub fn is_handled(&self) -> bool {
        self.in_flight.is_none() && self.exception_stack.last().is_none_or(|entry| entry.claimed && entry.pending.is_none())
    }

    /// Read-only view of a live exception.
    #[must_use]
    pub fn exception(&self, id: HeapId) -> Option<ExceptionView<'_>> {
        self.heap.exception(id)
    }

    /// Adds an owner to `id` and returns it.
    ///
    /// # Panics
    /// Panics if `id` has already been finalized.
    pub fn acquire(&self, id: HeapId) -> HeapId {
        self.heap.inc_ref(id);
        id
    }

    /// Removes an owner from `id`; returns `true` if that finalized it.
    ///
    /// # Panics
    /// Panics if `id` has already been finalized.
    pub fn release(&mut self, id: HeapId) -> bool {
        self.heap.dec_ref(id)
    }

    /// Copies a live exception and its cause chain out of the heap.
    #[must_use]
    pub fn snapshot(&self, id: HeapId) -> Option<Exception> {
        let mut chain = Vec::new();
        let mut next = Some(id);
        while let Some(id) = next {
            let view = self.heap.exception(id)?;
            chain.push(Exception {
                exc_type: view.exc_type(),
                message: view.explicit_message().map(String::from),
                file: view.file().to_owned(),
                line: view.line(),
                inner: None,
            });
            next = view.inner();
        }
        chain.into_iter().rev().fold(None, |inner, mut exc| {
            exc.inner = inner.map(Box::new);
            Some(exc)
        })
    }

    /// Consumes the engine, returning the heap, writer and tracer.
    pub fn into_parts(self) -> (Heap<T>, W, Tr) {
        (self.heap, self.writer, self.tracer)
    }
}

impl<T: ResourceTracker, W: DiagnosticWriter, Tr: ExceptionTracer> ContainsHeap<T> for Engine<T, W, Tr> {
    #[inline]
    fn heap_mut(&mut self) -> &mut Heap<T> {
        &mut self.heap
    }
}
