//! begin-try / catch-test / finally / end-try and the three ways to throw.

use super::{CaughtEntry, Engine, ResumptionPoint, Scope, SehResult, Thrown};
use crate::{
    exception_private::{CodeLoc, ExcType, ExceptionValue},
    fail_fast::write_report,
    heap::{HeapData, HeapId},
    io::DiagnosticWriter,
    resource::{ResourceError, ResourceTracker},
    tracer::ExceptionTracer,
};

impl<T: ResourceTracker, W: DiagnosticWriter, Tr: ExceptionTracer> Engine<T, W, Tr> {
    /// Opens a protected scope and records its resumption point.
    ///
    /// The scope's location is the caller's, via `#[track_caller]`.
    #[track_caller]
    pub fn begin_try(&mut self) -> Scope {
        let loc = CodeLoc::caller();
        let point = self.next_point;
        self.next_point += 1;
        self.scopes.push(ResumptionPoint { id: point, loc });
        self.open_scopes += 1;
        let depth = self.scopes.len();
        self.tracer.on_scope_enter(depth, loc);
        Scope {
            point,
            depth,
            should_pop: true,
            captured: false,
        }
    }

    /// Tests the in-flight exception against `tag` for this scope.
    ///
    /// Pops the scope's resumption point if that has not happened yet, so a throw from
    /// the handler goes to the enclosing scope. The first catch test or finally at a
    /// level captures the in-flight exception for that level. Returns `true`, and marks
    /// the exception claimed, when it is an instance of `tag` and no earlier clause at
    /// this level has claimed it. Always `false` if nothing was thrown.
    pub fn catch_test(&mut self, scope: &mut Scope, tag: ExcType) -> bool {
        self.pop_point(scope);
        self.capture(scope);
        if !scope.captured {
            return false;
        }
        let entry = self
            .exception_stack
            .last_mut()
            .expect("Engine::catch_test: captured level has no exception");
        if entry.claimed {
            return false;
        }
        let exc_type = self
            .heap
            .exception(entry.id)
            .expect("Engine::catch_test: captured value is not an exception")
            .exc_type();
        if !exc_type.is_instance_of(tag) {
            return false;
        }
        entry.claimed = true;
        self.tracer.on_catch(exc_type, tag, scope.depth);
        true
    }

    /// Marks the start of this scope's finally clause.
    ///
    /// Pops the resumption point and captures any in-flight exception, so the finally
    /// body runs with [`Engine::current_exception`] pointing at it. The clause does not
    /// claim anything: an unclaimed exception resumes propagating at `end_try`.
    ///
    /// If this level had already captured an exception and its handler threw, the
    /// handler's exception is parked on the level until `end_try`. Nothing is in flight
    /// while the finally body runs, so try blocks nested in it behave normally.
    pub fn finally(&mut self, scope: &mut Scope) {
        self.pop_point(scope);
        self.capture(scope);
        if let Some(thrown) = self.in_flight.take() {
            let entry = self
                .exception_stack
                .last_mut()
                .expect("Engine::finally: in-flight exception with no captured level");
            let replaced = entry.pending.replace(thrown);
            self.heap.release(replaced);
        }
        self.tracer.on_finally(scope.depth);
    }

    /// Closes a scope.
    ///
    /// - Nothing thrown, or the captured exception was claimed and the handler finished:
    ///   releases whatever this level held and returns `Ok`.
    /// - Captured but unclaimed: the exception resumes propagating to the enclosing
    ///   scope, or fail-fast runs if this was the outermost one.
    /// - A handler or finally threw: the newer exception propagates and the one this
    ///   level held is released.
    pub fn end_try(&mut self, mut scope: Scope) -> SehResult<()> {
        self.pop_point(&mut scope);
        self.open_scopes -= 1;
        self.tracer.on_scope_exit(self.scopes.len());

        if scope.captured {
            let entry = self
                .exception_stack
                .pop()
                .expect("Engine::end_try: captured level has no exception");
            if let Some(newer) = self.in_flight {
                if !entry.claimed {
                    self.report_superseded(entry.id, newer);
                }
                if let Some(pending) = entry.pending {
                    self.report_superseded(pending, newer);
                }
                self.heap.dec_ref(entry.id);
                self.heap.release(entry.pending);
                return self.propagate();
            }
            if let Some(pending) = entry.pending {
                if !entry.claimed {
                    self.report_superseded(entry.id, pending);
                }
                self.heap.dec_ref(entry.id);
                self.in_flight = Some(pending);
                return self.propagate();
            }
            if !entry.claimed {
                self.in_flight = Some(entry.id);
                return self.propagate();
            }
            self.heap.dec_ref(entry.id);
            return Ok(());
        }

        if self.in_flight.is_some() {
            return self.propagate();
        }
        Ok(())
    }

    /// Constructs an exception value.
    ///
    /// Acquires `inner` on success; the caller keeps its own reference. On failure
    /// nothing is left allocated and nothing is acquired.
    pub fn new_exception(
        &mut self,
        exc_type: ExcType,
        message: Option<&str>,
        loc: CodeLoc,
        inner: Option<HeapId>,
    ) -> Result<HeapId, ResourceError> {
        let message = match message {
            Some(text) => Some(self.heap.allocate_str(text)?),
            None => None,
        };
        let inner = self.heap.acquire(inner);
        let value = ExceptionValue::new(exc_type, message, loc, inner);
        match self.heap.allocate(HeapData::Exception(value)) {
            Ok(id) => Ok(id),
            Err(err) => {
                self.heap.release(message);
                self.heap.release(inner);
                Err(err)
            }
        }
    }

    /// Builds a new exception, raises the first-chance notification and throws it.
    ///
    /// If the exception cannot be allocated, an `OutOfMemoryException` from the
    /// emergency reserve is thrown instead, stamped with `loc`. An `inner` handle that
    /// does not name a live exception is reported as an `ArgumentException`.
    pub fn throw_new<R>(
        &mut self,
        exc_type: ExcType,
        message: Option<&str>,
        loc: CodeLoc,
        inner: Option<HeapId>,
    ) -> SehResult<R> {
        if let Some(inner) = inner
            && self.heap.exception(inner).is_none()
        {
            return self.throw_new(
                ExcType::ArgumentException,
                Some("inner exception must be a live exception"),
                loc,
                None,
            );
        }
        let id = match self.new_exception(exc_type, message, loc, inner) {
            Ok(id) => id,
            Err(_) => {
                let (id, exhausted) = self.reserve.claim(&mut self.heap, loc);
                self.tracer.on_reserve_used(loc, exhausted);
                id
            }
        };
        if let Some(view) = self.heap.exception(id) {
            self.tracer.on_first_chance(&view);
        }
        self.install(id);
        self.propagate()
    }

    /// Throws `exc_type` from the caller's location.
    #[track_caller]
    pub fn throw<R>(&mut self, exc_type: ExcType, message: Option<&str>) -> SehResult<R> {
        self.throw_new(exc_type, message, CodeLoc::caller(), None)
    }

    /// Rethrows the current exception with its identity intact.
    ///
    /// Inside a handler or finally clause this is the exception that level holds, or the
    /// one its handler threw if that is still pending. Called outside any handler, it
    /// throws an `InvalidOperationException` instead.
    #[track_caller]
    pub fn rethrow<R>(&mut self) -> SehResult<R> {
        if self.in_flight.is_some() {
            return self.propagate();
        }
        match self.exception_stack.last() {
            Some(entry) => {
                let id = entry.current();
                self.heap.inc_ref(id);
                self.in_flight = Some(id);
                self.propagate()
            }
            None => self.throw(
                ExcType::InvalidOperationException,
                Some("No exception is being handled; nothing to rethrow."),
            ),
        }
    }

    /// Throws an existing exception value, keeping its type, message, location and cause.
    ///
    /// Takes ownership of the caller's reference to `id`. A handle that is not a live
    /// exception is released and reported as an `ArgumentException` instead.
    #[track_caller]
    pub fn throw_again<R>(&mut self, id: HeapId) -> SehResult<R> {
        if self.heap.exception(id).is_none() {
            if self.heap.is_live(id) {
                self.heap.dec_ref(id);
            }
            return self.throw(ExcType::ArgumentException, Some("Value is not an exception."));
        }
        self.install(id);
        self.propagate()
    }

    /// Makes `id` the exception in flight, superseding any exception already there.
    ///
    /// Scopes park or capture what is in flight before running user code, so anything
    /// still here was thrown at the current level and never reached a scope.
    fn install(&mut self, id: HeapId) {
        if let Some(old) = self.in_flight.replace(id) {
            self.report_superseded(old, id);
            self.heap.dec_ref(old);
        }
    }

    /// Tells the tracer that `new` replaced `old`; silent when they are the same object.
    fn report_superseded(&mut self, old: HeapId, new: HeapId) {
        if old == new {
            return;
        }
        let old = self.exc_type_of(old);
        let new = self.exc_type_of(new);
        self.tracer.on_superseded(old, new);
    }

    /// Hands the in-flight exception to the innermost open scope, or fails fast when
    /// there is none.
    fn propagate<R>(&mut self) -> SehResult<R> {
        if self.open_scopes > 0 {
            Err(Thrown::new())
        } else {
            self.fail_fast()
        }
    }

    /// Reports the in-flight exception, releases it and terminates.
    fn fail_fast(&mut self) -> ! {
        let id = self.in_flight.take().expect("Engine::fail_fast: no exception in flight");
        let exc = self
            .snapshot(id)
            .expect("Engine::fail_fast: in-flight value is not an exception");
        self.tracer.on_unhandled(&exc);
        write_report(&mut self.writer, &exc);
        self.heap.dec_ref(id);
        self.config.termination.terminate(exc)
    }

    fn pop_point(&mut self, scope: &mut Scope) {
        if !scope.should_pop {
            return;
        }
        let point = self.scopes.pop().expect("Engine: scope closed with no resumption point");
        assert_eq!(
            point.id, scope.point,
            "Engine: scope closed out of order (innermost scope opened at {})",
            point.loc
        );
        scope.should_pop = false;
    }

    fn capture(&mut self, scope: &mut Scope) {
        if scope.captured {
            return;
        }
        if let Some(id) = self.in_flight.take() {
            self.exception_stack.push(CaughtEntry {
                id,
                claimed: false,
                pending: None,
            });
            scope.captured = true;
        }
    }

    fn exc_type_of(&self, id: HeapId) -> ExcType {
        self.heap
            .exception(id)
            .map_or(ExcType::Exception, |view| view.exc_type())
    }
}
