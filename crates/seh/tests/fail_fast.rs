//! Tests for unhandled exceptions: the diagnostic report and termination.
//!
//! Every engine here uses `Termination::Panic`, so fail-fast unwinds with an
//! `UnhandledPanic` payload that the tests catch and inspect.

use std::{
    cell::RefCell,
    panic::{AssertUnwindSafe, catch_unwind},
};

use pretty_assertions::assert_eq;
use seh::{
    CodeLoc, CollectStringWriter, Engine, EngineConfig, ExcType, Exception, NoLimitTracker, RecordingTracer,
    SehResult, Termination, TraceEvent, TryBlock, UnhandledPanic, throw,
};

type TestEngine = Engine<NoLimitTracker, CollectStringWriter, RecordingTracer>;

fn engine() -> TestEngine {
    Engine::new(
        EngineConfig::default().termination(Termination::Panic),
        NoLimitTracker,
        CollectStringWriter::new(),
        RecordingTracer::new(),
    )
}

/// Runs `f` and returns the exception that fail-fast reported.
///
/// # Panics
/// Panics if `f` returns normally or panics for any other reason.
fn expect_fail_fast<R>(engine: &mut TestEngine, f: impl FnOnce(&mut TestEngine) -> R) -> Exception {
    let Err(payload) = catch_unwind(AssertUnwindSafe(|| f(engine))) else {
        panic!("expected fail-fast, but the call returned");
    };
    match payload.downcast::<UnhandledPanic>() {
        Ok(unhandled) => unhandled.0,
        Err(_) => panic!("expected an UnhandledPanic payload"),
    }
}

fn unhandled_events(engine: &TestEngine) -> usize {
    engine
        .tracer()
        .events()
        .iter()
        .filter(|event| matches!(event, TraceEvent::Unhandled { .. }))
        .count()
}

/// A throw with no scope open fails fast immediately.
#[test]
fn throw_without_scope_fails_fast() {
    let mut engine = engine();
    let exc = expect_fail_fast(&mut engine, |e| {
        let _: SehResult<()> = e.throw_new(
            ExcType::NullReferenceException,
            None,
            CodeLoc::new("main.rs", 3),
            None,
        );
    });
    assert_eq!(exc.exc_type, ExcType::NullReferenceException);
    assert_eq!(engine.writer().output(), "NullReferenceException occurred at main.rs:3\n");
    assert_eq!(unhandled_events(&engine), 1);
}

/// An exception no scope claims is reported once, after every finally has run, and
/// released before termination.
#[test]
fn unmatched_exception_fails_fast_once_at_outermost_end() {
    let log = RefCell::new(Vec::new());
    let mut engine = engine();
    let exc = expect_fail_fast(&mut engine, |e| {
        TryBlock::new(|e: &mut TestEngine| {
            TryBlock::new(|e: &mut TestEngine| -> SehResult<()> {
                e.throw_new(
                    ExcType::AccessViolationException,
                    Some("write to 0x0"),
                    CodeLoc::new("mem.rs", 99),
                    None,
                )
            })
            .catch(ExcType::IOException, |_, _| Ok(()))
            .finally(|_| {
                log.borrow_mut().push("inner finally");
                Ok(())
            })
            .run(e)
        })
        .catch(ExcType::ArgumentException, |_, _| Ok(()))
        .finally(|_| {
            log.borrow_mut().push("outer finally");
            Ok(())
        })
        .run(e)
    });

    assert_eq!(exc.summary(), "AccessViolationException occurred at mem.rs:99, write to 0x0");
    assert_eq!(log.into_inner(), vec!["inner finally", "outer finally"]);
    assert_eq!(
        engine.writer().output(),
        "AccessViolationException occurred at mem.rs:99, write to 0x0\n"
    );
    assert_eq!(unhandled_events(&engine), 1);
    assert_eq!(engine.depth(), 0);
    assert_eq!(engine.open_scopes(), 0);
    assert_eq!(engine.current_exception(), None);
    assert_eq!(engine.heap().live_objects(), engine.heap().stats().pinned_objects);
}

/// The report renders the whole cause chain, nearest cause first.
#[test]
fn report_includes_inner_exceptions() {
    let mut engine = engine();
    let exc = expect_fail_fast(&mut engine, |e| {
        let root = e
            .new_exception(ExcType::IOException, Some("disk full"), CodeLoc::new("store.rs", 7), None)
            .unwrap();
        let result: SehResult<()> = e.throw_new(
            ExcType::InvalidOperationException,
            Some("order already shipped"),
            CodeLoc::new("orders.rs", 41),
            Some(root),
        );
        e.release(root);
        result
    });
    assert_eq!(exc.causes().count(), 1);
    assert_eq!(
        engine.writer().output(),
        "InvalidOperationException occurred at orders.rs:41, order already shipped\n  \
         ---> IOException occurred at store.rs:7, disk full\n"
    );
}

/// A handler that throws at the outermost level still runs that level's finally
/// before the new exception escapes.
#[test]
fn handler_throw_at_outermost_level_runs_finally_first() {
    let log = RefCell::new(Vec::new());
    let mut engine = engine();
    let exc = expect_fail_fast(&mut engine, |e| {
        TryBlock::new(|e: &mut TestEngine| -> SehResult<()> { throw!(e, ExcType::FormatException) })
            .catch(ExcType::FormatException, |e, _| {
                log.borrow_mut().push("handler");
                throw!(e, ExcType::NotSupportedException, "cannot recover")
            })
            .finally(|e| {
                assert_eq!(e.depth(), 0);
                assert_eq!(e.open_scopes(), 1);
                log.borrow_mut().push("finally");
                Ok(())
            })
            .run(e)
    });
    assert_eq!(exc.exc_type, ExcType::NotSupportedException);
    assert_eq!(exc.message(), "cannot recover");
    assert_eq!(log.into_inner(), vec!["handler", "finally"]);
    assert_eq!(unhandled_events(&engine), 1);
}

/// At the outermost level, a try block caught inside the finally clause does not
/// swallow the handler's exception: it still fails fast.
#[test]
fn handler_throw_escapes_past_caught_throw_in_finally() {
    let mut engine = engine();
    let exc = expect_fail_fast(&mut engine, |e| {
        TryBlock::new(|e: &mut TestEngine| -> SehResult<()> { throw!(e, ExcType::FormatException) })
            .catch(ExcType::FormatException, |e, _| throw!(e, ExcType::NotSupportedException, "cannot recover"))
            .finally(|e| {
                TryBlock::new(|e: &mut TestEngine| throw!(e, ExcType::IOException))
                    .catch(ExcType::IOException, |_, _| Ok(()))
                    .run(e)
            })
            .run(e)
    });
    assert_eq!(exc.exc_type, ExcType::NotSupportedException);
    assert_eq!(exc.message(), "cannot recover");
    assert_eq!(unhandled_events(&engine), 1);
}

/// A caught exception never reaches fail-fast.
#[test]
fn handled_exception_writes_nothing() {
    let mut engine = engine();
    let result = TryBlock::new(|e: &mut TestEngine| throw!(e, ExcType::Exception, "fine"))
        .catch(ExcType::Exception, |_, _| Ok(()))
        .run(&mut engine);
    assert_eq!(result, Ok(()));
    assert_eq!(engine.writer().output(), "");
    assert_eq!(unhandled_events(&engine), 0);
}
