//! Tests for the propagation hooks: the event stream seen by `RecordingTracer` and the
//! aggregates collected by `StatsTracer`.

use pretty_assertions::assert_eq;
use seh::{
    CodeLoc, Engine, EngineConfig, ExcType, NoLimitTracker, NoWriter, RecordingTracer, SehResult, StatsTracer,
    Termination, TraceEvent, TryBlock, throw,
};

fn config() -> EngineConfig {
    EngineConfig::default().termination(Termination::Panic)
}

type Recording = Engine<NoLimitTracker, NoWriter, RecordingTracer>;

/// Drops the scope-entry locations, which depend on where the test was written.
fn without_enter_locs(events: &[TraceEvent]) -> Vec<TraceEvent> {
    events
        .iter()
        .cloned()
        .map(|event| match event {
            TraceEvent::ScopeEnter { depth, .. } => TraceEvent::ScopeEnter {
                depth,
                loc: CodeLoc::new("", 0),
            },
            other => other,
        })
        .collect()
}

/// A caught throw produces enter, first-chance, catch, finally and exit, in order.
#[test]
fn caught_throw_event_sequence() {
    let mut engine = Engine::new(config(), NoLimitTracker, NoWriter, RecordingTracer::new());
    let result = TryBlock::new(|e: &mut Recording| {
        e.throw_new(ExcType::ArgumentNullException, Some("x"), CodeLoc::new("f.c", 10), None)
    })
    .catch(ExcType::ArgumentException, |_, _| Ok(()))
    .finally(|_| Ok(()))
    .run(&mut engine);
    assert_eq!(result, Ok(()));

    assert_eq!(
        without_enter_locs(engine.tracer().events()),
        vec![
            TraceEvent::ScopeEnter {
                depth: 1,
                loc: CodeLoc::new("", 0),
            },
            TraceEvent::FirstChance {
                exc_type: ExcType::ArgumentNullException,
                message: Some("x".to_owned()),
                loc: CodeLoc::new("f.c", 10),
            },
            TraceEvent::Catch {
                exc_type: ExcType::ArgumentNullException,
                handler: ExcType::ArgumentException,
                depth: 1,
            },
            TraceEvent::Finally { depth: 1 },
            TraceEvent::ScopeExit { depth: 0 },
        ]
    );
}

/// The scope location is where `run` was called.
#[test]
fn scope_enter_records_caller_location() {
    let mut engine = Engine::new(config(), NoLimitTracker, NoWriter, RecordingTracer::new());
    let scope = engine.begin_try();
    let here = line!() - 1;
    engine.end_try(scope).unwrap();
    match engine.tracer().events()[0] {
        TraceEvent::ScopeEnter { depth, loc } => {
            assert_eq!(depth, 1);
            assert!(loc.file.ends_with("tracing.rs"), "unexpected file {}", loc.file);
            assert_eq!(loc.line, here);
        }
        ref other => panic!("expected ScopeEnter, got {other:?}"),
    }
}

/// First-chance fires once per new exception; rethrows do not repeat it.
#[test]
fn rethrow_does_not_repeat_first_chance() {
    let mut engine = Engine::new(config(), NoLimitTracker, NoWriter, RecordingTracer::new());
    let result = TryBlock::new(|e: &mut Recording| {
        TryBlock::new(|e: &mut Recording| throw!(e, ExcType::IOException))
            .catch(ExcType::IOException, |e, _| e.rethrow())
            .run(e)
    })
    .catch(ExcType::IOException, |_, _| Ok(()))
    .run(&mut engine);
    assert_eq!(result, Ok(()));

    let first_chance = engine
        .tracer()
        .events()
        .iter()
        .filter(|event| matches!(event, TraceEvent::FirstChance { .. }))
        .count();
    assert_eq!(first_chance, 1);
}

/// A finally throw that replaces a pending exception is reported as superseding it.
#[test]
fn superseded_exception_is_reported() {
    let mut engine = Engine::new(config(), NoLimitTracker, NoWriter, RecordingTracer::new());
    let result = TryBlock::new(|e: &mut Recording| {
        TryBlock::new(|e: &mut Recording| throw!(e, ExcType::IOException))
            .finally(|e| throw!(e, ExcType::FormatException))
            .run(e)
    })
    .catch(ExcType::Exception, |_, _| Ok(()))
    .run(&mut engine);
    assert_eq!(result, Ok(()));
    assert!(engine.tracer().events().contains(&TraceEvent::Superseded {
        old: ExcType::IOException,
        new: ExcType::FormatException,
    }));
}

/// Rethrowing the held exception from a finally clause is not a replacement.
#[test]
fn rethrow_from_finally_is_not_superseded() {
    let mut engine = Engine::new(config(), NoLimitTracker, NoWriter, RecordingTracer::new());
    let result = TryBlock::new(|e: &mut Recording| {
        TryBlock::new(|e: &mut Recording| throw!(e, ExcType::IOException))
            .finally(|e| e.rethrow())
            .run(e)
    })
    .catch(ExcType::IOException, |_, _| Ok(()))
    .run(&mut engine);
    assert_eq!(result, Ok(()));
    assert!(
        !engine
            .tracer()
            .events()
            .iter()
            .any(|event| matches!(event, TraceEvent::Superseded { .. }))
    );
    assert_eq!(engine.heap().live_objects(), engine.heap().stats().pinned_objects);
}

/// The recording limit caps the number of stored events.
#[test]
fn recording_limit_caps_events() {
    let mut engine = Engine::new(config(), NoLimitTracker, NoWriter, RecordingTracer::with_limit(2));
    for _ in 0..5 {
        let scope = engine.begin_try();
        engine.end_try(scope).unwrap();
    }
    assert_eq!(engine.tracer().events().len(), 2);
    engine.tracer_mut().clear();
    assert!(engine.tracer().events().is_empty());
}

/// Stats are aggregated per type and ordered by frequency.
#[test]
fn stats_tracer_counts_by_type() {
    type Stats = Engine<NoLimitTracker, NoWriter, StatsTracer>;

    fn throw_and_catch(engine: &mut Stats, exc_type: ExcType) {
        let result = TryBlock::new(|e: &mut Stats| -> SehResult<()> { throw!(e, exc_type) })
            .catch(ExcType::Exception, |_, _| Ok(()))
            .finally(|_| Ok(()))
            .run(engine);
        assert_eq!(result, Ok(()));
    }

    let mut engine = Engine::new(config(), NoLimitTracker, NoWriter, StatsTracer::new());
    for _ in 0..3 {
        throw_and_catch(&mut engine, ExcType::FormatException);
    }
    throw_and_catch(&mut engine, ExcType::IOException);
    let nested = TryBlock::new(|e: &mut Stats| TryBlock::new(|_: &mut Stats| Ok(())).run(e)).run(&mut engine);
    assert_eq!(nested, Ok(()));

    let report = engine.tracer().report();
    assert_eq!(
        report.throws_by_type,
        vec![(ExcType::FormatException, 3), (ExcType::IOException, 1)]
    );
    assert_eq!(report.total_throws, 4);
    assert_eq!(report.total_catches, 4);
    assert_eq!(report.total_finally, 4);
    assert_eq!(report.total_unhandled, 0);
    assert_eq!(report.max_depth, 2);

    let text = report.to_string();
    assert!(text.starts_with("=== Exception Statistics ==="));
    assert!(text.contains("FormatException"));
}
