//! Tests for the serializable types: exception snapshots, tags and engine config.

use pretty_assertions::assert_eq;
use seh::{
    CodeLoc, Engine, EngineConfig, ExcType, Exception, NoLimitTracker, NoWriter, NoopTracer, ResourceLimits,
    Termination,
};

/// Tags serialize as their names.
#[test]
fn exc_type_serializes_as_name() {
    let json = serde_json::to_string(&ExcType::ArgumentNullException).unwrap();
    assert_eq!(json, r#""ArgumentNullException""#);
    let back: ExcType = serde_json::from_str(&json).unwrap();
    assert_eq!(back, ExcType::ArgumentNullException);
    assert!(serde_json::from_str::<ExcType>(r#""KeyError""#).is_err());
}

/// A snapshot with a cause chain survives a JSON round trip and outlives the heap.
#[test]
fn snapshot_round_trips_through_json() {
    let mut engine = Engine::new(EngineConfig::default(), NoLimitTracker, NoWriter, NoopTracer);
    let cause = engine
        .new_exception(ExcType::IOException, Some("disk full"), CodeLoc::new("store.rs", 7), None)
        .unwrap();
    let top = engine
        .new_exception(ExcType::InvalidOperationException, None, CodeLoc::new("orders.rs", 41), Some(cause))
        .unwrap();
    engine.release(cause);
    let snapshot = engine.snapshot(top).unwrap();
    engine.release(top);
    drop(engine);

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "exc_type": "InvalidOperationException",
            "message": null,
            "file": "orders.rs",
            "line": 41,
            "inner": {
                "exc_type": "IOException",
                "message": "disk full",
                "file": "store.rs",
                "line": 7,
                "inner": null,
            },
        })
    );
    let back: Exception = serde_json::from_value(json).unwrap();
    assert_eq!(back, snapshot);
}

/// Snapshots of non-exceptions are refused.
#[test]
fn snapshot_of_non_exception_is_none() {
    let mut engine = Engine::new(EngineConfig::default(), NoLimitTracker, NoWriter, NoopTracer);
    let text = engine.heap_mut().allocate_str("just text").unwrap();
    assert_eq!(engine.snapshot(text), None);
    engine.release(text);
}

/// Engine configuration round-trips, including every termination mode.
#[test]
fn config_round_trips() {
    for termination in [Termination::Abort, Termination::Exit(70), Termination::Panic] {
        let config = EngineConfig::default()
            .limits(ResourceLimits::new().max_allocations(100).max_memory(1 << 20))
            .emergency_buffers(2)
            .termination(termination)
            .heap_capacity(256);
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}

/// An empty document is the default configuration, and a deserialized reserve size of
/// zero still yields one buffer.
#[test]
fn empty_config_is_default_and_reserve_never_empty() {
    let config: EngineConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, EngineConfig::default());

    let zero: EngineConfig = serde_json::from_str(r#"{"emergency_buffers": 0}"#).unwrap();
    let engine = Engine::new(zero, NoLimitTracker, NoWriter, NoopTracer);
    assert_eq!(engine.heap().stats().pinned_objects, 1);
}
