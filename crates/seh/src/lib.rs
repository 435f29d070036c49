#![doc = include_str!("../../../README.md")]
// first to include defer_release macro
mod heap;

mod config;
mod engine;
mod exception_private;
mod exception_public;
mod fail_fast;
mod io;
mod resource;
pub mod tracer;

pub use crate::{
    config::{DEFAULT_EMERGENCY_BUFFERS, EngineConfig},
    engine::{Engine, Scope, SehResult, Thrown, TryBlock},
    exception_private::{CodeLoc, ExcType, ExceptionView},
    exception_public::Exception,
    fail_fast::{Termination, UnhandledPanic},
    heap::{ContainsHeap, DropWithHeap, Heap, HeapGuard, HeapId, HeapObject, HeapStats},
    io::{CollectStringWriter, DiagnosticWriter, NoWriter, StdErr},
    resource::{LimitedTracker, NoLimitTracker, ResourceError, ResourceLimits, ResourceTracker},
    tracer::{ExceptionTracer, NoopTracer, RecordingTracer, StatsReport, StatsTracer, StderrTracer, TraceEvent},
};

/// Throws a new exception located at the macro call site.
///
/// Expands to [`Engine::throw_new`], so the result is a `SehResult<R>` that is always
/// `Err`; use it with `return` or `?`.
///
/// ```
/// use seh::{Engine, ExcType, SehResult, throw};
///
/// fn parse_port(engine: &mut Engine, text: &str) -> SehResult<u16> {
///     match text.parse() {
///         Ok(port) => Ok(port),
///         Err(_) => throw!(engine, ExcType::FormatException, format!("not a port: {text}")),
///     }
/// }
/// ```
#[macro_export]
macro_rules! throw {
    ($engine:expr, $exc_type:expr) => {
        $engine.throw_new($exc_type, None, $crate::CodeLoc::new(file!(), line!()), None)
    };
    ($engine:expr, $exc_type:expr, $message:expr) => {
        $engine.throw_new(
            $exc_type,
            Some(::core::convert::AsRef::<str>::as_ref(&$message)),
            $crate::CodeLoc::new(file!(), line!()),
            None,
        )
    };
    ($engine:expr, $exc_type:expr, $message:expr, inner = $inner:expr) => {
        $engine.throw_new(
            $exc_type,
            Some(::core::convert::AsRef::<str>::as_ref(&$message)),
            $crate::CodeLoc::new(file!(), line!()),
            Some($inner),
        )
    };
}
