use smallvec::SmallVec;

use super::{Engine, SehResult};
use crate::{exception_private::ExcType, heap::HeapId, io::DiagnosticWriter, resource::ResourceTracker, tracer::ExceptionTracer};

type Body<'a, E, R> = Box<dyn FnOnce(&mut E) -> SehResult<R> + 'a>;
type Handler<'a, E, R> = Box<dyn FnOnce(&mut E, HeapId) -> SehResult<R> + 'a>;
type Finally<'a, E> = Box<dyn FnOnce(&mut E) -> SehResult<()> + 'a>;

/// A try statement: a body, catch clauses tested in order, and an optional finally.
///
/// Drives the raw protocol (`begin_try`, `catch_test`, `finally`, `end_try`) so the
/// scope is always closed, in order, on every path.
///
/// ```
/// use seh::{Engine, EngineConfig, ExcType, NoLimitTracker, NoWriter, NoopTracer, TryBlock};
///
/// let mut engine = Engine::new(EngineConfig::default(), NoLimitTracker, NoWriter, NoopTracer);
/// let value = TryBlock::new(|engine: &mut Engine<_, _, _>| engine.throw(ExcType::FormatException, Some("bad digit")))
///     .catch(ExcType::SystemException, |engine, exc| {
///         assert_eq!(engine.exception(exc).unwrap().message(), "bad digit");
///         Ok(-1)
///     })
///     .run(&mut engine);
/// assert_eq!(value, Ok(-1));
/// ```
#[must_use = "a TryBlock does nothing until `run` is called"]
pub struct TryBlock<'a, T: ResourceTracker, W: DiagnosticWriter, Tr: ExceptionTracer, R> {
    body: Body<'a, Engine<T, W, Tr>, R>,
    catches: SmallVec<[(ExcType, Handler<'a, Engine<T, W, Tr>, R>); 2]>,
    finally: Option<Finally<'a, Engine<T, W, Tr>>>,
}

impl<'a, T: ResourceTracker, W: DiagnosticWriter, Tr: ExceptionTracer, R> TryBlock<'a, T, W, Tr, R> {
    pub fn new(body: impl FnOnce(&mut Engine<T, W, Tr>) -> SehResult<R> + 'a) -> Self {
        Self {
            body: Box::new(body),
            catches: SmallVec::new(),
            finally: None,
        }
    }

    /// Adds a catch clause. The handler receives the caught exception, which the engine
    /// keeps alive until the scope closes.
    pub fn catch(
        mut self,
        tag: ExcType,
        handler: impl FnOnce(&mut Engine<T, W, Tr>, HeapId) -> SehResult<R> + 'a,
    ) -> Self {
        self.catches.push((tag, Box::new(handler)));
        self
    }

    /// Sets the finally clause, replacing any previous one.
    pub fn finally(mut self, finally: impl FnOnce(&mut Engine<T, W, Tr>) -> SehResult<()> + 'a) -> Self {
        self.finally = Some(Box::new(finally));
        self
    }

    /// Runs the statement.
    ///
    /// Returns the body's value, or the first matching handler's. An exception no clause
    /// claims, or one thrown by a handler or the finally clause, propagates as `Err`.
    #[track_caller]
    pub fn run(self, engine: &mut Engine<T, W, Tr>) -> SehResult<R> {
        let mut scope = engine.begin_try();
        let mut outcome = (self.body)(engine);

        if outcome.is_err() {
            for (tag, handler) in self.catches {
                if engine.catch_test(&mut scope, tag) {
                    let exc = engine
                        .current_exception()
                        .expect("TryBlock::run: claimed exception missing");
                    outcome = handler(engine, exc);
                    break;
                }
            }
        }

        if let Some(finally) = self.finally {
            engine.finally(&mut scope);
            if let Err(thrown) = finally(engine) {
                outcome = Err(thrown);
            }
        }

        // a clean close means nothing is in flight, so any Err here is stale
        engine.end_try(scope)?;
        debug_assert!(outcome.is_ok(), "TryBlock::run: scope closed cleanly after a throw");
        outcome
    }
}
