// Use codspeed-criterion-compat when running on CodSpeed (CI), real criterion otherwise (for flamegraphs)
#[cfg(codspeed)]
use codspeed_criterion_compat::{Bencher, Criterion, black_box, criterion_group, criterion_main};
#[cfg(not(codspeed))]
use criterion::{Bencher, Criterion, black_box, criterion_group, criterion_main};
use seh::{CodeLoc, Engine, EngineConfig, ExcType, NoLimitTracker, NoWriter, NoopTracer, SehResult, TryBlock};

type BenchEngine = Engine<NoLimitTracker, NoWriter, NoopTracer>;

fn engine() -> BenchEngine {
    Engine::new(EngineConfig::default(), NoLimitTracker, NoWriter, NoopTracer)
}

/// A try block whose body completes normally: the cost of entering and leaving a scope.
fn try_no_throw(bench: &mut Bencher) {
    let mut engine = engine();
    bench.iter(|| {
        let value = TryBlock::new(|_: &mut BenchEngine| Ok(black_box(1)))
            .catch(ExcType::Exception, |_, _| Ok(0))
            .run(&mut engine);
        black_box(value)
    });
}

/// Throw with a message, caught one level up by an ancestor tag.
fn throw_catch(bench: &mut Bencher) {
    let mut engine = engine();
    bench.iter(|| {
        let value = TryBlock::new(|e: &mut BenchEngine| {
            e.throw_new(ExcType::ArgumentNullException, Some("x cannot be null"), CodeLoc::new("bench.rs", 1), None)
        })
        .catch(ExcType::ArgumentException, |_, _| Ok(1))
        .run(&mut engine);
        black_box(value)
    });
}

/// Throw at the bottom of `depth` nested scopes, each with a non-matching clause and
/// a finally, caught at the top.
fn nested_unwind(bench: &mut Bencher, depth: usize) {
    fn nest(engine: &mut BenchEngine, levels: usize) -> SehResult<u32> {
        if levels == 0 {
            return engine.throw(ExcType::DivideByZeroException, None);
        }
        TryBlock::new(move |e: &mut BenchEngine| nest(e, levels - 1))
            .catch(ExcType::IOException, |_, _| Ok(0))
            .finally(|_| Ok(()))
            .run(engine)
    }

    let mut engine = engine();
    bench.iter(|| {
        let value = TryBlock::new(|e: &mut BenchEngine| nest(e, depth))
            .catch(ExcType::ArithmeticException, |_, _| Ok(1))
            .run(&mut engine);
        black_box(value)
    });
}

/// Configures the benchmark group.
fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("try_no_throw", try_no_throw);
    c.bench_function("throw_catch", throw_catch);
    c.bench_function("nested_unwind_16", |b| nested_unwind(b, 16));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
