use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use coroutine_context::{Context, SuspendPoint};

fn start_and_finish(c: &mut Criterion) {
    c.bench_function("start and finish", |b| {
        let mut context = Context::new(64 * 1024, true).unwrap();
        b.iter(|| {
            context.set_work(|_suspender| {});
            context.start()
        })
    });
}

fn suspend_and_resume(c: &mut Criterion) {
    c.bench_function("suspend and resume", |b| {
        let point = SuspendPoint::new();
        let mut context = Context::with_work(64 * 1024, true, |suspender| loop {
            suspender.suspend(&point);
        })
        .unwrap();
        assert!(!context.start());
        b.iter(|| context.resume_point(&point));
        // The work never finishes, leak the context instead of dropping it suspended.
        std::mem::forget(context);
    });
}

fn create_context(c: &mut Criterion) {
    c.bench_function("create context", |b| {
        b.iter_batched(
            || (),
            |_| Context::new(64 * 1024, true).unwrap(),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, start_and_finish, suspend_and_resume, create_context);
criterion_main!(benches);
