use bbtag::eval::ContextOptions;
use bbtag::{parse, Engine, Services};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const SCRIPT: &str = r#"{set;~items;["a","b","c","d"]}{foreach;item;~items;<{get;item}>}{repeat;.;50}"#;

fn bench_parse(c: &mut Criterion) {
    let nested = "{a;{b;{c;{d;x}}}}".repeat(100);
    c.bench_function("parse script", |b| b.iter(|| parse(black_box(SCRIPT), false)));
    c.bench_function("parse nested", |b| b.iter(|| parse(black_box(&nested), false)));
}

fn bench_execute(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let engine = Engine::builder(Services::in_memory())
        .build()
        .expect("engine");
    let options = ContextOptions {
        tag_name: "bench".to_string(),
        silent: true,
        ..ContextOptions::default()
    };

    c.bench_function("execute loops", |b| {
        b.iter(|| {
            runtime
                .block_on(engine.execute(black_box(SCRIPT), options.clone()))
                .expect("execute")
        })
    });
}

criterion_group!(benches, bench_parse, bench_execute);
criterion_main!(benches);
