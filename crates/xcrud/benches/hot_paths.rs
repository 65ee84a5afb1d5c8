use criterion::{Criterion, black_box, criterion_group, criterion_main};
use xcrud::protocol::Encode;
use xcrud::{GrammarStart, Mode, Statement, StatementRegistry, compile, parse};

const CRITERIA: &str =
    "age > :min AND (name LIKE :pattern OR $.tags[*] IN ['a', 'b']) AND score * 2 >= :floor";

fn statement() -> Statement {
    Statement::find("people")
        .schema("test")
        .criteria(CRITERIA)
        .bind("min", 18)
        .bind("pattern", "A%")
        .bind("floor", 10.5)
        .fields("name")
        .fields("age * 2 AS double_age")
        .order_by("age DESC")
        .limit(100)
}

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse_criteria", |b| {
        b.iter(|| parse(black_box(CRITERIA), GrammarStart::Expr).unwrap())
    });
}

fn bench_compile_execute(c: &mut Criterion) {
    let stmt = statement();

    c.bench_function("compile_execute_and_encode", |b| {
        b.iter(|| compile(black_box(&stmt), Mode::Execute).unwrap().to_bytes())
    });
}

fn bench_registry_reuse(c: &mut Criterion) {
    let stmt = statement();
    let mut registry = StatementRegistry::new();
    let handle = registry.register();
    registry.decide(handle, &stmt).unwrap();
    registry.decide(handle, &stmt).unwrap();

    c.bench_function("registry_reuse_decision", |b| {
        b.iter(|| registry.decide(handle, black_box(&stmt)).unwrap())
    });
}

criterion_group!(
    hot_paths,
    bench_parse,
    bench_compile_execute,
    bench_registry_reuse
);
criterion_main!(hot_paths);
