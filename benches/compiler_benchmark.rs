use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use quarry::core::config::Config;
use quarry::core::index::SearchIndex;
use quarry::query::ast::{or_, q, terms};
use quarry::query::compiler::{QueryCompiler, QueryPlan, escape_match_value};
use quarry::query::lookup::TermFlags;
use quarry::schema::schema::{Field, Schema};
use rand::Rng;

fn schema() -> Schema {
    Schema::builder("documents")
        .field(Field::text("title").indexed())
        .field(Field::text("body").indexed())
        .field(Field::int("num"))
        .field(Field::date("published"))
        .build()
        .unwrap()
}

fn random_sentence(words: usize) -> String {
    let mut rng = rand::thread_rng();
    let pool = ["the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog"];
    (0..words)
        .map(|_| pool[rng.gen_range(0..pool.len())])
        .collect::<Vec<_>>()
        .join(" ")
}

/// Benchmark keyword-mode compilation with a mixed predicate set
fn bench_compile_keyword(c: &mut Criterion) {
    let schema = schema();
    let compiler = QueryCompiler::new(&schema);
    let plan = QueryPlan::new(
        terms()
            .set("body", "quick brown fox")
            .set("num__gte", 10)
            .set("published__year", 2023),
        20,
    );
    c.bench_function("compile_keyword_query", |b| {
        b.iter(|| compiler.compile(black_box(&plan)).unwrap());
    });
}

/// Benchmark compilation of a nested combinator tree
fn bench_compile_expression(c: &mut Criterion) {
    let schema = schema();
    let compiler = QueryCompiler::new(&schema);
    let expr = or_(
        q("body", "hello").and(q("title", "world")),
        q("body", "quick").and(q("body", "fox")),
    );
    let plan = QueryPlan::new(expr.into(), 20);
    c.bench_function("compile_expression_query", |b| {
        b.iter(|| compiler.compile(black_box(&plan)).unwrap());
    });
}

/// Benchmark escaping across increasingly hostile inputs
fn bench_escape(c: &mut Criterion) {
    let mut group = c.benchmark_group("escape_match_value");
    let inputs = [
        ("plain", "hello world"),
        ("operators", "hello AND world OR fox"),
        ("punctuation", "C:\\Users\\doc (v2) \"final\".txt"),
    ];
    for (label, input) in inputs {
        group.bench_with_input(BenchmarkId::from_parameter(label), input, |b, input| {
            b.iter(|| escape_match_value(black_box(input), TermFlags::default()));
        });
    }
    group.finish();
}

/// Benchmark the full insert-flush path on an in-memory index
fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    for batch in [1usize, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            let config = Config {
                write_buffer_size: batch,
                ..Config::default()
            };
            let index = SearchIndex::in_memory(&schema(), config).unwrap();
            b.iter(|| {
                index
                    .insert(&[
                        ("title", random_sentence(3).into()),
                        ("body", random_sentence(40).into()),
                        ("num", 7.into()),
                        (
                            "published",
                            chrono::NaiveDate::from_ymd_opt(2023, 5, 17).unwrap().into(),
                        ),
                    ])
                    .unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark a materializing search over a small corpus
fn bench_search(c: &mut Criterion) {
    let index = SearchIndex::in_memory(&schema(), Config::default()).unwrap();
    for _ in 0..500 {
        index
            .insert(&[
                ("title", random_sentence(3).into()),
                ("body", random_sentence(40).into()),
                ("num", 7.into()),
                (
                    "published",
                    chrono::NaiveDate::from_ymd_opt(2023, 5, 17).unwrap().into(),
                ),
            ])
            .unwrap();
    }
    c.bench_function("search_and_materialize", |b| {
        b.iter(|| {
            let mut cursor = index.search(terms().set("body", "quick fox")).unwrap();
            black_box(cursor.documents().unwrap().len())
        });
    });
}

criterion_group!(
    benches,
    bench_compile_keyword,
    bench_compile_expression,
    bench_escape,
    bench_insert,
    bench_search
);
criterion_main!(benches);
