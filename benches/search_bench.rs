use std::time::Duration;

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use tempfile::TempDir;

use loupe::{
    Document, Facet, FieldOptions, Index, IndexSettings, MergePolicyConfig, Schema, Searcher,
    STORED, STRING, TEXT,
};

const WORDS: [&str; 12] = [
    "rust", "search", "segment", "merge", "posting", "query", "index", "phrase", "engine",
    "token", "commit", "reader",
];

struct BenchEnv {
    _tmp: TempDir,
    searcher: Searcher,
}

fn bench_schema() -> Schema {
    let mut builder = Schema::builder();
    builder.add_text_field("body", TEXT | STORED).unwrap();
    builder.add_text_field("tag", STRING).unwrap();
    builder
        .add_u64_field("timestamp", FieldOptions::fast_stored())
        .unwrap();
    builder
        .add_facet_field("category", FieldOptions::indexed_stored())
        .unwrap();
    builder.freeze()
}

fn make_doc(id: u64) -> Document {
    let body: Vec<&str> = (0..16)
        .map(|i| WORDS[((id * 7 + i * 3) % WORDS.len() as u64) as usize])
        .collect();
    let category = Facet::from_path(&format!("/cat{}/sub{}", id % 4, id % 3)).unwrap();
    Document::new()
        .with("body", body.join(" "))
        .with("tag", format!("tag{}", id % 10))
        .with("timestamp", id)
        .with("category", category)
}

fn build_env(doc_count: u64, commit_every: u64) -> BenchEnv {
    let tmp = TempDir::new().unwrap();
    let settings = IndexSettings {
        merge_policy: MergePolicyConfig::NoMerge,
        ..IndexSettings::default()
    };
    let index = Index::create_in_dir_with_settings(tmp.path(), bench_schema(), settings).unwrap();
    let mut writer = index.writer().unwrap();
    for id in 0..doc_count {
        writer.add_document(make_doc(id)).unwrap();
        if (id + 1) % commit_every == 0 {
            writer.commit().unwrap();
        }
    }
    writer.commit().unwrap();
    writer.close().unwrap();
    BenchEnv {
        _tmp: tmp,
        searcher: index.searcher(),
    }
}

fn bench_queries(c: &mut Criterion) {
    let counts = [1_000u64, 10_000];
    let envs: Vec<(u64, BenchEnv)> = counts
        .iter()
        .map(|&count| (count, build_env(count, count / 4)))
        .collect();

    let queries = [
        ("term", "rust"),
        ("and", "rust AND merge"),
        ("or", "rust OR phrase OR token"),
        ("phrase", "\"search segment\""),
        ("range", "timestamp:[100 TO 500]"),
        ("facet", "category:/cat1"),
    ];

    for (name, query) in queries {
        let mut group = c.benchmark_group(format!("query_{}", name));
        for (count, env) in envs.iter() {
            let plan = env.searcher.parse_query(query).unwrap();
            group.bench_with_input(BenchmarkId::from_parameter(count), env, |b, env| {
                b.iter(|| black_box(env.searcher.search(&plan, 10).unwrap()));
            });
        }
        group.finish();
    }
}

fn bench_facet_counts(c: &mut Criterion) {
    let env = build_env(10_000, 2_500);
    let plan = env.searcher.parse_query("rust OR engine").unwrap();
    c.bench_function("facet_counts_top_level", |b| {
        b.iter(|| {
            black_box(
                env.searcher
                    .facet_counts(&plan, "category", "/")
                    .unwrap(),
            )
        });
    });
}

fn bench_parse(c: &mut Criterion) {
    let schema = bench_schema();
    c.bench_function("parse_query", |b| {
        b.iter(|| {
            black_box(
                loupe::QueryPlan::parse(
                    "+body:(rust merge) -tag:tag3 \"posting list\"^2 timestamp:[10 TO *]",
                    &schema,
                )
                .unwrap(),
            )
        });
    });
}

fn bench_indexing(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_and_commit");
    group.measurement_time(Duration::from_secs(10));
    for &batch in [100u64, 1_000].iter() {
        group.throughput(Throughput::Elements(batch));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            b.iter_batched(
                || Index::create_in_ram(bench_schema()).unwrap(),
                |index| {
                    let mut writer = index.writer().unwrap();
                    for id in 0..batch {
                        writer.add_document(make_doc(id)).unwrap();
                    }
                    writer.commit().unwrap();
                    black_box(index)
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_queries,
    bench_facet_counts,
    bench_parse,
    bench_indexing
);
criterion_main!(benches);
