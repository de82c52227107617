use criterion::{criterion_group, criterion_main, Criterion};
use std::path::PathBuf;

use coapps::classify::{builtin_rules, match_rules, ContentClassifier};
use coapps::worker::attachment_name;

fn sample_paths() -> Vec<PathBuf> {
    [
        "index.html",
        "static/js/app.min.js",
        "static/css/site.css",
        "static/img/logo.svg",
        "manifest.appcache",
        "data/records.csv",
        "fonts/Inter.woff2",
        "README",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

fn bench_match_rules(c: &mut Criterion) {
    let rules = builtin_rules();
    let paths = sample_paths();

    c.bench_function("match_builtin_rules", |b| {
        b.iter(|| {
            paths
                .iter()
                .filter(|p| match_rules(&rules, p).is_some())
                .count()
        })
    });
}

fn bench_classify_cached(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let classifier = ContentClassifier::default();
    let paths = sample_paths();

    c.bench_function("classify_known_suffixes", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut total = 0;
                for p in paths.iter().take(6) {
                    total += classifier.classify(p).await.len();
                }
                total
            })
        })
    });
}

fn bench_attachment_name(c: &mut Criterion) {
    let paths = sample_paths();

    c.bench_function("attachment_names", |b| {
        b.iter(|| paths.iter().map(|p| attachment_name(p).len()).sum::<usize>())
    });
}

criterion_group!(
    benches,
    bench_match_rules,
    bench_classify_cached,
    bench_attachment_name
);
criterion_main!(benches);
