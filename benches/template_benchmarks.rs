//! Read Mapping Benchmarks
//!
//! Compile and evaluate cost of read mappings at the sizes workers typically ask for.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use orderflow::template::PreparedMapping;
use serde_json::{json, Value};
use std::collections::BTreeMap;

fn mapping_body(keys: usize) -> BTreeMap<String, String> {
    (0..keys)
        .map(|index| {
            let expression = match index % 4 {
                3 => "$.lines[*].sku".to_string(),
                2 => "{#0: $.lines[#0].qty}".to_string(),
                _ => format!("$.fields.f{index}"),
            };
            (format!("k{index}"), expression)
        })
        .collect()
}

fn order_body() -> Value {
    let fields: serde_json::Map<String, Value> = (0..16)
        .map(|index| (format!("f{index}"), json!(format!("value-{index}"))))
        .collect();
    json!({
        "id": "order-42",
        "fields": fields,
        "lines": (0..10).map(|n| json!({"sku": format!("sku-{n}"), "qty": n})).collect::<Vec<_>>(),
    })
}

fn benchmark_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("mapping_compile");
    for keys in [1, 4, 8, 16] {
        let body = mapping_body(keys);
        group.bench_with_input(BenchmarkId::from_parameter(keys), &body, |b, body| {
            b.iter(|| PreparedMapping::compile(black_box(body)).unwrap())
        });
    }
    group.finish();
}

fn benchmark_evaluate(c: &mut Criterion) {
    let document = order_body();
    let mut group = c.benchmark_group("mapping_evaluate");
    for keys in [1, 4, 8, 16] {
        let prepared = PreparedMapping::compile(&mapping_body(keys)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(keys), &prepared, |b, prepared| {
            b.iter(|| prepared.evaluate(black_box(&document)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_compile, benchmark_evaluate);
criterion_main!(benches);
