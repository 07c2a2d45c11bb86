//! Performance benchmarks for tandem-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};
use tandem_engine::{
    aggregate_errors, diff_attributes, diff_relationships, merge_managed_attributes,
    ApiError, ClearStyle, DiffOptions, FormValues, ManagedAttributeDirectives, OperationResult,
    Ref, RelationshipDocument, Relationships,
};

fn wide_form(fields: usize, suffix: &str) -> FormValues {
    (0..fields)
        .map(|i| (format!("field_{i}"), json!(format!("value_{i}{suffix}"))))
        .collect()
}

fn bench_attribute_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("attribute_diff");

    for size in [10, 100, 1000].iter() {
        let original = wide_form(*size, "");
        // Every tenth field changed
        let mut values = original.clone();
        for i in (0..*size).step_by(10) {
            values.insert(format!("field_{i}"), json!("changed"));
        }

        group.bench_with_input(BenchmarkId::new("fields", size), size, |b, _| {
            b.iter(|| {
                diff_attributes(
                    black_box(&values),
                    black_box(Some(&original)),
                    &DiffOptions::new(),
                    &[],
                )
            })
        });
    }

    group.finish();
}

fn bench_relationship_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("relationship_diff");

    for size in [10, 100, 1000].iter() {
        let refs: Vec<Ref> = (0..*size).map(|i| Ref::new(i.to_string(), "person")).collect();
        let mut reversed = refs.clone();
        reversed.reverse();

        let mut original = Relationships::new();
        original.insert("preparedBy".into(), RelationshipDocument::many(refs));
        let mut current = Relationships::new();
        current.insert("preparedBy".into(), RelationshipDocument::many(reversed));

        group.bench_with_input(BenchmarkId::new("refs", size), size, |b, _| {
            b.iter(|| diff_relationships(black_box(&current), black_box(Some(&original)), true))
        });
    }

    group.finish();
}

fn bench_managed_merge(c: &mut Criterion) {
    let submitted = wide_form(200, "_edited");
    let original = wide_form(200, "");
    let mut directives = ManagedAttributeDirectives::new();
    for i in (0..200).step_by(7) {
        directives = directives.clear(format!("managedAttributes.field_{i}"), ClearStyle::EmptyString);
    }
    for i in (3..200).step_by(11) {
        directives = directives.delete(format!("managedAttributes.field_{i}"));
    }

    c.bench_function("managed_merge_200", |b| {
        b.iter(|| {
            merge_managed_attributes(
                "managedAttributes",
                black_box(Some(&submitted)),
                black_box(Some(&original)),
                &directives,
            )
        })
    });
}

fn bench_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregation");

    for size in [10, 100, 1000].iter() {
        let results: Vec<OperationResult> = (0..*size)
            .map(|i| match i % 3 {
                0 => OperationResult::success(201, Some(Value::Null)),
                1 => OperationResult::failure(
                    422,
                    vec![ApiError::new("Constraint violation", format!("bad value {i}"))],
                ),
                _ => OperationResult::failure(422, vec![ApiError::at_pointer(format!("field_{i}"), "required")]),
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("results", size), size, |b, _| {
            b.iter(|| aggregate_errors(black_box(&results)))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_attribute_diff,
    bench_relationship_diff,
    bench_managed_merge,
    bench_aggregation,
);
criterion_main!(benches);
