use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tabletop_core::{deal, PlacementUpdate, Position, Snapshot};

fn bench_deal(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(1);
    c.bench_function("deal_48", |b| {
        b.iter(|| black_box(deal(&mut rng)));
    });
}

fn bench_snapshot_json(c: &mut Criterion) {
    let snapshot = deal(&mut StdRng::seed_from_u64(1));

    c.bench_function("snapshot_encode_48", |b| {
        b.iter(|| black_box(serde_json::to_string(black_box(&snapshot)).unwrap()));
    });

    let encoded = serde_json::to_string(&snapshot).unwrap();
    c.bench_function("snapshot_decode_48", |b| {
        b.iter(|| black_box(serde_json::from_str::<Snapshot>(black_box(&encoded)).unwrap()));
    });
}

fn bench_update_decode(c: &mut Criterion) {
    let update = PlacementUpdate::new("card-hearts-7", "hearts", Position::new(120.0, 35.5));
    let encoded = serde_json::to_string(&update).unwrap();
    let pixel = concat!(
        r#"{"entityId":"card-hearts-7","containerId":"hearts","#,
        r#""position":{"left":"120px","top":"35.5px"}}"#,
    );

    c.bench_function("update_decode_numeric", |b| {
        b.iter(|| {
            black_box(serde_json::from_str::<PlacementUpdate>(black_box(&encoded)).unwrap())
        });
    });
    c.bench_function("update_decode_pixels", |b| {
        b.iter(|| {
            black_box(serde_json::from_str::<PlacementUpdate>(black_box(pixel)).unwrap())
        });
    });
}

criterion_group!(benches, bench_deal, bench_snapshot_json, bench_update_decode);
criterion_main!(benches);
