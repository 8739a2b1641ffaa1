use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use tabletop_core::{PlacementUpdate, Position};
use tabletop_sync::broadcast::{Audience, ConnectionRegistry};
use tabletop_sync::hub::SyncHub;
use tabletop_sync::protocol::{ClientMessage, ConnectionId, ServerMessage};
use tabletop_sync::store::PlacementStore;

fn bench_frame_encode(c: &mut Criterion) {
    let update = PlacementUpdate::new("card-hearts-7", "hearts", Position::new(120.0, 35.5));

    c.bench_function("placement_changed_encode", |b| {
        b.iter(|| {
            let msg = ServerMessage::PlacementChanged(black_box(update.clone()));
            black_box(msg.encode_shared().unwrap());
        })
    });
}

fn bench_frame_decode(c: &mut Criterion) {
    let update = PlacementUpdate::new("card-hearts-7", "hearts", Position::new(120.0, 35.5));
    let encoded = ClientMessage::UpdatePlacement(update).encode().unwrap();

    c.bench_function("update_placement_decode", |b| {
        b.iter(|| {
            black_box(ClientMessage::decode(black_box(&encoded)).unwrap());
        })
    });
}

fn bench_fanout_100_peers(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let frame = ServerMessage::PlacementChanged(PlacementUpdate::new(
        "card-clubs-1",
        "clubs",
        Position::new(0.0, 0.0),
    ))
    .encode_shared()
    .unwrap();

    c.bench_function("fanout_100_peers", |b| {
        b.iter(|| {
            rt.block_on(async {
                let registry = ConnectionRegistry::new(16);

                let mut receivers = Vec::new();
                let mut ids = Vec::new();
                for _ in 0..100 {
                    let id = ConnectionId::new();
                    receivers.push(registry.register(id).await);
                    ids.push(id);
                }

                let delivered = registry
                    .fanout(Audience::AllExcept(ids[0]), black_box(&frame))
                    .await;
                black_box(delivered);
            });
        })
    });
}

fn bench_hub_update_1000(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("hub_update_1000_msgs_10_peers", |b| {
        b.iter(|| {
            rt.block_on(async {
                let hub = SyncHub::new(PlacementStore::new(), 2048);

                let mut peers = Vec::new();
                for _ in 0..10 {
                    peers.push(hub.join().await);
                }

                for i in 0..1000u32 {
                    let update = PlacementUpdate::new(
                        format!("card-spades-{}", i % 12 + 1),
                        "spades",
                        Position::new(f64::from(i), 0.0),
                    );
                    hub.update_placement(Some(peers[0].id), update).await.unwrap();
                }
                black_box(hub.stats().await);
            });
        })
    });
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_frame_decode,
    bench_fanout_100_peers,
    bench_hub_update_1000,
);
criterion_main!(benches);
