//! Benchmarks for round-driver round latency under the solo policy.

use covenant_core::consensus::solo::SoloPort;
use covenant_core::consensus::ConsensusPort;
use covenant_core::crypto::NodeKeypair;
use covenant_core::driver::{DriverConfig, RoundDriver, RoundRobinRole, StaticParticipates};
use covenant_core::event_bus::EventBus;
use covenant_core::mempool::{Mempool, MempoolConfig};
use covenant_core::model::Address;
use covenant_core::producer::{BlockProducer, ProducerConfig};
use covenant_core::repository::InMemoryRepository;
use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn build_driver() -> RoundDriver {
    let kp = NodeKeypair::generate();
    let addr = Address::from_bytes(kp.public_key_bytes());
    let events = EventBus::new();
    let repo = Arc::new(InMemoryRepository::new(events.clone()));
    let mempool = Mempool::new(MempoolConfig::default()).with_event_bus(events.clone());
    let producer = Arc::new(BlockProducer::new(mempool, repo, kp, ProducerConfig::default()));
    let consensus = Arc::new(ConsensusPort::Solo(SoloPort::new(addr)));
    RoundDriver::new(
        consensus,
        producer,
        events,
        addr,
        Arc::new(StaticParticipates::new(vec![addr])),
        Arc::new(RoundRobinRole),
        DriverConfig { round_interval: std::time::Duration::from_millis(0) },
    )
}

/// Round latency for a single proposer committing an empty block to itself,
/// the cheapest possible round and thus the floor every multi-validator
/// policy's round latency sits above.
fn bench_solo_round(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    c.bench_function("driver_solo_round_commit", |b| {
        b.iter_with_setup(build_driver, |driver| {
            rt.block_on(async {
                driver.online_wizard();
                driver.round().await.unwrap()
            })
        })
    });
}

/// Ten consecutive rounds back-to-back, exercising round advance plus block
/// production chained against a growing repository tip. The driver's own
/// round counter only advances on a committed block, so each round is
/// driven directly rather than through the event-bus inbox loop.
fn bench_solo_ten_rounds(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    c.bench_function("driver_solo_ten_rounds", |b| {
        b.iter_with_setup(build_driver, |driver| {
            rt.block_on(async {
                driver.online_wizard();
                for _ in 0..10u64 {
                    driver.round().await.unwrap();
                }
            })
        })
    });
}

criterion_group!(benches, bench_solo_round, bench_solo_ten_rounds);
criterion_main!(benches);
