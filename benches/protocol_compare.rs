use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use txnlab::{scenarios, BlockPolicy, Op, Protocol, Schedule, Simulation, SimulationConfig, TxnScript, Workload};

const HOTSPOT_TXNS: &[u64] = &[4, 16, 64];

fn bench_data_dir() -> PathBuf {
    PathBuf::from("target/bench-data-protocol-compare")
}

fn write_lock_stats(label: &str, sim: &Simulation, protocol: Protocol, scripts: &[TxnScript]) {
    sim.reset();
    let Ok(report) = sim.run_workload(protocol, scripts) else {
        return;
    };
    let path = bench_data_dir().join(format!("lock-stats-{label}-{protocol}.json"));
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if let Ok(bytes) = serde_json::to_vec_pretty(&report.lock_stats) {
        let _ = fs::write(path, bytes);
    }
}

/// `txns` transactions that all read and bump the same counter.
fn hotspot(txns: u64) -> Workload {
    Workload::new(
        vec![txnlab::ResourceSpec::new("counter", 0)],
        (1..=txns)
            .map(|id| TxnScript::new(id, vec![Op::read("counter"), Op::write("counter", 1)]))
            .collect(),
    )
}

fn bench_item_transfers(c: &mut Criterion) {
    let workload = scenarios::item_transfers();
    let mut group = c.benchmark_group("item_transfers");
    group.sample_size(20);
    group.warm_up_time(Duration::from_secs(1));

    for schedule in [Schedule::Serial, Schedule::Interleaved] {
        let config = SimulationConfig::new()
            .schedule(schedule)
            .lock_stats_enabled(true);
        let sim = Simulation::from_workload(&workload, config).expect("valid workload");
        for protocol in [Protocol::TwoPhaseLocking, Protocol::Mvcc] {
            group.bench_with_input(
                BenchmarkId::new(format!("{protocol}"), format!("{schedule:?}")),
                &protocol,
                |b, protocol| {
                    b.iter(|| {
                        sim.reset();
                        sim.run_workload(*protocol, &workload.transactions)
                            .expect("run failed")
                    })
                },
            );
            write_lock_stats(&format!("items-{schedule:?}"), &sim, protocol, &workload.transactions);
        }
    }
    group.finish();
}

fn bench_hotspot_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("hotspot_scaling");
    group.sample_size(10);
    group.warm_up_time(Duration::from_secs(1));
    group.measurement_time(Duration::from_secs(4));

    for &txns in HOTSPOT_TXNS {
        let workload = hotspot(txns);
        let config = SimulationConfig::new()
            .schedule(Schedule::Threaded)
            .block_policy(BlockPolicy::Wait)
            .deadlock_check_interval_ms(1);
        let sim = Simulation::from_workload(&workload, config).expect("valid workload");
        group.throughput(Throughput::Elements(txns));
        for protocol in [Protocol::TwoPhaseLocking, Protocol::Mvcc] {
            group.bench_with_input(BenchmarkId::new(format!("{protocol}"), txns), &protocol, |b, protocol| {
                b.iter(|| {
                    sim.reset();
                    sim.run_workload(*protocol, &workload.transactions)
                        .expect("run failed")
                })
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_item_transfers, bench_hotspot_scaling);
criterion_main!(benches);
