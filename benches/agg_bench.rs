use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, SamplingMode, Throughput};
use polars::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_json::json;

use courtside::dispatch::{ToolRegistry, PLAYER_STATS_TOOL};
use courtside::manifest::{Dataset, Manifest};
use courtside::query::QueryCtx;
use courtside::snapshot::SnapshotStore;

const SEASONS: [&str; 3] = ["2023-24", "2024-25", "2025-26"];

fn gen_player_stats(n: usize, seed: u64) -> DataFrame {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut player: Vec<String> = Vec::with_capacity(n);
    let mut team: Vec<String> = Vec::with_capacity(n);
    let mut season: Vec<&str> = Vec::with_capacity(n);
    let mut age: Vec<i64> = Vec::with_capacity(n);
    let mut g: Vec<i64> = Vec::with_capacity(n);
    let mut pts: Vec<f64> = Vec::with_capacity(n);
    let mut ast: Vec<f64> = Vec::with_capacity(n);
    for i in 0..n {
        player.push(format!("Player {}", i / SEASONS.len()));
        team.push(format!("Team {}", rng.gen::<u32>() % 30));
        season.push(SEASONS[i % SEASONS.len()]);
        age.push(19 + (rng.gen::<u32>() % 20) as i64);
        g.push(40 + (rng.gen::<u32>() % 43) as i64);
        pts.push(rng.gen::<f64>() * 35.0);
        ast.push(rng.gen::<f64>() * 11.0);
    }
    DataFrame::new(vec![
        Series::new("player".into(), player).into(),
        Series::new("team".into(), team).into(),
        Series::new("season".into(), season).into(),
        Series::new("age".into(), age).into(),
        Series::new("g".into(), g).into(),
        Series::new("pts".into(), pts).into(),
        Series::new("ast".into(), ast).into(),
    ])
    .expect("df build")
}

fn seed_registry(dir: &Path, n: usize) -> ToolRegistry {
    let mut df = gen_player_stats(n, 0xC0FF_EE11);
    let file = File::create(dir.join(Dataset::PlayerStats.file_name())).expect("fixture file");
    ParquetWriter::new(file).finish(&mut df).expect("fixture write");
    let store = SnapshotStore::shared(dir);
    ToolRegistry::new(QueryCtx::new(store, Arc::new(Manifest::default())))
}

fn bench_aggregates(c: &mut Criterion) {
    let ns = [30_000usize, 300_000usize];
    let mut group = c.benchmark_group("aggregate");
    group.sampling_mode(SamplingMode::Flat);
    group.sample_size(20);

    for &n in &ns {
        let dir = tempfile::tempdir().expect("tempdir");
        let reg = seed_registry(dir.path(), n);
        // Warm the frame cache so iterations measure aggregation, not IO.
        let _ = reg
            .dispatch_named(PLAYER_STATS_TOOL, &json!({"players": ["Player 0"]}))
            .expect("warmup");

        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("summary_avg", n.to_string()), &n, |b, _| {
            let args = json!({"players": ["Player 17"], "metric": "points"});
            b.iter(|| {
                let _ = reg.dispatch_named(PLAYER_STATS_TOOL, &args).unwrap();
            });
        });

        group.bench_with_input(BenchmarkId::new("grouped_topk", n.to_string()), &n, |b, _| {
            let args = json!({"group_by": "player", "metric": "points", "k": 10});
            b.iter(|| {
                let _ = reg.dispatch_named(PLAYER_STATS_TOOL, &args).unwrap();
            });
        });

        group.bench_with_input(
            BenchmarkId::new("grouped_union_two_metrics", n.to_string()),
            &n,
            |b, _| {
                let args =
                    json!({"group_by": "player", "metrics": ["points", "assists"], "k": 10});
                b.iter(|| {
                    let _ = reg.dispatch_named(PLAYER_STATS_TOOL, &args).unwrap();
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_aggregates);
criterion_main!(benches);
