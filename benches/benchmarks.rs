use criterion::{criterion_group, criterion_main, Bencher, BenchmarkId, Criterion};

use amrsnap::comm::ParticipantCount;
use amrsnap::comm::ParticipantIndex;
use amrsnap::fab::BoxLayout;
use amrsnap::geometry::Geometry;
use amrsnap::geometry::IndexBox;
use amrsnap::hierarchy::GridHierarchy;
use amrsnap::hierarchy::LevelGrids;
use amrsnap::schema::FieldId;
use amrsnap::*;

fn random_state(schema: &SchemaRegistry, cells: i64) -> AmrState {
    let domain = IndexBox::new([0, 0, 0], [cells - 1, cells - 1, cells - 1]);
    let half = cells / 2;
    let boxes = vec![
        IndexBox::new([0, 0, 0], [half - 1, cells - 1, cells - 1]),
        IndexBox::new([half, 0, 0], [cells - 1, cells - 1, cells - 1]),
    ];
    let hierarchy = GridHierarchy::new(
        0.0,
        vec![LevelGrids {
            geom: Geometry::new(domain, [0.0; 3], [1.0; 3]),
            layout: BoxLayout::round_robin(boxes, ParticipantCount(1)),
            steps: 0,
            ref_ratio: 1,
        }],
    )
    .unwrap();
    let mut state = AmrState::allocate(hierarchy, schema, ParticipantIndex(0));
    let rng = fastrand::Rng::with_seed(7);
    let primary = state.levels[0].get_mut(FieldId(0)).unwrap();
    for index in 0..2 {
        if let Some(fab) = primary.data.fab_mut(index) {
            fab.component_mut(0).iter_mut().for_each(|v| *v = rng.f64());
        }
    }
    state
}

fn bench_checkpoint(b: &mut Bencher, cells: i64) {
    let schema = SchemaRegistry::reacting_flow(&["H2", "O2", "H2O", "N2"]);
    let config = IoConfig::default();
    let state = random_state(&schema, cells);
    let dir = tempfile::tempdir().unwrap();
    let writer = CheckpointWriter::new(&schema, &config, &LocalArrayStore);

    b.iter(|| {
        writer
            .write(&SoloGroup, &dir.path().join("chk"), &state)
            .expect("checkpoint write failed");
    });
}

fn bench_restart(b: &mut Bencher, cells: i64) {
    let schema = SchemaRegistry::reacting_flow(&["H2", "O2", "H2O", "N2"]);
    let config = IoConfig::default();
    let dir = tempfile::tempdir().unwrap();
    CheckpointWriter::new(&schema, &config, &LocalArrayStore)
        .write(&SoloGroup, dir.path(), &random_state(&schema, cells))
        .unwrap();

    b.iter(|| {
        Restarter::new(&schema, &config, &LocalArrayStore)
            .restart(&SoloGroup, dir.path())
            .expect("restart failed")
    });
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");
    for cells in [16, 32] {
        group.bench_function(BenchmarkId::new("checkpoint", cells), |b| {
            bench_checkpoint(b, cells);
        });
        group.bench_function(BenchmarkId::new("restart", cells), |b| {
            bench_restart(b, cells);
        });
    }
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
