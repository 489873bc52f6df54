use std::fs;
use std::path::Path;

use amrsnap::comm::ParticipantCount;
use amrsnap::comm::ParticipantIndex;
use amrsnap::diagnostics::DIAGNOSTICS_FILE;
use amrsnap::fab::BoxLayout;
use amrsnap::geometry::Geometry;
use amrsnap::geometry::IndexBox;
use amrsnap::hierarchy::GridHierarchy;
use amrsnap::hierarchy::LevelGrids;
use amrsnap::job_info::JobInfo;
use amrsnap::job_info::JOB_INFO_FILE;
use amrsnap::schema::FieldId;
use amrsnap::version::VersionNegotiator;
use amrsnap::version::VERSION_MARKER_FILE;
use amrsnap::*;

fn hierarchy(participants: usize) -> GridHierarchy {
    let base = Geometry::new(IndexBox::new([0, 0, 0], [7, 7, 7]), [0.0; 3], [1.0; 3]);
    let fine = base.refine(2);
    GridHierarchy::new(
        0.75,
        vec![
            LevelGrids {
                layout: BoxLayout::round_robin(
                    vec![
                        IndexBox::new([0, 0, 0], [3, 7, 7]),
                        IndexBox::new([4, 0, 0], [7, 7, 7]),
                    ],
                    ParticipantCount(participants),
                ),
                geom: base,
                steps: 6,
                ref_ratio: 1,
            },
            LevelGrids {
                layout: BoxLayout::round_robin(
                    vec![
                        IndexBox::new([0, 0, 0], [3, 3, 3]),
                        IndexBox::new([4, 0, 0], [7, 3, 3]),
                        IndexBox::new([0, 4, 0], [7, 7, 3]),
                    ],
                    ParticipantCount(participants),
                ),
                geom: fine,
                steps: 12,
                ref_ratio: 2,
            },
        ],
    )
    .unwrap()
}

fn fill_value(level: usize, index: usize, comp: usize) -> f64 {
    (level * 1000 + index * 10 + comp) as f64 + 0.125
}

/// State owned by `me`, filled so every box and component differs.
fn state(schema: &SchemaRegistry, participants: usize, me: ParticipantIndex) -> AmrState {
    let mut state = AmrState::allocate(hierarchy(participants), schema, me);
    for level_state in &mut state.levels {
        let level = level_state.level;
        let primary = level_state.get_mut(FieldId(0)).unwrap();
        let owned: Vec<usize> = primary.data.fabs().map(|(index, _)| index).collect();
        for index in owned {
            let fab = primary.data.fab_mut(index).unwrap();
            for comp in 0..fab.ncomp() {
                fab.component_mut(comp).fill(fill_value(level, index, comp));
            }
        }
    }
    state.cpu_time = 3600.0 * 1.5;
    state.diagnostics = Some(vec![0.1, 0.2, 0.3, 0.4]);
    state.body_state = Some((0..schema.primary_ncomp()).map(|n| n as f64 * 0.5).collect());
    state
}

fn config() -> IoConfig {
    IoConfig {
        track_grid_losses: true,
        n_lost: 4,
        embedded_boundary: true,
        job_name: "premixed flame".to_string(),
        ..IoConfig::default()
    }
}

fn write_checkpoint(schema: &SchemaRegistry, config: &IoConfig, dir: &Path, participants: usize) {
    ThreadGroup::run(participants, |comm| {
        let state = state(schema, participants, comm.index());
        CheckpointWriter::new(schema, config, &LocalArrayStore)
            .with_provenance(&JobInfo)
            .write(&comm, dir, &state)
    })
    .unwrap()
    .into_iter()
    .collect::<Result<Vec<()>>>()
    .unwrap();
}

fn assert_primary_restored(state: &AmrState) {
    for level_state in &state.levels {
        let primary = level_state.get(FieldId(0)).unwrap();
        for (index, fab) in primary.data.fabs() {
            for comp in 0..fab.ncomp() {
                let want = fill_value(level_state.level, index, comp);
                assert!(
                    fab.component(comp).iter().all(|v| *v == want),
                    "level {} box {index} comp {comp}",
                    level_state.level
                );
            }
        }
    }
}

#[test]
fn checkpoint_restart_with_the_same_group() {
    let schema = SchemaRegistry::reacting_flow(&["H2", "O2", "N2"]);
    let config = config();
    let dir = tempfile::tempdir().unwrap();
    let chk = dir.path().join("chk00006");
    write_checkpoint(&schema, &config, &chk, 2);

    assert!(chk.join(VERSION_MARKER_FILE).exists());
    assert!(chk.join(JOB_INFO_FILE).exists());
    assert!(chk.join("Level_0").is_dir());
    assert!(chk.join("Level_1").is_dir());
    assert_eq!(
        fs::read_to_string(chk.join(DIAGNOSTICS_FILE)).unwrap(),
        "0.1\n0.2\n0.3\n0.4\n"
    );

    let restored = ThreadGroup::run(2, |comm| {
        let mut restarter = Restarter::new(&schema, &config, &LocalArrayStore);
        let state = restarter.restart(&comm, &chk)?;
        Ok::<_, SnapshotError>((restarter.version(), state))
    })
    .unwrap()
    .into_iter()
    .collect::<Result<Vec<_>>>()
    .unwrap();

    for (me, (version, state)) in restored.iter().enumerate() {
        let written = self::state(&schema, 2, ParticipantIndex(me));
        assert_eq!(*version, Some(CheckpointVersion::CURRENT));
        assert_eq!(state.hierarchy, written.hierarchy);
        assert_eq!(state.cpu_time, written.cpu_time);
        assert_eq!(state.diagnostics, written.diagnostics);
        assert_eq!(state.body_state, written.body_state);
        assert_primary_restored(state);
    }
}

#[test]
fn restart_on_fewer_participants() {
    let schema = SchemaRegistry::reacting_flow(&["H2", "O2", "N2"]);
    let config = config();
    let dir = tempfile::tempdir().unwrap();
    write_checkpoint(&schema, &config, dir.path(), 3);

    let mut restarter = Restarter::new(&schema, &config, &LocalArrayStore);
    let state = restarter.restart(&SoloGroup, dir.path()).unwrap();

    for level_state in &state.levels {
        let boxes = state.hierarchy.levels[level_state.level].layout.len();
        assert_eq!(level_state.get(FieldId(0)).unwrap().data.fabs().count(), boxes);
    }
    assert_primary_restored(&state);
}

#[test]
fn legacy_checkpoint_restarts_without_body_state() {
    let schema = SchemaRegistry::reacting_flow(&["N2"]);
    let config = config();
    let dir = tempfile::tempdir().unwrap();
    write_checkpoint(&schema, &config, dir.path(), 2);
    fs::remove_file(dir.path().join(VERSION_MARKER_FILE)).unwrap();

    let states = ThreadGroup::run(2, |comm| {
        Restarter::new(&schema, &config, &LocalArrayStore).restart(&comm, dir.path())
    })
    .unwrap();
    for state in states {
        assert_eq!(state.unwrap().body_state, None);
    }
}

#[test]
fn failed_checkpoint_fails_every_participant() {
    let schema = SchemaRegistry::reacting_flow(&[]);
    let config = config();
    let dir = tempfile::tempdir().unwrap();
    // A file where the checkpoint directory should go.
    let chk = dir.path().join("chk00000");
    fs::write(&chk, "in the way").unwrap();

    let results = ThreadGroup::run(2, |comm| {
        let state = state(&schema, 2, comm.index());
        CheckpointWriter::new(&schema, &config, &LocalArrayStore).write(&comm, &chk, &state)
    })
    .unwrap();
    assert!(results.iter().all(|res| res.is_err()));
}

#[test]
fn negotiated_version_is_kept_for_the_process() {
    let schema = SchemaRegistry::reacting_flow(&[]);
    let config = IoConfig::default();
    let dir = tempfile::tempdir().unwrap();
    write_checkpoint(&schema, &config, dir.path(), 1);

    let mut negotiator = VersionNegotiator::new();
    assert_eq!(
        negotiator.negotiate(&SoloGroup, dir.path()).unwrap(),
        CheckpointVersion::CURRENT
    );
    // A later look at another directory does not ask again.
    let legacy = tempfile::tempdir().unwrap();
    assert_eq!(
        negotiator.negotiate(&SoloGroup, legacy.path()).unwrap(),
        CheckpointVersion::CURRENT
    );
    assert_eq!(negotiator.cached(), Some(CheckpointVersion::CURRENT));
}

#[test]
fn one_broken_participant_fails_the_whole_checkpoint() {
    let schema = SchemaRegistry::reacting_flow(&[]);
    let config = config();
    let dir = tempfile::tempdir().unwrap();

    let results = ThreadGroup::run(2, |comm| {
        let mut state = state(&schema, 2, comm.index());
        if comm.index() == ParticipantIndex(1) {
            state.levels[0].fields.remove(&FieldId(0));
        }
        CheckpointWriter::new(&schema, &config, &LocalArrayStore).write(&comm, dir.path(), &state)
    })
    .unwrap();
    assert!(results.iter().all(|res| res.is_err()), "{results:?}");
    assert!(!dir.path().join("Level_0").exists());
}

#[test]
fn restart_on_more_participants_spreads_the_boxes() {
    let schema = SchemaRegistry::reacting_flow(&["H2", "O2", "N2"]);
    let config = config();
    let dir = tempfile::tempdir().unwrap();
    write_checkpoint(&schema, &config, dir.path(), 1);

    let states = ThreadGroup::run(3, |comm| {
        Restarter::new(&schema, &config, &LocalArrayStore).restart(&comm, dir.path())
    })
    .unwrap()
    .into_iter()
    .collect::<Result<Vec<_>>>()
    .unwrap();

    for (me, state) in states.iter().enumerate() {
        let fine = &state.hierarchy.levels[1].layout;
        assert_eq!(
            fine.owners(),
            &[ParticipantIndex(0), ParticipantIndex(1), ParticipantIndex(2)]
        );
        let owned = state.levels[1].get(FieldId(0)).unwrap().data.fabs().count();
        assert_eq!(owned, 1, "participant {me}");
        assert_primary_restored(state);
    }
}
