use std::fs;

use amrsnap::comm::ParticipantCount;
use amrsnap::comm::ParticipantIndex;
use amrsnap::fab::BoxLayout;
use amrsnap::fab::Fab;
use amrsnap::geometry::Geometry;
use amrsnap::geometry::IndexBox;
use amrsnap::hierarchy::GridHierarchy;
use amrsnap::hierarchy::LevelGrids;
use amrsnap::plot::PLOT_HEADER_FILE;
use amrsnap::plot_vars::DeriveList;
use amrsnap::plot_vars::ParticleSource;
use amrsnap::plot_vars::PlotSelection;
use amrsnap::schema::FieldId;
use amrsnap::*;

const SPECIES: [(&str, f64); 2] = [("O2", 32.0), ("N2", 28.0)];

fn hierarchy(participants: usize) -> GridHierarchy {
    let domain = IndexBox::new([0, 0, 0], [7, 3, 3]);
    GridHierarchy::new(
        2.0e-3,
        vec![LevelGrids {
            geom: Geometry::new(domain, [0.0; 3], [2.0, 1.0, 1.0]),
            layout: BoxLayout::round_robin(
                vec![
                    IndexBox::new([0, 0, 0], [3, 3, 3]),
                    IndexBox::new([4, 0, 0], [7, 3, 3]),
                ],
                ParticipantCount(participants),
            ),
            steps: 40,
            ref_ratio: 1,
        }],
    )
    .unwrap()
}

fn state(schema: &SchemaRegistry, participants: usize, me: ParticipantIndex) -> AmrState {
    let mut state = AmrState::allocate(hierarchy(participants), schema, me);
    let primary = state.levels[0].get_mut(FieldId(0)).unwrap();
    let owned: Vec<usize> = primary.data.fabs().map(|(index, _)| index).collect();
    for index in owned {
        let fab = primary.data.fab_mut(index).unwrap();
        // density, momenta and partial densities.
        fab.component_mut(0).fill(2.0);
        fab.component_mut(1).fill(4.0);
        fab.component_mut(7).fill(0.5);
        fab.component_mut(8).fill(1.5);
    }
    state
}

struct OnePerCell;

impl ParticleSource for OnePerCell {
    fn cell_counts(&self, _level: usize, bx: &IndexBox) -> Fab {
        let mut counts = Fab::new(*bx, 1);
        counts.set_val(1.0);
        counts
    }
}

fn selection() -> PlotSelection {
    let mut selection = PlotSelection::default();
    for name in ["density", "Temp", "rho_O2"] {
        selection.add_state(name);
    }
    for name in ["x_velocity", "massfrac", "particle_count"] {
        selection.add_derive(name);
    }
    selection
}

#[test]
fn header_lists_variables_then_grids() {
    let schema = SchemaRegistry::reacting_flow(&["O2", "N2"]);
    let derives = DeriveList::reacting_flow(&SPECIES);
    let config = IoConfig::default();
    let dir = tempfile::tempdir().unwrap();

    PlotMetadataWriter::new(&schema, &derives, &config, &LocalArrayStore)
        .write(&SoloGroup, dir.path(), &state(&schema, 1, ParticipantIndex(0)), &selection())
        .unwrap();

    let header = fs::read_to_string(dir.path().join(PLOT_HEADER_FILE)).unwrap();
    let lines: Vec<&str> = header.lines().collect();
    assert_eq!(
        lines[..8],
        [
            "HyperCLaw-V1.1",
            "6",
            "density",
            "Temp",
            "rho_O2",
            "x_velocity",
            "Y(O2)",
            "Y(N2)",
        ]
    );
    assert_eq!(lines[8], "3");
    assert_eq!(lines[9], "0.002");
    assert_eq!(lines[10], "0");
    assert!(header.ends_with("Level_0/Cell\n"));
    assert!(header.contains("\n0 2 0.002\n40\n"));
    assert!(dir.path().join("Level_0").is_dir());
}

#[test]
fn particle_variables_follow_the_particle_subsystem() {
    let schema = SchemaRegistry::reacting_flow(&["O2", "N2"]);
    let derives = DeriveList::reacting_flow(&SPECIES);
    let config = IoConfig::default();
    let state = state(&schema, 1, ParticipantIndex(0));

    let without = PlotMetadataWriter::new(&schema, &derives, &config, &LocalArrayStore);
    assert!(!without
        .variables(&selection())
        .names()
        .contains(&"particle_count".to_string()));

    let dir = tempfile::tempdir().unwrap();
    let with = PlotMetadataWriter::new(&schema, &derives, &config, &LocalArrayStore)
        .with_particles(&OnePerCell);
    let vars = with.variables(&selection());
    assert_eq!(vars.names().last().map(String::as_str), Some("particle_count"));
    with.write(&SoloGroup, dir.path(), &state, &selection()).unwrap();

    let layout = &state.hierarchy.levels[0].layout;
    let plotted = LocalArrayStore
        .read(&SoloGroup, layout, &dir.path().join("Level_0/Cell"))
        .unwrap();
    assert_eq!(plotted.ncomp(), vars.len());
    for (_, fab) in plotted.fabs() {
        assert!(fab.component(0).iter().all(|v| *v == 2.0));
        // x_velocity is xmom / density.
        assert!(fab.component(3).iter().all(|v| *v == 2.0));
        assert!(fab.component(4).iter().all(|v| *v == 0.25));
        assert!(fab.component(5).iter().all(|v| *v == 0.75));
        assert!(fab.component(6).iter().all(|v| *v == 1.0));
    }
}

#[test]
fn nothing_selected_leaves_no_level_directories() {
    let schema = SchemaRegistry::reacting_flow(&[]);
    let derives = DeriveList::reacting_flow(&[]);
    let config = IoConfig::default();
    let dir = tempfile::tempdir().unwrap();
    let plt = dir.path().join("plt00040");

    let results = ThreadGroup::run(2, |comm| {
        let state = state_without_species(&schema, comm.index());
        PlotMetadataWriter::new(&schema, &derives, &config, &LocalArrayStore).write(
            &comm,
            &plt,
            &state,
            &PlotSelection::default(),
        )
    })
    .unwrap();
    for res in results {
        assert!(matches!(res, Err(SnapshotError::NoPlotVariables)));
    }
    assert!(!plt.join("Level_0").exists());
}

fn state_without_species(schema: &SchemaRegistry, me: ParticipantIndex) -> AmrState {
    AmrState::allocate(hierarchy(2), schema, me)
}

#[test]
fn small_plot_holds_only_its_state_variables() {
    let schema = SchemaRegistry::reacting_flow(&["O2", "N2"]);
    let derives = DeriveList::reacting_flow(&SPECIES);
    let config = IoConfig::default();
    let dir = tempfile::tempdir().unwrap();
    let mut selection = selection();
    selection.small_state_vars.insert("Temp".to_string());

    ThreadGroup::run(2, |comm| {
        let state = state(&schema, 2, comm.index());
        PlotMetadataWriter::new(&schema, &derives, &config, &LocalArrayStore).write_small(
            &comm,
            dir.path(),
            &state,
            &selection,
        )
    })
    .unwrap()
    .into_iter()
    .collect::<Result<Vec<()>>>()
    .unwrap();

    let header = fs::read_to_string(dir.path().join(PLOT_HEADER_FILE)).unwrap();
    assert!(header.starts_with("HyperCLaw-V1.1\n1\nTemp\n3\n"));
}
