//! Writing plot files for visualization tools.
//!
//! A plot directory holds a single text `Header` describing the
//! variables and the grid hierarchy, then `Level_<n>/Cell*` with every
//! plotted variable of level `n` as one array. Readers depend on the
//! exact order of the header lines.

use std::fs;
use std::path::Path;

use tracing::instrument;

use crate::ascii::fmt_real;
use crate::comm::Communicator;
use crate::comm::CommunicatorExt;
use crate::config::IoConfig;
use crate::errors::io_at;
use crate::errors::Result;
use crate::errors::SnapshotError;
use crate::errors::TrackedError;
use crate::fab::MultiFab;
use crate::geometry::SPACEDIM;
use crate::hierarchy::level_data_path;
use crate::hierarchy::level_dir;
use crate::job_info::ProvenanceContext;
use crate::job_info::ProvenanceReporter;
use crate::metrics::SnapshotMetrics;
use crate::plot_vars::DeriveInput;
use crate::plot_vars::DeriveList;
use crate::plot_vars::ParticleSource;
use crate::plot_vars::PlotSelection;
use crate::plot_vars::PlotVariableList;
use crate::schema::FieldId;
use crate::schema::SchemaRegistry;
use crate::state::AmrState;
use crate::store::ArrayStore;
use crate::with_timer;

pub const PLOT_HEADER_FILE: &str = "Header";

/// Format tag on the first header line. Bump whenever the header
/// layout changes.
pub fn plot_file_type(embedded_boundary: bool) -> &'static str {
    if embedded_boundary {
        "CartGrid-V2.0"
    } else {
        "HyperCLaw-V1.1"
    }
}

pub struct PlotMetadataWriter<'a> {
    schema: &'a SchemaRegistry,
    derives: &'a DeriveList,
    config: &'a IoConfig,
    store: &'a dyn ArrayStore,
    provenance: Option<&'a dyn ProvenanceReporter>,
    particles: Option<&'a dyn ParticleSource>,
    /// Per level.
    volume_fraction: Option<&'a [MultiFab]>,
}

impl<'a> PlotMetadataWriter<'a> {
    pub fn new(
        schema: &'a SchemaRegistry,
        derives: &'a DeriveList,
        config: &'a IoConfig,
        store: &'a dyn ArrayStore,
    ) -> Self {
        Self {
            schema,
            derives,
            config,
            store,
            provenance: None,
            particles: None,
            volume_fraction: None,
        }
    }

    pub fn with_provenance(mut self, reporter: &'a dyn ProvenanceReporter) -> Self {
        self.provenance = Some(reporter);
        self
    }

    pub fn with_particles(mut self, particles: &'a dyn ParticleSource) -> Self {
        self.particles = Some(particles);
        self
    }

    pub fn with_volume_fraction(mut self, per_level: &'a [MultiFab]) -> Self {
        self.volume_fraction = Some(per_level);
        self
    }

    /// The variables a plot of `selection` would hold.
    pub fn variables(&self, selection: &PlotSelection) -> PlotVariableList {
        PlotVariableList::build(self.schema, self.derives, selection, self.particles.is_some())
    }

    /// Collective. Writes a full plot file of `selection` into `dir`.
    #[instrument(name = "plot", skip_all, fields(participant = comm.index().0, dir = ?dir))]
    pub fn write(
        &self,
        comm: &dyn Communicator,
        dir: &Path,
        state: &AmrState,
        selection: &PlotSelection,
    ) -> Result<()> {
        let vars = self.variables(selection);
        self.write_vars(comm, dir, state, &vars)
    }

    /// Collective. Writes the small plot file: only the state
    /// variables selected for it.
    #[instrument(name = "small_plot", skip_all, fields(participant = comm.index().0, dir = ?dir))]
    pub fn write_small(
        &self,
        comm: &dyn Communicator,
        dir: &Path,
        state: &AmrState,
        selection: &PlotSelection,
    ) -> Result<()> {
        let vars = PlotVariableList::small(self.schema, selection);
        self.write_vars(comm, dir, state, &vars)
    }

    fn write_vars(
        &self,
        comm: &dyn Communicator,
        dir: &Path,
        state: &AmrState,
        vars: &PlotVariableList,
    ) -> Result<()> {
        // Same answer on every participant, so everyone stops here.
        if vars.is_empty() {
            return Err(SnapshotError::NoPlotVariables);
        }
        let metrics = SnapshotMetrics::new(comm.index());
        with_timer!(metrics.plot_write, metrics.labels, {
            let header = self.render_header(state, vars);
            comm.coordinate(|| {
                fs::create_dir_all(dir).map_err(|source| SnapshotError::CreateDirectoryFailed {
                    path: dir.to_path_buf(),
                    source,
                })?;
                let path = dir.join(PLOT_HEADER_FILE);
                fs::write(&path, &header).map_err(io_at(&path))?;
                if let Some(reporter) = self.provenance {
                    reporter.report(
                        dir,
                        &ProvenanceContext {
                            participants: comm.count(),
                            cpu_time: state.cpu_time,
                            hierarchy: &state.hierarchy,
                            config: self.config,
                        },
                    )?;
                }
                Ok(())
            })?;
            self.write_levels(comm, dir, state, vars, &metrics)
        })
    }

    fn write_levels(
        &self,
        comm: &dyn Communicator,
        dir: &Path,
        state: &AmrState,
        vars: &PlotVariableList,
        metrics: &SnapshotMetrics,
    ) -> Result<()> {
        for level in 0..state.hierarchy.levels.len() {
            let full_path = dir.join(level_dir(level));
            comm.coordinate(|| {
                fs::create_dir_all(&full_path).map_err(|source| SnapshotError::CreateDirectoryFailed {
                    path: full_path.clone(),
                    source,
                })
            })?;
            // Nobody writes before the directory exists.
            comm.barrier()?;

            let plot_mf = comm.agree(self.assemble(comm, state, level, vars))?;
            self.store
                .write(comm, &plot_mf, &dir.join(level_data_path(level)))
                .reraise("error writing plot level data")?;
            metrics
                .fabs_written
                .add(plot_mf.fabs().count() as u64, &metrics.labels);
        }
        tracing::info!("Wrote plot file {dir:?} with {} variables", vars.len());
        Ok(())
    }

    /// One array of every plot variable on `level`, without ghost
    /// cells.
    fn assemble(
        &self,
        comm: &dyn Communicator,
        state: &AmrState,
        level: usize,
        vars: &PlotVariableList,
    ) -> Result<MultiFab> {
        let grids = &state.hierarchy.levels[level];
        let level_state = state.levels.get(level).ok_or_else(|| {
            SnapshotError::SchemaMismatch(format!("no state for level {level}"))
        })?;
        let mut plot_mf = MultiFab::new(&grids.layout, vars.len(), 0, comm.index());
        let mut dst = 0;
        for (id, comp) in &vars.state {
            let field = level_state.get(*id).ok_or_else(|| {
                SnapshotError::SchemaMismatch(format!("level {level} lacks field {id}"))
            })?;
            MultiFab::copy(&mut plot_mf, &field.data, *comp, dst, 1, 0)?;
            dst += 1;
        }
        let input = DeriveInput {
            level,
            geom: &grids.geom,
            layout: &grids.layout,
            state: level_state,
            schema: self.schema,
            particles: self.particles,
            volume_fraction: self.volume_fraction.and_then(|per_level| per_level.get(level)),
            me: comm.index(),
        };
        for name in &vars.derived {
            let rec = self
                .derives
                .get(name)
                .ok_or_else(|| SnapshotError::Config(format!("unknown derived variable {name}")))?;
            let derived = (rec.func)(&input)?;
            MultiFab::copy(&mut plot_mf, &derived, 0, dst, rec.plot_ncomp(), 0)?;
            dst += rec.plot_ncomp();
        }
        Ok(plot_mf)
    }

    /// The whole header, every level included.
    pub fn render_header(&self, state: &AmrState, vars: &PlotVariableList) -> String {
        let hierarchy = &state.hierarchy;
        let mut out = format!("{}\n", plot_file_type(self.config.embedded_boundary));
        out.push_str(&format!("{}\n", vars.len()));
        for name in vars.names() {
            out.push_str(&format!("{name}\n"));
        }
        hierarchy.write_preamble(&mut out);
        // No boundary data.
        out.push_str("0\n");

        for (level, grids) in hierarchy.levels.iter().enumerate() {
            let time = state
                .levels
                .get(level)
                .and_then(|level_state| level_state.get(FieldId(0)))
                .map(|primary| primary.time)
                .unwrap_or(hierarchy.cum_time);
            out.push_str(&format!(
                "{level} {} {}\n",
                grids.layout.len(),
                fmt_real(time)
            ));
            out.push_str(&format!("{}\n", grids.steps));
            for bx in grids.layout.boxes() {
                let real = grids.geom.real_box(bx);
                for dim in 0..SPACEDIM {
                    out.push_str(&format!("{} {}\n", fmt_real(real.lo[dim]), fmt_real(real.hi[dim])));
                }
            }
            out.push_str(&format!("{}\n", level_data_path(level)));
            if self.config.embedded_boundary && level == hierarchy.finest_level() {
                out.push_str(&format!("{}\n", fmt_real(self.config.vfrac_eps)));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::ParticipantCount;
    use crate::comm::ParticipantIndex;
    use crate::comm::SoloGroup;
    use crate::fab::BoxLayout;
    use crate::geometry::Geometry;
    use crate::geometry::IndexBox;
    use crate::hierarchy::GridHierarchy;
    use crate::hierarchy::LevelGrids;
    use crate::store::LocalArrayStore;

    fn state(schema: &SchemaRegistry) -> AmrState {
        let domain = IndexBox::new([0, 0, 0], [3, 3, 3]);
        let hierarchy = GridHierarchy::new(
            0.25,
            vec![LevelGrids {
                geom: Geometry::new(domain, [0.0; 3], [1.0; 3]),
                layout: BoxLayout::round_robin(vec![domain], ParticipantCount(1)),
                steps: 2,
                ref_ratio: 1,
            }],
        )
        .unwrap();
        AmrState::allocate(hierarchy, schema, ParticipantIndex(0))
    }

    #[test]
    fn plot_file_type_depends_on_embedded_boundary() {
        assert_eq!(plot_file_type(false), "HyperCLaw-V1.1");
        assert_eq!(plot_file_type(true), "CartGrid-V2.0");
    }

    #[test]
    fn header_of_single_level_plot() {
        let schema = SchemaRegistry::reacting_flow(&[]);
        let derives = DeriveList::new();
        let config = IoConfig::default();
        let writer = PlotMetadataWriter::new(&schema, &derives, &config, &LocalArrayStore);
        let mut selection = PlotSelection::default();
        selection.add_state("Temp");
        selection.add_state("density");

        let header = writer.render_header(&state(&schema), &writer.variables(&selection));
        assert_eq!(
            header,
            "HyperCLaw-V1.1\n2\ndensity\nTemp\n3\n0.25\n0\n0 0 0 \n1 1 1 \n\n\
             ((0,0,0) (3,3,3) (0,0,0)) \n2 \n0.25 0.25 0.25 \n0\n0\n\
             0 1 0.25\n2\n0 1\n0 1\n0 1\nLevel_0/Cell\n"
        );
    }

    #[test]
    fn embedded_boundary_header_ends_with_vfrac_eps() {
        let schema = SchemaRegistry::reacting_flow(&[]);
        let derives = DeriveList::new();
        let config = IoConfig {
            embedded_boundary: true,
            ..IoConfig::default()
        };
        let writer = PlotMetadataWriter::new(&schema, &derives, &config, &LocalArrayStore);
        let header =
            writer.render_header(&state(&schema), &writer.variables(&PlotSelection::all_state(&schema)));
        assert!(header.starts_with("CartGrid-V2.0\n8\n"));
        assert!(header.ends_with("Level_0/Cell\n1e-6\n"));
    }

    #[test]
    fn empty_selection_writes_nothing() {
        let schema = SchemaRegistry::reacting_flow(&[]);
        let derives = DeriveList::new();
        let config = IoConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let plt = dir.path().join("plt00000");

        let err = PlotMetadataWriter::new(&schema, &derives, &config, &LocalArrayStore)
            .write(&SoloGroup, &plt, &state(&schema), &PlotSelection::default())
            .unwrap_err();
        assert!(matches!(err, SnapshotError::NoPlotVariables));
        assert!(!plt.exists());
    }
}
