//! Writing checkpoints.
//!
//! A checkpoint directory holds:
//!
//! - `PeleCHeader`: the checkpoint version.
//! - `CPUtime`: processing time used so far.
//! - `Diagnostics`: cumulative boundary losses, if tracked.
//! - `body_state.fab`: the embedded body state, if there is one.
//! - `Header`: the grid hierarchy and, per level, the boxes, their
//!   owners and the fields stored.
//! - `Level_<n>/Cell*`: every stored field of level `n` as one array.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;
use tracing::instrument;

use crate::ascii::fmt_real;
use crate::ascii::HeaderLines;
use crate::body_state::BodyStateApplicability;
use crate::body_state::BodyStateCodec;
use crate::comm::Communicator;
use crate::comm::CommunicatorExt;
use crate::comm::ParticipantCount;
use crate::comm::ParticipantIndex;
use crate::config::IoConfig;
use crate::diagnostics::save_cpu_time;
use crate::diagnostics::DiagnosticsLedger;
use crate::diagnostics::DIAGNOSTICS_FILE;
use crate::errors::io_at;
use crate::errors::Result;
use crate::errors::SnapshotError;
use crate::errors::TrackedError;
use crate::fab::BoxLayout;
use crate::fab::MultiFab;
use crate::geometry::SPACEDIM;
use crate::hierarchy::level_data_path;
use crate::hierarchy::level_dir;
use crate::hierarchy::GridHierarchy;
use crate::hierarchy::LevelGrids;
use crate::hierarchy::Preamble;
use crate::job_info::ProvenanceContext;
use crate::job_info::ProvenanceReporter;
use crate::metrics::SnapshotMetrics;
use crate::schema::FieldId;
use crate::schema::SchemaRegistry;
use crate::state::AmrState;
use crate::state::LevelState;
use crate::store::ArrayStore;
use crate::version::write_marker;
use crate::version::CheckpointVersion;
use crate::with_timer;

pub const CHECKPOINT_HEADER_FILE: &str = "Header";

const CHECKPOINT_TAG: &str = "amrsnap-checkpoint-V1";

/// One field as stored in a level's combined array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredField {
    pub name: String,
    pub ncomp: usize,
    pub ngrow: usize,
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelRecord {
    pub grids: LevelGrids,
    /// In the order they appear in the combined array.
    pub fields: Vec<StoredField>,
    /// Relative to the checkpoint directory.
    pub data_path: String,
}

/// Contents of the checkpoint `Header`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointHeader {
    /// Size of the group that wrote the checkpoint.
    pub participants: usize,
    pub cum_time: f64,
    pub levels: Vec<LevelRecord>,
}

impl CheckpointHeader {
    /// Describe `state`, written by `participants`, with the fields
    /// `stored` in the combined arrays.
    pub fn describe(
        state: &AmrState,
        schema: &SchemaRegistry,
        stored: &[FieldId],
        participants: ParticipantCount,
    ) -> Result<Self> {
        if state.levels.len() != state.hierarchy.levels.len() {
            return Err(SnapshotError::SchemaMismatch(format!(
                "hierarchy has {} levels but state holds {}",
                state.hierarchy.levels.len(),
                state.levels.len()
            )));
        }
        let levels = state
            .hierarchy
            .levels
            .iter()
            .zip(&state.levels)
            .enumerate()
            .map(|(level, (grids, level_state))| {
                let fields = stored
                    .iter()
                    .map(|id| {
                        let entry = schema.get(*id).ok_or_else(|| {
                            SnapshotError::SchemaMismatch(format!("no field {id} declared"))
                        })?;
                        let data = level_state.get(*id).ok_or_else(|| {
                            SnapshotError::SchemaMismatch(format!(
                                "level {level} has no `{}` field to store",
                                entry.descriptor.name
                            ))
                        })?;
                        Ok(StoredField {
                            name: entry.descriptor.name.clone(),
                            ncomp: entry.descriptor.ncomp(),
                            ngrow: entry.descriptor.ngrow,
                            time: data.time,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(LevelRecord {
                    grids: grids.clone(),
                    fields,
                    data_path: level_data_path(level),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            participants: participants.0,
            cum_time: state.hierarchy.cum_time,
            levels,
        })
    }

    pub fn hierarchy(&self) -> Result<GridHierarchy> {
        GridHierarchy::new(
            self.cum_time,
            self.levels.iter().map(|record| record.grids.clone()).collect(),
        )
    }

    pub fn render(&self) -> Result<String> {
        let mut out = format!("{CHECKPOINT_TAG}\n{}\n", self.participants);
        self.hierarchy()?.write_preamble(&mut out);
        for (level, record) in self.levels.iter().enumerate() {
            let layout = &record.grids.layout;
            out.push_str(&format!("{level} {}\n", layout.len()));
            out.push_str(&format!("{}\n", record.fields.len()));
            for field in &record.fields {
                out.push_str(&format!(
                    "{} {} {} {}\n",
                    field.name,
                    field.ncomp,
                    field.ngrow,
                    fmt_real(field.time)
                ));
            }
            for (bx, owner) in layout.boxes().iter().zip(layout.owners()) {
                out.push_str(&format!("{bx} {owner}\n"));
            }
            for bx in layout.boxes() {
                let real = record.grids.geom.real_box(bx);
                for dim in 0..SPACEDIM {
                    out.push_str(&format!("{} {}\n", fmt_real(real.lo[dim]), fmt_real(real.hi[dim])));
                }
            }
            out.push_str(&format!("{}\n", record.data_path));
        }
        Ok(out)
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CHECKPOINT_HEADER_FILE);
        let text = fs::read_to_string(&path).map_err(io_at(&path))?;
        let mut lines = HeaderLines::new(&path, &text);
        lines.expect(CHECKPOINT_TAG)?;
        let participants: usize = lines.value()?;
        let preamble = Preamble::read(&mut lines)?;

        let mut levels = Vec::with_capacity(preamble.domains.len());
        for level in 0..preamble.domains.len() {
            let counts: Vec<usize> = lines.exact(2)?;
            if counts[0] != level {
                return Err(lines.error(format!("expected level {level}, found {}", counts[0])));
            }
            let nfields: usize = lines.value()?;
            let mut fields = Vec::new();
            for _ in 0..nfields {
                let line = lines.line()?;
                let parts: Vec<&str> = line.split_whitespace().collect();
                let [name, ncomp, ngrow, time] = parts[..] else {
                    return Err(lines.error(format!("expected `name ncomp ngrow time`, found `{line}`")));
                };
                let bad = |what: &str| lines.error(format!("bad {what} in `{line}`"));
                fields.push(StoredField {
                    name: name.to_string(),
                    ncomp: ncomp.parse().map_err(|_err| bad("component count"))?,
                    ngrow: ngrow.parse().map_err(|_err| bad("ghost width"))?,
                    time: time.parse().map_err(|_err| bad("time"))?,
                });
            }
            // Counts come from disk; grow as lines are actually read.
            let mut boxes = Vec::new();
            let mut owners = Vec::new();
            for _ in 0..counts[1] {
                let line = lines.line()?;
                let (bx, owner) = line
                    .rsplit_once(' ')
                    .ok_or_else(|| lines.error(format!("expected `box owner`, found `{line}`")))?;
                boxes.push(bx.parse()?);
                owners.push(ParticipantIndex(
                    owner
                        .parse()
                        .map_err(|_err| lines.error(format!("bad owner `{owner}`")))?,
                ));
            }
            // Physical bounds follow from the boxes.
            for _ in 0..counts[1] {
                for _ in 0..SPACEDIM {
                    lines.exact::<f64>(2)?;
                }
            }
            let data_path = lines.line()?.to_string();
            levels.push(LevelRecord {
                grids: LevelGrids {
                    geom: preamble.geom(level),
                    layout: BoxLayout::new(boxes, owners)?,
                    steps: preamble.steps[level],
                    ref_ratio: preamble.ref_ratio(level),
                },
                fields,
                data_path,
            });
        }
        Ok(Self {
            participants,
            cum_time: preamble.cum_time,
            levels,
        })
    }
}

/// Concatenate the `stored` fields of a level into one array without
/// ghost cells.
pub(crate) fn combine(
    level: &LevelState,
    layout: &BoxLayout,
    schema: &SchemaRegistry,
    stored: &[FieldId],
    me: ParticipantIndex,
) -> Result<MultiFab> {
    let ncomp = stored
        .iter()
        .filter_map(|id| schema.get(*id))
        .map(|entry| entry.descriptor.ncomp())
        .sum();
    let mut combined = MultiFab::new(layout, ncomp, 0, me);
    let mut dst = 0;
    for id in stored {
        let data = &level
            .get(*id)
            .ok_or_else(|| SnapshotError::SchemaMismatch(format!("level {} lacks field {id}", level.level)))?
            .data;
        MultiFab::copy(&mut combined, data, 0, dst, data.ncomp(), 0)?;
        dst += data.ncomp();
    }
    Ok(combined)
}

/// Writes checkpoints of the current schema version.
pub struct CheckpointWriter<'a> {
    schema: &'a SchemaRegistry,
    config: &'a IoConfig,
    store: &'a dyn ArrayStore,
    provenance: Option<&'a dyn ProvenanceReporter>,
}

impl<'a> CheckpointWriter<'a> {
    pub fn new(schema: &'a SchemaRegistry, config: &'a IoConfig, store: &'a dyn ArrayStore) -> Self {
        Self {
            schema,
            config,
            store,
            provenance: None,
        }
    }

    pub fn with_provenance(mut self, reporter: &'a dyn ProvenanceReporter) -> Self {
        self.provenance = Some(reporter);
        self
    }

    /// Collective. Writes `state` into `dir`, creating it.
    #[instrument(name = "checkpoint", skip_all, fields(participant = comm.index().0, dir = ?dir))]
    pub fn write(&self, comm: &dyn Communicator, dir: &Path, state: &AmrState) -> Result<()> {
        let metrics = SnapshotMetrics::new(comm.index());
        with_timer!(
            metrics.checkpoint_write,
            metrics.labels,
            self.write_all(comm, dir, state, &metrics)
        )
    }

    fn write_all(
        &self,
        comm: &dyn Communicator,
        dir: &Path,
        state: &AmrState,
        metrics: &SnapshotMetrics,
    ) -> Result<()> {
        let stored = self.schema.stored_in(CheckpointVersion::CURRENT);
        // Local checks, but everyone must stop together before the
        // first collective.
        let header = comm.agree(CheckpointHeader::describe(
            state,
            self.schema,
            &stored,
            comm.count(),
        ))?;

        comm.coordinate(|| self.write_metadata(comm, dir, state, &header))?;

        for (level, (grids, level_state)) in state.hierarchy.levels.iter().zip(&state.levels).enumerate() {
            let full_path = dir.join(level_dir(level));
            comm.coordinate(|| {
                fs::create_dir_all(&full_path).map_err(|source| SnapshotError::CreateDirectoryFailed {
                    path: full_path.clone(),
                    source,
                })
            })?;
            // Nobody writes before the directory exists.
            comm.barrier()?;

            let combined =
                comm.agree(combine(level_state, &grids.layout, self.schema, &stored, comm.index()))?;
            self.store
                .write(comm, &combined, &dir.join(level_data_path(level)))
                .reraise("error writing checkpoint level data")?;
            metrics
                .fabs_written
                .add(combined.fabs().count() as u64, &metrics.labels);
            tracing::debug!("Wrote level {level} of checkpoint {dir:?}");
        }
        tracing::info!("Wrote checkpoint {dir:?}");
        Ok(())
    }

    /// Coordinator only.
    fn write_metadata(
        &self,
        comm: &dyn Communicator,
        dir: &Path,
        state: &AmrState,
        header: &CheckpointHeader,
    ) -> Result<()> {
        fs::create_dir_all(dir).map_err(|source| SnapshotError::CreateDirectoryFailed {
            path: dir.to_path_buf(),
            source,
        })?;
        write_marker(dir, CheckpointVersion::CURRENT)?;
        save_cpu_time(dir, state.cpu_time)?;

        if self.config.track_grid_losses {
            let values = state.diagnostics.as_deref().ok_or_else(|| {
                SnapshotError::Config("grid losses are tracked but the state has no diagnostics".to_string())
            })?;
            DiagnosticsLedger::new(self.config.n_lost).save(&dir.join(DIAGNOSTICS_FILE), values)?;
        }

        let applicability =
            BodyStateApplicability::new(self.config.embedded_boundary, CheckpointVersion::CURRENT);
        if applicability.is_active() {
            let expected = self.schema.primary_ncomp();
            let body = state.body_state.as_deref().unwrap_or_default();
            if body.len() != expected {
                return Err(SnapshotError::BodyStateMismatch {
                    expected,
                    found: body.len(),
                });
            }
            BodyStateCodec::write(dir, body, applicability)?;
        }

        let path = dir.join(CHECKPOINT_HEADER_FILE);
        fs::write(&path, header.render()?).map_err(io_at(&path))?;

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
    }
}
