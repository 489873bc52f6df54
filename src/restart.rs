//! Rebuilding the simulation state from a checkpoint.

use std::path::Path;

use tracing::instrument;

use crate::body_state::BodyStateApplicability;
use crate::body_state::BodyStateCodec;
use crate::checkpoint::CheckpointHeader;
use crate::checkpoint::StoredField;
use crate::comm::Communicator;
use crate::comm::CommunicatorExt;
use crate::comm::ParticipantIndex;
use crate::config::IoConfig;
use crate::diagnostics::restore_cpu_time_collective;
use crate::diagnostics::DiagnosticsLedger;
use crate::errors::Result;
use crate::errors::SnapshotError;
use crate::errors::TrackedError;
use crate::fab::BoxLayout;
use crate::fab::MultiFab;
use crate::metrics::SnapshotMetrics;
use crate::restore::StateRestorer;
use crate::schema::FieldId;
use crate::schema::SchemaRegistry;
use crate::state::AmrState;
use crate::state::LevelState;
use crate::state::StateData;
use crate::store::ArrayStore;
use crate::version::CheckpointVersion;
use crate::version::VersionNegotiator;
use crate::with_timer;

/// Drives a restart. Owns the version negotiated for this process.
pub struct Restarter<'a> {
    schema: &'a SchemaRegistry,
    config: &'a IoConfig,
    store: &'a dyn ArrayStore,
    negotiator: VersionNegotiator,
}

impl<'a> Restarter<'a> {
    pub fn new(schema: &'a SchemaRegistry, config: &'a IoConfig, store: &'a dyn ArrayStore) -> Self {
        Self {
            schema,
            config,
            store,
            negotiator: VersionNegotiator::new(),
        }
    }

    /// Version of the checkpoint restarted from, once known.
    pub fn version(&self) -> Option<CheckpointVersion> {
        self.negotiator.cached()
    }

    /// Collective.
    #[instrument(name = "restart", skip_all, fields(participant = comm.index().0, dir = ?dir))]
    pub fn restart(&mut self, comm: &dyn Communicator, dir: &Path) -> Result<AmrState> {
        let metrics = SnapshotMetrics::new(comm.index());
        with_timer!(metrics.restart, metrics.labels, self.restore_all(comm, dir))
    }

    fn restore_all(&mut self, comm: &dyn Communicator, dir: &Path) -> Result<AmrState> {
        let version = self.negotiator.negotiate(comm, dir)?;
        let header = comm.coordinate(|| CheckpointHeader::load(dir))?;
        let mut hierarchy = header.hierarchy()?;
        // Ownership recorded by a group of another size is dealt out
        // again over this one.
        let foreign_owner = hierarchy
            .levels
            .iter()
            .flat_map(|grids| grids.layout.owners())
            .any(|owner| owner.0 >= comm.count().0);
        if header.participants != comm.count().0 || foreign_owner {
            tracing::info!(
                "Checkpoint written by {} participants, restarting on {}",
                header.participants,
                comm.count().0
            );
            for grids in &mut hierarchy.levels {
                grids.layout = BoxLayout::round_robin(grids.layout.boxes().to_vec(), comm.count());
            }
        }

        let stored = self.schema.stored_in(version);
        let restorer = StateRestorer::new(self.schema);
        let mut levels = Vec::with_capacity(header.levels.len());
        for (level, (record, grids)) in header.levels.iter().zip(&hierarchy.levels).enumerate() {
            self.check_fields(level, version, &record.fields, &stored)?;
            let combined = self
                .store
                .read(comm, &grids.layout, &dir.join(&record.data_path))
                .reraise("error reading checkpoint level data")?;
            let (level_state, synthesized) = comm.agree(
                self.split(level, &combined, &record.fields, &stored, comm.index())
                    .and_then(|mut level_state| {
                        let synthesized = restorer.reconcile(&mut level_state, comm.index())?;
                        Ok((level_state, synthesized))
                    }),
            )?;
            if !synthesized.is_empty() {
                tracing::info!("Synthesized {} fields on level {level}", synthesized.len());
            }
            levels.push(level_state);
        }

        let cpu_time = restore_cpu_time_collective(comm, dir)?;
        let diagnostics = if self.config.track_grid_losses {
            Some(DiagnosticsLedger::new(self.config.n_lost).restore_collective(comm, dir)?)
        } else {
            None
        };
        let body_state = BodyStateCodec::read_collective(
            comm,
            dir,
            self.schema.primary_ncomp(),
            BodyStateApplicability::new(self.config.embedded_boundary, version),
        )?;

        tracing::info!("Restarted from {dir:?} at time {}", hierarchy.cum_time);
        Ok(AmrState {
            hierarchy,
            levels,
            cpu_time,
            diagnostics,
            body_state,
        })
    }

    /// The header must list exactly the fields the schema says a
    /// checkpoint of `version` holds.
    fn check_fields(
        &self,
        level: usize,
        version: CheckpointVersion,
        fields: &[StoredField],
        stored: &[FieldId],
    ) -> Result<()> {
        let expected: Vec<(&str, usize)> = stored
            .iter()
            .filter_map(|id| self.schema.get(*id))
            .map(|entry| (entry.descriptor.name.as_str(), entry.descriptor.ncomp()))
            .collect();
        let found: Vec<(&str, usize)> = fields
            .iter()
            .map(|field| (field.name.as_str(), field.ncomp))
            .collect();
        if expected != found {
            return Err(SnapshotError::SchemaMismatch(format!(
                "level {level} of a version {version} checkpoint holds {found:?}, expected {expected:?}"
            )));
        }
        Ok(())
    }

    /// Cut a level's combined array back into its fields.
    fn split(
        &self,
        level: usize,
        combined: &MultiFab,
        fields: &[StoredField],
        stored: &[FieldId],
        me: ParticipantIndex,
    ) -> Result<LevelState> {
        let total: usize = fields.iter().map(|field| field.ncomp).sum();
        if combined.ncomp() != total {
            return Err(SnapshotError::SchemaMismatch(format!(
                "level {level} data holds {} components, header lists {total}",
                combined.ncomp()
            )));
        }
        let mut state = LevelState::new(level);
        let mut src = 0;
        for (id, field) in stored.iter().zip(fields) {
            let ngrow = self
                .schema
                .get(*id)
                .map(|entry| entry.descriptor.ngrow)
                .unwrap_or(field.ngrow);
            let mut data = MultiFab::new(combined.layout(), field.ncomp, ngrow, me);
            MultiFab::copy(&mut data, combined, src, 0, field.ncomp, 0)?;
            src += field.ncomp;
            state.fields.insert(
                *id,
                StateData {
                    time: field.time,
                    data,
                },
            );
        }
        Ok(state)
    }
}
