//! Bringing a restored level up to the current field schema.

use tracing::instrument;

use crate::comm::ParticipantIndex;
use crate::errors::Result;
use crate::errors::SnapshotError;
use crate::fab::MultiFab;
use crate::schema::FieldId;
use crate::schema::Migration;
use crate::schema::SchemaRegistry;
use crate::state::LevelState;
use crate::state::StateData;

/// Fills in the declared fields a checkpoint did not contain.
pub struct StateRestorer<'a> {
    schema: &'a SchemaRegistry,
}

impl<'a> StateRestorer<'a> {
    pub fn new(schema: &'a SchemaRegistry) -> Self {
        Self { schema }
    }

    /// Synthesize every declared field missing from `level`, in
    /// declaration order, and return the ones that were synthesized.
    ///
    /// A synthesized field takes its layout, ghost width and time from
    /// its antecedent and starts as a copy of the antecedent's
    /// overlapping components; any further components are zero. Since
    /// fields are handled in order, an antecedent may itself have been
    /// synthesized. `me` is the participant whose boxes get allocated.
    #[instrument(name = "reconcile", skip_all, fields(level = level.level))]
    pub fn reconcile(&self, level: &mut LevelState, me: ParticipantIndex) -> Result<Vec<FieldId>> {
        let mut synthesized = Vec::new();
        for (id, entry) in self.schema.fields() {
            if level.fields.contains_key(&id) {
                continue;
            }
            let name = &entry.descriptor.name;
            let state = match entry.migration {
                Migration::CopyAntecedent => {
                    let antecedent = self
                        .schema
                        .antecedent(id)
                        .and_then(|prev| level.fields.get(&prev))
                        .ok_or_else(|| SnapshotError::NoAntecedent(name.clone()))?;
                    copy_antecedent(antecedent, entry.descriptor.ncomp(), me)?
                }
            };
            tracing::debug!("Synthesized field {name} ({id}) on level {}", level.level);
            level.fields.insert(id, state);
            synthesized.push(id);
        }
        Ok(synthesized)
    }
}

fn copy_antecedent(antecedent: &StateData, ncomp: usize, me: ParticipantIndex) -> Result<StateData> {
    let src = &antecedent.data;
    let mut data = MultiFab::new(src.layout(), ncomp, src.ngrow(), me);
    let shared = ncomp.min(src.ncomp());
    MultiFab::copy(&mut data, src, 0, 0, shared, src.ngrow())?;
    Ok(StateData {
        time: antecedent.time,
        data,
    })
}
