//! In-memory simulation state the snapshots are taken of.

use std::collections::BTreeMap;

use crate::comm::ParticipantIndex;
use crate::fab::MultiFab;
use crate::hierarchy::GridHierarchy;
use crate::schema::FieldId;
use crate::schema::SchemaRegistry;

/// One field group on one level at its current time.
#[derive(Debug, Clone, PartialEq)]
pub struct StateData {
    pub time: f64,
    pub data: MultiFab,
}

/// Every field group held on one level.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelState {
    pub level: usize,
    pub fields: BTreeMap<FieldId, StateData>,
}

impl LevelState {
    pub fn new(level: usize) -> Self {
        Self {
            level,
            fields: BTreeMap::new(),
        }
    }

    /// Zeroed storage for every declared field on `grids`' layout.
    pub fn allocate(
        level: usize,
        hierarchy: &GridHierarchy,
        schema: &SchemaRegistry,
        time: f64,
        me: ParticipantIndex,
    ) -> Self {
        let mut state = Self::new(level);
        if let Some(grids) = hierarchy.level(level) {
            for (id, entry) in schema.fields() {
                let data = MultiFab::new(
                    &grids.layout,
                    entry.descriptor.ncomp(),
                    entry.descriptor.ngrow,
                    me,
                );
                state.fields.insert(id, StateData { time, data });
            }
        }
        state
    }

    pub fn get(&self, id: FieldId) -> Option<&StateData> {
        self.fields.get(&id)
    }

    pub fn get_mut(&mut self, id: FieldId) -> Option<&mut StateData> {
        self.fields.get_mut(&id)
    }

    /// Find a component by name across the held fields.
    pub fn component<'a>(
        &'a self,
        schema: &SchemaRegistry,
        name: &str,
    ) -> Option<(&'a MultiFab, usize)> {
        schema.fields().find_map(|(id, entry)| {
            let comp = entry.descriptor.components.iter().position(|c| c == name)?;
            self.fields.get(&id).map(|state| (&state.data, comp))
        })
    }
}

/// Everything a restart rebuilds.
#[derive(Debug, Clone, PartialEq)]
pub struct AmrState {
    pub hierarchy: GridHierarchy,
    pub levels: Vec<LevelState>,
    /// Processing time used by the run so far, in seconds.
    pub cpu_time: f64,
    /// Cumulative losses through the domain boundary, when tracked.
    pub diagnostics: Option<Vec<f64>>,
    /// State of the embedded body, when there is one.
    pub body_state: Option<Vec<f64>>,
}

impl AmrState {
    /// Zeroed fields on every level of `hierarchy`.
    pub fn allocate(hierarchy: GridHierarchy, schema: &SchemaRegistry, me: ParticipantIndex) -> Self {
        let levels = (0..hierarchy.levels.len())
            .map(|level| LevelState::allocate(level, &hierarchy, schema, hierarchy.cum_time, me))
            .collect();
        Self {
            hierarchy,
            levels,
            cpu_time: 0.0,
            diagnostics: None,
            body_state: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::ParticipantCount;
    use crate::fab::BoxLayout;
    use crate::geometry::Geometry;
    use crate::geometry::IndexBox;
    use crate::hierarchy::LevelGrids;

    #[test]
    fn allocate_covers_every_field() {
        let domain = IndexBox::new([0, 0, 0], [3, 3, 3]);
        let hierarchy = GridHierarchy::new(
            0.0,
            vec![LevelGrids {
                geom: Geometry::new(domain, [0.0; 3], [1.0; 3]),
                layout: BoxLayout::round_robin(vec![domain], ParticipantCount(1)),
                steps: 0,
                ref_ratio: 1,
            }],
        )
        .unwrap();
        let schema = SchemaRegistry::reacting_flow(&["N2"]);
        let state = AmrState::allocate(hierarchy, &schema, ParticipantIndex(0));

        let level = &state.levels[0];
        assert_eq!(level.fields.len(), 2);
        let (mf, comp) = level.component(&schema, "rho_N2").unwrap();
        assert_eq!((mf.ncomp(), comp), (8, 7));
        let (mf, comp) = level.component(&schema, "WorkEstimate").unwrap();
        assert_eq!((mf.ncomp(), comp), (1, 0));
        assert!(level.component(&schema, "pressure").is_none());
    }
}
