//! Which field groups exist and which checkpoint versions store
//! them.
//!
//! Adding a field group that older checkpoints lack is a data change:
//! declare it with [`Persistence::Since`] and a [`Migration`], and
//! restarts from older checkpoints synthesize it.

use serde::Deserialize;
use serde::Serialize;

use crate::version::CheckpointVersion;

/// IDs a field group by its position in declaration order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldId(pub usize);

impl std::fmt::Display for FieldId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// Where a field's values live in a cell.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexType {
    Cell,
    Node,
}

/// One logical field group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    /// One name per component.
    pub components: Vec<String>,
    pub ngrow: usize,
    pub index_type: IndexType,
}

impl FieldDescriptor {
    pub fn cell(name: &str, components: &[&str], ngrow: usize) -> Self {
        Self {
            name: name.to_string(),
            components: components.iter().map(|c| c.to_string()).collect(),
            ngrow,
            index_type: IndexType::Cell,
        }
    }

    pub fn ncomp(&self) -> usize {
        self.components.len()
    }
}

/// Which checkpoint versions contain a field.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Persistence {
    Always,
    /// Stored by this version and every later one.
    Since(CheckpointVersion),
    /// Never written; always rebuilt on restart.
    Never,
}

impl Persistence {
    pub fn stored_in(&self, version: CheckpointVersion) -> bool {
        match self {
            Persistence::Always => true,
            Persistence::Since(first) => version >= *first,
            Persistence::Never => false,
        }
    }
}

/// How to fill a field a checkpoint does not contain.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Migration {
    /// Allocate like the preceding field in declaration order and copy
    /// its data. Not physically meaningful; the solver overwrites it.
    CopyAntecedent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldEntry {
    pub descriptor: FieldDescriptor,
    pub persistence: Persistence,
    pub migration: Migration,
}

/// Every field group, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaRegistry {
    entries: Vec<FieldEntry>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conserved state plus a never-stored work estimate.
    ///
    /// The state holds density, momenta, total and internal energy,
    /// temperature, then one partial density `rho_<species>` per
    /// species.
    pub fn reacting_flow(species: &[&str]) -> Self {
        let mut components = vec![
            "density".to_string(),
            "xmom".to_string(),
            "ymom".to_string(),
            "zmom".to_string(),
            "rho_E".to_string(),
            "rho_e".to_string(),
            "Temp".to_string(),
        ];
        components.extend(species.iter().map(|name| format!("rho_{name}")));

        let mut schema = Self::new();
        schema.declare(
            FieldDescriptor {
                name: "State".to_string(),
                components,
                ngrow: 0,
                index_type: IndexType::Cell,
            },
            Persistence::Always,
            Migration::CopyAntecedent,
        );
        schema.declare(
            FieldDescriptor::cell("Work_Estimate", &["WorkEstimate"], 0),
            Persistence::Never,
            Migration::CopyAntecedent,
        );
        schema
    }

    pub fn declare(
        &mut self,
        descriptor: FieldDescriptor,
        persistence: Persistence,
        migration: Migration,
    ) -> FieldId {
        self.entries.push(FieldEntry {
            descriptor,
            persistence,
            migration,
        });
        FieldId(self.entries.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: FieldId) -> Option<&FieldEntry> {
        self.entries.get(id.0)
    }

    pub fn fields(&self) -> impl Iterator<Item = (FieldId, &FieldEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, entry)| (FieldId(index), entry))
    }

    pub fn find(&self, name: &str) -> Option<FieldId> {
        self.fields()
            .find(|(_, entry)| entry.descriptor.name == name)
            .map(|(id, _)| id)
    }

    /// The field immediately preceding `id` in declaration order.
    pub fn antecedent(&self, id: FieldId) -> Option<FieldId> {
        id.0.checked_sub(1).map(FieldId)
    }

    /// Per field: was it stored in a checkpoint of `version`?
    pub fn presence(&self, version: CheckpointVersion) -> Vec<(FieldId, bool)> {
        self.fields()
            .map(|(id, entry)| (id, entry.persistence.stored_in(version)))
            .collect()
    }

    /// Fields a checkpoint of `version` contains, in order.
    pub fn stored_in(&self, version: CheckpointVersion) -> Vec<FieldId> {
        self.presence(version)
            .into_iter()
            .filter_map(|(id, present)| present.then_some(id))
            .collect()
    }

    /// Component count of the primary (first declared) field.
    pub fn primary_ncomp(&self) -> usize {
        self.entries
            .first()
            .map(|entry| entry.descriptor.ncomp())
            .unwrap_or(0)
    }
}

#[test]
fn work_estimate_is_never_stored() {
    let schema = SchemaRegistry::reacting_flow(&["O2", "N2"]);
    for version in [CheckpointVersion::LEGACY, CheckpointVersion::CURRENT] {
        assert_eq!(
            schema.presence(version),
            vec![(FieldId(0), true), (FieldId(1), false)]
        );
    }
    assert_eq!(schema.primary_ncomp(), 9);
    assert_eq!(schema.find("Work_Estimate"), Some(FieldId(1)));
    assert_eq!(schema.antecedent(FieldId(1)), Some(FieldId(0)));
    assert_eq!(schema.antecedent(FieldId(0)), None);
}

#[test]
fn fields_added_later_are_absent_from_older_versions() {
    let mut schema = SchemaRegistry::reacting_flow(&[]);
    let added = schema.declare(
        FieldDescriptor::cell("Source", &["S"], 1),
        Persistence::Since(CheckpointVersion(2)),
        Migration::CopyAntecedent,
    );
    assert!(!schema.stored_in(CheckpointVersion(1)).contains(&added));
    assert!(schema.stored_in(CheckpointVersion(2)).contains(&added));
    assert!(schema.stored_in(CheckpointVersion(3)).contains(&added));
}
