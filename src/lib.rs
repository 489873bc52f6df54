//! Checkpoint, restart and plot snapshots for block-structured
//! adaptive mesh refinement simulations.
//!
//! Every participant of a run calls the same collective operations in
//! the same order over a [`comm::Communicator`]. The coordinator does
//! the shared directory and metadata work and broadcasts its outcome,
//! so a failure anywhere becomes the same error everywhere.
//!
//! Checkpoints carry a version marker. Restarting negotiates that
//! version once per process; it decides which fields were stored and
//! whether the embedded boundary body state is present. Fields a
//! checkpoint lacks are synthesized from the fields declared before
//! them.

pub mod ascii;
pub mod body_state;
pub mod checkpoint;
pub mod comm;
pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod fab;
pub mod geometry;
pub mod hierarchy;
pub mod job_info;
#[macro_use]
pub mod metrics;
pub mod plot;
pub mod plot_vars;
pub mod restart;
pub mod restore;
pub mod schema;
pub mod state;
pub mod store;
pub mod tracing;
pub mod version;

pub use crate::checkpoint::CheckpointWriter;
pub use crate::comm::Communicator;
pub use crate::comm::CommunicatorExt;
pub use crate::comm::SoloGroup;
pub use crate::comm::ThreadGroup;
pub use crate::config::IoConfig;
pub use crate::errors::Result;
pub use crate::errors::SnapshotError;
pub use crate::plot::PlotMetadataWriter;
pub use crate::restart::Restarter;
pub use crate::schema::SchemaRegistry;
pub use crate::state::AmrState;
pub use crate::store::ArrayStore;
pub use crate::store::LocalArrayStore;
pub use crate::version::CheckpointVersion;
