//! Collective persistence of distributed arrays.
//!
//! Snapshot code only decides *where* a level's array goes; how the
//! bytes are laid out is up to the [`ArrayStore`] in use.

use std::path::Path;

use crate::comm::Communicator;
use crate::errors::Result;
use crate::fab::BoxLayout;
use crate::fab::MultiFab;

pub mod local;

pub use local::LocalArrayStore;

/// Collective write and read of a [`MultiFab`] keyed by grid
/// ownership.
///
/// Both calls are collective: every participant must make them, with
/// the same `path`, in the same order.
pub trait ArrayStore {
    /// Every participant writes the fabs it owns under `path`. The
    /// directory containing `path` must already exist.
    fn write(&self, comm: &dyn Communicator, mf: &MultiFab, path: &Path) -> Result<()>;

    /// Every participant reads the fabs `layout` assigns it. The
    /// boxes must be the ones that were written, ownership may
    /// differ.
    fn read(&self, comm: &dyn Communicator, layout: &BoxLayout, path: &Path) -> Result<MultiFab>;
}
