//! The state vector of the embedded body.
//!
//! Runs with embedded boundary geometry in the domain keep one
//! state value per component of the primary field for the body
//! itself. It is stored as a single cell fab so the component count
//! travels with the data.

use std::fs;
use std::path::Path;

use tracing::instrument;

use crate::comm::Communicator;
use crate::comm::CommunicatorExt;
use crate::errors::io_at;
use crate::errors::Result;
use crate::errors::SnapshotError;
use crate::fab::Fab;
use crate::fab::FabHeader;
use crate::geometry::IndexBox;
use crate::version::CheckpointVersion;

pub const BODY_STATE_FILE: &str = "body_state.fab";

/// Whether the body state takes part in a checkpoint at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyStateApplicability {
    /// Embedded boundary geometry is actually present in the domain.
    pub embedded_boundary: bool,
    pub version: CheckpointVersion,
}

impl BodyStateApplicability {
    pub fn new(embedded_boundary: bool, version: CheckpointVersion) -> Self {
        Self {
            embedded_boundary,
            version,
        }
    }

    pub fn is_active(&self) -> bool {
        self.embedded_boundary && self.version >= CheckpointVersion::BODY_STATE
    }
}

/// Encodes the body state as a one cell fab.
pub struct BodyStateCodec;

impl BodyStateCodec {
    /// `None` when the body state is not applicable.
    pub fn encode(state: &[f64], applicability: BodyStateApplicability) -> Result<Option<Vec<u8>>> {
        if !applicability.is_active() {
            return Ok(None);
        }
        let fab = Fab::from_data(IndexBox::cell([0, 0, 0]), state.len(), state.to_vec())?;
        Ok(Some(fab.to_bytes()))
    }

    /// Fails unless the blob stores exactly `expected_ncomp`
    /// components.
    pub fn decode(blob: &[u8], expected_ncomp: usize) -> Result<Vec<f64>> {
        let mut reader = blob;
        let header = FabHeader::read(&mut reader)?;
        if header.ncomp != expected_ncomp {
            return Err(SnapshotError::BodyStateMismatch {
                expected: expected_ncomp,
                found: header.ncomp,
            });
        }
        let fab = Fab::read_data(header, reader)?;
        let iv = fab.bx().lo;
        Ok((0..expected_ncomp).map(|n| fab.get(&iv, n)).collect())
    }

    /// Write `<dir>/body_state.fab` if applicable. Returns whether a
    /// file was written.
    pub fn write(dir: &Path, state: &[f64], applicability: BodyStateApplicability) -> Result<bool> {
        match Self::encode(state, applicability)? {
            Some(blob) => {
                let path = dir.join(BODY_STATE_FILE);
                fs::write(&path, blob).map_err(io_at(&path))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Coordinator reads and decodes the body state, everyone gets
    /// it. `None` when not applicable.
    #[instrument(name = "restore_body_state", skip_all, fields(participant = comm.index().0))]
    pub fn read_collective<C>(
        comm: &C,
        dir: &Path,
        expected_ncomp: usize,
        applicability: BodyStateApplicability,
    ) -> Result<Option<Vec<f64>>>
    where
        C: Communicator + ?Sized,
    {
        if !applicability.is_active() {
            return Ok(None);
        }
        let state = comm.coordinate(|| {
            let path = dir.join(BODY_STATE_FILE);
            let blob = fs::read(&path).map_err(io_at(&path))?;
            Self::decode(&blob, expected_ncomp)
        })?;
        Ok(Some(state))
    }
}
