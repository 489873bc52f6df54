//! A group with a single participant.
//!
//! Every collective is a no-op that returns the caller's own payload.

use super::Communicator;
use super::ParticipantCount;
use super::ParticipantIndex;
use super::COORDINATOR;
use crate::errors::Result;
use crate::errors::SnapshotError;

#[derive(Debug, Default, Clone, Copy)]
pub struct SoloGroup;

impl Communicator for SoloGroup {
    fn index(&self) -> ParticipantIndex {
        COORDINATOR
    }

    fn count(&self) -> ParticipantCount {
        ParticipantCount(1)
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }

    fn broadcast_bytes(&self, root: ParticipantIndex, payload: Option<Vec<u8>>) -> Result<Vec<u8>> {
        if root != COORDINATOR {
            return Err(SnapshotError::Collective(format!(
                "broadcast root {root} is outside a group of one"
            )));
        }
        payload.ok_or_else(|| SnapshotError::Collective("broadcast without payload".to_string()))
    }

    fn gather_bytes(
        &self,
        root: ParticipantIndex,
        payload: Vec<u8>,
    ) -> Result<Option<Vec<Vec<u8>>>> {
        if root != COORDINATOR {
            return Err(SnapshotError::Collective(format!(
                "gather root {root} is outside a group of one"
            )));
        }
        Ok(Some(vec![payload]))
    }
}
