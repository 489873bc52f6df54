//! Message passing between the participants of a run.
//!
//! Every participant runs the same program in lockstep. Metadata I/O
//! is done by a single designated participant, the coordinator, and
//! its result is distributed with a blocking broadcast. Bulk data is
//! written collectively, partitioned by grid ownership.
//!
//! Remember! Every participant must make the same sequence of
//! collective calls in the same order. A participant that skips or
//! reorders a call hangs the whole group; nothing here can detect
//! that.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;

use crate::errors::Result;
use crate::errors::SnapshotError;

pub mod solo;
pub mod thread_group;

pub use solo::SoloGroup;
pub use thread_group::ThreadGroup;

/// Index of a participant in the group.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantIndex(pub usize);

impl std::fmt::Display for ParticipantIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// Total number of participants in the group.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantCount(pub usize);

impl ParticipantCount {
    /// Return an iter of all participants.
    pub fn iter(&self) -> impl Iterator<Item = ParticipantIndex> {
        (0..self.0).map(ParticipantIndex)
    }
}

/// The participant that does all the scalar and text I/O.
pub const COORDINATOR: ParticipantIndex = ParticipantIndex(0);

/// Byte-level collective primitives.
///
/// Kept object safe so snapshot code can take `&dyn Communicator`;
/// the typed versions live in [`CommunicatorExt`].
pub trait Communicator {
    fn index(&self) -> ParticipantIndex;

    fn count(&self) -> ParticipantCount;

    /// Block until every participant has reached this call.
    fn barrier(&self) -> Result<()>;

    /// Distribute `payload` from `root` to everyone.
    ///
    /// `root` must pass `Some`; everyone else's payload is ignored.
    fn broadcast_bytes(&self, root: ParticipantIndex, payload: Option<Vec<u8>>) -> Result<Vec<u8>>;

    /// Collect one payload from each participant on `root`, in
    /// participant order. Non-root participants get `None`.
    fn gather_bytes(&self, root: ParticipantIndex, payload: Vec<u8>)
        -> Result<Option<Vec<Vec<u8>>>>;

    fn is_coordinator(&self) -> bool {
        self.index() == COORDINATOR
    }
}

/// Outcome of a coordinator phase, as sent over the wire.
#[derive(Debug, Serialize, Deserialize)]
enum PhaseOutcome<T> {
    Done(T),
    Failed(String),
}

/// Typed collectives on top of any [`Communicator`].
pub trait CommunicatorExt: Communicator {
    fn broadcast<T>(&self, root: ParticipantIndex, value: Option<&T>) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let payload = if self.index() == root {
            let value = value.ok_or_else(|| {
                SnapshotError::Collective(format!("broadcast root {root} has no value to send"))
            })?;
            Some(serde_json::to_vec(value)?)
        } else {
            None
        };
        let bytes = self.broadcast_bytes(root, payload)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn gather<T>(&self, root: ParticipantIndex, value: &T) -> Result<Option<Vec<T>>>
    where
        T: Serialize + DeserializeOwned,
    {
        let payload = serde_json::to_vec(value)?;
        self.gather_bytes(root, payload)?
            .map(|all| {
                all.iter()
                    .map(|bytes| serde_json::from_slice(bytes).map_err(SnapshotError::from))
                    .collect::<Result<Vec<T>>>()
            })
            .transpose()
    }

    /// Run `phase` on the coordinator only and hand its result to
    /// every participant.
    ///
    /// A failure on the coordinator is broadcast too, so the other
    /// participants return [`SnapshotError::Coordinator`] instead of
    /// waiting forever on the next collective. The coordinator itself
    /// returns its original error.
    fn coordinate<T, F>(&self, phase: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        if self.is_coordinator() {
            match phase() {
                Ok(value) => {
                    let outcome = PhaseOutcome::Done(value);
                    let bytes = serde_json::to_vec(&outcome)?;
                    self.broadcast_bytes(COORDINATOR, Some(bytes))?;
                    match outcome {
                        PhaseOutcome::Done(value) => Ok(value),
                        PhaseOutcome::Failed(msg) => Err(SnapshotError::Coordinator(msg)),
                    }
                }
                Err(err) => {
                    tracing::error!("Coordinator phase failed: {err}");
                    let outcome: PhaseOutcome<T> = PhaseOutcome::Failed(err.to_string());
                    self.broadcast_bytes(COORDINATOR, Some(serde_json::to_vec(&outcome)?))?;
                    Err(err)
                }
            }
        } else {
            let bytes = self.broadcast_bytes(COORDINATOR, None)?;
            match serde_json::from_slice::<PhaseOutcome<T>>(&bytes)? {
                PhaseOutcome::Done(value) => Ok(value),
                PhaseOutcome::Failed(msg) => Err(SnapshotError::Coordinator(msg)),
            }
        }
    }

    /// Turn a result each participant computed on its own into one
    /// every participant agrees on.
    ///
    /// Use after purely local work (like reading owned boxes) that is
    /// followed by more collectives: if anyone failed, everyone fails
    /// together with the first failure in participant order.
    fn agree<T>(&self, local: Result<T>) -> Result<T> {
        let failure = local.as_ref().err().map(|err| err.to_string());
        let failures = self.gather(COORDINATOR, &failure)?;
        let verdict = self.coordinate(|| {
            let first = failures.into_iter().flatten().enumerate().find_map(
                |(index, failure)| failure.map(|msg| format!("participant {index}: {msg}")),
            );
            match first {
                Some(msg) => Err(SnapshotError::Collective(msg)),
                None => Ok(()),
            }
        });
        match (local, verdict) {
            (Err(err), _) => Err(err),
            (Ok(_), Err(err)) => Err(err),
            (Ok(value), Ok(())) => Ok(value),
        }
    }
}

impl<C> CommunicatorExt for C where C: Communicator + ?Sized {}
