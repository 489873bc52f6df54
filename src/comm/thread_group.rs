//! In-process participant group.
//!
//! Each participant is a thread. Collectives go through a shared
//! barrier and one byte slot per participant, which is enough for
//! broadcast (the root's slot) and gather (everyone's slot).

use std::sync::Arc;
use std::sync::Barrier;
use std::sync::Mutex;
use std::sync::MutexGuard;

use super::Communicator;
use super::ParticipantCount;
use super::ParticipantIndex;
use crate::errors::prepend_tname;
use crate::errors::Result;
use crate::errors::SnapshotError;

struct Shared {
    barrier: Barrier,
    slots: Vec<Mutex<Option<Vec<u8>>>>,
}

impl Shared {
    fn slot(&self, index: ParticipantIndex) -> Result<MutexGuard<'_, Option<Vec<u8>>>> {
        self.slots
            .get(index.0)
            .ok_or_else(|| SnapshotError::Collective(format!("no participant {index}")))?
            .lock()
            .map_err(|_err| {
                SnapshotError::Collective(format!("slot of participant {index} is poisoned"))
            })
    }
}

/// One participant's handle onto a group of threads.
#[derive(Clone)]
pub struct ThreadGroup {
    index: ParticipantIndex,
    count: ParticipantCount,
    shared: Arc<Shared>,
}

impl ThreadGroup {
    /// Build the handles for a group of `count` participants.
    ///
    /// Each handle must be moved onto its own thread; calling a
    /// collective on two handles from one thread deadlocks.
    pub fn new(count: usize) -> Vec<ThreadGroup> {
        let shared = Arc::new(Shared {
            barrier: Barrier::new(count),
            slots: (0..count).map(|_| Mutex::new(None)).collect(),
        });
        (0..count)
            .map(|index| ThreadGroup {
                index: ParticipantIndex(index),
                count: ParticipantCount(count),
                shared: shared.clone(),
            })
            .collect()
    }

    /// Run `f` once per participant, each on its own scoped thread,
    /// and return the results in participant order.
    pub fn run<F, R>(count: usize, f: F) -> Result<Vec<R>>
    where
        F: Fn(ThreadGroup) -> R + Sync,
        R: Send,
    {
        let f = &f;
        std::thread::scope(|scope| {
            let handles: Vec<_> = Self::new(count)
                .into_iter()
                .map(|comm| {
                    scope.spawn(move || {
                        let span = tracing::info_span!("participant", participant = comm.index.0);
                        span.in_scope(|| f(comm))
                    })
                })
                .collect();

            handles
                .into_iter()
                .enumerate()
                .map(|(index, handle)| {
                    handle.join().map_err(|_panic| {
                        SnapshotError::Collective(prepend_tname(format!(
                            "participant {index} panicked"
                        )))
                    })
                })
                .collect()
        })
    }
}

impl Communicator for ThreadGroup {
    fn index(&self) -> ParticipantIndex {
        self.index
    }

    fn count(&self) -> ParticipantCount {
        self.count
    }

    fn barrier(&self) -> Result<()> {
        self.shared.barrier.wait();
        Ok(())
    }

    fn broadcast_bytes(&self, root: ParticipantIndex, payload: Option<Vec<u8>>) -> Result<Vec<u8>> {
        // A root without a payload still takes part in both barriers so
        // the others fail instead of waiting.
        let missing = self.index == root && payload.is_none();
        if self.index == root {
            *self.shared.slot(root)? = payload;
        }
        self.barrier()?;
        let received = self.shared.slot(root)?.clone();
        // Nobody may reuse the root slot until everyone has read it.
        self.barrier()?;
        if self.index == root {
            self.shared.slot(root)?.take();
        }
        if missing {
            return Err(SnapshotError::Collective(format!(
                "broadcast root {root} sent no payload"
            )));
        }
        received.ok_or_else(|| SnapshotError::Collective(format!("root {root} slot was empty")))
    }

    fn gather_bytes(
        &self,
        root: ParticipantIndex,
        payload: Vec<u8>,
    ) -> Result<Option<Vec<Vec<u8>>>> {
        *self.shared.slot(self.index)? = Some(payload);
        self.barrier()?;
        let gathered = if self.index == root {
            let all = self
                .count
                .iter()
                .map(|index| {
                    self.shared.slot(index)?.take().ok_or_else(|| {
                        SnapshotError::Collective(format!("participant {index} sent nothing"))
                    })
                })
                .collect::<Result<Vec<_>>>();
            Some(all)
        } else {
            None
        };
        self.barrier()?;
        gathered.transpose()
    }
}

#[test]
fn broadcast_reaches_all_participants() {
    let results = ThreadGroup::run(4, |comm| {
        let payload = (comm.index() == ParticipantIndex(2)).then(|| b"version 1".to_vec());
        comm.broadcast_bytes(ParticipantIndex(2), payload).unwrap()
    })
    .unwrap();

    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|bytes| bytes == b"version 1"));
}

#[test]
fn back_to_back_broadcasts_do_not_mix() {
    let results = ThreadGroup::run(3, |comm| {
        let first = comm
            .broadcast_bytes(ParticipantIndex(0), comm.is_coordinator().then(|| vec![1]))
            .unwrap();
        let second = comm
            .broadcast_bytes(ParticipantIndex(0), comm.is_coordinator().then(|| vec![2]))
            .unwrap();
        (first, second)
    })
    .unwrap();

    assert!(results.iter().all(|pair| pair == &(vec![1], vec![2])));
}

#[test]
fn root_without_payload_fails_everyone() {
    let results = ThreadGroup::run(3, |comm| comm.broadcast_bytes(ParticipantIndex(1), None))
        .unwrap();
    assert!(results.iter().all(|res| res.is_err()));
}
