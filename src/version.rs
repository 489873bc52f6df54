//! Checkpoint format versions.
//!
//! The version lets new code restart from checkpoints written by
//! older code. It is stored in a one line marker file in the
//! checkpoint directory. Changes per version:
//!
//! - 0: no marker file (legacy checkpoints).
//! - 1: adds the body state of embedded boundary runs.

use std::fs;
use std::io;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;
use tracing::instrument;

use crate::comm::Communicator;
use crate::comm::CommunicatorExt;
use crate::errors::io_at;
use crate::errors::Result;
use crate::errors::SnapshotError;

/// Name of the marker file inside a checkpoint directory.
pub const VERSION_MARKER_FILE: &str = "PeleCHeader";

const VERSION_LABEL: &str = "Checkpoint version";

/// Format version of a checkpoint.
///
/// Only increases over the life of the software.
#[derive(
    Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct CheckpointVersion(pub u32);

impl CheckpointVersion {
    /// Checkpoints that predate versioning.
    pub const LEGACY: CheckpointVersion = CheckpointVersion(0);
    /// First version that stores the body state.
    pub const BODY_STATE: CheckpointVersion = CheckpointVersion(1);
    /// What this code writes.
    pub const CURRENT: CheckpointVersion = CheckpointVersion(1);
}

impl std::fmt::Display for CheckpointVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// Parse the marker text: a label, a colon, then a leading integer.
///
/// Anything after the integer is ignored.
pub fn parse_marker(text: &str) -> Result<CheckpointVersion, String> {
    let (label, rest) = text
        .split_once(':')
        .ok_or_else(|| "missing `:` after the version label".to_string())?;
    if label.trim() != VERSION_LABEL {
        tracing::warn!("Unexpected checkpoint version label {label:?}");
    }
    let rest = rest.trim_start();
    let digits: &str = &rest[..rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len())];
    digits
        .parse()
        .map(CheckpointVersion)
        .map_err(|_err| format!("expected a version number after `:`, found {rest:?}"))
}

/// Read the marker in `dir`. A missing marker means
/// [`CheckpointVersion::LEGACY`].
pub fn read_marker(dir: &Path) -> Result<CheckpointVersion> {
    let path = dir.join(VERSION_MARKER_FILE);
    match fs::read_to_string(&path) {
        Ok(text) => {
            parse_marker(&text).map_err(|reason| SnapshotError::MalformedVersion { path, reason })
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            tracing::info!("No {VERSION_MARKER_FILE} in {dir:?}; assuming legacy checkpoint");
            Ok(CheckpointVersion::LEGACY)
        }
        Err(err) => Err(io_at(&path)(err)),
    }
}

pub fn write_marker(dir: &Path, version: CheckpointVersion) -> Result<()> {
    let path = dir.join(VERSION_MARKER_FILE);
    fs::write(&path, format!("{VERSION_LABEL}: {version}\n")).map_err(io_at(&path))
}

/// Works out the version of the checkpoint being restarted from,
/// once per process.
///
/// Owned by whatever drives the restart; the first [`negotiate`]
/// reads the marker on the coordinator and broadcasts it, later
/// calls return the cached value without touching the disk.
///
/// [`negotiate`]: VersionNegotiator::negotiate
#[derive(Debug, Default)]
pub struct VersionNegotiator {
    cached: Option<CheckpointVersion>,
}

impl VersionNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached(&self) -> Option<CheckpointVersion> {
        self.cached
    }

    /// Collective on the first call, local afterwards.
    #[instrument(name = "negotiate_version", skip_all, fields(participant = comm.index().0))]
    pub fn negotiate<C>(&mut self, comm: &C, dir: &Path) -> Result<CheckpointVersion>
    where
        C: Communicator + ?Sized,
    {
        if let Some(version) = self.cached {
            return Ok(version);
        }
        let version = comm.coordinate(|| read_marker(dir))?;
        tracing::info!("Restarting from checkpoint version {version}");
        self.cached = Some(version);
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SoloGroup;
    use crate::comm::ThreadGroup;

    #[test]
    fn missing_marker_is_legacy() {
        let dir = tempfile::tempdir().unwrap();
        let mut negotiator = VersionNegotiator::new();
        let version = negotiator.negotiate(&SoloGroup, dir.path()).unwrap();
        assert_eq!(version, CheckpointVersion(0));
    }

    #[test]
    fn marker_version_is_read() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(VERSION_MARKER_FILE), "Checkpoint version: 1\n").unwrap();
        let mut negotiator = VersionNegotiator::new();
        assert_eq!(
            negotiator.negotiate(&SoloGroup, dir.path()).unwrap(),
            CheckpointVersion(1)
        );
    }

    #[test]
    fn negotiation_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        write_marker(dir.path(), CheckpointVersion(1)).unwrap();
        let mut negotiator = VersionNegotiator::new();
        let first = negotiator.negotiate(&SoloGroup, dir.path()).unwrap();

        fs::write(dir.path().join(VERSION_MARKER_FILE), "Checkpoint version: 7\n").unwrap();
        let second = negotiator.negotiate(&SoloGroup, dir.path()).unwrap();

        fs::remove_file(dir.path().join(VERSION_MARKER_FILE)).unwrap();
        let third = negotiator.negotiate(&SoloGroup, dir.path()).unwrap();

        assert_eq!(first, CheckpointVersion(1));
        assert_eq!(second, first);
        assert_eq!(third, first);
    }

    #[test]
    fn malformed_marker_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(VERSION_MARKER_FILE), "Checkpoint version: one\n").unwrap();
        let err = VersionNegotiator::new()
            .negotiate(&SoloGroup, dir.path())
            .unwrap_err();
        assert!(matches!(err, SnapshotError::MalformedVersion { .. }), "{err}");
    }

    #[test]
    fn parse_marker_takes_leading_integer() {
        assert_eq!(parse_marker("Checkpoint version: 12 trailing"), Ok(CheckpointVersion(12)));
        assert_eq!(parse_marker("Checkpoint version:3"), Ok(CheckpointVersion(3)));
        assert!(parse_marker("Checkpoint version 3").is_err());
        assert!(parse_marker("Checkpoint version: -1").is_err());
        assert!(parse_marker("").is_err());
    }

    #[test]
    fn every_participant_sees_coordinator_version() {
        let dir = tempfile::tempdir().unwrap();
        write_marker(dir.path(), CheckpointVersion(1)).unwrap();
        let path = dir.path().to_path_buf();
        let versions = ThreadGroup::run(4, |comm| {
            let mut negotiator = VersionNegotiator::new();
            negotiator.negotiate(&comm, &path).unwrap()
        })
        .unwrap();
        assert_eq!(versions, vec![CheckpointVersion(1); 4]);
    }
}
