//! Cumulative scalar diagnostics and elapsed processing time.
//!
//! Neither file carries its own length: the number of loss channels
//! is configuration that writer and reader have to agree on.

use std::fs;
use std::path::Path;

use tracing::instrument;

use crate::ascii::fmt_real;
use crate::comm::Communicator;
use crate::comm::CommunicatorExt;
use crate::errors::io_at;
use crate::errors::Result;
use crate::errors::SnapshotError;

pub const DIAGNOSTICS_FILE: &str = "Diagnostics";
pub const CPU_TIME_FILE: &str = "CPUtime";

/// Quantity lost through the domain boundaries, one value per
/// tracked channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticsLedger {
    n_lost: usize,
}

impl DiagnosticsLedger {
    pub fn new(n_lost: usize) -> Self {
        Self { n_lost }
    }

    pub fn len(&self) -> usize {
        self.n_lost
    }

    pub fn is_empty(&self) -> bool {
        self.n_lost == 0
    }

    /// One value per line, in order, precise enough to read back
    /// the same bits.
    pub fn save(&self, path: &Path, values: &[f64]) -> Result<()> {
        if values.len() != self.n_lost {
            return Err(SnapshotError::DiagnosticsLength {
                path: path.to_path_buf(),
                expected: self.n_lost,
                found: values.len(),
            });
        }
        let text: String = values.iter().map(|v| format!("{}\n", fmt_real(*v))).collect();
        fs::write(path, text).map_err(io_at(path))
    }

    /// Read exactly the agreed number of values. Fewer is fatal;
    /// anything past them is ignored.
    pub fn restore(&self, path: &Path) -> Result<Vec<f64>> {
        let text = fs::read_to_string(path).map_err(io_at(path))?;
        let mut tokens = text.split_whitespace();
        let mut values = Vec::with_capacity(self.n_lost);
        for index in 0..self.n_lost {
            let token = tokens.next().ok_or(SnapshotError::DiagnosticsLength {
                path: path.to_path_buf(),
                expected: self.n_lost,
                found: index,
            })?;
            let value = token.parse().map_err(|_err| SnapshotError::MalformedHeader {
                path: path.to_path_buf(),
                reason: format!("diagnostic {index} is not a number: `{token}`"),
            })?;
            values.push(value);
        }
        if tokens.next().is_some() {
            tracing::warn!("Ignoring values past the first {} in {path:?}", self.n_lost);
        }
        Ok(values)
    }

    /// Coordinator reads `<dir>/Diagnostics`, everyone gets the
    /// values.
    #[instrument(name = "restore_diagnostics", skip_all, fields(participant = comm.index().0))]
    pub fn restore_collective<C>(&self, comm: &C, dir: &Path) -> Result<Vec<f64>>
    where
        C: Communicator + ?Sized,
    {
        comm.coordinate(|| self.restore(&dir.join(DIAGNOSTICS_FILE)))
    }
}

pub fn save_cpu_time(dir: &Path, seconds: f64) -> Result<()> {
    let path = dir.join(CPU_TIME_FILE);
    fs::write(&path, fmt_real(seconds)).map_err(io_at(&path))
}

pub fn restore_cpu_time(dir: &Path) -> Result<f64> {
    let path = dir.join(CPU_TIME_FILE);
    let text = fs::read_to_string(&path).map_err(io_at(&path))?;
    text.trim().parse().map_err(|_err| SnapshotError::MalformedHeader {
        path: path.clone(),
        reason: format!("CPU time is not a number: `{}`", text.trim()),
    })
}

/// Coordinator reads the elapsed processing time, everyone gets it.
pub fn restore_cpu_time_collective<C>(comm: &C, dir: &Path) -> Result<f64>
where
    C: Communicator + ?Sized,
{
    let seconds = comm.coordinate(|| restore_cpu_time(dir))?;
    tracing::info!("Read CPU time: {seconds}");
    Ok(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::ThreadGroup;
    use proptest::prelude::*;

    #[test]
    fn restore_reads_agreed_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DIAGNOSTICS_FILE);
        fs::write(&path, "1.0\n2.5\n0.0\n").unwrap();
        let values = DiagnosticsLedger::new(3).restore(&path).unwrap();
        assert_eq!(values, vec![1.0, 2.5, 0.0]);
    }

    #[test]
    fn short_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DIAGNOSTICS_FILE);
        fs::write(&path, "1.0\n2.5\n").unwrap();
        match DiagnosticsLedger::new(3).restore(&path) {
            Err(SnapshotError::DiagnosticsLength {
                expected, found, ..
            }) => assert_eq!((expected, found), (3, 2)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn save_rejects_wrong_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DIAGNOSTICS_FILE);
        assert!(DiagnosticsLedger::new(2).save(&path, &[1.0]).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn cpu_time_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        save_cpu_time(dir.path(), 86400.123456789).unwrap();
        assert_eq!(restore_cpu_time(dir.path()).unwrap(), 86400.123456789);
    }

    #[test]
    fn restore_collective_shares_coordinator_values() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(DIAGNOSTICS_FILE), "0.5\n-1e-12\n").unwrap();
        let path = dir.path().to_path_buf();
        let all = ThreadGroup::run(3, |comm| {
            DiagnosticsLedger::new(2)
                .restore_collective(&comm, &path)
                .unwrap()
        })
        .unwrap();
        assert!(all.iter().all(|values| values == &vec![0.5, -1e-12]));
    }

    proptest! {
        #[test]
        fn save_restore_is_bit_exact(values in prop::collection::vec(any::<f64>().prop_filter("finite", |v| v.is_finite()), 1..16)) {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join(DIAGNOSTICS_FILE);
            let ledger = DiagnosticsLedger::new(values.len());
            ledger.save(&path, &values).unwrap();
            let restored = ledger.restore(&path).unwrap();
            prop_assert_eq!(
                restored.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
                values.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
            );
        }
    }
}
