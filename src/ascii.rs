//! Helpers for the plain-text parts of the on-disk formats.

use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use crate::errors::Result;
use crate::errors::SnapshotError;

/// Format a real so that parsing it back gives the same bits.
///
/// Plain decimal in the usual range, exponent notation outside it so
/// tiny times and huge values don't print as hundreds of digits.
pub fn fmt_real(value: f64) -> String {
    let magnitude = value.abs();
    if value == 0.0 || !value.is_finite() || (1e-5..1e16).contains(&magnitude) {
        format!("{value}")
    } else {
        format!("{value:e}")
    }
}

/// Space separated reals with a trailing space, the way the plot
/// header lists per-dimension values.
pub(crate) fn fmt_reals(values: &[f64]) -> String {
    values.iter().map(|v| format!("{} ", fmt_real(*v))).collect()
}

/// Line-at-a-time reader over a text header with error messages
/// pointing at the file and line.
pub(crate) struct HeaderLines<'a> {
    path: PathBuf,
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
    lineno: usize,
}

impl<'a> HeaderLines<'a> {
    pub(crate) fn new(path: &Path, text: &'a str) -> Self {
        Self {
            path: path.to_path_buf(),
            lines: text.lines().enumerate(),
            lineno: 0,
        }
    }

    pub(crate) fn error(&self, reason: impl Into<String>) -> SnapshotError {
        SnapshotError::MalformedHeader {
            path: self.path.clone(),
            reason: format!("line {}: {}", self.lineno, reason.into()),
        }
    }

    pub(crate) fn line(&mut self) -> Result<&'a str> {
        match self.lines.next() {
            Some((index, line)) => {
                self.lineno = index + 1;
                Ok(line.trim_end())
            }
            None => {
                self.lineno += 1;
                Err(self.error("unexpected end of header"))
            }
        }
    }

    /// Parse the whole next line as one value.
    pub(crate) fn value<T: FromStr>(&mut self) -> Result<T> {
        let line = self.line()?;
        line.trim()
            .parse()
            .map_err(|_err| self.error(format!("cannot parse `{line}`")))
    }

    /// Parse the next line as whitespace separated values.
    pub(crate) fn values<T: FromStr>(&mut self) -> Result<Vec<T>> {
        let line = self.line()?;
        line.split_whitespace()
            .map(|token| {
                token
                    .parse()
                    .map_err(|_err| self.error(format!("cannot parse `{token}`")))
            })
            .collect()
    }

    /// Parse the next line as exactly `n` whitespace separated
    /// values.
    pub(crate) fn exact<T: FromStr>(&mut self, n: usize) -> Result<Vec<T>> {
        let values = self.values()?;
        if values.len() != n {
            return Err(self.error(format!("expected {n} values, found {}", values.len())));
        }
        Ok(values)
    }

    /// Check the next line is exactly `expected`.
    pub(crate) fn expect(&mut self, expected: &str) -> Result<()> {
        let line = self.line()?;
        if line != expected {
            return Err(self.error(format!("expected `{expected}`, found `{line}`")));
        }
        Ok(())
    }
}

#[test]
fn fmt_real_round_trips() {
    for value in [0.0, 1.0, -2.5, 0.1 + 0.2, 1e-7, 3.0e-310, 6.02e23, 1e16, 12345.678] {
        let text = fmt_real(value);
        assert_eq!(text.parse::<f64>().unwrap().to_bits(), value.to_bits(), "{text}");
    }
}

#[test]
fn fmt_real_is_short_for_common_values() {
    assert_eq!(fmt_real(1.0), "1");
    assert_eq!(fmt_real(0.0), "0");
    assert_eq!(fmt_real(2.5), "2.5");
    assert_eq!(fmt_real(1e-7), "1e-7");
    assert_eq!(fmt_reals(&[0.0, 1.5]), "0 1.5 ");
}

#[test]
fn header_lines_report_position() {
    let mut lines = HeaderLines::new(Path::new("Header"), "3\nnot-a-number\n");
    assert_eq!(lines.value::<usize>().unwrap(), 3);
    let err = lines.value::<usize>().unwrap_err();
    assert!(err.to_string().contains("line 2"), "{err}");
}
