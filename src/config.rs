//! Run configuration that affects what snapshots contain.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use crate::errors::io_at;
use crate::errors::Result;
use crate::errors::SnapshotError;

/// Which extra variables go into plot files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    /// Plot the embedded boundary volume fraction. Unset means "when
    /// there is an embedded boundary".
    pub plot_vfrac: Option<bool>,
    pub plot_cost: bool,
    /// Plot the per-species partial densities.
    pub plot_rhoy: bool,
    pub plot_massfrac: bool,
    pub plot_molefrac: bool,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            plot_vfrac: None,
            plot_cost: true,
            plot_rhoy: true,
            plot_massfrac: false,
            plot_molefrac: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Keep cumulative boundary losses in checkpoints.
    pub track_grid_losses: bool,
    /// Number of tracked loss channels.
    pub n_lost: usize,
    /// Embedded boundary geometry is present in the domain.
    pub embedded_boundary: bool,
    /// Smallest volume fraction treated as fluid, recorded in plot
    /// headers of embedded boundary runs.
    pub vfrac_eps: f64,
    pub job_name: String,
    pub inputs_name: String,
    pub plot: PlotConfig,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            track_grid_losses: false,
            n_lost: 8,
            embedded_boundary: false,
            vfrac_eps: 1e-6,
            job_name: String::new(),
            inputs_name: String::new(),
            plot: PlotConfig::default(),
        }
    }
}

impl IoConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(io_at(path))?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.track_grid_losses && self.n_lost == 0 {
            return Err(SnapshotError::Config(
                "tracking grid losses needs at least one loss channel".to_string(),
            ));
        }
        if !(self.vfrac_eps.is_finite() && self.vfrac_eps > 0.0) {
            return Err(SnapshotError::Config(format!(
                "vfrac_eps must be finite and positive, got {}",
                self.vfrac_eps
            )));
        }
        Ok(())
    }

    /// Whether the volume fraction gets plotted.
    pub fn plot_vfrac(&self) -> bool {
        self.plot.plot_vfrac.unwrap_or(self.embedded_boundary)
    }
}

#[test]
fn empty_json_gives_defaults() {
    assert_eq!(IoConfig::from_json_str("{}").unwrap(), IoConfig::default());
}

#[test]
fn nested_plot_options_parse() {
    let config = IoConfig::from_json_str(
        r#"{"embedded_boundary": true, "plot": {"plot_rhoy": false, "plot_vfrac": false}}"#,
    )
    .unwrap();
    assert!(!config.plot.plot_rhoy);
    assert!(config.plot.plot_cost);
    assert!(!config.plot_vfrac());
    assert!(IoConfig::from_json_str(r#"{"embedded_boundary": true}"#)
        .unwrap()
        .plot_vfrac());
}

#[test]
fn invalid_values_are_rejected() {
    let err = IoConfig::from_json_str(r#"{"track_grid_losses": true, "n_lost": 0}"#).unwrap_err();
    assert!(matches!(err, SnapshotError::Config(_)));
    assert!(IoConfig::from_json_str(r#"{"vfrac_eps": -1.0}"#).is_err());
    assert!(IoConfig::from_json_str(r#"{"n_lost": "eight"}"#).is_err());
}
