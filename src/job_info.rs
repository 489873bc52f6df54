//! Human readable record of the run that produced a snapshot.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::comm::ParticipantCount;
use crate::config::IoConfig;
use crate::errors::io_at;
use crate::errors::Result;
use crate::geometry::SPACEDIM;
use crate::hierarchy::GridHierarchy;

pub const JOB_INFO_FILE: &str = "job_info";

const PRETTY_LINE: &str =
    "===============================================================================\n";

/// What the snapshot writers know about the run at write time.
pub struct ProvenanceContext<'a> {
    pub participants: ParticipantCount,
    /// Processing time used so far, in seconds.
    pub cpu_time: f64,
    pub hierarchy: &'a GridHierarchy,
    pub config: &'a IoConfig,
}

/// Writes provenance next to a snapshot. Only the coordinator calls
/// this.
pub trait ProvenanceReporter {
    fn report(&self, dir: &Path, ctx: &ProvenanceContext<'_>) -> Result<()>;
}

/// The `job_info` text file.
#[derive(Debug, Default, Clone, Copy)]
pub struct JobInfo;

impl JobInfo {
    pub fn render(ctx: &ProvenanceContext<'_>) -> Result<String> {
        let mut out = String::new();
        section(&mut out, "Job Information");
        // Writing into a String cannot fail.
        let _ = write!(
            out,
            "job name: {}\n\ninputs file: {}\n\nnumber of participants: {}\n\n\
             CPU time used since start of simulation (CPU-hours): {}\n\n\n",
            ctx.config.job_name,
            ctx.config.inputs_name,
            ctx.participants.0,
            ctx.cpu_time / 3600.0
        );

        section(&mut out, "Plotfile Information");
        let now = chrono::Local::now();
        let _ = writeln!(out, "output date / time: {}", now.format("%a %b %e %H:%M:%S %Y"));
        if let Ok(cwd) = std::env::current_dir() {
            let _ = writeln!(out, "output dir:         {}", cwd.display());
        }
        out.push_str("\n\n");

        section(&mut out, "Build Information");
        let _ = write!(
            out,
            "package: {}\nversion: {}\n\n\n",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        );

        section(&mut out, "Grid Information");
        for (level, grids) in ctx.hierarchy.levels.iter().enumerate() {
            let _ = writeln!(out, " level: {level}");
            let _ = writeln!(out, "   number of boxes = {}", grids.layout.len());
            out.push_str("   maximum zones   = ");
            for dim in 0..SPACEDIM {
                let _ = write!(out, "{} ", grids.geom.domain.length(dim));
            }
            out.push_str("\n\n");
        }
        out.push('\n');

        section(&mut out, "Configuration");
        out.push_str(&serde_json::to_string_pretty(ctx.config)?);
        out.push('\n');
        Ok(out)
    }
}

impl ProvenanceReporter for JobInfo {
    fn report(&self, dir: &Path, ctx: &ProvenanceContext<'_>) -> Result<()> {
        let path = dir.join(JOB_INFO_FILE);
        fs::write(&path, Self::render(ctx)?).map_err(io_at(&path))
    }
}

fn section(out: &mut String, title: &str) {
    out.push_str(PRETTY_LINE);
    out.push(' ');
    out.push_str(title);
    out.push('\n');
    out.push_str(PRETTY_LINE);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fab::BoxLayout;
    use crate::geometry::Geometry;
    use crate::geometry::IndexBox;
    use crate::hierarchy::LevelGrids;

    #[test]
    fn job_info_lists_run_and_grids() {
        let domain = IndexBox::new([0, 0, 0], [31, 15, 7]);
        let hierarchy = GridHierarchy::new(
            0.0,
            vec![LevelGrids {
                geom: Geometry::new(domain, [0.0; 3], [1.0; 3]),
                layout: BoxLayout::round_robin(vec![domain], ParticipantCount(2)),
                steps: 0,
                ref_ratio: 1,
            }],
        )
        .unwrap();
        let config = IoConfig {
            job_name: "flame".to_string(),
            inputs_name: "inputs.3d".to_string(),
            ..IoConfig::default()
        };
        let ctx = ProvenanceContext {
            participants: ParticipantCount(2),
            cpu_time: 7200.0,
            hierarchy: &hierarchy,
            config: &config,
        };
        let dir = tempfile::tempdir().unwrap();
        JobInfo.report(dir.path(), &ctx).unwrap();

        let text = fs::read_to_string(dir.path().join(JOB_INFO_FILE)).unwrap();
        assert!(text.starts_with(PRETTY_LINE));
        assert!(text.contains("job name: flame\n"));
        assert!(text.contains("inputs file: inputs.3d\n"));
        assert!(text.contains("number of participants: 2\n"));
        assert!(text.contains("(CPU-hours): 2\n"));
        assert!(text.contains("   maximum zones   = 32 16 8 \n"));
        assert!(text.contains("\"job_name\": \"flame\""));
    }
}
