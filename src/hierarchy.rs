//! The refinement levels of a run and the text preamble that
//! describes them in plot and checkpoint headers.

use serde::Deserialize;
use serde::Serialize;

use crate::ascii::fmt_real;
use crate::ascii::fmt_reals;
use crate::ascii::HeaderLines;
use crate::errors::Result;
use crate::errors::SnapshotError;
use crate::fab::BoxLayout;
use crate::geometry::CoordSys;
use crate::geometry::Geometry;
use crate::geometry::IndexBox;
use crate::geometry::SPACEDIM;

/// Directory holding the bulk data of level `level`.
pub fn level_dir(level: usize) -> String {
    format!("Level_{level}")
}

/// Path of a level's bulk data relative to the snapshot directory.
pub fn level_data_path(level: usize) -> String {
    format!("{}/Cell", level_dir(level))
}

/// Grids of one refinement level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelGrids {
    pub geom: Geometry,
    pub layout: BoxLayout,
    /// Time steps taken on this level so far.
    pub steps: u64,
    /// Refinement ratio to the next coarser level; 1 on level 0.
    pub ref_ratio: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridHierarchy {
    /// Cumulative simulation time.
    pub cum_time: f64,
    pub levels: Vec<LevelGrids>,
}

impl GridHierarchy {
    pub fn new(cum_time: f64, levels: Vec<LevelGrids>) -> Result<Self> {
        if levels.is_empty() {
            return Err(SnapshotError::Config(
                "a grid hierarchy needs at least one level".to_string(),
            ));
        }
        Ok(Self { cum_time, levels })
    }

    pub fn finest_level(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn level(&self, level: usize) -> Option<&LevelGrids> {
        self.levels.get(level)
    }

    /// Coarsest geometry, which carries the physical domain and the
    /// coordinate system for every level.
    pub fn base_geom(&self) -> &Geometry {
        &self.levels[0].geom
    }

    /// Append the hierarchy description, from the dimensionality up
    /// to the coordinate system tag, one item per line.
    pub(crate) fn write_preamble(&self, out: &mut String) {
        let base = self.base_geom();
        out.push_str(&format!("{SPACEDIM}\n"));
        out.push_str(&format!("{}\n", fmt_real(self.cum_time)));
        out.push_str(&format!("{}\n", self.finest_level()));
        out.push_str(&format!("{}\n", fmt_reals(&base.prob_lo)));
        out.push_str(&format!("{}\n", fmt_reals(&base.prob_hi)));
        for level in &self.levels[1..] {
            out.push_str(&format!("{} ", level.ref_ratio));
        }
        out.push('\n');
        for level in &self.levels {
            out.push_str(&format!("{} ", level.geom.domain));
        }
        out.push('\n');
        for level in &self.levels {
            out.push_str(&format!("{} ", level.steps));
        }
        out.push('\n');
        for level in &self.levels {
            out.push_str(&format!("{}\n", level.geom.fmt_cell_size()));
        }
        out.push_str(&format!("{}\n", base.coord.tag()));
    }
}

/// What [`GridHierarchy::write_preamble`] records, read back.
///
/// The box layouts are not part of it; headers list them per level.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Preamble {
    pub(crate) cum_time: f64,
    pub(crate) prob_lo: [f64; SPACEDIM],
    pub(crate) prob_hi: [f64; SPACEDIM],
    pub(crate) ref_ratios: Vec<i64>,
    pub(crate) domains: Vec<IndexBox>,
    pub(crate) steps: Vec<u64>,
    pub(crate) coord: CoordSys,
}

impl Preamble {
    pub(crate) fn read(lines: &mut HeaderLines<'_>) -> Result<Self> {
        let dims: usize = lines.value()?;
        if dims != SPACEDIM {
            return Err(lines.error(format!("written in {dims} dimensions, not {SPACEDIM}")));
        }
        let cum_time = lines.value()?;
        let finest: usize = lines.value()?;
        let nlevels = finest
            .checked_add(1)
            .ok_or_else(|| lines.error(format!("finest level {finest} is out of range")))?;
        let prob_lo = to_dims(lines.exact(SPACEDIM)?);
        let prob_hi = to_dims(lines.exact(SPACEDIM)?);
        let ref_ratios = lines.exact(finest)?;
        let domains = parse_boxes(lines.line()?).map_err(|reason| lines.error(reason))?;
        if domains.len() != nlevels {
            return Err(lines.error(format!(
                "expected {nlevels} domain boxes, found {}",
                domains.len()
            )));
        }
        let steps = lines.exact(nlevels)?;
        for _ in 0..nlevels {
            // Cell sizes follow from the domains; only check the shape.
            lines.exact::<f64>(SPACEDIM)?;
        }
        let tag: i32 = lines.value()?;
        let coord = CoordSys::from_tag(tag)
            .ok_or_else(|| lines.error(format!("unknown coordinate system {tag}")))?;
        Ok(Self {
            cum_time,
            prob_lo,
            prob_hi,
            ref_ratios,
            domains,
            steps,
            coord,
        })
    }

    pub(crate) fn geom(&self, level: usize) -> Geometry {
        Geometry {
            domain: self.domains[level],
            prob_lo: self.prob_lo,
            prob_hi: self.prob_hi,
            coord: self.coord,
        }
    }

    pub(crate) fn ref_ratio(&self, level: usize) -> i64 {
        match level {
            0 => 1,
            level => self.ref_ratios[level - 1],
        }
    }
}

fn to_dims(values: Vec<f64>) -> [f64; SPACEDIM] {
    let mut out = [0.0; SPACEDIM];
    out.copy_from_slice(&values);
    out
}

/// Split a line of space separated boxes like
/// `((0,0,0) (7,7,7) (0,0,0)) ((0,0,0) (15,15,15) (0,0,0)) `.
pub(crate) fn parse_boxes(line: &str) -> Result<Vec<IndexBox>, String> {
    line.split("))")
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .map(|piece| {
            format!("{piece}))")
                .parse::<IndexBox>()
                .map_err(|err| err.to_string())
        })
        .collect()
}
