//! Index space boxes and their mapping onto the physical domain.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::ascii::fmt_reals;
use crate::errors::SnapshotError;

/// Spatial dimensionality of the hierarchy.
pub const SPACEDIM: usize = 3;

pub type IntVect = [i64; SPACEDIM];

/// A cell-centered box in index space with inclusive corners.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexBox {
    pub lo: IntVect,
    pub hi: IntVect,
}

impl IndexBox {
    pub fn new(lo: IntVect, hi: IntVect) -> Self {
        Self { lo, hi }
    }

    /// Single cell box.
    pub fn cell(iv: IntVect) -> Self {
        Self { lo: iv, hi: iv }
    }

    pub fn length(&self, dim: usize) -> i64 {
        self.hi[dim] - self.lo[dim] + 1
    }

    pub fn is_empty(&self) -> bool {
        (0..SPACEDIM).any(|dim| self.hi[dim] < self.lo[dim])
    }

    /// Number of cells.
    pub fn num_pts(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        (0..SPACEDIM).map(|dim| self.length(dim) as usize).product()
    }

    /// Number of cells, or `None` when it does not fit in a `usize`.
    pub fn checked_num_pts(&self) -> Option<usize> {
        if self.is_empty() {
            return Some(0);
        }
        (0..SPACEDIM).try_fold(1usize, |pts, dim| {
            let length = self.hi[dim].checked_sub(self.lo[dim])?.checked_add(1)?;
            pts.checked_mul(usize::try_from(length).ok()?)
        })
    }

    pub fn grow(&self, n: i64) -> Self {
        let mut grown = *self;
        for dim in 0..SPACEDIM {
            grown.lo[dim] -= n;
            grown.hi[dim] += n;
        }
        grown
    }

    pub fn refine(&self, ratio: i64) -> Self {
        let mut fine = *self;
        for dim in 0..SPACEDIM {
            fine.lo[dim] = self.lo[dim] * ratio;
            fine.hi[dim] = (self.hi[dim] + 1) * ratio - 1;
        }
        fine
    }

    pub fn contains(&self, iv: &IntVect) -> bool {
        (0..SPACEDIM).all(|dim| self.lo[dim] <= iv[dim] && iv[dim] <= self.hi[dim])
    }

    pub fn intersect(&self, other: &IndexBox) -> Option<IndexBox> {
        let mut both = *self;
        for dim in 0..SPACEDIM {
            both.lo[dim] = self.lo[dim].max(other.lo[dim]);
            both.hi[dim] = self.hi[dim].min(other.hi[dim]);
        }
        (!both.is_empty()).then_some(both)
    }

    /// Column-major offset of `iv` inside this box.
    pub(crate) fn offset(&self, iv: &IntVect) -> usize {
        let mut offset = 0;
        let mut stride = 1;
        for dim in 0..SPACEDIM {
            offset += (iv[dim] - self.lo[dim]) as usize * stride;
            stride *= self.length(dim) as usize;
        }
        offset
    }

    /// All cells, first dimension fastest.
    pub fn cells(&self) -> impl Iterator<Item = IntVect> + '_ {
        let total = self.num_pts();
        (0..total).map(move |mut flat| {
            let mut iv = [0; SPACEDIM];
            for dim in 0..SPACEDIM {
                let len = self.length(dim) as usize;
                iv[dim] = self.lo[dim] + (flat % len) as i64;
                flat /= len;
            }
            iv
        })
    }
}

fn fmt_intvect(iv: &IntVect) -> String {
    let parts: Vec<String> = iv.iter().map(|v| v.to_string()).collect();
    format!("({})", parts.join(","))
}

/// `((lo) (hi) (type))`, with an all-zero cell-centered type.
impl fmt::Display for IndexBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({} {} {})",
            fmt_intvect(&self.lo),
            fmt_intvect(&self.hi),
            fmt_intvect(&[0; SPACEDIM])
        )
    }
}

fn parse_intvect(text: &str) -> Result<IntVect, String> {
    let inner = text
        .trim()
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| format!("`{text}` is not a parenthesized vector"))?;
    let values = inner
        .split(',')
        .map(|v| v.trim().parse::<i64>().map_err(|err| format!("`{v}`: {err}")))
        .collect::<Result<Vec<_>, _>>()?;
    values
        .try_into()
        .map_err(|values: Vec<i64>| format!("expected {SPACEDIM} values, found {}", values.len()))
}

impl FromStr for IndexBox {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: String| SnapshotError::MalformedFab(format!("box `{s}`: {reason}"));
        let inner = s
            .trim()
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| malformed("missing outer parentheses".to_string()))?;
        let parts: Vec<&str> = inner.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(malformed(format!("expected 3 vectors, found {}", parts.len())));
        }
        let lo = parse_intvect(parts[0]).map_err(malformed)?;
        let hi = parse_intvect(parts[1]).map_err(malformed)?;
        let typ = parse_intvect(parts[2]).map_err(malformed)?;
        if typ != [0; SPACEDIM] {
            return Err(malformed("only cell-centered boxes are supported".to_string()));
        }
        Ok(IndexBox { lo, hi })
    }
}

/// Physical extent of a box.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealBox {
    pub lo: [f64; SPACEDIM],
    pub hi: [f64; SPACEDIM],
}

/// Coordinate system tag written into plot headers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordSys {
    Cartesian,
    RZ,
    Spherical,
}

impl CoordSys {
    pub fn tag(&self) -> i32 {
        match self {
            CoordSys::Cartesian => 0,
            CoordSys::RZ => 1,
            CoordSys::Spherical => 2,
        }
    }

    pub fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            0 => Some(CoordSys::Cartesian),
            1 => Some(CoordSys::RZ),
            2 => Some(CoordSys::Spherical),
            _ => None,
        }
    }
}

/// Problem domain of one level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub domain: IndexBox,
    pub prob_lo: [f64; SPACEDIM],
    pub prob_hi: [f64; SPACEDIM],
    pub coord: CoordSys,
}

impl Geometry {
    pub fn new(domain: IndexBox, prob_lo: [f64; SPACEDIM], prob_hi: [f64; SPACEDIM]) -> Self {
        Self {
            domain,
            prob_lo,
            prob_hi,
            coord: CoordSys::Cartesian,
        }
    }

    pub fn cell_size(&self) -> [f64; SPACEDIM] {
        let mut dx = [0.0; SPACEDIM];
        for dim in 0..SPACEDIM {
            dx[dim] = (self.prob_hi[dim] - self.prob_lo[dim]) / self.domain.length(dim) as f64;
        }
        dx
    }

    /// Physical bounds of `bx` on this level.
    pub fn real_box(&self, bx: &IndexBox) -> RealBox {
        let dx = self.cell_size();
        let mut real = RealBox {
            lo: [0.0; SPACEDIM],
            hi: [0.0; SPACEDIM],
        };
        for dim in 0..SPACEDIM {
            real.lo[dim] = self.prob_lo[dim] + dx[dim] * bx.lo[dim] as f64;
            real.hi[dim] = self.prob_lo[dim] + dx[dim] * (bx.hi[dim] + 1) as f64;
        }
        real
    }

    /// The same physical domain at a finer resolution.
    pub fn refine(&self, ratio: i64) -> Self {
        Self {
            domain: self.domain.refine(ratio),
            ..self.clone()
        }
    }

    pub(crate) fn fmt_cell_size(&self) -> String {
        fmt_reals(&self.cell_size())
    }
}

#[test]
fn box_text_form_round_trips() {
    let bx = IndexBox::new([0, -2, 4], [31, 15, 7]);
    let text = bx.to_string();
    assert_eq!(text, "((0,-2,4) (31,15,7) (0,0,0))");
    assert_eq!(text.parse::<IndexBox>().unwrap(), bx);
}

#[test]
fn box_parse_rejects_nodal_type() {
    assert!("((0,0,0) (3,3,3) (1,0,0))".parse::<IndexBox>().is_err());
    assert!("((0,0) (3,3) (0,0))".parse::<IndexBox>().is_err());
}

#[test]
fn box_cells_walk_first_dimension_fastest() {
    let bx = IndexBox::new([0, 0, 0], [1, 1, 0]);
    let cells: Vec<_> = bx.cells().collect();
    assert_eq!(cells, vec![[0, 0, 0], [1, 0, 0], [0, 1, 0], [1, 1, 0]]);
    for (flat, iv) in cells.iter().enumerate() {
        assert_eq!(bx.offset(iv), flat);
    }
}

#[test]
fn real_box_covers_cells() {
    let geom = Geometry::new(
        IndexBox::new([0, 0, 0], [7, 7, 7]),
        [0.0, 0.0, 0.0],
        [1.0, 2.0, 4.0],
    );
    let real = geom.real_box(&IndexBox::new([2, 0, 4], [3, 7, 7]));
    assert_eq!(real.lo, [0.25, 0.0, 2.0]);
    assert_eq!(real.hi, [0.5, 2.0, 4.0]);
    assert_eq!(geom.refine(2).cell_size(), [0.0625, 0.125, 0.25]);
}
