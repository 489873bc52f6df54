//! Multi-component array data on boxes.
//!
//! A [`Fab`] is the data of one box; a [`MultiFab`] is one
//! participant's share of the fabs of a [`BoxLayout`].

use std::collections::BTreeMap;
use std::io::BufRead;
use std::io::Read;
use std::io::Write;

use serde::Deserialize;
use serde::Serialize;

use crate::comm::ParticipantCount;
use crate::comm::ParticipantIndex;
use crate::errors::Result;
use crate::errors::SnapshotError;
use crate::geometry::IndexBox;
use crate::geometry::IntVect;

/// IEEE double description that starts every fab header.
const REAL_DESCRIPTOR_LE: &str = "(8, (64 11 52 0 1 12 0 1023)),(8, (1 2 3 4 5 6 7 8))";
const REAL_DESCRIPTOR_BE: &str = "(8, (64 11 52 0 1 12 0 1023)),(8, (8 7 6 5 4 3 2 1))";

/// Data of one box, component-major with the first index fastest.
#[derive(Debug, Clone, PartialEq)]
pub struct Fab {
    bx: IndexBox,
    ncomp: usize,
    data: Vec<f64>,
}

impl Fab {
    /// Zero-filled.
    pub fn new(bx: IndexBox, ncomp: usize) -> Self {
        Self {
            bx,
            ncomp,
            data: vec![0.0; bx.num_pts() * ncomp],
        }
    }

    pub fn from_data(bx: IndexBox, ncomp: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != bx.num_pts() * ncomp {
            return Err(SnapshotError::MalformedFab(format!(
                "{} values cannot fill {} components of {bx}",
                data.len(),
                ncomp
            )));
        }
        Ok(Self { bx, ncomp, data })
    }

    pub fn bx(&self) -> &IndexBox {
        &self.bx
    }

    pub fn ncomp(&self) -> usize {
        self.ncomp
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn component(&self, comp: usize) -> &[f64] {
        let n = self.bx.num_pts();
        &self.data[comp * n..(comp + 1) * n]
    }

    pub fn component_mut(&mut self, comp: usize) -> &mut [f64] {
        let n = self.bx.num_pts();
        &mut self.data[comp * n..(comp + 1) * n]
    }

    pub fn get(&self, iv: &IntVect, comp: usize) -> f64 {
        self.component(comp)[self.bx.offset(iv)]
    }

    pub fn set(&mut self, iv: &IntVect, comp: usize, value: f64) {
        let offset = self.bx.offset(iv);
        self.component_mut(comp)[offset] = value;
    }

    pub fn set_val(&mut self, value: f64) {
        self.data.fill(value);
    }

    /// Copy `ncomp` components over the cells of `region` that both
    /// fabs cover.
    pub fn copy_from(
        &mut self,
        src: &Fab,
        src_comp: usize,
        dst_comp: usize,
        ncomp: usize,
        region: &IndexBox,
    ) {
        let Some(region) = region
            .intersect(&self.bx)
            .and_then(|region| region.intersect(&src.bx))
        else {
            return;
        };
        for n in 0..ncomp {
            for iv in region.cells() {
                let value = src.get(&iv, src_comp + n);
                self.set(&iv, dst_comp + n, value);
            }
        }
    }

    /// Write the text header line then the raw little-endian data.
    pub fn write_to<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        writeln!(w, "FAB ({REAL_DESCRIPTOR_LE}){} {}", self.bx, self.ncomp)?;
        let mut bytes = Vec::with_capacity(self.data.len() * 8);
        for value in &self.data {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        w.write_all(&bytes)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.write_to(&mut bytes);
        bytes
    }

    /// Read one fab written by [`Fab::write_to`].
    pub fn read_from<R: BufRead>(mut r: R) -> Result<Self> {
        let header = FabHeader::read(&mut r)?;
        Self::read_data(header, r)
    }

    /// Read the values that follow `header`. Never allocates more
    /// than the input actually holds.
    pub fn read_data<R: Read>(header: FabHeader, r: R) -> Result<Self> {
        let FabHeader {
            bx,
            ncomp,
            little_endian,
        } = header;
        let len = bx
            .checked_num_pts()
            .and_then(|pts| pts.checked_mul(ncomp))
            .ok_or_else(|| {
                SnapshotError::MalformedFab(format!("{bx} with {ncomp} components is too large"))
            })?;
        let nbytes = len
            .checked_mul(8)
            .ok_or_else(|| SnapshotError::MalformedFab(format!("{len} values is too large")))?;
        let mut raw = Vec::new();
        r.take(nbytes as u64)
            .read_to_end(&mut raw)
            .map_err(|err| SnapshotError::MalformedFab(format!("reading {len} values: {err}")))?;
        if raw.len() != nbytes {
            return Err(SnapshotError::MalformedFab(format!(
                "expected {len} values for {bx}, found {} bytes",
                raw.len()
            )));
        }
        let data = raw
            .chunks_exact(8)
            .map(|chunk| {
                let mut word = [0u8; 8];
                word.copy_from_slice(chunk);
                if little_endian {
                    f64::from_le_bytes(word)
                } else {
                    f64::from_be_bytes(word)
                }
            })
            .collect();
        Fab::from_data(bx, ncomp, data)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::read_from(bytes)
    }
}

/// The text line in front of a fab's values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FabHeader {
    pub bx: IndexBox,
    pub ncomp: usize,
    pub little_endian: bool,
}

impl FabHeader {
    pub fn read<R: BufRead>(r: &mut R) -> Result<Self> {
        let mut line = String::new();
        r.read_line(&mut line)
            .map_err(|err| SnapshotError::MalformedFab(format!("reading header: {err}")))?;
        let (bx, ncomp, little_endian) = parse_fab_header(line.trim_end())?;
        Ok(Self {
            bx,
            ncomp,
            little_endian,
        })
    }
}

/// Split `FAB (<descriptor>)<box> <ncomp>` into its parts.
fn parse_fab_header(line: &str) -> Result<(IndexBox, usize, bool)> {
    let malformed = |reason: &str| SnapshotError::MalformedFab(format!("header `{line}`: {reason}"));
    let rest = line
        .strip_prefix("FAB (")
        .ok_or_else(|| malformed("missing FAB tag"))?;
    let (little_endian, rest) = if let Some(rest) = rest.strip_prefix(REAL_DESCRIPTOR_LE) {
        (true, rest)
    } else if let Some(rest) = rest.strip_prefix(REAL_DESCRIPTOR_BE) {
        (false, rest)
    } else {
        return Err(malformed("only 8 byte IEEE reals are supported"));
    };
    let rest = rest
        .strip_prefix(')')
        .ok_or_else(|| malformed("unterminated real descriptor"))?;
    let (bx, ncomp) = rest
        .rsplit_once(' ')
        .ok_or_else(|| malformed("missing component count"))?;
    let ncomp = ncomp
        .parse::<usize>()
        .map_err(|_err| malformed("component count is not an integer"))?;
    Ok((bx.parse()?, ncomp, little_endian))
}

/// Boxes of one level and the participant that owns each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxLayout {
    boxes: Vec<IndexBox>,
    owners: Vec<ParticipantIndex>,
}

impl BoxLayout {
    pub fn new(boxes: Vec<IndexBox>, owners: Vec<ParticipantIndex>) -> Result<Self> {
        if boxes.len() != owners.len() {
            return Err(SnapshotError::MalformedFab(format!(
                "{} boxes but {} owners",
                boxes.len(),
                owners.len()
            )));
        }
        Ok(Self { boxes, owners })
    }

    /// Deal boxes out to participants in turn.
    pub fn round_robin(boxes: Vec<IndexBox>, count: ParticipantCount) -> Self {
        let owners = (0..boxes.len())
            .map(|i| ParticipantIndex(i % count.0.max(1)))
            .collect();
        Self { boxes, owners }
    }

    pub fn boxes(&self) -> &[IndexBox] {
        &self.boxes
    }

    pub fn owners(&self) -> &[ParticipantIndex] {
        &self.owners
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn owner(&self, index: usize) -> ParticipantIndex {
        self.owners[index]
    }

    /// Indices of the boxes owned by `who`.
    pub fn owned_by(&self, who: ParticipantIndex) -> impl Iterator<Item = usize> + '_ {
        self.owners
            .iter()
            .enumerate()
            .filter(move |(_, owner)| **owner == who)
            .map(|(index, _)| index)
    }
}

/// One participant's fabs of a distributed array.
///
/// Fabs are keyed by box index in the layout and cover the box grown
/// by the ghost width.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiFab {
    layout: BoxLayout,
    ncomp: usize,
    ngrow: usize,
    fabs: BTreeMap<usize, Fab>,
}

impl MultiFab {
    /// Allocate zeroed fabs for every box `me` owns.
    pub fn new(layout: &BoxLayout, ncomp: usize, ngrow: usize, me: ParticipantIndex) -> Self {
        let fabs = layout
            .owned_by(me)
            .map(|index| (index, Fab::new(layout.boxes[index].grow(ngrow as i64), ncomp)))
            .collect();
        Self {
            layout: layout.clone(),
            ncomp,
            ngrow,
            fabs,
        }
    }

    pub fn layout(&self) -> &BoxLayout {
        &self.layout
    }

    pub fn ncomp(&self) -> usize {
        self.ncomp
    }

    pub fn ngrow(&self) -> usize {
        self.ngrow
    }

    pub fn fabs(&self) -> impl Iterator<Item = (usize, &Fab)> {
        self.fabs.iter().map(|(index, fab)| (*index, fab))
    }

    pub fn fab(&self, index: usize) -> Option<&Fab> {
        self.fabs.get(&index)
    }

    pub fn fab_mut(&mut self, index: usize) -> Option<&mut Fab> {
        self.fabs.get_mut(&index)
    }

    /// Replace the fab of box `index`, which must match the layout.
    pub fn insert(&mut self, index: usize, fab: Fab) -> Result<()> {
        let expected = self
            .layout
            .boxes
            .get(index)
            .map(|bx| bx.grow(self.ngrow as i64))
            .ok_or_else(|| SnapshotError::MalformedFab(format!("no box {index} in layout")))?;
        if *fab.bx() != expected || fab.ncomp() != self.ncomp {
            return Err(SnapshotError::MalformedFab(format!(
                "fab {} with {} components does not fit box {index} {expected} with {} components",
                fab.bx(),
                fab.ncomp(),
                self.ncomp
            )));
        }
        self.fabs.insert(index, fab);
        Ok(())
    }

    pub fn set_val(&mut self, value: f64) {
        for fab in self.fabs.values_mut() {
            fab.set_val(value);
        }
    }

    /// Copy `ncomp` components from `src` over each valid box grown
    /// by `ngrow`. Both must share a layout.
    pub fn copy(
        dst: &mut MultiFab,
        src: &MultiFab,
        src_comp: usize,
        dst_comp: usize,
        ncomp: usize,
        ngrow: usize,
    ) -> Result<()> {
        if dst.layout.boxes != src.layout.boxes {
            return Err(SnapshotError::MalformedFab(
                "cannot copy between different box layouts".to_string(),
            ));
        }
        if src_comp + ncomp > src.ncomp || dst_comp + ncomp > dst.ncomp {
            return Err(SnapshotError::MalformedFab(format!(
                "component range {src_comp}..{} -> {dst_comp}..{} out of bounds ({} -> {})",
                src_comp + ncomp,
                dst_comp + ncomp,
                src.ncomp,
                dst.ncomp
            )));
        }
        for (index, dst_fab) in dst.fabs.iter_mut() {
            if let Some(src_fab) = src.fabs.get(index) {
                let region = dst.layout.boxes[*index].grow(ngrow as i64);
                dst_fab.copy_from(src_fab, src_comp, dst_comp, ncomp, &region);
            }
        }
        Ok(())
    }
}
