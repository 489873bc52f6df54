//! Array store on a shared file system.
//!
//! Every participant appends the fabs it owns to its own data file
//! `<path>_D_<participant>`. The coordinator then writes the index
//! `<path>_H`: component count, ghost width and, for every box in
//! layout order, the data file, byte range and checksum of its fab.
//! Reads go through the index, so a level written by one group can be
//! read back by a group of a different size.

use std::fs;
use std::fs::File;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use tracing::instrument;

use crate::ascii::HeaderLines;
use crate::comm::Communicator;
use crate::comm::CommunicatorExt;
use crate::comm::ParticipantIndex;
use crate::comm::COORDINATOR;
use crate::errors::io_at;
use crate::errors::Result;
use crate::errors::SnapshotError;
use crate::fab::BoxLayout;
use crate::fab::Fab;
use crate::fab::MultiFab;
use crate::geometry::IndexBox;
use crate::store::ArrayStore;

const INDEX_TAG: &str = "amrsnap-multifab-V1";

/// Where one box's fab lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FabEntry {
    index: usize,
    bx: IndexBox,
    file: String,
    offset: u64,
    len: u64,
    checksum: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FabIndex {
    ncomp: usize,
    ngrow: usize,
    /// In layout order.
    entries: Vec<FabEntry>,
}

impl FabIndex {
    fn render(&self) -> String {
        let mut out = format!(
            "{INDEX_TAG}\n{} {}\n{}\n",
            self.ncomp,
            self.ngrow,
            self.entries.len()
        );
        for entry in &self.entries {
            out.push_str(&format!(
                "{} {} {} {} {:016x}\n",
                entry.bx, entry.file, entry.offset, entry.len, entry.checksum
            ));
        }
        out
    }

    fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(io_at(path))?;
        let mut lines = HeaderLines::new(path, &text);
        lines.expect(INDEX_TAG)?;
        let shape: Vec<usize> = lines.exact(2)?;
        let nboxes: usize = lines.value()?;
        let mut entries = Vec::new();
        for index in 0..nboxes {
            let line = lines.line()?;
            let (bx, rest) = line
                .rsplit_once(')')
                .map(|(bx, rest)| (format!("{bx})"), rest))
                .ok_or_else(|| lines.error("missing box"))?;
            let fields: Vec<&str> = rest.split_whitespace().collect();
            let [file, offset, len, checksum] = fields[..] else {
                return Err(lines.error(format!("expected 4 fields after the box, found {}", fields.len())));
            };
            let number = |text: &str, radix: u32| {
                u64::from_str_radix(text, radix)
                    .map_err(|_err| lines.error(format!("`{text}` is not a number")))
            };
            entries.push(FabEntry {
                index,
                bx: bx.parse()?,
                file: file.to_string(),
                offset: number(offset, 10)?,
                len: number(len, 10)?,
                checksum: number(checksum, 16)?,
            });
        }
        Ok(Self {
            ncomp: shape[0],
            ngrow: shape[1],
            entries,
        })
    }
}

/// Reference [`ArrayStore`] that keeps one data file per participant.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalArrayStore;

impl LocalArrayStore {
    pub fn new() -> Self {
        Self
    }

    fn index_path(path: &Path) -> PathBuf {
        suffixed(path, "_H")
    }

    fn data_path(path: &Path, who: ParticipantIndex) -> PathBuf {
        suffixed(path, &format!("_D_{:05}", who.0))
    }

    /// Write this participant's fabs and describe where they went.
    fn write_own(mf: &MultiFab, path: &Path, me: ParticipantIndex) -> Result<Vec<FabEntry>> {
        let data_path = Self::data_path(path, me);
        let file = data_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| SnapshotError::Config(format!("unusable array path {path:?}")))?
            .to_string();
        let mut bytes = Vec::new();
        let mut entries = Vec::new();
        for (index, fab) in mf.fabs() {
            let blob = fab.to_bytes();
            entries.push(FabEntry {
                index,
                bx: mf.layout().boxes()[index],
                file: file.clone(),
                offset: bytes.len() as u64,
                len: blob.len() as u64,
                checksum: seahash::hash(&blob),
            });
            bytes.extend_from_slice(&blob);
        }
        fs::write(&data_path, bytes).map_err(io_at(&data_path))?;
        Ok(entries)
    }

    /// Assemble everyone's entries in layout order.
    fn assemble(mf: &MultiFab, all: Vec<Vec<FabEntry>>) -> Result<FabIndex> {
        let mut slots: Vec<Option<FabEntry>> = vec![None; mf.layout().len()];
        for entry in all.into_iter().flatten() {
            let index = entry.index;
            match slots.get_mut(index) {
                Some(slot @ None) => *slot = Some(entry),
                _ => {
                    return Err(SnapshotError::Collective(format!(
                        "box {index} was written by more than one participant or is not in the layout"
                    )))
                }
            }
        }
        let entries = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| {
                    SnapshotError::Collective(format!("no participant wrote box {index}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(FabIndex {
            ncomp: mf.ncomp(),
            ngrow: mf.ngrow(),
            entries,
        })
    }

    fn read_own(
        index: &FabIndex,
        layout: &BoxLayout,
        path: &Path,
        me: ParticipantIndex,
    ) -> Result<MultiFab> {
        let stored: Vec<IndexBox> = index.entries.iter().map(|entry| entry.bx).collect();
        if stored != layout.boxes() {
            return Err(SnapshotError::MalformedFab(format!(
                "{:?} holds {} boxes that do not match the requested layout of {}",
                path,
                stored.len(),
                layout.len()
            )));
        }
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut mf = MultiFab::new(layout, index.ncomp, index.ngrow, me);
        for box_index in layout.owned_by(me) {
            let entry = &index.entries[box_index];
            let data_path = dir.join(&entry.file);
            let mut file = File::open(&data_path).map_err(io_at(&data_path))?;
            file.seek(SeekFrom::Start(entry.offset))
                .map_err(io_at(&data_path))?;
            let mut blob = Vec::new();
            file.take(entry.len)
                .read_to_end(&mut blob)
                .map_err(io_at(&data_path))?;
            if blob.len() as u64 != entry.len {
                return Err(SnapshotError::MalformedFab(format!(
                    "box {box_index} in {data_path:?} holds {} bytes, index says {}",
                    blob.len(),
                    entry.len
                )));
            }
            if seahash::hash(&blob) != entry.checksum {
                return Err(SnapshotError::MalformedFab(format!(
                    "checksum mismatch for box {box_index} in {data_path:?}"
                )));
            }
            mf.insert(box_index, Fab::from_bytes(&blob)?)?;
        }
        Ok(mf)
    }
}

impl ArrayStore for LocalArrayStore {
    #[instrument(name = "array_write", skip_all, fields(participant = comm.index().0, path = ?path))]
    fn write(&self, comm: &dyn Communicator, mf: &MultiFab, path: &Path) -> Result<()> {
        let entries = comm.agree(Self::write_own(mf, path, comm.index()))?;
        let gathered = comm.gather(COORDINATOR, &entries)?;
        comm.coordinate(|| {
            let all = gathered.ok_or_else(|| {
                SnapshotError::Collective("coordinator received no fab entries".to_string())
            })?;
            let index = Self::assemble(mf, all)?;
            let index_path = Self::index_path(path);
            fs::write(&index_path, index.render()).map_err(io_at(&index_path))?;
            tracing::debug!("Wrote {} fabs under {path:?}", index.entries.len());
            Ok(())
        })
    }

    #[instrument(name = "array_read", skip_all, fields(participant = comm.index().0, path = ?path))]
    fn read(&self, comm: &dyn Communicator, layout: &BoxLayout, path: &Path) -> Result<MultiFab> {
        let index = comm.coordinate(|| FabIndex::load(&Self::index_path(path)))?;
        comm.agree(Self::read_own(&index, layout, path, comm.index()))
    }
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
