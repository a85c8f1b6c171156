//! The FAT12 engine over the sector port.
//!
//! The engine itself is just the parsed layout; every operation borrows the
//! port it should run against, so the same `Fat12` serves raw media, the
//! facade's cached port, or anything else that implements `SectorIo`.

pub mod batch;
pub mod boot_sector;
pub mod dir;
pub mod file;
pub mod format;
pub mod table;

pub use batch::WriteBatch;
pub use boot_sector::BiosParameterBlock;
pub use dir::{DirEntry, State};
pub use file::{Reader, Writer};
pub use table::Cluster;

use crate::error::Error;
use crate::storage::{Sector, SectorBuf, SectorIo, SECTOR_SIZE};
use dir::{normalize_83, DIRENT_SIZE};

/// `(cylinder, head, sector)` for a linear block address.
pub fn lba_to_chs(lba: u32, heads: u32, spt: u32) -> (u32, u32, u32) {
    (lba / (heads * spt), (lba / spt) % heads, (lba % spt) + 1)
}

/// A mounted FAT12 layout: the parsed BPB plus the derived region map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fat12 {
    pub bpb: BiosParameterBlock,
    pub fat_start: u32,
    pub root_start: u32,
    pub root_sectors: u32,
    pub data_start: u32,
    pub total_clusters: u32,
}

impl Fat12 {
    /// Parse and validate LBA 0, then derive the region map.
    pub fn init<S: SectorIo>(io: &mut S) -> Result<Self, Error> {
        let mut sector = Sector::at(0, 0, 1);
        io.read_sector(&mut sector)?;
        if !sector.valid {
            return Err(Error::Io);
        }
        if !boot_sector::has_signature(&sector.data) {
            return Err(Error::Invalid);
        }

        let bpb = BiosParameterBlock::read(&sector.data);
        bpb.validate()?;

        let fat_start = bpb.reserved_sectors as u32;
        let root_start = fat_start + bpb.num_fats as u32 * bpb.sectors_per_fat as u32;
        let root_sectors = (bpb.root_entries as u32 * DIRENT_SIZE as u32
            + SECTOR_SIZE as u32
            - 1)
            / SECTOR_SIZE as u32;
        let data_start = root_start + root_sectors;
        let total_clusters = (bpb.total_sectors as u32).saturating_sub(data_start)
            / bpb.sectors_per_cluster as u32;

        log::debug!(
            "fat12: {} clusters, data area at lba {}",
            total_clusters,
            data_start
        );

        Ok(Self {
            bpb,
            fat_start,
            root_start,
            root_sectors,
            data_start,
            total_clusters,
        })
    }

    pub fn lba_to_chs(&self, lba: u32) -> (u32, u32, u32) {
        lba_to_chs(
            lba,
            self.bpb.num_heads as u32,
            self.bpb.sectors_per_track as u32,
        )
    }

    pub fn cluster_to_lba(&self, cluster: Cluster) -> u32 {
        self.data_start + (cluster as u32 - 2) * self.bpb.sectors_per_cluster as u32
    }

    pub fn cluster_bytes(&self) -> u32 {
        self.bpb.sectors_per_cluster as u32 * SECTOR_SIZE as u32
    }

    pub(crate) fn read_lba<S: SectorIo>(&self, io: &mut S, lba: u32) -> Result<SectorBuf, Error> {
        let (c, h, s) = self.lba_to_chs(lba);
        let mut sector = Sector::at(c as u8, h as u8, s as u8);
        io.read_sector(&mut sector)?;
        if !sector.valid {
            return Err(Error::Io);
        }
        Ok(sector.data)
    }

    /// Like `read_lba`, but pending batch writes shadow the medium.
    pub(crate) fn read_lba_batched<S: SectorIo>(
        &self,
        io: &mut S,
        batch: Option<&WriteBatch>,
        lba: u32,
    ) -> Result<SectorBuf, Error> {
        if let Some(b) = batch {
            if let Some(data) = b.get(lba) {
                return Ok(data.clone());
            }
        }
        self.read_lba(io, lba)
    }

    pub(crate) fn flush<S: SectorIo>(
        &self,
        io: &mut S,
        batch: &mut WriteBatch,
    ) -> Result<(), Error> {
        batch.flush(
            io,
            self.bpb.num_heads as u32,
            self.bpb.sectors_per_track as u32,
        )
    }

    fn root_entry_pos(&self, index: u16) -> (u32, usize) {
        let byte = index as usize * DIRENT_SIZE;
        (
            self.root_start + (byte / SECTOR_SIZE) as u32,
            byte % SECTOR_SIZE,
        )
    }

    pub fn read_root_entry<S: SectorIo>(&self, io: &mut S, index: u16) -> Result<DirEntry, Error> {
        if index >= self.bpb.root_entries {
            return Err(Error::Invalid);
        }

        let (lba, off) = self.root_entry_pos(index);
        let buf = self.read_lba(io, lba)?;
        DirEntry::from_slice(&buf.as_slice()[off..off + DIRENT_SIZE]).ok_or(Error::Invalid)
    }

    pub(crate) fn write_root_entry<S: SectorIo>(
        &self,
        io: &mut S,
        batch: &mut WriteBatch,
        index: u16,
        entry: &DirEntry,
    ) -> Result<(), Error> {
        if index >= self.bpb.root_entries {
            return Err(Error::Invalid);
        }

        let (lba, off) = self.root_entry_pos(index);
        let mut buf = self.read_lba_batched(io, Some(batch), lba)?;
        let mut arr = [0u8; DIRENT_SIZE];
        entry.to_arr(&mut arr);
        buf.as_mut_slice()[off..off + DIRENT_SIZE].copy_from_slice(&arr);
        batch.add(lba, &buf)
    }

    /// First free (deleted or end-of-directory) root slot.
    pub fn find_free_dirent<S: SectorIo>(&self, io: &mut S) -> Result<u16, Error> {
        for i in 0..self.bpb.root_entries {
            match self.read_root_entry(io, i)?.state() {
                State::End | State::Deleted => return Ok(i),
                State::Exists => {}
            }
        }
        Err(Error::Full)
    }

    /// Case-folded 8.3 lookup in the root directory. The end-of-directory
    /// marker terminates the scan.
    pub fn find<S: SectorIo>(&self, io: &mut S, name: &str) -> Result<(u16, DirEntry), Error> {
        let (name, ext) = normalize_83(name);

        for i in 0..self.bpb.root_entries {
            let entry = self.read_root_entry(io, i)?;
            match entry.state() {
                State::End => return Err(Error::NotFound),
                State::Deleted => continue,
                State::Exists => {
                    if entry.attributes.is_lfn() {
                        continue;
                    }
                    if entry.name == name && entry.ext == ext {
                        return Ok((i, entry));
                    }
                }
            }
        }

        Err(Error::NotFound)
    }

    /// Free the cluster chain, tombstone the dirent, flush.
    pub fn delete<S: SectorIo>(&self, io: &mut S, name: &str) -> Result<(), Error> {
        let (index, mut entry) = self.find(io, name)?;
        let mut batch = WriteBatch::new();

        if entry.start_cluster >= 2 {
            self.free_chain(io, &mut batch, entry.start_cluster)?;
        }

        entry.mark_deleted();
        self.write_root_entry(io, &mut batch, index, &entry)?;
        self.flush(io, &mut batch)
    }
}
