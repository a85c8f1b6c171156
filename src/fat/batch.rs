//! Pending sector writes, drained one whole track at a time.

use super::lba_to_chs;
use crate::error::Error;
use crate::storage::{SectorBuf, SectorIo, Track};

use generic_array::GenericArray;
use typenum::consts::U40;
use typenum::marker_traits::Unsigned;

/// Two tracks' worth of sectors, with room to spare for FAT mirror updates.
pub type BatchCapacity = U40;

#[derive(Debug, Clone, Default)]
struct PendingWrite {
    lba: u32,
    data: SectorBuf,
}

/// A bounded collection of `(lba, sector)` pairs awaiting commit. Two
/// writes to the same LBA collapse into one; the later write wins.
pub struct WriteBatch {
    entries: GenericArray<PendingWrite, BatchCapacity>,
    len: usize,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self {
            entries: GenericArray::default(),
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        BatchCapacity::to_usize()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn remaining(&self) -> usize {
        self.capacity() - self.len
    }

    /// The pending contents for `lba`, if any.
    pub fn get(&self, lba: u32) -> Option<&SectorBuf> {
        self.entries.as_slice()[..self.len]
            .iter()
            .find(|e| e.lba == lba)
            .map(|e| &e.data)
    }

    pub fn add(&mut self, lba: u32, data: &SectorBuf) -> Result<(), Error> {
        for e in self.entries.as_mut_slice()[..self.len].iter_mut() {
            if e.lba == lba {
                e.data.clone_from(data);
                return Ok(());
            }
        }

        if self.len == self.capacity() {
            return Err(Error::Full);
        }

        let e = &mut self.entries.as_mut_slice()[self.len];
        e.lba = lba;
        e.data.clone_from(data);
        self.len += 1;
        Ok(())
    }

    /// Drain the batch: group entries by `(track, side)`, assemble each
    /// target track with the untouched slots left invalid (the port
    /// read-modify-writes those), and rewrite track by track.
    pub fn flush<S: SectorIo>(
        &mut self,
        io: &mut S,
        heads: u32,
        spt: u32,
    ) -> Result<(), Error> {
        while self.len > 0 {
            let (c, h, _) = lba_to_chs(self.entries.as_slice()[0].lba, heads, spt);
            let mut frame = Track::new(c as u8, h as u8);

            // Pull this track's entries into the frame, compacting the rest.
            let mut kept = 0;
            for i in 0..self.len {
                let (ec, eh, es) = lba_to_chs(self.entries.as_slice()[i].lba, heads, spt);
                if ec == c && eh == h {
                    if let Some(slot) = frame.slot_mut(es as u8) {
                        slot.data
                            .clone_from(&self.entries.as_slice()[i].data);
                        slot.valid = true;
                    }
                } else {
                    self.entries.as_mut_slice().swap(kept, i);
                    kept += 1;
                }
            }
            self.len = kept;

            io.write_track(&mut frame).map_err(|_| Error::Io)?;
        }

        Ok(())
    }
}

impl Default for WriteBatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod batching {
    use super::*;
    use crate::storage::{RamDisk, Sector, SECTOR_SIZE};

    use assert_eq as eq;

    fn buf_of(byte: u8) -> SectorBuf {
        let mut b = SectorBuf::default();
        for x in b.as_mut_slice().iter_mut() {
            *x = byte;
        }
        b
    }

    #[test]
    fn later_write_wins_without_burning_a_slot() {
        let mut batch = WriteBatch::new();

        batch.add(7, &buf_of(1)).unwrap();
        batch.add(7, &buf_of(2)).unwrap();

        eq!(batch.len(), 1);
        eq!(batch.get(7).unwrap().as_slice()[0], 2);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut batch = WriteBatch::new();

        for lba in 0..40 {
            batch.add(lba, &buf_of(0)).unwrap();
        }
        eq!(batch.add(40, &buf_of(0)), Err(Error::Full));

        // Same-lba updates still fit.
        assert!(batch.add(39, &buf_of(9)).is_ok());
    }

    #[test]
    fn flush_groups_by_track() {
        let mut disk = RamDisk::new();
        let mut batch = WriteBatch::new();

        // Three tracks' worth, interleaved.
        batch.add(0, &buf_of(0xA0)).unwrap();
        batch.add(20, &buf_of(0xB0)).unwrap();
        batch.add(1, &buf_of(0xA1)).unwrap();
        batch.add(37, &buf_of(0xC0)).unwrap();
        batch.add(19, &buf_of(0xB1)).unwrap();

        batch.flush(&mut disk, 2, 18).unwrap();
        assert!(batch.is_empty());

        let image = disk.image();
        let expected: [(usize, u8); 5] =
            [(0, 0xA0), (1, 0xA1), (19, 0xB1), (20, 0xB0), (37, 0xC0)];
        for &(lba, byte) in expected.iter() {
            eq!(image[lba * SECTOR_SIZE], byte, "lba {}", lba);
        }

        // Sectors the batch never touched stayed zero.
        eq!(image[2 * SECTOR_SIZE], 0);
    }

    #[test]
    fn flush_failure_reports_io() {
        let mut disk = RamDisk::new();
        disk.set_write_protect(true);

        let mut batch = WriteBatch::new();
        batch.add(0, &buf_of(1)).unwrap();

        eq!(batch.flush(&mut disk, 2, 18), Err(Error::Io));
    }

    #[test]
    fn untouched_slots_survive_the_rewrite() {
        let mut disk = RamDisk::new();

        // Seed sector lba 2 directly.
        let mut t = crate::storage::Track::new(0, 0);
        *t.slot_mut(3).unwrap() = {
            let mut s = Sector::at(0, 0, 3);
            s.data = buf_of(0x55);
            s.valid = true;
            s
        };
        disk.write_track(&mut t).unwrap();

        let mut batch = WriteBatch::new();
        batch.add(0, &buf_of(0x11)).unwrap();
        batch.flush(&mut disk, 2, 18).unwrap();

        eq!(disk.image()[2 * SECTOR_SIZE], 0x55);
    }
}
