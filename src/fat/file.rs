//! Readers and the append-only writer.

use super::batch::WriteBatch;
use super::dir::{normalize_83, DirEntry, State};
use super::table::{is_eoc, is_next, Cluster, FAT_EOC};
use super::Fat12;
use crate::error::Error;
use crate::storage::{SectorBuf, SectorIo, SECTOR_SIZE};

/// A lazy, forward-only file reader walking the cluster chain.
#[derive(Debug, Clone)]
pub struct Reader {
    start_cluster: Cluster,
    file_size: u32,
    bytes_read: u32,
    current_cluster: Cluster,
}

impl Reader {
    /// Directory-attributed entries are not readable.
    pub fn open(entry: &DirEntry) -> Result<Self, Error> {
        if entry.attributes.is_dir() {
            return Err(Error::IsDir);
        }

        Ok(Self {
            start_cluster: entry.start_cluster,
            file_size: entry.size,
            bytes_read: 0,
            current_cluster: entry.start_cluster,
        })
    }

    pub fn file_size(&self) -> u32 {
        self.file_size
    }

    pub fn bytes_read(&self) -> u32 {
        self.bytes_read
    }

    /// Back to the start of the chain.
    pub fn rewind(&mut self) {
        self.bytes_read = 0;
        self.current_cluster = self.start_cluster;
    }

    /// Fill `buf` from the current position. Returns the bytes produced;
    /// zero means the file (or its chain) is exhausted.
    pub fn read<S: SectorIo>(
        &mut self,
        fs: &Fat12,
        io: &mut S,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        let cluster_bytes = fs.cluster_bytes();
        let mut done = 0;
        let mut hops = 0u32;

        while done < buf.len() && self.bytes_read < self.file_size {
            if self.current_cluster < 2 {
                break;
            }

            let off_in_cluster = self.bytes_read % cluster_bytes;
            if self.bytes_read > 0 && off_in_cluster == 0 {
                // Crossed a cluster boundary: follow the chain.
                hops += 1;
                if hops > fs.total_clusters + 2 {
                    return Err(Error::Invalid);
                }

                let next = fs.get_entry(io, self.current_cluster)?;
                if is_eoc(next) {
                    break;
                }
                if !is_next(next) {
                    return Err(Error::Invalid);
                }
                self.current_cluster = next;
            }

            let sector_idx = off_in_cluster as usize / SECTOR_SIZE;
            let sector_off = off_in_cluster as usize % SECTOR_SIZE;
            let lba = fs.cluster_to_lba(self.current_cluster) + sector_idx as u32;
            let data = fs.read_lba(io, lba)?;

            let n = (buf.len() - done)
                .min(SECTOR_SIZE - sector_off)
                .min((self.file_size - self.bytes_read) as usize);
            buf[done..done + n]
                .copy_from_slice(&data.as_slice()[sector_off..sector_off + n]);

            done += n;
            self.bytes_read += n as u32;
        }

        Ok(done)
    }
}

/// The append-only writer. Clusters are allocated as bytes arrive; the
/// directory entry is committed on `close` with the final chain head and
/// size.
pub struct Writer {
    dirent_index: u16,
    dirent: DirEntry,
    first_cluster: Cluster,
    current_cluster: Cluster,
    prev_cluster: Cluster,
    bytes_written: u32,
    cluster_offset: u32,
    next_free_hint: Cluster,
    batch: WriteBatch,
}

/// Worst case distinct sectors one allocation can pin in the batch: the
/// terminator and chain-link entries both straddling, in every FAT copy,
/// plus the data sector itself.
const BATCH_HEADROOM: usize = 10;

impl Writer {
    /// Open `name` for appending. An existing entry of the same name has
    /// its chain freed and its slot reused; otherwise the first deleted or
    /// end-of-directory slot is taken.
    pub fn create<S: SectorIo>(fs: &Fat12, io: &mut S, name: &str) -> Result<Self, Error> {
        let (file_name, ext) = normalize_83(name);
        let mut batch = WriteBatch::new();

        let mut reusable: Option<u16> = None;
        let mut matched: Option<(u16, DirEntry)> = None;
        for i in 0..fs.bpb.root_entries {
            let entry = fs.read_root_entry(io, i)?;
            match entry.state() {
                State::End => {
                    if reusable.is_none() {
                        reusable = Some(i);
                    }
                    break;
                }
                State::Deleted => {
                    if reusable.is_none() {
                        reusable = Some(i);
                    }
                }
                State::Exists => {
                    if !entry.attributes.is_lfn()
                        && entry.name == file_name
                        && entry.ext == ext
                    {
                        matched = Some((i, entry));
                        break;
                    }
                }
            }
        }

        let dirent_index = match matched {
            Some((i, entry)) => {
                if entry.attributes.is_dir() {
                    return Err(Error::IsDir);
                }
                if entry.start_cluster >= 2 {
                    fs.free_chain(io, &mut batch, entry.start_cluster)?;
                }
                i
            }
            None => reusable.ok_or(Error::Full)?,
        };

        Ok(Self {
            dirent_index,
            dirent: DirEntry::new_file(file_name, ext),
            first_cluster: 0,
            current_cluster: 0,
            prev_cluster: 0,
            bytes_written: 0,
            cluster_offset: 0,
            next_free_hint: 2,
            batch,
        })
    }

    pub fn bytes_written(&self) -> u32 {
        self.bytes_written
    }

    fn grow<S: SectorIo>(&mut self, fs: &Fat12, io: &mut S) -> Result<(), Error> {
        let fresh = fs.find_free_cluster(io, &self.batch, self.next_free_hint)?;

        // Terminator first, then link the previous tail over to it.
        fs.set_entry(io, &mut self.batch, fresh, FAT_EOC)?;
        self.prev_cluster = self.current_cluster;
        if self.prev_cluster >= 2 {
            fs.set_entry(io, &mut self.batch, self.prev_cluster, fresh)?;
        } else {
            self.first_cluster = fresh;
        }

        self.current_cluster = fresh;
        self.cluster_offset = 0;
        self.next_free_hint = fresh + 1;
        Ok(())
    }

    /// Append `buf`. On `Full` or a flush failure the file may already have
    /// grown by part of `buf`; `bytes_written` reflects what actually
    /// landed in the batch.
    pub fn write<S: SectorIo>(
        &mut self,
        fs: &Fat12,
        io: &mut S,
        buf: &[u8],
    ) -> Result<usize, Error> {
        let cluster_bytes = fs.cluster_bytes();
        let mut done = 0;

        while done < buf.len() {
            if self.batch.remaining() < BATCH_HEADROOM {
                fs.flush(io, &mut self.batch)?;
            }

            if self.current_cluster < 2 || self.cluster_offset == cluster_bytes {
                self.grow(fs, io)?;
            }

            let sector_idx = self.cluster_offset as usize / SECTOR_SIZE;
            let sector_off = self.cluster_offset as usize % SECTOR_SIZE;
            let lba = fs.cluster_to_lba(self.current_cluster) + sector_idx as u32;
            let n = (buf.len() - done).min(SECTOR_SIZE - sector_off);

            let mut data: SectorBuf;
            if sector_off == 0 {
                // A sector we own from its first byte: start from zeros so
                // no stale medium bytes trail the file.
                data = SectorBuf::default();
            } else {
                data = fs.read_lba_batched(io, Some(&self.batch), lba)?;
            }
            data.as_mut_slice()[sector_off..sector_off + n]
                .copy_from_slice(&buf[done..done + n]);
            self.batch.add(lba, &data)?;

            self.cluster_offset += n as u32;
            self.bytes_written += n as u32;
            done += n;
        }

        Ok(done)
    }

    /// Commit the directory entry and drain the batch.
    pub fn close<S: SectorIo>(mut self, fs: &Fat12, io: &mut S) -> Result<(), Error> {
        self.dirent.start_cluster = self.first_cluster;
        self.dirent.size = self.bytes_written;

        fs.write_root_entry(io, &mut self.batch, self.dirent_index, &self.dirent)?;
        fs.flush(io, &mut self.batch)
    }
}

#[cfg(test)]
mod files {
    use super::super::format;
    use super::*;
    use crate::storage::RamDisk;

    use assert_eq as eq;

    fn fresh() -> (RamDisk, Fat12) {
        let mut disk = RamDisk::new();
        format::format(&mut disk, None, false).unwrap();
        let fs = Fat12::init(&mut disk).unwrap();
        (disk, fs)
    }

    fn write_file(disk: &mut RamDisk, fs: &Fat12, name: &str, data: &[u8]) {
        let mut w = Writer::create(fs, disk, name).unwrap();
        w.write(fs, disk, data).unwrap();
        w.close(fs, disk).unwrap();
    }

    fn read_file(disk: &mut RamDisk, fs: &Fat12, name: &str) -> Vec<u8> {
        let (_, entry) = fs.find(disk, name).unwrap();
        let mut r = Reader::open(&entry).unwrap();
        let mut out = vec![0u8; entry.size as usize];
        let mut got = 0;
        while got < out.len() {
            let n = r.read(fs, disk, &mut out[got..]).unwrap();
            if n == 0 {
                break;
            }
            got += n;
        }
        out.truncate(got);
        out
    }

    #[test]
    fn small_file_round_trip() {
        let (mut disk, fs) = fresh();

        write_file(&mut disk, &fs, "HELLO.TXT", b"Hello, World!");

        let (_, entry) = fs.find(&mut disk, "hello.txt").unwrap();
        eq!(entry.size, 13);
        assert!(entry.start_cluster >= 2);
        eq!(read_file(&mut disk, &fs, "HELLO.TXT"), b"Hello, World!");
    }

    #[test]
    fn multi_cluster_chain() {
        let (mut disk, fs) = fresh();

        let data: Vec<u8> = (0..2000u32).map(|i| i as u8).collect();
        write_file(&mut disk, &fs, "BIG.DAT", &data);

        let (_, entry) = fs.find(&mut disk, "BIG.DAT").unwrap();
        eq!(entry.size, 2000);
        eq!(fs.chain_len(&mut disk, entry.start_cluster).unwrap(), 4);
        eq!(read_file(&mut disk, &fs, "BIG.DAT"), data);
    }

    #[test]
    fn chunked_appends_equal_one_shot() {
        let (mut disk, fs) = fresh();

        let data: Vec<u8> = (0..1500u32).map(|i| (i * 7) as u8).collect();
        let mut w = Writer::create(&fs, &mut disk, "CHUNK.BIN").unwrap();
        for chunk in data.chunks(130) {
            w.write(&fs, &mut disk, chunk).unwrap();
        }
        w.close(&fs, &mut disk).unwrap();

        eq!(read_file(&mut disk, &fs, "CHUNK.BIN"), data);
    }

    #[test]
    fn empty_file_has_no_chain() {
        let (mut disk, fs) = fresh();

        let w = Writer::create(&fs, &mut disk, "EMPTY.TXT").unwrap();
        w.close(&fs, &mut disk).unwrap();

        let (_, entry) = fs.find(&mut disk, "EMPTY.TXT").unwrap();
        eq!(entry.start_cluster, 0);
        eq!(entry.size, 0);
        eq!(read_file(&mut disk, &fs, "EMPTY.TXT"), b"");
    }

    #[test]
    fn rewrite_reuses_the_slot_and_frees_the_chain() {
        let (mut disk, fs) = fresh();

        write_file(&mut disk, &fs, "A.TXT", &[0x41; 1024]);
        let (i1, e1) = fs.find(&mut disk, "A.TXT").unwrap();

        write_file(&mut disk, &fs, "A.TXT", &[0x42; 512]);
        let (i2, e2) = fs.find(&mut disk, "A.TXT").unwrap();

        eq!(i1, i2);
        eq!(e2.size, 512);
        eq!(read_file(&mut disk, &fs, "A.TXT"), vec![0x42; 512]);

        // The old chain went back to the free pool.
        eq!(fs.get_entry(&mut disk, e1.start_cluster).unwrap(), 0x000);

        // And the free pool is exactly one cluster short.
        let free = (2..fs.total_clusters + 2)
            .filter(|&c| fs.get_entry(&mut disk, c as Cluster).unwrap() == 0x000)
            .count() as u32;
        eq!(free, fs.total_clusters - 1);
    }

    #[test]
    fn large_file_spills_the_batch_mid_write() {
        let (mut disk, fs) = fresh();

        // Far more clusters than one batch can hold.
        let data: Vec<u8> = (0..60_000u32).map(|i| (i ^ (i >> 8)) as u8).collect();
        write_file(&mut disk, &fs, "SPILL.BIN", &data);

        let (_, entry) = fs.find(&mut disk, "SPILL.BIN").unwrap();
        eq!(entry.size, 60_000);
        eq!(fs.chain_len(&mut disk, entry.start_cluster).unwrap(), 118);
        eq!(read_file(&mut disk, &fs, "SPILL.BIN"), data);
    }

    #[test]
    fn delete_frees_everything() {
        let (mut disk, fs) = fresh();

        write_file(&mut disk, &fs, "DOOMED.BIN", &[9; 3000]);
        let (_, entry) = fs.find(&mut disk, "DOOMED.BIN").unwrap();
        let start = entry.start_cluster;

        fs.delete(&mut disk, "DOOMED.BIN").unwrap();

        eq!(fs.find(&mut disk, "DOOMED.BIN"), Err(Error::NotFound));
        for c in start..start + 6 {
            eq!(fs.get_entry(&mut disk, c).unwrap(), 0x000);
        }
    }

    #[test]
    fn directories_refuse_readers() {
        let mut entry = DirEntry::default();
        entry.attributes.inner = super::super::dir::Attribute::Directory as u8;

        eq!(Reader::open(&entry).err(), Some(Error::IsDir));
    }
}
