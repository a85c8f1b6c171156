//! The file facade: POSIX-ish calls over the FAT12 engine, with a sector
//! LRU interposed on the port and media gating on every operation.

use crate::error::Error;
use crate::fat::file::{Reader, Writer};
use crate::fat::{format, DirEntry, Fat12, State};
use crate::storage::{IoFault, Sector, SectorBuf, SectorIo, Track, SECTOR_SIZE};
use crate::util::lru::LruCache;

use typenum::consts::U36;

/// Fixed size of the open-file table.
pub const MAX_OPEN_FILES: usize = 4;

/// Sector LRU capacity: two tracks' worth.
type CacheSize = U36;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
}

/// A handle into the open-file table. Handles go stale on unmount or media
/// change and then fail with `BadHandle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fd(u8);

/// Root directory iteration state.
#[derive(Debug, Clone, Copy)]
pub struct Dir {
    index: u16,
}

/// A `stat`/`readdir` snapshot of one directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    name: [u8; 12],
    name_len: u8,
    pub size: u32,
    pub attr: u8,
    pub is_dir: bool,
}

impl FileInfo {
    fn from_entry(entry: &DirEntry) -> Self {
        let mut name = [0u8; 12];
        let name_len = entry.display_name(&mut name) as u8;

        Self {
            name,
            name_len,
            size: entry.size,
            attr: entry.attributes.inner,
            is_dir: entry.attributes.is_dir(),
        }
    }

    /// The 8.3 name with its dot, e.g. `HELLO.TXT`.
    pub fn name(&self) -> &str {
        core::str::from_utf8(&self.name[..self.name_len as usize]).unwrap_or("")
    }
}

enum Slot {
    Closed,
    Read(Reader),
    Write(Writer),
}

struct OpenFile {
    slot: Slot,
    position: u32,
}

impl Default for OpenFile {
    fn default() -> Self {
        Self {
            slot: Slot::Closed,
            position: 0,
        }
    }
}

/// The sector port the engine actually sees once mounted: reads come out of
/// the LRU when they can, track writes refresh it.
struct CachedIo<'a, S: SectorIo> {
    io: &'a mut S,
    cache: &'a mut LruCache<SectorBuf, CacheSize>,
}

impl<'a, S: SectorIo> SectorIo for CachedIo<'a, S> {
    fn read_sector(&mut self, sector: &mut Sector) -> Result<(), IoFault> {
        let key = sector.key();
        if let Some(data) = self.cache.get(key) {
            sector.data.clone_from(data);
            sector.valid = true;
            return Ok(());
        }

        self.io.read_sector(sector)?;
        if sector.valid {
            self.cache.insert(key, &sector.data);
        }
        Ok(())
    }

    fn write_track(&mut self, track: &mut Track) -> Result<(), IoFault> {
        self.io.write_track(track)?;

        // The freshly written frame is the newest truth for these sectors.
        for s in track.sectors.as_slice().iter() {
            if s.valid {
                self.cache.insert(s.key(), &s.data);
            }
        }
        Ok(())
    }

    fn disk_changed(&mut self) -> bool {
        self.io.disk_changed()
    }

    fn write_protected(&mut self) -> bool {
        self.io.write_protected()
    }
}

/// A single filesystem session over one medium.
pub struct FloppyFs<S: SectorIo> {
    io: S,
    cache: LruCache<SectorBuf, CacheSize>,
    fat: Option<Fat12>,
    files: [OpenFile; MAX_OPEN_FILES],
    mounted: bool,
    last_error: Option<Error>,
}

impl<S: SectorIo> FloppyFs<S> {
    pub fn new(io: S) -> Self {
        Self {
            io,
            cache: LruCache::new(),
            fat: None,
            files: Default::default(),
            mounted: false,
            last_error: None,
        }
    }

    pub fn mounted(&self) -> bool {
        self.mounted
    }

    /// The most recent error any operation returned.
    pub fn last_error(&self) -> Option<Error> {
        self.last_error
    }

    pub fn io_mut(&mut self) -> &mut S {
        &mut self.io
    }

    pub fn into_io(self) -> S {
        self.io
    }

    fn note<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        if let Err(e) = &result {
            self.last_error = Some(*e);
        }
        result
    }

    fn teardown(&mut self) {
        self.cache.clear();
        for f in self.files.iter_mut() {
            f.slot = Slot::Closed;
            f.position = 0;
        }
        self.fat = None;
        self.mounted = false;
    }

    /// `NotMounted`/`DiskChanged` gate run by every public operation. A
    /// media change tears the whole session down on the spot.
    fn check_disk(&mut self) -> Result<(), Error> {
        if !self.mounted {
            return Err(Error::NotMounted);
        }
        if self.io.disk_changed() {
            log::warn!("media change observed; session torn down");
            self.teardown();
            return Err(Error::DiskChanged);
        }
        Ok(())
    }

    fn check_writable(&mut self) -> Result<(), Error> {
        self.check_disk()?;
        if self.io.write_protected() {
            return Err(Error::WriteProtected);
        }
        Ok(())
    }

    pub fn mount(&mut self) -> Result<(), Error> {
        let r = self.mount_inner();
        self.note(r)
    }

    fn mount_inner(&mut self) -> Result<(), Error> {
        // A still-mounted previous session goes away first.
        if self.mounted {
            self.teardown();
        }
        self.cache.clear();

        let FloppyFs { io, cache, fat, .. } = self;
        let mut cio = CachedIo { io, cache };
        *fat = Some(Fat12::init(&mut cio)?);
        self.mounted = true;
        Ok(())
    }

    /// Tear the session down; open handles go stale.
    pub fn unmount(&mut self) {
        self.teardown();
    }

    pub fn format(&mut self, label: Option<&str>, full: bool) -> Result<(), Error> {
        let r = self.format_inner(label, full);
        self.note(r)
    }

    fn format_inner(&mut self, label: Option<&str>, full: bool) -> Result<(), Error> {
        if self.io.write_protected() {
            return Err(Error::WriteProtected);
        }

        // Whatever was open refers to a filesystem that is about to vanish.
        for f in self.files.iter_mut() {
            f.slot = Slot::Closed;
            f.position = 0;
        }

        // The formatter writes whole fresh tracks; it runs on the raw port
        // and the cache restarts from nothing afterwards.
        format::format(&mut self.io, label, full)?;
        self.cache.clear();

        if self.mounted {
            let FloppyFs { io, cache, fat, .. } = self;
            let mut cio = CachedIo { io, cache };
            *fat = Some(Fat12::init(&mut cio)?);
        }
        Ok(())
    }

    pub fn open(&mut self, path: &str, mode: Mode) -> Result<Fd, Error> {
        let r = self.open_inner(path, mode);
        self.note(r)
    }

    fn open_inner(&mut self, path: &str, mode: Mode) -> Result<Fd, Error> {
        match mode {
            Mode::Read => self.check_disk()?,
            Mode::Write => self.check_writable()?,
        }

        let name = path.trim_start_matches('/');

        let FloppyFs { io, cache, fat, files, .. } = self;
        let fat = fat.as_ref().ok_or(Error::NotMounted)?;
        let mut cio = CachedIo { io, cache };

        let index = files
            .iter()
            .position(|f| matches!(f.slot, Slot::Closed))
            .ok_or(Error::TooMany)?;

        match mode {
            Mode::Read => {
                let (_, entry) = fat.find(&mut cio, name)?;
                files[index] = OpenFile {
                    slot: Slot::Read(Reader::open(&entry)?),
                    position: 0,
                };
            }
            Mode::Write => {
                // Truncate-by-delete, then start the append-only writer.
                match fat.delete(&mut cio, name) {
                    Ok(()) | Err(Error::NotFound) => {}
                    Err(e) => return Err(e),
                }
                files[index] = OpenFile {
                    slot: Slot::Write(Writer::create(fat, &mut cio, name)?),
                    position: 0,
                };
            }
        }

        Ok(Fd(index as u8))
    }

    pub fn close(&mut self, fd: Fd) -> Result<(), Error> {
        let r = self.close_inner(fd);
        self.note(r)
    }

    fn close_inner(&mut self, fd: Fd) -> Result<(), Error> {
        self.check_disk()?;

        let is_writer = match self.files.get(fd.0 as usize) {
            Some(f) => matches!(f.slot, Slot::Write(_)),
            None => return Err(Error::BadHandle),
        };
        if is_writer && self.io.write_protected() {
            return Err(Error::WriteProtected);
        }

        let FloppyFs { io, cache, fat, files, .. } = self;
        let file = files.get_mut(fd.0 as usize).ok_or(Error::BadHandle)?;
        let slot = core::mem::replace(&mut file.slot, Slot::Closed);
        file.position = 0;

        match slot {
            Slot::Closed => Err(Error::BadHandle),
            Slot::Read(_) => Ok(()),
            Slot::Write(w) => {
                let fat = fat.as_ref().ok_or(Error::NotMounted)?;
                let mut cio = CachedIo { io, cache };
                w.close(fat, &mut cio)
            }
        }
    }

    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize, Error> {
        let r = self.read_inner(fd, buf);
        self.note(r)
    }

    fn read_inner(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize, Error> {
        self.check_disk()?;

        let FloppyFs { io, cache, fat, files, .. } = self;
        let fat = fat.as_ref().ok_or(Error::NotMounted)?;
        let mut cio = CachedIo { io, cache };
        let file = files.get_mut(fd.0 as usize).ok_or(Error::BadHandle)?;

        match &mut file.slot {
            Slot::Read(r) => {
                let result = r.read(fat, &mut cio, buf);
                file.position = r.bytes_read();
                result
            }
            Slot::Write(_) => Err(Error::Invalid),
            Slot::Closed => Err(Error::BadHandle),
        }
    }

    pub fn write(&mut self, fd: Fd, buf: &[u8]) -> Result<usize, Error> {
        let r = self.write_inner(fd, buf);
        self.note(r)
    }

    fn write_inner(&mut self, fd: Fd, buf: &[u8]) -> Result<usize, Error> {
        self.check_writable()?;

        let FloppyFs { io, cache, fat, files, .. } = self;
        let fat = fat.as_ref().ok_or(Error::NotMounted)?;
        let mut cio = CachedIo { io, cache };
        let file = files.get_mut(fd.0 as usize).ok_or(Error::BadHandle)?;

        match &mut file.slot {
            Slot::Write(w) => {
                // A failed call may still have appended part of `buf`; the
                // cursor follows the writer's durable progress either way.
                let result = w.write(fat, &mut cio, buf);
                file.position = w.bytes_written();
                result
            }
            Slot::Read(_) => Err(Error::Invalid),
            Slot::Closed => Err(Error::BadHandle),
        }
    }

    /// Readers only. Implemented by re-opening at the chain head and
    /// skip-reading `offset` bytes forward.
    pub fn seek(&mut self, fd: Fd, offset: u32) -> Result<(), Error> {
        let r = self.seek_inner(fd, offset);
        self.note(r)
    }

    fn seek_inner(&mut self, fd: Fd, offset: u32) -> Result<(), Error> {
        self.check_disk()?;

        let FloppyFs { io, cache, fat, files, .. } = self;
        let fat = fat.as_ref().ok_or(Error::NotMounted)?;
        let mut cio = CachedIo { io, cache };
        let file = files.get_mut(fd.0 as usize).ok_or(Error::BadHandle)?;

        let reader = match &mut file.slot {
            Slot::Read(r) => r,
            Slot::Write(_) => return Err(Error::Invalid),
            Slot::Closed => return Err(Error::BadHandle),
        };

        reader.rewind();
        let mut scratch = [0u8; SECTOR_SIZE];
        let mut remaining = offset as usize;
        while remaining > 0 {
            let want = remaining.min(SECTOR_SIZE);
            let n = reader.read(fat, &mut cio, &mut scratch[..want])?;
            if n == 0 {
                break;
            }
            remaining -= n;
        }

        file.position = reader.bytes_read();
        Ok(())
    }

    pub fn tell(&mut self, fd: Fd) -> Result<u32, Error> {
        let r = self.tell_inner(fd);
        self.note(r)
    }

    fn tell_inner(&mut self, fd: Fd) -> Result<u32, Error> {
        self.check_disk()?;

        let file = self.files.get(fd.0 as usize).ok_or(Error::BadHandle)?;
        match file.slot {
            Slot::Closed => Err(Error::BadHandle),
            _ => Ok(file.position),
        }
    }

    /// Positioned read: seek, read, best-effort seek back.
    pub fn read_at(&mut self, fd: Fd, offset: u32, buf: &mut [u8]) -> Result<usize, Error> {
        let saved = self.tell(fd)?;
        self.seek(fd, offset)?;
        let result = self.read(fd, buf);
        let _ = self.seek(fd, saved);
        result
    }

    /// The writer is append-only; positioned writes do not exist.
    pub fn write_at(&mut self, _fd: Fd, _offset: u32, _buf: &[u8]) -> Result<usize, Error> {
        let r = Err(Error::Invalid);
        self.note(r)
    }

    pub fn stat(&mut self, path: &str) -> Result<FileInfo, Error> {
        let r = self.stat_inner(path);
        self.note(r)
    }

    fn stat_inner(&mut self, path: &str) -> Result<FileInfo, Error> {
        self.check_disk()?;

        let FloppyFs { io, cache, fat, .. } = self;
        let fat = fat.as_ref().ok_or(Error::NotMounted)?;
        let mut cio = CachedIo { io, cache };

        let (_, entry) = fat.find(&mut cio, path.trim_start_matches('/'))?;
        Ok(FileInfo::from_entry(&entry))
    }

    pub fn delete(&mut self, path: &str) -> Result<(), Error> {
        let r = self.delete_inner(path);
        self.note(r)
    }

    fn delete_inner(&mut self, path: &str) -> Result<(), Error> {
        self.check_writable()?;

        let FloppyFs { io, cache, fat, .. } = self;
        let fat = fat.as_ref().ok_or(Error::NotMounted)?;
        let mut cio = CachedIo { io, cache };

        fat.delete(&mut cio, path.trim_start_matches('/'))
    }

    /// Only the root exists on FAT12 floppies of this shape.
    pub fn opendir(&mut self, path: &str) -> Result<Dir, Error> {
        let r = self.opendir_inner(path);
        self.note(r)
    }

    fn opendir_inner(&mut self, path: &str) -> Result<Dir, Error> {
        self.check_disk()?;

        if !path.is_empty() && path != "/" {
            return Err(Error::NotFound);
        }
        Ok(Dir { index: 0 })
    }

    /// Next real file entry, skipping deleted slots, long-filename chaff,
    /// and the volume label. `Eof` past the end.
    pub fn readdir(&mut self, dir: &mut Dir) -> Result<FileInfo, Error> {
        let r = self.readdir_inner(dir);
        self.note(r)
    }

    fn readdir_inner(&mut self, dir: &mut Dir) -> Result<FileInfo, Error> {
        self.check_disk()?;

        let FloppyFs { io, cache, fat, .. } = self;
        let fat = fat.as_ref().ok_or(Error::NotMounted)?;
        let mut cio = CachedIo { io, cache };

        while dir.index < fat.bpb.root_entries {
            let entry = fat.read_root_entry(&mut cio, dir.index)?;
            dir.index += 1;

            match entry.state() {
                State::End => {
                    dir.index = fat.bpb.root_entries;
                    return Err(Error::Eof);
                }
                State::Deleted => continue,
                State::Exists => {
                    if entry.attributes.is_lfn() || entry.attributes.is_volume_label() {
                        continue;
                    }
                    return Ok(FileInfo::from_entry(&entry));
                }
            }
        }

        Err(Error::Eof)
    }

    /// Walk the root and hand every entry to `cb`.
    pub fn list<F: FnMut(&FileInfo)>(&mut self, mut cb: F) -> Result<(), Error> {
        let mut dir = self.opendir("/")?;
        loop {
            match self.readdir(&mut dir) {
                Ok(info) => cb(&info),
                Err(Error::Eof) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Size of an open file: bytes on disk for readers, bytes appended so
    /// far for writers.
    pub fn file_size(&mut self, fd: Fd) -> Result<u32, Error> {
        let r = self.file_size_inner(fd);
        self.note(r)
    }

    fn file_size_inner(&mut self, fd: Fd) -> Result<u32, Error> {
        self.check_disk()?;

        let file = self.files.get(fd.0 as usize).ok_or(Error::BadHandle)?;
        match &file.slot {
            Slot::Closed => Err(Error::BadHandle),
            Slot::Read(r) => Ok(r.file_size()),
            Slot::Write(w) => Ok(w.bytes_written()),
        }
    }

    pub fn is_open(&self, fd: Fd) -> bool {
        self.files
            .get(fd.0 as usize)
            .map(|f| !matches!(f.slot, Slot::Closed))
            .unwrap_or(false)
    }
}
