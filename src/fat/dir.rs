//! Root-directory entries and 8.3 names.

use core::convert::TryInto;
use core::fmt::{self, Debug};

pub const DIRENT_SIZE: usize = 32;

/// End-of-directory marker in a dirent's first name byte.
pub const NAME_END: u8 = 0x00;
/// Deleted/free marker in a dirent's first name byte.
pub const NAME_DELETED: u8 = 0xE5;

pub enum Attribute {
    ReadOnly = 0x01,
    Hidden = 0x02,
    System = 0x04,
    VolumeId = 0x08,
    Directory = 0x10,
    Archive = 0x20,
}

/// The attribute combination long-filename entries masquerade as.
pub const LFN_MARKER: u8 = 0x0F;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttributeSet {
    pub inner: u8,
}

impl AttributeSet {
    pub fn is_read_only(&self) -> bool {
        (self.inner & Attribute::ReadOnly as u8) != 0
    }

    pub fn is_dir(&self) -> bool {
        (self.inner & Attribute::Directory as u8) != 0
    }

    pub fn is_volume_label(&self) -> bool {
        (self.inner & Attribute::VolumeId as u8) != 0
    }

    pub fn is_lfn(&self) -> bool {
        self.inner == LFN_MARKER
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct FileName(pub [u8; 8]);

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct FileExt(pub [u8; 3]);

impl FileName {
    /// Space-padded, uppercased, truncated to eight bytes.
    pub fn new(s: &str) -> Self {
        let mut out = [0x20u8; 8];
        for (o, c) in out.iter_mut().zip(s.bytes()) {
            *o = c.to_ascii_uppercase();
        }
        Self(out)
    }
}

impl FileExt {
    pub fn new(s: &str) -> Self {
        let mut out = [0x20u8; 3];
        for (o, c) in out.iter_mut().zip(s.bytes()) {
            *o = c.to_ascii_uppercase();
        }
        Self(out)
    }
}

impl Debug for FileName {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in self.0.iter() {
            if *i == 0x20 || *i == 0x00 {
                return Ok(());
            } else {
                write!(fmt, "{}", *i as char)?;
            }
        }

        Ok(())
    }
}

impl Debug for FileExt {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in self.0.iter() {
            if *i == 0x20 || *i == 0x00 {
                return Ok(());
            } else {
                write!(fmt, "{}", *i as char)?;
            }
        }

        Ok(())
    }
}

/// Split a path component at the first dot and pad both halves.
pub fn normalize_83(name: &str) -> (FileName, FileExt) {
    let mut parts = name.splitn(2, '.');
    let base = parts.next().unwrap_or("");
    let ext = parts.next().unwrap_or("");

    (FileName::new(base), FileExt::new(ext))
}

/// What a dirent's first name byte says about the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Exists,
    Deleted,
    End,
}

/// One 32-byte root-directory entry, FAT12 flavour: the ten bytes between
/// the attribute and the time stamp carry nothing we interpret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirEntry {
    // Offset: 00
    pub name: FileName,
    // Offset: 08
    pub ext: FileExt,
    // Offset: 11
    pub attributes: AttributeSet,
    // Offset: 12
    reserved: [u8; 10],
    // Offset: 22
    pub time: u16,
    // Offset: 24
    pub date: u16,
    // Offset: 26
    pub start_cluster: u16,
    // Offset: 28
    pub size: u32,
}

impl DirEntry {
    pub fn state(&self) -> State {
        match self.name.0[0] {
            NAME_END => State::End,
            NAME_DELETED => State::Deleted,
            _ => State::Exists,
        }
    }

    pub fn new_file(name: FileName, ext: FileExt) -> Self {
        let mut d = Self::default();
        d.name = name;
        d.ext = ext;
        d.attributes.inner = Attribute::Archive as u8;
        d
    }

    /// The special root entry a formatted volume label lives in.
    pub fn volume_label(label: &[u8; 11]) -> Self {
        let mut d = Self::default();
        d.name = FileName(label[0..8].try_into().unwrap_or_default());
        d.ext = FileExt(label[8..11].try_into().unwrap_or_default());
        d.attributes.inner = Attribute::VolumeId as u8;
        d
    }

    pub fn mark_deleted(&mut self) {
        self.name.0[0] = NAME_DELETED;
    }

    pub fn from_arr(arr: &[u8; 32]) -> Self {
        macro_rules! e {
            ($ty:tt, $offset:literal) => {
                $ty::from_le_bytes(
                    arr[$offset..($offset + core::mem::size_of::<$ty>())]
                        .try_into()
                        .unwrap_or_default(),
                )
            };
        }

        Self {
            name: FileName(arr[0..8].try_into().unwrap_or_default()),
            ext: FileExt(arr[8..11].try_into().unwrap_or_default()),
            attributes: AttributeSet { inner: arr[11] },
            reserved: arr[12..22].try_into().unwrap_or_default(),
            time: e!(u16, 22),
            date: e!(u16, 24),
            start_cluster: e!(u16, 26),
            size: e!(u32, 28),
        }
    }

    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let arr: &[u8; 32] = slice.try_into().ok()?;
        Some(Self::from_arr(arr))
    }

    pub fn to_arr(&self, arr: &mut [u8; 32]) {
        arr[0..8].copy_from_slice(&self.name.0);
        arr[8..11].copy_from_slice(&self.ext.0);
        arr[11] = self.attributes.inner;
        arr[12..22].copy_from_slice(&self.reserved);
        arr[22..24].copy_from_slice(&self.time.to_le_bytes());
        arr[24..26].copy_from_slice(&self.date.to_le_bytes());
        arr[26..28].copy_from_slice(&self.start_cluster.to_le_bytes());
        arr[28..32].copy_from_slice(&self.size.to_le_bytes());
    }

    /// "NAME.EXT" into `out`; returns the length used.
    pub fn display_name(&self, out: &mut [u8; 12]) -> usize {
        let mut n = 0;
        for &c in self.name.0.iter() {
            if c == 0x20 || c == 0x00 {
                break;
            }
            out[n] = c;
            n += 1;
        }

        let ext_len = self
            .ext
            .0
            .iter()
            .take_while(|&&c| c != 0x20 && c != 0x00)
            .count();
        if ext_len > 0 {
            out[n] = b'.';
            n += 1;
            for &c in self.ext.0.iter().take(ext_len) {
                out[n] = c;
                n += 1;
            }
        }

        n
    }
}
