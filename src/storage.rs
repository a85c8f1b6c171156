//! The sector/track data model and the two ports the core is driven through.

use generic_array::GenericArray;
use typenum::consts::{U18, U512};

pub const SECTOR_SIZE: usize = 512;
pub const SECTORS_PER_TRACK: usize = 18;
pub const TRACKS: usize = 80;
pub const SIDES: usize = 2;
pub const TOTAL_SECTORS: usize = TRACKS * SIDES * SECTORS_PER_TRACK;

pub type SectorBuf = GenericArray<u8, U512>;

/// Opaque hard failure from the medium. The engine maps this to
/// [`Error::Io`](crate::error::Error) at its boundary and nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IoFault;

impl From<IoFault> for crate::error::Error {
    fn from(_: IoFault) -> Self {
        crate::error::Error::Io
    }
}

/// One physical sector: address, payload, and whether the payload is
/// authoritative (CRC-verified on read, to-be-written on write).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sector {
    pub track: u8,
    pub side: u8,
    pub sector_n: u8,
    /// On-disk size code; the decoder clamps this to <= 2.
    pub size_code: u8,
    pub valid: bool,
    pub data: SectorBuf,
}

impl Sector {
    pub fn at(track: u8, side: u8, sector_n: u8) -> Self {
        Self {
            track,
            side,
            sector_n,
            size_code: 2,
            valid: false,
            data: SectorBuf::default(),
        }
    }

    /// Payload length implied by the size code.
    pub fn payload_len(&self) -> usize {
        128 << self.size_code
    }

    /// Cache/bookkeeping key for this sector's address.
    pub fn key(&self) -> u32 {
        ((self.track as u32) << 16) | ((self.side as u32) << 8) | self.sector_n as u32
    }
}

/// An ordered frame of the 18 sector slots making up one physical track.
///
/// Slot `i`, when valid, holds sector `i + 1`. Invalid slots represent a
/// partial read, or on write, "fetch this one from the medium first".
#[derive(Debug, Clone)]
pub struct Track {
    pub track: u8,
    pub side: u8,
    pub sectors: GenericArray<Sector, U18>,
}

impl Track {
    pub fn new(track: u8, side: u8) -> Self {
        let mut sectors: GenericArray<Sector, U18> = GenericArray::default();
        for (i, s) in sectors.as_mut_slice().iter_mut().enumerate() {
            s.track = track;
            s.side = side;
            s.sector_n = i as u8 + 1;
            s.size_code = 2;
            s.valid = false;
        }

        Self { track, side, sectors }
    }

    pub fn slot(&self, sector_n: u8) -> Option<&Sector> {
        self.sectors.as_slice().get(sector_n.wrapping_sub(1) as usize)
    }

    pub fn slot_mut(&mut self, sector_n: u8) -> Option<&mut Sector> {
        self.sectors.as_mut_slice().get_mut(sector_n.wrapping_sub(1) as usize)
    }

    pub fn is_complete(&self) -> bool {
        self.sectors.as_slice().iter().all(|s| s.valid)
    }
}

/// The sector-oriented I/O port.
///
/// Implementors provide whole-sector reads and whole-track writes plus the
/// two drive predicates. Everything above this trait is media-agnostic: a
/// RAM image, a flux-level drive adapter, and an SCP replay all look alike.
pub trait SectorIo {
    /// `sector` arrives with its address set; fill `data` and set `valid`.
    fn read_sector(&mut self, sector: &mut Sector) -> Result<(), IoFault>;

    /// Rewrite one whole track. Invalid slots must be read back from the
    /// live medium by the callee before the rewrite; from the caller's
    /// perspective the 18 sectors land atomically.
    fn write_track(&mut self, track: &mut Track) -> Result<(), IoFault>;

    /// Edge-triggered media-change latch; reading clears it.
    fn disk_changed(&mut self) -> bool;

    /// Level-triggered write-protect sense.
    fn write_protected(&mut self) -> bool;
}

/// One flux observation from the read channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flux {
    /// Channel-clock ticks since the previous transition. Hardware counts
    /// modulo 0x8000; recovering wrapped deltas is the producer's concern.
    pub delta: u16,
    /// The index-hole line sampled at this transition.
    pub index: bool,
}

/// The flux-oriented producer port (drive FIFO, SCP replay, simulator).
pub trait FluxSource {
    fn next_flux(&mut self) -> Option<Flux>;
}

impl<I: Iterator<Item = Flux>> FluxSource for I {
    fn next_flux(&mut self) -> Option<Flux> {
        self.next()
    }
}

/// The flux-oriented consumer port: emits pre-computed pulse codes paced by
/// the write channel while the write gate is asserted.
pub trait FluxSink {
    fn write_pulses(&mut self, codes: &[u8]) -> Result<(), IoFault>;
}

cfg_if::cfg_if! {
    if #[cfg(any(test, not(feature = "no_std")))] {
        /// A linear `2880 x 512` in-memory medium serving the sector port
        /// directly, with settable write-protect and media-change latches.
        #[derive(Clone)]
        pub struct RamDisk {
            data: Vec<u8>,
            write_protect: bool,
            changed: bool,
        }

        impl RamDisk {
            pub fn new() -> Self {
                Self {
                    data: vec![0; TOTAL_SECTORS * SECTOR_SIZE],
                    write_protect: false,
                    changed: false,
                }
            }

            /// `image` must be a full 1,474,560-byte disk image.
            pub fn from_image(image: &[u8]) -> Option<Self> {
                if image.len() != TOTAL_SECTORS * SECTOR_SIZE {
                    return None;
                }

                Some(Self {
                    data: image.to_vec(),
                    write_protect: false,
                    changed: false,
                })
            }

            pub fn image(&self) -> &[u8] {
                &self.data
            }

            pub fn set_write_protect(&mut self, on: bool) {
                self.write_protect = on;
            }

            /// Latch a media change; the next `disk_changed` poll observes
            /// (and clears) it.
            pub fn set_disk_changed(&mut self) {
                self.changed = true;
            }

            fn offset(track: u8, side: u8, sector_n: u8) -> Option<usize> {
                if track as usize >= TRACKS
                    || side as usize >= SIDES
                    || sector_n < 1
                    || sector_n as usize > SECTORS_PER_TRACK
                {
                    return None;
                }

                let lba = (track as usize * SIDES + side as usize) * SECTORS_PER_TRACK
                    + sector_n as usize
                    - 1;
                Some(lba * SECTOR_SIZE)
            }
        }

        impl Default for RamDisk {
            fn default() -> Self {
                Self::new()
            }
        }

        impl SectorIo for RamDisk {
            fn read_sector(&mut self, sector: &mut Sector) -> Result<(), IoFault> {
                let off = Self::offset(sector.track, sector.side, sector.sector_n)
                    .ok_or(IoFault)?;

                sector
                    .data
                    .as_mut_slice()
                    .copy_from_slice(&self.data[off..off + SECTOR_SIZE]);
                sector.valid = true;
                Ok(())
            }

            fn write_track(&mut self, track: &mut Track) -> Result<(), IoFault> {
                if self.write_protect {
                    return Err(IoFault);
                }

                // Read-modify-write: fill the slots the caller left invalid
                // from the live medium first, then rewrite all 18.
                for s in track.sectors.as_mut_slice().iter_mut() {
                    let off =
                        Self::offset(track.track, track.side, s.sector_n).ok_or(IoFault)?;
                    if !s.valid {
                        s.data
                            .as_mut_slice()
                            .copy_from_slice(&self.data[off..off + SECTOR_SIZE]);
                        s.valid = true;
                    }
                    self.data[off..off + SECTOR_SIZE].copy_from_slice(s.data.as_slice());
                }

                Ok(())
            }

            fn disk_changed(&mut self) -> bool {
                let was = self.changed;
                self.changed = false;
                was
            }

            fn write_protected(&mut self) -> bool {
                self.write_protect
            }
        }
    }
}
