//! Byte-exact parsing and building of the BIOS Parameter Block.
//!
//! Parsing and validation are kept separate: `read` takes whatever the boot
//! sector says, `validate` decides whether we are willing to mount it.

use crate::error::Error;
use crate::storage::SectorBuf;

use core::convert::TryInto;

/// Boot-sector signature bytes at offsets 510/511.
pub fn has_signature(sector: &SectorBuf) -> bool {
    let s = sector.as_slice();
    s[510] == 0x55 && s[511] == 0xAA
}

/// The DOS 3.31 BPB fields this stack recognises, bytes 11..36 of the boot
/// sector. Values are held as parsed; see `validate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BiosParameterBlock {
    // Offset: 0x00B
    pub bytes_per_sector: u16,
    // Offset: 0x00D
    pub sectors_per_cluster: u8,
    // Offset: 0x00E
    pub reserved_sectors: u16,
    // Offset: 0x010
    pub num_fats: u8,
    // Offset: 0x011
    pub root_entries: u16,
    // Offset: 0x013
    pub total_sectors: u16,
    // Offset: 0x015
    pub media_descriptor: u8,
    // Offset: 0x016
    pub sectors_per_fat: u16,
    // Offset: 0x018
    pub sectors_per_track: u16,
    // Offset: 0x01A
    pub num_heads: u16,
    // Offset: 0x01C
    pub hidden_sectors: u32,
}

impl BiosParameterBlock {
    pub fn read(sector: &SectorBuf) -> Self {
        let sector = sector.as_slice();

        macro_rules! e {
            ($ty:tt, $offset:literal) => {
                $ty::from_le_bytes(
                    sector[$offset..($offset + core::mem::size_of::<$ty>())]
                        .try_into()
                        .unwrap_or_default(),
                )
            };
        }

        Self {
            bytes_per_sector: e!(u16, 0x00B),
            sectors_per_cluster: e!(u8, 0x00D),
            reserved_sectors: e!(u16, 0x00E),
            num_fats: e!(u8, 0x010),
            root_entries: e!(u16, 0x011),
            total_sectors: e!(u16, 0x013),
            media_descriptor: e!(u8, 0x015),
            sectors_per_fat: e!(u16, 0x016),
            sectors_per_track: e!(u16, 0x018),
            num_heads: e!(u16, 0x01A),
            hidden_sectors: e!(u32, 0x01C),
        }
    }

    pub fn write(&self, sector: &mut SectorBuf) {
        let sector = sector.as_mut_slice();

        macro_rules! w {
            ($field:expr, $offset:literal) => {{
                let bytes = $field.to_le_bytes();
                sector[$offset..($offset + bytes.len())].copy_from_slice(&bytes);
            }};
        }

        w!(self.bytes_per_sector, 0x00B);
        w!(self.sectors_per_cluster, 0x00D);
        w!(self.reserved_sectors, 0x00E);
        w!(self.num_fats, 0x010);
        w!(self.root_entries, 0x011);
        w!(self.total_sectors, 0x013);
        w!(self.media_descriptor, 0x015);
        w!(self.sectors_per_fat, 0x016);
        w!(self.sectors_per_track, 0x018);
        w!(self.num_heads, 0x01A);
        w!(self.hidden_sectors, 0x01C);
    }

    /// The predicates the mount path insists on.
    pub fn validate(&self) -> Result<(), Error> {
        if self.bytes_per_sector != 512 {
            return Err(Error::Invalid);
        }
        if self.sectors_per_cluster == 0 || self.sectors_per_cluster > 64 {
            return Err(Error::Invalid);
        }
        if self.num_fats == 0 {
            return Err(Error::Invalid);
        }
        if self.sectors_per_track == 0 {
            return Err(Error::Invalid);
        }
        if self.num_heads == 0 {
            return Err(Error::Invalid);
        }
        Ok(())
    }
}

#[cfg(test)]
mod bpb {
    use super::*;
    use assert_eq as eq;

    fn hd_floppy() -> BiosParameterBlock {
        BiosParameterBlock {
            bytes_per_sector: 512,
            sectors_per_cluster: 1,
            reserved_sectors: 1,
            num_fats: 2,
            root_entries: 224,
            total_sectors: 2880,
            media_descriptor: 0xF0,
            sectors_per_fat: 9,
            sectors_per_track: 18,
            num_heads: 2,
            hidden_sectors: 0,
        }
    }

    #[test]
    fn round_trip() {
        let bpb = hd_floppy();
        let mut sector = SectorBuf::default();
        bpb.write(&mut sector);

        eq!(BiosParameterBlock::read(&sector), bpb);

        // Spot-check the little-endian layout.
        let s = sector.as_slice();
        eq!(&s[0x00B..0x00D], &[0x00, 0x02]);
        eq!(s[0x015], 0xF0);
        eq!(&s[0x013..0x015], &[0x40, 0x0B]);
    }

    #[test]
    fn validation_rejects_bad_geometry() {
        let good = hd_floppy();
        assert!(good.validate().is_ok());

        let mut b = good.clone();
        b.bytes_per_sector = 1024;
        eq!(b.validate(), Err(Error::Invalid));

        let mut b = good.clone();
        b.sectors_per_cluster = 0;
        eq!(b.validate(), Err(Error::Invalid));

        let mut b = good.clone();
        b.sectors_per_cluster = 65;
        eq!(b.validate(), Err(Error::Invalid));

        let mut b = good.clone();
        b.num_fats = 0;
        eq!(b.validate(), Err(Error::Invalid));

        let mut b = good.clone();
        b.sectors_per_track = 0;
        eq!(b.validate(), Err(Error::Invalid));

        let mut b = good;
        b.num_heads = 0;
        eq!(b.validate(), Err(Error::Invalid));
    }

    #[test]
    fn signature_check() {
        let mut sector = SectorBuf::default();
        assert!(!has_signature(&sector));

        sector.as_mut_slice()[510] = 0x55;
        sector.as_mut_slice()[511] = 0xAA;
        assert!(has_signature(&sector));
    }
}
