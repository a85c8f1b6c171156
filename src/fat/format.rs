//! Formatting fresh 1.44 MB media.

use super::boot_sector::BiosParameterBlock;
use super::dir::DirEntry;
use crate::error::Error;
use crate::storage::{SectorBuf, SectorIo, Track, SECTORS_PER_TRACK, SIDES, TRACKS};

/// The fixed 1.44 MB HD geometry this formatter lays down.
fn hd_bpb() -> BiosParameterBlock {
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

fn label_bytes(label: Option<&str>) -> [u8; 11] {
    match label {
        None => *b"NO NAME    ",
        Some(l) => {
            let mut out = [0x20u8; 11];
            for (o, c) in out.iter_mut().zip(l.bytes()) {
                *o = c.to_ascii_uppercase();
            }
            out
        }
    }
}

fn build_boot_sector(bpb: &BiosParameterBlock, label: Option<&str>) -> SectorBuf {
    let mut sector = SectorBuf::default();
    bpb.write(&mut sector);

    let s = sector.as_mut_slice();
    s[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
    s[3..11].copy_from_slice(b"MSDOS5.0");
    // Extended BPB: drive number, reserved, boot signature, serial number.
    s[36..43].copy_from_slice(&[0x00, 0x00, 0x29, 0x12, 0x34, 0x56, 0x78]);
    s[43..54].copy_from_slice(&label_bytes(label));
    s[54..62].copy_from_slice(b"FAT12   ");
    s[510] = 0x55;
    s[511] = 0xAA;

    sector
}

/// Lay down a fresh filesystem: boot sector, seeded FATs, empty root
/// directory (with a volume-label entry when `label` is given).
///
/// Tracks holding the system area are always written. Data-area tracks are
/// written only when `write_all_tracks` is set; in quick mode the formatter
/// stops as soon as the system area is covered.
pub fn format<S: SectorIo>(
    io: &mut S,
    label: Option<&str>,
    write_all_tracks: bool,
) -> Result<(), Error> {
    let bpb = hd_bpb();
    let boot = build_boot_sector(&bpb, label);

    let fat_start = bpb.reserved_sectors as u32;
    let root_start = fat_start + bpb.num_fats as u32 * bpb.sectors_per_fat as u32;
    let root_sectors = (bpb.root_entries as u32 * 32 + 511) / 512;
    let system_sectors = root_start + root_sectors;

    // First sector of each FAT copy carries the media descriptor seed.
    let mut fat_seed = SectorBuf::default();
    fat_seed.as_mut_slice()[0..3].copy_from_slice(&[bpb.media_descriptor, 0xFF, 0xFF]);

    let mut root_first = SectorBuf::default();
    if label.is_some() {
        let entry = DirEntry::volume_label(&label_bytes(label));
        let mut arr = [0u8; 32];
        entry.to_arr(&mut arr);
        root_first.as_mut_slice()[0..32].copy_from_slice(&arr);
    }

    for t in 0..(TRACKS * SIDES) as u32 {
        let base = t * SECTORS_PER_TRACK as u32;
        if !write_all_tracks && base >= system_sectors {
            break;
        }

        let mut frame = Track::new((t / SIDES as u32) as u8, (t % SIDES as u32) as u8);
        for (i, slot) in frame.sectors.as_mut_slice().iter_mut().enumerate() {
            let lba = base + i as u32;
            slot.valid = true;

            if lba == 0 {
                slot.data.clone_from(&boot);
            } else if lba == fat_start || lba == fat_start + bpb.sectors_per_fat as u32 {
                slot.data.clone_from(&fat_seed);
            } else if lba == root_start {
                slot.data.clone_from(&root_first);
            }
            // everything else stays zeroed
        }

        io.write_track(&mut frame).map_err(|_| Error::Io)?;
    }

    log::debug!(
        "formatted {} ({})",
        if write_all_tracks { "all tracks" } else { "system area" },
        label.unwrap_or("NO NAME"),
    );

    Ok(())
}
