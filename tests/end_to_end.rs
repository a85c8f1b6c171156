//! Format/mount/write/read scenarios over the in-memory medium, plus the
//! on-disk invariants a fresh filesystem must keep.

use floppyfs::fat::{table, Fat12};
use floppyfs::storage::{RamDisk, SECTOR_SIZE};
use floppyfs::{Error, FloppyFs, Mode};

fn formatted(label: Option<&str>) -> FloppyFs<RamDisk> {
    let mut fs = FloppyFs::new(RamDisk::new());
    fs.format(label, false).unwrap();
    fs.mount().unwrap();
    fs
}

fn write_file(fs: &mut FloppyFs<RamDisk>, name: &str, data: &[u8]) {
    let fd = fs.open(name, Mode::Write).unwrap();
    assert_eq!(fs.write(fd, data).unwrap(), data.len());
    fs.close(fd).unwrap();
}

fn read_file(fs: &mut FloppyFs<RamDisk>, name: &str) -> Vec<u8> {
    let fd = fs.open(name, Mode::Read).unwrap();
    let size = fs.file_size(fd).unwrap() as usize;
    let mut out = vec![0u8; size];
    let mut got = 0;
    while got < size {
        let n = fs.read(fd, &mut out[got..]).unwrap();
        if n == 0 {
            break;
        }
        got += n;
    }
    fs.close(fd).unwrap();
    assert_eq!(got, size);
    out
}

/// Both FAT copies bit-identical, and every listed file's chain length
/// matches its size.
fn check_invariants(fs: &mut FloppyFs<RamDisk>) {
    let mut disk = fs.io_mut().clone();
    let fat = Fat12::init(&mut disk).unwrap();

    let fat_bytes = fat.bpb.sectors_per_fat as usize * SECTOR_SIZE;
    let fat0_start = fat.fat_start as usize * SECTOR_SIZE;
    for copy in 1..fat.bpb.num_fats as usize {
        let start = fat0_start + copy * fat_bytes;
        assert_eq!(
            &disk.image()[fat0_start..fat0_start + fat_bytes],
            &disk.image()[start..start + fat_bytes],
            "FAT copy {} diverged",
            copy
        );
    }

    let cluster_bytes = fat.cluster_bytes();
    let mut names = Vec::new();
    fs.list(|info| names.push((info.name().to_string(), info.size))).unwrap();
    for (name, size) in names {
        let (_, entry) = fat.find(&mut disk, &name).unwrap();
        let want = (size + cluster_bytes - 1) / cluster_bytes;
        assert_eq!(
            fat.chain_len(&mut disk, entry.start_cluster).unwrap(),
            want,
            "{} chain length",
            name
        );
    }
}

#[test]
fn format_lays_down_label_and_signature() {
    let mut fs = FloppyFs::new(RamDisk::new());
    fs.format(Some("TESTDISK"), false).unwrap();

    let image = fs.io_mut().image();

    // Volume label dirent at the head of the root directory (lba 19).
    let entry = &image[19 * SECTOR_SIZE..19 * SECTOR_SIZE + 32];
    assert_eq!(&entry[0..8], b"TESTDISK");
    assert_eq!(&entry[8..11], b"   ");
    assert_eq!(entry[11], 0x08);

    assert_eq!(image[510], 0x55);
    assert_eq!(image[511], 0xAA);
}

#[test]
fn hello_survives_a_remount() {
    let mut fs = formatted(Some("TESTDISK"));

    write_file(&mut fs, "HELLO.TXT", b"Hello, World!");

    fs.unmount();
    assert!(!fs.mounted());
    fs.mount().unwrap();

    let info = fs.stat("HELLO.TXT").unwrap();
    assert_eq!(info.size, 13);
    assert_eq!(info.name(), "HELLO.TXT");
    assert!(!info.is_dir);

    assert_eq!(read_file(&mut fs, "HELLO.TXT"), b"Hello, World!");
    check_invariants(&mut fs);
}

#[test]
fn big_file_builds_a_four_cluster_chain() {
    let mut fs = formatted(None);

    let data: Vec<u8> = (0..2000u32).map(|i| (i & 0xFF) as u8).collect();
    write_file(&mut fs, "BIG.DAT", &data);

    // Chain length straight from the FAT.
    let mut disk = fs.io_mut().clone();
    let fat = Fat12::init(&mut disk).unwrap();
    let (_, entry) = fat.find(&mut disk, "BIG.DAT").unwrap();
    assert_eq!(fat.chain_len(&mut disk, entry.start_cluster).unwrap(), 4);

    assert_eq!(read_file(&mut fs, "BIG.DAT"), data);
    check_invariants(&mut fs);
}

#[test]
fn cycled_files_all_read_back() {
    let mut fs = formatted(None);

    for cycle in 0u32..3 {
        let data: Vec<u8> = (0..1024u32)
            .map(|i| ((cycle * 100 + i) & 0xFF) as u8)
            .collect();
        write_file(&mut fs, &format!("CYCLE{}.DAT", cycle), &data);
    }

    for cycle in 0u32..3 {
        let data: Vec<u8> = (0..1024u32)
            .map(|i| ((cycle * 100 + i) & 0xFF) as u8)
            .collect();
        assert_eq!(
            read_file(&mut fs, &format!("CYCLE{}.DAT", cycle)),
            data,
            "cycle {}",
            cycle
        );
    }

    check_invariants(&mut fs);
}

#[test]
fn delete_every_other_then_refill() {
    let mut fs = formatted(None);

    let payload = |tag: u32| -> Vec<u8> {
        (0..3000u32).map(|i| (i.wrapping_mul(tag + 3) >> 2) as u8).collect()
    };

    for tag in 0u32..8 {
        write_file(&mut fs, &format!("F{}.BIN", tag), &payload(tag));
    }
    for tag in (0u32..8).step_by(2) {
        fs.delete(&format!("F{}.BIN", tag)).unwrap();
    }
    for tag in 8u32..12 {
        write_file(&mut fs, &format!("F{}.BIN", tag), &payload(tag));
    }

    // Survivors untouched, newcomers readable.
    for tag in (1u32..8).step_by(2).chain(8..12) {
        assert_eq!(
            read_file(&mut fs, &format!("F{}.BIN", tag)),
            payload(tag),
            "file {}",
            tag
        );
    }
    for tag in (0u32..8).step_by(2) {
        assert_eq!(
            fs.stat(&format!("F{}.BIN", tag)),
            Err(Error::NotFound),
            "file {} should be gone",
            tag
        );
    }

    check_invariants(&mut fs);
}

#[test]
fn write_protect_gates_writes_not_reads() {
    let mut fs = formatted(None);

    write_file(&mut fs, "Y.TXT", b"keep me");

    fs.io_mut().set_write_protect(true);

    assert_eq!(fs.open("X.TXT", Mode::Write), Err(Error::WriteProtected));
    assert_eq!(fs.delete("Y.TXT"), Err(Error::WriteProtected));
    assert_eq!(fs.last_error(), Some(Error::WriteProtected));

    // Reading still works.
    assert_eq!(read_file(&mut fs, "Y.TXT"), b"keep me");

    fs.io_mut().set_write_protect(false);
    fs.delete("Y.TXT").unwrap();
    assert_eq!(fs.stat("Y.TXT"), Err(Error::NotFound));
}

#[test]
fn format_on_protected_media_is_refused() {
    let mut fs = FloppyFs::new(RamDisk::new());
    fs.io_mut().set_write_protect(true);

    assert_eq!(fs.format(None, false), Err(Error::WriteProtected));
}

#[test]
fn zero_byte_file_stat() {
    let mut fs = formatted(None);

    let fd = fs.open("EMPTY.TXT", Mode::Write).unwrap();
    fs.close(fd).unwrap();

    let info = fs.stat("EMPTY.TXT").unwrap();
    assert_eq!(info.size, 0);

    // On disk: no chain at all.
    let mut disk = fs.io_mut().clone();
    let fat = Fat12::init(&mut disk).unwrap();
    let (_, entry) = fat.find(&mut disk, "EMPTY.TXT").unwrap();
    assert_eq!(entry.start_cluster, 0);
    assert_eq!(fat.chain_len(&mut disk, entry.start_cluster).unwrap(), 0);
}

#[test]
fn fill_to_capacity_reports_full() {
    let mut fs = formatted(None);

    // One file can cover most of the data area; cap the count as a guard
    // against runaway allocation bugs.
    let chunk = vec![0xA5u8; 64 * 1024];
    let fd = fs.open("HOG.BIN", Mode::Write).unwrap();
    let mut wrote = 0u64;
    let mut full = false;
    for _ in 0..40 {
        match fs.write(fd, &chunk) {
            Ok(n) => wrote += n as u64,
            Err(Error::Full) => {
                full = true;
                break;
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert!(full, "disk never filled (wrote {} bytes)", wrote);
    // 2847 clusters of 512 bytes.
    assert!(wrote <= 2847 * 512);

    // The failing call made partial progress; the cursor tracks what the
    // writer durably appended, not just the completed calls.
    let durable = fs.file_size(fd).unwrap();
    assert_eq!(fs.tell(fd).unwrap(), durable);
    assert!(durable as u64 >= wrote);

    fs.close(fd).unwrap();
}

#[test]
fn mirrored_fats_after_every_kind_of_update() {
    let mut fs = formatted(Some("MIRROR"));

    write_file(&mut fs, "ONE.BIN", &[1u8; 700]);
    write_file(&mut fs, "TWO.BIN", &[2u8; 1500]);
    fs.delete("ONE.BIN").unwrap();
    write_file(&mut fs, "THREE.BIN", &[3u8; 400]);

    check_invariants(&mut fs);

    // And the free pool agrees with what is left.
    let mut disk = fs.io_mut().clone();
    let fat = Fat12::init(&mut disk).unwrap();
    let used: u32 = (2..fat.total_clusters + 2)
        .filter(|&c| fat.get_entry(&mut disk, c as table::Cluster).unwrap() != 0)
        .count() as u32;
    assert_eq!(used, 3 + 1); // TWO.BIN (3 clusters) + THREE.BIN (1)
}
