//! CRC-16/CCITT as IBM PC MFM records use it.

use crc::{Crc, CRC_16_IBM_3740};

/// Poly 0x1021, initial 0xFFFF, MSB-first, no reflection, no final xor.
pub static CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Incremental digest type held by the streaming decoder.
pub type RecordDigest = ::crc::Digest<'static, u16>;

/// A digest pre-seeded with the three `A1` sync marks that precede every
/// record on disk.
pub fn record_digest() -> RecordDigest {
    let mut d = CRC16.digest();
    d.update(&[super::SYNC_MARK; 3]);
    d
}

/// Checksum of a record as laid out after the sync marks (mark byte first).
pub fn crc16_mfm(buf: &[u8]) -> u16 {
    let mut d = record_digest();
    d.update(buf);
    d.finalize()
}
