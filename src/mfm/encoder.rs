//! Track encoder: sector bytes down to write-channel pulse codes.

use super::crc::record_digest;
use super::{ADDRESS_MARK, DATA_MARK, SYNC_MARK};
use crate::storage::{Sector, Track};

/// Pulse codes handed to the write channel, one per flux transition.
///
/// The defaults target a 24 MHz channel with the fixed hardware pipeline
/// overhead already subtracted; test rigs substitute codes in the read
/// channel's tick domain to close the loop through the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseCodes {
    pub short: u8,
    pub medium: u8,
    pub long: u8,
}

impl Default for PulseCodes {
    fn default() -> Self {
        Self { short: 29, medium: 53, long: 77 }
    }
}

// IBM PC 1.44 MB gap layout, in (pre-encoding) track bytes.
const GAP_BYTE: u8 = 0x4E;
const GAP_PRE_ID: usize = 12;
const GAP_INTER_RECORD: usize = 22;
const GAP_POST_DATA: usize = 54;
const GAP_LEAD_IN: usize = 80;
const GAP_LEAD_OUT: usize = 182;

const PREAMBLE_ZEROS: usize = 12;

/// Encodes data bytes as MFM pulse codes into a caller-supplied buffer.
/// Output past the buffer's end is silently dropped; the write position
/// never passes capacity.
pub struct Encoder<'a> {
    out: &'a mut [u8],
    pos: usize,
    codes: PulseCodes,
    /// Last data bit emitted, for clock generation.
    prev_bit: bool,
    /// Half-cells since the last transition.
    pending_cells: u8,
}

impl<'a> Encoder<'a> {
    pub fn new(out: &'a mut [u8]) -> Self {
        Self::with_codes(out, PulseCodes::default())
    }

    pub fn with_codes(out: &'a mut [u8], codes: PulseCodes) -> Self {
        Self {
            out,
            pos: 0,
            codes,
            prev_bit: false,
            // Pretend a transition sits one half-cell back so the opening
            // pulse still maps onto a legal code.
            pending_cells: 1,
        }
    }

    /// Pulse codes written so far.
    pub fn len(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    fn emit(&mut self, code: u8) {
        if self.pos < self.out.len() {
            self.out[self.pos] = code;
            self.pos += 1;
        }
    }

    fn half_cell(&mut self, one: bool) {
        self.pending_cells = self.pending_cells.saturating_add(1);
        if one {
            let code = match self.pending_cells {
                2 => self.codes.short,
                3 => self.codes.medium,
                _ => self.codes.long,
            };
            self.emit(code);
            self.pending_cells = 0;
        }
    }

    fn data_bit(&mut self, bit: bool, suppress_clock: bool) {
        // The inserted clock is high only between two zero data bits.
        let clock = !self.prev_bit && !bit && !suppress_clock;
        self.half_cell(clock);
        self.half_cell(bit);
        self.prev_bit = bit;
    }

    pub fn encode_byte(&mut self, byte: u8) {
        for i in (0..8).rev() {
            self.data_bit(byte & (1 << i) != 0, false);
        }
    }

    fn gap(&mut self, n: usize) {
        for _ in 0..n {
            self.encode_byte(GAP_BYTE);
        }
    }

    /// Twelve preamble zeros, then three `A1` marks with the clock between
    /// bits 3 and 2 suppressed — the canonical fifteen-pulse signature.
    pub fn encode_sync(&mut self) {
        for _ in 0..PREAMBLE_ZEROS {
            self.encode_byte(0x00);
        }
        for _ in 0..3 {
            for i in (0..8).rev() {
                self.data_bit(SYNC_MARK & (1 << i) != 0, i == 2);
            }
        }
    }

    /// Address record, inter-record gap, data record — one sector's worth of
    /// track, gaps included.
    pub fn encode_sector(&mut self, sector: &Sector) {
        self.gap(GAP_PRE_ID);

        self.encode_sync();
        let header = [
            ADDRESS_MARK,
            sector.track,
            sector.side,
            sector.sector_n,
            0x02,
        ];
        for b in header.iter() {
            self.encode_byte(*b);
        }
        let crc = super::crc::crc16_mfm(&header);
        self.encode_byte((crc >> 8) as u8);
        self.encode_byte(crc as u8);

        self.gap(GAP_INTER_RECORD);

        self.encode_sync();
        self.encode_byte(DATA_MARK);
        for b in sector.data.as_slice().iter() {
            self.encode_byte(*b);
        }
        let crc = {
            let mut d = record_digest();
            d.update(&[DATA_MARK]);
            d.update(sector.data.as_slice());
            d.finalize()
        };
        self.encode_byte((crc >> 8) as u8);
        self.encode_byte(crc as u8);

        self.gap(GAP_POST_DATA);
    }

    /// A full 18-sector track in the IBM PC 1.44 MB layout. Returns the
    /// total pulse codes written so far.
    pub fn encode_track(&mut self, track: &Track) -> usize {
        self.gap(GAP_LEAD_IN);
        for sector in track.sectors.as_slice().iter() {
            self.encode_sector(sector);
        }
        self.gap(GAP_LEAD_OUT);

        self.pos
    }
}
