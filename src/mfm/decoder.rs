//! Streaming flux-transition decoder for IBM PC MFM tracks.
//!
//! One `(delta, index)` observation goes in per [`Decoder::feed`] call; a
//! completed, CRC-checked sector comes out by return value. The decoder
//! never blocks, never allocates, and holds no reference to the channel.

use super::crc::{record_digest, RecordDigest};
use super::{
    Pulse, ADDRESS_MARK, DATA_MARK, DELETED_DATA_MARK, MIN_PREAMBLE_RUN, PULSE_CEILING,
    PULSE_FLOOR, SYNC_PATTERN, T2_MAX_INIT, T3_MAX_INIT,
};
use crate::storage::{Flux, FluxSource, Sector, Track, SECTOR_SIZE};

/// Room for the largest record: mark + clamped payload + CRC, with slack.
const BUF_LEN: usize = SECTOR_SIZE + 16;

/// Fallback record length when a data mark arrives with no address record
/// in hand: mark + 512 payload + CRC.
const ORPHAN_RECORD_LEN: usize = 515;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Counting consecutive short pulses toward a preamble.
    Hunt,
    /// Matching the fifteen-pulse sync signature.
    Syncing,
    /// Mid-stream, last transition fell on a data half-cell.
    Data,
    /// Mid-stream, last transition fell on a clock half-cell.
    Clock,
}

/// Diagnostics only; nothing here feeds back into decoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub syncs_found: u32,
    pub sectors_read: u32,
    pub crc_errors: u32,
}

#[derive(Debug, Clone, Copy)]
struct PendingAddr {
    track: u8,
    side: u8,
    sector_n: u8,
    size_code: u8,
}

pub struct Decoder {
    phase: Phase,

    // Adaptive pulse classification.
    t_cell: u16,
    t2_max: u16,
    t3_max: u16,

    // Preamble hunting.
    short_run: u32,
    preamble_sum: u32,

    sync_stage: u8,

    // Byte assembly.
    byte_acc: u8,
    bit_count: u8,
    buf: [u8; BUF_LEN],
    buf_pos: usize,
    bytes_expected: usize,
    digest: Option<RecordDigest>,
    overflow: bool,

    pending_addr: Option<PendingAddr>,

    stats: DecoderStats,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            phase: Phase::Hunt,
            t_cell: T2_MAX_INIT * 4 / 5,
            t2_max: T2_MAX_INIT,
            t3_max: T3_MAX_INIT,
            short_run: 0,
            preamble_sum: 0,
            sync_stage: 0,
            byte_acc: 0,
            bit_count: 0,
            buf: [0; BUF_LEN],
            buf_pos: 0,
            bytes_expected: 0,
            digest: None,
            overflow: false,
            pending_addr: None,
            stats: DecoderStats::default(),
        }
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Feed one flux interval. Returns a completed data record, if this
    /// pulse finished one. Recovered coordinates are untrusted until the
    /// caller has checked them against the expected `(track, side)`.
    pub fn feed(&mut self, flux: Flux) -> Option<Sector> {
        let pulse = self.classify(flux.delta);

        // Track slow channel drift off the short pulses. The hunt phase has
        // its own mean-based estimate, and the floor/ceiling gates stay hard
        // regardless.
        if pulse == Pulse::Short && self.phase != Phase::Hunt {
            self.retune(flux.delta);
        }

        match self.phase {
            Phase::Hunt => {
                self.hunt(pulse, flux.delta);
                None
            }
            Phase::Syncing => {
                self.syncing(pulse, flux.delta);
                None
            }
            Phase::Data => self.data_pulse(pulse),
            Phase::Clock => self.clock_pulse(pulse),
        }
    }

    fn classify(&self, delta: u16) -> Pulse {
        if delta < PULSE_FLOOR || delta >= PULSE_CEILING {
            Pulse::Invalid
        } else if delta <= self.t2_max {
            Pulse::Short
        } else if delta <= self.t3_max {
            Pulse::Medium
        } else {
            Pulse::Long
        }
    }

    fn retune(&mut self, delta: u16) {
        let t = self.t_cell as i32;
        let t = t + (((delta as i32 - t) + 8) >> 4);
        self.t_cell = t as u16;
        self.t2_max = self.t_cell * 5 / 4;
        self.t3_max = self.t_cell * 7 / 4;
    }

    fn reset_to_hunt(&mut self) {
        self.phase = Phase::Hunt;
        self.short_run = 0;
        self.preamble_sum = 0;
        self.sync_stage = 0;
        self.digest = None;
    }

    fn hunt(&mut self, pulse: Pulse, delta: u16) {
        match pulse {
            Pulse::Short => {
                self.short_run += 1;
                self.preamble_sum += delta as u32;
            }
            Pulse::Medium if self.short_run >= MIN_PREAMBLE_RUN => {
                // A long-enough preamble broken by a medium: this may be the
                // first pulse of the sync signature. The preamble mean seeds
                // the cell clock.
                self.t_cell = (self.preamble_sum / self.short_run) as u16;
                self.t2_max = self.t_cell * 5 / 4;
                self.t3_max = self.t_cell * 7 / 4;
                self.short_run = 0;
                self.preamble_sum = 0;
                self.sync_stage = 1;
                self.phase = Phase::Syncing;
            }
            _ => {
                self.short_run = 0;
                self.preamble_sum = 0;
            }
        }
    }

    fn syncing(&mut self, pulse: Pulse, delta: u16) {
        if pulse != SYNC_PATTERN[self.sync_stage as usize] {
            let was_short = pulse == Pulse::Short;
            self.reset_to_hunt();
            if was_short {
                self.short_run = 1;
                self.preamble_sum = delta as u32;
            }
            return;
        }

        self.sync_stage += 1;
        if self.sync_stage as usize == SYNC_PATTERN.len() {
            self.stats.syncs_found += 1;
            self.byte_acc = 0;
            self.bit_count = 0;
            self.buf_pos = 0;
            self.bytes_expected = 0;
            self.overflow = false;
            self.digest = Some(record_digest());
            self.phase = Phase::Data;
        }
    }

    fn data_pulse(&mut self, pulse: Pulse) -> Option<Sector> {
        match pulse {
            Pulse::Short => self.push_bit(true),
            Pulse::Medium => {
                let done = self.push_bit(false);
                if done.is_some() || self.phase == Phase::Hunt {
                    return done;
                }
                let done = self.push_bit(false);
                if done.is_none() && self.phase != Phase::Hunt {
                    self.phase = Phase::Clock;
                }
                done
            }
            Pulse::Long => {
                let done = self.push_bit(false);
                if done.is_some() || self.phase == Phase::Hunt {
                    return done;
                }
                self.push_bit(true)
            }
            Pulse::Invalid => {
                self.reset_to_hunt();
                None
            }
        }
    }

    fn clock_pulse(&mut self, pulse: Pulse) -> Option<Sector> {
        match pulse {
            Pulse::Short => self.push_bit(false),
            Pulse::Medium => {
                let done = self.push_bit(true);
                if done.is_none() && self.phase != Phase::Hunt {
                    self.phase = Phase::Data;
                }
                done
            }
            // A long pulse out of a clock transition breaks the MFM run
            // length rules.
            Pulse::Long | Pulse::Invalid => {
                self.reset_to_hunt();
                None
            }
        }
    }

    fn push_bit(&mut self, bit: bool) -> Option<Sector> {
        self.byte_acc = (self.byte_acc << 1) | bit as u8;
        self.bit_count += 1;
        if self.bit_count < 8 {
            return None;
        }

        self.bit_count = 0;
        let byte = self.byte_acc;
        self.push_byte(byte)
    }

    fn push_byte(&mut self, byte: u8) -> Option<Sector> {
        if let Some(d) = self.digest.as_mut() {
            d.update(&[byte]);
        }

        if self.buf_pos < BUF_LEN {
            self.buf[self.buf_pos] = byte;
            self.buf_pos += 1;
        } else {
            self.overflow = true;
        }

        if self.buf_pos == 1 {
            // The first byte after sync names the record.
            match byte {
                ADDRESS_MARK => self.bytes_expected = 7,
                DATA_MARK | DELETED_DATA_MARK => {
                    self.bytes_expected = match self.pending_addr {
                        Some(a) => 1 + (128usize << a.size_code) + 2,
                        None => ORPHAN_RECORD_LEN,
                    };
                }
                _ => {
                    self.reset_to_hunt();
                }
            }
            return None;
        }

        if self.buf_pos == self.bytes_expected {
            return self.finish_record();
        }

        None
    }

    fn finish_record(&mut self) -> Option<Sector> {
        // The CRC bytes themselves went through the digest, so a clean
        // record leaves the register at zero.
        let crc = match self.digest.take() {
            Some(d) => d.finalize(),
            None => 1,
        };

        let out = if self.buf[0] == ADDRESS_MARK {
            if crc == 0 {
                let size_code = self.buf[4] & 0x03;
                self.pending_addr = Some(PendingAddr {
                    track: self.buf[1],
                    side: self.buf[2],
                    sector_n: self.buf[3],
                    size_code: if size_code > 2 { 2 } else { size_code },
                });
            } else {
                log::warn!("address record failed crc");
                self.stats.crc_errors += 1;
                self.pending_addr = None;
            }
            None
        } else {
            let valid = crc == 0 && !self.overflow;
            let (track, side, sector_n, size_code) = match self.pending_addr.take() {
                Some(a) => (a.track, a.side, a.sector_n, a.size_code),
                None => (0, 0, 0, 2),
            };

            let mut sector = Sector::at(track, side, sector_n);
            sector.size_code = size_code;
            let n = core::cmp::min(128usize << size_code, SECTOR_SIZE);
            sector.data.as_mut_slice()[..n].copy_from_slice(&self.buf[1..1 + n]);
            sector.valid = valid;

            if valid {
                self.stats.sectors_read += 1;
            } else {
                log::warn!(
                    "data record for ({}, {}, {}) failed crc",
                    track,
                    side,
                    sector_n
                );
                self.stats.crc_errors += 1;
            }

            Some(sector)
        };

        self.reset_to_hunt();
        out
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// The thin adapter from the flux port up to the sector world: run a decoder
/// over `src` until the addressed track is complete or `pulse_budget`
/// observations have been consumed.
pub fn decode_track<F: FluxSource>(
    src: &mut F,
    track: u8,
    side: u8,
    pulse_budget: u32,
) -> (Track, DecoderStats) {
    let mut decoder = Decoder::new();
    let mut out = Track::new(track, side);

    for _ in 0..pulse_budget {
        if out.is_complete() {
            break;
        }
        let flux = match src.next_flux() {
            Some(f) => f,
            None => break,
        };

        if let Some(sector) = decoder.feed(flux) {
            if !sector.valid || sector.track != track || sector.side != side {
                continue;
            }
            if let Some(slot) = out.slot_mut(sector.sector_n) {
                if !slot.valid {
                    *slot = sector;
                }
            }
        }
    }

    (out, decoder.stats())
}
