//! Demodulator: turns a sample stream into [`Packet`] records.
//!
//! The body is rendered as an explicit `Stage` tagged union, the same shape
//! `m17core::tnc::SoftTnc` uses for its `State` enum. Every sub-measurement
//! is driven by a [`Counter`], which is what lets the whole thing suspend and
//! resume mid-pulse when the host hands samples over in fragments.

use std::collections::VecDeque;

use crate::coroutine::{Coroutine, CoroutineBody, Poll, Step};
use crate::diagnostics::{diag_debug, diag_trace, Diagnostics};
use crate::error::OokError;
use crate::packet::{within_range, BitBuffer, Packet, TimingParams};
use crate::sample_stream::{drive, is_high, is_low, Counter, SampleCursor};

/// How far above the calibrated bit width a low run must run before it's
/// treated as the sync burst's terminating gap rather than another sync
/// half-period.
const SYNC_BREAK_RATIO: f64 = 1.7;

/// Fatal, internal-only conditions. Mirrors `SoftTncError`'s style: a plain
/// `Copy` enum with no `Display` impl, since these never leave the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemodError {
    Timeout,
    TooManyBits,
    BadMidamble,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Data,
    Check,
}

enum Stage {
    WaitHigh(Counter),
    SyncHi {
        counter: Counter,
        detected_width: u32,
        sync_count: u32,
    },
    SyncLo {
        counter: Counter,
        detected_width: u32,
        sync_count: u32,
        hi: u32,
    },
    Preamble {
        counter: Counter,
        detected_width: u32,
        sync_count: u32,
    },
    Segment {
        timing: TimingParams,
        sync_count: u32,
        data: BitBuffer,
        check: BitBuffer,
        pass: Pass,
        level_is_high: bool,
        counter: Counter,
    },
    MidambleTail {
        timing: TimingParams,
        sync_count: u32,
        data: BitBuffer,
        check: BitBuffer,
        pass: Pass,
        level_is_high: bool,
        counter: Counter,
    },
}

impl Stage {
    fn initial() -> Self {
        Stage::WaitHigh(Counter::new(None))
    }
}

/// The demodulator's coroutine body: one pass through this is one attempt at
/// reading a single packet out of the stream.
struct DemodBody {
    stage: Stage,
    tolerance: f64,
    diagnostics: Diagnostics,
    inbox: VecDeque<Packet>,
}

impl DemodBody {
    fn new(tolerance: f64, diagnostics: Diagnostics) -> Self {
        DemodBody {
            stage: Stage::initial(),
            tolerance,
            diagnostics,
            inbox: VecDeque::new(),
        }
    }

    fn abandon(&mut self, reason: &str) -> Poll<()> {
        diag_debug!(self.diagnostics, "ook demod: abandoning packet read: {reason}");
        Poll::Ready(())
    }

    fn fail(&mut self, err: DemodError) -> Poll<()> {
        diag_debug!(self.diagnostics, "ook demod: fatal error: {err:?}");
        Poll::Ready(())
    }

    fn finish_read(&mut self, sync_count: u32, data: BitBuffer, check: BitBuffer) -> Poll<()> {
        if !data.is_empty() && !check.is_empty() {
            let packet = Packet::build(sync_count, &data, &check);
            diag_trace!(self.diagnostics, "ook demod: emitting packet {}", packet.pretty);
            self.inbox.push_back(packet);
        }
        Poll::Ready(())
    }
}

impl CoroutineBody for DemodBody {
    fn reset_state(&mut self) {
        self.stage = Stage::initial();
    }
}

impl<'a> Step<SampleCursor<'a>> for DemodBody {
    type Output = ();

    fn poll(&mut self, cursor: &mut SampleCursor<'a>) -> Poll<()> {
        loop {
            match &mut self.stage {
                Stage::WaitHigh(counter) => match counter.advance(cursor, is_high) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Ok(_)) => {
                        self.stage = Stage::SyncHi {
                            counter: Counter::new(None),
                            detected_width: 0,
                            sync_count: 0,
                        };
                    }
                    Poll::Ready(Err(_)) => unreachable!("unbounded counter cannot time out"),
                },

                Stage::SyncHi {
                    counter,
                    detected_width,
                    sync_count,
                } => {
                    let detected_width = *detected_width;
                    let sync_count = *sync_count;
                    match counter.advance(cursor, is_low) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Ok(hi)) => {
                            self.stage = Stage::SyncLo {
                                counter: Counter::new(sync_width_max(detected_width)),
                                detected_width,
                                sync_count,
                                hi,
                            };
                        }
                        Poll::Ready(Err(_)) => return self.fail(DemodError::Timeout),
                    }
                }

                Stage::SyncLo {
                    counter,
                    detected_width,
                    sync_count,
                    hi,
                } => {
                    let detected_width = *detected_width;
                    let sync_count = *sync_count;
                    let hi = *hi;
                    match counter.advance(cursor, is_high) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Err(_)) => return self.fail(DemodError::Timeout),
                        Poll::Ready(Ok(lo)) => {
                            if detected_width > 1
                                && (lo as f64) > SYNC_BREAK_RATIO * (detected_width as f64)
                            {
                                self.stage = Stage::Preamble {
                                    counter: Counter::new(Some(detected_width * 4)),
                                    detected_width,
                                    sync_count,
                                };
                                continue;
                            }

                            let average = (hi + lo) / 2;
                            if !within_range(hi, average, self.tolerance)
                                || !within_range(lo, average, self.tolerance)
                            {
                                return self.abandon("sync pulses not symmetric");
                            }

                            let next_width =
                                (detected_width * sync_count + hi) / (sync_count + 1);
                            let next_count = sync_count + 1;
                            self.stage = Stage::SyncHi {
                                counter: Counter::new(sync_width_max(next_width)),
                                detected_width: next_width,
                                sync_count: next_count,
                            };
                        }
                    }
                }

                Stage::Preamble {
                    counter,
                    detected_width,
                    sync_count,
                } => {
                    let detected_width = *detected_width;
                    let sync_count = *sync_count;
                    match counter.advance(cursor, is_low) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Err(_)) => return self.fail(DemodError::Timeout),
                        Poll::Ready(Ok(preamble_hi)) => {
                            let timing = TimingParams::from_bit_width(detected_width);
                            if !within_range(preamble_hi, timing.preamble, self.tolerance) {
                                return self.abandon("preamble length out of tolerance");
                            }
                            self.stage = Stage::Segment {
                                sync_count,
                                timing,
                                data: BitBuffer::new(),
                                check: BitBuffer::new(),
                                pass: Pass::Data,
                                level_is_high: false,
                                counter: Counter::new(Some(timing.timeout)),
                            };
                        }
                    }
                }

                Stage::Segment {
                    timing,
                    sync_count,
                    data,
                    check,
                    pass,
                    level_is_high,
                    counter,
                } => {
                    let timing = *timing;
                    let sync_count = *sync_count;
                    let pass = *pass;
                    let cur_level_high = *level_is_high;
                    let predicate = if cur_level_high { is_low } else { is_high };
                    match counter.advance(cursor, predicate) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Err(_)) => {
                            // The bound here (`timing.timeout`) is generous
                            // precisely so that running past it mid-segment
                            // means trailing silence, not a protocol fault -
                            // the same outcome as `len > timing.end`, just
                            // reached without ever observing the opposite edge.
                            let data = std::mem::take(data);
                            let check = std::mem::take(check);
                            return self.finish_read(sync_count, data, check);
                        }
                        Poll::Ready(Ok(len)) => {
                            if within_range(len, timing.preamble, self.tolerance) {
                                let data = std::mem::take(data);
                                let check = std::mem::take(check);
                                self.stage = Stage::MidambleTail {
                                    timing,
                                    sync_count,
                                    data,
                                    check,
                                    pass,
                                    level_is_high: !cur_level_high,
                                    counter: Counter::new(Some(timing.timeout)),
                                };
                            } else if len > timing.end {
                                let data = std::mem::take(data);
                                let check = std::mem::take(check);
                                return self.finish_read(sync_count, data, check);
                            } else if within_range(len, timing.one, self.tolerance) {
                                if !data_for(pass, data, check).push(true) {
                                    return self.fail(DemodError::TooManyBits);
                                }
                                *level_is_high = !cur_level_high;
                                *counter = Counter::new(Some(timing.timeout));
                            } else if within_range(len, timing.zero, self.tolerance) {
                                if !data_for(pass, data, check).push(false) {
                                    return self.fail(DemodError::TooManyBits);
                                }
                                *level_is_high = !cur_level_high;
                                *counter = Counter::new(Some(timing.timeout));
                            } else {
                                diag_trace!(
                                    self.diagnostics,
                                    "ook demod: anomalous segment length {len}"
                                );
                                let data = std::mem::take(data);
                                let check = std::mem::take(check);
                                return self.finish_read(sync_count, data, check);
                            }
                        }
                    }
                }

                Stage::MidambleTail {
                    timing,
                    sync_count,
                    data,
                    check,
                    pass,
                    level_is_high,
                    counter,
                } => {
                    let timing = *timing;
                    let sync_count = *sync_count;
                    let pass = *pass;
                    let level_is_high = *level_is_high;
                    let predicate = if level_is_high { is_low } else { is_high };
                    match counter.advance(cursor, predicate) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Err(_)) => return self.fail(DemodError::Timeout),
                        Poll::Ready(Ok(len)) => {
                            if !within_range(len, timing.preamble, self.tolerance) {
                                return self.fail(DemodError::BadMidamble);
                            }
                            match pass {
                                Pass::Data => {
                                    let data = std::mem::take(data);
                                    let check = std::mem::take(check);
                                    self.stage = Stage::Segment {
                                        timing,
                                        sync_count,
                                        data,
                                        check,
                                        pass: Pass::Check,
                                        level_is_high: false,
                                        counter: Counter::new(Some(timing.timeout)),
                                    };
                                }
                                Pass::Check => {
                                    let data = std::mem::take(data);
                                    let check = std::mem::take(check);
                                    return self.finish_read(sync_count, data, check);
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

fn data_for<'a>(pass: Pass, data: &'a mut BitBuffer, check: &'a mut BitBuffer) -> &'a mut BitBuffer {
    match pass {
        Pass::Data => data,
        Pass::Check => check,
    }
}

fn sync_width_max(detected_width: u32) -> Option<u32> {
    if detected_width > 0 {
        Some(detected_width * 4)
    } else {
        None
    }
}

/// Decodes a stream of samples into [`Packet`] records.
pub struct Demod {
    coroutine: Coroutine<DemodBody>,
}

impl Demod {
    /// `tolerance` must be in `(0.0, 1.0)`.
    pub fn new(tolerance: f64) -> Result<Self, OokError> {
        Self::with_diagnostics(tolerance, Diagnostics::from_env())
    }

    pub fn with_diagnostics(tolerance: f64, diagnostics: Diagnostics) -> Result<Self, OokError> {
        if !(tolerance > 0.0 && tolerance < 1.0) {
            return Err(OokError::InvalidTolerance(tolerance));
        }
        Ok(Demod {
            coroutine: Coroutine::new(DemodBody::new(tolerance, diagnostics)),
        })
    }

    /// Drives the demodulator body to completion over `samples`.
    pub fn push_samples(&mut self, samples: &[f32]) {
        drive(&mut self.coroutine, samples);
    }

    /// Dequeues the oldest decoded packet, if any are waiting.
    pub fn pop_packet(&mut self) -> Option<Packet> {
        self.coroutine.body_mut().inbox.pop_front()
    }
}

impl Default for Demod {
    fn default() -> Self {
        Demod::new(0.10).expect("default tolerance 0.10 is always valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pulse(level_high: bool, len: u32, out: &mut Vec<f32>) {
        let sample = if level_high { 1.0 } else { 0.0 };
        out.extend(std::iter::repeat(sample).take(len as usize));
    }

    /// Builds a raw OOK waveform for `bytes`, matching the corrected parity
    /// rule (even bit index low, odd bit index high) and the wire format
    /// from `SPEC_FULL.md` section 4.4, with `ms = 1` sample per unit.
    fn build_waveform(bytes: &[u8]) -> Vec<f32> {
        const MS: u32 = 32;
        let one = MS;
        let zero = MS / 2;
        let mut out = Vec::new();

        // idle low lead-in so WaitHigh has something to skip past
        pulse(false, MS, &mut out);

        for _ in 0..40 {
            pulse(true, MS, &mut out);
            pulse(false, MS, &mut out);
        }
        pulse(true, MS, &mut out);

        pulse(false, 2 * MS, &mut out);
        pulse(true, 2 * MS, &mut out);

        let emit_bytes = |out: &mut Vec<f32>| {
            for &byte in bytes {
                for i in 0..8u32 {
                    let bit = (byte >> (7 - i)) & 1 == 1;
                    let level_high = i % 2 == 1;
                    let len = if bit { one } else { zero };
                    pulse(level_high, len, out);
                }
            }
        };

        emit_bytes(&mut out);
        pulse(false, 2 * MS, &mut out);
        pulse(true, 2 * MS, &mut out);
        emit_bytes(&mut out);

        pulse(false, 10 * MS, &mut out);
        out
    }

    #[test]
    fn decodes_single_zero_byte() {
        let samples = build_waveform(&[0x00]);
        let mut demod = Demod::default();
        demod.push_samples(&samples);
        let packet = demod.pop_packet().expect("expected one packet");
        assert_eq!(packet.data, vec![0x00]);
        assert_eq!(packet.bit_count, 8);
        assert!(packet.valid_check);
        assert!(demod.pop_packet().is_none());
    }

    #[test]
    fn decodes_single_ff_byte() {
        let samples = build_waveform(&[0xff]);
        let mut demod = Demod::default();
        demod.push_samples(&samples);
        let packet = demod.pop_packet().expect("expected one packet");
        assert_eq!(packet.data, vec![0xff]);
        assert!(packet.valid_check);
    }

    #[test]
    fn decodes_two_byte_payload() {
        let samples = build_waveform(&[0xa5, 0x5a]);
        let mut demod = Demod::default();
        demod.push_samples(&samples);
        let packet = demod.pop_packet().expect("expected one packet");
        assert_eq!(packet.data, vec![0xa5, 0x5a]);
        assert_eq!(packet.bit_count, 16);
        assert!(packet.valid_check);
        assert!(packet.pretty.contains("a5 5a"));
    }

    #[test]
    fn chunked_delivery_matches_single_shot() {
        let samples = build_waveform(&[0xa5, 0x5a]);
        let mut demod = Demod::default();
        let sizes = [17usize, 31, 1000];
        let mut idx = 0;
        let mut size_idx = 0;
        while idx < samples.len() {
            let size = sizes[size_idx % sizes.len()];
            size_idx += 1;
            let end = (idx + size).min(samples.len());
            demod.push_samples(&samples[idx..end]);
            idx = end;
        }
        let packet = demod.pop_packet().expect("expected one packet");
        assert_eq!(packet.data, vec![0xa5, 0x5a]);
        assert!(packet.valid_check);
        assert!(demod.pop_packet().is_none());
    }

    #[test]
    fn all_low_stream_emits_nothing() {
        let samples = vec![0.0f32; 5000];
        let mut demod = Demod::default();
        demod.push_samples(&samples);
        assert!(demod.pop_packet().is_none());
    }

    #[test]
    fn asymmetric_sync_duty_cycle_emits_nothing() {
        const MS: u32 = 32;
        let mut out = Vec::new();
        pulse(false, MS, &mut out);
        for _ in 0..40 {
            pulse(true, MS, &mut out);
            pulse(false, MS * 3, &mut out);
        }
        pulse(true, MS, &mut out);
        pulse(false, 10 * MS, &mut out);

        let mut demod = Demod::default();
        demod.push_samples(&out);
        assert!(demod.pop_packet().is_none());
    }

    #[test]
    fn corrupted_midamble_high_segment_emits_nothing() {
        let mut samples = build_waveform(&[0xa5, 0x5a]);
        // Locate the start of every 64-sample-or-longer run of 1.0 (the
        // preamble and the midamble are the only segments this long); the
        // second such run is the midamble's high phase. Splice out a chunk
        // of it so the remaining run reads as well short of a preamble
        // width, without disturbing the low phase that precedes it (which
        // must still read as a normal preamble-length low for the fault to
        // surface as a rejected midamble rather than an earlier anomaly).
        let run_starts: Vec<usize> = samples
            .windows(64)
            .enumerate()
            .filter(|(i, w)| w.iter().all(|&s| s == 1.0) && (*i == 0 || samples[*i - 1] != 1.0))
            .map(|(i, _)| i)
            .collect();
        let idx = *run_starts.get(1).expect("expected a midamble high run");
        samples.drain(idx..idx + 20);

        let mut demod = Demod::default();
        demod.push_samples(&samples);
        assert!(demod.pop_packet().is_none());
    }

    #[test]
    fn empty_push_then_pop_yields_none() {
        let mut demod = Demod::default();
        demod.push_samples(&[]);
        assert!(demod.pop_packet().is_none());
    }

    #[test]
    fn invalid_tolerance_is_rejected() {
        assert!(Demod::new(0.0).is_err());
        assert!(Demod::new(1.0).is_err());
        assert!(Demod::new(-0.1).is_err());
        assert!(Demod::new(0.1).is_ok());
    }
}
