//! Modulator: turns a queue of byte packets into an OOK sample stream.
//!
//! Symmetric to [`crate::demod::Demod`]: same `Stage` tagged-union shape and
//! coroutine primitive, but driven by the host *pulling* samples rather than
//! pushing them.

use std::collections::VecDeque;

use crate::coroutine::{Coroutine, CoroutineBody, Poll, Step};
use crate::diagnostics::{diag_trace, Diagnostics};
use crate::error::OokError;
use crate::sample_stream::SampleSink;

/// One run of samples at a fixed level, counted down as the sink is written to.
#[derive(Debug, Clone, Copy)]
struct Run {
    level: f32,
    remaining: u32,
}

impl Run {
    fn new(level_high: bool, len: u32) -> Self {
        Run {
            level: if level_high { 1.0 } else { 0.0 },
            remaining: len,
        }
    }

    /// Writes the run out via `sink` until either it's spent or the sink is
    /// full. Returns `true` once fully emitted.
    fn drain(&mut self, sink: &mut SampleSink) -> bool {
        while self.remaining > 0 {
            if !sink.write(self.level) {
                return false;
            }
            self.remaining -= 1;
        }
        true
    }
}

/// Which of the two identical data transmissions (separated by the
/// midamble) is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    First,
    Second,
}

/// Timing basis derived once from `sample_rate`, expressed as multiples of `ms`.
#[derive(Debug, Clone, Copy)]
struct ModTiming {
    ms: u32,
}

impl ModTiming {
    fn new(sample_rate: u32) -> Self {
        ModTiming {
            ms: sample_rate / 1000,
        }
    }

    fn one(&self) -> u32 {
        self.ms
    }

    fn zero(&self) -> u32 {
        self.ms / 2
    }
}

/// The level and duration of the `bit_idx`-th bit segment of `bytes`,
/// alternating level by position (even low, odd high) per the corrected
/// parity rule, with duration chosen by the bit's value.
fn bit_run(timing: ModTiming, bytes: &[u8], byte_idx: usize, bit_idx: u32) -> Run {
    let byte = bytes[byte_idx];
    let bit = (byte >> (7 - bit_idx)) & 1 == 1;
    let level_high = bit_idx % 2 == 1;
    let len = if bit { timing.one() } else { timing.zero() };
    Run::new(level_high, len)
}

enum Stage {
    /// Nothing in flight. Checked at the top of every poll pass.
    Idle,
    Blank {
        run: Run,
    },
    Sync {
        bytes: Vec<u8>,
        pulses_remaining: u32,
        in_low_half: bool,
        run: Run,
    },
    SyncTail {
        bytes: Vec<u8>,
        run: Run,
    },
    /// Shared by both the initial preamble and the midamble: identical
    /// shape, differing only in which pass follows.
    PreambleLow {
        bytes: Vec<u8>,
        next_pass: Pass,
        run: Run,
    },
    PreambleHigh {
        bytes: Vec<u8>,
        next_pass: Pass,
        run: Run,
    },
    Segment {
        bytes: Vec<u8>,
        byte_idx: usize,
        bit_idx: u32,
        pass: Pass,
        run: Run,
    },
    PostBlank {
        run: Run,
    },
}

impl Stage {
    fn start_preamble(bytes: Vec<u8>, next_pass: Pass, ms: u32) -> Self {
        Stage::PreambleLow {
            bytes,
            next_pass,
            run: Run::new(false, 2 * ms),
        }
    }

    /// First stage for a non-empty byte sequence's segment pass; if `bytes`
    /// is empty the caller should skip straight past this pass instead.
    fn start_segment(bytes: Vec<u8>, pass: Pass, timing: ModTiming) -> Self {
        let run = bit_run(timing, &bytes, 0, 0);
        Stage::Segment {
            bytes,
            byte_idx: 0,
            bit_idx: 0,
            pass,
            run,
        }
    }
}

/// The modulator's coroutine body: writes into whatever output slice the
/// host supplies via the sink, suspending when it runs out of room.
struct ModBody {
    stage: Stage,
    queue: VecDeque<Vec<u8>>,
    stop_after: i32,
    timing: ModTiming,
    ms_between_xmit: u32,
    diagnostics: Diagnostics,
}

impl ModBody {
    fn new(
        initial_data: Vec<u8>,
        stop_after: i32,
        ms_between_xmit: u32,
        sample_rate: u32,
        diagnostics: Diagnostics,
    ) -> Self {
        let mut queue = VecDeque::new();
        if !initial_data.is_empty() {
            queue.push_back(initial_data);
        }
        ModBody {
            stage: Stage::Idle,
            queue,
            stop_after,
            timing: ModTiming::new(sample_rate),
            ms_between_xmit,
            diagnostics,
        }
    }
}

impl CoroutineBody for ModBody {
    fn on_reset(&mut self) {}

    fn reset_state(&mut self) {
        self.stage = Stage::Idle;
    }
}

impl<'a> Step<SampleSink<'a>> for ModBody {
    type Output = ();

    fn poll(&mut self, sink: &mut SampleSink<'a>) -> Poll<()> {
        let ms = self.timing.ms;
        loop {
            match &mut self.stage {
                Stage::Idle => {
                    if self.stop_after == 0 {
                        return Poll::Ready(());
                    }
                    match self.queue.pop_front() {
                        None => {
                            self.stage = Stage::Blank {
                                run: Run::new(false, 10 * ms),
                            };
                        }
                        Some(bytes) => {
                            diag_trace!(self.diagnostics, "ook mod: starting transmission of {} byte(s)", bytes.len());
                            self.stage = Stage::Sync {
                                bytes,
                                pulses_remaining: 40,
                                in_low_half: false,
                                run: Run::new(true, ms),
                            };
                        }
                    }
                }

                Stage::Blank { run } => {
                    if !run.drain(sink) {
                        return Poll::Pending;
                    }
                    self.stage = Stage::Idle;
                }

                Stage::Sync {
                    bytes,
                    pulses_remaining,
                    in_low_half,
                    run,
                } => {
                    if !run.drain(sink) {
                        return Poll::Pending;
                    }
                    if !*in_low_half {
                        *run = Run::new(false, ms);
                        *in_low_half = true;
                    } else {
                        *pulses_remaining -= 1;
                        if *pulses_remaining == 0 {
                            let bytes = std::mem::take(bytes);
                            self.stage = Stage::SyncTail {
                                bytes,
                                run: Run::new(true, ms),
                            };
                        } else {
                            *run = Run::new(true, ms);
                            *in_low_half = false;
                        }
                    }
                }

                Stage::SyncTail { bytes, run } => {
                    if !run.drain(sink) {
                        return Poll::Pending;
                    }
                    let bytes = std::mem::take(bytes);
                    self.stage = Stage::start_preamble(bytes, Pass::First, ms);
                }

                Stage::PreambleLow {
                    bytes,
                    next_pass,
                    run,
                } => {
                    if !run.drain(sink) {
                        return Poll::Pending;
                    }
                    let bytes = std::mem::take(bytes);
                    let next_pass = *next_pass;
                    self.stage = Stage::PreambleHigh {
                        bytes,
                        next_pass,
                        run: Run::new(true, 2 * ms),
                    };
                }

                Stage::PreambleHigh {
                    bytes,
                    next_pass,
                    run,
                } => {
                    if !run.drain(sink) {
                        return Poll::Pending;
                    }
                    let bytes = std::mem::take(bytes);
                    let next_pass = *next_pass;
                    let timing = self.timing;
                    let post_blank_len = if self.queue.is_empty() {
                        10 * timing.ms
                    } else {
                        self.ms_between_xmit * timing.ms
                    };
                    self.stage = if bytes.is_empty() {
                        finish_pass(next_pass, bytes, timing.ms, post_blank_len)
                    } else {
                        Stage::start_segment(bytes, next_pass, timing)
                    };
                }

                Stage::Segment {
                    bytes,
                    byte_idx,
                    bit_idx,
                    pass,
                    run,
                } => {
                    if !run.drain(sink) {
                        return Poll::Pending;
                    }
                    *bit_idx += 1;
                    if *bit_idx == 8 {
                        *bit_idx = 0;
                        *byte_idx += 1;
                    }
                    if *byte_idx == bytes.len() {
                        let bytes = std::mem::take(bytes);
                        let pass = *pass;
                        let ms = self.timing.ms;
                        let post_blank_len = if self.queue.is_empty() {
                            10 * ms
                        } else {
                            self.ms_between_xmit * ms
                        };
                        self.stage = finish_pass(pass, bytes, ms, post_blank_len);
                    } else {
                        *run = bit_run(self.timing, bytes, *byte_idx, *bit_idx);
                    }
                }

                Stage::PostBlank { run } => {
                    if !run.drain(sink) {
                        return Poll::Pending;
                    }
                    self.stage = Stage::Idle;
                    if self.stop_after > 0 {
                        self.stop_after -= 1;
                    }
                }
            }
        }
    }
}

/// Transitions out of a completed pass: the first pass leads into the
/// midamble and a second pass over the same bytes; the second pass leads
/// into the post-blank.
fn finish_pass(pass: Pass, bytes: Vec<u8>, ms: u32, post_blank_len: u32) -> Stage {
    match pass {
        Pass::First => Stage::start_preamble(bytes, Pass::Second, ms),
        Pass::Second => Stage::PostBlank {
            run: Run::new(false, post_blank_len),
        },
    }
}

/// Synthesizes an OOK sample stream from a queue of byte packets.
pub struct Mod {
    coroutine: Coroutine<ModBody>,
}

impl Mod {
    /// `stop_after = -1` runs forever; `stop_after = 1` emits exactly one
    /// packet. `sample_rate` is in samples per second and must be nonzero.
    pub fn new(
        initial_data: Vec<u8>,
        stop_after: i32,
        ms_between_xmit: u32,
        sample_rate: u32,
    ) -> Result<Self, OokError> {
        Self::with_diagnostics(
            initial_data,
            stop_after,
            ms_between_xmit,
            sample_rate,
            Diagnostics::from_env(),
        )
    }

    /// As [`Mod::new`], but with an explicit diagnostics override instead of
    /// resolving `OOK_DECODE_DEBUG` from the environment.
    pub fn with_diagnostics(
        initial_data: Vec<u8>,
        stop_after: i32,
        ms_between_xmit: u32,
        sample_rate: u32,
        diagnostics: Diagnostics,
    ) -> Result<Self, OokError> {
        if sample_rate == 0 {
            return Err(OokError::ZeroSampleRate);
        }
        Ok(Mod {
            coroutine: Coroutine::new(ModBody::new(
                initial_data,
                stop_after,
                ms_between_xmit,
                sample_rate,
                diagnostics,
            )),
        })
    }

    /// Fills `out` up to the suspension point. Returns the number of samples
    /// written, or `0` to signal end-of-stream (only once `stop_after`
    /// reaches zero).
    pub fn pull_samples(&mut self, out: &mut [f32]) -> usize {
        let mut sink = SampleSink::new(out);
        let _ = self.coroutine.resume(&mut sink);
        sink.written()
    }

    /// Appends `packet_bytes` to the transmit queue.
    pub fn enqueue(&mut self, packet_bytes: Vec<u8>) {
        self.coroutine.body_mut().queue.push_back(packet_bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demod::Demod;

    fn pull_all(m: &mut Mod) -> Vec<f32> {
        let mut out = Vec::new();
        loop {
            let mut buf = [0.0f32; 256];
            let n = m.pull_samples(&mut buf);
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn empty_queue_and_stop_after_zero_yields_eof_immediately() {
        let mut m = Mod::new(Vec::new(), 0, 10, 32000).unwrap();
        let mut buf = [0.0f32; 16];
        assert_eq!(m.pull_samples(&mut buf), 0);
    }

    #[test]
    fn zero_sample_rate_is_rejected() {
        assert!(Mod::new(vec![1], 1, 10, 0).is_err());
    }

    #[test]
    fn round_trip_single_byte() {
        let mut m = Mod::new(vec![0x00], 1, 10, 32000).unwrap();
        let samples = pull_all(&mut m);

        let mut d = Demod::default();
        d.push_samples(&samples);
        let packet = d.pop_packet().expect("expected one packet");
        assert_eq!(packet.data, vec![0x00]);
        assert!(packet.valid_check);
        assert!(d.pop_packet().is_none());
    }

    #[test]
    fn round_trip_two_byte_payload_any_chunking() {
        let mut m = Mod::new(vec![0xa5, 0x5a], 1, 10, 32000).unwrap();
        let samples = pull_all(&mut m);

        let mut d = Demod::default();
        let sizes = [17usize, 31, 1000];
        let mut idx = 0;
        let mut size_idx = 0;
        while idx < samples.len() {
            let size = sizes[size_idx % sizes.len()];
            size_idx += 1;
            let end = (idx + size).min(samples.len());
            d.push_samples(&samples[idx..end]);
            idx = end;
        }
        let packet = d.pop_packet().expect("expected one packet");
        assert_eq!(packet.data, vec![0xa5, 0x5a]);
        assert!(packet.valid_check);
    }

    #[test]
    fn enqueue_is_transmitted_after_construction() {
        let mut m = Mod::new(Vec::new(), 1, 10, 32000).unwrap();
        m.enqueue(vec![0xff]);
        let samples = pull_all(&mut m);

        let mut d = Demod::default();
        d.push_samples(&samples);
        let packet = d.pop_packet().expect("expected one packet");
        assert_eq!(packet.data, vec![0xff]);
    }
}
