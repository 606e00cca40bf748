//! Elementary-stream reassembly from container bytes.
//!
//! A [`Demux`] follows one stream of a recording. Transport-stream
//! recordings are followed by PID, VDR program-stream recordings by PES
//! stream id. Chunks of arbitrary size are pushed in; whatever does not
//! yet form a complete unit is buffered until the next push.
//!
//! Video streams are cut at start codes so every returned unit begins with
//! `00 00 01` (or `00 00 00 01`). Audio streams are returned one PES
//! payload at a time.

use std::mem;

use crate::transport::{TS_PACKET_SIZE, TS_SYNC_BYTE, TsHeader, packet_payload};

/// An elementary stream buffer that never sees a start code is dropped
/// once it grows past this size.
const MAX_ES_BUFFER: usize = 8 * 1024 * 1024;

const PACK_START: u8 = 0xBA;
const PROGRAM_END: u8 = 0xB9;
const PRIVATE_STREAM_1: u8 = 0xBD;

/// How the payload of the followed stream is cut into units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Cut at start codes.
    Video,
    /// One unit per PES packet.
    Audio,
}

/// PES stream classes followed inside program-stream recordings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PesStream {
    /// Video streams `0xE0..=0xEF`.
    Video,
    /// AC-3 carried in private stream 1 (`0xBD`).
    Ac3,
    /// MPEG audio streams `0xC0..=0xDF`.
    MpegAudio,
}

impl PesStream {
    fn matches(self, stream_id: u8) -> bool {
        match self {
            PesStream::Video => (0xE0..=0xEF).contains(&stream_id),
            PesStream::Ac3 => stream_id == PRIVATE_STREAM_1,
            PesStream::MpegAudio => (0xC0..=0xDF).contains(&stream_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Transport(u16),
    Program(PesStream),
}

/// Reassembles one elementary stream from transport or program stream bytes.
#[derive(Debug)]
pub struct Demux {
    source: Source,
    kind: PayloadKind,
    /// Container bytes not yet forming a whole packet.
    pending: Vec<u8>,
    /// Video payload not yet cut into units.
    es: Vec<u8>,
    /// Where the next start-code search in `es` resumes.
    scan_from: usize,
    /// Audio PES payload being collected (transport streams only).
    pes: Vec<u8>,
    in_pes: bool,
}

impl Demux {
    /// Follow the transport-stream packets with the given PID.
    pub fn transport(pid: u16, kind: PayloadKind) -> Self {
        Self::with_source(Source::Transport(pid), kind)
    }

    /// Follow the PES packets of a program stream.
    pub fn program(stream: PesStream, kind: PayloadKind) -> Self {
        Self::with_source(Source::Program(stream), kind)
    }

    fn with_source(source: Source, kind: PayloadKind) -> Self {
        Self {
            source,
            kind,
            pending: Vec::new(),
            es: Vec::new(),
            scan_from: 0,
            pes: Vec::new(),
            in_pes: false,
        }
    }

    /// The PID this demux follows, for transport streams.
    pub fn pid(&self) -> Option<u16> {
        match self.source {
            Source::Transport(pid) => Some(pid),
            Source::Program(_) => None,
        }
    }

    /// Push the next chunk of container bytes and collect every unit that
    /// became complete.
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let mut units = Vec::new();
        self.pending.extend_from_slice(data);
        match self.source {
            Source::Transport(pid) => self.drain_transport(pid, &mut units),
            Source::Program(stream) => self.drain_program(stream, &mut units),
        }
        if self.kind == PayloadKind::Video {
            self.split_units(&mut units);
        }
        units
    }

    /// End of input: hand out the unit still being collected.
    ///
    /// Container bytes that never formed a whole packet are dropped, and
    /// the demux starts over empty.
    pub fn finish(&mut self) -> Vec<Vec<u8>> {
        let mut units = Vec::new();
        match self.kind {
            PayloadKind::Video => {
                if let Some(first) = find_start_code(&self.es, 0) {
                    let start = widen_start_code(&self.es, first, 0);
                    units.push(self.es[start..].to_vec());
                }
            }
            PayloadKind::Audio if !self.pes.is_empty() => units.push(mem::take(&mut self.pes)),
            PayloadKind::Audio => {}
        }
        self.pending.clear();
        self.es.clear();
        self.pes.clear();
        self.scan_from = 0;
        self.in_pes = false;
        units
    }

    fn drain_transport(&mut self, pid: u16, units: &mut Vec<Vec<u8>>) {
        let buffer = mem::take(&mut self.pending);
        let mut pos = 0;
        while pos + TS_PACKET_SIZE <= buffer.len() {
            if buffer[pos] != TS_SYNC_BYTE {
                pos += 1;
                continue;
            }
            self.accept_ts_packet(pid, &buffer[pos..pos + TS_PACKET_SIZE], units);
            pos += TS_PACKET_SIZE;
        }
        self.pending = buffer[pos..].to_vec();
    }

    fn accept_ts_packet(&mut self, pid: u16, packet: &[u8], units: &mut Vec<Vec<u8>>) {
        let Some(header) = TsHeader::parse(packet) else {
            return;
        };
        if header.pid != pid || header.transport_error {
            return;
        }
        let Some(payload) = packet_payload(packet) else {
            return;
        };

        if header.payload_unit_start {
            let Some(body) = strip_pes_header(payload) else {
                return;
            };
            match self.kind {
                PayloadKind::Video => self.es.extend_from_slice(body),
                PayloadKind::Audio => {
                    if !self.pes.is_empty() {
                        units.push(mem::take(&mut self.pes));
                    }
                    self.in_pes = true;
                    self.pes.extend_from_slice(body);
                }
            }
        } else {
            match self.kind {
                PayloadKind::Video => self.es.extend_from_slice(payload),
                PayloadKind::Audio if self.in_pes => self.pes.extend_from_slice(payload),
                PayloadKind::Audio => {}
            }
        }
    }

    fn drain_program(&mut self, stream: PesStream, units: &mut Vec<Vec<u8>>) {
        let buffer = mem::take(&mut self.pending);
        let mut pos = 0;
        let mut keep_from = None;

        while let Some(start) = find_start_code(&buffer, pos) {
            let Some(&stream_id) = buffer.get(start + 3) else {
                keep_from = Some(start);
                break;
            };
            match stream_id {
                PACK_START => {
                    let Some(&marker) = buffer.get(start + 4) else {
                        keep_from = Some(start);
                        break;
                    };
                    let length = if marker >> 6 == 0b01 {
                        match buffer.get(start + 13) {
                            Some(stuffing) => 14 + usize::from(stuffing & 0x07),
                            None => {
                                keep_from = Some(start);
                                break;
                            }
                        }
                    } else {
                        12
                    };
                    if start + length > buffer.len() {
                        keep_from = Some(start);
                        break;
                    }
                    pos = start + length;
                }
                PROGRAM_END => pos = start + 4,
                id if id >= 0xBB => {
                    let Some(length) = buffer.get(start + 4..start + 6) else {
                        keep_from = Some(start);
                        break;
                    };
                    let total = 6 + ((usize::from(length[0]) << 8) | usize::from(length[1]));
                    if total == 6 {
                        pos = start + 6;
                        continue;
                    }
                    if start + total > buffer.len() {
                        keep_from = Some(start);
                        break;
                    }
                    if stream.matches(id) {
                        self.accept_pes_packet(stream, &buffer[start..start + total], units);
                    }
                    pos = start + total;
                }
                _ => pos = start + 3,
            }
        }

        let keep_from = keep_from.unwrap_or_else(|| pos.max(buffer.len().saturating_sub(3)));
        self.pending = buffer[keep_from.min(buffer.len())..].to_vec();
    }

    fn accept_pes_packet(&mut self, stream: PesStream, packet: &[u8], units: &mut Vec<Vec<u8>>) {
        let Some(mut body) = strip_pes_header(packet) else {
            return;
        };
        if stream == PesStream::Ac3 && !body.starts_with(&[0x0B, 0x77]) {
            // DVD-style substream header: id, frame count, first access unit.
            match body.first() {
                Some(0x80..=0x87) if body.len() > 4 => body = &body[4..],
                _ => return,
            }
        }
        match self.kind {
            PayloadKind::Video => self.es.extend_from_slice(body),
            PayloadKind::Audio => units.push(body.to_vec()),
        }
    }

    fn split_units(&mut self, units: &mut Vec<Vec<u8>>) {
        let Some(first) = find_start_code(&self.es, 0) else {
            if self.es.len() > MAX_ES_BUFFER {
                self.es.clear();
            }
            self.scan_from = 0;
            return;
        };

        let mut unit_start = widen_start_code(&self.es, first, 0);
        let mut search_from = (first + 3).max(self.scan_from);
        while let Some(next) = find_start_code(&self.es, search_from) {
            let next_start = widen_start_code(&self.es, next, unit_start + 3);
            units.push(self.es[unit_start..next_start].to_vec());
            unit_start = next_start;
            search_from = next + 3;
        }

        self.es.drain(..unit_start);
        // Resume where the last search ended, minus a possible split start code.
        self.scan_from = self.es.len().saturating_sub(3).max(3);
        if self.es.len() > MAX_ES_BUFFER {
            self.es.clear();
            self.scan_from = 0;
        }
    }
}

/// Include the zero byte in front of a 4-byte start code, but never reach
/// back before `floor`.
fn widen_start_code(buffer: &[u8], code: usize, floor: usize) -> usize {
    if code > floor && buffer[code - 1] == 0 {
        code - 1
    } else {
        code
    }
}

/// Position of the next `00 00 01` at or after `from`.
pub fn find_start_code(buffer: &[u8], from: usize) -> Option<usize> {
    buffer
        .get(from..)?
        .windows(3)
        .position(|window| window == [0, 0, 1])
        .map(|offset| offset + from)
}

/// Skip a PES header (MPEG-2 or MPEG-1 syntax) and return the payload.
///
/// Returns `None` if `packet` does not begin with a PES start code.
pub fn strip_pes_header(packet: &[u8]) -> Option<&[u8]> {
    if packet.get(..3)? != [0, 0, 1] {
        return None;
    }
    let flags = *packet.get(6)?;
    if flags & 0xC0 == 0x80 {
        let header_length = usize::from(*packet.get(8)?);
        return packet.get(9 + header_length..);
    }

    // MPEG-1: stuffing, optional STD buffer, then timestamps.
    let mut pos = 6;
    while packet.get(pos) == Some(&0xFF) {
        pos += 1;
    }
    if packet.get(pos)? & 0xC0 == 0x40 {
        pos += 2;
    }
    pos += match packet.get(pos)? & 0xF0 {
        0x20 => 5,
        0x30 => 10,
        _ => 1,
    };
    packet.get(pos..)
}
