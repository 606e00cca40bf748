//! Hand-built container fixtures shared by the integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::Path;

pub const PACKET: usize = 188;
pub const PMT_PID: u16 = 0x0100;
pub const VIDEO_PID: u16 = 0x0101;
pub const AC3_PID: u16 = 0x0102;
pub const PROGRAM: u16 = 28106;

pub const STREAM_TYPE_H262: u8 = 0x02;
pub const STREAM_TYPE_H264: u8 = 0x1B;
pub const STREAM_TYPE_PRIVATE: u8 = 0x06;
pub const TAG_AC3: u8 = 0x6A;

// ── Elementary units ───────────────────────────────────────────────

/// H.262 sequence header: 720x576, aspect code `aspect`, 25 fps.
pub fn h262_sequence(aspect: u8) -> Vec<u8> {
    vec![0, 0, 1, 0xB3, 0x2D, 0x02, 0x40, (aspect << 4) | 0x03, 0xFF, 0xFF, 0xE0, 0x18]
}

/// H.262 picture header; `coding_type` 1 = I, 2 = P, 3 = B.
pub fn h262_picture(coding_type: u8) -> Vec<u8> {
    vec![0, 0, 1, 0x00, 0x00, coding_type << 3, 0xFF, 0xF8]
}

/// A slice unit, ignored by the header parser.
pub fn h262_slice() -> Vec<u8> {
    vec![0, 0, 1, 0x01, 0x12, 0x34, 0x56, 0x78]
}

/// AC-3 sync frame header with coding mode `acmod` and LFE on/off.
pub fn ac3_frame(acmod: u8, lfe: bool) -> Vec<u8> {
    // lfeon follows the mode-dependent mix level fields
    let lfe_bit = match acmod {
        0 | 1 => 0x10,
        5 | 7 => 0x01,
        _ => 0x04,
    };
    let mut frame = vec![0x0B, 0x77, 0x12, 0x34, 0x14, 0x40, acmod << 5];
    if lfe {
        frame[6] |= lfe_bit;
    }
    frame.extend_from_slice(&[0x55; 32]);
    frame
}

// ── PES and transport packets ──────────────────────────────────────

/// PES packet with an MPEG-2 header and no optional fields.
pub fn pes(stream_id: u8, payload: &[u8], bounded: bool) -> Vec<u8> {
    let length = if bounded { payload.len() + 3 } else { 0 };
    let mut packet = vec![
        0,
        0,
        1,
        stream_id,
        (length >> 8) as u8,
        length as u8,
        0x80,
        0x00,
        0x00,
    ];
    packet.extend_from_slice(payload);
    packet
}

/// One transport packet; short payloads are padded with adaptation field
/// stuffing so the payload ends the packet.
pub fn ts_packet(pid: u16, unit_start: bool, counter: u8, payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() <= PACKET - 4);
    let mut packet = vec![
        0x47,
        (if unit_start { 0x40 } else { 0 }) | (pid >> 8) as u8,
        pid as u8,
        0,
    ];
    let stuffing = PACKET - 4 - payload.len();
    if stuffing == 0 {
        packet[3] = 0x10 | (counter & 0x0F);
    } else {
        packet[3] = 0x30 | (counter & 0x0F);
        packet.push((stuffing - 1) as u8);
        if stuffing > 1 {
            packet.push(0x00);
            packet.extend(std::iter::repeat_n(0xFF, stuffing - 2));
        }
    }
    packet.extend_from_slice(payload);
    assert_eq!(packet.len(), PACKET);
    packet
}

/// Split a PES packet into transport packets of `pid`.
pub fn packetize(pid: u16, pes: &[u8], counter: &mut u8) -> Vec<u8> {
    let mut out = Vec::new();
    for (index, chunk) in pes.chunks(PACKET - 4).enumerate() {
        out.extend(ts_packet(pid, index == 0, *counter, chunk));
        *counter = counter.wrapping_add(1);
    }
    out
}

/// PSI packet: pointer field, section, 0xFF filler, no adaptation field.
fn psi_packet(pid: u16, section: &[u8]) -> Vec<u8> {
    let mut packet = vec![0x47, 0x40 | (pid >> 8) as u8, pid as u8, 0x10, 0x00];
    packet.extend_from_slice(section);
    packet.resize(PACKET, 0xFF);
    packet
}

pub fn pat_packet(program: u16, pmt_pid: u16) -> Vec<u8> {
    let section = [
        0x00,
        0xB0,
        13,
        0x00,
        0x01,
        0xC1,
        0x00,
        0x00,
        (program >> 8) as u8,
        program as u8,
        0xE0 | (pmt_pid >> 8) as u8,
        pmt_pid as u8,
        0xDE,
        0xAD,
        0xBE,
        0xEF,
    ];
    psi_packet(0x0000, &section)
}

/// An elementary stream entry: type, PID and optional first descriptor.
#[derive(Debug, Clone, Copy)]
pub struct StreamEntry {
    pub stream_type: u8,
    pub pid: u16,
    pub descriptor: Option<u8>,
}

pub fn pmt_packet(pmt_pid: u16, program: u16, streams: &[StreamEntry]) -> Vec<u8> {
    let mut entries = Vec::new();
    for stream in streams {
        let descriptor: &[u8] = match stream.descriptor {
            Some(tag) => &[tag, 1, 0x00],
            None => &[],
        };
        entries.extend_from_slice(&[
            stream.stream_type,
            0xE0 | (stream.pid >> 8) as u8,
            stream.pid as u8,
            0xF0,
            descriptor.len() as u8,
        ]);
        entries.extend_from_slice(descriptor);
    }
    let section_length = 9 + entries.len() + 4;
    let mut section = vec![
        0x02,
        0xB0 | (section_length >> 8) as u8,
        section_length as u8,
        (program >> 8) as u8,
        program as u8,
        0xC1,
        0x00,
        0x00,
        0xE0 | (VIDEO_PID >> 8) as u8,
        VIDEO_PID as u8,
        0xF0,
        0x00,
    ];
    section.extend_from_slice(&entries);
    section.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
    psi_packet(pmt_pid, &section)
}

/// PAT and PMT for an H.262 video stream plus an AC-3 stream.
pub fn program_tables() -> Vec<u8> {
    let mut out = pat_packet(PROGRAM, PMT_PID);
    out.extend(pmt_packet(
        PMT_PID,
        PROGRAM,
        &[
            StreamEntry {
                stream_type: STREAM_TYPE_H262,
                pid: VIDEO_PID,
                descriptor: None,
            },
            StreamEntry {
                stream_type: STREAM_TYPE_PRIVATE,
                pid: AC3_PID,
                descriptor: Some(TAG_AC3),
            },
        ],
    ));
    out
}

// ── Synthetic recordings ───────────────────────────────────────────

/// Builds a transport-stream recording picture by picture.
#[derive(Debug, Default)]
pub struct TsRecording {
    bytes: Vec<u8>,
    video_counter: u8,
    audio_counter: u8,
}

impl TsRecording {
    pub fn new() -> Self {
        Self {
            bytes: program_tables(),
            ..Self::default()
        }
    }

    /// One video PES holding `units`.
    pub fn video(&mut self, units: &[Vec<u8>]) -> &mut Self {
        let payload: Vec<u8> = units.concat();
        let packet = pes(0xE0, &payload, false);
        self.bytes
            .extend(packetize(VIDEO_PID, &packet, &mut self.video_counter));
        self
    }

    /// One AC-3 PES holding `frame`.
    pub fn audio(&mut self, frame: &[u8]) -> &mut Self {
        let packet = pes(0xBD, frame, true);
        self.bytes
            .extend(packetize(AC3_PID, &packet, &mut self.audio_counter));
        self
    }

    /// A group of pictures: sequence header with `aspect`, an I-picture
    /// and `p_pictures` P-pictures, each followed by a slice.
    pub fn gop(&mut self, aspect: u8, p_pictures: usize) -> &mut Self {
        self.video(&[h262_sequence(aspect), h262_picture(1), h262_slice()]);
        for _ in 0..p_pictures {
            self.video(&[h262_picture(2), h262_slice()]);
        }
        self
    }

    /// Fill with null packets up to `packets` packets in total.
    pub fn pad_to(&mut self, packets: usize) -> &mut Self {
        assert!(self.bytes.len() <= packets * PACKET, "phase overflows its packets");
        while self.bytes.len() < packets * PACKET {
            self.bytes.extend(ts_packet(0x1FFF, false, 0, &[0xFF; 184]));
        }
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Write `00001.ts` into `directory`.
    pub fn write(&self, directory: &Path) {
        fs::write(directory.join("00001.ts"), &self.bytes).unwrap();
    }
}

/// Write an `info` file into `directory`.
pub fn write_info(directory: &Path, content: &str) {
    fs::write(directory.join("info"), content).unwrap();
}

/// Write a transport-stream `index` with `frames` records; every
/// `gop`-th frame is independent.
pub fn write_index(directory: &Path, frames: u64, gop: u64) {
    let mut data = Vec::new();
    for frame in 0..frames {
        let mut record = frame * 1000;
        if frame % gop == 0 {
            record |= 1 << 47;
        }
        record |= 1 << 48;
        data.extend_from_slice(&record.to_le_bytes());
    }
    fs::write(directory.join("index"), data).unwrap();
}

/// Chunk-aligned phases so every read of the analyzer sees one phase.
pub const PHASE_PACKETS: usize = 2048;

/// Six one-chunk phases of 12 pictures each, all 16:9. The AC-3 track
/// drops from 5.1 to stereo in phase 1 and returns in phase 3; phase 5
/// carries no audio.
pub fn channel_change_recording() -> TsRecording {
    let layouts = [Some(7), Some(2), Some(2), Some(7), Some(7), None];
    let mut recording = TsRecording::new();
    for (phase, acmod) in layouts.into_iter().enumerate() {
        recording.gop(3, 11);
        if let Some(acmod) = acmod {
            recording.audio(&ac3_frame(acmod, acmod == 7));
        }
        recording.pad_to(PHASE_PACKETS * (phase + 1));
    }
    recording
}
