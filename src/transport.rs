//! Transport-stream packet accessors and program table validation.
//!
//! A recording's first packets must be a Program Association Table
//! followed by the Program Map Table it references (optionally preceded by
//! a Service Description packet). [`ProgramMap::parse`] checks every
//! structural property of the two tables before any PID is trusted:
//! sync bytes, reserved bits that must be all ones, matching program
//! numbers, the PAT→PMT PID cross reference and length fields that must
//! stay inside the bytes that were read. Each accessor below names the
//! byte/bit offsets it reads; nothing is reinterpreted in place.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::CutmarksError;
use crate::stream_info::VideoCodec;

/// Size of one transport-stream packet.
pub const TS_PACKET_SIZE: usize = 188;
/// Transport-stream sync byte.
pub const TS_SYNC_BYTE: u8 = 0x47;
/// Number of leading bytes read to locate the program tables.
pub const PROGRAM_TABLE_PROBE_SIZE: usize = 3 * TS_PACKET_SIZE;

const PID_PAT: u16 = 0x0000;
const PID_SDT: u16 = 0x0011;

/// Upper bound for the PMT program info length within the probe buffer.
const MAX_PROGRAM_INFO_LENGTH: usize = 166;
/// Upper bound for the end of the PMT section within the probe buffer.
const MAX_SECTION_END: usize = 2 * TS_PACKET_SIZE;

const STREAM_TYPE_MPEG1_VIDEO: u8 = 0x01;
const STREAM_TYPE_MPEG2_VIDEO: u8 = 0x02;
const STREAM_TYPE_MPEG1_AUDIO: u8 = 0x03;
const STREAM_TYPE_MPEG2_AUDIO: u8 = 0x04;
const STREAM_TYPE_PRIVATE_PES: u8 = 0x06;
const STREAM_TYPE_H264_VIDEO: u8 = 0x1B;
const DESCRIPTOR_TAG_AC3: u8 = 0x6A;

/// Header fields of one 188-byte transport packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsHeader {
    /// `transport_error_indicator` (byte 1, bit 7).
    pub transport_error: bool,
    /// `payload_unit_start_indicator` (byte 1, bit 6).
    pub payload_unit_start: bool,
    /// 13-bit PID (byte 1 bits 4..0, byte 2).
    pub pid: u16,
    /// `adaptation_field_control` (byte 3, bits 5..4).
    pub adaptation_field_control: u8,
    /// `continuity_counter` (byte 3, bits 3..0).
    pub continuity_counter: u8,
}

impl TsHeader {
    /// Parse the 4-byte header of `packet`; `None` without sync byte.
    pub fn parse(packet: &[u8]) -> Option<Self> {
        let header = packet.get(..4)?;
        if header[0] != TS_SYNC_BYTE {
            return None;
        }
        Some(Self {
            transport_error: header[1] & 0x80 != 0,
            payload_unit_start: header[1] & 0x40 != 0,
            pid: (u16::from(header[1] & 0x1F) << 8) | u16::from(header[2]),
            adaptation_field_control: (header[3] >> 4) & 0x03,
            continuity_counter: header[3] & 0x0F,
        })
    }

    /// The packet carries payload bytes.
    pub fn has_payload(&self) -> bool {
        self.adaptation_field_control & 0x01 != 0
    }

    /// The packet carries an adaptation field.
    pub fn has_adaptation_field(&self) -> bool {
        self.adaptation_field_control & 0x02 != 0
    }
}

/// Return the payload of a full transport packet, skipping the adaptation
/// field when present.
pub fn packet_payload(packet: &[u8]) -> Option<&[u8]> {
    let header = TsHeader::parse(packet)?;
    if !header.has_payload() || packet.len() < TS_PACKET_SIZE {
        return None;
    }
    let mut offset = 4;
    if header.has_adaptation_field() {
        offset += 1 + usize::from(*packet.get(4)?);
    }
    if offset >= TS_PACKET_SIZE {
        return None;
    }
    packet.get(offset..TS_PACKET_SIZE)
}

/// One entry of the PMT elementary stream loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementaryStream {
    /// `stream_type` byte.
    pub stream_type: u8,
    /// `elementary_PID`.
    pub pid: u16,
    /// Tag of the first ES descriptor, if any.
    pub first_descriptor_tag: Option<u8>,
}

/// PID assignments validated from a recording's PAT and PMT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramMap {
    /// Program number shared by PAT and PMT.
    pub program_number: u16,
    /// PID of the PMT.
    pub pmt_pid: u16,
    /// Every elementary stream listed in the PMT, in table order.
    pub streams: Vec<ElementaryStream>,
}

impl ProgramMap {
    /// Read the program tables from the first packets of a segment file.
    pub fn read_from(path: &Path) -> Result<Self, CutmarksError> {
        let mut head = [0u8; PROGRAM_TABLE_PROBE_SIZE];
        File::open(path)?
            .read_exact(&mut head)
            .map_err(|_| CutmarksError::InvalidProgramTables {
                reason: "segment shorter than three transport packets",
            })?;
        Self::parse(&head)
    }

    /// Validate PAT and PMT from the leading bytes of a transport stream.
    pub fn parse(head: &[u8]) -> Result<Self, CutmarksError> {
        let invalid = |reason| CutmarksError::InvalidProgramTables { reason };

        let mut tables = head;
        if let Some(first) = TsHeader::parse(tables)
            && first.pid == PID_SDT
            && first.payload_unit_start
            && first.has_payload()
        {
            tables = tables.get(TS_PACKET_SIZE..).unwrap_or_default();
        }
        let byte = |index: usize| tables.get(index).copied();

        if byte(0) != Some(TS_SYNC_BYTE) || byte(TS_PACKET_SIZE) != Some(TS_SYNC_BYTE) {
            return Err(invalid("missing transport sync byte"));
        }
        let pat_packet = TsHeader::parse(tables).ok_or_else(|| invalid("missing PAT"))?;
        if pat_packet.pid != PID_PAT || !pat_packet.payload_unit_start {
            return Err(invalid("first packet is not a PAT"));
        }
        if !pat_packet.has_payload() || pat_packet.has_adaptation_field() {
            return Err(invalid("PAT packet carries an adaptation field"));
        }
        let pmt_packet = TsHeader::parse(&tables[TS_PACKET_SIZE..])
            .ok_or_else(|| invalid("missing PMT"))?;
        if !pmt_packet.has_payload() || pmt_packet.has_adaptation_field() {
            return Err(invalid("PMT packet carries an adaptation field"));
        }

        // PAT section: pointer field at 4, table_id at 5.
        let pat = Section::new(tables, 5).ok_or_else(|| invalid("truncated PAT"))?;
        if pat.bits(1, 4, 2) != 0b11 {
            return Err(invalid("PAT reserved bits after section_syntax_indicator"));
        }
        if pat.bits(10, 5, 3) != 0b111 {
            return Err(invalid("PAT reserved bits before program_map_PID"));
        }
        let pat_program_number = pat.u16(8);
        let referenced_pid = pat.u16(10) & 0x1FFF;
        if referenced_pid != pmt_packet.pid {
            return Err(invalid("PMT PID does not match the PAT entry"));
        }

        // PMT section: pointer field at 192, table_id at 193.
        let pmt_start = TS_PACKET_SIZE + 5;
        let pmt = Section::new(tables, pmt_start).ok_or_else(|| invalid("truncated PMT"))?;
        if pmt.bits(1, 4, 2) != 0b11 {
            return Err(invalid("PMT reserved bits after section_syntax_indicator"));
        }
        if pmt.bits(5, 6, 2) != 0b11 {
            return Err(invalid("PMT reserved bits before version_number"));
        }
        if pmt.bits(8, 5, 3) != 0b111 {
            return Err(invalid("PMT reserved bits before PCR_PID"));
        }
        if pmt.bits(10, 4, 4) != 0b1111 {
            return Err(invalid("PMT reserved bits before program_info_length"));
        }
        let program_number = pmt.u16(3);
        if program_number != pat_program_number {
            return Err(invalid("program number differs between PAT and PMT"));
        }

        let program_info_length = usize::from(pmt.u16(10) & 0x0FFF);
        if program_info_length > MAX_PROGRAM_INFO_LENGTH {
            return Err(invalid("program info length exceeds the probe buffer"));
        }
        let section_length = usize::from(pmt.u16(1) & 0x0FFF);
        // section_length counts from byte 196; the trailing CRC32 is not needed.
        let section_end = (pmt_start + 3 + section_length).saturating_sub(4);
        if section_end > MAX_SECTION_END {
            return Err(invalid("PMT section exceeds the probe buffer"));
        }

        let mut streams = Vec::new();
        let mut cursor = pmt_start + 12 + program_info_length;
        while cursor < section_end {
            let entry = tables
                .get(cursor..cursor + 5)
                .ok_or_else(|| invalid("truncated PMT stream entry"))?;
            if entry[1] >> 5 != 0b111 {
                return Err(invalid("stream entry reserved bits before elementary_PID"));
            }
            if entry[3] >> 4 != 0b1111 {
                return Err(invalid("stream entry reserved bits before ES_info_length"));
            }
            let pid = (u16::from(entry[1] & 0x1F) << 8) | u16::from(entry[2]);
            let es_info_length = (usize::from(entry[3] & 0x0F) << 8) | usize::from(entry[4]);
            let first_descriptor_tag = if es_info_length > 0 {
                tables.get(cursor + 5).copied()
            } else {
                None
            };
            streams.push(ElementaryStream {
                stream_type: entry[0],
                pid,
                first_descriptor_tag,
            });
            cursor += 5 + es_info_length;
        }

        Ok(Self {
            program_number,
            pmt_pid: referenced_pid,
            streams,
        })
    }

    /// The first video stream and its codec family.
    pub fn video(&self) -> Option<(u16, VideoCodec)> {
        self.streams.iter().find_map(|stream| match stream.stream_type {
            STREAM_TYPE_MPEG1_VIDEO | STREAM_TYPE_MPEG2_VIDEO => {
                Some((stream.pid, VideoCodec::H262))
            }
            STREAM_TYPE_H264_VIDEO => Some((stream.pid, VideoCodec::H264)),
            _ => None,
        })
    }

    /// The first MPEG audio stream.
    pub fn mp2_pid(&self) -> Option<u16> {
        self.streams
            .iter()
            .find(|stream| {
                matches!(
                    stream.stream_type,
                    STREAM_TYPE_MPEG1_AUDIO | STREAM_TYPE_MPEG2_AUDIO
                )
            })
            .map(|stream| stream.pid)
    }

    /// The AC-3 stream: private PES data tagged with an AC-3 descriptor.
    ///
    /// When several streams qualify the last one listed wins.
    pub fn ac3_pid(&self) -> Option<u16> {
        self.streams
            .iter()
            .filter(|stream| {
                stream.stream_type == STREAM_TYPE_PRIVATE_PES
                    && stream.first_descriptor_tag == Some(DESCRIPTOR_TAG_AC3)
            })
            .map(|stream| stream.pid)
            .last()
    }
}

/// Byte/bit accessors relative to the `table_id` byte of a PSI section.
struct Section<'a> {
    data: &'a [u8],
}

impl<'a> Section<'a> {
    /// Sections are read with fixed offsets up to byte 12.
    fn new(buffer: &'a [u8], table_id_offset: usize) -> Option<Self> {
        let data = buffer.get(table_id_offset..)?;
        (data.len() >= 12).then_some(Self { data })
    }

    /// Big-endian 16-bit value at `offset`.
    fn u16(&self, offset: usize) -> u16 {
        (u16::from(self.data[offset]) << 8) | u16::from(self.data[offset + 1])
    }

    /// `width` bits of byte `offset`, starting `shift` bits from the LSB.
    fn bits(&self, offset: usize, shift: u8, width: u8) -> u8 {
        (self.data[offset] >> shift) & ((1u8 << width) - 1)
    }
}
