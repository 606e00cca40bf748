//! Bit reader tests.

use bitstream_io::{BigEndian, BitWrite, BitWriter};
use cutmarks::BitReader;

#[test]
fn reads_fixed_width_fields_msb_first() {
    let data = [0b1011_0001, 0xFF];
    let mut reader = BitReader::new(&data);
    assert_eq!(reader.read_bits(1), Some(1));
    assert_eq!(reader.read_bits(3), Some(0b011));
    assert_eq!(reader.read_bits(4), Some(0b0001));
    assert_eq!(reader.read_u8(), Some(0xFF));
    assert_eq!(reader.remaining_bits(), 0);
}

#[test]
fn reads_across_byte_boundaries() {
    let data = [0x12, 0x34, 0x56, 0x78, 0x9A];
    let mut reader = BitReader::new(&data);
    assert_eq!(reader.read_bits(4), Some(0x1));
    assert_eq!(reader.read_u32(), Some(0x2345_6789));
    assert_eq!(reader.position(), 36);
    assert_eq!(reader.read_bits(4), Some(0xA));
}

#[test]
fn exhausted_reader_returns_none() {
    let data = [0xAB];
    let mut reader = BitReader::new(&data);
    assert_eq!(reader.read_bits(9), None);
    // a failed wide read consumes nothing
    assert_eq!(reader.read_u8(), Some(0xAB));
    assert_eq!(reader.read_bit(), None);
    assert_eq!(reader.read_flag(), None);
}

#[test]
fn rejects_reads_wider_than_32_bits() {
    let data = [0u8; 8];
    let mut reader = BitReader::new(&data);
    assert_eq!(reader.read_bits(33), None);
    assert_eq!(reader.position(), 0);
}

#[test]
fn unsigned_exp_golomb_codes() {
    // 1 | 010 | 011 | 00100 | 0001000 -> 0, 1, 2, 3, 7
    let data = [0b1010_0110, 0b0100_0001, 0b0000_0000];
    let mut reader = BitReader::new(&data);
    assert_eq!(reader.read_ue(), Some(0));
    assert_eq!(reader.read_ue(), Some(1));
    assert_eq!(reader.read_ue(), Some(2));
    assert_eq!(reader.read_ue(), Some(3));
    assert_eq!(reader.read_ue(), Some(7));
}

#[test]
fn signed_exp_golomb_codes() {
    // ue 1, 2, 3, 4 -> se +1, -1, +2, -2
    let data = [0b0100_1100, 0b1000_0101];
    let mut reader = BitReader::new(&data);
    assert_eq!(reader.read_se(), Some(1));
    assert_eq!(reader.read_se(), Some(-1));
    assert_eq!(reader.read_se(), Some(2));
    assert_eq!(reader.read_se(), Some(-2));
}

#[test]
fn truncated_exp_golomb_code_returns_none() {
    // prefix promises a 3-bit suffix, only 2 bits remain
    let data = [0b0000_0001];
    let mut reader = BitReader::new(&data);
    assert_eq!(reader.read_bits(4), Some(0));
    assert_eq!(reader.read_ue(), None);
}

#[test]
fn all_zero_buffer_is_not_a_valid_code() {
    let data = [0u8; 8];
    let mut reader = BitReader::new(&data);
    assert_eq!(reader.read_ue(), None);
}

#[test]
fn skip_bits_moves_the_cursor() {
    let data = [0x00, 0xF0];
    let mut reader = BitReader::new(&data);
    assert_eq!(reader.skip_bits(8), Some(()));
    assert_eq!(reader.read_bits(4), Some(0xF));
    assert_eq!(reader.skip_bits(5), None);
    assert_eq!(reader.skip_bits(4), Some(()));
    assert_eq!(reader.remaining_bits(), 0);
}

fn encode_ue(writer: &mut BitWriter<Vec<u8>, BigEndian>, value: u32) {
    let code = u64::from(value) + 1;
    let width = 64 - code.leading_zeros();
    for _ in 1..width {
        writer.write_bit(false).unwrap();
    }
    writer.write::<u64>(width, code).unwrap();
}

fn encode_se(writer: &mut BitWriter<Vec<u8>, BigEndian>, value: i32) {
    let code = if value > 0 {
        2 * i64::from(value) - 1
    } else {
        -2 * i64::from(value)
    };
    encode_ue(writer, code as u32);
}

fn finish(mut writer: BitWriter<Vec<u8>, BigEndian>) -> Vec<u8> {
    // a trailing 1 keeps the padding from reading as a zero prefix
    writer.write_bit(true).unwrap();
    writer.byte_align().unwrap();
    writer.into_writer()
}

#[test]
fn unsigned_exp_golomb_spread_decodes_back() {
    let values = [
        0,
        1,
        2,
        255,
        65_535,
        1 << 20,
        (1 << 31) - 1,
        1 << 31,
        u32::MAX - 1,
    ];
    let mut writer = BitWriter::endian(Vec::new(), BigEndian);
    for &value in &values {
        encode_ue(&mut writer, value);
    }
    let data = finish(writer);

    let mut reader = BitReader::new(&data);
    for &value in &values {
        assert_eq!(reader.read_ue(), Some(value), "ue({value})");
    }
    assert_eq!(reader.read_bit(), Some(1));
}

#[test]
fn signed_exp_golomb_spread_decodes_back() {
    let values = [0, 1, -1, 2, -2, 127, -128, 32_767, -32_768, i32::MAX, -i32::MAX];
    let mut writer = BitWriter::endian(Vec::new(), BigEndian);
    for &value in &values {
        encode_se(&mut writer, value);
    }
    let data = finish(writer);

    let mut reader = BitReader::new(&data);
    for &value in &values {
        assert_eq!(reader.read_se(), Some(value), "se({value})");
    }
}

#[test]
fn large_code_cut_short_returns_none() {
    let mut writer = BitWriter::endian(Vec::new(), BigEndian);
    encode_ue(&mut writer, 65_535);
    let data = finish(writer);

    // 33 bits of code; drop the bytes holding the suffix tail
    let mut reader = BitReader::new(&data[..3]);
    assert_eq!(reader.read_ue(), None);
}
