//! Little endian parse helpers for the transport wire format
//!
//! All words on the register transport are little endian. The
//! helpers advance a position marker through the bytestream.

pub fn parse_u8(bs : &Vec::<u8>, pos : &mut usize) -> u8 {
  let value = u8::from_le_bytes([bs[*pos]]);
  *pos += 1;
  value
}

pub fn parse_u16(bs : &Vec::<u8>, pos : &mut usize) -> u16 {
  let value = u16::from_le_bytes([bs[*pos], bs[*pos+1]]);
  *pos += 2;
  value
}

/// Get u32 from a bytestream and move on the position marker
///
/// # Arguments
///
/// * bs
/// * pos
pub fn parse_u32(bs : &Vec::<u8>, pos : &mut usize) -> u32 {
  let value = u32::from_le_bytes([bs[*pos], bs[*pos+1], bs[*pos+2], bs[*pos+3]]);
  *pos += 4;
  value
}
