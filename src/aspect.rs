//! The ASCII-hex nibble alphabet of the VSR firmware
//!
//! The VSRs represent every 4bit nibble as one byte out of the 16
//! value alphabet {0x30-0x39, 0x41-0x46} ('0'-'9', 'A'-'F'). All
//! VSR level addresses and data travel in this encoding. Anything
//! outside the alphabet is rejected before transmission - fail
//! closed, not open.
//!
//! Register ranges do NOT increment linearly through byte space:
//! after 0x39 comes 0x41 (there is no 0x3A on the wire), after 0x46
//! the low byte wraps to 0x30 and the high byte advances by the
//! same rule. Getting this wrong addresses the wrong register
//! silently, which is why [`expand_register_range`] is pure and
//! unit tested without any transport.

use std::fmt;

use crate::errors::ProtocolError;

/// The 16 legal wire bytes, in nibble order
pub const ASPECT_ALPHABET : [u8;16] = [0x30, 0x31, 0x32, 0x33, 0x34,
                                       0x35, 0x36, 0x37, 0x38, 0x39,
                                       0x41, 0x42, 0x43, 0x44, 0x45, 0x46];

/// Encode the low nibble of `n` as its wire byte
pub fn nibble_to_aspect(n : u8) -> u8 {
  ASPECT_ALPHABET[(n & 0xf) as usize]
}

/// Decode one wire byte back to its nibble
pub fn aspect_to_nibble(b : u8) -> Result<u8, ProtocolError> {
  match b {
    0x30..=0x39 => Ok(b - 0x30),
    0x41..=0x46 => Ok(b - 0x41 + 10),
    _           => Err(ProtocolError::InvalidAspectByte(b)),
  }
}

/// Encode a full byte as its (high, low) wire byte pair
pub fn encode_byte(value : u8) -> (u8, u8) {
  (nibble_to_aspect(value >> 4), nibble_to_aspect(value))
}

/// Decode a (high, low) wire byte pair back to a byte
pub fn decode_byte(hi : u8, lo : u8) -> Result<u8, ProtocolError> {
  Ok((aspect_to_nibble(hi)? << 4) | aspect_to_nibble(lo)?)
}

/// One 8bit VSR register, addressed by its encoded
/// (address_high, address_low) byte pair
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VsrRegisterRef {
  pub hi : u8,
  pub lo : u8,
}

impl VsrRegisterRef {

  /// Build a ref from raw wire bytes, rejecting anything outside
  /// the alphabet
  pub fn new(hi : u8, lo : u8) -> Result<Self, ProtocolError> {
    aspect_to_nibble(hi)?;
    aspect_to_nibble(lo)?;
    Ok(Self {
      hi : hi,
      lo : lo,
    })
  }

  /// Build a ref from an 8bit register number
  pub fn from_register(reg : u8) -> Self {
    let (hi, lo) = encode_byte(reg);
    Self {
      hi : hi,
      lo : lo,
    }
  }

  /// The 8bit register number this ref points at
  pub fn register(&self) -> Result<u8, ProtocolError> {
    decode_byte(self.hi, self.lo)
  }
}

impl fmt::Display for VsrRegisterRef {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "({:#04x},{:#04x})", self.hi, self.lo)
  }
}

/// The next byte in the alphabet, None on 0x46 (carry)
fn next_aspect(b : u8) -> Option<u8> {
  match b {
    0x30..=0x38 => Some(b + 1),
    0x39        => Some(0x41),
    0x41..=0x45 => Some(b + 1),
    _           => None,
  }
}

/// Expand (start, count) into the address sequence used by block
/// operations
///
/// The low byte steps through the alphabet, carrying into the high
/// byte on 0x46 and restarting at 0x30. A carry out of the high
/// byte is `RangeOverflow`.
pub fn expand_register_range(start : VsrRegisterRef,
                             count : usize)
  -> Result<Vec<VsrRegisterRef>, ProtocolError> {
  aspect_to_nibble(start.hi)?;
  aspect_to_nibble(start.lo)?;
  let mut refs    = Vec::<VsrRegisterRef>::with_capacity(count);
  let mut current = start;
  for _ in 0..count {
    refs.push(current);
    current = match next_aspect(current.lo) {
      Some(lo) => {
        VsrRegisterRef { hi : current.hi, lo : lo }
      },
      None => {
        let hi = next_aspect(current.hi).ok_or(ProtocolError::RangeOverflow)?;
        VsrRegisterRef { hi : hi, lo : 0x30 }
      }
    };
  }
  Ok(refs)
}

/// Combine a new register value with the current one for a masked
/// write
///
/// The decoded nibbles are OR'ed and re-encoded. This is the
/// default write semantics on most registers; the unmasked path
/// overwrites outright.
pub fn mask_write_value(new_hi : u8,
                        new_lo : u8,
                        cur_hi : u8,
                        cur_lo : u8)
  -> Result<(u8, u8), ProtocolError> {
  let hi = nibble_to_aspect(aspect_to_nibble(new_hi)? | aspect_to_nibble(cur_hi)?);
  let lo = nibble_to_aspect(aspect_to_nibble(new_lo)? | aspect_to_nibble(cur_lo)?);
  Ok((hi, lo))
}
