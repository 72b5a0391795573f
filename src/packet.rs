//! The fixed layout register transaction packet
//!
//! One transaction is one request and (except for unacknowledged
//! writes) one response. The wire format is a little endian 8 byte
//! header
//!
//! ```text
//! {burst_len : u16, tag : u8, opcode : u8, addr : u32}
//! ```
//!
//! followed by `burst_len` 32bit words of payload for writes and for
//! read responses. A burst of length 1 is just a degenerate burst,
//! there is no distinct "single" opcode.

use std::fmt;

use crate::errors::ProtocolError;
use crate::serialization::{
  parse_u8,
  parse_u16,
  parse_u32,
};

/// Size of the transaction header in bytes
pub const RDMA_HEADER_SIZE : usize = 8;

/// The two transaction opcodes of the register transport
///
/// The values are fixed by the FPGA firmware.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum RdmaOpcode {
  Write = 0,
  Read  = 1,
}

impl RdmaOpcode {

  pub fn to_u8(&self) -> u8 {
    let ret_val : u8;
    match self {
      RdmaOpcode::Write => {
        ret_val = 0;
      }
      RdmaOpcode::Read => {
        ret_val = 1;
      }
    }
    ret_val
  }

  pub fn from_u8(opcode : u8) -> Result<Self, ProtocolError> {
    match opcode {
      0 => Ok(RdmaOpcode::Write),
      1 => Ok(RdmaOpcode::Read),
      _ => Err(ProtocolError::UnknownOpcode(opcode)),
    }
  }
}

impl fmt::Display for RdmaOpcode {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr : String;
    match self {
      RdmaOpcode::Write => {repr = String::from("Write");}
      RdmaOpcode::Read  => {repr = String::from("Read");}
    }
    write!(f, "<RdmaOpcode: {}>", repr)
  }
}

/// One register transaction - request or response, both share the
/// shape
#[derive(Debug, Clone, PartialEq)]
pub struct RdmaPacket {
  pub burst_len : u16,
  /// caller supplied correlation byte, not protocol enforced
  pub tag       : u8,
  pub opcode    : RdmaOpcode,
  pub addr      : u32,
  pub payload   : Vec<u32>,
}

impl RdmaPacket {

  /// A read request for `burst_len` words starting at `addr`
  pub fn read_request(addr : u32, burst_len : u16, tag : u8) -> Self {
    Self {
      burst_len : burst_len,
      tag       : tag,
      opcode    : RdmaOpcode::Read,
      addr      : addr,
      payload   : Vec::<u32>::new(),
    }
  }

  /// A write request carrying `data`, burst length is the word count
  pub fn write_request(addr : u32, data : &[u32], tag : u8) -> Self {
    Self {
      burst_len : data.len() as u16,
      tag       : tag,
      opcode    : RdmaOpcode::Write,
      addr      : addr,
      payload   : data.to_vec(),
    }
  }

  pub fn to_bytestream(&self) -> Vec<u8> {
    let mut stream = Vec::<u8>::with_capacity(RDMA_HEADER_SIZE + 4*self.payload.len());
    stream.extend_from_slice(&self.burst_len.to_le_bytes());
    stream.push(self.tag);
    stream.push(self.opcode.to_u8());
    stream.extend_from_slice(&self.addr.to_le_bytes());
    for word in &self.payload {
      stream.extend_from_slice(&word.to_le_bytes());
    }
    stream
  }

  /// Decode a packet from a bytestream
  ///
  /// For a write acknowledgement the payload is absent (header only
  /// response), for a read response it must hold exactly
  /// `expected_burst` words.
  ///
  /// # Arguments
  ///
  /// * bs             : binary representation of the packet
  /// * pos            : position marker, will be advanced
  /// * expected_burst : word count of the matching request
  pub fn from_bytestream(bs             : &Vec<u8>,
                         pos            : &mut usize,
                         expected_burst : u16)
    -> Result<Self, ProtocolError> {
    if bs.len() < *pos + RDMA_HEADER_SIZE {
      return Err(ProtocolError::SizeMismatch { expected : RDMA_HEADER_SIZE,
                                               got      : bs.len() - *pos });
    }
    let burst_len = parse_u16(bs, pos);
    let tag       = parse_u8(bs, pos);
    let opcode    = RdmaOpcode::from_u8(parse_u8(bs, pos))?;
    let addr      = parse_u32(bs, pos);
    let mut payload = Vec::<u32>::new();
    match opcode {
      RdmaOpcode::Write => {
        // header only acknowledgement
        if bs.len() > *pos {
          return Err(ProtocolError::SizeMismatch { expected : 0,
                                                   got      : (bs.len() - *pos)/4 });
        }
      },
      RdmaOpcode::Read => {
        let avail = bs.len() - *pos;
        if avail != 4*expected_burst as usize {
          return Err(ProtocolError::SizeMismatch { expected : expected_burst as usize,
                                                   got      : avail/4 });
        }
        for _ in 0..expected_burst {
          payload.push(parse_u32(bs, pos));
        }
      }
    }
    Ok(Self {
      burst_len : burst_len,
      tag       : tag,
      opcode    : opcode,
      addr      : addr,
      payload   : payload,
    })
  }
}

impl fmt::Display for RdmaPacket {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<RdmaPacket: op {}, addr {:#010x}, burst {}, tag {}, {} payload words>",
           self.opcode, self.addr, self.burst_len, self.tag, self.payload.len())
  }
}
