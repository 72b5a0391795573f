//! VSR register operations framed over the UART bridge
//!
//! A [`VsrHandle`] addresses one VSR by its bus address byte (or
//! all of them via the broadcast address). It owns no hardware
//! resources - all device state lives on the board, the handle
//! borrows a bridge for the duration of each call.
//!
//! Command frames look like
//!
//! ```text
//! 0x23  vsr  cmd  addr_hi addr_lo  [val_hi val_lo ...]  0x0d
//! ```
//!
//! Responses echo the bus address and the address bytes, then carry
//! the read data or the write-back confirmation, then the
//! terminator. The write-back confirmation is verified against what
//! was written - a mismatch means the hardware is in an unknown
//! state and is the single most dangerous failure mode in this
//! system.
//!
//! There is no burst framing at the VSR layer: block operations are
//! one full round trip per register. [`VsrHandle::burst_write`] is
//! the exception, a single frame carrying many value bytes for
//! registers which support it; the protocol offers no echo of all
//! written bytes there, so it is not verified.

use std::fmt;

use crate::aspect::{
  aspect_to_nibble,
  decode_byte,
  encode_byte,
  expand_register_range,
  mask_write_value,
  VsrRegisterRef,
};
use crate::constants::*;
use crate::errors::{
  TransportError,
  VsrError,
};
use crate::rdma::RegisterIo;
use crate::registers::{
  VSR_CTRL,
  LV_ALL_ON,
  HV_ALL_ON,
};
use crate::uart::UartBridge;

/// One VSR (or all of them, via the broadcast address)
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct VsrHandle {
  /// bus address byte, 0x90..=0x95 or 0xff
  pub addr  : u8,
  /// log every frame exchanged with this VSR
  pub debug : bool,
}

impl VsrHandle {

  pub fn new(addr : u8) -> Self {
    Self {
      addr  : addr,
      debug : false,
    }
  }

  pub fn broadcast() -> Self {
    Self::new(VSR_BROADCAST)
  }

  /// Physical slot number (1..=6), None for the broadcast address
  pub fn slot(&self) -> Option<u8> {
    if VSR_ADDRESSES.contains(&self.addr) {
      return Some(self.addr - VSR_ADDRESSES[0] + 1);
    }
    None
  }

  fn command_frame(&self, cmd : u8, payload : &[u8]) -> Vec<u8> {
    let mut frame = Vec::<u8>::with_capacity(payload.len() + 4);
    frame.push(VSR_FRAME_START);
    frame.push(self.addr);
    frame.push(cmd);
    frame.extend_from_slice(payload);
    frame.push(VSR_FRAME_END);
    frame
  }

  /// Strip bus address echo and terminator, return the body
  fn strip_frame(&self, frame : &[u8]) -> Result<Vec<u8>, VsrError> {
    if frame.len() < 2 {
      return Err(VsrError::ShortFrame);
    }
    if frame[0] != self.addr {
      return Err(VsrError::BadEcho { expected : self.addr,
                                     got      : frame[0] });
    }
    if frame[frame.len()-1] != VSR_FRAME_END {
      return Err(VsrError::BadEcho { expected : VSR_FRAME_END,
                                     got      : frame[frame.len()-1] });
    }
    Ok(frame[1..frame.len()-1].to_vec())
  }

  fn exchange<T : RegisterIo>(&self,
                              bridge  : &mut UartBridge<T>,
                              cmd     : u8,
                              payload : &[u8]) -> Result<Vec<u8>, VsrError> {
    let frame = self.command_frame(cmd, payload);
    if self.debug {
      debug!("[vsr {:#04x}] -> {:x?}", self.addr, frame);
    }
    bridge.transmit(&frame)?;
    let response = bridge.receive()?;
    if self.debug {
      debug!("[vsr {:#04x}] <- {:x?}", self.addr, response);
    }
    Ok(response)
  }

  /// Read one 8bit VSR register
  ///
  /// Returns the raw response frame together with the
  /// (value_high, value_low) wire byte pair. Use
  /// [`VsrHandle::read_value`] for the decoded byte.
  pub fn read_register<T : RegisterIo>(&self,
                                       bridge : &mut UartBridge<T>,
                                       reg    : VsrRegisterRef)
    -> Result<(Vec<u8>, (u8, u8)), VsrError> {
    let frame = self.exchange(bridge, READ_REGISTER, &[reg.hi, reg.lo])?;
    let body  = self.strip_frame(&frame)?;
    // address echo + exactly two value bytes
    if body.len() < 4 {
      return Err(VsrError::ShortFrame);
    }
    let val_hi = body[2];
    let val_lo = body[3];
    aspect_to_nibble(val_hi)?;
    aspect_to_nibble(val_lo)?;
    Ok((frame, (val_hi, val_lo)))
  }

  /// Read one register and decode the value
  pub fn read_value<T : RegisterIo>(&self,
                                    bridge : &mut UartBridge<T>,
                                    reg    : VsrRegisterRef) -> Result<u8, VsrError> {
    let (_, (val_hi, val_lo)) = self.read_register(bridge, reg)?;
    Ok(decode_byte(val_hi, val_lo)?)
  }

  /// Write one 8bit VSR register
  ///
  /// With `masked` the new value is OR combined with the current
  /// register content first (the default semantics on most
  /// registers). The echoed value bytes MUST equal what was meant
  /// to be written - a mismatch raises
  /// [`VsrError::ReadbackMismatch`] and is never retried here.
  pub fn write_register<T : RegisterIo>(&self,
                                        bridge : &mut UartBridge<T>,
                                        reg    : VsrRegisterRef,
                                        val_hi : u8,
                                        val_lo : u8,
                                        masked : bool) -> Result<(), VsrError> {
    aspect_to_nibble(val_hi)?;
    aspect_to_nibble(val_lo)?;
    let (wr_hi, wr_lo) : (u8, u8);
    if masked {
      let (_, (cur_hi, cur_lo)) = self.read_register(bridge, reg)?;
      let combined = mask_write_value(val_hi, val_lo, cur_hi, cur_lo)?;
      wr_hi = combined.0;
      wr_lo = combined.1;
    } else {
      wr_hi = val_hi;
      wr_lo = val_lo;
    }
    let frame = self.exchange(bridge, WRITE_REGISTER,
                              &[reg.hi, reg.lo, wr_hi, wr_lo])?;
    let body  = self.strip_frame(&frame)?;
    if body.len() < 4 {
      return Err(VsrError::ShortFrame);
    }
    if (body[2], body[3]) != (wr_hi, wr_lo) {
      error!("Readback mismatch on vsr {:#04x} reg {}!", self.addr, reg);
      return Err(VsrError::ReadbackMismatch {
        vsr      : self.addr,
        register : reg,
        wrote    : (wr_hi, wr_lo),
        echoed   : (body[2], body[3]),
      });
    }
    Ok(())
  }

  /// Write one register taking a plain byte value
  pub fn write_value<T : RegisterIo>(&self,
                                     bridge : &mut UartBridge<T>,
                                     reg    : VsrRegisterRef,
                                     value  : u8,
                                     masked : bool) -> Result<(), VsrError> {
    let (val_hi, val_lo) = encode_byte(value);
    self.write_register(bridge, reg, val_hi, val_lo, masked)
  }

  /// Set the given bits in a register (firmware side OR)
  pub fn set_bits<T : RegisterIo>(&self,
                                  bridge : &mut UartBridge<T>,
                                  reg    : VsrRegisterRef,
                                  mask   : u8) -> Result<(), VsrError> {
    let (val_hi, val_lo) = encode_byte(mask);
    let frame = self.exchange(bridge, SET_BIT, &[reg.hi, reg.lo, val_hi, val_lo])?;
    let body  = self.strip_frame(&frame)?;
    if body.len() < 4 {
      return Err(VsrError::ShortFrame);
    }
    if (body[2], body[3]) != (val_hi, val_lo) {
      return Err(VsrError::ReadbackMismatch {
        vsr      : self.addr,
        register : reg,
        wrote    : (val_hi, val_lo),
        echoed   : (body[2], body[3]),
      });
    }
    Ok(())
  }

  /// Clear the given bits in a register (firmware side AND NOT)
  pub fn clear_bits<T : RegisterIo>(&self,
                                    bridge : &mut UartBridge<T>,
                                    reg    : VsrRegisterRef,
                                    mask   : u8) -> Result<(), VsrError> {
    let (val_hi, val_lo) = encode_byte(mask);
    let frame = self.exchange(bridge, CLEAR_BIT, &[reg.hi, reg.lo, val_hi, val_lo])?;
    let body  = self.strip_frame(&frame)?;
    if body.len() < 4 {
      return Err(VsrError::ShortFrame);
    }
    if (body[2], body[3]) != (val_hi, val_lo) {
      return Err(VsrError::ReadbackMismatch {
        vsr      : self.addr,
        register : reg,
        wrote    : (val_hi, val_lo),
        echoed   : (body[2], body[3]),
      });
    }
    Ok(())
  }

  /// Write the same value to `count` consecutive registers, one
  /// round trip each
  pub fn block_write<T : RegisterIo>(&self,
                                     bridge : &mut UartBridge<T>,
                                     start  : VsrRegisterRef,
                                     count  : usize,
                                     value  : u8,
                                     masked : bool) -> Result<(), VsrError> {
    for reg in expand_register_range(start, count)? {
      self.write_value(bridge, reg, value, masked)?;
    }
    Ok(())
  }

  /// Read `count` consecutive registers, one round trip each
  pub fn block_read<T : RegisterIo>(&self,
                                    bridge : &mut UartBridge<T>,
                                    start  : VsrRegisterRef,
                                    count  : usize) -> Result<Vec<u8>, VsrError> {
    let mut values = Vec::<u8>::with_capacity(count);
    for reg in expand_register_range(start, count)? {
      values.push(self.read_value(bridge, reg)?);
    }
    Ok(values)
  }

  /// Write many value bytes after a single address pair
  ///
  /// For registers supporting contiguous multi byte writes without
  /// per byte addressing overhead. The response is drained but not
  /// verified - the protocol offers no echo of all written bytes.
  pub fn burst_write<T : RegisterIo>(&self,
                                     bridge : &mut UartBridge<T>,
                                     start  : VsrRegisterRef,
                                     values : &[u8]) -> Result<(), VsrError> {
    let mut payload = Vec::<u8>::with_capacity(2 + 2*values.len());
    payload.push(start.hi);
    payload.push(start.lo);
    for v in values {
      let (hi, lo) = encode_byte(*v);
      payload.push(hi);
      payload.push(lo);
    }
    let frame = self.exchange(bridge, BURST_WRITE, &payload)?;
    self.strip_frame(&frame)?;
    Ok(())
  }

  /// Program the on-board DACs
  ///
  /// Each word is 12 bit, transmitted MSB first as three wire
  /// nibbles. Like burst writes, the echo carries no per word
  /// confirmation and is only drained.
  pub fn write_dac<T : RegisterIo>(&self,
                                   bridge : &mut UartBridge<T>,
                                   values : &[u16]) -> Result<(), VsrError> {
    use crate::aspect::nibble_to_aspect;
    let mut payload = Vec::<u8>::with_capacity(3*values.len());
    for v in values {
      payload.push(nibble_to_aspect(((v >> 8) & 0xf) as u8));
      payload.push(nibble_to_aspect(((v >> 4) & 0xf) as u8));
      payload.push(nibble_to_aspect((v & 0xf) as u8));
    }
    let frame = self.exchange(bridge, WRITE_DAC, &payload)?;
    self.strip_frame(&frame)?;
    Ok(())
  }

  /// Drive the ADC/DAC enable lines
  pub fn adc_dac_control<T : RegisterIo>(&self,
                                         bridge : &mut UartBridge<T>,
                                         ctrl   : u8) -> Result<(), VsrError> {
    let (hi, lo) = encode_byte(ctrl);
    let frame = self.exchange(bridge, ADC_DAC_CTRL, &[hi, lo])?;
    self.strip_frame(&frame)?;
    Ok(())
  }
}

impl fmt::Display for VsrHandle {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self.slot() {
      Some(slot) => write!(f, "<VsrHandle: addr {:#04x} (slot {})>", self.addr, slot),
      None       => write!(f, "<VsrHandle: addr {:#04x}>", self.addr),
    }
  }
}

//========== Power/enable control ========
//
// One bit mask register gates the low and high voltage of each
// physical slot: bit (slot-1) for LV, bit (slot-1+8) for HV.
// Read-modify-write so slots stay independent.
//========================================

fn check_slot(slot : u8) -> Result<(), VsrError> {
  if slot < 1 || slot > N_VSR_SLOTS {
    return Err(VsrError::InvalidSlot(slot));
  }
  Ok(())
}

/// Enable the low voltage of one slot
pub fn enable_lv<T : RegisterIo>(io : &mut T, slot : u8) -> Result<(), VsrError> {
  check_slot(slot)?;
  let value = io.read_register(VSR_CTRL)?;
  io.write_register(VSR_CTRL, value | 1 << (slot - 1))?;
  Ok(())
}

/// Disable the low voltage of one slot
pub fn disable_lv<T : RegisterIo>(io : &mut T, slot : u8) -> Result<(), VsrError> {
  check_slot(slot)?;
  let value = io.read_register(VSR_CTRL)?;
  io.write_register(VSR_CTRL, value & !(1 << (slot - 1)))?;
  Ok(())
}

/// Enable the high voltage of one slot
pub fn enable_hv<T : RegisterIo>(io : &mut T, slot : u8) -> Result<(), VsrError> {
  check_slot(slot)?;
  let value = io.read_register(VSR_CTRL)?;
  io.write_register(VSR_CTRL, value | 1 << (slot - 1 + 8))?;
  Ok(())
}

/// Disable the high voltage of one slot
pub fn disable_hv<T : RegisterIo>(io : &mut T, slot : u8) -> Result<(), VsrError> {
  check_slot(slot)?;
  let value = io.read_register(VSR_CTRL)?;
  io.write_register(VSR_CTRL, value & !(1 << (slot - 1 + 8)))?;
  Ok(())
}

/// Enable the low voltage of all six slots at once
pub fn enable_all_lv<T : RegisterIo>(io : &mut T) -> Result<(), TransportError> {
  let value = io.read_register(VSR_CTRL)?;
  io.write_register(VSR_CTRL, value | LV_ALL_ON)
}

/// Enable the high voltage of all six slots at once
pub fn enable_all_hv<T : RegisterIo>(io : &mut T) -> Result<(), TransportError> {
  let value = io.read_register(VSR_CTRL)?;
  io.write_register(VSR_CTRL, value | HV_ALL_ON)
}

/// Cut low and high voltage everywhere
pub fn disable_all<T : RegisterIo>(io : &mut T) -> Result<(), TransportError> {
  io.write_register(VSR_CTRL, 0)
}
