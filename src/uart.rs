//! Byte channel over the FPGA's UART bridge registers
//!
//! The FPGA bridges a small register range to an on-board UART
//! which talks to the VSR microcontrollers. Three registers make up
//! the bridge: a tx control register (data byte + fill/send
//! strobes), an rx control register (receive strobe) and a status
//! register (rx data byte + FIFO flags + packet done).
//!
//! Transmit per byte: load the byte together with the fill strobe,
//! clear the strobe. Once all bytes are queued, pulse the buffer
//! strobe to flush the FIFO onto the wire.
//!
//! Receive: poll the status register for the "receive packet done"
//! bit, then drain the FIFO byte by byte (strobe, clear, read the
//! data field) until the empty flag shows.
//!
//! The bridge is strictly request-then-response per call site -
//! transmit and receive never interleave mid frame. The byte
//! handshake itself has no NACK, failures are transport level or a
//! bounded poll running out.

use crate::constants::{
  UART_POLL_LIMIT,
  UART_DRAIN_LIMIT,
};
use crate::errors::UartError;
use crate::rdma::RegisterIo;
use crate::registers::*;

/// The three bridge register addresses. Defaults come from
/// [`crate::registers`], a differing firmware build is a
/// constants-only change.
#[derive(Debug, Copy, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct UartMap {
  pub tx_ctrl : u32,
  pub rx_ctrl : u32,
  pub status  : u32,
}

impl UartMap {
  pub fn new() -> Self {
    Self {
      tx_ctrl : UART_TX_CTRL,
      rx_ctrl : UART_RX_CTRL,
      status  : UART_STATUS,
    }
  }
}

impl Default for UartMap {
  fn default() -> Self {
    Self::new()
  }
}

/// Poll bounds of the receive side
#[derive(Debug, Copy, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct UartSettings {
  /// status reads while waiting for "packet done". This bounds
  /// iterations, not wall time.
  pub poll_limit  : usize,
  /// bytes drained from one frame at most
  pub drain_limit : usize,
}

impl UartSettings {
  pub fn new() -> Self {
    Self {
      poll_limit  : UART_POLL_LIMIT,
      drain_limit : UART_DRAIN_LIMIT,
    }
  }
}

impl Default for UartSettings {
  fn default() -> Self {
    Self::new()
  }
}

/// Turns register pokes into a reliable byte channel
///
/// Generic over [`RegisterIo`] so the same bridge drives the real
/// transport and the in-memory fakes of the test suite. The bridge
/// knows nothing about the meaning of the bytes it moves.
pub struct UartBridge<T : RegisterIo> {
  pub io       : T,
  pub map      : UartMap,
  pub settings : UartSettings,
}

impl<T : RegisterIo> UartBridge<T> {

  pub fn new(io : T) -> Self {
    Self {
      io       : io,
      map      : UartMap::new(),
      settings : UartSettings::new(),
    }
  }

  pub fn with_settings(io : T, map : UartMap, settings : UartSettings) -> Self {
    Self {
      io       : io,
      map      : map,
      settings : settings,
    }
  }

  /// Queue `bytes` into the tx FIFO and flush it onto the wire
  pub fn transmit(&mut self, bytes : &[u8]) -> Result<(), UartError> {
    trace!("Transmitting {} bytes over the UART bridge", bytes.len());
    for b in bytes {
      self.io.write_register(self.map.tx_ctrl, TX_FILL_STRB | *b as u32)?;
      self.io.write_register(self.map.tx_ctrl, *b as u32)?;
    }
    // all bytes queued - trigger transmission of the FIFO
    self.io.write_register(self.map.tx_ctrl, TX_BUFF_STRB)?;
    self.io.write_register(self.map.tx_ctrl, 0)?;
    Ok(())
  }

  /// Block (bounded) for a complete frame and drain it
  ///
  /// Raises `UartError::Timeout` when the poll budget runs out,
  /// never returns partial data.
  pub fn receive(&mut self) -> Result<Vec<u8>, UartError> {
    let mut packet_done = false;
    for _ in 0..self.settings.poll_limit {
      let status = self.io.read_register(self.map.status)?;
      if status & STAT_RX_PKT_DONE != 0 {
        packet_done = true;
        break;
      }
    }
    if !packet_done {
      debug!("No packet after {} status polls", self.settings.poll_limit);
      return Err(UartError::Timeout);
    }
    let mut bytes   = Vec::<u8>::new();
    let mut drained = false;
    for _ in 0..self.settings.drain_limit {
      let status = self.io.read_register(self.map.status)?;
      if status & STAT_RX_BUFF_EMPTY != 0 {
        drained = true;
        break;
      }
      self.io.write_register(self.map.rx_ctrl, RX_RECV_STRB)?;
      self.io.write_register(self.map.rx_ctrl, 0)?;
      let status = self.io.read_register(self.map.status)?;
      bytes.push(((status & STAT_RX_DATA_MASK) >> STAT_RX_DATA_SHIFT) as u8);
    }
    if !drained {
      // the FIFO kept producing past any sane frame length
      return Err(UartError::Timeout);
    }
    trace!("Received {} bytes over the UART bridge", bytes.len());
    Ok(bytes)
  }
}
