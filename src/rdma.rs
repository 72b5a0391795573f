//! UDP framed register transport to the FPGA
//!
//! This is not true remote DMA - it is a bespoke request/response
//! protocol against the memory mapped address space of the FPGA,
//! with at most one transaction in flight. Request N's response is
//! always consumed before request N+1 is sent; the `&mut self`
//! receivers are the exclusive access discipline. Sharing one
//! transport across threads requires external serialization (a
//! mutex or a single owner), the protocol has no correlation
//! mechanism which would make concurrent use safe.
//!
//! A timed out transaction leaves the remote side in an undefined
//! state. Callers should not assume that a subsequent unrelated
//! transaction is safe - resynchronize explicitly, e.g. with
//! [`RdmaTransport::reconnect`] followed by a known idempotent read.
//! This is a documented risk, the core does not solve it invisibly.

use std::io;
use std::fmt;
use std::net::{
  UdpSocket,
  SocketAddr,
};
use std::time::Duration;

use crate::errors::TransportError;
use crate::packet::{
  RdmaOpcode,
  RdmaPacket,
};
use crate::trace::{
  TraceRecord,
  TraceSink,
};

/// Largest UDP datagram we expect on the register transport -
/// 8 byte header + payload words
pub const RDMA_MAX_PACKSIZE : usize = 2048;

/// Word level register access - the seam between the transport and
/// everything built on top of it (UART bridge, power control).
/// Implemented by [`RdmaTransport`] for the real hardware and by
/// in-memory fakes in the tests.
pub trait RegisterIo {
  fn read_register(&mut self, addr : u32) -> Result<u32, TransportError>;
  fn write_register(&mut self, addr : u32, value : u32) -> Result<(), TransportError>;
}

/// Settings of one transport instance
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct TransportSettings {
  /// IP/port of the FPGA, e.g. "10.0.1.10:61649"
  pub target_address : String,
  /// socket receive timeout in milliseconds
  pub timeout_ms     : u64,
  /// block for a header-only confirmation after each write. When
  /// false, writes are fire-and-forget (low overhead mode).
  pub ack_writes     : bool,
}

impl TransportSettings {
  pub fn new() -> Self {
    Self {
      target_address : String::from("10.0.1.10:61649"),
      timeout_ms     : 500,
      ack_writes     : true,
    }
  }
}

impl Default for TransportSettings {
  fn default() -> Self {
    Self::new()
  }
}

/// The owner of the UDP socket pair and the sole writer of wire
/// bytes
pub struct RdmaTransport {
  pub socket   : UdpSocket,
  pub settings : TransportSettings,
  /// rolling correlation byte stamped into each request
  tag          : u8,
  buffer       : [u8;RDMA_MAX_PACKSIZE],
  trace        : Option<Box<dyn TraceSink>>,
}

impl RdmaTransport {

  pub fn new(settings : &TransportSettings) -> io::Result<Self> {
    let socket = Self::connect(settings)?;
    Ok(Self {
      socket   : socket,
      settings : settings.clone(),
      tag      : 0,
      buffer   : [0;RDMA_MAX_PACKSIZE],
      trace    : None,
    })
  }

  /// Bind a local UDP socket and connect it to the FPGA
  ///
  /// This will try a number of options for the local port, falling
  /// back to an ephemeral one.
  pub fn connect(settings : &TransportSettings) -> io::Result<UdpSocket> {
    let local_addrs = [
      SocketAddr::from(([0, 0, 0, 0], 61650)),
      SocketAddr::from(([0, 0, 0, 0], 61651)),
      SocketAddr::from(([0, 0, 0, 0], 61652)),
      SocketAddr::from(([0, 0, 0, 0], 0)),
    ];
    let socket : UdpSocket;
    match UdpSocket::bind(&local_addrs[..]) {
      Err(err) => {
        error!("Can not bind local UDP socket for the register transport! {err}");
        return Err(err);
      }
      Ok(value) => {
        socket = value;
      }
    }
    socket.set_read_timeout(Some(Duration::from_millis(settings.timeout_ms)))?;
    match socket.connect(&settings.target_address) {
      Err(err) => {
        error!("Can not connect to FPGA at {}! {err}", settings.target_address);
        return Err(err);
      }
      Ok(_) => {
        info!("Register transport connected to {}", settings.target_address);
      }
    }
    Ok(socket)
  }

  /// Reconnect to the same target, e.g. after a timeout left the
  /// link in doubt. Follow up with an idempotent read to
  /// resynchronize.
  pub fn reconnect(&mut self) -> io::Result<()> {
    self.socket = Self::connect(&self.settings)?;
    Ok(())
  }

  /// Install a trace sink. Every transaction from now on emits a
  /// record; this never changes protocol behavior.
  pub fn set_trace_sink(&mut self, sink : Box<dyn TraceSink>) {
    self.trace = Some(sink);
  }

  fn next_tag(&mut self) -> u8 {
    let tag  = self.tag;
    self.tag = self.tag.wrapping_add(1);
    tag
  }

  fn emit_trace(&mut self, packet : &RdmaPacket) {
    if let Some(sink) = &mut self.trace {
      sink.record(&TraceRecord::from_packet(packet));
    }
  }

  fn send_packet(&mut self, packet : &RdmaPacket) -> Result<(), TransportError> {
    let stream = packet.to_bytestream();
    match self.socket.send(stream.as_slice()) {
      Err(err) => {
        error!("Unable to send {}! {err}", packet);
        return Err(TransportError::Io(err.kind()));
      },
      Ok(_) => ()
    }
    self.emit_trace(packet);
    Ok(())
  }

  /// Block on the socket for the next datagram
  ///
  /// A receive timeout surfaces as `TransportError::Timeout` with
  /// the address/opcode of the transaction it interrupted.
  fn receive(&mut self, addr : u32, opcode : RdmaOpcode) -> Result<usize, TransportError> {
    match self.socket.recv(&mut self.buffer) {
      Err(err) => {
        if err.kind() == io::ErrorKind::WouldBlock
        || err.kind() == io::ErrorKind::TimedOut {
          debug!("Receive timeout for {} at {:#x}", opcode, addr);
          return Err(TransportError::Timeout { addr   : addr,
                                               opcode : opcode });
        }
        error!("Receive failed for {} at {:#x}! {err}", opcode, addr);
        Err(TransportError::Io(err.kind()))
      },
      Ok(nbytes) => Ok(nbytes)
    }
  }

  /// Read `nwords` contiguous 32bit words starting at `addr`
  ///
  /// Blocks until the matching response arrives or the configured
  /// timeout fires. A response of the wrong size is `Malformed`,
  /// never a partially decoded value. Neither case is retried here,
  /// retry policy belongs to the caller.
  pub fn read(&mut self, addr : u32, nwords : u16) -> Result<Vec<u32>, TransportError> {
    let tag     = self.next_tag();
    let request = RdmaPacket::read_request(addr, nwords, tag);
    self.send_packet(&request)?;
    let nbytes = self.receive(addr, RdmaOpcode::Read)?;
    let stream = self.buffer[..nbytes].to_vec();
    let mut pos = 0usize;
    let response : RdmaPacket;
    match RdmaPacket::from_bytestream(&stream, &mut pos, nwords) {
      Err(err) => {
        error!("Malformed read response for addr {:#x}! {err}", addr);
        return Err(TransportError::Malformed);
      },
      Ok(packet) => {
        response = packet;
      }
    }
    if response.opcode != RdmaOpcode::Read || response.addr != addr {
      error!("Response {} does not match read request at {:#x}!", response, addr);
      return Err(TransportError::Malformed);
    }
    if response.tag != tag {
      // the tag is a courtesy of the firmware, not protocol enforced
      warn!("Response tag {} does not match request tag {}", response.tag, tag);
    }
    self.emit_trace(&response);
    Ok(response.payload)
  }

  /// Write `data` to contiguous registers starting at `addr`
  ///
  /// In acknowledged mode this blocks for the header-only
  /// confirmation.
  pub fn write(&mut self, addr : u32, data : &[u32]) -> Result<(), TransportError> {
    let tag     = self.next_tag();
    let request = RdmaPacket::write_request(addr, data, tag);
    let nwords  = request.burst_len;
    self.send_packet(&request)?;
    if !self.settings.ack_writes {
      return Ok(());
    }
    let nbytes = self.receive(addr, RdmaOpcode::Write)?;
    let stream = self.buffer[..nbytes].to_vec();
    let mut pos = 0usize;
    match RdmaPacket::from_bytestream(&stream, &mut pos, nwords) {
      Err(err) => {
        error!("Malformed write acknowledgement for addr {:#x}! {err}", addr);
        return Err(TransportError::Malformed);
      },
      Ok(ack) => {
        if ack.opcode != RdmaOpcode::Write || ack.addr != addr {
          error!("Acknowledgement {} does not match write request at {:#x}!", ack, addr);
          return Err(TransportError::Malformed);
        }
        if ack.tag != tag {
          warn!("Acknowledgement tag {} does not match request tag {}", ack.tag, tag);
        }
      }
    }
    Ok(())
  }
}

impl RegisterIo for RdmaTransport {

  fn read_register(&mut self, addr : u32) -> Result<u32, TransportError> {
    let data = self.read(addr, 1)?;
    match data.first() {
      None        => Err(TransportError::Malformed),
      Some(value) => Ok(*value)
    }
  }

  fn write_register(&mut self, addr : u32, value : u32) -> Result<(), TransportError> {
    self.write(addr, &[value])
  }
}

impl fmt::Display for RdmaTransport {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<RdmaTransport: target {}, tag {}>", self.settings.target_address, self.tag)
  }
}
