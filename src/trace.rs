//! Structured trace records for register transactions
//!
//! Tracing replaces the global debug flags of earlier incarnations
//! of this software. A [`TraceSink`] is an explicit capability
//! handed to the transport - when none is installed, nothing is
//! recorded. Tracing must never alter protocol behavior, so sink
//! failures are logged and swallowed.

use std::io::Write;

use chrono::{
  DateTime,
  Utc,
};

use crate::packet::RdmaPacket;

/// One register transaction as seen by the transport
#[derive(Debug, Clone, serde::Serialize)]
pub struct TraceRecord {
  pub timestamp : DateTime<Utc>,
  pub addr      : u32,
  /// raw opcode value (0 write, 1 read)
  pub opcode    : u8,
  pub burst_len : u16,
  pub tag       : u8,
  pub payload   : Vec<u32>,
}

impl TraceRecord {
  pub fn from_packet(packet : &RdmaPacket) -> Self {
    Self {
      timestamp : Utc::now(),
      addr      : packet.addr,
      opcode    : packet.opcode.to_u8(),
      burst_len : packet.burst_len,
      tag       : packet.tag,
      payload   : packet.payload.clone(),
    }
  }
}

pub trait TraceSink {
  fn record(&mut self, rec : &TraceRecord);
}

/// Writes one JSON line per transaction to any `Write` target
pub struct JsonlTraceSink<W : Write> {
  out : W,
}

impl<W : Write> JsonlTraceSink<W> {
  pub fn new(out : W) -> Self {
    Self {
      out : out,
    }
  }
}

impl<W : Write> TraceSink for JsonlTraceSink<W> {
  fn record(&mut self, rec : &TraceRecord) {
    match serde_json::to_string(rec) {
      Err(err) => {
        error!("Unable to serialize trace record! {err}");
      },
      Ok(line) => {
        match writeln!(self.out, "{}", line) {
          Err(err) => {
            error!("Unable to write trace record! {err}");
          },
          Ok(_) => ()
        }
      }
    }
  }
}

/// Keeps records in memory, mainly useful for tests
#[derive(Debug, Default)]
pub struct MemoryTraceSink {
  pub records : Vec<TraceRecord>,
}

impl MemoryTraceSink {
  pub fn new() -> Self {
    Self {
      records : Vec::<TraceRecord>::new(),
    }
  }
}

impl TraceSink for MemoryTraceSink {
  fn record(&mut self, rec : &TraceRecord) {
    self.records.push(rec.clone());
  }
}
