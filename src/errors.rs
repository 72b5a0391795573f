//! Error taxonomy of the control stack
//!
//! All of these are recoverable by the caller - the core never
//! retries silently and never aborts the process. Only resource
//! setup failures (e.g. the UDP socket can not be bound) are
//! surfaced as plain `io::Error` at construction time.

use std::fmt;
use std::error::Error;

use crate::packet::RdmaOpcode;
use crate::aspect::VsrRegisterRef;

/// Failures of the UDP register transport
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum TransportError {
  /// No response arrived within the configured socket timeout.
  /// The remote state is undefined after this, see
  /// [`crate::rdma::RdmaTransport`] for the resynchronization
  /// policy.
  Timeout {
    addr   : u32,
    opcode : RdmaOpcode,
  },
  /// The response did not decode to the shape of the request
  Malformed,
  /// Any other socket level problem
  Io(std::io::ErrorKind),
}

impl fmt::Display for TransportError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr : String;
    match self {
      TransportError::Timeout { addr, opcode } => {
        repr = format!("Timeout (addr {:#x}, op {})", addr, opcode);
      },
      TransportError::Malformed => {
        repr = String::from("Malformed");
      },
      TransportError::Io(kind) => {
        repr = format!("Io ({:?})", kind);
      }
    }
    write!(f, "<TransportError: {}>", repr)
  }
}

impl Error for TransportError {
}

/// Violations of the wire formats themselves
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ProtocolError {
  /// A read response did not carry the requested number of words
  SizeMismatch {
    expected : usize,
    got      : usize,
  },
  /// A byte outside the 16 value ASCII-hex alphabet was about to be
  /// transmitted or was received unexpectedly
  InvalidAspectByte(u8),
  /// The opcode field of a response decoded to neither read nor write
  UnknownOpcode(u8),
  /// A register range expansion ran off the end of the address
  /// alphabet
  RangeOverflow,
}

impl fmt::Display for ProtocolError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr : String;
    match self {
      ProtocolError::SizeMismatch { expected, got } => {
        repr = format!("SizeMismatch (expected {} words, got {})", expected, got);
      },
      ProtocolError::InvalidAspectByte(b) => {
        repr = format!("InvalidAspectByte ({:#04x})", b);
      },
      ProtocolError::UnknownOpcode(b) => {
        repr = format!("UnknownOpcode ({:#04x})", b);
      },
      ProtocolError::RangeOverflow => {
        repr = String::from("RangeOverflow");
      }
    }
    write!(f, "<ProtocolError: {}>", repr)
  }
}

impl Error for ProtocolError {
}

/// Failures of the byte channel over the UART bridge registers
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum UartError {
  /// The "receive packet done" bit never showed up within the
  /// bounded poll loop. No partial data is returned in this case.
  Timeout,
  /// The underlying register access failed
  Transport(TransportError),
}

impl fmt::Display for UartError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr : String;
    match self {
      UartError::Timeout => {
        repr = String::from("Timeout");
      },
      UartError::Transport(err) => {
        repr = format!("Transport ({})", err);
      }
    }
    write!(f, "<UartError: {}>", repr)
  }
}

impl Error for UartError {
}

impl From<TransportError> for UartError {
  fn from(err : TransportError) -> Self {
    UartError::Transport(err)
  }
}

/// Failures of VSR level register operations
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum VsrError {
  /// The echoed value bytes of a write did not match what was
  /// written. This is the highest severity class - the hardware is
  /// in an unknown state. The core raises, retry policy belongs to
  /// the orchestrator.
  ReadbackMismatch {
    vsr      : u8,
    register : VsrRegisterRef,
    wrote    : (u8, u8),
    echoed   : (u8, u8),
  },
  /// The response frame did not start with the expected bus address
  BadEcho {
    expected : u8,
    got      : u8,
  },
  /// The response frame was too short to hold echo + data +
  /// terminator
  ShortFrame,
  /// A slot number outside 1..=6
  InvalidSlot(u8),
  Uart(UartError),
  Protocol(ProtocolError),
}

impl fmt::Display for VsrError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr : String;
    match self {
      VsrError::ReadbackMismatch { vsr, register, wrote, echoed } => {
        repr = format!("ReadbackMismatch (vsr {:#04x}, reg {}, wrote ({:#04x},{:#04x}), echoed ({:#04x},{:#04x}))",
                       vsr, register, wrote.0, wrote.1, echoed.0, echoed.1);
      },
      VsrError::BadEcho { expected, got } => {
        repr = format!("BadEcho (expected {:#04x}, got {:#04x})", expected, got);
      },
      VsrError::ShortFrame => {
        repr = String::from("ShortFrame");
      },
      VsrError::InvalidSlot(slot) => {
        repr = format!("InvalidSlot ({})", slot);
      },
      VsrError::Uart(err) => {
        repr = format!("Uart ({})", err);
      },
      VsrError::Protocol(err) => {
        repr = format!("Protocol ({})", err);
      }
    }
    write!(f, "<VsrError: {}>", repr)
  }
}

impl Error for VsrError {
}

impl From<UartError> for VsrError {
  fn from(err : UartError) -> Self {
    VsrError::Uart(err)
  }
}

impl From<ProtocolError> for VsrError {
  fn from(err : ProtocolError) -> Self {
    VsrError::Protocol(err)
  }
}

impl From<TransportError> for VsrError {
  fn from(err : TransportError) -> Self {
    VsrError::Uart(UartError::Transport(err))
  }
}

/// Failures of the bring-up sequencer
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum SequenceError {
  /// The PLL of this slot never reported lock. Under the default
  /// failure policy this does NOT stop the remaining VSRs of the
  /// batch.
  VsrInitFailed {
    slot : u8,
  },
  Vsr(VsrError),
}

impl fmt::Display for SequenceError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr : String;
    match self {
      SequenceError::VsrInitFailed { slot } => {
        repr = format!("VsrInitFailed (slot {})", slot);
      },
      SequenceError::Vsr(err) => {
        repr = format!("Vsr ({})", err);
      }
    }
    write!(f, "<SequenceError: {}>", repr)
  }
}

impl Error for SequenceError {
}

impl From<VsrError> for SequenceError {
  fn from(err : VsrError) -> Self {
    SequenceError::Vsr(err)
  }
}
