//! Control library for the hexitec X-ray detector front-end
//!
//! The detector front-end is a multi-board sensor assembly ("VSR"
//! boards) behind an FPGA bridge which is reachable only over UDP.
//! Everything here is hand-rolled - there is no standard RDMA, no
//! ethernet attached memory and no serial driver. The stack, bottom
//! to top:
//!
//! * [`packet`]    - the fixed-layout register transaction header
//! * [`rdma`]      - UDP framed register read/write/burst transport
//! * [`uart`]      - a byte channel bridged over three FPGA registers
//! * [`aspect`]    - the ASCII-hex nibble alphabet of the VSR firmware
//! * [`vsr`]       - VSR register operations framed over the UART
//! * [`sequencer`] - the VSR bring-up/training state machine
//!
//! This crate is a library consumed by adapter/orchestrator layers,
//! it has no CLI or filesystem surface of its own (apart from
//! optional toml settings files, see [`settings`]).

pub mod constants;
pub mod registers;
pub mod errors;
pub mod serialization;
pub mod packet;
pub mod trace;
pub mod rdma;
pub mod aspect;
pub mod uart;
pub mod vsr;
pub mod sequencer;
pub mod settings;

#[macro_use] extern crate log;
