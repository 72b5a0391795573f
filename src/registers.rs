//! FPGA register map consumed by the UART bridge and the power
//! control.
//!
//! The FPGA exposes a flat 32bit address space over the UDP
//! transport. Each register is one 32bit word. The layout below is
//! the small fixed map the core needs - the full map lives with the
//! firmware, callers of the raw transport must know it themselves.

//========== UART bridge =================
//
//========================================

pub const UART_TX_CTRL : u32 = 0x300; //[7:0] tx data byte, 8 fill strobe, 9 buffer (send) strobe
pub const UART_RX_CTRL : u32 = 0x304; //[0] receive strobe
pub const UART_STATUS  : u32 = 0x308; //[15:8] rx data byte, 0 tx full, 1 tx empty, 2 rx full, 3 rx empty, 4 rx packet done

/// Write the tx data byte together with this bit to push it into
/// the tx FIFO, then clear the bit again
pub const TX_FILL_STRB       : u32 = 1 << 8;
/// Strobe to transmit the accumulated FIFO content
pub const TX_BUFF_STRB       : u32 = 1 << 9;
/// Strobe to advance the rx FIFO by one byte
pub const RX_RECV_STRB       : u32 = 1 << 0;

pub const STAT_TX_BUFF_FULL  : u32 = 1 << 0;
pub const STAT_TX_BUFF_EMPTY : u32 = 1 << 1;
pub const STAT_RX_BUFF_FULL  : u32 = 1 << 2;
pub const STAT_RX_BUFF_EMPTY : u32 = 1 << 3;
pub const STAT_RX_PKT_DONE   : u32 = 1 << 4;
/// The current rx byte sits in [15:8] of the status register
pub const STAT_RX_DATA_MASK  : u32 = 0xff00;
pub const STAT_RX_DATA_SHIFT : u32 = 8;

//========== Power/enable control ========
//
//========================================

/// Per slot enable register. Bit (slot-1) gates the low voltage of
/// one physical slot, bit (slot-1+8) its high voltage.
pub const VSR_CTRL     : u32 = 0x30c;

/// All six low voltage enables
pub const LV_ALL_ON    : u32 = 0x3f;
/// All six high voltage enables
pub const HV_ALL_ON    : u32 = 0x3f00;

//========== LVDS training ===============
//
//========================================

/// Per VSR training/lock status words, one block per VSR at a fixed
/// stride
pub const TRAINING_STATUS_BASE   : u32 = 0x340;
pub const TRAINING_STATUS_STRIDE : u32 = 0x4;
