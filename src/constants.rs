//! Protocol constants for the VSR command set
//!
//! The VSR microcontrollers speak a byte oriented, ASCII-hex encoded
//! protocol over the UART bridge. Commands, bus addresses and frame
//! markers are single bytes.

/// Start-of-frame marker ('#')
pub const VSR_FRAME_START   : u8 = 0x23;
/// End-of-frame marker (carriage return)
pub const VSR_FRAME_END     : u8 = 0x0d;

// VSR command bytes
pub const READ_REGISTER     : u8 = 0x41;
pub const WRITE_REGISTER    : u8 = 0x40;
pub const SET_BIT           : u8 = 0x42;
pub const CLEAR_BIT         : u8 = 0x43;
pub const BURST_WRITE       : u8 = 0x44;
pub const WRITE_DAC         : u8 = 0x54;
pub const ADC_DAC_CTRL      : u8 = 0x55;

/// Control byte for ADC_DAC_CTRL - enable the ADC
pub const ADC_DAC_CTRL_ADC_EN : u8 = 0x01;
/// Control byte for ADC_DAC_CTRL - enable the DACs
pub const ADC_DAC_CTRL_DAC_EN : u8 = 0x02;

/// Bus addresses of the (at most) six VSRs of one assembly
pub const VSR_ADDRESSES     : [u8;6] = [0x90, 0x91, 0x92, 0x93, 0x94, 0x95];
/// Bus address which addresses all VSRs at once
pub const VSR_BROADCAST     : u8 = 0xff;
/// Number of physical VSR slots
pub const N_VSR_SLOTS       : u8 = 6;

// VSR register numbers used by the init sequencer. These are 8 bit
// register numbers on the VSR itself, NOT FPGA addresses.
/// Training enable lives in this register
pub const VSR_REG_TRAINING  : u8 = 0x24;
/// Bit mask (decoded value) which enables LVDS training
pub const TRAINING_EN_BIT   : u8 = 0x10;
/// PLL status register of the VSR
pub const VSR_REG_PLL_STATUS : u8 = 0x89;
/// Bit 1 of the PLL status register flags lock
pub const PLL_LOCK_BIT      : u8 = 0x02;

/// Iteration cap for the UART "packet done" poll loop. This bounds
/// the number of status register reads, not wall time.
pub const UART_POLL_LIMIT   : usize = 15_000;
/// Iteration cap for the UART drain loop (bytes per frame)
pub const UART_DRAIN_LIMIT  : usize = 4096;
