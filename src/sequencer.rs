//! The VSR bring-up/training state machine
//!
//! One fixed, ordered sequence of VSR operations per board: clock
//! selection, PLL enable, timing registers, enable masks, DAC
//! programming, ADC enable, LVDS training and a bounded poll for
//! PLL lock. Earlier incarnations of this software had the sequence
//! scattered over many near identical bring-up scripts; here it is
//! one state machine parameterized by a small table of
//! (register, value, masked?) steps.
//!
//! A multi VSR assembly is brought up one VSR at a time. Under the
//! default failure policy a VSR whose PLL never locks is logged and
//! marked failed and the batch CONTINUES with the next VSR -
//! partial success across the assembly is expected. The strict
//! variant ([`FailurePolicy::Abort`]) stops at the first failure.

use std::fmt;
use std::thread;
use std::time::Duration;

use crate::aspect::VsrRegisterRef;
use crate::constants::{
  ADC_DAC_CTRL_ADC_EN,
  ADC_DAC_CTRL_DAC_EN,
  PLL_LOCK_BIT,
  TRAINING_EN_BIT,
  VSR_REG_PLL_STATUS,
  VSR_REG_TRAINING,
};
use crate::errors::{
  SequenceError,
  VsrError,
};
use crate::rdma::RegisterIo;
use crate::registers::{
  TRAINING_STATUS_BASE,
  TRAINING_STATUS_STRIDE,
};
use crate::uart::UartBridge;
use crate::vsr::VsrHandle;

/// The states of the bring-up sequence, in order
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum VsrInitState {
  SelectClock,
  EnablePll,
  ConfigureTiming,
  ConfigureEnables,
  ProgramDac,
  EnableAdc,
  EnableTraining,
  AwaitPllLock,
  Ready,
  Failed,
}

impl fmt::Display for VsrInitState {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr : String;
    match self {
      VsrInitState::SelectClock      => {repr = String::from("SelectClock");}
      VsrInitState::EnablePll        => {repr = String::from("EnablePll");}
      VsrInitState::ConfigureTiming  => {repr = String::from("ConfigureTiming");}
      VsrInitState::ConfigureEnables => {repr = String::from("ConfigureEnables");}
      VsrInitState::ProgramDac       => {repr = String::from("ProgramDac");}
      VsrInitState::EnableAdc        => {repr = String::from("EnableAdc");}
      VsrInitState::EnableTraining   => {repr = String::from("EnableTraining");}
      VsrInitState::AwaitPllLock     => {repr = String::from("AwaitPllLock");}
      VsrInitState::Ready            => {repr = String::from("Ready");}
      VsrInitState::Failed           => {repr = String::from("Failed");}
    }
    write!(f, "<VsrInitState: {}>", repr)
  }
}

/// One register write of the bring-up table
#[derive(Debug, Copy, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct VsrInitStep {
  /// 8bit VSR register number
  pub reg    : u8,
  pub value  : u8,
  pub masked : bool,
}

impl VsrInitStep {
  pub fn new(reg : u8, value : u8, masked : bool) -> Self {
    Self {
      reg    : reg,
      value  : value,
      masked : masked,
    }
  }
}

/// One run of consecutive enable mask registers
#[derive(Debug, Copy, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EnableBlock {
  /// first 8bit register number of the run
  pub start : u8,
  pub count : usize,
  pub value : u8,
}

impl EnableBlock {
  pub fn new(start : u8, count : usize, value : u8) -> Self {
    Self {
      start : start,
      count : count,
      value : value,
    }
  }
}

/// What to do when one VSR of a batch fails to come up
#[derive(Debug, Copy, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum FailurePolicy {
  /// log, mark the VSR failed, continue with the next one (default)
  Continue,
  /// stop the batch at the first failure
  Abort,
}

/// Settings of the sequencer - poll budgets, failure policy and the
/// bring-up tables
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SequencerSettings {
  pub failure_policy        : FailurePolicy,
  /// PLL status reads before a VSR is declared failed
  pub lock_poll_limit       : usize,
  /// interval between PLL status reads in milliseconds
  pub lock_poll_interval_ms : u64,
  /// training status reads during the hold phase of the training
  /// toggle
  pub training_hold_polls   : usize,
  pub clock_steps           : Vec<VsrInitStep>,
  pub pll_steps             : Vec<VsrInitStep>,
  pub timing_steps          : Vec<VsrInitStep>,
  pub enable_blocks         : Vec<EnableBlock>,
  pub dac_words             : Vec<u16>,
}

impl SequencerSettings {
  pub fn new() -> Self {
    Self {
      failure_policy        : FailurePolicy::Continue,
      lock_poll_limit       : 100,
      lock_poll_interval_ms : 10,
      training_hold_polls   : 50,
      // external clock select
      clock_steps           : vec![VsrInitStep::new(0x01, 0x10, false)],
      // PLL enable + output enable
      pll_steps             : vec![VsrInitStep::new(0x07, 0x03, true)],
      // row/column shift and sample timing
      timing_steps          : vec![
        VsrInitStep::new(0x02, 0x01, false),  // RowS1 low
        VsrInitStep::new(0x03, 0x00, false),  // RowS1 high
        VsrInitStep::new(0x04, 0x01, false),  // S1 -> Sph
        VsrInitStep::new(0x05, 0x06, false),  // Sph -> S2
        VsrInitStep::new(0x06, 0x01, false),  // gate follows S2
        VsrInitStep::new(0x18, 0x01, false),  // ADC clock delay
        VsrInitStep::new(0x19, 0x00, false),  // FVAL/LVAL delay
      ],
      // read/power/calibration enables per ASIC, ten registers each
      enable_blocks         : vec![
        EnableBlock::new(0x61, 10, 0xff),  // column read
        EnableBlock::new(0x4d, 10, 0xff),  // column power
        EnableBlock::new(0x57, 10, 0x00),  // column calibration
        EnableBlock::new(0x43, 10, 0xff),  // row read
        EnableBlock::new(0x2f, 10, 0xff),  // row power
        EnableBlock::new(0x39, 10, 0x00),  // row calibration
      ],
      // vcal, umid x2, detector control, reserve
      dac_words             : vec![0x0111, 0x0555, 0x0555, 0x0000, 0x08e8],
    }
  }
}

impl Default for SequencerSettings {
  fn default() -> Self {
    Self::new()
  }
}

/// Outcome of the bring-up of one VSR
#[derive(Debug, Clone, PartialEq)]
pub struct VsrInitReport {
  pub vsr   : u8,
  /// 0 for the broadcast address
  pub slot  : u8,
  pub state : VsrInitState,
  pub error : Option<SequenceError>,
}

impl fmt::Display for VsrInitReport {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match &self.error {
      Some(err) => write!(f, "<VsrInitReport: vsr {:#04x}, slot {}, {} ({})>",
                          self.vsr, self.slot, self.state, err),
      None      => write!(f, "<VsrInitReport: vsr {:#04x}, slot {}, {}>",
                          self.vsr, self.slot, self.state),
    }
  }
}

/// Drives the bring-up sequence over a borrowed UART bridge
pub struct VsrInitSequencer {
  pub settings : SequencerSettings,
}

impl VsrInitSequencer {

  pub fn new() -> Self {
    Self {
      settings : SequencerSettings::new(),
    }
  }

  pub fn from_settings(settings : SequencerSettings) -> Self {
    Self {
      settings : settings,
    }
  }

  /// Bring up a batch of VSRs, one at a time
  ///
  /// Returns one report per VSR. Under
  /// [`FailurePolicy::Continue`] a failed VSR never stops the
  /// batch; under [`FailurePolicy::Abort`] the remaining VSRs are
  /// not touched.
  pub fn run<T : RegisterIo>(&self,
                             bridge : &mut UartBridge<T>,
                             vsrs   : &[VsrHandle]) -> Vec<VsrInitReport> {
    let mut reports = Vec::<VsrInitReport>::with_capacity(vsrs.len());
    for vsr in vsrs {
      let slot = vsr.slot().unwrap_or(0);
      info!("Bringing up {}", vsr);
      match self.run_one(bridge, vsr) {
        Ok(_) => {
          info!("{} is ready", vsr);
          reports.push(VsrInitReport {
            vsr   : vsr.addr,
            slot  : slot,
            state : VsrInitState::Ready,
            error : None,
          });
        },
        Err(err) => {
          error!("Bring-up of {} failed! {err}", vsr);
          reports.push(VsrInitReport {
            vsr   : vsr.addr,
            slot  : slot,
            state : VsrInitState::Failed,
            error : Some(err),
          });
          match self.settings.failure_policy {
            FailurePolicy::Continue => {
              warn!("Continuing with the next VSR");
            },
            FailurePolicy::Abort => {
              warn!("Failure policy is Abort, leaving {} VSR(s) untouched",
                    vsrs.len() - reports.len());
              break;
            }
          }
        }
      }
    }
    reports
  }

  /// Walk one VSR through the whole state machine
  pub fn run_one<T : RegisterIo>(&self,
                                 bridge : &mut UartBridge<T>,
                                 vsr    : &VsrHandle) -> Result<(), SequenceError> {
    let mut state = VsrInitState::SelectClock;
    loop {
      debug!("[{}] {}", vsr, state);
      state = match state {
        VsrInitState::SelectClock => {
          self.apply_steps(bridge, vsr, &self.settings.clock_steps)?;
          VsrInitState::EnablePll
        },
        VsrInitState::EnablePll => {
          self.apply_steps(bridge, vsr, &self.settings.pll_steps)?;
          VsrInitState::ConfigureTiming
        },
        VsrInitState::ConfigureTiming => {
          self.apply_steps(bridge, vsr, &self.settings.timing_steps)?;
          VsrInitState::ConfigureEnables
        },
        VsrInitState::ConfigureEnables => {
          for block in &self.settings.enable_blocks {
            let start = VsrRegisterRef::from_register(block.start);
            vsr.block_write(bridge, start, block.count, block.value, false)
               .map_err(SequenceError::from)?;
          }
          VsrInitState::ProgramDac
        },
        VsrInitState::ProgramDac => {
          vsr.write_dac(bridge, &self.settings.dac_words)?;
          VsrInitState::EnableAdc
        },
        VsrInitState::EnableAdc => {
          // DACs first, then ADC on top
          vsr.adc_dac_control(bridge, ADC_DAC_CTRL_DAC_EN)?;
          vsr.adc_dac_control(bridge, ADC_DAC_CTRL_DAC_EN | ADC_DAC_CTRL_ADC_EN)?;
          VsrInitState::EnableTraining
        },
        VsrInitState::EnableTraining => {
          self.run_training(bridge, vsr)?;
          VsrInitState::AwaitPllLock
        },
        VsrInitState::AwaitPllLock => {
          self.await_pll_lock(bridge, vsr)?;
          VsrInitState::Ready
        },
        VsrInitState::Ready => {
          break;
        },
        VsrInitState::Failed => {
          // run_one never constructs this state itself
          break;
        }
      };
    }
    Ok(())
  }

  fn apply_steps<T : RegisterIo>(&self,
                                 bridge : &mut UartBridge<T>,
                                 vsr    : &VsrHandle,
                                 steps  : &[VsrInitStep]) -> Result<(), SequenceError> {
    for step in steps {
      let reg = VsrRegisterRef::from_register(step.reg);
      vsr.write_value(bridge, reg, step.value, step.masked)?;
    }
    Ok(())
  }

  /// The two phase training toggle: assert the enable bit, hold
  /// while watching the per VSR lock words, deassert
  fn run_training<T : RegisterIo>(&self,
                                  bridge : &mut UartBridge<T>,
                                  vsr    : &VsrHandle) -> Result<(), SequenceError> {
    let training = VsrRegisterRef::from_register(VSR_REG_TRAINING);
    vsr.set_bits(bridge, training, TRAINING_EN_BIT)?;
    // hold phase - bounded poll instead of a blind sleep, so the
    // timing assumption is visible. Broadcast watches all slots.
    let slots : Vec<u8> = match vsr.slot() {
      Some(slot) => vec![slot],
      None       => (1..=crate::constants::N_VSR_SLOTS).collect(),
    };
    for _ in 0..self.settings.training_hold_polls {
      let mut all_locked = true;
      for slot in &slots {
        let addr = TRAINING_STATUS_BASE + (*slot as u32 - 1)*TRAINING_STATUS_STRIDE;
        let word = bridge.io.read_register(addr).map_err(VsrError::from)?;
        trace!("[{}] training status word for slot {} : {:#010x}", vsr, slot, word);
        if word == 0 {
          all_locked = false;
        }
      }
      if all_locked {
        break;
      }
    }
    vsr.clear_bits(bridge, training, TRAINING_EN_BIT)?;
    Ok(())
  }

  /// Poll the PLL status register (bit 1) at a fixed interval
  ///
  /// On timeout the VSR is declared failed - the caller decides
  /// whether the batch goes on.
  pub fn await_pll_lock<T : RegisterIo>(&self,
                                        bridge : &mut UartBridge<T>,
                                        vsr    : &VsrHandle) -> Result<(), SequenceError> {
    let status   = VsrRegisterRef::from_register(VSR_REG_PLL_STATUS);
    let interval = Duration::from_millis(self.settings.lock_poll_interval_ms);
    for _ in 0..self.settings.lock_poll_limit {
      let value = vsr.read_value(bridge, status)?;
      if value & PLL_LOCK_BIT != 0 {
        debug!("[{}] PLL locked", vsr);
        return Ok(());
      }
      thread::sleep(interval);
    }
    error!("PLL of {} never locked after {} polls", vsr, self.settings.lock_poll_limit);
    Err(SequenceError::VsrInitFailed { slot : vsr.slot().unwrap_or(0) })
  }
}

impl Default for VsrInitSequencer {
  fn default() -> Self {
    Self::new()
  }
}
