#[cfg(test)]
pub mod tests {

  use std::collections::{
    HashMap,
    HashSet,
    VecDeque,
  };
  use std::net::UdpSocket;
  use std::sync::{
    Arc,
    Mutex,
  };
  use std::thread;
  use std::time::Duration;

  use hexitec_control::aspect::{
    decode_byte,
    encode_byte,
    expand_register_range,
    VsrRegisterRef,
  };
  use hexitec_control::constants::*;
  use hexitec_control::errors::{
    SequenceError,
    TransportError,
    VsrError,
  };
  use hexitec_control::packet::{
    RdmaOpcode,
    RdmaPacket,
  };
  use hexitec_control::rdma::{
    RdmaTransport,
    RegisterIo,
    TransportSettings,
  };
  use hexitec_control::registers::*;
  use hexitec_control::sequencer::{
    FailurePolicy,
    SequencerSettings,
    VsrInitSequencer,
    VsrInitState,
  };
  use hexitec_control::trace::{
    TraceRecord,
    TraceSink,
  };
  use hexitec_control::uart::{
    UartBridge,
    UartMap,
    UartSettings,
  };
  use hexitec_control::vsr;
  use hexitec_control::vsr::VsrHandle;

  fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
  }

  //========== fake FPGA over loopback UDP =

  #[derive(Copy, Clone)]
  enum FpgaMode {
    Normal,
    /// answer reads with one word too few
    ShortBurst,
    /// never answer anything
    Silent,
  }

  /// Emulates the FPGA end of the register transport on
  /// 127.0.0.1. Serves requests forever on a detached thread.
  fn spawn_fake_fpga(mode : FpgaMode) -> String {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let target = socket.local_addr().unwrap().to_string();
    thread::spawn(move || {
      let mut regs   = HashMap::<u32, u32>::new();
      let mut buffer = [0u8; 4096];
      loop {
        let (nbytes, sender) = match socket.recv_from(&mut buffer) {
          Err(_)    => continue,
          Ok(value) => value,
        };
        if let FpgaMode::Silent = mode {
          continue;
        }
        if nbytes < 8 {
          continue;
        }
        // write requests carry a payload, which from_bytestream
        // rejects (it decodes header-only acks), so the firmware
        // side parses the header by hand
        let stream    = &buffer[..nbytes];
        let burst_len = u16::from_le_bytes([stream[0], stream[1]]);
        let tag       = stream[2];
        let opcode    = stream[3];
        let addr      = u32::from_le_bytes([stream[4], stream[5],
                                            stream[6], stream[7]]);
        let response = match opcode {
          0 => {
            for (k, chunk) in stream[8..].chunks_exact(4).enumerate() {
              let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
              regs.insert(addr + 4*k as u32, word);
            }
            RdmaPacket {
              burst_len : burst_len,
              tag       : tag,
              opcode    : RdmaOpcode::Write,
              addr      : addr,
              payload   : Vec::new(),
            }
          },
          _ => {
            let nwords = match mode {
              FpgaMode::ShortBurst => burst_len.saturating_sub(1),
              _                    => burst_len,
            };
            let payload : Vec<u32> = (0..nwords as u32)
              .map(|k| *regs.get(&(addr + 4*k)).unwrap_or(&0))
              .collect();
            RdmaPacket {
              burst_len : nwords,
              tag       : tag,
              opcode    : RdmaOpcode::Read,
              addr      : addr,
              payload   : payload,
            }
          }
        };
        let _ = socket.send_to(&response.to_bytestream(), sender);
      }
    });
    target
  }

  fn transport_for(target : String, ack_writes : bool) -> RdmaTransport {
    let settings = TransportSettings {
      target_address : target,
      timeout_ms     : 100,
      ack_writes     : ack_writes,
    };
    RdmaTransport::new(&settings).unwrap()
  }

  #[derive(Default)]
  struct SharedSink {
    pub records : Arc<Mutex<Vec<TraceRecord>>>,
  }

  impl TraceSink for SharedSink {
    fn record(&mut self, rec : &TraceRecord) {
      self.records.lock().unwrap().push(rec.clone());
    }
  }

  #[test]
  fn transport_write_then_read_roundtrip() {
    init_logs();
    let target = spawn_fake_fpga(FpgaMode::Normal);
    let mut transport = transport_for(target, true);
    let words = vec![0xdead_beef, 0x0000_3f00, 0x1234_5678, 0xffff_ffff];
    transport.write(0x1000, &words).unwrap();
    let read_back = transport.read(0x1000, 4).unwrap();
    assert_eq!(read_back, words);
    // burst of one is just a degenerate burst
    assert_eq!(transport.read_register(0x1004).unwrap(), 0x0000_3f00);
  }

  #[test]
  fn transport_flags_short_responses_as_malformed() {
    init_logs();
    let target = spawn_fake_fpga(FpgaMode::ShortBurst);
    let mut transport = transport_for(target, true);
    match transport.read(0x0, 4) {
      Err(TransportError::Malformed) => (),
      other => panic!("expected Malformed, got {:?}", other),
    }
  }

  #[test]
  fn transport_times_out_on_a_dead_peer() {
    init_logs();
    let target = spawn_fake_fpga(FpgaMode::Silent);
    let mut transport = transport_for(target, true);
    match transport.read(0x42, 1) {
      Err(TransportError::Timeout { addr, opcode }) => {
        assert_eq!(addr, 0x42);
        assert_eq!(opcode, RdmaOpcode::Read);
      },
      other => panic!("expected Timeout, got {:?}", other),
    }
    match transport.write(0x42, &[1]) {
      Err(TransportError::Timeout { opcode, .. }) => {
        assert_eq!(opcode, RdmaOpcode::Write);
      },
      other => panic!("expected Timeout, got {:?}", other),
    }
  }

  #[test]
  fn unacknowledged_writes_do_not_block() {
    init_logs();
    let target = spawn_fake_fpga(FpgaMode::Silent);
    let mut transport = transport_for(target, false);
    // low overhead mode requests no confirmation
    transport.write(0x42, &[1, 2, 3]).unwrap();
  }

  #[test]
  fn tracing_records_but_does_not_interfere() {
    init_logs();
    let target  = spawn_fake_fpga(FpgaMode::Normal);
    let mut transport = transport_for(target, true);
    let records = Arc::new(Mutex::new(Vec::new()));
    transport.set_trace_sink(Box::new(SharedSink { records : records.clone() }));
    transport.write(0x2000, &[7]).unwrap();
    assert_eq!(transport.read_register(0x2000).unwrap(), 7);
    let recorded = records.lock().unwrap();
    // write request, read request, read response
    assert!(recorded.len() >= 3);
    assert!(recorded.iter().any(|r| r.opcode == 0 && r.payload == vec![7]));
    assert!(recorded.iter().any(|r| r.opcode == 1 && r.payload == vec![7]));
  }

  //========== fake VSR firmware ===========

  /// In-memory stand-in for the FPGA register file, the UART FIFOs
  /// and the VSR microcontrollers behind them.
  struct FakeVsrIo {
    fpga_regs  : HashMap<u32, u32>,
    /// (bus address, register number) -> value
    vsr_regs   : HashMap<(u8, u8), u8>,
    tx_fifo    : Vec<u8>,
    rx_fifo    : VecDeque<u8>,
    current    : u8,
    pkt_done   : bool,
    /// VSRs whose PLL reports lock
    locked     : HashSet<u8>,
    /// corrupt the low value byte of every write echo
    corrupt_lo : bool,
  }

  impl FakeVsrIo {
    fn new() -> Self {
      let mut fpga_regs = HashMap::new();
      // all LVDS lanes report trained
      for slot in 1..=N_VSR_SLOTS as u32 {
        fpga_regs.insert(TRAINING_STATUS_BASE + (slot - 1)*TRAINING_STATUS_STRIDE, 0xff);
      }
      Self {
        fpga_regs  : fpga_regs,
        vsr_regs   : HashMap::new(),
        tx_fifo    : Vec::new(),
        rx_fifo    : VecDeque::new(),
        current    : 0,
        pkt_done   : false,
        locked     : HashSet::new(),
        corrupt_lo : false,
      }
    }

    fn targets(&self, vsr : u8) -> Vec<u8> {
      if vsr == VSR_BROADCAST {
        return VSR_ADDRESSES.to_vec();
      }
      vec![vsr]
    }

    fn queue(&mut self, bytes : Vec<u8>) {
      self.rx_fifo = bytes.into();
      self.pkt_done = true;
    }

    fn process_frame(&mut self) {
      let frame = std::mem::take(&mut self.tx_fifo);
      assert_eq!(frame[0], VSR_FRAME_START);
      assert_eq!(*frame.last().unwrap(), VSR_FRAME_END);
      let vsr  = frame[1];
      let cmd  = frame[2];
      let body = frame[3..frame.len()-1].to_vec();
      match cmd {
        READ_REGISTER => {
          let reg   = decode_byte(body[0], body[1]).unwrap();
          let value = if reg == VSR_REG_PLL_STATUS {
            let probe = self.targets(vsr)[0];
            if self.locked.contains(&probe) { PLL_LOCK_BIT } else { 0x00 }
          } else {
            *self.vsr_regs.get(&(self.targets(vsr)[0], reg)).unwrap_or(&0)
          };
          let (hi, lo) = encode_byte(value);
          self.queue(vec![vsr, body[0], body[1], hi, lo, VSR_FRAME_END]);
        },
        WRITE_REGISTER => {
          let reg   = decode_byte(body[0], body[1]).unwrap();
          let value = decode_byte(body[2], body[3]).unwrap();
          for t in self.targets(vsr) {
            self.vsr_regs.insert((t, reg), value);
          }
          let echo_lo = if self.corrupt_lo {
            if body[3] == 0x30 { 0x31 } else { 0x30 }
          } else {
            body[3]
          };
          self.queue(vec![vsr, body[0], body[1], body[2], echo_lo, VSR_FRAME_END]);
        },
        SET_BIT => {
          let reg  = decode_byte(body[0], body[1]).unwrap();
          let mask = decode_byte(body[2], body[3]).unwrap();
          for t in self.targets(vsr) {
            let value = *self.vsr_regs.get(&(t, reg)).unwrap_or(&0);
            self.vsr_regs.insert((t, reg), value | mask);
          }
          self.queue(vec![vsr, body[0], body[1], body[2], body[3], VSR_FRAME_END]);
        },
        CLEAR_BIT => {
          let reg  = decode_byte(body[0], body[1]).unwrap();
          let mask = decode_byte(body[2], body[3]).unwrap();
          for t in self.targets(vsr) {
            let value = *self.vsr_regs.get(&(t, reg)).unwrap_or(&0);
            self.vsr_regs.insert((t, reg), value & !mask);
          }
          self.queue(vec![vsr, body[0], body[1], body[2], body[3], VSR_FRAME_END]);
        },
        BURST_WRITE => {
          let start = VsrRegisterRef::new(body[0], body[1]).unwrap();
          let pairs = body[2..].chunks_exact(2);
          let count = pairs.len();
          let refs  = expand_register_range(start, count).unwrap();
          for (r, pair) in refs.iter().zip(pairs) {
            let value = decode_byte(pair[0], pair[1]).unwrap();
            for t in self.targets(vsr) {
              self.vsr_regs.insert((t, r.register().unwrap()), value);
            }
          }
          self.queue(vec![vsr, body[0], body[1], VSR_FRAME_END]);
        },
        WRITE_DAC | ADC_DAC_CTRL => {
          self.queue(vec![vsr, VSR_FRAME_END]);
        },
        _ => panic!("fake firmware got unknown command {:#04x}", cmd),
      }
    }
  }

  impl RegisterIo for FakeVsrIo {
    fn read_register(&mut self, addr : u32) -> Result<u32, TransportError> {
      if addr == UART_STATUS {
        let mut status = (self.current as u32) << STAT_RX_DATA_SHIFT;
        if self.rx_fifo.is_empty() {
          status |= STAT_RX_BUFF_EMPTY;
        }
        if self.pkt_done {
          status |= STAT_RX_PKT_DONE;
        }
        return Ok(status);
      }
      Ok(*self.fpga_regs.get(&addr).unwrap_or(&0))
    }

    fn write_register(&mut self, addr : u32, value : u32) -> Result<(), TransportError> {
      match addr {
        UART_TX_CTRL => {
          if value & TX_FILL_STRB != 0 {
            self.tx_fifo.push(value as u8);
          }
          if value & TX_BUFF_STRB != 0 {
            self.process_frame();
          }
        },
        UART_RX_CTRL => {
          if value & RX_RECV_STRB != 0 {
            self.current = self.rx_fifo.pop_front().unwrap_or(0);
            if self.rx_fifo.is_empty() {
              self.pkt_done = false;
            }
          }
        },
        _ => {
          self.fpga_regs.insert(addr, value);
        }
      }
      Ok(())
    }
  }

  fn fake_bridge() -> UartBridge<FakeVsrIo> {
    let mut settings = UartSettings::new();
    settings.poll_limit = 100;
    UartBridge::with_settings(FakeVsrIo::new(), UartMap::new(), settings)
  }

  fn quick_sequencer(policy : FailurePolicy) -> VsrInitSequencer {
    let mut settings = SequencerSettings::new();
    settings.failure_policy        = policy;
    settings.lock_poll_limit       = 5;
    settings.lock_poll_interval_ms = 1;
    settings.training_hold_polls   = 3;
    VsrInitSequencer::from_settings(settings)
  }

  #[test]
  fn vsr_write_register_verifies_the_echo() {
    init_logs();
    let mut bridge = fake_bridge();
    let vsr = VsrHandle::new(0x90);
    let reg = VsrRegisterRef::new(0x30, 0x31).unwrap();
    vsr.write_register(&mut bridge, reg, 0x31, 0x30, false).unwrap();
    assert_eq!(vsr.read_value(&mut bridge, reg).unwrap(), 0x10);
  }

  #[test]
  fn vsr_write_register_raises_on_a_corrupted_echo() {
    init_logs();
    let mut bridge = fake_bridge();
    bridge.io.corrupt_lo = true;
    let vsr = VsrHandle::new(0x90);
    let reg = VsrRegisterRef::new(0x30, 0x31).unwrap();
    match vsr.write_register(&mut bridge, reg, 0x31, 0x30, false) {
      Err(VsrError::ReadbackMismatch { vsr, wrote, .. }) => {
        assert_eq!(vsr, 0x90);
        assert_eq!(wrote, (0x31, 0x30));
      },
      other => panic!("expected ReadbackMismatch, got {:?}", other),
    }
  }

  #[test]
  fn masked_writes_or_into_the_current_value() {
    init_logs();
    let mut bridge = fake_bridge();
    let vsr = VsrHandle::new(0x92);
    let reg = VsrRegisterRef::from_register(0x07);
    vsr.write_value(&mut bridge, reg, 0x41, false).unwrap();
    vsr.write_value(&mut bridge, reg, 0x0a, true).unwrap();
    assert_eq!(vsr.read_value(&mut bridge, reg).unwrap(), 0x4b);
    // the unmasked path overwrites outright
    vsr.write_value(&mut bridge, reg, 0x0a, false).unwrap();
    assert_eq!(vsr.read_value(&mut bridge, reg).unwrap(), 0x0a);
  }

  #[test]
  fn set_and_clear_bits() {
    init_logs();
    let mut bridge = fake_bridge();
    let vsr = VsrHandle::new(0x90);
    let reg = VsrRegisterRef::from_register(0x24);
    vsr.set_bits(&mut bridge, reg, TRAINING_EN_BIT).unwrap();
    assert_eq!(vsr.read_value(&mut bridge, reg).unwrap(), TRAINING_EN_BIT);
    vsr.clear_bits(&mut bridge, reg, TRAINING_EN_BIT).unwrap();
    assert_eq!(vsr.read_value(&mut bridge, reg).unwrap(), 0x00);
  }

  #[test]
  fn block_operations_walk_the_wrapped_range() {
    init_logs();
    let mut bridge = fake_bridge();
    let vsr   = VsrHandle::new(0x91);
    let start = VsrRegisterRef::new(0x36, 0x31).unwrap();
    vsr.block_write(&mut bridge, start, 10, 0xff, false).unwrap();
    // registers 0x61..=0x6a must all hold 0xff now
    for reg in 0x61u8..=0x6a {
      assert_eq!(*bridge.io.vsr_regs.get(&(0x91, reg)).unwrap(), 0xff);
    }
    assert_eq!(vsr.block_read(&mut bridge, start, 10).unwrap(), vec![0xff; 10]);
  }

  #[test]
  fn burst_write_lands_on_consecutive_registers() {
    init_logs();
    let mut bridge = fake_bridge();
    let vsr    = VsrHandle::new(0x90);
    let start  = VsrRegisterRef::from_register(0x40);
    let values = vec![0x11, 0x22, 0x33, 0x44];
    vsr.burst_write(&mut bridge, start, &values).unwrap();
    assert_eq!(vsr.block_read(&mut bridge, start, 4).unwrap(), values);
  }

  #[test]
  fn broadcast_reaches_every_vsr() {
    init_logs();
    let mut bridge = fake_bridge();
    let all = VsrHandle::broadcast();
    let reg = VsrRegisterRef::from_register(0x01);
    all.write_value(&mut bridge, reg, 0x10, false).unwrap();
    for addr in VSR_ADDRESSES {
      let one = VsrHandle::new(addr);
      assert_eq!(one.read_value(&mut bridge, reg).unwrap(), 0x10);
    }
  }

  #[test]
  fn power_control_builds_the_documented_masks() {
    init_logs();
    let mut io = FakeVsrIo::new();
    // enabling all six slots must read back as 0x3f
    vsr::enable_all_lv(&mut io).unwrap();
    assert_eq!(io.read_register(VSR_CTRL).unwrap(), 0x3f);
    vsr::enable_all_hv(&mut io).unwrap();
    assert_eq!(io.read_register(VSR_CTRL).unwrap(), 0x3f3f);
    vsr::disable_all(&mut io).unwrap();
    assert_eq!(io.read_register(VSR_CTRL).unwrap(), 0x0);
    // per slot bits: slot 3 gates bit 2 (LV) and bit 10 (HV)
    vsr::enable_lv(&mut io, 3).unwrap();
    vsr::enable_hv(&mut io, 3).unwrap();
    assert_eq!(io.read_register(VSR_CTRL).unwrap(), (1 << 2) | (1 << 10));
    vsr::disable_hv(&mut io, 3).unwrap();
    assert_eq!(io.read_register(VSR_CTRL).unwrap(), 1 << 2);
    match vsr::enable_lv(&mut io, 7) {
      Err(VsrError::InvalidSlot(7)) => (),
      other => panic!("expected InvalidSlot, got {:?}", other),
    }
  }

  #[test]
  fn sequencer_marks_the_stuck_vsr_and_continues() {
    init_logs();
    let mut bridge = fake_bridge();
    // slot 2 (0x91) never reports PLL lock
    bridge.io.locked.insert(0x90);
    bridge.io.locked.insert(0x92);
    let vsrs = [VsrHandle::new(0x90), VsrHandle::new(0x91), VsrHandle::new(0x92)];
    let sequencer = quick_sequencer(FailurePolicy::Continue);
    let reports = sequencer.run(&mut bridge, &vsrs);
    assert_eq!(reports.len(), 3);
    assert_eq!(reports[0].state, VsrInitState::Ready);
    assert_eq!(reports[1].state, VsrInitState::Failed);
    assert_eq!(reports[1].error, Some(SequenceError::VsrInitFailed { slot : 2 }));
    assert_eq!(reports[2].state, VsrInitState::Ready);
  }

  #[test]
  fn sequencer_abort_policy_stops_the_batch() {
    init_logs();
    let mut bridge = fake_bridge();
    bridge.io.locked.insert(0x90);
    bridge.io.locked.insert(0x92);
    let vsrs = [VsrHandle::new(0x90), VsrHandle::new(0x91), VsrHandle::new(0x92)];
    let sequencer = quick_sequencer(FailurePolicy::Abort);
    let reports = sequencer.run(&mut bridge, &vsrs);
    // slot 3 is never touched
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[1].state, VsrInitState::Failed);
  }

  #[test]
  fn sequencer_applies_the_bringup_tables() {
    init_logs();
    let mut bridge = fake_bridge();
    bridge.io.locked.insert(0x90);
    let vsrs = [VsrHandle::new(0x90)];
    let sequencer = quick_sequencer(FailurePolicy::Continue);
    let reports = sequencer.run(&mut bridge, &vsrs);
    assert_eq!(reports[0].state, VsrInitState::Ready);
    let io = &bridge.io;
    // external clock select
    assert_eq!(*io.vsr_regs.get(&(0x90, 0x01)).unwrap(), 0x10);
    // PLL enable
    assert_eq!(*io.vsr_regs.get(&(0x90, 0x07)).unwrap(), 0x03);
    // column read enables
    for reg in 0x61u8..=0x6a {
      assert_eq!(*io.vsr_regs.get(&(0x90, reg)).unwrap(), 0xff);
    }
    // the training toggle must be deasserted again
    assert_eq!(*io.vsr_regs.get(&(0x90, VSR_REG_TRAINING)).unwrap() & TRAINING_EN_BIT, 0);
  }

  #[test]
  fn uart_receive_gives_up_within_its_poll_budget() {
    init_logs();
    // a bridge whose firmware never answers
    let mut settings = UartSettings::new();
    settings.poll_limit = 50;
    let mut bridge = UartBridge::with_settings(FakeVsrIo::new(), UartMap::new(), settings);
    let vsr = VsrHandle::new(0x90);
    let reg = VsrRegisterRef::from_register(0x01);
    // bypass transmit so no response is ever queued
    let started = std::time::Instant::now();
    match bridge.receive() {
      Err(err) => {
        assert_eq!(format!("{}", err), "<UartError: Timeout>");
      },
      Ok(_) => panic!("expected a timeout"),
    }
    assert!(started.elapsed() < Duration::from_secs(5));
    // a regular exchange still works on the same bridge afterwards
    vsr.write_value(&mut bridge, reg, 0x01, false).unwrap();
  }
}
