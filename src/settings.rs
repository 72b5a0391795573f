//! Aggregate settings for the control stack
//!
//! Per-subsystem settings live with their subsystem
//! ([`crate::rdma::TransportSettings`],
//! [`crate::uart::UartSettings`],
//! [`crate::sequencer::SequencerSettings`]); this module bundles
//! them into one toml-backed document for the adapter layers.

use std::fmt;
use std::fs::File;
use std::io::{
  Read,
  Write,
};
use std::error::Error;

use crate::rdma::TransportSettings;
use crate::sequencer::SequencerSettings;
use crate::uart::{
  UartMap,
  UartSettings,
};

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ControlSettings {
  pub transport : TransportSettings,
  pub uart_map  : UartMap,
  pub uart      : UartSettings,
  pub sequencer : SequencerSettings,
}

impl ControlSettings {

  pub fn new() -> Self {
    Self {
      transport : TransportSettings::new(),
      uart_map  : UartMap::new(),
      uart      : UartSettings::new(),
      sequencer : SequencerSettings::new(),
    }
  }

  /// Read settings from a toml file
  pub fn from_toml(filename : &str) -> Result<Self, Box<dyn Error>> {
    let mut file = File::open(filename)?;
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    match toml::from_str(&content) {
      Err(err) => {
        error!("Unable to parse settings from {}! {err}", filename);
        Err(Box::new(err))
      },
      Ok(settings) => Ok(settings)
    }
  }

  /// Write these settings to a toml file
  pub fn to_toml(&self, filename : &str) -> Result<(), Box<dyn Error>> {
    let content = toml::to_string_pretty(self)?;
    let mut file = File::create(filename)?;
    file.write_all(content.as_bytes())?;
    info!("Settings written to {}", filename);
    Ok(())
  }
}

impl Default for ControlSettings {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for ControlSettings {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match toml::to_string_pretty(self) {
      Err(_)      => write!(f, "<ControlSettings: (unrenderable)>"),
      Ok(content) => write!(f, "<ControlSettings:\n{}>", content),
    }
  }
}
