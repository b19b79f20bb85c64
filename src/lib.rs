//! Chameleon display-emulator driver core.
//!
//! Drives the FPGA-based Chameleon test fixture, which emulates a display
//! sink (DisplayPort/HDMI/VGA) for automated conformance testing of a
//! device under test: HPD line control, EDID emulation, receiver FSMs, and
//! the dual video dumpers that capture frames and per-frame checksums.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::rc::Rc;
//! use chameleon_fpga::{ChameleonDriver, Config, DevI2cBus, MappedRegisterBank, PortId};
//!
//! let config = Config::default();
//! let mem = Rc::new(MappedRegisterBank::open(&config.mem_path)?);
//! let bus = Rc::new(DevI2cBus::open(config.i2c_bus)?);
//! let mut driver = ChameleonDriver::new(mem, bus, config)?;
//!
//! driver.plug(PortId::Hdmi)?;
//! driver.capture_video(PortId::Hdmi, 10, None)?;
//! let checksums = driver.captured_checksums(0, 10)?;
//! # Ok::<(), chameleon_fpga::ChameleonError>(())
//! ```

mod config;
mod driver;
mod dumper;
mod edid;
mod error;
mod flow;
mod fpga;
mod frame;
mod hpd;
mod i2c;
mod io;
mod poll;
mod ports;
mod regmap;
mod registers;
mod rx;
mod tools;

pub use config::Config;
pub use driver::{CapturedSession, ChameleonDriver, EDID_ID_DEFAULT};
pub use dumper::{PixelDumpArgs, VideoDumper};
pub use edid::{EdidBlock, EdidEmulator};
pub use error::ChameleonError;
pub use flow::{DpInputFlow, HdmiInputFlow, InputFlow, VgaInputFlow};
pub use fpga::{EdidController, FpgaController, VideoPasser};
pub use frame::{CropRect, FrameManager};
pub use hpd::{HpdController, HpdLevel};
pub use i2c::{DevI2cBus, FakeI2cBus, I2cBus, I2cSlave};
pub use ports::PortId;
pub use registers::{FakeRegisterBank, MappedRegisterBank, RegisterBank};
pub use rx::VgaMode;
