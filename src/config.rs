//! Driver configuration.
//!
//! Plain paths and bus numbers with board defaults; the CLI overrides
//! individual fields from flags.

use std::path::PathBuf;

use crate::regmap::I2C_BUS_MAIN;

/// Locations and bus numbers the driver is wired to at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Memory device carrying the FPGA register aperture.
    pub mem_path: String,
    /// Index of the main I2C bus.
    pub i2c_bus: u32,
    /// The factory-default EDID, loaded once at startup.  A missing or
    /// unreadable file is fatal.
    pub default_edid_path: PathBuf,
    /// The external pixel-readback tool.
    pub pixeldump_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mem_path: "/dev/mem".to_string(),
            i2c_bus: I2C_BUS_MAIN,
            default_edid_path: PathBuf::from("/usr/share/chameleon/default_edid.bin"),
            pixeldump_path: PathBuf::from("/usr/bin/pixeldump"),
        }
    }
}
