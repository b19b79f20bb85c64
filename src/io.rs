//! Mux and power IO expanders on the main I2C bus.

use std::rc::Rc;

use tracing::debug;

use crate::error::ChameleonError;
use crate::i2c::{I2cBus, I2cSlave};
use crate::ports::PortId;
use crate::regmap::{
    MUX_CONFIG_DP1_DUAL, MUX_CONFIG_DP2_DUAL, MUX_CONFIG_HDMI_DUAL, MUX_CONFIG_VGA,
    MUX_REG_OUTPUT0, MUX_REG_OUTPUT1, POWER_REG_OUTPUT, POWER_RESET_DP1, POWER_RESET_DP2,
    POWER_RESET_HDMI, POWER_RESET_VGA, RECEIVER_RESET_PULSE, SLAVE_MUX_IO, SLAVE_POWER_IO,
};

/// Signal-routing mux expander: selects which connector's lanes reach the
/// FPGA and gates the DDC/AUX bypass and VGA source-block lines.
#[derive(Clone)]
pub struct MuxIo {
    slave: I2cSlave,
}

impl MuxIo {
    pub fn new(bus: Rc<dyn I2cBus>) -> Self {
        Self {
            slave: I2cSlave::new(bus, SLAVE_MUX_IO),
        }
    }

    /// Mux configuration value routing the given port to the FPGA.
    ///
    /// The board has no simultaneous-flow support, so each value is the
    /// dual-pixel-capable wiring for its connector.
    pub fn config_for(port: PortId) -> u16 {
        match port {
            PortId::Dp1 => MUX_CONFIG_DP1_DUAL,
            PortId::Dp2 => MUX_CONFIG_DP2_DUAL,
            PortId::Hdmi => MUX_CONFIG_HDMI_DUAL,
            PortId::Vga => MUX_CONFIG_VGA,
        }
    }

    /// Replaces the input-select field, preserving the bypass/block lines.
    pub fn set_config(&self, config: u16) -> Result<(), ChameleonError> {
        let current = self.output()?;
        let value = (current & !0x0007) | config;
        debug!("mux config 0x{value:04x}");
        self.write_output(value)
    }

    /// Current state of the 16 output lines.
    pub fn output(&self) -> Result<u16, ChameleonError> {
        let low = self.slave.get_byte(MUX_REG_OUTPUT0)?;
        let high = self.slave.get_byte(MUX_REG_OUTPUT1)?;
        Ok(u16::from_le_bytes([low, high]))
    }

    pub fn set_output_mask(&self, mask: u16) -> Result<(), ChameleonError> {
        let value = self.output()? | mask;
        self.write_output(value)
    }

    pub fn clear_output_mask(&self, mask: u16) -> Result<(), ChameleonError> {
        let value = self.output()? & !mask;
        self.write_output(value)
    }

    fn write_output(&self, value: u16) -> Result<(), ChameleonError> {
        let [low, high] = value.to_le_bytes();
        self.slave.set_byte(MUX_REG_OUTPUT0, low)?;
        self.slave.set_byte(MUX_REG_OUTPUT1, high)
    }
}

/// Power-control expander holding the receiver reset lines.
#[derive(Clone)]
pub struct PowerIo {
    slave: I2cSlave,
}

impl PowerIo {
    pub fn new(bus: Rc<dyn I2cBus>) -> Self {
        Self {
            slave: I2cSlave::new(bus, SLAVE_POWER_IO),
        }
    }

    fn reset_line(port: PortId) -> u8 {
        match port {
            PortId::Dp1 => POWER_RESET_DP1,
            PortId::Dp2 => POWER_RESET_DP2,
            PortId::Hdmi => POWER_RESET_HDMI,
            PortId::Vga => POWER_RESET_VGA,
        }
    }

    /// Pulses the port's receiver reset line (active-low).
    pub fn reset_receiver(&self, port: PortId) -> Result<(), ChameleonError> {
        let line = Self::reset_line(port);
        debug!("reset receiver on {port}");
        self.slave.clear_mask_byte(POWER_REG_OUTPUT, line)?;
        std::thread::sleep(RECEIVER_RESET_PULSE);
        self.slave.set_mask_byte(POWER_REG_OUTPUT, line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::FakeI2cBus;

    #[test]
    fn set_config_preserves_bypass_lines() {
        let bus = Rc::new(FakeI2cBus::new());
        // HDMI DDC bypass high (bit 5), old input select DP1.
        bus.seed(SLAVE_MUX_IO, MUX_REG_OUTPUT0, 0b0010_0001);
        let mux = MuxIo::new(bus);
        mux.set_config(MuxIo::config_for(PortId::Hdmi)).unwrap();
        assert_eq!(mux.output().unwrap(), 0b0010_0011);
    }

    #[test]
    fn output_masks_round_trip() {
        let bus = Rc::new(FakeI2cBus::new());
        let mux = MuxIo::new(bus);
        mux.set_output_mask(crate::regmap::MUX_MASK_VGA_BLOCK_SOURCE)
            .unwrap();
        assert_ne!(
            mux.output().unwrap() & crate::regmap::MUX_MASK_VGA_BLOCK_SOURCE,
            0
        );
        mux.clear_output_mask(crate::regmap::MUX_MASK_VGA_BLOCK_SOURCE)
            .unwrap();
        assert_eq!(
            mux.output().unwrap() & crate::regmap::MUX_MASK_VGA_BLOCK_SOURCE,
            0
        );
    }

    #[test]
    fn reset_receiver_pulses_the_line_low_then_high() {
        let bus = Rc::new(FakeI2cBus::new());
        bus.seed(SLAVE_POWER_IO, POWER_REG_OUTPUT, 0xff);
        let power = PowerIo::new(bus.clone());
        power.reset_receiver(PortId::Hdmi).unwrap();

        let writes = bus.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].2, vec![0xff & !POWER_RESET_HDMI]);
        assert_eq!(writes[1].2, vec![0xff]);
    }
}
