//! Receiver chip handles.
//!
//! One handle type per receiver family, addressed as I2C slaves at the
//! fixed addresses in [`crate::regmap`].  Each exposes exactly what its
//! input flow needs; the bus framing itself is not owned here.

use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::error::ChameleonError;
use crate::i2c::{I2cBus, I2cSlave};
use crate::regmap::*;

/// DisplayPort receiver.
#[derive(Clone)]
pub struct DpRx {
    slave: I2cSlave,
}

impl DpRx {
    pub fn new(bus: Rc<dyn I2cBus>, addr: u8) -> Self {
        Self {
            slave: I2cSlave::new(bus, addr),
        }
    }

    /// Clears any pending video reset and starts serving the EDID.
    pub fn initialize(&self) -> Result<(), ChameleonError> {
        self.slave.set_byte(DP_REG_VIDEO_CTRL, 0)?;
        self.slave.set_mask_byte(DP_REG_EDID_CTRL, DP_BIT_EDID_ENABLE)
    }

    /// True when the source powers the cable (+3.3V pin).
    pub fn is_cable_powered(&self) -> Result<bool, ChameleonError> {
        Ok(self.slave.get_byte(DP_REG_POWER_STATUS)? & DP_BIT_CABLE_POWER != 0)
    }

    /// True when the lanes are locked and main stream attributes are valid.
    pub fn is_video_input_stable(&self) -> Result<bool, ChameleonError> {
        let status = self.slave.get_byte(DP_REG_LINK_STATUS)?;
        Ok(status & (DP_BIT_LANES_LOCKED | DP_BIT_MSA_VALID)
            == DP_BIT_LANES_LOCKED | DP_BIT_MSA_VALID)
    }

    /// Resolution from the main stream attributes.
    pub fn frame_resolution(&self) -> Result<(u32, u32), ChameleonError> {
        let width = self.slave.get_word(DP_REG_MSA_HRES)?;
        let height = self.slave.get_word(DP_REG_MSA_VRES)?;
        Ok((u32::from(width), u32::from(height)))
    }

    /// Pulses the video datapath reset to clear transient receiver faults.
    pub fn reset_video_logic(&self) -> Result<(), ChameleonError> {
        self.slave.set_mask_byte(DP_REG_VIDEO_CTRL, DP_BIT_VIDEO_RESET)?;
        std::thread::sleep(RECEIVER_RESET_PULSE);
        self.slave.clear_mask_byte(DP_REG_VIDEO_CTRL, DP_BIT_VIDEO_RESET)
    }

    /// Serves the emulated DDC EEPROM over AUX.
    pub fn enable_edid(&self) -> Result<(), ChameleonError> {
        self.slave.set_mask_byte(DP_REG_EDID_CTRL, DP_BIT_EDID_ENABLE)
    }

    pub fn disable_edid(&self) -> Result<(), ChameleonError> {
        self.slave.clear_mask_byte(DP_REG_EDID_CTRL, DP_BIT_EDID_ENABLE)
    }

    /// Raw register window for failure diagnostics.
    pub fn dump(&self) -> Result<Vec<u8>, ChameleonError> {
        self.slave.get(0, RX_DUMP_LEN)
    }
}

/// HDMI receiver (IT6803 family).
#[derive(Clone)]
pub struct HdmiRx {
    slave: I2cSlave,
}

impl HdmiRx {
    pub fn new(bus: Rc<dyn I2cBus>) -> Self {
        Self {
            slave: I2cSlave::new(bus, SLAVE_HDMI_RX),
        }
    }

    /// Programs the pixel bus mapping for the starting pixel mode.
    pub fn initialize(&self, dual_pixel_mode: bool) -> Result<(), ChameleonError> {
        if dual_pixel_mode {
            self.set_dual_pixel_mode()
        } else {
            self.set_single_pixel_mode()
        }
    }

    /// True when the source powers the +5V pin.
    pub fn is_cable_powered(&self) -> Result<bool, ChameleonError> {
        Ok(self.slave.get_byte(HDMI_REG_SYS_STATE)? & HDMI_BIT_PWR5V != 0)
    }

    /// Sync-detect: the receiver sees a clock and syncs on the input.
    pub fn is_video_input_stable(&self) -> Result<bool, ChameleonError> {
        Ok(self.slave.get_byte(HDMI_REG_SYS_STATE)? & HDMI_BIT_SCDT != 0)
    }

    /// True when the video datapath halted and needs a software reset.
    pub fn is_reset_needed(&self) -> Result<bool, ChameleonError> {
        Ok(self.slave.get_byte(HDMI_REG_INT_STATUS)? & HDMI_BIT_VIDEO_HALT != 0)
    }

    /// Software-resets the receiver and clears the latched halt status.
    pub fn reset(&self) -> Result<(), ChameleonError> {
        debug!("HDMI rx software reset");
        self.slave.set_byte(HDMI_REG_SW_RESET, HDMI_BIT_SWRST)?;
        std::thread::sleep(RECEIVER_RESET_PULSE);
        self.slave.set_byte(HDMI_REG_SW_RESET, 0)?;
        // Status bits are write-1-to-clear.
        self.slave.set_byte(HDMI_REG_INT_STATUS, HDMI_BIT_VIDEO_HALT)
    }

    /// Measured pixel clock in MHz.
    pub fn pixel_clock_mhz(&self) -> Result<f64, ChameleonError> {
        let raw = self.slave.get_word(HDMI_REG_PCLK_10KHZ)?;
        Ok(f64::from(raw) / 100.0)
    }

    /// Resolution from the measured active video timing.
    pub fn frame_resolution(&self) -> Result<(u32, u32), ChameleonError> {
        let width = self.slave.get_word(HDMI_REG_H_ACTIVE)?;
        let height = self.slave.get_word(HDMI_REG_V_ACTIVE)?;
        Ok((u32::from(width), u32::from(height)))
    }

    pub fn set_single_pixel_mode(&self) -> Result<(), ChameleonError> {
        self.slave.set_byte(HDMI_REG_VIDEO_MAP, HDMI_MAP_SINGLE)
    }

    pub fn set_dual_pixel_mode(&self) -> Result<(), ChameleonError> {
        self.slave.set_byte(HDMI_REG_VIDEO_MAP, HDMI_MAP_DUAL)
    }

    pub fn set_content_protection(&self, enabled: bool) -> Result<(), ChameleonError> {
        if enabled {
            self.slave.set_mask_byte(HDMI_REG_HDCP_CTRL, HDMI_BIT_HDCP_ENABLE)
        } else {
            self.slave.clear_mask_byte(HDMI_REG_HDCP_CTRL, HDMI_BIT_HDCP_ENABLE)
        }
    }

    pub fn is_content_protection_enabled(&self) -> Result<bool, ChameleonError> {
        Ok(self.slave.get_byte(HDMI_REG_HDCP_CTRL)? & HDMI_BIT_HDCP_ENABLE != 0)
    }

    pub fn is_video_input_encrypted(&self) -> Result<bool, ChameleonError> {
        Ok(self.slave.get_byte(HDMI_REG_HDCP_STATUS)? & HDMI_BIT_ENCRYPTED != 0)
    }

    /// Raw register window for failure diagnostics.
    pub fn dump(&self) -> Result<Vec<u8>, ChameleonError> {
        self.slave.get(0, RX_DUMP_LEN)
    }
}

/// Analog timing mode of the VGA receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VgaMode {
    Vga640x480_60,
    Svga800x600_60,
    Xga1024x768_60,
    Sxga1280x1024_60,
    Fhd1920x1080_60,
}

impl VgaMode {
    /// PLL preset: (feedback divider = total horizontal pixels, VCO range,
    /// charge pump).
    fn pll_preset(self) -> (u16, u8, u8) {
        match self {
            Self::Vga640x480_60 => (800, 0x01, 0x02),
            Self::Svga800x600_60 => (1056, 0x01, 0x03),
            Self::Xga1024x768_60 => (1344, 0x02, 0x03),
            Self::Sxga1280x1024_60 => (1688, 0x02, 0x04),
            Self::Fhd1920x1080_60 => (2200, 0x03, 0x04),
        }
    }

    /// Nominal horizontal sync frequency in 100 Hz units.
    fn hsync_100hz(self) -> u16 {
        match self {
            Self::Vga640x480_60 => 315,
            Self::Svga800x600_60 => 379,
            Self::Xga1024x768_60 => 484,
            Self::Sxga1280x1024_60 => 640,
            Self::Fhd1920x1080_60 => 675,
        }
    }

    const ALL: [VgaMode; 5] = [
        Self::Vga640x480_60,
        Self::Svga800x600_60,
        Self::Xga1024x768_60,
        Self::Sxga1280x1024_60,
        Self::Fhd1920x1080_60,
    ];

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "640x480" | "vga" => Some(Self::Vga640x480_60),
            "800x600" | "svga" => Some(Self::Svga800x600_60),
            "1024x768" | "xga" => Some(Self::Xga1024x768_60),
            "1280x1024" | "sxga" => Some(Self::Sxga1280x1024_60),
            "1920x1080" | "fhd" => Some(Self::Fhd1920x1080_60),
            _ => None,
        }
    }
}

impl fmt::Display for VgaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vga640x480_60 => write!(f, "640x480@60"),
            Self::Svga800x600_60 => write!(f, "800x600@60"),
            Self::Xga1024x768_60 => write!(f, "1024x768@60"),
            Self::Sxga1280x1024_60 => write!(f, "1280x1024@60"),
            Self::Fhd1920x1080_60 => write!(f, "1920x1080@60"),
        }
    }
}

/// VGA receiver (CAT9883 family).  No HPD line exists on this connector.
#[derive(Clone)]
pub struct VgaRx {
    slave: I2cSlave,
}

impl VgaRx {
    pub fn new(bus: Rc<dyn I2cBus>) -> Self {
        Self {
            slave: I2cSlave::new(bus, SLAVE_VGA_RX),
        }
    }

    /// True when both H-sync and V-sync are received from the source.
    pub fn is_sync_detected(&self) -> Result<bool, ChameleonError> {
        let state = self.slave.get_byte(VGA_REG_SYNC_STATE)?;
        Ok(state & (VGA_BIT_HSYNC_ACTIVE | VGA_BIT_VSYNC_ACTIVE)
            == VGA_BIT_HSYNC_ACTIVE | VGA_BIT_VSYNC_ACTIVE)
    }

    /// Picks the supported mode nearest the measured H-sync frequency.
    pub fn detect_mode(&self) -> Result<VgaMode, ChameleonError> {
        let measured = self.slave.get_word(VGA_REG_HSYNC_100HZ)?;
        let mode = VgaMode::ALL
            .into_iter()
            .min_by_key(|mode| mode.hsync_100hz().abs_diff(measured))
            .expect("mode table is not empty");
        debug!("VGA hsync {}00 Hz -> {mode}", measured);
        Ok(mode)
    }

    /// Programs the sampling PLL for the given mode.
    pub fn set_mode(&self, mode: VgaMode) -> Result<(), ChameleonError> {
        let (div, vco, cp) = mode.pll_preset();
        self.slave.set_word(VGA_REG_PLL_DIV, div)?;
        self.slave.set_byte(VGA_REG_PLL_VCO, vco)?;
        self.slave.set_byte(VGA_REG_PLL_CP, cp)
    }

    /// Raw register window for failure diagnostics.
    pub fn dump(&self) -> Result<Vec<u8>, ChameleonError> {
        self.slave.get(0, RX_DUMP_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::FakeI2cBus;

    #[test]
    fn hdmi_pixel_clock_scales_from_10khz_units() {
        let bus = Rc::new(FakeI2cBus::new());
        // 13000 * 10 kHz = 130 MHz.
        bus.seed_bytes(SLAVE_HDMI_RX, HDMI_REG_PCLK_10KHZ, &13000u16.to_le_bytes());
        let rx = HdmiRx::new(bus);
        assert_eq!(rx.pixel_clock_mhz().unwrap(), 130.0);
    }

    #[test]
    fn dp_stable_needs_lock_and_msa() {
        let bus = Rc::new(FakeI2cBus::new());
        let rx = DpRx::new(bus.clone(), SLAVES_DP_RX[0]);
        assert!(!rx.is_video_input_stable().unwrap());
        bus.seed(SLAVES_DP_RX[0], DP_REG_LINK_STATUS, DP_BIT_LANES_LOCKED);
        assert!(!rx.is_video_input_stable().unwrap());
        bus.seed(
            SLAVES_DP_RX[0],
            DP_REG_LINK_STATUS,
            DP_BIT_LANES_LOCKED | DP_BIT_MSA_VALID,
        );
        assert!(rx.is_video_input_stable().unwrap());
    }

    #[test]
    fn vga_detect_mode_picks_nearest_hsync() {
        let bus = Rc::new(FakeI2cBus::new());
        bus.seed_bytes(SLAVE_VGA_RX, VGA_REG_HSYNC_100HZ, &480u16.to_le_bytes());
        let rx = VgaRx::new(bus.clone());
        assert_eq!(rx.detect_mode().unwrap(), VgaMode::Xga1024x768_60);

        bus.seed_bytes(SLAVE_VGA_RX, VGA_REG_HSYNC_100HZ, &660u16.to_le_bytes());
        assert_eq!(rx.detect_mode().unwrap(), VgaMode::Sxga1280x1024_60);
    }

    #[test]
    fn vga_sync_needs_both_syncs() {
        let bus = Rc::new(FakeI2cBus::new());
        bus.seed(SLAVE_VGA_RX, VGA_REG_SYNC_STATE, VGA_BIT_HSYNC_ACTIVE);
        let rx = VgaRx::new(bus.clone());
        assert!(!rx.is_sync_detected().unwrap());
        bus.seed(
            SLAVE_VGA_RX,
            VGA_REG_SYNC_STATE,
            VGA_BIT_HSYNC_ACTIVE | VGA_BIT_VSYNC_ACTIVE,
        );
        assert!(rx.is_sync_detected().unwrap());
    }
}
