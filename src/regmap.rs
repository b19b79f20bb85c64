//! Register map and bus map for the Chameleon board.
//!
//! All FPGA register addresses, bit positions, capture-memory geometry, I2C
//! slave addresses, and receiver-chip register numbers are defined here so
//! the rest of the codebase references named constants instead of raw hex.

use bitflags::bitflags;

// ---------------------------------------------------------------------------
// FPGA register aperture
// ---------------------------------------------------------------------------

/// Base of the memory-mapped FPGA register aperture in physical memory.
pub const REG_APERTURE_BASE: u32 = 0xff20_0000;
/// Size of the aperture. Covers every register block below.
pub const REG_APERTURE_SIZE: usize = 0x2_0000;

// ---------------------------------------------------------------------------
// HPD controller
// ---------------------------------------------------------------------------

/// Base of the HPD register block.
pub const HPD_BASE: u32 = 0xff21_a000;
/// Per-port HPD register offsets (DP1, DP2, HDMI). VGA has no HPD line.
pub const HPD_OFFSET_DP1: u32 = 0x4;
pub const HPD_OFFSET_DP2: u32 = 0x8;
pub const HPD_OFFSET_HDMI: u32 = 0xc;
/// Register values for the HPD line level.
pub const HPD_VALUE_PLUG: u32 = 1;
pub const HPD_VALUE_UNPLUG: u32 = 0;

// ---------------------------------------------------------------------------
// Video pass-through
// ---------------------------------------------------------------------------

/// Control register selecting which clock/data lane pair feeds the
/// analog pass-through output on the main board.
pub const VPASS_REG_CTRL: u32 = 0xff21_d004;
/// Lane selection bits: clear = lane A, set = lane B.
pub const VPASS_BIT_DATA_B: u32 = 1 << 0;
pub const VPASS_BIT_CLK_B: u32 = 1 << 1;

// ---------------------------------------------------------------------------
// Video dumpers
// ---------------------------------------------------------------------------

/// Register block bases for dumper A (index 0) and dumper B (index 1).
pub const DUMP_REGS_BASE: [u32; 2] = [0xff21_0000, 0xff21_1000];

/// Register offsets within a dumper block.
pub const DUMP_REG_CTRL: u32 = 0x0;
/// Capture-memory start/end offsets, relative to [`DUMP_BASE_ADDRESS`].
pub const DUMP_REG_START_ADDR: u32 = 0x8;
pub const DUMP_REG_END_ADDR: u32 = 0xc;
pub const DUMP_REG_LOOP: u32 = 0x10;
pub const DUMP_REG_LIMIT: u32 = 0x14;
/// FPGA-measured video timing.
pub const DUMP_REG_WIDTH: u32 = 0x18;
pub const DUMP_REG_HEIGHT: u32 = 0x1c;
pub const DUMP_REG_FRAME_COUNT: u32 = 0x20;
/// Crop ranges, packed as (end << 16 | start).
pub const DUMP_REG_CROP_XRANGE: u32 = 0x24;
pub const DUMP_REG_CROP_YRANGE: u32 = 0x28;

/// Frame hash ring buffer: byte offset of the first slot and the ring size
/// in bytes (256 four-byte slots). Hash addresses wrap modulo this size.
pub const DUMP_REG_HASH_BUF_BASE: u32 = 0x400;
pub const DUMP_HASH_BUF_SIZE: u32 = 1024;

bitflags! {
    /// Dumper control register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DumpCtrl: u32 {
        /// Capture from the alternate clock lane instead of the normal one.
        const CLK_ALT = 1 << 1;
        /// Run in single-pixel mode.
        const RUN = 1 << 2;
        /// Run in dual-pixel mode. Frame capture only proceeds once both
        /// dumpers have this bit set.
        const RUN_DUAL = 1 << 3;
        /// Generate 64-bit frame hashes; otherwise 32-bit.
        const HASH_64 = 1 << 4;
        /// Enable cropping.
        const CROP = 1 << 5;
    }
}

/// Physical base of the capture memory window.
pub const DUMP_BASE_ADDRESS: u32 = 0xc000_0000;
/// Size of each dumper's capture buffer.
pub const DUMP_BUFFER_SIZE: u32 = 0x1c00_0000;
/// Capture-buffer start offsets for dumper A and dumper B.
pub const DUMP_START_ADDRESSES: [u32; 2] = [0x0000_0000, 0x2000_0000];

/// Captured pixel format is packed RGB.
pub const BYTES_PER_PIXEL: u32 = 3;
/// Frames are page-aligned in capture memory.
pub const PAGE_SIZE: u32 = 4096;

// ---------------------------------------------------------------------------
// EDID controllers (FPGA-hosted EDID memories)
// ---------------------------------------------------------------------------

/// Register block bases of the two EDID controllers.
pub const EDID_HDMI_BASE: u32 = 0xff21_7000;
pub const EDID_VGA_BASE: u32 = 0xff21_9000;
/// Control register offset and its values.
pub const EDID_REG_CTRL: u32 = 0x0;
/// Held in reset: the EDID memory is not served over DDC.
pub const EDID_CTRL_RESET: u32 = 0;
/// Operate: latch the EDID memory and serve it over DDC.
pub const EDID_CTRL_OPERATE: u32 = 1;
/// Offset of the 256-byte EDID memory window, written as big-endian words.
pub const EDID_REG_MEM: u32 = 0x100;
/// An EDID block is a base block plus one extension.
pub const EDID_SIZE: usize = 256;

// ---------------------------------------------------------------------------
// I2C slave map (main bus)
// ---------------------------------------------------------------------------

/// Main I2C bus index on the board.
pub const I2C_BUS_MAIN: u32 = 0;

/// Power-control IO expander.
pub const SLAVE_POWER_IO: u8 = 0x20;
/// Mux-control IO expander.
pub const SLAVE_MUX_IO: u8 = 0x21;
/// DisplayPort receivers for DP1 and DP2.
pub const SLAVES_DP_RX: [u8; 2] = [0x58, 0x59];
/// Emulated DDC EEPROMs holding the DP1/DP2 EDIDs, served over AUX.
pub const SLAVES_DP_EDID: [u8; 2] = [0x50, 0x51];
/// HDMI receiver (IT6803 family).
pub const SLAVE_HDMI_RX: u8 = 0x48;
/// VGA receiver (CAT9883 family).
pub const SLAVE_VGA_RX: u8 = 0x4c;

// ---------------------------------------------------------------------------
// Mux IO expander (16-bit, output registers 0x02/0x03)
// ---------------------------------------------------------------------------

/// Output port registers (low byte, high byte).
pub const MUX_REG_OUTPUT0: u8 = 0x02;
pub const MUX_REG_OUTPUT1: u8 = 0x03;

//  Output bit      | 0..2: input select | 3,4: DP AUX bypass | 5: HDMI DDC
//  ----------------------------------------------------------------------
//  bypass lines are active-low; VGA source block is active-high.
/// Input-select field values (bits 0..2), one per connector.
pub const MUX_CONFIG_DP1_DUAL: u16 = 0x0001;
pub const MUX_CONFIG_DP2_DUAL: u16 = 0x0002;
pub const MUX_CONFIG_HDMI_DUAL: u16 = 0x0003;
pub const MUX_CONFIG_VGA: u16 = 0x0004;
/// DP AUX channel bypass, active-low.
pub const MUX_MASK_DP1_AUX_BP_L: u16 = 1 << 3;
pub const MUX_MASK_DP2_AUX_BP_L: u16 = 1 << 4;
/// HDMI DDC bypass, active-low.
pub const MUX_MASK_HDMI_DDC_BP_L: u16 = 1 << 5;
/// Block the analog RGB source; VGA "unplugged" when set.
pub const MUX_MASK_VGA_BLOCK_SOURCE: u16 = 1 << 6;

// ---------------------------------------------------------------------------
// Power IO expander
// ---------------------------------------------------------------------------

/// Output register holding the receiver reset lines (active-low).
pub const POWER_REG_OUTPUT: u8 = 0x02;
/// Per-port receiver reset bits.
pub const POWER_RESET_DP1: u8 = 1 << 0;
pub const POWER_RESET_DP2: u8 = 1 << 1;
pub const POWER_RESET_HDMI: u8 = 1 << 2;
pub const POWER_RESET_VGA: u8 = 1 << 3;

// ---------------------------------------------------------------------------
// DisplayPort receiver registers
// ---------------------------------------------------------------------------

/// Link training / symbol lock status.
pub const DP_REG_LINK_STATUS: u8 = 0x10;
pub const DP_BIT_LANES_LOCKED: u8 = 1 << 0;
pub const DP_BIT_MSA_VALID: u8 = 1 << 1;
/// Cable power detect (+3.3V pin).
pub const DP_REG_POWER_STATUS: u8 = 0x12;
pub const DP_BIT_CABLE_POWER: u8 = 1 << 0;
/// Main stream attribute resolution, 2 bytes each, little-endian.
pub const DP_REG_MSA_HRES: u8 = 0x20;
pub const DP_REG_MSA_VRES: u8 = 0x22;
/// Video datapath control.
pub const DP_REG_VIDEO_CTRL: u8 = 0x30;
pub const DP_BIT_VIDEO_RESET: u8 = 1 << 0;
/// Gate for the emulated DDC EEPROM.
pub const DP_REG_EDID_CTRL: u8 = 0x40;
pub const DP_BIT_EDID_ENABLE: u8 = 1 << 0;
/// The EEPROM accepts writes of at most one page at a time.
pub const DP_EDID_WRITE_PAGE: usize = 32;

// ---------------------------------------------------------------------------
// HDMI receiver registers (IT6803 family)
// ---------------------------------------------------------------------------

/// System state: +5V detect and sync-detect (SCDT).
pub const HDMI_REG_SYS_STATE: u8 = 0x0a;
pub const HDMI_BIT_PWR5V: u8 = 1 << 0;
pub const HDMI_BIT_SCDT: u8 = 1 << 1;
/// Interrupt status; the video-halt bit flags a needed reset.
pub const HDMI_REG_INT_STATUS: u8 = 0x0c;
pub const HDMI_BIT_VIDEO_HALT: u8 = 1 << 2;
/// Software reset strobe.
pub const HDMI_REG_SW_RESET: u8 = 0x0e;
pub const HDMI_BIT_SWRST: u8 = 1 << 0;
/// Measured pixel clock in 10 kHz units, 2 bytes little-endian.
pub const HDMI_REG_PCLK_10KHZ: u8 = 0x14;
/// Measured active video timing, 2 bytes each, little-endian.
pub const HDMI_REG_H_ACTIVE: u8 = 0x16;
pub const HDMI_REG_V_ACTIVE: u8 = 0x18;
/// Output pixel bus mapping.
pub const HDMI_REG_VIDEO_MAP: u8 = 0x1a;
pub const HDMI_MAP_SINGLE: u8 = 0x00;
pub const HDMI_MAP_DUAL: u8 = 0x01;
/// HDCP engine control and status.
pub const HDMI_REG_HDCP_CTRL: u8 = 0x20;
pub const HDMI_BIT_HDCP_ENABLE: u8 = 1 << 0;
pub const HDMI_REG_HDCP_STATUS: u8 = 0x21;
pub const HDMI_BIT_ENCRYPTED: u8 = 1 << 0;

// ---------------------------------------------------------------------------
// VGA receiver registers (CAT9883 family)
// ---------------------------------------------------------------------------

/// Sync detect status.
pub const VGA_REG_SYNC_STATE: u8 = 0x08;
pub const VGA_BIT_HSYNC_ACTIVE: u8 = 1 << 0;
pub const VGA_BIT_VSYNC_ACTIVE: u8 = 1 << 1;
/// Measured horizontal sync frequency in 100 Hz units, 2 bytes LE.
pub const VGA_REG_HSYNC_100HZ: u8 = 0x0a;
/// PLL configuration: feedback divider (2 bytes LE), VCO range, charge pump.
pub const VGA_REG_PLL_DIV: u8 = 0x10;
pub const VGA_REG_PLL_VCO: u8 = 0x12;
pub const VGA_REG_PLL_CP: u8 = 0x13;

// ---------------------------------------------------------------------------
// Shared timing
// ---------------------------------------------------------------------------

/// Width of the receiver register window dumped into logs on capture
/// failures.
pub const RX_DUMP_LEN: usize = 256;

/// Pulse width of receiver reset lines.
pub const RECEIVER_RESET_PULSE: std::time::Duration =
    std::time::Duration::from_millis(20);
