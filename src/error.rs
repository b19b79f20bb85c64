//! Custom error types for the chameleon-fpga driver.
//!
//! Provides structured errors instead of `Box<dyn Error>`, so callers can
//! programmatically distinguish between invalid requests, link-not-ready
//! conditions, and transport failures.  A truly unreachable FPGA has no
//! recovery strategy and is treated as fatal at setup time rather than
//! surfaced per access.

use thiserror::Error;

use crate::ports::PortId;

/// Top-level error type for all driver operations.
#[derive(Debug, Error)]
pub enum ChameleonError {
    /// Mapping the FPGA register aperture failed.
    #[error("failed to map FPGA registers from {path}: {message}")]
    MemoryMap { path: String, message: String },

    /// An I2C transfer to a receiver or IO expander failed.
    #[error("I2C transfer failed (slave 0x{slave:02x}): {message}")]
    I2c { slave: u8, message: String },

    /// The factory-default EDID could not be loaded at startup.
    #[error("failed to load the default EDID from {path}: {source}")]
    DefaultEdid {
        path: String,
        source: std::io::Error,
    },

    /// An EDID block must be exactly 256 bytes.
    #[error("EDID must be exactly {expected} bytes, got {got}")]
    EdidSize { expected: usize, got: usize },

    /// The EDID id does not refer to a live record.
    #[error("not a valid EDID id: {0}")]
    InvalidEdidId(usize),

    /// EDID id 0 is the factory default and is never destroyed.
    #[error("EDID id 0 is the factory default and cannot be destroyed")]
    ReservedEdidId,

    /// A crop rectangle violates the pixel-mode alignment rules.
    #[error(
        "crop rectangle ({x}, {y}) {width}x{height} is not aligned for \
         {mode} mode"
    )]
    UnalignedCrop {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        mode: &'static str,
    },

    /// More frames were requested than the capture buffer can hold.
    #[error("frame limit exceeded: requested {requested} > max {max}")]
    FrameLimitExceeded { requested: u32, max: u32 },

    /// A frame index outside the captured range was requested.
    #[error("frame index out of range: {index} not in [0, {total})")]
    FrameIndexOutOfRange { index: u32, total: u32 },

    /// A captured-frame read was attempted with no live capture session.
    #[error("no capture session; call capture_video first")]
    NoCaptureSession,

    /// The port's HPD line is deasserted, so no signal can be expected.
    #[error("{0} is unplugged; no signal is expected")]
    Unplugged(PortId),

    /// The video input never stabilized within the timeout.
    #[error("video input on {0} did not stabilize")]
    VideoNotStable(PortId),

    /// The receiver and the FPGA disagree on the frame resolution.
    #[error(
        "frame resolution on {port} not stable: rx {rx_width}x{rx_height}, \
         fpga {fpga_width}x{fpga_height}"
    )]
    ResolutionUnstable {
        port: PortId,
        rx_width: u32,
        rx_height: u32,
        fpga_width: u32,
        fpga_height: u32,
    },

    /// Frame capture did not reach the requested count within the timeout.
    #[error("capture on {port} timed out: {captured} of {requested} frames")]
    CaptureTimeout {
        port: PortId,
        requested: u32,
        captured: u32,
    },

    /// The requested operation is not supported on this connector.
    #[error("{operation} is not supported on {connector}")]
    Unsupported {
        operation: &'static str,
        connector: &'static str,
    },

    /// An external helper tool failed.
    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },

    /// Invalid CLI argument value.
    #[error("Invalid value '{value}' for {arg}.\nValid values: {valid}")]
    InvalidArgument {
        arg: &'static str,
        value: String,
        valid: &'static str,
    },

    /// A required CLI argument value is missing.
    #[error("{0} requires a value")]
    MissingArgumentValue(String),
}
