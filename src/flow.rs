//! Per-connector input flows and their readiness state machines.
//!
//! An input flow composes a receiver handle, the mux/power IO lines, an
//! EDID emulator, and a frame manager for one connector, and implements the
//! connector-specific FSM that clears transient receiver faults (mode
//! changes, power events) before any capture is attempted.
//!
//! The connector variants share [`FlowCore`] and the default methods on
//! [`InputFlow`]; variant behavior (HPD wiring, DDC gating, the FSM itself)
//! is dispatched through the trait.

use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::dumper::{PixelDumpArgs, VideoDumper, even_pixels_index, primary_index};
use crate::edid::{DpEdid, EdidBlock, EdidEmulator, FpgaEdid};
use crate::error::ChameleonError;
use crate::fpga::FpgaController;
use crate::frame::{CropRect, FrameManager};
use crate::hpd::HpdLevel;
use crate::i2c::{I2cBus, I2cSlave};
use crate::io::{MuxIo, PowerIo};
use crate::poll::wait_until;
use crate::ports::PortId;
use crate::regmap::{
    MUX_MASK_DP1_AUX_BP_L, MUX_MASK_DP2_AUX_BP_L, MUX_MASK_HDMI_DDC_BP_L,
    MUX_MASK_VGA_BLOCK_SOURCE, SLAVES_DP_EDID, SLAVES_DP_RX,
};
use crate::rx::{DpRx, HdmiRx, VgaMode, VgaRx};

/// The dumper instances participating in a flow, even-pixel instance first
/// in dual-pixel mode.
pub(crate) fn effective_dumpers(
    fpga: &FpgaController,
    port: PortId,
    dual_pixel_mode: bool,
) -> Vec<VideoDumper> {
    if dual_pixel_mode {
        let even = even_pixels_index(port);
        vec![fpga.vdump(even).clone(), fpga.vdump(1 - even).clone()]
    } else {
        vec![fpga.vdump(primary_index(port)).clone()]
    }
}

/// Fields common to every connector variant.
pub struct FlowCore {
    pub port: PortId,
    pub fpga: FpgaController,
    pub mux: MuxIo,
    pub power: PowerIo,
    pub edid: Box<dyn EdidEmulator>,
    pub frame_manager: FrameManager,
    pub edid_enabled: bool,
    pub ddc_enabled: bool,
}

impl FlowCore {
    fn new(
        port: PortId,
        fpga: FpgaController,
        bus: Rc<dyn I2cBus>,
        edid: Box<dyn EdidEmulator>,
        dual_pixel_mode: bool,
    ) -> Self {
        let frame_manager =
            FrameManager::new(port, effective_dumpers(&fpga, port, dual_pixel_mode), dual_pixel_mode);
        Self {
            port,
            fpga,
            mux: MuxIo::new(bus.clone()),
            power: PowerIo::new(bus),
            edid,
            frame_manager,
            edid_enabled: true,
            ddc_enabled: true,
        }
    }
}

/// The per-connector driver surface.
///
/// Default methods implement everything that is connector-independent on
/// top of a handful of variant hooks.  `do_fsm` must run once per selection
/// before any capture.
pub trait InputFlow {
    fn core(&self) -> &FlowCore;
    fn core_mut(&mut self) -> &mut FlowCore;

    /// Human readable connector type, like "DP" or "HDMI".
    fn connector_type(&self) -> &'static str;

    fn is_dual_pixel_mode(&self) -> bool;

    // --- Variant hardware hooks ---

    /// Raises the hotplug (or source-unblock) signal.
    fn assert_hpd(&mut self) -> Result<(), ChameleonError>;

    /// Lowers the hotplug (or source-unblock) signal.
    fn deassert_hpd(&mut self) -> Result<(), ChameleonError>;

    fn is_plugged(&self) -> Result<bool, ChameleonError>;

    fn enable_ddc(&mut self) -> Result<(), ChameleonError>;

    fn disable_ddc(&mut self) -> Result<(), ChameleonError>;

    /// Raw receiver register window for failure diagnostics.
    fn receiver_dump(&self) -> Result<Vec<u8>, ChameleonError>;

    // --- Lifecycle ---

    fn initialize(&mut self) -> Result<(), ChameleonError>;

    /// Runs the readiness FSM.  Non-fatal link problems are logged and
    /// surface later as capture failures.
    fn do_fsm(&mut self) -> Result<(), ChameleonError>;

    /// Whether a cable is physically present (power pin or probed signal).
    fn is_physical_plugged(&mut self) -> Result<bool, ChameleonError>;

    /// Waits for the receiver to see a stable input.  Returns success.
    fn wait_video_input_stable(&mut self, timeout: Option<Duration>) -> bool;

    /// Waits for the FPGA side of the link to settle.  Returns success.
    fn wait_video_output_stable(&mut self, timeout: Option<Duration>) -> bool;

    fn get_resolution(&mut self) -> Result<(u32, u32), ChameleonError>;

    /// Fires `repeat` HPD deassert/assert cycles.  A no-op on connectors
    /// without an HPD line.
    fn fire_hpd_pulse(
        &mut self,
        deassert_us: u64,
        assert_us: Option<u64>,
        repeat: u32,
        end_level: HpdLevel,
    ) -> Result<(), ChameleonError>;

    // --- Shared behavior ---

    /// Wires this flow through the muxes and the FPGA paths.
    fn select(&mut self) -> Result<(), ChameleonError> {
        let port = self.core().port;
        let dual = self.is_dual_pixel_mode();
        info!("select input flow {port}");
        let core = self.core_mut();
        core.mux.set_config(MuxIo::config_for(port))?;
        core.fpga.vpass.select(port);
        core.fpga.vdump0.select(port, dual);
        core.fpga.vdump1.select(port, dual);
        Ok(())
    }

    /// Asserts hotplug.  The DUT may probe EDID the instant HPD rises, so
    /// EDID and DDC come up first.
    fn plug(&mut self) -> Result<(), ChameleonError> {
        if self.core().edid_enabled {
            self.core_mut().edid.enable()?;
        }
        if self.core().ddc_enabled {
            self.enable_ddc()?;
        }
        self.assert_hpd()
    }

    /// Deasserts hotplug first, then tears down EDID and DDC.
    fn unplug(&mut self) -> Result<(), ChameleonError> {
        self.deassert_hpd()?;
        self.core_mut().edid.disable()?;
        self.disable_ddc()
    }

    /// Fires pulse segments of mixed widths, starting at low.  Ends low
    /// for an even segment count, high for an odd one.
    fn fire_mixed_hpd_pulses(&mut self, widths_ms: &[u64]) -> Result<(), ChameleonError> {
        for (i, &width) in widths_ms.iter().enumerate() {
            if i % 2 == 0 {
                self.unplug()?;
            } else {
                self.plug()?;
            }
            std::thread::sleep(Duration::from_millis(width));
        }
        if widths_ms.len() % 2 == 0 {
            self.unplug()
        } else {
            self.plug()
        }
    }

    fn set_edid_state(&mut self, enabled: bool) -> Result<(), ChameleonError> {
        if enabled && self.is_plugged()? {
            self.core_mut().edid.enable()?;
        } else {
            self.core_mut().edid.disable()?;
        }
        self.core_mut().edid_enabled = enabled;
        Ok(())
    }

    fn is_edid_enabled(&self) -> bool {
        self.core().edid_enabled
    }

    fn set_ddc_state(&mut self, enabled: bool) -> Result<(), ChameleonError> {
        if enabled && self.is_plugged()? {
            self.enable_ddc()?;
        } else {
            self.disable_ddc()?;
        }
        self.core_mut().ddc_enabled = enabled;
        Ok(())
    }

    fn is_ddc_enabled(&self) -> bool {
        self.core().ddc_enabled
    }

    fn read_edid(&self) -> Result<EdidBlock, ChameleonError> {
        self.core().edid.read_edid()
    }

    fn write_edid(&mut self, edid: &EdidBlock) -> Result<(), ChameleonError> {
        self.core_mut().edid.write_edid(edid)
    }

    fn max_frame_limit(&self, width: u32, height: u32) -> u32 {
        self.core().frame_manager.max_frame_limit(width, height)
    }

    /// Captures until the limit is reached, logging receiver diagnostics
    /// on a timeout before surfacing it.
    fn dump_frames_to_limit(
        &mut self,
        frame_limit: u32,
        crop: Option<CropRect>,
        timeout: Duration,
    ) -> Result<(), ChameleonError> {
        let port = self.core().port;
        if !self.wait_video_output_stable(None) {
            warn!("video output on {port} not stable before capture");
        }
        let result = self
            .core_mut()
            .frame_manager
            .dump_frames_to_limit(frame_limit, crop, timeout);
        if let Err(ChameleonError::CaptureTimeout { captured, .. }) = &result {
            error!("frames on {port} failed to reach {frame_limit} (got {captured})");
            match self.receiver_dump() {
                Ok(dump) => error!("rx dump: {dump:02x?}"),
                Err(e) => error!("rx dump unavailable: {e}"),
            }
        }
        result
    }

    /// Starts a continuous, ring-overwriting capture.
    fn start_dumping_frames(
        &mut self,
        frame_buffer_limit: u32,
        crop: Option<CropRect>,
        hash_buffer_limit: u32,
    ) -> Result<(), ChameleonError> {
        let port = self.core().port;
        if !self.wait_video_output_stable(None) {
            warn!("video output on {port} not stable before capture");
        }
        self.core_mut()
            .frame_manager
            .start_dumping_frames(frame_buffer_limit, crop, hash_buffer_limit)
    }

    fn stop_dumping_frames(&mut self) {
        self.core_mut().frame_manager.stop_dumping_frames();
    }

    fn dumped_frame_count(&self) -> u32 {
        self.core().frame_manager.frame_count()
    }

    fn frame_hashes(&self, start: u32, stop: u32) -> Vec<Vec<u16>> {
        self.core().frame_manager.frame_hashes(start, stop)
    }

    fn pixel_dump_args(&self) -> PixelDumpArgs {
        VideoDumper::pixel_dump_args(self.core().port, self.is_dual_pixel_mode())
    }

    // --- Content protection (HDMI only; rejected elsewhere) ---

    fn set_content_protection(&mut self, _enabled: bool) -> Result<(), ChameleonError> {
        Err(ChameleonError::Unsupported {
            operation: "content protection",
            connector: self.connector_type(),
        })
    }

    fn is_content_protection_enabled(&self) -> Result<bool, ChameleonError> {
        Err(ChameleonError::Unsupported {
            operation: "content protection",
            connector: self.connector_type(),
        })
    }

    fn is_video_input_encrypted(&self) -> Result<bool, ChameleonError> {
        Err(ChameleonError::Unsupported {
            operation: "content protection",
            connector: self.connector_type(),
        })
    }

    /// Fixes or re-enables auto-detection of the analog timing mode.
    fn set_vga_mode(&mut self, _mode: Option<VgaMode>) -> Result<(), ChameleonError> {
        Err(ChameleonError::Unsupported {
            operation: "analog mode selection",
            connector: self.connector_type(),
        })
    }
}

// ---------------------------------------------------------------------------
// DisplayPort
// ---------------------------------------------------------------------------

/// DisplayPort flow: two states, locked and unlocked.  Locked means the
/// receiver input is stable and the FPGA-measured resolution agrees with
/// the receiver's.
pub struct DpInputFlow {
    core: FlowCore,
    rx: DpRx,
    probe_interval: Duration,
    probe_timeout: Duration,
}

const DP_DELAY_VIDEO_MODE_PROBE: Duration = Duration::from_secs(1);
const DP_TIMEOUT_VIDEO_STABLE_PROBE: Duration = Duration::from_secs(5);
/// Width of the corrective HPD pulse the FSM fires to retrain the source.
const DP_HPD_PULSE_WIDTH: Duration = Duration::from_millis(100);

impl DpInputFlow {
    pub fn new(port: PortId, bus: Rc<dyn I2cBus>, fpga: FpgaController) -> Self {
        let index = match port {
            PortId::Dp1 => 0,
            PortId::Dp2 => 1,
            other => panic!("{other} is not a DisplayPort input"),
        };
        let rx = DpRx::new(bus.clone(), SLAVES_DP_RX[index]);
        let eeprom = I2cSlave::new(bus.clone(), SLAVES_DP_EDID[index]);
        let edid = Box::new(DpEdid::new(rx.clone(), eeprom));
        Self {
            core: FlowCore::new(port, fpga, bus, edid, false),
            rx,
            probe_interval: DP_DELAY_VIDEO_MODE_PROBE,
            probe_timeout: DP_TIMEOUT_VIDEO_STABLE_PROBE,
        }
    }

    #[cfg(test)]
    fn set_probe_timing(&mut self, interval: Duration, timeout: Duration) {
        self.probe_interval = interval;
        self.probe_timeout = timeout;
    }

    fn aux_bypass_mask(&self) -> u16 {
        match self.core.port {
            PortId::Dp1 => MUX_MASK_DP1_AUX_BP_L,
            _ => MUX_MASK_DP2_AUX_BP_L,
        }
    }

    /// Locked when the FPGA agrees with the receiver on the resolution.
    fn is_frame_locked(&self) -> bool {
        let fpga = self.core.frame_manager.compute_resolution();
        let rx = self.rx.frame_resolution().unwrap_or((0, 0));
        if fpga == rx {
            debug!("same resolution: {}x{}", fpga.0, fpga.1);
            true
        } else {
            debug!(
                "diff resolution: fpga {}x{} != rx {}x{}",
                fpga.0, fpga.1, rx.0, rx.1
            );
            false
        }
    }
}

impl InputFlow for DpInputFlow {
    fn core(&self) -> &FlowCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FlowCore {
        &mut self.core
    }

    fn connector_type(&self) -> &'static str {
        "DP"
    }

    fn is_dual_pixel_mode(&self) -> bool {
        false
    }

    fn assert_hpd(&mut self) -> Result<(), ChameleonError> {
        self.core.fpga.hpd.plug(self.core.port);
        Ok(())
    }

    fn deassert_hpd(&mut self) -> Result<(), ChameleonError> {
        self.core.fpga.hpd.unplug(self.core.port);
        Ok(())
    }

    fn is_plugged(&self) -> Result<bool, ChameleonError> {
        Ok(self.core.fpga.hpd.is_plugged(self.core.port))
    }

    fn enable_ddc(&mut self) -> Result<(), ChameleonError> {
        // AUX bypass is active-low.
        let mask = self.aux_bypass_mask();
        self.core.mux.clear_output_mask(mask)
    }

    fn disable_ddc(&mut self) -> Result<(), ChameleonError> {
        let mask = self.aux_bypass_mask();
        self.core.mux.set_output_mask(mask)
    }

    fn receiver_dump(&self) -> Result<Vec<u8>, ChameleonError> {
        self.rx.dump()
    }

    fn initialize(&mut self) -> Result<(), ChameleonError> {
        info!("initialize input flow {}", self.core.port);
        self.core.power.reset_receiver(self.core.port)?;
        self.rx.initialize()
    }

    fn is_physical_plugged(&mut self) -> Result<bool, ChameleonError> {
        self.rx.is_cable_powered()
    }

    fn wait_video_input_stable(&mut self, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(self.probe_timeout);
        // Bus hiccups read as not-ready and get retried by the poll.
        wait_until(
            || self.rx.is_video_input_stable().unwrap_or(false),
            self.probe_interval,
            timeout,
        )
        .is_ok()
    }

    fn wait_video_output_stable(&mut self, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(self.probe_timeout);
        wait_until(|| self.is_frame_locked(), self.probe_interval, timeout).is_ok()
    }

    fn get_resolution(&mut self) -> Result<(u32, u32), ChameleonError> {
        if self.wait_video_output_stable(None) {
            self.rx.frame_resolution()
        } else {
            let (rx_width, rx_height) = self.rx.frame_resolution().unwrap_or((0, 0));
            let (fpga_width, fpga_height) = self.core.frame_manager.compute_resolution();
            Err(ChameleonError::ResolutionUnstable {
                port: self.core.port,
                rx_width,
                rx_height,
                fpga_width,
                fpga_height,
            })
        }
    }

    fn fire_hpd_pulse(
        &mut self,
        deassert_us: u64,
        assert_us: Option<u64>,
        repeat: u32,
        end_level: HpdLevel,
    ) -> Result<(), ChameleonError> {
        self.core
            .fpga
            .hpd
            .fire_hpd_pulse(self.core.port, deassert_us, assert_us, repeat, end_level);
        Ok(())
    }

    fn do_fsm(&mut self) -> Result<(), ChameleonError> {
        let port = self.core.port;
        let stable = self.rx.is_video_input_stable().unwrap_or(false);
        if stable && self.is_frame_locked() {
            info!("skip resetting {port} rx");
            return Ok(());
        }

        self.rx.reset_video_logic()?;
        if self.wait_video_input_stable(None) && self.wait_video_output_stable(None) {
            return Ok(());
        }

        // One corrective pulse to force the source to retrain.
        info!("send {port} HPD pulse to reset source");
        self.core.fpga.hpd.unplug(port);
        std::thread::sleep(DP_HPD_PULSE_WIDTH);
        self.core.fpga.hpd.plug(port);
        if self.wait_video_input_stable(None) && self.wait_video_output_stable(None) {
            info!("{port} FSM done");
        } else {
            // Non-fatal here; the subsequent capture reports the failure.
            error!("{port} FSM failed");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HDMI
// ---------------------------------------------------------------------------

/// HDMI flow with automatic pixel-mode switching.
pub struct HdmiInputFlow {
    core: FlowCore,
    rx: HdmiRx,
    dual_pixel_mode: bool,
    probe_interval: Duration,
    probe_timeout: Duration,
}

// The receiver reference firmware switches to dual pixel mode above a
// 160 MHz pixel clock; the FPGA is only reliable below 125 MHz, so switch
// there instead.  The two thresholds form a hysteresis band that keeps the
// mode stable against pixel clock measurement noise near the boundary.
const HDMI_PCLK_THRESHOLD_HIGH_MHZ: f64 = 125.0;
const HDMI_PCLK_THRESHOLD_LOW_MHZ: f64 = 115.0;

const HDMI_DELAY_VIDEO_MODE_PROBE: Duration = Duration::from_millis(100);
const HDMI_TIMEOUT_VIDEO_STABLE_PROBE: Duration = Duration::from_secs(10);
/// Settle time after a reset or mode change before pixels are good.
const HDMI_DELAY_WAITING_GOOD_PIXELS: Duration = Duration::from_secs(3);

impl HdmiInputFlow {
    pub fn new(bus: Rc<dyn I2cBus>, fpga: FpgaController) -> Self {
        let rx = HdmiRx::new(bus.clone());
        let edid = Box::new(FpgaEdid::new(fpga.hdmi_edid.clone()));
        Self {
            core: FlowCore::new(PortId::Hdmi, fpga, bus, edid, true),
            rx,
            dual_pixel_mode: true,
            probe_interval: HDMI_DELAY_VIDEO_MODE_PROBE,
            probe_timeout: HDMI_TIMEOUT_VIDEO_STABLE_PROBE,
        }
    }

    #[cfg(test)]
    fn set_probe_timing(&mut self, interval: Duration, timeout: Duration) {
        self.probe_interval = interval;
        self.probe_timeout = timeout;
    }

    /// Picks the pixel mode from the measured pixel clock.
    ///
    /// Inside the hysteresis band the current mode is kept.  Returns
    /// whether the mode changed; a change reconfigures the receiver,
    /// rebuilds the frame manager for the new dumper pairing, and re-runs
    /// the selection.
    fn update_pixel_mode(&mut self) -> Result<bool, ChameleonError> {
        let pclk = self.rx.pixel_clock_mhz()?;
        info!("PCLK = {pclk} MHz");
        if pclk > HDMI_PCLK_THRESHOLD_LOW_MHZ && pclk < HDMI_PCLK_THRESHOLD_HIGH_MHZ {
            return Ok(false);
        }

        let dual = pclk >= HDMI_PCLK_THRESHOLD_HIGH_MHZ;
        if dual == self.dual_pixel_mode {
            return Ok(false);
        }

        self.dual_pixel_mode = dual;
        if dual {
            self.rx.set_dual_pixel_mode()?;
            info!("changed to dual pixel mode");
        } else {
            self.rx.set_single_pixel_mode()?;
            info!("changed to single pixel mode");
        }
        let port = self.core.port;
        self.core.frame_manager =
            FrameManager::new(port, effective_dumpers(&self.core.fpga, port, dual), dual);
        self.select()?;
        Ok(true)
    }

    fn is_frame_locked(&self) -> bool {
        let fpga = self.core.frame_manager.compute_resolution();
        let rx = self.rx.frame_resolution().unwrap_or((0, 0));
        if fpga == rx {
            debug!("same resolution: {}x{}", fpga.0, fpga.1);
            true
        } else {
            debug!(
                "diff resolution: fpga {}x{} != rx {}x{}",
                fpga.0, fpga.1, rx.0, rx.1
            );
            false
        }
    }
}

impl InputFlow for HdmiInputFlow {
    fn core(&self) -> &FlowCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FlowCore {
        &mut self.core
    }

    fn connector_type(&self) -> &'static str {
        "HDMI"
    }

    fn is_dual_pixel_mode(&self) -> bool {
        self.dual_pixel_mode
    }

    fn assert_hpd(&mut self) -> Result<(), ChameleonError> {
        self.core.fpga.hpd.plug(self.core.port);
        Ok(())
    }

    fn deassert_hpd(&mut self) -> Result<(), ChameleonError> {
        self.core.fpga.hpd.unplug(self.core.port);
        Ok(())
    }

    fn is_plugged(&self) -> Result<bool, ChameleonError> {
        Ok(self.core.fpga.hpd.is_plugged(self.core.port))
    }

    fn enable_ddc(&mut self) -> Result<(), ChameleonError> {
        // DDC bypass is active-low.
        self.core.mux.clear_output_mask(MUX_MASK_HDMI_DDC_BP_L)
    }

    fn disable_ddc(&mut self) -> Result<(), ChameleonError> {
        self.core.mux.set_output_mask(MUX_MASK_HDMI_DDC_BP_L)
    }

    fn receiver_dump(&self) -> Result<Vec<u8>, ChameleonError> {
        self.rx.dump()
    }

    fn initialize(&mut self) -> Result<(), ChameleonError> {
        info!("initialize input flow {}", self.core.port);
        self.core.power.reset_receiver(self.core.port)?;
        self.rx.initialize(self.dual_pixel_mode)
    }

    fn is_physical_plugged(&mut self) -> Result<bool, ChameleonError> {
        self.rx.is_cable_powered()
    }

    fn wait_video_input_stable(&mut self, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(self.probe_timeout);
        wait_until(
            || self.rx.is_video_input_stable().unwrap_or(false),
            self.probe_interval,
            timeout,
        )
        .is_ok()
    }

    fn wait_video_output_stable(&mut self, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(self.probe_timeout);
        wait_until(|| self.is_frame_locked(), self.probe_interval, timeout).is_ok()
    }

    fn get_resolution(&mut self) -> Result<(u32, u32), ChameleonError> {
        if self.wait_video_output_stable(None) {
            self.rx.frame_resolution()
        } else {
            let (rx_width, rx_height) = self.rx.frame_resolution().unwrap_or((0, 0));
            let (fpga_width, fpga_height) = self.core.frame_manager.compute_resolution();
            Err(ChameleonError::ResolutionUnstable {
                port: self.core.port,
                rx_width,
                rx_height,
                fpga_width,
                fpga_height,
            })
        }
    }

    fn fire_hpd_pulse(
        &mut self,
        deassert_us: u64,
        assert_us: Option<u64>,
        repeat: u32,
        end_level: HpdLevel,
    ) -> Result<(), ChameleonError> {
        self.core
            .fpga
            .hpd
            .fire_hpd_pulse(self.core.port, deassert_us, assert_us, repeat, end_level);
        Ok(())
    }

    fn do_fsm(&mut self) -> Result<(), ChameleonError> {
        let port = self.core.port;
        let reset_needed = self.rx.is_reset_needed().unwrap_or(false);
        if reset_needed {
            self.rx.reset()?;
        }

        if !self.wait_video_input_stable(None) {
            error!("video input on {port} not stable");
            return Err(ChameleonError::VideoNotStable(port));
        }

        let mode_changed = self.update_pixel_mode()?;
        if reset_needed || mode_changed {
            self.wait_video_output_stable(None);
            // The receiver needs this long after a mode change before the
            // pixel bus carries good data.
            std::thread::sleep(HDMI_DELAY_WAITING_GOOD_PIXELS);
        }
        Ok(())
    }

    fn set_content_protection(&mut self, enabled: bool) -> Result<(), ChameleonError> {
        self.rx.set_content_protection(enabled)
    }

    fn is_content_protection_enabled(&self) -> Result<bool, ChameleonError> {
        self.rx.is_content_protection_enabled()
    }

    fn is_video_input_encrypted(&self) -> Result<bool, ChameleonError> {
        self.rx.is_video_input_encrypted()
    }
}

// ---------------------------------------------------------------------------
// VGA
// ---------------------------------------------------------------------------

/// VGA flow.  The connector has no HPD line: "plugged" means the analog
/// source mux is unblocked, and cable presence is inferred from sync.
pub struct VgaInputFlow {
    core: FlowCore,
    rx: VgaRx,
    /// `None` selects auto-detection each FSM cycle.
    mode: Option<VgaMode>,
    probe_interval: Duration,
    probe_timeout: Duration,
}

const VGA_DELAY_CHECKING_STABLE_PROBE: Duration = Duration::from_millis(100);
const VGA_TIMEOUT_CHECKING_STABLE: Duration = Duration::from_secs(5);
const VGA_DELAY_RESOLUTION_PROBE: Duration = Duration::from_millis(50);

impl VgaInputFlow {
    pub fn new(bus: Rc<dyn I2cBus>, fpga: FpgaController) -> Self {
        let rx = VgaRx::new(bus.clone());
        let edid = Box::new(FpgaEdid::new(fpga.vga_edid.clone()));
        Self {
            core: FlowCore::new(PortId::Vga, fpga, bus, edid, false),
            rx,
            mode: None,
            probe_interval: VGA_DELAY_CHECKING_STABLE_PROBE,
            probe_timeout: VGA_TIMEOUT_CHECKING_STABLE,
        }
    }

    #[cfg(test)]
    fn set_probe_timing(&mut self, interval: Duration, timeout: Duration) {
        self.probe_interval = interval;
        self.probe_timeout = timeout;
    }

    /// The resolution is good when it reads the same twice and contains no
    /// zero; analog inputs float when the source is dead.
    fn is_resolution_valid(&self) -> bool {
        let first = self.core.frame_manager.compute_resolution();
        std::thread::sleep(VGA_DELAY_RESOLUTION_PROBE);
        let second = self.core.frame_manager.compute_resolution();
        first == second && first.0 != 0 && first.1 != 0
    }
}

impl InputFlow for VgaInputFlow {
    fn core(&self) -> &FlowCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FlowCore {
        &mut self.core
    }

    fn connector_type(&self) -> &'static str {
        "VGA"
    }

    fn is_dual_pixel_mode(&self) -> bool {
        false
    }

    fn assert_hpd(&mut self) -> Result<(), ChameleonError> {
        // Unblock the RGB source to emulate a plug.
        self.core.mux.clear_output_mask(MUX_MASK_VGA_BLOCK_SOURCE)
    }

    fn deassert_hpd(&mut self) -> Result<(), ChameleonError> {
        self.core.mux.set_output_mask(MUX_MASK_VGA_BLOCK_SOURCE)
    }

    fn is_plugged(&self) -> Result<bool, ChameleonError> {
        Ok(self.core.mux.output()? & MUX_MASK_VGA_BLOCK_SOURCE == 0)
    }

    fn enable_ddc(&mut self) -> Result<(), ChameleonError> {
        // The board cannot gate DDC on VGA; the EDID memory is the gate.
        self.core.edid.enable()
    }

    fn disable_ddc(&mut self) -> Result<(), ChameleonError> {
        self.core.edid.disable()
    }

    fn receiver_dump(&self) -> Result<Vec<u8>, ChameleonError> {
        self.rx.dump()
    }

    fn initialize(&mut self) -> Result<(), ChameleonError> {
        info!("initialize input flow {}", self.core.port);
        self.core.power.reset_receiver(self.core.port)
    }

    /// No power pin to check: unblock the source and look for sync within
    /// the timeout.  Restores the block state afterwards.
    fn is_physical_plugged(&mut self) -> Result<bool, ChameleonError> {
        let plugged_before = self.is_plugged()?;
        if !plugged_before {
            self.plug()?;
        }
        let stable = self.wait_video_input_stable(None);
        if !plugged_before {
            self.unplug()?;
        }
        Ok(stable)
    }

    fn wait_video_input_stable(&mut self, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(self.probe_timeout);
        wait_until(
            || self.rx.is_sync_detected().unwrap_or(false),
            self.probe_interval,
            timeout,
        )
        .is_ok()
    }

    fn wait_video_output_stable(&mut self, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(self.probe_timeout);
        wait_until(|| self.is_resolution_valid(), self.probe_interval, timeout).is_ok()
    }

    fn get_resolution(&mut self) -> Result<(u32, u32), ChameleonError> {
        if !self.wait_video_output_stable(None) {
            return Err(ChameleonError::VideoNotStable(self.core.port));
        }
        Ok(self.core.frame_manager.compute_resolution())
    }

    /// VGA has no HPD line; pulse requests are accepted and ignored.
    fn fire_hpd_pulse(
        &mut self,
        _deassert_us: u64,
        _assert_us: Option<u64>,
        _repeat: u32,
        _end_level: HpdLevel,
    ) -> Result<(), ChameleonError> {
        Ok(())
    }

    fn fire_mixed_hpd_pulses(&mut self, _widths_ms: &[u64]) -> Result<(), ChameleonError> {
        Ok(())
    }

    fn do_fsm(&mut self) -> Result<(), ChameleonError> {
        if self.mode.is_some() {
            // Fixed mode: the PLL was programmed when the mode was set.
            return Ok(());
        }
        if self.wait_video_input_stable(None) {
            let detected = self.rx.detect_mode()?;
            self.rx.set_mode(detected)?;
            self.wait_video_output_stable(None);
        } else {
            warn!("skip receiver FSM on {}: video input not stable", self.core.port);
        }
        Ok(())
    }

    fn set_vga_mode(&mut self, mode: Option<VgaMode>) -> Result<(), ChameleonError> {
        self.mode = mode;
        if let Some(mode) = mode {
            self.rx.set_mode(mode)?;
        }
        Ok(())
    }

    fn is_content_protection_enabled(&self) -> Result<bool, ChameleonError> {
        // No content protection exists on an analog link.
        Ok(false)
    }

    fn is_video_input_encrypted(&self) -> Result<bool, ChameleonError> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::FakeI2cBus;
    use crate::regmap::*;
    use crate::registers::{FakeRegisterBank, RegisterBank};

    struct Rig {
        bank: Rc<FakeRegisterBank>,
        bus: Rc<FakeI2cBus>,
        fpga: FpgaController,
    }

    fn rig() -> Rig {
        let bank = Rc::new(FakeRegisterBank::new());
        let bus = Rc::new(FakeI2cBus::new());
        let fpga = FpgaController::new(bank.clone());
        Rig { bank, bus, fpga }
    }

    fn fast(duration_ms: u64) -> Duration {
        Duration::from_millis(duration_ms)
    }

    fn seed_hdmi_pclk(bus: &FakeI2cBus, mhz: u16) {
        bus.seed_bytes(SLAVE_HDMI_RX, HDMI_REG_PCLK_10KHZ, &(mhz * 100).to_le_bytes());
    }

    fn hdmi_flow(rig: &Rig) -> HdmiInputFlow {
        let mut flow = HdmiInputFlow::new(rig.bus.clone(), rig.fpga.clone());
        flow.set_probe_timing(fast(1), fast(5));
        flow
    }

    // --- HDMI pixel mode hysteresis ---

    #[test]
    fn hdmi_pixel_mode_falls_out_of_dual_only_below_low_threshold() {
        let rig = rig();
        let mut flow = hdmi_flow(&rig);
        assert!(flow.is_dual_pixel_mode());

        seed_hdmi_pclk(&rig.bus, 130);
        assert!(!flow.update_pixel_mode().unwrap());
        assert!(flow.is_dual_pixel_mode());

        // 120 MHz sits in the hysteresis band: keep dual.
        seed_hdmi_pclk(&rig.bus, 120);
        assert!(!flow.update_pixel_mode().unwrap());
        assert!(flow.is_dual_pixel_mode());

        seed_hdmi_pclk(&rig.bus, 110);
        assert!(flow.update_pixel_mode().unwrap());
        assert!(!flow.is_dual_pixel_mode());
    }

    #[test]
    fn hdmi_pixel_mode_climbs_to_dual_only_at_high_threshold() {
        let rig = rig();
        let mut flow = hdmi_flow(&rig);

        seed_hdmi_pclk(&rig.bus, 100);
        flow.update_pixel_mode().unwrap();
        assert!(!flow.is_dual_pixel_mode());

        // 120 MHz sits in the hysteresis band: keep single.
        seed_hdmi_pclk(&rig.bus, 120);
        assert!(!flow.update_pixel_mode().unwrap());
        assert!(!flow.is_dual_pixel_mode());

        seed_hdmi_pclk(&rig.bus, 130);
        assert!(flow.update_pixel_mode().unwrap());
        assert!(flow.is_dual_pixel_mode());
    }

    #[test]
    fn hdmi_pixel_mode_band_edges() {
        let rig = rig();
        let mut flow = hdmi_flow(&rig);
        // Exactly 125 MHz selects dual; already dual, so no change.
        seed_hdmi_pclk(&rig.bus, 125);
        assert!(!flow.update_pixel_mode().unwrap());
        assert!(flow.is_dual_pixel_mode());
        // Exactly 115 MHz is outside the band and below high: single.
        seed_hdmi_pclk(&rig.bus, 115);
        assert!(flow.update_pixel_mode().unwrap());
        assert!(!flow.is_dual_pixel_mode());
    }

    #[test]
    fn hdmi_mode_change_reprograms_receiver_and_dumpers() {
        let rig = rig();
        let mut flow = hdmi_flow(&rig);
        seed_hdmi_pclk(&rig.bus, 100);
        flow.update_pixel_mode().unwrap();

        // The receiver was switched to single-pixel mapping.
        let map = rig.bus.read(SLAVE_HDMI_RX, HDMI_REG_VIDEO_MAP, 1).unwrap();
        assert_eq!(map, vec![HDMI_MAP_SINGLE]);
        // The re-selection armed the primary dumper in single-pixel mode.
        let ctrl = rig.bank.read(DUMP_REGS_BASE[1] + DUMP_REG_CTRL);
        assert_ne!(ctrl & DumpCtrl::RUN.bits(), 0);
    }

    // --- HPD semantics ---

    #[test]
    fn hdmi_plug_brings_up_edid_before_hpd() {
        let rig = rig();
        let mut flow = hdmi_flow(&rig);
        flow.plug().unwrap();

        assert!(flow.is_plugged().unwrap());
        // EDID latched before the HPD register write.
        let writes = rig.bank.writes();
        let edid_pos = writes
            .iter()
            .position(|&(addr, _)| addr == EDID_HDMI_BASE + EDID_REG_CTRL)
            .expect("EDID enable write");
        let hpd_pos = writes
            .iter()
            .position(|&(addr, _)| addr == HPD_BASE + HPD_OFFSET_HDMI)
            .expect("HPD write");
        assert!(edid_pos < hpd_pos);
    }

    #[test]
    fn hdmi_unplug_deasserts_hpd_before_edid_teardown() {
        let rig = rig();
        let mut flow = hdmi_flow(&rig);
        flow.plug().unwrap();
        let before = rig.bank.write_count();
        flow.unplug().unwrap();

        assert!(!flow.is_plugged().unwrap());
        let writes = rig.bank.writes()[before..].to_vec();
        let hpd_pos = writes
            .iter()
            .position(|&(addr, _)| addr == HPD_BASE + HPD_OFFSET_HDMI)
            .expect("HPD write");
        let edid_pos = writes
            .iter()
            .position(|&(addr, _)| addr == EDID_HDMI_BASE + EDID_REG_CTRL)
            .expect("EDID disable write");
        assert!(hpd_pos < edid_pos);
    }

    #[test]
    fn mixed_pulses_even_count_ends_low() {
        let rig = rig();
        let mut flow = hdmi_flow(&rig);
        flow.fire_mixed_hpd_pulses(&[1, 1]).unwrap();
        assert!(!flow.is_plugged().unwrap());
    }

    #[test]
    fn mixed_pulses_odd_count_ends_high() {
        let rig = rig();
        let mut flow = hdmi_flow(&rig);
        flow.fire_mixed_hpd_pulses(&[1, 1, 1]).unwrap();
        assert!(flow.is_plugged().unwrap());
    }

    // --- DisplayPort FSM ---

    fn dp_flow(rig: &Rig) -> DpInputFlow {
        let mut flow = DpInputFlow::new(PortId::Dp1, rig.bus.clone(), rig.fpga.clone());
        flow.set_probe_timing(fast(1), fast(5));
        flow
    }

    fn seed_dp_locked(rig: &Rig) {
        rig.bus.seed(
            SLAVES_DP_RX[0],
            DP_REG_LINK_STATUS,
            DP_BIT_LANES_LOCKED | DP_BIT_MSA_VALID,
        );
        rig.bus
            .seed_bytes(SLAVES_DP_RX[0], DP_REG_MSA_HRES, &1920u16.to_le_bytes());
        rig.bus
            .seed_bytes(SLAVES_DP_RX[0], DP_REG_MSA_VRES, &1080u16.to_le_bytes());
        rig.bank.seed(DUMP_REGS_BASE[0] + DUMP_REG_WIDTH, 1920);
        rig.bank.seed(DUMP_REGS_BASE[0] + DUMP_REG_HEIGHT, 1080);
    }

    #[test]
    fn dp_fsm_skips_reset_when_locked() {
        let rig = rig();
        let mut flow = dp_flow(&rig);
        seed_dp_locked(&rig);
        flow.do_fsm().unwrap();
        // Locked flow touches nothing.
        assert_eq!(rig.bank.write_count(), 0);
        assert!(rig.bus.writes().is_empty());
    }

    #[test]
    fn dp_fsm_resets_then_pulses_when_unstable() {
        let rig = rig();
        let mut flow = dp_flow(&rig);
        // Input never stabilizes: the FSM resets the video logic, then
        // fires exactly one corrective HPD pulse, and stays non-fatal.
        flow.do_fsm().unwrap();

        let rx_writes = rig.bus.writes();
        assert!(
            rx_writes
                .iter()
                .any(|(slave, offset, _)| *slave == SLAVES_DP_RX[0] && *offset == DP_REG_VIDEO_CTRL),
            "expected a video-logic reset"
        );
        let hpd_reg = HPD_BASE + HPD_OFFSET_DP1;
        let hpd_values: Vec<u32> = rig
            .bank
            .writes()
            .into_iter()
            .filter(|&(addr, _)| addr == hpd_reg)
            .map(|(_, value)| value)
            .collect();
        assert_eq!(hpd_values, vec![HPD_VALUE_UNPLUG, HPD_VALUE_PLUG]);
    }

    #[test]
    fn dp_resolution_reports_both_sides_on_mismatch() {
        let rig = rig();
        let mut flow = dp_flow(&rig);
        seed_dp_locked(&rig);
        rig.bank.seed(DUMP_REGS_BASE[0] + DUMP_REG_WIDTH, 1280);
        match flow.get_resolution() {
            Err(ChameleonError::ResolutionUnstable {
                rx_width,
                fpga_width,
                ..
            }) => {
                assert_eq!(rx_width, 1920);
                assert_eq!(fpga_width, 1280);
            }
            other => panic!("expected resolution mismatch, got {other:?}"),
        }
    }

    #[test]
    fn dp_content_protection_is_rejected() {
        let rig = rig();
        let mut flow = dp_flow(&rig);
        assert!(matches!(
            flow.set_content_protection(true),
            Err(ChameleonError::Unsupported { .. })
        ));
    }

    // --- VGA ---

    fn vga_flow(rig: &Rig) -> VgaInputFlow {
        let mut flow = VgaInputFlow::new(rig.bus.clone(), rig.fpga.clone());
        flow.set_probe_timing(fast(1), fast(5));
        flow
    }

    #[test]
    fn vga_hpd_pulse_is_a_silent_noop() {
        let rig = rig();
        let mut flow = vga_flow(&rig);
        flow.plug().unwrap();
        let bank_before = rig.bank.write_count();
        let bus_before = rig.bus.writes().len();

        flow.fire_hpd_pulse(1000, None, 3, HpdLevel::Low).unwrap();
        flow.fire_mixed_hpd_pulses(&[1, 2, 1]).unwrap();

        assert_eq!(rig.bank.write_count(), bank_before);
        assert_eq!(rig.bus.writes().len(), bus_before);
        assert!(flow.is_plugged().unwrap());
    }

    #[test]
    fn vga_plug_unblocks_the_source_mux() {
        let rig = rig();
        let mut flow = vga_flow(&rig);
        flow.unplug().unwrap();
        assert!(!flow.is_plugged().unwrap());
        flow.plug().unwrap();
        assert!(flow.is_plugged().unwrap());
        let output = rig.bus.read(SLAVE_MUX_IO, MUX_REG_OUTPUT0, 1).unwrap()[0];
        assert_eq!(u16::from(output) & MUX_MASK_VGA_BLOCK_SOURCE, 0);
    }

    #[test]
    fn vga_fsm_programs_detected_mode() {
        let rig = rig();
        let mut flow = vga_flow(&rig);
        rig.bus.seed(
            SLAVE_VGA_RX,
            VGA_REG_SYNC_STATE,
            VGA_BIT_HSYNC_ACTIVE | VGA_BIT_VSYNC_ACTIVE,
        );
        rig.bus
            .seed_bytes(SLAVE_VGA_RX, VGA_REG_HSYNC_100HZ, &484u16.to_le_bytes());
        rig.bank.seed(DUMP_REGS_BASE[0] + DUMP_REG_WIDTH, 1024);
        rig.bank.seed(DUMP_REGS_BASE[0] + DUMP_REG_HEIGHT, 768);

        flow.do_fsm().unwrap();
        // 48.4 kHz hsync is XGA; its PLL divider is the horizontal total.
        let div = rig.bus.read(SLAVE_VGA_RX, VGA_REG_PLL_DIV, 2).unwrap();
        assert_eq!(u16::from_le_bytes([div[0], div[1]]), 1344);
    }

    #[test]
    fn vga_fixed_mode_skips_detection() {
        let rig = rig();
        let mut flow = vga_flow(&rig);
        flow.set_vga_mode(Some(VgaMode::Svga800x600_60)).unwrap();
        let before = rig.bus.writes().len();
        flow.do_fsm().unwrap();
        assert_eq!(rig.bus.writes().len(), before);
    }

    #[test]
    fn vga_content_protection_queries_report_false() {
        let rig = rig();
        let flow = vga_flow(&rig);
        assert_eq!(flow.is_content_protection_enabled().unwrap(), false);
        assert_eq!(flow.is_video_input_encrypted().unwrap(), false);
    }
}
