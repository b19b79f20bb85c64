//! The owning driver: flows, EDID registry, selection, capture sessions.
//!
//! [`ChameleonDriver`] is the single entry point the RPC layer calls into.
//! It owns one input flow per connector, the process-wide EDID registry,
//! the currently-selected port, and the one live capture session.  The
//! lifecycle rules are explicit: selecting a different port invalidates the
//! previous session, and every invalid request is rejected before hardware
//! is touched.

use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use tracing::info;

use crate::config::Config;
use crate::dumper::PixelDumpArgs;
use crate::edid::EdidBlock;
use crate::error::ChameleonError;
use crate::flow::{DpInputFlow, HdmiInputFlow, InputFlow, VgaInputFlow};
use crate::fpga::FpgaController;
use crate::frame::CropRect;
use crate::hpd::HpdLevel;
use crate::i2c::I2cBus;
use crate::ports::PortId;
use crate::regmap::{BYTES_PER_PIXEL, PAGE_SIZE};
use crate::registers::RegisterBank;
use crate::rx::VgaMode;
use crate::tools;

/// Captured pixels come back from the readback tool in this format.
const PIXEL_FORMAT: &str = "rgb";

/// How long a frame dump may take before it is reported as timed out.
const TIMEOUT_FRAME_DUMP_PROBE: Duration = Duration::from_secs(60);

/// The EDID registry slot reserved for the factory default.
pub const EDID_ID_DEFAULT: usize = 0;

/// State describing the frames sitting in capture memory right now.
///
/// Exactly one session is live at a time; a new capture (or selecting a
/// different port) replaces it.
#[derive(Debug, Clone)]
pub struct CapturedSession {
    pub total_frames: u32,
    pub port: PortId,
    pub resolution: (u32, u32),
    pub dual_pixel: bool,
    pub dump_args: PixelDumpArgs,
}

/// Driver core for the FPGA-based Chameleon board.
pub struct ChameleonDriver {
    flows: BTreeMap<PortId, Box<dyn InputFlow>>,
    edids: Vec<Option<EdidBlock>>,
    selected: Option<PortId>,
    captured: Option<CapturedSession>,
    config: Config,
}

impl ChameleonDriver {
    /// Brings the board to a known state: loads the factory-default EDID
    /// (fatal if missing), initializes every flow, applies the default
    /// EDID everywhere, and unplugs all ports.
    pub fn new(
        mem: Rc<dyn RegisterBank>,
        bus: Rc<dyn I2cBus>,
        config: Config,
    ) -> Result<Self, ChameleonError> {
        let default_edid_bytes =
            std::fs::read(&config.default_edid_path).map_err(|source| {
                ChameleonError::DefaultEdid {
                    path: config.default_edid_path.display().to_string(),
                    source,
                }
            })?;
        let default_edid = EdidBlock::new(&default_edid_bytes)?;

        let fpga = FpgaController::new(mem);
        let mut flows: BTreeMap<PortId, Box<dyn InputFlow>> = BTreeMap::new();
        flows.insert(
            PortId::Dp1,
            Box::new(DpInputFlow::new(PortId::Dp1, bus.clone(), fpga.clone())),
        );
        flows.insert(
            PortId::Dp2,
            Box::new(DpInputFlow::new(PortId::Dp2, bus.clone(), fpga.clone())),
        );
        flows.insert(
            PortId::Hdmi,
            Box::new(HdmiInputFlow::new(bus.clone(), fpga.clone())),
        );
        flows.insert(PortId::Vga, Box::new(VgaInputFlow::new(bus, fpga)));

        let mut driver = Self {
            flows,
            edids: vec![Some(default_edid)],
            selected: None,
            captured: None,
            config,
        };

        for flow in driver.flows.values_mut() {
            flow.initialize()?;
        }
        driver.reset()?;
        for port in PortId::ALL {
            driver.unplug(port)?;
        }
        Ok(driver)
    }

    fn flow(&self, port: PortId) -> &dyn InputFlow {
        self.flows.get(&port).expect("every port has a flow").as_ref()
    }

    fn flow_mut(&mut self, port: PortId) -> &mut Box<dyn InputFlow> {
        self.flows.get_mut(&port).expect("every port has a flow")
    }

    /// Re-applies the factory-default EDID to every port.
    pub fn reset(&mut self) -> Result<(), ChameleonError> {
        info!("apply the default EDID to all inputs");
        let default = self.edids[EDID_ID_DEFAULT]
            .clone()
            .expect("the default EDID slot is never freed");
        for flow in self.flows.values_mut() {
            flow.write_edid(&default)?;
        }
        Ok(())
    }

    // --- Port inventory ---

    /// All connectors on the board, connected or not.
    pub fn supported_ports(&self) -> Vec<PortId> {
        self.flows.keys().copied().collect()
    }

    /// The connectors with a cable physically present.
    pub fn probe_inputs(&mut self) -> Result<Vec<PortId>, ChameleonError> {
        let mut present = Vec::new();
        for port in PortId::ALL {
            if self.flow_mut(port).is_physical_plugged()? {
                present.push(port);
            }
        }
        Ok(present)
    }

    pub fn connector_type(&self, port: PortId) -> &'static str {
        self.flow(port).connector_type()
    }

    pub fn is_physical_plugged(&mut self, port: PortId) -> Result<bool, ChameleonError> {
        self.flow_mut(port).is_physical_plugged()
    }

    pub fn wait_video_input_stable(&mut self, port: PortId, timeout: Option<Duration>) -> bool {
        self.flow_mut(port).wait_video_input_stable(timeout)
    }

    // --- EDID registry ---

    /// Stores an EDID in the first free slot (or a new one) and returns
    /// its id.
    pub fn create_edid(&mut self, data: &[u8]) -> Result<usize, ChameleonError> {
        let edid = EdidBlock::new(data)?;
        match self.edids.iter().position(Option::is_none) {
            Some(id) => {
                self.edids[id] = Some(edid);
                Ok(id)
            }
            None => {
                self.edids.push(Some(edid));
                Ok(self.edids.len() - 1)
            }
        }
    }

    /// Frees an EDID slot for reuse.  The factory default is protected.
    pub fn destroy_edid(&mut self, edid_id: usize) -> Result<(), ChameleonError> {
        if edid_id == EDID_ID_DEFAULT {
            return Err(ChameleonError::ReservedEdidId);
        }
        match self.edids.get_mut(edid_id) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                Ok(())
            }
            _ => Err(ChameleonError::InvalidEdidId(edid_id)),
        }
    }

    /// Copies the EDID record onto the port's emulator.  The record stays
    /// in the registry and may be applied to several ports at once.
    ///
    /// This does not pulse HPD; call `plug`, `unplug`, or
    /// `fire_hpd_pulse` afterwards so the DUT re-reads it.
    pub fn apply_edid(&mut self, port: PortId, edid_id: usize) -> Result<(), ChameleonError> {
        let edid = self
            .edids
            .get(edid_id)
            .and_then(Option::as_ref)
            .ok_or(ChameleonError::InvalidEdidId(edid_id))?
            .clone();
        self.flow_mut(port).write_edid(&edid)
    }

    /// Reads the EDID currently held by the port's emulator.
    pub fn read_edid(&self, port: PortId) -> Result<Vec<u8>, ChameleonError> {
        Ok(self.flow(port).read_edid()?.as_bytes().to_vec())
    }

    pub fn set_edid_state(&mut self, port: PortId, enabled: bool) -> Result<(), ChameleonError> {
        self.flow_mut(port).set_edid_state(enabled)
    }

    pub fn is_edid_enabled(&self, port: PortId) -> bool {
        self.flow(port).is_edid_enabled()
    }

    // --- HPD / DDC ---

    pub fn is_plugged(&self, port: PortId) -> Result<bool, ChameleonError> {
        self.flow(port).is_plugged()
    }

    pub fn plug(&mut self, port: PortId) -> Result<(), ChameleonError> {
        self.flow_mut(port).plug()
    }

    pub fn unplug(&mut self, port: PortId) -> Result<(), ChameleonError> {
        self.flow_mut(port).unplug()
    }

    /// Fires `repeat` HPD pulses; `assert_us` falls back to `deassert_us`.
    pub fn fire_hpd_pulse(
        &mut self,
        port: PortId,
        deassert_us: u64,
        assert_us: Option<u64>,
        repeat: u32,
        end_level: HpdLevel,
    ) -> Result<(), ChameleonError> {
        self.flow_mut(port)
            .fire_hpd_pulse(deassert_us, assert_us, repeat, end_level)
    }

    /// Fires pulse segments of mixed widths, starting at low.
    pub fn fire_mixed_hpd_pulses(
        &mut self,
        port: PortId,
        widths_ms: &[u64],
    ) -> Result<(), ChameleonError> {
        self.flow_mut(port).fire_mixed_hpd_pulses(widths_ms)
    }

    pub fn set_ddc_state(&mut self, port: PortId, enabled: bool) -> Result<(), ChameleonError> {
        self.flow_mut(port).set_ddc_state(enabled)
    }

    pub fn is_ddc_enabled(&self, port: PortId) -> bool {
        self.flow(port).is_ddc_enabled()
    }

    // --- Content protection ---

    pub fn set_content_protection(
        &mut self,
        port: PortId,
        enabled: bool,
    ) -> Result<(), ChameleonError> {
        self.flow_mut(port).set_content_protection(enabled)
    }

    pub fn is_content_protection_enabled(&self, port: PortId) -> Result<bool, ChameleonError> {
        self.flow(port).is_content_protection_enabled()
    }

    pub fn is_video_input_encrypted(&self, port: PortId) -> Result<bool, ChameleonError> {
        self.flow(port).is_video_input_encrypted()
    }

    /// Fixes the VGA analog mode, or `None` to re-enable auto-detection.
    pub fn set_vga_mode(
        &mut self,
        port: PortId,
        mode: Option<VgaMode>,
    ) -> Result<(), ChameleonError> {
        self.flow_mut(port).set_vga_mode(mode)
    }

    // --- Selection & capture ---

    /// Wires the port through (if not already selected) and runs its FSM.
    /// Selecting a different port drops any live capture session.
    fn select_port(&mut self, port: PortId) -> Result<(), ChameleonError> {
        if self.selected != Some(port) {
            self.flow_mut(port).select()?;
            self.selected = Some(port);
            self.captured = None;
        }
        self.flow_mut(port).do_fsm()
    }

    /// Pixel format of captured frames, as the readback tool emits them.
    pub fn pixel_format(&self) -> &'static str {
        PIXEL_FORMAT
    }

    pub fn max_frame_limit(&self, port: PortId, width: u32, height: u32) -> u32 {
        self.flow(port).max_frame_limit(width, height)
    }

    /// Synchronously captures `total_frames` frames from the port.
    ///
    /// Invalid requests (unaligned crops, frame counts beyond the buffer)
    /// are rejected before any register write.  On success the session is
    /// recorded for `read_captured_frame` / `captured_checksums`.
    pub fn capture_video(
        &mut self,
        port: PortId,
        total_frames: u32,
        crop: Option<CropRect>,
    ) -> Result<(), ChameleonError> {
        // A cropped request is fully checkable up front.
        if let Some(rect) = crop {
            let dual = self.flow(port).is_dual_pixel_mode();
            rect.validate(dual)?;
            let max = self.flow(port).max_frame_limit(rect.width, rect.height);
            if total_frames > max {
                return Err(ChameleonError::FrameLimitExceeded {
                    requested: total_frames,
                    max,
                });
            }
        }

        self.select_port(port)?;
        if !self.flow(port).is_plugged()? {
            return Err(ChameleonError::Unplugged(port));
        }

        let resolution = match crop {
            Some(rect) => (rect.width, rect.height),
            None => self.flow_mut(port).get_resolution()?,
        };
        // The FSM may have switched pixel mode; recheck against the final
        // geometry.
        let max = self.flow(port).max_frame_limit(resolution.0, resolution.1);
        if total_frames > max {
            return Err(ChameleonError::FrameLimitExceeded {
                requested: total_frames,
                max,
            });
        }

        self.flow_mut(port)
            .dump_frames_to_limit(total_frames, crop, TIMEOUT_FRAME_DUMP_PROBE)?;

        let dual_pixel = self.flow(port).is_dual_pixel_mode();
        self.captured = Some(CapturedSession {
            total_frames,
            port,
            resolution,
            dual_pixel,
            dump_args: self.flow(port).pixel_dump_args(),
        });
        Ok(())
    }

    /// Starts an open-ended capture; bound the hash backlog with
    /// `hash_buffer_limit` and call [`stop_capturing_video`] to end it.
    ///
    /// [`stop_capturing_video`]: ChameleonDriver::stop_capturing_video
    pub fn start_capturing_video(
        &mut self,
        port: PortId,
        frame_buffer_limit: u32,
        crop: Option<CropRect>,
        hash_buffer_limit: u32,
    ) -> Result<(), ChameleonError> {
        self.select_port(port)?;
        if !self.flow(port).is_plugged()? {
            return Err(ChameleonError::Unplugged(port));
        }
        self.flow_mut(port)
            .start_dumping_frames(frame_buffer_limit, crop, hash_buffer_limit)?;

        let resolution = match crop {
            Some(rect) => (rect.width, rect.height),
            None => self.flow_mut(port).get_resolution()?,
        };
        let dual_pixel = self.flow(port).is_dual_pixel_mode();
        self.captured = Some(CapturedSession {
            total_frames: frame_buffer_limit,
            port,
            resolution,
            dual_pixel,
            dump_args: self.flow(port).pixel_dump_args(),
        });
        Ok(())
    }

    /// Stops an open-ended capture.
    pub fn stop_capturing_video(&mut self, port: PortId) {
        self.flow_mut(port).stop_dumping_frames();
    }

    /// Frames captured so far, for progress polling.
    pub fn captured_frame_count(&self, port: PortId) -> u32 {
        self.flow(port).dumped_frame_count()
    }

    /// The live capture session, if any.
    pub fn captured_session(&self) -> Option<&CapturedSession> {
        self.captured.as_ref()
    }

    /// Resolution of the captured frames (the crop size if one was given).
    pub fn captured_resolution(&self) -> Result<(u32, u32), ChameleonError> {
        Ok(self
            .captured
            .as_ref()
            .ok_or(ChameleonError::NoCaptureSession)?
            .resolution)
    }

    /// Reads one captured frame out of capture memory via the external
    /// readback tool.
    pub fn read_captured_frame(&self, frame_index: u32) -> Result<Vec<u8>, ChameleonError> {
        let session = self
            .captured
            .as_ref()
            .ok_or(ChameleonError::NoCaptureSession)?;
        if frame_index >= session.total_frames {
            return Err(ChameleonError::FrameIndexOutOfRange {
                index: frame_index,
                total: session.total_frames,
            });
        }

        let (mut width, height) = session.resolution;
        // Each dual-pixel buffer holds half the horizontal samples.
        if session.dual_pixel {
            width /= 2;
        }
        let frame_size = (width * height * BYTES_PER_PIXEL).div_ceil(PAGE_SIZE).max(1) * PAGE_SIZE;
        let args = session.dump_args.offset_by(frame_size * frame_index);
        tools::pixeldump(
            &self.config.pixeldump_path,
            width,
            height,
            BYTES_PER_PIXEL,
            &args,
        )
    }

    /// Per-frame checksums of the captured frames in `[start, stop)`.
    pub fn captured_checksums(
        &self,
        start: u32,
        stop: u32,
    ) -> Result<Vec<Vec<u16>>, ChameleonError> {
        let session = self
            .captured
            .as_ref()
            .ok_or(ChameleonError::NoCaptureSession)?;
        Ok(self.flow(session.port).frame_hashes(start, stop))
    }

    /// Captures a single frame and returns its pixels.
    pub fn dump_pixels(
        &mut self,
        port: PortId,
        crop: Option<CropRect>,
    ) -> Result<Vec<u8>, ChameleonError> {
        self.capture_video(port, 1, crop)?;
        self.read_captured_frame(0)
    }

    /// Captures a single frame and returns its checksum.
    pub fn compute_pixel_checksum(
        &mut self,
        port: PortId,
        crop: Option<CropRect>,
    ) -> Result<Vec<u16>, ChameleonError> {
        self.capture_video(port, 1, crop)?;
        Ok(self.captured_checksums(0, 1)?.remove(0))
    }

    /// Selects the port, settles its FSM, and reports the source
    /// resolution.
    pub fn detect_resolution(&mut self, port: PortId) -> Result<(u32, u32), ChameleonError> {
        self.select_port(port)?;
        self.flow_mut(port).get_resolution()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::FakeI2cBus;
    use crate::regmap::*;
    use crate::registers::FakeRegisterBank;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    struct Rig {
        bank: Rc<FakeRegisterBank>,
        bus: Rc<FakeI2cBus>,
        dir: tempfile::TempDir,
    }

    fn default_edid_bytes() -> Vec<u8> {
        let mut bytes = vec![0u8; 256];
        bytes[..8].copy_from_slice(&[0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00]);
        bytes[126] = 1;
        bytes
    }

    fn rig() -> (Rig, ChameleonDriver) {
        let bank = Rc::new(FakeRegisterBank::new());
        let bus = Rc::new(FakeI2cBus::new());
        let dir = tempfile::tempdir().unwrap();

        let edid_path = dir.path().join("default_edid.bin");
        std::fs::write(&edid_path, default_edid_bytes()).unwrap();

        let config = Config {
            default_edid_path: edid_path,
            pixeldump_path: dir.path().join("pixeldump"),
            ..Config::default()
        };
        let driver = ChameleonDriver::new(bank.clone(), bus.clone(), config).unwrap();
        (Rig { bank, bus, dir }, driver)
    }

    fn install_fake_pixeldump(rig: &Rig, script: &str) {
        let path = rig.dir.path().join("pixeldump");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(script.as_bytes()).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    /// Seeds DP1 as stable and locked at 1920x1080 so its FSM is a no-op.
    fn seed_dp1_locked(rig: &Rig) {
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
    fn new_fails_without_default_edid() {
        let bank = Rc::new(FakeRegisterBank::new());
        let bus = Rc::new(FakeI2cBus::new());
        let config = Config {
            default_edid_path: "/nonexistent/default_edid.bin".into(),
            ..Config::default()
        };
        assert!(matches!(
            ChameleonDriver::new(bank, bus, config),
            Err(ChameleonError::DefaultEdid { .. })
        ));
    }

    #[test]
    fn startup_unplugs_everything_and_applies_default_edid() {
        let (_rig, driver) = rig();
        for port in PortId::ALL {
            assert!(!driver.is_plugged(port).unwrap(), "{port} still plugged");
        }
        assert_eq!(driver.read_edid(PortId::Hdmi).unwrap(), default_edid_bytes());
        assert_eq!(driver.read_edid(PortId::Dp1).unwrap(), default_edid_bytes());
    }

    #[test]
    fn plug_then_is_plugged_round_trip() {
        let (_rig, mut driver) = rig();
        for port in [PortId::Dp1, PortId::Dp2, PortId::Hdmi] {
            driver.plug(port).unwrap();
            assert!(driver.is_plugged(port).unwrap());
            driver.unplug(port).unwrap();
            assert!(!driver.is_plugged(port).unwrap());
        }
    }

    #[test]
    fn edid_create_apply_read_round_trip() {
        let (_rig, mut driver) = rig();
        let mut custom = default_edid_bytes();
        custom[8] = 0x4c;
        custom[9] = 0x2d;
        let id = driver.create_edid(&custom).unwrap();
        assert_eq!(id, 1);
        driver.apply_edid(PortId::Hdmi, id).unwrap();
        assert_eq!(driver.read_edid(PortId::Hdmi).unwrap(), custom);
        // Shared content: the same record applies to another port too.
        driver.apply_edid(PortId::Dp1, id).unwrap();
        assert_eq!(driver.read_edid(PortId::Dp1).unwrap(), custom);
    }

    #[test]
    fn edid_destroy_frees_slot_for_reuse() {
        let (_rig, mut driver) = rig();
        let first = driver.create_edid(&default_edid_bytes()).unwrap();
        let second = driver.create_edid(&default_edid_bytes()).unwrap();
        assert_eq!((first, second), (1, 2));

        driver.destroy_edid(first).unwrap();
        let reused = driver.create_edid(&default_edid_bytes()).unwrap();
        assert_eq!(reused, first);
    }

    #[test]
    fn edid_default_slot_is_protected() {
        let (_rig, mut driver) = rig();
        assert!(matches!(
            driver.destroy_edid(EDID_ID_DEFAULT),
            Err(ChameleonError::ReservedEdidId)
        ));
        // Destroying a never-created or already-freed id is invalid too.
        assert!(matches!(
            driver.destroy_edid(9),
            Err(ChameleonError::InvalidEdidId(9))
        ));
        let id = driver.create_edid(&default_edid_bytes()).unwrap();
        driver.destroy_edid(id).unwrap();
        assert!(matches!(
            driver.destroy_edid(id),
            Err(ChameleonError::InvalidEdidId(_))
        ));
    }

    #[test]
    fn edid_wrong_size_is_rejected() {
        let (_rig, mut driver) = rig();
        assert!(matches!(
            driver.create_edid(&[0u8; 128]),
            Err(ChameleonError::EdidSize { got: 128, .. })
        ));
    }

    #[test]
    fn oversized_capture_is_rejected_before_any_register_write() {
        let (rig, mut driver) = rig();
        let crop = CropRect {
            x: 0,
            y: 0,
            width: 3840,
            height: 2160,
        };
        let max = driver.max_frame_limit(PortId::Hdmi, 3840, 2160);
        let bank_before = rig.bank.write_count();
        let bus_before = rig.bus.writes().len();

        let result = driver.capture_video(PortId::Hdmi, max + 1, Some(crop));
        assert!(matches!(
            result,
            Err(ChameleonError::FrameLimitExceeded { .. })
        ));
        assert_eq!(rig.bank.write_count(), bank_before);
        assert_eq!(rig.bus.writes().len(), bus_before);
    }

    #[test]
    fn unaligned_crop_is_rejected_before_any_register_write() {
        let (rig, mut driver) = rig();
        // HDMI starts in dual-pixel mode: x must be 16-aligned.
        let crop = CropRect {
            x: 8,
            y: 0,
            width: 16,
            height: 8,
        };
        let bank_before = rig.bank.write_count();
        let result = driver.capture_video(PortId::Hdmi, 1, Some(crop));
        assert!(matches!(result, Err(ChameleonError::UnalignedCrop { .. })));
        assert_eq!(rig.bank.write_count(), bank_before);
    }

    #[test]
    fn capture_on_unplugged_port_is_rejected() {
        let (rig, mut driver) = rig();
        seed_dp1_locked(&rig);
        let result = driver.capture_video(PortId::Dp1, 1, None);
        assert!(matches!(result, Err(ChameleonError::Unplugged(PortId::Dp1))));
    }

    #[test]
    fn capture_records_session_and_reads_frames_back() {
        let (rig, mut driver) = rig();
        seed_dp1_locked(&rig);
        install_fake_pixeldump(&rig, "#!/bin/sh\nprintf PIXELS > \"$1\"\n");
        driver.plug(PortId::Dp1).unwrap();
        rig.bank.seed(DUMP_REGS_BASE[0] + DUMP_REG_FRAME_COUNT, 3);

        driver.capture_video(PortId::Dp1, 3, None).unwrap();
        assert_eq!(driver.captured_resolution().unwrap(), (1920, 1080));
        let session = driver.captured_session().unwrap();
        assert_eq!(session.port, PortId::Dp1);
        assert!(!session.dual_pixel);

        assert_eq!(driver.read_captured_frame(0).unwrap(), b"PIXELS");
        assert!(matches!(
            driver.read_captured_frame(3),
            Err(ChameleonError::FrameIndexOutOfRange { index: 3, total: 3 })
        ));
    }

    #[test]
    fn captured_checksums_come_from_the_session_port() {
        let (rig, mut driver) = rig();
        seed_dp1_locked(&rig);
        driver.plug(PortId::Dp1).unwrap();
        rig.bank.seed(DUMP_REGS_BASE[0] + DUMP_REG_FRAME_COUNT, 1);
        let hash_base = DUMP_REGS_BASE[0] + DUMP_REG_HASH_BUF_BASE;
        rig.bank.seed(hash_base, 0x1111_2222);
        rig.bank.seed(hash_base + 4, 0x3333_4444);

        driver.capture_video(PortId::Dp1, 1, None).unwrap();
        let checksums = driver.captured_checksums(0, 1).unwrap();
        assert_eq!(checksums, vec![vec![0x3333, 0x4444, 0x1111, 0x2222]]);
    }

    #[test]
    fn read_without_session_is_rejected() {
        let (_rig, driver) = rig();
        assert!(matches!(
            driver.read_captured_frame(0),
            Err(ChameleonError::NoCaptureSession)
        ));
        assert!(matches!(
            driver.captured_resolution(),
            Err(ChameleonError::NoCaptureSession)
        ));
    }

    #[test]
    fn selecting_another_port_invalidates_the_session() {
        let (rig, mut driver) = rig();
        seed_dp1_locked(&rig);
        driver.plug(PortId::Dp1).unwrap();
        rig.bank.seed(DUMP_REGS_BASE[0] + DUMP_REG_FRAME_COUNT, 1);
        driver.capture_video(PortId::Dp1, 1, None).unwrap();
        assert!(driver.captured_session().is_some());

        // Seed DP2 as locked too, then move the selection there.
        rig.bus.seed(
            SLAVES_DP_RX[1],
            DP_REG_LINK_STATUS,
            DP_BIT_LANES_LOCKED | DP_BIT_MSA_VALID,
        );
        rig.bus
            .seed_bytes(SLAVES_DP_RX[1], DP_REG_MSA_HRES, &1280u16.to_le_bytes());
        rig.bus
            .seed_bytes(SLAVES_DP_RX[1], DP_REG_MSA_VRES, &720u16.to_le_bytes());
        rig.bank.seed(DUMP_REGS_BASE[1] + DUMP_REG_WIDTH, 1280);
        rig.bank.seed(DUMP_REGS_BASE[1] + DUMP_REG_HEIGHT, 720);
        driver.detect_resolution(PortId::Dp2).unwrap();

        assert!(driver.captured_session().is_none());
    }

    #[test]
    fn detect_resolution_selects_and_reports() {
        let (rig, mut driver) = rig();
        seed_dp1_locked(&rig);
        assert_eq!(
            driver.detect_resolution(PortId::Dp1).unwrap(),
            (1920, 1080)
        );
    }

    #[test]
    fn content_protection_dispatches_by_connector() {
        let (_rig, mut driver) = rig();
        driver.set_content_protection(PortId::Hdmi, true).unwrap();
        assert!(driver.is_content_protection_enabled(PortId::Hdmi).unwrap());
        assert!(matches!(
            driver.set_content_protection(PortId::Vga, true),
            Err(ChameleonError::Unsupported { .. })
        ));
        assert!(matches!(
            driver.set_content_protection(PortId::Dp1, true),
            Err(ChameleonError::Unsupported { .. })
        ));
    }

    #[test]
    fn vga_mode_only_applies_to_vga() {
        let (_rig, mut driver) = rig();
        driver
            .set_vga_mode(PortId::Vga, Some(VgaMode::Xga1024x768_60))
            .unwrap();
        assert!(matches!(
            driver.set_vga_mode(PortId::Hdmi, None),
            Err(ChameleonError::Unsupported { .. })
        ));
    }

    #[test]
    fn pixel_format_is_rgb() {
        let (_rig, driver) = rig();
        assert_eq!(driver.pixel_format(), "rgb");
    }
}
