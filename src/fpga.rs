//! FPGA controller facade and its small subsystems.
//!
//! [`FpgaController`] bundles one instance of every FPGA subsystem and is
//! the only channel through which input flows touch the hardware.  It is
//! cheap to clone since the subsystems share the register-bank handle.

use std::rc::Rc;

use crate::dumper::VideoDumper;
use crate::edid::EdidBlock;
use crate::hpd::HpdController;
use crate::ports::PortId;
use crate::regmap::{
    EDID_CTRL_OPERATE, EDID_CTRL_RESET, EDID_HDMI_BASE, EDID_REG_CTRL, EDID_REG_MEM, EDID_SIZE,
    EDID_VGA_BASE, VPASS_BIT_CLK_B, VPASS_BIT_DATA_B, VPASS_REG_CTRL,
};
use crate::registers::RegisterBank;

/// Selects which connector's clock/data lane pair feeds the analog
/// pass-through output on the main board.
#[derive(Clone)]
pub struct VideoPasser {
    mem: Rc<dyn RegisterBank>,
}

impl VideoPasser {
    pub fn new(mem: Rc<dyn RegisterBank>) -> Self {
        Self { mem }
    }

    /// Wires the given port through to the pass-through output.
    pub fn select(&self, port: PortId) {
        let value = match port {
            PortId::Dp1 => 0,
            PortId::Dp2 => VPASS_BIT_CLK_B | VPASS_BIT_DATA_B,
            PortId::Hdmi => VPASS_BIT_CLK_B,
            PortId::Vga => 0,
        };
        self.mem.write(VPASS_REG_CTRL, value);
    }
}

/// One FPGA-hosted EDID memory with its operate strobe.
///
/// While disabled the memory is held in reset and the port does not answer
/// DDC reads, which is the DUT-visible symptom of "no EDID".
#[derive(Clone)]
pub struct EdidController {
    mem: Rc<dyn RegisterBank>,
    base: u32,
}

impl EdidController {
    pub fn new(mem: Rc<dyn RegisterBank>, base: u32) -> Self {
        Self { mem, base }
    }

    /// Writes the 256-byte EDID content and latches it.
    pub fn write_edid(&self, edid: &EdidBlock) {
        for (i, chunk) in edid.as_bytes().chunks_exact(4).enumerate() {
            let word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.mem.write(self.base + EDID_REG_MEM + (i as u32) * 4, word);
        }
        self.mem.write(self.base + EDID_REG_CTRL, EDID_CTRL_OPERATE);
    }

    /// Reads the EDID content back out of the register window.
    pub fn read_edid(&self) -> EdidBlock {
        let mut bytes = Vec::with_capacity(EDID_SIZE);
        for offset in (0..EDID_SIZE as u32).step_by(4) {
            let word = self.mem.read(self.base + EDID_REG_MEM + offset);
            bytes.extend_from_slice(&word.to_be_bytes());
        }
        EdidBlock::new(&bytes).expect("register window is exactly one EDID")
    }

    /// Serves the stored EDID over DDC.
    pub fn enable(&self) {
        self.mem.write(self.base + EDID_REG_CTRL, EDID_CTRL_OPERATE);
    }

    /// Holds the EDID memory in reset; DDC reads fail while disabled.
    pub fn disable(&self) {
        self.mem.write(self.base + EDID_REG_CTRL, EDID_CTRL_RESET);
    }
}

/// Facade owning one instance of every FPGA subsystem.
#[derive(Clone)]
pub struct FpgaController {
    pub hpd: HpdController,
    pub vpass: VideoPasser,
    pub vdump0: VideoDumper,
    pub vdump1: VideoDumper,
    pub hdmi_edid: EdidController,
    pub vga_edid: EdidController,
}

impl FpgaController {
    pub fn new(mem: Rc<dyn RegisterBank>) -> Self {
        Self {
            hpd: HpdController::new(mem.clone()),
            vpass: VideoPasser::new(mem.clone()),
            vdump0: VideoDumper::new(mem.clone(), 0),
            vdump1: VideoDumper::new(mem.clone(), 1),
            hdmi_edid: EdidController::new(mem.clone(), EDID_HDMI_BASE),
            vga_edid: EdidController::new(mem, EDID_VGA_BASE),
        }
    }

    /// The dumper instance with the given index.
    pub fn vdump(&self, index: usize) -> &VideoDumper {
        match index {
            0 => &self.vdump0,
            1 => &self.vdump1,
            _ => panic!("only dumpers 0 and 1 exist"),
        }
    }
}
