//! Hotplug-detect line control.
//!
//! One register bit per port emulates the sink-side HPD line.  Pulse trains
//! are driven by software-timed register toggles (there is no hardware
//! pulse generator), so pulse widths are best-effort: precision is bounded
//! by scheduler latency, not cycle-exact.

use std::rc::Rc;
use std::time::Duration;

use tracing::debug;

use crate::ports::PortId;
use crate::regmap::{
    HPD_BASE, HPD_OFFSET_DP1, HPD_OFFSET_DP2, HPD_OFFSET_HDMI, HPD_VALUE_PLUG, HPD_VALUE_UNPLUG,
};
use crate::registers::RegisterBank;

/// Level the HPD line is left at after a pulse train.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HpdLevel {
    /// Unplugged.
    Low,
    /// Plugged.
    High,
}

impl HpdLevel {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "0" | "low" => Some(Self::Low),
            "1" | "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// Per-port HPD line state and timed pulse generation.
#[derive(Clone)]
pub struct HpdController {
    mem: Rc<dyn RegisterBank>,
}

impl HpdController {
    pub fn new(mem: Rc<dyn RegisterBank>) -> Self {
        Self { mem }
    }

    /// Register address of the port's HPD bit.  VGA has no HPD line; its
    /// flow never routes here.
    fn reg(port: PortId) -> u32 {
        let offset = match port {
            PortId::Dp1 => HPD_OFFSET_DP1,
            PortId::Dp2 => HPD_OFFSET_DP2,
            PortId::Hdmi => HPD_OFFSET_HDMI,
            PortId::Vga => panic!("VGA has no HPD line"),
        };
        HPD_BASE + offset
    }

    /// Returns whether the HPD line is asserted.
    pub fn is_plugged(&self, port: PortId) -> bool {
        self.mem.read(Self::reg(port)) == HPD_VALUE_PLUG
    }

    /// Asserts the HPD line, emulating a plug.
    pub fn plug(&self, port: PortId) {
        self.mem.write(Self::reg(port), HPD_VALUE_PLUG);
    }

    /// Deasserts the HPD line, emulating an unplug.
    pub fn unplug(&self, port: PortId) {
        self.mem.write(Self::reg(port), HPD_VALUE_UNPLUG);
    }

    /// Fires `repeat` deassert/assert cycles (low -> high -> low -> ...),
    /// ending at `end_level`.
    ///
    /// `assert_us` falls back to `deassert_us` when not given.  Blocks for
    /// the full pulse-train duration.
    pub fn fire_hpd_pulse(
        &self,
        port: PortId,
        deassert_us: u64,
        assert_us: Option<u64>,
        repeat: u32,
        end_level: HpdLevel,
    ) {
        let assert_us = assert_us.unwrap_or(deassert_us);
        debug!(
            "HPD pulse on {port}: {repeat}x {deassert_us}us low / {assert_us}us high, \
             end {end_level:?}"
        );
        for _ in 0..repeat {
            self.unplug(port);
            std::thread::sleep(Duration::from_micros(deassert_us));
            self.plug(port);
            std::thread::sleep(Duration::from_micros(assert_us));
        }
        // The loop leaves the line high.
        if end_level == HpdLevel::Low {
            self.unplug(port);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::FakeRegisterBank;

    fn controller() -> (Rc<FakeRegisterBank>, HpdController) {
        let bank = Rc::new(FakeRegisterBank::new());
        let hpd = HpdController::new(bank.clone());
        (bank, hpd)
    }

    #[test]
    fn plug_then_is_plugged() {
        let (_, hpd) = controller();
        hpd.plug(PortId::Hdmi);
        assert!(hpd.is_plugged(PortId::Hdmi));
    }

    #[test]
    fn unplug_then_is_plugged_false() {
        let (_, hpd) = controller();
        hpd.plug(PortId::Dp1);
        hpd.unplug(PortId::Dp1);
        assert!(!hpd.is_plugged(PortId::Dp1));
    }

    #[test]
    fn ports_use_distinct_registers() {
        let (_, hpd) = controller();
        hpd.plug(PortId::Dp1);
        assert!(hpd.is_plugged(PortId::Dp1));
        assert!(!hpd.is_plugged(PortId::Dp2));
        assert!(!hpd.is_plugged(PortId::Hdmi));
    }

    #[test]
    fn pulse_train_toggles_and_ends_low() {
        let (bank, hpd) = controller();
        hpd.fire_hpd_pulse(PortId::Dp1, 1000, None, 3, HpdLevel::Low);

        let reg = HPD_BASE + HPD_OFFSET_DP1;
        let expected: Vec<(u32, u32)> = vec![
            (reg, 0),
            (reg, 1),
            (reg, 0),
            (reg, 1),
            (reg, 0),
            (reg, 1),
            (reg, 0), // end level low
        ];
        assert_eq!(bank.writes(), expected);
        assert!(!hpd.is_plugged(PortId::Dp1));
    }

    #[test]
    fn pulse_train_ends_high_without_extra_write() {
        let (bank, hpd) = controller();
        hpd.fire_hpd_pulse(PortId::Hdmi, 500, Some(200), 2, HpdLevel::High);
        // 2 cycles = 4 writes, no trailing unplug.
        assert_eq!(bank.write_count(), 4);
        assert!(hpd.is_plugged(PortId::Hdmi));
    }
}
