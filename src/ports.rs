//! Input connector identifiers.

use std::fmt;

/// Identifier of a video input connector on the board.
///
/// Assigned at board layout time; every per-port table in [`crate::regmap`]
/// and the dumper primaryship tables are keyed by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PortId {
    Dp1,
    Dp2,
    Hdmi,
    Vga,
}

impl PortId {
    /// All video input ports, in probe order.
    pub const ALL: [PortId; 4] = [PortId::Dp1, PortId::Dp2, PortId::Hdmi, PortId::Vga];

    /// True for ports with a physical HPD line (everything but VGA).
    pub fn has_hpd_line(self) -> bool {
        !matches!(self, PortId::Vga)
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "dp1" | "dp" => Some(Self::Dp1),
            "dp2" => Some(Self::Dp2),
            "hdmi" => Some(Self::Hdmi),
            "vga" | "crt" => Some(Self::Vga),
            _ => None,
        }
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dp1 => write!(f, "DP1"),
            Self::Dp2 => write!(f, "DP2"),
            Self::Hdmi => write!(f, "HDMI"),
            Self::Vga => write!(f, "VGA"),
        }
    }
}
