//! EDID blocks and per-connector EDID emulators.
//!
//! The HDMI and VGA EDIDs live in FPGA-hosted memories behind
//! [`crate::fpga::EdidController`]; the DisplayPort EDID is hosted by the
//! receiver itself and programmed over I2C.  All three present the same
//! enable/disable/write/read surface to the input flows.

use crate::error::ChameleonError;
use crate::fpga::EdidController;
use crate::i2c::I2cSlave;
use crate::regmap::{DP_EDID_WRITE_PAGE, EDID_SIZE};
use crate::rx::DpRx;

/// A complete EDID: base block plus one extension, exactly 256 bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct EdidBlock {
    bytes: [u8; EDID_SIZE],
}

impl EdidBlock {
    /// Validates the length; content is opaque to the driver.
    pub fn new(data: &[u8]) -> Result<Self, ChameleonError> {
        let bytes: [u8; EDID_SIZE] =
            data.try_into().map_err(|_| ChameleonError::EdidSize {
                expected: EDID_SIZE,
                got: data.len(),
            })?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for EdidBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "EdidBlock({:02x}{:02x}{:02x}{:02x}...)",
            self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]
        )
    }
}

/// The emulation surface every connector's EDID store presents.
pub trait EdidEmulator {
    /// Starts answering DDC/AUX reads with the stored EDID.
    fn enable(&mut self) -> Result<(), ChameleonError>;

    /// Stops answering; the DUT sees EDID read failures while disabled.
    fn disable(&mut self) -> Result<(), ChameleonError>;

    fn write_edid(&mut self, edid: &EdidBlock) -> Result<(), ChameleonError>;

    fn read_edid(&self) -> Result<EdidBlock, ChameleonError>;
}

/// DisplayPort EDID: an emulated DDC EEPROM the receiver serves over AUX,
/// gated by the receiver's EDID-enable bit.
pub struct DpEdid {
    rx: DpRx,
    eeprom: I2cSlave,
}

impl DpEdid {
    pub fn new(rx: DpRx, eeprom: I2cSlave) -> Self {
        Self { rx, eeprom }
    }
}

impl EdidEmulator for DpEdid {
    fn enable(&mut self) -> Result<(), ChameleonError> {
        self.rx.enable_edid()
    }

    fn disable(&mut self) -> Result<(), ChameleonError> {
        self.rx.disable_edid()
    }

    fn write_edid(&mut self, edid: &EdidBlock) -> Result<(), ChameleonError> {
        // The EEPROM takes one write page per transfer.
        for (page, chunk) in edid.as_bytes().chunks(DP_EDID_WRITE_PAGE).enumerate() {
            let offset = (page * DP_EDID_WRITE_PAGE) as u8;
            self.eeprom.set(offset, chunk)?;
        }
        Ok(())
    }

    fn read_edid(&self) -> Result<EdidBlock, ChameleonError> {
        EdidBlock::new(&self.eeprom.get(0, EDID_SIZE)?)
    }
}

/// An FPGA-hosted EDID memory (HDMI or VGA family).
pub struct FpgaEdid {
    ctrl: EdidController,
}

impl FpgaEdid {
    pub fn new(ctrl: EdidController) -> Self {
        Self { ctrl }
    }
}

impl EdidEmulator for FpgaEdid {
    fn enable(&mut self) -> Result<(), ChameleonError> {
        self.ctrl.enable();
        Ok(())
    }

    fn disable(&mut self) -> Result<(), ChameleonError> {
        self.ctrl.disable();
        Ok(())
    }

    fn write_edid(&mut self, edid: &EdidBlock) -> Result<(), ChameleonError> {
        self.ctrl.write_edid(edid);
        Ok(())
    }

    fn read_edid(&self) -> Result<EdidBlock, ChameleonError> {
        Ok(self.ctrl.read_edid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::FakeI2cBus;
    use crate::regmap::{EDID_HDMI_BASE, SLAVES_DP_EDID, SLAVES_DP_RX};
    use crate::registers::FakeRegisterBank;
    use std::rc::Rc;

    fn sample_edid() -> EdidBlock {
        let mut bytes = vec![0u8; EDID_SIZE];
        bytes[..8].copy_from_slice(&[0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00]);
        bytes[126] = 1; // one extension block
        EdidBlock::new(&bytes).unwrap()
    }

    #[test]
    fn edid_block_rejects_wrong_sizes() {
        assert!(matches!(
            EdidBlock::new(&[0u8; 128]),
            Err(ChameleonError::EdidSize { got: 128, .. })
        ));
        assert!(matches!(
            EdidBlock::new(&[0u8; 257]),
            Err(ChameleonError::EdidSize { got: 257, .. })
        ));
        assert!(EdidBlock::new(&[0u8; 256]).is_ok());
    }

    #[test]
    fn dp_edid_round_trip() {
        let bus = Rc::new(FakeI2cBus::new());
        let rx = DpRx::new(bus.clone(), SLAVES_DP_RX[0]);
        let eeprom = I2cSlave::new(bus, SLAVES_DP_EDID[0]);
        let mut edid = DpEdid::new(rx, eeprom);
        let block = sample_edid();
        edid.write_edid(&block).unwrap();
        assert_eq!(edid.read_edid().unwrap(), block);
    }

    #[test]
    fn fpga_edid_round_trip() {
        let bank = Rc::new(FakeRegisterBank::new());
        let mut edid = FpgaEdid::new(EdidController::new(bank, EDID_HDMI_BASE));
        let block = sample_edid();
        edid.write_edid(&block).unwrap();
        assert_eq!(edid.read_edid().unwrap(), block);
    }
}
