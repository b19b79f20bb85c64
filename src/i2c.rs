//! I2C bus boundary for receiver chips and IO expanders.
//!
//! The driver depends on plain offset-addressed read/write primitives and
//! does not own the bus framing.  [`DevI2cBus`] talks to a Linux
//! `/dev/i2c-N` adapter; [`FakeI2cBus`] backs the unit tests.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::CString;
use std::rc::Rc;

use crate::error::ChameleonError;

/// `I2C_SLAVE` ioctl request on Linux.
const I2C_SLAVE: libc::c_ulong = 0x0703;

/// Offset-addressed access to slaves on one I2C bus.
pub trait I2cBus {
    /// Read `len` bytes starting at a register offset of a slave.
    fn read(&self, slave: u8, offset: u8, len: usize) -> Result<Vec<u8>, ChameleonError>;

    /// Write bytes starting at a register offset of a slave.
    fn write(&self, slave: u8, offset: u8, data: &[u8]) -> Result<(), ChameleonError>;
}

/// A Linux `/dev/i2c-N` adapter.
pub struct DevI2cBus {
    fd: libc::c_int,
    // The adapter remembers the last-addressed slave; cache it to skip
    // redundant I2C_SLAVE ioctls.
    current_slave: RefCell<Option<u8>>,
}

impl DevI2cBus {
    /// Open the adapter with the given bus index.
    pub fn open(bus_index: u32) -> Result<Self, ChameleonError> {
        let path = format!("/dev/i2c-{bus_index}");
        let c_path = CString::new(path.clone()).expect("device path has no NUL");

        // SAFETY: plain open of the adapter device; failure is checked.
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDWR) };
        if fd < 0 {
            return Err(ChameleonError::I2c {
                slave: 0,
                message: format!("open {path}: {}", std::io::Error::last_os_error()),
            });
        }

        Ok(Self {
            fd,
            current_slave: RefCell::new(None),
        })
    }

    fn select_slave(&self, slave: u8) -> Result<(), ChameleonError> {
        if *self.current_slave.borrow() == Some(slave) {
            return Ok(());
        }
        // SAFETY: I2C_SLAVE on an open adapter fd; failure is checked.
        let rc = unsafe { libc::ioctl(self.fd, I2C_SLAVE, libc::c_long::from(slave)) };
        if rc < 0 {
            return Err(ChameleonError::I2c {
                slave,
                message: format!("I2C_SLAVE: {}", std::io::Error::last_os_error()),
            });
        }
        *self.current_slave.borrow_mut() = Some(slave);
        Ok(())
    }

    fn write_raw(&self, slave: u8, buf: &[u8]) -> Result<(), ChameleonError> {
        // SAFETY: writing a local buffer to an open fd; short writes and
        // failures are checked.
        let written =
            unsafe { libc::write(self.fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if written != buf.len() as isize {
            return Err(ChameleonError::I2c {
                slave,
                message: format!("write: {}", std::io::Error::last_os_error()),
            });
        }
        Ok(())
    }
}

impl I2cBus for DevI2cBus {
    fn read(&self, slave: u8, offset: u8, len: usize) -> Result<Vec<u8>, ChameleonError> {
        self.select_slave(slave)?;
        // Combined write-then-read: point at the register, then read back.
        self.write_raw(slave, &[offset])?;
        let mut buf = vec![0u8; len];
        // SAFETY: reading into a local buffer from an open fd; short reads
        // and failures are checked.
        let got = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, len) };
        if got != len as isize {
            return Err(ChameleonError::I2c {
                slave,
                message: format!("read: {}", std::io::Error::last_os_error()),
            });
        }
        Ok(buf)
    }

    fn write(&self, slave: u8, offset: u8, data: &[u8]) -> Result<(), ChameleonError> {
        self.select_slave(slave)?;
        let mut buf = Vec::with_capacity(data.len() + 1);
        buf.push(offset);
        buf.extend_from_slice(data);
        self.write_raw(slave, &buf)
    }
}

impl Drop for DevI2cBus {
    fn drop(&mut self) {
        // SAFETY: closing the fd this struct opened.
        unsafe { libc::close(self.fd) };
    }
}

/// A handle to one slave on a shared bus, with byte-level helpers.
#[derive(Clone)]
pub struct I2cSlave {
    bus: Rc<dyn I2cBus>,
    addr: u8,
}

impl I2cSlave {
    pub fn new(bus: Rc<dyn I2cBus>, addr: u8) -> Self {
        Self { bus, addr }
    }

    /// The slave address on the bus.
    pub fn addr(&self) -> u8 {
        self.addr
    }

    pub fn get(&self, offset: u8, len: usize) -> Result<Vec<u8>, ChameleonError> {
        self.bus.read(self.addr, offset, len)
    }

    pub fn set(&self, offset: u8, data: &[u8]) -> Result<(), ChameleonError> {
        self.bus.write(self.addr, offset, data)
    }

    pub fn get_byte(&self, offset: u8) -> Result<u8, ChameleonError> {
        Ok(self.get(offset, 1)?[0])
    }

    pub fn set_byte(&self, offset: u8, value: u8) -> Result<(), ChameleonError> {
        self.set(offset, &[value])
    }

    /// Read a 16-bit little-endian value from two adjacent registers.
    pub fn get_word(&self, offset: u8) -> Result<u16, ChameleonError> {
        let bytes = self.get(offset, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Write a 16-bit little-endian value to two adjacent registers.
    pub fn set_word(&self, offset: u8, value: u16) -> Result<(), ChameleonError> {
        self.set(offset, &value.to_le_bytes())
    }

    pub fn set_mask_byte(&self, offset: u8, mask: u8) -> Result<(), ChameleonError> {
        let value = self.get_byte(offset)?;
        self.set_byte(offset, value | mask)
    }

    pub fn clear_mask_byte(&self, offset: u8, mask: u8) -> Result<(), ChameleonError> {
        let value = self.get_byte(offset)?;
        self.set_byte(offset, value & !mask)
    }
}

/// An in-memory bus for tests: a register file per slave plus a write
/// journal of (slave, offset, bytes) triples.
#[derive(Default)]
pub struct FakeI2cBus {
    mem: RefCell<HashMap<(u8, u8), u8>>,
    journal: RefCell<Vec<(u8, u8, Vec<u8>)>>,
}

impl FakeI2cBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a slave register without journaling a write.
    pub fn seed(&self, slave: u8, offset: u8, value: u8) {
        self.mem.borrow_mut().insert((slave, offset), value);
    }

    /// Seed consecutive slave registers without journaling writes.
    pub fn seed_bytes(&self, slave: u8, offset: u8, values: &[u8]) {
        let mut mem = self.mem.borrow_mut();
        for (i, &value) in values.iter().enumerate() {
            mem.insert((slave, offset.wrapping_add(i as u8)), value);
        }
    }

    /// All writes performed so far, in order.
    pub fn writes(&self) -> Vec<(u8, u8, Vec<u8>)> {
        self.journal.borrow().clone()
    }
}

impl I2cBus for FakeI2cBus {
    fn read(&self, slave: u8, offset: u8, len: usize) -> Result<Vec<u8>, ChameleonError> {
        let mem = self.mem.borrow();
        Ok((0..len)
            .map(|i| {
                mem.get(&(slave, offset.wrapping_add(i as u8)))
                    .copied()
                    .unwrap_or(0)
            })
            .collect())
    }

    fn write(&self, slave: u8, offset: u8, data: &[u8]) -> Result<(), ChameleonError> {
        {
            let mut mem = self.mem.borrow_mut();
            for (i, &byte) in data.iter().enumerate() {
                mem.insert((slave, offset.wrapping_add(i as u8)), byte);
            }
        }
        self.journal
            .borrow_mut()
            .push((slave, offset, data.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slave_word_round_trip() {
        let bus = Rc::new(FakeI2cBus::new());
        let slave = I2cSlave::new(bus, 0x48);
        slave.set_word(0x14, 0x2ee0).unwrap();
        assert_eq!(slave.get_word(0x14).unwrap(), 0x2ee0);
    }

    #[test]
    fn slave_mask_helpers() {
        let bus = Rc::new(FakeI2cBus::new());
        bus.seed(0x20, 0x02, 0b1010);
        let slave = I2cSlave::new(bus, 0x20);
        slave.set_mask_byte(0x02, 0b0001).unwrap();
        assert_eq!(slave.get_byte(0x02).unwrap(), 0b1011);
        slave.clear_mask_byte(0x02, 0b0010).unwrap();
        assert_eq!(slave.get_byte(0x02).unwrap(), 0b1001);
    }
}
