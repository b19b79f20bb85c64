//! Register bank abstraction over the FPGA's memory-mapped address space.
//!
//! Every FPGA subsystem goes through [`RegisterBank`] rather than a shared
//! singleton, so tests can substitute [`FakeRegisterBank`] without global
//! state.  Accesses carry no error return: an FPGA that stops answering the
//! bus has no recovery strategy, so setup failures are surfaced once at
//! construction and a fault on a mapped page takes the process down.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::CString;

use crate::error::ChameleonError;
use crate::regmap::{REG_APERTURE_BASE, REG_APERTURE_SIZE};

/// Typed word access to the flat FPGA register space.
pub trait RegisterBank {
    /// Read the 32-bit word at a physical register address.
    fn read(&self, addr: u32) -> u32;

    /// Write the 32-bit word at a physical register address.
    fn write(&self, addr: u32, value: u32);

    /// Set the given bits, leaving the rest of the word untouched.
    fn set_mask(&self, addr: u32, bits: u32) {
        let value = self.read(addr);
        self.write(addr, value | bits);
    }

    /// Clear the given bits, leaving the rest of the word untouched.
    fn clear_mask(&self, addr: u32, bits: u32) {
        let value = self.read(addr);
        self.write(addr, value & !bits);
    }
}

/// The real register bank: an mmap of the FPGA aperture out of `/dev/mem`.
pub struct MappedRegisterBank {
    base: *mut u32,
    fd: libc::c_int,
}

impl MappedRegisterBank {
    /// Map the FPGA register aperture from the given memory device.
    pub fn open(path: &str) -> Result<Self, ChameleonError> {
        let c_path = CString::new(path).map_err(|e| ChameleonError::MemoryMap {
            path: path.to_string(),
            message: e.to_string(),
        })?;

        // SAFETY: plain open/mmap of the device file; failures are checked.
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDWR | libc::O_SYNC) };
        if fd < 0 {
            return Err(ChameleonError::MemoryMap {
                path: path.to_string(),
                message: std::io::Error::last_os_error().to_string(),
            });
        }

        let mapped = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                REG_APERTURE_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                REG_APERTURE_BASE as libc::off_t,
            )
        };
        if mapped == libc::MAP_FAILED {
            let message = std::io::Error::last_os_error().to_string();
            unsafe { libc::close(fd) };
            return Err(ChameleonError::MemoryMap {
                path: path.to_string(),
                message,
            });
        }

        Ok(Self {
            base: mapped as *mut u32,
            fd,
        })
    }

    fn word_ptr(&self, addr: u32) -> *mut u32 {
        let offset = addr.checked_sub(REG_APERTURE_BASE).unwrap_or_else(|| {
            panic!("register address 0x{addr:08x} below the FPGA aperture")
        });
        assert!(
            (offset as usize) < REG_APERTURE_SIZE,
            "register address 0x{addr:08x} beyond the FPGA aperture"
        );
        assert!(addr % 4 == 0, "unaligned register address 0x{addr:08x}");
        // SAFETY: offset is bounds-checked against the mapping above.
        unsafe { self.base.add(offset as usize / 4) }
    }
}

impl RegisterBank for MappedRegisterBank {
    fn read(&self, addr: u32) -> u32 {
        // SAFETY: word_ptr checks the address against the mapping.
        unsafe { self.word_ptr(addr).read_volatile() }
    }

    fn write(&self, addr: u32, value: u32) {
        // SAFETY: word_ptr checks the address against the mapping.
        unsafe { self.word_ptr(addr).write_volatile(value) }
    }
}

impl Drop for MappedRegisterBank {
    fn drop(&mut self) {
        // SAFETY: unmapping the region this struct mapped at construction.
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, REG_APERTURE_SIZE);
            libc::close(self.fd);
        }
    }
}

/// An in-memory register file for tests and development without the board.
///
/// Reads return the last written value (or a seeded one), defaulting to 0.
/// Every write is journaled in order, so tests can assert on the exact
/// register traffic an operation produced, or on its absence.
#[derive(Default)]
pub struct FakeRegisterBank {
    regs: RefCell<HashMap<u32, u32>>,
    journal: RefCell<Vec<(u32, u32)>>,
}

impl FakeRegisterBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a register value without journaling a write.
    pub fn seed(&self, addr: u32, value: u32) {
        self.regs.borrow_mut().insert(addr, value);
    }

    /// All writes performed so far, in order, as (addr, value) pairs.
    pub fn writes(&self) -> Vec<(u32, u32)> {
        self.journal.borrow().clone()
    }

    /// Number of writes performed so far.
    pub fn write_count(&self) -> usize {
        self.journal.borrow().len()
    }
}

impl RegisterBank for FakeRegisterBank {
    fn read(&self, addr: u32) -> u32 {
        self.regs.borrow().get(&addr).copied().unwrap_or(0)
    }

    fn write(&self, addr: u32, value: u32) {
        self.regs.borrow_mut().insert(addr, value);
        self.journal.borrow_mut().push((addr, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_read_defaults_to_zero() {
        let bank = FakeRegisterBank::new();
        assert_eq!(bank.read(0xff21_0000), 0);
    }

    #[test]
    fn fake_write_then_read() {
        let bank = FakeRegisterBank::new();
        bank.write(0xff21_0000, 0xdead_beef);
        assert_eq!(bank.read(0xff21_0000), 0xdead_beef);
        assert_eq!(bank.writes(), vec![(0xff21_0000, 0xdead_beef)]);
    }

    #[test]
    fn set_mask_preserves_other_bits() {
        let bank = FakeRegisterBank::new();
        bank.seed(0x1000, 0b0101);
        bank.set_mask(0x1000, 0b0010);
        assert_eq!(bank.read(0x1000), 0b0111);
    }

    #[test]
    fn clear_mask_preserves_other_bits() {
        let bank = FakeRegisterBank::new();
        bank.seed(0x1000, 0b0111);
        bank.clear_mask(0x1000, 0b0010);
        assert_eq!(bank.read(0x1000), 0b0101);
    }
}
