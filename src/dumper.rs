//! Video dumper control.
//!
//! Two dumper instances capture raw frames and per-frame checksums into
//! their halves of capture memory.  In single-pixel mode one instance (the
//! primary for the selected port) does all the work; in dual-pixel mode the
//! two instances each take alternating pixels and must be armed in
//! lockstep: the run-dual bit is a hardware barrier that only releases
//! capture once both instances have set it.

use std::rc::Rc;

use crate::ports::PortId;
use crate::regmap::{
    BYTES_PER_PIXEL, DUMP_BASE_ADDRESS, DUMP_BUFFER_SIZE, DUMP_HASH_BUF_SIZE, DUMP_REGS_BASE,
    DUMP_REG_CROP_XRANGE, DUMP_REG_CROP_YRANGE, DUMP_REG_CTRL, DUMP_REG_END_ADDR,
    DUMP_REG_FRAME_COUNT, DUMP_REG_HASH_BUF_BASE, DUMP_REG_HEIGHT, DUMP_REG_LIMIT, DUMP_REG_LOOP,
    DUMP_REG_START_ADDR, DUMP_REG_WIDTH, DUMP_START_ADDRESSES, DumpCtrl, PAGE_SIZE,
};
use crate::registers::RegisterBank;

//  Input                           | DP1 | DP2 | HDMI | VGA |
// -----------------------------------------------------------
//  (1) CLOCK                       | A   | B   | B    | A   |
// -----------------------------------------------------------
//  (2) SINGLE PIXEL DATA           | A   | B   | B    | A   |
//  (3) DUAL PIXEL EVEN PIXELS DATA | A   | B   | A    |     |
//  (4) DUAL PIXEL ODD PIXELS DATA  | B   | A   | B    |     |

/// Index of the dumper instance that is the primary in single-pixel mode.
pub fn primary_index(port: PortId) -> usize {
    match port {
        PortId::Dp1 => 0,
        PortId::Dp2 => 1,
        PortId::Hdmi => 1,
        PortId::Vga => 0,
    }
}

/// Index of the dumper instance that takes even pixels in dual-pixel mode.
pub fn even_pixels_index(port: PortId) -> usize {
    match port {
        PortId::Dp1 => 0,
        PortId::Dp2 => 1,
        PortId::Hdmi => 0,
        PortId::Vga => 0,
    }
}

/// Base address arguments for the external pixel-readback tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelDumpArgs {
    /// Capture buffer holding the frame (even pixels in dual-pixel mode).
    pub base: u32,
    /// Odd-pixel capture buffer; only set in dual-pixel mode.
    pub secondary: Option<u32>,
}

impl PixelDumpArgs {
    /// The same buffers advanced by a byte offset, to address one frame
    /// within a multi-frame capture.
    pub fn offset_by(&self, offset: u32) -> Self {
        Self {
            base: self.base + offset,
            secondary: self.secondary.map(|addr| addr + offset),
        }
    }
}

/// One video dumper instance (index 0 = "A", 1 = "B").
#[derive(Clone)]
pub struct VideoDumper {
    mem: Rc<dyn RegisterBank>,
    index: usize,
}

impl VideoDumper {
    pub fn new(mem: Rc<dyn RegisterBank>, index: usize) -> Self {
        assert!(index < 2, "only dumpers 0 and 1 exist");
        Self { mem, index }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    fn reg(&self, offset: u32) -> u32 {
        DUMP_REGS_BASE[self.index] + offset
    }

    /// Stops dumping.
    pub fn stop(&self) {
        self.mem.clear_mask(
            self.reg(DUMP_REG_CTRL),
            (DumpCtrl::RUN | DumpCtrl::RUN_DUAL).bits(),
        );
    }

    /// Starts dumping.
    ///
    /// In dual-pixel mode this sets the run-dual bit; the FPGA holds
    /// capture until both instances have set theirs.  In single-pixel mode
    /// only the primary instance runs; on the other instance this is a
    /// no-op.
    pub fn start(&self, port: PortId, dual_pixel_mode: bool) {
        let bit = if dual_pixel_mode {
            DumpCtrl::RUN_DUAL
        } else if self.index == primary_index(port) {
            DumpCtrl::RUN
        } else {
            return;
        };
        self.mem.set_mask(self.reg(DUMP_REG_CTRL), bit.bits());
    }

    /// Selects the given port for dumping.
    ///
    /// Stops the dumper, reprograms the capture-memory range, resets the
    /// frame limit to a safe single-frame default, picks the clock lane and
    /// hash width for this instance's role, then starts.
    pub fn select(&self, port: PortId, dual_pixel_mode: bool) {
        self.stop();
        let start = DUMP_START_ADDRESSES[self.index];
        self.mem.write(self.reg(DUMP_REG_START_ADDR), start);
        self.mem
            .write(self.reg(DUMP_REG_END_ADDR), start + DUMP_BUFFER_SIZE);
        self.set_frame_limit(1, false);

        let mut ctrl = if self.index == primary_index(port) {
            DumpCtrl::empty()
        } else {
            DumpCtrl::CLK_ALT
        };
        // One dumper covering the whole frame carries the full hash width;
        // cooperating dumpers each carry a 32-bit half.
        if !dual_pixel_mode {
            ctrl |= DumpCtrl::HASH_64;
        }
        self.mem.write(self.reg(DUMP_REG_CTRL), ctrl.bits());
        self.start(port, dual_pixel_mode);
    }

    /// Sets the total-frame limit and whether capture loops back to the
    /// start of the buffer when it is reached.
    pub fn set_frame_limit(&self, frame_limit: u32, enable_loop: bool) {
        self.mem.write(self.reg(DUMP_REG_LIMIT), frame_limit);
        self.mem
            .write(self.reg(DUMP_REG_LOOP), if enable_loop { 1 } else { 0 });
    }

    /// Only dump pixels (and hash) within the given rectangle.
    pub fn enable_crop(&self, x: u32, y: u32, width: u32, height: u32) {
        let right = x + width;
        let bottom = y + height;
        self.mem
            .write(self.reg(DUMP_REG_CROP_XRANGE), right << 16 | x);
        self.mem
            .write(self.reg(DUMP_REG_CROP_YRANGE), bottom << 16 | y);
        self.mem
            .set_mask(self.reg(DUMP_REG_CTRL), DumpCtrl::CROP.bits());
    }

    pub fn disable_crop(&self) {
        self.mem
            .clear_mask(self.reg(DUMP_REG_CTRL), DumpCtrl::CROP.bits());
    }

    /// FPGA-measured width of the incoming video.
    pub fn width(&self) -> u32 {
        self.mem.read(self.reg(DUMP_REG_WIDTH))
    }

    /// FPGA-measured height of the incoming video.
    pub fn height(&self) -> u32 {
        self.mem.read(self.reg(DUMP_REG_HEIGHT))
    }

    /// Total count of frames captured so far.
    pub fn frame_count(&self) -> u32 {
        self.mem.read(self.reg(DUMP_REG_FRAME_COUNT))
    }

    /// Reads the frame hash for the given frame index as 16-bit halves.
    ///
    /// The hash ring holds the most recent hashes only; the FPGA silently
    /// overwrites old slots when the index wraps, so callers must drain
    /// hashes before the wrap laps them.  The index itself may exceed the
    /// ring size.
    pub fn frame_hash(&self, index: u32, dual_pixel_mode: bool) -> Vec<u16> {
        let hash_addr =
            |i: u32| self.reg(DUMP_REG_HASH_BUF_BASE + (i.wrapping_mul(4)) % DUMP_HASH_BUF_SIZE);

        if dual_pixel_mode {
            // 32-bit hash: this instance's half of the frame.
            let hash = self.mem.read(hash_addr(index));
            vec![(hash >> 16) as u16, hash as u16]
        } else {
            // 64-bit hash spans two adjacent slots.
            let low = self.mem.read(hash_addr(index * 2));
            let high = self.mem.read(hash_addr(index * 2 + 1));
            vec![
                (high >> 16) as u16,
                high as u16,
                (low >> 16) as u16,
                low as u16,
            ]
        }
    }

    /// Maximal number of frames of the given size that fit in the capture
    /// buffer.  Frames are page-rounded in memory.
    pub fn max_frame_limit(width: u32, height: u32) -> u32 {
        let frame_size = width * height * BYTES_PER_PIXEL;
        let pages = frame_size.div_ceil(PAGE_SIZE).max(1);
        DUMP_BUFFER_SIZE / (pages * PAGE_SIZE)
    }

    /// Base addresses the external pixel-readback tool needs for this port
    /// and pixel mode.
    pub fn pixel_dump_args(port: PortId, dual_pixel_mode: bool) -> PixelDumpArgs {
        if dual_pixel_mode {
            let even = even_pixels_index(port);
            PixelDumpArgs {
                base: DUMP_BASE_ADDRESS + DUMP_START_ADDRESSES[even],
                secondary: Some(DUMP_BASE_ADDRESS + DUMP_START_ADDRESSES[1 - even]),
            }
        } else {
            let primary = primary_index(port);
            PixelDumpArgs {
                base: DUMP_BASE_ADDRESS + DUMP_START_ADDRESSES[primary],
                secondary: None,
            }
        }
    }
}
