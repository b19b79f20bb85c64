//! Frame capture orchestration.
//!
//! [`FrameManager`] presents one virtual dumper over one or two physical
//! [`VideoDumper`] instances, hiding single- versus dual-pixel addressing
//! from the input flows: in dual-pixel mode each physical dumper only sees
//! half the horizontal samples, so widths, crops, and hashes all need
//! splitting or reassembly.

use std::time::Duration;

use tracing::debug;

use crate::dumper::VideoDumper;
use crate::error::ChameleonError;
use crate::poll::wait_until;
use crate::ports::PortId;

/// How often the frame-count register is sampled while waiting for a
/// capture to finish.
const DELAY_FRAME_COUNT_PROBE: Duration = Duration::from_millis(100);

/// A capture crop rectangle in full-frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    /// Checks the pixel-mode alignment rules before anything touches
    /// hardware.
    ///
    /// Single-pixel mode requires every field divisible by 8.  Dual-pixel
    /// mode requires x and width divisible by 16 (so each dumper's half
    /// stays 8-aligned) and y and height divisible by 8.
    pub fn validate(&self, dual_pixel_mode: bool) -> Result<(), ChameleonError> {
        let (x_align, y_align) = if dual_pixel_mode { (16, 8) } else { (8, 8) };
        if self.x % x_align != 0
            || self.width % x_align != 0
            || self.y % y_align != 0
            || self.height % y_align != 0
        {
            return Err(ChameleonError::UnalignedCrop {
                x: self.x,
                y: self.y,
                width: self.width,
                height: self.height,
                mode: if dual_pixel_mode {
                    "dual-pixel"
                } else {
                    "single-pixel"
                },
            });
        }
        Ok(())
    }

    /// The rectangle each physical dumper sees in dual-pixel mode.
    fn halved(&self) -> CropRect {
        CropRect {
            x: self.x / 2,
            y: self.y,
            width: self.width / 2,
            height: self.height,
        }
    }
}

/// Virtual dumper over the dumper instances participating in a flow.
///
/// In single-pixel mode `dumpers` holds the primary instance only; in
/// dual-pixel mode it holds the even-pixel instance first, then the odd.
pub struct FrameManager {
    port: PortId,
    dumpers: Vec<VideoDumper>,
    dual_pixel_mode: bool,
    hash_buffer_limit: Option<u32>,
}

impl FrameManager {
    pub fn new(port: PortId, dumpers: Vec<VideoDumper>, dual_pixel_mode: bool) -> Self {
        Self {
            port,
            dumpers,
            dual_pixel_mode,
            hash_buffer_limit: None,
        }
    }

    /// Resolution as measured by the FPGA.  Cooperating dumpers each see
    /// half the horizontal samples, so their widths add up.
    pub fn compute_resolution(&self) -> (u32, u32) {
        let width = self.dumpers.iter().map(VideoDumper::width).sum();
        let height = self.dumpers[0].height();
        (width, height)
    }

    /// Maximal number of frames of the given full-frame size that fit.
    pub fn max_frame_limit(&self, width: u32, height: u32) -> u32 {
        let width = if self.dual_pixel_mode { width / 2 } else { width };
        VideoDumper::max_frame_limit(width, height)
    }

    /// Live count of frames captured so far, for progress polling.
    pub fn frame_count(&self) -> u32 {
        self.dumpers[0].frame_count()
    }

    /// The hash-entry budget given to the last `start_dumping_frames`.
    pub fn hash_buffer_limit(&self) -> Option<u32> {
        self.hash_buffer_limit
    }

    /// Captures until `frame_limit` frames have been dumped or `timeout`
    /// elapses.
    ///
    /// The crop rectangle is validated before any register write.  On
    /// timeout the caller gets the captured-so-far count for diagnostics.
    pub fn dump_frames_to_limit(
        &mut self,
        frame_limit: u32,
        crop: Option<CropRect>,
        timeout: Duration,
    ) -> Result<(), ChameleonError> {
        self.setup_capture(frame_limit, crop, false)?;
        debug!("waiting for {frame_limit} frames on {}", self.port);
        wait_until(
            || self.frame_count() >= frame_limit,
            DELAY_FRAME_COUNT_PROBE,
            timeout,
        )
        .map_err(|_| ChameleonError::CaptureTimeout {
            port: self.port,
            requested: frame_limit,
            captured: self.frame_count(),
        })
    }

    /// Starts an open-ended capture that loops over a `frame_buffer_limit`
    /// frame window instead of stopping.
    ///
    /// `hash_buffer_limit` is the number of hash entries the caller intends
    /// to retain; the hash ring silently overwrites older entries, so the
    /// caller must drain hashes and call [`stop_dumping_frames`] before the
    /// ring laps them.
    ///
    /// [`stop_dumping_frames`]: FrameManager::stop_dumping_frames
    pub fn start_dumping_frames(
        &mut self,
        frame_buffer_limit: u32,
        crop: Option<CropRect>,
        hash_buffer_limit: u32,
    ) -> Result<(), ChameleonError> {
        self.setup_capture(frame_buffer_limit, crop, true)?;
        self.hash_buffer_limit = Some(hash_buffer_limit);
        Ok(())
    }

    /// Stops a continuous capture.
    pub fn stop_dumping_frames(&mut self) {
        for dumper in &self.dumpers {
            dumper.stop();
        }
        self.hash_buffer_limit = None;
    }

    /// Common path: validate, program crop and limits, arm the dumpers.
    fn setup_capture(
        &mut self,
        frame_limit: u32,
        crop: Option<CropRect>,
        enable_loop: bool,
    ) -> Result<(), ChameleonError> {
        if let Some(rect) = crop {
            rect.validate(self.dual_pixel_mode)?;
        }

        for dumper in &self.dumpers {
            dumper.stop();
        }
        for dumper in &self.dumpers {
            match crop {
                Some(rect) => {
                    let rect = if self.dual_pixel_mode {
                        rect.halved()
                    } else {
                        rect
                    };
                    dumper.enable_crop(rect.x, rect.y, rect.width, rect.height);
                }
                None => dumper.disable_crop(),
            }
            dumper.set_frame_limit(frame_limit, enable_loop);
        }
        for dumper in &self.dumpers {
            dumper.start(self.port, self.dual_pixel_mode);
        }
        Ok(())
    }

    /// Per-frame hashes for indices in `[start, stop)`, in capture order.
    ///
    /// Each frame's hash is four 16-bit values: in dual-pixel mode the
    /// even-pixel half followed by the odd-pixel half, in single-pixel mode
    /// the full 64-bit hash.
    pub fn frame_hashes(&self, start: u32, stop: u32) -> Vec<Vec<u16>> {
        (start..stop)
            .map(|index| {
                self.dumpers
                    .iter()
                    .flat_map(|dumper| dumper.frame_hash(index, self.dual_pixel_mode))
                    .collect()
            })
            .collect()
    }
}
