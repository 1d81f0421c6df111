//! Frame geometry, pixel storage and channel layout.
//!
//! [`FrameLayout`] describes what the sensor reads out (crop rectangle,
//! binning, pixel format) and derives every size from it. [`FrameBuffer`]
//! owns the bytes for one frame and is moved, never shared, between the
//! party filling it and the party publishing it.
//!
//! Buffer size follows the vendor convention of a fixed tail margin:
//!
//! ```text
//! ceil(w / bin_x) * ceil(h / bin_y) * (bpp / 8) * channels + margin
//! ```

use crate::device::{DeviceInfo, PixelFormat};
use crate::error::{CaptureError, Result};
use std::time::Instant;

/// Tail margin appended to every frame buffer.
pub const DEFAULT_SAFETY_MARGIN: usize = 512;

/// Crop rectangle in unbinned sensor pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    /// Crop of `width` x `height` pixels at (`x`, `y`).
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The whole sensor.
    pub fn full(info: &DeviceInfo) -> Self {
        Self::new(0, 0, info.max_width, info.max_height)
    }
}

/// Horizontal and vertical binning factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binning {
    /// Columns per output pixel.
    pub x: u32,
    /// Rows per output pixel.
    pub y: u32,
}

impl Binning {
    /// No binning (1x1).
    pub const NONE: Binning = Binning { x: 1, y: 1 };

    /// Bin `x` columns and `y` rows together.
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl Default for Binning {
    fn default() -> Self {
        Self::NONE
    }
}

/// Byte count of a frame buffer including the tail margin.
pub fn frame_buffer_size(
    width: u32,
    height: u32,
    binning: Binning,
    bits_per_pixel: u8,
    channels: u8,
    margin: usize,
) -> usize {
    let binned_w = width.div_ceil(binning.x.max(1)) as usize;
    let binned_h = height.div_ceil(binning.y.max(1)) as usize;
    binned_w * binned_h * usize::from(bits_per_pixel / 8) * usize::from(channels) + margin
}

/// Readout geometry derived from crop, binning and pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    /// Crop in unbinned pixels.
    pub roi: Roi,
    /// Binning factors.
    pub binning: Binning,
    /// Pixel format delivered by the device.
    pub format: PixelFormat,
    /// Bytes appended past the payload as SDK overrun guard.
    pub margin: usize,
}

impl FrameLayout {
    /// Layout with the default safety margin.
    pub fn new(roi: Roi, binning: Binning, format: PixelFormat) -> Self {
        Self {
            roi,
            binning,
            format,
            margin: DEFAULT_SAFETY_MARGIN,
        }
    }

    /// Replace the safety margin.
    pub fn with_margin(mut self, margin: usize) -> Self {
        self.margin = margin;
        self
    }

    /// Output width after binning, rounded up.
    pub fn binned_width(&self) -> u32 {
        self.roi.width.div_ceil(self.binning.x.max(1))
    }

    /// Output height after binning, rounded up.
    pub fn binned_height(&self) -> u32 {
        self.roi.height.div_ceil(self.binning.y.max(1))
    }

    /// Bits per sample, from the pixel format.
    pub fn bits_per_pixel(&self) -> u8 {
        self.format.bits_per_pixel()
    }

    /// Channels per pixel, from the pixel format.
    pub fn channels(&self) -> u8 {
        self.format.channels()
    }

    /// Bytes of pixel data, without the margin.
    pub fn payload_len(&self) -> usize {
        self.buffer_len() - self.margin
    }

    /// Bytes to allocate for one frame.
    pub fn buffer_len(&self) -> usize {
        frame_buffer_size(
            self.roi.width,
            self.roi.height,
            self.binning,
            self.bits_per_pixel(),
            self.channels(),
            self.margin,
        )
    }

    /// Check the layout against the camera's variant data.
    pub fn validate(&self, info: &DeviceInfo) -> Result<()> {
        let Roi {
            x,
            y,
            width,
            height,
        } = self.roi;

        if width == 0 || height == 0 {
            return Err(CaptureError::configuration(format!(
                "ROI {}x{} has zero area",
                width, height
            )));
        }
        if self.binning.x == 0 || self.binning.y == 0 {
            return Err(CaptureError::configuration("binning factor must be >= 1"));
        }
        for factor in [self.binning.x, self.binning.y] {
            if !info.supported_bins.contains(&factor) {
                return Err(CaptureError::configuration(format!(
                    "binning {}x{} not supported by {}",
                    self.binning.x, self.binning.y, info.name
                )));
            }
        }
        if !info.supports_format(self.format) {
            return Err(CaptureError::configuration(format!(
                "pixel format {} not supported by {}",
                self.format, info.name
            )));
        }

        let max_binned_w = info.max_width.div_ceil(self.binning.x);
        let max_binned_h = info.max_height.div_ceil(self.binning.y);
        if self.binned_width() > max_binned_w || self.binned_height() > max_binned_h {
            return Err(CaptureError::configuration(format!(
                "binned size {}x{} exceeds sensor {}x{}",
                self.binned_width(),
                self.binned_height(),
                max_binned_w,
                max_binned_h
            )));
        }
        let right = u64::from(x) + u64::from(width);
        let bottom = u64::from(y) + u64::from(height);
        if right > u64::from(info.max_width) || bottom > u64::from(info.max_height) {
            return Err(CaptureError::configuration(format!(
                "ROI ({}, {}) {}x{} extends past sensor {}x{}",
                x, y, width, height, info.max_width, info.max_height
            )));
        }
        Ok(())
    }
}

/// Allocate a zeroed byte vector, reporting failure instead of aborting.
pub fn try_alloc(what: &'static str, len: usize) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(len)
        .map_err(|_| CaptureError::ResourceExhausted { what, bytes: len })?;
    bytes.resize(len, 0);
    Ok(bytes)
}

/// Channel order of interleaved color data coming off the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    /// Red first.
    Rgb,
    /// Blue first.
    Bgr,
}

/// Pixel storage for one frame.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    /// Binned width in pixels.
    pub width: u32,
    /// Binned height in pixels.
    pub height: u32,
    /// Bits per sample.
    pub bits_per_pixel: u8,
    /// 1 for mono, 3 for planar RGB.
    pub channels: u8,
    /// Set when the frame is downloaded.
    pub exposure_s: f64,
    /// Download time.
    pub captured_at: Option<Instant>,
    bytes: Vec<u8>,
    payload_len: usize,
}

impl FrameBuffer {
    /// Allocate a zeroed buffer sized for `layout`.
    pub fn allocate(layout: &FrameLayout) -> Result<Self> {
        let bytes = try_alloc("frame buffer", layout.buffer_len())?;
        Ok(Self {
            width: layout.binned_width(),
            height: layout.binned_height(),
            bits_per_pixel: layout.bits_per_pixel(),
            channels: layout.channels(),
            exposure_s: 0.0,
            captured_at: None,
            bytes,
            payload_len: layout.payload_len(),
        })
    }

    /// Whether this buffer already has the geometry of `layout`.
    pub fn matches(&self, layout: &FrameLayout) -> bool {
        self.width == layout.binned_width()
            && self.height == layout.binned_height()
            && self.bits_per_pixel == layout.bits_per_pixel()
            && self.channels == layout.channels()
            && self.bytes.len() == layout.buffer_len()
    }

    /// Total allocation, margin included.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True for a zero-byte allocation.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Pixel bytes without the margin.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[..self.payload_len]
    }

    /// Mutable pixel bytes without the margin.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[..self.payload_len]
    }

    /// Whole allocation, margin included, for reuse.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_pixel / 8)
    }

    /// Fill the payload with planar R, G, B planes from interleaved samples.
    pub fn deinterleave_from(&mut self, interleaved: &[u8], order: ChannelOrder) -> Result<()> {
        if self.channels != 3 {
            return Err(CaptureError::configuration(format!(
                "deinterleave needs 3 channels, frame has {}",
                self.channels
            )));
        }
        let sample = self.bytes_per_sample();
        let pixels = self.width as usize * self.height as usize;
        let plane = pixels * sample;
        if interleaved.len() < plane * 3 {
            return Err(CaptureError::configuration(format!(
                "interleaved data is {} bytes, expected {}",
                interleaved.len(),
                plane * 3
            )));
        }

        // Source channel index feeding the R, G and B planes.
        let sources = match order {
            ChannelOrder::Rgb => [0, 1, 2],
            ChannelOrder::Bgr => [2, 1, 0],
        };
        let payload = self.payload_mut();
        for (plane_index, source) in sources.into_iter().enumerate() {
            let dst = &mut payload[plane_index * plane..(plane_index + 1) * plane];
            for (pixel, out) in dst.chunks_exact_mut(sample).enumerate() {
                let offset = (pixel * 3 + source) * sample;
                out.copy_from_slice(&interleaved[offset..offset + sample]);
            }
        }
        Ok(())
    }
}

/// One streamed video frame handed from the worker to the session.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct StreamFrame {
    /// Monotonic per-stream sequence number, starting at 1.
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u8,
    pub channels: u8,
    /// `data` holds a zlib stream instead of raw pixels.
    pub compressed: bool,
    pub data: Vec<u8>,
    pub captured_at: Instant,
}
