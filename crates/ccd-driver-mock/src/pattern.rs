//! Synthetic star-field frames for the simulated camera.

/// Simple pseudo-random number generator (LCG) for reproducible noise.
#[inline]
fn prng(seed: u64) -> u64 {
    seed.wrapping_mul(1103515245).wrapping_add(12345) & 0x7fffffff
}

/// Geometry of the frame being synthesized.
#[derive(Debug, Clone, Copy)]
#[allow(missing_docs)]
pub struct PatternGeometry {
    pub width: u32,
    pub height: u32,
    pub bytes_per_sample: usize,
    pub channels: usize,
}

impl PatternGeometry {
    /// Bytes the pattern writes.
    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize * self.bytes_per_sample * self.channels
    }

    /// True for a zero-area frame.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fill `buf` with a dark sky background, read noise and a handful of stars.
///
/// Stars drift one pixel per frame along x so consecutive video frames
/// differ. Samples are little-endian; color frames are interleaved.
/// `dark` frames contain only bias and noise.
pub fn fill_star_field(buf: &mut [u8], geometry: PatternGeometry, frame_num: u64, dark: bool) {
    let w = geometry.width as usize;
    let h = geometry.height as usize;
    let sample = geometry.bytes_per_sample;
    let channels = geometry.channels;
    let max = if sample == 1 { 255.0 } else { 65535.0 };

    let stars: Vec<(f64, f64, f64)> = if dark || w == 0 || h == 0 {
        Vec::new()
    } else {
        (0..8u64)
            .map(|i| {
                let seed = prng(i.wrapping_mul(7919) + 1);
                let x = ((seed % w as u64) as usize + frame_num as usize) % w;
                let y = (prng(seed) % h as u64) as usize;
                let peak = 0.3 + (prng(seed ^ 0xabcd) % 70) as f64 / 100.0;
                (x as f64, y as f64, peak)
            })
            .collect()
    };

    let frame_seed = frame_num.wrapping_mul(2654435761);
    for (idx, px) in buf
        .chunks_exact_mut(sample * channels)
        .take(w * h)
        .enumerate()
    {
        let x = (idx % w) as f64;
        let y = (idx / w) as f64;

        let noise = (prng(frame_seed ^ idx as u64) & 0xff) as f64 / 255.0 * 0.02;
        let mut level = 0.05 + noise;
        for (sx, sy, peak) in &stars {
            let d2 = (x - sx).powi(2) + (y - sy).powi(2);
            if d2 < 36.0 {
                level += peak * (-d2 / 4.0).exp();
            }
        }
        let value = (level.min(1.0) * max) as u16;

        for channel in px.chunks_exact_mut(sample) {
            if sample == 1 {
                channel[0] = value as u8;
            } else {
                channel.copy_from_slice(&value.to_le_bytes());
            }
        }
    }
}
