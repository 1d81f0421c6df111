//! zlib compression of streamed frames with a reused scratch buffer.

use ccd_core::frame::try_alloc;
use ccd_core::{CaptureError, Result};
use flate2::{Compress, Compression, FlushCompress, Status};

/// Worst-case zlib output size for `n` input bytes.
pub fn worst_case_len(n: usize) -> usize {
    n + n / 64 + 16 + 3
}

/// Compressor that keeps its output buffer across frames.
pub struct FrameCompressor {
    level: u32,
    engine: Compress,
    scratch: Vec<u8>,
}

impl FrameCompressor {
    /// Compressor at zlib `level` (0..=9).
    pub fn new(level: u32) -> Self {
        Self {
            level,
            engine: Compress::new(Compression::new(level), true),
            scratch: Vec::new(),
        }
    }

    /// zlib level in use.
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Scratch capacity currently held.
    pub fn scratch_len(&self) -> usize {
        self.scratch.len()
    }

    /// Compress `input` into the scratch buffer and return the zlib stream.
    pub fn compress(&mut self, input: &[u8]) -> Result<&[u8]> {
        let needed = worst_case_len(input.len());
        if self.scratch.len() < needed {
            self.scratch = try_alloc("compression scratch", needed)?;
        }

        self.engine.reset();
        let status = self
            .engine
            .compress(input, &mut self.scratch, FlushCompress::Finish)
            .map_err(|e| CaptureError::HardwareFailure(format!("zlib: {}", e)))?;
        if status != Status::StreamEnd {
            return Err(CaptureError::ResourceExhausted {
                what: "compression scratch",
                bytes: needed,
            });
        }

        let written = self.engine.total_out() as usize;
        Ok(&self.scratch[..written])
    }
}

impl std::fmt::Debug for FrameCompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCompressor")
            .field("level", &self.level)
            .field("scratch_len", &self.scratch.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    #[test]
    fn test_round_trip_and_scratch_reuse() {
        let mut compressor = FrameCompressor::new(4);
        let frame: Vec<u8> = (0..4096u32).map(|i| (i % 17) as u8).collect();

        let packed = compressor.compress(&frame).unwrap().to_vec();
        assert!(packed.len() < frame.len());
        let scratch = compressor.scratch_len();
        assert_eq!(scratch, worst_case_len(frame.len()));

        let mut unpacked = Vec::new();
        ZlibDecoder::new(packed.as_slice())
            .read_to_end(&mut unpacked)
            .unwrap();
        assert_eq!(unpacked, frame);

        compressor.compress(&frame[..1024]).unwrap();
        assert_eq!(compressor.scratch_len(), scratch, "smaller frames reuse the scratch");
    }

    #[test]
    fn test_incompressible_input_fits_worst_case() {
        let mut compressor = FrameCompressor::new(9);
        let mut state = 0x1234_5678u32;
        let noise: Vec<u8> = (0..10_000)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect();
        let packed = compressor.compress(&noise).unwrap();
        assert!(packed.len() <= worst_case_len(noise.len()));
    }
}
