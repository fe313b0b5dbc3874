//! Streaming sample rate conversion
//!
//! Linear-interpolation rate conversion over a continuous mono stream. The
//! interpolation position and the last input sample persist across calls to
//! [`LinearResampler::process`]; each call continues the same stream rather
//! than converting an isolated frame. Converting frames independently leaves
//! audible artifacts at the 20 ms frame boundaries.

use crate::error::{AudioError, Result};

/// Continuous-state linear resampler for mono 16-bit PCM.
pub struct LinearResampler {
    input_rate: u32,
    output_rate: u32,
    /// Input samples advanced per output sample.
    step: f64,
    /// Position of the next output sample, measured in input-sample units
    /// from the carried sample.
    position: f64,
    /// Last input sample of the previous block, carried for interpolation
    /// across the block boundary.
    carried: Option<i16>,
}

impl LinearResampler {
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self> {
        if input_rate == 0 {
            return Err(AudioError::UnsupportedRate(input_rate));
        }
        if output_rate == 0 {
            return Err(AudioError::UnsupportedRate(output_rate));
        }
        Ok(Self {
            input_rate,
            output_rate,
            step: input_rate as f64 / output_rate as f64,
            position: 0.0,
            carried: None,
        })
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Output samples produced per input sample, on average.
    pub fn ratio(&self) -> f64 {
        self.output_rate as f64 / self.input_rate as f64
    }

    /// Convert the next block of the stream.
    ///
    /// The block is interpreted as the continuation of whatever was passed
    /// before. Output length varies by ±1 sample between calls as the
    /// fractional position carries over.
    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        if input.is_empty() {
            return Vec::new();
        }
        if self.input_rate == self.output_rate {
            return input.to_vec();
        }

        // Work on the carried sample plus the new block so interpolation can
        // cross the boundary.
        let mut extended = Vec::with_capacity(input.len() + 1);
        if let Some(carried) = self.carried {
            extended.push(carried);
        }
        extended.extend_from_slice(input);

        let last_index = (extended.len() - 1) as f64;
        let estimated = (input.len() as f64 * self.ratio()).ceil() as usize + 2;
        let mut output = Vec::with_capacity(estimated);

        while self.position < last_index {
            let index = self.position.floor() as usize;
            let fraction = self.position - index as f64;
            let a = extended[index] as f64;
            let b = extended[index + 1] as f64;
            output.push((a + (b - a) * fraction).round() as i16);
            self.position += self.step;
        }

        // Re-anchor the position on the sample we carry into the next block.
        self.position -= last_index;
        self.carried = Some(*extended.last().expect("extended is non-empty"));

        output
    }

    /// Discard carried state, e.g. after a gap in the stream.
    pub fn reset(&mut self) {
        self.position = 0.0;
        self.carried = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_rate_passthrough() {
        let mut resampler = LinearResampler::new(8000, 8000).unwrap();
        let input = vec![1i16, 2, 3, 4];
        assert_eq!(resampler.process(&input), input);
    }

    #[test]
    fn test_rejects_zero_rate() {
        assert!(LinearResampler::new(0, 8000).is_err());
        assert!(LinearResampler::new(8000, 0).is_err());
    }

    #[test]
    fn test_upsample_doubles_length_over_stream() {
        let mut resampler = LinearResampler::new(8000, 16_000).unwrap();
        let mut total = 0usize;
        for _ in 0..50 {
            total += resampler.process(&[100i16; 160]).len();
        }
        // 50 blocks of 160 samples at 2x is 16000 output samples; allow the
        // stream a couple of samples of startup slack.
        assert!((15_995..=16_000).contains(&total), "got {total}");
    }

    #[test]
    fn test_downsample_halves_length_over_stream() {
        let mut resampler = LinearResampler::new(16_000, 8000).unwrap();
        let mut total = 0usize;
        for _ in 0..50 {
            total += resampler.process(&[100i16; 320]).len();
        }
        assert!((7_995..=8_000).contains(&total), "got {total}");
    }

    #[test]
    fn test_continuity_across_block_boundary() {
        // A ramp fed in two blocks must come out as smoothly as the same
        // ramp fed at once.
        let ramp: Vec<i16> = (0..320).map(|i| (i * 100) as i16).collect();

        let mut whole = LinearResampler::new(8000, 16_000).unwrap();
        let expected = whole.process(&ramp);

        let mut split = LinearResampler::new(8000, 16_000).unwrap();
        let mut got = split.process(&ramp[..160]);
        got.extend(split.process(&ramp[160..]));

        assert_eq!(got.len(), expected.len());
        for (a, b) in got.iter().zip(&expected) {
            assert!((*a as i32 - *b as i32).abs() <= 1);
        }
    }

    #[test]
    fn test_dc_level_preserved() {
        let mut resampler = LinearResampler::new(8000, 11_025).unwrap();
        let output = resampler.process(&[5000i16; 160]);
        assert!(!output.is_empty());
        assert!(output.iter().all(|&s| s == 5000));
    }

    #[test]
    fn test_reset_clears_carry() {
        let mut resampler = LinearResampler::new(8000, 16_000).unwrap();
        resampler.process(&[1000i16; 160]);
        resampler.reset();
        let output = resampler.process(&[0i16; 160]);
        assert!(output.iter().all(|&s| s == 0));
    }
}
