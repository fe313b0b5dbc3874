//! Direction conversion pipelines
//!
//! A [`StreamConverter`] carries one direction of a session between the
//! PBX-fixed wire format and an application-chosen format:
//!
//! ```text
//! PBX → app:  [μ-law decode] → resample 8 kHz → rate → [mono → stereo]
//! app → PBX:  [stereo → mono] → resample rate → 8 kHz → [μ-law encode]
//! ```
//!
//! Bracketed steps apply only when the respective format asks for them. The
//! converter owns a persistent [`LinearResampler`] plus byte/sample
//! carry-over state, so arbitrary byte slices can be fed as they arrive off
//! the queues without regard for sample or pair alignment.

use crate::error::Result;
use crate::format::{downmix_stereo_to_mono, upmix_mono_to_stereo, AudioFormat, Encoding};
use crate::g711;
use crate::resample::LinearResampler;
use crate::AudioError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    PbxToApp,
    AppToPbx,
}

/// One direction of a session's format bridge.
pub struct StreamConverter {
    direction: Direction,
    wire: AudioFormat,
    app: AudioFormat,
    resampler: LinearResampler,
    /// Carry for an odd trailing byte of 16-bit input.
    pending_byte: Option<u8>,
    /// Carry for an unpaired sample ahead of a stereo downmix.
    pending_sample: Option<i16>,
}

impl StreamConverter {
    /// Converter for inbound audio (PBX → application).
    pub fn pbx_to_app(app: AudioFormat) -> Result<Self> {
        Self::with_wire_format(Direction::PbxToApp, AudioFormat::pbx(), app)
    }

    /// Converter for outbound audio (application → PBX).
    pub fn app_to_pbx(app: AudioFormat) -> Result<Self> {
        Self::with_wire_format(Direction::AppToPbx, AudioFormat::pbx(), app)
    }

    /// Inbound converter for a wire carrying μ-law instead of linear PCM.
    pub fn pbx_mulaw_to_app(app: AudioFormat) -> Result<Self> {
        let wire = AudioFormat::new(8000, 1, Encoding::MuLaw)?;
        Self::with_wire_format(Direction::PbxToApp, wire, app)
    }

    /// Outbound converter producing μ-law toward the wire.
    pub fn app_to_pbx_mulaw(app: AudioFormat) -> Result<Self> {
        let wire = AudioFormat::new(8000, 1, Encoding::MuLaw)?;
        Self::with_wire_format(Direction::AppToPbx, wire, app)
    }

    fn with_wire_format(direction: Direction, wire: AudioFormat, app: AudioFormat) -> Result<Self> {
        if wire.sample_rate != 8000 || wire.channels != 1 {
            return Err(AudioError::UnsupportedConversion {
                reason: format!(
                    "wire side is fixed at 8 kHz mono, got {}",
                    wire.description()
                ),
            });
        }
        if app.encoding != Encoding::SignedLinear16 {
            return Err(AudioError::UnsupportedConversion {
                reason: "application side must be 16-bit linear PCM".to_string(),
            });
        }
        let resampler = match direction {
            Direction::PbxToApp => LinearResampler::new(wire.sample_rate, app.sample_rate)?,
            Direction::AppToPbx => LinearResampler::new(app.sample_rate, wire.sample_rate)?,
        };
        Ok(Self {
            direction,
            wire,
            app,
            resampler,
            pending_byte: None,
            pending_sample: None,
        })
    }

    /// The application-side format of this converter.
    pub fn app_format(&self) -> AudioFormat {
        self.app
    }

    /// Expected output size for an input of `len` bytes, on average. Used
    /// for sizing reads against the converted stream.
    pub fn scaled_len(&self, len: usize) -> usize {
        let (from, to) = match self.direction {
            Direction::PbxToApp => (&self.wire, &self.app),
            Direction::AppToPbx => (&self.app, &self.wire),
        };
        (len as f64 * to.byte_rate() as f64 / from.byte_rate() as f64).round() as usize
    }

    /// Convert the next slice of the stream, returning bytes in the target
    /// format. Input that does not fill a whole sample (or a whole stereo
    /// pair ahead of a downmix) is carried into the next call.
    pub fn process(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        match self.direction {
            Direction::PbxToApp => self.process_inbound(input),
            Direction::AppToPbx => self.process_outbound(input),
        }
    }

    fn process_inbound(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let samples = match self.wire.encoding {
            Encoding::MuLaw => g711::decode_slice(input),
            Encoding::SignedLinear16 => self.collect_samples(input),
        };
        let resampled = self.resampler.process(&samples);
        let mapped = if self.app.channels == 2 {
            upmix_mono_to_stereo(&resampled)
        } else {
            resampled
        };
        Ok(samples_to_bytes(&mapped))
    }

    fn process_outbound(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut samples = self.collect_samples(input);
        if self.app.channels == 2 {
            if let Some(pending) = self.pending_sample.take() {
                samples.insert(0, pending);
            }
            if samples.len() % 2 != 0 {
                self.pending_sample = samples.pop();
            }
            samples = downmix_stereo_to_mono(&samples);
        }
        let resampled = self.resampler.process(&samples);
        Ok(match self.wire.encoding {
            Encoding::MuLaw => g711::encode_slice(&resampled),
            Encoding::SignedLinear16 => samples_to_bytes(&resampled),
        })
    }

    /// Assemble little-endian 16-bit samples, carrying an odd trailing byte.
    fn collect_samples(&mut self, input: &[u8]) -> Vec<i16> {
        let mut bytes = Vec::with_capacity(input.len() + 1);
        if let Some(pending) = self.pending_byte.take() {
            bytes.push(pending);
        }
        bytes.extend_from_slice(input);
        if bytes.len() % 2 != 0 {
            self.pending_byte = bytes.pop();
        }
        bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }

    /// Drop all carried state, resetting the stream.
    pub fn reset(&mut self) {
        self.resampler.reset();
        self.pending_byte = None;
        self.pending_sample = None;
    }
}

fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn energy(bytes: &[u8]) -> f64 {
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        if samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum / samples.len() as f64).sqrt()
    }

    fn sine_8k_mono(frames: usize) -> Vec<u8> {
        let samples: Vec<i16> = (0..frames * 160)
            .map(|i| {
                let t = i as f64 / 8000.0;
                ((t * 440.0 * std::f64::consts::TAU).sin() * 8000.0) as i16
            })
            .collect();
        samples_to_bytes(&samples)
    }

    #[test]
    fn test_inbound_rate_and_channel_scaling() {
        let app = AudioFormat::slin16(16_000, 2).unwrap();
        let mut converter = StreamConverter::pbx_to_app(app).unwrap();
        let mut produced = 0usize;
        for chunk in sine_8k_mono(50).chunks(320) {
            produced += converter.process(chunk).unwrap().len();
        }
        // 50 frames of 320 bytes scaled 4x, within startup slack.
        let expected = converter.scaled_len(50 * 320);
        assert!(produced.abs_diff(expected) <= 16, "{produced} vs {expected}");
    }

    #[test]
    fn test_roundtrip_preserves_length_and_energy() {
        let app = AudioFormat::slin16(16_000, 2).unwrap();
        let mut to_app = StreamConverter::pbx_to_app(app).unwrap();
        let mut to_pbx = StreamConverter::app_to_pbx(app).unwrap();

        let original = sine_8k_mono(50);
        let mut back = Vec::new();
        for chunk in original.chunks(320) {
            let up = to_app.process(chunk).unwrap();
            back.extend(to_pbx.process(&up).unwrap());
        }

        let diff = original.len().abs_diff(back.len());
        assert!(diff <= 32, "length drifted by {diff} bytes");

        let original_energy = energy(&original);
        let back_energy = energy(&back);
        let ratio = back_energy / original_energy;
        assert!(
            (0.9..=1.1).contains(&ratio),
            "energy ratio {ratio} outside tolerance"
        );
    }

    #[test]
    fn test_outbound_downmix_carries_odd_sample() {
        let app = AudioFormat::slin16(8000, 2).unwrap();
        let mut converter = StreamConverter::app_to_pbx(app).unwrap();

        // Three samples: one full stereo pair plus an unpaired left sample.
        let out1 = converter.process(&samples_to_bytes(&[100, 200, 300])).unwrap();
        assert_eq!(out1, samples_to_bytes(&[150]));
        // The carried 300 pairs with the incoming 500.
        let out2 = converter.process(&samples_to_bytes(&[500])).unwrap();
        assert_eq!(out2, samples_to_bytes(&[400]));
    }

    #[test]
    fn test_odd_byte_carry() {
        let app = AudioFormat::slin16(8000, 1).unwrap();
        let mut converter = StreamConverter::app_to_pbx(app).unwrap();

        let bytes = samples_to_bytes(&[1000, 2000]);
        let first = converter.process(&bytes[..3]).unwrap();
        assert_eq!(first, samples_to_bytes(&[1000]));
        let second = converter.process(&bytes[3..]).unwrap();
        assert_eq!(second, samples_to_bytes(&[2000]));
    }

    #[test]
    fn test_mulaw_wire_roundtrip() {
        let app = AudioFormat::slin16(8000, 1).unwrap();
        let mut to_app = StreamConverter::pbx_mulaw_to_app(app).unwrap();
        let mut to_pbx = StreamConverter::app_to_pbx_mulaw(app).unwrap();

        let samples: Vec<i16> = (0..160).map(|i| (i * 150) as i16).collect();
        let mulaw = g711::encode_slice(&samples);
        let linear = to_app.process(&mulaw).unwrap();
        assert_eq!(linear.len(), 320);
        let back = to_pbx.process(&linear).unwrap();
        assert_eq!(back.len(), 160);
        for (a, b) in mulaw.iter().zip(&back) {
            assert_eq!(a, b, "μ-law bytes must survive an 8 kHz roundtrip");
        }
    }

    #[test]
    fn test_rejects_mulaw_app_side() {
        let app = AudioFormat::new(16_000, 1, Encoding::MuLaw).unwrap();
        assert!(StreamConverter::pbx_to_app(app).is_err());
    }
}
