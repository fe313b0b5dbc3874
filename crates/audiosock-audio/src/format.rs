//! Audio format descriptions and channel mapping

use crate::error::{AudioError, Result};

/// Sample encoding of a byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// 16-bit signed little-endian linear PCM, two bytes per sample.
    SignedLinear16,
    /// G.711 μ-law, one byte per sample.
    MuLaw,
}

impl Encoding {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Encoding::SignedLinear16 => 2,
            Encoding::MuLaw => 1,
        }
    }
}

/// A sample rate, channel count, and encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub encoding: Encoding,
}

impl AudioFormat {
    /// Construct a format, validating the rate and channel count.
    pub fn new(sample_rate: u32, channels: u16, encoding: Encoding) -> Result<Self> {
        if sample_rate == 0 {
            return Err(AudioError::UnsupportedRate(sample_rate));
        }
        if channels == 0 || channels > 2 {
            return Err(AudioError::UnsupportedChannels(channels));
        }
        Ok(Self {
            sample_rate,
            channels,
            encoding,
        })
    }

    /// 16-bit signed linear PCM at the given rate and channel count.
    pub fn slin16(sample_rate: u32, channels: u16) -> Result<Self> {
        Self::new(sample_rate, channels, Encoding::SignedLinear16)
    }

    /// The format fixed by the PBX end of every AudioSocket connection:
    /// 8 kHz, mono, 16-bit signed linear PCM.
    pub fn pbx() -> Self {
        Self {
            sample_rate: 8000,
            channels: 1,
            encoding: Encoding::SignedLinear16,
        }
    }

    /// Bytes per second of audio in this format.
    pub fn byte_rate(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * self.encoding.bytes_per_sample()
    }

    pub fn description(&self) -> String {
        format!(
            "{} Hz, {} ch, {}",
            self.sample_rate,
            self.channels,
            match self.encoding {
                Encoding::SignedLinear16 => "slin16",
                Encoding::MuLaw => "mulaw",
            }
        )
    }
}

/// Duplicate each mono sample into a left/right pair.
pub fn upmix_mono_to_stereo(samples: &[i16]) -> Vec<i16> {
    let mut stereo = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        stereo.push(sample);
        stereo.push(sample);
    }
    stereo
}

/// Average each left/right pair down to one mono sample. A trailing
/// unpaired sample is ignored; callers that feed arbitrary byte streams
/// are expected to carry it over themselves.
pub fn downmix_stereo_to_mono(samples: &[i16]) -> Vec<i16> {
    let mut mono = Vec::with_capacity(samples.len() / 2);
    for chunk in samples.chunks_exact(2) {
        let left = chunk[0] as i32;
        let right = chunk[1] as i32;
        mono.push(((left + right) / 2) as i16);
    }
    mono
}
