//! G.711 μ-law companding
//!
//! μ-law is the one codec the transport handles beyond linear PCM, because a
//! PBX can be configured to put μ-law on the AudioSocket wire. The codec is
//! stateless; every byte maps to one 16-bit sample.

/// Bias added before compression, per the CCITT reference implementation.
const BIAS: i32 = 0x84;
/// Largest magnitude representable after biasing.
const CLIP: i32 = 32_635;

/// Compress one linear PCM sample to a μ-law byte.
pub fn linear_to_mulaw(sample: i16) -> u8 {
    let sign: u8 = if sample < 0 { 0x80 } else { 0x00 };
    let mut pcm = (sample as i32).abs().min(CLIP);
    pcm += BIAS;

    let mut exponent: u8 = 7;
    let mut mask = 0x4000;
    while exponent > 0 && pcm & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = ((pcm >> (exponent + 3)) & 0x0F) as u8;

    !(sign | (exponent << 4) | mantissa)
}

/// Expand one μ-law byte to a linear PCM sample.
pub fn mulaw_to_linear(byte: u8) -> i16 {
    let byte = !byte;
    let sign = byte & 0x80 != 0;
    let exponent = ((byte >> 4) & 0x07) as i32;
    let mantissa = (byte & 0x0F) as i32;

    let pcm = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    if sign {
        -pcm as i16
    } else {
        pcm as i16
    }
}

/// Decode a μ-law byte slice to linear samples.
pub fn decode_slice(data: &[u8]) -> Vec<i16> {
    data.iter().map(|&b| mulaw_to_linear(b)).collect()
}

/// Encode linear samples to μ-law bytes.
pub fn encode_slice(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| linear_to_mulaw(s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_roundtrip() {
        assert_eq!(linear_to_mulaw(0), 0xFF);
        assert_eq!(mulaw_to_linear(0xFF), 0);
    }

    #[test]
    fn test_roundtrip_error_is_bounded() {
        // μ-law is lossy; the error bound grows with the segment but stays
        // well under 1024 across the full 16-bit range.
        for raw in (-32_768i32..=32_767).step_by(97) {
            let sample = raw as i16;
            let decoded = mulaw_to_linear(linear_to_mulaw(sample));
            let error = (decoded as i32 - sample as i32).abs();
            assert!(
                error < 1024,
                "sample {sample} decoded to {decoded}, error {error}"
            );
        }
    }

    #[test]
    fn test_monotonic_on_positive_segment() {
        let mut last = mulaw_to_linear(linear_to_mulaw(0));
        for sample in (0i16..32_000).step_by(500) {
            let decoded = mulaw_to_linear(linear_to_mulaw(sample));
            assert!(decoded >= last, "decoded values must not regress");
            last = decoded;
        }
    }

    #[test]
    fn test_slice_helpers() {
        let samples = vec![0i16, 1000, -1000, 30_000, -30_000];
        let encoded = encode_slice(&samples);
        assert_eq!(encoded.len(), samples.len());
        let decoded = decode_slice(&encoded);
        for (orig, dec) in samples.iter().zip(&decoded) {
            assert!((*orig as i32 - *dec as i32).abs() < 1024);
        }
    }
}
