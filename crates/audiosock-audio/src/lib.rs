//! Audio format conversion for AudioSocket sessions
//!
//! The PBX end of an AudioSocket connection is fixed at 8 kHz, mono, 16-bit
//! signed linear PCM. Applications frequently want something else: a higher
//! sample rate for a speech recognizer, stereo for a playback path, or G.711
//! μ-law at the wire edge. This crate provides the pieces that bridge the two
//! sides of a live stream:
//!
//! - **Formats** - [`AudioFormat`] and [`Encoding`] describe a rate, channel
//!   count, and sample encoding.
//! - **G.711** - [`g711`] converts between μ-law bytes and linear samples.
//! - **Resampling** - [`LinearResampler`] is a streaming rate converter whose
//!   filter state persists across calls, so frame boundaries stay inaudible.
//! - **Conversion pipelines** - [`StreamConverter`] chains decode, resample,
//!   and channel mapping for one direction of a session.
//!
//! # Examples
//!
//! ```rust
//! use audiosock_audio::{AudioFormat, StreamConverter};
//!
//! let app = AudioFormat::slin16(16_000, 2).unwrap();
//! let mut to_app = StreamConverter::pbx_to_app(app).unwrap();
//!
//! // One 20 ms PBX frame: 160 samples of 8 kHz mono PCM.
//! let frame = vec![0u8; 320];
//! let converted = to_app.process(&frame).unwrap();
//! // Roughly 2x the samples for the rate, 2x again for stereo.
//! assert!(converted.len() > frame.len() * 3);
//! ```

mod convert;
mod error;
mod format;
pub mod g711;
mod resample;

pub use convert::StreamConverter;
pub use error::{AudioError, Result};
pub use format::{
    downmix_stereo_to_mono, upmix_mono_to_stereo, AudioFormat, Encoding,
};
pub use resample::LinearResampler;
