//! AudioSocket session transport
//!
//! Real-time audio transport between a PBX and this process over the
//! AudioSocket protocol: a fixed binary framing on plain TCP, paced by the
//! PBX at one 20 ms audio frame per reply, with the logical call identity
//! delivered in-band as a UUID frame.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                   AudioSocketServer                       │
//! │  accept loop ──► Session per connection ──► registry      │
//! ├───────────────────────────────────────────────────────────┤
//! │  Session: receive loop, bounded queues, reply pacing,     │
//! │           events, optional resampling stage               │
//! ├───────────────────────────────────────────────────────────┤
//! │  audiosock-wire (framing)   audiosock-audio (conversion)  │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! The PBX is told (by call control, outside this crate) to connect to this
//! server and tag the connection with a stream UUID. The application, which
//! knows that UUID ahead of time, calls [`AudioSocketServer::accept`] to
//! rendezvous with the connection once its receive loop has identified
//! itself, then talks to the call exclusively through [`Session::read`],
//! [`Session::write`], the queue clear/drain primitives, and the typed
//! event handlers.
//!
//! # Examples
//!
//! ```rust,no_run
//! use audiosock_server::{AudioSocketServer, ServerConfig, SessionEvent, SessionEventKind};
//!
//! # async fn example(stream_id: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let server = AudioSocketServer::bind(ServerConfig::new().with_port(0)).await?;
//! // Hand server.local_addr() to call control so the PBX knows where to dial in.
//!
//! let session = server.accept(stream_id).await?;
//! session.on(SessionEventKind::Dtmf, |event| {
//!     if let SessionEvent::Dtmf(digit) = event {
//!         println!("digit pressed: {}", digit as char);
//!     }
//! });
//!
//! while session.is_connected() {
//!     let frame = match session.read().await {
//!         Ok(frame) => frame,
//!         Err(_) => break,
//!     };
//!     session.write(&frame).await?; // echo the caller back at themselves
//! }
//! session.close().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod events;
mod queue;
mod server;
mod session;

pub use config::{ServerConfig, SessionConfig};
pub use error::{ServerError, ServerResult, SessionError, SessionResult};
pub use events::{EventHandler, SessionEvent, SessionEventKind};
pub use queue::AudioQueue;
pub use server::{AudioSocketServer, SessionRegistry};
pub use session::Session;

// The underlying layers, re-exported for callers that need frame-level or
// conversion-level access (tests, diagnostics, custom pipelines).
pub use audiosock_audio as audio;
pub use audiosock_wire as wire;
