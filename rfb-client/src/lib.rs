//! Async RFB client engine.
//!
//! This crate drives a single RFB (VNC) connection on top of the low-level
//! `rfb-protocol` and `rfb-encodings` crates: TCP connect with retry, the
//! handshake, a background receive task that decodes framebuffer updates,
//! and a handle for sending input and taking snapshots.
//!
//! # Quick Start
//!
//! ```no_run
//! use rfb_client::{Config, ConnectionBuilder, Event};
//! use anyhow::Result;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::builder()
//!         .host("localhost")
//!         .port(5900)
//!         .build()?;
//!
//!     let connection = ConnectionBuilder::new(config).name("desk").build().await?;
//!     connection.send_events(&[Event::key(0xff0d, true), Event::key(0xff0d, false)]).await?;
//!
//!     let snapshot = connection.snapshot().await?;
//!     println!("{}x{}, {} dirty", snapshot.frame.width, snapshot.frame.height, snapshot.dirty.len());
//!
//!     connection.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Receive task**: one per connection; reads server messages, decodes
//!   updates into a private working buffer and publishes them to the shared
//!   [`FrameBuffer`].
//! - **Handle**: [`Connection`]; sends input through the shared output
//!   stream and reads snapshots under the framebuffer lock.
//!
//! # Error Handling
//!
//! Errors are reported once through [`Connection::take_error`] after the
//! receive task ends. Connect-time failures are returned directly from
//! [`ConnectionBuilder::build`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod connection;
pub mod decode;
pub mod errors;
pub mod framebuffer;
pub mod input;
pub mod protocol;
pub mod protocol_trace;
pub mod state;
pub mod transport;

mod event_loop;

pub use config::{Config, Encoding};
pub use errors::RfbClientError;
pub use framebuffer::{Frame, FrameBuffer, Snapshot, UpdateStats};
pub use input::Event;
pub use rfb_common::Rect;
pub use state::ConnectionState;

use decode::UpdateDecoder;
use event_loop::{Shared, SharedWriter};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Builder for a [`Connection`].
///
/// ```no_run
/// use rfb_client::{Config, ConnectionBuilder, Rect};
/// # use anyhow::Result;
///
/// # async fn example() -> Result<()> {
/// let config = Config::builder().host("localhost").port(5900).build()?;
/// let connection = ConnectionBuilder::new(config)
///     .name("left")
///     .subscription(vec![Rect::new(0, 0, 320, 240)])
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionBuilder {
    config: Config,
    name: String,
    subscription: Vec<Rect>,
}

impl ConnectionBuilder {
    /// Creates a new builder with the given configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            name: String::new(),
            subscription: Vec::new(),
        }
    }

    /// Name used in log lines.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Initial subscription; empty means the full frame.
    #[must_use]
    pub fn subscription(mut self, regions: Vec<Rect>) -> Self {
        self.subscription = regions;
        self
    }

    /// Connect, handshake and start the receive task.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the server cannot be
    /// reached within the start timeout, the handshake fails, or the initial
    /// subscription does not fit the negotiated desktop.
    pub async fn build(self) -> Result<Connection, RfbClientError> {
        self.config.validate()?;
        let label = if self.name.is_empty() {
            self.config.address()
        } else {
            format!("{}:{}", self.name, self.config.address())
        };

        tracing::debug!("[{}] {}", label, ConnectionState::Connecting);
        let transport = connection::connect_with_retry(&label, &self.config).await?;
        tracing::debug!("[{}] {}", label, ConnectionState::Handshaking);
        let established = connection::handshake(&label, transport, &self.config).await?;

        let (width, height) = established.size();
        let mut framebuffer = FrameBuffer::new(width, height);
        framebuffer.set_subscription(self.subscription)?;

        let decoder = UpdateDecoder::new(
            &label,
            width,
            height,
            established.pixel_format,
            self.config.updates.max_rects,
        );
        let shared = Arc::new(Shared::new(
            label,
            framebuffer,
            self.config.updates.max_deferred,
        ));
        let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(Some(established.output)));
        let task = event_loop::spawn(shared.clone(), established.input, writer.clone(), decoder);

        Ok(Connection {
            shared,
            writer,
            task,
            desktop_name: established.server_init.name,
        })
    }
}

/// Handle to a running connection.
///
/// Dropping the handle aborts the receive task and releases the transport.
pub struct Connection {
    shared: Arc<Shared>,
    writer: SharedWriter,
    task: JoinHandle<()>,
    desktop_name: String,
}

impl Connection {
    /// `name:host:port` tag used in log lines.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Desktop name from ServerInit.
    #[must_use]
    pub fn desktop_name(&self) -> &str {
        &self.desktop_name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// Current framebuffer geometry.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.shared.framebuffer.lock().dimensions()
    }

    /// Current subscription.
    #[must_use]
    pub fn subscription(&self) -> Vec<Rect> {
        self.shared.framebuffer.lock().subscription().to_vec()
    }

    /// The error that ended the connection, if any. Returned only once.
    pub fn take_error(&self) -> Option<RfbClientError> {
        self.shared.error.lock().take()
    }

    /// Validate `events` and send them in order. Nothing is sent if any event
    /// is invalid.
    pub async fn send_events(&self, events: &[Event]) -> Result<(), RfbClientError> {
        let messages = input::encode_events(events)?;
        if messages.is_empty() {
            return Ok(());
        }
        let mut guard = self.writer.lock().await;
        let output = guard.as_mut().ok_or(RfbClientError::ConnectionClosed)?;
        protocol::write_client_messages(self.label(), output, &messages).await
    }

    /// Copy the pixels and drain dirty regions and counters. Resumes update
    /// requests if they were paused for back-pressure.
    ///
    /// The resume request goes out before anything is drained. If this future
    /// is dropped while sending it, nothing is lost and the connection stays
    /// paused, so the next snapshot retries.
    pub async fn snapshot(&self) -> Result<Snapshot, RfbClientError> {
        let resume = {
            let framebuffer = self.shared.framebuffer.lock();
            let mut paused = self.shared.paused.lock();
            std::mem::take(&mut *paused).then(|| framebuffer.request_regions())
        };

        if let Some(regions) = resume {
            tracing::debug!("[{}] resuming update requests", self.label());
            let mut pending = PausedUntilSent {
                shared: &self.shared,
                sent: false,
            };
            event_loop::request_updates(self.label(), &self.writer, true, &regions).await?;
            pending.sent = true;
        }
        Ok(self.shared.framebuffer.lock().take_snapshot())
    }

    /// True when output is buffered but not yet accepted by the transport,
    /// as left behind by a send that was cancelled partway. False while
    /// another send holds the writer.
    #[must_use]
    pub fn has_unsent_output(&self) -> bool {
        match self.writer.try_lock() {
            Ok(guard) => guard.as_ref().is_some_and(|output| output.buffered() > 0),
            Err(_) => false,
        }
    }

    /// Copy of the current pixels; consumes nothing.
    #[must_use]
    pub fn frame(&self) -> Frame {
        self.shared.framebuffer.lock().frame()
    }

    /// Replace the subscription and request the new regions in full. The
    /// previous subscription is kept if any region is invalid.
    pub async fn update_subscription(&self, regions: Vec<Rect>) -> Result<(), RfbClientError> {
        if self.state().is_terminal() {
            return Err(RfbClientError::ConnectionClosed);
        }
        let requested = {
            let mut framebuffer = self.shared.framebuffer.lock();
            framebuffer.set_subscription(regions)?;
            framebuffer.request_regions()
        };
        event_loop::request_updates(self.label(), &self.writer, false, &requested).await
    }

    /// Stop the receive task and release the transport. Idempotent.
    pub async fn close(&self) {
        self.shared.transition(ConnectionState::Closing);
        self.task.abort();
        if let Some(mut output) = self.writer.lock().await.take() {
            let _ = output.shutdown().await;
        }
        self.shared.transition(ConnectionState::Closed);
        tracing::info!("[{}] closed", self.label());
    }
}

/// Puts a connection back into the paused state unless the resume request
/// completed.
struct PausedUntilSent<'a> {
    shared: &'a Shared,
    sent: bool,
}

impl Drop for PausedUntilSent<'_> {
    fn drop(&mut self) {
        if !self.sent {
            let _framebuffer = self.shared.framebuffer.lock();
            *self.shared.paused.lock() = true;
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.task.abort();
    }
}
