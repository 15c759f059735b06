//! The per-connection receive task.
//!
//! After the handshake each connection gets one task that reads server
//! messages until the transport fails, the server misbehaves, or the task is
//! aborted by `close`. Updates are decoded into the task's private working
//! buffer and then published to the shared [`FrameBuffer`] under its lock.
//!
//! Update requests go out once at start (non-incremental) and again after
//! every applied update (incremental), one per subscription region. When
//! `max_deferred` updates pile up without a snapshot consuming them the task
//! stops requesting; the next snapshot sends the pending request.

use crate::{
    decode::UpdateDecoder,
    errors::RfbClientError,
    framebuffer::FrameBuffer,
    protocol,
    state::ConnectionState,
    transport::{TransportRead, TransportWrite},
};
use parking_lot::Mutex;
use rfb_common::Rect;
use rfb_protocol::io::{RfbInStream, RfbOutStream};
use rfb_protocol::messages::ServerMessage;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Output half shared by the receive task and callers sending input. `None`
/// once the transport has been released.
pub(crate) type SharedWriter = Arc<tokio::sync::Mutex<Option<RfbOutStream<TransportWrite>>>>;

/// State shared between a connection handle and its receive task.
pub(crate) struct Shared {
    pub label: String,
    pub framebuffer: Mutex<FrameBuffer>,
    pub state: Mutex<ConnectionState>,
    pub error: Mutex<Option<RfbClientError>>,
    /// Set (under the framebuffer lock) when requests are paused.
    pub paused: Mutex<bool>,
    pub max_deferred: usize,
}

impl Shared {
    pub fn new(label: String, framebuffer: FrameBuffer, max_deferred: usize) -> Self {
        Self {
            label,
            framebuffer: Mutex::new(framebuffer),
            state: Mutex::new(ConnectionState::Running),
            error: Mutex::new(None),
            paused: Mutex::new(false),
            max_deferred,
        }
    }

    /// Move to `next` if the transition is legal.
    pub fn transition(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        if state.can_transition_to(next) {
            tracing::debug!("[{}] {} -> {}", self.label, *state, next);
            *state = next;
        }
    }

    /// Record the error that ended the connection. Only the first is kept.
    pub fn fail(&self, err: RfbClientError) {
        {
            let mut slot = self.error.lock();
            if slot.is_none() {
                *slot = Some(err);
            }
        }
        self.transition(ConnectionState::Failed);
    }
}

/// Send update requests for `regions` through the shared writer.
pub(crate) async fn request_updates(
    label: &str,
    writer: &SharedWriter,
    incremental: bool,
    regions: &[Rect],
) -> Result<(), RfbClientError> {
    let mut guard = writer.lock().await;
    let output = guard.as_mut().ok_or(RfbClientError::ConnectionClosed)?;
    protocol::write_update_requests(label, output, incremental, regions).await
}

/// Spawn the receive task.
pub(crate) fn spawn(
    shared: Arc<Shared>,
    mut input: RfbInStream<TransportRead>,
    writer: SharedWriter,
    mut decoder: UpdateDecoder,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = run(&shared, &mut input, &writer, &mut decoder).await {
            tracing::warn!("[{}] connection failed: {}", shared.label, err);
            shared.fail(err);
        }

        if let Some(mut output) = writer.lock().await.take() {
            let _ = output.shutdown().await;
        }
        shared.transition(ConnectionState::Closed);
        tracing::debug!("[{}] receive loop exited", shared.label);
    })
}

async fn run(
    shared: &Shared,
    input: &mut RfbInStream<TransportRead>,
    writer: &SharedWriter,
    decoder: &mut UpdateDecoder,
) -> Result<(), RfbClientError> {
    let label = shared.label.as_str();
    let regions = shared.framebuffer.lock().request_regions();
    request_updates(label, writer, false, &regions).await?;

    loop {
        let start = input.consumed();
        match protocol::read_server_message(label, input).await? {
            ServerMessage::FramebufferUpdate(header) => {
                let started = std::time::Instant::now();
                let mut applied = decoder.apply_update(input, header).await?;
                applied.stats.bytes = input.consumed() - start;

                let (regions, paused) = {
                    let mut framebuffer = shared.framebuffer.lock();
                    let backlog = framebuffer.publish(decoder.buffer(), &applied)?;
                    let mut paused = shared.paused.lock();
                    if backlog >= shared.max_deferred && !*paused {
                        tracing::debug!(
                            "[{}] {} updates not yet consumed; pausing update requests",
                            label,
                            backlog
                        );
                        *paused = true;
                    }
                    (framebuffer.request_regions(), *paused)
                };

                tracing::debug!(
                    "[{}] Update complete: time={}us rectangles={} bytes={}",
                    label,
                    started.elapsed().as_micros(),
                    applied.stats.rectangles,
                    applied.stats.bytes
                );

                if !paused {
                    request_updates(label, writer, true, &regions).await?;
                }
            }
            ServerMessage::SetColorMapEntries(m) => {
                tracing::debug!(
                    "[{}] ignoring SetColorMapEntries ({} colours)",
                    label,
                    m.colors.len()
                );
            }
            ServerMessage::Bell => tracing::debug!("[{}] bell", label),
            ServerMessage::ServerCutText(m) => {
                tracing::debug!("[{}] ignoring ServerCutText ({} bytes)", label, m.text.len());
            }
        }
    }
}
