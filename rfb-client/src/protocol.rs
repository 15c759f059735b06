//! Message helpers for the client side of an established connection.
//!
//! Thin wrappers over `rfb_protocol::messages` that add the wire trace,
//! flush, and turn I/O failures into [`RfbClientError`] values. `label` is the
//! connection's `name:address` tag used in every log line.

use crate::errors::RfbClientError;
use crate::protocol_trace;
use rfb_common::Rect;
use rfb_protocol::io::{RfbInStream, RfbOutStream};
use rfb_protocol::messages::{self as msg, ClientMessage, ServerMessage};
use tokio::io::{AsyncRead, AsyncWrite};

/// Read the next server message. FramebufferUpdates are returned as a header
/// only; the caller must consume the rectangles.
pub async fn read_server_message<R: AsyncRead + Unpin>(
    label: &str,
    instream: &mut RfbInStream<R>,
) -> Result<ServerMessage, RfbClientError> {
    let message = ServerMessage::read_from(instream)
        .await
        .map_err(|e| RfbClientError::from_read("server message", e))?;

    match &message {
        ServerMessage::FramebufferUpdate(header) => {
            protocol_trace::in_msg(label, "FramebufferUpdate", || {
                format!("rects={}", header.num_rects)
            });
        }
        ServerMessage::SetColorMapEntries(m) => {
            protocol_trace::in_msg(label, "SetColorMapEntries", || {
                format!("first={} colors={}", m.first_color, m.colors.len())
            });
        }
        ServerMessage::Bell => protocol_trace::in_msg(label, "Bell", String::new),
        ServerMessage::ServerCutText(m) => {
            protocol_trace::in_msg(label, "ServerCutText", || format!("len={}", m.text.len()));
        }
    }
    Ok(message)
}

/// Write SetPixelFormat and flush.
pub async fn write_set_pixel_format<W: AsyncWrite + Unpin>(
    label: &str,
    outstream: &mut RfbOutStream<W>,
    pixel_format: msg::PixelFormat,
) -> Result<(), RfbClientError> {
    let message = msg::SetPixelFormat { pixel_format };
    protocol_trace::out_msg(label, "SetPixelFormat", || {
        format!(
            "bpp={} depth={} shifts={}/{}/{}",
            pixel_format.bits_per_pixel,
            pixel_format.depth,
            pixel_format.red_shift,
            pixel_format.green_shift,
            pixel_format.blue_shift
        )
    });
    message.write_to(outstream).map_err(|e| {
        RfbClientError::Protocol(format!("failed to write SetPixelFormat: {}", e))
    })?;
    tracing::debug!(
        "[{}] Wrote SetPixelFormat (bpp={}, depth={}, shifts r/g/b={}/{}/{})",
        label,
        pixel_format.bits_per_pixel,
        pixel_format.depth,
        pixel_format.red_shift,
        pixel_format.green_shift,
        pixel_format.blue_shift
    );
    outstream.flush().await.map_err(RfbClientError::Transport)
}

/// Write SetEncodings in preference order and flush.
pub async fn write_set_encodings<W: AsyncWrite + Unpin>(
    label: &str,
    outstream: &mut RfbOutStream<W>,
    encodings: Vec<i32>,
) -> Result<(), RfbClientError> {
    let message = msg::SetEncodings { encodings };
    protocol_trace::out_msg(label, "SetEncodings", || format!("{:?}", message.encodings));
    tracing::debug!("[{}] Wrote SetEncodings: {:?}", label, message.encodings);
    message.write_to(outstream);
    outstream.flush().await.map_err(RfbClientError::Transport)
}

/// Write one FramebufferUpdateRequest per region and flush once.
pub async fn write_update_requests<W: AsyncWrite + Unpin>(
    label: &str,
    outstream: &mut RfbOutStream<W>,
    incremental: bool,
    regions: &[Rect],
) -> Result<(), RfbClientError> {
    for region in regions {
        let request = msg::FramebufferUpdateRequest {
            incremental,
            x: region.x as u16,
            y: region.y as u16,
            width: region.width as u16,
            height: region.height as u16,
        };
        protocol_trace::out_msg(label, "FramebufferUpdateRequest", || {
            format!("inc={} rect={}", incremental, region)
        });
        request.write_to(outstream);
    }
    tracing::trace!(
        "[{}] Requested {} region(s), incremental={}",
        label,
        regions.len(),
        incremental
    );
    outstream.flush().await.map_err(RfbClientError::Transport)
}

/// Write a batch of already-validated input messages in order and flush once.
pub async fn write_client_messages<W: AsyncWrite + Unpin>(
    label: &str,
    outstream: &mut RfbOutStream<W>,
    messages: &[ClientMessage],
) -> Result<(), RfbClientError> {
    if messages.is_empty() {
        return Ok(());
    }
    for message in messages {
        match message {
            ClientMessage::KeyEvent(k) => protocol_trace::out_msg(label, "KeyEvent", || {
                format!("down={} key=0x{:X}", k.down, k.key)
            }),
            ClientMessage::PointerEvent(p) => {
                protocol_trace::out_msg(label, "PointerEvent", || {
                    format!("buttons=0x{:02X} pos=({}, {})", p.button_mask, p.x, p.y)
                })
            }
            other => protocol_trace::out_msg(label, "ClientMessage", || format!("{:?}", other)),
        }
        message.write_to(outstream).map_err(|e| {
            RfbClientError::Protocol(format!("failed to encode client message: {}", e))
        })?;
    }
    outstream.flush().await.map_err(RfbClientError::Transport)
}
