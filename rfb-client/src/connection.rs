//! Connection establishment: TCP connect with retry, then the RFB handshake.
//!
//! The handshake runs version negotiation, security negotiation, ClientInit
//! (shared), ServerInit, and finally SetPixelFormat and SetEncodings. The
//! result is a pair of buffered streams ready for the receive loop, plus the
//! negotiated geometry.

use crate::{
    config::Config,
    decode::{MAX_RECT_HEIGHT, MAX_RECT_WIDTH},
    errors::RfbClientError,
    protocol,
    transport::{Transport, TransportRead, TransportWrite},
};
use rfb_pixelbuffer::PixelFormat;
use rfb_protocol::handshake::{
    negotiate_security, negotiate_version, recv_server_init, send_client_init, NegotiatedVersion,
};
use rfb_protocol::io::{RfbInStream, RfbOutStream};
use rfb_protocol::messages::ServerInit;
use std::io;
use std::time::Duration;
use tokio::time::Instant;

/// Longest pause between connect attempts.
const MAX_RETRY_SLEEP: Duration = Duration::from_secs(30);

/// Connected RFB session components.
pub struct EstablishedConnection {
    /// Buffered input stream for reading RFB data.
    pub input: RfbInStream<TransportRead>,
    /// Buffered output stream for writing RFB data.
    pub output: RfbOutStream<TransportWrite>,
    /// Negotiated protocol version.
    pub version: NegotiatedVersion,
    /// Security type that was used.
    pub security_type: u8,
    /// Initial server parameters (framebuffer size, pixel format, name).
    pub server_init: ServerInit,
    /// Pixel format requested with SetPixelFormat; decoders see this on the wire.
    pub pixel_format: PixelFormat,
}

impl EstablishedConnection {
    /// Returns the negotiated framebuffer width and height.
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        (
            u32::from(self.server_init.framebuffer_width),
            u32::from(self.server_init.framebuffer_height),
        )
    }
}

/// Open the TCP connection, sleeping `min(2 * attempt, 30)` seconds between
/// refused attempts until the start timeout runs out.
pub async fn connect_with_retry(label: &str, config: &Config) -> Result<Transport, RfbClientError> {
    let host = &config.connection.host;
    let port = config.connection.port;
    let start = Instant::now();
    let deadline = start + config.start_timeout();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let result = match tokio::time::timeout(config.timeout(), Transport::connect_tcp(host, port)).await
        {
            Ok(result) => result,
            Err(_) => Err(RfbClientError::ConnectionFailed(format!(
                "connect to {}:{} timed out after {:?}",
                host,
                port,
                config.timeout()
            ))),
        };

        match result {
            Ok(transport) => return Ok(transport),
            Err(err) if err.is_retryable() => {
                let now = Instant::now();
                if now >= deadline {
                    if attempt > 1 {
                        tracing::warn!(
                            "[{}] giving up after {} attempts over {:?}",
                            label,
                            attempt,
                            now - start
                        );
                    }
                    return Err(err);
                }
                let sleep = Duration::from_secs(u64::from(2 * attempt))
                    .min(MAX_RETRY_SLEEP)
                    .min(deadline - now);
                tracing::info!(
                    "[{}] VNC server is not yet connectable: {}. Sleeping for {:?} and will try again ({:?}/{:?})",
                    label,
                    err,
                    sleep,
                    now - start,
                    config.start_timeout()
                );
                tokio::time::sleep(sleep).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Run the RFB handshake over an open transport.
pub async fn handshake(
    label: &str,
    transport: Transport,
    config: &Config,
) -> Result<EstablishedConnection, RfbClientError> {
    let budget = config.timeout();
    tokio::time::timeout(budget, handshake_inner(label, transport, config))
        .await
        .map_err(|_| RfbClientError::Timeout(budget))?
}

async fn handshake_inner(
    label: &str,
    transport: Transport,
    config: &Config,
) -> Result<EstablishedConnection, RfbClientError> {
    let (mut input, mut output) = transport.split();

    let version = negotiate_version(&mut input, &mut output)
        .await
        .map_err(|e| RfbClientError::Handshake(format!("version negotiation failed: {}", e)))?;
    tracing::debug!("[{}] negotiated protocol {:?}", label, version);

    let security_type = negotiate_security(
        &mut input,
        &mut output,
        version,
        &config.connection.password,
    )
    .await
    .map_err(security_error)?;
    tracing::debug!("[{}] security type {} accepted", label, security_type);

    send_client_init(&mut output, true)
        .await
        .map_err(|e| RfbClientError::Handshake(format!("failed to send ClientInit: {}", e)))?;

    let server_init = recv_server_init(&mut input)
        .await
        .map_err(|e| RfbClientError::Handshake(format!("failed to read ServerInit: {}", e)))?;
    check_desktop_size(server_init.framebuffer_width, server_init.framebuffer_height)?;

    let pixel_format = PixelFormat::rgbx8888();
    protocol::write_set_pixel_format(label, &mut output, pixel_format.into()).await?;
    protocol::write_set_encodings(label, &mut output, config.effective_encodings(label)).await?;

    tracing::info!(
        "[{}] connected to desktop {:?}: {}x{}",
        label,
        server_init.name,
        server_init.framebuffer_width,
        server_init.framebuffer_height
    );

    Ok(EstablishedConnection {
        input,
        output,
        version,
        security_type,
        server_init,
        pixel_format,
    })
}

/// Reject an empty desktop or one larger than the decoder will ever accept a
/// rectangle for.
fn check_desktop_size(width: u16, height: u16) -> Result<(), RfbClientError> {
    if width == 0 || height == 0 || width > MAX_RECT_WIDTH || height > MAX_RECT_HEIGHT {
        return Err(RfbClientError::Handshake(format!(
            "unsupported desktop size {}x{} (limit {}x{})",
            width, height, MAX_RECT_WIDTH, MAX_RECT_HEIGHT
        )));
    }
    Ok(())
}

fn security_error(e: io::Error) -> RfbClientError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => RfbClientError::AuthFailed(e.to_string()),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::Unsupported => {
            RfbClientError::Security(e.to_string())
        }
        _ => RfbClientError::Handshake(format!("security negotiation failed: {}", e)),
    }
}
