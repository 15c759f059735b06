//! RFB handshake: version exchange, security negotiation and initialisation.
//!
//! The client always advertises `RFB 003.008`. Servers at 3.3 to 3.6 are
//! handled with the 3.3 security flow (server picks the type), 3.7 with the
//! list flow but without a SecurityResult for `None`.
//!
//! Security types: `None` (1) and VNC Authentication (2). When a server
//! offers both, `None` is chosen.

use crate::io::{RfbInStream, RfbOutStream};
use crate::messages;
use crate::messages::types::{SECURITY_TYPE_INVALID, SECURITY_TYPE_NONE, SECURITY_TYPE_VNC_AUTH};
use des::cipher::generic_array::GenericArray;
use des::cipher::{BlockEncrypt, KeyInit};
use des::Des;
use tokio::io::{AsyncRead, AsyncWrite};

const CLIENT_VERSION_BYTES: &[u8; 12] = b"RFB 003.008\n";

/// Failure reasons longer than this are rejected as malformed.
const MAX_REASON_LENGTH: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiatedVersion {
    V3_3,
    V3_7,
    V3_8,
}

fn invalid_data(msg: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg)
}

/// Read the server's version string and reply with ours.
pub async fn negotiate_version<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    instream: &mut RfbInStream<R>,
    outstream: &mut RfbOutStream<W>,
) -> std::io::Result<NegotiatedVersion> {
    let mut version_buf = [0u8; 12];
    instream.read_bytes(&mut version_buf).await?;

    if &version_buf[0..4] != b"RFB " || version_buf[7] != b'.' || version_buf[11] != b'\n' {
        return Err(invalid_data(format!(
            "invalid RFB version string: {:?}",
            String::from_utf8_lossy(&version_buf)
        )));
    }

    let parse = |digits: &[u8]| -> std::io::Result<u32> {
        std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                invalid_data(format!(
                    "invalid version digits in {:?}",
                    String::from_utf8_lossy(&version_buf)
                ))
            })
    };
    let major = parse(&version_buf[4..7])?;
    let minor = parse(&version_buf[8..11])?;

    if major < 3 || (major == 3 && minor < 3) {
        return Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("unsupported RFB version {}.{} (< 003.003)", major, minor),
        ));
    }

    let negotiated = match (major, minor) {
        (3, m) if m < 7 => NegotiatedVersion::V3_3,
        (3, 7) => NegotiatedVersion::V3_7,
        _ => NegotiatedVersion::V3_8,
    };

    outstream.write_bytes(CLIENT_VERSION_BYTES);
    outstream.flush().await?;
    Ok(negotiated)
}

/// Run security negotiation. Returns the security type that was used.
///
/// `password` is only consulted for VNC Authentication.
pub async fn negotiate_security<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    instream: &mut RfbInStream<R>,
    outstream: &mut RfbOutStream<W>,
    negotiated: NegotiatedVersion,
    password: &str,
) -> std::io::Result<u8> {
    let security_type = match negotiated {
        NegotiatedVersion::V3_3 => {
            let chosen = instream.read_u32().await?;
            if chosen == SECURITY_TYPE_INVALID as u32 {
                let reason = read_reason(instream).await?;
                return Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    format!("server rejected connection: {}", reason),
                ));
            }
            u8::try_from(chosen)
                .ok()
                .filter(|t| *t == SECURITY_TYPE_NONE || *t == SECURITY_TYPE_VNC_AUTH)
                .ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::Unsupported,
                        format!("unsupported security type: {}", chosen),
                    )
                })?
        }
        NegotiatedVersion::V3_7 | NegotiatedVersion::V3_8 => {
            let count = instream.read_u8().await?;
            if count == 0 {
                let reason = read_reason(instream).await?;
                return Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    format!("server offered no security types: {}", reason),
                ));
            }
            let mut types = vec![0u8; count as usize];
            instream.read_bytes(&mut types).await?;

            let chosen = [SECURITY_TYPE_NONE, SECURITY_TYPE_VNC_AUTH]
                .into_iter()
                .find(|t| types.contains(t))
                .ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::Unsupported,
                        format!(
                            "no supported security types offered (got {:?}, supported: 1, 2)",
                            types
                        ),
                    )
                })?;
            outstream.write_u8(chosen);
            outstream.flush().await?;
            chosen
        }
    };

    if security_type == SECURITY_TYPE_VNC_AUTH {
        let mut challenge = [0u8; 16];
        instream.read_bytes(&mut challenge).await?;
        outstream.write_bytes(&vnc_auth_response(&challenge, password));
        outstream.flush().await?;
    }

    // 3.3 and 3.7 send no SecurityResult for None.
    if security_type == SECURITY_TYPE_NONE && negotiated != NegotiatedVersion::V3_8 {
        return Ok(security_type);
    }

    match instream.read_u32().await? {
        0 => Ok(security_type),
        1 => {
            let reason = if negotiated == NegotiatedVersion::V3_8 {
                read_reason(instream).await?
            } else {
                "authentication failed".to_string()
            };
            Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("security handshake failed: {}", reason),
            ))
        }
        other => Err(invalid_data(format!(
            "invalid security result value: {} (expected 0 or 1)",
            other
        ))),
    }
}

async fn read_reason<R: AsyncRead + Unpin>(
    instream: &mut RfbInStream<R>,
) -> std::io::Result<String> {
    let reason = instream.read_length_prefixed(MAX_REASON_LENGTH).await?;
    Ok(String::from_utf8_lossy(&reason).into_owned())
}

/// DES-encrypt a VNC Authentication challenge with `password`.
///
/// The key is the first 8 password bytes, zero padded, with each byte's bit
/// order reversed. The two 8-byte halves of the challenge are encrypted
/// independently (ECB).
pub fn vnc_auth_response(challenge: &[u8; 16], password: &str) -> [u8; 16] {
    let mut key = [0u8; 8];
    for (k, b) in key.iter_mut().zip(password.bytes()) {
        *k = b.reverse_bits();
    }
    let cipher = Des::new(GenericArray::from_slice(&key));

    let mut response = *challenge;
    for block in response.chunks_exact_mut(8) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    response
}

pub async fn send_client_init<W: AsyncWrite + Unpin>(
    outstream: &mut RfbOutStream<W>,
    shared: bool,
) -> std::io::Result<()> {
    messages::ClientInit { shared }.write_to(outstream);
    outstream.flush().await
}

pub async fn recv_server_init<R: AsyncRead + Unpin>(
    instream: &mut RfbInStream<R>,
) -> std::io::Result<messages::ServerInit> {
    messages::ServerInit::read_from(instream).await
}
