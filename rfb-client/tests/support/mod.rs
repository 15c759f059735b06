//! In-process RFB server for tests.
//!
//! [`FakeServer::spawn`] binds `127.0.0.1:0`, accepts one client, runs the
//! server side of the handshake (RFB 3.8, security None) and consumes the
//! client's SetPixelFormat and SetEncodings. The test then drives the
//! session through [`ServerSide`].

#![allow(dead_code)]

use rfb_protocol::io::{RfbInStream, RfbOutStream};
use rfb_protocol::messages::types::{
    ENCODING_RAW, ENCODING_TIGHT, ENCODING_ZRLE, PSEUDO_ENCODING_DESKTOP_SIZE,
    PSEUDO_ENCODING_LAST_RECT,
};
use rfb_protocol::messages::{
    ClientMessage, FramebufferUpdate, FramebufferUpdateRequest, KeyEvent, PixelFormat,
    PointerEvent, Rectangle, ServerInit,
};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Server end of one accepted connection, after the handshake.
pub struct ServerSide {
    pub input: RfbInStream<OwnedReadHalf>,
    pub output: RfbOutStream<OwnedWriteHalf>,
    pub pixel_format: PixelFormat,
    pub encodings: Vec<i32>,
    /// Key and pointer events seen while waiting for other messages.
    pub keys: Vec<KeyEvent>,
    pub pointers: Vec<PointerEvent>,
}

impl ServerSide {
    /// Read client messages until an update request arrives, recording input
    /// events on the way.
    pub async fn next_request(&mut self) -> std::io::Result<FramebufferUpdateRequest> {
        loop {
            match ClientMessage::read_from(&mut self.input).await? {
                ClientMessage::FramebufferUpdateRequest(request) => return Ok(request),
                ClientMessage::KeyEvent(key) => self.keys.push(key),
                ClientMessage::PointerEvent(pointer) => self.pointers.push(pointer),
                _ => {}
            }
        }
    }

    /// Read client messages until `n` key events have been seen in total.
    pub async fn wait_for_keys(&mut self, n: usize) -> std::io::Result<()> {
        while self.keys.len() < n {
            match ClientMessage::read_from(&mut self.input).await? {
                ClientMessage::KeyEvent(key) => self.keys.push(key),
                ClientMessage::PointerEvent(pointer) => self.pointers.push(pointer),
                _ => {}
            }
        }
        Ok(())
    }

    /// One-rectangle update: raw pixels of a single RGB colour.
    pub async fn send_raw_fill(
        &mut self,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        rgb: [u8; 3],
    ) -> std::io::Result<()> {
        FramebufferUpdate { num_rects: 1 }.write_to(&mut self.output);
        Rectangle { x, y, width, height, encoding: ENCODING_RAW }.write_to(&mut self.output);
        let pixel = [rgb[0], rgb[1], rgb[2], 0];
        for _ in 0..(width as usize * height as usize) {
            self.output.write_bytes(&pixel);
        }
        self.output.flush().await
    }

    /// One-rectangle update: Tight fill (control byte 0x80 plus a TPIXEL).
    pub async fn send_tight_fill(
        &mut self,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        rgb: [u8; 3],
    ) -> std::io::Result<()> {
        FramebufferUpdate { num_rects: 1 }.write_to(&mut self.output);
        Rectangle { x, y, width, height, encoding: ENCODING_TIGHT }.write_to(&mut self.output);
        self.output.write_u8(0x80);
        self.output.write_bytes(&rgb);
        self.output.flush().await
    }

    /// One-rectangle update: Tight basic/copy with `pixels` as RGB triples,
    /// which must be under 12 bytes so no zlib stream is involved.
    pub async fn send_tight_copy(
        &mut self,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        pixels: &[u8],
    ) -> std::io::Result<()> {
        assert!(pixels.len() < 12);
        FramebufferUpdate { num_rects: 1 }.write_to(&mut self.output);
        Rectangle { x, y, width, height, encoding: ENCODING_TIGHT }.write_to(&mut self.output);
        self.output.write_u8(0x00);
        self.output.write_bytes(pixels);
        self.output.flush().await
    }

    /// One-rectangle update: Tight basic/copy on zlib stream `stream_id`.
    /// `compressed` is the stream's next chunk, sent behind a compact length.
    pub async fn send_tight_compressed(
        &mut self,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        stream_id: u8,
        compressed: &[u8],
    ) -> std::io::Result<()> {
        assert!(stream_id < 4);
        FramebufferUpdate { num_rects: 1 }.write_to(&mut self.output);
        Rectangle { x, y, width, height, encoding: ENCODING_TIGHT }.write_to(&mut self.output);
        self.output.write_u8(stream_id << 4);
        let len = compressed.len();
        assert!(len < 0x4000);
        if len < 0x80 {
            self.output.write_u8(len as u8);
        } else {
            self.output.write_u8((len & 0x7F) as u8 | 0x80);
            self.output.write_u8((len >> 7) as u8);
        }
        self.output.write_bytes(compressed);
        self.output.flush().await
    }

    /// One-rectangle update: ZRLE with `compressed` as the next chunk of the
    /// connection's zlib stream.
    pub async fn send_zrle(
        &mut self,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        compressed: &[u8],
    ) -> std::io::Result<()> {
        FramebufferUpdate { num_rects: 1 }.write_to(&mut self.output);
        Rectangle { x, y, width, height, encoding: ENCODING_ZRLE }.write_to(&mut self.output);
        self.output.write_u32(compressed.len() as u32);
        self.output.write_bytes(compressed);
        self.output.flush().await
    }

    /// DesktopSize pseudo-rectangle followed by LastRect, using the 0xFFFF
    /// rectangle count.
    pub async fn send_desktop_size(&mut self, width: u16, height: u16) -> std::io::Result<()> {
        FramebufferUpdate { num_rects: FramebufferUpdate::UNTIL_LAST_RECT }.write_to(&mut self.output);
        Rectangle { x: 0, y: 0, width, height, encoding: PSEUDO_ENCODING_DESKTOP_SIZE }
            .write_to(&mut self.output);
        Rectangle { x: 0, y: 0, width: 0, height: 0, encoding: PSEUDO_ENCODING_LAST_RECT }
            .write_to(&mut self.output);
        self.output.flush().await
    }

    /// Rectangle header that extends past the desktop; the client must treat
    /// this as a protocol error.
    pub async fn send_out_of_bounds(&mut self, desktop: (u16, u16)) -> std::io::Result<()> {
        FramebufferUpdate { num_rects: 1 }.write_to(&mut self.output);
        Rectangle {
            x: desktop.0 - 1,
            y: 0,
            width: 2,
            height: 1,
            encoding: ENCODING_RAW,
        }
        .write_to(&mut self.output);
        self.output.write_bytes(&[0u8; 8]);
        self.output.flush().await
    }
}

/// Handle to a spawned fake server.
pub struct FakeServer {
    pub addr: SocketAddr,
    pub task: JoinHandle<()>,
}

impl FakeServer {
    /// Bind, then in the background accept one client, handshake and run
    /// `script`.
    pub async fn spawn<F, Fut>(width: u16, height: u16, script: F) -> Self
    where
        F: FnOnce(ServerSide) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, write) = socket.into_split();
            let mut input = RfbInStream::new(read);
            let mut output = RfbOutStream::new(write);

            output.write_bytes(b"RFB 003.008\n");
            output.flush().await.unwrap();
            let mut version = [0u8; 12];
            input.read_bytes(&mut version).await.unwrap();

            output.write_bytes(&[1, 1]);
            output.flush().await.unwrap();
            assert_eq!(input.read_u8().await.unwrap(), 1);
            output.write_u32(0);
            output.flush().await.unwrap();

            let _shared = input.read_u8().await.unwrap();
            ServerInit {
                framebuffer_width: width,
                framebuffer_height: height,
                pixel_format: rfb_pixelbuffer::PixelFormat::rgbx8888().into(),
                name: "fake".to_string(),
            }
            .write_to(&mut output)
            .unwrap();
            output.flush().await.unwrap();

            let pixel_format = match ClientMessage::read_from(&mut input).await.unwrap() {
                ClientMessage::SetPixelFormat(m) => m.pixel_format,
                other => panic!("expected SetPixelFormat, got {:?}", other),
            };
            let encodings = match ClientMessage::read_from(&mut input).await.unwrap() {
                ClientMessage::SetEncodings(m) => m.encodings,
                other => panic!("expected SetEncodings, got {:?}", other),
            };

            script(ServerSide {
                input,
                output,
                pixel_format,
                encodings,
                keys: Vec::new(),
                pointers: Vec::new(),
            })
            .await;
        });
        Self { addr, task }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

/// An address on which nothing is listening.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
