//! Property tests: message parsing must not depend on how the byte stream
//! is split into reads.

#[cfg(test)]
mod tests {
    use super::super::client::*;
    use super::super::server::*;
    use super::super::types::*;
    use super::super::ClientMessage;
    use crate::io::{RfbInStream, RfbOutStream};
    use proptest::prelude::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, ReadBuf};

    /// Hands out at most `chunk` bytes per read.
    struct ChunkedReader {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
    }

    impl AsyncRead for ChunkedReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            let n = self
                .chunk
                .min(buf.remaining())
                .min(self.data.len() - self.pos);
            let start = self.pos;
            buf.put_slice(&self.data[start..start + n]);
            self.pos += n;
            Poll::Ready(Ok(()))
        }
    }

    fn chunked(data: Vec<u8>, chunk: usize) -> RfbInStream<ChunkedReader> {
        RfbInStream::with_capacity(
            ChunkedReader {
                data,
                pos: 0,
                chunk: chunk.max(1),
            },
            4,
        )
    }

    fn arbitrary_pixel_format() -> impl Strategy<Value = PixelFormat> {
        (
            prop::sample::select(vec![8u8, 16, 32]),
            prop::bool::ANY,
            prop::sample::select(vec![31u16, 63, 255]),
        )
            .prop_map(|(bpp, big_endian, max)| PixelFormat {
                bits_per_pixel: bpp,
                depth: bpp.min(24),
                big_endian: big_endian as u8,
                true_color: 1,
                red_max: max,
                green_max: max,
                blue_max: max,
                red_shift: 0,
                green_shift: bpp / 3,
                blue_shift: 2 * bpp / 3,
            })
    }

    fn arbitrary_client_message() -> impl Strategy<Value = ClientMessage> {
        prop_oneof![
            arbitrary_pixel_format()
                .prop_map(|pixel_format| ClientMessage::SetPixelFormat(SetPixelFormat {
                    pixel_format
                })),
            prop::collection::vec(any::<i32>(), 0..8)
                .prop_map(|encodings| ClientMessage::SetEncodings(SetEncodings { encodings })),
            (any::<bool>(), any::<u16>(), any::<u16>(), any::<u16>(), any::<u16>()).prop_map(
                |(incremental, x, y, width, height)| {
                    ClientMessage::FramebufferUpdateRequest(FramebufferUpdateRequest {
                        incremental,
                        x,
                        y,
                        width,
                        height,
                    })
                }
            ),
            (any::<bool>(), any::<u32>())
                .prop_map(|(down, key)| ClientMessage::KeyEvent(KeyEvent { down, key })),
            (any::<u8>(), any::<u16>(), any::<u16>()).prop_map(|(button_mask, x, y)| {
                ClientMessage::PointerEvent(PointerEvent { button_mask, x, y })
            }),
        ]
    }

    proptest! {
        #[test]
        fn test_server_init_any_chunking(
            width in 1u16..=5120,
            height in 1u16..=2880,
            pixel_format in arbitrary_pixel_format(),
            name in "[a-zA-Z0-9 ]{0,64}",
            chunk in 1usize..32,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let init = ServerInit {
                    framebuffer_width: width,
                    framebuffer_height: height,
                    pixel_format,
                    name,
                };
                let mut buffer = Vec::new();
                let mut out = RfbOutStream::new(&mut buffer);
                init.write_to(&mut out).unwrap();
                out.flush().await.unwrap();

                let mut input = chunked(buffer, chunk);
                let parsed = ServerInit::read_from(&mut input).await.unwrap();
                prop_assert_eq!(init, parsed);
                Ok(())
            })?;
        }

        #[test]
        fn test_client_message_sequence_any_chunking(
            msgs in prop::collection::vec(arbitrary_client_message(), 1..12),
            chunk in 1usize..16,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let mut buffer = Vec::new();
                let mut out = RfbOutStream::new(&mut buffer);
                for msg in &msgs {
                    msg.write_to(&mut out).unwrap();
                }
                out.flush().await.unwrap();
                let total = buffer.len() as u64;

                let mut input = chunked(buffer, chunk);
                for expected in &msgs {
                    let parsed = ClientMessage::read_from(&mut input).await.unwrap();
                    prop_assert_eq!(expected, &parsed);
                }
                prop_assert_eq!(input.consumed(), total);
                Ok(())
            })?;
        }

        #[test]
        fn test_rectangle_headers_any_chunking(
            rects in prop::collection::vec(
                (any::<u16>(), any::<u16>(), any::<u16>(), any::<u16>(), any::<i32>()),
                0..10,
            ),
            chunk in 1usize..24,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let rects: Vec<Rectangle> = rects
                    .into_iter()
                    .map(|(x, y, width, height, encoding)| Rectangle { x, y, width, height, encoding })
                    .collect();
                let mut buffer = Vec::new();
                let mut out = RfbOutStream::new(&mut buffer);
                FramebufferUpdate { num_rects: rects.len() as u16 }.write_to(&mut out);
                for rect in &rects {
                    rect.write_to(&mut out);
                }
                out.flush().await.unwrap();

                let mut input = chunked(buffer, chunk);
                prop_assert_eq!(input.read_u8().await.unwrap(), MSG_FRAMEBUFFER_UPDATE);
                let header = FramebufferUpdate::read_from(&mut input).await.unwrap();
                prop_assert_eq!(header.num_rects as usize, rects.len());
                for expected in &rects {
                    prop_assert_eq!(expected, &Rectangle::read_from(&mut input).await.unwrap());
                }
                Ok(())
            })?;
        }
    }
}
