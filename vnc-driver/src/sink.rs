//! Presentation surfaces for `render`.

use anyhow::{Context, Result};
use rfb_client::Frame;
use std::path::{Path, PathBuf};

/// Receives copies of a connection's framebuffer for visualization.
pub trait PresentationSink: Send + Sync {
    /// Show `frame` for connection `name`.
    fn present(&self, name: &str, frame: &Frame) -> Result<()>;
}

/// Drops every frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl PresentationSink for NullSink {
    fn present(&self, _name: &str, _frame: &Frame) -> Result<()> {
        Ok(())
    }
}

/// Writes each frame to `<dir>/<name>.png`, replacing the previous one.
#[derive(Debug, Clone)]
pub struct PngSink {
    dir: PathBuf,
}

impl PngSink {
    /// Create the sink, making `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating render directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    /// Directory the images are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File a connection's frames go to. Path separators in the name are
    /// replaced so every file stays inside the directory.
    #[must_use]
    pub fn path_for(&self, name: &str) -> PathBuf {
        let file: String = name
            .chars()
            .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
            .collect();
        self.dir.join(format!("{}.png", file))
    }
}

impl PresentationSink for PngSink {
    fn present(&self, name: &str, frame: &Frame) -> Result<()> {
        let image = image::RgbImage::from_raw(frame.width, frame.height, frame.to_rgb())
            .context("frame size does not match its pixel data")?;
        let path = self.path_for(name);
        image
            .save(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        tracing::trace!("rendered {} to {}", name, path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfb_client::FrameBuffer;

    fn scratch_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("vncdriver-sink-{}-{}", tag, std::process::id()))
    }

    #[test]
    fn test_null_sink_accepts_anything() {
        let frame = FrameBuffer::new(2, 2).frame();
        assert!(NullSink.present("any", &frame).is_ok());
    }

    #[test]
    fn test_png_sink_writes_named_file() {
        let dir = scratch_dir("png");
        let sink = PngSink::new(&dir).unwrap();
        let frame = FrameBuffer::new(3, 2).frame();

        sink.present("left", &frame).unwrap();
        let written = image::open(dir.join("left.png")).unwrap();
        assert_eq!((written.width(), written.height()), (3, 2));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_path_stays_in_directory() {
        let sink = PngSink {
            dir: PathBuf::from("/tmp/out"),
        };
        assert_eq!(sink.path_for("a/../b"), PathBuf::from("/tmp/out/a_.._b.png"));
    }
}
