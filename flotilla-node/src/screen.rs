//! Output surfaces for the display consumer.

use crate::pipeline::Frame;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum DisplayError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("bad framebuffer geometry: {0}")]
    Geometry(String),
    #[error("unsupported framebuffer depth: {0} bits per pixel")]
    UnsupportedDepth(u32),
    #[error("frame is {got:?}, screen is {expected:?}")]
    SizeMismatch { got: (u32, u32), expected: (u32, u32) },
    #[error("write failed: {0}")]
    Write(#[from] io::Error),
}

pub trait Screen: Send {
    fn size(&self) -> (u32, u32);
    /// Show `frame`, which must already match [`Screen::size`].
    fn present(&mut self, frame: &Frame) -> Result<(), DisplayError>;
}

impl<S: Screen + ?Sized> Screen for Box<S> {
    fn size(&self) -> (u32, u32) {
        (**self).size()
    }

    fn present(&mut self, frame: &Frame) -> Result<(), DisplayError> {
        (**self).present(frame)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb565,
    Bgrx8888,
}

impl PixelFormat {
    fn from_depth(bits: u32) -> Result<Self, DisplayError> {
        match bits {
            16 => Ok(Self::Rgb565),
            32 => Ok(Self::Bgrx8888),
            other => Err(DisplayError::UnsupportedDepth(other)),
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb565 => 2,
            Self::Bgrx8888 => 4,
        }
    }

    /// Convert one row of packed RGB24 into device pixels.
    pub fn encode_row(self, rgb: &[u8], out: &mut [u8]) {
        let bpp = self.bytes_per_pixel();
        for (src, dst) in rgb.chunks_exact(3).zip(out.chunks_exact_mut(bpp)) {
            let (r, g, b) = (src[0], src[1], src[2]);
            match self {
                Self::Rgb565 => {
                    let packed = (u16::from(r >> 3) << 11) | (u16::from(g >> 2) << 5) | u16::from(b >> 3);
                    dst.copy_from_slice(&packed.to_le_bytes());
                }
                Self::Bgrx8888 => dst.copy_from_slice(&[b, g, r, 0xff]),
            }
        }
    }
}

/// Linux framebuffer device, geometry read from sysfs.
pub struct Framebuffer {
    file: File,
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
    buf: Vec<u8>,
}

impl Framebuffer {
    pub fn open(device: &Path) -> Result<Self, DisplayError> {
        let name = device
            .file_name()
            .ok_or_else(|| DisplayError::Geometry(format!("not a device path: {}", device.display())))?;
        let sysfs = Path::new("/sys/class/graphics").join(name);
        Self::open_with_sysfs(device, &sysfs)
    }

    pub fn open_with_sysfs(device: &Path, sysfs: &Path) -> Result<Self, DisplayError> {
        let virtual_size = parse_pair(&read_attr(sysfs, "virtual_size")?)?;
        let (width, height) = visible_size(sysfs, virtual_size);
        let bits: u32 = read_attr(sysfs, "bits_per_pixel")?
            .parse()
            .map_err(|_| DisplayError::Geometry("bits_per_pixel".into()))?;
        let format = PixelFormat::from_depth(bits)?;
        let stride = match read_attr(sysfs, "stride") {
            Ok(s) => s.parse().map_err(|_| DisplayError::Geometry("stride".into()))?,
            Err(_) => width as usize * format.bytes_per_pixel(),
        };
        if stride < width as usize * format.bytes_per_pixel() {
            return Err(DisplayError::Geometry(format!("stride {stride} too small for width {width}")));
        }

        let file = OpenOptions::new()
            .write(true)
            .open(device)
            .map_err(|source| DisplayError::Open { path: device.to_path_buf(), source })?;
        info!("framebuffer {} is {width}x{height}, {format:?}", device.display());

        Ok(Self {
            file,
            width,
            height,
            stride,
            format,
            buf: vec![0; stride * height as usize],
        })
    }
}

fn read_attr(dir: &Path, name: &str) -> Result<String, DisplayError> {
    let path = dir.join(name);
    fs::read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|source| DisplayError::Open { path, source })
}

/// The active mode when sysfs reports one, else the virtual size. A panned or
/// double-buffered device has a virtual area larger than what is on screen.
fn visible_size(sysfs: &Path, virtual_size: (u32, u32)) -> (u32, u32) {
    let mode = read_attr(sysfs, "modes")
        .ok()
        .and_then(|modes| modes.lines().next().and_then(parse_mode));
    match mode {
        Some((w, h)) if w <= virtual_size.0 && h <= virtual_size.1 => (w, h),
        Some(mode) => {
            debug!("mode {mode:?} exceeds virtual size {virtual_size:?}, ignoring it");
            virtual_size
        }
        None => virtual_size,
    }
}

/// "U:1920x1080p-60"
fn parse_mode(line: &str) -> Option<(u32, u32)> {
    let (_, mode) = line.trim().split_once(':')?;
    let (w, rest) = mode.split_once('x')?;
    let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    let w: u32 = w.parse().ok()?;
    let h: u32 = rest[..digits].parse().ok()?;
    (w > 0 && h > 0).then_some((w, h))
}

/// "1920,1080"
fn parse_pair(s: &str) -> Result<(u32, u32), DisplayError> {
    let bad = || DisplayError::Geometry(format!("virtual_size {s:?}"));
    let (w, h) = s.split_once(',').ok_or_else(bad)?;
    let w = w.trim().parse().map_err(|_| bad())?;
    let h = h.trim().parse().map_err(|_| bad())?;
    if w == 0 || h == 0 {
        return Err(bad());
    }
    Ok((w, h))
}

impl Screen for Framebuffer {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn present(&mut self, frame: &Frame) -> Result<(), DisplayError> {
        if (frame.width, frame.height) != self.size() {
            return Err(DisplayError::SizeMismatch {
                got: (frame.width, frame.height),
                expected: self.size(),
            });
        }
        let row_len = self.width as usize * Frame::BYTES_PER_PIXEL;
        for (src, dst) in frame.pixels.chunks_exact(row_len).zip(self.buf.chunks_exact_mut(self.stride)) {
            self.format.encode_row(src, dst);
        }
        self.file.write_all_at(&self.buf, 0)?;
        Ok(())
    }
}

/// Discards frames. Used with `--headless` and on hosts without a display.
#[derive(Debug, Default)]
pub struct Headless {
    width: u32,
    height: u32,
    presented: u64,
}

impl Headless {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, presented: 0 }
    }

    #[cfg(test)]
    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl Drop for Headless {
    fn drop(&mut self) {
        debug!("headless screen discarded {} frames", self.presented);
    }
}

impl Screen for Headless {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn present(&mut self, _frame: &Frame) -> Result<(), DisplayError> {
        self.presented += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_fb(size: &str, bits: &str, stride: Option<&str>) -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let sysfs = dir.path().join("fb0");
        fs::create_dir(&sysfs).unwrap();
        fs::write(sysfs.join("virtual_size"), size).unwrap();
        fs::write(sysfs.join("bits_per_pixel"), bits).unwrap();
        if let Some(stride) = stride {
            fs::write(sysfs.join("stride"), stride).unwrap();
        }
        let device = dir.path().join("dev-fb0");
        File::create(&device).unwrap();
        (dir, device, sysfs)
    }

    #[test]
    fn test_encode_rgb565() {
        let mut out = [0u8; 4];
        PixelFormat::Rgb565.encode_row(&[255, 0, 0, 0, 0, 255], &mut out);
        assert_eq!(u16::from_le_bytes([out[0], out[1]]), 0xF800);
        assert_eq!(u16::from_le_bytes([out[2], out[3]]), 0x001F);
    }

    #[test]
    fn test_encode_bgrx() {
        let mut out = [0u8; 4];
        PixelFormat::Bgrx8888.encode_row(&[10, 20, 30], &mut out);
        assert_eq!(out, [30, 20, 10, 0xff]);
    }

    #[test]
    fn test_framebuffer_writes_padded_rows() {
        let (_dir, device, sysfs) = fake_fb("2,2\n", "32\n", Some("12\n"));
        let mut fb = Framebuffer::open_with_sysfs(&device, &sysfs).unwrap();
        assert_eq!(fb.size(), (2, 2));

        fb.present(&Frame::blank(2, 2, [1, 2, 3])).unwrap();
        let written = fs::read(&device).unwrap();
        assert_eq!(written.len(), 24);
        assert_eq!(&written[0..8], &[3, 2, 1, 0xff, 3, 2, 1, 0xff]);
        assert_eq!(&written[8..12], &[0, 0, 0, 0]);
        assert_eq!(&written[12..16], &[3, 2, 1, 0xff]);
    }

    #[test]
    fn test_framebuffer_rejects_wrong_size() {
        let (_dir, device, sysfs) = fake_fb("4,4", "16", None);
        let mut fb = Framebuffer::open_with_sysfs(&device, &sysfs).unwrap();
        let err = fb.present(&Frame::blank(2, 2, [0, 0, 0])).unwrap_err();
        assert!(matches!(err, DisplayError::SizeMismatch { .. }));
    }

    #[test]
    fn test_framebuffer_rejects_unknown_depth() {
        let (_dir, device, sysfs) = fake_fb("4,4", "24", None);
        assert!(matches!(
            Framebuffer::open_with_sysfs(&device, &sysfs),
            Err(DisplayError::UnsupportedDepth(24))
        ));
    }

    #[test]
    fn test_double_buffered_uses_visible_mode() {
        let (_dir, device, sysfs) = fake_fb("4,8\n", "16\n", None);
        fs::write(sysfs.join("modes"), "U:4x4p-60\n").unwrap();
        let mut fb = Framebuffer::open_with_sysfs(&device, &sysfs).unwrap();
        assert_eq!(fb.size(), (4, 4));

        fb.present(&Frame::blank(4, 4, [255, 255, 255])).unwrap();
        assert_eq!(fs::read(&device).unwrap().len(), 4 * 4 * 2);
    }

    #[test]
    fn test_oversized_mode_falls_back_to_virtual_size() {
        let (_dir, device, sysfs) = fake_fb("4,4", "16", None);
        fs::write(sysfs.join("modes"), "U:1920x1080p-60\n").unwrap();
        let fb = Framebuffer::open_with_sysfs(&device, &sysfs).unwrap();
        assert_eq!(fb.size(), (4, 4));
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("U:1920x1080p-60"), Some((1920, 1080)));
        assert_eq!(parse_mode("S:720x576i-50"), Some((720, 576)));
        assert_eq!(parse_mode("1920x1080"), None);
        assert_eq!(parse_mode("U:0x1080p-60"), None);
    }

    #[test]
    fn test_parse_pair() {
        assert_eq!(parse_pair("1920,1080").unwrap(), (1920, 1080));
        assert!(parse_pair("1920x1080").is_err());
        assert!(parse_pair("0,1080").is_err());
    }

    #[test]
    fn test_headless_counts() {
        let mut screen = Headless::new(8, 8);
        screen.present(&Frame::blank(8, 8, [0, 0, 0])).unwrap();
        assert_eq!(screen.presented(), 1);
    }
}
