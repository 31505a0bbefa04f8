//! RGB frame buffers in display space and chain order.

use crate::error::{LedError, LedResult};

/// Bytes per pixel (R, G, B).
pub const CHANNELS: usize = 3;

/// Display-space RGB frame, row-major, shape `(height, width, 3)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualFrame {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl VirtualFrame {
    /// All-black frame.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0; width * height * CHANNELS],
        }
    }

    /// Frame filled with one colour.
    pub fn filled(width: usize, height: usize, rgb: [u8; 3]) -> Self {
        let data = rgb.repeat(width * height);
        Self {
            width,
            height,
            data,
        }
    }

    /// Wrap a raw payload received from a producer.
    ///
    /// The payload must hold exactly `width * height * 3` bytes.
    pub fn from_bytes(width: usize, height: usize, data: Vec<u8>) -> LedResult<Self> {
        let expected = width * height * CHANNELS;
        if data.len() != expected {
            return Err(LedError::InvalidFrame {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// `(height, width, channels)`, matching the array shape producers build.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.height, self.width, CHANNELS)
    }

    /// Raw row-major bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Pixel at `(x, y)`, if in bounds.
    pub fn pixel(&self, x: usize, y: usize) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y * self.width + x) * CHANNELS;
        let px = self.data.get(offset..offset + CHANNELS)?;
        Some([px[0], px[1], px[2]])
    }

    /// Set the pixel at `(x, y)`; out-of-bounds writes are ignored.
    pub fn set_pixel(&mut self, x: usize, y: usize, rgb: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = (y * self.width + x) * CHANNELS;
        if let Some(px) = self.data.get_mut(offset..offset + CHANNELS) {
            px.copy_from_slice(&rgb);
        }
    }

    /// Copy of this frame rotated counter-clockwise by `quarter_turns` × 90°.
    ///
    /// The top-right pixel of the source becomes the top-left pixel of a
    /// single quarter turn.
    pub fn rotated(&self, quarter_turns: u8) -> Self {
        let k = quarter_turns % 4;
        let (out_w, out_h) = if k % 2 == 1 {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        };
        let mut out = Self::new(out_w, out_h);
        for y in 0..out_h {
            for x in 0..out_w {
                let (sx, sy) = rotated_source(k, x, y, self.width, self.height);
                if let Some(px) = self.pixel(sx, sy) {
                    out.set_pixel(x, y, px);
                }
            }
        }
        out
    }
}

/// Source pixel `(x, y)` in an unrotated `in_w × in_h` frame for output pixel
/// `(x, y)` of the frame rotated counter-clockwise by `k` quarter turns.
pub(crate) fn rotated_source(
    k: u8,
    x: usize,
    y: usize,
    in_w: usize,
    in_h: usize,
) -> (usize, usize) {
    match k % 4 {
        1 => (in_w - 1 - y, x),
        2 => (in_w - 1 - x, in_h - 1 - y),
        3 => (y, in_h - 1 - x),
        _ => (x, y),
    }
}

/// RGB values in physical chain order, `led_count × 3` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalFrame {
    data: Vec<u8>,
}

impl PhysicalFrame {
    /// All-black frame for `led_count` LEDs.
    pub fn black(led_count: usize) -> Self {
        Self {
            data: vec![0; led_count * CHANNELS],
        }
    }

    pub(crate) fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Number of LEDs.
    pub fn led_count(&self) -> usize {
        self.data.len() / CHANNELS
    }

    /// Whether the frame holds no LEDs.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw chain-ordered bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Colour of LED `index`.
    pub fn led(&self, index: usize) -> Option<[u8; 3]> {
        let offset = index.checked_mul(CHANNELS)?;
        let px = self.data.get(offset..offset + CHANNELS)?;
        Some([px[0], px[1], px[2]])
    }

    /// Whether every channel is zero.
    pub fn is_black(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }
}

/// Diagnostic patterns for checking panel placement and wiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPattern {
    /// Red ramps with x, green with y, constant blue.
    Gradient,
    /// Coloured marks in each corner: red top-left, green top-right, blue
    /// bottom-left, yellow bottom-right.
    Corners,
    /// White lines through the centre.
    Cross,
    /// 4×4-pixel white/black checkerboard.
    Checkerboard,
}

impl std::str::FromStr for TestPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gradient" => Ok(Self::Gradient),
            "corners" => Ok(Self::Corners),
            "cross" => Ok(Self::Cross),
            "checkerboard" => Ok(Self::Checkerboard),
            other => Err(format!(
                "unknown pattern '{}'. Must be one of: gradient, corners, cross, checkerboard",
                other
            )),
        }
    }
}

impl TestPattern {
    /// Render the pattern at the given size.
    pub fn render(self, width: usize, height: usize) -> VirtualFrame {
        let mut frame = VirtualFrame::new(width, height);
        if width == 0 || height == 0 {
            return frame;
        }

        match self {
            TestPattern::Gradient => {
                for y in 0..height {
                    for x in 0..width {
                        let r = (x * 255 / width) as u8;
                        let g = (y * 255 / height) as u8;
                        frame.set_pixel(x, y, [r, g, 128]);
                    }
                }
            }
            TestPattern::Corners => {
                let corners = [
                    ((0, 0), [255, 0, 0]),
                    ((width - 1, 0), [0, 255, 0]),
                    ((0, height - 1), [0, 0, 255]),
                    ((width - 1, height - 1), [255, 255, 0]),
                ];
                for ((cx, cy), rgb) in corners {
                    frame.set_pixel(cx, cy, rgb);
                    // small plus sign so the corner survives a blurry glance
                    for (dx, dy) in [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)] {
                        let nx = cx as i64 + dx;
                        let ny = cy as i64 + dy;
                        if nx >= 0 && ny >= 0 {
                            frame.set_pixel(nx as usize, ny as usize, rgb);
                        }
                    }
                }
            }
            TestPattern::Cross => {
                let (mid_x, mid_y) = (width / 2, height / 2);
                for x in 0..width {
                    frame.set_pixel(x, mid_y, [255, 255, 255]);
                }
                for y in 0..height {
                    frame.set_pixel(mid_x, y, [255, 255, 255]);
                }
            }
            TestPattern::Checkerboard => {
                for y in 0..height {
                    for x in 0..width {
                        if (x / 4 + y / 4) % 2 == 0 {
                            frame.set_pixel(x, y, [255, 255, 255]);
                        }
                    }
                }
            }
        }
        frame
    }
}
