//! Packed RGB pixel grid.
//!
//! Layout (row-major, 3 bytes per pixel):
//! ```text
//! offset(x, y) = (y · W + x) · 3
//! ┌────┬────┬────┬────┬────┬────┬─────
//! │ R₀ │ G₀ │ B₀ │ R₁ │ G₁ │ B₁ │ ...
//! └────┴────┴────┴────┴────┴────┴─────
//! ```
//!
//! The persisted form is the same grid as a hex string, six digits
//! (`RRGGBB`) per pixel, also row-major.

use std::fmt::Write;

/// Bytes per pixel in the packed buffer.
pub const BYTES_PER_PIXEL: usize = 3;

/// Hex digits per pixel in the persisted form.
pub const HEX_PER_PIXEL: usize = 6;

/// Errors raised while restoring a board from its persisted form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardError {
    /// Hex string length does not match `width * height * 6`
    LengthMismatch { expected: usize, actual: usize },
    /// Non-hex character at the given byte offset
    InvalidHex { offset: usize },
}

impl std::fmt::Display for BoardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LengthMismatch { expected, actual } => {
                write!(f, "Board hex length {actual} does not match expected {expected}")
            }
            Self::InvalidHex { offset } => write!(f, "Invalid hex digit at offset {offset}"),
        }
    }
}

impl std::error::Error for BoardError {}

/// The W×H grid of pixel colours.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardState {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl BoardState {
    /// Create a board with every pixel set to `color` (0xRRGGBB).
    pub fn init_default(width: u32, height: u32, color: u32) -> Self {
        let [_, r, g, b] = color.to_be_bytes();
        let pixels = [r, g, b].repeat(width as usize * height as usize);
        Self { width, height, pixels }
    }

    /// Restore a board from its canonical hex form.
    ///
    /// Fails fast on a length mismatch or any non-hex character; corrupted
    /// input is never zero-filled.
    pub fn init_from_hex(width: u32, height: u32, hex: &str) -> Result<Self, BoardError> {
        let expected = width as usize * height as usize * HEX_PER_PIXEL;
        let digits = hex.as_bytes();
        if digits.len() != expected {
            return Err(BoardError::LengthMismatch {
                expected,
                actual: digits.len(),
            });
        }

        let mut pixels = Vec::with_capacity(expected / 2);
        for (i, pair) in digits.chunks_exact(2).enumerate() {
            let hi = hex_value(pair[0]).ok_or(BoardError::InvalidHex { offset: i * 2 })?;
            let lo = hex_value(pair[1]).ok_or(BoardError::InvalidHex { offset: i * 2 + 1 })?;
            pixels.push((hi << 4) | lo);
        }

        Ok(Self { width, height, pixels })
    }

    /// Read-only view of the live packed buffer.
    pub fn snapshot(&self) -> &[u8] {
        &self.pixels
    }

    /// Write one pixel. Bounds are the caller's responsibility.
    pub fn set_pixel(&mut self, x: u32, y: u32, color: u32) {
        debug_assert!(x < self.width && y < self.height, "pixel ({x}, {y}) out of bounds");
        let offset = self.offset(x, y);
        let [_, r, g, b] = color.to_be_bytes();
        self.pixels[offset..offset + BYTES_PER_PIXEL].copy_from_slice(&[r, g, b]);
    }

    /// Colour of one pixel as 0xRRGGBB.
    pub fn pixel(&self, x: u32, y: u32) -> u32 {
        let offset = self.offset(x, y);
        let px = &self.pixels[offset..offset + BYTES_PER_PIXEL];
        u32::from_be_bytes([0, px[0], px[1], px[2]])
    }

    /// Re-encode the whole buffer to the canonical (lowercase) hex form.
    pub fn serialize(&self) -> String {
        let mut out = String::with_capacity(self.pixels.len() * 2);
        for byte in &self.pixels {
            // Writing into a String cannot fail.
            let _ = write!(out, "{byte:02x}");
        }
        out
    }

    /// Byte offset of pixel (x, y) in the packed buffer.
    pub fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Whether (x, y) lies on the board.
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height
    }
}

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}
