//! A single CCD exposure and the geometric transforms applied to it before
//! it is persisted.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// A rectangular sub-array, used for `image_region`/`bias_region`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    fn flip_x(self, frame_width: u32) -> Self {
        Self {
            x: frame_width - self.x - self.width,
            ..self
        }
    }

    fn flip_y(self, frame_height: u32) -> Self {
        Self {
            y: frame_height - self.y - self.height,
            ..self
        }
    }

    fn transpose(self) -> Self {
        Self {
            x: self.y,
            y: self.x,
            width: self.height,
            height: self.width,
        }
    }
}

/// One CCD readout: pixel buffer, geometry, and the metadata needed to
/// build a FITS header and pair it against a trigger.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub pixels: Vec<u16>,
    pub width: u32,
    pub height: u32,
    pub temperature: f64,
    pub readout_time: Duration,
    pub vertical_shift_time: Duration,
    pub image_region: Option<Rect>,
    pub bias_region: Option<Rect>,
    pub em_gain: Option<u16>,
    pub exposure_shortcut_ms: Option<u32>,
    pub port: String,
    pub speed: String,
    pub gain: String,
    /// Wall-clock instant the host received the final byte of the frame.
    pub downloaded_time: DateTime<Utc>,
    pub has_timestamp: bool,
    /// Relative seconds since acquisition start, meaningful only when
    /// `has_timestamp` is set (running without real triggers).
    pub relative_timestamp_secs: f64,
}

impl CameraFrame {
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Reverses each row in place. An involution: applying twice is the identity.
    pub fn flip_x(&mut self) {
        let (w, h) = (self.width as usize, self.height as usize);
        for row in 0..h {
            let start = row * w;
            self.pixels[start..start + w].reverse();
        }
        if let Some(r) = self.image_region.take() {
            self.image_region = Some(r.flip_x(self.width));
        }
        if let Some(r) = self.bias_region.take() {
            self.bias_region = Some(r.flip_x(self.width));
        }
    }

    /// Reverses the row order in place. An involution.
    pub fn flip_y(&mut self) {
        let (w, h) = (self.width as usize, self.height as usize);
        for row in 0..h / 2 {
            let (top, bottom) = (row, h - 1 - row);
            let (top_start, bottom_start) = (top * w, bottom * w);
            for col in 0..w {
                self.pixels.swap(top_start + col, bottom_start + col);
            }
        }
        if let Some(r) = self.image_region.take() {
            self.image_region = Some(r.flip_y(self.height));
        }
        if let Some(r) = self.bias_region.take() {
            self.bias_region = Some(r.flip_y(self.height));
        }
    }

    /// Swaps width and height, transposing the pixel buffer through a
    /// scratch buffer. An involution.
    pub fn transpose(&mut self) {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut scratch = vec![0u16; w * h];
        for y in 0..h {
            for x in 0..w {
                // new[x][y] = old[y][x]
                scratch[x * h + y] = self.pixels[y * w + x];
            }
        }
        self.pixels = scratch;
        self.width = h as u32;
        self.height = w as u32;
        if let Some(r) = self.image_region.take() {
            self.image_region = Some(r.transpose());
        }
        if let Some(r) = self.bias_region.take() {
            self.bias_region = Some(r.transpose());
        }
    }

    /// Applies the configured geometric transforms in the canonical order:
    /// flip-x, flip-y, transpose.
    pub fn apply_transforms(&mut self, flip_x: bool, flip_y: bool, transpose: bool) {
        if flip_x {
            self.flip_x();
        }
        if flip_y {
            self.flip_y();
        }
        if transpose {
            self.transpose();
        }
    }

    /// Estimated start-of-exposure instant, used by the consistency check:
    /// `downloaded_time - readout_time - exposure`.
    pub fn estimated_exposure_start(&self, exposure: Duration) -> DateTime<Utc> {
        let total = self.readout_time + exposure;
        self.downloaded_time
            - chrono::Duration::from_std(total).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

/// The 10x10 orientation markers the simulated backend stamps into a frame:
/// zero near one top corner, saturated near the other, mid-value centered.
pub fn stamp_orientation_markers(pixels: &mut [u16], width: u32, height: u32) {
    const MARK: u32 = 10;
    let w = width as usize;
    let set_square = |pixels: &mut [u16], x0: u32, y0: u32, value: u16| {
        for y in y0..(y0 + MARK).min(height) {
            for x in x0..(x0 + MARK).min(width) {
                pixels[y as usize * w + x as usize] = value;
            }
        }
    };
    set_square(pixels, 0, 0, 0);
    set_square(pixels, width.saturating_sub(MARK), 0, u16::MAX);
    let cx = width / 2 - MARK / 2;
    let cy = height / 2 - MARK / 2;
    set_square(pixels, cx, cy, u16::MAX / 2);
}
