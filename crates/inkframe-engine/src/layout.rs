use std::fmt;
use std::fs;
use std::io::Cursor;
use std::path::PathBuf;

use anyhow::Context;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

use crate::config::CanvasSpec;
use crate::error::CompositionError;
use crate::pages::PageImage;
use crate::storage::TempStore;

const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    pub rows: u32,
    pub cols: u32,
}

impl Grid {
    pub fn cells(self) -> u32 {
        self.rows * self.cols
    }
}

impl fmt::Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

/// Grid for `usable` images. Small batches keep a 2x2 sheet so single
/// images are not blown up to the full canvas.
pub fn select_grid(usable: usize) -> Result<Grid, CompositionError> {
    let grid = match usable {
        0 => return Err(CompositionError::NoUsableImages),
        1..=4 => Grid { rows: 2, cols: 2 },
        5..=6 => Grid { rows: 2, cols: 3 },
        k => Grid {
            rows: k.div_ceil(3) as u32,
            cols: 3,
        },
    };
    Ok(grid)
}

/// Pixel rectangle of one cell on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Cell `index` in row-major order. Sizes are floored; origins are computed
/// from the unfloored size so rounding error does not accumulate.
pub fn cell_rect(canvas: &CanvasSpec, grid: Grid, index: u32) -> CellRect {
    let pad = f64::from(canvas.padding);
    let exact_w = (f64::from(canvas.width) - f64::from(grid.cols + 1) * pad) / f64::from(grid.cols);
    let exact_h = (f64::from(canvas.height) - f64::from(grid.rows + 1) * pad) / f64::from(grid.rows);
    let row = index / grid.cols;
    let col = index % grid.cols;
    CellRect {
        x: (f64::from(col) * (exact_w + pad) + pad).floor() as u32,
        y: (f64::from(row) * (exact_h + pad) + pad).floor() as u32,
        width: exact_w.max(1.0).floor() as u32,
        height: exact_h.max(1.0).floor() as u32,
    }
}

/// Encoded comic sheet plus what went into it.
#[derive(Debug, Clone)]
pub struct ComposedImage {
    pub png: Vec<u8>,
    pub grid: Grid,
    pub rendered: usize,
}

/// Lays usable pages onto a white canvas in reading order.
///
/// Payloads round-trip through `store`; every file written is removed again
/// before returning, whatever the outcome.
pub fn compose_layout(
    images: &[PageImage],
    canvas: &CanvasSpec,
    store: &TempStore,
) -> Result<ComposedImage, CompositionError> {
    let mut written = Vec::new();
    for (index, image) in images.iter().enumerate() {
        let Some(payload) = image.payload() else {
            continue;
        };
        match store.save_image(payload) {
            Ok(path) => written.push((index, path)),
            Err(err) => {
                tracing::warn!(page = index + 1, error = %err, "skipping page that could not be stored");
            }
        }
    }

    let result = compose_files(&written, canvas);
    for (_, path) in &written {
        store.delete_image(path);
    }
    result
}

fn compose_files(
    written: &[(usize, PathBuf)],
    canvas: &CanvasSpec,
) -> Result<ComposedImage, CompositionError> {
    let mut decoded = Vec::with_capacity(written.len());
    for (index, path) in written {
        let loaded = fs::read(path)
            .with_context(|| format!("failed to read {}", path.display()))
            .and_then(|bytes| image::load_from_memory(&bytes).context("image decode failed"));
        match loaded {
            Ok(image) => decoded.push(image),
            Err(err) => {
                tracing::warn!(page = index + 1, error = %err, "skipping page that could not be decoded");
            }
        }
    }

    let grid = select_grid(decoded.len())?;
    let mut sheet = RgbaImage::from_pixel(canvas.width, canvas.height, BACKGROUND);
    for (slot, image) in decoded.iter().enumerate() {
        let rect = cell_rect(canvas, grid, slot as u32);
        let cell = image
            .resize_to_fill(rect.width, rect.height, FilterType::Lanczos3)
            .to_rgba8();
        imageops::overlay(&mut sheet, &cell, i64::from(rect.x), i64::from(rect.y));
    }

    let mut png = Vec::new();
    DynamicImage::ImageRgba8(sheet).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    tracing::info!(grid = %grid, rendered = decoded.len(), "comic sheet composed");
    Ok(ComposedImage {
        png,
        grid,
        rendered: decoded.len(),
    })
}
