use std::path::{Path, PathBuf};

use ab_glyph::{FontArc, PxScale};
use font8x8::UnicodeFonts as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use sha2::{Digest as _, Sha256};

use crate::error::RenderError;

pub const DEFAULT_FONT_PATH: &str = "static/fonts/Open_Sans/OpenSans-VariableFont_wdth,wght.ttf";

const CANVAS_WIDTH: u32 = 1200;
const CANVAS_HEIGHT: u32 = 1600;
pub const COVER_WIDTH: u32 = 600;
pub const COVER_HEIGHT: u32 = 800;
const SPINE_WIDTH: u32 = 40;
const SIDE_MARGIN: u32 = 100;
const TITLE_PX: f32 = 128.0;
const AUTHOR_PX: f32 = 72.0;
const LINE_GAP: u32 = 40;
const AUTHOR_FROM_BOTTOM: u32 = 200;
const SPINE_DARKEN: u8 = 20;
const JPEG_QUALITY: u8 = 95;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

pub const PALETTE: [Rgb<u8>; 10] = [
    Rgb([47, 53, 66]),
    Rgb([44, 62, 80]),
    Rgb([52, 73, 94]),
    Rgb([69, 39, 60]),
    Rgb([81, 46, 95]),
    Rgb([45, 52, 54]),
    Rgb([33, 33, 33]),
    Rgb([25, 42, 86]),
    Rgb([56, 29, 42]),
    Rgb([28, 40, 51]),
];

/// Same title, same color: the palette index comes from a SHA-256 of the title.
pub fn background_color(title: &str) -> Rgb<u8> {
    let digest = Sha256::digest(title.as_bytes());
    let mut prefix = [0_u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let index = u64::from_be_bytes(prefix) % PALETTE.len() as u64;
    PALETTE[index as usize]
}

pub fn spine_color(background: Rgb<u8>) -> Rgb<u8> {
    let Rgb([r, g, b]) = background;
    Rgb([
        r.saturating_sub(SPINE_DARKEN),
        g.saturating_sub(SPINE_DARKEN),
        b.saturating_sub(SPINE_DARKEN),
    ])
}

#[derive(Clone)]
pub enum CoverFont {
    Outline(FontArc),
    /// Built-in 8x8 bitmap glyphs, used when no outline font can be loaded.
    Bitmap,
}

impl std::fmt::Debug for CoverFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Outline(_) => f.write_str("CoverFont::Outline"),
            Self::Bitmap => f.write_str("CoverFont::Bitmap"),
        }
    }
}

impl CoverFont {
    pub fn load(path: Option<&Path>) -> Self {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FONT_PATH));

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(path = %path.display(), ?err, "cover font unavailable; using bitmap font");
                return Self::Bitmap;
            }
        };
        match FontArc::try_from_vec(bytes) {
            Ok(font) => Self::Outline(font),
            Err(err) => {
                tracing::warn!(path = %path.display(), ?err, "cover font unreadable; using bitmap font");
                Self::Bitmap
            }
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Bitmap)
    }

    fn measure(&self, px: f32, text: &str) -> (u32, u32) {
        match self {
            Self::Outline(font) => text_size(PxScale::from(px), font, text),
            Self::Bitmap => {
                let cell = bitmap_cell(px);
                (text.chars().count() as u32 * 8 * cell, 8 * cell)
            }
        }
    }

    fn draw(&self, canvas: &mut RgbImage, x: i32, y: i32, px: f32, text: &str) {
        match self {
            Self::Outline(font) => {
                draw_text_mut(canvas, TEXT_COLOR, x, y, PxScale::from(px), font, text);
            }
            Self::Bitmap => draw_bitmap_text(canvas, x, y, bitmap_cell(px), text),
        }
    }
}

fn bitmap_cell(px: f32) -> u32 {
    ((px / 8.0).round() as u32).max(1)
}

fn draw_bitmap_text(canvas: &mut RgbImage, x: i32, y: i32, cell: u32, text: &str) {
    let advance = (8 * cell) as i32;
    for (idx, ch) in text.chars().enumerate() {
        let glyph = font8x8::BASIC_FONTS
            .get(ch)
            .or_else(|| font8x8::BASIC_FONTS.get('?'))
            .unwrap_or([0; 8]);
        let origin_x = x + idx as i32 * advance;
        for (row_idx, row) in glyph.iter().enumerate() {
            for bit in 0..8 {
                if row & (1 << bit) == 0 {
                    continue;
                }
                let rect = Rect::at(
                    origin_x + bit * cell as i32,
                    y + row_idx as i32 * cell as i32,
                )
                .of_size(cell, cell);
                draw_filled_rect_mut(canvas, rect, TEXT_COLOR);
            }
        }
    }
}

/// Greedy word wrap. A single word wider than `max_width` gets a line of its own.
pub fn wrap_words(text: &str, max_width: u32, measure: impl Fn(&str) -> u32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for word in text.split_whitespace() {
        let mut candidate = current.clone();
        candidate.push(word);
        if current.is_empty() || measure(&candidate.join(" ")) <= max_width {
            current = candidate;
        } else {
            lines.push(current.join(" "));
            current = vec![word];
        }
    }
    if !current.is_empty() {
        lines.push(current.join(" "));
    }
    lines
}

/// Draws the cover at full size and returns it downscaled to the final size.
pub fn render_cover(title: &str, author: &str, font: &CoverFont) -> RgbImage {
    let background = background_color(title);
    let mut canvas = RgbImage::from_pixel(CANVAS_WIDTH, CANVAS_HEIGHT, background);

    draw_filled_rect_mut(
        &mut canvas,
        Rect::at(0, 0).of_size(SPINE_WIDTH, CANVAS_HEIGHT),
        spine_color(background),
    );

    let text_area = CANVAS_WIDTH - SPINE_WIDTH;
    let max_width = CANVAS_WIDTH - (SPINE_WIDTH + SIDE_MARGIN);
    let lines = wrap_words(title, max_width, |line| font.measure(TITLE_PX, line).0);

    let sizes = lines
        .iter()
        .map(|line| font.measure(TITLE_PX, line))
        .collect::<Vec<_>>();
    let total_height = sizes.iter().map(|(_, h)| *h).sum::<u32>()
        + LINE_GAP * (lines.len().saturating_sub(1) as u32);

    let mut y = (CANVAS_HEIGHT / 3) as i32 - (total_height / 2) as i32;
    for (line, (width, height)) in lines.iter().zip(sizes) {
        let x = SPINE_WIDTH as i32 + (text_area as i32 - width as i32) / 2;
        font.draw(&mut canvas, x, y, TITLE_PX, line);
        y += (height + LINE_GAP) as i32;
    }

    let (author_width, _) = font.measure(AUTHOR_PX, author);
    let author_x = SPINE_WIDTH as i32 + (text_area as i32 - author_width as i32) / 2;
    let author_y = (CANVAS_HEIGHT - AUTHOR_FROM_BOTTOM) as i32;
    font.draw(&mut canvas, author_x, author_y, AUTHOR_PX, author);

    image::imageops::resize(&canvas, COVER_WIDTH, COVER_HEIGHT, FilterType::Lanczos3)
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, RenderError> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY).encode_image(image)?;
    Ok(out)
}

/// Renders, encodes and writes the cover, returning the JPEG bytes.
pub fn write_cover(
    title: &str,
    author: &str,
    font: &CoverFont,
    path: &Path,
) -> Result<Vec<u8>, RenderError> {
    let jpeg = encode_jpeg(&render_cover(title, author, font))?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, &jpeg)?;
    Ok(jpeg)
}
