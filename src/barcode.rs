//! EAN-13 normalization, check digit, and the raster and vector renderings.

use barcoders::sym::ean13::EAN13;
use image::{GrayImage, ImageEncoder, Luma};
use spleen_font::{FONT_12X24, PSF2Font};

use crate::canvas::Canvas;
use crate::error::ElementDrawError;
use crate::font::FontRegistry;
use crate::types::{Color, Pt, Rect};

/// Bar and space modules in an EAN-13 symbol, guards included.
pub const EAN13_MODULES: usize = 95;

const DIGIT_FONT: &str = "Helvetica";

/// Keeps decimal digits, truncates to 12 and left-pads with zeros.
pub fn normalize_ean13(code: &str) -> [u8; 12] {
    let digits: Vec<u8> = code
        .chars()
        .filter_map(|ch| ch.to_digit(10))
        .map(|d| d as u8)
        .take(12)
        .collect();
    let mut out = [0u8; 12];
    let offset = 12 - digits.len();
    out[offset..].copy_from_slice(&digits);
    out
}

/// Mod-10 check digit: odd positions weigh 1, even positions weigh 3, counting from 1.
pub fn ean13_checksum(digits: &[u8; 12]) -> u8 {
    let sum: u32 = digits
        .iter()
        .enumerate()
        .map(|(idx, d)| {
            let weight = if idx % 2 == 0 { 1 } else { 3 };
            *d as u32 * weight
        })
        .sum();
    ((10 - sum % 10) % 10) as u8
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ean13 {
    digits: String,
    modules: Vec<u8>,
}

impl Ean13 {
    pub fn new(code: &str) -> Result<Self, ElementDrawError> {
        let payload = normalize_ean13(code);
        let check = ean13_checksum(&payload);
        let data: String = payload.iter().map(|d| char::from(b'0' + d)).collect();
        let symbol = EAN13::new(&data).map_err(|err| ElementDrawError::Barcode(err.to_string()))?;
        let modules = symbol.encode();
        if modules.len() != EAN13_MODULES {
            return Err(ElementDrawError::Barcode(format!(
                "unexpected module count {}",
                modules.len()
            )));
        }
        Ok(Self {
            digits: format!("{data}{check}"),
            modules,
        })
    }

    /// All 13 digits, check digit last.
    pub fn digits(&self) -> &str {
        &self.digits
    }

    /// One entry per module, `1` for a bar.
    pub fn modules(&self) -> &[u8] {
        &self.modules
    }

    /// Consecutive bars merged into `(first_module, width_in_modules)` runs.
    pub fn bar_runs(&self) -> Vec<(usize, usize)> {
        let mut runs = Vec::new();
        let mut start = None;
        for (idx, module) in self.modules.iter().enumerate() {
            match (*module == 1, start) {
                (true, None) => start = Some(idx),
                (false, Some(s)) => {
                    runs.push((s, idx - s));
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            runs.push((s, self.modules.len() - s));
        }
        runs
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarcodeImageOptions {
    pub dpi: u32,
    pub module_width_mm: f32,
    pub bar_height_mm: f32,
    pub quiet_zone_modules: u32,
    pub write_text: bool,
}

impl Default for BarcodeImageOptions {
    fn default() -> Self {
        Self {
            dpi: 300,
            module_width_mm: 0.5,
            bar_height_mm: 15.0,
            quiet_zone_modules: 0,
            write_text: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BarcodeImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

fn mm_to_px(mm: f32, dpi: u32) -> u32 {
    ((mm / 25.4) * dpi as f32).round().max(1.0) as u32
}

/// Grayscale PNG of the symbol with its digits printed beneath the bars.
pub fn render_ean13_png(
    code: &str,
    options: &BarcodeImageOptions,
) -> Result<BarcodeImage, ElementDrawError> {
    let symbol = Ean13::new(code)?;
    let module_px = mm_to_px(options.module_width_mm, options.dpi);
    let bar_px = mm_to_px(options.bar_height_mm, options.dpi);
    let quiet_px = options.quiet_zone_modules * module_px;
    let width = EAN13_MODULES as u32 * module_px + quiet_px * 2;

    let mut font = if options.write_text {
        Some(PSF2Font::new(FONT_12X24).map_err(|_| {
            ElementDrawError::Barcode("digit font unavailable".to_string())
        })?)
    } else {
        None
    };
    let glyph_scale = 2u32;
    let (glyph_w, glyph_h) = (12 * glyph_scale, 24 * glyph_scale);
    let gap = mm_to_px(1.0, options.dpi);
    let text_band = if font.is_some() { gap + glyph_h + gap } else { 0 };
    let height = bar_px + text_band;

    let mut img = GrayImage::from_pixel(width, height, Luma([255u8]));
    for (start, run) in symbol.bar_runs() {
        let x0 = quiet_px + start as u32 * module_px;
        for x in x0..x0 + run as u32 * module_px {
            for y in 0..bar_px {
                img.put_pixel(x, y, Luma([0u8]));
            }
        }
    }

    if let Some(font) = font.as_mut() {
        let text_w = glyph_w * symbol.digits().len() as u32;
        let origin_x = width.saturating_sub(text_w) / 2;
        let origin_y = bar_px + gap;
        for (idx, ch) in symbol.digits().chars().enumerate() {
            let mut buf = [0u8; 4];
            let Some(glyph) = font.glyph_for_utf8(ch.encode_utf8(&mut buf).as_bytes()) else {
                continue;
            };
            let gx = origin_x + idx as u32 * glyph_w;
            for (row_y, row) in glyph.enumerate() {
                for (col_x, on) in row.enumerate() {
                    if !on {
                        continue;
                    }
                    for dy in 0..glyph_scale {
                        for dx in 0..glyph_scale {
                            let px = gx + col_x as u32 * glyph_scale + dx;
                            let py = origin_y + row_y as u32 * glyph_scale + dy;
                            if px < width && py < height {
                                img.put_pixel(px, py, Luma([0u8]));
                            }
                        }
                    }
                }
            }
        }
    }

    let mut png = Vec::new();
    image::codecs::png::PngEncoder::new(&mut png)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::L8)
        .map_err(|err| ElementDrawError::Barcode(err.to_string()))?;
    Ok(BarcodeImage { png, width, height })
}

/// Draws the symbol as filled rectangles of width `rect.width / 95` with the digits beneath.
pub fn draw_ean13_vector(
    canvas: &mut Canvas,
    fonts: &FontRegistry,
    code: &str,
    rect: Rect,
) -> Result<Ean13, ElementDrawError> {
    let symbol = Ean13::new(code)?;
    let module = rect.width / EAN13_MODULES as i32;
    let digit_count = symbol.digits().len() as i32;
    let font_size = (rect.height.mul_ratio(1, 5)).min(rect.width.mul_ratio(10, 6 * digit_count));
    let text_band = font_size.mul_ratio(6, 5);
    let bar_height = (rect.height - text_band).max(Pt::ZERO);

    canvas.save_state();
    canvas.set_fill_color(Color::BLACK);
    for (start, run) in symbol.bar_runs() {
        canvas.draw_rect(
            rect.x + module * start as i32,
            rect.y,
            module * run as i32,
            bar_height,
        );
    }
    if font_size > Pt::ZERO {
        canvas.set_font_name(DIGIT_FONT);
        canvas.set_font_size(font_size);
        let text_w = fonts.measure_text_width(DIGIT_FONT, font_size, symbol.digits());
        let x = rect.x + (rect.width - text_w).max(Pt::ZERO) / 2;
        let baseline = rect.y + bar_height + fonts.ascent(DIGIT_FONT, font_size);
        canvas.draw_string(x, baseline, symbol.digits());
    }
    canvas.restore_state();
    Ok(symbol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Command;
    use crate::types::Size;

    #[test]
    fn normalize_keeps_digits_and_pads() {
        assert_eq!(normalize_ean13("12-34"), [0, 0, 0, 0, 0, 0, 0, 0, 1, 2, 3, 4]);
        assert_eq!(normalize_ean13("abc"), [0; 12]);
        assert_eq!(
            normalize_ean13("46070012345678"),
            [4, 6, 0, 7, 0, 0, 1, 2, 3, 4, 5, 6]
        );
    }

    #[test]
    fn checksum_matches_known_codes() {
        assert_eq!(ean13_checksum(&normalize_ean13("123456789012")), 8);
        assert_eq!(ean13_checksum(&normalize_ean13("400638133393")), 1);
        assert_eq!(ean13_checksum(&[0; 12]), 0);
    }

    // Right-hand (R) patterns for 0..=9; the check digit is the last right-hand digit.
    const R_CODES: [[u8; 7]; 10] = [
        [1, 1, 1, 0, 0, 1, 0],
        [1, 1, 0, 0, 1, 1, 0],
        [1, 1, 0, 1, 1, 0, 0],
        [1, 0, 0, 0, 0, 1, 0],
        [1, 0, 1, 1, 1, 0, 0],
        [1, 0, 0, 1, 1, 1, 0],
        [1, 0, 1, 0, 0, 0, 0],
        [1, 0, 0, 0, 1, 0, 0],
        [1, 0, 0, 1, 0, 0, 0],
        [1, 1, 1, 0, 1, 0, 0],
    ];

    #[test]
    fn check_digit_holds_for_generated_codes() {
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        for _ in 0..500 {
            let code: String = (0..12)
                .map(|_| {
                    state = state
                        .wrapping_mul(6_364_136_223_846_793_005)
                        .wrapping_add(1_442_695_040_888_963_407);
                    char::from(b'0' + ((state >> 33) % 10) as u8)
                })
                .collect();
            let symbol = Ean13::new(&code).unwrap();
            let digits: Vec<u32> = symbol
                .digits()
                .chars()
                .map(|c| c.to_digit(10).unwrap())
                .collect();
            assert_eq!(digits.len(), 13);
            assert_eq!(&symbol.digits()[..12], code);
            // Weighted 1,3,1,3,... over all 13 digits is a multiple of ten.
            let total: u32 = digits
                .iter()
                .enumerate()
                .map(|(idx, d)| if idx % 2 == 0 { *d } else { d * 3 })
                .sum();
            assert_eq!(total % 10, 0, "{code}");
            let check = digits[12] as usize;
            assert_eq!(&symbol.modules()[85..92], &R_CODES[check], "{code}");
        }
    }

    #[test]
    fn symbol_has_95_modules_and_13_digits() {
        let symbol = Ean13::new("123456789012").unwrap();
        assert_eq!(symbol.digits(), "1234567890128");
        assert_eq!(symbol.modules().len(), EAN13_MODULES);
        // left guard 101
        assert_eq!(&symbol.modules()[..3], &[1, 0, 1]);
        assert_eq!(&symbol.modules()[92..], &[1, 0, 1]);
        let bars: usize = symbol.bar_runs().iter().map(|(_, w)| w).sum();
        assert_eq!(bars, symbol.modules().iter().filter(|m| **m == 1).count());
    }

    #[test]
    fn malformed_input_still_encodes() {
        let symbol = Ean13::new("not a barcode").unwrap();
        assert_eq!(symbol.digits(), "0000000000000");
    }

    #[test]
    fn raster_png_uses_300_dpi_modules() {
        let image = render_ean13_png("123456789012", &BarcodeImageOptions::default()).unwrap();
        assert_eq!(image.width, 95 * 6);
        assert!(image.height > 177);
        let decoded = image::load_from_memory(&image.png).unwrap();
        assert_eq!(decoded.width(), image.width);
        assert_eq!(decoded.height(), image.height);
    }

    #[test]
    fn vector_bars_scale_to_box_width() {
        let mut canvas = Canvas::new(Size::from_mm(58.0, 40.0));
        let rect = Rect::from_mm(2.0, 2.0, 40.0, 20.0);
        let fonts = FontRegistry::new();
        let symbol = draw_ean13_vector(&mut canvas, &fonts, "123456789012", rect).unwrap();
        let doc = canvas.finish();
        let commands = &doc.pages[0].commands;
        let rects = commands
            .iter()
            .filter(|c| matches!(c, Command::DrawRect { .. }))
            .count();
        assert_eq!(rects, symbol.bar_runs().len());
        assert!(commands.iter().any(
            |c| matches!(c, Command::DrawString { text, .. } if text == "1234567890128")
        ));
    }
}
