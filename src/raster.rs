use crate::canvas::{Command, Document};
use crate::error::LabelError;
use crate::font::FontRegistry;
use crate::types::{Color, Pt, flip_y_f32};
use rustybuzz::{Face as HbFace, UnicodeBuffer};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tiny_skia::{
    FillRule, FilterQuality, Paint, Path, PathBuilder, Pixmap, PixmapPaint, Rect, Stroke,
    Transform,
};
use ttf_parser::{GlyphId, OutlineBuilder};

/// Resolution used when a caller passes `0`.
pub const DEFAULT_DPI: u32 = 200;

#[derive(Clone)]
struct RasterState {
    fill_color: Color,
    stroke_color: Color,
    line_width: Pt,
    font_name: String,
    font_size: Pt,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            fill_color: Color::BLACK,
            stroke_color: Color::BLACK,
            line_width: Pt::from_f32(1.0),
            font_name: "Helvetica".to_string(),
            font_size: Pt::from_f32(12.0),
        }
    }
}

struct PageRaster<'a> {
    pixmap: Pixmap,
    page_height_pt: f32,
    base_transform: Transform,
    registry: Option<&'a FontRegistry>,
    shape_text: bool,
    images: &'a BTreeMap<String, Vec<u8>>,
    image_cache: HashMap<String, Option<Pixmap>>,
    path_builder: PathBuilder,
    has_path: bool,
    // System faces looked up during this render, keyed by lowercased family.
    system_fonts: HashMap<String, Option<Arc<Vec<u8>>>>,
}

/// Paints every page of `document` onto a white background and returns one PNG per page.
pub fn document_to_png_pages(
    document: &Document,
    dpi: u32,
    registry: Option<&FontRegistry>,
    shape_text: bool,
) -> Result<Vec<Vec<u8>>, LabelError> {
    let dpi = if dpi == 0 { DEFAULT_DPI } else { dpi };
    let width_px = pt_milli_to_px_u32(document.page_size.width.to_milli_i64(), dpi)?;
    let height_px = pt_milli_to_px_u32(document.page_size.height.to_milli_i64(), dpi)?;
    let page_height_pt = document.page_size.height.to_f32();
    let scale = dpi as f32 / 72.0;
    let base_transform = Transform::from_row(scale, 0.0, 0.0, -scale, 0.0, page_height_pt * scale);

    let mut png_pages = Vec::with_capacity(document.pages.len());
    let mut system_fonts = HashMap::new();
    for page in &document.pages {
        let mut pixmap = Pixmap::new(width_px, height_px).ok_or_else(|| {
            LabelError::render(format!(
                "invalid raster size {}x{} at {} DPI",
                width_px, height_px, dpi
            ))
        })?;
        pixmap.fill(tiny_skia::Color::from_rgba8(255, 255, 255, 255));

        let mut raster = PageRaster {
            pixmap,
            page_height_pt,
            base_transform,
            registry,
            shape_text,
            images: &document.images,
            image_cache: HashMap::new(),
            path_builder: PathBuilder::new(),
            has_path: false,
            system_fonts: std::mem::take(&mut system_fonts),
        };
        raster.render_commands(&page.commands);
        system_fonts = std::mem::take(&mut raster.system_fonts);

        let png = raster
            .pixmap
            .encode_png()
            .map_err(|e| LabelError::render(format!("png encode failed: {e}")))?;
        png_pages.push(png);
    }

    Ok(png_pages)
}

impl PageRaster<'_> {
    fn render_commands(&mut self, commands: &[Command]) {
        let mut state = RasterState::default();
        let mut stack: Vec<RasterState> = Vec::new();
        let page_h = self.page_height_pt;
        for cmd in commands {
            match cmd {
                Command::SaveState => stack.push(state.clone()),
                Command::RestoreState => {
                    if let Some(restored) = stack.pop() {
                        state = restored;
                    }
                }
                Command::SetFillColor(color) => state.fill_color = *color,
                Command::SetStrokeColor(color) => state.stroke_color = *color,
                Command::SetLineWidth(width) => {
                    state.line_width = if *width < Pt::ZERO { Pt::ZERO } else { *width };
                }
                Command::SetFontName(name) => state.font_name = name.clone(),
                Command::SetFontSize(size) => state.font_size = *size,
                Command::MoveTo { x, y } => {
                    self.path_builder
                        .move_to(x.to_f32(), flip_y_f32(page_h, y.to_f32(), 0.0));
                    self.has_path = true;
                }
                Command::LineTo { x, y } => {
                    self.path_builder
                        .line_to(x.to_f32(), flip_y_f32(page_h, y.to_f32(), 0.0));
                    self.has_path = true;
                }
                Command::ClosePath => self.path_builder.close(),
                Command::Fill => self.fill_current_path(&state),
                Command::Stroke => self.stroke_current_path(&state),
                Command::DrawString { x, y, text } => {
                    self.draw_string(&state, x.to_f32(), y.to_f32(), text);
                }
                Command::DrawRect {
                    x,
                    y,
                    width,
                    height,
                } => {
                    let draw_y = flip_y_f32(page_h, y.to_f32(), height.to_f32());
                    if let Some(rect) =
                        Rect::from_xywh(x.to_f32(), draw_y, width.to_f32(), height.to_f32())
                    {
                        let path = PathBuilder::from_rect(rect);
                        let paint = fill_paint(state.fill_color);
                        self.pixmap.fill_path(
                            &path,
                            &paint,
                            FillRule::Winding,
                            self.base_transform,
                            None,
                        );
                    }
                }
                Command::StrokeRect {
                    x,
                    y,
                    width,
                    height,
                } => {
                    let draw_y = flip_y_f32(page_h, y.to_f32(), height.to_f32());
                    if let Some(rect) =
                        Rect::from_xywh(x.to_f32(), draw_y, width.to_f32(), height.to_f32())
                    {
                        let path = PathBuilder::from_rect(rect);
                        let paint = fill_paint(state.stroke_color);
                        self.pixmap.stroke_path(
                            &path,
                            &paint,
                            &build_stroke(&state),
                            self.base_transform,
                            None,
                        );
                    }
                }
                Command::DrawImage {
                    x,
                    y,
                    width,
                    height,
                    resource_id,
                } => self.draw_image(
                    x.to_f32(),
                    y.to_f32(),
                    width.to_f32(),
                    height.to_f32(),
                    resource_id,
                ),
            }
        }
    }

    fn fill_current_path(&mut self, state: &RasterState) {
        let Some(path) = take_path(&mut self.path_builder, &mut self.has_path) else {
            return;
        };
        let paint = fill_paint(state.fill_color);
        self.pixmap
            .fill_path(&path, &paint, FillRule::Winding, self.base_transform, None);
    }

    fn stroke_current_path(&mut self, state: &RasterState) {
        let Some(path) = take_path(&mut self.path_builder, &mut self.has_path) else {
            return;
        };
        let paint = fill_paint(state.stroke_color);
        self.pixmap.stroke_path(
            &path,
            &paint,
            &build_stroke(state),
            self.base_transform,
            None,
        );
    }

    fn draw_image(&mut self, x: f32, y: f32, width: f32, height: f32, resource_id: &str) {
        let images = self.images;
        let source = self
            .image_cache
            .entry(resource_id.to_string())
            .or_insert_with(|| images.get(resource_id).and_then(|d| decode_image_to_pixmap(d)));
        let Some(image) = source.as_ref() else {
            log::warn!("image resource {resource_id} is missing or undecodable; skipped");
            return;
        };
        let src_w = image.width() as f32;
        let src_h = image.height() as f32;
        if src_w <= 0.0 || src_h <= 0.0 {
            return;
        }
        let sx = width / src_w;
        let sy = height / src_h;
        // Local y-flip so source row 0 lands at the visual top.
        let top = flip_y_f32(self.page_height_pt, y, 0.0);
        let image_ts = Transform::from_row(sx, 0.0, 0.0, -sy, x, top);
        let device_ts = self.base_transform.pre_concat(image_ts);
        let paint = PixmapPaint {
            quality: FilterQuality::Bilinear,
            ..PixmapPaint::default()
        };
        self.pixmap
            .draw_pixmap(0, 0, image.as_ref(), &paint, device_ts, None);
    }

    fn draw_string(&mut self, state: &RasterState, x: f32, y: f32, text: &str) {
        let font_size = state.font_size.to_f32().max(0.0);
        if font_size <= 0.0 || text.is_empty() {
            return;
        }
        let baseline_y = flip_y_f32(self.page_height_pt, y, 0.0);
        let paint = fill_paint(state.fill_color);
        let device_transform = self.base_transform;
        let shape_text = self.shape_text;
        let registry = self.registry;
        let system_fonts = &mut self.system_fonts;
        let pixmap = &mut self.pixmap;

        let mut try_draw = |font_data: &[u8]| -> bool {
            let Ok(face) = ttf_parser::Face::parse(font_data, 0) else {
                return false;
            };
            let placements =
                layout_text_glyphs(font_data, text, font_size, x, baseline_y, shape_text);
            if placements.is_empty() {
                return false;
            }
            let mut drawn = 0usize;
            for placement in placements {
                let mut builder =
                    GlyphPathBuilder::new(placement.origin_x, placement.origin_y, placement.scale);
                if face
                    .outline_glyph(GlyphId(placement.glyph_id), &mut builder)
                    .is_none()
                {
                    continue;
                }
                let Some(path) = builder.finish() else {
                    continue;
                };
                pixmap.fill_path(&path, &paint, FillRule::Winding, device_transform, None);
                drawn += 1;
            }
            drawn > 0 || text.trim().is_empty()
        };

        if let Some(font) = registry.and_then(|r| r.resolve(&state.font_name)) {
            if try_draw(font.data.as_slice()) {
                return;
            }
        }
        match system_font_bytes(system_fonts, &state.font_name) {
            Some(bytes) => {
                if !try_draw(bytes.as_slice()) {
                    log::debug!("no glyphs drawn for {:?} in {}", text, state.font_name);
                }
            }
            None => log::debug!(
                "no font available for {}; text {:?} not rasterized",
                state.font_name,
                text
            ),
        }
    }
}

#[derive(Clone, Copy)]
struct GlyphPlacement {
    glyph_id: u16,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

fn layout_text_glyphs(
    font_data: &[u8],
    text: &str,
    font_size: f32,
    baseline_x: f32,
    baseline_y: f32,
    shape_text: bool,
) -> Vec<GlyphPlacement> {
    if !shape_text {
        return layout_text_glyphs_unshaped(font_data, text, font_size, baseline_x, baseline_y);
    }

    let Some(face) = HbFace::from_slice(font_data, 0) else {
        return layout_text_glyphs_unshaped(font_data, text, font_size, baseline_x, baseline_y);
    };
    let hb_units = face.units_per_em().max(1) as f32;
    let scale = font_size / hb_units;
    let mut buffer = UnicodeBuffer::new();
    buffer.push_str(text);
    let output = rustybuzz::shape(&face, &[], buffer);
    let infos = output.glyph_infos();
    let positions = output.glyph_positions();
    if infos.is_empty() || infos.len() != positions.len() {
        return layout_text_glyphs_unshaped(font_data, text, font_size, baseline_x, baseline_y);
    }

    let mut out = Vec::with_capacity(infos.len());
    let mut pen_x = 0.0f32;
    let mut pen_y = 0.0f32;
    for (info, pos) in infos.iter().zip(positions.iter()) {
        let gid = info.glyph_id as u16;
        if gid != 0 {
            let x_off = (pos.x_offset as f32 / hb_units) * font_size;
            let y_off = (pos.y_offset as f32 / hb_units) * font_size;
            out.push(GlyphPlacement {
                glyph_id: gid,
                origin_x: baseline_x + pen_x + x_off,
                origin_y: baseline_y + pen_y + y_off,
                scale,
            });
        }
        pen_x += (pos.x_advance as f32 / hb_units) * font_size;
        pen_y += (pos.y_advance as f32 / hb_units) * font_size;
    }
    out
}

fn layout_text_glyphs_unshaped(
    font_data: &[u8],
    text: &str,
    font_size: f32,
    baseline_x: f32,
    baseline_y: f32,
) -> Vec<GlyphPlacement> {
    let Ok(face) = ttf_parser::Face::parse(font_data, 0) else {
        return Vec::new();
    };
    let units_per_em = face.units_per_em().max(1) as f32;
    let scale = font_size / units_per_em;

    let mut out = Vec::new();
    let mut pen_x = 0.0f32;
    for ch in text.chars() {
        let gid = face.glyph_index(ch).map(|id| id.0).unwrap_or(0);
        if gid == 0 {
            pen_x += font_size * 0.5;
            continue;
        }
        out.push(GlyphPlacement {
            glyph_id: gid,
            origin_x: baseline_x + pen_x,
            origin_y: baseline_y,
            scale,
        });
        let advance_units = face.glyph_hor_advance(GlyphId(gid)).unwrap_or(0) as f32;
        let mut adv = (advance_units / units_per_em) * font_size;
        if adv <= 0.0 {
            adv = font_size * 0.5;
        }
        pen_x += adv;
    }
    out
}

const SANS_REGULAR: &[&str] = &[
    "DejaVuSans.ttf",
    "LiberationSans-Regular.ttf",
    "NotoSans-Regular.ttf",
    "arial.ttf",
    "Arial.ttf",
];
const SANS_BOLD: &[&str] = &[
    "DejaVuSans-Bold.ttf",
    "LiberationSans-Bold.ttf",
    "NotoSans-Bold.ttf",
    "arialbd.ttf",
    "Arial Bold.ttf",
];

// Text drawn with a family missing from the registry (including the Helvetica stand-in that
// PDF output uses for unregistered families) is rasterized with a system sans face. Without
// one installed, such text is left out of the PNG. Lookups are remembered for one render only.
fn system_font_bytes(
    cache: &mut HashMap<String, Option<Arc<Vec<u8>>>>,
    font_name: &str,
) -> Option<Arc<Vec<u8>>> {
    let key = font_name.trim().to_ascii_lowercase();
    if let Some(entry) = cache.get(&key) {
        return entry.clone();
    }
    let loaded = load_system_font_from_candidates(&key);
    cache.insert(key, loaded.clone());
    loaded
}

fn load_system_font_from_candidates(font_name: &str) -> Option<Arc<Vec<u8>>> {
    let bold = font_name.contains("bold") || font_name.contains("semibold");
    let family: String = font_name
        .replace("bold", "")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    let mut candidates: Vec<String> = Vec::new();
    if !family.is_empty() {
        if bold {
            candidates.push(format!("{family}_bold.ttf"));
            candidates.push(format!("{family}bd.ttf"));
            candidates.push(format!("{family}-Bold.ttf"));
        }
        candidates.push(format!("{family}.ttf"));
    }
    let generic = if bold { SANS_BOLD } else { SANS_REGULAR };
    candidates.extend(generic.iter().map(|name| name.to_string()));

    for dir in system_font_dirs() {
        for file_name in &candidates {
            let path = dir.join(file_name);
            let Ok(bytes) = std::fs::read(&path) else {
                continue;
            };
            if ttf_parser::Face::parse(&bytes, 0).is_ok() {
                return Some(Arc::new(bytes));
            }
        }
    }
    None
}

fn system_font_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    if let Ok(extra) = std::env::var("LABELKIT_FONT_DIR") {
        for path in std::env::split_paths(&extra) {
            if !path.as_os_str().is_empty() {
                dirs.push(path);
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        dirs.push(PathBuf::from(r"C:\Windows\Fonts"));
        if let Ok(windir) = std::env::var("WINDIR") {
            dirs.push(PathBuf::from(windir).join("Fonts"));
        }
    }

    #[cfg(target_os = "linux")]
    {
        for dir in [
            "/usr/share/fonts",
            "/usr/share/fonts/truetype/dejavu",
            "/usr/share/fonts/truetype/liberation",
            "/usr/share/fonts/TTF",
            "/usr/share/fonts/dejavu",
            "/usr/local/share/fonts",
        ] {
            dirs.push(PathBuf::from(dir));
        }
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(home).join(".fonts"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        dirs.push(PathBuf::from("/System/Library/Fonts"));
        dirs.push(PathBuf::from("/Library/Fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(home).join("Library/Fonts"));
        }
    }

    dirs
}

struct GlyphPathBuilder {
    builder: PathBuilder,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

impl GlyphPathBuilder {
    fn new(origin_x: f32, origin_y: f32, scale: f32) -> Self {
        Self {
            builder: PathBuilder::new(),
            origin_x,
            origin_y,
            scale,
        }
    }

    fn finish(self) -> Option<Path> {
        self.builder.finish()
    }
}

impl OutlineBuilder for GlyphPathBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        self.builder.move_to(
            self.origin_x + x * self.scale,
            self.origin_y + y * self.scale,
        );
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.builder.line_to(
            self.origin_x + x * self.scale,
            self.origin_y + y * self.scale,
        );
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        self.builder.quad_to(
            self.origin_x + x1 * self.scale,
            self.origin_y + y1 * self.scale,
            self.origin_x + x * self.scale,
            self.origin_y + y * self.scale,
        );
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        self.builder.cubic_to(
            self.origin_x + x1 * self.scale,
            self.origin_y + y1 * self.scale,
            self.origin_x + x2 * self.scale,
            self.origin_y + y2 * self.scale,
            self.origin_x + x * self.scale,
            self.origin_y + y * self.scale,
        );
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

fn take_path(path_builder: &mut PathBuilder, has_path: &mut bool) -> Option<Path> {
    if !*has_path {
        return None;
    }
    *has_path = false;
    let builder = std::mem::replace(path_builder, PathBuilder::new());
    builder.finish()
}

fn build_stroke(state: &RasterState) -> Stroke {
    Stroke {
        width: state.line_width.to_f32().max(0.0),
        ..Stroke::default()
    }
}

fn fill_paint(color: Color) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color(to_sk_color(color));
    paint.anti_alias = true;
    paint
}

fn to_sk_color(color: Color) -> tiny_skia::Color {
    let r = color.r.clamp(0.0, 1.0);
    let g = color.g.clamp(0.0, 1.0);
    let b = color.b.clamp(0.0, 1.0);
    tiny_skia::Color::from_rgba(r, g, b, 1.0)
        .unwrap_or_else(|| tiny_skia::Color::from_rgba8(0, 0, 0, 255))
}

fn pt_milli_to_px_u32(pt_milli: i64, dpi: u32) -> Result<u32, LabelError> {
    let num = (pt_milli as i128).saturating_mul(dpi as i128);
    let den = 72_000_i128;
    let px = if num >= 0 {
        (num + (den / 2)) / den
    } else {
        -(((-num) + (den / 2)) / den)
    };
    if px <= 0 {
        return Err(LabelError::render(format!(
            "invalid non-positive pixel dimension {px} for pt_milli={pt_milli} dpi={dpi}"
        )));
    }
    u32::try_from(px).map_err(|_| {
        LabelError::render(format!(
            "pixel dimension out of range: {px} for pt_milli={pt_milli} dpi={dpi}"
        ))
    })
}

fn decode_image_to_pixmap(data: &[u8]) -> Option<Pixmap> {
    let decoded = image::load_from_memory(data).ok()?;
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut pixmap = Pixmap::new(width, height)?;
    let src = rgba.as_raw();
    let dst = pixmap.data_mut();
    for (src_px, dst_px) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
        let a = src_px[3];
        dst_px[0] = premul_u8(src_px[0], a);
        dst_px[1] = premul_u8(src_px[1], a);
        dst_px[2] = premul_u8(src_px[2], a);
        dst_px[3] = a;
    }
    Some(pixmap)
}

fn premul_u8(channel: u8, alpha: u8) -> u8 {
    let prod = (channel as u16) * (alpha as u16) + 127;
    ((prod + (prod >> 8)) >> 8) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::tests::tiny_png;
    use crate::canvas::Canvas;
    use crate::types::{Rect as LabelRect, Size};

    fn decode(png: &[u8]) -> image::RgbaImage {
        image::load_from_memory(png).unwrap().to_rgba8()
    }

    #[test]
    fn system_font_lookups_are_remembered_per_render() {
        let bytes = Arc::new(vec![1u8, 2, 3]);
        let mut cache = HashMap::new();
        cache.insert("house sans".to_string(), Some(bytes.clone()));
        cache.insert("missing".to_string(), None);
        assert_eq!(system_font_bytes(&mut cache, "  House Sans "), Some(bytes));
        assert_eq!(system_font_bytes(&mut cache, "Missing"), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn label_size_maps_to_pixels_at_dpi() {
        let doc = Canvas::new(Size::from_mm(58.0, 40.0)).finish();
        let pages = document_to_png_pages(&doc, 200, None, true).unwrap();
        assert_eq!(pages.len(), 1);
        let img = decode(&pages[0]);
        assert_eq!(img.dimensions(), (457, 315));
        assert!(img.pixels().all(|p| p.0 == [255, 255, 255, 255]));
    }

    #[test]
    fn zero_dpi_uses_default() {
        let doc = Canvas::new(Size::from_mm(58.0, 40.0)).finish();
        let a = document_to_png_pages(&doc, 0, None, true).unwrap();
        let b = document_to_png_pages(&doc, DEFAULT_DPI, None, true).unwrap();
        assert_eq!(decode(&a[0]).dimensions(), decode(&b[0]).dimensions());
    }

    #[test]
    fn filled_rect_lands_at_top_left_origin() {
        let mut canvas = Canvas::new(Size::new(Pt::from_f32(72.0), Pt::from_f32(72.0)));
        canvas.draw_rect(
            Pt::ZERO,
            Pt::ZERO,
            Pt::from_f32(36.0),
            Pt::from_f32(36.0),
        );
        let pages = document_to_png_pages(&canvas.finish(), 72, None, true).unwrap();
        let img = decode(&pages[0]);
        assert_eq!(img.get_pixel(5, 5).0, [0, 0, 0, 255]);
        assert_eq!(img.get_pixel(60, 60).0, [255, 255, 255, 255]);
    }

    #[test]
    fn images_are_drawn_from_document_resources() {
        let mut canvas = Canvas::new(Size::new(Pt::from_f32(72.0), Pt::from_f32(72.0)));
        let id = canvas.register_image(tiny_png(4, 4));
        canvas.draw_image(
            LabelRect::new(
                Pt::from_f32(36.0),
                Pt::from_f32(36.0),
                Pt::from_f32(36.0),
                Pt::from_f32(36.0),
            ),
            id,
        );
        let pages = document_to_png_pages(&canvas.finish(), 72, None, true).unwrap();
        let img = decode(&pages[0]);
        let [r, g, b, _] = img.get_pixel(54, 54).0;
        assert!(r > 150 && g < 60 && b < 60);
        assert_eq!(img.get_pixel(10, 10).0, [255, 255, 255, 255]);
    }

    #[test]
    fn unknown_image_resource_is_ignored() {
        let mut canvas = Canvas::new(Size::new(Pt::from_f32(72.0), Pt::from_f32(72.0)));
        canvas.draw_image(
            LabelRect::new(Pt::ZERO, Pt::ZERO, Pt::from_f32(10.0), Pt::from_f32(10.0)),
            "img-0000000000000000",
        );
        assert!(document_to_png_pages(&canvas.finish(), 72, None, true).is_ok());
    }

    #[test]
    fn premultiply_rounds() {
        assert_eq!(premul_u8(255, 255), 255);
        assert_eq!(premul_u8(255, 0), 0);
        assert_eq!(premul_u8(200, 128), 100);
    }
}
