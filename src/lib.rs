mod assets;
mod barcode;
mod canvas;
mod debug;
mod error;
mod font;
mod label;
mod payload;
mod pdf;
mod pdf_raster;
mod pdfinspect;
#[cfg(feature = "python")]
mod python;
mod raster;
mod style;
mod template;
mod text_fit;
mod types;

pub use assets::{ImageStore, LoadedImage};
pub use barcode::{
    BarcodeImageOptions, EAN13_MODULES, Ean13, draw_ean13_vector, ean13_checksum, normalize_ean13,
    render_ean13_png,
};
use base64::Engine;
pub use canvas::{Canvas, Command, Document, Page};
use debug::DebugLogger;
pub use error::{ElementDrawError, LabelError};
pub use font::{FontRegistry, STANDARD_FAMILIES, global_registry, register_fonts};
pub use label::{ElementFailure, RenderContext, RenderReport};
pub use payload::{
    CompanyInfo, ContractorFields, DEFAULT_BARCODE, OrgStandart, ProductFields, format_dates,
    format_nutrition,
};
pub use pdf::document_to_pdf as finalize_pdf;
pub use pdf_raster::{pdf_bytes_to_png_pages, rasterize};
pub use pdfinspect::{PdfInspectReport, inspect_pdf_bytes, inspect_pdf_path};
pub use raster::{DEFAULT_DPI, document_to_png_pages};
use std::path::PathBuf;
use std::sync::Arc;
pub use style::{HAlign, Style, StyleOverrides, StyleSheet, VAlign};
pub use template::{ElementKind, ElementOptions, ElementSpec, Elements, Payload, Template};
pub use text_fit::{FitOutcome, SHRINK_STEP, TextStrategy};
pub use types::{Color, PT_PER_MM, Pt, Rect, Size, flip_y, mm_to_pt};

/// Environment variable naming the image directory used when none is configured.
pub const IMAGE_DIR_ENV: &str = "LABELKIT_IMAGE_DIR";

/// Renders label templates to PDF and PNG.
///
/// The engine holds only read-only state and is shared freely across threads; every render
/// builds its own canvas.
pub struct LabelEngine {
    fonts: Arc<FontRegistry>,
    styles: StyleSheet,
    images: ImageStore,
    strategy: TextStrategy,
    default_dpi: u32,
    shape_text: bool,
    debug: Option<DebugLogger>,
}

#[derive(Clone)]
pub struct LabelEngineBuilder {
    fonts: Option<Arc<FontRegistry>>,
    font_dirs: Vec<PathBuf>,
    font_files: Vec<PathBuf>,
    image_dir: Option<PathBuf>,
    images: Vec<(String, Vec<u8>)>,
    styles: Option<StyleSheet>,
    strategy: TextStrategy,
    default_dpi: u32,
    debug_path: Option<PathBuf>,
    shape_text: bool,
}

impl LabelEngine {
    pub fn builder() -> LabelEngineBuilder {
        LabelEngineBuilder::new()
    }

    pub fn fonts(&self) -> &FontRegistry {
        self.fonts.as_ref()
    }

    pub fn styles(&self) -> &StyleSheet {
        &self.styles
    }

    pub fn text_strategy(&self) -> TextStrategy {
        self.strategy
    }

    pub fn default_dpi(&self) -> u32 {
        self.default_dpi
    }

    fn context(&self) -> RenderContext<'_> {
        let mut ctx = RenderContext::new(self.fonts.as_ref(), &self.styles, &self.images)
            .with_strategy(self.strategy);
        ctx.debug = self.debug.as_ref();
        ctx
    }

    fn emit_debug_summary(&self, context: &str) {
        if let Some(logger) = self.debug.as_ref() {
            logger.emit_summary(context);
            logger.flush();
        }
    }

    fn resolve_dpi(&self, dpi: u32) -> u32 {
        if dpi == 0 { self.default_dpi } else { dpi }
    }

    /// Draws `template` with `payload` into a single-page document.
    pub fn render_document(
        &self,
        template: &Template,
        payload: &Payload,
    ) -> Result<Document, LabelError> {
        self.render_with_report(template, payload)
            .map(|(document, _)| document)
    }

    /// Like [`LabelEngine::render_document`], also reporting which elements were drawn,
    /// skipped or overflowed.
    pub fn render_with_report(
        &self,
        template: &Template,
        payload: &Payload,
    ) -> Result<(Document, RenderReport), LabelError> {
        template.validate()?;
        let (width, height) = template.page_size_mm();
        let (document, report) =
            label::render_with_report(&self.context(), width, height, &template.elements, payload);
        if !report.failed.is_empty() {
            log::warn!(
                "label rendered with {} failed element(s) out of {}",
                report.failed.len(),
                template.elements.len()
            );
        }
        Ok((document, report))
    }

    /// Serializes an already drawn document.
    pub fn finalize_pdf(&self, document: &Document) -> Result<Vec<u8>, LabelError> {
        pdf::document_to_pdf(document, self.fonts.as_ref(), self.shape_text)
    }

    pub fn render_pdf(&self, template: &Template, payload: &Payload) -> Result<Vec<u8>, LabelError> {
        let document = self.render_document(template, payload)?;
        let bytes = self.finalize_pdf(&document)?;
        self.emit_debug_summary("render_pdf");
        Ok(bytes)
    }

    /// Renders the label to PDF and rasterizes its page. `dpi == 0` uses the engine default.
    pub fn render_png(
        &self,
        template: &Template,
        payload: &Payload,
        dpi: u32,
    ) -> Result<Vec<u8>, LabelError> {
        let document = self.render_document(template, payload)?;
        let bytes = self.finalize_pdf(&document)?;
        let png = self.rasterize_first_page(&bytes, dpi)?;
        self.emit_debug_summary("render_png");
        Ok(png)
    }

    /// Rasterizes the first page of `pdf`, falling back to this engine's fonts for anything
    /// the PDF does not embed.
    pub fn rasterize(&self, pdf: &[u8], dpi: u32) -> Result<Vec<u8>, LabelError> {
        self.rasterize_first_page(pdf, dpi)
    }

    fn rasterize_first_page(&self, pdf: &[u8], dpi: u32) -> Result<Vec<u8>, LabelError> {
        let mut pages = pdf_raster::pdf_bytes_to_png_pages(
            pdf,
            self.resolve_dpi(dpi),
            Some(self.fonts.as_ref()),
            self.shape_text,
        )?;
        if pages.is_empty() {
            return Err(LabelError::render("no page produced"));
        }
        Ok(pages.swap_remove(0))
    }

    pub fn render_pdf_base64(
        &self,
        template: &Template,
        payload: &Payload,
    ) -> Result<String, LabelError> {
        let bytes = self.render_pdf(template, payload)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn render_png_base64(
        &self,
        template: &Template,
        payload: &Payload,
        dpi: u32,
    ) -> Result<String, LabelError> {
        let bytes = self.render_png(template, payload, dpi)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    /// Outline preview: every element boxed and filled with its own key.
    pub fn preview_from_template(&self, template: &Template, dpi: u32) -> Result<Vec<u8>, LabelError> {
        template.validate()?;
        let (preview, payload) = template.preview();
        self.render_png(&preview, &payload, dpi)
    }

    pub fn preview_png_base64(&self, template: &Template, dpi: u32) -> Result<String, LabelError> {
        let bytes = self.preview_from_template(template, dpi)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    /// Renders every job to PDF in parallel. Results keep the order of `jobs` and fail
    /// independently.
    pub fn render_many(&self, jobs: &[(Template, Payload)]) -> Vec<Result<Vec<u8>, LabelError>> {
        use rayon::prelude::*;

        let results: Vec<Result<Vec<u8>, LabelError>> = jobs
            .par_iter()
            .map(|(template, payload)| {
                let document = self.render_document(template, payload)?;
                self.finalize_pdf(&document)
            })
            .collect();
        self.emit_debug_summary("render_many");
        results
    }
}

impl Default for LabelEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LabelEngineBuilder {
    pub fn new() -> Self {
        Self {
            fonts: None,
            font_dirs: Vec::new(),
            font_files: Vec::new(),
            image_dir: None,
            images: Vec::new(),
            styles: None,
            strategy: TextStrategy::default(),
            default_dpi: DEFAULT_DPI,
            debug_path: None,
            shape_text: true,
        }
    }

    /// Uses an existing registry, such as the one returned by [`register_fonts`]. Font
    /// directories and files added to the builder are ignored when one is set.
    pub fn font_registry(mut self, fonts: Arc<FontRegistry>) -> Self {
        self.fonts = Some(fonts);
        self
    }

    /// Registers the standard label families from `path`, plus any other font file in it.
    pub fn font_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_dirs.push(path.into());
        self
    }

    pub fn font_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_files.push(path.into());
        self
    }

    pub fn image_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.image_dir = Some(path.into());
        self
    }

    /// Makes an in-memory image available to templates under `name`.
    pub fn image(mut self, name: impl Into<String>, data: Vec<u8>) -> Self {
        self.images.push((name.into(), data));
        self
    }

    pub fn styles(mut self, styles: StyleSheet) -> Self {
        self.styles = Some(styles);
        self
    }

    pub fn text_strategy(mut self, strategy: TextStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn default_dpi(mut self, dpi: u32) -> Self {
        self.default_dpi = dpi;
        self
    }

    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn shape_text(mut self, enabled: bool) -> Self {
        self.shape_text = enabled;
        self
    }

    pub fn build(self) -> Result<LabelEngine, LabelError> {
        if self.default_dpi == 0 {
            return Err(LabelError::input("default_dpi must be greater than zero"));
        }
        for dir in &self.font_dirs {
            if !dir.is_dir() {
                return Err(LabelError::input(format!(
                    "font directory {} is not readable",
                    dir.display()
                )));
            }
        }
        for file in &self.font_files {
            if !file.is_file() {
                return Err(LabelError::input(format!(
                    "font file {} is not readable",
                    file.display()
                )));
            }
        }

        let image_dir = match self.image_dir {
            Some(dir) if !dir.is_dir() => {
                return Err(LabelError::input(format!(
                    "image directory {} is not readable",
                    dir.display()
                )));
            }
            Some(dir) => Some(dir),
            None => image_dir_from_env(),
        };
        let mut images = ImageStore::new(image_dir);
        for (name, data) in self.images {
            images.insert(name, data);
        }

        let fonts = match self.fonts {
            Some(fonts) => fonts,
            None if self.font_dirs.is_empty() && self.font_files.is_empty() => {
                global_registry().unwrap_or_else(|| Arc::new(FontRegistry::new()))
            }
            None => {
                let mut registry = FontRegistry::new();
                registry.set_shape_text(self.shape_text);
                for dir in &self.font_dirs {
                    registry.register_standard_families(dir);
                }
                for file in &self.font_files {
                    registry.register_file(file);
                }
                Arc::new(registry)
            }
        };

        let debug = match self.debug_path {
            Some(path) => Some(DebugLogger::new(&path).map_err(|err| {
                LabelError::input(format!("debug log {}: {err}", path.display()))
            })?),
            None => None,
        };

        Ok(LabelEngine {
            fonts,
            styles: self.styles.unwrap_or_else(StyleSheet::builtin),
            images,
            strategy: self.strategy,
            default_dpi: self.default_dpi,
            shape_text: self.shape_text,
            debug,
        })
    }
}

fn image_dir_from_env() -> Option<PathBuf> {
    let raw = std::env::var_os(IMAGE_DIR_ENV)?;
    let dir = PathBuf::from(raw);
    if dir.is_dir() {
        Some(dir)
    } else {
        log::warn!("{IMAGE_DIR_ENV}={} is not a directory; ignored", dir.display());
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::tests::tiny_png;
    use lopdf::Document as LoDocument;
    use std::time::{SystemTime, UNIX_EPOCH};

    const LABEL_TEMPLATE: &str = r#"{
        "width": 58,
        "height": 40,
        "elements": {
            "name": {"x": 2, "y": 2, "width": 54, "height": 8, "style": "product__title"},
            "logo": {"x": 2, "y": 11, "width": 8, "height": 8, "type": "image", "filename": "nope.png"},
            "eac": {"x": 46, "y": 11, "width": 10, "height": 8, "type": "image", "filename": "eac.png"},
            "barcode": {"x": 2, "y": 22, "width": 40, "height": 16, "type": "barcode"}
        }
    }"#;

    fn engine() -> LabelEngine {
        LabelEngine::builder()
            .image("eac.png", tiny_png(20, 16))
            .build()
            .expect("engine")
    }

    fn fixture() -> (Template, Payload) {
        let template = Template::from_json(LABEL_TEMPLATE).expect("template");
        let payload =
            Payload::from_json(r#"{"name": "Сырники", "barcode": "123456789012"}"#).expect("payload");
        (template, payload)
    }

    fn temp_path(stem: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        std::env::temp_dir().join(format!("labelkit_{stem}_{}_{nanos}", std::process::id()))
    }

    #[test]
    fn engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LabelEngine>();
    }

    #[test]
    fn render_pdf_has_one_page_with_label_media_box() {
        let (template, payload) = fixture();
        let bytes = engine().render_pdf(&template, &payload).expect("pdf");
        let doc = LoDocument::load_mem(&bytes).expect("parse");
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 1);
        let page_id = *pages.values().next().expect("page");
        let media_box = doc
            .get_object(page_id)
            .and_then(|obj| obj.as_dict())
            .and_then(|dict| dict.get(b"MediaBox"))
            .and_then(|obj| obj.as_array())
            .expect("media box");
        let w = media_box[2].as_float().expect("width");
        let h = media_box[3].as_float().expect("height");
        assert!((w - 58.0 * PT_PER_MM).abs() < 0.01);
        assert!((h - 40.0 * PT_PER_MM).abs() < 0.01);
    }

    #[test]
    fn render_pdf_is_byte_identical_across_runs() {
        let (template, payload) = fixture();
        let engine = engine();
        let first = engine.render_pdf(&template, &payload).expect("first");
        let second = engine.render_pdf(&template, &payload).expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn broken_element_is_reported_and_the_rest_is_drawn() {
        let (template, payload) = fixture();
        let (document, report) = engine()
            .render_with_report(&template, &payload)
            .expect("render");
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].key, "logo");
        assert_eq!(report.drawn, vec!["name", "eac", "barcode"]);
        let placed_images = document.pages[0]
            .commands
            .iter()
            .filter(|c| matches!(c, Command::DrawImage { .. }))
            .count();
        assert_eq!(placed_images, 2);
        let barcode_png = render_ean13_png("123456789012", &BarcodeImageOptions::default())
            .expect("barcode")
            .png;
        assert!(document.images.values().any(|bytes| *bytes == barcode_png));
    }

    #[test]
    fn malformed_element_does_not_reject_the_label() {
        let template = Template::from_json(
            r#"{
                "width": 58,
                "height": 40,
                "elements": {
                    "a": {"x": 2, "y": 2, "width": 54, "height": 8},
                    "b": {"x": "left", "y": 12, "width": 54, "height": 8},
                    "c": {"x": 2, "y": 22, "width": 54, "height": 8},
                    "d": {"x": 2, "y": 32, "width": 8, "height": 6, "type": "image"}
                }
            }"#,
        )
        .expect("template");
        let payload = Payload::from_json(r#"{"a": "first", "b": "second", "c": "third"}"#)
            .expect("payload");
        let engine = engine();
        let (document, report) = engine
            .render_with_report(&template, &payload)
            .expect("render");
        assert_eq!(report.drawn, vec!["a", "c"]);
        let failed: Vec<&str> = report.failed.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(failed, vec!["b", "d"]);
        assert!(report.failed[0].message.contains("field x"));
        assert_eq!(report.failed[1].message, "image element has no filename");
        let texts: Vec<&str> = document.pages[0]
            .commands
            .iter()
            .filter_map(|c| match c {
                Command::DrawString { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["first", "third"]);

        let bytes = engine.render_pdf(&template, &payload).expect("pdf");
        let doc = LoDocument::load_mem(&bytes).expect("parse");
        assert_eq!(doc.get_pages().len(), 1);
    }

    fn repo_font_path(file_name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("assets")
            .join("fonts")
            .join(file_name)
    }

    fn count_token(haystack: &[u8], token: &[u8]) -> usize {
        haystack
            .windows(token.len())
            .filter(|window| *window == token)
            .count()
    }

    #[test]
    fn registered_truetype_font_embeds_deterministically_and_rasterizes() {
        let engine = LabelEngine::builder()
            .font_file(repo_font_path("DejaVuSans.ttf"))
            .build()
            .expect("engine");
        assert!(engine.fonts().contains("DejaVu Sans"));
        let template = Template::from_json(
            r#"{
                "width": 58,
                "height": 40,
                "elements": {
                    "name": {"x": 2, "y": 2, "width": 54, "height": 20,
                             "style_overrides": {"fontName": "DejaVu Sans", "fontSize": 18}}
                }
            }"#,
        )
        .expect("template");
        let payload = Payload::from_json(r#"{"name": "Сырники"}"#).expect("payload");

        let first = engine.render_pdf(&template, &payload).expect("first");
        let second = engine.render_pdf(&template, &payload).expect("second");
        assert_eq!(first, second);
        assert_eq!(count_token(&first, b"/FontFile2"), 1);
        assert_eq!(count_token(&first, b"/Subtype /Type0"), 1);
        assert_eq!(count_token(&first, b"/BaseFont /Helvetica"), 0);

        let png = engine.rasterize(&first, 200).expect("png");
        let img = image::load_from_memory(&png).expect("decode").to_rgba8();
        let dark = img
            .pixels()
            .filter(|p| p.0[0] < 128 && p.0[1] < 128 && p.0[2] < 128)
            .count();
        assert!(dark > 200, "only {dark} dark pixels");
    }

    #[test]
    fn render_png_uses_default_dpi() {
        let (template, payload) = fixture();
        let png = engine().render_png(&template, &payload, 0).expect("png");
        let img = image::load_from_memory(&png).expect("decode");
        assert_eq!((img.width(), img.height()), (457, 315));
    }

    #[test]
    fn base64_outputs_decode_to_pdf_and_png() {
        let (template, payload) = fixture();
        let engine = engine();
        let pdf = engine.render_pdf_base64(&template, &payload).expect("pdf");
        let pdf = base64::engine::general_purpose::STANDARD
            .decode(pdf)
            .expect("decode pdf");
        assert!(pdf.starts_with(b"%PDF-1.7"));
        let png = engine.render_png_base64(&template, &payload, 72).expect("png");
        let png = base64::engine::general_purpose::STANDARD
            .decode(png)
            .expect("decode png");
        assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));
    }

    #[test]
    fn preview_draws_outlines_at_requested_dpi() {
        let (template, _) = fixture();
        let png = engine().preview_from_template(&template, 100).expect("preview");
        let img = image::load_from_memory(&png).expect("decode").to_rgba8();
        assert_eq!(img.width(), 228);
        assert!(img.pixels().any(|p| p.0[..3] != [255, 255, 255]));
    }

    #[test]
    fn invalid_template_is_rejected_before_drawing() {
        let template = Template {
            width: Some(0.0),
            height: Some(40.0),
            elements: Elements::new(),
        };
        let err = engine()
            .render_pdf(&template, &Payload::new())
            .expect_err("must fail");
        assert!(matches!(err, LabelError::Input(_)));
    }

    #[test]
    fn render_many_keeps_order_and_isolates_failures() {
        let (template, payload) = fixture();
        let broken = Template {
            width: None,
            ..template.clone()
        };
        let jobs = vec![
            (template.clone(), payload.clone()),
            (broken, payload.clone()),
            (template, payload),
        ];
        let engine = engine();
        let results = engine.render_many(&jobs);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(LabelError::Input(_))));
        assert_eq!(
            results[0].as_ref().expect("first"),
            results[2].as_ref().expect("third")
        );
    }

    #[test]
    fn build_rejects_bad_configuration() {
        let err = LabelEngine::builder()
            .default_dpi(0)
            .build()
            .err()
            .expect("dpi");
        assert!(matches!(err, LabelError::Input(_)));

        let err = LabelEngine::builder()
            .font_dir(temp_path("missing_fonts"))
            .build()
            .err()
            .expect("font dir");
        assert!(err.to_string().contains("font directory"));

        let err = LabelEngine::builder()
            .image_dir(temp_path("missing_images"))
            .build()
            .err()
            .expect("image dir");
        assert!(err.to_string().contains("image directory"));
    }

    #[test]
    fn debug_log_records_element_errors_and_summary() {
        let path = temp_path("debug").with_extension("jsonl");
        let engine = LabelEngine::builder()
            .debug_log(&path)
            .build()
            .expect("engine");
        let (template, payload) = fixture();
        engine.render_pdf(&template, &payload).expect("pdf");

        let text = std::fs::read_to_string(&path).expect("read log");
        let kinds: Vec<String> = text
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).expect("json line");
                value["type"].as_str().unwrap_or_default().to_string()
            })
            .collect();
        assert!(kinds.iter().any(|k| k == "label.element_error"));
        assert!(kinds.iter().any(|k| k == "label.render"));
        assert_eq!(kinds.last().map(String::as_str), Some("debug.summary"));
        let _ = std::fs::remove_file(&path);
    }
}
