//! Template compositor: draws every element of a template onto one canvas page.

use serde_json::json;

use crate::assets::ImageStore;
use crate::barcode::{self, BarcodeImageOptions};
use crate::canvas::{Canvas, Document};
use crate::debug::DebugLogger;
use crate::error::ElementDrawError;
use crate::font::FontRegistry;
use crate::style::StyleSheet;
use crate::template::{ElementKind, ElementSpec, Elements, Payload};
use crate::text_fit::{self, TextStrategy};
use crate::types::{Color, Pt, Rect, Size};

/// Shared, read-only inputs of one render.
#[derive(Clone, Copy)]
pub struct RenderContext<'a> {
    pub fonts: &'a FontRegistry,
    pub styles: &'a StyleSheet,
    pub images: &'a ImageStore,
    pub strategy: TextStrategy,
    pub(crate) debug: Option<&'a DebugLogger>,
}

impl<'a> RenderContext<'a> {
    pub fn new(fonts: &'a FontRegistry, styles: &'a StyleSheet, images: &'a ImageStore) -> Self {
        Self {
            fonts,
            styles,
            images,
            strategy: TextStrategy::default(),
            debug: None,
        }
    }

    pub fn with_strategy(mut self, strategy: TextStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementFailure {
    pub key: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderReport {
    pub drawn: Vec<String>,
    pub failed: Vec<ElementFailure>,
    /// Text elements drawn at their smallest allowed size without fitting.
    pub overflowed: Vec<String>,
}

/// Renders one label page. Element failures are logged and leave only that element out.
pub fn render(
    ctx: &RenderContext<'_>,
    page_width_mm: f32,
    page_height_mm: f32,
    elements: &Elements,
    payload: &Payload,
) -> Document {
    render_with_report(ctx, page_width_mm, page_height_mm, elements, payload).0
}

pub fn render_with_report(
    ctx: &RenderContext<'_>,
    page_width_mm: f32,
    page_height_mm: f32,
    elements: &Elements,
    payload: &Payload,
) -> (Document, RenderReport) {
    let mut canvas = Canvas::new(Size::from_mm(page_width_mm, page_height_mm));
    let mut report = RenderReport::default();

    for (key, spec) in elements.iter() {
        let rect = match spec.rect() {
            Ok(rect) => rect,
            Err(err) => {
                record_failure(ctx, &mut report, key, spec, &err);
                continue;
            }
        };
        if spec.debug {
            draw_outline(&mut canvas, rect);
        }
        let checkpoint = canvas.checkpoint();
        let value = payload.text(key);
        match draw_element(ctx, &mut canvas, key, spec, rect, &value) {
            Ok(overflow) => {
                if overflow {
                    report.overflowed.push(key.to_string());
                }
                report.drawn.push(key.to_string());
            }
            Err(err) => {
                canvas.rollback(checkpoint);
                record_failure(ctx, &mut report, key, spec, &err);
            }
        }
    }

    if let Some(logger) = ctx.debug {
        logger.log_event(
            "label.render",
            json!({
                "elements": elements.len(),
                "drawn": report.drawn.len(),
                "failed": report.failed.len(),
                "overflowed": report.overflowed.len(),
            }),
        );
    }
    (canvas.finish(), report)
}

fn record_failure(
    ctx: &RenderContext<'_>,
    report: &mut RenderReport,
    key: &str,
    spec: &ElementSpec,
    err: &ElementDrawError,
) {
    log::error!("error while drawing {key}: {err}");
    if let Some(logger) = ctx.debug {
        logger.log_event(
            "label.element_error",
            json!({"key": key, "kind": spec.kind.as_str(), "error": err.to_string()}),
        );
        logger.increment("label.element_error", 1);
    }
    report.failed.push(ElementFailure {
        key: key.to_string(),
        message: err.to_string(),
    });
}

fn draw_outline(canvas: &mut Canvas, rect: Rect) {
    canvas.save_state();
    canvas.set_stroke_color(Color::BLACK);
    canvas.set_line_width(Pt::from_f32(1.0));
    canvas.stroke_rect(rect);
    canvas.restore_state();
}

// Returns whether a text element overflowed its box.
fn draw_element(
    ctx: &RenderContext<'_>,
    canvas: &mut Canvas,
    key: &str,
    spec: &ElementSpec,
    rect: Rect,
    value: &str,
) -> Result<bool, ElementDrawError> {
    match spec.kind {
        ElementKind::Image => {
            let filename = spec
                .filename
                .as_deref()
                .filter(|f| !f.trim().is_empty())
                .ok_or(ElementDrawError::MissingFilename)?;
            let image = ctx.images.load(filename)?;
            let placed = rect.fit_aspect(image.width as f32, image.height as f32);
            let id = canvas.register_image(image.data);
            canvas.draw_image(placed, id);
            Ok(false)
        }
        ElementKind::Barcode => {
            let image = barcode::render_ean13_png(value, &BarcodeImageOptions::default())?;
            let placed = rect.fit_aspect(image.width as f32, image.height as f32);
            let id = canvas.register_image(image.png);
            canvas.draw_image(placed, id);
            Ok(false)
        }
        ElementKind::BarcodeV2 => {
            barcode::draw_ean13_vector(canvas, ctx.fonts, value, rect)?;
            Ok(false)
        }
        ElementKind::Text => {
            let style = ctx.styles.resolve(spec.style_name(), &spec.style_overrides);
            let outcome = text_fit::draw_text(
                canvas,
                ctx.fonts,
                value,
                &style,
                rect,
                spec.options.min_fontsize,
                ctx.strategy,
            );
            if outcome.overflow {
                log::info!("text of {key} does not fit its box: {value}");
            }
            if let Some(logger) = ctx.debug {
                logger.log_event(
                    "label.text_fit",
                    json!({
                        "key": key,
                        "style": style.name,
                        "font_size": outcome.font_size,
                        "lines": outcome.lines.len(),
                        "iterations": outcome.iterations,
                        "overflow": outcome.overflow,
                    }),
                );
                if outcome.overflow {
                    logger.increment("label.text_overflow", 1);
                }
            }
            Ok(outcome.overflow)
        }
    }
}
