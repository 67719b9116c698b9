//! Line wrapping, the shrink-to-fit loop and the two placement strategies.

use serde::Deserialize;

use crate::canvas::Canvas;
use crate::font::FontRegistry;
use crate::style::{HAlign, Style, VAlign};
use crate::types::{Pt, Rect};

/// Font size decrement applied per shrink iteration.
pub const SHRINK_STEP: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextStrategy {
    /// Paragraph hanging from the top edge; vertical alignment is ignored.
    Flow,
    /// Baselines from the font ascent, honoring vertical alignment.
    #[default]
    Lines,
}

impl TextStrategy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "flow" => Some(Self::Flow),
            "lines" => Some(Self::Lines),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitOutcome {
    pub font_size: f32,
    pub leading: f32,
    pub lines: Vec<String>,
    /// `lines.len() * leading`, in points.
    pub height: f32,
    pub iterations: u32,
    pub overflow: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedLine {
    pub x: Pt,
    pub baseline: Pt,
    pub text: String,
}

/// Splits on `\n` and the `<br>`, `<br/>` and `<br />` markers.
pub fn split_hard_breaks(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = text;
    loop {
        let next = find_break(rest);
        match next {
            Some((start, len)) => {
                parts.push(&rest[..start]);
                rest = &rest[start + len..];
            }
            None => {
                parts.push(rest);
                break;
            }
        }
    }
    parts
}

fn find_break(text: &str) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() {
        match bytes[idx] {
            b'\n' => return Some((idx, 1)),
            b'<' => {
                let tail = &text[idx..];
                for marker in ["<br>", "<br/>", "<br />", "<BR>", "<BR/>", "<BR />"] {
                    if tail.starts_with(marker) {
                        return Some((idx, marker.len()));
                    }
                }
            }
            _ => {}
        }
        idx += 1;
    }
    None
}

/// Greedy word wrap. Words wider than `max_width` are broken between characters.
pub fn wrap_text(
    fonts: &FontRegistry,
    font_name: &str,
    font_size: Pt,
    max_width: Pt,
    text: &str,
) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let measure = |s: &str| fonts.measure_text_width(font_name, font_size, s);
    let mut lines = Vec::new();
    for paragraph in split_hard_breaks(text) {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{current} {word}")
            };
            if measure(&candidate) <= max_width {
                current = candidate;
                continue;
            }
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            if measure(word) <= max_width {
                current = word.to_string();
                continue;
            }
            for ch in word.chars() {
                let mut next = current.clone();
                next.push(ch);
                if !current.is_empty() && measure(&next) > max_width {
                    lines.push(std::mem::take(&mut current));
                    current.push(ch);
                } else {
                    current = next;
                }
            }
        }
        lines.push(current.trim().to_string());
    }
    lines
}

/// Wraps `text` into the box, shrinking by [`SHRINK_STEP`] while it overflows and
/// `font_size - SHRINK_STEP >= min_font_size`. An overflowing result is returned as is.
pub fn fit(
    fonts: &FontRegistry,
    text: &str,
    style: &Style,
    box_width: Pt,
    box_height: Pt,
    min_font_size: Option<f32>,
) -> FitOutcome {
    let available = (box_width - Pt::from_f32(style.left_indent)).max(Pt::ZERO);
    let box_h = box_height.to_f32();
    let mut font_size = style.font_size;
    let mut leading = style.leading;
    let mut iterations = 0u32;
    loop {
        let lines = wrap_text(
            fonts,
            &style.font_name,
            Pt::from_f32(font_size),
            available,
            text,
        );
        let height = lines.len() as f32 * leading;
        if height <= box_h + f32::EPSILON {
            return FitOutcome {
                font_size,
                leading,
                lines,
                height,
                iterations,
                overflow: false,
            };
        }
        let can_shrink =
            min_font_size.is_some_and(|min| font_size - SHRINK_STEP >= min && leading > SHRINK_STEP);
        if !can_shrink {
            log::warn!(
                "text does not fit its box at {font_size}pt ({height:.2}pt > {box_h:.2}pt); reduce the font or enlarge the box"
            );
            return FitOutcome {
                font_size,
                leading,
                lines,
                height,
                iterations,
                overflow: true,
            };
        }
        font_size -= SHRINK_STEP;
        leading -= SHRINK_STEP;
        iterations += 1;
    }
}

fn line_x(fonts: &FontRegistry, style: &Style, font_size: Pt, rect: Rect, line: &str) -> Pt {
    let indent = Pt::from_f32(style.left_indent);
    let left = rect.x + indent;
    let slack = (rect.width - indent - fonts.measure_text_width(&style.font_name, font_size, line))
        .max(Pt::ZERO);
    match style.alignment {
        HAlign::Left => left,
        HAlign::Center => left + slack / 2,
        HAlign::Right => left + slack,
    }
}

/// Baseline positions for a fitted block inside `rect`.
pub fn place_lines(
    fonts: &FontRegistry,
    outcome: &FitOutcome,
    style: &Style,
    rect: Rect,
    strategy: TextStrategy,
) -> Vec<PlacedLine> {
    let font_size = Pt::from_f32(outcome.font_size);
    let leading = Pt::from_f32(outcome.leading);
    let first_baseline = match strategy {
        TextStrategy::Flow => rect.y + font_size,
        TextStrategy::Lines => {
            let mut top = rect.y + fonts.ascent(&style.font_name, font_size);
            if style.valign == VAlign::Middle {
                let slack = (rect.height - Pt::from_f32(outcome.height)).max(Pt::ZERO);
                top += slack / 2;
            }
            top
        }
    };
    outcome
        .lines
        .iter()
        .enumerate()
        .map(|(idx, line)| PlacedLine {
            x: line_x(fonts, style, font_size, rect, line),
            baseline: first_baseline + leading * idx as i32,
            text: line.clone(),
        })
        .collect()
}

/// Fits `text` into `rect` and records it on the canvas.
pub fn draw_text(
    canvas: &mut Canvas,
    fonts: &FontRegistry,
    text: &str,
    style: &Style,
    rect: Rect,
    min_font_size: Option<f32>,
    strategy: TextStrategy,
) -> FitOutcome {
    let outcome = fit(fonts, text, style, rect.width, rect.height, min_font_size);
    let placed = place_lines(fonts, &outcome, style, rect, strategy);
    if placed.iter().all(|line| line.text.is_empty()) {
        return outcome;
    }
    canvas.save_state();
    canvas.set_fill_color(style.text_color);
    canvas.set_font_name(&style.font_name);
    canvas.set_font_size(Pt::from_f32(outcome.font_size));
    for line in placed.into_iter().filter(|line| !line.text.is_empty()) {
        canvas.draw_string(line.x, line.baseline, line.text);
    }
    canvas.restore_state();
    outcome
}
