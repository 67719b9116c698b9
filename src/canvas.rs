use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::types::{Color, Pt, Rect, Size};

/// Recorded drawing operation. Coordinates are page points with the origin at the top-left
/// corner and Y growing downward.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SaveState,
    RestoreState,
    SetFillColor(Color),
    SetStrokeColor(Color),
    SetLineWidth(Pt),
    SetFontName(String),
    SetFontSize(Pt),
    MoveTo {
        x: Pt,
        y: Pt,
    },
    LineTo {
        x: Pt,
        y: Pt,
    },
    ClosePath,
    Fill,
    Stroke,
    // `y` is the baseline.
    DrawString {
        x: Pt,
        y: Pt,
        text: String,
    },
    DrawRect {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
    },
    StrokeRect {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
    },
    DrawImage {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
        resource_id: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub commands: Vec<Command>,
}

/// Finished drawing: one page size, the recorded pages and the image resources they reference.
#[derive(Debug, Clone)]
pub struct Document {
    pub page_size: Size,
    pub pages: Vec<Page>,
    /// Encoded image bytes keyed by `resource_id`.
    pub images: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
struct GraphicsState {
    fill_color: Color,
    stroke_color: Color,
    line_width: Pt,
    font_size: Pt,
    font_name: String,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            fill_color: Color::BLACK,
            stroke_color: Color::BLACK,
            line_width: Pt::from_f32(1.0),
            font_size: Pt::from_f32(12.0),
            font_name: "Helvetica".to_string(),
        }
    }
}

/// Snapshot taken before drawing one element. Rolling back discards everything recorded after it.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    command_len: usize,
    stack_len: usize,
    image_len: usize,
    state: GraphicsState,
}

pub struct Canvas {
    page_size: Size,
    current: Page,
    state_stack: Vec<GraphicsState>,
    current_state: GraphicsState,
    images: BTreeMap<String, Vec<u8>>,
    image_order: Vec<String>,
}

impl Canvas {
    pub fn new(page_size: Size) -> Self {
        Self {
            page_size,
            current: Page::default(),
            state_stack: Vec::new(),
            current_state: GraphicsState::default(),
            images: BTreeMap::new(),
            image_order: Vec::new(),
        }
    }

    pub fn page_size(&self) -> Size {
        self.page_size
    }

    pub fn save_state(&mut self) {
        self.state_stack.push(self.current_state.clone());
        self.current.commands.push(Command::SaveState);
    }

    pub fn restore_state(&mut self) {
        if let Some(state) = self.state_stack.pop() {
            self.current_state = state;
            self.current.commands.push(Command::RestoreState);
        }
    }

    pub fn set_fill_color(&mut self, color: Color) {
        if self.current_state.fill_color == color {
            return;
        }
        self.current_state.fill_color = color;
        self.current.commands.push(Command::SetFillColor(color));
    }

    pub fn set_stroke_color(&mut self, color: Color) {
        if self.current_state.stroke_color == color {
            return;
        }
        self.current_state.stroke_color = color;
        self.current.commands.push(Command::SetStrokeColor(color));
    }

    pub fn set_line_width(&mut self, width: Pt) {
        let width = if width < Pt::ZERO { Pt::ZERO } else { width };
        if self.current_state.line_width == width {
            return;
        }
        self.current_state.line_width = width;
        self.current.commands.push(Command::SetLineWidth(width));
    }

    pub fn set_font_name(&mut self, name: &str) {
        if self.current_state.font_name == name {
            return;
        }
        self.current_state.font_name = name.to_string();
        self.current
            .commands
            .push(Command::SetFontName(self.current_state.font_name.clone()));
    }

    pub fn set_font_size(&mut self, size: Pt) {
        if self.current_state.font_size == size {
            return;
        }
        self.current_state.font_size = size;
        self.current.commands.push(Command::SetFontSize(size));
    }

    pub fn draw_string(&mut self, x: Pt, baseline: Pt, text: impl Into<String>) {
        self.current.commands.push(Command::DrawString {
            x,
            y: baseline,
            text: text.into(),
        });
    }

    pub fn draw_rect(&mut self, x: Pt, y: Pt, width: Pt, height: Pt) {
        self.current.commands.push(Command::DrawRect {
            x,
            y,
            width,
            height,
        });
    }

    pub fn stroke_rect(&mut self, rect: Rect) {
        self.current.commands.push(Command::StrokeRect {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
        });
    }

    /// Stores encoded image bytes and returns their content-addressed resource id.
    pub fn register_image(&mut self, bytes: Vec<u8>) -> String {
        let digest = Sha256::digest(&bytes);
        let mut id = String::from("img-");
        for byte in digest.iter().take(8) {
            id.push_str(&format!("{:02x}", byte));
        }
        if !self.images.contains_key(&id) {
            self.images.insert(id.clone(), bytes);
            self.image_order.push(id.clone());
        }
        id
    }

    pub fn draw_image(&mut self, rect: Rect, resource_id: impl Into<String>) {
        self.current.commands.push(Command::DrawImage {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            resource_id: resource_id.into(),
        });
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            command_len: self.current.commands.len(),
            stack_len: self.state_stack.len(),
            image_len: self.image_order.len(),
            state: self.current_state.clone(),
        }
    }

    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        self.current.commands.truncate(checkpoint.command_len);
        self.state_stack.truncate(checkpoint.stack_len);
        for id in self.image_order.drain(checkpoint.image_len..) {
            self.images.remove(&id);
        }
        self.current_state = checkpoint.state;
    }

    pub fn current_command_count(&self) -> usize {
        self.current.commands.len()
    }

    /// Closes the single label page. Unbalanced saves are closed so the page is always valid.
    pub fn finish(mut self) -> Document {
        while !self.state_stack.is_empty() {
            self.restore_state();
        }
        Document {
            page_size: self.page_size,
            pages: vec![self.current],
            images: self.images,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canvas() -> Canvas {
        Canvas::new(Size::from_mm(58.0, 40.0))
    }

    #[test]
    fn state_setters_skip_redundant_commands() {
        let mut c = canvas();
        c.set_font_size(Pt::from_f32(12.0));
        c.set_fill_color(Color::BLACK);
        c.set_font_name("Helvetica");
        assert_eq!(c.current_command_count(), 0);
        c.set_font_size(Pt::from_f32(10.0));
        assert_eq!(c.current_command_count(), 1);
    }

    #[test]
    fn rollback_discards_partial_element() {
        let mut c = canvas();
        c.draw_string(Pt::ZERO, Pt::from_f32(10.0), "kept");
        let cp = c.checkpoint();
        c.save_state();
        c.set_font_size(Pt::from_f32(6.0));
        let id = c.register_image(vec![1, 2, 3]);
        c.draw_image(
            Rect::new(Pt::ZERO, Pt::ZERO, Pt::from_f32(5.0), Pt::from_f32(5.0)),
            id,
        );
        c.rollback(cp);
        c.set_font_size(Pt::from_f32(6.0));
        let doc = c.finish();
        assert_eq!(doc.pages.len(), 1);
        assert!(doc.images.is_empty());
        assert_eq!(
            doc.pages[0].commands,
            vec![
                Command::DrawString {
                    x: Pt::ZERO,
                    y: Pt::from_f32(10.0),
                    text: "kept".to_string(),
                },
                Command::SetFontSize(Pt::from_f32(6.0)),
            ]
        );
    }

    #[test]
    fn register_image_is_content_addressed() {
        let mut c = canvas();
        let a = c.register_image(vec![9, 9, 9]);
        let b = c.register_image(vec![9, 9, 9]);
        let other = c.register_image(vec![1]);
        assert_eq!(a, b);
        assert_ne!(a, other);
        assert!(a.starts_with("img-"));
        assert_eq!(c.finish().images.len(), 2);
    }

    #[test]
    fn finish_balances_open_states() {
        let mut c = canvas();
        c.save_state();
        c.save_state();
        let doc = c.finish();
        let restores = doc.pages[0]
            .commands
            .iter()
            .filter(|cmd| matches!(cmd, Command::RestoreState))
            .count();
        assert_eq!(restores, 2);
    }
}
