use crate::canvas::{Command, Document, Page};
use crate::error::LabelError;
use crate::font::FontRegistry;
use crate::raster;
use crate::types::{Color, Pt, Size, flip_y_f32};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary as LoDictionary, Document as LoDocument, Object as LoObject, ObjectId};
use std::collections::{BTreeMap, HashMap};

#[derive(Clone, Copy, Debug)]
struct Matrix {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    e: f32,
    f: f32,
}

impl Matrix {
    fn identity() -> Self {
        Self::from_operands(1.0, 0.0, 0.0, 1.0, 0.0, 0.0)
    }

    fn from_operands(a: f32, b: f32, c: f32, d: f32, e: f32, f: f32) -> Self {
        Self { a, b, c, d, e, f }
    }

    fn translation(tx: f32, ty: f32) -> Self {
        Self::from_operands(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    fn concat(self, rhs: Self) -> Self {
        Self {
            a: self.a * rhs.a + self.b * rhs.c,
            b: self.a * rhs.b + self.b * rhs.d,
            c: self.c * rhs.a + self.d * rhs.c,
            d: self.c * rhs.b + self.d * rhs.d,
            e: self.e * rhs.a + self.f * rhs.c + rhs.e,
            f: self.e * rhs.b + self.f * rhs.d + rhs.f,
        }
    }

    fn transform_point(self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    fn axis_aligned_unit_rect(self) -> Option<(f32, f32, f32, f32)> {
        if self.b.abs() > 0.0001 || self.c.abs() > 0.0001 {
            return None;
        }
        let x0 = self.e;
        let x1 = self.e + self.a;
        let y0 = self.f;
        let y1 = self.f + self.d;
        Some((x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum CodeWidth {
    #[default]
    SingleByte,
    TwoByte,
}

#[derive(Clone, Default)]
struct PdfFontResource {
    font_name: String,
    to_unicode: HashMap<u16, String>,
    default_width: f32,
    widths: HashMap<u16, f32>,
    code_width: CodeWidth,
}

#[derive(Default)]
struct PdfResources {
    fonts: HashMap<String, PdfFontResource>,
    xobjects: HashMap<String, ObjectId>,
}

#[derive(Clone)]
struct ParseState {
    ctm: Matrix,
    font_resource: Option<String>,
    font_size: f32,
    text_matrix: Matrix,
    text_line_matrix: Matrix,
}

impl Default for ParseState {
    fn default() -> Self {
        Self {
            ctm: Matrix::identity(),
            font_resource: None,
            font_size: 12.0,
            text_matrix: Matrix::identity(),
            text_line_matrix: Matrix::identity(),
        }
    }
}

struct PageParser<'a> {
    doc: &'a LoDocument,
    resources: PdfResources,
    page_height: f32,
    commands: Vec<Command>,
    images: BTreeMap<String, Vec<u8>>,
}

/// Rasterizes the first page of `pdf` at `dpi` into PNG bytes.
pub fn rasterize(pdf: &[u8], dpi: u32) -> Result<Vec<u8>, LabelError> {
    let mut pages = pdf_bytes_to_png_pages(pdf, dpi, None, true)?;
    if pages.is_empty() {
        return Err(LabelError::render("no page produced"));
    }
    Ok(pages.swap_remove(0))
}

/// Rasterizes every page of `bytes`. Fonts embedded in the PDF take precedence over
/// `registry`; anything else falls back to system fonts.
pub fn pdf_bytes_to_png_pages(
    bytes: &[u8],
    dpi: u32,
    registry: Option<&FontRegistry>,
    shape_text: bool,
) -> Result<Vec<Vec<u8>>, LabelError> {
    let (documents, embedded) = pdf_bytes_to_documents(bytes)?;
    if documents.is_empty() {
        return Err(LabelError::render("no page produced"));
    }
    let effective_registry = if embedded.is_empty() {
        registry
    } else {
        Some(&embedded)
    };

    let mut out = Vec::with_capacity(documents.len());
    for document in &documents {
        let mut pngs =
            raster::document_to_png_pages(document, dpi, effective_registry, shape_text)?;
        match pngs.pop() {
            Some(png) => out.push(png),
            None => return Err(LabelError::render("no page produced")),
        }
    }
    Ok(out)
}

/// Decodes each PDF page back into a single-page drawing, plus a registry holding the
/// fonts the PDF embeds.
pub(crate) fn pdf_bytes_to_documents(
    bytes: &[u8],
) -> Result<(Vec<Document>, FontRegistry), LabelError> {
    let doc = LoDocument::load_mem(bytes)?;
    let mut embedded = FontRegistry::new();
    let mut out = Vec::new();
    for (_page_no, page_id) in doc.get_pages() {
        out.push(parse_page(&doc, page_id, &mut embedded)?);
    }
    Ok((out, embedded))
}

fn parse_page(
    doc: &LoDocument,
    page_id: ObjectId,
    embedded: &mut FontRegistry,
) -> Result<Document, LabelError> {
    let size = page_size_for_id(doc, page_id)?;
    let page_dict = doc.get_object(page_id)?.as_dict()?;
    let resources = match page_dict.get(b"Resources") {
        Ok(obj) => resources_from_object(doc, obj, embedded)?,
        Err(_) => PdfResources::default(),
    };
    let content_bytes = doc.get_page_content(page_id)?;
    let content = Content::decode(&content_bytes)?;

    let mut parser = PageParser {
        doc,
        resources,
        page_height: size.height.to_f32(),
        commands: Vec::new(),
        images: BTreeMap::new(),
    };
    parser.parse_operations(&content.operations);

    Ok(Document {
        page_size: size,
        pages: vec![Page {
            commands: parser.commands,
        }],
        images: parser.images,
    })
}

impl PageParser<'_> {
    fn parse_operations(&mut self, operations: &[Operation]) {
        let mut state = ParseState::default();
        let mut stack: Vec<ParseState> = Vec::new();
        for op in operations {
            match op.operator.as_str() {
                "q" => {
                    stack.push(state.clone());
                    self.commands.push(Command::SaveState);
                }
                "Q" => {
                    if let Some(prev) = stack.pop() {
                        state = prev;
                    }
                    self.commands.push(Command::RestoreState);
                }
                "cm" => {
                    if let Some([a, b, c, d, e, f]) = op_f32_6(op) {
                        state.ctm = Matrix::from_operands(a, b, c, d, e, f).concat(state.ctm);
                    }
                }
                "w" => {
                    if let Some(width) = op_f32(op, 0) {
                        self.commands
                            .push(Command::SetLineWidth(Pt::from_f32(width.max(0.0))));
                    }
                }
                "rg" => {
                    if let Some([r, g, b]) = op_f32_3(op) {
                        self.commands.push(Command::SetFillColor(Color::rgb(r, g, b)));
                    }
                }
                "RG" => {
                    if let Some([r, g, b]) = op_f32_3(op) {
                        self.commands
                            .push(Command::SetStrokeColor(Color::rgb(r, g, b)));
                    }
                }
                "g" => {
                    if let Some(gray) = op_f32(op, 0) {
                        self.commands
                            .push(Command::SetFillColor(Color::rgb(gray, gray, gray)));
                    }
                }
                "G" => {
                    if let Some(gray) = op_f32(op, 0) {
                        self.commands
                            .push(Command::SetStrokeColor(Color::rgb(gray, gray, gray)));
                    }
                }
                "m" => {
                    if let Some([x, y]) = op_f32_2(op) {
                        let (x, y) = self.to_top_left(state.ctm, x, y);
                        self.commands.push(Command::MoveTo { x, y });
                    }
                }
                "l" => {
                    if let Some([x, y]) = op_f32_2(op) {
                        let (x, y) = self.to_top_left(state.ctm, x, y);
                        self.commands.push(Command::LineTo { x, y });
                    }
                }
                "re" => {
                    if let Some([x, y, w, h]) = op_f32_4(op) {
                        let corners = [(x, y), (x + w, y), (x + w, y + h), (x, y + h)];
                        for (idx, (px, py)) in corners.into_iter().enumerate() {
                            let (px, py) = self.to_top_left(state.ctm, px, py);
                            if idx == 0 {
                                self.commands.push(Command::MoveTo { x: px, y: py });
                            } else {
                                self.commands.push(Command::LineTo { x: px, y: py });
                            }
                        }
                        self.commands.push(Command::ClosePath);
                    }
                }
                "h" => self.commands.push(Command::ClosePath),
                "f" | "F" | "f*" => self.commands.push(Command::Fill),
                "S" => self.commands.push(Command::Stroke),
                "s" => {
                    self.commands.push(Command::ClosePath);
                    self.commands.push(Command::Stroke);
                }
                "BT" => {
                    state.text_matrix = Matrix::identity();
                    state.text_line_matrix = Matrix::identity();
                }
                "Tf" => {
                    if let Some(resource) = op_name(op, 0) {
                        let font_name = self
                            .resources
                            .fonts
                            .get(&resource)
                            .map(|font| font.font_name.clone())
                            .unwrap_or_else(|| resource.clone());
                        state.font_size = op_f32(op, 1).unwrap_or(12.0).abs();
                        state.font_resource = Some(resource);
                        self.commands.push(Command::SetFontName(font_name));
                    }
                }
                "Td" => {
                    if let Some([tx, ty]) = op_f32_2(op) {
                        state.text_line_matrix =
                            Matrix::translation(tx, ty).concat(state.text_line_matrix);
                        state.text_matrix = state.text_line_matrix;
                    }
                }
                "Tm" => {
                    if let Some([a, b, c, d, e, f]) = op_f32_6(op) {
                        let tm = Matrix::from_operands(a, b, c, d, e, f);
                        state.text_matrix = tm;
                        state.text_line_matrix = tm;
                    }
                }
                "Tj" => {
                    if let Some(item) = op.operands.first() {
                        self.show_text(&mut state, item);
                    }
                }
                "TJ" => {
                    if let Some(arr) = op.operands.first().and_then(|o| o.as_array().ok()) {
                        for item in arr {
                            if let Some(adj) = obj_to_f32(item) {
                                // Thousandths of text space; positive values move left.
                                let tx = -(adj / 1000.0) * state.font_size;
                                advance_text_matrix(&mut state, tx);
                            } else {
                                self.show_text(&mut state, item);
                            }
                        }
                    }
                }
                "Do" => {
                    if let Some(name) = op_name(op, 0) {
                        if let Some(obj_id) = self.resources.xobjects.get(&name).copied() {
                            self.draw_xobject(obj_id, state.ctm);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn to_top_left(&self, ctm: Matrix, x: f32, y: f32) -> (Pt, Pt) {
        let (x_pdf, y_pdf) = ctm.transform_point(x, y);
        (
            Pt::from_f32(x_pdf),
            Pt::from_f32(flip_y_f32(self.page_height, y_pdf, 0.0)),
        )
    }

    fn show_text(&mut self, state: &mut ParseState, item: &LoObject) {
        let Ok(bytes) = item.as_str() else {
            return;
        };
        let font = state
            .font_resource
            .as_ref()
            .and_then(|name| self.resources.fonts.get(name));
        let codes = string_codes(bytes, font.map(|f| f.code_width).unwrap_or_default());
        let text = decode_codes(&codes, bytes, font);
        let advance = codes
            .iter()
            .map(|code| {
                let width = font
                    .and_then(|f| f.widths.get(code).copied().or(Some(f.default_width)))
                    .unwrap_or(500.0);
                width.max(0.0) / 1000.0 * state.font_size
            })
            .sum::<f32>();

        if !text.is_empty() {
            let scale_y = (state.text_matrix.c * state.text_matrix.c
                + state.text_matrix.d * state.text_matrix.d)
                .sqrt();
            let size = state.font_size * if scale_y > 0.0001 { scale_y } else { 1.0 };
            let (tx, ty) = state.text_matrix.transform_point(0.0, 0.0);
            let (x, y) = self.to_top_left(state.ctm, tx, ty);
            self.commands.push(Command::SetFontSize(Pt::from_f32(size)));
            self.commands.push(Command::DrawString { x, y, text });
        }
        advance_text_matrix(state, advance);
    }

    fn draw_xobject(&mut self, obj_id: ObjectId, ctm: Matrix) {
        let Some(stream) = self
            .doc
            .get_object(obj_id)
            .ok()
            .and_then(|obj| obj.as_stream().ok())
        else {
            return;
        };
        let subtype = stream
            .dict
            .get(b"Subtype")
            .ok()
            .and_then(|o| o.as_name().ok())
            .map(name_bytes_to_string)
            .unwrap_or_default();
        if subtype != "Image" {
            log::debug!("xobject {obj_id:?} of subtype {subtype} ignored");
            return;
        }
        let resource_id = format!("xobj-{}-{}", obj_id.0, obj_id.1);
        if !self.images.contains_key(&resource_id) {
            match image_stream_to_png(self.doc, stream) {
                Some(png) => {
                    self.images.insert(resource_id.clone(), png);
                }
                None => {
                    log::warn!("unsupported image encoding in xobject {obj_id:?}");
                    return;
                }
            }
        }
        let Some((left, bottom, right, top)) = ctm.axis_aligned_unit_rect() else {
            return;
        };
        let width = right - left;
        let height = top - bottom;
        if width > 0.0 && height > 0.0 {
            self.commands.push(Command::DrawImage {
                x: Pt::from_f32(left),
                y: Pt::from_f32(flip_y_f32(self.page_height, bottom, height)),
                width: Pt::from_f32(width),
                height: Pt::from_f32(height),
                resource_id,
            });
        }
    }
}

fn advance_text_matrix(state: &mut ParseState, tx: f32) {
    state.text_matrix = Matrix::translation(tx, 0.0).concat(state.text_matrix);
}

fn string_codes(bytes: &[u8], width: CodeWidth) -> Vec<u16> {
    match width {
        CodeWidth::SingleByte => bytes.iter().map(|b| *b as u16).collect(),
        CodeWidth::TwoByte => bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect(),
    }
}

fn decode_codes(codes: &[u16], bytes: &[u8], font: Option<&PdfFontResource>) -> String {
    if let Some(font) = font.filter(|f| !f.to_unicode.is_empty()) {
        return codes
            .iter()
            .map(|code| {
                font.to_unicode
                    .get(code)
                    .cloned()
                    .unwrap_or_else(|| "\u{FFFD}".to_string())
            })
            .collect();
    }
    bytes.iter().map(|b| winansi_char(*b)).collect()
}

fn winansi_char(byte: u8) -> char {
    match byte {
        0x80 => '\u{20AC}',
        0x85 => '\u{2026}',
        0x91 => '\u{2018}',
        0x92 => '\u{2019}',
        0x93 => '\u{201C}',
        0x94 => '\u{201D}',
        0x95 => '\u{2022}',
        0x96 => '\u{2013}',
        0x97 => '\u{2014}',
        0x99 => '\u{2122}',
        b => b as char,
    }
}

fn resources_from_object(
    doc: &LoDocument,
    obj: &LoObject,
    embedded: &mut FontRegistry,
) -> Result<PdfResources, LabelError> {
    let LoObject::Dictionary(dict) = resolve_object(doc, obj)? else {
        return Ok(PdfResources::default());
    };

    let mut out = PdfResources::default();
    if let Ok(font_obj) = dict.get(b"Font") {
        let font_dict = resolve_dict(doc, font_obj)?;
        for (name, font_ref) in font_dict.iter() {
            let font = resolve_font_resource(doc, font_ref, embedded)?;
            out.fonts.insert(name_bytes_to_string(name), font);
        }
    }
    if let Ok(xobj_obj) = dict.get(b"XObject") {
        let xobj_dict = resolve_dict(doc, xobj_obj)?;
        for (name, ref_obj) in xobj_dict.iter() {
            if let Ok(id) = ref_obj.as_reference() {
                out.xobjects.insert(name_bytes_to_string(name), id);
            }
        }
    }
    Ok(out)
}

fn resolve_font_resource(
    doc: &LoDocument,
    obj: &LoObject,
    embedded: &mut FontRegistry,
) -> Result<PdfFontResource, LabelError> {
    let LoObject::Dictionary(dict) = resolve_object(doc, obj)? else {
        return Ok(PdfFontResource {
            font_name: "Helvetica".to_string(),
            default_width: 500.0,
            ..PdfFontResource::default()
        });
    };
    let font_name = dict
        .get(b"BaseFont")
        .ok()
        .and_then(|obj| obj.as_name().ok())
        .map(name_bytes_to_string)
        .unwrap_or_else(|| "Helvetica".to_string());
    let subtype = dict
        .get(b"Subtype")
        .ok()
        .and_then(|o| o.as_name().ok())
        .map(name_bytes_to_string)
        .unwrap_or_default();
    let to_unicode = parse_to_unicode(doc, dict);

    let descendant = (subtype == "Type0")
        .then(|| {
            dict.get(b"DescendantFonts")
                .ok()
                .and_then(|o| resolve_object(doc, o).ok())
                .and_then(|o| o.as_array().ok())
                .and_then(|arr| arr.first())
                .and_then(|o| resolve_object(doc, o).ok())
                .and_then(|o| o.as_dict().ok())
        })
        .flatten();

    let descriptor_owner = descendant.unwrap_or(dict);
    if let Some(bytes) = descriptor_owner
        .get(b"FontDescriptor")
        .ok()
        .and_then(|o| font_descriptor_file_bytes(doc, o))
    {
        if !embedded.contains(&font_name) {
            let source = format!("pdf:{font_name}");
            let aliases = [font_name.as_str()];
            if let Err(err) = embedded.register_bytes_with_aliases(bytes, &source, &aliases) {
                log::warn!("embedded font {font_name} unusable: {err}");
            }
        }
    }

    let (default_width, widths, code_width) = match descendant {
        Some(cid_font) => {
            let default_width = cid_font
                .get(b"DW")
                .ok()
                .and_then(|o| resolve_object(doc, o).ok())
                .and_then(obj_to_f32)
                .unwrap_or(1000.0);
            let widths = cid_font
                .get(b"W")
                .ok()
                .map(|o| parse_cid_font_widths(doc, o))
                .unwrap_or_default();
            (default_width, widths, CodeWidth::TwoByte)
        }
        None => (500.0, HashMap::new(), CodeWidth::SingleByte),
    };

    Ok(PdfFontResource {
        font_name,
        to_unicode,
        default_width,
        widths,
        code_width,
    })
}

fn parse_cid_font_widths(doc: &LoDocument, obj: &LoObject) -> HashMap<u16, f32> {
    let mut out = HashMap::new();
    let Some(items) = resolve_object(doc, obj).ok().and_then(|o| o.as_array().ok()) else {
        return out;
    };
    let mut idx = 0usize;
    while idx + 1 < items.len() {
        let Some(start) = obj_to_f32(&items[idx]).map(|v| v as u16) else {
            idx += 1;
            continue;
        };
        if let Ok(list) = items[idx + 1].as_array() {
            for (offset, width) in list.iter().enumerate() {
                if let Some(width) = obj_to_f32(width) {
                    out.insert(start.saturating_add(offset as u16), width.max(0.0));
                }
            }
            idx += 2;
            continue;
        }
        let (Some(end), Some(width)) = (
            obj_to_f32(&items[idx + 1]).map(|v| v as u16),
            items.get(idx + 2).and_then(obj_to_f32),
        ) else {
            idx += 3;
            continue;
        };
        for code in start..=end {
            out.insert(code, width.max(0.0));
        }
        idx += 3;
    }
    out
}

fn font_descriptor_file_bytes(doc: &LoDocument, descriptor_obj: &LoObject) -> Option<Vec<u8>> {
    let descriptor = resolve_object(doc, descriptor_obj).ok()?.as_dict().ok()?;
    for key in [b"FontFile2".as_slice(), b"FontFile3".as_slice()] {
        if let Some(data) = descriptor
            .get(key)
            .ok()
            .and_then(|o| resolve_object(doc, o).ok())
            .and_then(|o| o.as_stream().ok())
            .and_then(|s| s.get_plain_content().ok())
            .filter(|data| !data.is_empty())
        {
            return Some(data);
        }
    }
    None
}

fn parse_to_unicode(doc: &LoDocument, font_dict: &LoDictionary) -> HashMap<u16, String> {
    font_dict
        .get(b"ToUnicode")
        .ok()
        .and_then(|o| resolve_object(doc, o).ok())
        .and_then(|o| o.as_stream().ok())
        .and_then(|s| s.get_plain_content().ok())
        .map(|bytes| parse_cmap_text(&String::from_utf8_lossy(&bytes)))
        .unwrap_or_default()
}

fn parse_cmap_text(text: &str) -> HashMap<u16, String> {
    let mut map = HashMap::new();
    let mut in_bfchar = false;
    let mut in_bfrange = false;
    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.ends_with("beginbfchar") {
            in_bfchar = true;
            continue;
        }
        if line.ends_with("endbfchar") {
            in_bfchar = false;
            continue;
        }
        if line.ends_with("beginbfrange") {
            in_bfrange = true;
            continue;
        }
        if line.ends_with("endbfrange") {
            in_bfrange = false;
            continue;
        }
        let tokens = extract_hex_tokens(line);
        if in_bfchar && tokens.len() >= 2 {
            if let Some(src) = hex_bytes_to_u16(&tokens[0]) {
                map.insert(src, hex_bytes_to_unicode(&tokens[1]));
            }
        } else if in_bfrange && tokens.len() >= 3 {
            let (Some(start), Some(end), Some(base)) = (
                hex_bytes_to_u16(&tokens[0]),
                hex_bytes_to_u16(&tokens[1]),
                hex_bytes_to_u16(&tokens[2]),
            ) else {
                continue;
            };
            for code in start..=end {
                let dst = base.saturating_add(code - start);
                if let Some(ch) = char::from_u32(dst as u32) {
                    map.insert(code, ch.to_string());
                }
            }
        }
    }
    map
}

fn extract_hex_tokens(line: &str) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut rest = line;
    while let Some(start) = rest.find('<') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('>') else {
            break;
        };
        if let Some(decoded) = parse_hex(&after[..end]) {
            out.push(decoded);
        }
        rest = &after[end + 1..];
    }
    out
}

fn parse_hex(token: &str) -> Option<Vec<u8>> {
    let mut nibbles = Vec::new();
    for ch in token.chars().filter(|c| !c.is_whitespace()) {
        nibbles.push(ch.to_digit(16)? as u8);
    }
    if nibbles.len() % 2 != 0 {
        nibbles.push(0);
    }
    Some(
        nibbles
            .chunks_exact(2)
            .map(|pair| (pair[0] << 4) | pair[1])
            .collect(),
    )
}

fn hex_bytes_to_u16(bytes: &[u8]) -> Option<u16> {
    match bytes {
        [hi, lo] => Some(u16::from_be_bytes([*hi, *lo])),
        _ => None,
    }
}

fn hex_bytes_to_unicode(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

fn image_stream_to_png(doc: &LoDocument, stream: &lopdf::Stream) -> Option<Vec<u8>> {
    let filters = stream.filters().unwrap_or_default();
    if filters.iter().any(|f| *f == b"DCTDecode") {
        let decoded = image::load_from_memory(&stream.content).ok()?;
        return encode_png(&decoded.to_rgba8().into_raw(), decoded.width(), decoded.height());
    }

    let width = dict_u32(&stream.dict, b"Width")?;
    let height = dict_u32(&stream.dict, b"Height")?;
    let plain = stream.get_plain_content().ok()?;
    let channels = match stream
        .dict
        .get(b"ColorSpace")
        .ok()
        .and_then(|o| o.as_name().ok())
    {
        Some(b"DeviceRGB") => 3usize,
        Some(b"DeviceGray") | None => 1,
        Some(b"DeviceCMYK") => 4,
        Some(_) => return None,
    };
    let pixels = (width as usize) * (height as usize);
    if plain.len() < pixels * channels {
        return None;
    }

    let alpha = stream
        .dict
        .get(b"SMask")
        .ok()
        .and_then(|o| resolve_object(doc, o).ok())
        .and_then(|o| o.as_stream().ok())
        .and_then(|s| s.get_plain_content().ok())
        .filter(|a| a.len() >= pixels);

    let mut rgba = Vec::with_capacity(pixels * 4);
    for (idx, px) in plain.chunks_exact(channels).take(pixels).enumerate() {
        let (r, g, b) = match px {
            [gray] => (*gray, *gray, *gray),
            [r, g, b] => (*r, *g, *b),
            [c, m, y, k] => {
                let k = 255 - *k as u16;
                (
                    ((255 - *c as u16) * k / 255) as u8,
                    ((255 - *m as u16) * k / 255) as u8,
                    ((255 - *y as u16) * k / 255) as u8,
                )
            }
            _ => return None,
        };
        let a = alpha.as_ref().map(|a| a[idx]).unwrap_or(255);
        rgba.extend_from_slice(&[r, g, b, a]);
    }
    encode_png(&rgba, width, height)
}

fn encode_png(rgba: &[u8], width: u32, height: u32) -> Option<Vec<u8>> {
    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(rgba, width, height, ExtendedColorType::Rgba8)
        .ok()?;
    Some(png)
}

fn dict_u32(dict: &LoDictionary, key: &[u8]) -> Option<u32> {
    dict.get(key)
        .ok()
        .and_then(|o| o.as_i64().ok())
        .and_then(|v| u32::try_from(v).ok())
}

pub(crate) fn page_size_for_id(doc: &LoDocument, mut id: ObjectId) -> Result<Size, LabelError> {
    loop {
        let dict = doc.get_object(id)?.as_dict()?;
        if let Some(size) = dict
            .get(b"MediaBox")
            .and_then(LoObject::as_array)
            .ok()
            .and_then(|arr| parse_media_box_array(arr))
        {
            return Ok(size);
        }
        id = match dict.get(b"Parent").and_then(LoObject::as_reference) {
            Ok(parent_id) => parent_id,
            Err(_) => return Err(LabelError::render("page has no MediaBox")),
        };
    }
}

fn parse_media_box_array(arr: &[LoObject]) -> Option<Size> {
    let [x0, y0, x1, y1] = arr else {
        return None;
    };
    let width = (obj_to_f32(x1)? - obj_to_f32(x0)?).abs().max(1.0);
    let height = (obj_to_f32(y1)? - obj_to_f32(y0)?).abs().max(1.0);
    Some(Size::new(Pt::from_f32(width), Pt::from_f32(height)))
}

fn resolve_object<'a>(doc: &'a LoDocument, mut obj: &'a LoObject) -> Result<&'a LoObject, LabelError> {
    while let LoObject::Reference(id) = obj {
        obj = doc.get_object(*id)?;
    }
    Ok(obj)
}

fn resolve_dict<'a>(doc: &'a LoDocument, obj: &'a LoObject) -> Result<&'a LoDictionary, LabelError> {
    Ok(resolve_object(doc, obj)?.as_dict()?)
}

fn op_name(op: &Operation, idx: usize) -> Option<String> {
    let name = op.operands.get(idx)?.as_name().ok()?;
    Some(name_bytes_to_string(name))
}

fn op_f32(op: &Operation, idx: usize) -> Option<f32> {
    obj_to_f32(op.operands.get(idx)?)
}

fn op_f32_2(op: &Operation) -> Option<[f32; 2]> {
    Some([op_f32(op, 0)?, op_f32(op, 1)?])
}

fn op_f32_3(op: &Operation) -> Option<[f32; 3]> {
    Some([op_f32(op, 0)?, op_f32(op, 1)?, op_f32(op, 2)?])
}

fn op_f32_4(op: &Operation) -> Option<[f32; 4]> {
    Some([op_f32(op, 0)?, op_f32(op, 1)?, op_f32(op, 2)?, op_f32(op, 3)?])
}

fn op_f32_6(op: &Operation) -> Option<[f32; 6]> {
    Some([
        op_f32(op, 0)?,
        op_f32(op, 1)?,
        op_f32(op, 2)?,
        op_f32(op, 3)?,
        op_f32(op, 4)?,
        op_f32(op, 5)?,
    ])
}

fn obj_to_f32(obj: &LoObject) -> Option<f32> {
    if let Ok(v) = obj.as_float() {
        return Some(v);
    }
    obj.as_i64().ok().map(|v| v as f32)
}

fn name_bytes_to_string(name: &[u8]) -> String {
    String::from_utf8_lossy(name).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::tests::tiny_png;
    use crate::canvas::Canvas;
    use crate::pdf::document_to_pdf;
    use crate::types::Rect;
    use lopdf::dictionary;

    fn non_white(img: &image::RgbaImage) -> usize {
        img.pixels()
            .filter(|p| p.0[..3] != [255, 255, 255])
            .count()
    }

    #[test]
    fn rasterizes_first_page_of_rendered_label() {
        let mut canvas = Canvas::new(Size::from_mm(58.0, 40.0));
        canvas.draw_rect(
            Pt::from_mm(2.0),
            Pt::from_mm(2.0),
            Pt::from_mm(20.0),
            Pt::from_mm(10.0),
        );
        let pdf = document_to_pdf(&canvas.finish(), &FontRegistry::new(), true).unwrap();
        let png = rasterize(&pdf, 200).unwrap();
        let img = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (457, 315));
        assert!(non_white(&img) > 0);
        // 5 mm from the top-left corner is inside the rect.
        assert_eq!(img.get_pixel(39, 39).0, [0, 0, 0, 255]);
        assert_eq!(img.get_pixel(400, 300).0, [255, 255, 255, 255]);
    }

    #[test]
    fn images_survive_the_pdf_round_trip() {
        let mut canvas = Canvas::new(Size::new(Pt::from_f32(72.0), Pt::from_f32(72.0)));
        let id = canvas.register_image(tiny_png(4, 4));
        canvas.draw_image(
            Rect::new(
                Pt::from_f32(36.0),
                Pt::from_f32(0.0),
                Pt::from_f32(36.0),
                Pt::from_f32(36.0),
            ),
            id,
        );
        let pdf = document_to_pdf(&canvas.finish(), &FontRegistry::new(), true).unwrap();
        let (docs, _) = pdf_bytes_to_documents(&pdf).unwrap();
        assert_eq!(docs[0].images.len(), 1);
        let png = rasterize(&pdf, 72).unwrap();
        let img = image::load_from_memory(&png).unwrap().to_rgba8();
        let [r, g, b, _] = img.get_pixel(54, 18).0;
        assert!(r > 150 && g < 60 && b < 60);
        assert_eq!(img.get_pixel(10, 60).0, [255, 255, 255, 255]);
    }

    #[test]
    fn text_is_recovered_with_baseline_position() {
        let mut canvas = Canvas::new(Size::from_mm(58.0, 40.0));
        canvas.set_font_size(Pt::from_f32(9.0));
        canvas.draw_string(Pt::from_f32(10.0), Pt::from_f32(30.0), "Hello");
        let pdf = document_to_pdf(&canvas.finish(), &FontRegistry::new(), true).unwrap();
        let (docs, _) = pdf_bytes_to_documents(&pdf).unwrap();
        let commands = &docs[0].pages[0].commands;
        let Some(Command::DrawString { x, y, text }) = commands
            .iter()
            .find(|c| matches!(c, Command::DrawString { .. }))
        else {
            panic!("no text recovered");
        };
        assert_eq!(text, "Hello");
        assert!((x.to_f32() - 10.0).abs() < 0.01);
        assert!((y.to_f32() - 30.0).abs() < 0.01);
        assert!(commands.contains(&Command::SetFontSize(Pt::from_f32(9.0))));
    }

    #[test]
    fn rect_corners_return_to_top_left_coordinates() {
        let mut canvas = Canvas::new(Size::from_mm(58.0, 40.0));
        canvas.draw_rect(
            Pt::from_f32(10.0),
            Pt::from_f32(20.0),
            Pt::from_f32(30.0),
            Pt::from_f32(40.0),
        );
        let pdf = document_to_pdf(&canvas.finish(), &FontRegistry::new(), true).unwrap();
        let (docs, _) = pdf_bytes_to_documents(&pdf).unwrap();
        let points: Vec<(f32, f32)> = docs[0].pages[0]
            .commands
            .iter()
            .filter_map(|c| match c {
                Command::MoveTo { x, y } | Command::LineTo { x, y } => {
                    Some((x.to_f32(), y.to_f32()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(points.len(), 4);
        let ys: Vec<f32> = points.iter().map(|(_, y)| *y).collect();
        assert!((points[0].0 - 10.0).abs() < 0.01);
        assert!((points[0].1 - 60.0).abs() < 0.01);
        assert!(ys.iter().any(|y| (y - 20.0).abs() < 0.01));
        assert!(ys.iter().all(|y| (y - 20.0).abs() < 0.01 || (y - 60.0).abs() < 0.01));
    }

    #[test]
    fn pdf_without_pages_is_a_render_error() {
        let mut doc = LoDocument::with_version("1.7");
        let pages_id = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => Vec::<LoObject>::new(),
            "Count" => 0,
        });
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        let err = rasterize(&bytes, 200).unwrap_err();
        assert_eq!(err.to_string(), "render error: no page produced");
    }

    #[test]
    fn garbage_bytes_are_a_pdf_error() {
        assert!(matches!(
            rasterize(b"not a pdf", 200),
            Err(LabelError::Pdf(_))
        ));
    }

    #[test]
    fn cmap_parses_bfchar_and_bfrange() {
        let cmap = "2 beginbfchar\n<0003> <0041>\n<0004> <D83DDE00>\nendbfchar\n1 beginbfrange\n<0010> <0012> <0430>\nendbfrange\n";
        let map = parse_cmap_text(cmap);
        assert_eq!(map.get(&3).map(String::as_str), Some("A"));
        assert_eq!(map.get(&4).map(String::as_str), Some("\u{1F600}"));
        assert_eq!(map.get(&0x11).map(String::as_str), Some("б"));
    }
}
