use std::collections::{BTreeMap, HashMap};
use std::io::Write;

use fixed::types::I32F32;
use image::GenericImageView;
use rustybuzz::{Face as HbFace, UnicodeBuffer};

use crate::canvas::{Command, Document, Page};
use crate::error::LabelError;
use crate::font::{FontRegistry, RegisteredFont};
use crate::types::{Color, Pt, flip_y};

const PDF_HEADER: &[u8] = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n";
const CATALOG_ID: usize = 1;
const PAGES_ID: usize = 2;
const STANDARD_FONT: &str = "Helvetica";

struct ImageData {
    width: u32,
    height: u32,
    color_space: &'static str,
    filter: &'static str,
    data: Vec<u8>,
    alpha: Option<Vec<u8>>,
}

enum FontProgram {
    Standard,
    Embedded { index: String },
}

struct FontResource {
    resource: String,
    program: FontProgram,
    glyph_map: BTreeMap<u16, String>,
}

#[derive(Default)]
struct ResourceTable {
    fonts: Vec<FontResource>,
    font_lookup: HashMap<String, usize>,
    images: Vec<(String, ImageData)>,
    image_lookup: HashMap<String, Option<usize>>,
}

impl ResourceTable {
    // Unregistered families all share the standard Helvetica resource.
    fn font_for(&mut self, registry: &FontRegistry, name: &str) -> usize {
        let (key, program) = match registry.resolve(name) {
            Some(font) => (
                font.name.clone(),
                FontProgram::Embedded {
                    index: font.name.clone(),
                },
            ),
            None => (STANDARD_FONT.to_string(), FontProgram::Standard),
        };
        if let Some(idx) = self.font_lookup.get(&key) {
            return *idx;
        }
        let idx = self.fonts.len();
        self.fonts.push(FontResource {
            resource: format!("F{}", idx + 1),
            program,
            glyph_map: BTreeMap::new(),
        });
        self.font_lookup.insert(key, idx);
        idx
    }

    fn image_for(&mut self, resource_id: &str, images: &BTreeMap<String, Vec<u8>>) -> Option<usize> {
        if let Some(slot) = self.image_lookup.get(resource_id) {
            return *slot;
        }
        let decoded = images.get(resource_id).and_then(|bytes| decode_image_bytes(bytes));
        let slot = match decoded {
            Some(image) => {
                let idx = self.images.len();
                self.images.push((format!("Im{}", idx + 1), image));
                Some(idx)
            }
            None => {
                log::warn!("image resource {resource_id} is missing or undecodable; skipped");
                None
            }
        };
        self.image_lookup.insert(resource_id.to_string(), slot);
        slot
    }
}

/// Serializes a finished document into PDF bytes.
///
/// Output depends only on the document and the registered fonts: no timestamps, no
/// random identifiers, and object numbering follows first use.
pub fn document_to_pdf(
    document: &Document,
    registry: &FontRegistry,
    shape_text: bool,
) -> Result<Vec<u8>, LabelError> {
    if document.pages.is_empty() {
        return Err(LabelError::render("no page produced"));
    }
    let page_height = document.page_size.height;
    let mut resources = ResourceTable::default();
    let mut contents = Vec::with_capacity(document.pages.len());
    for page in &document.pages {
        contents.push(render_page(
            page,
            page_height,
            registry,
            shape_text,
            &document.images,
            &mut resources,
        ));
    }

    let first_resource_id = 3 + 2 * document.pages.len();
    let mut next_id = first_resource_id;
    let mut font_objects: Vec<Vec<u8>> = Vec::new();
    let mut font_refs: Vec<(String, usize)> = Vec::new();
    for font in &resources.fonts {
        match &font.program {
            FontProgram::Standard => {
                font_refs.push((font.resource.clone(), next_id));
                font_objects.push(standard_font_object().into_bytes());
                next_id += 1;
            }
            FontProgram::Embedded { index } => {
                let Some(registered) = registry.resolve(index) else {
                    return Err(LabelError::render(format!("font {index} vanished from the registry")));
                };
                let (objects, type0_id) =
                    build_cidfont_objects(registered, registry, &font.glyph_map, next_id);
                next_id += objects.len();
                font_refs.push((font.resource.clone(), type0_id));
                font_objects.extend(objects);
            }
        }
    }

    let mut image_objects: Vec<Vec<u8>> = Vec::new();
    let mut image_refs: Vec<(String, usize)> = Vec::new();
    for (name, image) in &resources.images {
        let image_id = next_id;
        let smask_id = image.alpha.as_ref().map(|_| image_id + 1);
        image_objects.push(image_object(image, smask_id));
        next_id += 1;
        if let Some(alpha) = image.alpha.as_ref() {
            image_objects.push(image_smask_object(image.width, image.height, alpha));
            next_id += 1;
        }
        image_refs.push((name.clone(), image_id));
    }

    let resource_dict = format!(
        "<< /ProcSet [/PDF /Text /ImageB /ImageC]{}{} >>",
        font_resources(&font_refs),
        xobject_resources(&image_refs)
    );

    let mut objects: Vec<Vec<u8>> = Vec::new();
    objects.push(format!("<< /Type /Catalog /Pages {} 0 R >>", PAGES_ID).into_bytes());
    let kids: Vec<String> = (0..document.pages.len())
        .map(|idx| format!("{} 0 R", 3 + 2 * idx))
        .collect();
    objects.push(
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            document.pages.len()
        )
        .into_bytes(),
    );
    let media_box = format!(
        "[0 0 {} {}]",
        fmt_pt(document.page_size.width),
        fmt_pt(document.page_size.height)
    );
    for (idx, content) in contents.iter().enumerate() {
        let page_id = 3 + 2 * idx;
        objects.push(
            format!(
                "<< /Type /Page /Parent {} 0 R /MediaBox {} /Resources {} /Contents {} 0 R >>",
                PAGES_ID,
                media_box,
                resource_dict,
                page_id + 1
            )
            .into_bytes(),
        );
        objects.push(stream_object("", content.as_bytes()));
    }
    objects.extend(font_objects);
    objects.extend(image_objects);
    debug_assert_eq!(objects.len(), next_id - 1);

    Ok(build_pdf(&objects, CATALOG_ID))
}

fn render_page(
    page: &Page,
    page_height: Pt,
    registry: &FontRegistry,
    shape_text: bool,
    images: &BTreeMap<String, Vec<u8>>,
    resources: &mut ResourceTable,
) -> String {
    let mut out = String::new();
    let mut font_name = STANDARD_FONT.to_string();
    let mut font_size = Pt::from_f32(12.0);
    let mut stack: Vec<(String, Pt)> = Vec::new();
    for command in &page.commands {
        match command {
            Command::SaveState => {
                stack.push((font_name.clone(), font_size));
                out.push_str("q\n");
            }
            Command::RestoreState => {
                if let Some((name, size)) = stack.pop() {
                    font_name = name;
                    font_size = size;
                }
                out.push_str("Q\n");
            }
            Command::SetFillColor(color) => out.push_str(&color_to_pdf_fill(*color)),
            Command::SetStrokeColor(color) => out.push_str(&color_to_pdf_stroke(*color)),
            Command::SetLineWidth(width) => out.push_str(&format!("{} w\n", fmt_pt(*width))),
            Command::SetFontName(name) => font_name = name.clone(),
            Command::SetFontSize(size) => font_size = *size,
            Command::MoveTo { x, y } => out.push_str(&format!(
                "{} {} m\n",
                fmt_pt(*x),
                fmt_pt(flip_y(page_height, *y, Pt::ZERO))
            )),
            Command::LineTo { x, y } => out.push_str(&format!(
                "{} {} l\n",
                fmt_pt(*x),
                fmt_pt(flip_y(page_height, *y, Pt::ZERO))
            )),
            Command::ClosePath => out.push_str("h\n"),
            Command::Fill => out.push_str("f\n"),
            Command::Stroke => out.push_str("S\n"),
            Command::DrawString { x, y, text } => {
                if text.is_empty() {
                    continue;
                }
                let idx = resources.font_for(registry, &font_name);
                let font = &mut resources.fonts[idx];
                let shown = match &font.program {
                    FontProgram::Standard => {
                        let encoded = encode_winansi_pdf_string(text);
                        if encoded.replaced > 0 {
                            log::warn!(
                                "font {font_name} is not registered; {} character(s) of {:?} replaced",
                                encoded.replaced,
                                text
                            );
                        }
                        format!("({}) Tj\n", encoded.text)
                    }
                    FontProgram::Embedded { index } => {
                        encode_embedded_text(registry, index, text, shape_text, &mut font.glyph_map)
                    }
                };
                out.push_str("BT\n");
                out.push_str(&format!("/{} {} Tf\n", font.resource, fmt_pt(font_size)));
                out.push_str(&format!(
                    "{} {} Td\n",
                    fmt_pt(*x),
                    fmt_pt(flip_y(page_height, *y, Pt::ZERO))
                ));
                out.push_str(&shown);
                out.push_str("ET\n");
            }
            Command::DrawRect {
                x,
                y,
                width,
                height,
            } => out.push_str(&format!(
                "{} {} {} {} re\nf\n",
                fmt_pt(*x),
                fmt_pt(flip_y(page_height, *y, *height)),
                fmt_pt(*width),
                fmt_pt(*height)
            )),
            Command::StrokeRect {
                x,
                y,
                width,
                height,
            } => out.push_str(&format!(
                "{} {} {} {} re\nS\n",
                fmt_pt(*x),
                fmt_pt(flip_y(page_height, *y, *height)),
                fmt_pt(*width),
                fmt_pt(*height)
            )),
            Command::DrawImage {
                x,
                y,
                width,
                height,
                resource_id,
            } => {
                let Some(idx) = resources.image_for(resource_id, images) else {
                    continue;
                };
                out.push_str(&format!(
                    "q\n{} 0 0 {} {} {} cm\n/{} Do\nQ\n",
                    fmt_pt(*width),
                    fmt_pt(*height),
                    fmt_pt(*x),
                    fmt_pt(flip_y(page_height, *y, *height)),
                    resources.images[idx].0
                ));
            }
        }
    }
    out
}

fn encode_embedded_text(
    registry: &FontRegistry,
    font_name: &str,
    text: &str,
    shape_text: bool,
    glyph_map: &mut BTreeMap<u16, String>,
) -> String {
    if shape_text {
        if let (Some(tj), Some(map)) = (
            shape_text_to_tj(registry, font_name, text),
            registry
                .resolve(font_name)
                .and_then(|font| shape_text_to_glyph_map(&font.data, text)),
        ) {
            for (gid, chars) in map {
                glyph_map.entry(gid).or_insert(chars);
            }
            return tj;
        }
    }
    let mut hex = String::with_capacity(text.len() * 4 + 2);
    hex.push('<');
    for ch in text.chars() {
        let gid = registry.map_glyph_id_for_char(font_name, ch);
        if gid != 0 {
            glyph_map.entry(gid).or_insert_with(|| ch.to_string());
        }
        hex.push_str(&format!("{:04X}", gid));
    }
    hex.push('>');
    format!("{} Tj\n", hex)
}

fn standard_font_object() -> String {
    format!(
        "<< /Type /Font /Subtype /Type1 /BaseFont /{} /Encoding /WinAnsiEncoding >>",
        STANDARD_FONT
    )
}

fn build_cidfont_objects(
    font: &RegisteredFont,
    registry: &FontRegistry,
    glyph_map: &BTreeMap<u16, String>,
    start_id: usize,
) -> (Vec<Vec<u8>>, usize) {
    let font_file_id = start_id;
    let descriptor_id = start_id + 1;
    let cid_font_id = start_id + 2;
    let to_unicode_id = start_id + 3;
    let type0_font_id = start_id + 4;
    let cff = ttf_parser::Face::parse(&font.data, 0)
        .map(|face| face.tables().cff.is_some())
        .unwrap_or(false);

    let mut objects = Vec::new();
    objects.push(font_file_object(&font.data, cff));
    objects.push(font_descriptor_object(font, font_file_id, cff).into_bytes());

    let mut glyph_map = glyph_map.clone();
    if glyph_map.is_empty() {
        let gid = registry.map_glyph_id_for_char(&font.name, ' ');
        if gid != 0 {
            glyph_map.insert(gid, " ".to_string());
        }
    }

    let mut w_entries: Vec<String> = Vec::new();
    for gid in glyph_map.keys() {
        let adv = registry.glyph_advance(&font.name, *gid);
        let width = if adv > 0 {
            adv
        } else {
            font.metrics.missing_width
        };
        w_entries.push(format!("{} [{}]", gid, width));
    }
    let w_array = if w_entries.is_empty() {
        String::new()
    } else {
        format!(" /W [{}]", w_entries.join(" "))
    };

    let (subtype, gid_map) = if cff {
        ("CIDFontType0", "")
    } else {
        ("CIDFontType2", " /CIDToGIDMap /Identity")
    };
    let base = sanitize_font_name(&font.name);
    objects.push(
        format!(
            "<< /Type /Font /Subtype /{} /BaseFont /{} /CIDSystemInfo << /Registry (Adobe) /Ordering (Identity) /Supplement 0 >> /FontDescriptor {} 0 R /DW {}{}{} >>",
            subtype, base, descriptor_id, font.metrics.missing_width, w_array, gid_map
        )
        .into_bytes(),
    );

    let to_unicode = to_unicode_cmap(&glyph_map);
    objects.push(stream_object("", to_unicode.as_bytes()));

    objects.push(
        format!(
            "<< /Type /Font /Subtype /Type0 /BaseFont /{} /Encoding /Identity-H /DescendantFonts [{} 0 R] /ToUnicode {} 0 R >>",
            base, cid_font_id, to_unicode_id
        )
        .into_bytes(),
    );

    (objects, type0_font_id)
}

fn font_descriptor_object(font: &RegisteredFont, font_file_id: usize, cff: bool) -> String {
    let metrics = &font.metrics;
    let mut flags = 32;
    if metrics.is_fixed_pitch {
        flags |= 1;
    }
    let font_file_entry = if cff { "FontFile3" } else { "FontFile2" };
    format!(
        "<< /Type /FontDescriptor /FontName /{} /Flags {} /FontBBox [{} {} {} {}] /ItalicAngle {} /Ascent {} /Descent {} /CapHeight {} /StemV 80 /MissingWidth {} /{} {} 0 R >>",
        sanitize_font_name(&font.name),
        flags,
        metrics.bbox.0,
        metrics.bbox.1,
        metrics.bbox.2,
        metrics.bbox.3,
        metrics.italic_angle,
        metrics.ascent,
        metrics.descent,
        metrics.cap_height,
        metrics.missing_width,
        font_file_entry,
        font_file_id
    )
}

fn font_file_object(data: &[u8], cff: bool) -> Vec<u8> {
    let compressed = flate_compress(data);
    let mut dict = format!("/Length1 {} /Filter /FlateDecode", data.len());
    if cff {
        dict.push_str(" /Subtype /OpenType");
    }
    stream_object(&dict, &compressed)
}

fn decode_image_bytes(data: &[u8]) -> Option<ImageData> {
    let format = image::guess_format(data).ok();
    let decoded = image::load_from_memory(data).ok()?;
    let (width, height) = decoded.dimensions();

    if matches!(format, Some(image::ImageFormat::Jpeg)) {
        let color_space = match decoded.color() {
            image::ColorType::L8 | image::ColorType::La8 => "/DeviceGray",
            _ => "/DeviceRGB",
        };
        return Some(ImageData {
            width,
            height,
            color_space,
            filter: "/DCTDecode",
            data: data.to_vec(),
            alpha: None,
        });
    }

    let rgba = decoded.to_rgba8();
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    let mut alpha = Vec::with_capacity((width * height) as usize);
    let mut has_alpha = false;
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        if a != 255 {
            has_alpha = true;
        }
        rgb.extend_from_slice(&[r, g, b]);
        alpha.push(a);
    }

    Some(ImageData {
        width,
        height,
        color_space: "/DeviceRGB",
        filter: "/FlateDecode",
        data: flate_compress(&rgb),
        alpha: has_alpha.then(|| flate_compress(&alpha)),
    })
}

fn flate_compress(data: &[u8]) -> Vec<u8> {
    use flate2::Compression;
    use flate2::write::ZlibEncoder;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    let _ = encoder.write_all(data);
    encoder.finish().unwrap_or_default()
}

fn image_object(image: &ImageData, smask_id: Option<usize>) -> Vec<u8> {
    let smask = smask_id
        .map(|id| format!(" /SMask {} 0 R", id))
        .unwrap_or_default();
    let dict = format!(
        "/Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace {} /BitsPerComponent 8 /Filter {}{}",
        image.width, image.height, image.color_space, image.filter, smask
    );
    stream_object(&dict, &image.data)
}

fn image_smask_object(width: u32, height: u32, alpha: &[u8]) -> Vec<u8> {
    let dict = format!(
        "/Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace /DeviceGray /BitsPerComponent 8 /Filter /FlateDecode",
        width, height
    );
    stream_object(&dict, alpha)
}

fn stream_object(dict_entries: &str, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 64);
    if dict_entries.is_empty() {
        out.extend_from_slice(format!("<< /Length {} >>\nstream\n", data.len()).as_bytes());
    } else {
        out.extend_from_slice(
            format!("<< {} /Length {} >>\nstream\n", dict_entries, data.len()).as_bytes(),
        );
    }
    out.extend_from_slice(data);
    out.extend_from_slice(b"\nendstream");
    out
}

fn font_resources(fonts: &[(String, usize)]) -> String {
    if fonts.is_empty() {
        return String::new();
    }
    let entries: Vec<String> = fonts
        .iter()
        .map(|(name, id)| format!("/{} {} 0 R", name, id))
        .collect();
    format!(" /Font << {} >>", entries.join(" "))
}

fn xobject_resources(images: &[(String, usize)]) -> String {
    if images.is_empty() {
        return String::new();
    }
    let entries: Vec<String> = images
        .iter()
        .map(|(name, id)| format!("/{} {} 0 R", name, id))
        .collect();
    format!(" /XObject << {} >>", entries.join(" "))
}

fn sanitize_font_name(name: &str) -> String {
    let mut out = String::new();
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' {
            out.push(ch);
        } else if ch == ' ' {
            out.push('-');
        }
    }
    if out.is_empty() {
        STANDARD_FONT.to_string()
    } else {
        out
    }
}

fn build_pdf(objects: &[Vec<u8>], catalog_id: usize) -> Vec<u8> {
    let mut out: Vec<u8> = Vec::new();
    out.extend_from_slice(PDF_HEADER);

    let mut offsets = Vec::with_capacity(objects.len());
    for (index, obj) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n", index + 1).as_bytes());
        out.extend_from_slice(obj);
        out.extend_from_slice(b"\nendobj\n");
    }

    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root {} 0 R >>\nstartxref\n{}\n%%EOF",
            objects.len() + 1,
            catalog_id,
            xref_start
        )
        .as_bytes(),
    );
    out
}

struct WinAnsiEncoded {
    text: String,
    replaced: usize,
}

fn encode_winansi_pdf_string(input: &str) -> WinAnsiEncoded {
    let mut out = String::new();
    let mut replaced = 0usize;
    for ch in input.chars() {
        let byte = match ch {
            '\u{0000}'..='\u{007F}' => ch as u8,
            '\u{00A0}'..='\u{00FF}' => ch as u8,
            '\u{20AC}' => 0x80,
            '\u{201A}' => 0x82,
            '\u{0192}' => 0x83,
            '\u{201E}' => 0x84,
            '\u{2026}' => 0x85,
            '\u{2020}' => 0x86,
            '\u{2021}' => 0x87,
            '\u{02C6}' => 0x88,
            '\u{2030}' => 0x89,
            '\u{0160}' => 0x8A,
            '\u{2039}' => 0x8B,
            '\u{0152}' => 0x8C,
            '\u{017D}' => 0x8E,
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201C}' => 0x93,
            '\u{201D}' => 0x94,
            '\u{2022}' => 0x95,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            '\u{02DC}' => 0x98,
            '\u{2122}' => 0x99,
            '\u{0161}' => 0x9A,
            '\u{203A}' => 0x9B,
            '\u{0153}' => 0x9C,
            '\u{017E}' => 0x9E,
            '\u{0178}' => 0x9F,
            _ => {
                replaced += 1;
                b'?'
            }
        };

        match byte {
            b'\\' => out.push_str("\\\\"),
            b'(' => out.push_str("\\("),
            b')' => out.push_str("\\)"),
            b if b < 0x20 || b >= 0x7f => out.push_str(&format!("\\{:03o}", b)),
            b => out.push(b as char),
        }
    }

    WinAnsiEncoded {
        text: out,
        replaced,
    }
}

fn to_unicode_cmap(glyph_map: &BTreeMap<u16, String>) -> String {
    let entries: Vec<(&u16, &String)> = glyph_map.iter().collect();

    let mut out = String::new();
    out.push_str("/CIDInit /ProcSet findresource begin\n");
    out.push_str("12 dict begin\n");
    out.push_str("begincmap\n");
    out.push_str("/CIDSystemInfo << /Registry (Adobe) /Ordering (Identity) /Supplement 0 >> def\n");
    out.push_str("/CMapName /Adobe-Identity-UCS def\n");
    out.push_str("/CMapType 2 def\n");
    out.push_str("1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n");

    for chunk in entries.chunks(100) {
        out.push_str(&format!("{} beginbfchar\n", chunk.len()));
        for (gid, s) in chunk {
            let mut uni = String::new();
            for ch in s.chars() {
                let code = ch as u32;
                if code <= 0xFFFF {
                    uni.push_str(&format!("{:04X}", code));
                } else {
                    let code = code - 0x1_0000;
                    let high = 0xD800 | (code >> 10);
                    let low = 0xDC00 | (code & 0x3FF);
                    uni.push_str(&format!("{:04X}{:04X}", high, low));
                }
            }
            out.push_str(&format!("<{:04X}> <{}>\n", gid, uni));
        }
        out.push_str("endbfchar\n");
    }

    out.push_str("endcmap\n");
    out.push_str("CMapName currentdict /CMap defineresource pop\n");
    out.push_str("end\nend\n");
    out
}

fn shape_text_to_glyph_map(font_data: &[u8], text: &str) -> Option<BTreeMap<u16, String>> {
    let face = HbFace::from_slice(font_data, 0)?;
    let mut buffer = UnicodeBuffer::new();
    buffer.push_str(text);
    let output = rustybuzz::shape(&face, &[], buffer);
    let infos = output.glyph_infos();
    if infos.is_empty() {
        return None;
    }
    let mut map: BTreeMap<u16, String> = BTreeMap::new();
    let mut clusters: Vec<usize> = infos.iter().map(|g| g.cluster as usize).collect();
    clusters.push(text.len());
    for i in 0..infos.len() {
        let start = clusters[i].min(text.len());
        let end = clusters[i + 1].min(text.len());
        if start >= end {
            continue;
        }
        let gid = infos[i].glyph_id as u16;
        if gid != 0 {
            map.entry(gid).or_insert_with(|| text[start..end].to_string());
        }
    }
    Some(map)
}

// Positions are in thousandths of an em; TJ numbers shift the next glyph left.
fn shape_text_to_tj(registry: &FontRegistry, font_name: &str, text: &str) -> Option<String> {
    let font = registry.resolve(font_name)?;
    let face = HbFace::from_slice(&font.data, 0)?;
    let units_per_em = face.units_per_em().max(1);
    let scale = 1000.0 / units_per_em as f32;

    let mut buffer = UnicodeBuffer::new();
    buffer.push_str(text);
    let output = rustybuzz::shape(&face, &[], buffer);
    let infos = output.glyph_infos();
    let positions = output.glyph_positions();
    if infos.is_empty() || infos.len() != positions.len() {
        return None;
    }

    let mut parts: Vec<String> = Vec::new();
    for (info, pos) in infos.iter().zip(positions.iter()) {
        let gid = info.glyph_id as u16;
        if gid == 0 {
            continue;
        }
        parts.push(format!("<{:04X}>", gid));
        let adv_default = registry.glyph_advance(font_name, gid) as i32;
        let adv_shaped = (pos.x_advance as f32 * scale).round() as i32;
        let adjust = adv_default - adv_shaped;
        if adjust != 0 {
            parts.push(format!("{}", adjust));
        }
    }

    if parts.is_empty() {
        return None;
    }
    Some(format!("[{}] TJ\n", parts.join(" ")))
}

fn fmt(value: f32) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    let fixed = I32F32::from_num(value);
    let scaled = (fixed * I32F32::from_num(1000)).round();
    let milli: i64 = scaled.to_num();
    format_milli(milli)
}

fn format_milli(milli: i64) -> String {
    if milli == 0 {
        return "0".to_string();
    }
    let sign = if milli < 0 { "-" } else { "" };
    let abs = milli.abs();
    let int_part = abs / 1000;
    let frac_part = abs % 1000;
    if frac_part == 0 {
        format!("{}{}", sign, int_part)
    } else {
        let mut s = format!("{}{}.{:03}", sign, int_part, frac_part);
        while s.ends_with('0') {
            s.pop();
        }
        s
    }
}

fn fmt_pt(value: Pt) -> String {
    format_milli(value.to_milli_i64())
}

fn color_to_pdf_fill(color: Color) -> String {
    format!(
        "{} {} {} rg\n",
        fmt(color.r.clamp(0.0, 1.0)),
        fmt(color.g.clamp(0.0, 1.0)),
        fmt(color.b.clamp(0.0, 1.0))
    )
}

fn color_to_pdf_stroke(color: Color) -> String {
    format!(
        "{} {} {} RG\n",
        fmt(color.r.clamp(0.0, 1.0)),
        fmt(color.g.clamp(0.0, 1.0)),
        fmt(color.b.clamp(0.0, 1.0))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::tests::tiny_png;
    use crate::canvas::Canvas;
    use crate::types::{Rect, Size};
    use lopdf::content::Content;

    fn label_document() -> Document {
        let mut canvas = Canvas::new(Size::from_mm(58.0, 40.0));
        canvas.set_font_name("Tahoma");
        canvas.set_font_size(Pt::from_f32(7.0));
        canvas.draw_string(Pt::from_f32(10.0), Pt::from_f32(20.0), "Hello (world)");
        canvas.draw_rect(Pt::from_f32(5.0), Pt::from_f32(5.0), Pt::from_f32(2.0), Pt::from_f32(30.0));
        canvas.finish()
    }

    fn count_token(bytes: &[u8], token: &[u8]) -> usize {
        bytes.windows(token.len()).filter(|w| *w == token).count()
    }

    #[test]
    fn single_page_with_label_media_box() {
        let bytes = document_to_pdf(&label_document(), &FontRegistry::new(), true).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.7"));
        let doc = lopdf::Document::load_mem(&bytes).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 1);
        let page_id = *pages.values().next().unwrap();
        let page = doc.get_object(page_id).unwrap().as_dict().unwrap();
        let media_box = page.get(b"MediaBox").unwrap().as_array().unwrap();
        let w = media_box[2].as_float().unwrap();
        let h = media_box[3].as_float().unwrap();
        assert!((w - 164.409).abs() < 0.01);
        assert!((h - 113.386).abs() < 0.01);
    }

    #[test]
    fn output_is_byte_identical_across_runs() {
        let doc = label_document();
        let registry = FontRegistry::new();
        let a = document_to_pdf(&doc, &registry, true).unwrap();
        let b = document_to_pdf(&doc, &registry, true).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unregistered_font_falls_back_to_helvetica() {
        let bytes = document_to_pdf(&label_document(), &FontRegistry::new(), false).unwrap();
        assert_eq!(count_token(&bytes, b"/BaseFont /Helvetica"), 1);
        let doc = lopdf::Document::load_mem(&bytes).unwrap();
        let page_id = *doc.get_pages().values().next().unwrap();
        let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();
        let ops: Vec<&str> = content.operations.iter().map(|op| op.operator.as_str()).collect();
        assert!(ops.contains(&"Tj"));
        assert!(ops.contains(&"re"));
        let td = content
            .operations
            .iter()
            .find(|op| op.operator == "Td")
            .unwrap();
        let y = td.operands[1].as_float().unwrap();
        assert!((y - (113.386 - 20.0)).abs() < 0.01);
    }

    #[test]
    fn images_are_embedded_once_per_resource() {
        let mut canvas = Canvas::new(Size::from_mm(58.0, 40.0));
        let id = canvas.register_image(tiny_png(4, 2));
        canvas.draw_image(Rect::from_mm(1.0, 1.0, 10.0, 5.0), id.clone());
        canvas.draw_image(Rect::from_mm(20.0, 1.0, 10.0, 5.0), id);
        let bytes = document_to_pdf(&canvas.finish(), &FontRegistry::new(), true).unwrap();
        assert_eq!(count_token(&bytes, b"/Subtype /Image"), 1);
        assert_eq!(count_token(&bytes, b"/Im1 Do"), 2);
        assert_eq!(count_token(&bytes, b"/SMask"), 0);
    }

    #[test]
    fn missing_image_resource_is_skipped() {
        let mut canvas = Canvas::new(Size::from_mm(58.0, 40.0));
        canvas.draw_image(Rect::from_mm(1.0, 1.0, 10.0, 5.0), "img-deadbeef");
        let bytes = document_to_pdf(&canvas.finish(), &FontRegistry::new(), true).unwrap();
        assert_eq!(count_token(&bytes, b" Do"), 0);
        assert!(lopdf::Document::load_mem(&bytes).is_ok());
    }

    #[test]
    fn empty_document_is_a_render_error() {
        let doc = Document {
            page_size: Size::from_mm(58.0, 40.0),
            pages: Vec::new(),
            images: BTreeMap::new(),
        };
        let err = document_to_pdf(&doc, &FontRegistry::new(), true).unwrap_err();
        assert!(matches!(err, LabelError::Render { .. }));
    }

    #[test]
    fn winansi_replaces_cyrillic_and_escapes_parens() {
        let encoded = encode_winansi_pdf_string("a(b)Ж");
        assert_eq!(encoded.text, "a\\(b\\)?");
        assert_eq!(encoded.replaced, 1);
    }

    #[test]
    fn to_unicode_cmap_handles_surrogates() {
        let mut map = BTreeMap::new();
        map.insert(3u16, "A".to_string());
        map.insert(4u16, "\u{1F600}".to_string());
        let cmap = to_unicode_cmap(&map);
        assert!(cmap.contains("<0003> <0041>"));
        assert!(cmap.contains("<0004> <D83DDE00>"));
    }

    #[test]
    fn milli_formatting_trims_zeros() {
        assert_eq!(format_milli(164_409), "164.409");
        assert_eq!(format_milli(-1_500), "-1.5");
        assert_eq!(format_milli(2_000), "2");
        assert_eq!(fmt(0.0), "0");
    }
}
