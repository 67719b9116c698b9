use crate::error::LabelError;
use crate::types::Pt;
use rustybuzz::{Direction as HbDirection, Face as HbFace, UnicodeBuffer};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};
use ttf_parser::GlyphId;

/// Families every label template may reference, and the file each one is loaded from.
pub const STANDARD_FAMILIES: &[(&str, &str)] = &[
    ("Georgia", "georgia.ttf"),
    ("TimesNewRoman", "timesnewroman_bold.ttf"),
    ("Malgun Gothic", "malgun-gothic.ttf"),
    ("Tahoma", "tahoma.ttf"),
    ("Tahoma Bold", "tahoma_bold.ttf"),
    ("Roboto Semibold", "roboto_semibold.ttf"),
    ("Roboto Medium", "roboto_medium.ttf"),
];

// Helvetica ascent in 1000-unit em space, used when a family is not registered.
const FALLBACK_ASCENT: i32 = 718;

static GLOBAL_REGISTRY: OnceLock<Arc<FontRegistry>> = OnceLock::new();

/// Registers the standard label families from `dir` once per process.
///
/// Later calls return the registry built by the first call, whatever directory they pass.
pub fn register_fonts(dir: impl AsRef<Path>) -> Arc<FontRegistry> {
    let dir = dir.as_ref();
    GLOBAL_REGISTRY
        .get_or_init(|| {
            let mut registry = FontRegistry::new();
            registry.register_standard_families(dir);
            log::info!(
                "font registry initialized from {} with {} font(s)",
                dir.display(),
                registry.len()
            );
            Arc::new(registry)
        })
        .clone()
}

/// The process-wide registry, if `register_fonts` has run.
pub fn global_registry() -> Option<Arc<FontRegistry>> {
    GLOBAL_REGISTRY.get().cloned()
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct TextWidthKey {
    font_index: usize,
    size_milli: i64,
    text: String,
}

#[derive(Debug)]
struct TextWidthCache {
    map: HashMap<TextWidthKey, Pt>,
    order: VecDeque<TextWidthKey>,
    max_entries: usize,
}

impl TextWidthCache {
    fn new(max_entries: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            max_entries,
        }
    }

    fn get(&self, key: &TextWidthKey) -> Option<Pt> {
        self.map.get(key).copied()
    }

    fn insert(&mut self, key: TextWidthKey, value: Pt) {
        if self.map.contains_key(&key) {
            return;
        }
        self.map.insert(key.clone(), value);
        self.order.push_back(key);
        while self.map.len() > self.max_entries {
            if let Some(old) = self.order.pop_front() {
                self.map.remove(&old);
            } else {
                break;
            }
        }
    }
}

#[derive(Debug)]
pub struct FontRegistry {
    fonts: Vec<RegisteredFont>,
    lookup: HashMap<String, usize>,
    sources: HashSet<String>,
    shape_text: bool,
    text_width_cache: Mutex<TextWidthCache>,
}

#[derive(Debug)]
pub struct RegisteredFont {
    pub(crate) name: String,
    pub(crate) data: Vec<u8>,
    pub(crate) metrics: FontMetrics,
}

#[derive(Debug)]
pub(crate) struct FontMetrics {
    pub(crate) first_char: u8,
    pub(crate) last_char: u8,
    pub(crate) widths: Vec<u16>,
    pub(crate) glyph_ids: Vec<u16>,
    pub(crate) ascent: i16,
    pub(crate) descent: i16,
    pub(crate) cap_height: i16,
    pub(crate) italic_angle: i16,
    pub(crate) bbox: (i16, i16, i16, i16),
    pub(crate) missing_width: u16,
    pub(crate) is_fixed_pitch: bool,
    kerning: HashMap<(u16, u16), i16>,
}

impl Default for FontRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FontRegistry {
    pub fn new() -> Self {
        Self {
            fonts: Vec::new(),
            lookup: HashMap::new(),
            sources: HashSet::new(),
            shape_text: true,
            text_width_cache: Mutex::new(TextWidthCache::new(20_000)),
        }
    }

    /// When disabled, widths come from the per-character table only and skip shaping.
    pub fn set_shape_text(&mut self, enabled: bool) {
        self.shape_text = enabled;
    }

    pub fn len(&self) -> usize {
        self.fonts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }

    /// Registers each entry of [`STANDARD_FAMILIES`] found in `dir`, then any other font file
    /// under its own names. Missing files are logged and skipped.
    pub fn register_standard_families(&mut self, dir: &Path) {
        for (family, file) in STANDARD_FAMILIES {
            let path = dir.join(file);
            if !path.is_file() {
                log::warn!("font file {} for family {family} not found", path.display());
                continue;
            }
            match self.register_family(family, &path) {
                Ok(()) => log::info!("registered font family {family}"),
                Err(err) => log::warn!("font family {family} skipped: {err}"),
            }
        }
        self.register_dir(dir);
    }

    /// Registers the font at `path` and makes it resolvable as `family`.
    pub fn register_family(&mut self, family: &str, path: &Path) -> Result<(), LabelError> {
        let data = fs::read(path)?;
        let source = path.to_string_lossy();
        self.register_bytes_with_aliases(data, &source, &[family])?;
        Ok(())
    }

    pub fn register_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let Ok(entries) = fs::read_dir(path) else {
            return;
        };
        let mut files: Vec<_> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|p| p.is_file())
            .collect();
        files.sort();
        for file in files {
            self.register_file(file);
        }
    }

    pub fn register_file(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let Some(ext) = path.extension().and_then(|v| v.to_str()) else {
            return;
        };
        let ext = ext.to_ascii_lowercase();
        if ext != "ttf" && ext != "otf" {
            return;
        }
        if self.sources.contains(path.to_string_lossy().as_ref()) {
            return;
        }
        let Ok(data) = fs::read(path) else {
            log::warn!("unreadable font file {}", path.display());
            return;
        };
        if let Err(err) = self.register_bytes_with_aliases(data, &path.to_string_lossy(), &[]) {
            log::warn!("{err}");
        }
    }

    /// Registers raw font bytes and returns the font's primary name.
    pub fn register_bytes(
        &mut self,
        data: Vec<u8>,
        source_name: Option<&str>,
    ) -> Result<String, LabelError> {
        self.register_bytes_with_aliases(data, source_name.unwrap_or("EmbeddedFont"), &[])
    }

    pub(crate) fn register_bytes_with_aliases(
        &mut self,
        data: Vec<u8>,
        source: &str,
        extra_aliases: &[&str],
    ) -> Result<String, LabelError> {
        let Ok(face) = ttf_parser::Face::parse(&data, 0) else {
            return Err(LabelError::Asset(format!("invalid font data for {source}")));
        };
        let (name, aliases) = font_names(&face, Path::new(source));
        let metrics = FontMetrics::from_face(&face);
        let index = self.fonts.len();
        self.sources.insert(source.to_string());
        self.fonts.push(RegisteredFont {
            name: name.clone(),
            data,
            metrics,
        });

        // Explicit aliases win over names read from the font itself.
        for alias in extra_aliases {
            let key = normalize_name(alias);
            if !key.is_empty() {
                self.lookup.insert(key, index);
            }
        }
        let mut all_aliases = vec![name.clone()];
        all_aliases.extend(aliases);
        for alias in all_aliases {
            let key = normalize_name(&alias);
            if key.is_empty() || self.lookup.contains_key(&key) {
                continue;
            }
            self.lookup.insert(key, index);
        }
        Ok(name)
    }

    pub fn resolve(&self, name: &str) -> Option<&RegisteredFont> {
        let key = normalize_name(name);
        self.lookup
            .get(&key)
            .and_then(|index| self.fonts.get(*index))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    pub fn measure_text_width(&self, name: &str, font_size: Pt, text: &str) -> Pt {
        let key = normalize_name(name);
        let Some(index) = self.lookup.get(&key).copied() else {
            return fallback_width(font_size, text);
        };
        let Some(font) = self.fonts.get(index) else {
            return fallback_width(font_size, text);
        };
        let cache_key = TextWidthKey {
            font_index: index,
            size_milli: font_size.to_milli_i64(),
            text: text.to_string(),
        };
        if let Ok(cache) = self.text_width_cache.lock() {
            if let Some(value) = cache.get(&cache_key) {
                return value;
            }
        }
        let value = if !self.shape_text || font.metrics.is_within_basic_latin(text) {
            font.metrics.measure_text_width(font_size, text)
        } else {
            measure_text_width_shaped(font, font_size, text)
                .unwrap_or_else(|| font.metrics.measure_text_width(font_size, text))
        };
        if let Ok(mut cache) = self.text_width_cache.lock() {
            cache.insert(cache_key, value);
        }
        value
    }

    /// Distance from the top of a line box to its baseline at `font_size`.
    pub fn ascent(&self, name: &str, font_size: Pt) -> Pt {
        let units = self
            .resolve(name)
            .map(|font| font.metrics.ascent as i32)
            .filter(|units| *units > 0)
            .unwrap_or(FALLBACK_ASCENT);
        font_size.mul_ratio(units, 1000)
    }

    pub fn map_glyph_id_for_char(&self, name: &str, ch: char) -> u16 {
        let Some(font) = self.resolve(name) else {
            return 0;
        };
        if let Ok(face) = ttf_parser::Face::parse(&font.data, 0) {
            let (_symbolic, symbol_subtable) = select_symbol_subtable(&face);
            if let Some(gid) = glyph_index_for_codepoint(&face, ch as u32, symbol_subtable) {
                return gid.0;
            }
        }
        0
    }

    /// Horizontal advance of `gid` in 1000-unit em space.
    pub fn glyph_advance(&self, name: &str, gid: u16) -> u16 {
        let Some(font) = self.resolve(name) else {
            return 0;
        };
        if let Ok(face) = ttf_parser::Face::parse(&font.data, 0) {
            let advance = face.glyph_hor_advance(GlyphId(gid)).unwrap_or(0);
            let units = face.units_per_em().max(1) as i64;
            let scaled = ((advance as i64) * 1000 + (units / 2)) / units;
            return scaled.clamp(0, u16::MAX as i64) as u16;
        }
        0
    }
}

fn fallback_width(font_size: Pt, text: &str) -> Pt {
    let char_width = (font_size * 0.6).max(Pt::from_f32(1.0));
    char_width * (text.chars().count() as i32)
}

impl FontMetrics {
    fn from_face(face: &ttf_parser::Face<'_>) -> Self {
        let units_per_em = face.units_per_em().max(1);
        let scale = 1000.0 / units_per_em as f32;
        let first_char = 32u8;
        let last_char = 255u8;
        let (_symbolic, symbol_subtable) = select_symbol_subtable(face);
        let glyph_ids = build_glyph_ids(face, first_char, last_char, symbol_subtable);
        let widths = build_widths(face, scale, first_char, last_char, symbol_subtable);
        let missing_width = widths
            .get((b' ' - first_char) as usize)
            .copied()
            .unwrap_or(0);

        let ascent = scale_i16(face.ascender(), scale);
        let descent = scale_i16(face.descender(), scale);
        let cap_height = face
            .capital_height()
            .map(|value| scale_i16(value, scale))
            .unwrap_or(ascent);
        let bbox = face.global_bounding_box();
        let bbox = (
            scale_i16(bbox.x_min, scale),
            scale_i16(bbox.y_min, scale),
            scale_i16(bbox.x_max, scale),
            scale_i16(bbox.y_max, scale),
        );
        let italic_angle = face
            .italic_angle()
            .map(|value| value.round() as i16)
            .unwrap_or(0);
        let kerning = build_kerning_pairs(face, &glyph_ids, scale);

        Self {
            first_char,
            last_char,
            widths,
            glyph_ids,
            ascent,
            descent,
            cap_height,
            italic_angle,
            bbox,
            missing_width,
            is_fixed_pitch: face.is_monospaced(),
            kerning,
        }
    }

    fn glyph_id_for_char(&self, ch: char) -> u16 {
        let code = ch as u32;
        let first = self.first_char as u32;
        let last = self.last_char as u32;
        if code < first || code > last {
            return 0;
        }
        let idx = (code - first) as usize;
        self.glyph_ids.get(idx).copied().unwrap_or(0)
    }

    fn advance_for_char(&self, ch: char) -> u16 {
        let code = ch as u32;
        let first = self.first_char as u32;
        let last = self.last_char as u32;
        if code < first || code > last {
            return self.missing_width;
        }
        let idx = (code - first) as usize;
        self.widths.get(idx).copied().unwrap_or(self.missing_width)
    }

    fn measure_text_width(&self, font_size: Pt, text: &str) -> Pt {
        let mut total_units: i32 = 0;
        let mut prev: Option<u16> = None;
        for ch in text.chars() {
            let gid = self.glyph_id_for_char(ch);
            let adv = self.advance_for_char(ch) as i32;
            total_units = total_units.saturating_add(adv);
            if let Some(prev_gid) = prev {
                if let Some(k) = self.kerning.get(&(prev_gid, gid)) {
                    total_units = total_units.saturating_add(*k as i32);
                }
            }
            prev = Some(gid);
        }
        if total_units <= 0 {
            return Pt::ZERO;
        }
        font_size.mul_ratio(total_units, 1000)
    }

    fn is_within_basic_latin(&self, text: &str) -> bool {
        let first = self.first_char as u32;
        let last = self.last_char as u32;
        text.chars().all(|ch| {
            let code = ch as u32;
            code >= first && code <= last
        })
    }
}

fn select_symbol_subtable<'a>(
    face: &'a ttf_parser::Face<'a>,
) -> (bool, Option<ttf_parser::cmap::Subtable<'a>>) {
    let Some(cmap) = face.tables().cmap else {
        return (false, None);
    };
    let mut first = None;
    let mut symbol = None;
    let mut has_unicode = false;
    for subtable in cmap.subtables {
        if first.is_none() {
            first = Some(subtable);
        }
        if subtable.platform_id == ttf_parser::name::PlatformId::Windows
            && subtable.encoding_id == 0
        {
            symbol = Some(subtable);
        }
        if subtable.is_unicode() {
            has_unicode = true;
        }
    }
    if has_unicode {
        (false, None)
    } else {
        (symbol.is_some(), symbol.or(first))
    }
}

fn build_glyph_ids(
    face: &ttf_parser::Face<'_>,
    first: u8,
    last: u8,
    fallback: Option<ttf_parser::cmap::Subtable<'_>>,
) -> Vec<u16> {
    (first..=last)
        .map(|code| {
            glyph_index_for_codepoint(face, code as u32, fallback)
                .map(|g| g.0)
                .unwrap_or(0)
        })
        .collect()
}

fn glyph_index_for_codepoint<'a>(
    face: &'a ttf_parser::Face<'a>,
    codepoint: u32,
    fallback: Option<ttf_parser::cmap::Subtable<'a>>,
) -> Option<ttf_parser::GlyphId> {
    if let Some(ch) = char::from_u32(codepoint) {
        if let Some(id) = face.glyph_index(ch) {
            return Some(id);
        }
    }
    let subtable = fallback?;
    if let Some(id) = subtable.glyph_index(codepoint) {
        return Some(id);
    }
    subtable.glyph_index(codepoint + 0xF000)
}

fn build_widths(
    face: &ttf_parser::Face<'_>,
    scale: f32,
    first: u8,
    last: u8,
    fallback: Option<ttf_parser::cmap::Subtable<'_>>,
) -> Vec<u16> {
    (first..=last)
        .map(|code| {
            let width = glyph_index_for_codepoint(face, code as u32, fallback)
                .and_then(|id| face.glyph_hor_advance(id))
                .unwrap_or(0);
            let scaled = (width as f32 * scale).round() as i32;
            scaled.clamp(0, u16::MAX as i32) as u16
        })
        .collect()
}

fn build_kerning_pairs(
    face: &ttf_parser::Face<'_>,
    glyph_ids: &[u16],
    scale: f32,
) -> HashMap<(u16, u16), i16> {
    let mut out = HashMap::new();
    let Some(kern) = face.tables().kern else {
        return out;
    };
    let subtables: Vec<_> = kern
        .subtables
        .into_iter()
        .filter(|s| s.horizontal && !s.has_cross_stream && !s.has_state_machine)
        .collect();
    if subtables.is_empty() {
        return out;
    }
    for &left in glyph_ids.iter().filter(|g| **g != 0) {
        for &right in glyph_ids.iter().filter(|g| **g != 0) {
            let total: i32 = subtables
                .iter()
                .filter_map(|sub| sub.glyphs_kerning(GlyphId(left), GlyphId(right)))
                .map(i32::from)
                .sum();
            if total != 0 {
                let clamped = total.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
                let scaled = scale_i16(clamped, scale);
                if scaled != 0 {
                    out.insert((left, right), scaled);
                }
            }
        }
    }
    out
}

fn measure_text_width_shaped(font: &RegisteredFont, font_size: Pt, text: &str) -> Option<Pt> {
    let face = HbFace::from_slice(&font.data, 0)?;
    let units_per_em = face.units_per_em().max(1) as i64;

    let mut buffer = UnicodeBuffer::new();
    buffer.set_direction(HbDirection::LeftToRight);
    buffer.push_str(text);
    let output = rustybuzz::shape(&face, &[], buffer);
    let positions = output.glyph_positions();
    if positions.is_empty() {
        return None;
    }
    let total_units: i32 = positions
        .iter()
        .map(|pos| (((pos.x_advance as i64) * 1000 + (units_per_em / 2)) / units_per_em) as i32)
        .fold(0i32, |acc, v| acc.saturating_add(v));
    if total_units <= 0 {
        return Some(Pt::ZERO);
    }
    Some(font_size.mul_ratio(total_units, 1000))
}

fn scale_i16(value: i16, scale: f32) -> i16 {
    let scaled = (value as f32 * scale).round() as i32;
    scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

fn font_names(face: &ttf_parser::Face<'_>, path: &Path) -> (String, Vec<String>) {
    use ttf_parser::name::name_id;

    let mut family = None;
    let mut full = None;
    let mut post = None;

    for entry in face.names() {
        let Some(name) = entry.to_string() else {
            continue;
        };
        match entry.name_id {
            name_id::TYPOGRAPHIC_FAMILY | name_id::FAMILY => {
                family.get_or_insert(name);
            }
            name_id::FULL_NAME => {
                full.get_or_insert(name);
            }
            name_id::POST_SCRIPT_NAME => {
                post.get_or_insert(name);
            }
            _ => {}
        }
    }

    let stem = path
        .file_stem()
        .and_then(|v| v.to_str())
        .map(|v| v.to_string());
    let primary = post
        .clone()
        .or_else(|| full.clone())
        .or_else(|| family.clone())
        .or_else(|| stem.clone())
        .unwrap_or_else(|| "EmbeddedFont".to_string());

    let aliases = [family, full, post, stem]
        .into_iter()
        .flatten()
        .filter(|candidate| *candidate != primary)
        .collect();
    (primary, aliases)
}

pub(crate) fn normalize_name(name: &str) -> String {
    name.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_family_uses_fallback_metrics() {
        let registry = FontRegistry::new();
        let width = registry.measure_text_width("Georgia", Pt::from_f32(10.0), "abcd");
        assert_eq!(width, Pt::from_f32(24.0));
        assert_eq!(
            registry.ascent("Georgia", Pt::from_f32(10.0)),
            Pt::from_f32(7.18)
        );
        assert!(!registry.contains("Georgia"));
    }

    #[test]
    fn invalid_font_bytes_are_rejected() {
        let mut registry = FontRegistry::new();
        let err = registry
            .register_bytes(vec![0, 1, 2, 3], Some("broken.ttf"))
            .unwrap_err();
        assert!(matches!(err, LabelError::Asset(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn missing_standard_families_are_skipped() {
        let dir = std::env::temp_dir().join(format!("labelkit-fonts-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut registry = FontRegistry::new();
        registry.register_standard_families(&dir);
        assert!(registry.is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn normalize_name_strips_quotes_and_case() {
        assert_eq!(normalize_name(" 'Tahoma Bold' "), "tahoma bold");
        assert_eq!(normalize_name("\"Georgia\""), "georgia");
    }
}
