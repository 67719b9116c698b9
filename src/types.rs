use fixed::types::I32F32;

/// Points per millimeter used by every drawing primitive.
pub const PT_PER_MM: f32 = 2.834645669;

pub fn mm_to_pt(mm: f32) -> f32 {
    mm * PT_PER_MM
}

/// Converts a top-left origin box into the surface's bottom-left origin.
///
/// Templates and canvas commands use a Y-down page with the origin at the top-left corner. PDF
/// user space (and the rasterizer before its device transform) is Y-up from the bottom-left.
/// Every conversion between the two goes through here; pass `height = 0` for a single point.
pub fn flip_y(page_height: Pt, y: Pt, height: Pt) -> Pt {
    page_height - y - height
}

/// `f32` flavor of [`flip_y`] for the raster paths.
pub fn flip_y_f32(page_height: f32, y: f32, height: f32) -> f32 {
    page_height - y - height
}

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Pt(I32F32);

impl Pt {
    pub const ZERO: Pt = Pt(I32F32::from_bits(0));

    pub fn from_f32(value: f32) -> Pt {
        if !value.is_finite() {
            return Pt::ZERO;
        }
        let milli = (value as f64 * 1000.0).round();
        let milli = milli.clamp(i64::MIN as f64, i64::MAX as f64) as i64;
        Pt::from_milli_i64(milli)
    }

    pub fn from_mm(mm: f32) -> Pt {
        Pt::from_f32(mm_to_pt(mm))
    }

    pub fn to_f32(self) -> f32 {
        self.0.to_num()
    }

    pub fn to_milli_i64(self) -> i64 {
        let bits = self.0.to_bits() as i128;
        let denom = 1i128 << 32;
        let scaled = bits * 1000;
        let adj = if scaled >= 0 { denom / 2 } else { -denom / 2 };
        let milli = (scaled + adj) / denom;
        milli.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    pub fn max(self, other: Pt) -> Pt {
        if self >= other { self } else { other }
    }

    pub fn min(self, other: Pt) -> Pt {
        if self <= other { self } else { other }
    }

    pub fn mul_ratio(self, num: i32, denom: i32) -> Pt {
        if denom == 0 {
            return Pt::ZERO;
        }
        let milli = self.to_milli_i64() as i128;
        let value = div_round_i128(milli.saturating_mul(num as i128), denom as i128);
        Pt::from_milli_i128(value)
    }

    pub fn from_milli_i64(milli: i64) -> Pt {
        Pt::from_milli_i128(milli as i128)
    }

    fn from_milli_i128(milli: i128) -> Pt {
        let denom = 1i128 << 32;
        let adj = if milli >= 0 { 500 } else { -500 };
        let bits = (milli * denom + adj) / 1000;
        let bits = bits.clamp(i64::MIN as i128, i64::MAX as i128) as i64;
        Pt(I32F32::from_bits(bits))
    }
}

impl std::ops::Add for Pt {
    type Output = Pt;
    fn add(self, rhs: Pt) -> Pt {
        Pt::from_milli_i128(self.to_milli_i64() as i128 + rhs.to_milli_i64() as i128)
    }
}

impl std::ops::AddAssign for Pt {
    fn add_assign(&mut self, rhs: Pt) {
        *self = *self + rhs;
    }
}

impl std::ops::Sub for Pt {
    type Output = Pt;
    fn sub(self, rhs: Pt) -> Pt {
        Pt::from_milli_i128(self.to_milli_i64() as i128 - rhs.to_milli_i64() as i128)
    }
}

impl std::ops::SubAssign for Pt {
    fn sub_assign(&mut self, rhs: Pt) {
        *self = *self - rhs;
    }
}

impl std::ops::Mul<i32> for Pt {
    type Output = Pt;
    fn mul(self, rhs: i32) -> Pt {
        let milli = self.to_milli_i64() as i128;
        Pt::from_milli_i128(milli.saturating_mul(rhs as i128))
    }
}

impl std::ops::Div<i32> for Pt {
    type Output = Pt;
    fn div(self, rhs: i32) -> Pt {
        if rhs == 0 {
            Pt::ZERO
        } else {
            let milli = self.to_milli_i64() as i128;
            Pt::from_milli_i128(div_round_i128(milli, rhs as i128))
        }
    }
}

impl std::ops::Mul<f32> for Pt {
    type Output = Pt;
    fn mul(self, rhs: f32) -> Pt {
        if !rhs.is_finite() {
            return Pt::ZERO;
        }
        Pt::from_f32(self.to_f32() * rhs)
    }
}

impl std::ops::Div<f32> for Pt {
    type Output = Pt;
    fn div(self, rhs: f32) -> Pt {
        if rhs == 0.0 || !rhs.is_finite() {
            Pt::ZERO
        } else {
            Pt::from_f32(self.to_f32() / rhs)
        }
    }
}

fn div_round_i128(num: i128, den: i128) -> i128 {
    if den == 0 {
        return 0;
    }
    let den_abs = den.abs();
    if num >= 0 {
        (num + (den_abs / 2)) / den
    } else {
        -(((-num) + (den_abs / 2)) / den)
    }
}

impl std::ops::Neg for Pt {
    type Output = Pt;
    fn neg(self) -> Pt {
        Pt::from_milli_i128(-(self.to_milli_i64() as i128))
    }
}

impl std::iter::Sum for Pt {
    fn sum<I: Iterator<Item = Pt>>(iter: I) -> Pt {
        iter.fold(Pt::ZERO, |acc, v| acc + v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: Pt,
    pub height: Pt,
}

impl Size {
    pub fn new(width: Pt, height: Pt) -> Self {
        Self { width, height }
    }

    pub fn from_mm(width_mm: f32, height_mm: f32) -> Self {
        Self {
            width: Pt::from_mm(width_mm),
            height: Pt::from_mm(height_mm),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: Pt,
    pub y: Pt,
    pub width: Pt,
    pub height: Pt,
}

impl Rect {
    pub fn new(x: Pt, y: Pt, width: Pt, height: Pt) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Box given in template millimeters, top-left origin.
    pub fn from_mm(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x: Pt::from_mm(x),
            y: Pt::from_mm(y),
            width: Pt::from_mm(width),
            height: Pt::from_mm(height),
        }
    }

    /// Largest rect with the given aspect ratio centered inside `self`.
    pub fn fit_aspect(self, content_width: f32, content_height: f32) -> Rect {
        if content_width <= 0.0 || content_height <= 0.0 {
            return self;
        }
        let box_w = self.width.to_f32();
        let box_h = self.height.to_f32();
        let scale = (box_w / content_width).min(box_h / content_height);
        let w = content_width * scale;
        let h = content_height * scale;
        Rect {
            x: self.x + Pt::from_f32((box_w - w) / 2.0),
            y: self.y + Pt::from_f32((box_h - h) / 2.0),
            width: Pt::from_f32(w),
            height: Pt::from_f32(h),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };

    pub const WHITE: Color = Color {
        r: 1.0,
        g: 1.0,
        b: 1.0,
    };

    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Parses `#rrggbb` or `#rgb`.
    pub fn from_hex(raw: &str) -> Option<Self> {
        let hex = raw.trim().trim_start_matches('#');
        let expanded: String = match hex.len() {
            3 => hex.chars().flat_map(|c| [c, c]).collect(),
            6 => hex.to_string(),
            _ => return None,
        };
        let channel = |idx: usize| -> Option<f32> {
            u8::from_str_radix(expanded.get(idx..idx + 2)?, 16)
                .ok()
                .map(|v| v as f32 / 255.0)
        };
        Some(Self::rgb(channel(0)?, channel(2)?, channel(4)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mm_to_pt_uses_fixed_constant() {
        assert!((mm_to_pt(1.0) - 2.834645669).abs() < 1e-6);
        let size = Size::from_mm(58.0, 40.0);
        assert!((size.width.to_f32() - 164.409).abs() < 0.01);
        assert!((size.height.to_f32() - 113.386).abs() < 0.01);
    }

    #[test]
    fn flip_y_inverts_box_origin() {
        let page_h = Pt::from_f32(100.0);
        let y = flip_y(page_h, Pt::from_f32(10.0), Pt::from_f32(20.0));
        assert_eq!(y, Pt::from_f32(70.0));
        assert_eq!(flip_y(page_h, Pt::ZERO, Pt::ZERO), page_h);
        assert_eq!(flip_y_f32(100.0, 10.0, 20.0), 70.0);
    }

    #[test]
    fn flip_y_of_a_point_is_its_own_inverse() {
        let page_h = Pt::from_mm(40.0);
        let y = Pt::from_f32(31.5);
        assert_eq!(flip_y(page_h, flip_y(page_h, y, Pt::ZERO), Pt::ZERO), y);
        assert_eq!(flip_y_f32(113.0, flip_y_f32(113.0, 12.25, 0.0), 0.0), 12.25);
    }

    #[test]
    fn fit_aspect_centers_wide_content() {
        let rect = Rect::new(
            Pt::ZERO,
            Pt::ZERO,
            Pt::from_f32(100.0),
            Pt::from_f32(100.0),
        );
        let fitted = rect.fit_aspect(200.0, 100.0);
        assert_eq!(fitted.width, Pt::from_f32(100.0));
        assert_eq!(fitted.height, Pt::from_f32(50.0));
        assert_eq!(fitted.y, Pt::from_f32(25.0));
        assert_eq!(fitted.x, Pt::ZERO);
    }

    #[test]
    fn color_from_hex_accepts_short_and_long_forms() {
        assert_eq!(Color::from_hex("#000"), Some(Color::BLACK));
        assert_eq!(Color::from_hex("ffffff"), Some(Color::WHITE));
        assert_eq!(Color::from_hex("#12"), None);
    }
}
