//! Builders that turn product and contractor records into label payloads.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::template::Payload;

pub const DEFAULT_BARCODE: &str = "1111111111111";

// Shelf life beyond a century is treated as a century.
const MAX_SHELF_DAYS: i64 = 36_500;

/// Manufacturer details printed on every product label.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CompanyInfo {
    pub name: String,
    pub address: String,
    pub phone_number: String,
    pub short_address: String,
}

impl CompanyInfo {
    pub fn long_block(&self) -> String {
        format!(
            "Изготовитель: {}<br />Адрес производства: {}<br />Телефон: {}",
            self.name, self.address, self.phone_number
        )
    }

    pub fn short_block(&self) -> String {
        format!("{}<br />{}", self.name, self.short_address)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OrgStandart {
    pub name: String,
    pub code: String,
}

impl OrgStandart {
    pub fn label(&self) -> String {
        format!("{} СТО {}", self.name, self.code)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProductFields {
    pub name: String,
    pub weight: String,
    pub caption: String,
    pub ingredients: String,
    pub barcode: Option<String>,
    #[serde(deserialize_with = "lenient_f64")]
    pub calories: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub protein: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub fat: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub carbs: Option<f64>,
    /// Shelf life in days.
    #[serde(alias = "shelf_life", deserialize_with = "lenient_f64")]
    pub best_before: Option<f64>,
    pub org_standarts: Vec<OrgStandart>,
}

impl ProductFields {
    /// Payload for a product label manufactured on `today`.
    pub fn to_payload(&self, company: &CompanyInfo, today: NaiveDate) -> Payload {
        let barcode = self
            .barcode
            .clone()
            .unwrap_or_else(|| DEFAULT_BARCODE.to_string());
        let (manufacture, expiry) =
            format_dates(today, self.best_before.map_or(0, |days| days as i64));
        let org_standarts = self
            .org_standarts
            .iter()
            .map(OrgStandart::label)
            .collect::<Vec<_>>()
            .join(", ");

        let mut payload = Payload::new();
        payload.insert("name", self.name.clone());
        payload.insert("weight", self.weight.clone());
        payload.insert("caption", self.caption.clone());
        payload.insert("ingredients", self.ingredients.clone());
        payload.insert("barcode", barcode);
        payload.insert(
            "nutrition",
            format_nutrition(self.calories, self.protein, self.fat, self.carbs),
        );
        payload.insert("manufacture_date", manufacture);
        payload.insert("expiry_date", expiry);
        payload.insert("org_standarts", org_standarts);
        payload.insert("company_info", company.long_block());
        payload
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ContractorFields {
    pub name: String,
    pub city: String,
    pub street: String,
    pub comment: String,
    /// Contractor category name.
    pub contractor: String,
}

impl ContractorFields {
    pub fn to_payload(&self, company: &CompanyInfo) -> Payload {
        let mut payload = Payload::new();
        payload.insert("name", self.name.clone());
        payload.insert("city", format!("г. {}", self.city));
        payload.insert("street", self.street.clone());
        payload.insert("comment", self.comment.clone());
        payload.insert("contractor", self.contractor.clone());
        payload.insert("company_short_info", company.short_block());
        payload
    }
}

/// `"{cal}К/{p}Б/{f}Ж/{c}У на 100 гр."`; missing values print as 0.
pub fn format_nutrition(
    calories: Option<f64>,
    protein: Option<f64>,
    fat: Option<f64>,
    carbs: Option<f64>,
) -> String {
    format!(
        "{}К/{}Б/{}Ж/{}У на 100 гр.",
        format_tenths(calories),
        format_tenths(protein),
        format_tenths(fat),
        format_tenths(carbs)
    )
}

/// Manufacture and expiry lines, both stamped at 02:00.
pub fn format_dates(today: NaiveDate, shelf_days: i64) -> (String, String) {
    let days = shelf_days.clamp(-MAX_SHELF_DAYS, MAX_SHELF_DAYS);
    let expiry = today
        .checked_add_signed(Duration::days(days))
        .unwrap_or(today);
    (
        format!("Изготовлено: {} 02:00", today.format("%d.%m.%y")),
        format!("Употребить до: {} 02:00", expiry.format("%d.%m.%y")),
    )
}

// Half-up (away from zero) to one decimal; integral results drop the fraction. The nudge keeps
// decimal halves such as 99.95 from rounding down through their binary representation.
fn format_tenths(value: Option<f64>) -> String {
    let value = value.filter(|v| v.is_finite()).unwrap_or(0.0);
    let tenths = (value * 10.0 + value.signum() * 1e-9).round() as i64;
    if tenths % 10 == 0 {
        return (tenths / 10).to_string();
    }
    let sign = if tenths < 0 { "-" } else { "" };
    let abs = tenths.unsigned_abs();
    format!("{sign}{}.{}", abs / 10, abs % 10)
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn company() -> CompanyInfo {
        CompanyInfo {
            name: "ООО Кухня".to_string(),
            address: "ул. Ленина, 1".to_string(),
            phone_number: "+7 900 000-00-00".to_string(),
            short_address: "Казань".to_string(),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("date")
    }

    #[test]
    fn nutrition_rounds_half_up_and_drops_integral_fraction() {
        assert_eq!(
            format_nutrition(Some(250.0), Some(12.25), Some(3.04), None),
            "250К/12.3Б/3Ж/0У на 100 гр."
        );
        assert_eq!(
            format_nutrition(Some(99.95), Some(0.5), Some(7.0), Some(1.15)),
            "100К/0.5Б/7Ж/1.2У на 100 гр."
        );
    }

    #[test]
    fn dates_cross_month_boundary() {
        let (made, expiry) = format_dates(date(2024, 1, 30), 5);
        assert_eq!(made, "Изготовлено: 30.01.24 02:00");
        assert_eq!(expiry, "Употребить до: 04.02.24 02:00");
    }

    #[test]
    fn huge_shelf_life_is_clamped() {
        let (_, expiry) = format_dates(date(2024, 1, 1), i64::MAX);
        assert!(expiry.starts_with("Употребить до: "));
    }

    #[test]
    fn product_payload_fills_every_key() {
        let fields: ProductFields = serde_json::from_str(
            r#"{
                "name": "Сырники",
                "weight": "200 г",
                "calories": "215.46",
                "protein": 14,
                "shelf_life": 3,
                "org_standarts": [
                    {"name": "Сырники", "code": "123-2020"},
                    {"name": "Запеканка", "code": "77"}
                ]
            }"#,
        )
        .expect("fields");
        let payload = fields.to_payload(&company(), date(2024, 3, 10));
        assert_eq!(payload.text("name"), "Сырники");
        assert_eq!(payload.text("barcode"), DEFAULT_BARCODE);
        assert_eq!(payload.text("nutrition"), "215.5К/14Б/0Ж/0У на 100 гр.");
        assert_eq!(payload.text("expiry_date"), "Употребить до: 13.03.24 02:00");
        assert_eq!(
            payload.text("org_standarts"),
            "Сырники СТО 123-2020, Запеканка СТО 77"
        );
        assert_eq!(
            payload.text("company_info"),
            "Изготовитель: ООО Кухня<br />Адрес производства: ул. Ленина, 1<br />Телефон: +7 900 000-00-00"
        );
        assert_eq!(payload.len(), 10);
    }

    #[test]
    fn contractor_payload_prefixes_city() {
        let fields = ContractorFields {
            name: "Магазин".to_string(),
            city: "Казань".to_string(),
            ..Default::default()
        };
        let payload = fields.to_payload(&company());
        assert_eq!(payload.text("city"), "г. Казань");
        assert_eq!(payload.text("company_short_info"), "ООО Кухня<br />Казань");
        assert_eq!(payload.text("comment"), "");
    }
}
