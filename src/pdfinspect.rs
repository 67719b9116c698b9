use lopdf::Document as LoDocument;
use std::path::Path;

use crate::error::LabelError;
use crate::pdf_raster::page_size_for_id;
use crate::types::{PT_PER_MM, Size};

#[derive(Debug, Clone, PartialEq)]
pub struct PdfInspectReport {
    pub pdf_version: String,
    pub page_count: usize,
    pub encrypted: bool,
    pub file_size_bytes: usize,
    /// MediaBox of every page in page order, in points.
    pub page_sizes: Vec<Size>,
    pub warnings: Vec<String>,
}

impl PdfInspectReport {
    pub fn page_sizes_mm(&self) -> Vec<(f32, f32)> {
        self.page_sizes
            .iter()
            .map(|size| {
                (
                    size.width.to_f32() / PT_PER_MM,
                    size.height.to_f32() / PT_PER_MM,
                )
            })
            .collect()
    }
}

pub fn inspect_pdf_bytes(bytes: &[u8]) -> Result<PdfInspectReport, LabelError> {
    let pdf = LoDocument::load_mem(bytes)?;

    let mut page_sizes = Vec::new();
    let mut warnings = Vec::new();
    for (number, page_id) in pdf.get_pages() {
        match page_size_for_id(&pdf, page_id) {
            Ok(size) => page_sizes.push(size),
            Err(err) => warnings.push(format!("page {number}: {err}")),
        }
    }

    Ok(PdfInspectReport {
        pdf_version: pdf.version.clone(),
        page_count: pdf.get_pages().len(),
        encrypted: pdf.is_encrypted(),
        file_size_bytes: bytes.len(),
        page_sizes,
        warnings,
    })
}

pub fn inspect_pdf_path(path: &Path) -> Result<PdfInspectReport, LabelError> {
    let data = std::fs::read(path)?;
    inspect_pdf_bytes(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Canvas;
    use crate::font::FontRegistry;
    use crate::pdf::document_to_pdf;
    use crate::types::Rect;
    use lopdf::{Object as LoObject, Stream as LoStream, dictionary};
    use std::io::Write;

    fn label_pdf_bytes() -> Vec<u8> {
        let mut canvas = Canvas::new(Size::from_mm(58.0, 40.0));
        let r = Rect::from_mm(2.0, 2.0, 10.0, 10.0);
        canvas.draw_rect(r.x, r.y, r.width, r.height);
        document_to_pdf(&canvas.finish(), &FontRegistry::new(), false).expect("pdf")
    }

    // Page without its own MediaBox; the size lives on the Pages node.
    fn inherited_media_box_pdf_bytes() -> Vec<u8> {
        let mut doc = LoDocument::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content_id = doc.add_object(LoStream::new(dictionary! {}, b"0 0 10 10 re f".to_vec()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        };
        doc.objects.insert(pages_id, LoObject::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).expect("save");
        out
    }

    #[test]
    fn inspect_pdf_bytes_reads_label_page() {
        let bytes = label_pdf_bytes();
        let report = inspect_pdf_bytes(&bytes).expect("inspect");
        assert_eq!(report.page_count, 1);
        assert_eq!(report.pdf_version, "1.7");
        assert!(!report.encrypted);
        assert_eq!(report.file_size_bytes, bytes.len());
        assert!(report.warnings.is_empty());
        let (w, h) = report.page_sizes_mm()[0];
        assert!((w - 58.0).abs() < 0.01);
        assert!((h - 40.0).abs() < 0.01);
    }

    #[test]
    fn inspect_pdf_bytes_follows_inherited_media_box() {
        let report = inspect_pdf_bytes(&inherited_media_box_pdf_bytes()).expect("inspect");
        assert_eq!(report.page_count, 1);
        assert!((report.page_sizes[0].width.to_f32() - 612.0).abs() < 0.01);
        assert!((report.page_sizes[0].height.to_f32() - 792.0).abs() < 0.01);
    }

    #[test]
    fn inspect_pdf_bytes_rejects_malformed_data() {
        let err = inspect_pdf_bytes(b"not a pdf").expect_err("invalid");
        assert!(matches!(err, LabelError::Pdf(_)));
    }

    #[test]
    fn inspect_pdf_path_reports_io_error_for_missing_file() {
        let missing = std::env::temp_dir().join(format!(
            "labelkit_pdfinspect_missing_{}_{}.pdf",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        let err = inspect_pdf_path(&missing).expect_err("missing");
        assert!(matches!(err, LabelError::Io(_)));
    }

    #[test]
    fn inspect_pdf_path_matches_bytes_report() {
        let bytes = label_pdf_bytes();
        let temp_dir = std::env::temp_dir().join(format!(
            "labelkit_pdfinspect_path_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&temp_dir).expect("mkdir");
        let path = temp_dir.join("one.pdf");
        let mut f = std::fs::File::create(&path).expect("create");
        f.write_all(&bytes).expect("write");

        let from_path = inspect_pdf_path(&path).expect("inspect path");
        let from_bytes = inspect_pdf_bytes(&bytes).expect("inspect bytes");
        assert_eq!(from_path, from_bytes);
    }
}
