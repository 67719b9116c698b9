use crate::{
    LabelEngine, LabelError, Payload, PdfInspectReport, Template, TextStrategy, inspect_pdf_path,
    register_fonts,
};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList, PyModule};
use std::path::Path;

#[pyclass(name = "LabelEngine")]
struct PyLabelEngine {
    engine: LabelEngine,
}

#[pymethods]
impl PyLabelEngine {
    #[new]
    #[pyo3(signature = (font_dir=None, image_dir=None, strategy="lines", debug_log=None))]
    fn new(
        font_dir: Option<String>,
        image_dir: Option<String>,
        strategy: &str,
        debug_log: Option<String>,
    ) -> PyResult<Self> {
        let strategy = TextStrategy::parse(strategy).ok_or_else(|| {
            PyValueError::new_err(format!(
                "unknown strategy {strategy:?}; expected flow or lines"
            ))
        })?;
        let mut builder = LabelEngine::builder().text_strategy(strategy);
        if let Some(dir) = font_dir {
            builder = builder.font_registry(register_fonts(dir));
        }
        if let Some(dir) = image_dir {
            builder = builder.image_dir(dir);
        }
        if let Some(path) = debug_log {
            builder = builder.debug_log(path);
        }
        let engine = builder.build().map_err(to_py_err)?;
        Ok(Self { engine })
    }

    fn render_pdf_base64(
        &self,
        py: Python<'_>,
        template_json: &str,
        payload_json: &str,
    ) -> PyResult<String> {
        let (template, payload) = parse_job(template_json, payload_json)?;
        py.allow_threads(|| self.engine.render_pdf_base64(&template, &payload))
            .map_err(to_py_err)
    }

    #[pyo3(signature = (template_json, payload_json, dpi=200))]
    fn render_png_base64(
        &self,
        py: Python<'_>,
        template_json: &str,
        payload_json: &str,
        dpi: u32,
    ) -> PyResult<String> {
        let (template, payload) = parse_job(template_json, payload_json)?;
        py.allow_threads(|| self.engine.render_png_base64(&template, &payload, dpi))
            .map_err(to_py_err)
    }

    #[pyo3(signature = (template_json, dpi=200))]
    fn preview_png_base64(&self, py: Python<'_>, template_json: &str, dpi: u32) -> PyResult<String> {
        let template = Template::from_json(template_json).map_err(to_py_err)?;
        py.allow_threads(|| self.engine.preview_png_base64(&template, dpi))
            .map_err(to_py_err)
    }

    /// Renders `(template_json, payload_json)` pairs in parallel; one base64 PDF per job.
    fn render_pdf_batch_base64(
        &self,
        py: Python<'_>,
        jobs: Vec<(String, String)>,
    ) -> PyResult<Vec<String>> {
        use base64::Engine;

        let parsed = jobs
            .iter()
            .map(|(template, payload)| parse_job(template, payload))
            .collect::<PyResult<Vec<_>>>()?;
        let results = py.allow_threads(|| self.engine.render_many(&parsed));
        results
            .into_iter()
            .map(|res| {
                res.map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes))
                    .map_err(to_py_err)
            })
            .collect()
    }
}

/// Registers the standard label families once per process and returns how many fonts are
/// available.
#[pyfunction]
#[pyo3(name = "register_fonts")]
fn register_fonts_py(dir: &str) -> usize {
    register_fonts(dir).len()
}

#[pyfunction]
fn inspect_pdf(py: Python<'_>, path: &str) -> PyResult<PyObject> {
    let report = inspect_pdf_path(Path::new(path)).map_err(to_py_err)?;
    inspect_report_to_py(py, path, &report)
}

#[pymodule]
fn _labelkit(_py: Python<'_>, module: &Bound<'_, PyModule>) -> PyResult<()> {
    module.add_class::<PyLabelEngine>()?;
    module.add_function(wrap_pyfunction!(register_fonts_py, module)?)?;
    module.add_function(wrap_pyfunction!(inspect_pdf, module)?)?;
    Ok(())
}

fn parse_job(template_json: &str, payload_json: &str) -> PyResult<(Template, Payload)> {
    let template = Template::from_json(template_json).map_err(to_py_err)?;
    let payload = Payload::from_json(payload_json).map_err(to_py_err)?;
    Ok((template, payload))
}

fn inspect_report_to_py(
    py: Python<'_>,
    path: &str,
    report: &PdfInspectReport,
) -> PyResult<PyObject> {
    let out = PyDict::new_bound(py);
    out.set_item("path", path)?;
    out.set_item("pdf_version", report.pdf_version.as_str())?;
    out.set_item("page_count", report.page_count)?;
    out.set_item("encrypted", report.encrypted)?;
    out.set_item("file_size_bytes", report.file_size_bytes)?;

    let sizes = PyList::empty_bound(py);
    for size in &report.page_sizes {
        sizes.append((size.width.to_f32(), size.height.to_f32()))?;
    }
    out.set_item("page_sizes", sizes)?;
    out.set_item("warnings", report.warnings.clone())?;
    Ok(out.into_any().unbind())
}

fn to_py_err(err: LabelError) -> PyErr {
    PyValueError::new_err(err.to_string())
}
