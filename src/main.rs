//! `labelkit` command line: render labels, preview templates, inspect PDFs.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use labelkit::{
    DEFAULT_DPI, LabelEngine, LabelError, Payload, StyleSheet, Template, TextStrategy,
    inspect_pdf_path,
};

#[derive(Parser)]
#[command(name = "labelkit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Font directory holding the label families
    #[arg(long, global = true)]
    font_dir: Option<PathBuf>,

    /// Image directory for image elements (defaults to $LABELKIT_IMAGE_DIR)
    #[arg(long, global = true)]
    image_dir: Option<PathBuf>,

    /// JSON file with extra styles, layered over the built-in ones
    #[arg(long, global = true)]
    styles: Option<PathBuf>,

    /// Text placement strategy (flow, lines)
    #[arg(long, global = true, default_value = "lines", value_parser = parse_strategy)]
    strategy: TextStrategy,

    /// Write a JSONL debug log to this path
    #[arg(long, global = true)]
    debug_log: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a template with a payload to PDF, and optionally PNG
    Render {
        #[arg(long)]
        template: PathBuf,

        /// Payload JSON; an empty payload when omitted
        #[arg(long)]
        payload: Option<PathBuf>,

        #[arg(long)]
        pdf: PathBuf,

        #[arg(long)]
        png: Option<PathBuf>,

        #[arg(long, default_value_t = DEFAULT_DPI)]
        dpi: u32,
    },

    /// Render an outline preview of a template to PNG
    Preview {
        #[arg(long)]
        template: PathBuf,

        #[arg(long)]
        png: PathBuf,

        #[arg(long, default_value_t = DEFAULT_DPI)]
        dpi: u32,
    },

    /// Print page count, version and page sizes of a PDF
    Inspect { file: PathBuf },
}

fn main() -> ExitCode {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("labelkit: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), LabelError> {
    match &cli.command {
        Commands::Render {
            template,
            payload,
            pdf,
            png,
            dpi,
        } => {
            let engine = build_engine(&cli)?;
            let template = read_template(template)?;
            let payload = match payload {
                Some(path) => Payload::from_json(&std::fs::read_to_string(path)?)?,
                None => Payload::new(),
            };
            let document = engine.render_document(&template, &payload)?;
            let bytes = engine.finalize_pdf(&document)?;
            std::fs::write(pdf, &bytes)?;
            log::info!("wrote {}", pdf.display());
            if let Some(png) = png {
                std::fs::write(png, engine.rasterize(&bytes, *dpi)?)?;
                log::info!("wrote {}", png.display());
            }
        }
        Commands::Preview { template, png, dpi } => {
            let engine = build_engine(&cli)?;
            let template = read_template(template)?;
            std::fs::write(png, engine.preview_from_template(&template, *dpi)?)?;
            log::info!("wrote {}", png.display());
        }
        Commands::Inspect { file } => {
            let report = inspect_pdf_path(file)?;
            println!("file: {}", file.display());
            println!("version: {}", report.pdf_version);
            println!("pages: {}", report.page_count);
            println!("encrypted: {}", report.encrypted);
            println!("size: {} bytes", report.file_size_bytes);
            for (idx, (size, (w_mm, h_mm))) in report
                .page_sizes
                .iter()
                .zip(report.page_sizes_mm())
                .enumerate()
            {
                println!(
                    "page {}: {:.3} x {:.3} pt ({w_mm:.1} x {h_mm:.1} mm)",
                    idx + 1,
                    size.width.to_f32(),
                    size.height.to_f32()
                );
            }
            for warning in &report.warnings {
                println!("warning: {warning}");
            }
        }
    }
    Ok(())
}

fn build_engine(cli: &Cli) -> Result<LabelEngine, LabelError> {
    let mut builder = LabelEngine::builder().text_strategy(cli.strategy);
    if let Some(dir) = &cli.font_dir {
        builder = builder.font_dir(dir);
    }
    if let Some(dir) = &cli.image_dir {
        builder = builder.image_dir(dir);
    }
    if let Some(path) = &cli.styles {
        let mut styles = StyleSheet::builtin();
        styles.extend_from_json(&std::fs::read_to_string(path)?)?;
        builder = builder.styles(styles);
    }
    if let Some(path) = &cli.debug_log {
        builder = builder.debug_log(path);
    }
    builder.build()
}

fn read_template(path: &Path) -> Result<Template, LabelError> {
    Template::from_json(&std::fs::read_to_string(path)?)
}

fn parse_strategy(raw: &str) -> Result<TextStrategy, String> {
    TextStrategy::parse(raw).ok_or_else(|| format!("unknown strategy {raw:?}; expected flow or lines"))
}
