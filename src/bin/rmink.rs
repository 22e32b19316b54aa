//! CLI binary for rmink.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rmink::pipeline::input::load_notebook;
use rmink::pipeline::myscript::{APPLICATION_KEY_ENV, HMAC_KEY_ENV};
use rmink::{
    build_batch_request, convert_to_dir, inspect, BatchRequest, ContentType, ConversionConfig,
    ConversionProgressCallback, InkError, MyScriptBackend, Page, PageRequest, ProgressCallback,
    RecognitionBackend, RecognitionOptions, RenderConfig,
};
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

/// Live progress bar plus one log line per finished page. Pages may finish
/// out of order when `--concurrency` is above 1.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_conversion_start` reports the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Decoding notebook…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Rendering");
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, png_len: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<10}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{:>6} KiB", png_len / 1024)),
            dim(&format!("{secs:.2}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(['…']).collect()
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.2}s")),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        let failed = total_pages.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} pages rendered",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages rendered  ({} failed)",
                if failed == total_pages { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Render every page of an unpacked notebook into the current directory
  rmink ~/xochitl/6f2c….content

  # Render the page that was open last, 1000 px wide, into out/
  rmink notebook/ --last-opened --width 1000 -o out/

  # Render a single page file
  rmink page.rm -o out/

  # Render an exported notebook archive and recognise its text
  RMAPI_HWR_APPLICATIONKEY=... RMAPI_HWR_HMAC=... rmink notes.rmdoc --type text -o out/

  # Show notebook structure without rendering
  rmink --inspect-only notebook/

  # Dump decoded strokes as JSON
  rmink --format strokes --page 3 notebook/ > page3.json

  # Build math-recognition requests for a recognition service
  rmink --format request --type math notebook/ > requests.json

OUTPUT:
  png       page_<N>.png per rendered page (1-based), in --output, plus
            <notebook>.txt with the recognised text when --type is given
  strokes   decoded stroke graph of the selected pages, JSON on stdout
  request   one recognition request per selected page, JSON on stdout

ENVIRONMENT VARIABLES:
  RUST_LOG                  Override the log filter (e.g. rmink=debug)
  RMAPI_HWR_APPLICATIONKEY  MyScript application key (same as --application-key)
  RMAPI_HWR_HMAC            MyScript HMAC key (same as --hmac-key)
"#;

/// Render reMarkable notebook pages to PNG.
#[derive(Parser, Debug)]
#[command(
    name = "rmink",
    version,
    about = "Render reMarkable notebook pages to PNG",
    long_about = "Decode reMarkable notebooks (format revision 6), render pages to PNG, \
dump decoded strokes, or build handwriting-recognition requests.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Page file (.rm), manifest (.content), archive (.zip, .rmdoc) or
    /// notebook directory.
    input: PathBuf,

    /// Directory for rendered pages.
    #[arg(short, long, env = "RMINK_OUTPUT", default_value = ".")]
    output: PathBuf,

    /// Render only this page (1-indexed).
    #[arg(long, conflicts_with = "last_opened")]
    page: Option<usize>,

    /// Render only the page that was open last on the device.
    #[arg(long)]
    last_opened: bool,

    /// Output image width in pixels.
    #[arg(long, env = "RMINK_WIDTH", default_value_t = rmink::config::DEFAULT_OUTPUT_WIDTH)]
    width: u32,

    /// Padding around the ink as a fraction of its extent.
    #[arg(long)]
    padding_percent: Option<f32>,

    /// Minimum padding in canvas units.
    #[arg(long)]
    min_padding: Option<f32>,

    /// Stroke width multiplier applied after scaling to the output width.
    #[arg(long)]
    stroke_scale: Option<f32>,

    /// Thinnest stroke radius in pixels.
    #[arg(long)]
    min_stroke: Option<u32>,

    /// Thickest stroke radius in pixels.
    #[arg(long)]
    max_stroke: Option<u32>,

    /// Number of pages rendered concurrently.
    #[arg(short, long, env = "RMINK_CONCURRENCY", default_value_t = 3)]
    concurrency: usize,

    /// What to produce.
    #[arg(long, value_enum, default_value = "png")]
    format: FormatArg,

    /// Recognition content type.
    #[arg(long = "type", value_enum)]
    content_type: Option<TypeArg>,

    /// Recognition language.
    #[arg(long, default_value = "en_US")]
    lang: String,

    /// MyScript application key; recognition runs when `--type` is given.
    #[arg(long, env = "RMAPI_HWR_APPLICATIONKEY", hide_env_values = true)]
    application_key: Option<String>,

    /// MyScript HMAC key.
    #[arg(long, env = "RMAPI_HWR_HMAC", hide_env_values = true)]
    hmac_key: Option<String>,

    /// Per-page recognition timeout in seconds.
    #[arg(long, default_value_t = 60)]
    recognition_timeout: u64,

    /// Prefix each page's recognised text with `=== Page N ===`.
    #[arg(long)]
    page_headers: bool,

    /// Print notebook structure only, no rendering.
    #[arg(long)]
    inspect_only: bool,

    /// Print structured JSON instead of a human summary.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "RMINK_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum FormatArg {
    Png,
    Strokes,
    Request,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum TypeArg {
    Text,
    Math,
    Diagram,
    Jiix,
}

impl From<TypeArg> for ContentType {
    fn from(v: TypeArg) -> Self {
        match v {
            TypeArg::Text => ContentType::Text,
            TypeArg::Math => ContentType::Math,
            TypeArg::Diagram => ContentType::Diagram,
            TypeArg::Jiix => ContentType::Jiix,
        }
    }
}

#[derive(Serialize)]
struct PageExport<'a> {
    page_num: usize,
    #[serde(flatten)]
    page: &'a Page,
}

#[derive(Serialize)]
struct RequestExport {
    page_num: usize,
    request: BatchRequest,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet
        && !cli.no_progress
        && !cli.json
        && !cli.inspect_only
        && cli.format == FormatArg::Png;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let summary = inspect(&cli.input)
            .await
            .context("Failed to inspect notebook")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
            );
        } else {
            println!("Input:        {}", cli.input.display());
            println!("Document:     {}", summary.id);
            println!("Revision:     {:?}", summary.revision);
            println!("Pages:        {}", summary.page_count);
            if let Some(idx) = summary.last_opened {
                println!("Last opened:  {}", idx + 1);
            }
            for p in &summary.pages {
                println!(
                    "  page {:>3}  {:>2} layers  {:>5} strokes  {:>7} points{}",
                    p.page_num,
                    p.layers,
                    p.strokes,
                    p.points,
                    if p.unreadable { "  (unreadable)" } else { "" }
                );
            }
        }
        return Ok(());
    }

    let pages = page_request(&cli);

    match cli.format {
        FormatArg::Strokes => {
            let notebook = load_notebook(&cli.input, None)
                .await
                .context("Failed to load notebook")?;
            let doc = &notebook.document;
            let selected = pages.select(doc.page_count(), doc.last_opened)?;
            let export: Vec<PageExport<'_>> = selected
                .iter()
                .filter_map(|&i| doc.page(i).map(|page| PageExport { page_num: i + 1, page }))
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&export).context("Failed to serialise strokes")?
            );
        }
        FormatArg::Request => {
            let notebook = load_notebook(&cli.input, None)
                .await
                .context("Failed to load notebook")?;
            let doc = &notebook.document;
            let options = RecognitionOptions {
                content_type: cli.content_type.map(Into::into).unwrap_or_default(),
                lang: cli.lang.clone(),
            };
            let selected = pages.select(doc.page_count(), doc.last_opened)?;
            let export: Vec<RequestExport> = selected
                .iter()
                .filter_map(|&i| {
                    doc.page(i).map(|page| RequestExport {
                        page_num: i + 1,
                        request: build_batch_request(page, &options),
                    })
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&export).context("Failed to serialise requests")?
            );
        }
        FormatArg::Png => {
            let recognizer = recognizer_for(&cli)?;

            let progress_cb: Option<ProgressCallback> = if show_progress {
                let cb = CliProgressCallback::new_dynamic();
                Some(cb as Arc<dyn ConversionProgressCallback>)
            } else {
                None
            };

            let config = build_config(&cli, pages, recognizer, progress_cb)?;
            let output = convert_to_dir(&cli.input, &cli.output, &config)
                .await
                .context("Conversion failed")?;

            if cli.json {
                let json =
                    serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
                println!("{json}");
            } else if !cli.quiet {
                let stats = &output.stats;
                eprintln!(
                    "{}  {}/{} pages  {} strokes  {}ms  →  {}",
                    if stats.failed_pages == 0 { green("✔") } else { cyan("⚠") },
                    stats.rendered_pages,
                    stats.selected_pages,
                    stats.total_strokes,
                    stats.total_duration_ms,
                    bold(&cli.output.display().to_string()),
                );
                if stats.blank_pages > 0 {
                    eprintln!("   {}", dim(&format!("{} blank pages", stats.blank_pages)));
                }
                if !show_progress {
                    for err in output.pages.iter().filter_map(|p| p.error.as_ref()) {
                        eprintln!("   {}", red(&err.to_string()));
                    }
                }
                if output.text.is_some() {
                    eprintln!("   {}", dim("recognised text written next to the pages"));
                }
            }
        }
    }

    Ok(())
}

fn page_request(cli: &Cli) -> PageRequest {
    match (cli.page, cli.last_opened) {
        (Some(n), _) => PageRequest::Explicit(n),
        (None, true) => PageRequest::LastOpened,
        (None, false) => PageRequest::All,
    }
}

/// MyScript backend for `--type`, or `None` when no recognition was asked for.
fn recognizer_for(cli: &Cli) -> Result<Option<Arc<dyn RecognitionBackend>>> {
    if cli.content_type.is_none() {
        return Ok(None);
    }
    match MyScriptBackend::from_keys(cli.application_key.clone(), cli.hmac_key.clone())? {
        Some(backend) => Ok(Some(Arc::new(backend))),
        None => Err(InkError::RecognitionNotConfigured {
            hint: format!(
                "set {APPLICATION_KEY_ENV} and {HMAC_KEY_ENV} (or pass --application-key and \
                 --hmac-key), or use --format request to export requests for another service"
            ),
        }
        .into()),
    }
}

/// Map CLI args to `ConversionConfig`.
fn build_config(
    cli: &Cli,
    pages: PageRequest,
    recognizer: Option<Arc<dyn RecognitionBackend>>,
    progress: Option<ProgressCallback>,
) -> Result<ConversionConfig> {
    let mut render = RenderConfig::default();
    if let Some(v) = cli.padding_percent {
        render.padding_percent = v;
    }
    if let Some(v) = cli.min_padding {
        render.min_padding = v;
    }
    if let Some(v) = cli.stroke_scale {
        render.stroke_width_scale = v;
    }
    if let Some(v) = cli.min_stroke {
        render.min_stroke_width = v;
    }
    if let Some(v) = cli.max_stroke {
        render.max_stroke_width = v;
    }

    let mut builder = ConversionConfig::builder()
        .output_width(cli.width)
        .render(render)
        .concurrency(cli.concurrency)
        .pages(pages)
        .lang(cli.lang.clone())
        .page_headers(cli.page_headers)
        .recognition_timeout_secs(cli.recognition_timeout);

    if let Some(backend) = recognizer {
        builder = builder
            .recognizer(backend)
            .content_type(cli.content_type.map(Into::into).unwrap_or_default());
    }

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
