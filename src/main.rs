use std::str::FromStr;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter, Layer as _,
    filter::Directive,
    fmt::{format::FmtSpan, writer::MakeWriterExt as _},
    layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{prelude::*, ui::Ui};

mod analytics;
mod cmd;
mod command;
mod config;
mod extract;
mod ocr;
mod pipeline;
mod prelude;
mod rasterize;
mod run_record;
mod ui;

/// OCR invoice PDFs and extract their fields with a local LLM.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - INPUT_DIR, OUTPUT_DIR: Where to find PDFs and put images and OCR output.
  - TESSERACT_FORMAT, TESSERACT_DENSITY, TESSERACT_QUALITY: Page images.
  - TESSERACT_LANGUAGE: Tesseract language code(s), e.g. `deu+eng`.
  - BASE_URL: The llama.cpp server to use for extraction.
  - EXTRACTION_TIMEOUT (optional): Seconds to wait for the server.
  - ANALYTICS_FILE: JSON history that each run appends to.
  - RUST_LOG (optional): Log filter, e.g. `debug` or `invoice_ocr=trace`.

  `pdfinfo` and `pdftocairo` (from poppler-utils) and `tesseract` must be
  on the PATH.

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    #[clap(flatten)]
    mode: cmd::ModeOpts,

    #[clap(flatten)]
    config: config::Config,
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    // Progress goes to stdout. Warnings and errors go to stderr.
    let writer = ui
        .get_stderr_writer()
        .with_max_level(Level::WARN)
        .or_else(ui.get_stdout_writer());
    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(writer)
        .with_filter(env_filter);

    // We can stack multiple layers here if we need to.
    tracing_subscriber::registry().with(subscriber).init();

    // Call our real `main` function now that logging is set up.
    real_main(ui).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    // Parse command-line arguments.
    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    cmd::run::cmd_run(ui, &opts.mode, &opts.config).await
}
