use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{prelude::*, ui::Ui};

mod async_utils;
mod chunk;
mod cmd;
mod cpu_limit;
mod ocr;
mod page_iter;
mod pali;
mod pipeline;
mod prelude;
mod queues;
mod rate_limit;
mod retry;
mod stop;
mod toml_utils;
mod translate;
mod ui;
mod writer;

/// Translate scanned Thai Abhidhamma texts into English, keeping track of
/// Pali terms.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
External tools:
  - tesseract, with the `tha` language data, for OCR.
  - pdfinfo, pdftocairo, pdfseparate and pdftotext from poppler-utils.

  Run the `check` subcommand to make sure everything is installed.

Environment Variables:
  - RUST_LOG (optional): Logging filter, like "debug" or
    "abhidhamma_translator=trace". Defaults to "info".
  - TRANSLATE_API_BASE (optional): Override the translation server URL.

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// OCR and translate documents, writing JSON and text results.
    Translate(cmd::translate::TranslateCmdOpts),
    /// Check that OCR tools, language data and translation all work.
    Check(cmd::check::CheckOpts),
    /// Print schemas for output and configuration files.
    Schema(cmd::schema::SchemaOpts),
}

impl Cmd {
    /// Are we using stdout for output?
    fn using_stdout_for_output(&self) -> bool {
        match self {
            Cmd::Translate(_) | Cmd::Check(_) => false,
            Cmd::Schema(opts) => opts.output_path.is_none(),
        }
    }
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

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);
    tracing_subscriber::registry().with(subscriber).init();

    real_main(ui).await
}

/// Our real entry point, once logging is set up.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    if opts.subcmd.using_stdout_for_output() {
        ui.hide_progress_bars();
    }

    match &opts.subcmd {
        Cmd::Translate(translate_opts) => {
            cmd::translate::cmd_translate(ui, translate_opts).await?;
        }
        Cmd::Check(check_opts) => {
            cmd::check::cmd_check(ui, check_opts).await?;
        }
        Cmd::Schema(schema_opts) => {
            cmd::schema::cmd_schema(schema_opts).await?;
        }
    }
    Ok(())
}
