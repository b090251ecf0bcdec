//! The `translate` subcommand.

use std::sync::Arc;

use clap::{Args, builder::TypedValueParser as _};
use tokio::fs;

use crate::{
    chunk::DEFAULT_MAX_CHUNK_CHARS,
    ocr::OcrOpts,
    page_iter::PageRangeOpts,
    pali::PaliTermSet,
    pipeline::{PagePipeline, PipelineSettings},
    prelude::*,
    stop::StopSignal,
    translate::{ChunkTranslator, TranslateOpts},
    ui::Ui,
    writer::write_and_report,
};

/// Command-line options for the `translate` subcommand.
#[derive(Debug, Args)]
pub struct TranslateCmdOpts {
    /// Documents to translate. PDFs or single page images. If none are given,
    /// every PDF in `--input-dir` is translated.
    #[clap(value_name = "INPUTS")]
    pub inputs: Vec<PathBuf>,

    /// Where to look for PDFs when no inputs are given.
    #[clap(long, default_value = ".")]
    pub input_dir: PathBuf,

    /// Directory to write results to. Created if needed.
    #[clap(short = 'o', long, default_value = "translations")]
    pub output_dir: PathBuf,

    #[clap(flatten)]
    pub page_range: PageRangeOpts,

    /// Maximum size of each translation request, in characters.
    #[clap(
        long,
        default_value_t = DEFAULT_MAX_CHUNK_CHARS,
        value_parser = clap::value_parser!(u64).range(1..).map(|n| n as usize),
    )]
    pub chunk_size: usize,

    /// A TOML file listing extra Pali terms to look for. See `schema
    /// PaliTermConfig`.
    #[clap(long)]
    pub pali_terms: Option<PathBuf>,

    #[clap(flatten)]
    pub translate: TranslateOpts,

    #[clap(flatten)]
    pub ocr: OcrOpts,

    /// How many pages to process at once. This also limits the number of
    /// translation requests in flight.
    #[clap(short = 'j', long = "jobs", default_value = "1")]
    pub jobs: usize,
}

/// The `translate` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_translate(ui: Ui, opts: &TranslateCmdOpts) -> Result<()> {
    // Check everything we can before we start on any real work.
    if opts.jobs == 0 {
        return Err(anyhow!("--jobs must be at least 1"));
    }
    let range = opts.page_range.to_page_range()?;
    let documents = find_documents(&opts.inputs, &opts.input_dir).await?;
    let pali_terms = Arc::new(PaliTermSet::load(opts.pali_terms.as_deref()).await?);
    let translator = Arc::new(ChunkTranslator::new(
        opts.translate.translator.create_translator()?,
        &opts.translate,
    )?);
    let ocr_engine = opts.ocr.create_engine()?;

    let (pipeline, worker) = PagePipeline::new(
        PipelineSettings {
            chunk_size: opts.chunk_size,
            jobs: opts.jobs,
            page_format: opts.ocr.page_format(),
        },
        pali_terms,
        ocr_engine,
        translator,
    );

    let stop = StopSignal::on_ctrl_c();
    let mut failed_documents = vec![];
    for (idx, path) in documents.iter().enumerate() {
        if stop.is_stopped() {
            warn!(
                skipped = documents.len() - idx,
                "Interrupted, skipping remaining documents"
            );
            break;
        }
        info!("Translating {}", path.display());

        // A broken document shouldn't stop us from translating the rest.
        let outcome = async {
            let result = pipeline
                .process_document(&ui, path, range, &stop)
                .await?;
            write_and_report(&ui, &opts.output_dir, &result).await?;
            Ok::<_, anyhow::Error>(())
        }
        .await;
        if let Err(err) = outcome {
            error!("Could not translate {}: {:?}", path.display(), err);
            failed_documents.push(path.display().to_string());
        }
    }

    // Dropping the pipeline closes the translation queue.
    drop(pipeline);
    worker.join().await?;

    if failed_documents.is_empty() {
        Ok(())
    } else {
        Err(anyhow!(
            "could not translate {} of {} documents: {}",
            failed_documents.len(),
            documents.len(),
            failed_documents.join(", ")
        ))
    }
}

/// Decide which documents to process. Explicit inputs win. Otherwise, we use
/// every PDF in `input_dir`, sorted by name.
async fn find_documents(inputs: &[PathBuf], input_dir: &Path) -> Result<Vec<PathBuf>> {
    if !inputs.is_empty() {
        return Ok(inputs.to_vec());
    }

    let mut entries = fs::read_dir(input_dir)
        .await
        .with_context(|| format!("cannot read input directory {:?}", input_dir))?;
    let mut documents = vec![];
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("cannot read input directory {:?}", input_dir))?
    {
        let path = entry.path();
        let is_pdf = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        if is_pdf && entry.file_type().await.is_ok_and(|ty| ty.is_file()) {
            documents.push(path);
        }
    }
    documents.sort();

    if documents.is_empty() {
        return Err(anyhow!(
            "no documents to translate: pass some on the command line, or put PDFs in {:?}",
            input_dir
        ));
    }
    Ok(documents)
}
