//! Turning pages of Thai text into translated page records.
//!
//! Each page goes through the same steps: split into chunks, translate every
//! chunk, glue the translations back together in order, and look for Pali
//! terms in the original. Failures are recorded on the page they happen to,
//! and never abort the rest of the document.

use std::{collections::BTreeSet, pin::pin, sync::Arc};

use futures::{FutureExt as _, Stream, StreamExt as _, stream};
use indicatif::ProgressBar;
use schemars::JsonSchema;

use crate::{
    async_utils::{
        BoxedFuture, BoxedStream, JoinWorker, blocking_iter_streams::BlockingIterStream,
    },
    chunk::split_chunks,
    ocr::OcrEngine,
    page_iter::{PageFormat, PageIter, PageRange},
    pali::PaliTermSet,
    prelude::*,
    queues::work::{WorkQueue, WorkQueueHandle},
    stop::StopSignal,
    translate::{ChunkTranslation, ChunkTranslator, TRANSLATION_FAILED_PLACEHOLDER},
    ui::{ProgressConfig, Ui},
};

/// The raw text of one page, as returned by OCR.
#[derive(Clone, Debug)]
pub struct PageText {
    /// The 0-based index of this page in the document.
    pub page_index: usize,
    /// The text. May be empty.
    pub text: String,
}

/// A page whose text is still being extracted.
pub type PendingPage = BoxedFuture<Result<PageText>>;

/// What happened to a page?
#[derive(Clone, Copy, Debug, JsonSchema, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    /// Every chunk was translated.
    Ok,

    /// Some chunks could not be translated, and were replaced with
    /// placeholders.
    Incomplete,

    /// OCR found no text on this page.
    Blank,

    /// We could not extract any text, or we could not translate any of it.
    Failed,
}

/// Everything we know about a single page.
#[derive(Clone, Debug, JsonSchema, Serialize)]
pub struct PageRecord {
    /// The 0-based index of this page in the document.
    pub page_index: usize,

    /// The 1-based page number, as a human would count it.
    pub page_number: usize,

    /// What happened to this page?
    pub status: PageStatus,

    /// The text extracted by OCR.
    pub original_text: String,

    /// The translated text. Chunks we could not translate are replaced by
    /// `[Translation failed]`.
    pub translated_text: String,

    /// Known Pali terms found in `original_text`, in term-list order.
    pub pali_terms: Vec<String>,

    /// How many chunks were replaced by placeholders?
    pub failed_chunk_count: usize,

    /// Any errors that occurred while processing this page, including
    /// errors that were later fixed by retrying.
    pub errors: Vec<String>,
}

impl PageRecord {
    /// An empty record with no text.
    fn empty(page_index: usize, status: PageStatus, errors: Vec<String>) -> Self {
        Self {
            page_index,
            page_number: page_index + 1,
            status,
            original_text: String::new(),
            translated_text: String::new(),
            pali_terms: vec![],
            failed_chunk_count: 0,
            errors,
        }
    }

    /// A record for a page with no text.
    pub fn blank(page_index: usize) -> Self {
        Self::empty(page_index, PageStatus::Blank, vec![])
    }

    /// A record for a page we could not read.
    pub fn failed(page_index: usize, error: &anyhow::Error) -> Self {
        Self::empty(page_index, PageStatus::Failed, vec![format!("{:#}", error)])
    }
}

/// The result of processing a document.
#[derive(Clone, Debug, JsonSchema, Serialize)]
pub struct DocumentResult {
    /// The file name of the source document.
    pub source_file: String,

    /// The number of pages in the source document, whether or not we
    /// processed them.
    pub total_pages: usize,

    /// The number of pages in `pages`.
    pub processed_pages: usize,

    /// Did the user interrupt us before we finished?
    pub interrupted: bool,

    /// How many chunks were replaced by placeholders, across all pages?
    pub failed_chunk_count: usize,

    /// Every Pali term found in the document, sorted.
    pub all_pali_terms: Vec<String>,

    /// Per-page records, in page order.
    pub pages: Vec<PageRecord>,
}

impl DocumentResult {
    /// Build a result from page records, filling in the totals.
    pub fn new(
        source_file: String,
        total_pages: usize,
        pages: Vec<PageRecord>,
        interrupted: bool,
    ) -> Self {
        let all_pali_terms = pages
            .iter()
            .flat_map(|page| page.pali_terms.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        Self {
            source_file,
            total_pages,
            processed_pages: pages.len(),
            interrupted,
            failed_chunk_count: pages.iter().map(|page| page.failed_chunk_count).sum(),
            all_pali_terms,
            pages,
        }
    }

    /// How many pages have the given status?
    pub fn count_pages(&self, status: PageStatus) -> usize {
        self.pages.iter().filter(|page| page.status == status).count()
    }
}

/// Settings for [`PagePipeline`].
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    /// Maximum chunk size, in characters.
    pub chunk_size: usize,
    /// How many pages to work on at once, and how many translation requests
    /// may be in flight at once.
    pub jobs: usize,
    /// How to prepare PDF pages for OCR.
    pub page_format: PageFormat,
}

/// Processes documents one page at a time (or several, with `jobs > 1`).
pub struct PagePipeline {
    settings: PipelineSettings,
    pali_terms: Arc<PaliTermSet>,
    ocr_engine: Arc<dyn OcrEngine>,
    translations: WorkQueueHandle<String, ChunkTranslation>,
}

impl PagePipeline {
    /// Create a new pipeline. The returned [`JoinWorker`] finishes once the
    /// pipeline has been dropped.
    pub fn new(
        settings: PipelineSettings,
        pali_terms: Arc<PaliTermSet>,
        ocr_engine: Arc<dyn OcrEngine>,
        translator: Arc<ChunkTranslator>,
    ) -> (Self, JoinWorker) {
        let (queue, worker) = WorkQueue::new(
            settings.jobs,
            Arc::new(move |chunk: String| {
                let translator = translator.clone();
                async move { translator.translate_chunk(&chunk).await }.boxed()
            }),
        );
        let pipeline = Self {
            settings,
            pali_terms,
            ocr_engine,
            translations: queue.handle(),
        };
        (pipeline, worker)
    }

    /// Translate a single page.
    ///
    /// Chunks may be translated concurrently, but the translations are always
    /// reassembled in chunk order.
    #[instrument(level = "debug", skip_all, fields(page = page.page_index + 1))]
    pub async fn process_page(&self, page: PageText) -> PageRecord {
        if page.text.trim().is_empty() {
            debug!("Blank page");
            return PageRecord::blank(page.page_index);
        }

        let chunks = split_chunks(&page.text, self.settings.chunk_size);
        let chunk_count = chunks.len();
        debug!(chunk_count, "Translating page");
        let translations = stream::iter(chunks)
            .map(|chunk| {
                let translations = self.translations.clone();
                let chunk = chunk.to_owned();
                async move {
                    translations
                        .process_blocking(chunk)
                        .await
                        .unwrap_or_else(|err| ChunkTranslation {
                            text: TRANSLATION_FAILED_PLACEHOLDER.to_owned(),
                            failed: true,
                            errors: vec![format!("{:#}", err)],
                        })
                }
            })
            .buffered(self.settings.jobs.max(1))
            .collect::<Vec<_>>()
            .await;

        let mut translated_text = String::with_capacity(page.text.len());
        let mut failed_chunk_count = 0;
        let mut errors = vec![];
        for translation in translations {
            translated_text.push_str(&translation.text);
            if translation.failed {
                failed_chunk_count += 1;
            }
            errors.extend(translation.errors);
        }
        if failed_chunk_count > 0 {
            warn!(
                page = page.page_index + 1,
                failed_chunk_count, chunk_count, "Some chunks could not be translated"
            );
        }

        let status = if failed_chunk_count == 0 {
            PageStatus::Ok
        } else if failed_chunk_count < chunk_count {
            PageStatus::Incomplete
        } else {
            PageStatus::Failed
        };
        let pali_terms = self.pali_terms.scan(&page.text);
        PageRecord {
            page_index: page.page_index,
            page_number: page.page_index + 1,
            status,
            original_text: page.text,
            translated_text,
            pali_terms,
            failed_chunk_count,
            errors,
        }
    }

    /// Process a stream of pages, keeping the records in page order.
    ///
    /// If `stop` fires, we stop taking new pages and return the records we
    /// have so far, marked as interrupted.
    pub async fn process_pages(
        &self,
        source_file: String,
        total_pages: usize,
        pages: impl Stream<Item = (usize, PendingPage)>,
        stop: &StopSignal,
        progress: &ProgressBar,
    ) -> DocumentResult {
        let records = pages
            .map(|(page_index, pending)| async move {
                match pending.await {
                    Ok(page) => self.process_page(page).await,
                    Err(err) => {
                        warn!(page = page_index + 1, "Could not extract text: {:#}", err);
                        PageRecord::failed(page_index, &err)
                    }
                }
            })
            .buffered(self.settings.jobs.max(1));
        let mut records = pin!(records);

        let mut finished = vec![];
        let mut interrupted = false;
        loop {
            tokio::select! {
                biased;
                _ = stop.stopped() => {
                    interrupted = true;
                    break;
                }
                record = records.next() => match record {
                    Some(record) => {
                        progress.inc(1);
                        finished.push(record);
                    }
                    None => break,
                },
            }
        }
        if interrupted {
            warn!(
                %source_file,
                finished = finished.len(),
                "Stopped early, keeping finished pages"
            );
        }
        DocumentResult::new(source_file, total_pages, finished, interrupted)
    }

    /// Extract, translate and annotate the selected pages of a document.
    ///
    /// Only problems with the document as a whole are errors. Problems with
    /// individual pages are recorded in the result.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub async fn process_document(
        &self,
        ui: &Ui,
        path: &Path,
        range: PageRange,
        stop: &StopSignal,
    ) -> Result<DocumentResult> {
        let metadata = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("cannot open document {:?}", path.display()))?;
        if !metadata.is_file() {
            return Err(anyhow!("{:?} is not a file", path.display()));
        }
        let source_file = path
            .file_name()
            .context("document path has no file name")?
            .to_string_lossy()
            .into_owned();

        // Rasterizing a whole book can take a while, so let the user stop us
        // here too.
        let spinner = ui.new_spinner(&ProgressConfig {
            emoji: "🖨️",
            msg: &format!("Preparing pages of {}", source_file),
            done_msg: &format!("Prepared pages of {}", source_file),
        });
        let page_iter = tokio::select! {
            biased;
            _ = stop.stopped() => {
                spinner.finish_and_clear();
                return Ok(DocumentResult::new(source_file, 0, vec![], true));
            }
            page_iter = PageIter::from_path(path, range, self.settings.page_format) => {
                page_iter.with_context(|| {
                    format!("failed to split {:?} into pages", path.display())
                })?
            }
        };
        spinner.finish_and_clear();
        for warning in page_iter.warnings() {
            warn!(%warning, "Warning while preparing pages");
        }

        let total_pages = page_iter.total_pages();
        let first_page_index = page_iter.first_page_index();
        let progress = ui.new_progress_bar(
            &ProgressConfig {
                emoji: "📖",
                msg: &source_file,
                done_msg: &format!("Translated {}", source_file),
            },
            page_iter.selected_page_count() as u64,
        );

        let ocr_engine = self.ocr_engine.clone();
        let pages: BoxedStream<(usize, PendingPage)> = BlockingIterStream::new(page_iter)
            .enumerate()
            .map(move |(offset, page)| {
                let page_index = first_page_index + offset;
                let ocr_engine = ocr_engine.clone();
                let pending = async move {
                    let text = ocr_engine.extract_page_text(page?).await.with_context(|| {
                        format!("could not extract text from page {}", page_index + 1)
                    })?;
                    Ok(PageText { page_index, text })
                }
                .boxed();
                (page_index, pending)
            })
            .boxed();

        let result = self
            .process_pages(source_file, total_pages, pages, stop, &progress)
            .await;
        progress.finish();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::future;

    use super::*;
    use crate::{
        chunk::DEFAULT_MAX_CHUNK_CHARS,
        ocr::pdftotext::PdfToTextOcrEngine,
        retry::{retry_result_fatal, retry_result_ok},
        translate::testing::{FakeTranslator, fast_opts},
    };

    /// Build a pipeline using `fake` to translate.
    fn pipeline(
        fake: &Arc<FakeTranslator>,
        chunk_size: usize,
        jobs: usize,
    ) -> (PagePipeline, JoinWorker) {
        let translator = ChunkTranslator::new(fake.clone(), &fast_opts()).unwrap();
        PagePipeline::new(
            PipelineSettings {
                chunk_size,
                jobs,
                page_format: PageFormat::Pdf,
            },
            Arc::new(PaliTermSet::new(["citta", "cetasika", "rupa", "nibbana"])),
            Arc::new(PdfToTextOcrEngine),
            Arc::new(translator),
        )
    }

    /// Pages whose text is available immediately.
    fn ready_pages(texts: &[&str]) -> BoxedStream<(usize, PendingPage)> {
        let pages = texts
            .iter()
            .enumerate()
            .map(|(page_index, text)| {
                let page = PageText {
                    page_index,
                    text: (*text).to_owned(),
                };
                (page_index, future::ready(Ok::<_, anyhow::Error>(page)).boxed() as PendingPage)
            })
            .collect::<Vec<_>>();
        stream::iter(pages).boxed()
    }

    async fn process(pipeline: &PagePipeline, texts: &[&str]) -> DocumentResult {
        pipeline
            .process_pages(
                "book.pdf".to_owned(),
                texts.len(),
                ready_pages(texts),
                &StopSignal::never(),
                &ProgressBar::hidden(),
            )
            .await
    }

    #[tokio::test]
    async fn failed_chunks_become_placeholders() {
        let fake = Arc::new(FakeTranslator::new(|text| {
            let result = if text.contains("bbbb") {
                retry_result_fatal(anyhow!("HTTP 413"))
            } else {
                retry_result_ok(text.to_uppercase())
            };
            (Duration::ZERO, result)
        }));
        let (pipeline, _worker) = pipeline(&fake, 5, 1);
        let result = process(&pipeline, &["aaaa\nbbbb\ncccc\n", "dddd"]).await;

        let page = &result.pages[0];
        assert_eq!(page.translated_text, "AAAA\n[Translation failed]\nCCCC\n");
        assert_eq!(page.status, PageStatus::Incomplete);
        assert_eq!(page.failed_chunk_count, 1);
        assert_eq!(page.errors, vec!["HTTP 413"]);

        // The next page is unaffected.
        let page = &result.pages[1];
        assert_eq!(page.translated_text, "DDDD");
        assert_eq!(page.status, PageStatus::Ok);
        assert_eq!(result.failed_chunk_count, 1);
        assert_eq!(fake.calls(), vec!["aaaa", "bbbb", "cccc", "dddd"]);
    }

    #[tokio::test]
    async fn pages_where_every_chunk_fails_are_failed() {
        let fake = Arc::new(FakeTranslator::new(|_| {
            (Duration::ZERO, retry_result_fatal(anyhow!("HTTP 403")))
        }));
        let (pipeline, _worker) = pipeline(&fake, 5, 1);
        let result = process(&pipeline, &["citta\nrupa"]).await;
        let page = &result.pages[0];
        assert_eq!(page.status, PageStatus::Failed);
        assert_eq!(page.failed_chunk_count, 2);
        assert_eq!(page.original_text, "citta\nrupa");
        assert_eq!(page.pali_terms, vec!["citta", "rupa"]);
    }

    #[tokio::test]
    async fn concurrent_chunks_are_reassembled_in_order() {
        // Make earlier chunks finish last.
        let fake = Arc::new(FakeTranslator::new(|text| {
            let delay = match text {
                "aaaa" => Duration::from_millis(60),
                "bbbb" => Duration::from_millis(30),
                _ => Duration::ZERO,
            };
            (delay, retry_result_ok(text.to_uppercase()))
        }));
        let (pipeline, _worker) = pipeline(&fake, 5, 3);
        let result = process(&pipeline, &["aaaa\nbbbb\ncccc\n"]).await;
        assert_eq!(result.pages[0].translated_text, "AAAA\nBBBB\nCCCC\n");
        assert_eq!(result.pages[0].status, PageStatus::Ok);
    }

    #[tokio::test]
    async fn concurrent_pages_stay_in_order() {
        let fake = Arc::new(FakeTranslator::new(|text| {
            let delay = if text == "first" {
                Duration::from_millis(50)
            } else {
                Duration::ZERO
            };
            (delay, retry_result_ok(text.to_uppercase()))
        }));
        let (pipeline, _worker) = pipeline(&fake, DEFAULT_MAX_CHUNK_CHARS, 4);
        let result = process(&pipeline, &["first", "second", "third"]).await;
        let texts = result
            .pages
            .iter()
            .map(|page| page.translated_text.as_str())
            .collect::<Vec<_>>();
        assert_eq!(texts, vec!["FIRST", "SECOND", "THIRD"]);
        let indices = result.pages.iter().map(|p| p.page_index).collect::<Vec<_>>();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn blank_page_and_long_page() {
        let fake = Arc::new(FakeTranslator::uppercase());
        let (pipeline, _worker) = pipeline(&fake, DEFAULT_MAX_CHUNK_CHARS, 1);
        let long_text = format!("citta {}nibbanaฯ.", "ธรรม ".repeat(1197));
        assert_eq!(long_text.chars().count(), 6000);
        let result = process(&pipeline, &["", &long_text]).await;

        let blank = &result.pages[0];
        assert_eq!(blank.status, PageStatus::Blank);
        assert_eq!(blank.original_text, "");
        assert_eq!(blank.translated_text, "");
        assert!(blank.pali_terms.is_empty());

        // Two chunks, both translated, and glued back together.
        assert_eq!(fake.calls().len(), 2);
        let page = &result.pages[1];
        assert_eq!(page.status, PageStatus::Ok);
        assert_eq!(page.translated_text, long_text.to_uppercase());
        assert_eq!(page.pali_terms, vec!["citta", "nibbana"]);
        assert_eq!(page.page_number, 2);

        assert_eq!(result.processed_pages, 2);
        assert_eq!(result.total_pages, 2);
        assert!(!result.interrupted);
        assert_eq!(result.all_pali_terms, vec!["citta", "nibbana"]);
    }

    #[tokio::test]
    async fn extraction_failures_yield_failed_records() {
        let fake = Arc::new(FakeTranslator::uppercase());
        let (pipeline, _worker) = pipeline(&fake, DEFAULT_MAX_CHUNK_CHARS, 1);
        let pages = stream::iter(vec![
            (
                4,
                future::ready(Err::<PageText, _>(anyhow!("tesseract crashed"))).boxed()
                    as PendingPage,
            ),
            (
                5,
                future::ready(Ok::<_, anyhow::Error>(PageText {
                    page_index: 5,
                    text: "rupa".to_owned(),
                }))
                .boxed(),
            ),
        ]);
        let result = pipeline
            .process_pages(
                "book.pdf".to_owned(),
                10,
                pages,
                &StopSignal::never(),
                &ProgressBar::hidden(),
            )
            .await;

        let failed = &result.pages[0];
        assert_eq!(failed.page_index, 4);
        assert_eq!(failed.status, PageStatus::Failed);
        assert_eq!(failed.original_text, "");
        assert_eq!(failed.errors, vec!["tesseract crashed"]);
        assert_eq!(result.pages[1].translated_text, "RUPA");
        assert_eq!(result.count_pages(PageStatus::Failed), 1);
        assert_eq!(fake.calls(), vec!["rupa"]);
    }

    #[tokio::test]
    async fn interruption_keeps_finished_pages() {
        let fake = Arc::new(FakeTranslator::uppercase());
        let (pipeline, _worker) = pipeline(&fake, DEFAULT_MAX_CHUNK_CHARS, 1);
        let (handle, signal) = StopSignal::new();
        let handle = Arc::new(handle);
        let stuck_page: PendingPage = {
            let handle = handle.clone();
            async move {
                handle.stop();
                future::pending::<Result<PageText>>().await
            }
            .boxed()
        };
        let pages = stream::iter(vec![
            (
                0,
                future::ready(Ok::<_, anyhow::Error>(PageText {
                    page_index: 0,
                    text: "sati".to_owned(),
                }))
                .boxed() as PendingPage,
            ),
            (1, stuck_page),
        ]);
        let result = pipeline
            .process_pages(
                "book.pdf".to_owned(),
                2,
                pages,
                &signal,
                &ProgressBar::hidden(),
            )
            .await;
        assert!(result.interrupted);
        assert_eq!(result.processed_pages, 1);
        assert_eq!(result.pages[0].translated_text, "SATI");
    }

    #[tokio::test]
    async fn missing_documents_are_errors() {
        let fake = Arc::new(FakeTranslator::uppercase());
        let (pipeline, _worker) = pipeline(&fake, DEFAULT_MAX_CHUNK_CHARS, 1);
        let result = pipeline
            .process_document(
                &Ui::init_for_tests(),
                Path::new("no/such/book.pdf"),
                PageRange::all(),
                &StopSignal::never(),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    #[ignore = "Requires poppler-utils to be installed"]
    async fn processes_pdf_with_text_layer() -> Result<()> {
        let fake = Arc::new(FakeTranslator::uppercase());
        let (pipeline, _worker) = pipeline(&fake, DEFAULT_MAX_CHUNK_CHARS, 2);
        let result = pipeline
            .process_document(
                &Ui::init_for_tests(),
                Path::new("tests/fixtures/two_pages.pdf"),
                PageRange::all(),
                &StopSignal::never(),
            )
            .await?;
        assert_eq!(result.source_file, "two_pages.pdf");
        assert_eq!(result.processed_pages, 2);
        assert_eq!(result.pages[0].translated_text, "CITTA AND CETASIKA");
        assert_eq!(
            result.all_pali_terms,
            vec!["cetasika", "citta", "nibbana", "rupa"]
        );
        Ok(())
    }
}
