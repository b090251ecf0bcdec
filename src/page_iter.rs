//! Iterate over the pages of a scanned document.

use std::{collections::BTreeMap, ops::RangeInclusive, process::Output, sync::LazyLock, vec};

use clap::Args;
use regex::Regex;
use tokio::process::Command;

use crate::{async_utils::check_for_command_failure, cpu_limit::with_cpu_semaphore, prelude::*};

/// Image types we can pass straight to an OCR engine.
const SUPPORTED_IMAGE_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/webp",
    "image/gif",
    "image/tiff",
];

/// A default error regex for checking command output.
static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("failed to compile regex")
});

/// Does this line contain an error?
fn is_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// A single page, ready for OCR.
#[derive(Debug)]
pub struct Page {
    /// The MIME type of our data. Either one of [`SUPPORTED_IMAGE_TYPES`] or
    /// `application/pdf`.
    pub mime_type: String,
    /// The data for our page.
    pub data: Vec<u8>,
}

/// How should PDF pages be handed to the OCR engine?
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageFormat {
    /// Rasterize each page to a PNG at the given DPI.
    Png { dpi: u32 },
    /// Split out each page as a single-page PDF.
    Pdf,
}

/// Which pages should we process?
#[derive(Args, Clone, Debug)]
pub struct PageRangeOpts {
    /// The maximum number of pages to process per document. The default is
    /// intended for quick exploratory runs.
    #[clap(long, default_value = "5", conflicts_with = "all_pages")]
    pub max_pages: usize,

    /// Process every page, ignoring `--max-pages`.
    #[clap(long)]
    pub all_pages: bool,

    /// The first page to process (1-based).
    #[clap(long)]
    pub first_page: Option<usize>,

    /// The last page to process (1-based, inclusive).
    #[clap(long)]
    pub last_page: Option<usize>,
}

impl PageRangeOpts {
    /// Check our options and convert them to a [`PageRange`].
    pub fn to_page_range(&self) -> Result<PageRange> {
        let first_page = self.first_page.unwrap_or(1);
        if first_page == 0 {
            return Err(anyhow!("--first-page must be at least 1"));
        }
        if let Some(last_page) = self.last_page
            && last_page < first_page
        {
            return Err(anyhow!(
                "--last-page ({}) must not come before --first-page ({})",
                last_page,
                first_page
            ));
        }
        let max_pages = if self.all_pages {
            None
        } else if self.max_pages == 0 {
            return Err(anyhow!("--max-pages must be at least 1"));
        } else {
            Some(self.max_pages)
        };
        Ok(PageRange {
            first_page,
            last_page: self.last_page,
            max_pages,
        })
    }
}

/// A requested range of pages, using 1-based, inclusive page numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRange {
    /// The first page to process.
    pub first_page: usize,
    /// The last page to process, if any.
    pub last_page: Option<usize>,
    /// The maximum number of pages to process.
    pub max_pages: Option<usize>,
}

impl PageRange {
    /// Every page in the document.
    #[cfg(test)]
    pub fn all() -> Self {
        Self {
            first_page: 1,
            last_page: None,
            max_pages: None,
        }
    }

    /// The first `max_pages` pages of the document.
    #[cfg(test)]
    pub fn first_n(max_pages: usize) -> Self {
        Self {
            max_pages: Some(max_pages),
            ..Self::all()
        }
    }

    /// Resolve this range against a document with `total_pages` pages. Returns
    /// `None` if no pages are selected.
    pub fn resolve(&self, total_pages: usize) -> Option<RangeInclusive<usize>> {
        let mut last_page = self.last_page.unwrap_or(total_pages).min(total_pages);
        if let Some(max_pages) = self.max_pages {
            last_page = last_page.min(self.first_page.saturating_add(max_pages) - 1);
        }
        (self.first_page <= last_page).then_some(self.first_page..=last_page)
    }
}

/// An iterator over document pages, using Poppler's `pdftocairo` and
/// `pdfseparate` CLI tools for PDFs.
///
/// Pages are always returned in order, starting with [`Self::first_page_index`].
pub struct PageIter {
    /// An optional temporary directory, which holds extracted versions of pages.
    ///
    /// This is released by [`Drop`].
    tmpdir: Option<tempfile::TempDir>,
    /// The MIME type of our outputs.
    mime_type: String,
    /// Iterator over the page files.
    file_iter: vec::IntoIter<PathBuf>,
    /// The number of pages in the document.
    total_pages: usize,
    /// The pages we will return.
    selected: Option<RangeInclusive<usize>>,
    /// Any warnings that occurred while processing the document.
    warnings: Vec<String>,
}

impl PageIter {
    /// Create a new [`PageIter`] from a path, based on the detected MIME type.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn from_path(path: &Path, range: PageRange, format: PageFormat) -> Result<Self> {
        let mime_type = get_mime_type(path)?;
        if SUPPORTED_IMAGE_TYPES.contains(&mime_type.as_str()) {
            if format == PageFormat::Pdf {
                return Err(anyhow!(
                    "{:?} is an image, so it needs a real OCR engine",
                    path.display()
                ));
            }
            let selected = range.resolve(1);
            let files = if selected.is_some() {
                vec![path.to_owned()]
            } else {
                vec![]
            };
            Ok(Self {
                tmpdir: None,
                mime_type,
                file_iter: files.into_iter(),
                total_pages: 1,
                selected,
                warnings: vec![],
            })
        } else if mime_type == "application/pdf" {
            Self::from_pdf(path, range, format).await
        } else {
            Err(anyhow!(
                "unsupported MIME type {} for {:?} (supported: PDF, PNG, JPEG, WebP, GIF, TIFF)",
                mime_type,
                path.display()
            ))
        }
    }

    /// Create a new [`PageIter`] from a PDF file, splitting or rasterizing
    /// the selected pages.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    async fn from_pdf(path: &Path, range: PageRange, format: PageFormat) -> Result<Self> {
        let total_pages = get_pdf_page_count(path).await?;
        let Some(selected) = range.resolve(total_pages) else {
            warn!(
                path = %path.display(),
                total_pages,
                "No pages selected from document"
            );
            return Ok(Self {
                tmpdir: None,
                mime_type: "application/pdf".to_owned(),
                file_iter: vec![].into_iter(),
                total_pages,
                selected: None,
                warnings: vec![],
            });
        };

        // Construct an output filename stem. Poppler adds page numbers to it.
        let stem = path
            .file_stem()
            .context("failed to get filename from PDF path")?
            .to_string_lossy()
            .into_owned();
        let tmpdir = tempfile::TempDir::with_prefix("pages")?;

        // Both tools will use _at least_ 100% of a CPU, so we use
        // `with_cpu_semaphore` to avoid running too many at once.
        let (command_name, mime_type, mut cmd) = match format {
            PageFormat::Png { dpi } => {
                let mut cmd = Command::new("pdftocairo");
                cmd.arg("-png").arg("-r").arg(dpi.to_string());
                add_page_range_args(&selected, &mut cmd);
                cmd.arg(path).arg(tmpdir.path().join(&stem));
                ("pdftocairo", "image/png", cmd)
            }
            PageFormat::Pdf => {
                let mut cmd = Command::new("pdfseparate");
                add_page_range_args(&selected, &mut cmd);
                cmd.arg(path)
                    .arg(tmpdir.path().join(format!("{}-%d.pdf", stem)));
                ("pdfseparate", "application/pdf", cmd)
            }
        };
        cmd.kill_on_drop(true);
        let output = with_cpu_semaphore(|| async {
            cmd.output().await.with_context(|| {
                format!("failed to run {} on {:?}", command_name, path.display())
            })
        })
        .await?;
        check_for_command_failure(command_name, &output, Some(&is_error_line))?;

        let files = sorted_page_files(tmpdir.path())?;
        let expected = selected.clone().count();
        if files.len() != expected {
            return Err(anyhow!(
                "{} produced {} pages for {:?}, but we expected {}",
                command_name,
                files.len(),
                path.display(),
                expected
            ));
        }

        Ok(Self {
            tmpdir: Some(tmpdir),
            mime_type: mime_type.to_owned(),
            file_iter: files.into_iter(),
            total_pages,
            selected: Some(selected),
            warnings: command_warnings(&output),
        })
    }

    /// The number of pages in the whole document.
    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    /// The 0-based index of the first page we will return.
    pub fn first_page_index(&self) -> usize {
        self.selected
            .as_ref()
            .map_or(0, |selected| *selected.start() - 1)
    }

    /// How many pages will we return?
    pub fn selected_page_count(&self) -> usize {
        self.selected.clone().map_or(0, |selected| selected.count())
    }

    /// Get any warnings that occurred while processing the document.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

impl Drop for PageIter {
    fn drop(&mut self) {
        // Delete our temporary directory, if we have one.
        if let Some(tmpdir) = self.tmpdir.take() {
            let tmpdir_path = tmpdir.path().to_owned();
            if let Err(err) = tmpdir.close() {
                error!(
                    directory = ?tmpdir_path.display(),
                    "failed to delete temporary directory: {}",
                    err
                );
            }
        }
    }
}

impl Iterator for PageIter {
    type Item = Result<Page>;

    fn next(&mut self) -> Option<Self::Item> {
        use std::fs;
        let path = self.file_iter.next()?;

        // Read the page into a byte vector.
        let data = match fs::read(&path)
            .with_context(|| format!("failed to read file {:?}", path.display()))
        {
            Ok(data) => data,
            Err(err) => return Some(Err(err)),
        };

        // Delete the file to recover space a bit early.
        if self.tmpdir.is_some()
            && let Err(err) = fs::remove_file(&path)
        {
            return Some(Err(err).with_context(|| {
                format!("failed to delete file {:?}", path.display())
            }));
        }

        Some(Ok(Page {
            mime_type: self.mime_type.clone(),
            data,
        }))
    }
}

/// List the files in `dir`, sorted by the page number at the end of each
/// file stem.
///
/// `pdfseparate` doesn't zero-pad its page numbers, so sorting by name would
/// put page 10 before page 2.
fn sorted_page_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut numbered = dir
        .read_dir()
        .with_context(|| format!("failed to read temporary directory {:?}", dir.display()))?
        .map(|entry| {
            let path = entry
                .with_context(|| {
                    format!("failed to read entry in temporary directory {:?}", dir.display())
                })?
                .path();
            let page_number = page_number_from_path(&path).ok_or_else(|| {
                anyhow!("unexpected file {:?} in temporary directory", path.display())
            })?;
            Ok((page_number, path))
        })
        .collect::<Result<Vec<_>>>()?;
    numbered.sort();
    Ok(numbered.into_iter().map(|(_, path)| path).collect())
}

/// Extract the page number from a name like `book-007.png`.
fn page_number_from_path(path: &Path) -> Option<usize> {
    let stem = path.file_stem()?.to_str()?;
    let (_, number) = stem.rsplit_once('-')?;
    number.parse().ok()
}

/// Collect any output from a Poppler command as warnings.
fn command_warnings(output: &Output) -> Vec<String> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    stdout
        .lines()
        .chain(stderr.lines())
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Get the number of pages in a PDF file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn get_pdf_page_count(path: &Path) -> Result<usize> {
    // Run pdfinfo to get the number of pages.
    let mut cmd = Command::new("pdfinfo");
    let output = cmd
        .arg(path)
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("failed to run pdfinfo on {:?}", path.display()))?;
    check_for_command_failure("pdfinfo", &output, None)?;

    // Parse the output of pdfinfo into properties. Titles of Thai books are
    // not always valid UTF-8, so be lenient.
    let output = String::from_utf8_lossy(&output.stdout);
    let mut properties = BTreeMap::new();
    for line in output.lines() {
        let mut parts = line.splitn(2, ':');
        let key = parts.next().unwrap_or("").trim();
        let value = parts.next().unwrap_or("").trim();
        properties.insert(key.to_string(), value.to_string());
    }

    // Get the number of pages from the properties.
    let page_count_str = properties
        .get("Pages")
        .ok_or_else(|| anyhow!("failed to find page count in pdfinfo output"))?;
    page_count_str.parse::<usize>().with_context(|| {
        format!(
            "failed to parse page count for {:?} from pdfinfo output",
            path.display()
        )
    })
}

/// Add "first page" and "last page" arguments to a Poppler [`Command`]. The
/// Poppler tools use 1-based, inclusive page numbers, just like we do.
fn add_page_range_args(selected: &RangeInclusive<usize>, cmd: &mut Command) {
    cmd.arg("-f")
        .arg(selected.start().to_string())
        .arg("-l")
        .arg(selected.end().to_string());
}

/// Get the MIME type of a file.
pub fn get_mime_type(path: &Path) -> Result<String> {
    Ok(infer::get_from_path(path)
        .with_context(|| format!("failed to get MIME type for {:?}", path.display()))?
        .ok_or_else(|| anyhow!("unknown MIME type for {:?}", path.display()))?
        .mime_type()
        .to_string())
}
