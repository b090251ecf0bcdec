//! An "OCR" engine that calls `pdftotext`.

use tokio::{fs, process::Command};

use crate::{async_utils::check_for_command_failure, page_iter::Page, prelude::*};

use super::OcrEngine;

/// "OCR" engine wrapping the `pdftotext` CLI tool from `poppler-utils`.
///
/// This will miss any text that only exists in the scanned image, which is
/// all of it for most old Thai books. But it's fast when it works.
#[derive(Debug)]
pub struct PdfToTextOcrEngine;

#[async_trait]
impl OcrEngine for PdfToTextOcrEngine {
    #[instrument(level = "debug", skip_all)]
    async fn extract_page_text(&self, page: Page) -> Result<String> {
        if page.mime_type != "application/pdf" {
            return Err(anyhow!(
                "pdftotext only works with PDFs, not {}",
                page.mime_type
            ));
        }

        // Write our input to a temporary file.
        let tmpdir = tempfile::TempDir::with_prefix("pdftotext")?;
        let input_path = tmpdir.path().join("input.pdf");
        fs::write(&input_path, &page.data)
            .await
            .context("cannot write pdftotext input file")?;

        // Run pdftotext on the input file, writing the text to stdout.
        let output = Command::new("pdftotext")
            .arg("-layout")
            .arg("-enc")
            .arg("UTF-8")
            .arg(&input_path)
            .arg("-")
            .kill_on_drop(true)
            .output()
            .await
            .context("cannot run pdftotext")?;
        check_for_command_failure("pdftotext", &output, None)?;

        // Drop the form feed `pdftotext` puts at the end of each page.
        Ok(String::from_utf8_lossy(&output.stdout)
            .trim_matches(|c: char| c.is_whitespace() || c == '\x0C')
            .to_owned())
    }
}
