//! Tesseract OCR engine.

use tokio::{fs, process::Command};

use crate::{
    async_utils::check_for_command_failure, cpu_limit::with_cpu_semaphore,
    page_iter::Page, prelude::*,
};

use super::OcrEngine;

/// OCR engine wrapping the `tesseract` CLI tool.
#[derive(Debug)]
pub struct TesseractOcrEngine {
    /// Languages to pass to `-l`, like `tha+eng`.
    languages: String,
}

impl TesseractOcrEngine {
    /// Create a new `tesseract` engine.
    pub fn new(languages: &str) -> Result<Self> {
        let is_valid = !languages.is_empty()
            && languages
                .split('+')
                .all(|lang| !lang.is_empty() && lang.chars().all(is_language_char));
        if !is_valid {
            return Err(anyhow!(
                "invalid OCR language list {:?} (expected something like \"tha+eng\")",
                languages
            ));
        }
        Ok(Self {
            languages: languages.to_owned(),
        })
    }
}

/// Can this character appear in a Tesseract language name, like `chi_sim`?
fn is_language_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

#[async_trait]
impl OcrEngine for TesseractOcrEngine {
    #[instrument(level = "debug", skip_all, fields(languages = %self.languages))]
    async fn extract_page_text(&self, page: Page) -> Result<String> {
        let extension = mime_guess::get_mime_extensions_str(&page.mime_type)
            .and_then(|o| o.first())
            .ok_or_else(|| anyhow!("cannot determine extension for {}", page.mime_type))?;

        // Write our input to a temporary file.
        let tmpdir = tempfile::TempDir::with_prefix("tesseract")?;
        let input_path = tmpdir.path().join(format!("input.{}", extension));
        fs::write(&input_path, &page.data)
            .await
            .context("cannot write tesseract input file")?;

        // Run tesseract on the input file, writing the text to stdout.
        let mut cmd = Command::new("tesseract");
        cmd.arg(&input_path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.languages)
            .kill_on_drop(true);
        let output = with_cpu_semaphore(|| async {
            cmd.output().await.context("cannot run tesseract")
        })
        .await?;
        check_for_command_failure("tesseract", &output, None)?;

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_language_lists() {
        assert!(TesseractOcrEngine::new("tha").is_ok());
        assert!(TesseractOcrEngine::new("tha+eng").is_ok());
        assert!(TesseractOcrEngine::new("chi_sim+pali").is_ok());
        assert!(TesseractOcrEngine::new("").is_err());
        assert!(TesseractOcrEngine::new("tha+").is_err());
        assert!(TesseractOcrEngine::new("tha;rm -rf").is_err());
    }

    #[tokio::test]
    async fn unknown_mime_types_are_errors() {
        let engine = TesseractOcrEngine::new("tha").unwrap();
        let page = Page {
            mime_type: "application/x-nonsense".to_owned(),
            data: vec![],
        };
        assert!(engine.extract_page_text(page).await.is_err());
    }

    #[tokio::test]
    #[ignore = "Requires tesseract and poppler-utils to be installed"]
    async fn reads_rasterized_pages() -> Result<()> {
        use crate::page_iter::{PageFormat, PageIter, PageRange};

        let engine = TesseractOcrEngine::new("eng")?;
        let mut pages = PageIter::from_path(
            Path::new("tests/fixtures/two_pages.pdf"),
            PageRange::all(),
            PageFormat::Png { dpi: 150 },
        )
        .await?;
        let page = pages.next().expect("should have a page")?;
        let text = engine.extract_page_text(page).await?;
        assert!(text.contains("citta"), "unexpected text: {text:?}");
        Ok(())
    }
}
