//! Extracting text from page images.
//!
//! OCR itself is somebody else's problem: we shell out to `tesseract`, or to
//! `pdftotext` for documents that already have a text layer.

use std::sync::Arc;

use clap::{Args, ValueEnum};

use crate::{
    page_iter::{Page, PageFormat},
    prelude::*,
};

pub mod pdftotext;
pub mod tesseract;

/// Our supported OCR engines.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "snake_case")]
pub enum OcrEngineType {
    /// Run Tesseract on rasterized pages. Needs the `tha` language data.
    #[default]
    Tesseract,

    /// Extract an existing text layer with Poppler's `pdftotext`. Only useful
    /// for born-digital PDFs.
    Pdftotext,
}

/// Options controlling text extraction.
#[derive(Args, Clone, Debug)]
pub struct OcrOpts {
    /// The OCR engine to use.
    #[clap(long, value_enum, default_value_t = OcrEngineType::default())]
    pub ocr_engine: OcrEngineType,

    /// Tesseract languages, joined with "+".
    #[clap(long, default_value = "tha+eng")]
    pub ocr_languages: String,

    /// The DPI to use when rasterizing PDF pages for OCR.
    #[clap(long, default_value = "300")]
    pub rasterize_dpi: u32,
}

impl Default for OcrOpts {
    fn default() -> Self {
        Self {
            ocr_engine: OcrEngineType::default(),
            ocr_languages: "tha+eng".to_owned(),
            rasterize_dpi: 300,
        }
    }
}

impl OcrOpts {
    /// How should we hand PDF pages to our engine?
    pub fn page_format(&self) -> PageFormat {
        match self.ocr_engine {
            OcrEngineType::Tesseract => PageFormat::Png {
                dpi: self.rasterize_dpi,
            },
            OcrEngineType::Pdftotext => PageFormat::Pdf,
        }
    }

    /// Instantiate our OCR engine.
    pub fn create_engine(&self) -> Result<Arc<dyn OcrEngine>> {
        match self.ocr_engine {
            OcrEngineType::Tesseract => Ok(Arc::new(tesseract::TesseractOcrEngine::new(
                &self.ocr_languages,
            )?)),
            OcrEngineType::Pdftotext => Ok(Arc::new(pdftotext::PdfToTextOcrEngine)),
        }
    }
}

/// Interface for extracting text from a single page.
#[async_trait]
pub trait OcrEngine: Send + Sync + 'static {
    /// Extract the text of `page`. A page with no text yields an empty
    /// string, not an error. Errors mean the page couldn't be read at all.
    async fn extract_page_text(&self, page: Page) -> Result<String>;
}
