//! Writing a [`DocumentResult`] to disk.
//!
//! Every document gets three files: machine-readable JSON, a bilingual text
//! file for reviewers, and an English-only text file for readers.

use std::fmt::{self, Write as _};

use tokio::fs;

use crate::{
    async_utils::io::write_text,
    pipeline::{DocumentResult, PageStatus},
    prelude::*,
    ui::Ui,
};

/// Width of our separator lines.
const RULE_WIDTH: usize = 70;

/// Where we wrote a document's outputs.
#[derive(Debug)]
pub struct OutputPaths {
    pub json: PathBuf,
    pub bilingual: PathBuf,
    pub english: PathBuf,
}

impl OutputPaths {
    /// Output paths for a document named `source_file` inside `output_dir`.
    pub fn new(output_dir: &Path, source_file: &str) -> Self {
        let stem = Path::new(source_file)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| source_file.to_owned());
        Self {
            json: output_dir.join(format!("{stem}_translation.json")),
            bilingual: output_dir.join(format!("{stem}_translation.txt")),
            english: output_dir.join(format!("{stem}_english.txt")),
        }
    }
}

/// Render the bilingual review file.
pub fn render_bilingual(result: &DocumentResult) -> String {
    let mut out = String::new();
    write_bilingual(&mut out, result).expect("writing to a String cannot fail");
    out
}

fn write_bilingual(out: &mut String, result: &DocumentResult) -> fmt::Result {
    let rule = "=".repeat(RULE_WIDTH);
    writeln!(out, "Translation of: {}", result.source_file)?;
    writeln!(out, "{rule}\n")?;
    if !result.all_pali_terms.is_empty() {
        writeln!(out, "Pali Terms Found:")?;
        writeln!(out, "{}", result.all_pali_terms.join(", "))?;
        writeln!(out, "\n{rule}\n")?;
    }
    for page in &result.pages {
        writeln!(out, "\n--- Page {} ---\n", page.page_number)?;
        if !page.pali_terms.is_empty() {
            writeln!(
                out,
                "[Pali terms on this page: {}]\n",
                page.pali_terms.join(", ")
            )?;
        }
        writeln!(out, "THAI TEXT:\n{}", page.original_text)?;
        writeln!(out, "\nENGLISH TRANSLATION:\n{}", page.translated_text)?;
        writeln!(out, "\n{}", "-".repeat(RULE_WIDTH))?;
    }
    Ok(())
}

/// Render the English-only file. Pages without any English are skipped.
pub fn render_english(result: &DocumentResult) -> String {
    let mut out = String::new();
    write_english(&mut out, result).expect("writing to a String cannot fail");
    out
}

fn write_english(out: &mut String, result: &DocumentResult) -> fmt::Result {
    writeln!(out, "English Translation of: {}", result.source_file)?;
    writeln!(out, "{}\n", "=".repeat(RULE_WIDTH))?;
    for page in &result.pages {
        if page.translated_text.trim().is_empty() {
            continue;
        }
        writeln!(out, "[Page {}]", page.page_number)?;
        writeln!(out, "{}\n", page.translated_text)?;
    }
    Ok(())
}

/// Describe what happened to a document, in a single line.
pub fn summarize(result: &DocumentResult) -> String {
    let mut summary = format!(
        "{}: {} of {} pages processed, {} failed, {} blank, {} chunks need manual translation",
        result.source_file,
        result.processed_pages,
        result.total_pages,
        result.count_pages(PageStatus::Failed),
        result.count_pages(PageStatus::Blank),
        result.failed_chunk_count,
    );
    if result.interrupted {
        summary.push_str(" (interrupted)");
    }
    summary
}

/// Write all three output files for `result` into `output_dir`, creating it
/// if needed.
#[instrument(level = "debug", skip(result), fields(source_file = %result.source_file))]
pub async fn write_document_outputs(
    output_dir: &Path,
    result: &DocumentResult,
) -> Result<OutputPaths> {
    fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("cannot create output directory {:?}", output_dir))?;
    let paths = OutputPaths::new(output_dir, &result.source_file);

    let json = serde_json::to_string_pretty(result)
        .context("failed to serialize translation results")?;
    write_text(&paths.json, &json).await?;
    write_text(&paths.bilingual, &render_bilingual(result)).await?;
    write_text(&paths.english, &render_english(result)).await?;
    Ok(paths)
}

/// Write outputs and tell the user where they went.
pub async fn write_and_report(
    ui: &Ui,
    output_dir: &Path,
    result: &DocumentResult,
) -> Result<OutputPaths> {
    let paths = write_document_outputs(output_dir, result).await?;
    for path in [&paths.json, &paths.bilingual, &paths.english] {
        ui.display_message("💾", &format!("Saved {}", path.display()));
    }
    let emoji = if result.interrupted || result.failed_chunk_count > 0 {
        "⚠️"
    } else {
        "✅"
    };
    ui.display_message(emoji, &summarize(result));
    Ok(paths)
}
