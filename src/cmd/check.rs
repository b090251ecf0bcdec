//! The `check` subcommand, which makes sure our external tools are usable.

use clap::Args;
use tokio::process::Command;

use crate::{
    async_utils::check_for_command_failure,
    prelude::*,
    translate::{ChunkTranslator, TranslateOpts},
    ui::Ui,
};

/// A short Thai greeting, used to test the translator.
const SAMPLE_THAI: &str = "สวัสดี";

/// Poppler tools we need for PDFs.
const POPPLER_TOOLS: &[&str] = &["pdfinfo", "pdftocairo", "pdfseparate", "pdftotext"];

/// Command-line options for the `check` subcommand.
#[derive(Debug, Args)]
pub struct CheckOpts {
    /// Tesseract languages that must be installed, joined with "+".
    #[clap(long, default_value = "tha+eng")]
    pub ocr_languages: String,

    /// Don't try to contact the translation provider.
    #[clap(long)]
    pub offline: bool,

    #[clap(flatten)]
    pub translate: TranslateOpts,
}

/// The `check` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_check(ui: Ui, opts: &CheckOpts) -> Result<()> {
    let mut problems = 0;
    let mut report = |name: &str, outcome: Result<String>| match outcome {
        Ok(detail) => ui.display_message("✅", &format!("{name}: {detail}")),
        Err(err) => {
            problems += 1;
            ui.display_message("❌", &format!("{name}: {err:#}"));
        }
    };

    report("tesseract", tesseract_version().await);
    report(
        "tesseract languages",
        check_tesseract_languages(&opts.ocr_languages).await,
    );
    for tool in POPPLER_TOOLS {
        report(*tool, poppler_tool_version(*tool).await);
    }
    if opts.offline {
        ui.display_message("⏭️", "translation: skipped");
    } else {
        report("translation", check_translation(&opts.translate).await);
    }

    if problems == 0 {
        ui.display_message("🎉", "Everything looks good");
        Ok(())
    } else {
        Err(anyhow!("{} setup problems found", problems))
    }
}

/// Run `cmd` and return its output, failing only if it can't be started.
async fn run(cmd: &mut Command, name: &str) -> Result<std::process::Output> {
    cmd.kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("could not run {name} (is it installed?)"))
}

async fn tesseract_version() -> Result<String> {
    let output = run(Command::new("tesseract").arg("--version"), "tesseract").await?;
    check_for_command_failure("tesseract", &output, None)?;
    // Older versions print this to stderr.
    let text = if output.stdout.is_empty() {
        String::from_utf8_lossy(&output.stderr).into_owned()
    } else {
        String::from_utf8_lossy(&output.stdout).into_owned()
    };
    Ok(text.lines().next().unwrap_or("unknown version").trim().to_owned())
}

async fn check_tesseract_languages(languages: &str) -> Result<String> {
    let output = run(Command::new("tesseract").arg("--list-langs"), "tesseract").await?;
    check_for_command_failure("tesseract", &output, None)?;
    let installed = parse_language_list(&String::from_utf8_lossy(&output.stdout));
    let missing = missing_languages(languages, &installed);
    if missing.is_empty() {
        Ok(format!("{} installed", languages))
    } else {
        Err(anyhow!(
            "missing language data for {} (try installing tesseract-ocr-{})",
            missing.join(", "),
            missing[0]
        ))
    }
}

/// Parse the output of `tesseract --list-langs`, which has a header line.
fn parse_language_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| !line.starts_with("List of available languages"))
        .map(|line| line.trim().to_owned())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Which of the `+`-separated `wanted` languages are not `installed`?
fn missing_languages<'a>(wanted: &'a str, installed: &[String]) -> Vec<&'a str> {
    wanted
        .split('+')
        .filter(|lang| !installed.iter().any(|have| have == lang))
        .collect()
}

async fn poppler_tool_version(tool: &str) -> Result<String> {
    let output = run(Command::new(tool).arg("-v"), tool).await?;
    // Poppler tools print their version to stderr, and some versions exit
    // with an error status after doing so.
    let text = String::from_utf8_lossy(&output.stderr);
    Ok(text.lines().next().unwrap_or("installed").trim().to_owned())
}

async fn check_translation(opts: &TranslateOpts) -> Result<String> {
    let translator = ChunkTranslator::new(opts.translator.create_translator()?, opts)?;
    let translation = translator.translate_chunk(SAMPLE_THAI).await;
    if translation.failed {
        return Err(anyhow!(
            "could not translate a test phrase: {}",
            translation.errors.join("; ")
        ));
    }
    Ok(format!("\"{}\" -> \"{}\"", SAMPLE_THAI, translation.text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::TranslatorType;

    #[test]
    fn parses_language_lists() {
        let output = "List of available languages in \"/usr/share/tessdata/\" (3):\neng\nosd\ntha\n";
        let installed = parse_language_list(output);
        assert_eq!(installed, vec!["eng", "osd", "tha"]);
        assert!(missing_languages("tha+eng", &installed).is_empty());
        assert_eq!(missing_languages("tha+pli+san", &installed), vec!["pli", "san"]);
    }

    #[tokio::test]
    async fn echo_translation_check_passes() {
        let opts = TranslateOpts {
            translator: TranslatorType::Echo,
            ..TranslateOpts::default()
        };
        let detail = check_translation(&opts).await.unwrap();
        assert_eq!(detail, format!("\"{SAMPLE_THAI}\" -> \"{SAMPLE_THAI}\""));
    }
}
