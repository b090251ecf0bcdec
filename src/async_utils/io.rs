//! File I/O helpers.
//!
//! Everything here is async, so that slow disks never stall the translation
//! requests running on the same executor.

use tokio::{
    fs::{self, File},
    io::{AsyncWrite, AsyncWriteExt as _},
};

use crate::{prelude::*, toml_utils::deser_error_to_anyhow};

/// Read a TOML file and deserialize it with [`toml_span`].
pub async fn read_toml<T>(path: &Path) -> Result<T>
where
    T: toml_span::Deserialize<'static>,
{
    let data = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read file at path: {:?}", path))?;
    crate::toml_utils::from_toml_str(&data)
        .map_err(deser_error_to_anyhow)
        .with_context(|| format!("Failed to parse TOML from file at path: {:?}", path))
}

/// Create an [`AsyncWrite`] for a file or stdout.
pub async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .await
                .with_context(|| format!("Failed to create file at path: {:?}", path))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

/// Write `contents` to `path`, replacing any existing file.
pub async fn write_text(path: &Path, contents: &str) -> Result<()> {
    let mut wtr = create_writer(Some(path)).await?;
    wtr.write_all(contents.as_bytes())
        .await
        .with_context(|| format!("Failed to write file at path: {:?}", path))?;
    wtr.flush()
        .await
        .with_context(|| format!("Failed to flush file at path: {:?}", path))?;
    Ok(())
}
