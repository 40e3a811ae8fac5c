use std::path::Path;

use serde::ser;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::AppResult;
use crate::chart::Chart;

/// Serialize an object to pretty JSON and write it to disk.
#[tracing::instrument(name = "Writing JSON file", level = "debug", skip(obj))]
pub async fn write_json_output<P: AsRef<Path> + std::fmt::Debug, S: ser::Serialize>(
    output: P,
    obj: &S,
) -> AppResult<()> {
    let data = serde_json::to_string_pretty(obj)?;
    write_file(&output, data).await?;
    info!("Wrote {}", output.as_ref().display());
    Ok(())
}

/// Render a chart as a standalone HTML page and write it to disk.
#[tracing::instrument(name = "Writing chart", level = "debug", skip(chart))]
pub async fn write_chart<P: AsRef<Path> + std::fmt::Debug>(output: P, chart: &Chart) -> AppResult<()> {
    let html = chart.to_html()?;
    write_file(&output, html).await?;
    info!("Wrote {}", output.as_ref().display());
    Ok(())
}

/// Write raw string data to a file, overwriting any existing content. Missing parent
/// directories are created.
pub async fn write_file<P: AsRef<Path>>(output: P, data: String) -> AppResult<()> {
    if let Some(parent) = output.as_ref().parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).await?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(output)
        .await?;
    file.write_all(data.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
