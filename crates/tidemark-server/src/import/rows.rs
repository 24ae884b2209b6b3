//! Blocking CSV reader bridged onto an async channel.

use std::io::Read;

use anyhow::{anyhow, bail};
use tokio::sync::mpsc;
use tracing::debug;

use super::mappers::{FieldSpec, SourceRow};

/// Rows buffered between the reader thread and the worker.
pub const ROW_CHANNEL_CAPACITY: usize = 1024;

/// One record read from the export.
#[derive(Debug)]
pub enum RowItem {
    Row(SourceRow),
    /// The record could not be decoded (bad UTF-8, broken quoting).
    Malformed,
}

/// Stream the export into a bounded channel from a blocking task.
///
/// A fatal read error is delivered as the last item. Dropping the receiver
/// stops the reader at its next send.
pub fn spawn_row_reader(
    source: Box<dyn Read + Send>,
    fields: &'static [FieldSpec],
) -> mpsc::Receiver<anyhow::Result<RowItem>> {
    let (tx, rx) = mpsc::channel(ROW_CHANNEL_CAPACITY);
    tokio::task::spawn_blocking(move || {
        if let Err(e) = read_rows(source, fields, &tx) {
            let _ = tx.blocking_send(Err(e));
        }
    });
    rx
}

fn column_indexes(
    headers: &csv::StringRecord,
    fields: &'static [FieldSpec],
) -> anyhow::Result<Vec<Option<usize>>> {
    let names: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let h = if i == 0 { h.trim_start_matches('\u{feff}') } else { h };
            h.trim().to_ascii_lowercase()
        })
        .collect();

    let indexes: Vec<Option<usize>> = fields
        .iter()
        .map(|f| names.iter().position(|n| n == f.name))
        .collect();

    let missing: Vec<&str> = fields
        .iter()
        .zip(&indexes)
        .filter(|(f, idx)| f.required && idx.is_none())
        .map(|(f, _)| f.name)
        .collect();
    if !missing.is_empty() {
        bail!(
            "CSV header is missing required column(s): {}",
            missing.join(", ")
        );
    }
    Ok(indexes)
}

fn read_rows(
    source: Box<dyn Read + Send>,
    fields: &'static [FieldSpec],
    tx: &mpsc::Sender<anyhow::Result<RowItem>>,
) -> anyhow::Result<()> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source);

    let headers = reader
        .headers()
        .map_err(|e| anyhow!("failed to read CSV header: {e}"))?
        .clone();
    let indexes = column_indexes(&headers, fields)?;

    for record in reader.records() {
        let item = match record {
            Ok(record) => {
                let values = indexes
                    .iter()
                    .map(|idx| {
                        idx.and_then(|i| record.get(i))
                            .unwrap_or_default()
                            .to_string()
                    })
                    .collect();
                RowItem::Row(SourceRow::new(fields, values))
            }
            Err(e) if e.is_io_error() => bail!("failed to read import file: {e}"),
            Err(e) => {
                debug!(error = %e, "Skipping undecodable CSV record");
                RowItem::Malformed
            }
        };
        if tx.blocking_send(Ok(item)).is_err() {
            // Receiver gone: the job finished or hit its deadline.
            return Ok(());
        }
    }
    Ok(())
}
