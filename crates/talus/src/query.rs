//! Range-query engine reconciling committed files with the live buffer.

use crate::files::FileManager;
use crate::filter::{FilterCollection, FilterDefinition};
use crate::meta::MetaRegistry;
use crate::error::StoreError;
use crate::model::{Measurement, MeasurementKind, Timestamp};
use crate::record::{decode_raw_entry, Block, Record};
use std::collections::HashMap;
use tracing::{debug, error, warn};

/// Per-name measurement sequences in encounter order.
///
/// Files and the buffer are append-only, so encounter order is chronological
/// order. Names that match nothing are absent rather than mapped to an empty
/// sequence.
pub type QueryResult = HashMap<String, Vec<Measurement>>;

/// Runs a range query over the committed files and the live block.
///
/// Files overlapping `[from, to]` are scanned oldest to newest; the buffer
/// is scanned afterwards when no file was selected or the selected files do
/// not cover `to`, so a range touching "now" sees unflushed data. A file
/// that fails to read is skipped; partial results are better than none.
///
/// `from > to` is not validated and yields an empty result.
pub(crate) fn run_query(
    meta: &MetaRegistry,
    files: &FileManager,
    block: &Block,
    from: Timestamp,
    to: Timestamp,
    definition: &FilterDefinition,
) -> QueryResult {
    let mut filter = FilterCollection::new(definition);
    let mut result = QueryResult::new();

    let candidates = files.files_overlapping(from, to);
    for file in &candidates {
        match files.read_block(file) {
            Ok((records, raw)) => {
                collect_passing(meta, &records, &raw, from, to, &mut filter, &mut result);
            }
            Err(err) => {
                error!(created = file.created, %err, "skipping unreadable file");
            }
        }
    }

    // The buffered block holds the newest data; include it whenever the
    // selected files cannot cover the end of the range.
    let needs_buffer = candidates
        .last()
        .map_or(true, |newest| newest.latest_ts < to);
    if needs_buffer {
        collect_passing(
            meta,
            block.records(),
            block.arena(),
            from,
            to,
            &mut filter,
            &mut result,
        );
    }

    result
}

fn collect_passing(
    meta: &MetaRegistry,
    records: &[Record],
    raw: &[u8],
    from: Timestamp,
    to: Timestamp,
    filter: &mut FilterCollection,
    result: &mut QueryResult,
) {
    for record in records {
        if record.ts < from || record.ts > to {
            continue;
        }
        // Ids written before an incomplete registry save resolve to nothing;
        // skip those records instead of failing the query.
        let (Some(name), Some(kind)) = (
            meta.resolve_name(record.series_id),
            meta.resolve_kind(record.series_id),
        ) else {
            let err = StoreError::UnknownId(record.series_id);
            debug!(%err, "skipping record");
            continue;
        };

        let measurement = match kind {
            MeasurementKind::Numerical => Measurement::Numerical {
                ts: record.ts,
                value: record.value,
            },
            MeasurementKind::Categorical => {
                let Some(value) = meta.resolve_value(record.series_id, record.value as i64) else {
                    debug!(
                        series_id = record.series_id,
                        value_id = record.value as i64,
                        "skipping record with unknown value id"
                    );
                    continue;
                };
                Measurement::Categorical {
                    ts: record.ts,
                    value: value.to_string(),
                }
            }
            MeasurementKind::Raw => match decode_raw_entry(raw, record.value as usize) {
                Ok(payload) => Measurement::Raw {
                    ts: record.ts,
                    value: payload,
                },
                Err(err) => {
                    warn!(series_id = record.series_id, %err, "skipping unreadable raw payload");
                    continue;
                }
            },
        };

        if filter.passes(name, &measurement) {
            result.entry(name.to_string()).or_default().push(measurement);
        }
    }
}
