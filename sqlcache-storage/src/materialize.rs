//! Result materialization.
//!
//! Turns a native store result into a [`Payload`] that can cross the cache
//! boundary. Mapped entities go through their [`ToRecord`] implementation,
//! bare scalars are kept as-is and projected rows become one record per row.
//!
//! [`ToRecord`]: sqlcache_core::ToRecord

use sqlcache_core::{MaterializeError, Payload, RawResult, Record};

/// Materialize a raw result, reporting why it could not be done.
pub fn try_materialize(raw: &RawResult) -> Result<Payload, MaterializeError> {
    match raw {
        RawResult::Entities(entities) => {
            let records = entities
                .iter()
                .map(|entity| entity.to_record())
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Payload::Records(records))
        }
        RawResult::Scalars(values) => Ok(Payload::Scalars(values.clone())),
        RawResult::Rows(rows) => {
            let mut records = Vec::with_capacity(rows.len());
            for row in rows {
                if row.columns().len() != row.values().len() {
                    return Err(MaterializeError::ShapeMismatch {
                        columns: row.columns().len(),
                        values: row.values().len(),
                    });
                }
                let record: Record = row
                    .columns()
                    .iter()
                    .cloned()
                    .zip(row.values().iter().cloned())
                    .collect();
                records.push(record);
            }
            Ok(Payload::Records(records))
        }
        RawResult::Affected(count) => Err(MaterializeError::Unsupported {
            reason: format!("write result ({} rows affected) carries no rows", count),
        }),
    }
}

/// Materialize a raw result, degrading to an empty payload on failure.
pub fn materialize(raw: &RawResult) -> Payload {
    match try_materialize(raw) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to materialize result, using empty payload");
            Payload::empty()
        }
    }
}
