// numeric_fields BLOB: [version: u8][wincode Vec<NumericField>]. f64 values are stored as
// raw bits, so a read returns exactly what was written.

use std::collections::BTreeMap;
use wincode::{SchemaRead, SchemaWrite};

pub(super) const BLOB_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, SchemaRead, SchemaWrite)]
struct NumericField {
    name: String,
    value: f64,
}

pub(super) fn encode_fields(fields: &BTreeMap<String, f64>) -> anyhow::Result<Vec<u8>> {
    let entries: Vec<NumericField> = fields
        .iter()
        .map(|(name, value)| NumericField {
            name: name.clone(),
            value: *value,
        })
        .collect();
    let payload = wincode::serialize(&entries).map_err(|e| anyhow::anyhow!("wincode: {}", e))?;
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(BLOB_VERSION);
    out.extend_from_slice(&payload);
    Ok(out)
}

pub(super) fn decode_fields(bytes: &[u8]) -> anyhow::Result<BTreeMap<String, f64>> {
    let Some((&version, payload)) = bytes.split_first() else {
        return Ok(BTreeMap::new());
    };
    anyhow::ensure!(
        version == BLOB_VERSION,
        "unsupported numeric_fields blob version {}",
        version
    );
    let entries: Vec<NumericField> = wincode::deserialize(payload)
        .map_err(|e| anyhow::anyhow!("wincode deserialize numeric_fields: {}", e))?;
    Ok(entries.into_iter().map(|f| (f.name, f.value)).collect())
}
