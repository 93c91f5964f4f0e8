//! Decoding of the zlib-compressed chunks that make up converted datasets.

use std::io::Read;

use flate2::read::ZlibDecoder;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Integer,
    Double,
    Boolean,
    String,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "values", rename_all = "lowercase")]
pub enum ColumnValues {
    Integer(Vec<Option<i32>>),
    Double(Vec<Option<f64>>),
    Boolean(Vec<Option<bool>>),
    String(Vec<String>),
}

impl ColumnValues {
    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Integer(values) => values.len(),
            ColumnValues::Double(values) => values.len(),
            ColumnValues::Boolean(values) => values.len(),
            ColumnValues::String(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric view with missing values as NaN; `None` for strings.
    pub fn to_f64(&self) -> Option<Vec<f64>> {
        match self {
            ColumnValues::Integer(values) => Some(
                values
                    .iter()
                    .map(|value| value.map(f64::from).unwrap_or(f64::NAN))
                    .collect(),
            ),
            ColumnValues::Double(values) => Some(
                values
                    .iter()
                    .map(|value| value.unwrap_or(f64::NAN))
                    .collect(),
            ),
            ColumnValues::Boolean(values) => Some(
                values
                    .iter()
                    .map(|value| match value {
                        Some(true) => 1.0,
                        Some(false) => 0.0,
                        None => f64::NAN,
                    })
                    .collect(),
            ),
            ColumnValues::String(_) => None,
        }
    }
}

pub fn inflate(compressed: &[u8]) -> Result<Vec<u8>, KiraError> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|err| KiraError::Decode(err.to_string()))?;
    Ok(out)
}

pub fn decode(compressed: &[u8], kind: ValueType) -> Result<ColumnValues, KiraError> {
    let raw = inflate(compressed)?;
    decode_raw(&raw, kind)
}

pub fn decode_raw(raw: &[u8], kind: ValueType) -> Result<ColumnValues, KiraError> {
    match kind {
        ValueType::Integer => {
            check_width(raw, 4, "integer")?;
            Ok(ColumnValues::Integer(
                raw.chunks_exact(4)
                    .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                    .map(|value| (value != i32::MIN).then_some(value))
                    .collect(),
            ))
        }
        ValueType::Double => {
            check_width(raw, 8, "double")?;
            Ok(ColumnValues::Double(
                raw.chunks_exact(8)
                    .map(|chunk| {
                        let mut buf = [0u8; 8];
                        buf.copy_from_slice(chunk);
                        f64::from_le_bytes(buf)
                    })
                    .map(|value| (!value.is_nan()).then_some(value))
                    .collect(),
            ))
        }
        ValueType::Boolean => Ok(ColumnValues::Boolean(
            raw.iter()
                .map(|byte| match byte {
                    0 => Some(false),
                    1 => Some(true),
                    _ => None,
                })
                .collect(),
        )),
        ValueType::String => Ok(ColumnValues::String(decode_strings(raw)?)),
        ValueType::Other => Err(KiraError::Decode(
            "unsupported value type".to_string(),
        )),
    }
}

/// NUL-terminated UTF-8 strings.
pub fn decode_strings(raw: &[u8]) -> Result<Vec<String>, KiraError> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let Some(body) = raw.strip_suffix(&[0u8]) else {
        return Err(KiraError::Decode("unterminated string chunk".to_string()));
    };
    body.split(|byte| *byte == 0)
        .map(|bytes| {
            String::from_utf8(bytes.to_vec()).map_err(|err| KiraError::Decode(err.to_string()))
        })
        .collect()
}

/// `[start, end)` byte offsets of consecutive chunks with the given sizes,
/// or `None` if the running total overflows.
pub fn chunk_offsets(sizes: &[u64]) -> Option<Vec<(u64, u64)>> {
    let mut start = 0u64;
    sizes
        .iter()
        .map(|size| {
            let end = start.checked_add(*size)?;
            let range = (start, end);
            start = end;
            Some(range)
        })
        .collect()
}

fn check_width(raw: &[u8], width: usize, label: &str) -> Result<(), KiraError> {
    if raw.len() % width != 0 {
        return Err(KiraError::Decode(format!(
            "{label} chunk of {} bytes is not a multiple of {width}",
            raw.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::ZlibEncoder;

    use super::*;

    fn compress(raw: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(raw).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn decode_integers_with_missing() {
        let mut raw = Vec::new();
        for value in [3i32, i32::MIN, -7] {
            raw.extend_from_slice(&value.to_le_bytes());
        }
        let decoded = decode(&compress(&raw), ValueType::Integer).unwrap();
        assert_eq!(decoded, ColumnValues::Integer(vec![Some(3), None, Some(-7)]));
        let numeric = decoded.to_f64().unwrap();
        assert!(numeric[1].is_nan());
    }

    #[test]
    fn decode_string_chunk() {
        let decoded = decode(&compress(b"CD3E\0MS4A1\0\0"), ValueType::String).unwrap();
        assert_eq!(
            decoded,
            ColumnValues::String(vec!["CD3E".into(), "MS4A1".into(), "".into()])
        );
        assert!(decode_strings(b"abc").is_err());
    }

    #[test]
    fn offsets_are_cumulative() {
        assert_eq!(
            chunk_offsets(&[3, 0, 5]),
            Some(vec![(0, 3), (3, 3), (3, 8)])
        );
    }

    #[test]
    fn overflowing_offsets_are_rejected() {
        assert_eq!(chunk_offsets(&[u64::MAX, 1]), None);
        assert_eq!(chunk_offsets(&[u64::MAX]), Some(vec![(0, u64::MAX)]));
    }

    #[test]
    fn ragged_double_chunk_rejected() {
        assert!(decode_raw(&[0u8; 7], ValueType::Double).is_err());
    }
}
