//! Decoder for the range publisher's wire format
//!
//! A payload is a UTF-8 JSON array of `[idA, idB, distance]` triples, as
//! published on the `uwb/positions` topic:
//!
//! ```text
//! [["B5A4","Room1",2.0],["B5A4","Room2",3.0],["Room1","Room2",2.5]]
//! ```
//!
//! A payload that is not a JSON array fails as a whole. A malformed element
//! only rejects itself; the rest of the batch is kept.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::{MeasurementBatch, RangeMeasurement};
use crate::validation::MeasurementRejection;

/// Payload-level decoding failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Payload is not valid UTF-8: {details}")]
    InvalidEncoding { details: String },
    #[error("Payload is not valid JSON: {details}")]
    InvalidJson { details: String },
    #[error("Payload must be a JSON array of measurements, found {found}")]
    NotAnArray { found: String },
}

/// Element that could not be turned into a measurement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedElement {
    pub index: usize,
    /// The element as received, re-serialized
    pub raw: String,
    pub reason: MeasurementRejection,
}

/// Result of decoding one payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedBatch {
    pub measurements: MeasurementBatch,
    /// Payload position of each entry of `measurements`
    pub source_indices: Vec<usize>,
    pub rejected: Vec<RejectedElement>,
}

impl ParsedBatch {
    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty() && self.rejected.is_empty()
    }

    /// Payload position of `measurements[position]`
    pub fn source_index(&self, position: usize) -> Option<usize> {
        self.source_indices.get(position).copied()
    }
}

/// Turns raw payloads into measurement batches
#[derive(Debug, Clone)]
pub struct PayloadParser {
    allow_numeric_ids: bool,
}

impl Default for PayloadParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadParser {
    /// Create a parser that only accepts string identifiers
    pub fn new() -> Self {
        Self {
            allow_numeric_ids: false,
        }
    }

    /// Accept integer identifiers (`[1, 2, 3.5]`) and convert them to strings
    pub fn set_allow_numeric_ids(&mut self, allow: bool) {
        self.allow_numeric_ids = allow;
    }

    pub fn allows_numeric_ids(&self) -> bool {
        self.allow_numeric_ids
    }

    /// Decode a raw transport payload
    pub fn parse_bytes(&self, payload: &[u8]) -> Result<ParsedBatch, ParseError> {
        let text = std::str::from_utf8(payload).map_err(|e| ParseError::InvalidEncoding {
            details: e.to_string(),
        })?;
        self.parse_str(text)
    }

    /// Decode a JSON payload
    pub fn parse_str(&self, payload: &str) -> Result<ParsedBatch, ParseError> {
        let value: Value = serde_json::from_str(payload).map_err(|e| ParseError::InvalidJson {
            details: e.to_string(),
        })?;

        let elements = match value {
            Value::Array(elements) => elements,
            other => {
                return Err(ParseError::NotAnArray {
                    found: json_type_name(&other).to_string(),
                })
            }
        };

        let mut batch = ParsedBatch::default();
        for (index, element) in elements.iter().enumerate() {
            match self.parse_element(element) {
                Ok(measurement) => {
                    batch.measurements.push(measurement);
                    batch.source_indices.push(index);
                }
                Err(reason) => batch.rejected.push(RejectedElement {
                    index,
                    raw: element.to_string(),
                    reason,
                }),
            }
        }
        Ok(batch)
    }

    fn parse_element(&self, element: &Value) -> Result<RangeMeasurement, MeasurementRejection> {
        let fields = element.as_array().ok_or_else(|| MeasurementRejection::Malformed {
            details: format!("expected [idA, idB, distance], found {}", json_type_name(element)),
        })?;
        if fields.len() != 3 {
            return Err(MeasurementRejection::Malformed {
                details: format!("expected 3 fields, found {}", fields.len()),
            });
        }

        let id_a = self.parse_id(&fields[0])?;
        let id_b = self.parse_id(&fields[1])?;
        let distance_m = fields[2].as_f64().ok_or_else(|| MeasurementRejection::Malformed {
            details: format!("distance must be a number, found {}", json_type_name(&fields[2])),
        })?;

        Ok(RangeMeasurement::new(id_a, id_b, distance_m))
    }

    fn parse_id(&self, field: &Value) -> Result<String, MeasurementRejection> {
        match field {
            Value::String(id) if id.trim().is_empty() => Err(MeasurementRejection::MissingIdentifier),
            Value::String(id) => Ok(id.clone()),
            Value::Number(n) if self.allow_numeric_ids && (n.is_u64() || n.is_i64()) => Ok(n.to_string()),
            Value::Null => Err(MeasurementRejection::MissingIdentifier),
            other => Err(MeasurementRejection::Malformed {
                details: format!("identifier must be a string, found {}", json_type_name(other)),
            }),
        }
    }

    /// Encode a batch in the same wire format
    pub fn encode_batch(&self, batch: &[RangeMeasurement]) -> String {
        let elements: Vec<Value> = batch
            .iter()
            .map(|m| {
                Value::Array(vec![
                    Value::String(m.id_a.clone()),
                    Value::String(m.id_b.clone()),
                    serde_json::Number::from_f64(m.distance_m).map_or(Value::Null, Value::Number),
                ])
            })
            .collect();
        Value::Array(elements).to_string()
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wire_payload() {
        let parser = PayloadParser::new();
        let batch = parser
            .parse_str(r#"[["B5A4","Room1",2.0],["B5A4","Room2",3],["Room1","Room2",2.5]]"#)
            .unwrap();

        assert!(batch.rejected.is_empty());
        assert_eq!(batch.measurements.len(), 3);
        assert_eq!(batch.measurements[1], RangeMeasurement::new("B5A4", "Room2", 3.0));
    }

    #[test]
    fn test_bad_elements_are_rejected_individually() {
        let parser = PayloadParser::new();
        let batch = parser
            .parse_str(r#"[["A","B",1.5],["A","B"],["A",7,1.0],["A","B","1.0"],{"a":1},["","B",2.0]]"#)
            .unwrap();

        assert_eq!(batch.measurements.len(), 1);
        assert_eq!(
            batch.rejected.iter().map(|r| r.index).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );
        assert_eq!(batch.rejected[4].reason, MeasurementRejection::MissingIdentifier);
    }

    #[test]
    fn test_accepted_elements_keep_payload_positions() {
        let parser = PayloadParser::new();
        let batch = parser
            .parse_str(r#"[["A",7,1.0],["B","B",1.0],null,["C","D",2.0]]"#)
            .unwrap();

        assert_eq!(batch.measurements.len(), 2);
        assert_eq!(batch.source_indices, vec![1, 3]);
        assert_eq!(batch.source_index(1), Some(3));
        assert_eq!(batch.source_index(2), None);
    }

    #[test]
    fn test_numeric_ids_when_allowed() {
        let mut parser = PayloadParser::new();
        parser.set_allow_numeric_ids(true);
        let batch = parser.parse_str("[[1, 2, 3.5]]").unwrap();
        assert_eq!(batch.measurements, vec![RangeMeasurement::new("1", "2", 3.5)]);
    }

    #[test]
    fn test_payload_level_errors() {
        let parser = PayloadParser::new();
        assert!(matches!(parser.parse_str("not json"), Err(ParseError::InvalidJson { .. })));
        assert_eq!(
            parser.parse_str(r#"{"a":"b"}"#),
            Err(ParseError::NotAnArray { found: "object".to_string() })
        );
        assert!(matches!(
            parser.parse_bytes(&[0x5b, 0xff, 0x5d]),
            Err(ParseError::InvalidEncoding { .. })
        ));
        assert!(parser.parse_str("[]").unwrap().is_empty());
    }

    #[test]
    fn test_encode_matches_wire_format() {
        let parser = PayloadParser::new();
        let batch = vec![RangeMeasurement::new("B5A4", "TAG001", 2.25)];
        let encoded = parser.encode_batch(&batch);
        assert_eq!(encoded, r#"[["B5A4","TAG001",2.25]]"#);
        assert_eq!(parser.parse_str(&encoded).unwrap().measurements, batch);
    }
}
