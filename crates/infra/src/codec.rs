//! Wire codec: Confluent-style envelope around an Avro payload.
//!
//! ```text
//! [0x00][schema id: u32 big-endian][Avro binary payload ...]
//!   0      1..=4                      5..
//! ```
//!
//! The envelope is self-describing: a consumer reads the schema id, resolves
//! the writer schema from the registry, then decodes the payload with it.

use std::collections::{BTreeMap, HashMap};

use apache_avro::schema::{Name, ResolvedSchema, UnionSchema};
use apache_avro::types::Value;
use apache_avro::{Schema, from_avro_datum, to_avro_datum};
use chrono::DateTime;
use thiserror::Error;

use eventline_events::{FieldValue, NativeRecord};

/// First byte of every envelope.
pub const MAGIC_BYTE: u8 = 0x00;

/// Magic byte + 4-byte schema id.
pub const HEADER_LEN: usize = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The bytes do not carry a valid envelope header.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The record does not conform to the schema.
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// The payload does not parse against the resolved schema.
    #[error("decoding failed: {0}")]
    Decoding(String),

    /// The schema definition text is not a usable Avro record schema.
    #[error("invalid schema definition: {0}")]
    InvalidSchema(String),
}

/// Borrowed view over an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireEnvelope<'a> {
    pub schema_id: u32,
    pub payload: &'a [u8],
}

impl<'a> WireEnvelope<'a> {
    /// Validate the header and split off the payload.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, CodecError> {
        let Some((header, payload)) = bytes.split_first_chunk::<HEADER_LEN>() else {
            return Err(CodecError::MalformedEnvelope(format!(
                "{} bytes, need at least {HEADER_LEN}",
                bytes.len()
            )));
        };

        if header[0] != MAGIC_BYTE {
            return Err(CodecError::MalformedEnvelope(format!(
                "unknown magic byte: {:#04x}",
                header[0]
            )));
        }

        let schema_id = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
        Ok(Self { schema_id, payload })
    }

    /// Prefix `payload` with the envelope header.
    pub fn write(schema_id: u32, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
        buf.push(MAGIC_BYTE);
        buf.extend_from_slice(&schema_id.to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }
}

/// Split an envelope into `(schema_id, payload)`.
///
/// The payload can only be interpreted once the caller has resolved the schema
/// for `schema_id` (see [`SchemaResolver`](crate::schema::SchemaResolver)).
pub fn decode(bytes: &[u8]) -> Result<(u32, &[u8]), CodecError> {
    let envelope = WireEnvelope::parse(bytes)?;
    Ok((envelope.schema_id, envelope.payload))
}

/// Avro codec compiled from one schema definition.
#[derive(Debug, Clone)]
pub struct AvroCodec {
    schema: Schema,
    definition: String,
    // Named types reachable from `schema`, for following `Schema::Ref`.
    named: HashMap<Name, Schema>,
}

impl AvroCodec {
    /// Compile a record schema.
    pub fn parse(definition: impl Into<String>) -> Result<Self, CodecError> {
        let definition = definition.into();
        let schema = Schema::parse_str(&definition)
            .map_err(|e| CodecError::InvalidSchema(e.to_string()))?;

        if !matches!(schema, Schema::Record(_)) {
            return Err(CodecError::InvalidSchema(
                "top-level schema must be a record".to_string(),
            ));
        }

        let named = ResolvedSchema::try_from(&schema)
            .map_err(|e| CodecError::InvalidSchema(e.to_string()))?
            .get_names()
            .iter()
            .map(|(name, named)| (name.clone(), (*named).clone()))
            .collect();

        Ok(Self {
            schema,
            definition,
            named,
        })
    }

    pub fn definition(&self) -> &str {
        &self.definition
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Serialize `record` with this schema and wrap it in an envelope.
    pub fn encode(&self, schema_id: u32, record: &NativeRecord) -> Result<Vec<u8>, CodecError> {
        let payload = self.encode_payload(record)?;
        Ok(WireEnvelope::write(schema_id, &payload))
    }

    /// Serialize `record` without the envelope header.
    ///
    /// Fields are matched by name; fields missing from the record fall back to
    /// the schema default, otherwise encoding fails. Extra fields are ignored.
    /// Integers that do not fit an `int`-backed field are an encoding error,
    /// never truncated.
    pub fn encode_payload(&self, record: &NativeRecord) -> Result<Vec<u8>, CodecError> {
        let fields = record
            .iter()
            .map(|(name, value)| {
                let schema = field_schema(&self.schema, name);
                Ok((name.to_string(), self.to_avro(value, schema)?))
            })
            .collect::<Result<Vec<_>, CodecError>>()?;

        let resolved = Value::Record(fields)
            .resolve(&self.schema)
            .map_err(|e| CodecError::Encoding(e.to_string()))?;

        to_avro_datum(&self.schema, resolved).map_err(|e| CodecError::Encoding(e.to_string()))
    }

    /// Decode a payload (envelope header already stripped).
    pub fn decode_payload(&self, payload: &[u8]) -> Result<NativeRecord, CodecError> {
        let mut reader = payload;
        let value = from_avro_datum(&self.schema, &mut reader, None)
            .map_err(|e| CodecError::Decoding(e.to_string()))?;

        if !reader.is_empty() {
            return Err(CodecError::Decoding(format!(
                "{} trailing bytes after record",
                reader.len()
            )));
        }

        match value {
            Value::Record(fields) => fields
                .into_iter()
                .map(|(name, v)| Ok((name, from_avro(v)?)))
                .collect(),
            other => Err(CodecError::Decoding(format!(
                "expected a record, found {other:?}"
            ))),
        }
    }

    /// Native value → Avro value, shaped by the target schema when known.
    ///
    /// `Value::resolve` narrows `long` to `int` with a plain cast, so every
    /// integer headed for an `int`-backed schema is range-checked here first.
    /// Everything else (enums, unions, defaults) is left to `resolve`.
    fn to_avro(&self, value: &FieldValue, schema: Option<&Schema>) -> Result<Value, CodecError> {
        let schema = schema.map(|s| self.follow(s));
        if let Some(Schema::Union(union)) = schema {
            return self.to_avro(value, self.branch_for(union, value));
        }

        let converted = match value {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Boolean(*b),
            FieldValue::Int(n) => integer(*n, schema)?,
            FieldValue::Float(f) => {
                let overflows = f.is_finite() && (*f as f32).is_infinite();
                if overflows && matches!(schema, Some(Schema::Float)) {
                    return Err(CodecError::Encoding(format!("{f} does not fit an Avro float")));
                }
                Value::Double(*f)
            }
            FieldValue::Str(s) => Value::String(s.clone()),
            FieldValue::Bytes(b) => Value::Bytes(b.clone()),
            FieldValue::Timestamp(t) => {
                let ticks = match schema {
                    Some(Schema::TimestampMicros | Schema::LocalTimestampMicros | Schema::TimeMicros) => {
                        t.timestamp_micros()
                    }
                    Some(Schema::TimestampNanos | Schema::LocalTimestampNanos) => {
                        t.timestamp_nanos_opt().ok_or_else(|| {
                            CodecError::Encoding(format!("{t} is out of range for nanoseconds"))
                        })?
                    }
                    // Timestamps travel as epoch millis.
                    _ => t.timestamp_millis(),
                };
                integer(ticks, schema)?
            }
            FieldValue::List(items) => {
                let item_schema = match schema {
                    Some(Schema::Array(array)) => Some(array.items.as_ref()),
                    _ => None,
                };
                Value::Array(
                    items
                        .iter()
                        .map(|item| self.to_avro(item, item_schema))
                        .collect::<Result<_, _>>()?,
                )
            }
            FieldValue::Map(map) => match schema {
                Some(record @ Schema::Record(_)) => Value::Record(
                    map.iter()
                        .map(|(k, v)| Ok((k.clone(), self.to_avro(v, field_schema(record, k))?)))
                        .collect::<Result<_, CodecError>>()?,
                ),
                _ => {
                    let value_schema = match schema {
                        Some(Schema::Map(values)) => Some(values.types.as_ref()),
                        _ => None,
                    };
                    Value::Map(
                        map.iter()
                            .map(|(k, v)| Ok((k.clone(), self.to_avro(v, value_schema)?)))
                            .collect::<Result<HashMap<_, _>, CodecError>>()?,
                    )
                }
            },
        };
        Ok(converted)
    }

    fn follow<'a>(&'a self, schema: &'a Schema) -> &'a Schema {
        match schema {
            Schema::Ref { name } => self.named.get(name).unwrap_or(schema),
            other => other,
        }
    }

    /// Union branch for `value`: the first one that holds it as is, else the
    /// first of a compatible kind (which then reports the range error).
    fn branch_for<'a>(&'a self, union: &'a UnionSchema, value: &FieldValue) -> Option<&'a Schema> {
        let branches = || union.variants().iter().map(|v| self.follow(v));
        branches()
            .find(|branch| accepts(branch, value, true))
            .or_else(|| branches().find(|branch| accepts(branch, value, false)))
    }
}

fn field_schema<'a>(record: &'a Schema, name: &str) -> Option<&'a Schema> {
    let Schema::Record(record) = record else {
        return None;
    };
    record
        .lookup
        .get(name)
        .and_then(|&position| record.fields.get(position))
        .map(|field| &field.schema)
}

fn is_int_backed(schema: Option<&Schema>) -> bool {
    matches!(schema, Some(Schema::Int | Schema::Date | Schema::TimeMillis))
}

fn integer(n: i64, schema: Option<&Schema>) -> Result<Value, CodecError> {
    if !is_int_backed(schema) {
        return Ok(Value::Long(n));
    }
    i32::try_from(n)
        .map(Value::Int)
        .map_err(|_| CodecError::Encoding(format!("{n} does not fit an Avro int")))
}

fn accepts(schema: &Schema, value: &FieldValue, in_range: bool) -> bool {
    match value {
        FieldValue::Null => matches!(schema, Schema::Null),
        FieldValue::Bool(_) => matches!(schema, Schema::Boolean),
        FieldValue::Int(_) | FieldValue::Timestamp(_) => {
            let numeric = matches!(
                schema,
                Schema::Int
                    | Schema::Long
                    | Schema::Float
                    | Schema::Double
                    | Schema::Date
                    | Schema::TimeMillis
                    | Schema::TimeMicros
                    | Schema::TimestampMillis
                    | Schema::TimestampMicros
                    | Schema::TimestampNanos
                    | Schema::LocalTimestampMillis
                    | Schema::LocalTimestampMicros
                    | Schema::LocalTimestampNanos
            );
            let fits = match value {
                FieldValue::Int(n) => i32::try_from(*n).is_ok(),
                FieldValue::Timestamp(t) => i32::try_from(t.timestamp_millis()).is_ok(),
                _ => true,
            };
            numeric && (!in_range || fits || !is_int_backed(Some(schema)))
        }
        FieldValue::Float(_) => matches!(schema, Schema::Float | Schema::Double),
        FieldValue::Str(_) => matches!(schema, Schema::String | Schema::Enum(_) | Schema::Uuid),
        FieldValue::Bytes(_) => matches!(schema, Schema::Bytes | Schema::Fixed(_) | Schema::Decimal(_)),
        FieldValue::List(_) => matches!(schema, Schema::Array(_)),
        FieldValue::Map(_) => matches!(schema, Schema::Map(_) | Schema::Record(_)),
    }
}

fn from_avro(value: Value) -> Result<FieldValue, CodecError> {
    let converted = match value {
        Value::Null => FieldValue::Null,
        Value::Boolean(b) => FieldValue::Bool(b),
        Value::Int(n) | Value::Date(n) | Value::TimeMillis(n) => FieldValue::Int(i64::from(n)),
        Value::Long(n) | Value::TimeMicros(n) => FieldValue::Int(n),
        Value::Float(f) => FieldValue::Float(f64::from(f)),
        Value::Double(f) => FieldValue::Float(f),
        Value::String(s) | Value::Enum(_, s) => FieldValue::Str(s),
        Value::Bytes(b) | Value::Fixed(_, b) => FieldValue::Bytes(b),
        Value::Union(_, inner) => from_avro(*inner)?,
        Value::Array(items) => {
            FieldValue::List(items.into_iter().map(from_avro).collect::<Result<_, _>>()?)
        }
        Value::Map(map) => FieldValue::Map(
            map.into_iter()
                .map(|(k, v)| Ok((k, from_avro(v)?)))
                .collect::<Result<_, CodecError>>()?,
        ),
        Value::Record(fields) => FieldValue::Map(
            fields
                .into_iter()
                .map(|(k, v)| Ok((k, from_avro(v)?)))
                .collect::<Result<_, CodecError>>()?,
        ),
        Value::TimestampMillis(ms) | Value::LocalTimestampMillis(ms) => {
            DateTime::from_timestamp_millis(ms)
                .map(FieldValue::Timestamp)
                .unwrap_or(FieldValue::Int(ms))
        }
        Value::TimestampMicros(us) | Value::LocalTimestampMicros(us) => {
            DateTime::from_timestamp_micros(us)
                .map(FieldValue::Timestamp)
                .unwrap_or(FieldValue::Int(us / 1_000))
        }
        Value::TimestampNanos(ns) | Value::LocalTimestampNanos(ns) => {
            FieldValue::Timestamp(DateTime::from_timestamp_nanos(ns))
        }
        // Unscaled two's-complement big-endian bytes, as on the wire.
        Value::Decimal(decimal) => FieldValue::Bytes(
            Vec::<u8>::try_from(decimal).map_err(|e| CodecError::Decoding(e.to_string()))?,
        ),
        Value::BigDecimal(decimal) => FieldValue::Str(decimal.to_string()),
        Value::Duration(duration) => FieldValue::Map(BTreeMap::from([
            ("months".to_string(), FieldValue::Int(i64::from(u32::from(duration.months())))),
            ("days".to_string(), FieldValue::Int(i64::from(u32::from(duration.days())))),
            ("millis".to_string(), FieldValue::Int(i64::from(u32::from(duration.millis())))),
        ])),
        Value::Uuid(uuid) => FieldValue::Str(uuid.to_string()),
    };
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    use crate::schema::fixtures::NOTIFICATION_V1;

    fn codec() -> AvroCodec {
        AvroCodec::parse(NOTIFICATION_V1).unwrap()
    }

    fn sample() -> NativeRecord {
        NativeRecord::new()
            .with("id", "o1")
            .with("type", "CREATED")
            .with("message", "")
            .with("timestamp", 1_700_000_000_000_i64)
    }

    #[test]
    fn envelope_header_is_bit_exact() {
        let bytes = WireEnvelope::write(0x0102_0304, b"xyz");
        assert_eq!(bytes, vec![0x00, 0x01, 0x02, 0x03, 0x04, b'x', b'y', b'z']);

        let (id, payload) = decode(&bytes).unwrap();
        assert_eq!(id, 0x0102_0304);
        assert_eq!(payload, b"xyz");
    }

    #[test]
    fn header_only_envelope_has_empty_payload() {
        let (id, payload) = decode(&[0, 0, 0, 0, 7]).unwrap();
        assert_eq!(id, 7);
        assert!(payload.is_empty());
    }

    #[test]
    fn short_or_wrong_magic_is_malformed() {
        assert!(matches!(decode(&[]), Err(CodecError::MalformedEnvelope(_))));
        assert!(matches!(decode(&[0, 0, 0, 1]), Err(CodecError::MalformedEnvelope(_))));
        assert!(matches!(
            decode(&[1, 0, 0, 0, 1, 2]),
            Err(CodecError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn record_round_trips_through_envelope() {
        let codec = codec();
        let bytes = codec.encode(42, &sample()).unwrap();

        let (id, payload) = decode(&bytes).unwrap();
        assert_eq!(id, 42);

        let decoded = codec.decode_payload(payload).unwrap();
        assert_eq!(decoded.get("id"), Some(&FieldValue::from("o1")));
        assert_eq!(decoded.get("type"), Some(&FieldValue::from("CREATED")));
        assert_eq!(decoded.get("message"), Some(&FieldValue::from("")));
        assert_eq!(
            decoded.get("timestamp").and_then(FieldValue::as_millis),
            Some(1_700_000_000_000)
        );
    }

    #[test]
    fn optional_field_defaults_to_null() {
        let codec = codec();
        let mut record = sample();
        record.remove("message");

        let bytes = codec.encode_payload(&record).unwrap();
        let decoded = codec.decode_payload(&bytes).unwrap();
        assert_eq!(decoded.get("message"), Some(&FieldValue::Null));
    }

    #[test]
    fn native_timestamp_encodes_as_millis() {
        let codec = codec();
        let at = DateTime::from_timestamp_millis(1_234).unwrap();
        let record = sample().with("timestamp", at);

        let decoded = codec.decode_payload(&codec.encode_payload(&record).unwrap()).unwrap();
        assert_eq!(decoded.get("timestamp"), Some(&FieldValue::Timestamp(at)));
    }

    #[test]
    fn missing_required_field_fails_to_encode() {
        let mut record = sample();
        record.remove("id");
        assert!(matches!(
            codec().encode_payload(&record),
            Err(CodecError::Encoding(_))
        ));
    }

    #[test]
    fn type_mismatch_fails_to_encode() {
        let record = sample().with("timestamp", "not a number at all");
        assert!(matches!(
            codec().encode_payload(&record),
            Err(CodecError::Encoding(_))
        ));
    }

    const SHIPMENT: &str = r#"{
        "type": "record",
        "name": "Shipment",
        "fields": [
            {"name": "qty", "type": "int"},
            {"name": "weight", "type": "float"},
            {"name": "express", "type": "boolean"},
            {"name": "status", "type": {"type": "enum", "name": "Status", "symbols": ["PENDING", "SHIPPED", "DELIVERED"]}},
            {"name": "address", "type": {"type": "record", "name": "Address", "fields": [
                {"name": "city", "type": "string"},
                {"name": "zip", "type": ["null", "int"], "default": null}
            ]}},
            {"name": "billing", "type": ["null", "Address"], "default": null},
            {"name": "tags", "type": {"type": "array", "items": "string"}},
            {"name": "shipped_on", "type": {"type": "int", "logicalType": "date"}},
            {"name": "sequence", "type": ["null", "int", "long"], "default": null}
        ]
    }"#;

    fn address(city: &str, zip: Option<i64>) -> FieldValue {
        FieldValue::Map(BTreeMap::from([
            ("city".to_string(), FieldValue::from(city)),
            ("zip".to_string(), FieldValue::from(zip)),
        ]))
    }

    fn shipment() -> NativeRecord {
        NativeRecord::new()
            .with("qty", 3_i64)
            .with("weight", 1.5_f64)
            .with("express", FieldValue::Bool(true))
            .with("status", "SHIPPED")
            .with("address", address("Lyon", Some(69_001)))
            .with("billing", FieldValue::Null)
            .with("tags", FieldValue::List(vec!["fragile".into()]))
            .with("shipped_on", 19_700_i64)
            .with("sequence", FieldValue::Null)
    }

    fn encode_shipment(record: &NativeRecord) -> Result<Vec<u8>, CodecError> {
        AvroCodec::parse(SHIPMENT).unwrap().encode_payload(record)
    }

    #[test]
    fn int_field_out_of_range_fails_to_encode() {
        let record = shipment().with("qty", (1_i64 << 32) + 5);
        assert!(matches!(encode_shipment(&record), Err(CodecError::Encoding(_))));

        let record = shipment().with("qty", i64::from(i32::MIN) - 1);
        assert!(matches!(encode_shipment(&record), Err(CodecError::Encoding(_))));
    }

    #[test]
    fn int_field_at_the_bounds_round_trips() {
        let codec = AvroCodec::parse(SHIPMENT).unwrap();
        for qty in [i64::from(i32::MIN), i64::from(i32::MAX)] {
            let record = shipment().with("qty", qty);
            let decoded = codec.decode_payload(&codec.encode_payload(&record).unwrap()).unwrap();
            assert_eq!(decoded.get("qty"), Some(&FieldValue::Int(qty)));
        }
    }

    #[test]
    fn date_field_out_of_range_fails_to_encode() {
        let record = shipment().with("shipped_on", i64::MAX);
        assert!(matches!(encode_shipment(&record), Err(CodecError::Encoding(_))));
    }

    #[test]
    fn nested_and_referenced_int_fields_are_range_checked() {
        let record = shipment().with("address", address("Lyon", Some(1_i64 << 40)));
        assert!(matches!(encode_shipment(&record), Err(CodecError::Encoding(_))));

        let record = shipment().with("billing", address("Paris", Some(1_i64 << 40)));
        assert!(matches!(encode_shipment(&record), Err(CodecError::Encoding(_))));
    }

    #[test]
    fn union_picks_the_branch_wide_enough_for_the_value() {
        let codec = AvroCodec::parse(SHIPMENT).unwrap();
        let large = (1_i64 << 40) + 7;
        let record = shipment().with("sequence", large);

        let decoded = codec.decode_payload(&codec.encode_payload(&record).unwrap()).unwrap();
        assert_eq!(decoded.get("sequence"), Some(&FieldValue::Int(large)));
    }

    #[test]
    fn float_field_overflow_fails_to_encode() {
        let record = shipment().with("weight", f64::MAX);
        assert!(matches!(encode_shipment(&record), Err(CodecError::Encoding(_))));
    }

    #[test]
    fn unknown_enum_symbol_fails_to_encode() {
        let record = shipment().with("status", "LOST");
        assert!(matches!(encode_shipment(&record), Err(CodecError::Encoding(_))));
    }

    #[test]
    fn duration_and_decimal_decode_to_structured_values() {
        let codec = AvroCodec::parse(
            r#"{"type": "record", "name": "Charge", "fields": [
                {"name": "amount", "type": {"type": "bytes", "logicalType": "decimal", "precision": 9, "scale": 2}},
                {"name": "period", "type": {"type": "fixed", "name": "Period", "size": 12, "logicalType": "duration"}}
            ]}"#,
        )
        .unwrap();

        // months, days, millis as little-endian u32s
        let mut period = [0_u8; 12];
        for (slot, part) in period.chunks_exact_mut(4).zip([1_u32, 15, 500]) {
            slot.copy_from_slice(&part.to_le_bytes());
        }
        let value = Value::Record(vec![
            ("amount".to_string(), Value::Decimal(apache_avro::Decimal::from(vec![0x30, 0x39]))),
            ("period".to_string(), Value::Duration(apache_avro::Duration::from(period))),
        ]);
        let payload = to_avro_datum(codec.schema(), value).unwrap();

        let decoded = codec.decode_payload(&payload).unwrap();
        assert_eq!(decoded.get("amount"), Some(&FieldValue::Bytes(vec![0x30, 0x39])));
        assert_eq!(
            decoded.get("period"),
            Some(&FieldValue::Map(BTreeMap::from([
                ("months".to_string(), FieldValue::Int(1)),
                ("days".to_string(), FieldValue::Int(15)),
                ("millis".to_string(), FieldValue::Int(500)),
            ])))
        );
    }

    #[test]
    fn garbage_payload_fails_to_decode() {
        // A string length prefix far beyond the available bytes.
        assert!(matches!(
            codec().decode_payload(&[0xfe, 0xff, 0xff, 0xff, 0x0f]),
            Err(CodecError::Decoding(_))
        ));
    }

    #[test]
    fn non_record_schema_is_rejected() {
        assert!(matches!(
            AvroCodec::parse(r#""string""#),
            Err(CodecError::InvalidSchema(_))
        ));
        assert!(matches!(
            AvroCodec::parse("{not json"),
            Err(CodecError::InvalidSchema(_))
        ));
    }

    proptest! {
        #[test]
        fn decode_never_panics_on_arbitrary_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let result = decode(&bytes);
            if bytes.len() < HEADER_LEN || bytes[0] != MAGIC_BYTE {
                prop_assert!(matches!(result, Err(CodecError::MalformedEnvelope(_))));
            } else {
                prop_assert!(result.is_ok());
            }
        }

        #[test]
        fn conforming_records_round_trip(
            id in "[a-z0-9-]{1,24}",
            event_type in "[A-Z_]{1,16}",
            message in proptest::option::of(".{0,40}"),
            ts in 0_i64..4_102_444_800_000,
            schema_id in any::<u32>(),
        ) {
            let codec = codec();
            let record = NativeRecord::new()
                .with("id", id.clone())
                .with("type", event_type.clone())
                .with("message", message.clone())
                .with("timestamp", ts);

            let bytes = codec.encode(schema_id, &record).unwrap();
            let (decoded_id, payload) = decode(&bytes).unwrap();
            let decoded = codec.decode_payload(payload).unwrap();

            prop_assert_eq!(decoded_id, schema_id);
            prop_assert_eq!(decoded.get("id"), Some(&FieldValue::from(id)));
            prop_assert_eq!(decoded.get("type"), Some(&FieldValue::from(event_type)));
            prop_assert_eq!(decoded.get("message"), Some(&FieldValue::from(message)));
            prop_assert_eq!(decoded.get("timestamp").and_then(FieldValue::as_millis), Some(ts));
        }

        #[test]
        fn structured_records_round_trip_exactly(
            qty in any::<i32>(),
            weight in -1.0e6_f32..1.0e6_f32,
            express in any::<bool>(),
            status in prop::sample::select(vec!["PENDING", "SHIPPED", "DELIVERED"]),
            city in "[A-Za-z ]{0,20}",
            zip in proptest::option::of(any::<i32>()),
            billing in proptest::option::of(("[A-Za-z]{1,12}", proptest::option::of(any::<i32>()))),
            tags in proptest::collection::vec("[a-z]{1,8}", 0..4),
            shipped_on in -100_000_i32..100_000,
            sequence in proptest::option::of(any::<i64>()),
        ) {
            let codec = AvroCodec::parse(SHIPMENT).unwrap();
            let record = NativeRecord::new()
                .with("qty", qty)
                .with("weight", f64::from(weight))
                .with("express", FieldValue::Bool(express))
                .with("status", status)
                .with("address", address(&city, zip.map(i64::from)))
                .with(
                    "billing",
                    billing
                        .as_ref()
                        .map(|(city, zip)| address(city, zip.map(i64::from)))
                        .unwrap_or(FieldValue::Null),
                )
                .with("tags", FieldValue::List(tags.into_iter().map(FieldValue::from).collect()))
                .with("shipped_on", shipped_on)
                .with("sequence", sequence);

            let bytes = codec.encode(9, &record).unwrap();
            let (_, payload) = decode(&bytes).unwrap();
            prop_assert_eq!(codec.decode_payload(payload).unwrap(), record);
        }
    }
}
