//! Keyword tags of the MSGPACK wire format. The sensor abbreviates the map
//! keys of its self-describing payload to single byte tags; this module
//! holds the tag table and rewrites a decoded value tree back into named
//! form. The tag values are part of the wire contract and must never be
//! renumbered.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use rmpv::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum KeywordError {
    #[error("unknown keyword tag {0}")]
    UnknownTag(i128),
    #[error("map key {0:?} is neither a keyword tag nor a string")]
    InvalidKey(Value),
    #[error("value of '{key}' is not a keyword tag: {value:?}")]
    InvalidTagValue { key: &'static str, value: Value },
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum Keyword {
    // General [0x10 - 0x2F]
    Class = 0x10,
    Data = 0x11,
    NumOfElems = 0x12,
    ElemSz = 0x13,
    Endian = 0x14,
    ElemTypes = 0x15,
    // Constant values [0x30 - 0x4F]
    Little = 0x30,
    Float32 = 0x31,
    Uint32 = 0x32,
    Uint8 = 0x33,
    Uint16 = 0x34,
    Int16 = 0x35,
    // Channels [0x50 - 0x6F]
    ChannelTheta = 0x50,
    ChannelPhi = 0x51,
    DistValues = 0x52,
    RssiValues = 0x53,
    PropertiesValues = 0x54,
    // Scan fields [0x70 - 0x8F]
    Scan = 0x70,
    TimestampStart = 0x71,
    TimestampStop = 0x72,
    ThetaStart = 0x73,
    ThetaStop = 0x74,
    ScanNumber = 0x75,
    ModuleId = 0x76,
    BeamCount = 0x77,
    EchoCount = 0x78,
    // Segment fields [0x90 - 0xAF]
    ScanSegment = 0x90,
    SegmentCounter = 0x91,
    FrameNumber = 0x92,
    Availability = 0x93,
    SenderId = 0x94,
    SegmentSize = 0x95,
    SegmentData = 0x96,
    LayerId = 0xA0,
    // Telegram fields [0xB0 - ]
    TelegramCounter = 0xB0,
    TimestampTransmit = 0xB1,
}

impl Keyword {
    /// Name used on the wire after tag rewriting.
    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::Class => "class",
            Keyword::Data => "data",
            Keyword::NumOfElems => "numOfElems",
            Keyword::ElemSz => "elemSz",
            Keyword::Endian => "endian",
            Keyword::ElemTypes => "elemTypes",
            Keyword::Little => "little",
            Keyword::Float32 => "float32",
            Keyword::Uint32 => "uint32",
            Keyword::Uint8 => "uint8",
            Keyword::Uint16 => "uint16",
            Keyword::Int16 => "int16",
            Keyword::ChannelTheta => "ChannelTheta",
            Keyword::ChannelPhi => "ChannelPhi",
            Keyword::DistValues => "DistValues",
            Keyword::RssiValues => "RssiValues",
            Keyword::PropertiesValues => "PropertiesValues",
            Keyword::Scan => "Scan",
            Keyword::TimestampStart => "TimestampStart",
            Keyword::TimestampStop => "TimestampStop",
            Keyword::ThetaStart => "ThetaStart",
            Keyword::ThetaStop => "ThetaStop",
            Keyword::ScanNumber => "ScanNumber",
            Keyword::ModuleId => "ModuleID",
            Keyword::BeamCount => "BeamCount",
            Keyword::EchoCount => "EchoCount",
            Keyword::ScanSegment => "ScanSegment",
            Keyword::SegmentCounter => "SegmentCounter",
            Keyword::FrameNumber => "FrameNumber",
            Keyword::Availability => "Availability",
            Keyword::SenderId => "SenderId",
            Keyword::SegmentSize => "SegmentSize",
            Keyword::SegmentData => "SegmentData",
            Keyword::LayerId => "LayerId",
            Keyword::TelegramCounter => "TelegramCounter",
            Keyword::TimestampTransmit => "TimestampTransmit",
        }
    }
}

fn lookup(tag: rmpv::Integer) -> Result<Keyword, KeywordError> {
    tag.as_u64()
        .and_then(|value| u8::try_from(value).ok())
        .and_then(|value| Keyword::try_from(value).ok())
        .ok_or_else(|| KeywordError::UnknownTag(raw_tag(tag)))
}

fn raw_tag(tag: rmpv::Integer) -> i128 {
    tag.as_i64()
        .map(i128::from)
        .or_else(|| tag.as_u64().map(i128::from))
        .unwrap_or(0)
}

fn replace_tag_value(key: Keyword, value: Value) -> Result<Value, KeywordError> {
    match value {
        Value::Integer(tag) => Ok(Value::from(lookup(tag)?.as_str())),
        // Already in named form.
        Value::String(name) => Ok(Value::String(name)),
        other => Err(KeywordError::InvalidTagValue {
            key: key.as_str(),
            value: other,
        }),
    }
}

fn replace_elem_types(value: Value) -> Result<Value, KeywordError> {
    match value {
        Value::Array(items) => Ok(Value::Array(
            items
                .into_iter()
                .map(|item| replace_tag_value(Keyword::ElemTypes, item))
                .collect::<Result<_, _>>()?,
        )),
        other => Err(KeywordError::InvalidTagValue {
            key: Keyword::ElemTypes.as_str(),
            value: other,
        }),
    }
}

/// Rewrites every integer map key in the tree to its keyword name. The
/// values of `class` and `endian` and the elements of `elemTypes` carry tags
/// themselves and are rewritten through the same table. Entry order and all
/// other scalars are preserved. Keys that are already strings pass through
/// untouched, which makes the rewrite idempotent.
pub fn replace_keywords(value: Value) -> Result<Value, KeywordError> {
    match value {
        Value::Map(entries) => {
            let mut replaced = Vec::with_capacity(entries.len());
            for (key, value) in entries {
                match key {
                    Value::Integer(tag) => {
                        let keyword = lookup(tag)?;
                        let value = match keyword {
                            Keyword::Class | Keyword::Endian => {
                                replace_tag_value(keyword, value)?
                            }
                            Keyword::ElemTypes => replace_elem_types(value)?,
                            _ => replace_keywords(value)?,
                        };
                        replaced.push((Value::from(keyword.as_str()), value));
                    }
                    Value::String(name) => {
                        replaced.push((Value::String(name), replace_keywords(value)?));
                    }
                    other => return Err(KeywordError::InvalidKey(other)),
                }
            }
            Ok(Value::Map(replaced))
        }
        Value::Array(items) => Ok(Value::Array(
            items
                .into_iter()
                .map(replace_keywords)
                .collect::<Result<_, _>>()?,
        )),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: Vec<(Value, Value)>) -> Value {
        Value::Map(entries)
    }

    #[test]
    fn test_tag_table_is_bijective() {
        let tags: Vec<u8> = (0..=u8::MAX)
            .filter(|tag| Keyword::try_from(*tag).is_ok())
            .collect();
        assert_eq!(tags.len(), 36);
        let mut names = std::collections::HashSet::new();
        for tag in tags {
            let keyword = Keyword::try_from(tag).unwrap();
            assert_eq!(u8::from(keyword), tag);
            assert!(names.insert(keyword.as_str()), "duplicate name for {tag:#04x}");
        }
    }

    #[test]
    fn test_single_key_is_replaced() {
        let input = map(vec![(Value::from(0xA0), Value::from("Test"))]);
        let expected = map(vec![(Value::from("LayerId"), Value::from("Test"))]);
        assert_eq!(replace_keywords(input), Ok(expected));
    }

    #[test]
    fn test_multiple_keys_are_replaced() {
        let input = map(vec![
            (Value::from(0xA0), Value::from("Test")),
            (Value::from(0x52), Value::from(42)),
        ]);
        let expected = map(vec![
            (Value::from("LayerId"), Value::from("Test")),
            (Value::from("DistValues"), Value::from(42)),
        ]);
        assert_eq!(replace_keywords(input), Ok(expected));
    }

    #[test]
    fn test_nested_maps_are_replaced() {
        let input = map(vec![(
            Value::from(0xA0),
            map(vec![(Value::from(0x52), Value::from(42))]),
        )]);
        let expected = map(vec![(
            Value::from("LayerId"),
            map(vec![(Value::from("DistValues"), Value::from(42))]),
        )]);
        assert_eq!(replace_keywords(input), Ok(expected));
    }

    #[test]
    fn test_array_of_maps_is_replaced() {
        let input = map(vec![(
            Value::from(0x11),
            Value::Array(vec![
                map(vec![(Value::from(0x50), Value::from(42))]),
                map(vec![(Value::from(0x51), Value::from(43))]),
                map(vec![(Value::from(0x52), Value::from(44))]),
            ]),
        )]);
        let expected = map(vec![(
            Value::from("data"),
            Value::Array(vec![
                map(vec![(Value::from("ChannelTheta"), Value::from(42))]),
                map(vec![(Value::from("ChannelPhi"), Value::from(43))]),
                map(vec![(Value::from("DistValues"), Value::from(44))]),
            ]),
        )]);
        assert_eq!(replace_keywords(input), Ok(expected));
    }

    #[test]
    fn test_value_of_class_key_is_replaced() {
        let input = map(vec![(Value::from(0x10), Value::from(0x70))]);
        let expected = map(vec![(Value::from("class"), Value::from("Scan"))]);
        assert_eq!(replace_keywords(input), Ok(expected));
    }

    #[test]
    fn test_value_of_endian_key_is_replaced() {
        let input = map(vec![(Value::from(0x14), Value::from(0x30))]);
        let expected = map(vec![(Value::from("endian"), Value::from("little"))]);
        assert_eq!(replace_keywords(input), Ok(expected));
    }

    #[test]
    fn test_elem_types_are_replaced() {
        let input = map(vec![(
            Value::from(0x15),
            Value::Array(vec![
                Value::from(0x31),
                Value::from(0x32),
                Value::from(0x33),
                Value::from(0x34),
                Value::from(0x35),
            ]),
        )]);
        let expected = map(vec![(
            Value::from("elemTypes"),
            Value::Array(vec![
                Value::from("float32"),
                Value::from("uint32"),
                Value::from("uint8"),
                Value::from("uint16"),
                Value::from("int16"),
            ]),
        )]);
        assert_eq!(replace_keywords(input), Ok(expected));
    }

    #[test]
    fn test_unknown_tag_fails() {
        let input = map(vec![(Value::from(0x0f), Value::from(1))]);
        assert_eq!(replace_keywords(input), Err(KeywordError::UnknownTag(0x0f)));

        let input = map(vec![(Value::from(0x10), Value::from(0xff))]);
        assert_eq!(replace_keywords(input), Err(KeywordError::UnknownTag(0xff)));
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let input = map(vec![
            (Value::from(0x10), Value::from(0x90)),
            (
                Value::from(0x11),
                Value::Array(vec![map(vec![(Value::from(0x50), Value::from(42))])]),
            ),
            (
                Value::from(0x15),
                Value::Array(vec![Value::from(0x31)]),
            ),
        ]);
        let once = replace_keywords(input).unwrap();
        let twice = replace_keywords(once.clone()).unwrap();
        assert_eq!(once, twice);
    }
}
