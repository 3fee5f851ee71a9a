//! Property-based test generators using proptest.
//!
//! Strategies produce values that survive a wire round trip: text never
//! has the 19-character date length, floats are finite, and field names
//! avoid the keys the codec and the server treat specially.

use proptest::prelude::*;
use remora_core::{Fields, Timestamp, Value, WireDocument, DATE_LEN};
use serde_json::Value as Json;

/// Field names the codec or the server handle specially.
pub const RESERVED_FIELDS: [&str; 10] = [
    "acl",
    "categories",
    "children",
    "contents",
    "created",
    "modified",
    "parent_refid",
    "refid",
    "resource_type",
    "url_path",
];

/// Strategy for instance ids.
pub fn instance_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9]{2,11}").expect("Invalid regex")
}

/// Strategy for refids.
pub fn refid_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-f0-9]{8,16}").expect("Invalid regex")
}

/// Strategy for ordinary field names.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z_]{0,11}")
        .expect("Invalid regex")
        .prop_filter("Field name must not be reserved", |s| {
            !RESERVED_FIELDS.contains(&s.as_str())
        })
}

/// Strategy for timestamps between 1970 and 2099.
pub fn timestamp_strategy() -> impl Strategy<Value = Timestamp> {
    (1970i32..2100, 1u32..13, 1u32..29, 0u32..24, 0u32..60, 0u32..60).prop_map(
        |(y, mo, d, h, mi, s)| {
            Timestamp::parse(&format!("{y:04}-{mo:02}-{d:02} {h:02}:{mi:02}:{s:02}"))
                .expect("generated date is valid")
        },
    )
}

fn text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[ -~]{0,24}")
        .expect("Invalid regex")
        .prop_filter("Text must not look like a date", |s| s.len() != DATE_LEN)
}

/// Strategy for scalar values.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e9f64..1.0e9).prop_filter("fractional", |f| f.fract() != 0.0).prop_map(Value::Float),
        text_strategy().prop_map(Value::Text),
    ]
}

/// Strategy for nested plain values (scalars, arrays and maps).
pub fn plain_value_strategy() -> impl Strategy<Value = Value> {
    scalar_value_strategy().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map(field_name_strategy(), inner, 0..4)
                .prop_map(|m| Value::Map(m.into_iter().collect::<Fields>())),
        ]
    })
}

/// Strategy for `contents` maps mixing plain values and dates.
pub fn contents_strategy() -> impl Strategy<Value = Fields> {
    let entry = prop_oneof![
        3 => plain_value_strategy(),
        1 => timestamp_strategy().prop_map(Value::Date),
    ];
    prop::collection::btree_map(field_name_strategy(), entry, 0..6)
        .prop_map(|m| m.into_iter().collect())
}

/// Strategy for top-level field maps without special types.
pub fn plain_fields_strategy() -> impl Strategy<Value = Fields> {
    prop::collection::btree_map(field_name_strategy(), plain_value_strategy(), 0..6)
        .prop_map(|m| m.into_iter().collect())
}

/// Strategy for plain server documents.
pub fn wire_document_strategy() -> impl Strategy<Value = WireDocument> {
    plain_fields_strategy().prop_map(|fields| match Value::Map(fields).to_json() {
        Json::Object(map) => map,
        _ => WireDocument::new(),
    })
}
