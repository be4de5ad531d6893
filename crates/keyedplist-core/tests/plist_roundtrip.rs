use keyedplist_core::plist::{self, Dictionary, Uid, Value};
use keyedplist_core::{Error, Timestamp};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn round_trip(value: &Value) -> Value {
    plist::from_bytes(&plist::to_bytes(value)).unwrap()
}

#[test]
fn test_integer_boundaries() {
    let values: [i64; 12] = [
        0,
        127,
        128,
        255,
        256,
        65_535,
        65_536,
        2_147_483_647,
        4_294_967_295,
        4_294_967_296,
        i64::MAX,
        i64::MIN,
    ];
    for value in values {
        assert_eq!(round_trip(&Value::Int(value)), Value::Int(value));
        assert_eq!(round_trip(&Value::Int(-value.saturating_abs())), Value::Int(-value.saturating_abs()));
    }
}

#[test]
fn test_integer_marker_widths() {
    // magic, then the single object's marker byte
    let marker = |value: i64| plist::to_bytes(&Value::Int(value))[8];
    assert_eq!(marker(255), 0x10);
    assert_eq!(marker(256), 0x11);
    assert_eq!(marker(65_536), 0x12);
    assert_eq!(marker(4_294_967_296), 0x13);
    assert_eq!(marker(-1), 0x13);
}

#[test]
fn test_strings() {
    for s in ["", "yo", "caf\u{e9}", "\u{2603} snowman", "\u{1F600} grin", "a much longer string over fifteen"] {
        let decoded = round_trip(&Value::string(s));
        assert_eq!(decoded.as_str(), Some(s));
    }
}

#[test]
fn test_scalars() {
    let values = vec![
        Value::Null,
        Value::Bool(true),
        Value::Bool(false),
        Value::Real(3.25),
        Value::Real(-0.5),
        Value::Date(Timestamp::from_apple(-100.0)),
        Value::Data(vec![]),
        Value::Data((0..=255).collect()),
        Value::Uid(Uid(0)),
        Value::Uid(Uid(300)),
        Value::Uid(Uid(u64::MAX)),
    ];
    for value in values {
        assert_eq!(round_trip(&value), value);
    }
}

#[test]
fn test_nested_dict() {
    let inner: Dictionary = [("inner", "value")].into_iter().collect();
    let middle: Dictionary = [("middle", inner)].into_iter().collect();
    let outer: Dictionary = [("outer", middle)].into_iter().collect();
    let value = Value::dict(outer);

    let decoded = round_trip(&value);
    assert_eq!(decoded, value);

    let inner = decoded
        .as_dict()
        .and_then(|d| d.get("outer"))
        .and_then(Value::as_dict)
        .and_then(|d| d.get("middle"))
        .and_then(Value::as_dict)
        .and_then(|d| d.get("inner"));
    assert_eq!(inner, Some(&Value::string("value")));
}

#[test]
fn test_dict_order_preserved() {
    let dict: Dictionary = [("z", 1), ("a", 2), ("m", 3)].into_iter().collect();
    let decoded = round_trip(&Value::dict(dict));
    let keys: Vec<&str> = decoded.as_dict().unwrap().keys().collect();
    assert_eq!(keys, vec!["z", "a", "m"]);
}

#[test]
fn test_wide_tables() {
    // Enough distinct objects and bytes for 2-byte refs and offsets
    let items: Vec<Value> = (0..1_000).map(|i| Value::string(format!("item {i}"))).collect();
    let value = Value::array(items);
    let bytes = plist::to_bytes(&value);

    let trailer = plist::Trailer::parse(&bytes).unwrap();
    assert_eq!(trailer.object_ref_size, 2);
    assert_eq!(trailer.offset_int_size, 2);
    assert_eq!(trailer.num_objects, 1_001);
    assert_eq!(trailer.root_object, 0);
    assert_eq!(plist::from_bytes(&bytes).unwrap(), value);
}

#[test]
fn test_equal_scalars_share_a_slot() {
    let value = Value::array(vec![Value::string("a"), Value::string("a"), Value::Int(1), Value::Int(1)]);
    let bytes = plist::to_bytes(&value);
    let trailer = plist::Trailer::parse(&bytes).unwrap();
    assert_eq!(trailer.num_objects, 3);
    assert_eq!(plist::from_bytes(&bytes).unwrap(), value);
}

/// Object `i` is `[i + 1, i + 1]` for `levels` levels, ending in a string
fn shared_chain(levels: u8) -> Vec<u8> {
    let mut out = b"bplist00".to_vec();
    let mut offsets = Vec::new();
    for i in 0..levels {
        offsets.push(out.len() as u8);
        out.extend_from_slice(&[0xA2, i + 1, i + 1]);
    }
    offsets.push(out.len() as u8);
    out.extend_from_slice(b"\x51x");

    let table = out.len() as u64;
    out.extend_from_slice(&offsets);
    out.extend_from_slice(&[0, 0, 0, 0, 0, 0, 1, 1]);
    out.extend_from_slice(&(u64::from(levels) + 1).to_be_bytes());
    out.extend_from_slice(&0u64.to_be_bytes());
    out.extend_from_slice(&table.to_be_bytes());
    out
}

#[test]
fn test_shared_substructure_decodes_once() {
    // Without sharing this tree would have 2^40 leaves
    let root = plist::from_bytes(&shared_chain(40)).unwrap();

    let mut node = root;
    for _ in 0..40 {
        let items = node.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[0].ptr_eq(&items[1]));
        let next = items[0].clone();
        node = next;
    }
    assert_eq!(node.as_str(), Some("x"));
}

#[test]
fn test_malformed_input() {
    assert!(matches!(plist::from_bytes(b"nope"), Err(Error::InvalidMagic { offset: 0 })));

    let bytes = plist::to_bytes(&Value::array(vec![1.into(), 2.into()]));
    let truncated = &bytes[..bytes.len() - 1];
    let err = plist::from_bytes(truncated).unwrap_err();
    assert!(err.is_format_error());
}

fn value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        any::<f64>().prop_filter("NaN is not equal to itself", |f| !f.is_nan()).prop_map(Value::Real),
        (-4.0e8f64..9.0e8).prop_map(|s| Value::Date(Timestamp::from_apple(s))),
        prop::collection::vec(any::<u8>(), 0..40).prop_map(Value::Data),
        any::<String>().prop_map(Value::string),
        any::<u64>().prop_map(|u| Value::Uid(Uid(u))),
    ];

    leaf.prop_recursive(4, 64, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::array),
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::set),
            prop::collection::vec(("[a-z$.]{0,8}", inner), 0..6)
                .prop_map(|entries| Value::dict(entries.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn test_round_trip_property(value in value_strategy()) {
        prop_assert_eq!(round_trip(&value), value);
    }

    #[test]
    fn test_decoder_never_panics(data in prop::collection::vec(any::<u8>(), 0..128)) {
        let mut input = b"bplist00".to_vec();
        input.extend(data);
        let _ = plist::from_bytes(&input);
    }
}
