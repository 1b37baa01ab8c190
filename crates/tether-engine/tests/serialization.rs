//! Serialization Tests
//!
//! Values returned by native functions and passed into them, converted by
//! their declared types.

mod common;

use common::{num, Harness};
use serde_json::json;
use tether_engine::Runtime;
use tether_sdk::{
    Bridge, FunctionDescriptor, HostEnv, HostValue, NativeFunction, NativeModule, NativeValue, StructShape, TypeTag,
    ValueKind, MAX_SAFE_INTEGER,
};

fn harness() -> Harness {
    Harness::new(common::serialization::module())
}

// ===== Native to host =====

#[test]
fn test_serialize_primitives() {
    let h = harness();
    let call = |name: &str| h.call(name, &[]).unwrap();

    assert_eq!(h.rt.to_rust_string(call("serializeString")).unwrap(), "foo");
    assert_eq!(call("serializeBool"), HostValue::Bool(true));
    assert_eq!(call("serializeI32"), num(32.0));
    assert_eq!(call("serializeI64"), num(64.0));
    assert_eq!(call("serializeU32"), num(32.0));
    assert_eq!(call("serializeVoid"), HostValue::Undefined);
    assert_eq!(call("serializeOptionalNull"), HostValue::Null);
    assert_eq!(call("serializeOptionalWithValue"), num(123.0));
}

#[test]
fn test_serialize_u64_is_bigint() {
    let h = harness();
    let value = h.call("serializeU64", &[]).unwrap();
    assert_eq!(h.rt.kind_of(value), ValueKind::BigInt);
    assert_eq!(h.rt.read_bigint(value).unwrap(), 64);
}

#[test]
fn test_serialize_large_i64_is_bigint() {
    let h = harness();
    let value = h.call("serializeBigI64", &[]).unwrap();
    assert_eq!(h.rt.kind_of(value), ValueKind::BigInt);
    assert_eq!(h.rt.read_bigint(value).unwrap(), i64::MAX as i128);
}

#[test]
fn test_serialize_struct_keeps_declaration_order() {
    let h = harness();
    let value = h.call("serializeStruct", &[]).unwrap();
    let snapshot = h.json(value);
    assert_eq!(
        snapshot,
        json!({ "int": 123, "nested": { "int": 456, "str": "nested" }, "str": "first" })
    );
    let keys: Vec<&String> = snapshot.as_object().unwrap().keys().collect();
    assert_eq!(keys, vec!["int", "nested", "str"]);
}

#[test]
fn test_serialize_tuple() {
    let h = harness();
    let value = h.call("serializeTuple", &[]).unwrap();
    assert_eq!(h.json(value), json!([7, "seven", true]));
}

#[test]
fn test_serialized_values_export() {
    let h = harness();
    let arr = h.export("serializedValues.arr");
    assert_eq!(h.json(arr), json!([-411, 12, [-411, 12], { "foo": 123 }, "bar"]));
}

// ===== Host to native =====

#[test]
fn test_deserialize_integers() {
    let h = harness();
    for n in [-32.0, 32.0] {
        assert_eq!(h.call("deserializeI32", &[num(n)]).unwrap(), num(n));
    }
    for n in [-64.0, 64.0] {
        assert_eq!(h.call("deserializeI64", &[num(n)]).unwrap(), num(n));
    }
    assert_eq!(h.call("deserializeU32", &[num(32.0)]).unwrap(), num(32.0));
    assert_eq!(h.call("deserializeU8", &[num(255.0)]).unwrap(), num(255.0));
}

#[test]
fn test_deserialize_u64_accepts_bigint_and_number() {
    let h = harness();
    let big = h.rt.bigint(64);
    let from_big = h.call("deserializeU64", &[big]).unwrap();
    assert_eq!(h.rt.read_bigint(from_big).unwrap(), 64);

    let from_number = h.call("deserializeU64", &[num(64.0)]).unwrap();
    assert_eq!(h.rt.read_bigint(from_number).unwrap(), 64);
}

#[test]
fn test_deserialize_i64_bigint_within_safe_range() {
    let h = harness();
    let big = h.rt.bigint(-64);
    assert_eq!(h.call("deserializeI64", &[big]).unwrap(), num(-64.0));
}

#[test]
fn test_deserialize_f32() {
    let h = harness();
    assert_eq!(h.call("deserializeF32", &[num(1.5)]).unwrap(), num(1.5));
}

#[test]
fn test_deserialize_optional() {
    let h = harness();
    assert_eq!(h.call("deserializeOptional", &[HostValue::Null]).unwrap(), HostValue::Null);
    assert_eq!(h.call("deserializeOptional", &[HostValue::Undefined]).unwrap(), HostValue::Null);
    assert_eq!(h.call("deserializeOptional", &[]).unwrap(), HostValue::Null);
    assert_eq!(h.call("deserializeOptional", &[num(123.0)]).unwrap(), num(123.0));
}

#[test]
fn test_deserialize_struct_round_trips() {
    let h = harness();
    let input = json!({ "int": 123, "nested": { "int": 456, "str": "nested" }, "str": "first" });
    let value = h.value(input.clone());
    let result = h.call("deserializeStruct", &[value]).unwrap();
    assert_ne!(result, value);
    assert_eq!(h.json(result), input);
}

#[test]
fn test_deserialize_struct_ignores_extra_keys() {
    let h = harness();
    let value = h.value(json!({ "extra": true, "int": 1, "nested": { "int": 2, "str": "" }, "str": "x" }));
    let result = h.call("deserializeStruct", &[value]).unwrap();
    assert_eq!(h.json(result), json!({ "int": 1, "nested": { "int": 2, "str": "" }, "str": "x" }));
}

#[test]
fn test_deserialize_struct_optional_field_may_be_absent() {
    let h = harness();
    let value = h.value(json!({ "id": 7 }));
    let result = h.call("deserializeWithOptional", &[value]).unwrap();
    assert_eq!(h.json(result), json!({ "id": 7, "label": null }));

    let value = h.value(json!({ "id": 7, "label": "seven" }));
    let result = h.call("deserializeWithOptional", &[value]).unwrap();
    assert_eq!(h.json(result), json!({ "id": 7, "label": "seven" }));
}

#[test]
fn test_deserialize_arrays_and_tuples() {
    let h = harness();
    let empty = h.value(json!([]));
    let result = h.call("deserializeArray", &[empty]).unwrap();
    assert_eq!(h.json(result), json!([]));

    let values = h.value(json!([3, 1, 2]));
    let result = h.call("deserializeArray", &[values]).unwrap();
    assert_eq!(h.json(result), json!([3, 1, 2]));

    let tuple = h.value(json!([1, "one"]));
    let result = h.call("deserializeTuple", &[tuple]).unwrap();
    assert_eq!(h.json(result), json!([1, "one"]));
}

#[test]
fn test_deserialize_string_keeps_utf8() {
    let h = harness();
    let input = h.string("héllo wörld");
    let result = h.call("deserializeString", &[input]).unwrap();
    assert_eq!(h.rt.to_rust_string(result).unwrap(), "héllo wörld");
}

#[test]
fn test_deserialize_string_rejects_invalid_utf8() {
    let h = harness();
    let invalid = h.rt.create_string(&[b'o', b'k', 0xff, 0xfe]).unwrap();
    let error = h.call("deserializeString", &[invalid]).unwrap_err();
    let (name, message) = h.thrown(error);
    assert_eq!(name, "InvalidEncoding");
    assert!(message.contains("byte 2"), "{}", message);
}

#[test]
fn test_runtime_drop_after_serialization() {
    let rt = Runtime::new();
    let bridge = tether_sdk::Bridge::new();
    let exports = rt.load_module(&common::serialization::module(), &bridge).unwrap();
    let value = rt.call_method(exports, "serializeStruct", &[]).unwrap();
    assert!(rt.is_alive(value));
    drop(rt);
    assert_eq!(bridge.handles().total_live(), 0);
}

// ===== Round trips =====

fn point() -> TypeTag {
    TypeTag::Struct(
        StructShape::new("Point")
            .field("x", TypeTag::I32)
            .field("label", TypeTag::optional(TypeTag::String)),
    )
}

#[test]
fn test_every_type_round_trips_at_its_limits() {
    let rt = Runtime::new();
    let bridge = Bridge::new();
    let codec = bridge.codec(&rt);

    let cases = vec![
        (TypeTag::Bool, NativeValue::Bool(true), ValueKind::Boolean),
        (TypeTag::Bool, NativeValue::Bool(false), ValueKind::Boolean),
        (TypeTag::I8, NativeValue::I8(i8::MIN), ValueKind::Number),
        (TypeTag::I8, NativeValue::I8(i8::MAX), ValueKind::Number),
        (TypeTag::I16, NativeValue::I16(i16::MIN), ValueKind::Number),
        (TypeTag::I16, NativeValue::I16(i16::MAX), ValueKind::Number),
        (TypeTag::I32, NativeValue::I32(i32::MIN), ValueKind::Number),
        (TypeTag::I32, NativeValue::I32(i32::MAX), ValueKind::Number),
        (TypeTag::I64, NativeValue::I64(MAX_SAFE_INTEGER), ValueKind::Number),
        (TypeTag::I64, NativeValue::I64(-MAX_SAFE_INTEGER), ValueKind::Number),
        (TypeTag::I64, NativeValue::I64(MAX_SAFE_INTEGER + 1), ValueKind::BigInt),
        (TypeTag::I64, NativeValue::I64(-MAX_SAFE_INTEGER - 1), ValueKind::BigInt),
        (TypeTag::I64, NativeValue::I64(i64::MIN), ValueKind::BigInt),
        (TypeTag::I64, NativeValue::I64(i64::MAX), ValueKind::BigInt),
        (TypeTag::U8, NativeValue::U8(0), ValueKind::Number),
        (TypeTag::U8, NativeValue::U8(u8::MAX), ValueKind::Number),
        (TypeTag::U16, NativeValue::U16(u16::MAX), ValueKind::Number),
        (TypeTag::U32, NativeValue::U32(u32::MAX), ValueKind::Number),
        (TypeTag::U64, NativeValue::U64(0), ValueKind::BigInt),
        (TypeTag::U64, NativeValue::U64(u64::MAX), ValueKind::BigInt),
        (TypeTag::F32, NativeValue::F32(f32::MAX), ValueKind::Number),
        (TypeTag::F32, NativeValue::F32(f32::MIN_POSITIVE), ValueKind::Number),
        (TypeTag::F64, NativeValue::F64(f64::MAX), ValueKind::Number),
        (TypeTag::F64, NativeValue::F64(-0.5), ValueKind::Number),
        (TypeTag::String, NativeValue::string(""), ValueKind::String),
        (TypeTag::String, NativeValue::string("h\u{e9}llo \u{2713}"), ValueKind::String),
        (TypeTag::optional(TypeTag::U32), NativeValue::none(), ValueKind::Null),
        (TypeTag::optional(TypeTag::U32), NativeValue::some(NativeValue::U32(7)), ValueKind::Number),
        (
            TypeTag::array(TypeTag::I16),
            NativeValue::Array(vec![NativeValue::I16(i16::MIN), NativeValue::I16(i16::MAX)]),
            ValueKind::Array,
        ),
        (TypeTag::array(TypeTag::U8), NativeValue::Array(vec![]), ValueKind::Array),
        (
            TypeTag::Tuple(vec![TypeTag::U64, TypeTag::String]),
            NativeValue::Array(vec![NativeValue::U64(u64::MAX), NativeValue::string("x")]),
            ValueKind::Array,
        ),
        (
            point(),
            NativeValue::Struct(vec![
                ("x".to_string(), NativeValue::I32(i32::MIN)),
                ("label".to_string(), NativeValue::some(NativeValue::string("p"))),
            ]),
            ValueKind::Object,
        ),
        (
            point(),
            NativeValue::Struct(vec![
                ("x".to_string(), NativeValue::I32(1)),
                ("label".to_string(), NativeValue::none()),
            ]),
            ValueKind::Object,
        ),
    ];

    for (tag, value, kind) in cases {
        let host = codec.encode(&value, &tag).unwrap();
        assert_eq!(rt.kind_of(host), kind, "{} {:?}", tag, value);
        assert_eq!(codec.decode(host, &tag).unwrap(), value, "{}", tag);
    }
}

#[test]
fn test_one_past_the_limit_is_a_range_error() {
    let rt = Runtime::new();
    let bridge = Bridge::new();
    let codec = bridge.codec(&rt);

    let encoded = vec![
        (TypeTag::I8, NativeValue::I16(i8::MAX as i16 + 1)),
        (TypeTag::I8, NativeValue::I16(i8::MIN as i16 - 1)),
        (TypeTag::I16, NativeValue::I32(i16::MAX as i32 + 1)),
        (TypeTag::I32, NativeValue::I64(i32::MAX as i64 + 1)),
        (TypeTag::I64, NativeValue::U64(i64::MAX as u64 + 1)),
        (TypeTag::U8, NativeValue::I16(u8::MAX as i16 + 1)),
        (TypeTag::U8, NativeValue::I8(-1)),
        (TypeTag::U16, NativeValue::I32(u16::MAX as i32 + 1)),
        (TypeTag::U32, NativeValue::I64(u32::MAX as i64 + 1)),
        (TypeTag::U64, NativeValue::I64(-1)),
        (TypeTag::F32, NativeValue::F64(f64::MAX)),
    ];
    for (tag, value) in encoded {
        let error = codec.encode(&value, &tag).unwrap_err();
        assert_eq!(error.name(), "RangeError", "{} {:?}", tag, value);
    }

    let decoded = vec![
        (TypeTag::I8, num(i8::MAX as f64 + 1.0)),
        (TypeTag::I16, num(i16::MIN as f64 - 1.0)),
        (TypeTag::I32, num(i32::MAX as f64 + 1.0)),
        (TypeTag::I64, rt.bigint(i64::MAX as i128 + 1)),
        (TypeTag::I64, rt.bigint(i64::MIN as i128 - 1)),
        (TypeTag::U8, num(u8::MAX as f64 + 1.0)),
        (TypeTag::U16, num(-1.0)),
        (TypeTag::U32, num(u32::MAX as f64 + 1.0)),
        (TypeTag::U64, rt.bigint(u64::MAX as i128 + 1)),
        (TypeTag::F32, num(f64::MAX)),
    ];
    for (tag, value) in decoded {
        let error = codec.decode(value, &tag).unwrap_err();
        assert_eq!(error.name(), "RangeError", "{}", tag);
    }
}

// ===== Nested optionals =====

#[test]
fn test_nested_optional_is_rejected_by_the_codec() {
    let rt = Runtime::new();
    let bridge = Bridge::new();
    let codec = bridge.codec(&rt);
    let nested = TypeTag::optional(TypeTag::optional(TypeTag::U32));

    let error = codec.encode(&NativeValue::some(NativeValue::none()), &nested).unwrap_err();
    assert_eq!(error.name(), "TypeMismatch");
    let error = codec.decode(HostValue::Null, &nested).unwrap_err();
    assert_eq!(error.name(), "TypeMismatch");
    assert!(error.to_string().contains("optional<optional<u32>>"), "{}", error);
}

#[test]
fn test_nested_optional_parameter_fails_registration() {
    let rt = Runtime::new();
    let bridge = Bridge::new();
    let descriptor = FunctionDescriptor::new("maybeMaybe")
        .param(TypeTag::U8)
        .param(TypeTag::optional(TypeTag::optional(TypeTag::U32)));
    let module = NativeModule::new("nested").function(NativeFunction::new(descriptor, |_, _| Ok(NativeValue::Void)));

    let error = rt.load_module(&module, &bridge).unwrap_err();
    let message = error.to_string();
    assert!(message.contains("argument 1"), "{}", message);
    assert!(message.contains("optional of a non-optional type"), "{}", message);
}
