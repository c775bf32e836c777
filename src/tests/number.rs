// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::str::FromStr;

use crate::Number;

fn n(s: &str) -> Number {
    Number::from_str(s).expect("a valid number")
}

#[test]
fn text_is_preserved() {
    assert_eq!(n("1.50").as_str(), "1.50");
    assert_eq!(n("-0.001").to_string(), "-0.001");
}

#[test]
fn equality_is_canonical() {
    assert_eq!(n("1.50"), n("1.5"));
    assert_eq!(n("15e-1"), n("1.5"));
    assert_eq!(n("0"), n("0.000"));
    assert_eq!(n("-0"), n("0"));
    assert_ne!(n("1.5"), n("1.51"));
}

#[test]
fn ordering() {
    assert!(n("2") > n("1"));
    assert!(n("-2") < n("-1"));
    assert!(n("0.1") < n("0.2"));
    assert!(n("10") > n("9.99"));
    assert!(n("-1") < n("0"));
    assert!(n("1e3") > n("999"));
}

#[test]
fn integer_detection() {
    assert!(n("42").is_integer());
    assert!(n("42.0").is_integer());
    assert!(n("4e2").is_integer());
    assert!(n("0").is_integer());
    assert!(!n("1.5").is_integer());
    assert!(!n("1e-1").is_integer());
}

#[test]
fn integer_conversion() {
    assert_eq!(n("42").to_u64(), Some(42));
    assert_eq!(n("4.2e1").to_u64(), Some(42));
    assert_eq!(n("-7").to_i64(), Some(-7));
    assert_eq!(n("-7").to_u64(), None);
    assert_eq!(n("1.5").to_u64(), None);
    assert_eq!(n("3").to_usize(), Some(3));
}

#[test]
fn invalid_literals() {
    for s in ["", "-", "1.", ".5", "1e", "0x10", "nan", "1_000"] {
        assert!(Number::from_str(s).is_err(), "{s:?} should be rejected");
    }
    for s in ["0", "-0", "+1", "1.5", "1e10", "1E-3", "007"] {
        assert!(Number::from_str(s).is_ok(), "{s:?} should be accepted");
    }
}

#[test]
fn to_f64() {
    assert_eq!(n("1.5").to_f64(), 1.5);
    assert_eq!(n("-2e2").to_f64(), -200.0);
}

#[test]
fn serde_round_trip() {
    let v = serde_json::to_value(n("3.50")).expect("serializable");
    let back: Number = serde_json::from_value(v).expect("deserializable");
    assert_eq!(back, n("3.5"));
}
