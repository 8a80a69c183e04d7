use serde_json::json;

use super::*;

#[test]
fn test_attribute_conversion_preserves_shape() {
    let value = json!({
        "title": "Temptation",
        "playedPosition": 12,
        "ratio": 0.5,
        "explicit": false,
        "tags": ["synth", "1982"],
        "artworkUrl": null
    });
    let back = from_attribute(&to_attribute(&value)).unwrap();
    assert_eq!(back, value);
}

#[test]
fn test_numbers_render_as_n() {
    assert_eq!(to_attribute(&json!(42)), AttributeValue::N("42".to_string()));
}

#[test]
fn test_invalid_number_is_malformed() {
    let err = from_attribute(&AttributeValue::N("abc".to_string())).unwrap_err();
    assert!(matches!(err, StorageError::Malformed(_)));
}

#[test]
fn test_raw_item_round_trip_keeps_index_key() {
    let item = Item::new(Key::vote("u1", "123")).with("rank", 2);
    let raw = to_raw_item(&item);
    assert_eq!(raw.get("gsi_pk"), Some(&AttributeValue::S("SONG#123".into())));
    assert_eq!(from_raw_item(&raw).unwrap(), item);
}

#[test]
fn test_unindexed_item_has_no_gsi_attributes() {
    let raw = to_raw_item(&Item::unindexed(Key::play_counter()).with("value", 1));
    assert!(!raw.contains_key("gsi_pk"));
    assert!(!raw.contains_key("gsi_sk"));
}

#[test]
fn test_render_condition_and() {
    let mut p = Placeholders::default();
    let expr = render_condition(
        &Condition::Exists.and(Condition::attribute_not_exists("playedPosition")),
        &mut p,
    );
    assert_eq!(
        expr,
        "(attribute_exists(#n0)) AND (attribute_not_exists(#n1))"
    );
    assert_eq!(p.names.get("#n0").map(String::as_str), Some("pk"));
    assert_eq!(p.names.get("#n1").map(String::as_str), Some("playedPosition"));
}

#[test]
fn test_render_update_set_and_add() {
    let mut p = Placeholders::default();
    let update = Update::new()
        .set("playedAt", "2026-01-01T00:00:00Z")
        .add("points", 5);
    let expr = render_update(&update, &mut p);
    assert_eq!(expr, "SET #n0 = :v0 ADD #n1 :v1");
    assert_eq!(p.values.get(":v1"), Some(&AttributeValue::N("5".into())));
}

#[test]
fn test_placeholder_names_are_reused() {
    let mut p = Placeholders::default();
    let first = p.name("points");
    let second = p.name("points");
    assert_eq!(first, second);
    assert_eq!(p.names.len(), 1);
}

#[test]
fn test_index_key_condition() {
    let mut p = Placeholders::default();
    let query = Query::index("SONG#123").begins_with("USER#");
    let expr = key_condition(&query, &mut p);
    assert_eq!(expr, "#n0 = :v0 AND begins_with(#n1, :v1)");
    assert_eq!(p.names.get("#n0").map(String::as_str), Some("gsi_pk"));
}
