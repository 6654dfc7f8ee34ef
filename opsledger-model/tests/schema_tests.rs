use chrono::{Duration, TimeZone, Utc};
use opsledger_model::{
    Appointment, ChangeOp, EntitySchema, FieldSpec, FieldType, InventoryItem, SchemaRegistry,
    APPOINTMENT, INVENTORY_ITEM,
};
use serde_json::{json, Map};

fn registry() -> SchemaRegistry {
    SchemaRegistry::with_builtin()
}

#[test]
fn builtin_collections() {
    let r = registry();
    assert_eq!(r.collection_for(INVENTORY_ITEM), "inventory");
    assert_eq!(r.collection_for(APPOINTMENT), "appointments");
    assert_eq!(r.collection_for("course"), "course");
}

#[test]
fn valid_inventory_item_passes() {
    let item = InventoryItem::new("A1", "Widget", 10).with_price(2.5).with_low_stock_threshold(5);
    registry().validate(INVENTORY_ITEM, &item.to_data().unwrap()).unwrap();
}

#[test]
fn negative_quantity_is_rejected() {
    let err = registry()
        .validate(INVENTORY_ITEM, &json!({"sku": "A1", "name": "W", "quantity": -1}))
        .unwrap_err();
    assert!(err.to_string().contains("quantity"));
}

#[test]
fn missing_required_field_is_rejected() {
    let err = registry()
        .validate(INVENTORY_ITEM, &json!({"name": "W", "quantity": 1}))
        .unwrap_err();
    assert!(err.to_string().contains("sku"));
}

#[test]
fn wrong_type_is_rejected() {
    assert!(registry()
        .validate(INVENTORY_ITEM, &json!({"sku": "A1", "name": "W", "quantity": "ten"}))
        .is_err());
}

#[test]
fn non_object_payload_is_rejected_even_for_unknown_types() {
    assert!(registry().validate("course", &json!([1, 2])).is_err());
    registry().validate("course", &json!({"anything": true})).unwrap();
}

#[test]
fn adjust_below_zero_is_rejected() {
    let current = json!({"sku": "A1", "name": "W", "quantity": 3});
    let op = ChangeOp::Adjust { field: "quantity".into(), delta: -4.0 };
    assert!(registry().validate_op(INVENTORY_ITEM, Some(&current), &op).is_err());

    let op = ChangeOp::Adjust { field: "quantity".into(), delta: -3.0 };
    let next = registry().validate_op(INVENTORY_ITEM, Some(&current), &op).unwrap().unwrap();
    assert_eq!(next["quantity"], json!(0));
}

#[test]
fn adjust_beyond_integer_range_is_rejected_for_integer_fields() {
    let current = json!({"sku": "A1", "name": "W", "quantity": 0});
    let op = ChangeOp::Adjust { field: "quantity".into(), delta: 1e20 };
    assert!(registry().validate_op(INVENTORY_ITEM, Some(&current), &op).is_err());
}

#[test]
fn adjust_of_text_field_is_rejected() {
    let current = json!({"sku": "A1", "name": "W", "quantity": 3});
    let op = ChangeOp::Adjust { field: "name".into(), delta: 1.0 };
    assert!(registry().validate_op(INVENTORY_ITEM, Some(&current), &op).is_err());
}

#[test]
fn fractional_adjust_of_integer_field_is_rejected() {
    let current = json!({"sku": "A1", "name": "W", "quantity": 3});
    let op = ChangeOp::Adjust { field: "quantity".into(), delta: 0.5 };
    assert!(registry().validate_op(INVENTORY_ITEM, Some(&current), &op).is_err());
}

#[test]
fn empty_update_is_rejected() {
    let op = ChangeOp::SetFields { fields: Map::new() };
    assert!(registry().validate_op(INVENTORY_ITEM, Some(&json!({})), &op).is_err());
}

#[test]
fn appointment_must_end_after_start() {
    let start = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
    let bad = Appointment::new("Cut", "Ana", "staff-1", start, start - Duration::minutes(30));
    assert!(registry().validate(APPOINTMENT, &bad.to_data().unwrap()).is_err());

    let good = Appointment::new("Cut", "Ana", "staff-1", start, start + Duration::minutes(30));
    registry().validate(APPOINTMENT, &good.to_data().unwrap()).unwrap();
}

#[test]
fn appointment_status_must_be_known() {
    let start = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
    let mut data = Appointment::new("Cut", "Ana", "staff-1", start, start + Duration::hours(1))
        .to_data()
        .unwrap();
    data["status"] = json!("maybe");
    assert!(registry().validate(APPOINTMENT, &data).is_err());
}

#[test]
fn custom_schema_registration() {
    let mut r = SchemaRegistry::new();
    r.register(EntitySchema::new(
        "timesheet",
        "timesheets",
        vec![FieldSpec::number("hours").required().non_negative()],
    ));
    assert_eq!(r.collection_for("timesheet"), "timesheets");
    assert!(r.validate("timesheet", &json!({"hours": -2})).is_err());
    r.validate("timesheet", &json!({"hours": 7.5})).unwrap();

    let schema = r.schema("timesheet").unwrap();
    assert_eq!(schema.field("hours").unwrap().field_type, FieldType::Number);
}

#[test]
fn searchable_fields_listed() {
    let schema = InventoryItem::schema();
    let fields: Vec<&str> = schema.searchable_fields().collect();
    assert!(fields.contains(&"sku"));
    assert!(fields.contains(&"name"));
    assert!(!fields.contains(&"quantity"));
}
