use scale_core::{ProtocolViolation, ScaleError, WeightReading};
use scale_io::protocol::WeightResponse;

#[test]
fn success_body_matches_wire_format() {
    let body = WeightResponse::from_outcome(&Ok(WeightReading::unstable(12.5)));
    let value: serde_json::Value = serde_json::from_slice(&body.to_json().unwrap()).unwrap();

    assert_eq!(
        value,
        serde_json::json!({
            "error": false,
            "weigth": 12.5,
            "unstable": true
        })
    );
    assert!(value.get("description").is_none());
}

#[test]
fn error_body_carries_description_and_zero_weight() {
    let outcome = Err(ScaleError::from(ProtocolViolation::FrameStartNotFound {
        scanned: 25,
    }));
    let body = WeightResponse::from_outcome(&outcome);
    let value: serde_json::Value = serde_json::from_slice(&body.to_json().unwrap()).unwrap();

    assert_eq!(value["error"], true);
    assert_eq!(value["weigth"], 0.0);
    assert_eq!(value["unstable"], false);
    assert!(value["description"]
        .as_str()
        .unwrap()
        .contains("frame start"));
}

#[test]
fn parses_body_produced_by_existing_clients() {
    let raw = r#"{"error":true,"description":"scale access closed","weigth":0,"unstable":false}"#;
    let body: WeightResponse = serde_json::from_str(raw).expect("body should parse");
    assert!(body.error);
    assert_eq!(body.description.as_deref(), Some("scale access closed"));
}
