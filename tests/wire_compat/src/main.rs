fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use glasslink_protocol::{
        Ack, ActionResponse, CaptureResult, ConversationMessage, DecodeError, MediaItem,
        NetworkInfo, NewTodo, Note, Personality, ProbeResponse, RecordRequest, Settings, Status,
        StatusMode, Todo, TodoPriority, Validate, decode_json,
    };

    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn read_fixture(name: &str) -> Vec<u8> {
        let path = fixtures_dir().join(name);
        fs::read(&path).unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    fn load_fixture(name: &str) -> serde_json::Value {
        serde_json::from_slice(&read_fixture(name))
            .unwrap_or_else(|e| panic!("failed to parse fixture {name}: {e}"))
    }

    /// Normalizes numbers so that `1` and `1.0` compare equal.
    ///
    /// The firmware's JSON encoder writes whole floats without a fraction.
    fn normalize_value(v: &serde_json::Value) -> serde_json::Value {
        match v {
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => serde_json::json!(f),
                None => v.clone(),
            },
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), normalize_value(v)))
                    .collect(),
            ),
            serde_json::Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(normalize_value).collect())
            }
            _ => v.clone(),
        }
    }

    /// Decodes a fixture through the validating boundary, re-serializes it
    /// and compares the JSON values.
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize + Validate,
    {
        let fixture = load_fixture(name);
        let parsed: T = decode_json(&read_fixture(name))
            .unwrap_or_else(|e| panic!("failed to decode {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            normalize_value(&fixture),
            normalize_value(&reserialized),
            "roundtrip mismatch for {name}:\n  device:    {fixture}\n  companion: {reserialized}"
        );
        parsed
    }

    /// Request bodies are only ever encoded; no boundary validation.
    fn request_roundtrip<T>(name: &str)
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed).unwrap();
        assert_eq!(normalize_value(&fixture), normalize_value(&reserialized));
    }

    // --- Data link responses ---

    #[test]
    fn fixture_status() {
        let status: Status = roundtrip_test("status.json");
        assert_eq!(status.mode, StatusMode::Active);
        assert_eq!(status.battery, 85);
    }

    #[test]
    fn fixture_settings() {
        let settings: Settings = roundtrip_test("settings.json");
        assert_eq!(settings.personality, Personality::Witty);
        let camera = settings.camera.unwrap();
        assert_eq!(camera.resolution.width, Some(1920));
        assert!(camera.flip_vertical);
    }

    #[test]
    fn fixture_settings_without_camera() {
        let settings: Settings = roundtrip_test("settings_minimal.json");
        assert!(settings.camera.is_none());
        assert_eq!(settings.voice.volume, 1.0);
    }

    #[test]
    fn fixture_media_list() {
        let items: Vec<MediaItem> = roundtrip_test("media_list.json");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].duration, None);
        assert_eq!(items[1].duration, Some(12.5));
    }

    #[test]
    fn fixture_notes() {
        let notes: Vec<Note> = roundtrip_test("notes.json");
        assert_eq!(notes[1].text, "Call the dentist");
    }

    #[test]
    fn fixture_todos() {
        let todos: Vec<Todo> = roundtrip_test("todos.json");
        assert_eq!(todos[0].priority, TodoPriority::High);
        assert!(todos[1].completed);
    }

    #[test]
    fn fixture_conversation() {
        let messages: Vec<ConversationMessage> = roundtrip_test("conversation.json");
        assert_eq!(messages[1].role, "assistant");
        assert!(messages[1].timestamp.is_none());
    }

    #[test]
    fn fixture_ack_keeps_extra_fields() {
        let ack: Ack = roundtrip_test("ack.json");
        assert_eq!(ack.extra["personality"], "witty");
    }

    #[test]
    fn fixture_probe() {
        let probe: ProbeResponse = roundtrip_test("probe.json");
        assert_eq!(probe.status, "ok");
    }

    #[test]
    fn fixture_capture_result() {
        let capture: CaptureResult = roundtrip_test("capture_result.json");
        assert!(capture.success);
    }

    // --- Control link payloads ---

    #[test]
    fn fixture_network_info() {
        let info: NetworkInfo = roundtrip_test("network_info.json");
        assert_eq!(info.address().unwrap().to_string(), "192.168.1.77");
    }

    #[test]
    fn fixture_action_response() {
        let response: ActionResponse = roundtrip_test("action_response.json");
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("Camera busy"));
    }

    // --- Request bodies ---

    #[test]
    fn fixture_new_todo() {
        request_roundtrip::<NewTodo>("new_todo.json");
    }

    #[test]
    fn fixture_record_request() {
        request_roundtrip::<RecordRequest>("record_request.json");
    }

    // --- Rejections ---

    #[test]
    fn status_with_impossible_battery_is_rejected() {
        let mut status = load_fixture("status.json");
        status["battery"] = serde_json::json!(140);
        let err = decode_json::<Status>(status.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidValue { field: "battery", .. }));
    }

    #[test]
    fn media_id_with_path_separator_is_rejected() {
        let mut items = load_fixture("media_list.json");
        items[0]["id"] = serde_json::json!("../secrets");
        assert!(decode_json::<Vec<MediaItem>>(items.to_string().as_bytes()).is_err());
    }

    #[test]
    fn unknown_personality_is_rejected() {
        let mut settings = load_fixture("settings.json");
        settings["personality"] = serde_json::json!("grumpy");
        let err = decode_json::<Settings>(settings.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }
}
