use std::io::Write;

use arena_relay_engine::config::{EndOfInputPolicy, EngineConfig};

#[test]
fn test_load_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "server": {{ "listen": "0.0.0.0:9000", "password": "secret" }},
            "browser_less": {{ "enabled": true, "port": 8123 }},
            "models": {{ "my-model": "0000-1111" }},
            "decode": {{ "timeout_secs": 30, "end_of_input": "discard" }}
        }}"#
    )
    .unwrap();

    let config = EngineConfig::load(file.path()).unwrap();
    assert_eq!(config.server.listen, "0.0.0.0:9000");
    assert_eq!(config.server.password.as_deref(), Some("secret"));
    assert_eq!(
        config.browser_less.base_url().as_deref(),
        Some("http://127.0.0.1:8123")
    );
    assert_eq!(config.resolve_model_id("my-model"), "0000-1111");
    assert_eq!(config.model_names()[0], "my-model");
    assert_eq!(config.decode.timeout_secs, 30);
    assert_eq!(config.decode.end_of_input, EndOfInputPolicy::Discard);
    assert_eq!(config.backend.base_url, "https://lmarena.ai/nextjs-api");
}

#[test]
fn test_load_config_errors() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.json");
    let err = EngineConfig::load(&missing).unwrap_err();
    assert!(err.to_string().contains("failed to read config"));

    let bad = dir.path().join("bad.json");
    std::fs::write(&bad, "{ nope").unwrap();
    let err = EngineConfig::load(&bad).unwrap_err();
    assert!(err.to_string().contains("failed to parse config"));
}
