use std::io::Write;

use aiden_core::config::AppConfig;
use aiden_core::types::{PhaseType, TaskType};

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
default_model = "small"

[storage]
database = "/tmp/aiden-test/aiden.db"
checkpoints = "/tmp/aiden-test/checkpoints.db"

[pipeline]
max_revisions = 3
dev_request_doc_type = "request"

[pipeline.agents]
analysis = "ryan"
design = "dana"

[events]
capacity = 64
log_dir = "/tmp/aiden-test/events"

[retrieval]
document_top_k = 20
top_k_per_query = 3
chunk_size = 500

[hitl]
review_deadline_hours = 48

[models.small]
model_id = "gpt-4o-mini"
api_key = "sk-test-key"

[models.large]
provider = "openrouter"
model_id = "anthropic/claude-sonnet"
base_url = "https://openrouter.ai/api/v1"
max_tokens = 8192
temperature = 0.2

[models.large.retry]
max_retries = 5

[task_models]
document_generation = "large"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(
        config.database_path(),
        std::path::PathBuf::from("/tmp/aiden-test/aiden.db")
    );
    assert_eq!(config.pipeline.max_revisions, Some(3));
    assert_eq!(config.pipeline.dev_request_doc_type, "request");
    let agents = config.pipeline.phase_agents().expect("phase agents");
    assert_eq!(agents[&PhaseType::Design], "dana");
    assert!(!agents.contains_key(&PhaseType::Testing));

    assert_eq!(config.events.capacity, 64);
    assert_eq!(
        config.event_log_dir(),
        Some(std::path::PathBuf::from("/tmp/aiden-test/events"))
    );
    assert_eq!(config.retrieval.chunk_size, 500);
    assert_eq!(config.hitl.review_deadline_hours, Some(48));

    let large = &config.models["large"];
    assert_eq!(large.provider, "openrouter");
    assert_eq!(large.max_tokens, 8192);
    assert_eq!(large.retry.as_ref().map(|r| r.max_retries), Some(5));
    assert_eq!(config.models["small"].provider, "openai");

    assert_eq!(config.model_key_for_task(TaskType::DocumentGeneration), Some("large"));
    assert_eq!(config.model_key_for_task(TaskType::RequirementExtraction), Some("small"));
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("AIDEN_TEST_API_KEY", "expanded-key-value");

    let toml_content = r#"
[models.main]
model_id = "test-model"
api_key = "${AIDEN_TEST_API_KEY}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(
        config.models["main"].api_key,
        Some("expanded-key-value".to_string())
    );

    std::env::remove_var("AIDEN_TEST_API_KEY");
}

#[test]
fn test_empty_config_uses_defaults() {
    let config = AppConfig::parse("").expect("parse empty config");

    assert_eq!(config.pipeline.agents.get("analysis").map(String::as_str), Some("ryan"));
    assert_eq!(config.pipeline.max_revisions, None);
    assert_eq!(config.pipeline.dev_request_doc_type, "dev_request");
    assert_eq!(config.events.capacity, 256);
    assert!(config.event_log_dir().is_none());
    assert_eq!(config.retrieval.document_top_k, 50);
    assert_eq!(config.retrieval.top_k_per_query, 5);
    assert_eq!(config.retrieval.chunk_size, 1000);
    assert!(config.hitl.review_deadline_hours.is_none());
    assert!(config.models.is_empty());
    assert!(config.model_key_for_task(TaskType::Summarization).is_none());
}

#[test]
fn test_unknown_phase_in_agent_table_is_rejected() {
    let toml_content = r#"
[pipeline.agents]
deployment = "ops"
"#;
    let err = AppConfig::parse(toml_content).unwrap_err();
    assert!(err.to_string().contains("deployment"));
}

#[test]
fn test_missing_file_reports_config_not_found() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = AppConfig::load(&dir.path().join("nope.toml")).unwrap_err();
    assert!(err.to_string().contains("nope.toml"));
}

#[test]
fn test_config_round_trips_through_toml() {
    let config = AppConfig::parse(
        r#"
[pipeline]
max_revisions = 2
"#,
    )
    .expect("parse");
    let rendered = toml::to_string_pretty(&config).expect("render");
    let reparsed = AppConfig::parse(&rendered).expect("reparse");
    assert_eq!(reparsed.pipeline.max_revisions, Some(2));
    assert_eq!(reparsed.storage.database, config.storage.database);
}
