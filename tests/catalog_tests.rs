mod support;

use pretty_assertions::assert_eq;
use serde_json::json;

use chainlab::api::{ApiError, ChainBackend, ModelCatalog};
use chainlab::models::StepEdit;
use chainlab::session::{ChainSession, SessionError};
use support::*;

#[tokio::test]
async fn test_model_catalog_feeds_step_edits() {
    let backend = FakeBackend::new();
    backend.state().models = serde_json::from_value::<ModelCatalog>(json!({
        "openai": ["gpt-4o-mini"],
        "anthropic": ["claude-sonnet-4"]
    }))
    .unwrap();

    let catalog = backend.get_models().await.unwrap();
    let selections = catalog.selections();
    assert_eq!(selections, vec!["openai:gpt-4o-mini", "anthropic:claude-sonnet-4"]);

    let edit = StepEdit::from_selection("hi", "anthropic", &selections[1]);
    assert!(catalog.contains(&edit.provider, &edit.model));
}

#[tokio::test]
async fn test_chain_listing_groups_versions() {
    let backend = FakeBackend::new();
    let mut rated = step("a", json!("x"));
    rated.rating = Some(rating(7));
    backend.state().versions = vec![
        saved_version("trace-1", "trace-1_initial", "2025-01-01 00:00:00", vec![step("a", json!("x"))]),
        saved_version("trace-1", "trace-1_100", "2025-01-03 00:00:00", vec![rated]),
        saved_version("trace-2", "trace-2_initial", "2025-01-02 00:00:00", vec![]),
    ];

    let chains = backend.get_chains().await.unwrap();
    let ids: Vec<&str> = chains.iter().map(|c| c.trace_id.as_str()).collect();
    assert_eq!(ids, vec!["trace-1", "trace-2"]);
    assert_eq!(chains[0].version_count, 2);
    assert_eq!(chains[0].max_rating, Some(7));
    assert_eq!(chains[0].last_updated.as_deref(), Some("2025-01-03 00:00:00"));
    assert_eq!(chains[1].max_rating, None);
}

#[tokio::test]
async fn test_delete_saved_versions_keeps_working_copy() {
    let backend = FakeBackend::with_live(live_chain("trace-1", vec![step("live", json!("x"))]));
    backend.state().versions = vec![saved_version(
        "trace-1",
        "trace-1_initial",
        "2025-01-01 00:00:00",
        vec![step("saved", json!("s"))],
    )];
    let mut session = ChainSession::new(backend);
    session.load("trace-1").await.unwrap();
    session.load_version("trace-1_initial").unwrap();

    session.delete_saved_versions().await.unwrap();
    assert!(session.versions().is_empty());
    assert_eq!(session.selected_version(), None);
    assert_eq!(session.chain().unwrap().steps[0].user_prompt, "saved");
    assert_eq!(session.backend().state().deleted, vec!["trace-1".to_string()]);

    let err = session.delete_saved_versions().await.unwrap_err();
    assert!(matches!(err, SessionError::Api(ApiError::Api { status: 404, .. })));
}
