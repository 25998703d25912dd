use std::sync::Arc;

use chrono::Utc;

use notesync_common::{Note, SourceMode, SyncConfig, SyncError, WebSourceConfig};

use crate::store::{LocalStore, SyncStore};
use crate::summarize::Summarizer;
use crate::sync::{NoteSource, SyncEngine};
use crate::testing::{
    batch, engine_with, live_sync_config, note, test_sync_config, video_note, FixedAudioFetcher,
    MockSource, ScriptedSummarizer, StaticTranscriber,
};

fn store() -> Arc<LocalStore> {
    Arc::new(LocalStore::in_memory())
}

#[tokio::test]
async fn report_counts_are_consistent() {
    let source = Arc::new(MockSource::new().page(batch("", &["a", "b", "c"], "")));
    let engine = engine_with(Arc::clone(&source), store(), test_sync_config());

    let report = engine.sync(10, false).await.unwrap();
    assert_eq!(report.fetched, report.new + report.skipped + report.failed);
    assert_eq!(report.new, 3);
    assert_eq!(report.failed, 0);
    assert!(!report.circuit_opened);
}

#[tokio::test]
async fn second_run_skips_everything() {
    let source = Arc::new(MockSource::new().page(batch("", &["a", "b"], "")));
    let store = store();
    let engine = engine_with(Arc::clone(&source), Arc::clone(&store), test_sync_config());

    let first = engine.sync(10, false).await.unwrap();
    assert_eq!(first.new, 2);

    let second = engine.sync(10, false).await.unwrap();
    assert_eq!(second.new, 0);
    assert_eq!(second.skipped, second.fetched);
    assert_eq!(second.skipped, 2);
}

#[tokio::test]
async fn skipped_items_do_not_consume_the_limit() {
    let source = Arc::new(MockSource::new().page(batch("", &["w1", "w2", "w3", "w4", "w5"], "")));
    let store = store();
    store.mark_synced(&note("w1")).await.unwrap();
    store.mark_synced(&note("w2")).await.unwrap();
    let engine = engine_with(Arc::clone(&source), Arc::clone(&store), test_sync_config());

    let report = engine.sync(2, false).await.unwrap();
    assert_eq!(report.skipped, 2);
    assert_eq!(report.new, 2);
    // w5 is never reached once the budget is met.
    assert_eq!(report.fetched, 4);
    assert!(store.is_synced("w3").await.unwrap());
    assert!(store.is_synced("w4").await.unwrap());
    assert!(!store.is_synced("w5").await.unwrap());
}

#[tokio::test]
async fn circuit_opens_after_consecutive_failures() {
    let source = Arc::new(MockSource::new().page(batch("", &["a", "b", "c"], "")));
    let store = store();
    let summarizer = ScriptedSummarizer::new().fail_on("a").fail_on("b");
    let cfg = SyncConfig {
        circuit_breaker_threshold: 2,
        ..test_sync_config()
    };
    let engine = SyncEngine::new(
        Arc::clone(&source) as Arc<dyn NoteSource>,
        Arc::clone(&store) as Arc<dyn SyncStore>,
        Arc::new(summarizer),
        WebSourceConfig::default(),
        cfg,
    );

    let err = engine.sync(10, false).await.unwrap_err();
    match err {
        SyncError::CircuitOpen { failures, partial } => {
            assert_eq!(failures, 2);
            assert_eq!(partial.failed, 2);
            assert_eq!(partial.new, 0);
            assert!(partial.circuit_opened);
        }
        other => panic!("expected circuit open, got {other:?}"),
    }
    assert!(!store.is_synced("a").await.unwrap());
    assert!(!store.is_synced("b").await.unwrap());
    // c was never attempted.
    assert!(!store.is_synced("c").await.unwrap());
}

#[tokio::test]
async fn one_failure_does_not_open_the_circuit() {
    let source = Arc::new(MockSource::new().page(batch("", &["a", "b"], "")));
    let store = store();
    let engine = SyncEngine::new(
        Arc::clone(&source) as Arc<dyn NoteSource>,
        Arc::clone(&store) as Arc<dyn SyncStore>,
        Arc::new(ScriptedSummarizer::new().fail_on("a")),
        WebSourceConfig::default(),
        test_sync_config(),
    );

    let report = engine.sync(10, false).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.new, 1);
    assert!(store.is_synced("b").await.unwrap());
}

#[tokio::test]
async fn stale_fingerprint_restarts_from_head() {
    let source = Arc::new(
        MockSource::new()
            .page(batch("", &["a"], "h2"))
            .page(batch("h2", &["b"], "h3"))
            .page(batch("h3", &["c"], "")),
    );
    let store = store();
    store.set_cursor("stale", "some-old-fingerprint").await.unwrap();
    let engine = engine_with(Arc::clone(&source), Arc::clone(&store), live_sync_config());

    let report = engine.sync(10, true).await.unwrap();
    assert_eq!(report.new, 3);
    let calls = source.calls();
    assert!(!calls.contains(&"stale".to_string()), "calls: {calls:?}");
    assert_eq!(calls, vec!["", "h2", "h3"]);
}

#[tokio::test]
async fn trusted_cursor_resumes_after_head_scan() {
    let source = Arc::new(
        MockSource::new()
            .page(batch("", &["a"], "h2"))
            .page(batch("h2", &["b"], "h3"))
            .page(batch("stored", &["x"], "")),
    );
    let store = store();
    let fingerprint = WebSourceConfig::default().fingerprint();
    store.set_cursor("stored", &fingerprint).await.unwrap();
    let engine = engine_with(Arc::clone(&source), Arc::clone(&store), live_sync_config());

    let report = engine.sync(10, true).await.unwrap();
    assert_eq!(report.new, 3);
    assert_eq!(source.calls(), vec!["", "h2", "stored"]);
}

#[tokio::test]
async fn rejected_stored_cursor_falls_back_to_head_continuation() {
    let source = Arc::new(
        MockSource::new()
            .page(batch("", &["a"], "h2"))
            .page(batch("h2", &["b"], "h3"))
            .page(batch("h3", &["c"], ""))
            .fail_on("stored"),
    );
    let store = store();
    let fingerprint = WebSourceConfig::default().fingerprint();
    store.set_cursor("stored", &fingerprint).await.unwrap();
    let engine = engine_with(Arc::clone(&source), Arc::clone(&store), live_sync_config());

    let report = engine.sync(10, true).await.unwrap();
    assert_eq!(report.new, 3);
    assert_eq!(source.calls(), vec!["", "h2", "stored", "h3"]);
}

#[tokio::test]
async fn page_fetch_error_outside_fallback_propagates() {
    let source = Arc::new(
        MockSource::new()
            .page(batch("", &["a"], "h2"))
            .fail_on("h2"),
    );
    let engine = engine_with(Arc::clone(&source), store(), test_sync_config());

    let err = engine.sync(10, false).await.unwrap_err();
    assert!(matches!(err, SyncError::Upstream(_)));
}

#[tokio::test]
async fn empty_feed_is_an_upstream_error() {
    let source = Arc::new(MockSource::new().page(batch("", &[], "")));
    let store = store();
    let engine = engine_with(Arc::clone(&source), Arc::clone(&store), live_sync_config());

    let err = engine.sync(5, true).await.unwrap_err();
    assert!(matches!(err, SyncError::Upstream(_)));
    // The failed run must not arm the cooldown or persist a cursor.
    assert!(store.last_live_sync().await.unwrap().is_none());
    assert!(store.cursor().await.unwrap().is_none());
}

#[tokio::test]
async fn later_empty_page_ends_the_run_normally() {
    let source = Arc::new(
        MockSource::new()
            .page(batch("", &["a"], "h2"))
            .page(batch("h2", &[], "")),
    );
    let engine = engine_with(Arc::clone(&source), store(), test_sync_config());

    let report = engine.sync(5, false).await.unwrap();
    assert_eq!(report.new, 1);
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn pending_count_fails_on_empty_feed() {
    let source = Arc::new(MockSource::new().page(batch("", &[], "")));
    let engine = engine_with(Arc::clone(&source), store(), test_sync_config());

    let err = engine.pending_count().await.unwrap_err();
    assert!(matches!(err, SyncError::Upstream(_)));
}

#[tokio::test]
async fn zero_limit_is_rejected() {
    let source = Arc::new(MockSource::new());
    let engine = engine_with(Arc::clone(&source), store(), test_sync_config());

    let err = engine.sync(0, false).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidInput(_)));
    assert!(source.calls().is_empty());
}

#[tokio::test]
async fn live_mode_requires_confirmation() {
    let source = Arc::new(MockSource::new().page(batch("", &["a"], "")));
    let engine = engine_with(Arc::clone(&source), store(), live_sync_config());

    let err = engine.sync(1, false).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidInput(_)));
    assert!(source.calls().is_empty());
}

#[tokio::test]
async fn cooldown_blocks_back_to_back_live_runs() {
    let source = Arc::new(MockSource::new().page(batch("", &["a"], "")));
    let store = store();
    store.set_last_live_sync(Utc::now()).await.unwrap();
    let cfg = SyncConfig {
        min_live_sync_interval_seconds: 300,
        ..live_sync_config()
    };
    let engine = engine_with(Arc::clone(&source), Arc::clone(&store), cfg);

    let err = engine.sync(1, true).await.unwrap_err();
    match err {
        SyncError::RateLimited {
            retry_after_secs, ..
        } => assert!(retry_after_secs.unwrap() > 0),
        other => panic!("expected rate limited, got {other:?}"),
    }
    assert!(source.calls().is_empty());
}

#[tokio::test]
async fn cooldown_reports_remaining_seconds() {
    let store = store();
    store
        .set_last_live_sync(Utc::now() - chrono::Duration::seconds(247))
        .await
        .unwrap();
    let cfg = SyncConfig {
        mode: SourceMode::Live,
        min_live_sync_interval_seconds: 300,
        ..test_sync_config()
    };
    let engine = engine_with(Arc::new(MockSource::new()), store, cfg);

    let cooldown = engine.live_sync_cooldown().await.unwrap();
    assert!(!cooldown.allowed);
    assert!(
        (50..=53).contains(&cooldown.remaining_seconds),
        "remaining {}",
        cooldown.remaining_seconds
    );
    assert_eq!(cooldown.min_interval_seconds, 300);
    assert!(cooldown.last_sync_at.is_some());
}

#[tokio::test]
async fn pending_count_is_read_only() {
    let source = Arc::new(
        MockSource::new()
            .page(batch("", &["a", "b"], "h2"))
            .page(batch("h2", &["c"], "")),
    );
    let store = store();
    store.mark_synced(&note("a")).await.unwrap();
    let engine = engine_with(Arc::clone(&source), Arc::clone(&store), test_sync_config());

    let count = engine.pending_count().await.unwrap();
    assert_eq!(count.scanned, 3);
    assert_eq!(count.pending, 2);
    // Counting never marks anything.
    assert!(!store.is_synced("b").await.unwrap());
    assert!(!store.is_synced("c").await.unwrap());
}

#[tokio::test]
async fn cursor_persists_after_live_run() {
    let source = Arc::new(
        MockSource::new()
            .page(batch("", &["a"], "h2"))
            .page(batch("h2", &["b"], "")),
    );
    let store = store();
    let engine = engine_with(Arc::clone(&source), Arc::clone(&store), live_sync_config());

    engine.sync(10, true).await.unwrap();
    let (cursor, fingerprint) = store.cursor().await.unwrap().unwrap();
    assert_eq!(cursor, "h2");
    assert_eq!(fingerprint, WebSourceConfig::default().fingerprint());
    assert!(store.last_live_sync().await.unwrap().is_some());
}

#[tokio::test]
async fn mock_runs_leave_cursor_state_untouched() {
    let source = Arc::new(MockSource::new().page(batch("", &["a"], "")));
    let store = store();
    let engine = engine_with(Arc::clone(&source), Arc::clone(&store), test_sync_config());

    engine.sync(10, false).await.unwrap();
    assert!(store.cursor().await.unwrap().is_none());
    assert!(store.last_live_sync().await.unwrap().is_none());
}

#[tokio::test]
async fn fetch_one_summarizes_and_marks_synced() {
    let url = "https://platform.example/notes/a";
    let source = Arc::new(MockSource::new().note(url, note("a")));
    let store = store();
    let engine = engine_with(Arc::clone(&source), Arc::clone(&store), test_sync_config());

    let summary = engine.fetch_one(url).await.unwrap();
    assert_eq!(summary.id, "a");
    assert!(summary.markdown.contains("Note a"));
    assert!(store.is_synced("a").await.unwrap());
}

#[tokio::test]
async fn fetch_one_appends_view_original_link() {
    let url = "https://platform.example/notes/a";
    let source = Arc::new(MockSource::new().note(url, note("a")));
    let engine = engine_with(Arc::clone(&source), store(), test_sync_config());

    let summary = engine.fetch_one(url).await.unwrap();
    assert!(summary
        .markdown
        .contains("[View original](https://platform.example/notes/a)"));
}

#[tokio::test]
async fn view_original_link_is_not_duplicated() {
    struct LinkingSummarizer;

    #[async_trait::async_trait]
    impl Summarizer for LinkingSummarizer {
        async fn summarize(&self, note: &Note) -> anyhow::Result<String> {
            Ok(format!("## {}\n\nSource: {}", note.title, note.source_url))
        }

        async fn summarize_video(&self, note: &Note, _t: &str) -> anyhow::Result<String> {
            Ok(format!("## {}\n\nSource: {}", note.title, note.source_url))
        }
    }

    let url = "https://platform.example/notes/a";
    let source = Arc::new(MockSource::new().note(url, note("a")));
    let engine = SyncEngine::new(
        Arc::clone(&source) as Arc<dyn NoteSource>,
        store(),
        Arc::new(LinkingSummarizer),
        WebSourceConfig::default(),
        test_sync_config(),
    );

    let summary = engine.fetch_one(url).await.unwrap();
    assert_eq!(summary.markdown.matches(url).count(), 1);
    assert!(!summary.markdown.contains("[View original]"));
}

#[tokio::test]
async fn video_notes_require_transcription_collaborators() {
    let url = "https://platform.example/notes/v1";
    let source = Arc::new(MockSource::new().note(url, video_note("v1")));
    let store = store();
    let engine = engine_with(Arc::clone(&source), Arc::clone(&store), test_sync_config());

    // Without a transcriber wired in, the video path fails per item.
    assert!(engine.fetch_one(url).await.is_err());
    assert!(!store.is_synced("v1").await.unwrap());
}

#[tokio::test]
async fn empty_transcript_fails_the_video_note() {
    let url = "https://platform.example/notes/v1";
    let source = Arc::new(MockSource::new().note(url, video_note("v1")));
    let engine = engine_with(Arc::clone(&source), store(), test_sync_config())
        .with_transcription(
            Arc::new(StaticTranscriber("   ".to_string())),
            Arc::new(FixedAudioFetcher("/tmp/v1.mp3".into())),
        );

    assert!(engine.fetch_one(url).await.is_err());
}

#[tokio::test]
async fn video_notes_are_summarized_from_transcript() {
    let url = "https://platform.example/notes/v1";
    let source = Arc::new(MockSource::new().note(url, video_note("v1")));
    let store = store();
    let engine = engine_with(Arc::clone(&source), Arc::clone(&store), test_sync_config())
        .with_transcription(
            Arc::new(StaticTranscriber("spoken words".to_string())),
            Arc::new(FixedAudioFetcher("/tmp/v1.mp3".into())),
        );

    let summary = engine.fetch_one(url).await.unwrap();
    assert!(summary.is_video);
    assert!(summary.markdown.contains("spoken words"));
}
