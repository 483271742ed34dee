//! Widget lifecycle tests.
//!
//! Whole widget lifecycles driven through the in-memory harness: cached
//! render, network reconciliation, failures, telemetry and teardown.

use expwidget_core::testing::{Harness, SurfaceEvent};
use expwidget_core::{
    AnonId, CacheKey, CreativeId, ElementId, InstallError, InstanceSlot, KeyValueStore,
    MemoryStore, Phase, Thumbnail, TransportError, WidgetConfig, TOAST_MESSAGE,
};
use serde_json::{json, Value};
use std::time::Duration;

const NOW: u64 = 1_700_000_000_000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn harness() -> Harness {
    init_tracing();
    Harness::new(NOW)
}

fn config() -> WidgetConfig {
    WidgetConfig::new("https://api.example.com/", "exp_same").unwrap()
}

fn cache_key(h: &Harness, config: &WidgetConfig) -> CacheKey {
    let anon = AnonId::load_or_create(&h.store, &h.clock);
    CacheKey::derive(config.experiment_id(), anon.as_str())
}

fn seed(h: &Harness, config: &WidgetConfig, data: Value, age_ms: u64) {
    let key = cache_key(h, config);
    h.store
        .set(key.as_str(), &json!({"data": data, "ts": NOW - age_ms}).to_string())
        .unwrap();
}

fn stored(h: &Harness, config: &WidgetConfig) -> Option<Value> {
    let key = cache_key(h, config);
    h.store
        .get(key.as_str())
        .map(|raw| serde_json::from_str(&raw).unwrap())
}

fn unavailable() -> TransportError {
    TransportError::Status {
        status: 503,
        status_text: "Service Unavailable".into(),
    }
}

// =============================================================================
// Reconciliation scenarios
// =============================================================================

#[test]
fn test_cached_render_then_network_replaces_it() {
    let mut h = harness();
    let c = config();
    seed(&h, &c, json!({"creative_id": 1, "title": "Cached Title"}), 1_000);
    let reply = h.transport.defer();

    let widget = h.widget(c.clone());
    widget.start();
    h.run();

    assert_eq!(h.surface.titles(), vec!["Cached Title"]);
    assert_eq!(widget.phase(), Phase::ShowingCached);
    assert!(h.surface.statuses().is_empty());

    reply
        .send(Ok(json!({"creative_id": 2, "title": "Network Title"})))
        .unwrap();
    h.run();

    assert_eq!(h.surface.titles(), vec!["Cached Title", "Network Title"]);
    assert_eq!(widget.phase(), Phase::ReconciledChanged);
    assert_eq!(stored(&h, &c).unwrap()["data"]["creative_id"], json!(2));
}

#[test]
fn test_same_creative_keeps_cached_render_and_refreshes_ts() {
    let mut h = harness();
    let c = config();
    seed(&h, &c, json!({"creative_id": "100", "title": "Cached"}), 60_000);
    h.transport
        .reply(Ok(json!({"creative_id": "100", "title": "Server Title"})));

    let widget = h.widget(c.clone());
    widget.start();
    h.run();

    assert_eq!(h.surface.titles(), vec!["Cached"]);
    assert_eq!(h.surface.current_title().as_deref(), Some("Cached"));
    assert_eq!(widget.phase(), Phase::ReconciledNoChange);

    let entry = stored(&h, &c).unwrap();
    assert_eq!(entry["data"]["creative_id"], json!("100"));
    assert!(entry["ts"].as_u64().unwrap() > NOW - 60_000);
}

#[test]
fn test_different_string_ids_replace_cache() {
    let mut h = harness();
    let c = config();
    seed(&h, &c, json!({"creative_id": "a", "title": "Old"}), 60_000);
    h.transport
        .reply(Ok(json!({"creative_id": "b", "title": "Fresh"})));

    let widget = h.widget(c.clone());
    widget.start();
    h.run();

    assert_eq!(h.surface.current_title().as_deref(), Some("Fresh"));
    assert_eq!(stored(&h, &c).unwrap()["data"]["creative_id"], json!("b"));
    assert_eq!(
        widget.current_creative().map(|c| c.id),
        Some(CreativeId::parse("b"))
    );
}

#[test]
fn test_stale_cache_shows_status_then_overwrites() {
    let mut h = harness();
    let c = config().with_cache_ttl(Duration::from_secs(10));
    seed(&h, &c, json!({"creative_id": 1, "title": "Old"}), 60_000);
    h.transport.reply(Ok(json!({"creative_id": 2, "title": "New"})));

    let widget = h.widget(c.clone());
    widget.start();
    h.run();

    assert_eq!(h.surface.statuses(), vec!["Assigning..."]);
    assert_eq!(h.surface.titles(), vec!["New"]);
    let entry = stored(&h, &c).unwrap();
    assert_eq!(entry["data"]["creative_id"], json!(2));
    assert_eq!(entry["ts"], json!(NOW));
}

#[test]
fn test_cached_creative_survives_network_failure() {
    let mut h = harness();
    let c = config();
    seed(&h, &c, json!({"creative_id": 1, "title": "Cached Title"}), 1_000);
    h.transport.reply(Err(unavailable()));

    let widget = h.widget(c);
    widget.start();
    h.run();

    assert_eq!(h.surface.titles(), vec!["Cached Title"]);
    assert!(h.surface.statuses().is_empty());
    assert_eq!(widget.phase(), Phase::FailedWithStaleFallback);
}

#[test]
fn test_network_failure_without_cache_shows_error() {
    let mut h = harness();
    h.transport.reply(Err(unavailable()));

    let widget = h.widget(config());
    widget.start();
    h.run();

    assert_eq!(h.surface.render_count(), 0);
    assert_eq!(
        h.surface.status().as_deref(),
        Some("Assignment error: API request failed: 503 Service Unavailable")
    );
    assert!(widget.current_creative().is_none());
    assert_eq!(widget.phase(), Phase::FailedNoFallback);
}

#[test]
fn test_envelope_message_shown() {
    let mut h = harness();
    h.transport
        .reply(Ok(json!({"code": 40401, "message": "experiment paused"})));

    let widget = h.widget(config());
    widget.start();
    h.run();

    assert_eq!(h.surface.status().as_deref(), Some("experiment paused"));
    assert_eq!(widget.phase(), Phase::NoCreative);
}

#[test]
fn test_request_path_uses_anon_id() {
    let mut h = harness();
    h.transport.reply(Ok(json!({"code": 0})));

    let widget = h.widget(config());
    widget.start();
    h.run();

    let expected = format!(
        "/experiments/exp_same/assign?user_key={}",
        widget.anon_id().as_str()
    );
    assert_eq!(h.transport.gets(), vec![expected]);
    assert_eq!(h.surface.status().as_deref(), Some("No creative assigned"));
}

#[test]
fn test_assignment_runs_once() {
    let mut h = harness();
    h.transport.reply(Ok(json!({"creative_id": 1})));

    let widget = h.widget(config());
    widget.start();
    widget.start();
    h.run();

    assert_eq!(h.transport.gets().len(), 1);
    assert_eq!(h.surface.render_count(), 1);
}

#[test]
fn test_random_assignment_bypasses_cache() {
    let mut h = harness();
    let c = config().with_random_assignment(true);
    seed(&h, &c, json!({"creative_id": 1, "title": "Cached"}), 0);
    h.transport.reply(Ok(json!({"creative_id": 9, "title": "Random"})));

    let widget = h.widget(c.clone());
    widget.start();
    h.run();

    assert_eq!(h.surface.titles(), vec!["Random"]);
    let gets = h.transport.gets();
    assert!(gets[0].contains(&format!("user_key=random_{NOW}_")), "{gets:?}");
    assert_eq!(stored(&h, &c).unwrap()["data"]["creative_id"], json!(1));
}

#[test]
fn test_storage_quota_degrades_gracefully() {
    let mut h = harness();
    h.store = MemoryStore::with_quota(0);
    h.transport.reply(Ok(json!({"creative_id": 4, "title": "Uncached"})));

    let widget = h.widget(config());
    widget.start();
    h.run();

    assert_eq!(h.surface.titles(), vec!["Uncached"]);
    assert!(widget.anon_id().as_str().starts_with("anon_"));
    assert!(h.store.is_empty());
}

// =============================================================================
// Impressions
// =============================================================================

#[test]
fn test_impression_after_dwell_sent_once() {
    let mut h = harness();
    h.transport.reply(Ok(json!({"creative_id": "7"})));

    let widget = h.widget(config());
    widget.start();
    h.run();

    assert!(h.observer.emit(ElementId(1), 0.8));
    h.advance(499);
    assert!(h.transport.posts().is_empty());
    h.advance(1);
    assert_eq!(
        h.transport.posts(),
        vec![("/experiments/exp_same/hit".to_string(), json!({"creative_id": 7}))]
    );

    h.observer.emit(ElementId(1), 0.0);
    h.observer.emit(ElementId(1), 1.0);
    h.advance(1_000);
    assert_eq!(h.transport.posts().len(), 1);
    assert!(widget.tracker().has_sent(&CreativeId::from(7i64)));
}

#[test]
fn test_cached_and_network_creatives_each_counted() {
    let mut h = harness();
    let c = config();
    seed(&h, &c, json!({"creative_id": 1}), 0);
    let reply = h.transport.defer();

    let widget = h.widget(c);
    widget.start();
    h.run();
    h.observer.emit(ElementId(1), 1.0);
    h.advance(500);

    reply.send(Ok(json!({"creative_id": 2}))).unwrap();
    h.run();
    h.observer.emit(ElementId(2), 1.0);
    h.advance(500);

    let ids: Vec<Value> = h
        .transport
        .posts()
        .into_iter()
        .map(|(_, body)| body["creative_id"].clone())
        .collect();
    assert_eq!(ids, vec![json!(1), json!(2)]);
    assert_eq!(widget.tracker().sent_count(), 2);
}

#[test]
fn test_impression_failure_is_not_retried() {
    let mut h = harness();
    h.transport.fail_posts(unavailable());
    h.transport.reply(Ok(json!({"creative_id": 3})));

    let widget = h.widget(config());
    widget.start();
    h.run();
    h.observer.emit(ElementId(1), 1.0);
    h.advance(500);
    h.advance(10_000);

    assert_eq!(h.transport.posts().len(), 1);
    assert!(!widget.is_destroyed());
}

// =============================================================================
// Clicks, toast and panel
// =============================================================================

#[test]
fn test_click_reports_and_toasts() {
    let mut h = harness();
    h.transport.reply(Ok(json!({"creative_id": "100"})));

    let widget = h.widget(config());
    widget.start();
    h.run();

    assert!(widget.handle_card_click());
    assert_eq!(
        h.transport.beacons(),
        vec![("/experiments/exp_same/click".to_string(), json!({"creative_id": 100}))]
    );
    assert_eq!(h.surface.toast().as_deref(), Some(TOAST_MESSAGE));

    h.advance(1_000);
    assert!(widget.handle_card_click());
    h.advance(1_000);
    assert_eq!(h.surface.toast().as_deref(), Some(TOAST_MESSAGE));
    h.advance(800);
    assert_eq!(h.surface.toast(), None);
    assert_eq!(h.transport.beacons().len(), 2);
}

#[test]
fn test_click_without_creative_ignored() {
    let mut h = harness();
    let _pending = h.transport.defer();

    let widget = h.widget(config());
    widget.start();
    h.run();

    assert!(!widget.handle_card_click());
    assert!(h.transport.beacons().is_empty());
    assert_eq!(h.surface.toast(), None);
}

#[test]
fn test_click_on_cached_creative_before_network() {
    let mut h = harness();
    let c = config();
    seed(&h, &c, json!({"creative_id": 1, "title": "Cached Title"}), 0);
    let reply = h.transport.defer();

    let widget = h.widget(c);
    widget.start();
    h.run();
    assert!(widget.handle_card_click());

    reply
        .send(Ok(json!({"creative_id": 2, "title": "Network Title"})))
        .unwrap();
    h.run();

    assert_eq!(h.transport.beacons()[0].1, json!({"creative_id": 1}));
    assert_eq!(h.surface.current_title().as_deref(), Some("Network Title"));
}

#[test]
fn test_panel_toggle() {
    let h = harness();
    let widget = h.widget(config());

    assert!(!widget.panel_open());
    assert!(widget.toggle_panel(None));
    assert!(h.surface.panel_open());
    assert!(widget.toggle_panel(Some(true)));
    assert!(!widget.toggle_panel(None));
    assert!(!h.surface.panel_open());
}

// =============================================================================
// Teardown
// =============================================================================

#[test]
fn test_destroy_during_fetch_touches_nothing() {
    let mut h = harness();
    let c = config();
    let reply = h.transport.defer();

    let widget = h.widget(c.clone());
    widget.start();
    h.run();
    widget.destroy();

    reply.send(Ok(json!({"creative_id": 2, "title": "Late"}))).unwrap();
    h.run();

    assert!(h.surface.titles().is_empty());
    assert!(stored(&h, &c).is_none());
    assert!(h.surface.is_unmounted());
    assert_eq!(widget.phase(), Phase::Assigning);
}

#[test]
fn test_destroy_during_dwell_cancels_impression() {
    let mut h = harness();
    h.transport.reply(Ok(json!({"creative_id": 5})));

    let widget = h.widget(config());
    widget.start();
    h.run();
    h.observer.emit(ElementId(1), 1.0);
    h.advance(200);

    widget.destroy();
    widget.destroy();
    h.advance(1_000);

    assert!(h.transport.posts().is_empty());
    assert_eq!(h.scheduler.pending(), 0);
    assert!(h.observer.is_disconnected());
    let unmounts = h
        .surface
        .events()
        .iter()
        .filter(|e| matches!(e, SurfaceEvent::Unmounted))
        .count();
    assert_eq!(unmounts, 1);
}

#[test]
fn test_destroy_cancels_toast() {
    let mut h = harness();
    h.transport.reply(Ok(json!({"creative_id": 5})));

    let widget = h.widget(config());
    widget.start();
    h.run();
    widget.handle_card_click();
    widget.destroy();
    h.advance(5_000);

    assert_eq!(h.surface.events().last(), Some(&SurfaceEvent::Unmounted));
    assert!(!widget.handle_card_click());
}

#[test]
fn test_single_instance_guard() {
    let h = harness();
    let slot = InstanceSlot::new();
    slot.install_with(|| Ok::<_, ()>(h.widget(config()))).unwrap();

    let second = slot.install_with(|| Ok::<_, ()>(h.widget(config())));
    assert!(matches!(second, Err(InstallError::AlreadyActive)));

    if let Some(widget) = slot.take() {
        widget.destroy();
    }
    assert!(!slot.is_active());
}

// =============================================================================
// Image cache
// =============================================================================

#[test]
fn test_image_prefetched_and_reused() {
    let mut h = harness();
    let c = config();
    let url = "https://cdn.example.com/shoe.png";
    h.transport.serve_image(url, "data:image/png;base64,c2hvZQ==");
    h.transport
        .reply(Ok(json!({"creative_id": 11, "title": "Shoe", "image_url": url})));

    let first = h.widget(c.clone());
    first.start();
    h.run();
    assert_eq!(h.transport.image_fetches(), vec![url.to_string()]);
    let image_key = cache_key(&h, &c).image_key(url);
    assert!(h.store.get(&image_key).is_some());
    first.destroy();

    h.transport
        .reply(Ok(json!({"creative_id": 11, "title": "Shoe", "image_url": url})));
    let second = h.widget(c);
    second.start();
    h.run();

    let thumbnails: Vec<Thumbnail> = h
        .surface
        .events()
        .into_iter()
        .filter_map(|e| match e {
            SurfaceEvent::Creative(view, _) => Some(view.thumbnail),
            _ => None,
        })
        .collect();
    assert_eq!(
        thumbnails,
        vec![
            Thumbnail::Image(url.to_string()),
            Thumbnail::Image("data:image/png;base64,c2hvZQ==".to_string()),
        ]
    );
    assert_eq!(h.transport.image_fetches().len(), 1);
    assert_eq!(second.phase(), Phase::ReconciledNoChange);
}

#[test]
fn test_image_fetch_failure_is_harmless() {
    let mut h = harness();
    h.transport.reply(Ok(
        json!({"creative_id": 12, "image_url": "https://cdn.example.com/missing.png"}),
    ));

    let widget = h.widget(config());
    widget.start();
    h.run();

    assert_eq!(h.transport.image_fetches().len(), 1);
    assert_eq!(widget.phase(), Phase::ReconciledChanged);
    assert_eq!(h.surface.render_count(), 1);
}
