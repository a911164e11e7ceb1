//! Audio engine integration tests
//!
//! Engines run on an offline mixer so that audio only advances when a test
//! renders it, or without a mixer where a timer clocks playback.

mod helpers;

use helpers::{offline_engine, render, test_config, ScriptedLoader};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use yaytsa_ap::audio::UnavailableBackend;
use yaytsa_ap::{AudioEngine, Error};
use yaytsa_common::{PlaybackState, PlayerEvent};

fn drain(rx: &mut tokio::sync::broadcast::Receiver<PlayerEvent>) -> Vec<PlayerEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => return events,
        }
    }
}

#[tokio::test]
async fn test_load_and_play() {
    let engine = offline_engine(Arc::new(ScriptedLoader::new().with_track("a", 3.0)));
    let mut rx = engine.subscribe();

    engine.load("a").await.unwrap();
    assert_eq!(engine.current_src().as_deref(), Some("a"));
    assert!((engine.duration() - 3.0).abs() < 1e-3);
    assert_eq!(engine.playback_state(), PlaybackState::Paused);

    engine.play().await.unwrap();
    assert!(engine.is_playing());

    let mixer = engine.mixer().unwrap();
    render(&mixer, 4_096);
    assert!(engine.current_time() > 0.4);
    assert!(engine.output_level() > 0.0);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let events = drain(&mut rx);
    assert!(events.contains(&PlayerEvent::LoadingStateChanged { loading: true }));
    assert!(events.contains(&PlayerEvent::LoadingStateChanged { loading: false }));
    assert!(events.contains(&PlayerEvent::PlaybackStateChanged {
        state: PlaybackState::Playing
    }));

    engine.dispose();
}

#[tokio::test]
async fn test_newer_load_supersedes_older() {
    let loader = Arc::new(ScriptedLoader::new().with_latency(Duration::from_millis(50)));
    let engine = offline_engine(loader);

    let (first, second) = tokio::join!(engine.load("first"), engine.load("second"));
    assert!(matches!(first, Err(Error::Cancelled)));
    second.unwrap();
    assert_eq!(engine.current_src().as_deref(), Some("second"));

    engine.dispose();
}

#[tokio::test]
async fn test_loading_same_url_is_a_no_op() {
    let loader = Arc::new(ScriptedLoader::new());
    let engine = offline_engine(Arc::clone(&loader));

    engine.load("a").await.unwrap();
    let mut rx = engine.subscribe();
    engine.load("a").await.unwrap();

    assert_eq!(loader.calls(), 1);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!drain(&mut rx)
        .iter()
        .any(|e| matches!(e, PlayerEvent::LoadingStateChanged { .. })));

    engine.dispose();
}

#[tokio::test]
async fn test_load_failure_reports_error() {
    let engine = offline_engine(Arc::new(ScriptedLoader::new()));
    let mut rx = engine.subscribe();

    let err = engine.load("fail.flac").await.unwrap_err();
    assert!(matches!(err, Error::Load(_)));

    tokio::time::sleep(Duration::from_millis(20)).await;
    let events = drain(&mut rx);
    assert!(events.contains(&PlayerEvent::LoadingStateChanged { loading: false }));

    engine.dispose();
}

#[tokio::test]
async fn test_volume_is_clamped() {
    let engine = offline_engine(Arc::new(ScriptedLoader::new()));

    engine.set_volume(1.5).unwrap();
    assert_eq!(engine.volume(), 1.0);
    engine.set_volume(-0.3).unwrap();
    assert_eq!(engine.volume(), 0.0);
    engine.set_volume(0.4).unwrap();
    assert!((engine.volume() - 0.4).abs() < 1e-6);

    engine.dispose();
}

#[tokio::test]
async fn test_seek_validation_and_clamp() {
    let engine = offline_engine(Arc::new(ScriptedLoader::new()));
    engine.load("a").await.unwrap();

    assert!(matches!(engine.seek(f64::NAN), Err(Error::InvalidPosition(_))));
    assert!(matches!(engine.seek(-1.0), Err(Error::InvalidPosition(_))));

    engine.seek(1.0).unwrap();
    assert!((engine.current_time() - 1.0).abs() < 1e-3);

    engine.seek(100.0).unwrap();
    assert!((engine.current_time() - engine.duration()).abs() < 1e-3);

    engine.dispose();
}

#[tokio::test(start_paused = true)]
async fn test_fade_volume_completes() {
    let engine = offline_engine(Arc::new(ScriptedLoader::new()));
    engine.set_volume(1.0).unwrap();

    let fade = engine.fade_volume(1.0, 0.2, 500).unwrap();
    fade.finished().await;
    assert!((engine.volume() - 0.2).abs() < 1e-3);

    // A manual volume change wins over a running fade
    let fade = engine.fade_volume(0.2, 1.0, 10_000).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.set_volume(0.5).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!((engine.volume() - 0.5).abs() < 1e-6);
    drop(fade);

    engine.dispose();
}

#[tokio::test]
async fn test_seamless_switch_without_preload_fails() {
    let engine = offline_engine(Arc::new(ScriptedLoader::new()));
    engine.load("a").await.unwrap();

    let err = engine.seamless_switch(0.0, 100).await.unwrap_err();
    assert!(matches!(err, Error::NothingPreloaded));
    assert_eq!(engine.current_src().as_deref(), Some("a"));

    engine.dispose();
}

#[tokio::test(start_paused = true)]
async fn test_seamless_switch_crossfades_to_preloaded() {
    let loader = ScriptedLoader::new()
        .with_track("a", 4.0)
        .with_track("b", 3.0);
    let engine = offline_engine(Arc::new(loader));
    engine.set_volume(0.8).unwrap();

    engine.load("a").await.unwrap();
    engine.play().await.unwrap();
    engine.preload("b").await.unwrap();
    assert!(engine.is_preloaded("b"));
    // Preloading leaves the active channel alone
    assert_eq!(engine.current_src().as_deref(), Some("a"));

    let duration = engine.seamless_switch(1.5, 200).await.unwrap();
    assert!((duration - 3.0).abs() < 1e-3);
    assert_eq!(engine.current_src().as_deref(), Some("b"));
    assert!(engine.is_playing());
    assert!(!engine.is_preloaded("b"));
    assert!((engine.current_time() - 1.5).abs() < 0.1);
    assert!((engine.volume() - 0.8).abs() < 1e-3);

    engine.dispose();
}

#[tokio::test(start_paused = true)]
async fn test_switch_stream_while_paused() {
    let engine = offline_engine(Arc::new(ScriptedLoader::new()));
    engine.load("a").await.unwrap();

    engine.switch_stream("b", None).await.unwrap();
    assert_eq!(engine.current_src().as_deref(), Some("b"));
    assert!(!engine.is_playing());

    engine.dispose();
}

#[tokio::test(start_paused = true)]
async fn test_events_follow_active_channel() {
    let engine = offline_engine(Arc::new(ScriptedLoader::new().with_track("b", 0.5)));
    engine.load("a").await.unwrap();
    engine.preload("b").await.unwrap();
    engine.seamless_switch(0.0, 0).await.unwrap();

    let (tx, mut ended) = tokio::sync::mpsc::unbounded_channel();
    let subscription = engine.on_ended(move || {
        let _ = tx.send(());
    });

    engine.play().await.unwrap();
    render(&engine.mixer().unwrap(), 8_000);

    tokio::time::timeout(Duration::from_secs(1), ended.recv())
        .await
        .expect("ended event")
        .unwrap();
    assert!(subscription.is_active());
    subscription.unsubscribe();

    engine.dispose();
}

#[tokio::test(start_paused = true)]
async fn test_karaoke_toggle_settles_on_last_request() {
    let engine = offline_engine(Arc::new(ScriptedLoader::new()));
    engine.set_karaoke_bass_cutoff(20.0).unwrap();
    assert_eq!(engine.karaoke_bass_cutoff(), 50.0);

    engine.set_karaoke_mode(true).await.unwrap();
    assert!(engine.is_karaoke_enabled());

    let (a, b, c) = tokio::join!(
        engine.set_karaoke_mode(false),
        engine.set_karaoke_mode(true),
        engine.set_karaoke_mode(false),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();
    assert!(!engine.is_karaoke_enabled());

    engine.dispose();
}

#[tokio::test(start_paused = true)]
async fn test_degraded_engine_still_plays() {
    let engine = AudioEngine::new(
        test_config(),
        &UnavailableBackend,
        Arc::new(ScriptedLoader::new().with_track("a", 1.0)),
    );
    assert!(engine.is_degraded());
    assert!(engine.mixer().is_none());

    // Karaoke needs a mixer and is quietly unavailable
    engine.set_karaoke_mode(true).await.unwrap();
    assert!(!engine.is_karaoke_enabled());

    let mut rx = engine.subscribe();
    engine.load("a").await.unwrap();
    engine.play().await.unwrap();

    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(PlayerEvent::Ended) = rx.recv().await {
                return;
            }
        }
    })
    .await;
    assert!(ended.is_ok());
    assert_eq!(engine.output_level(), 0.0);

    engine.dispose();
}

#[tokio::test]
async fn test_dispose_is_idempotent() {
    let engine = offline_engine(Arc::new(ScriptedLoader::new()));
    engine.load("a").await.unwrap();
    let mixer = engine.mixer().unwrap();

    engine.dispose();
    engine.dispose();

    assert!(engine.is_disposed());
    assert!(mixer.is_closed());
    assert!(matches!(engine.load("b").await, Err(Error::Disposed)));
    assert!(matches!(engine.play().await, Err(Error::Disposed)));
    assert!(matches!(engine.set_volume(0.5), Err(Error::Disposed)));
}
