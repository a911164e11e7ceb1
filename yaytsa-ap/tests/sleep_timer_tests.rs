//! Sleep timer integration tests (paused tokio time)

mod helpers;

use helpers::{offline_engine, render, ScriptedLoader, TEST_SAMPLE_RATE};
use std::sync::Arc;
use std::time::Duration;
use yaytsa_ap::audio::OfflineBackend;
use yaytsa_ap::db::settings;
use yaytsa_ap::dsp::PinkNoiseSource;
use yaytsa_ap::{AudioEngine, SleepPhase, SleepTimer, SleepTimerOptions, SleepTimerPreset};

const MINUTE: Duration = Duration::from_secs(60);

async fn playing_engine() -> AudioEngine {
    playing_engine_with(ScriptedLoader::new()).await
}

async fn playing_engine_with(loader: ScriptedLoader) -> AudioEngine {
    let engine = offline_engine(Arc::new(loader));
    engine.load("track").await.unwrap();
    engine.play().await.unwrap();
    engine
}

fn noise() -> PinkNoiseSource {
    PinkNoiseSource::new(Arc::new(OfflineBackend::new()), TEST_SAMPLE_RATE)
}

#[tokio::test(start_paused = true)]
async fn test_plain_preset_stops_after_music() {
    let engine = playing_engine().await;
    engine.set_volume(0.7).unwrap();
    let timer = SleepTimer::new(engine.clone(), noise());
    let mut phases = timer.subscribe();

    timer.start(SleepTimerPreset::Minutes15.options()).await.unwrap();
    assert_eq!(timer.phase(), SleepPhase::Music);
    assert_eq!(phases.recv().await.unwrap().to, SleepPhase::Music);

    tokio::time::sleep(14 * MINUTE).await;
    assert_eq!(timer.phase(), SleepPhase::Music);
    let status = timer.status();
    assert!(status.remaining_ms <= 60_000);
    assert!(status.remaining_ms > 50_000);

    tokio::time::sleep(MINUTE + Duration::from_secs(1)).await;
    let change = phases.recv().await.unwrap();
    assert_eq!((change.from, change.to), (SleepPhase::Music, SleepPhase::Stopped));
    assert!(!engine.is_playing());
    assert!((engine.volume() - 0.7).abs() < 1e-6);
    assert_eq!(timer.status().remaining_ms, 0);

    engine.dispose();
}

#[tokio::test(start_paused = true)]
async fn test_crossfade_into_noise_at_half_the_music_level() {
    let engine = playing_engine().await;
    engine.set_volume(0.6).unwrap();
    let timer = SleepTimer::new(engine.clone(), noise());

    timer
        .start(SleepTimerOptions {
            music_duration_ms: Some(60_000),
            noise_duration_ms: Some(600_000),
            crossfade_duration_ms: Some(2_000),
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(61_000)).await;
    assert_eq!(timer.phase(), SleepPhase::CrossfadeToNoise);

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(timer.phase(), SleepPhase::Noise);
    // Nothing was rendered, so the estimate falls back to the listener volume
    assert!((timer.noise_volume() - 0.3).abs() < 0.02);
    assert!(!engine.is_playing());
    assert!(engine.volume() < 0.01);

    // Cancelling during noise brings the music back at the old volume
    timer.cancel().await;
    assert_eq!(timer.phase(), SleepPhase::Idle);
    assert!(engine.is_playing());
    assert!((engine.volume() - 0.6).abs() < 1e-6);
    assert_eq!(timer.noise_volume(), 0.0);

    engine.dispose();
}

#[tokio::test(start_paused = true)]
async fn test_extend_time_only_during_music() {
    let engine = playing_engine().await;
    let timer = SleepTimer::new(engine.clone(), noise());

    assert!(!timer.extend_time(60_000));
    timer.start(SleepTimerOptions::minutes(1, 0)).await.unwrap();
    assert!(timer.extend_time(60_000));
    assert_eq!(timer.status().config.music_duration_ms, 120_000);

    tokio::time::sleep(Duration::from_secs(90)).await;
    assert_eq!(timer.phase(), SleepPhase::Music);
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(timer.phase(), SleepPhase::Stopped);
    assert!(!timer.extend_time(60_000));

    engine.dispose();
}

#[tokio::test(start_paused = true)]
async fn test_stop_and_restart() {
    let engine = playing_engine().await;
    let timer = SleepTimer::new(engine.clone(), noise());

    timer.start(SleepTimerPreset::Night.options()).await.unwrap();
    timer.stop().await;
    assert_eq!(timer.phase(), SleepPhase::Stopped);
    assert!(!engine.is_playing());

    // Stop is final for the session; cancel returns to idle
    timer.stop().await;
    assert_eq!(timer.phase(), SleepPhase::Stopped);
    timer.cancel().await;
    assert_eq!(timer.phase(), SleepPhase::Idle);

    // Missing fields come from the last session
    timer
        .start(SleepTimerOptions {
            music_duration_ms: Some(600_000),
            ..Default::default()
        })
        .await
        .unwrap();
    let config = timer.status().config;
    assert_eq!(config.music_duration_ms, 600_000);
    assert_eq!(config.noise_duration_ms, 30 * 60_000);

    timer.cancel().await;
    engine.dispose();
}

#[tokio::test]
async fn test_config_persisted_in_settings() {
    let dir = tempfile::tempdir().unwrap();
    let pool = yaytsa_ap::db::init_database(&dir.path().join("settings.db"))
        .await
        .unwrap();

    let engine = playing_engine().await;
    let timer = SleepTimer::with_settings(engine.clone(), noise(), pool.clone())
        .await
        .unwrap();
    timer.start(SleepTimerPreset::Drift20.options()).await.unwrap();
    timer.cancel().await;

    let stored = settings::get_sleep_timer_config(&pool).await.unwrap();
    assert_eq!(stored.music_duration_ms, 20 * 60_000);
    assert_eq!(stored.noise_duration_ms, 10 * 60_000);

    let reopened = SleepTimer::with_settings(engine.clone(), noise(), pool.clone())
        .await
        .unwrap();
    assert_eq!(reopened.config(), stored);

    engine.dispose();
    pool.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_restart_right_after_natural_stop_keeps_new_session() {
    let engine = playing_engine().await;
    engine.set_volume(0.8).unwrap();
    let timer = SleepTimer::new(engine.clone(), noise());

    timer
        .start(SleepTimerOptions {
            music_duration_ms: Some(0),
            noise_duration_ms: Some(0),
            crossfade_duration_ms: None,
        })
        .await
        .unwrap();
    timer.tick();
    assert_eq!(timer.phase(), SleepPhase::Stopped);

    // Restart before the stopped session has finished tearing down
    timer.start(SleepTimerOptions::minutes(1, 0)).await.unwrap();
    engine.play().await.unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(timer.phase(), SleepPhase::Music);
    assert!(engine.is_playing());
    assert!((engine.volume() - 0.8).abs() < 1e-6);
    let remaining = timer.status().remaining_ms;
    assert!(remaining > 25_000 && remaining <= 30_000, "remaining {}", remaining);

    // Only the new session's ticker is left: it stops at one minute, once
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(timer.phase(), SleepPhase::Stopped);
    assert!(!engine.is_playing());

    engine.dispose();
}

#[tokio::test(start_paused = true)]
async fn test_measured_loudness_sets_noise_target() {
    let engine = playing_engine_with(ScriptedLoader::new().with_track("track", 60.0)).await;
    engine.set_volume(1.0).unwrap();
    let mixer = engine.mixer().unwrap();
    let timer = SleepTimer::new(engine.clone(), noise());

    timer
        .start(SleepTimerOptions {
            music_duration_ms: Some(10_000),
            noise_duration_ms: Some(600_000),
            crossfade_duration_ms: Some(2_000),
        })
        .await
        .unwrap();

    // 100 ms of audio per 100 ms of time; the source sits at 0.25 RMS
    let block = TEST_SAMPLE_RATE as usize / 10;
    for _ in 0..110 {
        render(&mixer, block);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(timer.phase(), SleepPhase::CrossfadeToNoise);
    let measured = timer.status().estimated_loudness;
    assert!((measured - 0.25).abs() < 0.01, "measured {}", measured);

    // The music fades out, but sampling has stopped so the estimate holds
    for _ in 0..20 {
        render(&mixer, block);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(timer.phase(), SleepPhase::Noise);
    assert!((timer.status().estimated_loudness - measured).abs() < 1e-6);
    assert!(
        (timer.noise_volume() - measured * 0.5).abs() < 0.01,
        "noise {}",
        timer.noise_volume()
    );

    timer.cancel().await;
    engine.dispose();
}

#[tokio::test(start_paused = true)]
async fn test_noise_phase_fades_out_to_stop() {
    let engine = playing_engine().await;
    engine.set_volume(0.6).unwrap();
    let timer = SleepTimer::new(engine.clone(), noise());
    let mut phases = timer.subscribe();

    timer
        .start(SleepTimerOptions {
            music_duration_ms: Some(60_000),
            noise_duration_ms: Some(60_000),
            crossfade_duration_ms: Some(2_000),
        })
        .await
        .unwrap();

    let mut noise_entered = None;
    let mut last_noise_volume = 1.0;
    let stopped_at = loop {
        tokio::time::sleep(Duration::from_millis(100)).await;
        while let Ok(change) = phases.try_recv() {
            match change.to {
                SleepPhase::Noise => noise_entered = Some(tokio::time::Instant::now()),
                SleepPhase::Stopped => {
                    assert_eq!(change.from, SleepPhase::Noise);
                }
                _ => {}
            }
        }
        match timer.phase() {
            SleepPhase::Noise => last_noise_volume = timer.noise_volume(),
            SleepPhase::Stopped => break tokio::time::Instant::now(),
            _ => {}
        }
    };

    // Ended by the fade itself, which ran the whole window down to silence
    let noise_entered = noise_entered.unwrap();
    let noise_phase = stopped_at - noise_entered;
    assert!(noise_phase >= Duration::from_secs(59), "{:?}", noise_phase);
    assert!(noise_phase < Duration::from_secs(61), "{:?}", noise_phase);
    assert!(last_noise_volume < 0.01);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(timer.noise_volume(), 0.0);
    assert!((engine.volume() - 0.6).abs() < 1e-6);
    assert!(!engine.is_playing());

    engine.dispose();
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_music_leaves_playback_alone() {
    let engine = playing_engine().await;
    engine.set_volume(0.5).unwrap();
    let timer = SleepTimer::new(engine.clone(), noise());

    timer.start(SleepTimerOptions::minutes(30, 10)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    engine.pause().await.unwrap();

    timer.cancel().await;
    assert_eq!(timer.phase(), SleepPhase::Idle);
    assert!(!engine.is_playing());
    assert!((engine.volume() - 0.5).abs() < 1e-6);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!engine.is_playing());

    engine.dispose();
}
