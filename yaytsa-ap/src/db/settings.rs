//! Settings database access
//!
//! Read/write settings from the settings table (key-value store). Typed
//! getters fall back to a default, and write it, when a key is missing.

use crate::dsp::vocal_removal::{clamp_cutoff, DEFAULT_BASS_CUTOFF_HZ};
use crate::error::{Error, Result};
use crate::sleep::config::SleepTimerConfig;
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

pub const VOLUME_KEY: &str = "volume_level";
pub const KARAOKE_CUTOFF_KEY: &str = "karaoke_bass_cutoff_hz";
pub const SLEEP_MUSIC_KEY: &str = "sleep_music_duration_ms";
pub const SLEEP_NOISE_KEY: &str = "sleep_noise_duration_ms";
pub const SLEEP_CROSSFADE_KEY: &str = "sleep_crossfade_duration_ms";

/// Volume used before anything was saved
pub const DEFAULT_VOLUME: f32 = 0.75;

/// Get volume setting (0.0-1.0)
pub async fn get_volume(db: &Pool<Sqlite>) -> Result<f32> {
    match get_setting::<f32>(db, VOLUME_KEY).await? {
        Some(vol) if vol.is_finite() => Ok(vol.clamp(0.0, 1.0)),
        _ => {
            set_volume(db, DEFAULT_VOLUME).await?;
            Ok(DEFAULT_VOLUME)
        }
    }
}

/// Set volume setting (0.0-1.0)
pub async fn set_volume(db: &Pool<Sqlite>, volume: f32) -> Result<()> {
    let clamped = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
    set_setting(db, VOLUME_KEY, clamped).await
}

/// Karaoke bass preservation cutoff in Hz (50-300)
pub async fn get_karaoke_cutoff(db: &Pool<Sqlite>) -> Result<f64> {
    match get_setting::<f64>(db, KARAOKE_CUTOFF_KEY).await? {
        Some(hz) => Ok(clamp_cutoff(hz)),
        None => Ok(DEFAULT_BASS_CUTOFF_HZ),
    }
}

pub async fn set_karaoke_cutoff(db: &Pool<Sqlite>, hz: f64) -> Result<()> {
    set_setting(db, KARAOKE_CUTOFF_KEY, clamp_cutoff(hz)).await
}

/// Last sleep timer config; missing fields use the defaults
pub async fn get_sleep_timer_config(db: &Pool<Sqlite>) -> Result<SleepTimerConfig> {
    let defaults = SleepTimerConfig::default();
    Ok(SleepTimerConfig {
        music_duration_ms: get_setting(db, SLEEP_MUSIC_KEY)
            .await?
            .unwrap_or(defaults.music_duration_ms),
        noise_duration_ms: get_setting(db, SLEEP_NOISE_KEY)
            .await?
            .unwrap_or(defaults.noise_duration_ms),
        crossfade_duration_ms: get_setting(db, SLEEP_CROSSFADE_KEY)
            .await?
            .unwrap_or(defaults.crossfade_duration_ms),
    })
}

pub async fn set_sleep_timer_config(db: &Pool<Sqlite>, config: &SleepTimerConfig) -> Result<()> {
    set_setting(db, SLEEP_MUSIC_KEY, config.music_duration_ms).await?;
    set_setting(db, SLEEP_NOISE_KEY, config.noise_duration_ms).await?;
    set_setting(db, SLEEP_CROSSFADE_KEY, config.crossfade_duration_ms).await
}

/// Generic setting getter
///
/// Returns None when the key is missing; a value that does not parse is a
/// config error.
pub async fn get_setting<T: FromStr>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?
        .flatten();

    match value {
        Some(s) => match s.parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(Error::Config(format!(
                "Failed to parse setting '{}' value: {}",
                key, s
            ))),
        },
        None => Ok(None),
    }
}

/// Generic setting setter (insert or update)
pub async fn set_setting<T: ToString>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()> {
    let value_str = value.to_string();

    sqlx::query(
        r#"
        INSERT INTO settings (key, value, updated_at)
        VALUES (?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(key)
    .bind(value_str)
    .execute(db)
    .await?;

    Ok(())
}
