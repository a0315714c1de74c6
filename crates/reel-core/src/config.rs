use serde::{Deserialize, Serialize};

use crate::{Color, PixelFormat, ReelError, ReelResult};

/// How many frame slots the pipeline keeps in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Buffering {
    /// One slot, rendered inline on the presentation thread.
    Single,
    Double,
    Triple,
}

impl Buffering {
    pub fn slot_count(&self) -> usize {
        match self {
            Buffering::Single => 1,
            Buffering::Double => 2,
            Buffering::Triple => 3,
        }
    }

    /// Whether frames are produced on a dedicated render thread.
    pub fn is_threaded(&self) -> bool {
        !matches!(self, Buffering::Single)
    }
}

impl Default for Buffering {
    fn default() -> Self {
        Buffering::Double
    }
}

/// Which rendering path to start on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// GPU when it initializes, software otherwise.
    Auto,
    Gpu,
    Software,
}

impl Default for BackendPreference {
    fn default() -> Self {
        BackendPreference::Auto
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub loop_enabled: bool,
    /// Speed multiplier; negative plays backward.
    pub playback_rate: f64,
    /// Upper bound on a single render-worker wait, in milliseconds.
    pub worker_wait_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            loop_enabled: true,
            playback_rate: 1.0,
            worker_wait_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RenderConfig {
    pub buffering: Buffering,
    pub backend: BackendPreference,
    pub vsync: bool,
    /// Letterbox clear color, as a hex string.
    pub background: String,
    pub pixel_format: PixelFormat,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            buffering: Buffering::Double,
            backend: BackendPreference::Auto,
            vsync: false,
            background: "#000000".to_string(),
            pixel_format: PixelFormat::Rgba8,
        }
    }
}

impl RenderConfig {
    pub fn background_color(&self) -> ReelResult<Color> {
        Color::parse(&self.background)
            .map_err(|e| ReelError::Config(format!("render.background: {}", e)))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FailoverConfig {
    /// Consecutive drawable failures tolerated before leaving the GPU path.
    pub threshold: u32,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self { threshold: 10 }
    }
}

/// Player configuration, usually read from `reel.toml`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PlayerConfig {
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub failover: FailoverConfig,
}

impl PlayerConfig {
    pub fn load_from_file(path: &std::path::Path) -> ReelResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> ReelResult<Self> {
        let config: PlayerConfig =
            toml::from_str(contents).map_err(|e| ReelError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &std::path::Path) -> ReelResult<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ReelError::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> ReelResult<()> {
        if self.failover.threshold == 0 {
            return Err(ReelError::Config(
                "failover.threshold must be at least 1".into(),
            ));
        }
        if !self.playback.playback_rate.is_finite() {
            return Err(ReelError::Config(
                "playback.playback_rate must be a finite number".into(),
            ));
        }
        self.render.background_color()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlayerConfig::default();
        assert_eq!(config.failover.threshold, 10);
        assert_eq!(config.render.buffering.slot_count(), 2);
        assert!(config.playback.loop_enabled);
        assert!(!config.render.vsync);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PlayerConfig::from_toml(
            r#"
            [render]
            buffering = "triple"
            backend = "software"

            [failover]
            threshold = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.render.buffering, Buffering::Triple);
        assert_eq!(config.render.backend, BackendPreference::Software);
        assert_eq!(config.failover.threshold, 3);
        assert_eq!(config.playback.worker_wait_ms, 50);
        assert_eq!(config.playback.playback_rate, 1.0);
    }

    #[test]
    fn test_infinite_rate_rejected() {
        let err = PlayerConfig::from_toml("[playback]\nplayback_rate = inf\n").unwrap_err();
        assert!(err.to_string().contains("playback_rate"));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let err = PlayerConfig::from_toml("[failover]\nthreshold = 0\n").unwrap_err();
        assert!(matches!(err, ReelError::Config(_)));
    }

    #[test]
    fn test_bad_background_rejected() {
        let err = PlayerConfig::from_toml("[render]\nbackground = \"#xyz123\"\n").unwrap_err();
        assert!(err.to_string().contains("render.background"));
    }

    #[test]
    fn test_single_buffering_is_inline() {
        assert!(!Buffering::Single.is_threaded());
        assert!(Buffering::Triple.is_threaded());
    }
}
