use crate::core::{Result, Rgb, SignError};
use crate::display::LineLayout;
use crate::scheduler::ScheduleIntervals;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const CONFIG_FILE: &str = "config.json";

/// Periods of the background tasks, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub flush_interval_secs: u64,
    pub resync_interval_secs: u64,
    pub full_sweep_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 300,
            resync_interval_secs: 10,
            full_sweep_interval_secs: 120,
        }
    }
}

impl ScheduleConfig {
    pub fn intervals(&self) -> ScheduleIntervals {
        ScheduleIntervals {
            flush: Duration::from_secs(self.flush_interval_secs),
            resync: Duration::from_secs(self.resync_interval_secs),
            full_sweep: Duration::from_secs(self.full_sweep_interval_secs),
        }
    }
}

/// Settings stored as `config.json` in the data directory.
///
/// Every field has a default so files written by older versions keep
/// loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignConfig {
    /// Signs file, relative to the data directory unless absolute.
    pub signs_file: PathBuf,

    /// Colour given to newly placed signs.
    pub default_color: [u8; 3],

    pub default_glowing: bool,

    /// Whether players may write sign text through chat edit sessions.
    pub chat_editing: bool,

    pub display: LineLayout,

    pub schedule: ScheduleConfig,
}

impl Default for SignConfig {
    fn default() -> Self {
        Self {
            signs_file: PathBuf::from("signs.json"),
            default_color: [0, 0, 0],
            default_glowing: false,
            chat_editing: true,
            display: LineLayout::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl SignConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `config.json` from `data_dir`, writing the defaults there when
    /// it does not exist yet.
    pub fn load<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let config = match Self::read_file(data_dir)? {
            Some(config) => config,
            None => {
                let config = Self::default();
                config.save(data_dir)?;
                let path = data_dir.join(CONFIG_FILE);
                info!(path = %path.display(), "Wrote default sign configuration");
                config
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Like [`SignConfig::load`] but never writes: a missing file yields the
    /// defaults.
    pub fn read<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let config = Self::read_file(data_dir.as_ref())?.unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    fn read_file(data_dir: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(data_dir.join(CONFIG_FILE)) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn save<P: AsRef<Path>>(&self, data_dir: P) -> Result<()> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)?;
        let json = serde_json::to_string_pretty(self)?;
        fs::write(data_dir.join(CONFIG_FILE), json)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.signs_file.as_os_str().is_empty() {
            return Err(SignError::Config("signs_file cannot be empty".into()));
        }
        if !self.display.base_offset.is_finite() {
            return Err(SignError::Config("display.base_offset must be finite".into()));
        }
        if !self.display.line_spacing.is_finite() || self.display.line_spacing <= 0.0 {
            return Err(SignError::Config("display.line_spacing must be > 0".into()));
        }

        let schedule = &self.schedule;
        for (name, secs) in [
            ("flush_interval_secs", schedule.flush_interval_secs),
            ("resync_interval_secs", schedule.resync_interval_secs),
            ("full_sweep_interval_secs", schedule.full_sweep_interval_secs),
        ] {
            if secs == 0 {
                return Err(SignError::Config(format!("schedule.{} must be > 0", name)));
            }
        }
        Ok(())
    }

    /// Where the signs file lives for a store rooted at `data_dir`.
    pub fn signs_path<P: AsRef<Path>>(&self, data_dir: P) -> PathBuf {
        data_dir.as_ref().join(&self.signs_file)
    }

    pub fn default_rgb(&self) -> Rgb {
        let [r, g, b] = self.default_color;
        Rgb(r, g, b)
    }

    /// Set the signs file
    pub fn signs_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.signs_file = path.into();
        self
    }

    /// Set the colour of new signs
    pub fn default_color(mut self, color: Rgb) -> Self {
        self.default_color = [color.0, color.1, color.2];
        self
    }

    pub fn default_glowing(mut self, glowing: bool) -> Self {
        self.default_glowing = glowing;
        self
    }

    pub fn chat_editing(mut self, enabled: bool) -> Self {
        self.chat_editing = enabled;
        self
    }

    /// Set the display line layout
    pub fn layout(mut self, layout: LineLayout) -> Self {
        self.display = layout;
        self
    }

    pub fn flush_interval(mut self, secs: u64) -> Self {
        self.schedule.flush_interval_secs = secs;
        self
    }

    pub fn resync_interval(mut self, secs: u64) -> Self {
        self.schedule.resync_interval_secs = secs;
        self
    }

    pub fn full_sweep_interval(mut self, secs: u64) -> Self {
        self.schedule.full_sweep_interval_secs = secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_config_writes_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = SignConfig::load(temp_dir.path()).unwrap();

        assert_eq!(config, SignConfig::default());
        assert!(temp_dir.path().join(CONFIG_FILE).exists());
        assert_eq!(config.schedule.intervals(), ScheduleIntervals::default());
    }

    #[test]
    fn test_read_does_not_create_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = SignConfig::read(temp_dir.path()).unwrap();

        assert_eq!(config, SignConfig::default());
        assert!(!temp_dir.path().join(CONFIG_FILE).exists());

        SignConfig::new().chat_editing(false).save(temp_dir.path()).unwrap();
        assert!(!SignConfig::read(temp_dir.path()).unwrap().chat_editing);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(CONFIG_FILE),
            r#"{"default_color": [255, 0, 0], "schedule": {"resync_interval_secs": 2}}"#,
        )
        .unwrap();

        let config = SignConfig::load(temp_dir.path()).unwrap();
        assert_eq!(config.default_rgb(), Rgb(255, 0, 0));
        assert_eq!(config.schedule.resync_interval_secs, 2);
        assert_eq!(config.schedule.flush_interval_secs, 300);
        assert_eq!(config.display.line_spacing, 0.25);
        assert!(config.chat_editing);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(SignConfig::new().flush_interval(0).validate().is_err());
        assert!(
            SignConfig::new()
                .layout(LineLayout {
                    base_offset: 1.0,
                    line_spacing: 0.0
                })
                .validate()
                .is_err()
        );
        assert!(SignConfig::new().signs_file("").validate().is_err());
        assert!(SignConfig::new().resync_interval(1).validate().is_ok());
    }

    #[test]
    fn test_save_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let config = SignConfig::new()
            .signs_file("data/signs.json")
            .default_glowing(true)
            .full_sweep_interval(60);
        config.save(temp_dir.path()).unwrap();

        assert_eq!(SignConfig::load(temp_dir.path()).unwrap(), config);
        assert_eq!(
            config.signs_path(temp_dir.path()),
            temp_dir.path().join("data/signs.json")
        );
    }
}
