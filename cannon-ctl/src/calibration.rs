use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

use glam::Vec2;
use log::{info, warn};
use thiserror::Error;

use crate::detector::Strategy;

pub const DEFAULT_X_CORRECT: f32 = 60.0;
pub const DEFAULT_Y_CORRECT: f32 = -90.0;

/// Pixel offset between the camera's optical centre and the laser's point of impact
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Calibration {
    pub x_correct: f32,
    pub y_correct: f32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            x_correct: DEFAULT_X_CORRECT,
            y_correct: DEFAULT_Y_CORRECT,
        }
    }
}

impl Calibration {
    pub fn offset(&self) -> Vec2 {
        Vec2::new(self.x_correct, self.y_correct)
    }
}

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("calibration store io error: {0}")]
    Io(#[from] io::Error),
    #[error("calibration line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

/// What the store holds
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StoredSettings {
    pub calibration: Calibration,
    pub strategy: Strategy,
}

impl Default for StoredSettings {
    fn default() -> Self {
        Self {
            calibration: Calibration::default(),
            strategy: Strategy::TemplateMatch,
        }
    }
}

impl StoredSettings {
    /// Parses the `key value` text format:
    ///
    /// ```text
    /// xCorrect 60.000000
    /// yCorrect -90.000000
    /// strategy opencv
    /// ```
    /// Missing keys keep their defaults, unknown keys are ignored.
    pub fn parse(text: &str) -> Result<StoredSettings, CalibrationError> {
        let mut settings = StoredSettings::default();
        for (index, line) in text.lines().enumerate() {
            let mut parts = line.split_whitespace();
            let (key, value) = match (parts.next(), parts.next()) {
                (Some(k), Some(v)) => (k, v),
                (None, _) => continue,
                (Some(k), None) => {
                    return Err(CalibrationError::Parse {
                        line: index + 1,
                        reason: format!("key {} has no value", k),
                    })
                }
            };
            let number = || {
                value.parse::<f32>().map_err(|e| CalibrationError::Parse {
                    line: index + 1,
                    reason: format!("{}: {}", key, e),
                })
            };
            match key {
                "xCorrect" => settings.calibration.x_correct = number()?,
                "yCorrect" => settings.calibration.y_correct = number()?,
                "strategy" => settings.strategy = Strategy::from_config(value),
                _ => {}
            }
        }
        Ok(settings)
    }

    pub fn render(&self) -> String {
        format!(
            "xCorrect {:.6}\nyCorrect {:.6}\nstrategy {}\n",
            self.calibration.x_correct,
            self.calibration.y_correct,
            self.strategy.config_name()
        )
    }
}

/// Durable key/value text file holding the calibration offsets and default strategy
#[derive(Clone, Debug)]
pub struct CalibrationStore {
    path: PathBuf,
}

impl CalibrationStore {
    pub fn new(path: impl Into<PathBuf>) -> CalibrationStore {
        Self { path: path.into() }
    }
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is not an error, it yields the defaults
    pub fn load(&self) -> Result<StoredSettings, CalibrationError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("No calibration at {}, using defaults", self.path.display());
                return Ok(StoredSettings::default());
            }
            Err(e) => return Err(e.into()),
        };
        let settings = StoredSettings::parse(&text)?;
        info!(
            "Read offsets xCorrect={} yCorrect={} default strategy {:?}",
            settings.calibration.x_correct, settings.calibration.y_correct, settings.strategy
        );
        Ok(settings)
    }

    /// Rewrites the offsets, keeping whatever default strategy the file already names
    pub fn save(&self, calibration: Calibration) -> Result<(), CalibrationError> {
        let mut settings = self.load().unwrap_or_default();
        settings.calibration = calibration;
        fs::write(&self.path, settings.render())?;
        info!(
            "Wrote offsets xCorrect={} yCorrect={}",
            calibration.x_correct, calibration.y_correct
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_three_keys() {
        let settings = StoredSettings::parse("xCorrect 12.5\nyCorrect -3.000000\nstrategy tensor\n").unwrap();
        assert_eq!(settings.calibration, Calibration { x_correct: 12.5, y_correct: -3.0 });
        assert_eq!(settings.strategy, Strategy::NeuralNet);
    }

    #[test]
    fn missing_keys_keep_defaults() {
        let settings = StoredSettings::parse("yCorrect 4\n\n").unwrap();
        assert_eq!(settings.calibration.x_correct, DEFAULT_X_CORRECT);
        assert_eq!(settings.calibration.y_correct, 4.0);
        assert_eq!(settings.strategy, Strategy::TemplateMatch);
    }

    #[test]
    fn bad_number_names_the_line() {
        match StoredSettings::parse("xCorrect 1\nyCorrect abc\n") {
            Err(CalibrationError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn save_keeps_strategy_line() {
        let path = std::env::temp_dir().join(format!("cannon-calib-{}.ini", std::process::id()));
        fs::write(&path, "xCorrect 1\nyCorrect 2\nstrategy tensor\n").unwrap();
        let store = CalibrationStore::new(&path);
        store.save(Calibration { x_correct: 7.0, y_correct: -8.0 }).unwrap();

        let settings = store.load().unwrap();
        assert_eq!(settings.calibration, Calibration { x_correct: 7.0, y_correct: -8.0 });
        assert_eq!(settings.strategy, Strategy::NeuralNet);
        let _ = fs::remove_file(&path);
    }
}
