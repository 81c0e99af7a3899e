//! Script storage
//!
//! Layout under the storage root (default `~/.macroflow`):
//!
//! ```text
//! recordings/<name>.json   flat event arrays
//! tasks.json               macro task list
//! ```

use crate::task::MacroTask;
use anyhow::{Context, Result};
use macroflow_core::Timeline;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const RECORDINGS: &str = "recordings";
const TASKS_FILE: &str = "tasks.json";

pub struct ScriptStorage {
    dir: PathBuf,
}

impl ScriptStorage {
    pub fn new() -> Result<Self> {
        let home = std::env::var("HOME").context("HOME not set")?;
        Self::with_dir(PathBuf::from(home).join(".macroflow"))
    }

    pub fn with_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(dir.join(RECORDINGS))
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        Ok(Self { dir })
    }

    /// Save a timeline as `recordings/<name>.json`, replacing any existing file
    pub fn save(&self, name: &str, timeline: &Timeline) -> Result<PathBuf> {
        let path = self.recordings().join(format!("{}.json", sanitize(name)));
        let file = File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut w = BufWriter::new(file);
        serde_json::to_writer(&mut w, timeline)?;
        w.flush()?;
        debug!("saved {} events to {}", timeline.len(), path.display());
        Ok(path)
    }

    /// Load a timeline by name, file name, or path
    pub fn load(&self, name: &str) -> Result<Timeline> {
        let path = self.resolve(name);
        let file = File::open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let timeline: Timeline = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        debug!("loaded {} events from {}", timeline.len(), path.display());
        Ok(timeline)
    }

    /// Saved recording names, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.recordings())? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.resolve(name);
        fs::remove_file(&path).with_context(|| format!("Failed to delete {}", path.display()))?;
        Ok(())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.resolve(name).is_file()
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// `name` as-is if it is a path, otherwise `recordings/<name>.json`
    pub fn resolve(&self, name: &str) -> PathBuf {
        let candidate = Path::new(name);
        if candidate.is_absolute() || candidate.components().count() > 1 {
            return candidate.to_path_buf();
        }
        if candidate.extension().is_some_and(|e| e == "json") {
            self.recordings().join(candidate)
        } else {
            self.recordings().join(format!("{}.json", name))
        }
    }

    pub fn save_tasks(&self, tasks: &[MacroTask]) -> Result<PathBuf> {
        let path = self.dir.join(TASKS_FILE);
        let file = File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut w = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut w, tasks)?;
        w.flush()?;
        Ok(path)
    }

    /// Saved macro tasks; empty when none were ever saved
    pub fn load_tasks(&self) -> Result<Vec<MacroTask>> {
        let path = self.dir.join(TASKS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    fn recordings(&self) -> PathBuf {
        self.dir.join(RECORDINGS)
    }
}

/// Default name for a new recording, e.g. `custom_20260101_093000`
pub fn default_name() -> String {
    format!("custom_{}", chrono::Local::now().format("%Y%m%d_%H%M%S"))
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::MacroStep;
    use macroflow_core::{EventKind, MouseButton, Point, TimedEvent};

    fn sample() -> Timeline {
        let pos = Point::new(100, 100);
        Timeline::new(vec![
            TimedEvent::new(EventKind::MousePress { button: MouseButton::Left, pos }, 0.0),
            TimedEvent::new(EventKind::MouseRelease { button: MouseButton::Left, pos }, 0.001),
        ])
    }

    #[test]
    fn save_load_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ScriptStorage::with_dir(dir.path()).unwrap();

        let path = storage.save("login flow", &sample()).unwrap();
        assert!(path.ends_with("recordings/login_flow.json"));
        assert_eq!(storage.list().unwrap(), vec!["login_flow"]);

        assert_eq!(storage.load("login_flow").unwrap(), sample());
        assert_eq!(storage.load("login_flow.json").unwrap(), sample());
        assert_eq!(storage.load(path.to_str().unwrap()).unwrap(), sample());

        storage.delete("login_flow").unwrap();
        assert!(storage.list().unwrap().is_empty());
        assert!(!storage.exists("login_flow"));
    }

    #[test]
    fn loads_legacy_guard_names() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ScriptStorage::with_dir(dir.path()).unwrap();
        let legacy = r#"[
            ["smart_if_guard_ocr", {"keywords": ["Next"], "region": null, "interval": 0.3}, 0.0],
            ["key_press", "space", 0.5],
            ["smart_end_guard", {}, 0.5]
        ]"#;
        fs::write(storage.resolve("legacy"), legacy).unwrap();

        let timeline = storage.load("legacy").unwrap();
        assert!(timeline.is_balanced());
        assert_eq!(timeline.guard_end(0), Some(2));
    }

    #[test]
    fn missing_or_corrupt_files_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ScriptStorage::with_dir(dir.path()).unwrap();
        assert!(storage.load("nope").is_err());

        fs::write(storage.resolve("bad"), r#"[["teleport", 1.0]]"#).unwrap();
        let err = storage.load("bad").unwrap_err();
        assert!(format!("{:#}", err).contains("teleport"));
    }

    #[test]
    fn tasks_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ScriptStorage::with_dir(dir.path()).unwrap();
        assert!(storage.load_tasks().unwrap().is_empty());

        let mut task = MacroTask::new("daily");
        task.add_step(MacroStep::new("open", "login_flow"));
        storage.save_tasks(&[task.clone()]).unwrap();

        assert_eq!(storage.load_tasks().unwrap(), vec![task]);
    }

    #[test]
    fn default_name_has_timestamp() {
        let name = default_name();
        assert!(name.starts_with("custom_"));
        assert_eq!(name.len(), "custom_20260101_093000".len());
    }
}
