use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::models::{Settings, SettingsFile};
use crate::storage::StorageError;

pub const DATA_DIR_ENV: &str = "DAYTODO_DATA_DIR";
pub const APP_DIR_NAME: &str = "daytodo";
pub const SETTINGS_FILE: &str = "settings.json";
pub const SETTINGS_SCHEMA_VERSION: u32 = 1;

/// Directory holding the database, settings and logs.
pub fn data_dir() -> Result<PathBuf, StorageError> {
    resolve_data_dir(std::env::var_os(DATA_DIR_ENV), dirs::data_dir()).ok_or_else(|| {
        StorageError::Io(std::io::Error::new(
            ErrorKind::NotFound,
            format!("no data directory; set {DATA_DIR_ENV}"),
        ))
    })
}

fn resolve_data_dir(overridden: Option<OsString>, platform: Option<PathBuf>) -> Option<PathBuf> {
    overridden
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(|| platform.map(|dir| dir.join(APP_DIR_NAME)))
}

pub fn ensure_dir(root: &Path) -> Result<(), StorageError> {
    fs::create_dir_all(root)?;
    Ok(())
}

pub fn read_settings(root: &Path) -> Result<SettingsFile, StorageError> {
    let mut file = File::open(root.join(SETTINGS_FILE))?;
    let mut buf = String::new();
    file.read_to_string(&mut buf)?;
    let data: SettingsFile = serde_json::from_str(&buf)?;
    if data.schema_version > SETTINGS_SCHEMA_VERSION {
        return Err(StorageError::UnsupportedSchemaVersion {
            db_version: data.schema_version,
            latest_supported: SETTINGS_SCHEMA_VERSION,
        });
    }
    Ok(data)
}

pub fn save_settings(root: &Path, settings: &Settings) -> Result<(), StorageError> {
    let data = SettingsFile {
        schema_version: SETTINGS_SCHEMA_VERSION,
        settings: settings.clone(),
    };
    write_atomic(&root.join(SETTINGS_FILE), &data)
}

/// Loads settings, falling back to defaults. A first run writes the defaults
/// out so they can be edited.
pub fn load_settings(root: &Path) -> Settings {
    match read_settings(root) {
        Ok(data) => data.settings,
        Err(StorageError::Io(err)) if err.kind() == ErrorKind::NotFound => {
            let settings = Settings::default();
            if let Err(err) = save_settings(root, &settings) {
                log::warn!("config: could not write default settings: {err}");
            }
            settings
        }
        Err(err) => {
            log::warn!("config: settings unreadable, using defaults: {err}");
            Settings::default()
        }
    }
}

fn write_atomic<T: Serialize>(path: &Path, data: &T) -> Result<(), StorageError> {
    let temp_path = path.with_extension("tmp");
    let json = serde_json::to_vec_pretty(data)?;
    {
        let mut file = File::create(&temp_path)?;
        file.write_all(&json)?;
        file.sync_all()?;
    }
    fs::rename(temp_path, path)?;
    Ok(())
}
