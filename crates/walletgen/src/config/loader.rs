use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::schema::Config;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Overlays settings from the process environment.
pub fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    apply_overrides(config, |name| std::env::var(name).ok())
}

/// Overlays settings from `lookup`, using the same variable names as the
/// process environment.
pub fn apply_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(dir) = get("DATA_DIR") {
        config.data_dir = PathBuf::from(dir.trim());
    }
    if let Some(level) = get("LOG_LEVEL") {
        config.log_level = level.trim().to_lowercase();
    }
    if let Some(ids) = get("ADMIN_USER_IDS") {
        config.admin_user_ids = parse_id_list(&ids)?;
    }

    set_parsed(&get, "RATE_LIMIT_PER_MIN", &mut config.rate_limit_per_min)?;
    set_parsed(&get, "SEED_TTL_SECS", &mut config.seed_ttl_secs)?;
    set_parsed(&get, "PROGRESS_INTERVAL_SECS", &mut config.progress_interval_secs)?;

    let bulk = &mut config.bulk;
    set_parsed(&get, "BULKZIP_CSV_CHUNK", &mut bulk.csv_chunk)?;
    set_parsed(&get, "BULKZIP_ZIP_CSVS", &mut bulk.zip_csvs)?;
    set_parsed(&get, "BULKZIP_MAX_NONADMIN", &mut bulk.max_nonadmin)?;
    set_parsed(&get, "BULKZIP_MAX_COUNT", &mut bulk.max_count)?;
    set_parsed(&get, "BULKZIP_CHECKPOINT_EVERY", &mut bulk.checkpoint_every)?;
    set_parsed(&get, "BULKZIP_PROFILE_BATCH", &mut bulk.profile_batch)?;

    Ok(())
}

fn set_parsed<T, G>(get: &G, name: &str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(name) {
        *slot = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            name: name.to_string(),
            value: raw.clone(),
        })?;
    }
    Ok(())
}

/// Comma separated; blanks are ignored.
fn parse_id_list(raw: &str) -> Result<Vec<i64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>().map_err(|_| ConfigError::InvalidEnv {
                name: "ADMIN_USER_IDS".to_string(),
                value: raw.to_string(),
            })
        })
        .collect()
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let bulk = &config.bulk;
    let invalid = |message: &str| {
        Err(ConfigError::Validation {
            message: message.to_string(),
        })
    };

    if bulk.csv_chunk == 0 {
        return invalid("bulk.csv_chunk must be at least 1");
    }
    if bulk.zip_csvs == 0 {
        return invalid("bulk.zip_csvs must be at least 1");
    }
    if bulk.max_count == 0 {
        return invalid("bulk.max_count must be at least 1");
    }
    if bulk.max_nonadmin > bulk.max_count {
        return Err(ConfigError::Validation {
            message: format!(
                "bulk.max_nonadmin ({}) exceeds bulk.max_count ({})",
                bulk.max_nonadmin, bulk.max_count
            ),
        });
    }
    if config.rate_limit_per_min == 0 {
        return invalid("rate_limit_per_min must be at least 1");
    }
    if config.progress_interval_secs == 0 {
        return invalid("progress_interval_secs must be at least 1");
    }

    Ok(())
}
