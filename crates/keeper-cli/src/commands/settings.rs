//! Settings commands

use anyhow::{anyhow, Result};
use keeper_core::db::{keys, Database};

fn check_key(key: &str) -> Result<()> {
    if keys::ALL.contains(&key) {
        Ok(())
    } else {
        Err(anyhow!(
            "Unknown setting '{}'. Known settings: {}",
            key,
            keys::ALL.join(", ")
        ))
    }
}

fn is_secret(key: &str) -> bool {
    key == keys::REMOTE_ACCESS_TOKEN || key == keys::REMOTE_REFRESH_TOKEN
}

/// Hide all but the last four characters of a token
pub fn mask(value: &str) -> String {
    let count = value.chars().count();
    if count <= 4 {
        return "****".to_string();
    }
    let tail: String = value.chars().skip(count - 4).collect();
    format!("****{}", tail)
}

pub fn cmd_settings_list(db: &Database) -> Result<()> {
    let settings = db.list_settings()?;
    if settings.is_empty() {
        println!("No settings stored");
        return Ok(());
    }

    for (key, value) in &settings {
        let shown = if is_secret(key) {
            mask(value)
        } else {
            value.clone()
        };
        println!("  {:<24} {}", key, shown);
    }
    Ok(())
}

pub fn cmd_settings_get(db: &Database, key: &str) -> Result<()> {
    check_key(key)?;
    match db.get_setting(key)? {
        Some(value) => println!("{}", value),
        None => println!("(not set)"),
    }
    Ok(())
}

/// Set a setting, or remove it when `value` is `None`
pub fn cmd_settings_set(db: &Database, key: &str, value: Option<&str>) -> Result<()> {
    check_key(key)?;
    db.set_setting(key, value)?;
    match value {
        Some(_) => println!("✅ Set {}", key),
        None => println!("✅ Removed {}", key),
    }
    Ok(())
}
