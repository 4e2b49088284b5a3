use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use tracing::warn;

const DEV_JWT_SECRET: &str = "dev-secret-change-me";

/// Runtime settings, read from `QUEST_*` environment variables (a `.env`
/// file is loaded first when present).
#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub node_id: u16,
    pub storage_timeout: Duration,
    pub upload_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_secret = get("QUEST_JWT_SECRET").unwrap_or_else(|| {
            warn!("QUEST_JWT_SECRET is not set, using the development secret");
            DEV_JWT_SECRET.to_string()
        });

        Ok(Self {
            jwt_secret,
            db_path: PathBuf::from(get("QUEST_DB_PATH").unwrap_or_else(|| "quest.db".into())),
            host: get("QUEST_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(get("QUEST_PORT"), "QUEST_PORT", 3000)?,
            node_id: parse_or(get("QUEST_NODE_ID"), "QUEST_NODE_ID", 1)?,
            storage_timeout: Duration::from_millis(parse_or(
                get("QUEST_STORAGE_TIMEOUT_MS"),
                "QUEST_STORAGE_TIMEOUT_MS",
                5000,
            )?),
            upload_dir: PathBuf::from(get("QUEST_UPLOAD_DIR").unwrap_or_else(|| "./uploads".into())),
        })
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("invalid {}: {:?}", key, value)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.jwt_secret, DEV_JWT_SECRET);
        assert_eq!(cfg.db_path, PathBuf::from("quest.db"));
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.node_id, 1);
        assert_eq!(cfg.storage_timeout, Duration::from_millis(5000));
        assert_eq!(cfg.upload_dir, PathBuf::from("./uploads"));
    }

    #[test]
    fn overrides_and_bad_values() {
        let cfg = config(&[
            ("QUEST_JWT_SECRET", "s3cret"),
            ("QUEST_PORT", "8081"),
            ("QUEST_NODE_ID", "17"),
            ("QUEST_STORAGE_TIMEOUT_MS", "250"),
        ])
        .unwrap();
        assert_eq!(cfg.jwt_secret, "s3cret");
        assert_eq!(cfg.port, 8081);
        assert_eq!(cfg.node_id, 17);
        assert_eq!(cfg.storage_timeout, Duration::from_millis(250));

        let err = config(&[("QUEST_PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("QUEST_PORT"));
    }
}
