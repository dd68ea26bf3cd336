use std::path::{Path, PathBuf};

use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Root under which every job gets its own output directory.
    #[serde(default = "default_output_base_dir")]
    pub output_base_dir: PathBuf,

    /// Largest accepted job request body, in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_output_base_dir() -> PathBuf {
    PathBuf::from("/images/ready")
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            output_base_dir: default_output_base_dir(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn with_output_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_base_dir = dir.into();
        self
    }

    /// Output directory for job `id`, sharded by the first six hex digits:
    /// `<base>/abc/def/abcdef12-...`.
    pub fn job_output_dir(&self, id: Uuid) -> PathBuf {
        shard_dir(&self.output_base_dir, id)
    }
}

fn shard_dir(base: &Path, id: Uuid) -> PathBuf {
    let name = id.to_string();
    base.join(&name[0..3]).join(&name[3..6]).join(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_output_dir_is_sharded() {
        let config = AppConfig::default().with_output_base_dir("/base");
        let id = Uuid::parse_str("0123abcd-0000-4000-8000-000000000000").unwrap();
        assert_eq!(
            config.job_output_dir(id),
            PathBuf::from("/base/012/3ab/0123abcd-0000-4000-8000-000000000000")
        );
    }

    #[test]
    fn test_defaults() {
        let config: AppConfig = envy::from_iter(Vec::<(String, String)>::new()).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.output_base_dir, PathBuf::from("/images/ready"));
        assert_eq!(config.max_body_bytes, 1024 * 1024);
    }

    #[test]
    fn test_reads_environment_names() {
        let vars = vec![
            ("OUTPUT_BASE_DIR".to_string(), "/srv/out".to_string()),
            ("MAX_BODY_BYTES".to_string(), "2048".to_string()),
        ];
        let config: AppConfig = envy::from_iter(vars).unwrap();
        assert_eq!(config.output_base_dir, PathBuf::from("/srv/out"));
        assert_eq!(config.max_body_bytes, 2048);
    }
}
