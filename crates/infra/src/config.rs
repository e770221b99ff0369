//! Process configuration, read once from the environment at startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::inference::replicate::DEFAULT_BASE_URL;

/// Invalid or missing configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} is required{hint}")]
    Missing { var: &'static str, hint: &'static str },
    #[error("{var}: invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Which `JobStore` backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStoreKind {
    Sqlite,
    Memory,
}

/// Remote inference settings.
#[derive(Clone, PartialEq)]
pub enum InferenceMode {
    /// Pass-through provider; the mixed audio comes back as the clean track.
    DryRun,
    Replicate {
        base_url: String,
        api_token: String,
        model: String,
        stem: String,
    },
}

impl std::fmt::Debug for InferenceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InferenceMode::DryRun => f.write_str("DryRun"),
            InferenceMode::Replicate {
                base_url,
                model,
                stem,
                ..
            } => f
                .debug_struct("Replicate")
                .field("base_url", base_url)
                .field("api_token", &"<redacted>")
                .field("model", model)
                .field("stem", stem)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Storage root; artifacts live under `videos/`.
    pub volume_dir: PathBuf,
    pub listen_addr: SocketAddr,
    pub inference: InferenceMode,
    pub inference_timeout: Duration,
    pub http_timeout: Duration,
    pub submit_max_attempts: u32,
    pub submit_retry_base: Duration,
    pub duration_tolerance_secs: f64,
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
    pub max_upload_bytes: usize,
    pub job_store: JobStoreKind,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let dry_run = match get("INFERENCE_DRY_RUN") {
            Some(v) => parse_bool("INFERENCE_DRY_RUN", &v)?,
            None => false,
        };
        let inference = if dry_run {
            InferenceMode::DryRun
        } else {
            InferenceMode::Replicate {
                base_url: get("REPLICATE_API_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                api_token: get("REPLICATE_API_TOKEN").ok_or(ConfigError::Missing {
                    var: "REPLICATE_API_TOKEN",
                    hint: " (or set INFERENCE_DRY_RUN=true)",
                })?,
                model: get("REPLICATE_MODEL").ok_or(ConfigError::Missing {
                    var: "REPLICATE_MODEL",
                    hint: " (owner/name or owner/name:version)",
                })?,
                stem: get("REPLICATE_STEM").unwrap_or_else(|| "vocals".to_string()),
            }
        };

        let job_store = match get("JOB_STORE").as_deref() {
            None | Some("sqlite") => JobStoreKind::Sqlite,
            Some("memory") => JobStoreKind::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "JOB_STORE",
                    value: other.to_string(),
                    reason: "expected 'sqlite' or 'memory'".to_string(),
                });
            }
        };

        let tolerance: f64 = parse_or("DURATION_TOLERANCE_SECS", get("DURATION_TOLERANCE_SECS"), 0.5)?;
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(ConfigError::Invalid {
                var: "DURATION_TOLERANCE_SECS",
                value: tolerance.to_string(),
                reason: "must be a non-negative number".to_string(),
            });
        }

        Ok(Self {
            volume_dir: get("VOLUME_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/data")),
            listen_addr: parse_or(
                "LISTEN_ADDR",
                get("LISTEN_ADDR"),
                SocketAddr::from(([0, 0, 0, 0], 8080)),
            )?,
            inference,
            inference_timeout: Duration::from_secs(parse_or(
                "INFERENCE_TIMEOUT_SECS",
                get("INFERENCE_TIMEOUT_SECS"),
                600,
            )?),
            http_timeout: Duration::from_secs(parse_or(
                "INFERENCE_HTTP_TIMEOUT_SECS",
                get("INFERENCE_HTTP_TIMEOUT_SECS"),
                60,
            )?),
            submit_max_attempts: parse_or("SUBMIT_MAX_ATTEMPTS", get("SUBMIT_MAX_ATTEMPTS"), 3)?,
            submit_retry_base: Duration::from_millis(parse_or(
                "SUBMIT_RETRY_BASE_MS",
                get("SUBMIT_RETRY_BASE_MS"),
                500,
            )?),
            duration_tolerance_secs: tolerance,
            ffmpeg_bin: get("FFMPEG_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("ffmpeg")),
            ffprobe_bin: get("FFPROBE_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("ffprobe")),
            max_upload_bytes: parse_or("MAX_UPLOAD_BYTES", get("MAX_UPLOAD_BYTES"), 1 << 30)?,
            job_store,
        })
    }

    /// Root of the artifact store.
    pub fn artifact_root(&self) -> PathBuf {
        self.volume_dir.join("videos")
    }

    pub fn database_path(&self) -> PathBuf {
        self.volume_dir.join("demusifier.db")
    }

    /// Provider name for logs.
    pub fn inference_label(&self) -> &'static str {
        match self.inference {
            InferenceMode::DryRun => "dry_run",
            InferenceMode::Replicate { .. } => "replicate",
        }
    }
}

fn parse_or<T>(var: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(v) => v.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: v.clone(),
            reason: e.to_string(),
        }),
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn dry_run_needs_no_credentials() {
        let cfg = config(&[("INFERENCE_DRY_RUN", "true")]).unwrap();
        assert_eq!(cfg.inference, InferenceMode::DryRun);
        assert_eq!(cfg.inference_label(), "dry_run");
        assert_eq!(cfg.volume_dir, PathBuf::from("/data"));
        assert_eq!(cfg.artifact_root(), PathBuf::from("/data/videos"));
        assert_eq!(cfg.database_path(), PathBuf::from("/data/demusifier.db"));
        assert_eq!(cfg.listen_addr.port(), 8080);
        assert_eq!(cfg.inference_timeout, Duration::from_secs(600));
        assert_eq!(cfg.submit_max_attempts, 3);
        assert_eq!(cfg.max_upload_bytes, 1 << 30);
        assert_eq!(cfg.job_store, JobStoreKind::Sqlite);
    }

    #[test]
    fn replicate_requires_token_and_model() {
        let err = config(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { var: "REPLICATE_API_TOKEN", .. }));

        let err = config(&[("REPLICATE_API_TOKEN", "r8_x")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { var: "REPLICATE_MODEL", .. }));

        let cfg = config(&[
            ("REPLICATE_API_TOKEN", "r8_x"),
            ("REPLICATE_MODEL", "cjwbw/demucs"),
            ("VOLUME_DIR", "/tmp/vol"),
            ("INFERENCE_TIMEOUT_SECS", "30"),
            ("JOB_STORE", "memory"),
        ])
        .unwrap();
        assert_eq!(
            cfg.inference,
            InferenceMode::Replicate {
                base_url: DEFAULT_BASE_URL.to_string(),
                api_token: "r8_x".to_string(),
                model: "cjwbw/demucs".to_string(),
                stem: "vocals".to_string(),
            }
        );
        assert_eq!(cfg.inference_timeout, Duration::from_secs(30));
        assert_eq!(cfg.job_store, JobStoreKind::Memory);
        assert_eq!(cfg.artifact_root(), PathBuf::from("/tmp/vol/videos"));
    }

    #[test]
    fn bad_values_are_reported() {
        let err = config(&[("INFERENCE_DRY_RUN", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "INFERENCE_DRY_RUN", .. }));

        let err = config(&[("INFERENCE_DRY_RUN", "1"), ("SUBMIT_MAX_ATTEMPTS", "-1")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "SUBMIT_MAX_ATTEMPTS", .. }));

        let err = config(&[("INFERENCE_DRY_RUN", "1"), ("JOB_STORE", "postgres")]).unwrap_err();
        assert!(err.to_string().contains("JOB_STORE"));

        let err = config(&[("INFERENCE_DRY_RUN", "1"), ("DURATION_TOLERANCE_SECS", "-2")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "DURATION_TOLERANCE_SECS", .. }));
    }

    #[test]
    fn debug_output_hides_the_token() {
        let cfg = config(&[("REPLICATE_API_TOKEN", "r8_secret"), ("REPLICATE_MODEL", "a/b")]).unwrap();
        assert!(!format!("{cfg:?}").contains("r8_secret"));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let cfg = config(&[("INFERENCE_DRY_RUN", "yes"), ("LISTEN_ADDR", "  ")]).unwrap();
        assert_eq!(cfg.listen_addr, SocketAddr::from(([0, 0, 0, 0], 8080)));
    }
}
