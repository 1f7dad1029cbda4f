//! Configuration for callscribe.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CALLSCRIBE_DATA_DIR, CALLSCRIBE_MODEL, ...)
//! 2. Config file (.callscribe/config.yaml)
//! 3. Defaults (./data, large-v3-turbo, auto device)
//!
//! Config file discovery:
//! - Searches current directory and parents for .callscribe/config.yaml
//! - Falls back to ~/.callscribe/config.yaml

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<std::result::Result<Config, String>> = OnceLock::new();

/// Requested inference device for the speech engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    /// Prefer the accelerator, fall back to CPU
    Auto,
    Cuda,
    Cpu,
}

/// Device after `auto` resolution; what the engine is actually handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedDevice {
    Cuda,
    Cpu,
}

impl Device {
    pub fn resolve(self) -> ResolvedDevice {
        match self {
            Device::Cuda => ResolvedDevice::Cuda,
            Device::Cpu => ResolvedDevice::Cpu,
            Device::Auto => {
                if accelerator_available() {
                    ResolvedDevice::Cuda
                } else {
                    ResolvedDevice::Cpu
                }
            }
        }
    }
}

impl ResolvedDevice {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolvedDevice::Cuda => "cuda",
            ResolvedDevice::Cpu => "cpu",
        }
    }

    pub fn is_accelerator(self) -> bool {
        matches!(self, ResolvedDevice::Cuda)
    }
}

impl std::str::FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Device::Auto),
            "cuda" => Ok(Device::Cuda),
            "cpu" => Ok(Device::Cpu),
            other => Err(format!("unknown device: {other} (expected auto|cuda|cpu)")),
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Device::Auto => "auto",
            Device::Cuda => "cuda",
            Device::Cpu => "cpu",
        };
        f.write_str(s)
    }
}

/// The accelerator is visible to the engine iff the NVIDIA userland is on PATH.
fn accelerator_available() -> bool {
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| dir.join("nvidia-smi").is_file())
        })
        .unwrap_or(false)
}

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub data_dir: Option<String>,
    pub model: Option<String>,
    pub device: Option<Device>,
    pub language: Option<String>,
    pub sample_rate: Option<u32>,
    pub split_workers: Option<usize>,
    pub transcribe_workers: Option<usize>,
    pub whisper_bin: Option<String>,
    pub remote_host: Option<String>,
    pub remote_path: Option<String>,
}

/// Remote recordings location for the acquisition step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    /// user@host for ssh/rsync
    pub host: String,
    /// Remote directory containing the mp3 recordings
    pub path: String,
}

/// Resolved configuration with defaults applied.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the on-disk layout (recordings/, whisper/, jobs.jsonl)
    pub data_dir: PathBuf,

    /// Speech engine model name
    pub model: String,

    /// Requested inference device
    pub device: Device,

    /// Transcription language hint
    pub language: String,

    /// Target sample rate for normalized leg waveforms
    pub sample_rate: u32,

    /// Concurrent ffmpeg channel splits
    pub split_workers: usize,

    /// Concurrent transcriptions when no accelerator is in play
    pub transcribe_workers: usize,

    /// Speech engine binary
    pub whisper_bin: PathBuf,

    /// Remote recordings source, if configured
    pub remote: Option<RemoteEndpoint>,

    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl Config {
    pub fn recordings_dir(&self) -> PathBuf {
        self.data_dir.join("recordings")
    }

    pub fn whisper_dir(&self) -> PathBuf {
        self.data_dir.join("whisper")
    }

    pub fn jobs_path(&self) -> PathBuf {
        self.data_dir.join("jobs.jsonl")
    }

    pub fn jobs_lock_path(&self) -> PathBuf {
        self.data_dir.join("jobs.lock")
    }

    /// Per-call artifact directory (leg waveforms, transcripts, conversation)
    pub fn call_dir(&self, call_id: &str) -> PathBuf {
        self.whisper_dir().join(call_id)
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

/// Find config file by searching current directory and parents, then home
fn find_config_file() -> Option<PathBuf> {
    if let Ok(mut current) = std::env::current_dir() {
        loop {
            let candidate = current.join(".callscribe").join("config.yaml");
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                break;
            }
        }
    }

    let home_candidate = dirs::home_dir()?.join(".callscribe").join("config.yaml");
    home_candidate.exists().then_some(home_candidate)
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("CALLSCRIBE_{name}"))
        .ok()
        .filter(|v| !v.is_empty())
}

/// Load configuration from all sources
fn load_config() -> Result<Config> {
    let config_file = find_config_file();
    let file = match config_file {
        Some(ref path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    let data_dir = env_var("DATA_DIR")
        .or(file.data_dir)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("data"));

    let model = env_var("MODEL")
        .or(file.model)
        .unwrap_or_else(|| "large-v3-turbo".to_string());

    let device = match env_var("DEVICE") {
        Some(raw) => raw
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .context("Invalid CALLSCRIBE_DEVICE")?,
        None => file.device.unwrap_or(Device::Auto),
    };

    let language = env_var("LANGUAGE")
        .or(file.language)
        .unwrap_or_else(|| "en".to_string());

    let sample_rate = match env_var("SAMPLE_RATE") {
        Some(raw) => raw.parse().context("Invalid CALLSCRIBE_SAMPLE_RATE")?,
        None => file.sample_rate.unwrap_or(16_000),
    };

    let split_workers = match env_var("SPLIT_WORKERS") {
        Some(raw) => raw.parse().context("Invalid CALLSCRIBE_SPLIT_WORKERS")?,
        None => file.split_workers.unwrap_or_else(default_parallelism),
    }
    .max(1);

    let transcribe_workers = match env_var("TRANSCRIBE_WORKERS") {
        Some(raw) => raw.parse().context("Invalid CALLSCRIBE_TRANSCRIBE_WORKERS")?,
        None => file
            .transcribe_workers
            .unwrap_or_else(|| default_parallelism() / 2),
    }
    .max(1);

    let whisper_bin = env_var("WHISPER_BIN")
        .or(file.whisper_bin)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("whisper"));

    let remote_host = env_var("REMOTE_HOST").or(file.remote_host);
    let remote_path = env_var("REMOTE_PATH").or(file.remote_path);
    let remote = match (remote_host, remote_path) {
        (Some(host), Some(path)) => Some(RemoteEndpoint { host, path }),
        (None, None) => None,
        _ => anyhow::bail!(
            "Remote sync needs both CALLSCRIBE_REMOTE_HOST and CALLSCRIBE_REMOTE_PATH"
        ),
    };

    Ok(Config {
        data_dir,
        model,
        device,
        language,
        sample_rate,
        split_workers,
        transcribe_workers,
        whisper_bin,
        remote,
        config_file,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static Config> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}
