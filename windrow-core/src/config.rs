use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    pub chromium: ChromiumSection,
    pub flags: FlagsSection,
    pub user_agents: UserAgentSection,
    pub viewport: ViewportSection,
    pub pacing: PacingSection,
    pub profile: ProfileSection,
    pub observability: ObservabilitySection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChromiumSection {
    pub executable_path: String,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub tab_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlagsSection {
    pub no_first_run: bool,
    pub disable_automation_controlled: bool,
    pub disable_blink_features: Vec<String>,
    pub mute_audio: bool,
    pub autoplay_policy: String,
    pub lang: Option<String>,
    pub accept_language: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentSection {
    pub pool: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewportSection {
    pub resolutions: Vec<[u32; 2]>,
    pub jitter_pixels: u32,
    pub device_scale_factor: [f32; 2],
}

#[derive(Debug, Clone, Deserialize)]
pub struct PacingSection {
    pub click_hesitation_ms: [u64; 2],
    pub click_dwell_ms: [u64; 2],
    pub scroll_pause_ms: [u64; 2],
    pub idle_ms: [u64; 2],
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileSection {
    pub user_data_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilitySection {
    pub failure_log: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HarvestConfig {
    pub site: SiteSection,
    pub materializer: MaterializerSection,
    pub traversal: TraversalSection,
    pub recovery: RecoverySection,
    pub batch: BatchSection,
    pub storage: StorageSection,
    pub downloads: DownloadsSection,
}

impl HarvestConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.storage.output_dir).join(path)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteSection {
    pub page_model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaterializerSection {
    pub max_reveals: usize,
    pub reveal_wait_ms: [u64; 2],
    pub settle_wait_ms: [u64; 2],
}

#[derive(Debug, Clone, Deserialize)]
pub struct TraversalSection {
    pub activation_attempts: usize,
    pub activation_backoff_ms: [u64; 2],
    pub item_delay_ms: [u64; 2],
    pub reload_poll_ms: u64,
    pub reload_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecoverySection {
    pub max_attempts: usize,
    pub rebuild_backoff_ms: [u64; 2],
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchSection {
    pub target_delay_ms: [u64; 2],
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    pub db_path: String,
    pub output_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadsSection {
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct ConfigBundle {
    pub browser: BrowserConfig,
    pub harvest: HarvestConfig,
}

impl ConfigBundle {
    pub fn from_directory<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(ConfigError::MissingDirectory {
                path: dir.to_path_buf(),
            });
        }
        let browser = load_browser_config(dir.join("browser.toml"))?;
        let harvest = load_harvest_config(dir.join("harvest.toml"))?;
        Ok(Self { browser, harvest })
    }
}

pub fn load_browser_config<P: AsRef<Path>>(path: P) -> Result<BrowserConfig> {
    load_toml(path)
}

pub fn load_harvest_config<P: AsRef<Path>>(path: P) -> Result<HarvestConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
