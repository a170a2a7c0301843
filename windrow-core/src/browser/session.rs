use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, NavigateParams,
};
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use rand::{seq::SliceRandom, Rng};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BrowserConfig;

use super::error::{BrowserError, BrowserResult};

#[derive(Debug, Clone)]
pub struct ViewportSpec {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
}

// Keeps the ephemeral user-data dir alive for the lifetime of the session.
#[derive(Debug)]
enum ProfileDir {
    Configured(PathBuf),
    Ephemeral(TempDir),
}

impl ProfileDir {
    fn path(&self) -> &std::path::Path {
        match self {
            ProfileDir::Configured(path) => path,
            ProfileDir::Ephemeral(dir) => dir.path(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrowserLauncher {
    config: Arc<BrowserConfig>,
}

impl BrowserLauncher {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    pub async fn launch(&self) -> BrowserResult<BrowserSession> {
        let session_id = Uuid::new_v4();
        let profile = self.allocate_profile()?;
        let viewport = self.select_viewport();
        let user_agent = self.select_user_agent();
        let headless = self.config.chromium.headless;
        let chromium_config =
            self.build_chromium_config(&profile, &viewport, &user_agent, headless)?;
        info!(
            session = %session_id,
            width = viewport.width,
            height = viewport.height,
            headless,
            ua = %user_agent,
            "Starting Chromium session"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        // The handler stream must keep draining or CDP calls stall.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "CDP handler event error");
                }
            }
        });

        Ok(BrowserSession {
            id: session_id,
            browser,
            _profile: profile,
            handler_task: Some(handler_task),
            config: Arc::clone(&self.config),
            viewport,
            user_agent,
        })
    }

    fn allocate_profile(&self) -> BrowserResult<ProfileDir> {
        match &self.config.profile.user_data_dir {
            Some(dir) if !dir.is_empty() => {
                let path = PathBuf::from(dir);
                std::fs::create_dir_all(&path)?;
                Ok(ProfileDir::Configured(path))
            }
            _ => {
                let dir = tempfile::Builder::new()
                    .prefix("windrow-profile-")
                    .tempdir()?;
                Ok(ProfileDir::Ephemeral(dir))
            }
        }
    }

    fn select_viewport(&self) -> ViewportSpec {
        let section = &self.config.viewport;
        let mut rng = rand::thread_rng();
        let [base_w, base_h] = section
            .resolutions
            .choose(&mut rng)
            .copied()
            .unwrap_or([1366, 768]);
        let [scale_lo, scale_hi] = section.device_scale_factor;
        let scale = rng.gen_range(scale_lo..=scale_hi) as f64;
        let spread = section.jitter_pixels as i64;
        let mut jittered = |base: u32, floor: i64, ceil: i64| {
            (base as i64 + rng.gen_range(-spread..=spread)).clamp(floor, ceil) as u32
        };
        ViewportSpec {
            width: jittered(base_w, 640, 2560),
            height: jittered(base_h, 480, 1600),
            device_scale_factor: scale,
        }
    }

    fn select_user_agent(&self) -> String {
        let pool = &self.config.user_agents.pool;
        let mut rng = rand::thread_rng();
        pool.choose(&mut rng).cloned().unwrap_or_else(|| {
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
             Chrome/120.0 Safari/537.36"
                .to_string()
        })
    }

    fn build_chromium_config(
        &self,
        profile: &ProfileDir,
        viewport: &ViewportSpec,
        user_agent: &str,
        headless: bool,
    ) -> BrowserResult<ChromiumConfig> {
        let chromium = &self.config.chromium;
        let flags = &self.config.flags;

        let mut args = vec![
            format!("--window-size={},{}", viewport.width, viewport.height),
            format!("--user-agent={user_agent}"),
            "--password-store=basic".to_string(),
            "--disable-background-timer-throttling".to_string(),
        ];
        if flags.no_first_run {
            args.push("--no-first-run".into());
        }
        if chromium.disable_gpu {
            args.push("--disable-gpu".into());
        }
        if flags.mute_audio {
            args.push("--mute-audio".into());
        }
        if flags.disable_automation_controlled {
            args.push("--disable-features=AutomationControlled".into());
        }
        for feature in &flags.disable_blink_features {
            args.push(format!("--disable-blink-features={feature}"));
        }
        if !flags.autoplay_policy.is_empty() {
            args.push(format!("--autoplay-policy={}", flags.autoplay_policy));
        }
        if let Some(lang) = &flags.lang {
            args.push(format!("--lang={lang}"));
        }
        if let Some(accept) = &flags.accept_language {
            args.push(format!("--accept-lang={accept}"));
        }

        let mut builder = ChromiumConfig::builder()
            .chrome_executable(&chromium.executable_path)
            .user_data_dir(profile.path())
            .viewport(ChromiumViewport {
                width: viewport.width,
                height: viewport.height,
                device_scale_factor: Some(viewport.device_scale_factor),
                emulating_mobile: false,
                is_landscape: viewport.width >= viewport.height,
                has_touch: false,
            })
            .args(args);

        if !headless {
            builder = builder.with_head();
        }
        if !chromium.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(timeout) = chromium.tab_timeout_seconds {
            builder = builder.request_timeout(Duration::from_secs(timeout));
        }

        builder.build().map_err(BrowserError::Configuration)
    }
}

#[derive(Debug)]
pub struct BrowserSession {
    id: Uuid,
    browser: Browser,
    _profile: ProfileDir,
    handler_task: Option<JoinHandle<()>>,
    config: Arc<BrowserConfig>,
    viewport: ViewportSpec,
    user_agent: String,
}

impl BrowserSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn viewport(&self) -> &ViewportSpec {
        &self.viewport
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    pub async fn new_context(&self) -> BrowserResult<BrowserContext> {
        let params = CreateTargetParams::new("about:blank");
        let page = self.browser.new_page(params).await?;
        self.configure_page(&page).await?;
        Ok(BrowserContext { page })
    }

    pub async fn shutdown(mut self) -> BrowserResult<()> {
        info!(session = %self.id, "Closing Chromium session");
        if let Err(err) = self.browser.close().await {
            warn!(session = %self.id, error = %err, "Browser close failed");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "Handler task ended abnormally");
            }
        }
        Ok(())
    }

    async fn configure_page(&self, page: &Page) -> BrowserResult<()> {
        page.enable_stealth_mode_with_agent(&self.user_agent)
            .await?;

        let mut ua_override =
            SetUserAgentOverrideParams::builder().user_agent(self.user_agent.clone());
        if let Some(accept) = &self.config.flags.accept_language {
            ua_override = ua_override.accept_language(accept.clone());
        }
        page.set_user_agent(ua_override.build().map_err(BrowserError::Configuration)?)
            .await?;

        // Runs before each new document, so the first load already reports
        // the configured locale.
        if let Some(lang) = &self.config.flags.lang {
            let script = format!(
                "Object.defineProperty(navigator, 'language', {{ get: () => '{lang}' }});\n\
                 Object.defineProperty(navigator, 'languages', {{ get: () => ['{lang}', 'en-US'] }});"
            );
            page.evaluate_on_new_document(
                AddScriptToEvaluateOnNewDocumentParams::builder()
                    .source(script)
                    .build()
                    .map_err(BrowserError::Configuration)?,
            )
            .await?;
        }

        Ok(())
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        let still_running = self
            .handler_task
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false);
        if still_running {
            warn!(
                session = %self.id,
                "Session dropped without shutdown; Chromium may linger"
            );
        }
    }
}

#[derive(Debug)]
pub struct BrowserContext {
    page: Page,
}

impl BrowserContext {
    pub fn page(&self) -> &Page {
        &self.page
    }

    pub async fn goto(&self, url: &str) -> BrowserResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        self.page.goto(params).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }
}
