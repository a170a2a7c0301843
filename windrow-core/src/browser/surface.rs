use std::sync::Arc;

use async_trait::async_trait;

use super::error::{BrowserError, BrowserResult};
use super::pacing::Pacer;
use super::page_model::{PageModel, RawItemDetail, ITEM_ATTR, REVEAL_ATTR};
use super::session::{BrowserContext, BrowserLauncher, BrowserSession};

/// The automation gateway as the traversal sees it. Implementations expose a
/// windowed item list addressed by index; element handles never cross this
/// boundary.
#[async_trait(?Send)]
pub trait ListSurface {
    async fn open_root(&mut self, url: &str) -> BrowserResult<()>;

    async fn current_location(&mut self) -> BrowserResult<String>;

    /// Re-tags the materialized item controls and returns how many exist.
    async fn materialized_count(&mut self) -> BrowserResult<usize>;

    /// Activates the reveal-more control. `false` means the control is absent.
    async fn reveal_more(&mut self) -> BrowserResult<bool>;

    /// Resolves the item control for `index` fresh and activates it.
    async fn activate_item(&mut self, index: usize) -> BrowserResult<()>;

    async fn collect_detail(&mut self) -> BrowserResult<RawItemDetail>;

    async fn idle(&mut self, bounds: [u64; 2]) -> BrowserResult<()>;

    async fn close(&mut self) -> BrowserResult<()> {
        Ok(())
    }
}

#[async_trait(?Send)]
pub trait SurfaceFactory: Send + Sync {
    async fn create(&self) -> BrowserResult<Box<dyn ListSurface>>;
}

pub struct BrowserSurface {
    session: Option<BrowserSession>,
    context: BrowserContext,
    model: Arc<dyn PageModel>,
    pacer: Pacer,
}

impl BrowserSurface {
    pub async fn open(
        launcher: &BrowserLauncher,
        model: Arc<dyn PageModel>,
    ) -> BrowserResult<Self> {
        let session = launcher.launch().await?;
        let context = session.new_context().await?;
        let pacer = Pacer::new(launcher.config().pacing.clone());
        Ok(Self {
            session: Some(session),
            context,
            model,
            pacer,
        })
    }

    fn ensure_open(&self) -> BrowserResult<()> {
        if self.session.is_none() {
            return Err(BrowserError::SessionClosed("surface already closed".into()));
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl ListSurface for BrowserSurface {
    async fn open_root(&mut self, url: &str) -> BrowserResult<()> {
        self.ensure_open()?;
        self.context.goto(url).await
    }

    async fn current_location(&mut self) -> BrowserResult<String> {
        self.ensure_open()?;
        self.context
            .page()
            .evaluate("window.location.href")
            .await
            .map_err(|err| BrowserError::Unexpected(format!("failed to read location: {err}")))?
            .into_value()
            .map_err(|err| BrowserError::Unexpected(format!("failed to decode location: {err}")))
    }

    async fn materialized_count(&mut self) -> BrowserResult<usize> {
        self.ensure_open()?;
        self.context
            .page()
            .evaluate(self.model.tag_items_script())
            .await
            .map_err(|err| BrowserError::Unexpected(format!("failed to tag items: {err}")))?
            .into_value()
            .map_err(|err| BrowserError::Unexpected(format!("failed to decode item count: {err}")))
    }

    async fn reveal_more(&mut self) -> BrowserResult<bool> {
        self.ensure_open()?;
        let found: bool = self
            .context
            .page()
            .evaluate(self.model.tag_reveal_script())
            .await
            .map_err(|err| {
                BrowserError::Unexpected(format!("failed to tag reveal control: {err}"))
            })?
            .into_value()
            .map_err(|err| {
                BrowserError::Unexpected(format!("failed to decode reveal result: {err}"))
            })?;
        if !found {
            return Ok(false);
        }
        let selector = format!("[{REVEAL_ATTR}='0']");
        match self.context.page().find_element(selector.as_str()).await {
            Ok(element) => {
                self.pacer
                    .click_element(self.context.page(), &element)
                    .await?;
                Ok(true)
            }
            // Control vanished between tagging and resolution: exhaustion.
            Err(_) => Ok(false),
        }
    }

    async fn activate_item(&mut self, index: usize) -> BrowserResult<()> {
        self.ensure_open()?;
        let count: usize = self
            .context
            .page()
            .evaluate(self.model.tag_items_script())
            .await
            .map_err(|err| BrowserError::Unexpected(format!("failed to tag items: {err}")))?
            .into_value()
            .map_err(|err| BrowserError::Unexpected(format!("failed to decode item count: {err}")))?;
        if index >= count {
            return Err(BrowserError::Unexpected(format!(
                "item {index} not materialized (window holds {count})"
            )));
        }
        let selector = format!("[{ITEM_ATTR}='{index}']");
        let element = self.context.page().find_element(selector.as_str()).await?;
        self.pacer
            .click_element(self.context.page(), &element)
            .await
    }

    async fn collect_detail(&mut self) -> BrowserResult<RawItemDetail> {
        self.ensure_open()?;
        self.context
            .page()
            .evaluate(self.model.detail_script())
            .await
            .map_err(|err| {
                BrowserError::Extraction(format!("failed to collect detail payload: {err}"))
            })?
            .into_value()
            .map_err(|err| {
                BrowserError::Extraction(format!("failed to decode detail payload: {err}"))
            })
    }

    async fn idle(&mut self, bounds: [u64; 2]) -> BrowserResult<()> {
        self.pacer.pause(bounds).await;
        Ok(())
    }

    async fn close(&mut self) -> BrowserResult<()> {
        if let Some(session) = self.session.take() {
            session.shutdown().await?;
        }
        Ok(())
    }
}

pub struct BrowserSurfaceFactory {
    launcher: BrowserLauncher,
    model: Arc<dyn PageModel>,
}

impl BrowserSurfaceFactory {
    pub fn new(launcher: BrowserLauncher, model: Arc<dyn PageModel>) -> Self {
        Self { launcher, model }
    }

    pub fn model(&self) -> Arc<dyn PageModel> {
        Arc::clone(&self.model)
    }
}

#[async_trait(?Send)]
impl SurfaceFactory for BrowserSurfaceFactory {
    async fn create(&self) -> BrowserResult<Box<dyn ListSurface>> {
        let surface = BrowserSurface::open(&self.launcher, Arc::clone(&self.model)).await?;
        Ok(Box::new(surface))
    }
}
