use std::time::Duration;

use rand::rngs::ThreadRng;
use rand::{thread_rng, Rng};
use tokio::time::sleep;

use chromiumoxide::element::Element;
use chromiumoxide::layout::Point;
use chromiumoxide::page::Page;

use crate::config::PacingSection;

use super::error::{BrowserError, BrowserResult};

#[derive(Debug)]
pub struct Pacer {
    config: PacingSection,
    rng: ThreadRng,
}

impl Pacer {
    pub fn new(config: PacingSection) -> Self {
        Self {
            config,
            rng: thread_rng(),
        }
    }

    pub async fn idle(&mut self) -> BrowserResult<()> {
        let delay = self.random_duration(self.config.idle_ms);
        sleep(delay).await;
        Ok(())
    }

    pub async fn pause(&mut self, bounds: [u64; 2]) {
        let delay = self.random_duration(bounds);
        sleep(delay).await;
    }

    pub async fn click_element(&mut self, page: &Page, element: &Element) -> BrowserResult<()> {
        let bbox = element.bounding_box().await.map_err(|err| {
            BrowserError::Unexpected(format!("failed to get element bounding box: {err}"))
        })?;
        let target = Point::new(
            bbox.x + self.rng.gen_range(0.3..0.7) * bbox.width,
            bbox.y + self.rng.gen_range(0.2..0.6) * bbox.height,
        );
        page.move_mouse(target)
            .await
            .map_err(|err| BrowserError::Unexpected(format!("failed to move mouse: {err}")))?;
        let hesitation = self.random_duration(self.config.click_hesitation_ms);
        sleep(hesitation).await;
        element
            .click()
            .await
            .map_err(|err| BrowserError::Unexpected(format!("failed to click element: {err}")))?;
        let dwell = self.random_duration(self.config.click_dwell_ms);
        sleep(dwell).await;
        Ok(())
    }

    pub async fn scroll_by(&mut self, page: &Page, delta: f64) -> BrowserResult<()> {
        let pause = self.random_duration(self.config.scroll_pause_ms);
        let js = format!("window.scrollBy({{ top: {delta}, behavior: 'smooth' }});");
        page.evaluate(js.as_str()).await.map_err(|err| {
            BrowserError::Unexpected(format!("failed to execute scroll script: {err}"))
        })?;
        sleep(pause).await;
        Ok(())
    }

    fn random_duration(&mut self, bounds: [u64; 2]) -> Duration {
        let [lower, upper] = bounds;
        if upper == 0 {
            return Duration::from_millis(0);
        }
        let ms = self.rng.gen_range(lower..=upper.max(lower));
        Duration::from_millis(ms)
    }
}
