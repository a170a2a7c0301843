use tracing::{debug, warn};

use crate::browser::{BrowserResult, ListSurface};
use crate::config::MaterializerSection;

use super::models::CountBound;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterializeOutcome {
    pub materialized: usize,
    pub exhausted: bool,
    pub reveals: usize,
}

/// Grows the windowed list until `bound` items are materialized or the page
/// stops yielding more. A missing reveal control and a window that stops
/// growing both count as exhaustion.
pub async fn materialize(
    surface: &mut dyn ListSurface,
    bound: CountBound,
    config: &MaterializerSection,
) -> BrowserResult<MaterializeOutcome> {
    let mut reveals = 0usize;
    let mut stagnant = 0u8;
    let mut count = surface.materialized_count().await?;

    loop {
        if bound.is_reached(count) {
            debug!(materialized = count, reveals, "window covers requested count");
            return Ok(MaterializeOutcome {
                materialized: count,
                exhausted: false,
                reveals,
            });
        }
        if reveals >= config.max_reveals {
            warn!(
                materialized = count,
                reveals, "reveal cap hit before requested count"
            );
            return Ok(MaterializeOutcome {
                materialized: count,
                exhausted: false,
                reveals,
            });
        }

        surface.idle(config.reveal_wait_ms).await?;
        if !surface.reveal_more().await? {
            debug!(
                materialized = count,
                reveals, "reveal control absent, window exhausted"
            );
            return Ok(MaterializeOutcome {
                materialized: count,
                exhausted: true,
                reveals,
            });
        }
        reveals += 1;
        surface.idle(config.settle_wait_ms).await?;

        let next = surface.materialized_count().await?;
        if next <= count {
            stagnant += 1;
            if stagnant >= 2 {
                debug!(
                    materialized = next,
                    reveals, "window stopped growing, treating as exhausted"
                );
                return Ok(MaterializeOutcome {
                    materialized: next,
                    exhausted: true,
                    reveals,
                });
            }
        } else {
            stagnant = 0;
        }
        count = next;
    }
}
