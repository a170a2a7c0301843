mod comments;
mod error;
mod extract;
mod failure;
mod pacing;
mod page_model;
mod retry;
mod session;
mod sora;
mod surface;

pub use comments::CommentClassifier;
pub use error::{BrowserError, BrowserResult};
pub use extract::DetailNormalizer;
pub use failure::{classify, log_failure, FailureClassifier, FailureEntry, FailureKind, FailureLog};
pub use pacing::Pacer;
pub use page_model::{
    resolve_model, CommentRules, DescriptionRules, PageModel, RawCommentBlock, RawCounter,
    RawItemDetail, RawProfileLink, RawTextBlock, ITEM_ATTR, REVEAL_ATTR,
};
pub use retry::{RetryOutcome, RetryPolicy};
pub use session::{BrowserContext, BrowserLauncher, BrowserSession};
pub use sora::SoraPageModel;
pub use surface::{BrowserSurface, BrowserSurfaceFactory, ListSurface, SurfaceFactory};
