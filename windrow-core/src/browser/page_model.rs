use std::sync::Arc;

use serde::Deserialize;

use super::sora::SoraPageModel;

// Attribute stamped onto every materialized item control; the integer value
// is the only handle the traversal keeps across steps.
pub const ITEM_ATTR: &str = "data-windrow-item";
pub const REVEAL_ATTR: &str = "data-windrow-reveal";

#[derive(Debug, Clone, Deserialize)]
pub struct RawProfileLink {
    pub href: String,
    pub text: String,
    pub img_src: Option<String>,
    pub img_alt: Option<String>,
    pub verified: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTextBlock {
    pub text: String,
    pub classes: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCounter {
    pub kind: String,
    pub value_text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCommentBlock {
    pub author_identity: Option<String>,
    pub author_display: Option<String>,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawItemDetail {
    pub location: String,
    pub title_candidates: Vec<String>,
    pub profile_links: Vec<RawProfileLink>,
    pub text_blocks: Vec<RawTextBlock>,
    pub counters: Vec<RawCounter>,
    pub comment_blocks: Vec<RawCommentBlock>,
    pub media_candidates: Vec<String>,
    pub thumbnail_candidates: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DescriptionRules {
    pub min_length: usize,
    pub boilerplate: Vec<&'static str>,
}

#[derive(Debug, Clone)]
pub struct CommentRules {
    pub min_length: usize,
    pub ui_words: Vec<&'static str>,
    pub ui_phrases: Vec<&'static str>,
    pub time_words: Vec<&'static str>,
}

/// Site-specific markup knowledge. Everything the traversal needs from a page
/// goes through these scripts and rules; nothing outside the implementations
/// names a selector.
pub trait PageModel: Send + Sync {
    fn name(&self) -> &str;

    /// Stamps every item control with `data-windrow-item='<idx>'` and returns
    /// the count. Re-run before each activation; previous stamps are cleared.
    fn tag_items_script(&self) -> &str;

    /// Locates the reveal control, scrolls it into view, stamps it with
    /// `data-windrow-reveal` and returns whether it was found.
    fn tag_reveal_script(&self) -> &str;

    /// Collects the raw detail payload for the current location.
    fn detail_script(&self) -> &str;

    /// Whether `location` is a valid item detail page reached from `root`.
    fn is_detail_location(&self, location: &str, root: &str) -> bool;

    fn description_rules(&self) -> &DescriptionRules;

    fn comment_rules(&self) -> &CommentRules;
}

pub fn resolve_model(name: &str) -> Option<Arc<dyn PageModel>> {
    match name {
        "sora" => Some(Arc::new(SoraPageModel::new())),
        _ => None,
    }
}
