use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use url::Url;

use crate::harvest::models::{CreatorProfile, EngagementCounts, ItemMetadata, MediaLocations};

use super::comments::CommentClassifier;
use super::page_model::{PageModel, RawItemDetail};

/// Turns the raw detail payload into item metadata. Every field extraction is
/// independent and best effort; a miss leaves the field unknown instead of
/// failing the record.
pub struct DetailNormalizer {
    model: Arc<dyn PageModel>,
    classifier: CommentClassifier,
    count_regex: Regex,
}

impl DetailNormalizer {
    pub fn new(model: Arc<dyn PageModel>) -> Self {
        let classifier = CommentClassifier::new(model.comment_rules().clone());
        let count_regex = Regex::new(r"([\d.]+)\s*([KMB]?)").expect("valid regex");
        Self {
            model,
            classifier,
            count_regex,
        }
    }

    pub fn normalize(&self, raw: &RawItemDetail) -> ItemMetadata {
        let creator = self.creator(raw);
        let skip_identity = creator.as_ref().map(|profile| profile.identity.as_str());
        let comments = self.classifier.classify(&raw.comment_blocks, skip_identity);
        let mut engagement = self.engagement(raw);
        if engagement.comment_count == 0 {
            engagement.comment_count = comments.len() as u64;
        }
        ItemMetadata {
            title: select_title(&raw.title_candidates),
            description: self.description(raw),
            creator,
            engagement,
            comments,
            media: MediaLocations {
                payload: first_nonempty(&raw.media_candidates),
                thumbnail: first_nonempty(&raw.thumbnail_candidates),
            },
            discovered_at: Utc::now(),
        }
    }

    /// Parses counter text with K/M/B suffixes: "1.2K" is 1200, "" is 0.
    pub fn parse_count(&self, text: &str) -> u64 {
        let Some(caps) = self.count_regex.captures(text) else {
            return 0;
        };
        let Some(number) = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok()) else {
            return 0;
        };
        let multiplier = match caps.get(2).map(|m| m.as_str()) {
            Some("K") => 1_000.0,
            Some("M") => 1_000_000.0,
            Some("B") => 1_000_000_000.0,
            _ => 1.0,
        };
        (number * multiplier).round() as u64
    }

    fn engagement(&self, raw: &RawItemDetail) -> EngagementCounts {
        let mut counts = EngagementCounts::default();
        for counter in &raw.counters {
            let value = self.parse_count(&counter.value_text);
            match counter.kind.as_str() {
                "likes" => counts.likes = value,
                "remixes" => counts.remix_count = value,
                _ => {}
            }
        }
        counts
    }

    fn creator(&self, raw: &RawItemDetail) -> Option<CreatorProfile> {
        let link = raw
            .profile_links
            .iter()
            .find(|link| !link.href.trim().is_empty())?;
        let identity = identity_from_href(&link.href)?;
        let display_name = link
            .img_alt
            .clone()
            .filter(|value| !value.trim().is_empty())
            .or_else(|| Some(link.text.trim().to_string()).filter(|value| !value.is_empty()))
            .unwrap_or_else(|| identity.clone());
        Some(CreatorProfile {
            identity,
            display_name,
            profile_url: absolutize(&raw.location, &link.href),
            avatar_url: link.img_src.clone().filter(|value| !value.trim().is_empty()),
            verified: link.verified,
        })
    }

    fn description(&self, raw: &RawItemDetail) -> Option<String> {
        let rules = self.model.description_rules();
        raw.text_blocks.iter().find_map(|block| {
            let text = block.text.trim();
            if text.chars().count() < rules.min_length {
                return None;
            }
            let numeric = text.replace([',', '.'], "");
            if !numeric.is_empty() && numeric.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            let classes = block.classes.to_lowercase();
            if classes.contains("button") || classes.contains("btn") {
                return None;
            }
            let lower = text.to_lowercase();
            if rules.boilerplate.iter().any(|pattern| lower.contains(pattern)) {
                return None;
            }
            Some(text.to_string())
        })
    }
}

fn select_title(candidates: &[String]) -> Option<String> {
    candidates
        .iter()
        .map(|candidate| candidate.trim())
        .filter(|candidate| !candidate.is_empty())
        .max_by_key(|candidate| candidate.len())
        .map(|candidate| candidate.to_string())
}

fn first_nonempty(items: &[String]) -> Option<String> {
    items
        .iter()
        .map(|item| item.trim())
        .find(|item| !item.is_empty())
        .map(String::from)
}

fn identity_from_href(href: &str) -> Option<String> {
    let path = href.split(['?', '#']).next().unwrap_or(href);
    path.rsplit('/')
        .find(|part| !part.is_empty())
        .map(|part| part.to_string())
}

fn absolutize(base: &str, href: &str) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    Url::parse(base)
        .ok()?
        .join(href)
        .ok()
        .map(|joined| joined.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::page_model::{RawCounter, RawProfileLink, RawTextBlock};
    use crate::browser::sora::SoraPageModel;

    fn normalizer() -> DetailNormalizer {
        DetailNormalizer::new(Arc::new(SoraPageModel::new()))
    }

    #[test]
    fn parse_count_handles_suffixes() {
        let normalizer = normalizer();
        assert_eq!(normalizer.parse_count("1.2K"), 1200);
        assert_eq!(normalizer.parse_count("3M"), 3_000_000);
        assert_eq!(normalizer.parse_count("500"), 500);
        assert_eq!(normalizer.parse_count(""), 0);
        assert_eq!(normalizer.parse_count("2B"), 2_000_000_000);
        assert_eq!(normalizer.parse_count("no digits"), 0);
    }

    #[test]
    fn title_prefers_longest_candidate() {
        assert_eq!(
            select_title(&[
                "Sora".to_string(),
                "Sora - Spring Lookbook remix".to_string(),
                " ".to_string(),
            ]),
            Some("Sora - Spring Lookbook remix".to_string())
        );
        assert_eq!(select_title(&[]), None);
    }

    #[test]
    fn description_skips_chrome_blocks() {
        let normalizer = normalizer();
        let raw = RawItemDetail {
            location: "https://sora.example.com/p/abc".into(),
            text_blocks: vec![
                RawTextBlock {
                    text: "Sign up".into(),
                    classes: "inline max-h-24".into(),
                },
                RawTextBlock {
                    text: "12,403".into(),
                    classes: "inline max-h-24".into(),
                },
                RawTextBlock {
                    text: "a quiet greenhouse at dawn, glass panes fogged over".into(),
                    classes: "inline max-h-24 btn-primary".into(),
                },
                RawTextBlock {
                    text: "a quiet greenhouse at dawn, glass panes fogged over".into(),
                    classes: "inline max-h-24".into(),
                },
            ],
            ..RawItemDetail::default()
        };
        let metadata = normalizer.normalize(&raw);
        assert_eq!(
            metadata.description.as_deref(),
            Some("a quiet greenhouse at dawn, glass panes fogged over")
        );
    }

    #[test]
    fn creator_from_profile_link() {
        let normalizer = normalizer();
        let raw = RawItemDetail {
            location: "https://sora.example.com/p/abc".into(),
            profile_links: vec![RawProfileLink {
                href: "/profile/neo.artist".into(),
                text: "neo.artist".into(),
                img_src: Some("https://cdn.example.com/a.png".into()),
                img_alt: Some("Neo Artist".into()),
                verified: true,
            }],
            ..RawItemDetail::default()
        };
        let creator = normalizer.normalize(&raw).creator.expect("creator");
        assert_eq!(creator.identity, "neo.artist");
        assert_eq!(creator.display_name, "Neo Artist");
        assert_eq!(
            creator.profile_url.as_deref(),
            Some("https://sora.example.com/profile/neo.artist")
        );
        assert!(creator.verified);
    }

    #[test]
    fn engagement_from_icon_hints() {
        let normalizer = normalizer();
        let raw = RawItemDetail {
            counters: vec![
                RawCounter {
                    kind: "likes".into(),
                    value_text: "1.2K".into(),
                },
                RawCounter {
                    kind: "remixes".into(),
                    value_text: "37".into(),
                },
                RawCounter {
                    kind: "unknown".into(),
                    value_text: "999".into(),
                },
            ],
            ..RawItemDetail::default()
        };
        let engagement = normalizer.normalize(&raw).engagement;
        assert_eq!(engagement.likes, 1200);
        assert_eq!(engagement.remix_count, 37);
        assert_eq!(engagement.share_count, 0);
    }

    #[test]
    fn media_prefers_first_nonempty_candidate() {
        let normalizer = normalizer();
        let raw = RawItemDetail {
            media_candidates: vec![
                "  ".into(),
                "https://cdn.example.com/clip.mp4".into(),
                "https://cdn.example.com/other.mp4".into(),
            ],
            thumbnail_candidates: vec!["https://cdn.example.com/poster.jpg".into()],
            ..RawItemDetail::default()
        };
        let media = normalizer.normalize(&raw).media;
        assert_eq!(
            media.payload.as_deref(),
            Some("https://cdn.example.com/clip.mp4")
        );
        assert_eq!(
            media.thumbnail.as_deref(),
            Some("https://cdn.example.com/poster.jpg")
        );
    }
}
