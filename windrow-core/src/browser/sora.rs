use super::page_model::{CommentRules, DescriptionRules, PageModel};

// Item controls on the rail are narrow buttons; the currently selected one
// carries an extra border class and is excluded so indexes stay stable.
const ITEM_TAG_SCRIPT: &str = r#"
(() => {
    document.querySelectorAll('[data-windrow-item]').forEach(node => {
        node.removeAttribute('data-windrow-item');
    });
    const buttons = Array.from(document.querySelectorAll('button')).filter(node => {
        const cls = typeof node.className === 'string' ? node.className : '';
        return cls.includes('h-8') && cls.includes('w-6') && !cls.includes('border-[1.5px]');
    });
    buttons.forEach((node, idx) => {
        node.setAttribute('data-windrow-item', String(idx));
    });
    return buttons.length;
})()
"#;

const REVEAL_TAG_SCRIPT: &str = r#"
(() => {
    document.querySelectorAll('[data-windrow-reveal]').forEach(node => {
        node.removeAttribute('data-windrow-reveal');
    });
    const candidates = Array.from(document.querySelectorAll('button')).filter(node => {
        const cls = typeof node.className === 'string' ? node.className : '';
        if (!cls.includes('w-4') || !cls.includes('shrink-0')) return false;
        return !!node.querySelector('div[class*="backdrop-blur"]');
    });
    if (!candidates.length) return false;
    const control = candidates[0];
    control.setAttribute('data-windrow-reveal', '0');
    control.scrollIntoView({ block: 'center', behavior: 'smooth' });
    return true;
})()
"#;

const DETAIL_SCRIPT: &str = r#"
(() => {
    const text = (el) => ((el && (el.innerText || el.textContent)) || '').trim();
    const unique = (items) => Array.from(new Set(items));

    const title_candidates = unique([
        document.title || '',
        (document.querySelector("meta[property='og:title']") || {}).content || '',
        text(document.querySelector('h1'))
    ].filter(Boolean));

    const profile_links = Array.from(document.querySelectorAll("a[href*='/profile/']")).map(node => {
        const img = node.querySelector('img');
        const badge = node.querySelector("svg[aria-label*='erified'], [class*='badge']");
        return {
            href: node.getAttribute('href') || '',
            text: text(node),
            img_src: img ? (img.getAttribute('src') || null) : null,
            img_alt: img ? (img.getAttribute('alt') || null) : null,
            verified: !!badge
        };
    });

    const text_blocks = Array.from(document.querySelectorAll("div.inline[class*='max-h-']")).map(node => ({
        text: text(node),
        classes: typeof node.className === 'string' ? node.className : ''
    }));

    const counters = [];
    document.querySelectorAll('button').forEach(node => {
        const cls = typeof node.className === 'string' ? node.className : '';
        if (!cls.includes('rounded-full')) return;
        const span = node.querySelector('span.truncate');
        if (!span) return;
        let kind = 'unknown';
        const path = node.querySelector('svg path');
        if (path && (path.getAttribute('d') || '').startsWith('M9 3.991')) kind = 'likes';
        const circle = node.querySelector('svg circle');
        if (circle && circle.getAttribute('cx') === '9' && circle.getAttribute('cy') === '9') kind = 'remixes';
        counters.push({ kind, value_text: text(span) });
    });

    const comment_blocks = [];
    const seen = new Set();
    document.querySelectorAll("a[href*='/profile/']").forEach(link => {
        const container = link.closest('div');
        if (!container || seen.has(container)) return;
        seen.add(container);
        const href = link.getAttribute('href') || '';
        const identity = href.split('/').filter(Boolean).pop() || null;
        const img = link.querySelector('img');
        const display = (img && img.getAttribute('alt')) || text(link) || null;
        const lines = text(container).split('\n')
            .map(line => line.trim())
            .filter(Boolean);
        comment_blocks.push({ author_identity: identity, author_display: display, lines });
    });

    const media_candidates = [];
    const video = document.querySelector('video');
    if (video) {
        if (video.currentSrc) media_candidates.push(video.currentSrc);
        if (video.src) media_candidates.push(video.src);
        video.querySelectorAll('source').forEach(src => {
            if (src.src) media_candidates.push(src.src);
        });
    }

    const thumbnail_candidates = [
        (document.querySelector("meta[property='og:image']") || {}).content || '',
        video ? (video.getAttribute('poster') || '') : ''
    ].filter(Boolean);

    return {
        location: window.location.href,
        title_candidates,
        profile_links,
        text_blocks,
        counters,
        comment_blocks,
        media_candidates: unique(media_candidates),
        thumbnail_candidates: unique(thumbnail_candidates)
    };
})()
"#;

#[derive(Debug)]
pub struct SoraPageModel {
    description_rules: DescriptionRules,
    comment_rules: CommentRules,
}

impl SoraPageModel {
    pub fn new() -> Self {
        Self {
            description_rules: DescriptionRules {
                min_length: 6,
                boilerplate: vec![
                    "like", "share", "download", "button", "profile", "login", "sign up",
                ],
            },
            comment_rules: CommentRules {
                min_length: 5,
                ui_words: vec![
                    "cast", "like", "share", "remix", "follow", "save", "edit", "delete",
                    "reply", "more",
                ],
                ui_phrases: vec![
                    "replies",
                    "reply",
                    "like",
                    "share",
                    "delete",
                    "edit",
                    "more",
                    "remixes",
                    "remix",
                    "load more",
                    "show more",
                    "view replies",
                    "comments",
                    "comment",
                    "cast",
                    "follow",
                    "following",
                    "unfollow",
                    "subscribe",
                    "subscribed",
                    "report",
                    "block",
                    "mute",
                    "copy",
                    "download",
                    "save",
                    "saved",
                    "bookmark",
                    "bookmarked",
                ],
                time_words: vec!["ago", "min", "hour", "day", "week", "month", "year"],
            },
        }
    }
}

impl Default for SoraPageModel {
    fn default() -> Self {
        Self::new()
    }
}

impl PageModel for SoraPageModel {
    fn name(&self) -> &str {
        "sora"
    }

    fn tag_items_script(&self) -> &str {
        ITEM_TAG_SCRIPT
    }

    fn tag_reveal_script(&self) -> &str {
        REVEAL_TAG_SCRIPT
    }

    fn detail_script(&self) -> &str {
        DETAIL_SCRIPT
    }

    fn is_detail_location(&self, location: &str, root: &str) -> bool {
        let location = location.trim_end_matches('/');
        let root = root.trim_end_matches('/');
        if location == root {
            return false;
        }
        if !location.contains("/p/") {
            return false;
        }
        let lower = location.to_lowercase();
        !(lower.contains("login") || lower.contains("auth") || lower.contains("signin"))
    }

    fn description_rules(&self) -> &DescriptionRules {
        &self.description_rules
    }

    fn comment_rules(&self) -> &CommentRules {
        &self.comment_rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_location_requires_item_path() {
        let model = SoraPageModel::new();
        let root = "https://sora.example.com/p/root123";
        assert!(model.is_detail_location("https://sora.example.com/p/abc999", root));
        assert!(!model.is_detail_location(root, root));
        assert!(!model.is_detail_location("https://sora.example.com/p/root123/", root));
        assert!(!model.is_detail_location("https://sora.example.com/explore", root));
        assert!(!model.is_detail_location("https://sora.example.com/login?next=/p/abc", root));
        assert!(!model.is_detail_location("https://auth.example.com/p/abc", root));
    }

    #[test]
    fn tag_scripts_clear_previous_marks() {
        let model = SoraPageModel::new();
        assert!(model.tag_items_script().contains("removeAttribute"));
        assert!(model.tag_reveal_script().contains("removeAttribute"));
        assert!(model.tag_reveal_script().contains("scrollIntoView"));
    }
}
