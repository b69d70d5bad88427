use lazy_regex::regex;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

#[allow(clippy::unwrap_used)]
static META_IMAGE_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"meta[property="og:image"], meta[name="twitter:image"], meta[property="twitter:image"]"#)
        .unwrap()
});
#[allow(clippy::unwrap_used)]
static IMG_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("img[src], img[data-src]").unwrap());
#[allow(clippy::unwrap_used)]
static STYLED_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(".tgme_widget_message_photo_wrap[style], a[style*='background-image']").unwrap()
});

const IMAGE_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "webp", "gif", "avif", "bmp", "jfif"];

/// Caps page fetches over a whole run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExpansionBudget {
    remaining: usize,
}

impl ExpansionBudget {
    pub fn new(limit: usize) -> Self {
        Self { remaining: limit }
    }

    pub fn try_spend(&mut self) -> bool {
        match self.remaining.checked_sub(1) {
            Some(left) => {
                self.remaining = left;
                true
            }
            None => false,
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

/// URL that points at an image file rather than a page.
pub fn is_direct_image_url(raw: &str) -> bool {
    let Ok(url) = Url::parse(raw) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    let path = url.path().to_lowercase();
    let by_extension = path
        .rsplit_once('.')
        .map(|(_, ext)| IMAGE_EXTENSIONS.contains(&ext))
        .unwrap_or(false);
    let by_query = url
        .query_pairs()
        .any(|(k, v)| matches!(k.as_ref(), "format" | "fm") && IMAGE_EXTENSIONS.contains(&v.as_ref()));
    by_extension || by_query
}

/// Single post pages only show their media in the embedded widget.
pub fn expansion_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url)
            if url.host_str() == Some("t.me")
                && regex!(r"^/(?:s/)?[\w]+/\d+/?$").is_match(url.path())
                && url.query().is_none() =>
        {
            url.set_query(Some("embed=1"));
            url.to_string()
        }
        _ => raw.to_string(),
    }
}

fn is_decoration(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.ends_with(".svg")
        || ["logo", "icon", "sprite", "avatar", "emoji", "placeholder", "banner"]
            .iter()
            .any(|w| lower.contains(w))
}

/// Image URLs found on a page: social preview tags first, then `<img>`
/// sources and styled backgrounds, resolved against the page URL.
pub fn extract_page_images(html: &str, page_url: &str, limit: usize) -> Vec<String> {
    let base = Url::parse(page_url).ok();
    let document = Html::parse_document(html);
    let meta = document
        .select(&META_IMAGE_SELECTOR)
        .filter_map(|m| m.value().attr("content"))
        .map(ToString::to_string);
    let images = document.select(&IMG_SELECTOR).filter_map(|img| {
        img.value()
            .attr("data-src")
            .or(img.value().attr("src"))
            .map(ToString::to_string)
    });
    let styled = document
        .select(&STYLED_SELECTOR)
        .filter_map(|e| e.value().attr("style"))
        .filter_map(|style| {
            regex!(r#"background-image:\s*url\(['"]?([^'")]+)['"]?\)"#)
                .captures(style)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        });
    let mut seen = HashSet::new();
    meta.chain(styled)
        .chain(images)
        .map(|src| src.trim().to_string())
        .filter(|src| !src.is_empty() && !src.starts_with("data:"))
        .filter_map(|src| match &base {
            Some(base) => base.join(&src).ok().map(|u| u.to_string()),
            None => Url::parse(&src).ok().map(|u| u.to_string()),
        })
        .filter(|src| !is_decoration(src))
        .filter(|src| seen.insert(src.clone()))
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spends_budget() {
        let mut budget = ExpansionBudget::new(2);
        assert!(budget.try_spend());
        assert!(budget.try_spend());
        assert!(!budget.try_spend());
        assert_eq!(0, budget.remaining());
    }

    #[test]
    fn recognizes_direct_images() {
        assert!(is_direct_image_url("https://cdn.example/p/1.JPG"));
        assert!(is_direct_image_url("https://cdn.example/p/img?id=4&format=webp"));
        assert!(!is_direct_image_url("https://shop.example/gallery/model-x"));
        assert!(!is_direct_image_url("ftp://cdn.example/1.jpg"));
        assert!(!is_direct_image_url("photo.jpg"));
    }

    #[test]
    fn embeds_post_links() {
        assert_eq!("https://t.me/shop/15?embed=1", expansion_url("https://t.me/shop/15"));
        assert_eq!("https://t.me/shop", expansion_url("https://t.me/shop"));
        assert_eq!("https://g.example/x", expansion_url("https://g.example/x"));
    }

    #[test]
    fn extracts_and_resolves_page_images() {
        let html = r#"<html><head>
            <meta property="og:image" content="//cdn.example/cover.jpg">
            </head><body>
            <img src="/img/logo.png">
            <img src="photos/1.jpg">
            <img data-src="https://cdn.example/2.jpg" src="data:image/gif;base64,AAAA">
            <img src="photos/1.jpg">
            <a class="tgme_widget_message_photo_wrap" style="background-image:url('https://cdn4.example/file/3.jpg')"></a>
            </body></html>"#;
        let found = extract_page_images(html, "https://shop.example/gallery/model-x", 10);
        assert_eq!(
            vec![
                "https://cdn.example/cover.jpg",
                "https://cdn4.example/file/3.jpg",
                "https://shop.example/gallery/photos/1.jpg",
                "https://cdn.example/2.jpg",
            ],
            found
        );
        assert_eq!(2, extract_page_images(html, "https://shop.example/gallery/model-x", 2).len());
    }
}
