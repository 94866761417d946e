//! HTML image and link extraction (C4).
//!
//! Tolerant of malformed markup: `scraper`/`html5ever` recovers from broken
//! tags the way a browser would, so we simply select from whatever tree
//! comes out rather than validating the input ourselves.

use scraper::{Html, Selector};

use crate::url_canon::CanonicalUrl;

const IMAGE_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".webp", ".svg", ".bmp", ".ico",
];

const LAZY_SRC_ATTRS: &[&str] = &[
    "data-src",
    "data-original",
    "data-lazy-src",
    "data-srcset",
    "data-lazy",
];

/// One candidate image reference, with whatever metadata was present on the
/// originating element. Dedup against prior sightings is the coordinator's
/// job, not the extractor's.
#[derive(Debug, Clone)]
pub struct ImageCandidate {
    pub url: CanonicalUrl,
    pub alt: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

#[derive(Debug, Default)]
pub struct ExtractResult {
    pub images: Vec<ImageCandidate>,
    pub links: Vec<CanonicalUrl>,
}

/// Extract every image reference and outbound link reachable from `html`,
/// resolved against `page_url`.
pub fn extract(html: &str, page_url: &CanonicalUrl) -> ExtractResult {
    let document = Html::parse_document(html);
    let mut result = ExtractResult::default();

    extract_img_elements(&document, page_url, &mut result.images);
    extract_background_images(&document, page_url, &mut result.images);
    extract_anchor_elements(&document, page_url, &mut result.images, &mut result.links);
    extract_frame_and_form_links(&document, page_url, &mut result.links);

    result
}

fn extract_img_elements(document: &Html, page_url: &CanonicalUrl, images: &mut Vec<ImageCandidate>) {
    let Ok(selector) = Selector::parse("img") else {
        return;
    };

    for element in document.select(&selector) {
        let node = element.value();
        let alt = node.attr("alt").map(|s| s.to_string());
        let width = node.attr("width").and_then(parse_dimension);
        let height = node.attr("height").and_then(parse_dimension);

        let mut raws: Vec<&str> = Vec::new();
        if let Some(src) = node.attr("src") {
            raws.push(src);
        }
        for attr_name in LAZY_SRC_ATTRS {
            if let Some(value) = node.attr(attr_name) {
                raws.push(value);
            }
        }

        for raw in raws {
            if let Some(url) = resolve_image_ref(page_url, raw) {
                images.push(ImageCandidate {
                    url,
                    alt: alt.clone(),
                    width,
                    height,
                });
            }
        }

        if let Some(srcset) = node.attr("srcset") {
            for part in srcset.split(',') {
                let candidate = part.trim().split_whitespace().next().unwrap_or("");
                if let Some(url) = resolve_image_ref(page_url, candidate) {
                    images.push(ImageCandidate {
                        url,
                        alt: alt.clone(),
                        width,
                        height,
                    });
                }
            }
        }
    }
}

fn extract_background_images(
    document: &Html,
    page_url: &CanonicalUrl,
    images: &mut Vec<ImageCandidate>,
) {
    let Ok(selector) = Selector::parse("[style]") else {
        return;
    };

    for element in document.select(&selector) {
        let Some(style) = element.value().attr("style") else {
            continue;
        };
        if let Some(raw) = parse_background_image_url(style) {
            if let Some(url) = resolve_image_ref(page_url, &raw) {
                images.push(ImageCandidate {
                    url,
                    alt: None,
                    width: None,
                    height: None,
                });
            }
        }
    }
}

fn extract_anchor_elements(
    document: &Html,
    page_url: &CanonicalUrl,
    images: &mut Vec<ImageCandidate>,
    links: &mut Vec<CanonicalUrl>,
) {
    let Ok(selector) = Selector::parse("a[href]") else {
        return;
    };

    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };

        if has_image_extension(href) {
            if let Some(url) = resolve_image_ref(page_url, href) {
                images.push(ImageCandidate {
                    url,
                    alt: None,
                    width: None,
                    height: None,
                });
            }
        } else if is_followable_link(href) {
            if let Ok(url) = page_url.resolve(href) {
                links.push(url);
            }
        }
    }
}

fn extract_frame_and_form_links(document: &Html, page_url: &CanonicalUrl, links: &mut Vec<CanonicalUrl>) {
    for (selector_str, attr) in [("iframe[src]", "src"), ("form[action]", "action")] {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        for element in document.select(&selector) {
            let Some(href) = element.value().attr(attr) else {
                continue;
            };
            if is_followable_link(href) {
                if let Ok(url) = page_url.resolve(href) {
                    links.push(url);
                }
            }
        }
    }
}

fn parse_dimension(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok()
}

fn resolve_image_ref(page_url: &CanonicalUrl, raw: &str) -> Option<CanonicalUrl> {
    let raw = raw.trim();
    if raw.is_empty() || raw.to_lowercase().starts_with("data:") {
        return None;
    }
    page_url.resolve(raw).ok()
}

fn has_image_extension(href: &str) -> bool {
    let without_query = href.split(['?', '#']).next().unwrap_or(href);
    let lower = without_query.to_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

fn is_followable_link(href: &str) -> bool {
    let trimmed = href.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return false;
    }
    let lower = trimmed.to_lowercase();
    if lower.starts_with("javascript:") || lower.starts_with("mailto:") || lower.starts_with("tel:") {
        return false;
    }
    !has_image_extension(trimmed)
}

/// Pull the first `url(...)` token out of a `background-image` declaration,
/// stripping matched surrounding quotes.
fn parse_background_image_url(style: &str) -> Option<String> {
    let lower = style.to_lowercase();
    let prop_start = lower.find("background-image")?;
    let rest = &style[prop_start..];
    let url_idx = rest.to_lowercase().find("url(")?;
    let after_url = &rest[url_idx + 4..];
    let close_idx = after_url.find(')')?;
    let raw = after_url[..close_idx].trim();
    let stripped = raw.trim_matches(|c| c == '\'' || c == '"');
    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
    }
}
