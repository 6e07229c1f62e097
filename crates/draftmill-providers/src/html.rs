//! Competitor-page text extraction.
//!
//! Scraped HTML is reduced to the pieces the structure analysis consumes:
//! the heading outline in document order and the cleaned body text of the
//! page's main content container.

use scraper::{ElementRef, Html, Selector};

/// Content containers tried in order; the first match wins, `body` is the
/// fallback.
const CONTENT_SELECTORS: [&str; 8] = [
    "article",
    "main",
    ".content",
    ".post-content",
    ".article-content",
    ".entry-content",
    "#content",
    ".main-content",
];

/// Elements whose subtrees never contribute text.
const EXCLUDED_TAGS: [&str; 6] = ["script", "style", "nav", "header", "footer", "aside"];

/// Extraction result for one page.
#[derive(Debug, Clone, Default)]
pub struct ExtractedPage {
    /// `"hN: text"` strings, h1..h6, in document order.
    pub headings: Vec<String>,
    /// Cleaned, whitespace-normalized body text.
    pub text: String,
    /// Whitespace-separated token count of `text`.
    pub word_count: u32,
}

/// Extract headings and body text from raw HTML.
pub fn extract(html: &str) -> ExtractedPage {
    let document = Html::parse_document(html);

    let heading_selector =
        Selector::parse("h1, h2, h3, h4, h5, h6").expect("static selector");
    let mut headings = Vec::new();
    for element in document.select(&heading_selector) {
        if has_excluded_ancestor(element) {
            continue;
        }
        let text = normalize(&element_text(element));
        if !text.is_empty() {
            headings.push(format!("{}: {}", element.value().name(), text));
        }
    }

    let content = content_root(&document)
        .map(|root| normalize(&element_text(root)))
        .unwrap_or_default();
    let word_count = content.split_whitespace().count() as u32;

    ExtractedPage {
        headings,
        text: content,
        word_count,
    }
}

/// Pick the page's main content container.
fn content_root(document: &Html) -> Option<ElementRef<'_>> {
    for selector in CONTENT_SELECTORS {
        let selector = Selector::parse(selector).expect("static selector");
        if let Some(element) = document.select(&selector).next() {
            return Some(element);
        }
    }
    let body = Selector::parse("body").expect("static selector");
    document.select(&body).next()
}

/// Collect descendant text, skipping excluded subtrees.
fn element_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    collect_text(*element, &mut out);
    out
}

fn collect_text(node: ego_tree::NodeRef<'_, scraper::Node>, out: &mut String) {
    match node.value() {
        scraper::Node::Text(text) => {
            out.push_str(&text.text);
            out.push(' ');
        }
        scraper::Node::Element(element) => {
            if is_excluded(element) {
                return;
            }
            for child in node.children() {
                collect_text(child, out);
            }
        }
        _ => {
            for child in node.children() {
                collect_text(child, out);
            }
        }
    }
}

fn is_excluded(element: &scraper::node::Element) -> bool {
    let tag = element.name();
    if EXCLUDED_TAGS.contains(&tag) {
        return true;
    }
    element.classes().any(is_ad_marker)
        || element.id().is_some_and(is_ad_marker)
}

/// Class/id tokens that mark advertising containers.
fn is_ad_marker(token: &str) -> bool {
    let token = token.to_ascii_lowercase();
    matches!(token.as_str(), "ad" | "ads" | "advertisement" | "adsbygoogle")
        || token.starts_with("ad-")
        || token.contains("advert")
}

fn has_excluded_ancestor(element: ElementRef<'_>) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| is_excluded(ancestor.value()))
}

/// Collapse whitespace and strip characters outside the BMP Latin and
/// Cyrillic ranges.
fn normalize(raw: &str) -> String {
    let filtered: String = raw.chars().filter(|c| keep_char(*c)).collect();
    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn keep_char(c: char) -> bool {
    c.is_ascii()
        || ('\u{00A0}'..='\u{024F}').contains(&c) // Latin-1 supplement + extended
        || ('\u{0400}'..='\u{04FF}').contains(&c) // Cyrillic
        || ('\u{2010}'..='\u{203A}').contains(&c) // common punctuation
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headings_collected_in_document_order() {
        let page = extract(
            "<html><body>\
             <h1>Main</h1><p>a</p><h2>Sub</h2><h3>Deep</h3>\
             </body></html>",
        );
        assert_eq!(page.headings, vec!["h1: Main", "h2: Sub", "h3: Deep"]);
    }

    #[test]
    fn headings_inside_nav_are_skipped() {
        let page = extract(
            "<html><body><nav><h2>Menu</h2></nav><h1>Real</h1></body></html>",
        );
        assert_eq!(page.headings, vec!["h1: Real"]);
    }

    #[test]
    fn script_and_style_text_is_dropped() {
        let page = extract(
            "<html><body><article>\
             <script>var x = 1;</script><style>.a{}</style>\
             <p>visible words here</p>\
             </article></body></html>",
        );
        assert_eq!(page.text, "visible words here");
        assert_eq!(page.word_count, 3);
    }

    #[test]
    fn article_wins_over_body() {
        let page = extract(
            "<html><body>chrome text<article>the real content</article></body></html>",
        );
        assert_eq!(page.text, "the real content");
    }

    #[test]
    fn selector_priority_is_ordered() {
        // `.content` appears later in the document but `article` is tried first.
        let page = extract(
            "<html><body><div class=\"content\">second</div>\
             <article>first</article></body></html>",
        );
        assert_eq!(page.text, "first");
    }

    #[test]
    fn falls_back_to_body() {
        let page = extract("<html><body><p>plain body text</p></body></html>");
        assert_eq!(page.text, "plain body text");
    }

    #[test]
    fn ad_containers_are_dropped() {
        let page = extract(
            "<html><body><article>\
             <div class=\"ad-banner\">buy now</div>\
             <div id=\"adsbygoogle\">also ads</div>\
             <p>content</p>\
             </article></body></html>",
        );
        assert_eq!(page.text, "content");
    }

    #[test]
    fn cyrillic_is_kept_non_bmp_is_stripped() {
        let page = extract(
            "<html><body><article>кофе machines \u{1F600} are great</article></body></html>",
        );
        assert_eq!(page.text, "кофе machines are great");
        assert_eq!(page.word_count, 4);
    }

    #[test]
    fn whitespace_is_normalized() {
        let page = extract(
            "<html><body><article>  spaced \n\n   out \t words </article></body></html>",
        );
        assert_eq!(page.text, "spaced out words");
        assert_eq!(page.word_count, 3);
    }

    #[test]
    fn empty_document_yields_empty_page() {
        let page = extract("");
        assert!(page.headings.is_empty());
        assert_eq!(page.word_count, 0);
    }
}
