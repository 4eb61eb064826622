//! Rendered HTML to readable plain text.
//!
//! [`sanitize`] applies a user-generated-content policy: script-like
//! elements are dropped with their content, every attribute except a few
//! safe link and image attributes is removed, and unknown tags are unwrapped
//! so their text survives. [`strip_html`] then removes the remaining tags.
//! Neither step can fail; malformed input yields partial text at worst.

use scraper::{ElementRef, Html};

/// Elements dropped together with everything inside them.
const SKIP_CONTENT: &[&str] = &[
    "frameset", "iframe", "noembed", "noframes", "noscript", "nostyle", "object", "script",
    "style", "title", "svg", "template", "head",
];

/// Elements kept as tags by the policy. Anything else is unwrapped.
const ALLOWED: &[&str] = &[
    "a", "abbr", "acronym", "address", "article", "aside", "b", "bdi", "bdo", "blockquote",
    "br", "caption", "cite", "code", "col", "colgroup", "dd", "del", "details", "dfn", "div",
    "dl", "dt", "em", "figcaption", "figure", "footer", "h1", "h2", "h3", "h4", "h5", "h6",
    "header", "hgroup", "hr", "i", "img", "ins", "kbd", "li", "mark", "nav", "ol", "p", "pre",
    "q", "rp", "rt", "ruby", "s", "samp", "section", "small", "span", "strike", "strong",
    "sub", "summary", "sup", "table", "tbody", "td", "tfoot", "th", "thead", "time", "tr",
    "tt", "u", "ul", "var", "wbr",
];

const VOID: &[&str] = &["br", "col", "hr", "img", "wbr"];

/// Elements that end a line when flattened to text.
const BLOCK: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "caption", "dd", "details", "div",
    "dl", "dt", "figcaption", "figure", "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header",
    "hgroup", "hr", "li", "nav", "ol", "p", "pre", "section", "summary", "table", "tbody",
    "td", "tfoot", "th", "thead", "tr", "ul",
];

/// Nesting beyond this depth is flattened to its text.
const MAX_DEPTH: usize = 256;

fn safe_url(value: &str) -> bool {
    let lower = value.trim().to_ascii_lowercase();
    match lower.split_once(':') {
        Some((scheme, _)) if !scheme.contains('/') => {
            matches!(scheme, "http" | "https" | "mailto")
        }
        _ => true,
    }
}

fn allowed_attrs<'a>(el: &ElementRef<'a>) -> Vec<(&'static str, &'a str)> {
    let value = el.value();
    let mut attrs = Vec::new();
    match value.name() {
        "a" => {
            if let Some(href) = value.attr("href").filter(|h| safe_url(h)) {
                attrs.push(("href", href));
                attrs.push(("rel", "nofollow"));
            }
        }
        "img" => {
            if let Some(src) = value.attr("src").filter(|s| safe_url(s)) {
                attrs.push(("src", src));
            }
            if let Some(alt) = value.attr("alt") {
                attrs.push(("alt", alt));
            }
        }
        _ => {}
    }
    if let Some(title) = value.attr("title") {
        attrs.push(("title", title));
    }
    attrs
}

fn sanitize_into(el: ElementRef<'_>, depth: usize, out: &mut String) {
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(&html_escape::encode_text(&**text));
            continue;
        }
        let Some(child_el) = ElementRef::wrap(child) else {
            continue;
        };
        let name = child_el.value().name();
        if SKIP_CONTENT.contains(&name) {
            continue;
        }
        if depth >= MAX_DEPTH {
            let text: String = child_el.text().collect();
            out.push_str(&html_escape::encode_text(&text));
            continue;
        }
        if !ALLOWED.contains(&name) {
            sanitize_into(child_el, depth + 1, out);
            continue;
        }

        out.push('<');
        out.push_str(name);
        for (attr, value) in allowed_attrs(&child_el) {
            out.push(' ');
            out.push_str(attr);
            out.push_str("=\"");
            out.push_str(&html_escape::encode_double_quoted_attribute(value));
            out.push('"');
        }
        out.push('>');
        if !VOID.contains(&name) {
            sanitize_into(child_el, depth + 1, out);
            out.push_str("</");
            out.push_str(name);
            out.push('>');
        }
    }
}

/// Apply the content policy, returning safe HTML.
pub fn sanitize(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut out = String::with_capacity(html.len() / 2);
    sanitize_into(doc.root_element(), 0, &mut out);
    out
}

fn text_into(el: ElementRef<'_>, depth: usize, out: &mut String) {
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
            continue;
        }
        let Some(child_el) = ElementRef::wrap(child) else {
            continue;
        };
        let name = child_el.value().name();
        if SKIP_CONTENT.contains(&name) {
            continue;
        }
        let block = BLOCK.contains(&name);
        if block {
            out.push('\n');
        }
        if depth >= MAX_DEPTH {
            out.extend(child_el.text());
        } else {
            text_into(child_el, depth + 1, out);
        }
        if block {
            out.push('\n');
        }
    }
}

/// Remove every tag, keeping text with one line per block element.
pub fn strip_html(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut raw = String::with_capacity(html.len() / 2);
    text_into(fragment.root_element(), 0, &mut raw);

    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Plain text suitable for full-text indexing.
pub fn to_plain_text(html: &str) -> String {
    strip_html(&sanitize(html)).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripts_and_styles_are_dropped_with_content() {
        let html = r#"<html><head><title>T</title><style>p{}</style></head>
            <body><script>alert(1)</script><p>Hello <b>world</b></p></body></html>"#;
        assert_eq!(to_plain_text(html), "Hello world");
    }

    #[test]
    fn test_event_handlers_and_unsafe_links_removed() {
        let out = sanitize(r#"<a href="javascript:x()" onclick="y()">go</a><img src="/a.png" onerror="z()">"#);
        assert!(!out.contains("onclick"));
        assert!(!out.contains("javascript"));
        assert!(!out.contains("onerror"));
        assert!(out.contains(r#"<img src="/a.png">"#));
    }

    #[test]
    fn test_unknown_tags_are_unwrapped() {
        let out = sanitize("<custom-widget><p>kept</p></custom-widget>");
        assert_eq!(out, "<p>kept</p>");
    }

    #[test]
    fn test_blocks_become_lines() {
        let text = to_plain_text("<div>one</div><div>two   <i>three</i></div><ul><li>a</li><li>b</li></ul>");
        assert_eq!(text, "one\ntwo three\na\nb");
    }

    #[test]
    fn test_entities_survive_as_text() {
        assert_eq!(to_plain_text("<p>a &lt; b &amp;&amp; c</p>"), "a < b && c");
    }

    #[test]
    fn test_malformed_input_never_fails() {
        assert_eq!(to_plain_text(""), "");
        assert_eq!(to_plain_text("<p>unclosed <b>bold"), "unclosed bold");
        let deep = "<div>".repeat(2000) + "deep" + &"</div>".repeat(2000);
        assert_eq!(to_plain_text(&deep), "deep");
    }
}
