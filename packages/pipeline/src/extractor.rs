//! Content extractor - raw HTML to plain text and structured Markdown
//!
//! Pure and deterministic: no network or filesystem access, so it can be
//! unit tested on static HTML fixtures. The crawler feeds it rendered HTML;
//! the analyzer and generator consume its output.

use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Everything the pipeline keeps from one page of raw HTML.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedContent {
    pub title: String,
    pub meta_description: String,
    pub plain_text: String,
    pub structured_markdown: String,
    pub word_count: usize,
    pub content_type: String,
}

/// Extract structured content from raw HTML.
///
/// The source URL is used to resolve image references to absolute URLs and
/// to classify the content type from path segments.
pub fn extract(html: &str, source_url: &str) -> ExtractedContent {
    let document = Html::parse_document(html);
    let base = Url::parse(source_url).ok();

    let title = extract_title(&document);
    let meta_description = extract_meta_description(&document);

    let mut blocks: Vec<String> = Vec::new();
    let mut texts: Vec<String> = Vec::new();

    if let Some(root) = find_main_root(&document) {
        walk_children(root, base.as_ref(), false, &mut blocks, &mut texts);
    } else if let Some(body) = select_first(&document, "body") {
        // No landmark found: walk the body but drop site chrome.
        walk_children(body, base.as_ref(), true, &mut blocks, &mut texts);
    }

    let plain_text = texts.join(" ").split_whitespace().collect::<Vec<_>>().join(" ");
    let word_count = plain_text.split_whitespace().count();
    let content_type = classify_content_type(source_url, &plain_text, word_count);

    ExtractedContent {
        title,
        meta_description,
        plain_text,
        structured_markdown: blocks.join("\n\n"),
        word_count,
        content_type,
    }
}

fn select_first<'a>(document: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(selector).ok()?;
    document.select(&selector).next()
}

fn extract_title(document: &Html) -> String {
    select_first(document, "title")
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

fn extract_meta_description(document: &Html) -> String {
    select_first(document, "meta[name='description']")
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Locate the main content root: landmark elements first, body as fallback.
fn find_main_root(document: &Html) -> Option<ElementRef<'_>> {
    for selector in ["main", "article", "[role='main']"] {
        if let Some(el) = select_first(document, selector) {
            return Some(el);
        }
    }
    None
}

const SKIP_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "iframe"];
const CHROME_ELEMENTS: &[&str] = &["nav", "header", "footer", "aside"];
const INLINE_ELEMENTS: &[&str] = &["a", "strong", "em", "b", "i", "u", "code", "small", "abbr", "sub", "sup", "mark"];

/// Walk an element's children, converting block elements to Markdown and
/// accumulating loose inline content as paragraphs.
fn walk_children(
    el: ElementRef<'_>,
    base: Option<&Url>,
    strip_chrome: bool,
    blocks: &mut Vec<String>,
    texts: &mut Vec<String>,
) {
    let mut pending: Vec<String> = Vec::new();

    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                pending.push(trimmed.to_string());
            }
            continue;
        }

        let Some(child_el) = ElementRef::wrap(child) else {
            continue;
        };
        let name = child_el.value().name();

        if SKIP_ELEMENTS.contains(&name) {
            continue;
        }
        if strip_chrome && CHROME_ELEMENTS.contains(&name) {
            continue;
        }

        if INLINE_ELEMENTS.contains(&name) {
            let text = inline_text(child_el);
            if !text.is_empty() {
                pending.push(text);
            }
            continue;
        }

        // Anything block-level flushes the inline run first.
        match name {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                flush_pending(&mut pending, blocks, texts);
                let level = name[1..].parse::<usize>().unwrap_or(1);
                let text = inline_text(child_el);
                if !text.is_empty() {
                    blocks.push(format!("{} {}", "#".repeat(level), text));
                    texts.push(text);
                }
            }
            "p" => {
                flush_pending(&mut pending, blocks, texts);
                let text = inline_text(child_el);
                if !text.is_empty() {
                    blocks.push(text.clone());
                    texts.push(text);
                }
            }
            "ul" | "ol" => {
                flush_pending(&mut pending, blocks, texts);
                let lines = render_list(child_el, name == "ol", 0, texts);
                if !lines.is_empty() {
                    blocks.push(lines.join("\n"));
                }
            }
            "dl" => {
                flush_pending(&mut pending, blocks, texts);
                let lines = render_definition_list(child_el, texts);
                if !lines.is_empty() {
                    blocks.push(lines.join("\n\n"));
                }
            }
            "blockquote" => {
                flush_pending(&mut pending, blocks, texts);
                let text = inline_text(child_el);
                if !text.is_empty() {
                    blocks.push(format!("> {}", text));
                    texts.push(text);
                }
            }
            "img" => {
                flush_pending(&mut pending, blocks, texts);
                if let Some(markdown) = render_image(child_el, base) {
                    blocks.push(markdown);
                }
            }
            "table" => {
                flush_pending(&mut pending, blocks, texts);
                let lines = render_table(child_el, texts);
                if !lines.is_empty() {
                    blocks.push(lines.join("\n"));
                }
            }
            "pre" => {
                flush_pending(&mut pending, blocks, texts);
                let text: String = child_el.text().collect();
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    blocks.push(format!("```\n{}\n```", trimmed));
                    texts.push(trimmed.split_whitespace().collect::<Vec<_>>().join(" "));
                }
            }
            "br" | "hr" => {
                flush_pending(&mut pending, blocks, texts);
            }
            // Containers (div, section, figure, span wrappers, ...) recurse
            // transparently.
            _ => {
                flush_pending(&mut pending, blocks, texts);
                walk_children(child_el, base, strip_chrome, blocks, texts);
            }
        }
    }

    flush_pending(&mut pending, blocks, texts);
}

fn flush_pending(pending: &mut Vec<String>, blocks: &mut Vec<String>, texts: &mut Vec<String>) {
    if pending.is_empty() {
        return;
    }
    let text = pending.join(" ").split_whitespace().collect::<Vec<_>>().join(" ");
    pending.clear();
    if !text.is_empty() {
        blocks.push(text.clone());
        texts.push(text);
    }
}

/// All descendant text of an element, whitespace-normalized.
fn inline_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn render_list(
    el: ElementRef<'_>,
    ordered: bool,
    indent: usize,
    texts: &mut Vec<String>,
) -> Vec<String> {
    let mut lines = Vec::new();
    let mut index = 0usize;

    for child in el.children() {
        let Some(item) = ElementRef::wrap(child) else {
            continue;
        };
        if item.value().name() != "li" {
            continue;
        }

        // Item text excluding any nested list, which renders on its own lines.
        let mut own_text: Vec<String> = Vec::new();
        let mut nested: Vec<String> = Vec::new();
        for grandchild in item.children() {
            if let Some(text) = grandchild.value().as_text() {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    own_text.push(trimmed.to_string());
                }
            } else if let Some(grand_el) = ElementRef::wrap(grandchild) {
                match grand_el.value().name() {
                    "ul" => nested.extend(render_list(grand_el, false, indent + 1, texts)),
                    "ol" => nested.extend(render_list(grand_el, true, indent + 1, texts)),
                    _ => {
                        let text = inline_text(grand_el);
                        if !text.is_empty() {
                            own_text.push(text);
                        }
                    }
                }
            }
        }

        let text = own_text.join(" ").split_whitespace().collect::<Vec<_>>().join(" ");
        if !text.is_empty() {
            index += 1;
            let prefix = if ordered {
                format!("{}. ", index)
            } else {
                "- ".to_string()
            };
            lines.push(format!("{}{}{}", "  ".repeat(indent), prefix, text));
            texts.push(text);
        }
        lines.extend(nested);
    }

    lines
}

fn render_definition_list(el: ElementRef<'_>, texts: &mut Vec<String>) -> Vec<String> {
    let mut lines = Vec::new();

    for child in el.children() {
        let Some(item) = ElementRef::wrap(child) else {
            continue;
        };
        let text = inline_text(item);
        if text.is_empty() {
            continue;
        }
        match item.value().name() {
            "dt" => {
                lines.push(format!("**{}**", text));
                texts.push(text);
            }
            "dd" => {
                lines.push(text.clone());
                texts.push(text);
            }
            _ => {}
        }
    }

    lines
}

fn render_image(el: ElementRef<'_>, base: Option<&Url>) -> Option<String> {
    let src = el.value().attr("src")?;
    if src.is_empty() {
        return None;
    }
    let alt = el.value().attr("alt").unwrap_or("").trim();
    let resolved = match base {
        Some(base) => base.join(src).map(|u| u.to_string()).unwrap_or_else(|_| src.to_string()),
        None => src.to_string(),
    };
    Some(format!("![{}]({})", alt, resolved))
}

fn render_table(el: ElementRef<'_>, texts: &mut Vec<String>) -> Vec<String> {
    let row_selector = match Selector::parse("tr") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };
    let cell_selector = match Selector::parse("th, td") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    let mut lines = Vec::new();
    for (row_index, row) in el.select(&row_selector).enumerate() {
        let cells: Vec<String> = row
            .select(&cell_selector)
            .map(|cell| {
                let text = inline_text(cell);
                if !text.is_empty() {
                    texts.push(text.clone());
                }
                text
            })
            .collect();
        if cells.is_empty() {
            continue;
        }
        lines.push(format!("| {} |", cells.join(" | ")));
        if row_index == 0 {
            lines.push(format!("|{}|", " --- |".repeat(cells.len())));
        }
    }

    lines
}

/// Coarse content-type label: URL path segments first, then a question
/// density heuristic for FAQ-like pages.
fn classify_content_type(source_url: &str, plain_text: &str, word_count: usize) -> String {
    if let Ok(url) = Url::parse(source_url) {
        let path = url.path().to_lowercase();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        for segment in &segments {
            match *segment {
                "blog" | "news" | "articles" | "article" | "posts" => return "blog".to_string(),
                "product" | "products" | "shop" | "store" => return "product".to_string(),
                "faq" | "faqs" | "help" => return "faq".to_string(),
                "about" | "team" | "company" => return "about".to_string(),
                _ => {}
            }
        }

        if segments.is_empty() {
            return "landing".to_string();
        }
    }

    // A page dense with questions is most likely an FAQ without the path
    // giving it away.
    if word_count > 0 {
        let questions = plain_text.matches('?').count();
        if questions >= 3 && questions as f32 / word_count as f32 > 0.02 {
            return "faq".to_string();
        }
    }

    "page".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_title_and_paragraph_from_main() {
        let html = "<html><head><title>T</title></head><body><main><h1>Title</h1><p>Hello world</p></main></body></html>";
        let content = extract(html, "https://example.com/page");

        assert_eq!(content.structured_markdown, "# Title\n\nHello world");
        assert_eq!(content.plain_text, "Title Hello world");
        assert_eq!(content.word_count, 3);
    }

    #[test]
    fn word_count_matches_whitespace_split_of_plain_text() {
        let html = r#"
            <main>
                <h2>Our   Services</h2>
                <p>We   offer
                   many things.</p>
                <ul><li>One</li><li>Two items</li></ul>
            </main>
        "#;
        let content = extract(html, "https://example.com/services");
        assert_eq!(
            content.word_count,
            content.plain_text.split_whitespace().count()
        );
    }

    #[test]
    fn falls_back_to_article_landmark() {
        let html = "<body><article><p>Story text</p></article></body>";
        let content = extract(html, "https://example.com/blog/story");
        assert_eq!(content.structured_markdown, "Story text");
    }

    #[test]
    fn body_fallback_strips_navigation_chrome() {
        let html = r#"
            <body>
                <nav><a href="/">Home</a><a href="/about">About</a></nav>
                <header><h1>Site Name</h1></header>
                <div><p>Real content here</p></div>
                <footer><p>Copyright</p></footer>
            </body>
        "#;
        let content = extract(html, "https://example.com/contact");
        assert_eq!(content.structured_markdown, "Real content here");
        assert!(!content.plain_text.contains("Copyright"));
        assert!(!content.plain_text.contains("Site Name"));
    }

    #[test]
    fn renders_ordered_and_unordered_lists() {
        let html = r#"
            <main>
                <ul><li>Alpha</li><li>Beta</li></ul>
                <ol><li>First</li><li>Second</li></ol>
            </main>
        "#;
        let content = extract(html, "https://example.com/x");
        assert!(content.structured_markdown.contains("- Alpha\n- Beta"));
        assert!(content.structured_markdown.contains("1. First\n2. Second"));
    }

    #[test]
    fn renders_definition_lists_as_subsections() {
        let html = "<main><dl><dt>Term</dt><dd>The definition</dd></dl></main>";
        let content = extract(html, "https://example.com/glossary");
        assert!(content.structured_markdown.contains("**Term**"));
        assert!(content.structured_markdown.contains("The definition"));
    }

    #[test]
    fn renders_blockquotes_as_quote_lines() {
        let html = "<main><blockquote>Wise words</blockquote></main>";
        let content = extract(html, "https://example.com/x");
        assert_eq!(content.structured_markdown, "> Wise words");
    }

    #[test]
    fn resolves_image_urls_to_absolute() {
        let html = r#"<main><img src="/images/logo.png" alt="Logo"></main>"#;
        let content = extract(html, "https://example.com/about/team");
        assert_eq!(
            content.structured_markdown,
            "![Logo](https://example.com/images/logo.png)"
        );
    }

    #[test]
    fn renders_tables_as_pipe_tables() {
        let html = r#"
            <main><table>
                <tr><th>Name</th><th>Price</th></tr>
                <tr><td>Widget</td><td>$5</td></tr>
            </table></main>
        "#;
        let content = extract(html, "https://example.com/pricing");
        assert!(content.structured_markdown.contains("| Name | Price |"));
        assert!(content.structured_markdown.contains("| --- | --- |"));
        assert!(content.structured_markdown.contains("| Widget | $5 |"));
    }

    #[test]
    fn strips_scripts_and_styles() {
        let html = r#"
            <main>
                <script>var x = 1;</script>
                <style>body { color: red; }</style>
                <p>Visible</p>
            </main>
        "#;
        let content = extract(html, "https://example.com/x");
        assert_eq!(content.structured_markdown, "Visible");
    }

    #[test]
    fn classifies_content_type_from_url_path() {
        let cases = [
            ("https://example.com/blog/post-1", "blog"),
            ("https://example.com/products/widget", "product"),
            ("https://example.com/faq", "faq"),
            ("https://example.com/about", "about"),
            ("https://example.com/", "landing"),
            ("https://example.com/random/deep/path", "page"),
        ];
        for (url, expected) in cases {
            let content = extract("<main><p>Some body text without questions</p></main>", url);
            assert_eq!(content.content_type, expected, "url: {}", url);
        }
    }

    #[test]
    fn question_density_classifies_faq() {
        let html = r#"<main>
            <p>What is this? How does it work? Can I return it?</p>
            <p>Short answers here.</p>
        </main>"#;
        let content = extract(html, "https://example.com/questions-and-answers");
        assert_eq!(content.content_type, "faq");
    }

    #[test]
    fn extracts_meta_description() {
        let html = r#"<html><head><meta name="description" content="A fine page"></head><body><main><p>x</p></main></body></html>"#;
        let content = extract(html, "https://example.com/x");
        assert_eq!(content.meta_description, "A fine page");
    }

    #[test]
    fn empty_html_yields_zero_words() {
        let content = extract("", "https://example.com/x");
        assert_eq!(content.word_count, 0);
        assert_eq!(content.plain_text, "");
        assert_eq!(content.structured_markdown, "");
    }
}
