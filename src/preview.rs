use once_cell::sync::Lazy;
use regex::Regex;
use tracing::instrument;

use crate::render::EQUATION_PLACEHOLDER;

static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());

const HEAD: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<style>
body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; padding: 16px; line-height: 1.6; }
img { max-width: 100%; height: auto; margin: 10px 0; border-radius: 4px; }
h3 { color: #333; border-bottom: 1px solid #eee; padding-bottom: 8px; margin-top: 16px; }
p { margin: 8px 0; color: #444; }
em { color: #666; font-size: 0.9em; }
strong { color: #333; }
blockquote { margin: 8px 0; padding-left: 12px; border-left: 3px solid #ddd; color: #666; }
</style>
</head>
<body>
"#;

const TAIL: &str = "</body>\n</html>\n";

/// Converts renderer Markdown into a standalone HTML page. Only the constructs
/// [`crate::render`] emits are recognized; this is not a Markdown parser.
#[instrument(level = "debug", skip_all, fields(len = markdown.len()))]
pub fn to_html(markdown: &str) -> String {
    let mut html = String::from(HEAD);
    for line in markdown.lines() {
        html.push_str(&rewrite_line(line));
        html.push('\n');
    }
    html.push_str(TAIL);
    html
}

fn rewrite_line(line: &str) -> String {
    if let Some(title) = line.strip_prefix("### ") {
        let title = title.trim();
        return if title.is_empty() {
            String::new()
        } else {
            format!("<h3>{}</h3>", escape(title))
        };
    }
    if line.starts_with("![") && line.contains("file://") {
        if let Some((alt, src)) = image_parts(line) {
            return format!(
                "<div style='text-align:center;margin:12px 0;'><img src='{}' alt='{}' /></div>",
                escape(src),
                escape(alt)
            );
        }
    }
    if let Some(label) = asset_label(line, "**", "**") {
        return format!("<p><strong>{}</strong></p>", escape(label));
    }
    if let Some(caption) = asset_label(line, "*", "*") {
        return format!("<p><em>{}</em></p>", escape(caption));
    }
    if let Some(formula) = line
        .strip_prefix("$$")
        .and_then(|rest| rest.strip_suffix("$$"))
    {
        let formula = formula.trim();
        return match formula {
            "" => String::new(),
            EQUATION_PLACEHOLDER => "<p style='color:#999;font-style:italic;'>formula</p>".to_string(),
            formula => format!(
                "<p style='text-align:center;font-family:serif;font-size:1.1em;padding:8px;background:#f5f5f5;border-radius:4px;'>{}</p>",
                escape(formula)
            ),
        };
    }
    if let Some(quote) = line.strip_prefix("> ") {
        return format!("<blockquote>{}</blockquote>", escape(quote));
    }
    if line.trim().is_empty() {
        return "<br>".to_string();
    }
    let escaped = escape(line);
    format!("<p>{}</p>", BOLD.replace_all(&escaped, "<strong>$1</strong>"))
}

/// Splits `![alt](src)` into its parts.
fn image_parts(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix("![")?;
    let (alt, rest) = rest.split_once("](")?;
    let src = rest.strip_suffix(')')?;
    Some((alt, src))
}

/// Matches `<marker>Figure N<marker>` and `<marker>Table N<marker>`.
fn asset_label<'a>(line: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let inner = line.strip_prefix(open)?.strip_suffix(close)?;
    let number = inner
        .strip_prefix("Figure ")
        .or_else(|| inner.strip_prefix("Table "))?;
    (!number.is_empty() && number.chars().all(|c| c.is_ascii_digit())).then_some(inner)
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}
