use crate::Category;

const CAPTION_TYPES: &[&str] = &["figure_caption", "table_caption", "caption", "figcaption"];
const FIGURE_TYPES: &[&str] = &["figure", "image", "picture", "photo"];
const TABLE_TYPES: &[&str] = &["table"];
const TITLE_TYPES: &[&str] = &["title", "heading", "header", "section_header"];
const TEXT_TYPES: &[&str] = &["text", "plain_text", "paragraph", "content"];
const EQUATION_TYPES: &[&str] = &["isolate_formula", "formula", "math", "formula_earse"];
const REFERENCE_TYPES: &[&str] = &["reference", "footnote", "cite"];
const DISCARD_TYPES: &[&str] = &["abandon", "discard"];

fn contains_any(label: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| label.contains(keyword))
}

/// Maps a free-form detector label to a [`Category`].
///
/// Anything after the first `|` is ignored. Captions are tested before
/// figures and tables since their labels contain those words too. Labels
/// matching nothing are treated as text.
pub fn classify(label: &str) -> Category {
    let label = label
        .split_once('|')
        .map_or(label, |(head, _)| head)
        .to_lowercase();

    if contains_any(&label, CAPTION_TYPES) {
        if label.contains("figure") {
            Category::FigureCaption
        } else if label.contains("table") {
            Category::TableCaption
        } else {
            Category::Other
        }
    } else if contains_any(&label, FIGURE_TYPES) {
        Category::Figure
    } else if contains_any(&label, TABLE_TYPES) {
        Category::Table
    } else if contains_any(&label, TITLE_TYPES) {
        Category::Title
    } else if contains_any(&label, TEXT_TYPES) {
        Category::Text
    } else if contains_any(&label, EQUATION_TYPES) {
        Category::Equation
    } else if contains_any(&label, REFERENCE_TYPES) {
        Category::Reference
    } else if contains_any(&label, DISCARD_TYPES) {
        Category::Other
    } else {
        Category::Text
    }
}
