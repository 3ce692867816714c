use tracing::instrument;

use crate::{Block, Category};

pub const TITLE_PLACEHOLDER: &str = "Title";
pub const EQUATION_PLACEHOLDER: &str = "formula";

/// What to do with reference and unclassified regions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReferencePolicy {
    #[default]
    Drop,
    /// Emit non-empty text as a `>` quote block.
    Quote,
}

/// Renders blocks in reading order as Markdown.
///
/// Figure and table numbers are counted here from the block sequence, so the
/// output depends only on the ordered categories, texts and asset paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownRenderer {
    pub reference_policy: ReferencePolicy,
}

impl MarkdownRenderer {
    pub fn new(reference_policy: ReferencePolicy) -> Self {
        Self { reference_policy }
    }

    #[instrument(level = "debug", skip_all, fields(blocks = blocks.len()))]
    pub fn render(&self, blocks: &[Block]) -> String {
        let mut markdown = String::new();
        let mut figure = 0;
        let mut table = 0;

        for block in blocks {
            let text = block.text.trim();
            match block.category {
                Category::Title => {
                    let title = single_line(text);
                    let title = if title.is_empty() { TITLE_PLACEHOLDER.to_string() } else { title };
                    paragraph(&mut markdown, &format!("### {title}"));
                }
                Category::Text => {
                    if !text.is_empty() {
                        paragraph(&mut markdown, text);
                    }
                }
                Category::Figure => {
                    figure += 1;
                    markdown.push_str(&format!("**Figure {figure}**\n"));
                    if let Some(path) = block.asset.as_ref().and_then(|asset| asset.path.as_ref()) {
                        markdown.push_str(&format!("![Figure {figure}](file://{})\n", path.display()));
                    }
                    markdown.push('\n');
                }
                Category::FigureCaption => paragraph(&mut markdown, &format!("*Figure {figure}*")),
                Category::Table => {
                    table += 1;
                    paragraph(&mut markdown, &format!("**Table {table}**"));
                }
                Category::TableCaption => paragraph(&mut markdown, &format!("*Table {table}*")),
                Category::Equation => {
                    let formula = single_line(text);
                    let formula = if formula.is_empty() {
                        EQUATION_PLACEHOLDER.to_string()
                    } else {
                        formula
                    };
                    paragraph(&mut markdown, &format!("$${formula}$$"));
                }
                Category::Reference | Category::Other => {
                    if self.reference_policy == ReferencePolicy::Quote && !text.is_empty() {
                        let quoted = text.lines().map(|line| format!("> {line}")).collect::<Vec<_>>();
                        paragraph(&mut markdown, &quoted.join("\n"));
                    }
                }
            }
        }
        markdown
    }
}

fn paragraph(markdown: &mut String, content: &str) {
    markdown.push_str(content);
    markdown.push_str("\n\n");
}

/// Joins the non-empty lines of `text` with spaces.
fn single_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::{AssetKind, AssetReference, Region};

    fn block(category: Category, text: &str) -> Block {
        Block::text_only(Region::from_box(0, 0, 10, 10, ""), category, text)
    }

    fn figure(number: u32, path: Option<&str>) -> Block {
        let region = Region::from_box(0, 0, 10, 10, "figure");
        Block {
            asset: Some(AssetReference {
                kind: AssetKind::Figure,
                number,
                path: path.map(PathBuf::from),
                origin: region,
            }),
            ..block(Category::Figure, "")
        }
    }

    #[test]
    fn title_and_text() {
        let markdown = MarkdownRenderer::default().render(&[
            block(Category::Title, "Intro"),
            block(Category::Text, "  Body text.  "),
            block(Category::Text, ""),
            block(Category::Title, ""),
        ]);
        assert_eq!(markdown, "### Intro\n\nBody text.\n\n### Title\n\n");
    }

    #[test]
    fn figures_and_captions() {
        let markdown = MarkdownRenderer::default().render(&[
            figure(1, Some("/out/figures/figure_1.png")),
            block(Category::FigureCaption, "ignored"),
            figure(2, None),
            block(Category::FigureCaption, ""),
        ]);
        assert_eq!(
            markdown,
            "**Figure 1**\n![Figure 1](file:///out/figures/figure_1.png)\n\n*Figure 1*\n\n\
             **Figure 2**\n\n*Figure 2*\n\n"
        );
    }

    #[test]
    fn numbering_follows_reading_order() {
        let blocks = (0..5)
            .map(|i| figure(5 - i, if i == 2 { None } else { Some("/f.png") }))
            .collect::<Vec<_>>();
        let markdown = MarkdownRenderer::default().render(&blocks);
        let labels = markdown
            .lines()
            .filter(|line| line.starts_with("**Figure"))
            .collect::<Vec<_>>();
        assert_eq!(
            labels,
            ["**Figure 1**", "**Figure 2**", "**Figure 3**", "**Figure 4**", "**Figure 5**"]
        );
    }

    #[test]
    fn tables_and_captions() {
        let markdown = MarkdownRenderer::default().render(&[
            block(Category::TableCaption, ""),
            block(Category::Table, ""),
            block(Category::TableCaption, ""),
        ]);
        assert_eq!(markdown, "*Table 0*\n\n**Table 1**\n\n*Table 1*\n\n");
    }

    #[test]
    fn equations() {
        let markdown = MarkdownRenderer::default().render(&[
            block(Category::Equation, "E = mc^2"),
            block(Category::Equation, ""),
            block(Category::Equation, "a +\nb"),
        ]);
        assert_eq!(markdown, "$$E = mc^2$$\n\n$$formula$$\n\n$$a + b$$\n\n");
    }

    #[test]
    fn references_follow_policy() {
        let blocks = [
            block(Category::Reference, "[1] A paper"),
            block(Category::Other, "page 3"),
            block(Category::Reference, ""),
        ];
        assert_eq!(MarkdownRenderer::default().render(&blocks), "");
        assert_eq!(
            MarkdownRenderer::new(ReferencePolicy::Quote).render(&blocks),
            "> [1] A paper\n\n> page 3\n\n"
        );
    }

    #[test]
    fn multiline_title_is_joined() {
        let markdown = MarkdownRenderer::default().render(&[block(Category::Title, "第一章\n总则")]);
        assert_eq!(markdown, "### 第一章 总则\n\n");
    }
}
