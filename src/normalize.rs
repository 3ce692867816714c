use once_cell::sync::Lazy;
use regex::Regex;
use tracing::instrument;

/// Literal replacements, applied in this order.
const REPLACEMENTS: &[(&str, &str)] = &[
    ("（包文字", "（包"),
    ("（包文字乙", "（包乙"),
    ("（包文字甲", "（包甲"),
    ("（包文字丙", "（包丙"),
    ("（包文字丁", "（包丁"),
    ("（包文字", "（包"),
    ("（包文", "（包"),
    ("（包了", "（包了"),
    ("（包", "（包"),
    ("框大墙体内", "墙体内"),
    ("框大墙", "墙"),
    ("框大", ""),
    ("大墙", "墙"),
    ("框内", "内"),
    ("墙大", "墙"),
    ("体内", "内"),
    ("框大体内", "体内"),
    ("大体内", "体内"),
    ("，。：", "，。："),
    ("；；", "；"),
    ("。。", "。"),
    ("，，，,", ","),
    ("失由", "损失"),
    ("切乙方", "此外乙方"),
    ("切", "此"),
];

/// Filler token the recognizer inserts between unrelated glyphs.
const FILLER: &str = "文字";

const INVISIBLE: &[char] = &[
    '\t', '\r', '\u{00A0}', '\u{1680}', '\u{180E}', '\u{2000}', '\u{2001}', '\u{2002}',
    '\u{2003}', '\u{2004}', '\u{2005}', '\u{2006}', '\u{2007}', '\u{2008}', '\u{2009}',
    '\u{200A}', '\u{200B}', '\u{2028}', '\u{2029}', '\u{202F}', '\u{205F}', '\u{3000}',
    '\u{FEFF}',
];

/// Runs of these collapse to a single character.
const BRACKETS: &[char] = &['（', '）', '“', '”', '‘', '’'];

static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());
static LEADING_PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[，。、：；]+").unwrap());

#[derive(Debug, Clone, Copy)]
pub struct NormalizerOptions {
    /// Lines at least this many characters long are never merged.
    pub merge_threshold: usize,
    /// A line ending in one of these is complete.
    pub terminal_marks: &'static [char],
    /// A line starting with one of these begins a new unit.
    pub leading_marks: &'static [char],
}

impl Default for NormalizerOptions {
    fn default() -> Self {
        Self {
            merge_threshold: 60,
            terminal_marks: &['。', '！', '？', '：', '；', '》', '」', '\'', '"'],
            leading_marks: &['。', '，', '、', '！', '？', '：', '；', '（', '【', '《'],
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TextNormalizer {
    options: NormalizerOptions,
}

impl TextNormalizer {
    pub fn new(options: NormalizerOptions) -> Self {
        Self { options }
    }

    /// Repairs known misrecognitions, merges lines broken mid-sentence, then
    /// cleans whitespace and punctuation. Passes repeat until the text stops
    /// changing, so the result is a fixed point.
    #[instrument(level = "trace", skip(self, text))]
    pub fn normalize(&self, text: &str) -> String {
        // Every pass that changes the text lowers the count of `切`, then of
        // `由`, then the length. No rule produces `切` or `由`, so this ends.
        let mut current = text.to_string();
        loop {
            let next = self.pass(&current);
            if next == current {
                return next;
            }
            current = next;
        }
    }

    fn pass(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }
        let text = repair_misrecognitions(text);
        let text = self.merge_broken_lines(&text);
        let text = repair_misrecognitions(&text);
        let text = clean_whitespace(&text);
        let text = repair_punctuation(&text);
        text.trim().to_string()
    }

    fn merge_broken_lines(&self, text: &str) -> String {
        let lines = text.split('\n').collect::<Vec<_>>();
        let mut merged = Vec::with_capacity(lines.len());
        let mut i = 0;
        while i < lines.len() {
            let current = lines[i].trim_end();
            if let Some(next) = lines.get(i + 1).map(|line| line.trim()) {
                if self.continues(current, next) {
                    merged.push(format!("{current}{next}"));
                    i += 2;
                    continue;
                }
            }
            merged.push(current.to_string());
            i += 1;
        }
        merged.join("\n")
    }

    fn continues(&self, current: &str, next: &str) -> bool {
        let (Some(last), Some(first)) = (current.chars().last(), next.chars().next()) else {
            // Blank lines separate paragraphs.
            return false;
        };
        current.chars().count() < self.options.merge_threshold
            && !self.options.terminal_marks.contains(&last)
            && !self.options.leading_marks.contains(&first)
    }
}

/// Normalizes with default options.
pub fn normalize(text: &str) -> String {
    TextNormalizer::default().normalize(text)
}

fn repair_misrecognitions(text: &str) -> String {
    let text = REPLACEMENTS
        .iter()
        .fold(text.to_string(), |acc, (wrong, right)| replace_all(acc, wrong, right));
    strip_filler(&text)
}

/// Replaces until `wrong` no longer occurs, so chains like `墙大大` settle in
/// one call.
fn replace_all(mut text: String, wrong: &str, right: &str) -> String {
    loop {
        let next = text.replace(wrong, right);
        if next == text {
            return text;
        }
        text = next;
    }
}

fn is_han(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

/// Removes the filler token unless it touches another Han character.
fn strip_filler(text: &str) -> String {
    let chars = text.chars().collect::<Vec<_>>();
    let filler = FILLER.chars().collect::<Vec<_>>();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i..].starts_with(&filler) {
            let before = i.checked_sub(1).map(|j| chars[j]);
            let after = chars.get(i + filler.len()).copied();
            if !before.is_some_and(is_han) && !after.is_some_and(is_han) {
                i += filler.len();
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

fn clean_whitespace(text: &str) -> String {
    let text = text.replace(INVISIBLE, "");
    let text = text.lines().map(str::trim).collect::<Vec<_>>().join("\n");
    BLANK_RUNS.replace_all(&text, "\n\n").into_owned()
}

fn repair_punctuation(text: &str) -> String {
    let mut collapsed = String::with_capacity(text.len());
    let mut previous = None;
    for c in text.chars() {
        if previous == Some(c) && BRACKETS.contains(&c) {
            continue;
        }
        collapsed.push(c);
        previous = Some(c);
    }
    LEADING_PUNCTUATION.replace(&collapsed, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_repair() {
        assert_eq!(normalize("失由用户自行承担"), "损失用户自行承担");
        assert_eq!(normalize("切乙方应当"), "此外乙方应当");
        assert_eq!(normalize("框大墙体内部"), "墙内部");
        assert_eq!(normalize("好。。"), "好。");
    }

    #[test]
    fn filler_only_removed_when_isolated() {
        assert_eq!(normalize("abc 文字 def"), "abc  def");
        assert_eq!(normalize("中文字体"), "中文字体");
        assert_eq!(normalize("文字"), "");
    }

    #[test]
    fn short_unterminated_lines_merge() {
        assert_eq!(
            normalize("第一部分内容\ncontinuation"),
            "第一部分内容continuation"
        );
    }

    #[test]
    fn terminated_lines_stay_apart() {
        assert_eq!(normalize("第一部分内容。\n第二部分"), "第一部分内容。\n第二部分");
    }

    #[test]
    fn new_unit_marks_block_merge() {
        assert_eq!(normalize("甲方\n（一）条款"), "甲方\n（一）条款");
        assert_eq!(normalize("甲方\n《合同法》"), "甲方\n《合同法》");
    }

    #[test]
    fn long_lines_stay_apart() {
        let long = "长".repeat(60);
        let input = format!("{long}\n下一行");
        assert_eq!(normalize(&input), input);
    }

    #[test]
    fn blank_lines_separate_paragraphs() {
        assert_eq!(normalize("甲\n\n\n\n乙"), "甲\n\n乙");
    }

    #[test]
    fn merge_threshold_is_configurable() {
        let normalizer = TextNormalizer::new(NormalizerOptions {
            merge_threshold: 2,
            ..Default::default()
        });
        assert_eq!(normalizer.normalize("abc\ndef"), "abc\ndef");
        assert_eq!(normalizer.normalize("a\ndef"), "adef");
    }

    #[test]
    fn invisible_whitespace_is_removed() {
        assert_eq!(normalize("  a\u{200B}b\u{3000}c\t。  "), "abc。");
        assert_eq!(normalize("\u{FEFF}标题。"), "标题。");
    }

    #[test]
    fn punctuation_repair() {
        assert_eq!(normalize("（（注））"), "（注）");
        assert_eq!(normalize("““引用””"), "“引用”");
        assert_eq!(normalize("，。开头"), "开头");
    }

    #[test]
    fn idempotent() {
        let samples = [
            "",
            "失由由",
            "a\nb\nc\nd",
            "，\n。\n文字\n文字",
            "甲方（（包文字乙））\n\n\n\n乙方。",
            " \u{200B} 第一行\n 第二行。\n第三行",
            "切切切\n大墙墙大\n框大体内",
            "““””‘’‘’（）（）",
            "one line that is definitely long enough to not be merged with the next line at all\nnext",
        ];
        for sample in samples {
            let once = normalize(sample);
            assert_eq!(normalize(&once), once, "input {sample:?}");
        }

        let chains = [
            format!("墙{}", "大".repeat(40)),
            format!("失{}", "由".repeat(40)),
            format!("{}墙", "大".repeat(40)),
            format!("{}\n{}", "切".repeat(30), "失由".repeat(30)),
        ];
        for sample in &chains {
            let once = normalize(sample);
            assert_eq!(normalize(&once), once, "input {sample:?}");
        }
    }

    #[test]
    fn chained_repairs_settle() {
        assert_eq!(normalize(&format!("墙{}", "大".repeat(40))), "墙");
        assert_eq!(
            normalize(&format!("失{}", "由".repeat(40))),
            format!("{}失", "损".repeat(40))
        );
    }

    #[test]
    fn empty_input() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   \n \n"), "");
    }
}
