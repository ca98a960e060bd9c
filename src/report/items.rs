//! Numbered report items
//!
//! Report stages answer with a numbered list. An item starts at a line
//! carrying a numbered marker and runs until the next marker line of the same
//! grammar; text before the first marker is the header. The first marker found
//! fixes the grammar for the whole report, so a nested list in another style
//! stays inside its parent item.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Closed set of recognised marker styles, tried in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarkerGrammar {
    /// `## 1. Title`
    Heading,
    /// `**1. Title**` or `**1.** Title`
    Bold,
    /// `- 1. Title`, `* 1) Title`
    Bullet,
    /// `**1 페이지: Title**` slide labels; the page word needs a delimiter
    Page,
    /// `1. Title`, `1) Title`
    Plain,
}

static HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*#{1,6}\s*(?P<num>\d{1,3})[.)](?P<tail>\s.*|$)").expect("heading marker regex")
});
static BOLD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\*\*(?P<num>\d{1,3})[.)](?P<tail>(?:\*\*|\s).*|$)").expect("bold marker regex"));
static BULLET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*[*+\-]\s+(?P<num>\d{1,3})[.)](?P<tail>\s.*|$)").expect("bullet marker regex")
});
static PAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:\*\*)?(?P<num>\d{1,3})\s*페이지(?P<tail>\s*(?:[:.)\-]|\*\*).*|\s*$)")
        .expect("page marker regex")
});
static PLAIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?P<num>\d{1,3})[.)](?P<tail>\s.*|$)").expect("plain marker regex"));

impl MarkerGrammar {
    pub const ALL: [MarkerGrammar; 5] = [
        MarkerGrammar::Heading,
        MarkerGrammar::Bold,
        MarkerGrammar::Bullet,
        MarkerGrammar::Page,
        MarkerGrammar::Plain,
    ];

    fn regex(&self) -> &'static Regex {
        match self {
            MarkerGrammar::Heading => &HEADING,
            MarkerGrammar::Bold => &BOLD,
            MarkerGrammar::Bullet => &BULLET,
            MarkerGrammar::Page => &PAGE,
            MarkerGrammar::Plain => &PLAIN,
        }
    }

    /// Match `line` against this grammar only
    pub fn recognize(&self, line: &str) -> Option<MarkerMatch> {
        let caps = self.regex().captures(line)?;
        let num = caps.name("num")?;
        let tail = caps.name("tail")?;
        Some(MarkerMatch {
            grammar: *self,
            number: num.as_str().parse().ok()?,
            number_start: num.start(),
            number_end: num.end(),
            tail_start: tail.start(),
        })
    }

    /// Canonical marker prefix for `number`; the line's tail follows it
    pub fn prefix(&self, number: usize) -> String {
        match self {
            MarkerGrammar::Heading => format!("### {}.", number),
            MarkerGrammar::Bold => format!("**{}.", number),
            MarkerGrammar::Bullet => format!("- {}.", number),
            MarkerGrammar::Page => format!("**{} 페이지:", number),
            MarkerGrammar::Plain => format!("{}.", number),
        }
    }
}

/// Where a marker sits within its line (byte offsets)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerMatch {
    pub grammar: MarkerGrammar,
    pub number: usize,
    number_start: usize,
    number_end: usize,
    tail_start: usize,
}

/// First grammar in priority order that matches `line`
pub fn recognize_marker(line: &str) -> Option<MarkerMatch> {
    MarkerGrammar::ALL.iter().find_map(|g| g.recognize(line))
}

/// One addressable unit of a report stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportItem {
    /// 1-based position in the report
    pub ordinal: usize,
    /// Marker line plus continuation lines
    pub raw_text: String,
}

impl ReportItem {
    pub fn new(ordinal: usize, raw_text: impl Into<String>) -> Self {
        Self {
            ordinal,
            raw_text: raw_text.into(),
        }
    }

    fn first_line(&self) -> &str {
        self.raw_text.lines().next().unwrap_or("")
    }

    pub fn marker(&self) -> Option<MarkerMatch> {
        recognize_marker(self.first_line())
    }

    /// Item text without its marker, trimmed
    pub fn title(&self) -> &str {
        let first = self.first_line();
        match self.marker() {
            Some(m) => first[m.tail_start..].trim().trim_end_matches("**").trim_start_matches(':').trim(),
            None => first.trim(),
        }
    }

    /// Renumber to `ordinal` in `grammar`. Same grammar keeps the line's
    /// styling and only swaps the number; a different grammar rebuilds the
    /// prefix. Text without a marker gets one. Continuation lines that would
    /// read as a new item in `grammar` are indented so the item stays whole.
    pub fn conform(&self, grammar: MarkerGrammar, ordinal: usize) -> ReportItem {
        let first = self.first_line();

        let mut text = match self.marker() {
            Some(m) if m.grammar == grammar => format!(
                "{}{}{}",
                &first[..m.number_start],
                ordinal,
                &first[m.number_end..]
            ),
            Some(m) => format!("{}{}", grammar.prefix(ordinal), &first[m.tail_start..]),
            None => format!("{} {}", grammar.prefix(ordinal), first.trim()),
        };

        for line in self.raw_text.lines().skip(1) {
            text.push('\n');
            if grammar.recognize(line).is_some() {
                text.push_str("    ");
            }
            text.push_str(line);
        }

        ReportItem::new(ordinal, text)
    }
}

/// Header text plus ordered items
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedReport {
    pub header: String,
    pub items: Vec<ReportItem>,
}

impl ParsedReport {
    /// Grammar of the first item, if any
    pub fn grammar(&self) -> Option<MarkerGrammar> {
        self.items.first().and_then(|i| i.marker()).map(|m| m.grammar)
    }

    pub fn render(&self) -> String {
        render(&self.header, &self.items)
    }
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Split stage content into header and items; ordinals follow appearance
pub fn parse(content: &str) -> ParsedReport {
    let lines: Vec<&str> = content.lines().collect();

    let Some((first_idx, first_match)) = lines
        .iter()
        .enumerate()
        .find_map(|(i, line)| recognize_marker(line).map(|m| (i, m)))
    else {
        return ParsedReport {
            header: content.trim().to_string(),
            items: Vec::new(),
        };
    };

    let grammar = first_match.grammar;
    let max_indent = indent_of(lines[first_idx]);
    let starts_item =
        |line: &str| indent_of(line) <= max_indent && grammar.recognize(line).is_some();

    let header = lines[..first_idx].join("\n").trim().to_string();
    let mut items = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for &line in &lines[first_idx..] {
        if starts_item(line) && !current.is_empty() {
            items.push(ReportItem::new(items.len() + 1, current.join("\n").trim_end()));
            current.clear();
        }
        current.push(line);
    }
    if !current.is_empty() {
        items.push(ReportItem::new(items.len() + 1, current.join("\n").trim_end()));
    }

    ParsedReport { header, items }
}

/// Inverse of [`parse`] for a trimmed header and well-formed items
pub fn render(header: &str, items: &[ReportItem]) -> String {
    let mut blocks: Vec<&str> = Vec::with_capacity(items.len() + 1);
    if !header.trim().is_empty() {
        blocks.push(header.trim());
    }
    blocks.extend(items.iter().map(|i| i.raw_text.as_str()));
    blocks.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    fn normalize(s: &str) -> String {
        s.lines()
            .map(str::trim_end)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_heading_grammar() {
        let m = recognize_marker("## 3. 기술 역량 강화").unwrap();
        assert_eq!((m.grammar, m.number), (MarkerGrammar::Heading, 3));
        assert!(recognize_marker("## Ⅱ. 핵심 성공 요소").is_none());
    }

    #[test]
    fn test_bold_grammar() {
        let m = recognize_marker("**2. 차별화 전략:**").unwrap();
        assert_eq!((m.grammar, m.number), (MarkerGrammar::Bold, 2));
        assert_eq!(recognize_marker("**1.** 수행 조직").unwrap().grammar, MarkerGrammar::Bold);
        assert!(recognize_marker("**핵심 메시지**").is_none());
        assert!(recognize_marker("**1.5억** 규모의 사업").is_none());
        assert!(recognize_marker("**3.** ").is_some());
    }

    #[test]
    fn test_bullet_grammar() {
        assert_eq!(recognize_marker("- 4) 일정 관리").unwrap().grammar, MarkerGrammar::Bullet);
        assert_eq!(recognize_marker("* 1. 품질").unwrap().number, 1);
        assert!(recognize_marker("- 세부 내용").is_none());
    }

    #[test]
    fn test_page_grammar() {
        let m = recognize_marker("**7 페이지: 추진 일정**").unwrap();
        assert_eq!((m.grammar, m.number), (MarkerGrammar::Page, 7));
        assert_eq!(recognize_marker("1페이지: 표지").unwrap().grammar, MarkerGrammar::Page);
        assert_eq!(recognize_marker("**2 페이지**").unwrap().number, 2);
        assert!(recognize_marker("10 페이지 이내로 작성").is_none());
        assert!(recognize_marker("**20페이지 분량으로 제출**").is_none());
    }

    #[test]
    fn test_quantities_in_header_do_not_open_items() {
        let content = "제안서는 10 페이지 이내로 작성\n**1.5억** 규모의 사업\n\n1. 사업 이해\n2. 수행 전략";
        let parsed = parse(content);
        assert_eq!(parsed.header, "제안서는 10 페이지 이내로 작성\n**1.5억** 규모의 사업");
        assert_eq!(parsed.items.len(), 2);
        assert_eq!(parsed.grammar(), Some(MarkerGrammar::Plain));
    }

    #[test]
    fn test_plain_grammar() {
        assert_eq!(recognize_marker("1. 사업 이해").unwrap().grammar, MarkerGrammar::Plain);
        assert_eq!(recognize_marker("  12) 보안").unwrap().number, 12);
        assert!(recognize_marker("2024. 5. 1. 공고").is_none());
        assert!(recognize_marker("3.5억원 규모").is_none());
    }

    #[test]
    fn test_parse_header_and_items() {
        let content = "# 핵심 성공 요소\n\n1. 기술력\n- 근거: 평가 배점\n\n2. 수행 경험\n3. 가격 경쟁력\n";
        let parsed = parse(content);
        assert_eq!(parsed.header, "# 핵심 성공 요소");
        assert_eq!(parsed.items.len(), 3);
        assert_eq!(parsed.items[0].raw_text, "1. 기술력\n- 근거: 평가 배점");
        assert_eq!(parsed.items[2].ordinal, 3);
        assert_eq!(parsed.grammar(), Some(MarkerGrammar::Plain));
    }

    #[test]
    fn test_nested_list_stays_in_parent() {
        let content = "**1. 전략 방향**\n1) 세부 과제 A\n2) 세부 과제 B\n**2. 실행 계획**";
        let parsed = parse(content);
        assert_eq!(parsed.items.len(), 2);
        assert!(parsed.items[0].raw_text.contains("2) 세부 과제 B"));
    }

    #[test]
    fn test_misnumbered_reply_gets_positional_ordinals() {
        let parsed = parse("3. a\n3. b\n9. c");
        let ordinals: Vec<usize> = parsed.items.iter().map(|i| i.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
    }

    #[test]
    fn test_no_markers_is_all_header() {
        let parsed = parse("  단락 하나.\n단락 둘.  ");
        assert!(parsed.items.is_empty());
        assert_eq!(parsed.header, "단락 하나.\n단락 둘.");
    }

    #[test]
    fn test_render_parse_is_whitespace_stable() {
        let content = "전략 보고서\n\n\n## 1. 사업 이해   \n내용\n\n## 2. 추진 전략\n- 항목\n";
        assert_eq!(normalize(&parse(content).render()), normalize(content));
    }

    #[test]
    fn test_conform_same_grammar_keeps_styling() {
        let item = ReportItem::new(1, "**1. 차별화:** 설명\n- 근거");
        let moved = item.conform(MarkerGrammar::Bold, 4);
        assert_eq!(moved.raw_text, "**4. 차별화:** 설명\n- 근거");
        assert_eq!(moved.ordinal, 4);
    }

    #[test]
    fn test_conform_other_grammar_rebuilds_prefix() {
        let item = ReportItem::new(1, "1. 차별화");
        assert_eq!(item.conform(MarkerGrammar::Heading, 2).raw_text, "### 2. 차별화");
        let bare = ReportItem::new(1, "표시 없음");
        assert_eq!(bare.conform(MarkerGrammar::Plain, 5).raw_text, "5. 표시 없음");
    }

    #[test]
    fn test_conform_indents_lines_that_would_split_the_item() {
        let reply = ReportItem::new(1, "1. 상위 항목\n**2. 강조된 하위 문장**");
        let conformed = reply.conform(MarkerGrammar::Bold, 1);
        let reparsed = parse(&render("", &[conformed.clone()]));
        assert_eq!(reparsed.items, vec![conformed]);
    }

    #[test]
    fn test_title_strips_marker() {
        assert_eq!(ReportItem::new(1, "**2. 차별화 전략:**").title(), "차별화 전략:");
        assert_eq!(ReportItem::new(1, "3) 일정").title(), "일정");
    }

    /// Well-formed report: marker-free header, one grammar, contiguous ordinals
    #[derive(Debug, Clone)]
    struct WellFormed {
        header: String,
        items: Vec<ReportItem>,
    }

    const WORDS: [&str; 8] = ["사업", "전략", "risk", "plan", "보안", "일정", "budget", "품질"];

    fn phrase(g: &mut Gen) -> String {
        let n = usize::arbitrary(g) % 4 + 1;
        (0..n).map(|_| *g.choose(&WORDS).unwrap()).collect::<Vec<_>>().join(" ")
    }

    impl Arbitrary for WellFormed {
        fn arbitrary(g: &mut Gen) -> Self {
            let grammar = *g.choose(&MarkerGrammar::ALL).unwrap();
            let header = if bool::arbitrary(g) { phrase(g) } else { String::new() };
            let count = usize::arbitrary(g) % 6;
            let items = (1..=count)
                .map(|ordinal| {
                    let mut text = format!("{} {}", grammar.prefix(ordinal), phrase(g));
                    for _ in 0..usize::arbitrary(g) % 3 {
                        text.push_str(&format!("\n  - {}", phrase(g)));
                    }
                    ReportItem::new(ordinal, text)
                })
                .collect();
            WellFormed { header, items }
        }
    }

    #[quickcheck]
    fn prop_parse_inverts_render(report: WellFormed) -> bool {
        let parsed = parse(&render(&report.header, &report.items));
        parsed.header == report.header && parsed.items == report.items
    }
}
