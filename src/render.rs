//! Post body rendering.
//!
//! Bodies are written in a small markdown subset. Inline rules run first,
//! in a fixed order (image, link, bold, italic), and then the text is split
//! into blocks: headings, quotes, lists and paragraphs. The output is markup
//! meant to be inserted as-is; it is not an escaping layer.

use std::sync::OnceLock;

use regex::{Captures, Regex};

const WORDS_PER_MINUTE: usize = 200;

fn image_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"!\[([^\]\n]*)\]\(([^)\n]+)\)").expect("valid image pattern"))
}

fn link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\]\n]+)\]\(([^)\n]+)\)").expect("valid link pattern"))
}

// Bold content may hold single asterisks so italic can nest inside it.
fn bold_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*\*([^*\n][^\n]*?)\*\*").expect("valid bold pattern"))
}

fn italic_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*([^*\n]+)\*").expect("valid italic pattern"))
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>\n]+>").expect("valid tag pattern"))
}

/// Renders a post body to display markup. Never fails: anything that is not
/// recognised is passed through literally.
pub fn render(content: &str) -> String {
    let normalized = content.replace("\r\n", "\n");
    let inline = render_inline(&normalized);
    render_blocks(&inline)
}

fn attr(value: &str) -> String {
    value.replace('"', "&quot;")
}

fn render_inline(text: &str) -> String {
    let text = image_re().replace_all(text, |caps: &Captures| {
        format!(r#"<img src="{}" alt="{}" />"#, attr(&caps[2]), attr(&caps[1]))
    });
    let text = link_re().replace_all(&text, |caps: &Captures| {
        format!(
            r#"<a href="{}" target="_blank" rel="noopener noreferrer">{}</a>"#,
            attr(&caps[2]),
            &caps[1]
        )
    });
    let text = bold_re().replace_all(&text, "<strong>${1}</strong>");
    let text = italic_re().replace_all(&text, "<em>${1}</em>");
    text.into_owned()
}

enum BlockLine<'a> {
    Heading(u8, &'a str),
    Quote(&'a str),
    Item(&'a str),
}

fn block_line(line: &str) -> Option<BlockLine<'_>> {
    if let Some(rest) = line.strip_prefix("### ").filter(|r| !r.is_empty()) {
        return Some(BlockLine::Heading(3, rest));
    }
    if let Some(rest) = line.strip_prefix("## ").filter(|r| !r.is_empty()) {
        return Some(BlockLine::Heading(2, rest));
    }
    if let Some(rest) = line.strip_prefix("> ").filter(|r| !r.is_empty()) {
        return Some(BlockLine::Quote(rest));
    }
    if let Some(rest) = line.strip_prefix("- ").filter(|r| !r.is_empty()) {
        return Some(BlockLine::Item(rest));
    }
    None
}

#[derive(Default)]
struct BlockWriter<'a> {
    out: Vec<String>,
    paragraph: Vec<&'a str>,
    items: Vec<&'a str>,
}

impl<'a> BlockWriter<'a> {
    fn flush_paragraph(&mut self) {
        if self.paragraph.is_empty() {
            return;
        }
        let mut body = String::new();
        let last = self.paragraph.len() - 1;
        for (i, line) in self.paragraph.iter().enumerate() {
            let trimmed = line.trim();
            body.push_str(trimmed);
            if i == last {
                break;
            }
            if line.ends_with("  ") {
                body.push_str("<br />");
            } else {
                body.push('\n');
            }
        }
        self.paragraph.clear();
        if !body.is_empty() {
            self.out.push(format!("<p>{}</p>", body));
        }
    }

    fn flush_list(&mut self) {
        if self.items.is_empty() {
            return;
        }
        let items: String = self
            .items
            .drain(..)
            .map(|item| format!("<li>{}</li>", item.trim_end()))
            .collect();
        self.out.push(format!("<ul>{}</ul>", items));
    }

    fn flush(&mut self) {
        self.flush_paragraph();
        self.flush_list();
    }
}

fn render_blocks(text: &str) -> String {
    let mut writer = BlockWriter::default();

    for line in text.lines() {
        if line.trim().is_empty() {
            writer.flush();
            continue;
        }
        match block_line(line) {
            Some(BlockLine::Item(item)) => {
                writer.flush_paragraph();
                writer.items.push(item);
            }
            Some(BlockLine::Heading(level, heading)) => {
                writer.flush();
                writer
                    .out
                    .push(format!("<h{level}>{}</h{level}>", heading.trim_end()));
            }
            Some(BlockLine::Quote(quote)) => {
                writer.flush();
                writer
                    .out
                    .push(format!("<blockquote>{}</blockquote>", quote.trim_end()));
            }
            None => {
                writer.flush_list();
                writer.paragraph.push(line);
            }
        }
    }
    writer.flush();

    writer.out.join("\n")
}

/// Body text with markup removed, whitespace collapsed. Used for excerpts
/// and word counts.
pub fn plain_text(content: &str) -> String {
    let text = image_re().replace_all(content, "${1}");
    let text = link_re().replace_all(&text, "${1}");
    let text = bold_re().replace_all(&text, "${1}");
    let text = italic_re().replace_all(&text, "${1}");
    let text = tag_re().replace_all(&text, " ");

    text.lines()
        .map(|line| match block_line(line) {
            Some(BlockLine::Heading(_, rest))
            | Some(BlockLine::Quote(rest))
            | Some(BlockLine::Item(rest)) => rest,
            None => line,
        })
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn reading_minutes(content: &str) -> usize {
    let words = plain_text(content).split_whitespace().count();
    words.div_ceil(WORDS_PER_MINUTE).max(1)
}
