//! HTML re-indentation.
//!
//! Normalises layout without touching content: block elements start their own
//! line and indent their children, inline elements and text stay in the text
//! flow, whitespace runs in text collapse to one space. A block element whose
//! content is all inline stays on one line (`<p>Hello <b>you</b></p>`).
//!
//! `<pre>` and `<textarea>` are copied verbatim. `<script>` and `<style>`
//! bodies keep their relative indentation and are shifted to sit one level
//! inside their tag.
//!
//! The output is a fixed point: beautifying it again yields the same text.

/// Elements kept in the text flow.
const INLINE_ELEMENTS: &[&str] = &[
    "a", "abbr", "acronym", "area", "audio", "b", "bdi", "bdo", "big", "br", "button", "canvas",
    "cite", "code", "data", "datalist", "del", "dfn", "em", "embed", "i", "iframe", "img",
    "input", "ins", "kbd", "keygen", "label", "map", "mark", "math", "meter", "noscript",
    "object", "output", "progress", "q", "ruby", "s", "samp", "select", "small", "span",
    "strike", "strong", "sub", "sup", "svg", "template", "text", "textarea", "time", "tt", "u",
    "var", "video", "wbr",
];

/// Elements that never have content or an end tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Elements whose body is not markup.
const RAW_ELEMENTS: &[&str] = &["script", "style", "pre", "textarea"];

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Text(&'a str),
    /// Comments, doctypes, processing instructions.
    Special(&'a str),
    Start {
        name: String,
        raw: &'a str,
        self_closing: bool,
    },
    End {
        name: String,
        raw: &'a str,
    },
    /// A raw-text element, start tag through end tag.
    Raw {
        name: String,
        start: &'a str,
        body: &'a str,
        end: &'a str,
    },
}

fn tag_name(raw: &str) -> String {
    raw.trim_start_matches(['<', '/'])
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == ':')
        .collect::<String>()
        .to_ascii_lowercase()
}

/// End of the tag starting at `start` (just past `>`), honouring quoted
/// attribute values.
fn tag_end(html: &str, start: usize) -> usize {
    let mut quote = None;
    for (i, c) in html[start..].char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => return start + i + 1,
            _ => {}
        }
    }
    html.len()
}

fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .to_ascii_lowercase()
        .find(&needle.to_ascii_lowercase())
}

fn is_tag_open(rest: &str) -> bool {
    let mut chars = rest.chars().skip(1);
    match chars.next() {
        Some('!' | '?') => true,
        Some('/') => chars.next().is_some_and(|c| c.is_ascii_alphabetic()),
        Some(c) => c.is_ascii_alphabetic(),
        None => false,
    }
}

fn tokenize(html: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut text_start = 0;
    let mut i = 0;
    let bytes = html.as_bytes();

    while i < html.len() {
        if bytes[i] != b'<' {
            i += 1;
            continue;
        }
        let rest = &html[i..];
        let end = if rest.starts_with("<!--") {
            rest.find("-->").map_or(html.len(), |p| i + p + 3)
        } else if is_tag_open(rest) {
            tag_end(html, i)
        } else {
            i += 1;
            continue;
        };

        if text_start < i {
            tokens.push(Token::Text(&html[text_start..i]));
        }
        let raw = &html[i..end];
        if raw.starts_with("<!") || raw.starts_with("<?") {
            tokens.push(Token::Special(raw));
            i = end;
        } else if raw.starts_with("</") {
            tokens.push(Token::End {
                name: tag_name(raw),
                raw,
            });
            i = end;
        } else {
            let name = tag_name(raw);
            let self_closing = raw.ends_with("/>");
            if RAW_ELEMENTS.contains(&name.as_str()) && !self_closing {
                let close = format!("</{name}");
                let body_len = find_ci(&html[end..], &close).unwrap_or(html.len() - end);
                let close_start = end + body_len;
                let close_end = if close_start < html.len() {
                    tag_end(html, close_start)
                } else {
                    html.len()
                };
                tokens.push(Token::Raw {
                    name,
                    start: raw,
                    body: &html[end..close_start],
                    end: &html[close_start..close_end],
                });
                i = close_end;
            } else {
                tokens.push(Token::Start {
                    name,
                    raw,
                    self_closing,
                });
                i = end;
            }
        }
        text_start = i;
    }
    if text_start < html.len() {
        tokens.push(Token::Text(&html[text_start..]));
    }
    tokens
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

/// Remove the common leading whitespace of the non-blank lines.
fn dedent(body: &str) -> Vec<&str> {
    let lines: Vec<&str> = body.lines().map(str::trim_end).collect();
    let first = lines.iter().position(|l| !l.is_empty());
    let last = lines.iter().rposition(|l| !l.is_empty());
    let (Some(first), Some(last)) = (first, last) else {
        return Vec::new();
    };
    let lines = &lines[first..=last];
    let common = lines
        .iter()
        .filter(|l| !l.is_empty())
        .map(|l| l.bytes().take_while(|b| *b == b' ' || *b == b'\t').count())
        .min()
        .unwrap_or(0);
    lines
        .iter()
        .map(|l| if l.is_empty() { *l } else { &l[common..] })
        .collect()
}

struct Printer<'a> {
    unit: &'a str,
    lines: Vec<String>,
    level: usize,
    current: String,
    current_level: usize,
    /// Block element whose start tag opened `current` with nothing but
    /// inline content since.
    open_block: Option<String>,
    /// `current` ends with a block start tag and nothing after it yet.
    fresh: bool,
}

impl Printer<'_> {
    fn indent(&self, level: usize) -> String {
        self.unit.repeat(level)
    }

    fn flush(&mut self) {
        let content = self.current.trim_end();
        if !content.is_empty() {
            let line = format!("{}{}", self.indent(self.current_level), content);
            self.lines.push(line);
        }
        self.current.clear();
        self.open_block = None;
        self.fresh = false;
    }

    fn push_line(&mut self, level: usize, content: &str) {
        let line = format!("{}{}", self.indent(level), content);
        self.lines.push(line);
    }

    fn append(&mut self, fragment: &str) {
        if self.current.is_empty() {
            self.current_level = self.level;
        }
        self.current.push_str(fragment);
        self.fresh = false;
    }

    fn text(&mut self, text: &str) {
        let collapsed = collapse_whitespace(text);
        if self.current.is_empty() || self.fresh {
            let trimmed = collapsed.trim_start();
            if !trimmed.is_empty() {
                self.append(trimmed);
            }
        } else if !(collapsed == " " && self.current.ends_with(' ')) {
            self.current.push_str(&collapsed);
        }
    }

    fn block_start(&mut self, name: &str, raw: &str, has_content: bool) {
        self.flush();
        if has_content {
            self.append(raw);
            self.open_block = Some(name.to_string());
            self.fresh = true;
            self.level += 1;
        } else {
            self.push_line(self.level, raw);
        }
    }

    fn block_end(&mut self, name: &str, raw: &str) {
        self.level = self.level.saturating_sub(1);
        if self.open_block.as_deref() == Some(name) {
            let content_len = self.current.trim_end().len();
            self.current.truncate(content_len);
            self.current.push_str(raw);
            self.flush();
        } else {
            self.flush();
            self.push_line(self.level, raw);
        }
    }

    fn raw_element(&mut self, name: &str, start: &str, body: &str, end: &str) {
        match name {
            "pre" => {
                self.flush();
                self.push_line(self.level, &format!("{start}{body}{end}"));
            }
            "textarea" => self.append(&format!("{start}{body}{end}")),
            _ => {
                self.flush();
                let lines = dedent(body);
                if lines.is_empty() {
                    self.push_line(self.level, &format!("{start}{end}"));
                    return;
                }
                self.push_line(self.level, start);
                let inner = self.indent(self.level + 1);
                for line in lines {
                    if line.is_empty() {
                        self.lines.push(String::new());
                    } else {
                        self.lines.push(format!("{inner}{line}"));
                    }
                }
                self.push_line(self.level, end);
            }
        }
    }
}

/// Re-indent `html` with `unit` per nesting level.
pub fn beautify(html: &str, unit: &str) -> String {
    let mut printer = Printer {
        unit,
        lines: Vec::new(),
        level: 0,
        current: String::new(),
        current_level: 0,
        open_block: None,
        fresh: false,
    };

    for token in tokenize(html) {
        match token {
            Token::Text(text) => printer.text(text),
            Token::Special(raw) => {
                printer.flush();
                printer.push_line(printer.level, raw);
            }
            Token::Start {
                name,
                raw,
                self_closing,
            } => {
                if INLINE_ELEMENTS.contains(&name.as_str()) {
                    printer.append(raw);
                } else {
                    let void = self_closing || VOID_ELEMENTS.contains(&name.as_str());
                    printer.block_start(&name, raw, !void);
                }
            }
            Token::End { name, raw } => {
                if INLINE_ELEMENTS.contains(&name.as_str()) {
                    printer.append(raw);
                } else if !VOID_ELEMENTS.contains(&name.as_str()) {
                    printer.block_end(&name, raw);
                }
            }
            Token::Raw {
                name,
                start,
                body,
                end,
            } => printer.raw_element(&name, start, body, end),
        }
    }
    printer.flush();

    if printer.lines.is_empty() {
        return String::new();
    }
    let mut out = printer.lines.join("\n");
    out.push('\n');
    out
}
