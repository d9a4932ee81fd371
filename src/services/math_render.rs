use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

// Block delimiters are tried first so `$$x$$` is never read as two empty
// inline segments. Both alternatives are non-greedy and need a non-empty body.
static MATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\$([\s\S]+?)\$\$|\$([^$]+?)\$").expect("math pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Text,
    InlineMath,
    BlockMath,
}

/// A piece of message text, either plain or a math expression with its
/// delimiters stripped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Span<'a> {
    pub kind: SpanKind,
    pub content: Cow<'a, str>,
}

impl<'a> Span<'a> {
    fn borrowed(kind: SpanKind, content: &'a str) -> Self {
        Self {
            kind,
            content: Cow::Borrowed(content),
        }
    }

    pub fn is_math(&self) -> bool {
        self.kind != SpanKind::Text
    }

    pub fn into_owned(self) -> Span<'static> {
        Span {
            kind: self.kind,
            content: Cow::Owned(self.content.into_owned()),
        }
    }
}

/// Lazy span iterator over a message. Cloning it restarts from the
/// clone point; it never fails, malformed delimiters stay literal text.
#[derive(Debug, Clone)]
pub struct MathSpans<'a> {
    text: &'a str,
    pos: usize,
    pending: Option<Span<'a>>,
}

pub fn render_spans(text: &str) -> MathSpans<'_> {
    MathSpans {
        text,
        pos: 0,
        pending: None,
    }
}

/// Detached spans, for handing to the webview.
pub fn render_owned(text: &str) -> Vec<Span<'static>> {
    render_spans(text).map(Span::into_owned).collect()
}

impl<'a> Iterator for MathSpans<'a> {
    type Item = Span<'a>;

    fn next(&mut self) -> Option<Span<'a>> {
        if let Some(span) = self.pending.take() {
            return Some(span);
        }
        if self.pos >= self.text.len() {
            return None;
        }

        let Some(caps) = MATH_RE.captures_at(self.text, self.pos) else {
            let rest = &self.text[self.pos..];
            self.pos = self.text.len();
            return Some(Span::borrowed(SpanKind::Text, rest));
        };

        let whole = caps.get(0)?;
        let math = match (caps.get(1), caps.get(2)) {
            (Some(block), _) => Span::borrowed(SpanKind::BlockMath, block.as_str()),
            (None, Some(inline)) => Span::borrowed(SpanKind::InlineMath, inline.as_str()),
            (None, None) => return None,
        };

        let before = &self.text[self.pos..whole.start()];
        self.pos = whole.end();
        if before.is_empty() {
            Some(math)
        } else {
            self.pending = Some(math);
            Some(Span::borrowed(SpanKind::Text, before))
        }
    }
}
