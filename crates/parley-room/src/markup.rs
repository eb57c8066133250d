//! Chat markup: a tiny inline syntax rendered to HTML.
//!
//! | Syntax                  | Output                                   |
//! |-------------------------|------------------------------------------|
//! | `**bold**`              | `<b>bold</b>`                            |
//! | `*italic*`              | `<i>italic</i>`                          |
//! | `_underline_`           | `<u>underline</u>`                       |
//! | `#r red r#`, `#r red#`  | `<span style="color:red">red</span>`     |
//!
//! Color codes are `r`, `g`, `b`, or six hex digits (`#ff8800 text ff8800#`).
//! In the long form both codes must be identical. Anything that doesn't
//! match stays as typed.

use std::sync::LazyLock;

use regex_lite::{Captures, Regex};

static BOLD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.*?)\*\*").expect("valid regex"));
static ITALIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*(.*?)\*").expect("valid regex"));
static UNDERLINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_(.*?)_").expect("valid regex"));
// Color content never spans a `"`, so a rendered `style="color:#hex"`
// attribute can't be mistaken for an opening code on a second pass.
static COLOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"#(r|g|b|[0-9a-fA-F]{6}) ([^"]*?) (r|g|b|[0-9a-fA-F]{6})#"#).expect("valid regex")
});
static SHORT_COLOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"#(r|g|b|[0-9a-fA-F]{6}) ([^#"]+?)#"#).expect("valid regex")
});

/// Renders chat markup to HTML.
///
/// Rules apply in a fixed order (bold, italic, underline, color), and
/// rendering already-rendered text changes nothing.
pub fn render(text: &str) -> String {
    let text = BOLD_RE.replace_all(text, "<b>$1</b>");
    let text = ITALIC_RE.replace_all(&text, "<i>$1</i>");
    let text = UNDERLINE_RE.replace_all(&text, "<u>$1</u>");
    let text = COLOR_RE.replace_all(&text, |caps: &Captures<'_>| {
        if caps[1] == caps[3] {
            color_span(&caps[1], &caps[2])
        } else {
            caps[0].to_string()
        }
    });
    let text = SHORT_COLOR_RE.replace_all(&text, |caps: &Captures<'_>| {
        color_span(&caps[1], &caps[2])
    });
    text.into_owned()
}

fn color_span(code: &str, content: &str) -> String {
    let color = match code {
        "r" => "red".to_string(),
        "g" => "green".to_string(),
        "b" => "blue".to_string(),
        hex => format!("#{hex}"),
    };
    format!("<span style=\"color:{color}\">{content}</span>")
}
