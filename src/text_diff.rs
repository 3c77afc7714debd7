//! Word-level rendering of changes to text attributes
//!
//! Presentational only: nothing in the engine inspects the rendered output.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextFormat {
    /// `<del class="differ">old</del><ins class="differ">new</ins>`
    #[default]
    Html,
    /// `{"old" >> "new"}`, `{+"added"}`, `{-"removed"}`
    Ascii,
}

pub trait TextDiffer: Send + Sync {
    /// Renders the change from `live` to `editable`.
    fn diff(&self, live: &str, editable: &str, format: TextFormat) -> String;
}

/// Longest-common-subsequence diff over words and the whitespace between them.
#[derive(Debug, Default, Clone, Copy)]
pub struct WordDiffer;

#[derive(Debug, PartialEq, Eq)]
enum Op<'a> {
    Keep(&'a str),
    Remove(&'a str),
    Add(&'a str),
}

impl TextDiffer for WordDiffer {
    fn diff(&self, live: &str, editable: &str, format: TextFormat) -> String {
        let old = tokenize(live);
        let new = tokenize(editable);
        let ops = diff_tokens(&old, &new);

        let mut out = String::new();
        let mut removed = String::new();
        let mut added = String::new();
        for op in ops {
            match op {
                Op::Keep(token) => {
                    flush(&mut out, &mut removed, &mut added, format);
                    out.push_str(&escape(token, format));
                }
                Op::Remove(token) => removed.push_str(token),
                Op::Add(token) => added.push_str(token),
            }
        }
        flush(&mut out, &mut removed, &mut added, format);
        out
    }
}

/// Splits text into alternating runs of whitespace and non-whitespace.
fn tokenize(text: &str) -> Vec<&str> {
    let mut tokens = vec![];
    let mut start = 0;
    let mut in_space = None;
    for (idx, ch) in text.char_indices() {
        let space = ch.is_whitespace();
        match in_space {
            Some(previous) if previous != space => {
                tokens.push(&text[start..idx]);
                start = idx;
            }
            _ => {}
        }
        in_space = Some(space);
    }
    if start < text.len() {
        tokens.push(&text[start..]);
    }
    tokens
}

fn diff_tokens<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<Op<'a>> {
    // lengths[i][j] = LCS length of old[i..] and new[j..]
    let mut lengths = vec![vec![0usize; new.len() + 1]; old.len() + 1];
    for i in (0..old.len()).rev() {
        for j in (0..new.len()).rev() {
            lengths[i][j] = if old[i] == new[j] {
                lengths[i + 1][j + 1] + 1
            } else {
                lengths[i + 1][j].max(lengths[i][j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    let mut ops = Vec::with_capacity(old.len() + new.len());
    while i < old.len() && j < new.len() {
        if old[i] == new[j] {
            ops.push(Op::Keep(old[i]));
            i += 1;
            j += 1;
        } else if lengths[i + 1][j] >= lengths[i][j + 1] {
            ops.push(Op::Remove(old[i]));
            i += 1;
        } else {
            ops.push(Op::Add(new[j]));
            j += 1;
        }
    }
    ops.extend(old[i..].iter().copied().map(Op::Remove));
    ops.extend(new[j..].iter().copied().map(Op::Add));
    ops
}

fn flush(out: &mut String, removed: &mut String, added: &mut String, format: TextFormat) {
    match format {
        TextFormat::Html => {
            if !removed.is_empty() {
                out.push_str(&format!(
                    "<del class=\"differ\">{}</del>",
                    escape(removed, format)
                ));
            }
            if !added.is_empty() {
                out.push_str(&format!(
                    "<ins class=\"differ\">{}</ins>",
                    escape(added, format)
                ));
            }
        }
        TextFormat::Ascii => match (removed.is_empty(), added.is_empty()) {
            (false, false) => out.push_str(&format!("{{\"{removed}\" >> \"{added}\"}}")),
            (false, true) => out.push_str(&format!("{{-\"{removed}\"}}")),
            (true, false) => out.push_str(&format!("{{+\"{added}\"}}")),
            (true, true) => {}
        },
    }
    removed.clear();
    added.clear();
}

fn escape(text: &str, format: TextFormat) -> String {
    match format {
        TextFormat::Html => text
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;"),
        TextFormat::Ascii => text.to_string(),
    }
}
