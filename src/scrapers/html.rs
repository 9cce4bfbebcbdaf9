//! Tolerant HTML extraction for the bank's pages.
//!
//! The source serves small server-rendered fragments, so scanning for tag
//! blocks case-insensitively is enough. Selectors stay resilient to
//! whitespace, attribute order and markup noise; no full-document parsing.

/// Case-insensitive substring search, ASCII only. Returns a byte offset.
fn find_ci(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let haystack = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }

    let mut i = from;
    while i + needle.len() <= haystack.len() {
        if haystack[i..i + needle.len()].eq_ignore_ascii_case(needle) {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Drop everything between `<` and `>`.
fn strip_tags(fragment: &str) -> String {
    let mut text = String::with_capacity(fragment.len());
    let mut in_tag = false;
    for c in fragment.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => text.push(c),
            _ => {}
        }
    }
    text
}

/// Decode the handful of entities the source actually uses.
fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

fn clean(fragment: &str) -> String {
    decode_entities(&strip_tags(fragment)).trim().to_string()
}

/// Trimmed text of every `<td>` cell, in document order. Cells that are
/// empty after cleanup are kept so callers see the table shape.
pub fn td_texts(html: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut position = 0;

    while let Some(open) = find_ci(html, "<td", position) {
        let content_start = match find_ci(html, ">", open) {
            Some(end_of_tag) => end_of_tag + 1,
            None => break,
        };
        let content_end = match find_ci(html, "</td", content_start) {
            Some(close) => close,
            None => break,
        };

        cells.push(clean(&html[content_start..content_end]));
        position = content_end + 1;
    }

    cells
}

/// Inner text of the first `tag` element following `label` in the document.
pub fn tag_text_after(html: &str, label: &str, tag: &str) -> Option<String> {
    let after_label = find_ci(html, label, 0)? + label.len();
    let open = find_ci(html, &format!("<{}", tag), after_label)?;
    let content_start = find_ci(html, ">", open)? + 1;
    let content_end = find_ci(html, &format!("</{}", tag), content_start)?;

    let text = clean(&html[content_start..content_end]);
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Raw text directly after `label`, up to the next tag.
pub fn text_after_label(html: &str, label: &str) -> Option<String> {
    let after_label = find_ci(html, label, 0)? + label.len();
    let rest = &html[after_label..];
    let cut = rest.find('<').unwrap_or(rest.len());

    let text = decode_entities(rest[..cut].trim_start_matches(':').trim());
    let text = text.trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Every href attribute value in the document, in order, unresolved.
pub fn hrefs(html: &str) -> Vec<String> {
    let mut links = Vec::new();
    let mut position = 0;

    while let Some(attr) = find_ci(html, "href=", position) {
        let value_start = attr + "href=".len();
        let bytes = html.as_bytes();
        if value_start >= bytes.len() {
            break;
        }

        let quote = bytes[value_start];
        if quote == b'"' || quote == b'\'' {
            let rest = &html[value_start + 1..];
            match rest.find(quote as char) {
                Some(end) => {
                    links.push(rest[..end].to_string());
                    position = value_start + 1 + end;
                }
                None => break,
            }
        } else {
            // Unquoted attribute value, ends at whitespace or '>'.
            let rest = &html[value_start..];
            let end = rest
                .find(|c: char| c.is_ascii_whitespace() || c == '>')
                .unwrap_or(rest.len());
            links.push(rest[..end].to_string());
            position = value_start + end;
        }
    }

    links
}
