//! Tag stripping for token-efficient consumption of context documents.

/// Return only the text nodes of an HTML document, in document order.
///
/// Tags are dropped wholesale; the five entities the escaper produces are
/// decoded back. This is not a general HTML parser; it exists so the
/// model reads text instead of markup, and its input is the assembler's
/// own output.
pub fn strip_tags(html: &str) -> String {
    let mut text = String::with_capacity(html.len() / 2);
    let mut chars = html.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '<' => {
                // Skip through the end of the tag, tolerating '>' inside
                // quoted attribute values.
                let mut quote: Option<char> = None;
                for tag_ch in chars.by_ref() {
                    match (quote, tag_ch) {
                        (Some(q), c) if c == q => quote = None,
                        (Some(_), _) => {}
                        (None, '"' | '\'') => quote = Some(tag_ch),
                        (None, '>') => break,
                        (None, _) => {}
                    }
                }
            }
            '&' => {
                let mut entity = String::new();
                while let Some(&next) = chars.peek() {
                    if next == ';' {
                        chars.next();
                        break;
                    }
                    if entity.len() > 6 || next == '&' || next == '<' {
                        break;
                    }
                    entity.push(next);
                    chars.next();
                }
                match entity.as_str() {
                    "amp" => text.push('&'),
                    "lt" => text.push('<'),
                    "gt" => text.push('>'),
                    "quot" => text.push('"'),
                    "#x27" | "#39" | "apos" => text.push('\''),
                    other => {
                        // Unknown entity: keep it readable rather than lossy.
                        text.push('&');
                        text.push_str(other);
                    }
                }
            }
            _ => text.push(ch),
        }
    }
    text
}
