//! Text helpers for Slack message bodies.

/// Strips the first `<@...>` mention token (closed on the same line) and
/// trims the remaining text.
pub fn remove_mention(text: &str) -> String {
    for (start, _) in text.match_indices("<@") {
        let rest = &text[start + 2..];
        let Some(end) = rest.find(|ch| matches!(ch, '>' | '\n' | '\r')) else {
            break;
        };
        if rest[end..].starts_with('>') {
            let mut cleaned = String::with_capacity(text.len());
            cleaned.push_str(&text[..start]);
            cleaned.push_str(&rest[end + 1..]);
            return cleaned.trim().to_string();
        }
    }

    text.trim().to_string()
}

/// Concatenates chunks in order with no separator.
pub fn to_text<S: AsRef<str>>(chunks: &[S]) -> String {
    chunks.iter().map(AsRef::as_ref).collect()
}

/// Splits after every newline, keeping the newline on the segment it ends.
/// `to_text(&separate_newlines(text)) == text` for every input.
pub fn separate_newlines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return vec![""];
    }
    text.split_inclusive('\n').collect()
}

/// Packs newline-delimited segments into chunks of at most `limit`
/// characters. A single line longer than `limit` is hard-split on char
/// boundaries.
pub fn chunk_for_limit(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut pending: Vec<&str> = Vec::new();
    let mut pending_len = 0;

    for segment in separate_newlines(text) {
        let segment_len = segment.chars().count();
        if pending_len + segment_len > limit && !pending.is_empty() {
            chunks.push(to_text(&pending));
            pending.clear();
            pending_len = 0;
        }

        if segment_len > limit {
            let chars: Vec<char> = segment.chars().collect();
            for piece in chars.chunks(limit) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        pending.push(segment);
        pending_len += segment_len;
    }

    if !pending.is_empty() {
        chunks.push(to_text(&pending));
    }

    chunks
}
