//! Splitting page text into chunks small enough for a translation provider.
//!
//! Free translation endpoints reject large payloads, and a failed request
//! should cost us as little text as possible. So we cut each page into
//! chunks of at most `max_chars` characters, preferring to cut at natural
//! boundaries near the end of each chunk.

/// Default maximum chunk size, in characters.
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 4500;

/// Is this a line break?
fn is_line_break(c: char) -> bool {
    c == '\n' || c == '\r'
}

/// Is this sentence-ending punctuation? Thai text mostly separates sentences
/// with spaces, but scanned books also use _paiyannoi_ and _angkhan_ marks.
fn is_sentence_end(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | 'ฯ' | '๚' | '๛')
}

/// Boundary classes, from most to least preferred.
const BOUNDARY_CLASSES: [fn(char) -> bool; 3] =
    [is_line_break, is_sentence_end, char::is_whitespace];

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Concatenating the chunks in order always yields `text` again. Empty input
/// yields no chunks at all. A `max_chars` of 0 is treated as 1.
pub fn split_chunks(text: &str, max_chars: usize) -> Vec<&str> {
    let max_chars = max_chars.max(1);
    let mut chunks = vec![];
    let mut rest = text;
    while !rest.is_empty() {
        // Find the byte offset of the first character that won't fit. If
        // there isn't one, everything that's left fits in one chunk.
        let Some((limit, _)) = rest.char_indices().nth(max_chars) else {
            chunks.push(rest);
            break;
        };
        let mut cut = find_cut(rest, limit, max_chars).unwrap_or(limit);
        // A hard cut must not separate "\r\n", unless the chunk would be empty.
        if splits_crlf(rest, cut) && cut > 1 {
            cut -= 1;
        }
        let (chunk, tail) = rest.split_at(cut);
        chunks.push(chunk);
        rest = tail;
    }
    chunks
}

/// Does cutting `text` at byte offset `idx` separate a "\r\n" pair?
fn splits_crlf(text: &str, idx: usize) -> bool {
    text[..idx].ends_with('\r') && text[idx..].starts_with('\n')
}

/// Find the best place to end a chunk in `text[..limit]`, which contains
/// exactly `max_chars` characters.
///
/// We only look back over the last quarter of the window, so that a single
/// early line break doesn't give us a tiny chunk. A "\r\n" pair counts as one
/// boundary. Returns the byte offset just past the boundary, or `None` if the
/// caller should hard-cut.
fn find_cut(text: &str, limit: usize, max_chars: usize) -> Option<usize> {
    let window = &text[..limit];
    let lookback = (max_chars / 4).max(1);
    let start = window
        .char_indices()
        .nth(max_chars - lookback)
        .map_or(0, |(idx, _)| idx);
    let region = &window[start..];
    BOUNDARY_CLASSES.into_iter().find_map(|is_boundary| {
        region
            .char_indices()
            .rev()
            .map(|(idx, c)| (start + idx + c.len_utf8(), c))
            .find(|&(cut, c)| is_boundary(c) && !splits_crlf(text, cut))
            .map(|(cut, _)| cut)
    })
}
