/// One passage of a source document, ready for embedding.
#[derive(Debug, Clone)]
pub struct Passage {
    pub text: String,
    pub index: usize,
}

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Split extracted text into overlapping passages of at most `max_chars`
/// bytes, preferring paragraph, line, sentence and word boundaries.
/// Empty or whitespace-only input yields no passages.
pub fn split_text(text: &str, max_chars: usize, overlap: usize) -> Vec<Passage> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    if text.len() <= max_chars {
        return vec![Passage {
            text: text.to_string(),
            index: 0,
        }];
    }

    let mut passages = Vec::new();
    let mut start = 0;
    let mut index = 0;

    while start < text.len() {
        let hard_end = next_boundary(text, (start + max_chars).min(text.len()));
        let end = if hard_end < text.len() {
            natural_break(text, start, hard_end)
        } else {
            hard_end
        };

        let passage = text[start..end].trim();
        if !passage.is_empty() {
            passages.push(Passage {
                text: passage.to_string(),
                index,
            });
            index += 1;
        }

        let overlapped = if end > overlap {
            prev_boundary(text, end - overlap)
        } else {
            end
        };
        // Overlap must never move the window backwards.
        start = if overlapped > start { overlapped } else { end };
    }

    passages
}

/// Round a byte position up to the nearest char boundary.
fn next_boundary(text: &str, mut pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    while pos < text.len() && !text.is_char_boundary(pos) {
        pos += 1;
    }
    pos
}

/// Round a byte position down to the nearest char boundary.
fn prev_boundary(text: &str, mut pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

/// Find the best break point within `[start, limit)`, falling back to
/// the hard limit when no boundary exists in the window.
fn natural_break(text: &str, start: usize, limit: usize) -> usize {
    let window = &text[start..limit];

    if let Some(pos) = window.rfind("\n\n") {
        return start + pos + 2;
    }
    if let Some(pos) = window.rfind('\n') {
        return start + pos + 1;
    }
    for sentinel in [". ", "? ", "! "] {
        if let Some(pos) = window.rfind(sentinel) {
            return start + pos + sentinel.len();
        }
    }
    if let Some(pos) = window.rfind(' ') {
        return start + pos + 1;
    }
    limit
}
