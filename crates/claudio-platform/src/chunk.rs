/// Split `text` into chunks no longer than `limit`, preferring to break on a
/// newline, then a space, only falling back to a hard cut when neither
/// exists within the window.
pub fn split_chunks(text: &str, limit: usize) -> Vec<String> {
    if text.len() <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.len() <= limit {
            chunks.push(remaining.to_string());
            break;
        }

        let window = &remaining[..limit];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .unwrap_or(limit);

        let (head, tail) = remaining.split_at(split_at.max(1));
        chunks.push(head.to_string());
        remaining = tail.trim_start_matches(['\n', ' ']);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_single_chunk() {
        assert_eq!(split_chunks("hello", 4096), vec!["hello".to_string()]);
    }

    #[test]
    fn splits_on_newline_boundary() {
        let text = format!("{}\n{}", "a".repeat(10), "b".repeat(10));
        let chunks = split_chunks(&text, 12);
        assert_eq!(chunks[0], "a".repeat(10));
        assert_eq!(chunks[1], "b".repeat(10));
    }

    #[test]
    fn falls_back_to_hard_cut_with_no_boundary() {
        let text = "a".repeat(20);
        let chunks = split_chunks(&text, 10);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 10);
    }

    #[test]
    fn every_chunk_respects_limit() {
        let text = "word ".repeat(2000);
        for chunk in split_chunks(&text, 4096) {
            assert!(chunk.len() <= 4096);
        }
    }
}
