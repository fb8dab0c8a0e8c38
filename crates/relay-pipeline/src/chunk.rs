/// Splits `text` into chunks of at most `limit` codepoints, preferring a
/// split on a newline or space boundary over cutting a word in half.
/// `OutgoingEventProcessor::send_message` is the sole caller — §4.6 assigns
/// this responsibility to the processor, not individual `PlatformClient`
/// implementations, so every platform gets it for free.
pub fn split_chunks(text: &str, limit: usize) -> Vec<String> {
    if limit == 0 || text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;

    while chars.len() - start > limit {
        let window = &chars[start..start + limit];
        let split_at = window
            .iter()
            .rposition(|&c| c == '\n')
            .or_else(|| window.iter().rposition(|&c| c == ' '))
            .map(|i| i + 1)
            .unwrap_or(limit);

        let chunk: String = chars[start..start + split_at].iter().collect();
        chunks.push(chunk.trim_end().to_string());

        start += split_at;
        while start < chars.len() && chars[start] == ' ' {
            start += 1;
        }
    }

    if start < chars.len() {
        chunks.push(chars[start..].iter().collect());
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_single_chunk() {
        let chunks = split_chunks("hello, world!", 1999);
        assert_eq!(chunks, vec!["hello, world!".to_string()]);
    }

    #[test]
    fn long_text_splits_on_word_boundary() {
        let text = format!("{} {}", "a".repeat(1500), "b".repeat(1500));
        let chunks = split_chunks(&text, 1999);
        assert_eq!(chunks.len(), 2);
        for c in &chunks {
            assert!(c.chars().count() <= 1999);
        }
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn very_long_word_still_splits_and_reproduces_text() {
        let text = "x".repeat(4000);
        let chunks = split_chunks(&text, 1999);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 1999));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn chunk_count_matches_p7_formula() {
        let text = "w ".repeat(1500);
        let limit = 1999;
        let chunks = split_chunks(&text, limit);
        let expected = (text.chars().count() as f64 / limit as f64).ceil() as usize;
        assert_eq!(chunks.len(), expected);
    }
}
