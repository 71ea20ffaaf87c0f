//! Greedy word wrapping into logical lines.

/// Wraps `text` into lines of at most `max_len` characters.
///
/// Explicit newlines always break; a blank paragraph becomes one empty line.
/// Words are packed greedily, and a word longer than `max_len` is hard-split
/// into `max_len`-sized chunks. Lengths count `char`s, the same unit used for
/// character offsets.
pub fn wrap_lines(text: &str, max_len: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let max_len = max_len.max(1);

    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        if paragraph.trim().is_empty() {
            lines.push(String::new());
            continue;
        }
        wrap_paragraph(paragraph, max_len, &mut lines);
    }
    lines
}

fn wrap_paragraph(paragraph: &str, max_len: usize, lines: &mut Vec<String>) {
    let mut current = String::new();
    let mut current_len = 0usize;

    // Splitting on single spaces keeps runs of spaces inside a line.
    for word in paragraph.split(' ') {
        let word_len = word.chars().count();

        if word_len > max_len {
            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            hard_split(word, max_len, lines);
            continue;
        }

        if current_len > 0 && current_len + 1 + word_len > max_len {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }

    if current_len > 0 {
        lines.push(current);
    }
}

fn hard_split(word: &str, max_len: usize, lines: &mut Vec<String>) {
    let mut chunk = String::new();
    let mut chunk_len = 0usize;
    for ch in word.chars() {
        if chunk_len == max_len {
            lines.push(std::mem::take(&mut chunk));
            chunk_len = 0;
        }
        chunk.push(ch);
        chunk_len += 1;
    }
    if chunk_len > 0 {
        lines.push(chunk);
    }
}
