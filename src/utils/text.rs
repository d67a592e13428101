/// Splits a comma separated free-text field, trimming tokens and dropping empty ones.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '。' | '！' | '？' | '…')
}

/// Splits text into sentences. A sentence ends at a run of terminators
/// (optionally followed by closing quotes) that is followed by whitespace or
/// the end of the text, so "3.5" or "e.g." in the middle of a word stay intact.
pub fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        current.push(c);
        i += 1;

        if !is_terminator(c) {
            continue;
        }
        while i < chars.len() && (is_terminator(chars[i]) || matches!(chars[i], '"' | '\'' | '”' | '’' | '」')) {
            current.push(chars[i]);
            i += 1;
        }
        // CJK terminators end a sentence even without trailing whitespace.
        let cjk = matches!(c, '。' | '！' | '？');
        if cjk || i >= chars.len() || chars[i].is_whitespace() {
            push_trimmed(&mut sentences, &current);
            current.clear();
        }
    }
    push_trimmed(&mut sentences, &current);
    sentences
}

fn push_trimmed(out: &mut Vec<String>, s: &str) {
    let trimmed = s.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}
