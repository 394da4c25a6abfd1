use std::borrow::Cow;

fn is_stripped(c: char) -> bool {
    c.is_control() && c != '\t' && c != '\n' && c != '\r'
}

/// Drops control characters (other than tab, newline and carriage return) from
/// text that came from a remote document.
///
/// Returns `Cow::Borrowed` when nothing needs removing.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_stripped) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(s.chars().filter(|c| !is_stripped(*c)).collect())
}

/// Turns an untrusted title or anchor text into a single-line display name.
///
/// Control characters are removed, any run of whitespace becomes one space,
/// and the result is cut to at most `max_chars` characters.
pub fn clean_display_name(raw: &str, max_chars: usize) -> String {
    let stripped = strip_control_chars(raw);
    let mut out = String::with_capacity(stripped.len().min(max_chars * 4));
    let mut count = 0;

    for word in stripped.split_whitespace() {
        if count > 0 {
            if count >= max_chars {
                break;
            }
            out.push(' ');
            count += 1;
        }
        for c in word.chars() {
            if count >= max_chars {
                break;
            }
            out.push(c);
            count += 1;
        }
    }

    out.truncate(out.trim_end().len());
    out
}
