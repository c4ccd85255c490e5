use crate::utils::VIDEO_EXTENSIONS;

/// Tokens that look like a group tag but never are one.
const GROUP_STOPLIST: &[&str] = &["dl", "ray", "hd", "rip"];

fn is_year_token(token: &str) -> Option<u16> {
    if token.len() != 4 || !token.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let year: u16 = token.parse().ok()?;
    (1900..2100).contains(&year).then_some(year)
}

/// Pick the release year out of the token list.
///
/// Years that are part of the title (`Blade Runner 2049`) are avoided by
/// preferring the last year that appears after a title terminator; without
/// one, the last year in the name wins. Tokens inside a detected daily date
/// never count.
pub fn detect_year(
    tokens: &[String],
    terminator: Option<usize>,
    date_span: Option<(usize, usize)>,
) -> (u16, Option<usize>) {
    let years: Vec<(usize, u16)> = tokens
        .iter()
        .enumerate()
        .filter(|(i, _)| !date_span.is_some_and(|(start, end)| (start..end).contains(i)))
        .filter_map(|(i, t)| is_year_token(t).map(|y| (i, y)))
        .collect();
    let after_terminator = terminator
        .and_then(|t| years.iter().rev().find(|(i, _)| *i > t))
        .copied();
    match after_terminator.or_else(|| years.last().copied()) {
        Some((i, y)) => (y, Some(i)),
        None => (0, None),
    }
}

/// The release group is the suffix after the final `-`, minus any file
/// extension. Suffixes containing separators are not group tags.
pub fn detect_group(name: &str) -> String {
    let Some(pos) = name.rfind('-') else {
        return String::new();
    };
    let mut suffix = &name[pos + 1..];
    for ext in VIDEO_EXTENSIONS {
        if let Some(stripped) = suffix
            .strip_suffix(ext)
            .and_then(|rest| rest.strip_suffix('.'))
        {
            suffix = stripped;
            break;
        }
    }
    let clean = suffix.trim_matches(|c| super::CLOSE_BRACKETS.contains(&c));
    let valid = !clean.is_empty()
        && clean.len() <= 20
        && !clean.contains([' ', '.', '_', '['])
        && !GROUP_STOPLIST.contains(&clean.to_lowercase().as_str());
    if valid {
        clean.to_string()
    } else {
        String::new()
    }
}
