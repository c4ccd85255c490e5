/// Episode numbering extracted from a release name.
#[derive(Debug, Default, PartialEq)]
pub struct Numbering {
    pub season: u16,
    pub episode: u16,
    pub episodes: Vec<u16>,
    pub daily_date: Option<String>,
    pub is_complete_season: bool,
    pub is_split_season: bool,
    pub split_part: u16,
    /// First token that belongs to the numbering, terminates the title
    pub token_index: Option<usize>,
    /// Number of tokens the numbering spans
    token_len: usize,
}

impl Numbering {
    pub fn token_span(&self) -> Option<(usize, usize)> {
        self.token_index.map(|start| (start, start + self.token_len))
    }

    fn at(mut self, index: usize, len: usize) -> Self {
        self.token_index = Some(index);
        self.token_len = len;
        self
    }
}

/// Expand an inclusive episode range; a backwards range collapses to the
/// start episode alone.
fn expand_range(start: u16, end: u16) -> Vec<u16> {
    if end < start {
        vec![start]
    } else {
        (start..=end).collect()
    }
}

fn leading_digits(s: &str, max: usize) -> Option<(u16, &str)> {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() || digits.len() > max {
        return None;
    }
    let value = digits.parse().ok()?;
    Some((value, &s[digits.len()..]))
}

/// `S01E05` and its multi-episode extensions inside a single token:
/// `S01E05-E07`, `S01E05-07`, `S01E01E02E03`.
fn visit_sxx_exx(token: &str) -> Option<(u16, Vec<u16>)> {
    let rest = token.strip_prefix('s')?;
    let (season, rest) = leading_digits(rest, 4)?;
    let mut rest = rest.strip_prefix('e')?;
    let (first, tail) = leading_digits(rest, 3)?;
    let mut episodes = vec![first];
    rest = tail;
    loop {
        if rest.is_empty() {
            break;
        }
        if let Some(tail) = rest.strip_prefix('-') {
            let tail = tail.strip_prefix('e').unwrap_or(tail);
            let Some((end, tail)) = leading_digits(tail, 3) else {
                break;
            };
            let start = *episodes.last().unwrap();
            episodes = expand_range(episodes[0], end);
            if end < start {
                episodes = vec![episodes[0]];
            }
            rest = tail;
            continue;
        }
        if let Some(tail) = rest.strip_prefix('e') {
            let Some((next, tail)) = leading_digits(tail, 3) else {
                break;
            };
            episodes.push(next);
            rest = tail;
            continue;
        }
        // Anything else glued to the token (e.g. a group tag) ends the list.
        break;
    }
    Some((season, episodes))
}

/// `1x02` style numbering.
fn visit_nxe(token: &str) -> Option<(u16, u16)> {
    let (season, rest) = leading_digits(token, 4)?;
    let rest = rest.strip_prefix('x')?;
    let (episode, rest) = leading_digits(rest, 3)?;
    rest.is_empty().then_some((season, episode))
}

/// Bare `S01` token.
fn visit_season(token: &str) -> Option<u16> {
    let rest = token.strip_prefix('s')?;
    let (season, rest) = leading_digits(rest, 4)?;
    rest.is_empty().then_some(season)
}

fn all_digits(token: &str, max: usize) -> Option<u16> {
    if token.is_empty() || token.len() > max || !token.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

const MONTHS: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

fn month_from_name(token: &str) -> Option<u8> {
    MONTHS
        .iter()
        .position(|m| token.eq_ignore_ascii_case(m))
        .map(|i| i as u8 + 1)
}

fn valid_date(year: u16, month: u8, day: u8) -> bool {
    (1900..2100).contains(&year) && (1..=12).contains(&month) && (1..=31).contains(&day)
}

fn format_date(year: u16, month: u8, day: u8) -> String {
    format!("{year:04}-{month:02}-{day:02}")
}

fn is_year(value: u16) -> bool {
    (1900..2100).contains(&value)
}

/// Daily-show broadcast dates: `YYYY.MM.DD`, `YYYY-MM-DD`, `YYYYMMDD`,
/// `DD.MM.YYYY`, `DD Mon YYYY`, `Mon DD YYYY`. Invalid dates fall through.
fn visit_daily_date(tokens: &[String]) -> Option<(String, usize, usize)> {
    for (i, token) in tokens.iter().enumerate() {
        // YYYY-MM-DD survives as a single token
        let dashed: Vec<&str> = token.split('-').collect();
        if dashed.len() == 3 {
            if let (Some(y), Some(m), Some(d)) = (
                all_digits(dashed[0], 4),
                all_digits(dashed[1], 2),
                all_digits(dashed[2], 2),
            ) {
                if dashed[0].len() == 4 && valid_date(y, m as u8, d as u8) && is_year(y) {
                    return Some((format_date(y, m as u8, d as u8), i, 1));
                }
            }
        }
        // YYYYMMDD
        if token.len() == 8 && token.chars().all(|c| c.is_ascii_digit()) {
            let y: u16 = token[..4].parse().ok()?;
            let m: u8 = token[4..6].parse().ok()?;
            let d: u8 = token[6..8].parse().ok()?;
            if is_year(y) && valid_date(y, m, d) {
                return Some((format_date(y, m, d), i, 1));
            }
        }
        let Some(second) = tokens.get(i + 1) else {
            continue;
        };
        let Some(third) = tokens.get(i + 2) else {
            continue;
        };
        // YYYY.MM.DD
        if token.len() == 4 {
            if let (Some(y), Some(m), Some(d)) = (
                all_digits(token, 4),
                all_digits(second, 2),
                all_digits(third, 2),
            ) {
                if is_year(y) && valid_date(y, m as u8, d as u8) {
                    return Some((format_date(y, m as u8, d as u8), i, 3));
                }
            }
        }
        // DD.MM.YYYY
        if third.len() == 4 && token.len() <= 2 {
            if let (Some(d), Some(m), Some(y)) = (
                all_digits(token, 2),
                all_digits(second, 2),
                all_digits(third, 4),
            ) {
                if is_year(y) && valid_date(y, m as u8, d as u8) {
                    return Some((format_date(y, m as u8, d as u8), i, 3));
                }
            }
        }
        // DD Mon YYYY
        if let (Some(d), Some(m), Some(y)) = (
            all_digits(token, 2),
            month_from_name(second),
            all_digits(third, 4),
        ) {
            if is_year(y) && valid_date(y, m, d as u8) {
                return Some((format_date(y, m, d as u8), i, 3));
            }
        }
        // Mon DD YYYY
        if let (Some(m), Some(d), Some(y)) = (
            month_from_name(token),
            all_digits(second, 2),
            all_digits(third, 4),
        ) {
            if is_year(y) && valid_date(y, m, d as u8) {
                return Some((format_date(y, m, d as u8), i, 3));
            }
        }
    }
    None
}

/// Detect episode numbering over lowercased tokens. Patterns are tried in a
/// fixed order and the first hit wins.
pub fn detect(tokens: &[String]) -> Numbering {
    // S01E05 family
    for (i, token) in tokens.iter().enumerate() {
        if let Some((season, episodes)) = visit_sxx_exx(token) {
            return Numbering {
                season,
                episode: episodes[0],
                episodes,
                ..Default::default()
            }
            .at(i, 1);
        }
        // `S01.E05` splits across two tokens
        if let Some(season) = visit_season(token) {
            if let Some(next) = tokens.get(i + 1) {
                if let Some(rest) = next.strip_prefix('e') {
                    if let Some((episode, tail)) = leading_digits(rest, 3) {
                        if tail.is_empty() {
                            return Numbering {
                                season,
                                episode,
                                episodes: vec![episode],
                                ..Default::default()
                            }
                            .at(i, 2);
                        }
                    }
                }
            }
        }
    }
    // 1x02 and s01.<ee>
    for (i, token) in tokens.iter().enumerate() {
        if let Some((season, episode)) = visit_nxe(token) {
            return Numbering {
                season,
                episode,
                episodes: vec![episode],
                ..Default::default()
            }
            .at(i, 1);
        }
        if let Some(season) = visit_season(token) {
            if let Some(episode) = tokens.get(i + 1).and_then(|next| all_digits(next, 2)) {
                return Numbering {
                    season,
                    episode,
                    episodes: vec![episode],
                    ..Default::default()
                }
                .at(i, 2);
            }
        }
    }
    // Season packs and split seasons
    for (i, token) in tokens.iter().enumerate() {
        let season_word = token == "season" || (token == "complete" && tokens.get(i + 1).is_some_and(|t| t == "season"));
        if season_word {
            let number_idx = if token == "complete" { i + 2 } else { i + 1 };
            if let Some(season) = tokens.get(number_idx).and_then(|t| all_digits(t, 4)) {
                let marker = tokens.get(number_idx + 1);
                if marker.is_some_and(|t| t == "part" || t == "vol") {
                    if let Some(part) =
                        tokens.get(number_idx + 2).and_then(|t| all_digits(t, 2))
                    {
                        return Numbering {
                            season,
                            is_split_season: true,
                            split_part: part,
                            ..Default::default()
                        }
                        .at(i, number_idx + 3 - i);
                    }
                }
                return Numbering {
                    season,
                    is_complete_season: true,
                    ..Default::default()
                }
                .at(i, number_idx + 1 - i);
            }
        }
        if let Some(season) = visit_season(token) {
            return Numbering {
                season,
                is_complete_season: true,
                ..Default::default()
            }
            .at(i, 1);
        }
    }
    // Daily shows
    if let Some((date, index, len)) = visit_daily_date(tokens) {
        let mut numbering = Numbering {
            daily_date: Some(date),
            ..Default::default()
        };
        numbering = numbering.at(index, len);
        return numbering;
    }
    Numbering::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<String> {
        s.split_whitespace().map(|t| t.to_lowercase()).collect()
    }

    #[test]
    fn single_episode() {
        let n = detect(&toks("show s01e05 720p"));
        assert_eq!((1, 5), (n.season, n.episode));
        assert_eq!(vec![5], n.episodes);
        assert_eq!(Some(1), n.token_index);
    }

    #[test]
    fn episode_ranges() {
        assert_eq!(vec![5, 6, 7], detect(&toks("show s01e05-e07")).episodes);
        assert_eq!(vec![5, 6, 7], detect(&toks("show s01e05-07")).episodes);
        assert_eq!(vec![5], detect(&toks("show s01e05-e02")).episodes);
    }

    #[test]
    fn explicit_sequence() {
        let n = detect(&toks("elementary s01e23e24e26"));
        assert_eq!(vec![23, 24, 26], n.episodes);
        assert_eq!(23, n.episode);
    }

    #[test]
    fn x_format() {
        let n = detect(&toks("the walking dead 4x01 hdtv"));
        assert_eq!((4, 1), (n.season, n.episode));
    }

    #[test]
    fn split_season_token() {
        let n = detect(&toks("show s01 e02 720p"));
        assert_eq!((1, 2), (n.season, n.episode));
        let n = detect(&toks("show s01 05 720p"));
        assert_eq!((1, 5), (n.season, n.episode));
    }

    #[test]
    fn season_pack_forms() {
        for name in ["show s02 1080p", "show season 2 1080p", "show complete season 2"] {
            let n = detect(&toks(name));
            assert_eq!(2, n.season, "{name}");
            assert!(n.is_complete_season, "{name}");
        }
    }

    #[test]
    fn split_season() {
        let n = detect(&toks("show season 4 part 2 1080p"));
        assert_eq!(4, n.season);
        assert!(n.is_split_season);
        assert_eq!(2, n.split_part);
        assert!(!n.is_complete_season);
    }

    #[test]
    fn daily_dates() {
        let cases = [
            ("show 2024 01 15 1080p", "2024-01-15"),
            ("show 2024-01-15 1080p", "2024-01-15"),
            ("show 20240115 1080p", "2024-01-15"),
            ("show 15 01 2024 1080p", "2024-01-15"),
            ("show 15 jan 2024 1080p", "2024-01-15"),
            ("show Jan 15 2024 1080p", "2024-01-15"),
        ];
        for (name, expected) in cases {
            let n = detect(&toks(name));
            assert_eq!(Some(expected.to_string()), n.daily_date, "{name}");
        }
    }

    #[test]
    fn invalid_dates_fall_through() {
        assert_eq!(None, detect(&toks("show 2024 13 05 1080p")).daily_date);
        assert_eq!(None, detect(&toks("show 2024 00 00 1080p")).daily_date);
    }

    #[test]
    fn year_is_not_a_season() {
        // A lone year must not be read as numbering.
        let n = detect(&toks("movie 2024 1080p"));
        assert_eq!(0, n.season);
        assert!(!n.is_complete_season);
        assert_eq!(None, n.daily_date);
    }
}
