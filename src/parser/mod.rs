use serde::{Deserialize, Serialize};

pub mod attributes;
pub mod episode;
pub mod title;

pub const SEPARATORS: &[char] = &['.', '_'];
pub const OPEN_BRACKETS: &[char] = &['(', '[', '{'];
pub const CLOSE_BRACKETS: &[char] = &[')', ']', '}'];

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    #[default]
    Unknown,
    #[serde(rename = "720p")]
    R720p,
    #[serde(rename = "1080p")]
    R1080p,
    #[serde(rename = "2160p")]
    R2160p,
}

impl Resolution {
    pub fn as_token(&self) -> &'static str {
        match self {
            Resolution::Unknown => "unknown",
            Resolution::R720p => "720p",
            Resolution::R1080p => "1080p",
            Resolution::R2160p => "2160p",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    #[default]
    Unknown,
    BluRay,
    WebDl,
    WebRip,
    Hdtv,
    Cam,
    Telesync,
}

impl Source {
    pub fn as_token(&self) -> &'static str {
        match self {
            Source::Unknown => "unknown",
            Source::BluRay => "bluray",
            Source::WebDl => "webdl",
            Source::WebRip => "webrip",
            Source::Hdtv => "hdtv",
            Source::Cam => "cam",
            Source::Telesync => "telesync",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Unknown,
    X264,
    X265,
}

impl Codec {
    pub fn as_token(&self) -> &'static str {
        match self {
            Codec::Unknown => "unknown",
            Codec::X264 => "x264",
            Codec::X265 => "x265",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Hdr {
    #[default]
    None,
    Generic,
    Hdr10,
    Hdr10Plus,
    DolbyVision,
    Hlg,
}

impl Hdr {
    pub fn as_token(&self) -> &'static str {
        match self {
            Hdr::None => "none",
            Hdr::Generic => "hdr",
            Hdr::Hdr10 => "hdr10",
            Hdr::Hdr10Plus => "hdr10plus",
            Hdr::DolbyVision => "dolbyvision",
            Hdr::Hlg => "hlg",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Audio {
    #[default]
    Unknown,
    Aac,
    Ac3,
    Eac3,
    Dts,
    DtsHd,
    TrueHd,
    Atmos,
    Flac,
    Opus,
}

impl Audio {
    pub fn as_token(&self) -> &'static str {
        match self {
            Audio::Unknown => "unknown",
            Audio::Aac => "aac",
            Audio::Ac3 => "ac3",
            Audio::Eac3 => "eac3",
            Audio::Dts => "dts",
            Audio::DtsHd => "dtshd",
            Audio::TrueHd => "truehd",
            Audio::Atmos => "atmos",
            Audio::Flac => "flac",
            Audio::Opus => "opus",
        }
    }
}

/// Everything we can tell about a release from its name alone.
///
/// Unparseable fields keep their zero/unknown value, the parser itself never
/// fails.
#[derive(Debug, Clone, PartialEq, Default, Serialize, utoipa::ToSchema)]
pub struct ReleaseInfo {
    pub title: String,
    /// 0 when the name carries no release year
    pub year: u16,
    /// 0 when not episodic
    pub season: u16,
    /// Primary episode of a multi-episode release, 0 when none
    pub episode: u16,
    pub episodes: Vec<u16>,
    /// `YYYY-MM-DD` broadcast date of a daily show
    pub daily_date: Option<String>,
    pub resolution: Resolution,
    pub source: Source,
    pub codec: Codec,
    pub hdr: Hdr,
    pub audio: Audio,
    /// Channel layout like "5.1" when the name carries one
    pub audio_channels: String,
    pub is_remux: bool,
    pub edition: String,
    pub service: String,
    pub group: String,
    pub proper: bool,
    pub repack: bool,
    pub is_complete_season: bool,
    pub is_split_season: bool,
    pub split_part: u16,
    pub clean_title: String,
}

/// Parse a free-form release name into its attributes.
///
/// Pure and deterministic: same input, same output, no I/O.
pub fn parse(name: &str) -> ReleaseInfo {
    let normalized: String = name
        .chars()
        .map(|c| if SEPARATORS.contains(&c) { ' ' } else { c })
        .collect();
    let orig_tokens: Vec<&str> = normalized
        .split_whitespace()
        .map(|t| t.trim_matches(|c| OPEN_BRACKETS.contains(&c) || CLOSE_BRACKETS.contains(&c)))
        .filter(|t| !t.is_empty())
        .collect();
    let tokens: Vec<String> = orig_tokens.iter().map(|t| t.to_lowercase()).collect();
    let lower = normalized.to_lowercase();

    let resolution = attributes::detect_resolution(&tokens);
    let source = attributes::detect_source(&tokens);
    let codec = attributes::detect_codec(&tokens);
    let hdr = attributes::detect_hdr(&tokens);
    let (audio, audio_channels) = attributes::detect_audio(&tokens);
    let is_remux = attributes::detect_remux(&tokens);
    let edition = attributes::detect_edition(&lower);
    let service = attributes::detect_service(&tokens);
    let proper = tokens.iter().any(|t| t == "proper");
    let repack = tokens.iter().any(|t| t == "repack" || t == "rerip");

    let numbering = episode::detect(&tokens);

    let terminator = title_terminator_index(&tokens, numbering.token_index);
    let (year, year_index) = title::detect_year(&tokens, terminator, numbering.token_span());
    let title_end = title_end_index(tokens.len(), terminator, year_index);
    let title = orig_tokens[..title_end].join(" ").trim().to_string();
    let group = title::detect_group(name);
    let clean_title = clean_title(&title);

    ReleaseInfo {
        title,
        year,
        season: numbering.season,
        episode: numbering.episode,
        episodes: numbering.episodes,
        daily_date: numbering.daily_date,
        resolution,
        source,
        codec,
        hdr,
        audio,
        audio_channels,
        is_remux,
        edition,
        service,
        group,
        proper,
        repack,
        is_complete_season: numbering.is_complete_season,
        is_split_season: numbering.is_split_season,
        split_part: numbering.split_part,
        clean_title,
    }
}

/// Index of the first token that can not be part of a title anymore.
fn title_terminator_index(tokens: &[String], numbering_index: Option<usize>) -> Option<usize> {
    let attribute_idx = tokens.iter().position(|t| {
        attributes::resolution_from_token(t).is_some() || attributes::source_from_token(t).is_some()
    });
    match (attribute_idx, numbering_index) {
        (Some(a), Some(n)) => Some(a.min(n)),
        (Some(a), None) => Some(a),
        (None, Some(n)) => Some(n),
        (None, None) => None,
    }
}

fn title_end_index(len: usize, terminator: Option<usize>, year_index: Option<usize>) -> usize {
    let end = terminator.unwrap_or(len);
    match year_index {
        Some(y) if y < end => y,
        _ => end,
    }
}

/// Normalize a title for matching: lowercase, accents folded, `&` spelled
/// out, separators collapsed and leading articles dropped from every
/// colon-separated part. Applying it twice changes nothing.
pub fn clean_title(title: &str) -> String {
    let folded: String = title
        .to_lowercase()
        .chars()
        .filter_map(fold_accent)
        .collect();
    let spelled = folded.replace('&', " and ");
    let parts: Vec<String> = spelled
        .split(':')
        .map(|part| {
            let mut words: Vec<&str> = part
                .split(|c: char| c.is_whitespace() || SEPARATORS.contains(&c))
                .filter(|w| !w.is_empty())
                .collect();
            while let Some(first) = words.first() {
                if matches!(*first, "the" | "a" | "an") && words.len() > 1 {
                    words.remove(0);
                } else {
                    break;
                }
            }
            words.join(" ")
        })
        .filter(|p| !p.is_empty())
        .collect();
    parts.join(" ")
}

fn fold_accent(c: char) -> Option<char> {
    let folded = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'ç' => 'c',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ñ' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        'ß' => 's',
        '\'' => return None,
        ':' | '&' => c,
        c if c.is_alphanumeric() || c.is_whitespace() => c,
        _ => ' ',
    };
    Some(folded)
}
