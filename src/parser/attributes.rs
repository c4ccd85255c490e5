use super::{Audio, Codec, Hdr, Resolution, Source};

/// Token equals `what` or carries it as a prefix with an attached group tag,
/// e.g. `x264-NTG`.
fn token_is(token: &str, what: &str) -> bool {
    token == what
        || token
            .strip_prefix(what)
            .is_some_and(|rest| rest.starts_with('-'))
}

pub fn resolution_from_token(token: &str) -> Option<Resolution> {
    if token_is(token, "2160p") || token_is(token, "4k") || token_is(token, "uhd") {
        Some(Resolution::R2160p)
    } else if token_is(token, "1080p") {
        Some(Resolution::R1080p)
    } else if token_is(token, "720p") {
        Some(Resolution::R720p)
    } else {
        None
    }
}

pub fn detect_resolution(tokens: &[String]) -> Resolution {
    tokens
        .iter()
        .find_map(|t| resolution_from_token(t))
        .unwrap_or_default()
}

pub fn source_from_token(token: &str) -> Option<Source> {
    const BLURAY: &[&str] = &["bluray", "blu-ray", "bdrip", "brrip"];
    const WEBDL: &[&str] = &["web-dl", "webdl"];
    const CAM: &[&str] = &["cam", "camrip", "hdcam"];
    const TELESYNC: &[&str] = &["ts", "telesync", "hdts"];
    if BLURAY.iter().any(|s| token_is(token, s)) {
        Some(Source::BluRay)
    } else if WEBDL.iter().any(|s| token_is(token, s)) {
        Some(Source::WebDl)
    } else if token_is(token, "webrip") {
        Some(Source::WebRip)
    } else if token_is(token, "hdtv") {
        Some(Source::Hdtv)
    } else if CAM.iter().any(|s| token_is(token, s)) {
        Some(Source::Cam)
    } else if TELESYNC.iter().any(|s| token_is(token, s)) {
        Some(Source::Telesync)
    } else {
        None
    }
}

pub fn detect_source(tokens: &[String]) -> Source {
    tokens
        .iter()
        .find_map(|t| source_from_token(t))
        .unwrap_or_default()
}

pub fn codec_from_token(token: &str) -> Option<Codec> {
    const X265: &[&str] = &["x265", "h265", "hevc"];
    const X264: &[&str] = &["x264", "h264", "avc"];
    if X265.iter().any(|c| token_is(token, c)) {
        Some(Codec::X265)
    } else if X264.iter().any(|c| token_is(token, c)) {
        Some(Codec::X264)
    } else {
        None
    }
}

pub fn detect_codec(tokens: &[String]) -> Codec {
    for (i, token) in tokens.iter().enumerate() {
        if let Some(codec) = codec_from_token(token) {
            return codec;
        }
        // Separator normalization splits `H.265` into two tokens.
        if token == "h" {
            if let Some(next) = tokens.get(i + 1) {
                if token_is(next, "265") {
                    return Codec::X265;
                }
                if token_is(next, "264") {
                    return Codec::X264;
                }
            }
        }
    }
    Codec::Unknown
}

pub fn hdr_from_token(token: &str) -> Option<Hdr> {
    const DOLBY_VISION: &[&str] = &["dolbyvision", "dolby-vision", "dovi", "dv"];
    const HDR10PLUS: &[&str] = &["hdr10+", "hdr10plus"];
    if DOLBY_VISION.iter().any(|s| token_is(token, s)) {
        Some(Hdr::DolbyVision)
    } else if HDR10PLUS.iter().any(|s| token_is(token, s)) {
        Some(Hdr::Hdr10Plus)
    } else if token_is(token, "hdr10") {
        Some(Hdr::Hdr10)
    } else if token_is(token, "hlg") {
        Some(Hdr::Hlg)
    } else if token_is(token, "hdr") {
        Some(Hdr::Generic)
    } else {
        None
    }
}

/// Specific formats win over the bare `hdr` tag regardless of token order.
pub fn detect_hdr(tokens: &[String]) -> Hdr {
    fn rank(hdr: Hdr) -> u8 {
        match hdr {
            Hdr::None => 0,
            Hdr::Generic => 1,
            Hdr::Hlg => 2,
            Hdr::Hdr10 => 3,
            Hdr::Hdr10Plus => 4,
            Hdr::DolbyVision => 5,
        }
    }
    let bigram = tokens
        .windows(2)
        .any(|w| w[0] == "dolby" && token_is(&w[1], "vision"));
    if bigram {
        return Hdr::DolbyVision;
    }
    let mut found = Hdr::None;
    for token in tokens {
        if let Some(hdr) = hdr_from_token(token) {
            if rank(hdr) > rank(found) {
                found = hdr;
            }
        }
    }
    found
}

pub fn audio_from_token(token: &str) -> Option<Audio> {
    const EAC3: &[&str] = &["ddp", "dd+", "eac3", "ddplus"];
    const AC3: &[&str] = &["dd", "ac3"];
    const DTSHD: &[&str] = &["dts-hd", "dtshd"];
    if token_is(token, "atmos") {
        Some(Audio::Atmos)
    } else if token_is(token, "truehd") {
        Some(Audio::TrueHd)
    } else if DTSHD.iter().any(|s| token_is(token, s)) {
        Some(Audio::DtsHd)
    } else if EAC3.iter().any(|s| token_is(token, s)) {
        Some(Audio::Eac3)
    } else if AC3.iter().any(|s| token_is(token, s)) {
        Some(Audio::Ac3)
    } else if token_is(token, "dts") {
        Some(Audio::Dts)
    } else if token_is(token, "aac") {
        Some(Audio::Aac)
    } else if token_is(token, "flac") {
        Some(Audio::Flac)
    } else if token_is(token, "opus") {
        Some(Audio::Opus)
    } else {
        None
    }
}

/// Strip an embedded channel count from tokens like `ddp5` or `aac2`.
fn split_channel_suffix(token: &str) -> (&str, Option<char>) {
    let mut chars = token.chars();
    match chars.next_back() {
        Some(last) if last.is_ascii_digit() && token.len() > 1 => (chars.as_str(), Some(last)),
        _ => (token, None),
    }
}

fn is_channel_tail(token: &str) -> bool {
    let mut chars = token.chars();
    matches!(chars.next(), Some('0' | '1')) && (chars.as_str().is_empty() || token[1..].starts_with('-'))
}

/// Detect the audio format, trying specific formats before generic ones so
/// that e.g. `TrueHD.Atmos` resolves to Atmos. Channel layouts like `5.1`
/// are consumed here and never leak into episode numbering.
pub fn detect_audio(tokens: &[String]) -> (Audio, String) {
    let priority = [
        Audio::Atmos,
        Audio::TrueHd,
        Audio::DtsHd,
        Audio::Eac3,
        Audio::Ac3,
        Audio::Dts,
        Audio::Aac,
        Audio::Flac,
        Audio::Opus,
    ];
    for wanted in priority {
        for (i, token) in tokens.iter().enumerate() {
            let (base, embedded) = split_channel_suffix(token);
            if audio_from_token(base) != Some(wanted) && audio_from_token(token) != Some(wanted) {
                continue;
            }
            let channels = match embedded {
                Some(front) => tokens
                    .get(i + 1)
                    .filter(|next| is_channel_tail(next))
                    .map(|next| format!("{front}.{}", &next[..1])),
                None => tokens.get(i + 1).zip(tokens.get(i + 2)).and_then(
                    |(front, tail)| {
                        let front_ok = front.len() == 1
                            && front.chars().next().is_some_and(|c| c.is_ascii_digit());
                        (front_ok && is_channel_tail(tail))
                            .then(|| format!("{front}.{}", &tail[..1]))
                    },
                ),
            };
            return (wanted, channels.unwrap_or_default());
        }
        // `DTS.HD.MA` splits into separate tokens
        if wanted == Audio::DtsHd {
            let bigram = tokens.windows(2).any(|w| w[0] == "dts" && w[1] == "hd");
            if bigram {
                return (Audio::DtsHd, String::new());
            }
        }
        if wanted == Audio::Ac3 {
            let bigram = tokens
                .windows(2)
                .any(|w| w[0] == "dolby" && token_is(&w[1], "digital"));
            if bigram {
                return (Audio::Ac3, String::new());
            }
        }
    }
    (Audio::Unknown, String::new())
}

pub fn detect_remux(tokens: &[String]) -> bool {
    tokens
        .iter()
        .any(|t| token_is(t, "remux") || token_is(t, "bdremux"))
}

const EDITIONS: &[(&str, &str)] = &[
    ("directors cut", "Directors Cut"),
    ("director's cut", "Directors Cut"),
    ("extended", "Extended"),
    ("imax", "IMAX"),
    ("theatrical", "Theatrical"),
    ("unrated", "Unrated"),
    ("remastered", "Remastered"),
    ("uncut", "Uncut"),
];

pub fn detect_edition(lower: &str) -> String {
    let padded = format!(" {lower} ");
    EDITIONS
        .iter()
        .find(|(token, _)| padded.contains(&format!(" {token} ")))
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_default()
}

/// Streaming service tags in fixed priority order so that a release carrying
/// two tags always resolves the same way.
const SERVICES: &[(&str, &str)] = &[
    ("nf", "Netflix"),
    ("amzn", "Amazon"),
    ("dsnp", "Disney+"),
    ("atvp", "Apple TV+"),
    ("hmax", "HBO Max"),
    ("pcok", "Peacock"),
    ("hulu", "Hulu"),
];

pub fn detect_service(tokens: &[String]) -> String {
    SERVICES
        .iter()
        .find(|(tag, _)| tokens.iter().any(|t| t == tag))
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<String> {
        s.split_whitespace().map(|t| t.to_lowercase()).collect()
    }

    #[test]
    fn resolution_priority() {
        assert_eq!(Resolution::R2160p, detect_resolution(&toks("show 2160p")));
        assert_eq!(Resolution::R2160p, detect_resolution(&toks("show 4k hdr")));
        assert_eq!(Resolution::R1080p, detect_resolution(&toks("show 1080p")));
        assert_eq!(Resolution::Unknown, detect_resolution(&toks("show 480p")));
    }

    #[test]
    fn source_variants() {
        assert_eq!(Source::BluRay, detect_source(&toks("movie bdrip x264")));
        assert_eq!(Source::WebDl, detect_source(&toks("movie web-dl")));
        assert_eq!(Source::Telesync, detect_source(&toks("movie hdts")));
        assert_eq!(Source::Cam, detect_source(&toks("movie camrip")));
    }

    #[test]
    fn codec_split_tokens() {
        assert_eq!(Codec::X264, detect_codec(&toks("movie h 264")));
        assert_eq!(Codec::X265, detect_codec(&toks("movie hevc")));
        assert_eq!(Codec::X265, detect_codec(&toks("movie h 265-grp")));
    }

    #[test]
    fn hdr_specific_beats_generic() {
        assert_eq!(Hdr::Hdr10Plus, detect_hdr(&toks("movie hdr hdr10+")));
        assert_eq!(Hdr::DolbyVision, detect_hdr(&toks("movie hdr10 dv")));
        assert_eq!(Hdr::DolbyVision, detect_hdr(&toks("movie dolby vision")));
        assert_eq!(Hdr::Generic, detect_hdr(&toks("movie hdr x265")));
        assert_eq!(Hdr::Hlg, detect_hdr(&toks("movie hlg")));
    }

    #[test]
    fn audio_with_channels() {
        assert_eq!(
            (Audio::Eac3, "5.1".to_string()),
            detect_audio(&toks("movie ddp5 1 h264"))
        );
        assert_eq!(
            (Audio::Atmos, "7.1".to_string()),
            detect_audio(&toks("movie truehd atmos 7 1-grp"))
        );
        assert_eq!(
            (Audio::Ac3, "5.1".to_string()),
            detect_audio(&toks("movie dd 5 1 x264"))
        );
        assert_eq!(
            (Audio::Aac, "2.0".to_string()),
            detect_audio(&toks("movie aac2 0"))
        );
        assert_eq!(
            (Audio::DtsHd, "".to_string()),
            detect_audio(&toks("movie dts-hd ma"))
        );
    }

    #[test]
    fn channel_suffix_is_not_audio() {
        // A bare `5.1` without a known format tag resolves to nothing.
        assert_eq!((Audio::Unknown, String::new()), detect_audio(&toks("movie 5 1")));
    }

    #[test]
    fn service_priority_is_stable() {
        assert_eq!("Netflix", detect_service(&toks("show nf hulu web-dl")));
        assert_eq!("Hulu", detect_service(&toks("show hulu web-dl")));
        assert_eq!("", detect_service(&toks("show web-dl")));
    }

    #[test]
    fn editions() {
        assert_eq!("Directors Cut", detect_edition("movie directors cut 1080p"));
        assert_eq!("IMAX", detect_edition("movie imax 1080p"));
        assert_eq!("", detect_edition("movie 1080p"));
    }
}
