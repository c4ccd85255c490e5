use serde::{Deserialize, Serialize};

use crate::parser::attributes::{
    audio_from_token, codec_from_token, hdr_from_token, resolution_from_token, source_from_token,
};
use crate::parser::{ReleaseInfo, Resolution};

/// Named quality preference set used to rank candidate releases.
///
/// Every list is ordered strongest-preference-first; an empty list means
/// "anything goes". Tokens are matched semantically, so `dv`,
/// `dolby-vision` and `dolbyvision` all name the same HDR format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(default)]
pub struct QualityProfile {
    pub name: String,
    pub resolution: Vec<String>,
    pub sources: Vec<String>,
    pub codecs: Vec<String>,
    pub hdr: Vec<String>,
    pub audio: Vec<String>,
    pub prefer_remux: bool,
    pub reject: Vec<String>,
}

const SOURCE_BONUS: f64 = 10.0;
const CODEC_BONUS: f64 = 10.0;
const HDR_BONUS: f64 = 15.0;
const AUDIO_BONUS: f64 = 15.0;
const REMUX_BONUS: i64 = 20;

/// Preference bonus decays with list position and dies at index 5.
fn positional(bonus: f64, position: usize) -> i64 {
    (bonus * (1.0 - 0.2 * position as f64)).max(0.0) as i64
}

fn rejected(info: &ReleaseInfo, token: &str) -> bool {
    let token = token.to_lowercase();
    if token == "remux" {
        return info.is_remux;
    }
    resolution_from_token(&token).is_some_and(|r| r == info.resolution)
        || source_from_token(&token).is_some_and(|s| s == info.source)
        || codec_from_token(&token).is_some_and(|c| c == info.codec)
        || hdr_from_token(&token).is_some_and(|h| h == info.hdr)
        || audio_from_token(&token).is_some_and(|a| a == info.audio)
}

/// Score a parsed release against a profile. Pure; 0 means "never grab".
pub fn score(info: &ReleaseInfo, profile: &QualityProfile) -> i64 {
    if profile.reject.iter().any(|token| rejected(info, token)) {
        return 0;
    }

    if !profile.resolution.is_empty() {
        let allowed = profile
            .resolution
            .iter()
            .any(|t| resolution_from_token(&t.to_lowercase()) == Some(info.resolution));
        if !allowed {
            return 0;
        }
    }

    let mut total = match info.resolution {
        Resolution::R2160p => 100,
        Resolution::R1080p => 80,
        Resolution::R720p => 60,
        Resolution::Unknown => 40,
    };

    if let Some(pos) = profile
        .sources
        .iter()
        .position(|t| source_from_token(&t.to_lowercase()) == Some(info.source))
    {
        total += positional(SOURCE_BONUS, pos);
    }
    if let Some(pos) = profile
        .codecs
        .iter()
        .position(|t| codec_from_token(&t.to_lowercase()) == Some(info.codec))
    {
        total += positional(CODEC_BONUS, pos);
    }
    if let Some(pos) = profile
        .hdr
        .iter()
        .position(|t| hdr_from_token(&t.to_lowercase()) == Some(info.hdr))
    {
        total += positional(HDR_BONUS, pos);
    }
    if let Some(pos) = profile
        .audio
        .iter()
        .position(|t| audio_from_token(&t.to_lowercase()) == Some(info.audio))
    {
        total += positional(AUDIO_BONUS, pos);
    }

    if profile.prefer_remux && info.is_remux {
        total += REMUX_BONUS;
    }

    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn uhd_profile() -> QualityProfile {
        QualityProfile {
            name: "uhd".into(),
            resolution: vec!["2160p".into(), "1080p".into()],
            sources: vec!["bluray".into(), "web-dl".into()],
            codecs: vec!["x265".into(), "x264".into()],
            hdr: vec!["dolby-vision".into(), "hdr10".into()],
            audio: vec!["truehd".into(), "ddp".into()],
            prefer_remux: true,
            reject: vec!["cam".into(), "ts".into()],
        }
    }

    #[test]
    fn rejected_tokens_zero_the_score() {
        let profile = uhd_profile();
        let cam = parse("Movie.2024.2160p.CAM.x265-GRP");
        assert_eq!(0, score(&cam, &profile));

        let mut reject_remux = profile.clone();
        reject_remux.reject = vec!["remux".into()];
        let remux = parse("Movie.2024.2160p.BluRay.REMUX.x265-GRP");
        assert_eq!(0, score(&remux, &reject_remux));
    }

    #[test]
    fn disallowed_resolution_is_zero() {
        let profile = uhd_profile();
        let sd = parse("Movie.2024.720p.WEB-DL.x264-GRP");
        assert_eq!(0, score(&sd, &profile));
    }

    #[test]
    fn full_stack_release_scores_high() {
        let profile = uhd_profile();
        let info = parse("Movie.2024.2160p.BluRay.REMUX.DV.TrueHD.x265-GRP");
        // 100 + source 10 + codec 10 + hdr 15 + audio 15 + remux 20
        assert_eq!(170, score(&info, &profile));
    }

    #[test]
    fn preference_position_decays() {
        let profile = uhd_profile();
        let first = parse("Movie.2024.1080p.BluRay.x265-GRP");
        let second = parse("Movie.2024.1080p.WEB-DL.x265-GRP");
        // Same resolution and codec; source preference differs by one slot.
        assert_eq!(score(&first, &profile) - 2, score(&second, &profile));
    }

    #[test]
    fn semantic_token_matching() {
        let mut profile = uhd_profile();
        profile.hdr = vec!["dv".into()];
        profile.audio = vec!["eac3".into()];
        let info = parse("Movie.2024.2160p.WEB-DL.DDP5.1.DolbyVision.x265-GRP");
        // dv == dolbyvision, eac3 == ddp
        assert_eq!(100 + 8 + 10 + 15 + 15, score(&info, &profile));
    }

    #[test]
    fn identical_attributes_same_score() {
        let profile = uhd_profile();
        let a = parse("Movie.One.2024.2160p.BluRay.x265-AAA");
        let b = parse("Movie.Two.2024.2160p.BluRay.x265-BBB");
        assert_eq!(score(&a, &profile), score(&b, &profile));
    }

    #[test]
    fn unknown_attributes_add_nothing() {
        let profile = uhd_profile();
        let info = parse("Movie.2024.2160p-GRP");
        assert_eq!(100, score(&info, &profile));
    }
}
