use std::collections::HashSet;

use serde::Serialize;

use crate::app_state::AppError;
use crate::db::ContentType;
use crate::indexer::{IndexerError, IndexerPool, ProspectRelease, SearchRequest};
use crate::parser::{self, ReleaseInfo};
use crate::scorer::{score, QualityProfile};

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub text: String,
    pub content_type: ContentType,
    pub season: Option<u16>,
    pub episode: Option<u16>,
    pub imdb_id: Option<String>,
    pub tvdb_id: Option<i64>,
}

impl SearchQuery {
    pub fn movie(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            content_type: ContentType::Movie,
            season: None,
            episode: None,
            imdb_id: None,
            tvdb_id: None,
        }
    }

    pub fn series(text: impl Into<String>, season: Option<u16>, episode: Option<u16>) -> Self {
        Self {
            text: text.into(),
            content_type: ContentType::Series,
            season,
            episode,
            imdb_id: None,
            tvdb_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ScoredRelease {
    #[serde(flatten)]
    pub release: ProspectRelease,
    pub info: ReleaseInfo,
    pub score: i64,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct SearchOutcome {
    pub releases: Vec<ScoredRelease>,
    pub errors: Vec<IndexerError>,
}

/// Turns raw indexer results into a ranked candidate list: parse, filter by
/// title, score against the profile, gate season packs, penalize wrong
/// sequels, sort.
#[derive(Debug, Clone)]
pub struct Searcher {
    pool: IndexerPool,
}

impl Searcher {
    pub fn new(pool: IndexerPool) -> Self {
        Self { pool }
    }

    pub async fn search(
        &self,
        query: &SearchQuery,
        profile: &QualityProfile,
    ) -> Result<SearchOutcome, AppError> {
        let (raw, errors) = self
            .pool
            .search(SearchRequest {
                text: query.text.clone(),
                content_type: query.content_type,
                imdb_id: query.imdb_id.clone(),
                tvdb_id: query.tvdb_id,
            })
            .await?;

        let query_title = extract_query_title(&query.text);
        let query_words = clean_words(&query_title);
        let query_sequel = sequel_number(&query.text);

        let mut releases: Vec<ScoredRelease> = Vec::with_capacity(raw.len());
        for release in raw {
            let info = parser::parse(&release.title);

            if !query_words.is_empty() && !info.clean_title.is_empty() {
                let parsed_words = clean_words(&info.title);
                if !title_matches(&query_words, &parsed_words) {
                    tracing::trace!(release = release.title, "Dropping release: title mismatch");
                    continue;
                }
            }

            let mut release_score = score(&info, profile);
            if release_score == 0 {
                tracing::trace!(release = release.title, "Dropping release: score 0");
                continue;
            }

            if season_pack_rejects(query, &info) {
                tracing::trace!(release = release.title, "Dropping release: season gate");
                continue;
            }

            // A sequel the user did not ask for stays in the list but sinks
            // below every proper candidate.
            if let Some(release_sequel) = sequel_number(&release.title) {
                if query_sequel != Some(release_sequel) {
                    release_score = -release_score;
                }
            }

            releases.push(ScoredRelease {
                release,
                info,
                score: release_score,
            });
        }

        releases.sort_by(|a, b| b.score.cmp(&a.score));

        let mut seen = HashSet::new();
        releases.retain(|r| seen.insert(r.release.guid.clone()));

        Ok(SearchOutcome { releases, errors })
    }
}

/// Strip trailing `S01E05`/`S01` tokens and a trailing year so the free-text
/// query leaves only the title.
pub fn extract_query_title(text: &str) -> String {
    let mut words: Vec<&str> = text.split_whitespace().collect();
    while let Some(last) = words.last() {
        let lower = last.to_lowercase();
        let is_numbering = parse_season_token(&lower);
        let is_year = last.len() == 4
            && last.chars().all(|c| c.is_ascii_digit())
            && (last.starts_with("19") || last.starts_with("20"));
        if is_numbering || is_year {
            words.pop();
        } else {
            break;
        }
    }
    words.join(" ")
}

fn parse_season_token(token: &str) -> bool {
    let Some(rest) = token.strip_prefix('s') else {
        return false;
    };
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return false;
    }
    let tail = &rest[digits.len()..];
    if tail.is_empty() {
        return true;
    }
    let Some(episode) = tail.strip_prefix('e') else {
        return false;
    };
    !episode.is_empty() && episode.chars().all(|c| c.is_ascii_digit())
}

fn clean_words(title: &str) -> Vec<String> {
    parser::clean_title(title)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Accept an exact title, or a release title extending the query with a
/// suffix. A query matching only the tail of a longer release title ("the
/// walking dead" in "fear the walking dead") is a different show.
fn title_matches(query: &[String], parsed: &[String]) -> bool {
    if query == parsed {
        return true;
    }
    if parsed.len() > query.len() {
        return parsed[..query.len()] == *query;
    }
    false
}

/// A season query without an episode wants packs only.
fn season_pack_rejects(query: &SearchQuery, info: &ReleaseInfo) -> bool {
    if query.content_type != ContentType::Series {
        return false;
    }
    let Some(season) = query.season else {
        return false;
    };
    if query.episode.is_some() {
        return false;
    }
    if info.episode > 0 && !info.is_complete_season {
        return true;
    }
    info.season != season
}

/// Sequel indicators: space-bounded roman numerals II..V, `Part <n>`, or a
/// trailing 2..5. Both sides normalize to arabic before comparison.
fn sequel_number(raw: &str) -> Option<u16> {
    let normalized = raw.to_lowercase().replace(['.', '_'], " ");
    let words: Vec<&str> = normalized.split_whitespace().collect();
    for (i, word) in words.iter().enumerate() {
        if i == 0 {
            continue;
        }
        if let Some(n) = roman_sequel(word) {
            return Some(n);
        }
        if *word == "part" {
            if let Some(next) = words.get(i + 1) {
                if let Some(n) = roman_sequel(next) {
                    return Some(n);
                }
                if let Ok(n) = next.parse::<u16>() {
                    if (2..=5).contains(&n) {
                        return Some(n);
                    }
                }
            }
        }
    }
    // A bare trailing digit ("Back to the Future 2")
    let title = extract_query_title(raw);
    let last = title.split_whitespace().last()?;
    let n: u16 = last.parse().ok()?;
    (2..=5).contains(&n).then_some(n)
}

fn roman_sequel(word: &str) -> Option<u16> {
    match word {
        "ii" => Some(2),
        "iii" => Some(3),
        "iv" => Some(4),
        "v" => Some(5),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::indexer::Indexer;

    struct StaticIndexer {
        releases: Vec<&'static str>,
    }

    #[async_trait::async_trait]
    impl Indexer for StaticIndexer {
        async fn search(&self, _: &SearchRequest) -> Result<Vec<ProspectRelease>, AppError> {
            Ok(self
                .releases
                .iter()
                .enumerate()
                .map(|(i, title)| ProspectRelease {
                    title: title.to_string(),
                    guid: format!("guid-{i}"),
                    download_url: format!("https://indexer.test/get/{i}"),
                    size: 1 << 30,
                    published: None,
                    indexer: "static".to_string(),
                })
                .collect())
        }

        fn indexer_name(&self) -> &str {
            "static"
        }
    }

    fn searcher(releases: Vec<&'static str>) -> Searcher {
        Searcher::new(IndexerPool::new(
            vec![Arc::new(StaticIndexer { releases })],
            Duration::from_secs(5),
        ))
    }

    fn profile() -> QualityProfile {
        QualityProfile {
            name: "hd".into(),
            resolution: vec!["2160p".into(), "1080p".into(), "720p".into()],
            sources: vec!["bluray".into(), "web-dl".into()],
            codecs: vec!["x264".into(), "x265".into()],
            hdr: Vec::new(),
            audio: Vec::new(),
            prefer_remux: false,
            reject: vec!["cam".into()],
        }
    }

    #[test_log::test(tokio::test)]
    async fn results_are_sorted_by_score_descending() {
        let searcher = searcher(vec![
            "Test.Movie.2024.720p.WEB-DL.x264-A",
            "Test.Movie.2024.2160p.BluRay.x265-B",
            "Test.Movie.2024.1080p.WEB-DL.x264-C",
        ]);
        let outcome = searcher
            .search(&SearchQuery::movie("Test Movie"), &profile())
            .await
            .unwrap();
        let scores: Vec<i64> = outcome.releases.iter().map(|r| r.score).collect();
        let mut sorted = scores.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(sorted, scores);
        assert_eq!(3, scores.len());
    }

    #[test_log::test(tokio::test)]
    async fn zero_scored_and_mismatched_titles_drop() {
        let searcher = searcher(vec![
            "Test.Movie.2024.1080p.CAM.x264-A",
            "Fear.The.Test.Movie.2024.1080p.WEB-DL.x264-B",
            "Test.Movie.2024.1080p.WEB-DL.x264-C",
        ]);
        let outcome = searcher
            .search(&SearchQuery::movie("Test Movie"), &profile())
            .await
            .unwrap();
        assert_eq!(1, outcome.releases.len());
        assert_eq!("guid-2", outcome.releases[0].release.guid);
    }

    #[test_log::test(tokio::test)]
    async fn extra_suffix_is_same_show() {
        let searcher = searcher(vec!["Test.Movie.Redemption.2024.1080p.WEB-DL.x264-A"]);
        let outcome = searcher
            .search(&SearchQuery::movie("Test Movie"), &profile())
            .await
            .unwrap();
        assert_eq!(1, outcome.releases.len());
    }

    #[test_log::test(tokio::test)]
    async fn season_pack_gate() {
        let searcher = searcher(vec![
            "Show.S01.1080p.BluRay-X",
            "Show.S01E05.1080p.BluRay-X",
            "Show.S02.1080p.BluRay-X",
        ]);
        let outcome = searcher
            .search(&SearchQuery::series("Show", Some(1), None), &profile())
            .await
            .unwrap();
        assert_eq!(1, outcome.releases.len());
        assert!(outcome.releases[0].info.is_complete_season);
        assert_eq!(1, outcome.releases[0].info.season);
    }

    #[test_log::test(tokio::test)]
    async fn sequel_mismatch_negates_score() {
        let searcher = searcher(vec![
            "Back.to.the.Future.1985.1080p.WEB-DL.x264",
            "Back.to.the.Future.Part.III.1990.1080p.WEB-DL.x264",
        ]);
        let outcome = searcher
            .search(&SearchQuery::movie("Back to the Future"), &profile())
            .await
            .unwrap();
        assert_eq!(2, outcome.releases.len());
        let original = &outcome.releases[0];
        let sequel = &outcome.releases[1];
        assert!(original.score > 0);
        assert_eq!(-original.score, sequel.score);
        assert!(sequel.release.title.contains("Part.III"));
    }

    #[test_log::test(tokio::test)]
    async fn matching_sequel_is_not_penalized() {
        let searcher = searcher(vec!["Back.to.the.Future.Part.II.1989.1080p.WEB-DL.x264"]);
        let outcome = searcher
            .search(&SearchQuery::movie("Back to the Future Part II"), &profile())
            .await
            .unwrap();
        assert_eq!(1, outcome.releases.len());
        assert!(outcome.releases[0].score > 0);
    }

    #[test_log::test(tokio::test)]
    async fn duplicate_guids_collapse() {
        let searcher = Searcher::new(IndexerPool::new(
            vec![
                Arc::new(StaticIndexer {
                    releases: vec!["Test.Movie.2024.1080p.WEB-DL.x264-A"],
                }),
                Arc::new(StaticIndexer {
                    releases: vec!["Test.Movie.2024.1080p.WEB-DL.x264-A"],
                }),
            ],
            Duration::from_secs(5),
        ));
        let outcome = searcher
            .search(&SearchQuery::movie("Test Movie"), &profile())
            .await
            .unwrap();
        assert_eq!(1, outcome.releases.len());
    }

    #[test]
    fn query_title_extraction() {
        assert_eq!("Show", extract_query_title("Show S01E05"));
        assert_eq!("Show", extract_query_title("Show S01"));
        assert_eq!("Some Movie", extract_query_title("Some Movie 2024"));
        assert_eq!("Show", extract_query_title("Show S01 2024"));
    }

    #[test]
    fn sequel_numbers() {
        assert_eq!(Some(3), sequel_number("Back.to.the.Future.Part.III.1990"));
        assert_eq!(Some(2), sequel_number("Back to the Future 2"));
        assert_eq!(Some(2), sequel_number("Movie Part 2"));
        assert_eq!(None, sequel_number("Back to the Future"));
        assert_eq!(None, sequel_number("V for Vendetta"));
    }
}
