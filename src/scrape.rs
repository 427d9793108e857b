//! Candidate discovery.
//!
//! `YtDlpScraper` lists videos through `yt-dlp --flat-playlist --dump-json`: a
//! `ytsearchN:` query for YouTube and the public search/tag pages for TikTok and
//! Instagram. One JSON object per output line.

use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::HashSet;
use std::process::Command;
use std::thread;
use std::time::Duration;

use crate::tools::{run_bounded, Tool};
use crate::{CandidateVideo, DurationRange, Platform};

pub const DEFAULT_MAX_RESULTS: usize = 50;
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_secs(1);
const SCRAPE_LIMIT: Duration = Duration::from_secs(120);

#[derive(Clone, Debug)]
pub struct SearchQuery {
    pub keyword: String,
    pub platforms: Vec<Platform>,
    pub duration_range: DurationRange,
    pub max_results: usize,
    /// Pause between platforms.
    pub request_delay: Duration,
}

impl SearchQuery {
    pub fn new(keyword: impl Into<String>, platforms: Vec<Platform>, duration_range: DurationRange) -> Self {
        Self {
            keyword: keyword.into(),
            platforms,
            duration_range,
            max_results: DEFAULT_MAX_RESULTS,
            request_delay: DEFAULT_REQUEST_DELAY,
        }
    }
}

pub trait Scraper: Send + Sync {
    /// List candidates for one platform. May fail; other platforms are unaffected.
    fn search(&self, platform: Platform, query: &SearchQuery) -> Result<Vec<CandidateVideo>>;
}

/// Run every requested platform, isolating failures.
///
/// Results are capped per platform, deduplicated by URL, and candidates whose listed
/// duration is already outside the range are dropped.
pub fn collect_candidates(scraper: &dyn Scraper, query: &SearchQuery) -> Vec<CandidateVideo> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for (i, platform) in query.platforms.iter().copied().enumerate() {
        if i > 0 && !query.request_delay.is_zero() {
            thread::sleep(query.request_delay);
        }
        let found = match scraper.search(platform, query) {
            Ok(found) => found,
            Err(e) => {
                log::warn!("{}: search failed: {:#}", platform.display_name(), e);
                continue;
            }
        };
        let listed = found.len();
        let kept: Vec<CandidateVideo> = found
            .into_iter()
            .filter(|c| c.platform == platform)
            .filter(|c| {
                c.duration_secs
                    .map_or(true, |d| query.duration_range.contains(d))
            })
            .filter(|c| seen.insert(c.url.clone()))
            .take(query.max_results)
            .collect();
        log::info!(
            "{}: {} listed, {} kept for '{}'",
            platform.display_name(),
            listed,
            kept.len(),
            query.keyword
        );
        candidates.extend(kept);
    }
    candidates
}

// -------------------- yt-dlp --------------------

pub struct YtDlpScraper {
    limit: Duration,
}

impl YtDlpScraper {
    pub fn new() -> Self {
        Self { limit: SCRAPE_LIMIT }
    }

    pub fn with_limit(mut self, limit: Duration) -> Self {
        self.limit = limit;
        self
    }
}

impl Default for YtDlpScraper {
    fn default() -> Self {
        Self::new()
    }
}

/// The listing target yt-dlp is pointed at.
pub fn search_target(platform: Platform, keyword: &str, max_results: usize) -> String {
    match platform {
        Platform::Youtube => format!("ytsearch{}:{}", max_results, keyword),
        Platform::Tiktok => format!(
            "https://www.tiktok.com/search?q={}",
            keyword.trim().replace(' ', "%20")
        ),
        Platform::Instagram => {
            let hashtag: String = keyword
                .chars()
                .filter(|c| *c != '#' && !c.is_whitespace())
                .collect::<String>()
                .to_lowercase();
            format!("https://www.instagram.com/explore/tags/{}/", hashtag)
        }
    }
}

impl Scraper for YtDlpScraper {
    fn search(&self, platform: Platform, query: &SearchQuery) -> Result<Vec<CandidateVideo>> {
        if query.keyword.trim().is_empty() {
            return Err(anyhow!("empty search keyword"));
        }
        let target = search_target(platform, &query.keyword, query.max_results);
        let mut cmd = Command::new(Tool::YtDlp.program());
        cmd.args(["--dump-json", "--flat-playlist", "--quiet", "--no-warnings"])
            .args(["--playlist-end", &query.max_results.to_string()])
            .arg(&target);
        let output = run_bounded(&mut cmd, self.limit, None)?;
        Ok(parse_listing(platform, &output.stdout))
    }
}

/// Parse `--dump-json` output. Lines that are not usable entries are skipped.
pub fn parse_listing(platform: Platform, stdout: &[u8]) -> Vec<CandidateVideo> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<Value>(line) {
            Ok(entry) => parse_entry(platform, &entry),
            Err(e) => {
                log::debug!("{}: skipping unparsable listing line: {}", platform, e);
                None
            }
        })
        .collect()
}

fn parse_entry(platform: Platform, entry: &Value) -> Option<CandidateVideo> {
    let field = |name: &str| entry.get(name).and_then(Value::as_str).filter(|s| !s.is_empty());
    let url = field("webpage_url")
        .map(str::to_string)
        .or_else(|| field("url").filter(|u| u.starts_with("http")).map(str::to_string))
        .or_else(|| match platform {
            Platform::Youtube => field("id").map(|id| format!("https://www.youtube.com/watch?v={}", id)),
            _ => None,
        })?;
    let title = field("title").unwrap_or("untitled");
    let mut candidate = CandidateVideo::new(platform, url, title);
    if let Some(duration) = entry.get("duration").and_then(Value::as_f64) {
        if duration > 0.0 {
            candidate = candidate.with_duration(duration);
        }
    }
    Some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn search_targets_follow_platform_conventions() {
        assert_eq!(search_target(Platform::Youtube, "cats", 5), "ytsearch5:cats");
        assert_eq!(
            search_target(Platform::Instagram, "#Funny Cats", 5),
            "https://www.instagram.com/explore/tags/funnycats/"
        );
        assert!(search_target(Platform::Tiktok, "funny cats", 5).ends_with("q=funny%20cats"));
    }

    #[test]
    fn listing_lines_are_parsed_leniently() {
        let stdout = br#"{"id":"abc","title":"Cat","duration":42.0,"webpage_url":"https://youtube.com/shorts/abc"}
not json
{"id":"def","title":"Dog","url":"def"}
{"title":"nothing usable"}
"#;
        let parsed = parse_listing(Platform::Youtube, stdout);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].url, "https://youtube.com/shorts/abc");
        assert_eq!(parsed[0].duration_secs, Some(42.0));
        assert_eq!(parsed[1].url, "https://www.youtube.com/watch?v=def");
        assert_eq!(parsed[1].duration_secs, None);
    }

    struct FakeScraper {
        calls: Mutex<Vec<Platform>>,
    }

    impl Scraper for FakeScraper {
        fn search(&self, platform: Platform, _query: &SearchQuery) -> Result<Vec<CandidateVideo>> {
            self.calls.lock().unwrap().push(platform);
            match platform {
                Platform::Tiktok => Err(anyhow!("blocked")),
                _ => Ok(vec![
                    CandidateVideo::new(platform, format!("https://{}/1", platform), "a").with_duration(45.0),
                    CandidateVideo::new(platform, format!("https://{}/2", platform), "b").with_duration(5.0),
                    CandidateVideo::new(platform, format!("https://{}/3", platform), "c"),
                    CandidateVideo::new(platform, format!("https://{}/1", platform), "dup"),
                ]),
            }
        }
    }

    #[test]
    fn platform_failures_are_isolated() {
        let scraper = FakeScraper {
            calls: Mutex::new(Vec::new()),
        };
        let mut query = SearchQuery::new(
            "cats",
            Platform::ALL.to_vec(),
            DurationRange::new(30.0, 60.0).unwrap(),
        );
        query.request_delay = Duration::ZERO;
        let found = collect_candidates(&scraper, &query);
        assert_eq!(scraper.calls.lock().unwrap().len(), 3);
        // 45s and unknown duration kept for youtube + instagram; 5s and duplicate dropped
        assert_eq!(found.len(), 4);
        assert!(found.iter().all(|c| c.platform != Platform::Tiktok));
    }

    #[test]
    fn results_are_capped_per_platform() {
        let scraper = FakeScraper {
            calls: Mutex::new(Vec::new()),
        };
        let mut query = SearchQuery::new(
            "cats",
            vec![Platform::Youtube],
            DurationRange::new(0.0, 600.0).unwrap(),
        );
        query.max_results = 1;
        query.request_delay = Duration::ZERO;
        assert_eq!(collect_candidates(&scraper, &query).len(), 1);
    }
}
