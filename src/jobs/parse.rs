//! Splits the backend's free-form answer into a title and a bullet body.

use regex::Regex;

use super::SummaryResult;
use crate::config::SummaryFormat;

pub const DEFAULT_TITLE: &str = "Summary";

pub struct SummaryParser {
    title_line: Regex,
    points_line: Regex,
}

impl SummaryParser {
    pub fn new(format: &SummaryFormat) -> Self {
        let title = regex::escape(format.title_marker.trim());
        let points = regex::escape(format.points_marker.trim());

        // Markers are escaped, so the patterns are always valid.
        Self {
            title_line: Regex::new(&format!(r"(?m)^[ \t]*{title}[ \t]*[:：](.*)$"))
                .expect("title pattern"),
            points_line: Regex::new(&format!(r"(?m)^[ \t]*{points}[ \t]*[:：]"))
                .expect("points pattern"),
        }
    }

    /// Body is everything after the points marker, else everything after a
    /// leading title line, else the whole text. Title is the first title
    /// line anywhere, or [`DEFAULT_TITLE`].
    pub fn parse(&self, raw: &str) -> SummaryResult {
        let normalized = raw.replace("\r\n", "\n");
        let raw = normalized.trim();
        let title = self.find_title(raw);

        if let Some(marker) = self.points_line.find(raw) {
            return SummaryResult {
                title: title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
                bullet_summary: raw[marker.end()..].trim().to_string(),
            };
        }

        let (first_line, rest) = raw.split_once('\n').unwrap_or((raw, ""));
        if let Some(first_title) = self.find_title(first_line) {
            return SummaryResult {
                title: first_title,
                bullet_summary: rest.trim().to_string(),
            };
        }

        SummaryResult {
            title: title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            bullet_summary: raw.to_string(),
        }
    }

    fn find_title(&self, text: &str) -> Option<String> {
        self.title_line
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .find(|title| !title.is_empty())
            .map(str::to_owned)
    }
}
