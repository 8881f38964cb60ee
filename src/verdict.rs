use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Score used when the reviewer's output carries no parsable score.
pub const DEFAULT_QUALITY_SCORE: u32 = 5;

/// A reviewer's judgment. Anything unrecognized is read as `NeedsRevision`,
/// never as an approval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Approve,
    Reject,
    #[default]
    NeedsRevision,
}

impl Verdict {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "APPROVE" => Some(Verdict::Approve),
            "REJECT" => Some(Verdict::Reject),
            "NEEDS_REVISION" => Some(Verdict::NeedsRevision),
            _ => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Approve => write!(f, "APPROVE"),
            Verdict::Reject => write!(f, "REJECT"),
            Verdict::NeedsRevision => write!(f, "NEEDS_REVISION"),
        }
    }
}

/// Structured fields extracted from a reviewer's free-text answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReview {
    pub quality_score: u32,
    pub security_issues: Vec<String>,
    pub performance_issues: Vec<String>,
    pub verdict: Verdict,
    pub suggested_fixes: Vec<String>,
}

impl Default for ParsedReview {
    fn default() -> Self {
        Self {
            quality_score: DEFAULT_QUALITY_SCORE,
            security_issues: Vec::new(),
            performance_issues: Vec::new(),
            verdict: Verdict::default(),
            suggested_fixes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    QualityScore,
    SecurityIssues,
    PerformanceIssues,
    SuggestedFixes,
    Verdict,
}

impl Field {
    const ALL: [Field; 5] = [
        Field::QualityScore,
        Field::SecurityIssues,
        Field::PerformanceIssues,
        Field::SuggestedFixes,
        Field::Verdict,
    ];

    fn label(self) -> &'static str {
        match self {
            Field::QualityScore => "QUALITY_SCORE",
            Field::SecurityIssues => "SECURITY_ISSUES",
            Field::PerformanceIssues => "PERFORMANCE_ISSUES",
            Field::SuggestedFixes => "SUGGESTED_FIXES",
            Field::Verdict => "VERDICT",
        }
    }

    /// Value pattern captured after `LABEL:` on the same line.
    fn value_pattern(self) -> &'static str {
        match self {
            Field::QualityScore => r"\[?(\d+)",
            Field::Verdict => r"\[?(APPROVE|REJECT|NEEDS_REVISION)\b",
            Field::SecurityIssues | Field::PerformanceIssues | Field::SuggestedFixes => r"(.*)$",
        }
    }
}

static FIELD_PATTERNS: LazyLock<Vec<(Field, Regex)>> = LazyLock::new(|| {
    Field::ALL
        .iter()
        .map(|&field| {
            let pattern = format!(
                r"(?m)^[ \t]*{}:[ \t]*{}",
                field.label(),
                field.value_pattern()
            );
            let re = Regex::new(&pattern).expect("field patterns are static");
            (field, re)
        })
        .collect()
});

/// Any label of the review format, including ones we don't extract.
static SECTION_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(QUALITY_SCORE|SECURITY_ISSUES|PERFORMANCE_ISSUES|REVIEW_NOTES|SUGGESTED_FIXES|VERDICT):",
    )
    .expect("section label pattern is static")
});

/// The first line-anchored capture for `field`, if any.
fn capture_match(field: Field, text: &str) -> Option<regex::Match<'_>> {
    FIELD_PATTERNS
        .iter()
        .find(|(f, _)| *f == field)
        .and_then(|(_, re)| re.captures(text))
        .and_then(|caps| caps.get(1))
}

fn capture(field: Field, text: &str) -> Option<&str> {
    capture_match(field, text).map(|m| m.as_str())
}

/// Entries of a list field.
///
/// A value on the label's own line is a single entry. An empty label line
/// takes the lines below it, one entry each, up to a blank line or the next
/// label; `- ` and `* ` bullets are stripped. `NONE` entries are dropped.
fn list_value(field: Field, text: &str) -> Vec<String> {
    let Some(m) = capture_match(field, text) else {
        return Vec::new();
    };

    let inline = m.as_str().trim();
    let entries: Vec<&str> = if inline.is_empty() {
        text[m.end()..]
            .lines()
            .skip(1)
            .map(str::trim)
            .take_while(|line| !line.is_empty() && !SECTION_LABEL.is_match(line))
            .map(strip_bullet)
            .collect()
    } else {
        vec![inline]
    };

    entries
        .into_iter()
        .filter(|e| !e.is_empty() && *e != "NONE")
        .map(str::to_string)
        .collect()
}

fn strip_bullet(line: &str) -> &str {
    line.strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .unwrap_or(line)
        .trim()
}

/// The verdict token, if the text carries a recognizable one.
pub fn find_verdict(text: &str) -> Option<Verdict> {
    capture(Field::Verdict, text).and_then(Verdict::from_token)
}

/// Parse a reviewer's answer into structured fields.
///
/// Never fails: any field that is absent or unparsable falls back to its
/// default (score 5, empty lists, `NEEDS_REVISION`). Scores outside 1-10
/// are passed through unchanged.
pub fn parse_review(text: &str) -> ParsedReview {
    let defaults = ParsedReview::default();

    let quality_score = capture(Field::QualityScore, text)
        .and_then(|n| n.parse::<u32>().ok())
        .unwrap_or(defaults.quality_score);

    let verdict = find_verdict(text).unwrap_or(defaults.verdict);

    ParsedReview {
        quality_score,
        security_issues: list_value(Field::SecurityIssues, text),
        performance_issues: list_value(Field::PerformanceIssues, text),
        verdict,
        suggested_fixes: list_value(Field::SuggestedFixes, text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_fields_gives_defaults() {
        let parsed = parse_review("no recognizable fields here");
        assert_eq!(parsed.quality_score, 5);
        assert!(parsed.security_issues.is_empty());
        assert!(parsed.performance_issues.is_empty());
        assert_eq!(parsed.verdict, Verdict::NeedsRevision);
        assert!(parsed.suggested_fixes.is_empty());
        assert_eq!(parsed, ParsedReview::default());
    }

    #[test]
    fn test_full_structured_review() {
        let text = "QUALITY_SCORE: 8\n\
                    SECURITY_ISSUES: Unsanitized input passed to eval\n\
                    PERFORMANCE_ISSUES: NONE\n\
                    REVIEW_NOTES: Mostly fine.\n\
                    SUGGESTED_FIXES: Validate input before use\n\
                    VERDICT: NEEDS_REVISION";
        let parsed = parse_review(text);
        assert_eq!(parsed.quality_score, 8);
        assert_eq!(
            parsed.security_issues,
            vec!["Unsanitized input passed to eval".to_string()]
        );
        assert!(parsed.performance_issues.is_empty());
        assert_eq!(
            parsed.suggested_fixes,
            vec!["Validate input before use".to_string()]
        );
        assert_eq!(parsed.verdict, Verdict::NeedsRevision);
    }

    #[test]
    fn test_approve_and_reject_tokens() {
        assert_eq!(parse_review("VERDICT: APPROVE").verdict, Verdict::Approve);
        assert_eq!(parse_review("VERDICT: REJECT").verdict, Verdict::Reject);
        assert_eq!(parse_review("VERDICT: [APPROVE]").verdict, Verdict::Approve);
    }

    #[test]
    fn test_unknown_verdict_token_defaults() {
        assert_eq!(
            parse_review("VERDICT: MAYBE").verdict,
            Verdict::NeedsRevision
        );
        // A prefix of a real token is not a match.
        assert_eq!(
            parse_review("VERDICT: APPROVED_LATER").verdict,
            Verdict::NeedsRevision
        );
    }

    #[test]
    fn test_fields_must_be_line_anchored() {
        let text = "The reviewer says VERDICT: APPROVE inline\nQUALITY_SCORE: 9";
        let parsed = parse_review(text);
        assert_eq!(parsed.verdict, Verdict::NeedsRevision);
        assert_eq!(parsed.quality_score, 9);
    }

    #[test]
    fn test_indented_fields_still_match() {
        let parsed = parse_review("  VERDICT: APPROVE\n\tQUALITY_SCORE: 7");
        assert_eq!(parsed.verdict, Verdict::Approve);
        assert_eq!(parsed.quality_score, 7);
    }

    #[test]
    fn test_first_occurrence_wins() {
        let parsed = parse_review("VERDICT: REJECT\nVERDICT: APPROVE");
        assert_eq!(parsed.verdict, Verdict::Reject);
    }

    #[test]
    fn test_out_of_range_score_passes_through() {
        assert_eq!(parse_review("QUALITY_SCORE: 42").quality_score, 42);
        assert_eq!(parse_review("QUALITY_SCORE: 0").quality_score, 0);
    }

    #[test]
    fn test_unparsable_score_defaults() {
        assert_eq!(parse_review("QUALITY_SCORE: high").quality_score, 5);
        assert_eq!(parse_review("QUALITY_SCORE: -3").quality_score, 5);
        assert_eq!(
            parse_review("QUALITY_SCORE: 99999999999999999999").quality_score,
            5
        );
    }

    #[test]
    fn test_list_value_only_reads_its_own_line() {
        let text = "SECURITY_ISSUES: SQL injection in query builder\nVERDICT: REJECT";
        let parsed = parse_review(text);
        assert_eq!(
            parsed.security_issues,
            vec!["SQL injection in query builder".to_string()]
        );
    }

    #[test]
    fn test_empty_label_followed_by_label_is_empty() {
        let parsed = parse_review("SUGGESTED_FIXES:   \nVERDICT: APPROVE");
        assert!(parsed.suggested_fixes.is_empty());
        assert_eq!(parsed.verdict, Verdict::Approve);
    }

    #[test]
    fn test_bulleted_list_below_label() {
        let text = "QUALITY_SCORE: 4\n\
                    SECURITY_ISSUES:\n\
                    - SQL injection in query builder\n\
                    * secrets written to the log\n\
                    PERFORMANCE_ISSUES: NONE\n\
                    SUGGESTED_FIXES:\n\
                    \x20 - use bound parameters\n\
                    \x20 - redact the token\n\
                    \n\
                    Trailing prose is not a fix.\n\
                    VERDICT: NEEDS_REVISION";
        let parsed = parse_review(text);
        assert_eq!(
            parsed.security_issues,
            vec!["SQL injection in query builder", "secrets written to the log"]
        );
        assert!(parsed.performance_issues.is_empty());
        assert_eq!(
            parsed.suggested_fixes,
            vec!["use bound parameters", "redact the token"]
        );
        assert_eq!(parsed.verdict, Verdict::NeedsRevision);
    }

    #[test]
    fn test_list_below_label_stops_at_unextracted_label() {
        let text = "SECURITY_ISSUES:\nunchecked unwrap on input\nREVIEW_NOTES: fine otherwise";
        assert_eq!(
            parse_review(text).security_issues,
            vec!["unchecked unwrap on input"]
        );
    }

    #[test]
    fn test_none_below_label_is_empty() {
        let parsed = parse_review("SECURITY_ISSUES:\n- NONE\nVERDICT: APPROVE");
        assert!(parsed.security_issues.is_empty());
    }

    #[test]
    fn test_bulleted_list_with_crlf() {
        let parsed = parse_review("PERFORMANCE_ISSUES:\r\n- quadratic loop\r\n- extra clone\r\n\r\nVERDICT: REJECT");
        assert_eq!(
            parsed.performance_issues,
            vec!["quadratic loop", "extra clone"]
        );
    }

    #[test]
    fn test_crlf_line_endings() {
        let parsed = parse_review("QUALITY_SCORE: 6\r\nSECURITY_ISSUES: NONE\r\nVERDICT: APPROVE\r\n");
        assert_eq!(parsed.quality_score, 6);
        assert!(parsed.security_issues.is_empty());
        assert_eq!(parsed.verdict, Verdict::Approve);
    }

    #[test]
    fn test_verdict_display_matches_wire_format() {
        for v in [Verdict::Approve, Verdict::Reject, Verdict::NeedsRevision] {
            let json = serde_json::to_string(&v).unwrap();
            assert_eq!(json, format!("\"{v}\""));
        }
    }
}
