use async_trait::async_trait;

use super::{one_line, EnrichError, SentimentClassifier, Summarizer, MAX_SUMMARY_CHARS};
use crate::storage::Sentiment;

const POSITIVE_WORDS: &[&str] = &[
    "gain", "gains", "rise", "rises", "rose", "rally", "rallied", "surge", "surged", "growth",
    "profit", "profits", "record", "beat", "beats", "strong", "improve", "improved", "success",
    "win", "wins", "won", "boost", "boosted", "recovery", "upbeat", "optimistic", "approve",
    "approved", "breakthrough", "positive", "good", "best", "better",
];

const NEGATIVE_WORDS: &[&str] = &[
    "loss", "losses", "fall", "falls", "fell", "drop", "dropped", "plunge", "plunged", "slump",
    "slumped", "decline", "declined", "weak", "crisis", "fear", "fears", "risk", "warn",
    "warned", "warning", "cut", "cuts", "layoffs", "lawsuit", "fraud", "crash", "recession",
    "downturn", "negative", "bad", "worst", "worse", "fail", "failed", "failure",
];

const NEGATORS: &[&str] = &[
    "not", "no", "never", "without", "cannot", "isn't", "wasn't", "aren't", "won't", "can't",
];

/// Lexicon scorer with three-token negation window.
///
/// Hits on both sides of similar weight (the smaller count at least half the
/// larger) yield [`Sentiment::Mixed`]; no hits yield [`Sentiment::Neutral`].
#[derive(Debug, Clone, Default)]
pub struct LexiconClassifier;

impl LexiconClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Count positive and negative hits, flipping a hit when a negator sits
    /// in the three preceding tokens.
    fn score(&self, text: &str) -> (u32, u32) {
        let tokens: Vec<String> = tokenize(text).collect();
        let (mut positive, mut negative) = (0u32, 0u32);

        for (i, token) in tokens.iter().enumerate() {
            let polarity = if POSITIVE_WORDS.contains(&token.as_str()) {
                1
            } else if NEGATIVE_WORDS.contains(&token.as_str()) {
                -1
            } else {
                continue;
            };

            let negated = (1..=3).any(|k| i >= k && NEGATORS.contains(&tokens[i - k].as_str()));
            if (polarity > 0) != negated {
                positive += 1;
            } else {
                negative += 1;
            }
        }

        (positive, negative)
    }

    pub fn label(&self, text: &str) -> Sentiment {
        match self.score(text) {
            (0, 0) => Sentiment::Neutral,
            (p, n) if p > 0 && n > 0 && p.min(n) * 2 >= p.max(n) => Sentiment::Mixed,
            (p, n) if p > n => Sentiment::Positive,
            _ => Sentiment::Negative,
        }
    }
}

fn tokenize(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

#[async_trait]
impl SentimentClassifier for LexiconClassifier {
    async fn classify(&self, text: &str) -> Result<Sentiment, EnrichError> {
        if text.trim().is_empty() {
            return Err(EnrichError::EmptyInput);
        }
        Ok(self.label(text))
    }
}

/// Extractive summarizer: the article's lead sentences up to the length cap.
///
/// Reader-proxy metadata lines (`Title:`, `URL Source:` …), headings, images
/// and list markers are skipped so the lead is actual prose.
#[derive(Debug, Clone)]
pub struct LeadSummarizer {
    max_chars: usize,
}

impl Default for LeadSummarizer {
    fn default() -> Self {
        Self {
            max_chars: MAX_SUMMARY_CHARS,
        }
    }
}

const METADATA_PREFIXES: &[&str] = &[
    "Title:",
    "URL Source:",
    "Published Time:",
    "Markdown Content:",
];

impl LeadSummarizer {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.clamp(1, MAX_SUMMARY_CHARS),
        }
    }

    pub fn lead(&self, text: &str) -> String {
        let prose = text
            .lines()
            .map(str::trim)
            .filter(|line| {
                !line.is_empty()
                    && !line.starts_with('#')
                    && !line.starts_with("![")
                    && !line.starts_with('*')
                    && !line.starts_with('-')
                    && !line.chars().all(|c| c == '=' || c == '-')
                    && !METADATA_PREFIXES.iter().any(|p| line.starts_with(p))
            })
            .collect::<Vec<_>>()
            .join(" ");

        let mut summary = String::new();
        for sentence in split_sentences(&prose) {
            let candidate_len = summary.chars().count() + 1 + sentence.chars().count();
            if !summary.is_empty() && candidate_len > self.max_chars {
                break;
            }
            if !summary.is_empty() {
                summary.push(' ');
            }
            summary.push_str(sentence);
            if summary.chars().count() >= self.max_chars {
                break;
            }
        }

        one_line(&summary, self.max_chars)
    }
}

/// Split after `.`, `!` or `?` followed by whitespace.
fn split_sentences(text: &str) -> impl Iterator<Item = &str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(next_idx, next)) = chars.peek() {
                if next.is_whitespace() {
                    sentences.push(text[start..next_idx].trim());
                    start = next_idx;
                }
            } else {
                sentences.push(text[start..idx + c.len_utf8()].trim());
                start = text.len();
            }
        }
    }
    if start < text.len() {
        sentences.push(text[start..].trim());
    }
    sentences.into_iter().filter(|s| !s.is_empty())
}

#[async_trait]
impl Summarizer for LeadSummarizer {
    async fn summarize(&self, text: &str) -> Result<String, EnrichError> {
        let summary = self.lead(text);
        if summary.is_empty() {
            return Err(EnrichError::EmptyInput);
        }
        Ok(summary)
    }
}
