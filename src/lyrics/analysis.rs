//! Text statistics, keyword sentiment and theme detection for lyrics.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write;

/// Words shown in the top-words list.
const TOP_WORDS: usize = 10;

/// Score above which lyrics count as positive (and below whose negation, negative).
const SENTIMENT_THRESHOLD: f64 = 0.2;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "can", "could", "did", "do", "don't",
    "for", "from", "got", "had", "has", "have", "he", "her", "him", "his", "i", "i'd", "i'll",
    "i'm", "i've", "if", "in", "into", "is", "it", "it's", "just", "like", "me", "my", "no",
    "not", "now", "of", "oh", "on", "or", "our", "out", "she", "so", "that", "the", "their",
    "them", "then", "there", "they", "this", "to", "up", "us", "was", "we", "were", "what",
    "when", "where", "who", "will", "with", "would", "yeah", "you", "you're", "your",
];

const POSITIVE_WORDS: &[&str] = &[
    "love", "happy", "beautiful", "smile", "dream", "dreams", "forever", "bright", "sweet",
    "perfect", "golden", "shine", "laugh", "kiss", "alive", "free", "magic", "wonderful",
    "good", "best", "yes", "together", "dance", "dancing",
];

const NEGATIVE_WORDS: &[&str] = &[
    "hate", "cry", "crying", "tears", "sad", "broken", "break", "hurt", "pain", "lonely",
    "alone", "lost", "lie", "lies", "liar", "bad", "worst", "wrong", "never", "gone", "goodbye",
    "fear", "scared", "cold", "dead", "mad", "revenge",
];

/// Keyword groups for theme detection.
const THEMES: &[(&str, &[&str])] = &[
    ("love", &["love", "heart", "kiss", "darling", "baby", "romeo", "forever", "marry"]),
    ("heartbreak", &["broken", "tears", "cry", "goodbye", "gone", "hurt", "leave", "left"]),
    ("nostalgia", &["remember", "memory", "memories", "back", "young", "old", "used", "time"]),
    ("revenge", &["revenge", "karma", "bad", "blood", "enemy", "enemies", "dead", "liar"]),
    ("freedom", &["free", "run", "fly", "escape", "wild", "shake", "away"]),
    ("night", &["night", "midnight", "dark", "moon", "stars", "late", "dreams"]),
];

/// Descriptive statistics of one text.
#[derive(Debug, Clone, PartialEq)]
pub struct TextStats {
    pub total_words: usize,
    pub unique_words: usize,
    /// Non-empty lines.
    pub line_count: usize,
    pub avg_words_per_line: f64,
    /// `unique_words / total_words`, 0 for empty text.
    pub vocabulary_richness: f64,
    /// Most frequent line and its count, when any line repeats.
    pub most_repeated_line: Option<(String, usize)>,
    /// Most frequent non-stop words, highest count first.
    pub top_words: Vec<(String, usize)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

impl std::fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Positive => write!(f, "positive"),
            Self::Negative => write!(f, "negative"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

/// Keyword sentiment.
#[derive(Debug, Clone, PartialEq)]
pub struct Sentiment {
    pub positive: usize,
    pub negative: usize,
    /// `(positive - negative) / (positive + negative)`, 0 without hits.
    pub score: f64,
    pub label: SentimentLabel,
}

/// A detected theme and how many keywords hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeHit {
    pub theme: &'static str,
    pub hits: usize,
}

/// Lowercased words; apostrophes inside words are kept.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '\u{2019}'))
        .map(|w| w.replace('\u{2019}', "'"))
        .map(|w| w.trim_matches('\'').to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

fn word_counts(words: &[String]) -> HashMap<&str, usize> {
    let mut counts = HashMap::new();
    for w in words {
        *counts.entry(w.as_str()).or_insert(0) += 1;
    }
    counts
}

pub fn text_stats(lyrics: &str) -> TextStats {
    let words = tokenize(lyrics);
    let counts = word_counts(&words);

    let lines: Vec<&str> = lyrics
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let total_words = words.len();
    let unique_words = counts.len();
    let line_count = lines.len();

    let avg_words_per_line = if line_count == 0 {
        0.0
    } else {
        lines.iter().map(|l| tokenize(l).len()).sum::<usize>() as f64 / line_count as f64
    };
    let vocabulary_richness = if total_words == 0 {
        0.0
    } else {
        unique_words as f64 / total_words as f64
    };

    // Ties go to the line that appears first.
    let mut line_counts: HashMap<&str, usize> = HashMap::new();
    for &l in &lines {
        *line_counts.entry(l).or_insert(0) += 1;
    }
    let mut most_repeated_line: Option<(String, usize)> = None;
    for &l in &lines {
        let n = line_counts[l];
        if n > 1 && most_repeated_line.as_ref().is_none_or(|(_, best)| n > *best) {
            most_repeated_line = Some((l.to_string(), n));
        }
    }

    let mut top_words: Vec<(String, usize)> = counts
        .iter()
        .filter(|(w, _)| !STOP_WORDS.contains(*w))
        .map(|(w, n)| ((*w).to_string(), *n))
        .collect();
    top_words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_words.truncate(TOP_WORDS);

    TextStats {
        total_words,
        unique_words,
        line_count,
        avg_words_per_line,
        vocabulary_richness,
        most_repeated_line,
        top_words,
    }
}

pub fn sentiment(lyrics: &str) -> Sentiment {
    let words = tokenize(lyrics);
    let positive = words
        .iter()
        .filter(|w| POSITIVE_WORDS.contains(&w.as_str()))
        .count();
    let negative = words
        .iter()
        .filter(|w| NEGATIVE_WORDS.contains(&w.as_str()))
        .count();

    let hits = positive + negative;
    let score = if hits == 0 {
        0.0
    } else {
        (positive as f64 - negative as f64) / hits as f64
    };
    let label = if score > SENTIMENT_THRESHOLD {
        SentimentLabel::Positive
    } else if score < -SENTIMENT_THRESHOLD {
        SentimentLabel::Negative
    } else {
        SentimentLabel::Neutral
    };

    Sentiment {
        positive,
        negative,
        score,
        label,
    }
}

/// Themes with at least one keyword hit, most hits first.
pub fn themes(lyrics: &str) -> Vec<ThemeHit> {
    let words = tokenize(lyrics);
    let counts = word_counts(&words);

    let mut found: Vec<ThemeHit> = THEMES
        .iter()
        .map(|(theme, keywords)| ThemeHit {
            theme: *theme,
            hits: keywords.iter().filter_map(|k| counts.get(k)).sum(),
        })
        .filter(|t| t.hits > 0)
        .collect();
    found.sort_by(|a, b| b.hits.cmp(&a.hits));
    found
}

/// Words in both songs' top-word lists, alphabetically.
pub fn shared_top_words(a: &TextStats, b: &TextStats) -> Vec<String> {
    let a_words: BTreeSet<&str> = a.top_words.iter().map(|(w, _)| w.as_str()).collect();
    let b_words: BTreeSet<&str> = b.top_words.iter().map(|(w, _)| w.as_str()).collect();
    a_words
        .intersection(&b_words)
        .map(|w| (*w).to_string())
        .collect()
}

fn write_stats(out: &mut String, stats: &TextStats) {
    let _ = writeln!(out, "Total words: {}", stats.total_words);
    let _ = writeln!(out, "Unique words: {}", stats.unique_words);
    let _ = writeln!(out, "Lines: {}", stats.line_count);
    let _ = writeln!(out, "Average words per line: {:.1}", stats.avg_words_per_line);
    let _ = writeln!(out, "Vocabulary richness: {:.2}", stats.vocabulary_richness);
    match &stats.most_repeated_line {
        Some((line, n)) => {
            let _ = writeln!(out, "Most repeated line ({n}x): \"{line}\"");
        }
        None => {
            let _ = writeln!(out, "Most repeated line: none");
        }
    }
}

fn join_top_words(words: &[(String, usize)]) -> String {
    if words.is_empty() {
        return "none".to_string();
    }
    words
        .iter()
        .map(|(w, n)| format!("{w} ({n})"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Statistics block for `get_song_stats_only`.
pub fn format_stats(title: &str, stats: &TextStats) -> String {
    let mut out = format!("Statistics for \"{title}\"\n\n");
    write_stats(&mut out, stats);
    let _ = writeln!(out, "Top words: {}", join_top_words(&stats.top_words));
    out.trim_end().to_string()
}

/// Full report for `analyze_song`.
pub fn format_analysis(title: &str, lyrics: &str) -> String {
    let stats = text_stats(lyrics);
    let mood = sentiment(lyrics);
    let found = themes(lyrics);

    let mut out = format!("Analysis of \"{title}\"\n\n## Statistics\n");
    write_stats(&mut out, &stats);

    let _ = writeln!(out, "\n## Sentiment");
    let _ = writeln!(
        out,
        "{} (score {:+.2}; {} positive, {} negative keywords)",
        mood.label, mood.score, mood.positive, mood.negative
    );

    let _ = writeln!(out, "\n## Themes");
    if found.is_empty() {
        let _ = writeln!(out, "No recognized themes");
    }
    for t in &found {
        let _ = writeln!(out, "- {} ({} hits)", t.theme, t.hits);
    }

    let _ = writeln!(out, "\n## Top words");
    let _ = writeln!(out, "{}", join_top_words(&stats.top_words));
    out.trim_end().to_string()
}

/// Side-by-side report for `compare_songs`.
pub fn format_comparison(title_a: &str, lyrics_a: &str, title_b: &str, lyrics_b: &str) -> String {
    let (sa, sb) = (text_stats(lyrics_a), text_stats(lyrics_b));
    let (ma, mb) = (sentiment(lyrics_a), sentiment(lyrics_b));

    let mut out = format!("Comparison: \"{title_a}\" vs \"{title_b}\"\n\n");
    let rows: [(&str, String, String); 6] = [
        ("Total words", sa.total_words.to_string(), sb.total_words.to_string()),
        ("Unique words", sa.unique_words.to_string(), sb.unique_words.to_string()),
        ("Lines", sa.line_count.to_string(), sb.line_count.to_string()),
        (
            "Avg words/line",
            format!("{:.1}", sa.avg_words_per_line),
            format!("{:.1}", sb.avg_words_per_line),
        ),
        (
            "Vocabulary richness",
            format!("{:.2}", sa.vocabulary_richness),
            format!("{:.2}", sb.vocabulary_richness),
        ),
        (
            "Sentiment",
            format!("{} ({:+.2})", ma.label, ma.score),
            format!("{} ({:+.2})", mb.label, mb.score),
        ),
    ];
    for (label, a, b) in rows {
        let _ = writeln!(out, "{label}: {a} | {b}");
    }

    let shared = shared_top_words(&sa, &sb);
    let _ = writeln!(
        out,
        "\nShared frequent words: {}",
        if shared.is_empty() {
            "none".to_string()
        } else {
            shared.join(", ")
        }
    );
    out.trim_end().to_string()
}
