//! The fixed song catalog.

/// Artist whose songs the catalog lists.
pub const ARTIST: &str = "Taylor Swift";

/// Songs the server answers for, in display form.
pub const SONGS: &[&str] = &[
    "Tim McGraw",
    "Teardrops on My Guitar",
    "Our Song",
    "Love Story",
    "You Belong With Me",
    "Fifteen",
    "Mine",
    "Enchanted",
    "All Too Well",
    "We Are Never Ever Getting Back Together",
    "Blank Space",
    "Shake It Off",
    "Style",
    "Wildest Dreams",
    "Bad Blood",
    "Delicate",
    "Look What You Made Me Do",
    "Lover",
    "Cruel Summer",
    "Cardigan",
    "August",
    "Willow",
    "Champagne Problems",
    "Anti-Hero",
    "Karma",
];

/// Map user input to a catalog title.
///
/// Case, punctuation and repeated whitespace are ignored, so
/// `"anti hero"` and `"ANTI-HERO!"` both resolve to `"Anti-Hero"`.
pub fn resolve_title(input: &str) -> Option<&'static str> {
    let wanted = normalize(input);
    if wanted.is_empty() {
        return None;
    }
    SONGS.iter().copied().find(|song| normalize(song) == wanted)
}

/// One line per song, for tool output.
pub fn catalog_listing() -> String {
    SONGS
        .iter()
        .map(|s| format!("- {s}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn normalize(title: &str) -> String {
    title
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
