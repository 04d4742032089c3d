//! Example MCP server: song lyrics and lyric analysis.
//!
//! Serves a fixed catalog of songs by one artist over stdio. Lyrics come
//! from a public lyrics API; analysis runs locally.
//!
//! # Tools
//!
//! - `get_song_lyrics(song_title)`
//! - `analyze_song(song_title)`
//! - `compare_songs(song_a, song_b)`
//! - `get_song_stats_only(song_title)`
//! - `list_songs()`

pub mod analysis;
pub mod catalog;
pub mod client;
pub mod server;

pub use client::{DEFAULT_API_BASE, LyricsClient, LyricsError};
pub use server::LyricsServer;
