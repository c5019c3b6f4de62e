// lyrics/mod.rs - top-level lyrics module re-exporting submodules
pub mod database;
pub mod parse;
pub mod pipeline;
pub mod providers;
pub mod types;

pub use database::LyricsCache;
pub use pipeline::LyricsPipeline;
pub use providers::ProviderSettings;
pub use types::LyricsDocument;
