pub mod config;
pub mod scrape;
pub mod status;
pub mod token;

pub use config::EngineConfig;
pub use scrape::{
    extract_current_action, extract_duration_and_tokens, scrape_pane, trim_preview, PaneSnapshot,
};
pub use status::{classify_prefix, window_name, WindowStatus};
pub use token::TokenCodec;
