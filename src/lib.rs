pub mod formatter;
pub mod orchestrator;
pub mod proxy;
pub mod relevance;
pub mod search_client;
pub mod time_filter;
pub mod types;

pub use formatter::format_hits;
pub use orchestrator::{search_news, SearchOrchestrator};
pub use proxy::clear_proxy_env;
pub use relevance::{ChatCompletions, OpenAiChatClient, RelevanceFilter};
pub use search_client::{NewsSearcher, SerperClient};
pub use time_filter::keep_recent;
pub use types::*;
