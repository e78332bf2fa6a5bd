mod cache;
mod crawl;
mod extract;
mod refresh;
mod runtime;
mod scheduler;
mod server;
mod types;

pub use runtime::run;
