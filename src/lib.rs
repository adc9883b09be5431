pub mod aggregate;
pub mod cache;
pub mod error;
pub mod fetch;
pub mod geo;
pub mod matching;
pub mod output;
pub mod pipeline;
pub mod publish;
pub mod trace;
