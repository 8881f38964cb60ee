pub mod audit;
pub mod cli;
pub mod completion;
pub mod config;
pub mod error;
pub mod generation;
pub mod orchestrator;
pub mod pipeline;
pub mod process;
pub mod prompts;
pub mod review;
pub mod store;
pub mod verdict;
