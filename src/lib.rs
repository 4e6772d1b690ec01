//! Completion adapter that lets a code-completion benchmark harness drive a
//! causal language model loaded with candle.

pub mod backend;
pub mod cli;
pub mod completions;
pub mod engine;
pub mod harness;
pub mod prompting;
