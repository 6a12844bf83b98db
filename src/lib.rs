//! araliya-swarm: a round-robin swarm of LLM agents that talk to each other
//! through a router, each agent keeping its prompt inside the backend's
//! context window.

pub mod config;
pub mod error;
pub mod llm;
pub mod logger;
pub mod message;
pub mod subsystems;
pub mod supervisor;
