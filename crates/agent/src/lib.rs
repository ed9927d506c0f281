//! Agent runtime - model-driven tool orchestration over the CRM
//!
//! This crate is the part of hearth that talks to the language model and
//! turns its replies into CRM actions:
//! - Invokes a chat-completions endpoint with the tool manifest attached
//! - Parses replies into text plus structured tool calls
//! - Gates every call behind permission, approval, and schema checks
//! - Synthesizes one plain-language answer from however the calls went
//!
//! # Architecture
//!
//! A turn moves through a fixed loop:
//! 1. **Enrichment** (`orchestrator`) - look up background on the subject
//! 2. **Model invocation** (`llm`, `http`) - ask the model what to do
//! 3. **Extraction** (`parser`) - decode the reply into tool calls
//! 4. **Execution** (`gateway`) - run each call through the safety gates
//! 5. **Synthesis** (`synthesis`) - fold results into the final answer
//!
//! # Key Types
//!
//! - `Orchestrator` - drives whole turns (see `orchestrator` module)
//! - `ModelClient` - pluggable trait for OpenAI-compatible backends
//! - `ExecutionGateway` - permission/approval/validation enforcement
//!
//! # Safety Principle
//!
//! The model is strictly a translator. It NEVER bypasses the gateway: every
//! call it emits is permission-checked, approval-gated, schema-validated,
//! and audited before a handler runs.

pub mod gateway;
pub mod http;
pub mod llm;
pub mod orchestrator;
pub mod parser;
pub mod synthesis;
