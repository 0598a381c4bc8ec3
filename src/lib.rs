//! # ragdesk
//!
//! A multi-tenant knowledge-base chat backend. Each tenant uploads one
//! plain-text document; visitor questions are answered by an external
//! generation service constrained to that document's content.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────────┐   ┌───────────────┐
//! │ Request  │──▶│ Tenant Resolver │──▶│ Answer Engine │──▶ generation API
//! │ (axum)   │   │ cred/host/deflt │   │ + conv. log   │
//! └──────────┘   └────────────────┘   └───────┬───────┘
//!                                             │ context
//!                                     ┌───────┴────────┐
//!                                     │ Context        │
//!                                     │ Assembler      │
//!                                     └───────┬────────┘
//!                                             │ document
//! upload ──▶ Document Store ──▶ Enrichment Pipeline (background)
//!                                 └──▶ Tenant Store cache replace (CAS)
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`store`] | Tenant store abstraction + in-memory backend |
//! | [`db`] | SQLite tenant store backend |
//! | [`auth`] | Credential issuance and password hashing |
//! | [`resolver`] | Credential/host/default tenant resolution |
//! | [`document`] | Per-tenant document files |
//! | [`context`] | Context assembly and token budgets |
//! | [`generation`] | External generation capability |
//! | [`enrich`] | Background enrichment pipeline |
//! | [`answer`] | Answer engine |
//! | [`notify`] | Best-effort operator notifications |
//! | [`provision`] | Post-registration provisioning hook |
//! | [`server`] | Public HTTP surface |

pub mod answer;
pub mod auth;
pub mod config;
pub mod context;
pub mod db;
pub mod document;
pub mod enrich;
pub mod error;
pub mod generation;
pub mod models;
pub mod notify;
pub mod provision;
pub mod resolver;
pub mod server;
pub mod store;
