//! Bridge between a serial cockpit panel and a flight simulator's property
//! console
//!
//! ```text
//! Panel ──serial──► link ──► router ──► bridge ──telnet──► simulator
//!   ▲                                      │
//!   └──────────── panel commands ◄─────────┘
//! ```

pub mod bridge;
pub mod config;
pub mod link;
pub mod router;
pub mod simulator;
