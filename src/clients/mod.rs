// src/clients/mod.rs
//! Thin reqwest-backed implementations of the collaborator traits. Each
//! client owns its `Client`, a request timeout, and a small bounded retry.

pub mod coingecko;
pub mod deepseek;
pub mod nanobanana;
pub mod telegram;
