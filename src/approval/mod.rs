//! Super-admin sign-off for admin logins.

pub mod handlers;
pub mod machine;
mod pages;
pub mod service;
pub mod token;

pub use machine::{Decision, Transition};
pub use token::{DecisionLinks, DecisionTokenCodec, VerifiedDecision};
