//! Declarative request hooks.
//!
//! A hook is a conditional rule attached to a named request-lifecycle point.
//! When its event type and match rules line up with an in-flight request, the
//! hook's action runs: it may answer the request outright, rewrite the
//! request, schedule a rewrite of the upstream response, or delegate the
//! decision to an external REST service which answers with another hook.
//!
//! This crate holds the hook model and its execution machinery. It knows
//! nothing about policies and routing; the gateway feeds it
//! buffered [`HookRequest`]/[`UpstreamResponse`] values and interprets the
//! [`ExecutionResult`]s.

pub mod consultant;
pub mod error;
pub mod exchange;
pub mod executor;
pub mod model;
pub mod result;

pub use consultant::RestConsultant;
pub use error::HookError;
pub use exchange::{HookRequest, HookResponse, UpstreamResponse};
pub use executor::{Executor, Phase};
pub use model::{chain_to_string, EventType, Hook, HookAction, MatchRule, MatchRuleKind};
pub use result::{ExecutionResult, ResponseModifier};
