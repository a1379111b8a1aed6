//! Execution results and the response-modifier chain.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::HookError;
use crate::exchange::{HookRequest, HookResponse};
use crate::model::Hook;

/// A deferred mutation of the upstream response, scheduled while handling
/// the request and applied once the upstream has answered.
///
/// Modifiers are plain data rather than closures: everything an after-phase
/// handler needs (including the request body, which the proxy leg would
/// otherwise have consumed) is captured here at schedule time.
#[derive(Debug, Clone)]
pub enum ResponseModifier {
    /// Merge JSON fields and headers into the upstream response.
    ///
    /// Produced by `pass.modifiedResponse` hooks that a before-phase chain
    /// resolved (e.g. out of a consulted service's answer).
    Inject {
        hook_id: String,
        json: Map<String, Value>,
        headers: HashMap<String, String>,
    },

    /// Run a whole after-phase hook against the captured request and the
    /// live response. Covers `respond`/`reject` (replace the response),
    /// `pass.modifiedResponse` (amend it) and `consult.RESTServiceURL`
    /// (which needs both payloads).
    AfterHook { hook: Hook, request: HookRequest },
}

/// The outcome of executing one hook (or a chain of them, when accumulated
/// by a runner).
#[derive(Debug, Default)]
pub struct ExecutionResult {
    /// Ids of the hooks that executed, in order.
    pub hooks: Vec<String>,

    /// A terminal response produced by the hook. When set, nothing further
    /// may run for this request: no later hooks, no proxying.
    pub response: Option<HookResponse>,

    /// The hook asked for the rest of its chain to be skipped.
    pub skip_next_hooks_in_chain: bool,

    pub processing_error: Option<HookError>,

    /// Response modifiers scheduled for the after-phase.
    pub response_modifiers: Vec<ResponseModifier>,
}

impl ExecutionResult {
    /// Whether the chain may continue past this result.
    #[must_use]
    pub fn next_hooks_can_run(&self) -> bool {
        !(self.skip_next_hooks_in_chain
            || self.response.is_some()
            || self.processing_error.is_some())
    }

    pub(crate) fn for_hook(hook: &Hook) -> Self {
        Self {
            hooks: vec![hook.id.clone()],
            skip_next_hooks_in_chain: hook.skip_next_hooks_in_chain,
            ..Self::default()
        }
    }

    pub(crate) fn processing_error(hook: &Hook, error: HookError) -> Self {
        Self {
            hooks: vec![hook.id.clone()],
            skip_next_hooks_in_chain: true,
            processing_error: Some(error),
            ..Self::default()
        }
    }
}
