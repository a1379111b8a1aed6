//! Running all matching hooks of an event type, in policy order.

use std::sync::Arc;

use tracing::{debug, info, warn};

use warden_core::constants::ERROR_UNKNOWN;
use warden_hook::{chain_to_string, EventType, Executor, HookRequest, HookResponse, Phase, ResponseModifier};
use warden_policy::PolicyStore;

/// What a hook-chain run decided.
pub enum HookRunOutcome {
    /// Execution may continue; these modifiers were scheduled along the way.
    Continue(Vec<ResponseModifier>),

    /// A hook answered the request (or failed); send this and stop.
    Terminal(HookResponse),
}

/// Enumerates matching hooks for an event type and threads their results.
pub struct HookRunner {
    policy_store: Arc<PolicyStore>,
    executor: Arc<Executor>,
}

impl HookRunner {
    #[must_use]
    pub fn new(policy_store: Arc<PolicyStore>, executor: Arc<Executor>) -> Self {
        Self {
            policy_store,
            executor,
        }
    }

    /// Runs all hooks of `event_type` whose match rules pass for `request`.
    ///
    /// Execution stops early when a hook answers the request, fails, or asks
    /// for the rest of its chain to be skipped. Hook-dependent routes cannot
    /// operate without a policy, hence 503 in its absence.
    pub async fn run_all_matching_type(
        &self,
        event_type: EventType,
        request: &mut HookRequest,
    ) -> HookRunOutcome {
        let Some(policy) = self.policy_store.get() else {
            warn!("hook runner: service unavailable (missing policy)");
            return HookRunOutcome::Terminal(service_unavailable(
                "Policy does not exist (yet), cannot proceed",
            ));
        };

        let phase = if event_type.is_before() {
            Phase::Before
        } else {
            Phase::After
        };

        let mut executed_chain: Vec<String> = Vec::new();
        let mut modifiers: Vec<ResponseModifier> = Vec::new();

        for hook in &policy.hooks {
            if hook.event_type != Some(event_type) {
                continue;
            }

            let matched = match hook.matches_request(
                &request.method,
                &request.path,
                request.authenticated_user_id.as_deref(),
            ) {
                Ok(matched) => matched,
                Err(e) => {
                    // Bad regexes die at validation; hitting one here means
                    // the policy entered the store unvalidated somehow.
                    warn!(hook_id = %hook.id, error = %e, "hook match evaluation failed");
                    return HookRunOutcome::Terminal(service_unavailable(
                        "Hook execution failed, cannot proceed",
                    ));
                }
            };
            if !matched {
                continue;
            }

            executed_chain.push(hook.id.clone());
            info!(
                hook_id = %hook.id,
                event_type = ?event_type,
                chain = %chain_to_string(&executed_chain),
                "executing hook"
            );

            let result = self.executor.execute(hook, request, phase).await;
            modifiers.extend(result.response_modifiers);

            if let Some(error) = &result.processing_error {
                warn!(hook_id = %hook.id, error = %error, "hook processing error");
                return HookRunOutcome::Terminal(service_unavailable(
                    "Hook execution failed, cannot proceed",
                ));
            }

            if let Some(response) = result.response {
                info!(
                    chain = %chain_to_string(&executed_chain),
                    "hook delivered a response, not proceeding further"
                );
                return HookRunOutcome::Terminal(response);
            }

            if result.skip_next_hooks_in_chain {
                debug!(
                    chain = %chain_to_string(&executed_chain),
                    "hook requested skipping the rest of its chain"
                );
                break;
            }
        }

        HookRunOutcome::Continue(modifiers)
    }
}

fn service_unavailable(message: &str) -> HookResponse {
    let body = serde_json::to_vec(&warden_core::MatrixErrorBody::new(ERROR_UNKNOWN, message))
        .unwrap_or_default();
    HookResponse {
        status: 503,
        content_type: "application/json".to_owned(),
        body,
    }
}
