//! Hook execution: the per-action handlers and the response-modifier chain.

use std::collections::HashMap;
use std::ops::ControlFlow;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use warden_core::constants::ERROR_UNKNOWN;
use warden_core::MatrixErrorBody;

use crate::consultant::RestConsultant;
use crate::error::HookError;
use crate::exchange::{HookRequest, HookResponse, UpstreamResponse};
use crate::model::{Hook, HookAction};
use crate::result::{ExecutionResult, ResponseModifier};

/// Which side of the upstream dispatch a hook is being executed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Ahead of proxying; the hook may terminate or rewrite the request.
    Before,
    /// The hook is deferred into a response modifier and fires once the
    /// upstream has answered.
    After,
}

const JSON_CONTENT_TYPE: &str = "application/json";

/// Executes individual hooks and applies scheduled response modifiers.
pub struct Executor {
    consultant: RestConsultant,
}

impl Executor {
    #[must_use]
    pub fn new(consultant: RestConsultant) -> Self {
        Self { consultant }
    }

    /// Executes one hook against the in-flight request.
    ///
    /// Before-phase semantics: consultations are resolved right here (the
    /// answered hook runs in place), terminal actions land in
    /// [`ExecutionResult::response`], and request mutations happen directly
    /// on `request`.
    ///
    /// After-phase semantics: the hook is captured, together with the
    /// request as it looks right now, into a single response modifier. The
    /// actual handler runs when [`Executor::apply_response_modifiers`] fires.
    pub async fn execute(
        &self,
        hook: &Hook,
        request: &mut HookRequest,
        phase: Phase,
    ) -> ExecutionResult {
        let mut result = ExecutionResult::for_hook(hook);

        let Some(action) = hook.action else {
            return ExecutionResult::processing_error(
                hook,
                HookError::MissingAction(hook.id.clone()),
            );
        };

        if phase == Phase::After {
            if action != HookAction::PassUnmodified {
                result.response_modifiers.push(ResponseModifier::AfterHook {
                    hook: hook.clone(),
                    request: request.clone(),
                });
            }
            return result;
        }

        if action == HookAction::ConsultRestServiceUrl {
            let resolved = match self.resolve_consultations(hook, request, None).await {
                Ok(resolved) => resolved,
                Err(e) => return ExecutionResult::processing_error(hook, e),
            };
            self.run_before_action(&resolved, request, &mut result);
            return result;
        }

        self.run_before_action(hook, request, &mut result);
        result
    }

    /// Applies scheduled modifiers to the buffered upstream response, in
    /// schedule order. Each modifier sees its predecessors' mutations.
    ///
    /// Processing failures of after hooks displace the upstream response
    /// with a 503 and stop the chain. A JSON-injection attempt against a
    /// non-object body is returned as an error instead: the caller turns it
    /// into a bad-gateway response rather than silently forwarding data that
    /// defied expectations.
    pub async fn apply_response_modifiers(
        &self,
        modifiers: Vec<ResponseModifier>,
        response: &mut UpstreamResponse,
    ) -> Result<(), HookError> {
        for modifier in modifiers {
            match modifier {
                ResponseModifier::Inject {
                    hook_id,
                    json,
                    headers,
                } => {
                    debug!(hook_id = %hook_id, "injecting into upstream response");
                    inject_into_response(response, &json, &headers)?;
                }
                ResponseModifier::AfterHook { hook, request } => {
                    if let ControlFlow::Break(()) =
                        self.run_after_hook(&hook, &request, response).await?
                    {
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolves a (possibly nested) chain of consultations down to a
    /// non-consult hook.
    async fn resolve_consultations(
        &self,
        hook: &Hook,
        request: &HookRequest,
        response: Option<&UpstreamResponse>,
    ) -> Result<Hook, HookError> {
        let mut current = self.consultant.consult(request, response, hook).await?;

        while current.action == Some(HookAction::ConsultRestServiceUrl) {
            current = self.consultant.consult(request, response, &current).await?;
        }

        debug!(
            parent_hook = %hook.id,
            resolved_hook = %current.id,
            action = ?current.action,
            "REST service provided a new hook"
        );

        Ok(current)
    }

    fn run_before_action(
        &self,
        hook: &Hook,
        request: &mut HookRequest,
        result: &mut ExecutionResult,
    ) {
        result.skip_next_hooks_in_chain |= hook.skip_next_hooks_in_chain;

        let outcome = match hook.action {
            Some(HookAction::Respond) => {
                build_payload_response(hook).map(|response| result.response = Some(response))
            }
            Some(HookAction::Reject) => {
                build_rejection_response(hook).map(|response| result.response = Some(response))
            }
            Some(HookAction::PassModifiedRequest) => apply_request_injection(hook, request),
            Some(HookAction::PassModifiedResponse) => {
                schedule_response_injection(hook, result);
                Ok(())
            }
            Some(HookAction::PassUnmodified) | None => Ok(()),
            Some(HookAction::ConsultRestServiceUrl) => {
                // Consultations are resolved before dispatch lands here.
                Err(HookError::MissingActionField(
                    hook.id.clone(),
                    "unresolved consultation",
                ))
            }
        };

        if let Err(e) = outcome {
            result.processing_error = Some(e);
            result.skip_next_hooks_in_chain = true;
        }
    }

    /// Fires a deferred after hook against the live response.
    ///
    /// Returns `Break` when the chain must stop (the hook replaced the
    /// response, or its processing failed and a 503 took the response's
    /// place).
    async fn run_after_hook(
        &self,
        hook: &Hook,
        request: &HookRequest,
        response: &mut UpstreamResponse,
    ) -> Result<ControlFlow<()>, HookError> {
        let resolved = if hook.action == Some(HookAction::ConsultRestServiceUrl) {
            match self.resolve_consultations(hook, request, Some(&*response)).await {
                Ok(resolved) => resolved,
                Err(e) => {
                    warn!(hook_id = %hook.id, error = %e, "after-hook consultation failed");
                    serve_processing_error(response);
                    return Ok(ControlFlow::Break(()));
                }
            }
        } else {
            hook.clone()
        };

        match resolved.action {
            Some(HookAction::Respond) => match build_payload_response(&resolved) {
                Ok(hook_response) => {
                    serve_onto_response(response, &hook_response);
                    Ok(ControlFlow::Break(()))
                }
                Err(e) => {
                    warn!(hook_id = %resolved.id, error = %e, "after-hook respond failed");
                    serve_processing_error(response);
                    Ok(ControlFlow::Break(()))
                }
            },
            Some(HookAction::Reject) => match build_rejection_response(&resolved) {
                Ok(hook_response) => {
                    serve_onto_response(response, &hook_response);
                    Ok(ControlFlow::Break(()))
                }
                Err(e) => {
                    warn!(hook_id = %resolved.id, error = %e, "after-hook reject failed");
                    serve_processing_error(response);
                    Ok(ControlFlow::Break(()))
                }
            },
            Some(HookAction::PassModifiedResponse) => {
                let json = resolved.inject_json_into_response.clone().unwrap_or_default();
                let headers = resolved
                    .inject_headers_into_response
                    .clone()
                    .unwrap_or_default();
                inject_into_response(response, &json, &headers)?;
                Ok(ControlFlow::Continue(()))
            }
            Some(HookAction::PassUnmodified) => Ok(ControlFlow::Continue(())),
            Some(HookAction::PassModifiedRequest) => {
                warn!(
                    hook_id = %resolved.id,
                    "after hook tried to modify the request; too late for that"
                );
                serve_processing_error(response);
                Ok(ControlFlow::Break(()))
            }
            Some(HookAction::ConsultRestServiceUrl) | None => {
                serve_processing_error(response);
                Ok(ControlFlow::Break(()))
            }
        }
    }
}

/// Builds the terminal response for a `respond` hook.
fn build_payload_response(hook: &Hook) -> Result<HookResponse, HookError> {
    let status = hook.response_status_code.ok_or(HookError::MissingActionField(
        hook.id.clone(),
        "a response status code is required",
    ))?;

    let content_type = hook
        .response_content_type
        .clone()
        .unwrap_or_else(|| JSON_CONTENT_TYPE.to_owned());

    let body = if content_type != JSON_CONTENT_TYPE || hook.response_skip_payload_json_serialization
    {
        match &hook.response_payload {
            Some(Value::String(raw)) => raw.clone().into_bytes(),
            _ => return Err(HookError::PayloadNotAString(hook.id.clone())),
        }
    } else {
        serde_json::to_vec(hook.response_payload.as_ref().unwrap_or(&Value::Null))?
    };

    Ok(HookResponse {
        status,
        content_type,
        body,
    })
}

/// Builds the terminal response for a `reject` hook: a standard Matrix error
/// body, status 403 unless the hook says otherwise.
fn build_rejection_response(hook: &Hook) -> Result<HookResponse, HookError> {
    let errcode = hook
        .rejection_error_code
        .as_deref()
        .ok_or(HookError::MissingActionField(
            hook.id.clone(),
            "a rejection error code is required",
        ))?;
    let message = hook
        .rejection_error_message
        .as_deref()
        .ok_or(HookError::MissingActionField(
            hook.id.clone(),
            "a rejection error message is required",
        ))?;

    Ok(HookResponse {
        status: hook.response_status_code.unwrap_or(403),
        content_type: JSON_CONTENT_TYPE.to_owned(),
        body: serde_json::to_vec(&MatrixErrorBody::new(errcode, message))?,
    })
}

/// Merges the hook's JSON fields into the request body and injects headers.
/// A hook with nothing to inject degrades to pass-unmodified.
fn apply_request_injection(hook: &Hook, request: &mut HookRequest) -> Result<(), HookError> {
    let json = hook.inject_json_into_request.as_ref();
    let headers = hook.inject_headers_into_request.as_ref();

    let has_json = json.is_some_and(|m| !m.is_empty());
    let has_headers = headers.is_some_and(|m| !m.is_empty());
    if !has_json && !has_headers {
        return Ok(());
    }

    if has_json {
        let mut body: Map<String, Value> = serde_json::from_slice(&request.body)
            .map_err(|e| HookError::RequestBodyNotJsonObject(e.to_string()))?;
        for (key, value) in json.into_iter().flatten() {
            body.insert(key.clone(), value.clone());
        }
        request.set_body(serde_json::to_vec(&Value::Object(body))?);
    }

    for (name, value) in headers.into_iter().flatten() {
        request.headers.insert(name.clone(), value.clone());
    }

    Ok(())
}

/// Schedules a response-injection modifier for a `pass.modifiedResponse`
/// hook. An empty injection degrades to pass-unmodified.
fn schedule_response_injection(hook: &Hook, result: &mut ExecutionResult) {
    let json = hook.inject_json_into_response.clone().unwrap_or_default();
    let headers = hook.inject_headers_into_response.clone().unwrap_or_default();

    if json.is_empty() && headers.is_empty() {
        return;
    }

    result.response_modifiers.push(ResponseModifier::Inject {
        hook_id: hook.id.clone(),
        json,
        headers,
    });
}

/// Merges JSON fields and headers into the buffered upstream response.
fn inject_into_response(
    response: &mut UpstreamResponse,
    json: &Map<String, Value>,
    headers: &HashMap<String, String>,
) -> Result<(), HookError> {
    if !json.is_empty() {
        let mut body: Map<String, Value> = serde_json::from_slice(&response.body)
            .map_err(|e| HookError::ResponseBodyNotJsonObject(e.to_string()))?;
        for (key, value) in json {
            body.insert(key.clone(), value.clone());
        }
        response.set_body(serde_json::to_vec(&Value::Object(body))?);
    }

    for (name, value) in headers {
        response.headers.insert(name.clone(), value.clone());
    }

    Ok(())
}

/// Writes a terminal hook response over the upstream one.
fn serve_onto_response(response: &mut UpstreamResponse, hook_response: &HookResponse) {
    response.status = hook_response.status;
    response
        .headers
        .insert("Content-Type".to_owned(), hook_response.content_type.clone());
    response.set_body(hook_response.body.clone());
}

/// Displaces the upstream response with the canonical hook-failure answer.
fn serve_processing_error(response: &mut UpstreamResponse) {
    let body = serde_json::to_vec(&MatrixErrorBody::new(
        ERROR_UNKNOWN,
        "Hook execution failed, cannot proceed",
    ))
    .unwrap_or_default();

    response.status = 503;
    response
        .headers
        .insert("Content-Type".to_owned(), JSON_CONTENT_TYPE.to_owned());
    response.set_body(body);
}
