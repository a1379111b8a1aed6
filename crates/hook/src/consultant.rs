//! Consulting external REST services about in-flight requests.
//!
//! The service receives a JSON description of the intercepted request (and,
//! for after hooks, the upstream response) and answers with another hook in
//! the usual schema. That answer decides what happens next: rejection, a
//! canned response, pass-through, injection, or even another consultation.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::HookError;
use crate::exchange::{HookRequest, UpstreamResponse};
use crate::model::{Hook, HookAction};

/// Default deadline for a single consult call, overridable per hook.
pub const DEFAULT_CONSULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct ConsultingRequest<'a> {
    meta: ConsultingMeta<'a>,
    request: ConsultingRequestInfo<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<ConsultingResponseInfo<'a>>,
}

#[derive(Serialize)]
struct ConsultingMeta<'a> {
    #[serde(rename = "hookId")]
    hook_id: &'a str,
    #[serde(rename = "authenticatedMatrixUserId")]
    authenticated_matrix_user_id: Option<&'a str>,
}

#[derive(Serialize)]
struct ConsultingRequestInfo<'a> {
    #[serde(rename = "URI")]
    uri: &'a str,
    path: &'a str,
    method: &'a str,
    headers: &'a HashMap<String, String>,
    payload: String,
}

#[derive(Serialize)]
struct ConsultingResponseInfo<'a> {
    #[serde(rename = "statusCode")]
    status_code: u16,
    headers: &'a HashMap<String, String>,
    payload: String,
}

/// Calls hook-designated REST services, with retries, an async mode and a
/// contingency fallback.
#[derive(Clone)]
pub struct RestConsultant {
    default_timeout: Duration,
    client: reqwest::Client,
}

impl RestConsultant {
    #[must_use]
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            client: reqwest::Client::new(),
        }
    }

    /// Consults the service named by `hook` and returns the hook it answered
    /// with, ready for typeless execution (its event type is cleared so a
    /// before-phase consultation cannot smuggle in an after-hook
    /// registration).
    ///
    /// In async mode the call is fired in the background; the immediate
    /// result is the hook's `RESTServiceAsyncResultHook`, or pass-unmodified.
    pub async fn consult(
        &self,
        request: &HookRequest,
        response: Option<&UpstreamResponse>,
        hook: &Hook,
    ) -> Result<Hook, HookError> {
        let url = hook
            .rest_service_url
            .clone()
            .filter(|url| !url.is_empty())
            .ok_or(HookError::MissingActionField(
                hook.id.clone(),
                "a RESTServiceURL is required",
            ))?;

        // The payload is captured once, up front. Retries reuse it, and async
        // calls outlive the request they describe.
        let payload = self.build_payload(request, response, hook)?;

        if hook.rest_service_async {
            let consultant = self.clone();
            let background_hook = hook.clone();
            let background_url = url.clone();
            tokio::spawn(async move {
                if let Err(e) = consultant
                    .call_with_retries(&background_url, &background_hook, &payload)
                    .await
                {
                    warn!(url = %background_url, error = %e, "async REST consultation failed");
                }
            });

            let mut result = match &hook.rest_service_async_result_hook {
                Some(result_hook) => (**result_hook).clone(),
                None => Hook {
                    action: Some(HookAction::PassUnmodified),
                    ..Hook::default()
                },
            };
            result.event_type = None;
            return Ok(Self::name_response_hook(result, &hook.id));
        }

        match self.call_with_retries(&url, hook, &payload).await {
            Ok(mut answered) => {
                answered.event_type = None;
                Ok(Self::name_response_hook(answered, &hook.id))
            }
            Err(e) => match &hook.rest_service_contingency_hook {
                Some(contingency) => {
                    warn!(
                        url = %url,
                        error = %e,
                        "swallowing REST service error and responding with contingency hook"
                    );
                    let mut contingency = (**contingency).clone();
                    contingency.event_type = None;
                    Ok(Self::name_response_hook(contingency, &hook.id))
                }
                None => Err(e),
            },
        }
    }

    fn build_payload(
        &self,
        request: &HookRequest,
        response: Option<&UpstreamResponse>,
        hook: &Hook,
    ) -> Result<Vec<u8>, HookError> {
        let consulting = ConsultingRequest {
            meta: ConsultingMeta {
                hook_id: &hook.id,
                authenticated_matrix_user_id: request
                    .authenticated_user_id
                    .as_ref()
                    .map(warden_core::UserId::as_str),
            },
            request: ConsultingRequestInfo {
                uri: &request.uri,
                path: &request.path,
                method: &request.method,
                headers: &request.headers,
                payload: String::from_utf8_lossy(&request.body).into_owned(),
            },
            response: response.map(|response| ConsultingResponseInfo {
                status_code: response.status,
                headers: &response.headers,
                payload: String::from_utf8_lossy(&response.body).into_owned(),
            }),
        };

        Ok(serde_json::to_vec(&consulting)?)
    }

    async fn call_with_retries(
        &self,
        url: &str,
        hook: &Hook,
        payload: &[u8],
    ) -> Result<Hook, HookError> {
        let attempts = 1 + hook.rest_service_retry_attempts.unwrap_or(0);
        let timeout = hook
            .rest_service_request_timeout_ms
            .map_or(self.default_timeout, Duration::from_millis);
        let method = hook
            .rest_service_request_method
            .as_deref()
            .unwrap_or("POST")
            .parse::<reqwest::Method>()
            .map_err(|_| HookError::MissingActionField(hook.id.clone(), "bad request method"))?;

        let mut last_failure = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                if let Some(wait_ms) = hook.rest_service_retry_wait_time_ms {
                    debug!(wait_ms, "waiting before retrying REST consultation");
                    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                }
            }

            debug!(url, attempt, "consulting REST service");

            let mut builder = self
                .client
                .request(method.clone(), url)
                .timeout(timeout)
                .header("Content-Type", "application/json")
                .body(payload.to_vec());
            if let Some(headers) = &hook.rest_service_request_headers {
                for (name, value) in headers {
                    builder = builder.header(name, value);
                }
            }

            let response = match builder.send().await {
                Ok(response) => response,
                Err(e) => {
                    last_failure = format!("error fetching from URL: {e}");
                    warn!(url, attempt, error = %last_failure, "REST consultation failed");
                    continue;
                }
            };

            if response.status() != reqwest::StatusCode::OK {
                last_failure = format!("non-200 response: {}", response.status().as_u16());
                warn!(url, attempt, error = %last_failure, "REST consultation failed");
                continue;
            }

            let body = match response.bytes().await {
                Ok(body) => body,
                Err(e) => {
                    last_failure = format!("failed reading response body: {e}");
                    warn!(url, attempt, error = %last_failure, "REST consultation failed");
                    continue;
                }
            };

            match serde_json::from_slice::<Hook>(&body) {
                Ok(answered) => return Ok(answered),
                Err(e) => {
                    last_failure = format!("failed parsing hook out of response: {e}");
                    warn!(url, attempt, error = %last_failure, "REST consultation failed");
                }
            }
        }

        Err(HookError::ConsultFailed {
            url: url.to_owned(),
            attempts,
            reason: last_failure,
        })
    }

    /// Answered hooks often come back unnamed; give them a derived id so
    /// chains stay debuggable.
    fn name_response_hook(mut hook: Hook, parent_id: &str) -> Hook {
        if hook.id.is_empty() {
            hook.id = format!("{parent_id}-unnamed-response");
        }
        hook
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consult_hook(url: &str) -> Hook {
        Hook {
            id: "c1".to_owned(),
            action: Some(HookAction::ConsultRestServiceUrl),
            rest_service_url: Some(url.to_owned()),
            ..Hook::default()
        }
    }

    fn empty_request() -> HookRequest {
        HookRequest {
            uri: "/x?q=1".to_owned(),
            path: "/x".to_owned(),
            method: "POST".to_owned(),
            headers: HashMap::new(),
            body: b"{\"a\":1}".to_vec(),
            authenticated_user_id: None,
        }
    }

    #[tokio::test]
    async fn missing_url_is_an_error() {
        let consultant = RestConsultant::new(DEFAULT_CONSULT_TIMEOUT);
        let mut hook = consult_hook("http://irrelevant");
        hook.rest_service_url = None;
        let err = consultant
            .consult(&empty_request(), None, &hook)
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::MissingActionField(_, _)));
    }

    #[tokio::test]
    async fn unreachable_service_without_contingency_errors() {
        let consultant = RestConsultant::new(Duration::from_millis(200));
        // TEST-NET-1 address: connections fail fast.
        let hook = consult_hook("http://192.0.2.1:9/decide");
        let err = consultant
            .consult(&empty_request(), None, &hook)
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::ConsultFailed { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn unreachable_service_falls_back_to_contingency() {
        let consultant = RestConsultant::new(Duration::from_millis(200));
        let mut hook = consult_hook("http://192.0.2.1:9/decide");
        hook.rest_service_contingency_hook = Some(Box::new(Hook {
            action: Some(HookAction::Reject),
            rejection_error_code: Some("M_FORBIDDEN".to_owned()),
            rejection_error_message: Some("blocked".to_owned()),
            ..Hook::default()
        }));

        let answered = consultant
            .consult(&empty_request(), None, &hook)
            .await
            .unwrap();
        assert_eq!(answered.action, Some(HookAction::Reject));
        assert_eq!(answered.id, "c1-unnamed-response");
        assert_eq!(answered.event_type, None);
    }

    #[tokio::test]
    async fn async_mode_returns_result_hook_immediately() {
        let consultant = RestConsultant::new(Duration::from_millis(200));
        let mut hook = consult_hook("http://192.0.2.1:9/decide");
        hook.rest_service_async = true;
        hook.rest_service_async_result_hook = Some(Box::new(Hook {
            id: "async-result".to_owned(),
            action: Some(HookAction::PassUnmodified),
            ..Hook::default()
        }));

        let answered = consultant
            .consult(&empty_request(), None, &hook)
            .await
            .unwrap();
        assert_eq!(answered.id, "async-result");
        assert_eq!(answered.action, Some(HookAction::PassUnmodified));
    }

    #[tokio::test]
    async fn async_mode_defaults_to_pass_unmodified() {
        let consultant = RestConsultant::new(Duration::from_millis(200));
        let mut hook = consult_hook("http://192.0.2.1:9/decide");
        hook.rest_service_async = true;

        let answered = consultant
            .consult(&empty_request(), None, &hook)
            .await
            .unwrap();
        assert_eq!(answered.action, Some(HookAction::PassUnmodified));
    }
}
