//! The hook document model, as it appears inside a policy.
//!
//! Field names mirror the JSON schema consumed from policy files and
//! produced by consulted REST services, so the same struct serves both.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::HookError;

/// Request-lifecycle points a hook can attach to.
///
/// `before*` hooks run ahead of the upstream dispatch and may terminate the
/// request. `after*` hooks run once the upstream response is in hand and may
/// replace or amend it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "beforeAnyRequest")]
    BeforeAnyRequest,
    #[serde(rename = "beforeAuthenticatedRequest")]
    BeforeAuthenticatedRequest,
    #[serde(rename = "beforeAuthenticatedPolicyCheckedRequest")]
    BeforeAuthenticatedPolicyCheckedRequest,
    #[serde(rename = "beforeUnauthenticatedRequest")]
    BeforeUnauthenticatedRequest,
    #[serde(rename = "afterAnyRequest")]
    AfterAnyRequest,
    #[serde(rename = "afterAuthenticatedRequest")]
    AfterAuthenticatedRequest,
    #[serde(rename = "afterAuthenticatedPolicyCheckedRequest")]
    AfterAuthenticatedPolicyCheckedRequest,
    #[serde(rename = "afterUnauthenticatedRequest")]
    AfterUnauthenticatedRequest,
}

impl EventType {
    #[must_use]
    pub fn is_before(self) -> bool {
        matches!(
            self,
            Self::BeforeAnyRequest
                | Self::BeforeAuthenticatedRequest
                | Self::BeforeAuthenticatedPolicyCheckedRequest
                | Self::BeforeUnauthenticatedRequest
        )
    }

    #[must_use]
    pub fn is_after(self) -> bool {
        !self.is_before()
    }
}

/// What happens when a hook matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HookAction {
    /// Delegate the decision to an external REST service, which answers with
    /// another hook to execute in place.
    #[serde(rename = "consult.RESTServiceURL")]
    ConsultRestServiceUrl,

    /// Answer the request with a fixed payload.
    #[serde(rename = "respond")]
    Respond,

    /// Answer the request with a standard Matrix error body.
    #[serde(rename = "reject")]
    Reject,

    /// Let the request through untouched.
    #[serde(rename = "pass.unmodified")]
    PassUnmodified,

    /// Let the request through after injecting JSON fields and headers into it.
    #[serde(rename = "pass.modifiedRequest")]
    PassModifiedRequest,

    /// Let the request through, then inject JSON fields and headers into the
    /// upstream response.
    #[serde(rename = "pass.modifiedResponse")]
    PassModifiedResponse,
}

/// What a single match rule inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchRuleKind {
    /// The HTTP method (GET, POST, ...).
    #[serde(rename = "method")]
    Method,
    /// The parsed request path (no query string).
    #[serde(rename = "route")]
    Route,
    /// The full Matrix id of the authenticated user, when known.
    #[serde(rename = "matrixUserID")]
    MatrixUserId,
}

/// One conjunctive predicate of a hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRule {
    #[serde(rename = "type")]
    pub kind: MatchRuleKind,

    #[serde(default)]
    pub regex: String,

    /// When set, the rule passes when the regex does *not* match.
    #[serde(default)]
    pub invert: bool,

    #[serde(skip)]
    compiled: OnceLock<Regex>,
}

impl MatchRule {
    #[must_use]
    pub fn new(kind: MatchRuleKind, regex: impl Into<String>) -> Self {
        Self {
            kind,
            regex: regex.into(),
            invert: false,
            compiled: OnceLock::new(),
        }
    }

    fn compiled(&self) -> Result<&Regex, HookError> {
        if let Some(regex) = self.compiled.get() {
            return Ok(regex);
        }
        let regex = Regex::new(&self.regex)
            .map_err(|e| HookError::InvalidMatchRuleRegex(self.regex.clone(), e.to_string()))?;
        Ok(self.compiled.get_or_init(|| regex))
    }

    /// Compiles the regex eagerly so that bad rules are caught at policy
    /// validation time rather than mid-request.
    pub fn validate(&self) -> Result<(), HookError> {
        self.compiled().map(|_| ())
    }

    /// Evaluates the rule against the request facts.
    ///
    /// A `matrixUserID` rule passes vacuously when the request carries no
    /// authenticated user.
    pub fn matches(
        &self,
        method: &str,
        path: &str,
        user_id: Option<&str>,
    ) -> Result<bool, HookError> {
        let regex = self.compiled()?;

        let mut is_match = match self.kind {
            MatchRuleKind::Method => regex.is_match(method),
            MatchRuleKind::Route => regex.is_match(path),
            MatchRuleKind::MatrixUserId => match user_id {
                Some(user_id) => regex.is_match(user_id),
                // No authenticated user to test against: the rule passes.
                None => return Ok(true),
            },
        };

        if self.invert {
            is_match = !is_match;
        }

        Ok(is_match)
    }
}

/// A conditional rule that intercepts a request at a named lifecycle point.
///
/// The action-specific payload fields are all optional on the wire; which of
/// them are required is decided by [`Hook::validate`] per action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Hook {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// Absent on hooks returned by consulted REST services: those execute
    /// "typeless", in the phase of the hook that provoked the consultation.
    #[serde(rename = "eventType", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<EventType>,

    #[serde(rename = "matchRules")]
    pub match_rules: Vec<MatchRule>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<HookAction>,

    /// Whether all later hooks in the same execution chain should be skipped.
    #[serde(rename = "skipNextHooksInChain")]
    pub skip_next_hooks_in_chain: bool,

    // -- consult.RESTServiceURL fields --
    #[serde(rename = "RESTServiceURL", skip_serializing_if = "Option::is_none")]
    pub rest_service_url: Option<String>,

    /// Request method for the consult call; POST when unset.
    #[serde(
        rename = "RESTServiceRequestMethod",
        skip_serializing_if = "Option::is_none"
    )]
    pub rest_service_request_method: Option<String>,

    #[serde(
        rename = "RESTServiceRequestHeaders",
        skip_serializing_if = "Option::is_none"
    )]
    pub rest_service_request_headers: Option<HashMap<String, String>>,

    #[serde(
        rename = "RESTServiceRequestTimeoutMilliseconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub rest_service_request_timeout_ms: Option<u64>,

    /// Additional attempts beyond the first.
    #[serde(
        rename = "RESTServiceRetryAttempts",
        skip_serializing_if = "Option::is_none"
    )]
    pub rest_service_retry_attempts: Option<u32>,

    #[serde(
        rename = "RESTServiceRetryWaitTimeMilliseconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub rest_service_retry_wait_time_ms: Option<u64>,

    /// Fire-and-forget mode: the consult call happens in the background and
    /// cannot influence the request.
    #[serde(rename = "RESTServiceAsync", skip_serializing_if = "std::ops::Not::not")]
    pub rest_service_async: bool,

    /// The hook to act on immediately when `RESTServiceAsync` is set.
    #[serde(
        rename = "RESTServiceAsyncResultHook",
        skip_serializing_if = "Option::is_none"
    )]
    pub rest_service_async_result_hook: Option<Box<Hook>>,

    /// Fallback hook when the REST service ultimately fails.
    #[serde(
        rename = "RESTServiceContingencyHook",
        skip_serializing_if = "Option::is_none"
    )]
    pub rest_service_contingency_hook: Option<Box<Hook>>,

    // -- respond fields (reject borrows the status code) --
    #[serde(rename = "responsePayload", skip_serializing_if = "Option::is_none")]
    pub response_payload: Option<Value>,

    /// When responding with `application/json`, skip serializing the payload
    /// and emit it as a raw string.
    #[serde(
        rename = "responseSkipPayloadJSONSerialization",
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub response_skip_payload_json_serialization: bool,

    #[serde(rename = "responseStatusCode", skip_serializing_if = "Option::is_none")]
    pub response_status_code: Option<u16>,

    /// Defaults to `application/json`.
    #[serde(rename = "responseContentType", skip_serializing_if = "Option::is_none")]
    pub response_content_type: Option<String>,

    // -- reject fields --
    #[serde(rename = "rejectionErrorCode", skip_serializing_if = "Option::is_none")]
    pub rejection_error_code: Option<String>,

    #[serde(
        rename = "rejectionErrorMessage",
        skip_serializing_if = "Option::is_none"
    )]
    pub rejection_error_message: Option<String>,

    // -- pass.modifiedRequest fields --
    #[serde(
        rename = "injectJSONIntoRequest",
        skip_serializing_if = "Option::is_none"
    )]
    pub inject_json_into_request: Option<Map<String, Value>>,

    #[serde(
        rename = "injectHeadersIntoRequest",
        skip_serializing_if = "Option::is_none"
    )]
    pub inject_headers_into_request: Option<HashMap<String, String>>,

    // -- pass.modifiedResponse fields --
    #[serde(
        rename = "injectJSONIntoResponse",
        skip_serializing_if = "Option::is_none"
    )]
    pub inject_json_into_response: Option<Map<String, Value>>,

    #[serde(
        rename = "injectHeadersIntoResponse",
        skip_serializing_if = "Option::is_none"
    )]
    pub inject_headers_into_response: Option<HashMap<String, String>>,
}

impl Hook {
    /// Validates a hook as found in a policy document.
    ///
    /// Hooks returned by consulted REST services are not routed through this:
    /// they have no id or event type and their action requirements are
    /// enforced at execution time instead.
    pub fn validate(&self) -> Result<(), HookError> {
        if self.id.is_empty() {
            return Err(HookError::Invalid("hook has no id".to_owned()));
        }

        let Some(event_type) = self.event_type else {
            return Err(HookError::Invalid(format!(
                "hook #{} has no event type",
                self.id
            )));
        };

        let Some(action) = self.action else {
            return Err(HookError::Invalid(format!(
                "hook #{} has no action",
                self.id
            )));
        };

        // Scheduling response modification from a before hook would work, but
        // it reads as a contradiction in the policy. Ask for it to be
        // declared as the after hook it really is.
        if event_type.is_before() && action == HookAction::PassModifiedResponse {
            return Err(HookError::Invalid(format!(
                "hook #{}: pass.modifiedResponse cannot be combined with a before event type",
                self.id
            )));
        }

        match action {
            HookAction::ConsultRestServiceUrl => {
                if self
                    .rest_service_url
                    .as_deref()
                    .is_none_or(str::is_empty)
                {
                    return Err(HookError::Invalid(format!(
                        "hook #{}: a RESTServiceURL is required",
                        self.id
                    )));
                }
            }
            HookAction::Respond => {
                if self.response_status_code.is_none() {
                    return Err(HookError::Invalid(format!(
                        "hook #{}: a response status code is required",
                        self.id
                    )));
                }
            }
            HookAction::Reject => {
                if self.rejection_error_code.is_none() || self.rejection_error_message.is_none() {
                    return Err(HookError::Invalid(format!(
                        "hook #{}: a rejection error code and message are required",
                        self.id
                    )));
                }
            }
            HookAction::PassModifiedRequest => {
                if self.inject_json_into_request.is_none() {
                    return Err(HookError::Invalid(format!(
                        "hook #{}: injectJSONIntoRequest is required",
                        self.id
                    )));
                }
            }
            HookAction::PassModifiedResponse => {
                if self.inject_json_into_response.is_none() {
                    return Err(HookError::Invalid(format!(
                        "hook #{}: injectJSONIntoResponse is required",
                        self.id
                    )));
                }
            }
            HookAction::PassUnmodified => {}
        }

        for (idx, rule) in self.match_rules.iter().enumerate() {
            rule.validate().map_err(|e| {
                HookError::Invalid(format!("hook #{} match rule #{idx}: {e}", self.id))
            })?;
        }

        Ok(())
    }

    /// Whether every match rule passes for the given request facts.
    pub fn matches_request(
        &self,
        method: &str,
        path: &str,
        user_id: Option<&str>,
    ) -> Result<bool, HookError> {
        for rule in &self.match_rules {
            if !rule.matches(method, path, user_id)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Renders an executed-hook chain for logging: `#h1 -> #h2`, or `none`.
#[must_use]
pub fn chain_to_string(hook_ids: &[String]) -> String {
    if hook_ids.is_empty() {
        return "none".to_owned();
    }
    hook_ids
        .iter()
        .map(|id| format!("#{id}"))
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reject_hook(id: &str, event_type: EventType) -> Hook {
        Hook {
            id: id.to_owned(),
            event_type: Some(event_type),
            action: Some(HookAction::Reject),
            rejection_error_code: Some("M_FORBIDDEN".to_owned()),
            rejection_error_message: Some("blocked".to_owned()),
            ..Hook::default()
        }
    }

    #[test]
    fn valid_reject_hook_passes_validation() {
        reject_hook("h1", EventType::BeforeAnyRequest).validate().unwrap();
    }

    #[test]
    fn hook_without_id_is_invalid() {
        let mut hook = reject_hook("h1", EventType::BeforeAnyRequest);
        hook.id = String::new();
        assert!(hook.validate().is_err());
    }

    #[test]
    fn reject_without_message_is_invalid() {
        let mut hook = reject_hook("h1", EventType::BeforeAnyRequest);
        hook.rejection_error_message = None;
        assert!(hook.validate().is_err());
    }

    #[test]
    fn before_hook_cannot_modify_response() {
        let hook = Hook {
            id: "h1".to_owned(),
            event_type: Some(EventType::BeforeAnyRequest),
            action: Some(HookAction::PassModifiedResponse),
            inject_json_into_response: Some(Map::new()),
            ..Hook::default()
        };
        assert!(hook.validate().is_err());

        let hook = Hook {
            event_type: Some(EventType::AfterAnyRequest),
            ..hook
        };
        hook.validate().unwrap();
    }

    #[test]
    fn consult_requires_url() {
        let hook = Hook {
            id: "h1".to_owned(),
            event_type: Some(EventType::BeforeAnyRequest),
            action: Some(HookAction::ConsultRestServiceUrl),
            rest_service_url: Some(String::new()),
            ..Hook::default()
        };
        assert!(hook.validate().is_err());
    }

    #[test]
    fn bad_regex_is_caught_at_validation() {
        let hook = Hook {
            id: "h1".to_owned(),
            event_type: Some(EventType::BeforeAnyRequest),
            action: Some(HookAction::PassUnmodified),
            match_rules: vec![MatchRule::new(MatchRuleKind::Route, "([")],
            ..Hook::default()
        };
        assert!(hook.validate().is_err());
    }

    #[test]
    fn match_rules_are_conjunctive() {
        let mut hook = reject_hook("h1", EventType::BeforeAnyRequest);
        hook.match_rules = vec![
            MatchRule::new(MatchRuleKind::Method, "^POST$"),
            MatchRule::new(MatchRuleKind::Route, "^/_matrix/client/r0/createRoom$"),
        ];

        assert!(hook
            .matches_request("POST", "/_matrix/client/r0/createRoom", None)
            .unwrap());
        assert!(!hook
            .matches_request("GET", "/_matrix/client/r0/createRoom", None)
            .unwrap());
        assert!(!hook.matches_request("POST", "/somewhere", None).unwrap());
    }

    #[test]
    fn inverted_rule_flips_the_match() {
        let mut rule = MatchRule::new(MatchRuleKind::MatrixUserId, "^@admin:");
        assert!(rule.matches("GET", "/x", Some("@admin:example.com")).unwrap());
        assert!(!rule.matches("GET", "/x", Some("@bob:example.com")).unwrap());

        rule.invert = true;
        assert!(!rule.matches("GET", "/x", Some("@admin:example.com")).unwrap());
        assert!(rule.matches("GET", "/x", Some("@bob:example.com")).unwrap());
    }

    #[test]
    fn user_rule_passes_for_anonymous_requests() {
        let rule = MatchRule::new(MatchRuleKind::MatrixUserId, "^@admin:");
        assert!(rule.matches("GET", "/x", None).unwrap());
    }

    #[test]
    fn wire_field_names_roundtrip() {
        let json = serde_json::json!({
            "id": "h1",
            "eventType": "beforeAnyRequest",
            "matchRules": [{"type": "route", "regex": "^/x", "invert": false}],
            "action": "consult.RESTServiceURL",
            "RESTServiceURL": "http://svc.local/decide",
            "RESTServiceRetryAttempts": 2,
            "RESTServiceContingencyHook": {
                "action": "reject",
                "rejectionErrorCode": "M_FORBIDDEN",
                "rejectionErrorMessage": "blocked"
            },
            "skipNextHooksInChain": true
        });
        let hook: Hook = serde_json::from_value(json).unwrap();
        assert_eq!(hook.event_type, Some(EventType::BeforeAnyRequest));
        assert_eq!(hook.action, Some(HookAction::ConsultRestServiceUrl));
        assert_eq!(hook.rest_service_retry_attempts, Some(2));
        assert!(hook.skip_next_hooks_in_chain);
        let contingency = hook.rest_service_contingency_hook.as_ref().unwrap();
        assert_eq!(contingency.action, Some(HookAction::Reject));

        let back = serde_json::to_value(&hook).unwrap();
        assert_eq!(back["RESTServiceURL"], "http://svc.local/decide");
        assert_eq!(back["matchRules"][0]["type"], "route");
    }

    #[test]
    fn chain_rendering() {
        assert_eq!(chain_to_string(&[]), "none");
        assert_eq!(
            chain_to_string(&["a".to_owned(), "b".to_owned()]),
            "#a -> #b"
        );
    }
}
