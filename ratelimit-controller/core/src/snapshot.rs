use ratelimit_controller_k8s_api::{RateLimits, ResourceExt, Selector};

/// Policy annotation recording the selector that was active when the policy
/// was last reconciled to completion.
pub const SELECTOR_ANNOTATION: &str = "rl-operator/last-selector";

pub fn encode(selector: &Selector) -> String {
    serde_json::to_string(selector).expect("selector must serialize")
}

/// Reads the last-applied selector from the policy, if one was recorded.
pub fn last_applied(policy: &RateLimits) -> Option<Result<Selector, serde_json::Error>> {
    let raw = policy.annotations().get(SELECTOR_ANNOTATION)?;
    if raw.is_empty() {
        return None;
    }
    Some(serde_json::from_str(raw))
}

/// Builds the merge patch that records `selector` on the policy.
///
/// The patch carries the resource version the policy was read at so that a
/// concurrent writer causes a conflict rather than a lost update.
pub fn patch(policy: &RateLimits, selector: &Selector) -> serde_json::Value {
    let mut annotations = serde_json::Map::new();
    annotations.insert(SELECTOR_ANNOTATION.to_string(), encode(selector).into());
    serde_json::json!({
        "metadata": {
            "resourceVersion": policy.resource_version(),
            "annotations": annotations,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratelimit_controller_k8s_api::RateLimitsSpec;

    fn mk_policy(annotation: Option<&str>) -> RateLimits {
        let mut policy = RateLimits::new(
            "limits",
            RateLimitsSpec {
                selector: Selector::from_iter(Some(("app", "web"))),
                env: None,
                rate_limits: serde_json::Value::Null,
            },
        );
        policy.metadata.resource_version = Some("7".to_string());
        if let Some(value) = annotation {
            policy
                .annotations_mut()
                .insert(SELECTOR_ANNOTATION.to_string(), value.to_string());
        }
        policy
    }

    #[test]
    fn absent_or_empty_annotation_has_no_snapshot() {
        assert!(last_applied(&mk_policy(None)).is_none());
        assert!(last_applied(&mk_policy(Some(""))).is_none());
    }

    #[test]
    fn reads_recorded_selector() {
        let policy = mk_policy(Some(r#"{"matchLabels":{"app":"api"}}"#));
        let selector = last_applied(&policy).unwrap().unwrap();
        assert_eq!(selector, Selector::from_iter(Some(("app", "api"))));

        assert!(last_applied(&mk_policy(Some("{not json"))).unwrap().is_err());
    }

    #[test]
    fn patch_carries_resource_version() {
        let policy = mk_policy(None);
        let patch = patch(&policy, &policy.spec.selector);
        assert_eq!(
            patch,
            serde_json::json!({
                "metadata": {
                    "resourceVersion": "7",
                    "annotations": {
                        "rl-operator/last-selector": r#"{"matchLabels":{"app":"web"}}"#,
                    },
                },
            })
        );
    }
}
