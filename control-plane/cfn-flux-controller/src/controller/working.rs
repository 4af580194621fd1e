use std::time::Duration;

use crate::cloud::{ChangeSetHandle, ChangeSetRequest, TemplateSource};
use crate::crd::{CloudFormationStackSpec, KeyValue};
use crate::duration::parse_duration;

use super::identity::change_set_name;

pub const TAG_PREFIX: &str = "cfn-flux-controller";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// Requeue delays declared on a stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Intervals {
    pub interval: Duration,
    pub poll: Duration,
    pub retry: Duration,
}

impl Intervals {
    pub fn from_spec(spec: &CloudFormationStackSpec) -> Result<Self, String> {
        let parse = |field: &str, raw: &str| {
            parse_duration(raw)
                .ok_or_else(|| format!("invalid {field} '{raw}'"))
        };
        let interval = parse("interval", &spec.interval)?;
        let poll = match spec.poll_interval.as_deref() {
            Some(raw) => parse("pollInterval", raw)?,
            None => DEFAULT_POLL_INTERVAL,
        };
        let retry = match spec.retry_interval.as_deref() {
            Some(raw) => parse("retryInterval", raw)?,
            None => DEFAULT_RETRY_INTERVAL,
        };
        Ok(Self {
            interval,
            poll,
            retry,
        })
    }

    /// Used when the declared intervals cannot be parsed.
    pub fn fallback() -> Self {
        Self {
            interval: DEFAULT_RETRY_INTERVAL,
            poll: DEFAULT_POLL_INTERVAL,
            retry: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// Tags applied to every stack: controller identity tags, operator
/// defaults, then the stack's own tags. Duplicate keys are kept.
pub fn stack_tags(
    object_name: &str,
    object_namespace: &str,
    defaults: &[KeyValue],
    user: &[KeyValue],
) -> Vec<KeyValue> {
    let mut tags = vec![
        KeyValue::new(
            format!("{TAG_PREFIX}/version"),
            env!("CARGO_PKG_VERSION"),
        ),
        KeyValue::new(format!("{TAG_PREFIX}/name"), object_name),
        KeyValue::new(format!("{TAG_PREFIX}/namespace"), object_namespace),
    ];
    tags.extend_from_slice(defaults);
    tags.extend_from_slice(user);
    tags
}

/// Everything one reconcile knows about the stack it is driving.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkingStack {
    pub object_name: String,
    pub object_namespace: String,
    pub stack_name: String,
    pub region: String,
    pub generation: i64,
    pub revision: String,
    /// Change set this reconcile should drive.
    pub change_set: ChangeSetHandle,
    pub template_body: String,
    pub bucket: Option<String>,
    pub parameters: Vec<KeyValue>,
    pub tags: Vec<KeyValue>,
}

pub struct WorkingStackInput<'a> {
    pub object_name: &'a str,
    pub object_namespace: &'a str,
    pub spec: &'a CloudFormationStackSpec,
    pub generation: i64,
    pub revision: &'a str,
    pub template_body: String,
    /// Handle persisted as `lastAttemptedChangeSet`.
    pub last_attempted: Option<&'a str>,
    pub default_region: &'a str,
    pub bucket: Option<&'a str>,
    pub default_tags: &'a [KeyValue],
}

impl WorkingStack {
    pub fn build(input: WorkingStackInput<'_>) -> Self {
        let name = change_set_name(input.generation, input.revision);
        // Reuse the recorded handle (and its ARN) only when it was derived
        // from the same generation and revision.
        let change_set = input
            .last_attempted
            .map(ChangeSetHandle::parse)
            .filter(|h| h.name == name)
            .unwrap_or_else(|| ChangeSetHandle::named(name));
        let region = input
            .spec
            .region
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(input.default_region)
            .to_string();
        Self {
            object_name: input.object_name.to_string(),
            object_namespace: input.object_namespace.to_string(),
            stack_name: input.spec.stack_name.clone(),
            region,
            generation: input.generation,
            revision: input.revision.to_string(),
            change_set,
            template_body: input.template_body,
            bucket: input.bucket.map(str::to_string),
            parameters: input.spec.stack_parameters.clone(),
            tags: stack_tags(
                input.object_name,
                input.object_namespace,
                input.default_tags,
                &input.spec.stack_tags,
            ),
        }
    }

    /// Object key of the uploaded template.
    pub fn template_key(&self) -> String {
        format!(
            "flux-{}-{}-{}.template",
            self.object_namespace, self.object_name, self.change_set.name
        )
    }

    pub fn change_set_request(&self, template: TemplateSource) -> ChangeSetRequest {
        ChangeSetRequest {
            region: self.region.clone(),
            stack_name: self.stack_name.clone(),
            change_set_name: self.change_set.name.clone(),
            template,
            parameters: self.parameters.clone(),
            tags: self.tags.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> CloudFormationStackSpec {
        CloudFormationStackSpec {
            stack_name: "app".into(),
            template_path: "stack.yaml".into(),
            interval: "10m".into(),
            stack_tags: vec![KeyValue::new("team", "web")],
            ..Default::default()
        }
    }

    fn input<'a>(
        spec: &'a CloudFormationStackSpec,
        last: Option<&'a str>,
    ) -> WorkingStackInput<'a> {
        WorkingStackInput {
            object_name: "app",
            object_namespace: "infra",
            spec,
            generation: 2,
            revision: "main@sha1:abc",
            template_body: "{}".into(),
            last_attempted: last,
            default_region: "us-east-1",
            bucket: None,
            default_tags: &[],
        }
    }

    #[test]
    fn intervals_default_and_reject_garbage() {
        let mut s = spec();
        let i = Intervals::from_spec(&s).unwrap();
        assert_eq!(i.interval, Duration::from_secs(600));
        assert_eq!(i.poll, DEFAULT_POLL_INTERVAL);
        assert_eq!(i.retry, DEFAULT_RETRY_INTERVAL);

        s.retry_interval = Some("later".into());
        let err = Intervals::from_spec(&s).unwrap_err();
        assert!(err.contains("retryInterval"));
    }

    #[test]
    fn tags_are_appended_in_order_without_dedup() {
        let tags = stack_tags(
            "app",
            "infra",
            &[KeyValue::new("team", "platform")],
            &[KeyValue::new("team", "web")],
        );
        let keys: Vec<_> = tags.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "cfn-flux-controller/version",
                "cfn-flux-controller/name",
                "cfn-flux-controller/namespace",
                "team",
                "team",
            ]
        );
        assert_eq!(tags[2].value, "infra");
    }

    #[test]
    fn stale_recorded_handle_is_not_reused() {
        let s = spec();
        let arn = "arn:aws:cloudformation:us-east-1:123456789012:changeSet/flux-1-main-sha1-old/1";
        let w = WorkingStack::build(input(&s, Some(arn)));
        assert_eq!(w.change_set, ChangeSetHandle::named("flux-2-main-sha1-abc"));

        let arn = "arn:aws:cloudformation:us-east-1:123456789012:changeSet/flux-2-main-sha1-abc/9";
        let w = WorkingStack::build(input(&s, Some(arn)));
        assert_eq!(w.change_set.id.as_deref(), Some(arn));
        assert_eq!(w.region, "us-east-1");
        assert_eq!(
            w.template_key(),
            "flux-infra-app-flux-2-main-sha1-abc.template"
        );
    }
}
