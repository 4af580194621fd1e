use std::time::Duration;

use envconfig::Envconfig;

use crate::crd::KeyValue;
use crate::duration::parse_duration;

const DEFAULT_DEPENDENCY_REQUEUE: Duration = Duration::from_secs(30);

#[derive(Envconfig, Clone, Debug)]
pub struct ControllerConfig {
    /// Upper bound on reconciliations running at the same time.
    /// Env: CFN_MAX_CONCURRENT_RECONCILES
    #[envconfig(from = "CFN_MAX_CONCURRENT_RECONCILES", default = "4")]
    pub max_concurrent_reconciles: u16,

    /// Requeue delay for stacks whose dependencies are not Ready yet.
    /// Env: CFN_DEPENDENCY_REQUEUE_INTERVAL (e.g. "30s")
    #[envconfig(from = "CFN_DEPENDENCY_REQUEUE_INTERVAL", default = "30s")]
    pub dependency_requeue_interval: String,

    /// S3 bucket templates are uploaded to; templates are passed inline when unset.
    /// Env: CFN_TEMPLATE_BUCKET
    #[envconfig(from = "CFN_TEMPLATE_BUCKET")]
    pub template_bucket: Option<String>,

    /// Comma-separated key=value tags added to every stack (e.g. "team=infra,env=dev").
    /// Env: CFN_STACK_TAGS
    #[envconfig(from = "CFN_STACK_TAGS")]
    pub stack_tags: Option<String>,

    /// Only watch CloudFormationStack objects in this namespace when set.
    /// Env: CFN_WATCH_NAMESPACE
    #[envconfig(from = "CFN_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    #[envconfig(from = "AWS_REGION", default = "us-east-1")]
    pub default_region: String,

    #[envconfig(from = "POD_NAMESPACE", default = "default")]
    pub pod_namespace: String,

    #[envconfig(nested)]
    pub http: ArtifactHttpConfig,
}

/// Settings for downloading artifacts from the Flux source-controller.
#[derive(Envconfig, Clone, Debug)]
pub struct ArtifactHttpConfig {
    /// Replaces host:port of artifact URLs, for running outside the cluster.
    /// Env: SOURCE_CONTROLLER_LOCALHOST (e.g. "localhost:9090")
    #[envconfig(from = "SOURCE_CONTROLLER_LOCALHOST")]
    pub source_controller_localhost: Option<String>,

    #[envconfig(from = "CFN_HTTP_RETRY", default = "9")]
    pub retries: u32,

    #[envconfig(from = "CFN_HTTP_TIMEOUT_SECS", default = "60")]
    pub timeout_secs: u64,
}

impl Default for ArtifactHttpConfig {
    fn default() -> Self {
        Self {
            source_controller_localhost: None,
            retries: 9,
            timeout_secs: 60,
        }
    }
}

impl ControllerConfig {
    /// Falls back to 30s when the configured value does not parse.
    pub fn dependency_requeue(&self) -> Duration {
        parse_duration(&self.dependency_requeue_interval)
            .unwrap_or(DEFAULT_DEPENDENCY_REQUEUE)
    }

    pub fn default_tags(&self) -> Vec<KeyValue> {
        self.stack_tags
            .as_deref()
            .map(parse_tags)
            .unwrap_or_default()
    }

    pub fn template_bucket(&self) -> Option<&str> {
        self.template_bucket
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
    }
}

/// Parse `k=v,k2=v2` into tags, keeping declaration order.
/// Entries without `=` or with an empty key are skipped.
pub fn parse_tags(s: &str) -> Vec<KeyValue> {
    s.split(',')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            let k = k.trim();
            if k.is_empty() {
                return None;
            }
            Some(KeyValue::new(k, v.trim()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ControllerConfig {
        ControllerConfig {
            max_concurrent_reconciles: 4,
            dependency_requeue_interval: "30s".into(),
            template_bucket: None,
            stack_tags: None,
            watch_namespace: None,
            default_region: "us-east-1".into(),
            pod_namespace: "flux-system".into(),
            http: ArtifactHttpConfig::default(),
        }
    }

    #[test]
    fn parse_tags_keeps_order_and_duplicates() {
        let tags = parse_tags("team=infra, env = dev,broken,=x,team=ops");
        assert_eq!(
            tags,
            vec![
                KeyValue::new("team", "infra"),
                KeyValue::new("env", "dev"),
                KeyValue::new("team", "ops"),
            ]
        );
    }

    #[test]
    fn dependency_requeue_falls_back_on_garbage() {
        let mut cfg = base();
        assert_eq!(cfg.dependency_requeue(), Duration::from_secs(30));
        cfg.dependency_requeue_interval = "2m".into();
        assert_eq!(cfg.dependency_requeue(), Duration::from_secs(120));
        cfg.dependency_requeue_interval = "soon".into();
        assert_eq!(cfg.dependency_requeue(), Duration::from_secs(30));
        cfg.dependency_requeue_interval = "99999999999999999999h".into();
        assert_eq!(cfg.dependency_requeue(), Duration::from_secs(30));
    }

    #[test]
    fn blank_template_bucket_is_ignored() {
        let mut cfg = base();
        cfg.template_bucket = Some("  ".into());
        assert_eq!(cfg.template_bucket(), None);
        cfg.template_bucket = Some("my-templates".into());
        assert_eq!(cfg.template_bucket(), Some("my-templates"));
        assert!(cfg.default_tags().is_empty());
    }
}
