use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_cloudformation::error::ProvideErrorMetadata;
use aws_sdk_cloudformation::types::{
    Capability, ChangeSetType, Parameter, Tag,
};
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info};

use super::{
    ChangeSetDescription, ChangeSetHandle, ChangeSetRequest, ChangeSummary,
    CloudError, CloudFormationApi, CloudResult, StackDescription,
    TemplateSource, TemplateStore, format_err_chain, template_url,
};

/// CloudFormation client; one SDK client is derived per region from a shared config.
#[derive(Clone, Debug)]
pub struct AwsCloudFormation {
    sdk: SdkConfig,
}

impl AwsCloudFormation {
    pub fn new(sdk: SdkConfig) -> Self {
        Self { sdk }
    }

    fn client(&self, region: &str) -> aws_sdk_cloudformation::Client {
        let conf = aws_sdk_cloudformation::config::Builder::from(&self.sdk)
            .region(aws_sdk_cloudformation::config::Region::new(
                region.to_owned(),
            ))
            .build();
        aws_sdk_cloudformation::Client::from_conf(conf)
    }

    async fn create_change_set(
        &self,
        request: &ChangeSetRequest,
        kind: ChangeSetType,
    ) -> CloudResult<ChangeSetHandle> {
        let parameters = request
            .parameters
            .iter()
            .map(|p| {
                Parameter::builder()
                    .parameter_key(&p.key)
                    .parameter_value(&p.value)
                    .build()
            })
            .collect::<Vec<_>>();
        let tags = request
            .tags
            .iter()
            .map(|t| Tag::builder().key(&t.key).value(&t.value).build())
            .collect::<Vec<_>>();

        let mut call = self
            .client(&request.region)
            .create_change_set()
            .stack_name(&request.stack_name)
            .change_set_name(&request.change_set_name)
            .change_set_type(kind)
            .set_parameters(Some(parameters))
            .set_tags(Some(tags))
            .capabilities(Capability::CapabilityIam)
            .capabilities(Capability::CapabilityNamedIam)
            .capabilities(Capability::CapabilityAutoExpand);
        call = match &request.template {
            TemplateSource::Body(body) => call.template_body(body),
            TemplateSource::Url(url) => call.template_url(url),
        };

        let out = call
            .send()
            .await
            .map_err(|e| CloudError::Api(format_err_chain(&e)))?;

        let handle = ChangeSetHandle::named(&request.change_set_name);
        let handle = match out.id() {
            Some(id) => handle.with_id(id),
            None => handle,
        };
        info!(stack = %request.stack_name, change_set = %handle, "created change set");
        Ok(handle)
    }
}

fn is_missing_stack<E: ProvideErrorMetadata>(err: &E) -> bool {
    err.code() == Some("ValidationError")
        && err.message().is_some_and(|m| m.contains("does not exist"))
}

#[async_trait]
impl CloudFormationApi for AwsCloudFormation {
    async fn describe_stack(
        &self,
        region: &str,
        stack_name: &str,
    ) -> CloudResult<Option<StackDescription>> {
        let resp = match self
            .client(region)
            .describe_stacks()
            .stack_name(stack_name)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                let err = e.into_service_error();
                if is_missing_stack(&err) {
                    debug!(%stack_name, %region, "stack does not exist");
                    return Ok(None);
                }
                return Err(CloudError::Api(format_err_chain(&err)));
            }
        };

        let Some(stack) = resp.stacks().first() else {
            return Ok(None);
        };
        Ok(Some(StackDescription {
            stack_name: stack_name.to_string(),
            stack_id: stack.stack_id().map(str::to_string),
            status: stack
                .stack_status()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
            status_reason: stack.stack_status_reason().map(str::to_string),
        }))
    }

    async fn create_stack(
        &self,
        request: &ChangeSetRequest,
    ) -> CloudResult<ChangeSetHandle> {
        self.create_change_set(request, ChangeSetType::Create).await
    }

    async fn update_stack(
        &self,
        request: &ChangeSetRequest,
    ) -> CloudResult<ChangeSetHandle> {
        self.create_change_set(request, ChangeSetType::Update).await
    }

    async fn delete_stack(
        &self,
        region: &str,
        stack_name: &str,
    ) -> CloudResult<()> {
        self.client(region)
            .delete_stack()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| CloudError::Api(format_err_chain(&e)))?;
        info!(%stack_name, %region, "requested stack deletion");
        Ok(())
    }

    async fn continue_update_rollback(
        &self,
        region: &str,
        stack_name: &str,
    ) -> CloudResult<()> {
        self.client(region)
            .continue_update_rollback()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| CloudError::Api(format_err_chain(&e)))?;
        info!(%stack_name, %region, "requested rollback continuation");
        Ok(())
    }

    async fn describe_change_set(
        &self,
        region: &str,
        stack_name: &str,
        handle: &ChangeSetHandle,
    ) -> CloudResult<Option<ChangeSetDescription>> {
        let out = match self
            .client(region)
            .describe_change_set()
            .change_set_name(handle.reference())
            .stack_name(stack_name)
            .send()
            .await
        {
            Ok(out) => out,
            Err(e) => {
                let err = e.into_service_error();
                if err.is_change_set_not_found_exception()
                    || is_missing_stack(&err)
                {
                    return Ok(None);
                }
                return Err(CloudError::Api(format_err_chain(&err)));
            }
        };

        let mut found = ChangeSetHandle::named(
            out.change_set_name().unwrap_or(&handle.name),
        );
        if let Some(id) = out.change_set_id().or(handle.id.as_deref()) {
            found = found.with_id(id);
        }
        let changes = out
            .changes()
            .iter()
            .filter_map(|c| c.resource_change())
            .map(|rc| ChangeSummary {
                action: rc.action().map(|a| a.as_str().to_string()),
                logical_resource_id: rc
                    .logical_resource_id()
                    .map(str::to_string),
                resource_type: rc.resource_type().map(str::to_string),
            })
            .collect();

        Ok(Some(ChangeSetDescription {
            handle: found,
            status: out
                .status()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
            execution_status: out
                .execution_status()
                .map(|s| s.as_str().to_string()),
            status_reason: out.status_reason().map(str::to_string),
            changes,
        }))
    }

    async fn execute_change_set(
        &self,
        region: &str,
        stack_name: &str,
        handle: &ChangeSetHandle,
    ) -> CloudResult<()> {
        self.client(region)
            .execute_change_set()
            .change_set_name(handle.reference())
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| CloudError::Api(format_err_chain(&e)))?;
        info!(%stack_name, change_set = %handle, "executing change set");
        Ok(())
    }

    async fn delete_change_set(
        &self,
        region: &str,
        stack_name: &str,
        handle: &ChangeSetHandle,
    ) -> CloudResult<()> {
        self.client(region)
            .delete_change_set()
            .change_set_name(handle.reference())
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| CloudError::Api(format_err_chain(&e)))?;
        info!(%stack_name, change_set = %handle, "deleted change set");
        Ok(())
    }
}

/// Uploads templates to S3 in the stack's region.
#[derive(Clone, Debug)]
pub struct S3TemplateStore {
    sdk: SdkConfig,
}

impl S3TemplateStore {
    pub fn new(sdk: SdkConfig) -> Self {
        Self { sdk }
    }

    fn client(&self, region: &str) -> aws_sdk_s3::Client {
        let conf = aws_sdk_s3::config::Builder::from(&self.sdk)
            .region(aws_sdk_s3::config::Region::new(region.to_owned()))
            .build();
        aws_sdk_s3::Client::from_conf(conf)
    }
}

#[async_trait]
impl TemplateStore for S3TemplateStore {
    async fn upload_template(
        &self,
        bucket: &str,
        region: &str,
        key: &str,
        body: &[u8],
    ) -> CloudResult<String> {
        self.client(region)
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body.to_vec()))
            .send()
            .await
            .map_err(|e| {
                CloudError::Upload(format_err_chain(&e.into_service_error()))
            })?;
        debug!(%bucket, %key, %region, "uploaded template");
        Ok(template_url(bucket, region, key))
    }
}
