//! In-memory CloudFormation and template store used by tests and local runs.
//!
//! The fake is cooperative: a created change set is immediately
//! `CREATE_COMPLETE`/`AVAILABLE`, executing it completes the stack, and an
//! update whose template equals the applied one fails as "didn't contain
//! changes" like the real service does. Individual operations can be forced
//! to fail and every call is recorded.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    ChangeSetDescription, ChangeSetHandle, ChangeSetRequest, CloudError,
    CloudFormationApi, CloudResult, StackDescription, TemplateSource,
    TemplateStore, template_url,
};

const EMPTY_CHANGE_SET_REASON: &str = "The submitted information didn't contain changes. Submit different information to create a change set.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloudOp {
    DescribeStack,
    CreateStack,
    UpdateStack,
    DeleteStack,
    ContinueUpdateRollback,
    DescribeChangeSet,
    ExecuteChangeSet,
    DeleteChangeSet,
    UploadTemplate,
}

impl CloudOp {
    /// Whether the call changes remote state.
    pub fn is_mutating(self) -> bool {
        !matches!(self, CloudOp::DescribeStack | CloudOp::DescribeChangeSet)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloudCall {
    pub op: CloudOp,
    pub stack: String,
    pub change_set: Option<String>,
}

#[derive(Clone, Debug)]
struct MemStack {
    status: String,
    reason: Option<String>,
    template: Option<TemplateSource>,
}

#[derive(Clone, Debug)]
struct MemChangeSet {
    region: String,
    stack: String,
    name: String,
    status: String,
    execution_status: Option<String>,
    reason: Option<String>,
    is_create: bool,
    template: Option<TemplateSource>,
}

#[derive(Default)]
struct State {
    stacks: HashMap<(String, String), MemStack>,
    /// Keyed by change set id (ARN).
    change_sets: HashMap<String, MemChangeSet>,
    failures: HashMap<CloudOp, String>,
    calls: Vec<CloudCall>,
    seq: u64,
}

impl State {
    fn record(
        &mut self,
        op: CloudOp,
        stack: &str,
        change_set: Option<&str>,
    ) -> CloudResult<()> {
        self.calls.push(CloudCall {
            op,
            stack: stack.to_string(),
            change_set: change_set.map(str::to_string),
        });
        match self.failures.get(&op) {
            Some(msg) => Err(CloudError::Api(msg.clone())),
            None => Ok(()),
        }
    }

    fn find_change_set(
        &self,
        region: &str,
        stack: &str,
        handle: &ChangeSetHandle,
    ) -> Option<String> {
        if let Some(id) = &handle.id {
            return self.change_sets.contains_key(id).then(|| id.clone());
        }
        self.change_sets
            .iter()
            .find(|(_, cs)| {
                cs.region == region && cs.stack == stack && cs.name == handle.name
            })
            .map(|(id, _)| id.clone())
    }

    fn insert_change_set(&mut self, cs: MemChangeSet) -> ChangeSetHandle {
        self.seq += 1;
        let id = format!(
            "arn:aws:cloudformation:{}:123456789012:changeSet/{}/{}",
            cs.region, cs.name, self.seq
        );
        let handle = ChangeSetHandle::named(&cs.name).with_id(&id);
        self.change_sets.insert(id, cs);
        handle
    }
}

fn key(region: &str, stack: &str) -> (String, String) {
    (region.to_string(), stack.to_string())
}

#[derive(Clone, Default)]
pub struct MemoryCloudFormation {
    state: Arc<RwLock<State>>,
}

impl MemoryCloudFormation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a stack with an arbitrary status.
    pub async fn put_stack(
        &self,
        region: &str,
        stack: &str,
        status: &str,
        reason: Option<&str>,
    ) {
        let mut state = self.state.write().await;
        let entry = state.stacks.entry(key(region, stack)).or_insert(MemStack {
            status: String::new(),
            reason: None,
            template: None,
        });
        entry.status = status.to_string();
        entry.reason = reason.map(str::to_string);
    }

    /// Records the template the seeded stack was last deployed with.
    pub async fn put_stack_template(
        &self,
        region: &str,
        stack: &str,
        template: TemplateSource,
    ) {
        let mut state = self.state.write().await;
        if let Some(s) = state.stacks.get_mut(&key(region, stack)) {
            s.template = Some(template);
        }
    }

    /// Seeds a change set with arbitrary statuses.
    pub async fn put_change_set(
        &self,
        region: &str,
        stack: &str,
        name: &str,
        status: &str,
        execution_status: Option<&str>,
        reason: Option<&str>,
    ) -> ChangeSetHandle {
        let mut state = self.state.write().await;
        state.insert_change_set(MemChangeSet {
            region: region.to_string(),
            stack: stack.to_string(),
            name: name.to_string(),
            status: status.to_string(),
            execution_status: execution_status.map(str::to_string),
            reason: reason.map(str::to_string),
            is_create: false,
            template: None,
        })
    }

    /// Overrides the statuses of an existing change set.
    pub async fn set_change_set_status(
        &self,
        region: &str,
        stack: &str,
        handle: &ChangeSetHandle,
        status: &str,
        execution_status: Option<&str>,
        reason: Option<&str>,
    ) {
        let mut state = self.state.write().await;
        let Some(id) = state.find_change_set(region, stack, handle) else {
            return;
        };
        if let Some(cs) = state.change_sets.get_mut(&id) {
            cs.status = status.to_string();
            cs.execution_status = execution_status.map(str::to_string);
            cs.reason = reason.map(str::to_string);
        }
    }

    /// Makes every subsequent call of `op` fail with `message`.
    pub async fn fail(&self, op: CloudOp, message: &str) {
        self.state
            .write()
            .await
            .failures
            .insert(op, message.to_string());
    }

    pub async fn clear_failures(&self) {
        self.state.write().await.failures.clear();
    }

    pub async fn stack_status(&self, region: &str, stack: &str) -> Option<String> {
        self.state
            .read()
            .await
            .stacks
            .get(&key(region, stack))
            .map(|s| s.status.clone())
    }

    /// Number of change sets that currently exist for the stack.
    pub async fn change_set_count(&self, region: &str, stack: &str) -> usize {
        self.state
            .read()
            .await
            .change_sets
            .values()
            .filter(|cs| cs.region == region && cs.stack == stack)
            .count()
    }

    pub async fn calls(&self) -> Vec<CloudCall> {
        self.state.read().await.calls.clone()
    }

    pub async fn calls_of(&self, op: CloudOp) -> usize {
        self.state
            .read()
            .await
            .calls
            .iter()
            .filter(|c| c.op == op)
            .count()
    }

    pub async fn mutating_calls(&self) -> Vec<CloudCall> {
        self.state
            .read()
            .await
            .calls
            .iter()
            .filter(|c| c.op.is_mutating())
            .cloned()
            .collect()
    }

    async fn create_change_set(
        &self,
        op: CloudOp,
        request: &ChangeSetRequest,
    ) -> CloudResult<ChangeSetHandle> {
        let mut state = self.state.write().await;
        state.record(
            op,
            &request.stack_name,
            Some(&request.change_set_name),
        )?;
        let stack_key = key(&request.region, &request.stack_name);
        let is_create = op == CloudOp::CreateStack;

        let duplicate = state.change_sets.values().any(|cs| {
            cs.region == request.region
                && cs.stack == request.stack_name
                && cs.name == request.change_set_name
        });
        if duplicate {
            return Err(CloudError::Api(format!(
                "AlreadyExistsException: ChangeSet {} already exists",
                request.change_set_name
            )));
        }

        let (status, execution, reason) = if is_create {
            state.stacks.insert(
                stack_key,
                MemStack {
                    status: "REVIEW_IN_PROGRESS".into(),
                    reason: None,
                    template: None,
                },
            );
            ("CREATE_COMPLETE", "AVAILABLE", None)
        } else {
            let Some(stack) = state.stacks.get(&stack_key) else {
                return Err(CloudError::Api(format!(
                    "ValidationError: Stack [{}] does not exist",
                    request.stack_name
                )));
            };
            if stack.template.as_ref() == Some(&request.template) {
                ("FAILED", "UNAVAILABLE", Some(EMPTY_CHANGE_SET_REASON))
            } else {
                ("CREATE_COMPLETE", "AVAILABLE", None)
            }
        };

        Ok(state.insert_change_set(MemChangeSet {
            region: request.region.clone(),
            stack: request.stack_name.clone(),
            name: request.change_set_name.clone(),
            status: status.into(),
            execution_status: Some(execution.into()),
            reason: reason.map(str::to_string),
            is_create,
            template: Some(request.template.clone()),
        }))
    }
}

#[async_trait]
impl CloudFormationApi for MemoryCloudFormation {
    async fn describe_stack(
        &self,
        region: &str,
        stack_name: &str,
    ) -> CloudResult<Option<StackDescription>> {
        let mut state = self.state.write().await;
        state.record(CloudOp::DescribeStack, stack_name, None)?;
        Ok(state.stacks.get(&key(region, stack_name)).map(|s| {
            StackDescription {
                stack_name: stack_name.to_string(),
                stack_id: Some(format!(
                    "arn:aws:cloudformation:{region}:123456789012:stack/{stack_name}/1"
                )),
                status: s.status.clone(),
                status_reason: s.reason.clone(),
            }
        }))
    }

    async fn create_stack(
        &self,
        request: &ChangeSetRequest,
    ) -> CloudResult<ChangeSetHandle> {
        self.create_change_set(CloudOp::CreateStack, request).await
    }

    async fn update_stack(
        &self,
        request: &ChangeSetRequest,
    ) -> CloudResult<ChangeSetHandle> {
        self.create_change_set(CloudOp::UpdateStack, request).await
    }

    async fn delete_stack(
        &self,
        region: &str,
        stack_name: &str,
    ) -> CloudResult<()> {
        let mut state = self.state.write().await;
        state.record(CloudOp::DeleteStack, stack_name, None)?;
        state.stacks.remove(&key(region, stack_name));
        state
            .change_sets
            .retain(|_, cs| !(cs.region == region && cs.stack == stack_name));
        Ok(())
    }

    async fn continue_update_rollback(
        &self,
        region: &str,
        stack_name: &str,
    ) -> CloudResult<()> {
        let mut state = self.state.write().await;
        state.record(CloudOp::ContinueUpdateRollback, stack_name, None)?;
        match state.stacks.get_mut(&key(region, stack_name)) {
            Some(s) => {
                s.status = "UPDATE_ROLLBACK_COMPLETE".into();
                s.reason = None;
                Ok(())
            }
            None => Err(CloudError::Api(format!(
                "ValidationError: Stack [{stack_name}] does not exist"
            ))),
        }
    }

    async fn describe_change_set(
        &self,
        region: &str,
        stack_name: &str,
        handle: &ChangeSetHandle,
    ) -> CloudResult<Option<ChangeSetDescription>> {
        let mut state = self.state.write().await;
        state.record(
            CloudOp::DescribeChangeSet,
            stack_name,
            Some(handle.reference()),
        )?;
        let Some(id) = state.find_change_set(region, stack_name, handle) else {
            return Ok(None);
        };
        Ok(state.change_sets.get(&id).map(|cs| ChangeSetDescription {
            handle: ChangeSetHandle::named(&cs.name).with_id(&id),
            status: cs.status.clone(),
            execution_status: cs.execution_status.clone(),
            status_reason: cs.reason.clone(),
            changes: vec![],
        }))
    }

    async fn execute_change_set(
        &self,
        region: &str,
        stack_name: &str,
        handle: &ChangeSetHandle,
    ) -> CloudResult<()> {
        let mut state = self.state.write().await;
        state.record(
            CloudOp::ExecuteChangeSet,
            stack_name,
            Some(handle.reference()),
        )?;
        let missing = || {
            CloudError::Api(format!(
                "ChangeSetNotFoundException: ChangeSet [{handle}] does not exist"
            ))
        };
        let Some(id) = state.find_change_set(region, stack_name, handle) else {
            return Err(missing());
        };
        let Some(cs) = state.change_sets.get_mut(&id) else {
            return Err(missing());
        };
        if cs.execution_status.as_deref() != Some("AVAILABLE") {
            return Err(CloudError::Api(format!(
                "InvalidChangeSetStatus: change set {} cannot be executed in its current status",
                cs.name
            )));
        }
        cs.execution_status = Some("EXECUTE_COMPLETE".into());
        let is_create = cs.is_create;
        let template = cs.template.clone();
        if let Some(stack) = state.stacks.get_mut(&key(region, stack_name)) {
            stack.status = if is_create {
                "CREATE_COMPLETE".into()
            } else {
                "UPDATE_COMPLETE".into()
            };
            stack.reason = None;
            stack.template = template;
        }
        Ok(())
    }

    async fn delete_change_set(
        &self,
        region: &str,
        stack_name: &str,
        handle: &ChangeSetHandle,
    ) -> CloudResult<()> {
        let mut state = self.state.write().await;
        state.record(
            CloudOp::DeleteChangeSet,
            stack_name,
            Some(handle.reference()),
        )?;
        if let Some(id) = state.find_change_set(region, stack_name, handle) {
            state.change_sets.remove(&id);
        }
        Ok(())
    }
}

/// Keeps uploaded templates in memory, keyed by their URL.
#[derive(Clone, Default)]
pub struct MemoryTemplateStore {
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    failure: Arc<RwLock<Option<String>>>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail(&self, message: &str) {
        *self.failure.write().await = Some(message.to_string());
    }

    pub async fn get(&self, url: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(url).cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }
}

#[async_trait]
impl TemplateStore for MemoryTemplateStore {
    async fn upload_template(
        &self,
        bucket: &str,
        region: &str,
        key: &str,
        body: &[u8],
    ) -> CloudResult<String> {
        if let Some(msg) = self.failure.read().await.as_ref() {
            return Err(CloudError::Upload(msg.clone()));
        }
        let url = template_url(bucket, region, key);
        self.objects.write().await.insert(url.clone(), body.to_vec());
        Ok(url)
    }
}
