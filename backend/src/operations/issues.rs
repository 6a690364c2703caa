//! Issue and merge request creation.

use async_trait::async_trait;
use garde::Validate;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{parse_args, project_id_schema, put_opt, Operation};
use crate::error::Result;
use crate::gitlab::GitLabClient;
use crate::mcp::RequestContext;

/// Title prefix GitLab uses to mark a merge request as draft.
const DRAFT_PREFIX: &str = "Draft: ";

#[derive(Debug, Deserialize, Validate)]
pub struct CreateIssueArgs {
    #[serde(default, deserialize_with = "crate::operations::project_id")]
    #[garde(length(min = 1))]
    pub project_id: String,
    #[serde(default)]
    #[garde(length(min = 1))]
    pub title: String,
    #[garde(skip)]
    pub description: Option<String>,
    #[garde(skip)]
    pub labels: Option<Vec<String>>,
    #[garde(skip)]
    pub assignee_ids: Option<Vec<u64>>,
}

pub struct CreateIssue;

#[async_trait]
impl Operation for CreateIssue {
    fn name(&self) -> &'static str {
        "create_issue"
    }

    fn description(&self) -> &'static str {
        "Open a new issue in a project"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "project_id": project_id_schema(),
                "title": { "type": "string", "description": "Issue title" },
                "description": { "type": "string", "description": "Issue body (Markdown)" },
                "labels": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Labels to apply"
                },
                "assignee_ids": {
                    "type": "array",
                    "items": { "type": "integer" },
                    "description": "User IDs to assign"
                }
            },
            "required": ["project_id", "title"]
        })
    }

    async fn invoke(
        &self,
        ctx: &RequestContext,
        gitlab: &GitLabClient,
        args: Value,
    ) -> Result<Value> {
        let args: CreateIssueArgs = parse_args(args, &self.input_schema())?;
        info!("MCP: Creating issue on project {}", args.project_id);

        let mut body = json!({ "title": args.title });
        put_opt(&mut body, "description", args.description);
        // GitLab takes labels as one comma-separated string
        put_opt(&mut body, "labels", args.labels.map(|l| l.join(",")));
        put_opt(&mut body, "assignee_ids", args.assignee_ids);

        let path = format!("{}/issues", GitLabClient::project_path(&args.project_id));
        gitlab.post(ctx.credential(), &path, &body).await
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateMergeRequestArgs {
    #[serde(default, deserialize_with = "crate::operations::project_id")]
    #[garde(length(min = 1))]
    pub project_id: String,
    #[serde(default)]
    #[garde(length(min = 1))]
    pub title: String,
    #[serde(default)]
    #[garde(length(min = 1))]
    pub source_branch: String,
    #[serde(default)]
    #[garde(length(min = 1))]
    pub target_branch: String,
    #[garde(skip)]
    pub description: Option<String>,
    #[serde(default)]
    #[garde(skip)]
    pub draft: bool,
}

impl CreateMergeRequestArgs {
    fn upstream_title(&self) -> String {
        if self.draft && !self.title.starts_with(DRAFT_PREFIX) {
            format!("{}{}", DRAFT_PREFIX, self.title)
        } else {
            self.title.clone()
        }
    }
}

pub struct CreateMergeRequest;

#[async_trait]
impl Operation for CreateMergeRequest {
    fn name(&self) -> &'static str {
        "create_merge_request"
    }

    fn description(&self) -> &'static str {
        "Open a merge request between two branches"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "project_id": project_id_schema(),
                "title": { "type": "string", "description": "Merge request title" },
                "source_branch": { "type": "string", "description": "Branch with the changes" },
                "target_branch": { "type": "string", "description": "Branch to merge into" },
                "description": { "type": "string", "description": "Merge request body (Markdown)" },
                "draft": { "type": "boolean", "description": "Open as draft" }
            },
            "required": ["project_id", "title", "source_branch", "target_branch"]
        })
    }

    async fn invoke(
        &self,
        ctx: &RequestContext,
        gitlab: &GitLabClient,
        args: Value,
    ) -> Result<Value> {
        let args: CreateMergeRequestArgs = parse_args(args, &self.input_schema())?;
        info!(
            "MCP: Creating merge request {} -> {} on project {}",
            args.source_branch, args.target_branch, args.project_id
        );

        let mut body = json!({
            "title": args.upstream_title(),
            "source_branch": args.source_branch,
            "target_branch": args.target_branch,
        });
        put_opt(&mut body, "description", args.description);

        let path = format!(
            "{}/merge_requests",
            GitLabClient::project_path(&args.project_id)
        );
        gitlab.post(ctx.credential(), &path, &body).await
    }
}
