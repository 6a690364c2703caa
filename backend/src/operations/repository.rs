//! Repository content operations: files, commits and branches.

use async_trait::async_trait;
use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{parse_args, project_id_schema, put_opt, Operation};
use crate::error::{GatewayError, Result};
use crate::gitlab::GitLabClient;
use crate::mcp::RequestContext;

/// Ref used when a read does not name one.
const DEFAULT_REF: &str = "HEAD";

#[derive(Debug, Deserialize, Validate)]
pub struct GetFileContentsArgs {
    #[serde(default, deserialize_with = "crate::operations::project_id")]
    #[garde(length(min = 1))]
    pub project_id: String,
    #[serde(default)]
    #[garde(length(min = 1))]
    pub file_path: String,
    #[garde(skip)]
    pub r#ref: Option<String>,
}

pub struct GetFileContents;

#[async_trait]
impl Operation for GetFileContents {
    fn name(&self) -> &'static str {
        "get_file_contents"
    }

    fn description(&self) -> &'static str {
        "Read a file from a project's repository"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "project_id": project_id_schema(),
                "file_path": { "type": "string", "description": "Path of the file in the repository" },
                "ref": { "type": "string", "description": "Branch, tag or commit (default HEAD)" }
            },
            "required": ["project_id", "file_path"]
        })
    }

    async fn invoke(
        &self,
        ctx: &RequestContext,
        gitlab: &GitLabClient,
        args: Value,
    ) -> Result<Value> {
        let args: GetFileContentsArgs = parse_args(args, &self.input_schema())?;
        let path = GitLabClient::file_path(&args.project_id, &args.file_path);
        let git_ref = args.r#ref.unwrap_or_else(|| DEFAULT_REF.to_string());
        gitlab.get(ctx.credential(), &path, &[("ref", git_ref)]).await
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrUpdateFileArgs {
    #[serde(default, deserialize_with = "crate::operations::project_id")]
    #[garde(length(min = 1))]
    pub project_id: String,
    #[serde(default)]
    #[garde(length(min = 1))]
    pub file_path: String,
    #[garde(required)]
    pub content: Option<String>,
    #[serde(default)]
    #[garde(length(min = 1))]
    pub commit_message: String,
    #[serde(default)]
    #[garde(length(min = 1))]
    pub branch: String,
    #[garde(skip)]
    pub previous_path: Option<String>,
}

pub struct CreateOrUpdateFile;

#[async_trait]
impl Operation for CreateOrUpdateFile {
    fn name(&self) -> &'static str {
        "create_or_update_file"
    }

    fn description(&self) -> &'static str {
        "Create a file, or update it if it already exists on the branch"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "project_id": project_id_schema(),
                "file_path": { "type": "string", "description": "Path of the file in the repository" },
                "content": { "type": "string", "description": "New file content" },
                "commit_message": { "type": "string", "description": "Commit message" },
                "branch": { "type": "string", "description": "Branch to commit to" },
                "previous_path": { "type": "string", "description": "Old path when moving the file" }
            },
            "required": ["project_id", "file_path", "content", "commit_message", "branch"]
        })
    }

    /// Probes for the file, then creates or updates it.
    ///
    /// The probe and the write are two separate upstream calls: a concurrent
    /// writer can create or delete the file in between, in which case the
    /// write fails upstream and the error is returned as is.
    async fn invoke(
        &self,
        ctx: &RequestContext,
        gitlab: &GitLabClient,
        args: Value,
    ) -> Result<Value> {
        let args: CreateOrUpdateFileArgs = parse_args(args, &self.input_schema())?;
        let path = GitLabClient::file_path(&args.project_id, &args.file_path);

        let exists = match gitlab
            .get(ctx.credential(), &path, &[("ref", args.branch.clone())])
            .await
        {
            Ok(_) => true,
            Err(GatewayError::Upstream { status: 404, .. }) => false,
            Err(e) => return Err(e),
        };
        debug!(
            "MCP: File {} {} on {}",
            args.file_path,
            if exists { "exists" } else { "is new" },
            args.branch
        );

        let mut body = json!({
            "branch": args.branch,
            "content": args.content.unwrap_or_default(),
            "commit_message": args.commit_message,
        });
        put_opt(&mut body, "previous_path", args.previous_path);

        if exists {
            gitlab.put(ctx.credential(), &path, &body).await
        } else {
            gitlab.post(ctx.credential(), &path, &body).await
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Create,
    Update,
    Delete,
    Move,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PushFile {
    #[serde(default)]
    #[garde(length(min = 1))]
    pub file_path: String,
    #[garde(custom(content_for(&self.action)))]
    pub content: Option<String>,
    #[garde(skip)]
    pub action: Option<FileAction>,
    #[garde(skip)]
    pub previous_path: Option<String>,
}

impl FileAction {
    fn needs_content(self) -> bool {
        matches!(self, FileAction::Create | FileAction::Update)
    }
}

/// Content is required for create and update actions, the default being create.
fn content_for(
    action: &Option<FileAction>,
) -> impl FnOnce(&Option<String>, &()) -> garde::Result + '_ {
    move |content, _| {
        let needs_content = action.unwrap_or(FileAction::Create).needs_content();
        if needs_content && content.is_none() {
            return Err(garde::Error::new("not set"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct PushFilesArgs {
    #[serde(default, deserialize_with = "crate::operations::project_id")]
    #[garde(length(min = 1))]
    pub project_id: String,
    #[serde(default)]
    #[garde(length(min = 1))]
    pub branch: String,
    #[serde(default)]
    #[garde(length(min = 1))]
    pub commit_message: String,
    #[serde(default)]
    #[garde(length(min = 1), dive)]
    pub files: Vec<PushFile>,
}

pub struct PushFiles;

#[async_trait]
impl Operation for PushFiles {
    fn name(&self) -> &'static str {
        "push_files"
    }

    fn description(&self) -> &'static str {
        "Commit several files to a branch in a single commit"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "project_id": project_id_schema(),
                "branch": { "type": "string", "description": "Branch to commit to" },
                "commit_message": { "type": "string", "description": "Commit message" },
                "files": {
                    "type": "array",
                    "minItems": 1,
                    "items": {
                        "type": "object",
                        "properties": {
                            "file_path": { "type": "string" },
                            "content": { "type": "string" },
                            "action": {
                                "type": "string",
                                "enum": ["create", "update", "delete", "move"],
                                "description": "Defaults to create"
                            },
                            "previous_path": { "type": "string" }
                        },
                        "required": ["file_path"],
                        "description": "content is required for create and update"
                    }
                }
            },
            "required": ["project_id", "branch", "commit_message", "files"]
        })
    }

    async fn invoke(
        &self,
        ctx: &RequestContext,
        gitlab: &GitLabClient,
        args: Value,
    ) -> Result<Value> {
        let args: PushFilesArgs = parse_args(args, &self.input_schema())?;
        info!(
            "MCP: Pushing {} file(s) to {} on project {}",
            args.files.len(),
            args.branch,
            args.project_id
        );

        let actions: Vec<Value> = args
            .files
            .into_iter()
            .map(|file| {
                let mut action = json!({
                    "action": file.action.unwrap_or(FileAction::Create),
                    "file_path": file.file_path,
                });
                put_opt(&mut action, "content", file.content);
                put_opt(&mut action, "previous_path", file.previous_path);
                action
            })
            .collect();

        let body = json!({
            "branch": args.branch,
            "commit_message": args.commit_message,
            "actions": actions,
        });
        let path = format!(
            "{}/repository/commits",
            GitLabClient::project_path(&args.project_id)
        );
        gitlab.post(ctx.credential(), &path, &body).await
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBranchArgs {
    #[serde(default, deserialize_with = "crate::operations::project_id")]
    #[garde(length(min = 1))]
    pub project_id: String,
    #[serde(default)]
    #[garde(length(min = 1))]
    pub branch: String,
    #[serde(default)]
    #[garde(length(min = 1))]
    pub r#ref: String,
}

pub struct CreateBranch;

#[async_trait]
impl Operation for CreateBranch {
    fn name(&self) -> &'static str {
        "create_branch"
    }

    fn description(&self) -> &'static str {
        "Create a branch from an existing ref"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "project_id": project_id_schema(),
                "branch": { "type": "string", "description": "Name of the new branch" },
                "ref": { "type": "string", "description": "Branch, tag or commit to branch from" }
            },
            "required": ["project_id", "branch", "ref"]
        })
    }

    async fn invoke(
        &self,
        ctx: &RequestContext,
        gitlab: &GitLabClient,
        args: Value,
    ) -> Result<Value> {
        let args: CreateBranchArgs = parse_args(args, &self.input_schema())?;
        info!(
            "MCP: Creating branch {} from {} on project {}",
            args.branch, args.r#ref, args.project_id
        );
        let path = format!(
            "{}/repository/branches",
            GitLabClient::project_path(&args.project_id)
        );
        let body = json!({ "branch": args.branch, "ref": args.r#ref });
        gitlab.post(ctx.credential(), &path, &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::test_support::context;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_create_branch_without_branch_makes_no_upstream_call() {
        let mut server = mockito::Server::new_async().await;
        let never = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let (_store, ctx, gitlab) = context(&server.url(), "tok");
        let err = CreateBranch
            .invoke(&ctx, &gitlab, json!({"project_id": 7, "ref": "main"}))
            .await
            .unwrap_err();

        match err {
            GatewayError::InvalidArgument(violations) => {
                assert_eq!(violations.len(), 1);
                assert_eq!(violations[0].field, "branch");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        never.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_or_update_file_creates_when_missing() {
        let mut server = mockito::Server::new_async().await;
        let probe = server
            .mock("GET", "/projects/7/repository/files/docs%2FREADME.md")
            .match_query(Matcher::UrlEncoded("ref".into(), "main".into()))
            .with_status(404)
            .with_body(r#"{"message": "404 File Not Found"}"#)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/projects/7/repository/files/docs%2FREADME.md")
            .match_body(Matcher::PartialJson(json!({"branch": "main", "content": "hi"})))
            .with_status(201)
            .with_body(r#"{"file_path": "docs/README.md", "branch": "main"}"#)
            .create_async()
            .await;

        let (_store, ctx, gitlab) = context(&server.url(), "tok");
        let result = CreateOrUpdateFile
            .invoke(
                &ctx,
                &gitlab,
                json!({
                    "project_id": "7",
                    "file_path": "docs/README.md",
                    "content": "hi",
                    "commit_message": "Add readme",
                    "branch": "main"
                }),
            )
            .await
            .unwrap();

        assert_eq!(result["file_path"], "docs/README.md");
        probe.assert_async().await;
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_or_update_file_updates_when_present() {
        let mut server = mockito::Server::new_async().await;
        let _probe = server
            .mock("GET", "/projects/7/repository/files/a.txt")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"file_path": "a.txt"}"#)
            .create_async()
            .await;
        let update = server
            .mock("PUT", "/projects/7/repository/files/a.txt")
            .with_status(200)
            .with_body(r#"{"file_path": "a.txt", "branch": "dev"}"#)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/projects/7/repository/files/a.txt")
            .expect(0)
            .create_async()
            .await;

        let (_store, ctx, gitlab) = context(&server.url(), "tok");
        CreateOrUpdateFile
            .invoke(
                &ctx,
                &gitlab,
                json!({
                    "project_id": 7,
                    "file_path": "a.txt",
                    "content": "v2",
                    "commit_message": "Update",
                    "branch": "dev"
                }),
            )
            .await
            .unwrap();

        update.assert_async().await;
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_or_update_file_propagates_probe_failure() {
        let mut server = mockito::Server::new_async().await;
        let _probe = server
            .mock("GET", "/projects/7/repository/files/a.txt")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body(r#"{"message": "403 Forbidden"}"#)
            .create_async()
            .await;

        let (_store, ctx, gitlab) = context(&server.url(), "tok");
        let err = CreateOrUpdateFile
            .invoke(
                &ctx,
                &gitlab,
                json!({
                    "project_id": 7,
                    "file_path": "a.txt",
                    "content": "v2",
                    "commit_message": "Update",
                    "branch": "dev"
                }),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Upstream { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_push_files_builds_commit_actions() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/projects/7/repository/commits")
            .match_body(Matcher::Json(json!({
                "branch": "main",
                "commit_message": "Bulk",
                "actions": [
                    {"action": "create", "file_path": "a.txt", "content": "A"},
                    {"action": "update", "file_path": "b.txt", "content": "B"}
                ]
            })))
            .with_status(201)
            .with_body(r#"{"id": "abc123"}"#)
            .create_async()
            .await;

        let (_store, ctx, gitlab) = context(&server.url(), "tok");
        let result = PushFiles
            .invoke(
                &ctx,
                &gitlab,
                json!({
                    "project_id": 7,
                    "branch": "main",
                    "commit_message": "Bulk",
                    "files": [
                        {"file_path": "a.txt", "content": "A"},
                        {"file_path": "b.txt", "content": "B", "action": "update"}
                    ]
                }),
            )
            .await
            .unwrap();

        assert_eq!(result["id"], "abc123");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_or_update_file_requires_content() {
        let mut server = mockito::Server::new_async().await;
        let mut never = Vec::new();
        for method in ["GET", "POST", "PUT"] {
            never.push(
                server
                    .mock(method, Matcher::Any)
                    .expect(0)
                    .create_async()
                    .await,
            );
        }

        let (_store, ctx, gitlab) = context(&server.url(), "tok");
        let err = CreateOrUpdateFile
            .invoke(
                &ctx,
                &gitlab,
                json!({
                    "project_id": 1,
                    "file_path": "a.txt",
                    "commit_message": "m",
                    "branch": "main"
                }),
            )
            .await
            .unwrap_err();

        let GatewayError::InvalidArgument(violations) = err else {
            panic!("expected InvalidArgument");
        };
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "content");
        for mock in never {
            mock.assert_async().await;
        }
    }

    #[tokio::test]
    async fn test_create_or_update_file_accepts_empty_content() {
        let mut server = mockito::Server::new_async().await;
        let _probe = server
            .mock("GET", "/projects/1/repository/files/empty.txt")
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/projects/1/repository/files/empty.txt")
            .match_body(Matcher::PartialJson(json!({"content": ""})))
            .with_status(201)
            .with_body(r#"{"file_path": "empty.txt"}"#)
            .create_async()
            .await;

        let (_store, ctx, gitlab) = context(&server.url(), "tok");
        CreateOrUpdateFile
            .invoke(
                &ctx,
                &gitlab,
                json!({
                    "project_id": 1,
                    "file_path": "empty.txt",
                    "content": "",
                    "commit_message": "m",
                    "branch": "main"
                }),
            )
            .await
            .unwrap();
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_push_files_content_depends_on_action() {
        let mut server = mockito::Server::new_async().await;
        let never = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let (_store, ctx, gitlab) = context(&server.url(), "tok");
        let err = PushFiles
            .invoke(
                &ctx,
                &gitlab,
                json!({
                    "project_id": 7,
                    "branch": "main",
                    "commit_message": "Bulk",
                    "files": [
                        {"file_path": "old.txt", "action": "delete"},
                        {"file_path": "new.txt"},
                        {"file_path": "b.txt", "action": "update"}
                    ]
                }),
            )
            .await
            .unwrap_err();

        let GatewayError::InvalidArgument(violations) = err else {
            panic!("expected InvalidArgument");
        };
        let fields: Vec<&str> = violations.iter().map(|v| v.field.as_str()).collect();
        assert_eq!(fields.len(), 2, "{fields:?}");
        assert!(fields.iter().all(|f| f.ends_with("content")));
        assert!(!fields.iter().any(|f| f.contains("[0]")));
        never.assert_async().await;
    }

    #[tokio::test]
    async fn test_push_files_reports_nested_violations() {
        let (_store, ctx, gitlab) = context("http://127.0.0.1:9", "tok");
        let err = PushFiles
            .invoke(
                &ctx,
                &gitlab,
                json!({
                    "project_id": 7,
                    "branch": "main",
                    "commit_message": "Bulk",
                    "files": [{"file_path": "", "content": "A"}]
                }),
            )
            .await
            .unwrap_err();

        let GatewayError::InvalidArgument(violations) = err else {
            panic!("expected InvalidArgument");
        };
        assert!(violations[0].field.starts_with("files"));
        assert!(violations[0].field.ends_with("file_path"));
    }
}
