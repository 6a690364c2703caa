//! Project-level operations: search, listing, creation and forking.

use async_trait::async_trait;
use garde::Validate;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{pagination_query, pagination_schema, parse_args, project_id_schema, put_opt, Operation};
use crate::error::Result;
use crate::gitlab::GitLabClient;
use crate::mcp::RequestContext;

#[derive(Debug, Deserialize, Validate)]
pub struct SearchRepositoriesArgs {
    #[serde(default)]
    #[garde(length(min = 1))]
    pub search: String,
    #[garde(range(min = 1))]
    pub page: Option<u32>,
    #[garde(range(min = 1, max = 100))]
    pub per_page: Option<u32>,
}

pub struct SearchRepositories;

#[async_trait]
impl Operation for SearchRepositories {
    fn name(&self) -> &'static str {
        "search_repositories"
    }

    fn description(&self) -> &'static str {
        "Search for GitLab projects by name"
    }

    fn input_schema(&self) -> Value {
        let (page, per_page) = pagination_schema();
        json!({
            "type": "object",
            "properties": {
                "search": { "type": "string", "description": "Search query" },
                "page": page,
                "per_page": per_page
            },
            "required": ["search"]
        })
    }

    async fn invoke(
        &self,
        ctx: &RequestContext,
        gitlab: &GitLabClient,
        args: Value,
    ) -> Result<Value> {
        let args: SearchRepositoriesArgs = parse_args(args, &self.input_schema())?;
        let mut query = vec![("search", args.search)];
        query.extend(pagination_query(args.page, args.per_page));
        gitlab.get(ctx.credential(), "/projects", &query).await
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ListProjectsArgs {
    #[garde(skip)]
    pub search: Option<String>,
    #[garde(skip)]
    pub owned: Option<bool>,
    #[garde(skip)]
    pub membership: Option<bool>,
    #[garde(range(min = 1))]
    pub page: Option<u32>,
    #[garde(range(min = 1, max = 100))]
    pub per_page: Option<u32>,
}

pub struct ListProjects;

#[async_trait]
impl Operation for ListProjects {
    fn name(&self) -> &'static str {
        "list_projects"
    }

    fn description(&self) -> &'static str {
        "List projects visible to the authenticated user"
    }

    fn input_schema(&self) -> Value {
        let (page, per_page) = pagination_schema();
        json!({
            "type": "object",
            "properties": {
                "search": { "type": "string", "description": "Filter by name" },
                "owned": { "type": "boolean", "description": "Only projects owned by the user" },
                "membership": { "type": "boolean", "description": "Only projects the user is a member of" },
                "page": page,
                "per_page": per_page
            },
            "required": []
        })
    }

    async fn invoke(
        &self,
        ctx: &RequestContext,
        gitlab: &GitLabClient,
        args: Value,
    ) -> Result<Value> {
        let args: ListProjectsArgs = parse_args(args, &self.input_schema())?;
        let mut query = Vec::new();
        if let Some(search) = args.search {
            query.push(("search", search));
        }
        if let Some(owned) = args.owned {
            query.push(("owned", owned.to_string()));
        }
        if let Some(membership) = args.membership {
            query.push(("membership", membership.to_string()));
        }
        query.extend(pagination_query(args.page, args.per_page));
        gitlab.get(ctx.credential(), "/projects", &query).await
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRepositoryArgs {
    #[serde(default)]
    #[garde(length(min = 1))]
    pub name: String,
    #[garde(skip)]
    pub description: Option<String>,
    #[garde(custom(known_visibility))]
    pub visibility: Option<String>,
    #[garde(skip)]
    pub initialize_with_readme: Option<bool>,
}

fn known_visibility(value: &Option<String>, _ctx: &()) -> garde::Result {
    match value.as_deref() {
        None | Some("private" | "internal" | "public") => Ok(()),
        Some(other) => Err(garde::Error::new(format!(
            "unknown visibility `{}`, expected private, internal or public",
            other
        ))),
    }
}

pub struct CreateRepository;

#[async_trait]
impl Operation for CreateRepository {
    fn name(&self) -> &'static str {
        "create_repository"
    }

    fn description(&self) -> &'static str {
        "Create a new GitLab project"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Project name" },
                "description": { "type": "string", "description": "Project description" },
                "visibility": {
                    "type": "string",
                    "enum": ["private", "internal", "public"],
                    "description": "Project visibility"
                },
                "initialize_with_readme": {
                    "type": "boolean",
                    "description": "Create an initial README"
                }
            },
            "required": ["name"]
        })
    }

    async fn invoke(
        &self,
        ctx: &RequestContext,
        gitlab: &GitLabClient,
        args: Value,
    ) -> Result<Value> {
        let args: CreateRepositoryArgs = parse_args(args, &self.input_schema())?;
        info!("MCP: Creating project '{}'", args.name);
        let mut body = json!({ "name": args.name });
        put_opt(&mut body, "description", args.description);
        put_opt(&mut body, "visibility", args.visibility);
        put_opt(&mut body, "initialize_with_readme", args.initialize_with_readme);
        gitlab.post(ctx.credential(), "/projects", &body).await
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ForkRepositoryArgs {
    #[serde(default, deserialize_with = "crate::operations::project_id")]
    #[garde(length(min = 1))]
    pub project_id: String,
    #[garde(skip)]
    pub namespace: Option<String>,
}

pub struct ForkRepository;

#[async_trait]
impl Operation for ForkRepository {
    fn name(&self) -> &'static str {
        "fork_repository"
    }

    fn description(&self) -> &'static str {
        "Fork a project into the user's namespace or a given namespace"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "project_id": project_id_schema(),
                "namespace": { "type": "string", "description": "Namespace path to fork into" }
            },
            "required": ["project_id"]
        })
    }

    async fn invoke(
        &self,
        ctx: &RequestContext,
        gitlab: &GitLabClient,
        args: Value,
    ) -> Result<Value> {
        let args: ForkRepositoryArgs = parse_args(args, &self.input_schema())?;
        info!("MCP: Forking project {}", args.project_id);
        let mut body = json!({});
        put_opt(&mut body, "namespace_path", args.namespace);
        let path = format!("{}/fork", GitLabClient::project_path(&args.project_id));
        gitlab.post(ctx.credential(), &path, &body).await
    }
}
