//! Scope Service
//!
//! Workspaces, projects and environments are owned by the organisation
//! registry. The control plane keeps a synced copy for pool scoping and
//! run descriptors.

use terrarun_core::domain::scope::{Environment, Project, Workspace};
use terrarun_core::dto::scope::{SyncScopeEntity, SyncWorkspace};
use thiserror::Error;
use uuid::Uuid;

use crate::repository::{Repository, RepositoryError};

/// Service error type
#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("Workspace {0} not found")]
    WorkspaceNotFound(Uuid),

    #[error("Project {0} not found")]
    ProjectNotFound(Uuid),

    #[error("Environment {0} not found")]
    EnvironmentNotFound(Uuid),

    #[error("{0}")]
    ValidationError(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type Result<T> = std::result::Result<T, ScopeError>;

/// Create or replace a workspace
pub async fn sync_workspace(
    repo: &dyn Repository,
    id: Uuid,
    req: SyncWorkspace,
) -> Result<Workspace> {
    validate_names(&req.organisation, &req.name)?;

    if let Some(project_id) = req.project_id {
        if let Some(project) = repo.find_project(project_id).await? {
            ensure_same_organisation("Project", project_id, &project.organisation, &req.organisation)?;
        }
    }
    if let Some(environment_id) = req.environment_id {
        if let Some(environment) = repo.find_environment(environment_id).await? {
            ensure_same_organisation(
                "Environment",
                environment_id,
                &environment.organisation,
                &req.organisation,
            )?;
        }
    }

    let workspace = Workspace {
        id,
        organisation: req.organisation,
        name: req.name,
        project_id: req.project_id,
        environment_id: req.environment_id,
    };

    repo.upsert_workspace(&workspace).await?;
    tracing::debug!("Workspace synced: {} ({})", workspace.name, workspace.id);

    Ok(workspace)
}

pub async fn get_workspace(repo: &dyn Repository, id: Uuid) -> Result<Workspace> {
    repo.find_workspace(id)
        .await?
        .ok_or(ScopeError::WorkspaceNotFound(id))
}

pub async fn list_workspaces(
    repo: &dyn Repository,
    organisation: Option<&str>,
) -> Result<Vec<Workspace>> {
    Ok(repo.list_workspaces(organisation).await?)
}

pub async fn sync_project(repo: &dyn Repository, id: Uuid, req: SyncScopeEntity) -> Result<Project> {
    validate_names(&req.organisation, &req.name)?;

    let project = Project {
        id,
        organisation: req.organisation,
        name: req.name,
    };

    repo.upsert_project(&project).await?;
    tracing::debug!("Project synced: {} ({})", project.name, project.id);

    Ok(project)
}

pub async fn get_project(repo: &dyn Repository, id: Uuid) -> Result<Project> {
    repo.find_project(id)
        .await?
        .ok_or(ScopeError::ProjectNotFound(id))
}

pub async fn sync_environment(
    repo: &dyn Repository,
    id: Uuid,
    req: SyncScopeEntity,
) -> Result<Environment> {
    validate_names(&req.organisation, &req.name)?;

    let environment = Environment {
        id,
        organisation: req.organisation,
        name: req.name,
    };

    repo.upsert_environment(&environment).await?;
    tracing::debug!("Environment synced: {} ({})", environment.name, environment.id);

    Ok(environment)
}

pub async fn get_environment(repo: &dyn Repository, id: Uuid) -> Result<Environment> {
    repo.find_environment(id)
        .await?
        .ok_or(ScopeError::EnvironmentNotFound(id))
}

fn ensure_same_organisation(kind: &str, id: Uuid, owner: &str, organisation: &str) -> Result<()> {
    if owner != organisation {
        return Err(ScopeError::ValidationError(format!(
            "{} {} belongs to organisation '{}', not '{}'",
            kind, id, owner, organisation
        )));
    }
    Ok(())
}

fn validate_names(organisation: &str, name: &str) -> Result<()> {
    if organisation.trim().is_empty() {
        return Err(ScopeError::ValidationError(
            "Organisation cannot be empty".to_string(),
        ));
    }

    if name.trim().is_empty() {
        return Err(ScopeError::ValidationError("Name cannot be empty".to_string()));
    }

    if name.len() > 255 || organisation.len() > 255 {
        return Err(ScopeError::ValidationError(
            "Names are limited to 255 characters".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryRepository;

    #[tokio::test]
    async fn test_sync_workspace_replaces_existing() {
        let repo = MemoryRepository::new();
        let id = Uuid::new_v4();
        let project = Uuid::new_v4();

        sync_workspace(
            &repo,
            id,
            SyncWorkspace {
                organisation: "acme".into(),
                name: "network".into(),
                project_id: None,
                environment_id: None,
            },
        )
        .await
        .unwrap();

        sync_workspace(
            &repo,
            id,
            SyncWorkspace {
                organisation: "acme".into(),
                name: "network-prod".into(),
                project_id: Some(project),
                environment_id: None,
            },
        )
        .await
        .unwrap();

        let workspace = get_workspace(&repo, id).await.unwrap();
        assert_eq!(workspace.name, "network-prod");
        assert_eq!(workspace.project_id, Some(project));
        assert_eq!(list_workspaces(&repo, Some("acme")).await.unwrap().len(), 1);
        assert!(list_workspaces(&repo, Some("globex")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_workspace_rejects_foreign_project_and_environment() {
        let repo = MemoryRepository::new();
        let project = Uuid::new_v4();
        let environment = Uuid::new_v4();
        let acme = || SyncScopeEntity {
            organisation: "acme".into(),
            name: "infra".into(),
        };
        sync_project(&repo, project, acme()).await.unwrap();
        sync_environment(&repo, environment, acme()).await.unwrap();

        let globex = |project_id, environment_id| SyncWorkspace {
            organisation: "globex".into(),
            name: "network".into(),
            project_id,
            environment_id,
        };

        let err = sync_workspace(&repo, Uuid::new_v4(), globex(Some(project), None))
            .await
            .unwrap_err();
        assert!(matches!(err, ScopeError::ValidationError(_)));

        let err = sync_workspace(&repo, Uuid::new_v4(), globex(None, Some(environment)))
            .await
            .unwrap_err();
        assert!(matches!(err, ScopeError::ValidationError(_)));

        assert!(list_workspaces(&repo, Some("globex")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_rejects_empty_names() {
        let repo = MemoryRepository::new();

        let err = sync_project(
            &repo,
            Uuid::new_v4(),
            SyncScopeEntity {
                organisation: "acme".into(),
                name: "".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ScopeError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_missing_entities() {
        let repo = MemoryRepository::new();
        let id = Uuid::new_v4();

        assert!(matches!(
            get_workspace(&repo, id).await.unwrap_err(),
            ScopeError::WorkspaceNotFound(_)
        ));
        assert!(matches!(
            get_project(&repo, id).await.unwrap_err(),
            ScopeError::ProjectNotFound(_)
        ));
        assert!(matches!(
            get_environment(&repo, id).await.unwrap_err(),
            ScopeError::EnvironmentNotFound(_)
        ));
    }
}
