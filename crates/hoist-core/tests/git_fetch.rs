mod support;

use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;

use hoist_core::fetch::RetryPolicy;
use hoist_core::source::{GitRepository, SourceError, SourceRepository};
use hoist_core::types::{DeployStatus, DeploymentRequest, DeploymentResponse, DeploymentSource, RepositoryType, RequestMode};

use support::{Site, commit_all, fast_settings, git_available, init_upstream};

fn working_copy(dir: &Path) -> GitRepository {
    let repo = GitRepository::new(dir.join("repository"), RetryPolicy::new(3, Duration::ZERO));
    repo.initialize().unwrap();
    repo
}

fn write(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(name), content).unwrap();
}

#[test]
fn missing_branch_is_reported_without_retrying() {
    if !git_available() {
        eprintln!("git not installed, skipping");
        return;
    }
    let temp = TempDir::new().unwrap();
    let upstream_dir = temp.path().join("upstream");
    init_upstream(&upstream_dir);

    let repo = working_copy(temp.path());
    let err = repo
        .fetch(upstream_dir.to_str().unwrap(), "master")
        .unwrap_err();
    match err {
        SourceError::Fetch(err) => assert!(err.is_branch_not_found(), "{err}"),
        other => panic!("expected a fetch error, got {other:?}"),
    }
    assert_eq!(repo.current_id().unwrap(), None);
}

#[test]
fn fetch_checks_out_the_branch_head() {
    if !git_available() {
        eprintln!("git not installed, skipping");
        return;
    }
    let temp = TempDir::new().unwrap();
    let upstream_dir = temp.path().join("upstream");
    let upstream = init_upstream(&upstream_dir);
    write(&upstream_dir, "index.html", "v1");
    let first = commit_all(&upstream, "first release");

    let repo = working_copy(temp.path());
    let remote = upstream_dir.to_str().unwrap();
    repo.fetch(remote, "master").unwrap();

    assert_eq!(repo.current_id().unwrap(), Some(first.to_string()));
    let change_set = repo.change_set(&first.to_string()).unwrap();
    assert_eq!(change_set.author, "Site Dev");
    assert_eq!(change_set.message, "first release");
    assert_eq!(
        std::fs::read_to_string(repo.path().join("index.html")).unwrap(),
        "v1"
    );

    write(&upstream_dir, "index.html", "v2");
    let second = commit_all(&upstream, "second release");
    repo.fetch(remote, "master").unwrap();
    assert_eq!(repo.current_id().unwrap(), Some(second.to_string()));

    repo.update(&first.to_string()).unwrap();
    assert_eq!(
        std::fs::read_to_string(repo.path().join("index.html")).unwrap(),
        "v1"
    );
}

#[test]
fn clear_lock_removes_stale_git_locks() {
    let temp = TempDir::new().unwrap();
    let repo = working_copy(temp.path());
    let git_dir = repo.path().join(".git");
    std::fs::create_dir_all(git_dir.join("refs").join("heads")).unwrap();
    for stale in ["index.lock", "HEAD.lock", "refs/heads/master.lock"] {
        std::fs::write(git_dir.join(stale), "").unwrap();
    }

    repo.clear_lock().unwrap();

    for stale in ["index.lock", "HEAD.lock", "refs/heads/master.lock"] {
        assert!(!git_dir.join(stale).exists(), "{stale} should be removed");
    }
}

fn git_site(upstream_dir: &Path) -> Site {
    let mut settings = fast_settings(RepositoryType::Git);
    settings.repository_url = Some(upstream_dir.to_str().unwrap().to_string());
    Site::new(settings)
}

#[tokio::test]
async fn repository_deployments_track_commits() {
    if !git_available() {
        eprintln!("git not installed, skipping");
        return;
    }
    let temp = TempDir::new().unwrap();
    let upstream_dir = temp.path().join("upstream");
    let upstream = init_upstream(&upstream_dir);
    write(&upstream_dir, "index.html", "v1");
    let first = commit_all(&upstream, "first release");

    let site = git_site(&upstream_dir);
    let orchestrator = &site.orchestrator;
    let webroot = site.environment.webroot_path();

    let response = orchestrator
        .request_deployment(
            DeploymentRequest::repository().with_deployer("push"),
            RequestMode::Synchronous,
        )
        .await
        .unwrap();
    let DeploymentResponse::Completed(result) = response else {
        panic!("expected a completed deployment, got {response:?}");
    };
    assert_eq!(result.id, first.to_string());
    assert_eq!(result.status, DeployStatus::Success);
    assert_eq!(result.author, "Site Dev");
    assert_eq!(result.message, "first release");
    assert_eq!(std::fs::read_to_string(webroot.join("index.html")).unwrap(), "v1");
    assert!(!webroot.join(".git").exists());

    // Nothing new upstream.
    let response = orchestrator
        .request_deployment(DeploymentRequest::repository().continuous(), RequestMode::Synchronous)
        .await
        .unwrap();
    assert_eq!(response, DeploymentResponse::NoChange);

    write(&upstream_dir, "index.html", "v2");
    let second = commit_all(&upstream, "second release");
    let response = orchestrator
        .request_deployment(DeploymentRequest::repository().continuous(), RequestMode::Synchronous)
        .await
        .unwrap();
    assert!(matches!(response, DeploymentResponse::Completed(ref r) if r.id == second.to_string()));
    assert_eq!(std::fs::read_to_string(webroot.join("index.html")).unwrap(), "v2");

    let response = orchestrator
        .redeploy(&first.to_string(), "rollback", RequestMode::Synchronous)
        .await
        .unwrap();
    let DeploymentResponse::Completed(result) = response else {
        panic!("expected a completed redeploy, got {response:?}");
    };
    assert_eq!(result.deployer, "rollback");
    assert_eq!(result.message, "first release");
    assert!(result.current);
    assert_eq!(std::fs::read_to_string(webroot.join("index.html")).unwrap(), "v1");

    let history = orchestrator.get_history().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history.iter().filter(|r| r.current).count(), 1);
}

#[tokio::test]
async fn missing_branch_deploys_nothing() {
    if !git_available() {
        eprintln!("git not installed, skipping");
        return;
    }
    let temp = TempDir::new().unwrap();
    let upstream_dir = temp.path().join("upstream");
    let upstream = init_upstream(&upstream_dir);
    write(&upstream_dir, "index.html", "v1");
    commit_all(&upstream, "first release");

    let site = git_site(&upstream_dir);
    let request = DeploymentRequest::new(DeploymentSource::Repository {
        repo_url: None,
        branch: Some("does-not-exist".to_string()),
        commit_id: None,
    });
    let response = site
        .orchestrator
        .request_deployment(request, RequestMode::Synchronous)
        .await
        .unwrap();

    assert_eq!(response, DeploymentResponse::NoChange);
    assert!(site.orchestrator.get_history().unwrap().is_empty());
    assert_eq!(site.store.active_deployment_id().unwrap(), None);
}
