mod support;

use tempfile::TempDir;

use hoist_core::context::AppContext;
use hoist_core::types::{DeployStatus, DeploymentRequest, DeploymentResponse, RepositoryType, RequestMode};

use support::write_zip;

#[test]
fn missing_settings_file_uses_defaults() {
    let temp = TempDir::new().unwrap();
    let context = AppContext::load(temp.path()).unwrap();

    assert_eq!(context.settings().branch, "master");
    assert_eq!(context.settings().repository_type, RepositoryType::Git);
    assert_eq!(context.repositories().repository_type(), RepositoryType::Git);
    assert!(context.environment().deployments_path().is_dir());
    assert!(context.environment().locks_path().is_dir());
}

#[test]
fn invalid_settings_are_rejected() {
    let temp = TempDir::new().unwrap();
    std::fs::write(
        temp.path().join("hoist.toml"),
        "[retry]\nmax_attempts = 0\n",
    )
    .unwrap();

    let err = AppContext::load(temp.path()).err().unwrap();
    assert!(format!("{err:#}").contains("max_attempts"));
}

#[cfg(unix)]
#[tokio::test]
async fn configured_build_command_runs_before_sync() {
    let temp = TempDir::new().unwrap();
    std::fs::write(
        temp.path().join("hoist.toml"),
        r#"
repository_type = "none"

[retry]
delay_ms = 0

[build]
command = "echo built > stamp.txt"
target_dir = "public"
"#,
    )
    .unwrap();
    let context = AppContext::load(temp.path()).unwrap();

    let archive = temp.path().join("site.zip");
    write_zip(&archive, &[("index.html", "hello")]);
    let response = context
        .orchestrator()
        .request_deployment(DeploymentRequest::zip(&archive), RequestMode::Synchronous)
        .await
        .unwrap();
    let DeploymentResponse::Completed(result) = response else {
        panic!("expected a completed deployment, got {response:?}");
    };
    assert_eq!(result.status, DeployStatus::Success);

    let public = temp.path().join("public");
    assert_eq!(std::fs::read_to_string(public.join("index.html")).unwrap(), "hello");
    assert_eq!(std::fs::read_to_string(public.join("stamp.txt")).unwrap().trim(), "built");

    let log = context.orchestrator().get_log(&result.id).unwrap();
    assert!(log.iter().any(|entry| entry.message.contains("echo built")));
}
