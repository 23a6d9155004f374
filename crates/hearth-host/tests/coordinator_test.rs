// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the instance lifecycle coordinator: create, update, delete, list, read.

mod common;

use std::path::Path;
use std::time::Duration;

use common::{TestContext, actor_with, admin, wait_until};
use hearth_host::error::Error;
use hearth_host::models::{ConfigurationType, CreateInstanceRequest, InstanceUpdate};
use hearth_host::persistence::Persistence;
use hearth_host::registry::ShutdownMode;
use hearth_host::rights::InstanceManagerRights;
use hearth_host::runner::MockRunner;

fn create_request(name: &str, path: String) -> CreateInstanceRequest {
    CreateInstanceRequest {
        name: name.to_string(),
        path,
        configuration_type: None,
    }
}

// ============================================================================
// Create
// ============================================================================

#[tokio::test]
async fn test_create_instance() {
    let ctx = TestContext::new().await;
    let runtime = ctx.start().await;
    let coordinator = runtime.coordinator();

    let instance = coordinator
        .create(&admin(), create_request("  Main  ", ctx.path("main")))
        .await
        .unwrap();

    assert_eq!(instance.name, "Main");
    assert_eq!(instance.path, ctx.path("main"));
    assert!(!instance.online);
    assert_eq!(instance.configuration_type, ConfigurationType::Disallowed);
    assert!(Path::new(&instance.path).is_dir());

    let settings = ctx
        .persistence
        .get_instance_with_settings(instance.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(settings.launch_settings.primary_port, 1337);
    assert!(!settings.launch_settings.auto_start);

    runtime.shutdown(ShutdownMode::Detach).await.unwrap();
}

#[tokio::test]
async fn test_create_normalizes_path() {
    let ctx = TestContext::new().await;
    let runtime = ctx.start().await;

    let instance = runtime
        .coordinator()
        .create(&admin(), create_request("rel", "servers/./one/../two".to_string()))
        .await
        .unwrap();

    assert_eq!(instance.path, ctx.path("servers/two"));
    assert!(ctx.root.join("servers/two").is_dir());
}

#[tokio::test]
async fn test_create_validation() {
    let ctx = TestContext::new().await;
    let runtime = ctx.start().await;
    let coordinator = runtime.coordinator();

    let err = coordinator
        .create(&admin(), create_request("   ", ctx.path("blank")))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = coordinator
        .create(&admin(), create_request("no path", "  ".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    assert!(coordinator.list(&admin()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_requires_right() {
    let ctx = TestContext::new().await;
    let runtime = ctx.start().await;

    let viewer = actor_with("viewer", InstanceManagerRights::LIST);
    let err = runtime
        .coordinator()
        .create(&viewer, create_request("x", ctx.path("x")))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Forbidden(_)));
    assert!(!ctx.root.join("x").exists());
}

#[tokio::test]
async fn test_create_existing_path_conflicts() {
    let ctx = TestContext::new().await;
    let runtime = ctx.start().await;
    let coordinator = runtime.coordinator();

    coordinator
        .create(&admin(), create_request("first", ctx.path("shared")))
        .await
        .unwrap();
    let err = coordinator
        .create(&admin(), create_request("second", ctx.path("shared")))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    std::fs::write(ctx.root.join("a-file"), b"data").unwrap();
    let err = coordinator
        .create(&admin(), create_request("file", ctx.path("a-file")))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    assert_eq!(coordinator.list(&admin()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_removes_row_when_directory_fails() {
    let ctx = TestContext::new().await;
    let runtime = ctx.start().await;
    let coordinator = runtime.coordinator();

    ctx.io.set_fail_create(true);
    let err = coordinator
        .create(&admin(), create_request("doomed", ctx.path("doomed")))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert!(coordinator.list(&admin()).await.unwrap().is_empty());

    // The same path is usable once the disk behaves.
    ctx.io.set_fail_create(false);
    coordinator
        .create(&admin(), create_request("doomed", ctx.path("doomed")))
        .await
        .unwrap();
}

// ============================================================================
// List / Read
// ============================================================================

#[tokio::test]
async fn test_list_respects_rights() {
    let ctx = TestContext::new().await;
    let runtime = ctx.start().await;
    let coordinator = runtime.coordinator();

    let creator = actor_with("creator", InstanceManagerRights::CREATE);
    let own = coordinator
        .create(&creator, create_request("own", ctx.path("own")))
        .await
        .unwrap();
    coordinator
        .create(&admin(), create_request("other", ctx.path("other")))
        .await
        .unwrap();

    let visible = coordinator.list(&creator).await.unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id, own.id);

    assert_eq!(coordinator.list(&admin()).await.unwrap().len(), 2);

    let stranger = actor_with("stranger", InstanceManagerRights::NONE);
    assert!(coordinator.list(&stranger).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_read() {
    let ctx = TestContext::new().await;
    let runtime = ctx.start().await;
    let coordinator = runtime.coordinator();

    let created = coordinator
        .create(&admin(), create_request("read", ctx.path("read")))
        .await
        .unwrap();

    let selected = coordinator.get(created.id).await.unwrap();
    assert_eq!(coordinator.read(Some(selected)).unwrap(), created);
    assert!(matches!(coordinator.read(None), Err(Error::Validation(_))));
    assert!(matches!(coordinator.get(9999).await, Err(Error::Gone(_))));
}

// ============================================================================
// Update
// ============================================================================

#[tokio::test]
async fn test_update_plain_fields() {
    let ctx = TestContext::new().await;
    let runtime = ctx.start().await;
    let coordinator = runtime.coordinator();

    let created = coordinator
        .create(&admin(), create_request("before", ctx.path("plain")))
        .await
        .unwrap();

    let updated = coordinator
        .update(
            &admin(),
            InstanceUpdate {
                name: Some("after".to_string()),
                configuration_type: Some(ConfigurationType::Bounded),
                auto_update_interval: Some(30),
                ..InstanceUpdate::for_instance(created.id)
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.name, "after");
    assert_eq!(updated.configuration_type, ConfigurationType::Bounded);
    assert_eq!(updated.auto_update_interval, Some(30));
    assert_eq!(updated.version, created.version + 1);
    assert!(ctx.runner.live_pids().await.is_empty());
}

#[tokio::test]
async fn test_update_without_changes_writes_nothing() {
    let ctx = TestContext::new().await;
    let runtime = ctx.start().await;
    let coordinator = runtime.coordinator();

    let created = coordinator
        .create(&admin(), create_request("same", ctx.path("same")))
        .await
        .unwrap();

    // Values equal to the current ones are not changes, and need no rights.
    let nobody = actor_with("nobody", InstanceManagerRights::NONE);
    let result = coordinator
        .update(
            &nobody,
            InstanceUpdate {
                name: Some("same".to_string()),
                online: Some(false),
                path: Some(ctx.path("same")),
                ..InstanceUpdate::for_instance(created.id)
            },
        )
        .await
        .unwrap();

    assert_eq!(result, created);
    assert_eq!(
        coordinator.get(created.id).await.unwrap().version,
        created.version
    );
}

#[tokio::test]
async fn test_update_forbidden_field_changes_nothing() {
    let ctx = TestContext::new().await;
    let runtime = ctx.start().await;
    let coordinator = runtime.coordinator();

    let created = coordinator
        .create(&admin(), create_request("guarded", ctx.path("guarded")))
        .await
        .unwrap();

    let renamer = actor_with("renamer", InstanceManagerRights::RENAME);
    let err = coordinator
        .update(
            &renamer,
            InstanceUpdate {
                name: Some("renamed".to_string()),
                online: Some(true),
                ..InstanceUpdate::for_instance(created.id)
            },
        )
        .await
        .unwrap_err();

    match err {
        Error::Forbidden(message) => assert!(message.contains("online")),
        other => panic!("expected Forbidden, got {:?}", other),
    }
    assert_eq!(coordinator.get(created.id).await.unwrap(), created);
    assert_eq!(ctx.runner.launch_count(), 0);
}

#[tokio::test]
async fn test_update_missing_instance_is_gone() {
    let ctx = TestContext::new().await;
    let runtime = ctx.start().await;

    let err = runtime
        .coordinator()
        .update(
            &admin(),
            InstanceUpdate {
                name: Some("ghost".to_string()),
                ..InstanceUpdate::for_instance(4242)
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Gone(_)));
}

#[tokio::test]
async fn test_update_while_locked_conflicts() {
    let ctx = TestContext::new().await;
    let runtime = ctx.start().await;
    let coordinator = runtime.coordinator();

    let created = coordinator
        .create(&admin(), create_request("busy", ctx.path("busy")))
        .await
        .unwrap();

    let guard = runtime.registry().lock(created.id).await.unwrap();
    let err = coordinator
        .update(
            &admin(),
            InstanceUpdate {
                online: Some(true),
                ..InstanceUpdate::for_instance(created.id)
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    assert!(err.is_retryable());
    drop(guard);

    assert!(matches!(
        coordinator.delete(&admin(), created.id).await,
        Ok(())
    ));
}

#[tokio::test]
async fn test_simultaneous_updates_one_conflicts() {
    let ctx = TestContext::with_runner(MockRunner::slow(200)).await;
    let runtime = ctx.start().await;
    let coordinator = runtime.coordinator().clone();

    let created = coordinator
        .create(&admin(), create_request("contested", ctx.path("contested")))
        .await
        .unwrap();

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .update(
                        &admin(),
                        InstanceUpdate {
                            online: Some(true),
                            ..InstanceUpdate::for_instance(created.id)
                        },
                    )
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    let mut conflicted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(instance) => {
                assert!(instance.online);
                succeeded += 1;
            }
            Err(Error::Conflict(_)) => conflicted += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(conflicted, 1);
    assert_eq!(ctx.runner.launch_count(), 1);
    assert_eq!(ctx.runner.live_pids().await.len(), 1);
}

#[tokio::test]
async fn test_stale_version_conflicts() {
    let ctx = TestContext::new().await;
    let runtime = ctx.start().await;
    let coordinator = runtime.coordinator();

    let stale = coordinator
        .create(&admin(), create_request("racy", ctx.path("racy")))
        .await
        .unwrap();
    coordinator
        .update(
            &admin(),
            InstanceUpdate {
                name: Some("winner".to_string()),
                ..InstanceUpdate::for_instance(stale.id)
            },
        )
        .await
        .unwrap();

    let mut loser = stale.clone();
    loser.name = "loser".to_string();
    let err = ctx.persistence.update_instance(&loser).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    assert_eq!(coordinator.get(stale.id).await.unwrap().name, "winner");
}

#[tokio::test]
async fn test_online_and_offline() {
    let ctx = TestContext::new().await;
    let runtime = ctx.start().await;
    let coordinator = runtime.coordinator();

    let created = coordinator
        .create(&admin(), create_request("live", ctx.path("live")))
        .await
        .unwrap();

    let online = coordinator
        .update(
            &admin(),
            InstanceUpdate {
                online: Some(true),
                ..InstanceUpdate::for_instance(created.id)
            },
        )
        .await
        .unwrap();
    assert!(online.online);
    assert!(runtime.registry().is_online(created.id).await);

    let record = ctx.persistence.get_reattach(created.id).await.unwrap().unwrap();
    let pid = record.current().unwrap().pid;
    assert!(ctx.runner.is_process_alive(pid).await);

    let offline = coordinator
        .update(
            &admin(),
            InstanceUpdate {
                online: Some(false),
                ..InstanceUpdate::for_instance(created.id)
            },
        )
        .await
        .unwrap();
    assert!(!offline.online);
    assert!(!runtime.registry().is_online(created.id).await);
    assert!(!ctx.runner.is_process_alive(pid).await);
    assert!(ctx.persistence.get_reattach(created.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_online_leaves_instance_offline() {
    let ctx = TestContext::with_runner(MockRunner::failing()).await;
    let runtime = ctx.start().await;
    let coordinator = runtime.coordinator();

    let created = coordinator
        .create(&admin(), create_request("broken", ctx.path("broken")))
        .await
        .unwrap();

    let err = coordinator
        .update(
            &admin(),
            InstanceUpdate {
                online: Some(true),
                ..InstanceUpdate::for_instance(created.id)
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::RuntimeTransition(_)));
    assert!(!coordinator.get(created.id).await.unwrap().online);
    assert!(!runtime.registry().is_online(created.id).await);
    assert!(ctx.persistence.get_reattach(created.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_online_after_crash_relaunches() {
    let ctx = TestContext::new().await;
    let runtime = ctx.start().await;
    let coordinator = runtime.coordinator();

    let created = coordinator
        .create(&admin(), create_request("phoenix", ctx.path("phoenix")))
        .await
        .unwrap();
    let go_online = InstanceUpdate {
        online: Some(true),
        ..InstanceUpdate::for_instance(created.id)
    };
    coordinator.update(&admin(), go_online.clone()).await.unwrap();
    let pid = ctx
        .persistence
        .get_reattach(created.id)
        .await
        .unwrap()
        .unwrap()
        .current()
        .unwrap()
        .pid;

    // Asking for online while it runs is a no-op.
    coordinator.update(&admin(), go_online.clone()).await.unwrap();
    assert_eq!(ctx.runner.launch_count(), 1);

    ctx.runner.crash(pid).await;
    let registry = runtime.registry().clone();
    let id = created.id;
    let down = wait_until(Duration::from_secs(2), || {
        let registry = registry.clone();
        async move { !registry.is_online(id).await }
    })
    .await;
    assert!(down, "crash was not noticed");
    assert!(coordinator.get(id).await.unwrap().online);

    // Relaunching is an online change and needs the right for it.
    let renamer = actor_with("renamer", InstanceManagerRights::RENAME);
    assert!(matches!(
        coordinator.update(&renamer, go_online.clone()).await,
        Err(Error::Forbidden(_))
    ));
    assert_eq!(ctx.runner.launch_count(), 1);

    let relaunched = coordinator.update(&admin(), go_online).await.unwrap();
    assert!(relaunched.online);
    assert_eq!(ctx.runner.launch_count(), 2);
    assert!(runtime.registry().is_online(id).await);
    let new_pid = ctx
        .persistence
        .get_reattach(id)
        .await
        .unwrap()
        .unwrap()
        .current()
        .unwrap()
        .pid;
    assert_ne!(new_pid, pid);
    assert!(ctx.runner.is_process_alive(new_pid).await);
}

// ============================================================================
// Relocation
// ============================================================================

#[tokio::test]
async fn test_relocate_offline_instance() {
    let ctx = TestContext::new().await;
    let runtime = ctx.start().await;
    let coordinator = runtime.coordinator();

    let created = coordinator
        .create(&admin(), create_request("mover", ctx.path("old")))
        .await
        .unwrap();
    std::fs::write(ctx.root.join("old/config.txt"), b"port=1337").unwrap();

    let moved = coordinator
        .update(
            &admin(),
            InstanceUpdate {
                path: Some(ctx.path("nested/new")),
                ..InstanceUpdate::for_instance(created.id)
            },
        )
        .await
        .unwrap();

    assert_eq!(moved.path, ctx.path("nested/new"));
    assert!(!ctx.root.join("old").exists());
    assert_eq!(
        std::fs::read(ctx.root.join("nested/new/config.txt")).unwrap(),
        b"port=1337"
    );
}

#[tokio::test]
async fn test_relocate_online_instance_requires_offline() {
    let ctx = TestContext::new().await;
    let runtime = ctx.start().await;
    let coordinator = runtime.coordinator();

    let created = coordinator
        .create(&admin(), create_request("pinned", ctx.path("pinned")))
        .await
        .unwrap();
    coordinator
        .update(
            &admin(),
            InstanceUpdate {
                online: Some(true),
                ..InstanceUpdate::for_instance(created.id)
            },
        )
        .await
        .unwrap();

    let err = coordinator
        .update(
            &admin(),
            InstanceUpdate {
                path: Some(ctx.path("elsewhere")),
                ..InstanceUpdate::for_instance(created.id)
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    assert!(runtime.registry().is_online(created.id).await);

    // Taking it offline in the same request is allowed.
    let moved = coordinator
        .update(
            &admin(),
            InstanceUpdate {
                path: Some(ctx.path("elsewhere")),
                online: Some(false),
                ..InstanceUpdate::for_instance(created.id)
            },
        )
        .await
        .unwrap();
    assert!(!moved.online);
    assert_eq!(moved.path, ctx.path("elsewhere"));
    assert!(ctx.runner.live_pids().await.is_empty());
    assert!(ctx.root.join("elsewhere").is_dir());
}

#[tokio::test]
async fn test_relocate_into_non_empty_directory_conflicts() {
    let ctx = TestContext::new().await;
    let runtime = ctx.start().await;
    let coordinator = runtime.coordinator();

    let created = coordinator
        .create(&admin(), create_request("blocked", ctx.path("blocked")))
        .await
        .unwrap();
    std::fs::create_dir_all(ctx.root.join("occupied")).unwrap();
    std::fs::write(ctx.root.join("occupied/keep.txt"), b"x").unwrap();

    let err = coordinator
        .update(
            &admin(),
            InstanceUpdate {
                path: Some(ctx.path("occupied")),
                ..InstanceUpdate::for_instance(created.id)
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Conflict(_)));
    assert_eq!(coordinator.get(created.id).await.unwrap().path, ctx.path("blocked"));
    assert!(ctx.root.join("blocked").is_dir());
}

#[tokio::test]
async fn test_relocate_into_empty_directory() {
    let ctx = TestContext::new().await;
    let runtime = ctx.start().await;
    let coordinator = runtime.coordinator();

    let created = coordinator
        .create(&admin(), create_request("fits", ctx.path("fits")))
        .await
        .unwrap();
    std::fs::create_dir_all(ctx.root.join("empty")).unwrap();

    let moved = coordinator
        .update(
            &admin(),
            InstanceUpdate {
                path: Some(ctx.path("empty")),
                ..InstanceUpdate::for_instance(created.id)
            },
        )
        .await
        .unwrap();
    assert_eq!(moved.path, ctx.path("empty"));
    assert!(!ctx.root.join("fits").exists());
}

#[tokio::test]
async fn test_relocate_then_failed_online_moves_back() {
    let ctx = TestContext::with_runner(MockRunner::failing()).await;
    let runtime = ctx.start().await;
    let coordinator = runtime.coordinator();

    let created = coordinator
        .create(&admin(), create_request("bounce", ctx.path("home")))
        .await
        .unwrap();

    let err = coordinator
        .update(
            &admin(),
            InstanceUpdate {
                path: Some(ctx.path("away")),
                online: Some(true),
                ..InstanceUpdate::for_instance(created.id)
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::RuntimeTransition(_)));
    let current = coordinator.get(created.id).await.unwrap();
    assert_eq!(current.path, ctx.path("home"));
    assert!(!current.online);
    assert!(ctx.root.join("home").is_dir());
    assert!(!ctx.root.join("away").exists());
}

#[tokio::test]
async fn test_failed_move_brings_instance_back_online() {
    let ctx = TestContext::new().await;
    let runtime = ctx.start().await;
    let coordinator = runtime.coordinator();

    let created = coordinator
        .create(&admin(), create_request("sticky", ctx.path("sticky")))
        .await
        .unwrap();
    coordinator
        .update(
            &admin(),
            InstanceUpdate {
                online: Some(true),
                ..InstanceUpdate::for_instance(created.id)
            },
        )
        .await
        .unwrap();

    ctx.io.set_fail_move(true);
    let err = coordinator
        .update(
            &admin(),
            InstanceUpdate {
                path: Some(ctx.path("unreachable")),
                online: Some(false),
                ..InstanceUpdate::for_instance(created.id)
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::RuntimeTransition(_)));
    let current = coordinator.get(created.id).await.unwrap();
    assert!(current.online);
    assert_eq!(current.path, ctx.path("sticky"));
    assert!(runtime.registry().is_online(created.id).await);
    // Stopped for the move, relaunched by the rollback.
    assert_eq!(ctx.runner.launch_count(), 2);
    assert_eq!(ctx.runner.live_pids().await.len(), 1);
}

// ============================================================================
// Delete
// ============================================================================

#[tokio::test]
async fn test_delete_online_instance_leaves_process_running() {
    let ctx = TestContext::new().await;
    let runtime = ctx.start().await;
    let coordinator = runtime.coordinator();

    let created = coordinator
        .create(&admin(), create_request("orphan", ctx.path("orphan")))
        .await
        .unwrap();
    coordinator
        .update(
            &admin(),
            InstanceUpdate {
                online: Some(true),
                ..InstanceUpdate::for_instance(created.id)
            },
        )
        .await
        .unwrap();
    let pid = ctx
        .persistence
        .get_reattach(created.id)
        .await
        .unwrap()
        .unwrap()
        .current()
        .unwrap()
        .pid;

    coordinator.delete(&admin(), created.id).await.unwrap();

    assert!(ctx.runner.is_process_alive(pid).await);
    assert_eq!(ctx.runner.kill_count(), 0);
    assert!(!runtime.registry().is_online(created.id).await);
    assert!(ctx.persistence.get_instance(created.id).await.unwrap().is_none());
    assert!(ctx.persistence.get_reattach(created.id).await.unwrap().is_none());
    // The tree is left on disk.
    assert!(ctx.root.join("orphan").is_dir());
}

#[tokio::test]
async fn test_failed_delete_keeps_supervision() {
    let ctx = TestContext::new().await;
    let runtime = ctx.start().await;
    let coordinator = runtime.coordinator();

    let created = coordinator
        .create(&admin(), create_request("sticky", ctx.path("sticky")))
        .await
        .unwrap();
    coordinator
        .update(
            &admin(),
            InstanceUpdate {
                online: Some(true),
                ..InstanceUpdate::for_instance(created.id)
            },
        )
        .await
        .unwrap();

    sqlx::query(
        "CREATE TRIGGER block_instance_delete BEFORE DELETE ON instances \
         BEGIN SELECT RAISE(ABORT, 'instance delete blocked'); END",
    )
    .execute(ctx.persistence.pool())
    .await
    .unwrap();

    assert!(coordinator.delete(&admin(), created.id).await.is_err());

    // Still recorded, still supervised.
    let instance = coordinator.get(created.id).await.unwrap();
    assert!(instance.online);
    assert!(runtime.registry().is_online(created.id).await);
    let pid = ctx
        .persistence
        .get_reattach(created.id)
        .await
        .unwrap()
        .unwrap()
        .current()
        .unwrap()
        .pid;
    assert!(ctx.runner.is_process_alive(pid).await);

    sqlx::query("DROP TRIGGER block_instance_delete")
        .execute(ctx.persistence.pool())
        .await
        .unwrap();
    coordinator.delete(&admin(), created.id).await.unwrap();
    assert!(!runtime.registry().is_online(created.id).await);
    assert!(ctx.runner.is_process_alive(pid).await);
}

#[tokio::test]
async fn test_delete_errors() {
    let ctx = TestContext::new().await;
    let runtime = ctx.start().await;
    let coordinator = runtime.coordinator();

    let created = coordinator
        .create(&admin(), create_request("keep", ctx.path("keep")))
        .await
        .unwrap();

    let viewer = actor_with("viewer", InstanceManagerRights::LIST);
    assert!(matches!(
        coordinator.delete(&viewer, created.id).await,
        Err(Error::Forbidden(_))
    ));
    assert!(matches!(
        coordinator.delete(&admin(), 31337).await,
        Err(Error::Gone(_))
    ));

    coordinator.delete(&admin(), created.id).await.unwrap();
    assert!(matches!(
        coordinator.delete(&admin(), created.id).await,
        Err(Error::Gone(_))
    ));
}
