//! End-to-end reconciliation runs against a mock API.

mod common;

use cherrysync::error::{CherryError, ReconcileError};
use cherrysync::resource::{
    DesiredResource, FloatingIpSpec, Presence, ReinstallPolicy, ServerSpec, ServerState, SshKeySpec, VolumeSpec, VolumeState,
};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn deploy_key() -> SshKeySpec {
    SshKeySpec {
        label: Some(String::from("deploy")),
        key: Some(String::from("ssh-ed25519 AAAAC3Nz deploy@ci")),
        ..SshKeySpec::default()
    }
}

#[tokio::test]
async fn test_converged_resource_is_unchanged() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ssh-keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 11, "label": "deploy", "key": "ssh-ed25519 AAAAC3Nz deploy@ci\n", "fingerprint": "aa:bb"},
            {"id": 12, "label": "other", "key": "ssh-rsa AAAAB3", "fingerprint": "cc:dd"}
        ])))
        .mount(&server)
        .await;

    let reconciler = common::reconciler(&server);
    let plan = reconciler.plan(&deploy_key()).await.unwrap();
    assert!(!plan.has_changes());

    let result = reconciler.reconcile(&deploy_key()).await.unwrap();
    assert!(!result.changed);
    assert!(result.operations.is_empty());
    assert_eq!(result.id.as_deref(), Some("11"));
    assert_eq!(result.observed.map(|k| k.fingerprint).as_deref(), Some("aa:bb"));

    let log = common::request_log(&server).await;
    assert!(log.iter().all(|line| line.starts_with("GET")), "{log:?}");
}

#[tokio::test]
async fn test_ambiguous_lookup_mutates_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects/9/servers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            common::server_json(1, "web-1", "deployed"),
            common::server_json(2, "web-1", "deployed")
        ])))
        .mount(&server)
        .await;

    let spec = ServerSpec {
        project_id: Some(9),
        hostname: Some(String::from("web-1")),
        reinstall: ReinstallPolicy::Always,
        ..ServerSpec::default()
    };
    let err = common::reconciler(&server).reconcile(&spec).await.unwrap_err();
    match err {
        CherryError::Reconcile(ReconcileError::AmbiguousResource { matches, .. }) => {
            assert_eq!(matches, vec![String::from("1"), String::from("2")]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(common::request_log(&server).await, vec![String::from("GET /projects/9/servers")]);
}

#[tokio::test]
async fn test_reinstall_keeps_observed_image_and_keys() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects/9/servers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([common::server_json(
            383_531, "web-1", "deployed"
        )])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/servers/383531/actions"))
        .and(body_partial_json(json!({
            "type": "reinstall",
            "image": "ubuntu_22_04",
            "ssh_keys": [1, 2]
        })))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({"id": 383_531})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/servers/383531"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::server_json(383_531, "web-1", "reinstalling")))
        .mount(&server)
        .await;

    let spec = ServerSpec {
        project_id: Some(9),
        hostname: Some(String::from("web-1")),
        reinstall: ReinstallPolicy::Always,
        ..ServerSpec::default()
    };
    let result = common::reconciler(&server).reconcile(&spec).await.unwrap();
    assert!(result.changed);
    assert_eq!(result.operations, vec![String::from("action(reinstall)")]);
    assert_eq!(result.observed.map(|s| s.status).as_deref(), Some("reinstalling"));

    let requests = server.received_requests().await.unwrap();
    let action = requests
        .iter()
        .find(|r| r.url.path() == "/servers/383531/actions")
        .unwrap();
    let body: Value = serde_json::from_slice(&action.body).unwrap();
    assert_eq!(body["password"].as_str().map(str::len), Some(16));
}

#[tokio::test]
async fn test_failure_after_update_reports_partial_apply() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/servers/383531"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::server_json(383_531, "web-1", "deployed")))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/servers/383531"))
        .and(body_partial_json(json!({"hostname": "web-2"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::server_json(383_531, "web-2", "deployed")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/servers/383531/actions"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let spec = ServerSpec {
        id: Some(383_531),
        hostname: Some(String::from("web-2")),
        reinstall: ReinstallPolicy::Always,
        ..ServerSpec::default()
    };
    let err = common::reconciler(&server).reconcile(&spec).await.unwrap_err();
    match err {
        CherryError::Reconcile(ReconcileError::PartialApply {
            applied, failed, source, ..
        }) => {
            assert_eq!(applied, vec![String::from("update(hostname)")]);
            assert_eq!(failed, "action(reinstall)");
            assert!(matches!(
                *source,
                CherryError::Reconcile(ReconcileError::RetriesExhausted { attempts: 2, .. })
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_rejected_payload_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ssh-keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/ssh-keys"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"message": "key is malformed"})))
        .expect(1)
        .mount(&server)
        .await;

    let err = common::reconciler(&server).reconcile(&deploy_key()).await.unwrap_err();
    match err {
        CherryError::Reconcile(ReconcileError::OperationFailed { operation, source, .. }) => {
            assert_eq!(operation, "create");
            assert!(source.to_string().contains("key is malformed"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_absent_and_missing_is_a_noop() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects/9/servers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([common::server_json(
            1, "web-1", "deployed"
        )])))
        .mount(&server)
        .await;

    let spec = ServerSpec {
        state: ServerState::Absent,
        project_id: Some(9),
        hostname: Some(String::from("web-9")),
        ..ServerSpec::default()
    };
    let result = common::reconciler(&server).reconcile(&spec).await.unwrap();
    assert!(!result.changed);
    assert!(result.id.is_none());
    assert!(result.observed.is_none());

    let hidden_ip = FloatingIpSpec {
        state: Presence::Absent,
        id: Some(String::from("gone")),
        ..FloatingIpSpec::default()
    };
    Mock::given(method("GET"))
        .and(path("/ips/gone"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    let result = common::reconciler(&server).reconcile(&hidden_ip).await.unwrap();
    assert!(!result.changed);
}

#[tokio::test]
async fn test_floating_ip_is_unassigned_before_delete() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ips/f1e2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "f1e2",
            "address": "5.199.171.1",
            "type": "floating-ip",
            "targeted_to": {"id": 7}
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/ips/f1e2"))
        .and(body_partial_json(json!({"targeted_to": 0})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/ips/f1e2"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let spec = FloatingIpSpec {
        state: Presence::Absent,
        id: Some(String::from("f1e2")),
        ..FloatingIpSpec::default()
    };
    let result = common::reconciler(&server).reconcile(&spec).await.unwrap();
    assert!(result.changed);
    assert_eq!(
        result.operations,
        vec![String::from("update(targeted_to)"), String::from("delete")]
    );
    assert!(result.observed.is_none());

    let log = common::request_log(&server).await;
    let put = log.iter().position(|l| l == "PUT /ips/f1e2").unwrap();
    let delete = log.iter().position(|l| l == "DELETE /ips/f1e2").unwrap();
    assert!(put < delete);
}

#[tokio::test]
async fn test_resize_follows_the_new_volume_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/storages/55"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 55, "size": 50})))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/storages/55"))
        .and(body_partial_json(json!({"size": 100})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 56, "size": 100})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/storages/56"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 56,
            "size": 100,
            "attached_to": {"id": 77}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/storages/56/attachments"))
        .and(body_partial_json(json!({"attach_to": 77})))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let spec = VolumeSpec {
        id: Some(55),
        size: Some(100),
        target_server_id: Some(77),
        ..VolumeSpec::default()
    };
    let result = common::reconciler(&server).reconcile(&spec).await.unwrap();
    assert_eq!(result.id.as_deref(), Some("56"));
    assert_eq!(
        result.operations,
        vec![String::from("update(size)"), String::from("action(attach)")]
    );
    assert_eq!(result.observed.and_then(|v| v.attached_server_id()), Some(77));
}

#[tokio::test]
async fn test_wait_timeout_is_a_warning() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/storages/55"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 55, "size": 50})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/storages/55/attachments"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let spec = VolumeSpec {
        state: VolumeState::Attached,
        id: Some(55),
        target_server_id: Some(77),
        wait: true,
        ..VolumeSpec::default()
    };
    let result = common::reconciler(&server).reconcile(&spec).await.unwrap();
    assert!(result.changed);
    assert_eq!(result.operations, vec![String::from("action(attach)")]);
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("attachment to server 77"));
}

#[tokio::test]
async fn test_create_then_wait_for_active() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects/9/servers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/projects/9/servers"))
        .and(body_partial_json(json!({
            "hostname": "web-1",
            "plan": "e5_1620v4",
            "region": "LT-Siauliai"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(common::server_json(1, "web-1", "pending")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/servers/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::server_json(1, "web-1", "pending")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/servers/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::server_json(1, "web-1", "deployed")))
        .mount(&server)
        .await;

    let spec = ServerSpec {
        state: ServerState::Active,
        project_id: Some(9),
        hostname: Some(String::from("web-1")),
        plan: Some(String::from("e5_1620v4")),
        region: Some(String::from("LT-Siauliai")),
        ..ServerSpec::default()
    };
    let result = common::reconciler(&server).reconcile(&spec).await.unwrap();
    assert!(result.changed);
    assert_eq!(result.id.as_deref(), Some("1"));
    assert_eq!(result.operations, vec![String::from("create")]);
    assert!(result.warnings.is_empty());
    assert_eq!(result.observed.map(|s| s.status).as_deref(), Some("deployed"));
}

#[tokio::test]
async fn test_errored_server_fails_the_wait() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/servers/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::server_json(1, "web-1", "failed")))
        .mount(&server)
        .await;

    let spec = ServerSpec {
        state: ServerState::Active,
        id: Some(1),
        ..ServerSpec::default()
    };
    let err = common::reconciler(&server).reconcile(&spec).await.unwrap_err();
    assert!(matches!(
        err,
        CherryError::Reconcile(ReconcileError::WaitFailed { ref applied, .. }) if applied.is_empty()
    ));
}

#[tokio::test]
async fn test_plan_failure_does_not_stop_other_entries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ssh-keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/servers/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::server_json(1, "web-1", "deployed")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/storages/55"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 55, "size": 50})))
        .mount(&server)
        .await;

    let resources = vec![
        DesiredResource::SshKey(deploy_key()),
        DesiredResource::Server(ServerSpec {
            id: Some(1),
            image: Some(String::from("debian_12")),
            ..ServerSpec::default()
        }),
        DesiredResource::Volume(VolumeSpec {
            id: Some(55),
            size: Some(100),
            ..VolumeSpec::default()
        }),
    ];
    let plans = common::reconciler(&server).plan_each(&resources).await;

    assert_eq!(plans.len(), 3);
    assert!(plans[0].as_ref().unwrap().has_changes());
    assert!(matches!(
        plans[1],
        Err(CherryError::Reconcile(ReconcileError::ReinstallRequired { .. }))
    ));
    assert!(plans[2].as_ref().unwrap().has_changes());
    assert!(common::request_log(&server).await.iter().all(|r| r.starts_with("GET ")));
}

#[tokio::test]
async fn test_booting_server_still_needs_apply() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/servers/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::server_json(1, "web-1", "pending")))
        .mount(&server)
        .await;

    let spec = ServerSpec {
        state: ServerState::Active,
        id: Some(1),
        ..ServerSpec::default()
    };
    let plan = common::reconciler(&server).plan(&spec).await.unwrap();
    assert!(!plan.has_changes());
    assert_eq!(plan.pending_wait.as_deref(), Some("active status"));
    assert!(plan.needs_apply());
}

fn new_volume(target: u64) -> VolumeSpec {
    VolumeSpec {
        state: VolumeState::Attached,
        project_id: Some(9),
        region: Some(String::from("LT-Siauliai")),
        size: Some(100),
        target_server_id: Some(target),
        ..VolumeSpec::default()
    }
}

#[tokio::test]
async fn test_volume_create_checks_target_server() {
    let server = MockServer::start().await;
    let mut busy = common::server_json(77, "db-1", "deployed");
    busy["storage"] = json!({"id": 3});
    Mock::given(method("GET"))
        .and(path("/servers/77"))
        .respond_with(ResponseTemplate::new(200).set_body_json(busy))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/servers/78"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 56, "size": 100})))
        .expect(0)
        .mount(&server)
        .await;

    let reconciler = common::reconciler(&server);

    let err = reconciler.reconcile(&new_volume(77)).await.unwrap_err();
    assert!(err.to_string().contains("target server 77 already has storage 3 attached"));

    let err = reconciler.plan(&new_volume(78)).await.unwrap_err();
    assert!(err.to_string().contains("server 78 does not exist"));
}
