//! End-to-end reconciliation scenarios for the CRUD runner, driven against
//! a mock HTTP backend.

use serde_json::{json, Value};
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use converge::{reconcile, Error, ResourceDescriptor, RunParams};

fn descriptor(value: Value) -> ResourceDescriptor {
    ResourceDescriptor::from_value(value).unwrap()
}

/// A flat CRUD resource with one simple field and one action endpoint.
fn security_group_descriptor() -> ResourceDescriptor {
    descriptor(json!({
        "resource_type": "security group",
        "runner": "crud",
        "check_url": "/api/security-groups/",
        "create_path": "/api/security-groups/",
        "update_path": "/api/security-groups/{uuid}/",
        "destroy_path": "/api/security-groups/{uuid}/",
        "resource_detail_path": "/api/security-groups/{uuid}/",
        "model_param_names": ["name", "description"],
        "update_fields": ["description"],
        "update_actions": [{
            "name": "set_rules",
            "path": "/api/security-groups/{uuid}/set_rules/",
            "param": "rules",
            "compare_key": "rules",
            "idempotency_keys": ["protocol", "from_port", "to_port"]
        }],
        "wait_config": {}
    }))
}

/// A resource created under a parent, with the parent resolved into the path.
fn nested_descriptor() -> ResourceDescriptor {
    descriptor(json!({
        "resource_type": "security group",
        "runner": "crud",
        "check_url": "/api/security-groups/",
        "create_path": "/api/tenants/{uuid}/security_groups/",
        "destroy_path": "/api/security-groups/{uuid}/",
        "path_param_maps": {"create": {"uuid": "tenant"}},
        "model_param_names": ["name"],
        "resolvers": {
            "tenant": {
                "url": "/api/tenants/",
                "error_message": "Tenant '{value}' not found."
            }
        },
        "resolver_order": ["tenant"]
    }))
}

fn run_params(server: &MockServer, extra: Value) -> RunParams {
    let mut bag = json!({
        "api_url": server.uri(),
        "access_token": "test-token",
        "interval": 1,
        "timeout": 5
    });
    if let (Some(bag), Value::Object(extra)) = (bag.as_object_mut(), extra) {
        for (key, value) in extra {
            bag.insert(key, value);
        }
    }
    RunParams::from_value(bag).unwrap()
}

#[tokio::test]
async fn creates_missing_resource() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/security-groups/"))
        .and(query_param("name_exact", "web"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/security-groups/"))
        .and(body_json(json!({"name": "web"})))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!({"uuid": "sg-1", "name": "web", "rules": []})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let result = reconcile(
        security_group_descriptor(),
        run_params(&server, json!({"name": "web"})),
    )
    .await
    .unwrap();

    assert!(result.changed);
    let resource = result.resource.unwrap();
    assert_eq!(resource["uuid"], "sg-1");
    assert_eq!(result.commands.len(), 1);
    assert_eq!(result.commands[0]["method"], "POST");
    assert_eq!(result.commands[0]["diff"]["new_attributes"], json!({"name": "web"}));
}

#[tokio::test]
async fn absent_missing_resource_is_a_noop() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/security-groups/"))
        .and(query_param("name_exact", "web"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let result = reconcile(
        security_group_descriptor(),
        run_params(&server, json!({"name": "web", "state": "absent"})),
    )
    .await
    .unwrap();

    assert!(!result.changed);
    assert!(result.resource.is_none());
    assert!(result.commands.is_empty());
}

#[tokio::test]
async fn matching_resource_leaves_everything_untouched() {
    let server = MockServer::start().await;
    let current = json!({
        "uuid": "sg-1",
        "name": "web",
        "description": "web traffic",
        "rules": [
            {"protocol": "udp", "from_port": 53, "to_port": 53, "uuid": "r2"},
            {"protocol": "tcp", "from_port": 22, "to_port": 22, "uuid": "r1"}
        ]
    });

    Mock::given(method("GET"))
        .and(path("/api/security-groups/"))
        .and(query_param("name_exact", "web"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([current])))
        .expect(1)
        .mount(&server)
        .await;

    // Desired rules differ from the server's in order and lack server-side
    // fields; the comparison must still see them as equal.
    let result = reconcile(
        security_group_descriptor(),
        run_params(
            &server,
            json!({
                "name": "web",
                "description": "web traffic",
                "rules": [
                    {"protocol": "tcp", "from_port": 22, "to_port": 22},
                    {"protocol": "udp", "from_port": 53, "to_port": 53}
                ]
            }),
        ),
    )
    .await
    .unwrap();

    assert!(!result.changed);
    assert!(result.commands.is_empty());
    assert_eq!(result.resource.unwrap()["uuid"], "sg-1");
}

#[tokio::test]
async fn combines_patch_and_action_in_one_run() {
    let server = MockServer::start().await;
    let current = json!({
        "uuid": "sg-1",
        "name": "web",
        "description": "old",
        "rules": [{"protocol": "tcp", "from_port": 22, "to_port": 22, "uuid": "r1"}]
    });
    let desired_rules = json!([
        {"protocol": "tcp", "from_port": 22, "to_port": 22},
        {"protocol": "udp", "from_port": 53, "to_port": 53}
    ]);
    let final_resource = json!({
        "uuid": "sg-1",
        "name": "web",
        "description": "new",
        "rules": [
            {"protocol": "tcp", "from_port": 22, "to_port": 22, "uuid": "r1"},
            {"protocol": "udp", "from_port": 53, "to_port": 53, "uuid": "r2"}
        ]
    });

    Mock::given(method("GET"))
        .and(path("/api/security-groups/"))
        .and(query_param("name_exact", "web"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([current])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/security-groups/sg-1/"))
        .and(body_json(json!({"description": "new"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uuid": "sg-1",
            "name": "web",
            "description": "new",
            "rules": [{"protocol": "tcp", "from_port": 22, "to_port": 22, "uuid": "r1"}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/security-groups/sg-1/set_rules/"))
        .and(body_json(desired_rules.clone()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    // Re-fetch after the synchronous action.
    Mock::given(method("GET"))
        .and(path("/api/security-groups/"))
        .and(query_param("name_exact", "web"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([final_resource])))
        .expect(1)
        .mount(&server)
        .await;

    let result = reconcile(
        security_group_descriptor(),
        run_params(
            &server,
            json!({"name": "web", "description": "new", "rules": desired_rules}),
        ),
    )
    .await
    .unwrap();

    assert!(result.changed);
    assert_eq!(result.commands.len(), 2);
    assert_eq!(result.commands[0]["method"], "PATCH");
    assert_eq!(
        result.commands[0]["diff"]["updated_attributes"][0],
        json!({"param": "description", "old": "old", "new": "new"})
    );
    assert_eq!(result.commands[1]["method"], "POST");
    assert_eq!(result.resource.unwrap()["description"], "new");
}

#[tokio::test]
async fn accepted_action_polls_resource_until_stable() {
    let server = MockServer::start().await;
    let current = json!({"uuid": "sg-1", "name": "web", "rules": []});
    let stable = json!({
        "uuid": "sg-1",
        "name": "web",
        "state": "OK",
        "rules": [{"protocol": "tcp", "from_port": 22, "to_port": 22, "uuid": "r1"}]
    });

    Mock::given(method("GET"))
        .and(path("/api/security-groups/"))
        .and(query_param("name_exact", "web"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([current])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/security-groups/sg-1/set_rules/"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/security-groups/sg-1/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stable.clone()))
        .mount(&server)
        .await;

    let result = reconcile(
        security_group_descriptor(),
        run_params(
            &server,
            json!({
                "name": "web",
                "rules": [{"protocol": "tcp", "from_port": 22, "to_port": 22}]
            }),
        ),
    )
    .await
    .unwrap();

    assert!(result.changed);
    assert_eq!(result.resource.unwrap(), stable);
}

#[tokio::test]
async fn poll_gives_up_after_the_timeout() {
    let server = MockServer::start().await;
    let current = json!({"uuid": "sg-1", "name": "web", "rules": []});

    Mock::given(method("GET"))
        .and(path("/api/security-groups/"))
        .and(query_param("name_exact", "web"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([current])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/security-groups/sg-1/set_rules/"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/security-groups/sg-1/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"uuid": "sg-1", "state": "Updating"})),
        )
        .mount(&server)
        .await;

    let err = reconcile(
        security_group_descriptor(),
        run_params(
            &server,
            json!({
                "name": "web",
                "timeout": 1,
                "rules": [{"protocol": "tcp", "from_port": 22, "to_port": 22}]
            }),
        ),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Timeout(_)));
}

#[tokio::test]
async fn resource_vanishing_mid_poll_is_success() {
    let server = MockServer::start().await;
    let current = json!({"uuid": "sg-1", "name": "web", "rules": []});

    Mock::given(method("GET"))
        .and(path("/api/security-groups/"))
        .and(query_param("name_exact", "web"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([current])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/security-groups/sg-1/set_rules/"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/security-groups/sg-1/"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let result = reconcile(
        security_group_descriptor(),
        run_params(
            &server,
            json!({
                "name": "web",
                "rules": [{"protocol": "tcp", "from_port": 22, "to_port": 22}]
            }),
        ),
    )
    .await
    .unwrap();

    assert!(result.changed);
    assert!(result.resource.is_none());
}

#[tokio::test]
async fn deletes_existing_resource() {
    let server = MockServer::start().await;
    let current = json!({"uuid": "sg-1", "name": "web"});

    Mock::given(method("GET"))
        .and(path("/api/security-groups/"))
        .and(query_param("name_exact", "web"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([current])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/security-groups/sg-1/"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let result = reconcile(
        security_group_descriptor(),
        run_params(&server, json!({"name": "web", "state": "absent"})),
    )
    .await
    .unwrap();

    assert!(result.changed);
    assert!(result.resource.is_none());
    assert_eq!(result.commands[0]["method"], "DELETE");
    assert_eq!(
        result.commands[0]["diff"]["old_attributes"]["uuid"],
        "sg-1"
    );
}

#[tokio::test]
async fn nested_creation_resolves_the_parent_into_the_path() {
    let server = MockServer::start().await;
    let tenant_url = format!("{}/api/tenants/t-1/", server.uri());

    Mock::given(method("GET"))
        .and(path("/api/security-groups/"))
        .and(query_param("name_exact", "web"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/tenants/"))
        .and(query_param("name_exact", "cloud-tenant"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"uuid": "t-1", "url": tenant_url}])),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/tenants/t-1/security_groups/"))
        .and(body_json(json!({"name": "web"})))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({"uuid": "sg-1", "name": "web"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let result = reconcile(
        nested_descriptor(),
        run_params(&server, json!({"name": "web", "tenant": "cloud-tenant"})),
    )
    .await
    .unwrap();

    assert!(result.changed);
    assert_eq!(result.resource.unwrap()["uuid"], "sg-1");
}

#[tokio::test]
async fn unresolvable_parent_fails_with_the_configured_message() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/security-groups/"))
        .and(query_param("name_exact", "web"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/tenants/"))
        .and(query_param("name_exact", "nonexistent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let err = reconcile(
        nested_descriptor(),
        run_params(&server, json!({"name": "web", "tenant": "nonexistent"})),
    )
    .await
    .unwrap_err();

    assert_eq!(err.to_string(), "Tenant 'nonexistent' not found.");
}

#[tokio::test]
async fn check_mode_plans_without_mutating() {
    let server = MockServer::start().await;

    // Only the existence check is mounted; any mutating call would hit an
    // unmatched route and fail the run.
    Mock::given(method("GET"))
        .and(path("/api/security-groups/"))
        .and(query_param("name_exact", "web"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let result = reconcile(
        security_group_descriptor(),
        run_params(&server, json!({"name": "web", "check_mode": true})),
    )
    .await
    .unwrap();

    assert!(result.changed);
    assert!(result.resource.is_none());
    assert_eq!(result.commands.len(), 1);
    assert_eq!(
        result.commands[0]["diff"]["state"],
        "Resource will be created."
    );
}

#[tokio::test]
async fn uuid_name_fetches_the_detail_endpoint_directly() {
    let server = MockServer::start().await;
    let uuid = "3c0f5d2e-8f6a-4e0b-9c8d-1a2b3c4d5e6f";

    // Only the detail endpoint is mounted; a name_exact list query would
    // hit an unmatched route and fail the run.
    Mock::given(method("GET"))
        .and(path(format!("/api/security-groups/{uuid}/")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uuid": uuid,
            "name": "web",
            "rules": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = reconcile(
        security_group_descriptor(),
        run_params(&server, json!({"name": uuid})),
    )
    .await
    .unwrap();

    assert!(!result.changed);
    assert_eq!(result.resource.unwrap()["name"], "web");
}

#[tokio::test]
async fn unknown_uuid_name_counts_as_absent() {
    let server = MockServer::start().await;
    let uuid = "3c0f5d2e-8f6a-4e0b-9c8d-1a2b3c4d5e6f";

    Mock::given(method("GET"))
        .and(path(format!("/api/security-groups/{uuid}/")))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let result = reconcile(
        security_group_descriptor(),
        run_params(&server, json!({"name": uuid, "state": "absent"})),
    )
    .await
    .unwrap();

    assert!(!result.changed);
    assert!(result.resource.is_none());
    assert!(result.commands.is_empty());
}

#[tokio::test]
async fn first_of_multiple_matches_wins() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/security-groups/"))
        .and(query_param("name_exact", "web"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"uuid": "sg-1", "name": "web"},
            {"uuid": "sg-2", "name": "web"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let result = reconcile(
        security_group_descriptor(),
        run_params(&server, json!({"name": "web"})),
    )
    .await
    .unwrap();

    assert!(!result.changed);
    assert_eq!(result.resource.unwrap()["uuid"], "sg-1");
}
