//! Allure TestOps exporter against a mocked API.

mod common;

use common::*;
use serde_json::json;
use tms_export::{AllureConfig, AllureExporter, ExportError, ExportOptions, Exporter};
use tms_models::{AttributeType, AttributeValue, LinkType, StateType};
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> AllureConfig {
    AllureConfig {
        url: server.uri(),
        token: "api-token".to_string(),
        project_name: "Shop".to_string(),
        section_fields: vec!["Feature".to_string()],
    }
}

/// Everything after the token exchange must carry the bearer token.
async fn mount(server: &MockServer, route: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .and(header("authorization", "Bearer jwt"))
        .respond_with(response)
        .mount(server)
        .await;
}

fn page(content: serde_json::Value) -> ResponseTemplate {
    json(json!({"content": content, "totalPages": 1, "number": 0}))
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/uaa/oauth/token"))
        .and(body_string_contains("grant_type=apitoken"))
        .and(body_string_contains("token=api-token"))
        .respond_with(json(json!({"access_token": "jwt", "token_type": "bearer"})))
        .expect(1)
        .mount(server)
        .await;
    mount(server, "/api/rs/project", page(json!([{"id": 3, "name": "Shop"}]))).await;
}

#[tokio::test]
async fn test_export_project() {
    let server = MockServer::start().await;
    mount_login(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/rs/testcase"))
        .and(query_param("projectId", "3"))
        .respond_with(page(json!([{"id": 1, "name": "Checkout"}])))
        .mount(&server)
        .await;
    mount(
        &server,
        "/api/rs/testcase/1",
        json(json!({
            "id": 1,
            "name": "Checkout",
            "description": "Happy path",
            "precondition": "Cart is filled",
            "expectedResult": "Order placed",
            "status": {"id": 2, "name": "Ready"},
            "tags": [{"id": 1, "name": "smoke"}],
            "links": [{"name": "SHOP-12", "url": "https://jira.example.com/SHOP-12", "type": "issue"}]
        })),
    )
    .await;
    mount(
        &server,
        "/api/rs/testcase/1/cfv",
        json(json!([
            {"id": 11, "name": "Payments", "customField": {"id": 1, "name": "Feature"}},
            {"id": 12, "name": "API", "customField": {"id": 2, "name": "Layer"}},
            {"id": 13, "name": "UI", "customField": {"id": 2, "name": "Layer"}}
        ])),
    )
    .await;
    mount(
        &server,
        "/api/rs/testcase/attachment",
        page(json!([{"id": 70, "name": "receipt.pdf"}])),
    )
    .await;
    mount(&server, "/api/rs/testcase/attachment/70/content", bytes(b"%PDF")).await;
    mount(
        &server,
        "/api/rs/testcase/1/step",
        json(json!({
            "root": {"children": [100, 101, 102, 103]},
            "scenarioSteps": {
                "100": {"body": "Open cart"},
                "101": {"sharedStepId": 12},
                "102": {"attachmentId": 70},
                "103": {"body": "Pay"}
            }
        })),
    )
    .await;

    mount(&server, "/api/rs/sharedstep/12", json(json!({"id": 12, "name": "Log in"}))).await;
    mount(&server, "/api/rs/sharedstep/attachment", page(json!([]))).await;
    mount(
        &server,
        "/api/rs/sharedstep/12/step",
        json(json!({
            "root": {"children": [1]},
            "scenarioSteps": {"1": {"body": "Enter credentials", "expectedResult": "Logged in"}}
        })),
    )
    .await;

    let exporter = AllureExporter::new(config(&server)).unwrap();
    let (dir, writer) = output();
    let report = exporter.export(writer, &ExportOptions::default()).await.unwrap();

    assert!(report.is_successful(), "errors: {:?}", report.errors);
    assert_eq!(report.test_cases_exported, 1);
    assert_eq!(report.shared_steps_exported, 1);
    assert_eq!(report.attachments_exported, 1);

    let (reader, root) = read_valid(&dir);
    let case = &test_cases(&reader, &root)[0];
    assert_eq!(root.find_section(case.section_id).unwrap().name, "Payments");
    assert_eq!(case.state, StateType::Ready);
    assert_eq!(case.tags, vec!["smoke"]);
    assert_eq!(case.links[0].link_type, LinkType::Issue);
    assert_eq!(case.precondition_steps[0].action, "Cart is filled");

    let actions: Vec<_> = case.steps.iter().map(|s| s.action.as_str()).collect();
    assert_eq!(actions, vec!["Open cart", "", "<<<receipt.pdf>>>", "Pay"]);
    assert_eq!(case.steps[3].expected, "Order placed");
    assert_eq!(case.attachments, vec!["receipt.pdf"]);

    let login = reader
        .read_shared_step(case.steps[1].shared_step_id.unwrap())
        .unwrap();
    assert_eq!(login.name, "Log in");
    assert_eq!(login.steps[0].expected, "Logged in");
    assert_eq!(root.find_section(login.section_id).unwrap().name, "Shared Steps");

    // The section field is not an attribute; the other field groups its values.
    assert_eq!(root.attributes.len(), 1);
    let layer = &root.attributes[0];
    assert_eq!(layer.name, "Layer");
    assert_eq!(layer.attribute_type, AttributeType::MultipleOptions);
    assert_eq!(layer.options, vec!["API", "UI"]);
    assert_eq!(
        case.attributes[0].value,
        AttributeValue::List(vec!["API".to_string(), "UI".to_string()])
    );
}

#[tokio::test]
async fn test_rejected_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/uaa/oauth/token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let exporter = AllureExporter::new(config(&server)).unwrap();
    let (_dir, writer) = output();
    let result = exporter.export(writer, &ExportOptions::default()).await;
    assert!(matches!(result, Err(ExportError::AuthenticationFailed(_))));
}

#[tokio::test]
async fn test_unknown_project() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/uaa/oauth/token"))
        .respond_with(json(json!({"access_token": "jwt"})))
        .mount(&server)
        .await;
    mount(&server, "/api/rs/project", page(json!([{"id": 4, "name": "Other"}]))).await;

    let exporter = AllureExporter::new(config(&server)).unwrap();
    let (_dir, writer) = output();
    let result = exporter.export(writer, &ExportOptions::default()).await;
    assert!(matches!(result, Err(ExportError::ProjectNotFound(name)) if name == "Shop"));
}
