//! Azure DevOps exporter against a mocked API.

mod common;

use common::*;
use serde_json::{json, Value};
use tms_export::{AzureDevOpsConfig, AzureDevOpsExporter, ExportError, ExportOptions, Exporter};
use tms_models::{PriorityType, StateType};
use wiremock::matchers::{body_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GUID: &str = "0a1b2c3d-4e5f-6071-8293-a4b5c6d7e8f9";

fn config(server: &MockServer) -> AzureDevOpsConfig {
    AzureDevOpsConfig {
        url: server.uri(),
        token: "pat".to_string(),
        project_name: "Shop".to_string(),
    }
}

async fn mount_project(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/_apis/projects/Shop"))
        // Empty user name, token as password.
        .and(header("authorization", "Basic OnBhdA=="))
        .respond_with(json(json!({"id": "p1", "name": "Shop"})))
        .mount(server)
        .await;
}

async fn mount_query(server: &MockServer, work_item_type: &str, ids: &[u64]) {
    let refs: Vec<Value> = ids.iter().map(|id| json!({"id": id})).collect();
    Mock::given(method("POST"))
        .and(path("/p1/_apis/wit/wiql"))
        .and(body_string_contains(format!("'{work_item_type}'")))
        .respond_with(json(json!({"workItems": refs})))
        .mount(server)
        .await;
}

async fn mount_batch(server: &MockServer, ids: &[u64], items: Value) {
    Mock::given(method("POST"))
        .and(path("/p1/_apis/wit/workitemsbatch"))
        .and(body_json(json!({"ids": ids, "$expand": "Relations"})))
        .respond_with(json(json!({"count": ids.len(), "value": items})))
        .mount(server)
        .await;
}

fn checkout_steps() -> String {
    format!(
        r#"<steps id="0" last="3"><step id="2" type="ActionStep"><parameterizedString isformatted="true">&lt;P&gt;Open &lt;img src="https://dev.azure.com/org/_apis/wit/attachments/{}?fileName=cart.png"&gt;&lt;/P&gt;</parameterizedString><parameterizedString isformatted="true">Cart shown</parameterizedString><description/></step><compref id="3" ref="5"/></steps>"#,
        GUID.to_uppercase()
    )
}

#[tokio::test]
async fn test_export_project() {
    let server = MockServer::start().await;
    mount_project(&server).await;

    mount_query(&server, "Shared Steps", &[5]).await;
    mount_batch(
        &server,
        &[5],
        json!([{
            "id": 5,
            "fields": {
                "System.Title": "Log in",
                "System.AreaPath": "Shop\\Common",
                "System.State": "Active",
                "Microsoft.VSTS.TCM.Steps": "<steps id=\"0\"><step id=\"1\" type=\"ActionStep\"><parameterizedString isformatted=\"true\">Enter credentials</parameterizedString><parameterizedString isformatted=\"true\">Logged in</parameterizedString></step></steps>"
            }
        }]),
    )
    .await;

    mount_query(&server, "Test Case", &[10, 11]).await;
    mount_batch(
        &server,
        &[10, 11],
        json!([
            {
                "id": 10,
                "fields": {
                    "System.Title": "Checkout",
                    "System.AreaPath": "Shop\\Web\\Checkout",
                    "System.State": "Ready",
                    "System.Tags": "smoke; ui",
                    "Microsoft.VSTS.Common.Priority": 1,
                    "Microsoft.VSTS.TCM.Steps": checkout_steps(),
                    "Microsoft.VSTS.TCM.LocalDataSource": "<NewDataSet><Table1><card>4242</card></Table1><Table1><card>5555</card></Table1></NewDataSet>"
                },
                "relations": [
                    {
                        "rel": "AttachedFile",
                        "url": format!("{}/_apis/wit/attachments/{GUID}?fileName=cart.png", server.uri()),
                        "attributes": {"name": "cart.png"}
                    },
                    {
                        "rel": "Hyperlink",
                        "url": "https://wiki.example.com/checkout",
                        "attributes": {"comment": "Design"}
                    }
                ]
            },
            {
                "id": 11,
                "fields": {
                    "System.Title": "Foreign call",
                    "System.AreaPath": "Shop",
                    "Microsoft.VSTS.TCM.Steps": "<steps id=\"0\"><compref id=\"1\" ref=\"99\"/></steps>",
                    "Microsoft.VSTS.TCM.LocalDataSource": "{\"parameterMap\":[]}"
                }
            }
        ]),
    )
    .await;

    Mock::given(method("GET"))
        .and(path(format!("/_apis/wit/attachments/{GUID}")))
        .respond_with(bytes(b"image"))
        .mount(&server)
        .await;

    let exporter = AzureDevOpsExporter::new(config(&server)).unwrap();
    let (dir, writer) = output();
    let report = exporter.export(writer, &ExportOptions::default()).await.unwrap();

    assert!(report.is_successful(), "errors: {:?}", report.errors);
    assert_eq!(report.test_cases_exported, 2);
    assert_eq!(report.shared_steps_exported, 2);
    assert_eq!(report.attachments_exported, 1);
    assert!(report.warnings.iter().any(|w| w.contains("shared parameters")));
    assert!(report.warnings.iter().any(|w| w.contains("Shared step 99")));

    let (reader, root) = read_valid(&dir);
    let cases = test_cases(&reader, &root);

    let checkout = cases.iter().find(|c| c.name == "Checkout").unwrap();
    assert_eq!(root.find_section(checkout.section_id).unwrap().name, "Checkout");
    assert_eq!(checkout.priority, PriorityType::Highest);
    assert_eq!(checkout.state, StateType::Ready);
    assert_eq!(checkout.tags, vec!["smoke", "ui"]);
    assert_eq!(checkout.links[0].description.as_deref(), Some("Design"));
    assert_eq!(checkout.attachments, vec!["cart.png"]);
    assert_eq!(checkout.steps[0].action, "<P>Open <<<cart.png>>></P>");
    assert_eq!(checkout.steps[0].action_attachments, vec!["cart.png"]);
    assert_eq!(checkout.iterations.len(), 2);
    assert_eq!(checkout.iterations[1].parameters[0].name, "card");
    assert_eq!(checkout.iterations[1].parameters[0].value, "5555");

    let login = reader
        .read_shared_step(checkout.steps[1].shared_step_id.unwrap())
        .unwrap();
    assert_eq!(login.name, "Log in");
    assert_eq!(root.find_section(login.section_id).unwrap().name, "Common");
    assert_eq!(login.steps[0].expected, "Logged in");

    let foreign = cases.iter().find(|c| c.name == "Foreign call").unwrap();
    assert_eq!(root.find_section(foreign.section_id).unwrap().name, "Imported");
    assert!(foreign.iterations.is_empty());
    let placeholder = reader
        .read_shared_step(foreign.steps[0].shared_step_id.unwrap())
        .unwrap();
    assert!(placeholder.steps.is_empty());
}

#[tokio::test]
async fn test_unknown_project() {
    let server = MockServer::start().await;

    let exporter = AzureDevOpsExporter::new(config(&server)).unwrap();
    let (_dir, writer) = output();
    let result = exporter.export(writer, &ExportOptions::default()).await;
    assert!(matches!(result, Err(ExportError::ProjectNotFound(name)) if name == "Shop"));
}

#[tokio::test]
async fn test_broken_steps_document_fails_only_that_case() {
    let server = MockServer::start().await;
    mount_project(&server).await;
    mount_query(&server, "Shared Steps", &[]).await;
    mount_query(&server, "Test Case", &[1, 2]).await;
    mount_batch(
        &server,
        &[1, 2],
        json!([
            {"id": 1, "fields": {"System.Title": "Broken", "Microsoft.VSTS.TCM.Steps": "<steps><step></steps>"}},
            {"id": 2, "fields": {"System.Title": "Plain"}}
        ]),
    )
    .await;

    let exporter = AzureDevOpsExporter::new(config(&server)).unwrap();
    let (dir, writer) = output();
    let report = exporter
        .export(writer, &ExportOptions::default().with_attachments(false))
        .await
        .unwrap();

    assert_eq!(report.test_cases_exported, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].message.starts_with("1 Broken"));

    let (reader, root) = read_valid(&dir);
    assert_eq!(test_cases(&reader, &root)[0].name, "Plain");
}

#[tokio::test]
async fn test_description_image_with_uppercase_guid_is_relinked() {
    let server = MockServer::start().await;
    mount_project(&server).await;
    mount_query(&server, "Shared Steps", &[]).await;
    mount_query(&server, "Test Case", &[20]).await;
    mount_batch(
        &server,
        &[20],
        json!([{
            "id": 20,
            "fields": {
                "System.Title": "Receipt",
                "System.Description": format!(
                    r#"<div>Layout <img src="https://dev.azure.com/org/_apis/wit/attachments/{}?fileName=receipt.png"></div>"#,
                    GUID.to_uppercase()
                )
            },
            "relations": [{
                "rel": "AttachedFile",
                "url": format!("{}/_apis/wit/attachments/{GUID}?fileName=receipt.png", server.uri()),
                "attributes": {"name": "receipt.png"}
            }]
        }]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path(format!("/_apis/wit/attachments/{GUID}")))
        .respond_with(bytes(b"image"))
        .mount(&server)
        .await;

    let exporter = AzureDevOpsExporter::new(config(&server)).unwrap();
    let (dir, writer) = output();
    let report = exporter.export(writer, &ExportOptions::default()).await.unwrap();
    assert!(report.is_successful(), "errors: {:?}", report.errors);

    let (reader, root) = read_valid(&dir);
    let case = &test_cases(&reader, &root)[0];
    assert_eq!(case.description, "<div>Layout <<<receipt.png>>></div>");
    assert_eq!(case.attachments, vec!["receipt.png"]);
}
