//! Importer against a mocked Test IT API.

use serde_json::{json, Value};
use tempfile::TempDir;
use tms_import::{ImportConfig, ImportError, ImportOptions, Importer};
use tms_models::{
    placeholder, Attribute, AttributeType, AttributeValue, CaseAttribute, ExportReader,
    ExportWriter, Iteration, Parameter, PriorityType, Root, Section, SharedStep, Step, TestCase,
};
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const PROJECT: Uuid = Uuid::from_u128(0x100);
const ROOT_SECTION: Uuid = Uuid::from_u128(0x101);
const WEB: Uuid = Uuid::from_u128(0x102);
const CHECKOUT: Uuid = Uuid::from_u128(0x103);
const ATTRIBUTE: Uuid = Uuid::from_u128(0x104);
const OPTION_API: Uuid = Uuid::from_u128(0x105);
const ATTACHMENT: Uuid = Uuid::from_u128(0x106);
const PARAMETER: Uuid = Uuid::from_u128(0x107);
const SHARED_WORK_ITEM: Uuid = Uuid::from_u128(0x108);

fn config(server: &MockServer, existing: bool) -> ImportConfig {
    ImportConfig {
        url: server.uri(),
        token: "tok".to_string(),
        project_name: None,
        import_to_existing_project: existing,
    }
}

fn json(body: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

/// A small export: Web/Checkout sections, one attribute, one shared step and
/// one test case calling it with an inline attachment and one iteration.
fn write_export() -> TempDir {
    let dir = TempDir::new().unwrap();
    let writer = ExportWriter::create(dir.path()).unwrap();

    let web = Uuid::from_u128(1);
    let checkout = Uuid::from_u128(2);
    let layer = Uuid::from_u128(3);
    let shared_id = Uuid::from_u128(4);
    let case_id = Uuid::from_u128(5);

    let mut root = Root::new("Shop");
    let mut attribute = Attribute::new(layer, "Layer", AttributeType::Options);
    attribute.options = vec!["UI".to_string(), "API".to_string()];
    root.attributes.push(attribute);
    let mut web_section = Section::new(web, "Web");
    web_section.sections.push(Section::new(checkout, "Checkout"));
    root.sections.push(web_section);

    let mut shared = SharedStep::new(shared_id, "Log in", web);
    shared.steps.push(Step::new("Enter credentials", "Logged in"));
    writer.write_shared_step(&shared).unwrap();
    root.shared_steps.push(shared_id);

    let mut case = TestCase::new(case_id, "Checkout", checkout);
    case.priority = PriorityType::High;
    case.duration = 60_000;
    let stored = writer.write_attachment(case_id, "cart.png", b"png").unwrap();
    case.attachments.push(stored.clone());
    let mut step = Step::new(format!("Open {}", placeholder(&stored)), "Cart shown");
    step.action_attachments.push(stored);
    case.steps = vec![step, Step::shared(shared_id)];
    case.attributes.push(CaseAttribute {
        id: layer,
        value: AttributeValue::Text("API".to_string()),
    });
    case.iterations.push(Iteration {
        parameters: vec![Parameter {
            name: "card".to_string(),
            value: "4242".to_string(),
        }],
    });
    writer.write_test_case(&case).unwrap();
    root.test_cases.push(case_id);

    writer.write_root(&root).unwrap();
    dir
}

async fn mount_post(server: &MockServer, route: &str, partial: Value, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path(route))
        .and(header("authorization", "PrivateToken tok"))
        .and(body_partial_json(partial))
        .respond_with(response)
        .mount(server)
        .await;
}

async fn mount_target(server: &MockServer) {
    mount_post(server, "/api/v2/projects", json!({"name": "Shop"}), json(json!({"id": PROJECT, "name": "Shop"}))).await;
    Mock::given(method("GET"))
        .and(path(format!("/api/v2/projects/{PROJECT}/sections")))
        .respond_with(json(json!([{"id": ROOT_SECTION, "name": "Root", "parentId": null}])))
        .mount(server)
        .await;
    mount_post(
        server,
        "/api/v2/customAttributes/global",
        json!({"name": "Layer", "type": "options"}),
        json(json!({
            "id": ATTRIBUTE,
            "name": "Layer",
            "options": [{"id": Uuid::from_u128(0x200), "value": "UI"}, {"id": OPTION_API, "value": "API"}]
        })),
    )
    .await;
    mount_post(
        server,
        &format!("/api/v2/projects/{PROJECT}/attributes"),
        json!([ATTRIBUTE]),
        ResponseTemplate::new(200),
    )
    .await;
    mount_post(
        server,
        "/api/v2/sections",
        json!({"name": "Checkout", "parentId": WEB}),
        json(json!({"id": CHECKOUT, "name": "Checkout", "parentId": WEB})),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/api/Attachments"))
        .respond_with(json(json!({"id": ATTACHMENT})))
        .mount(server)
        .await;
    mount_post(
        server,
        "/api/v2/parameters",
        json!({"name": "card", "value": "4242"}),
        json(json!({"id": PARAMETER, "name": "card", "value": "4242"})),
    )
    .await;
    mount_post(
        server,
        "/api/v2/workItems",
        json!({"entityTypeName": "SharedSteps"}),
        json(json!({"id": SHARED_WORK_ITEM, "globalId": 1})),
    )
    .await;
    mount_post(
        server,
        "/api/v2/workItems",
        json!({"entityTypeName": "TestCases"}),
        json(json!({"id": Uuid::from_u128(0x300), "globalId": 2})),
    )
    .await;
}

fn work_item_body(requests: &[Request], kind: &str) -> Value {
    requests
        .iter()
        .filter(|r| r.url.path() == "/api/v2/workItems")
        .map(|r| serde_json::from_slice::<Value>(&r.body).unwrap())
        .find(|body| body["entityTypeName"] == kind)
        .unwrap()
}

#[tokio::test]
async fn test_import_remaps_ids() {
    let server = MockServer::start().await;
    mount_target(&server).await;
    mount_post(
        &server,
        "/api/v2/sections",
        json!({"name": "Web", "parentId": ROOT_SECTION}),
        json(json!({"id": WEB, "name": "Web", "parentId": ROOT_SECTION})),
    )
    .await;

    let dir = write_export();
    let reader = ExportReader::open(dir.path()).unwrap();
    let importer = Importer::new(config(&server, false)).unwrap();
    let report = importer.import(&reader, &ImportOptions::default()).await.unwrap();

    assert!(report.is_successful(), "errors: {:?}", report.errors);
    assert_eq!(report.project_id, Some(PROJECT));
    assert_eq!(report.sections_imported, 2);
    assert_eq!(report.attributes_imported, 1);
    assert_eq!(report.shared_steps_imported, 1);
    assert_eq!(report.test_cases_imported, 1);
    assert_eq!(report.attachments_uploaded, 1);

    let requests = server.received_requests().await.unwrap();
    let shared = work_item_body(&requests, "SharedSteps");
    assert_eq!(shared["sectionId"], json!(WEB));
    assert_eq!(shared["steps"][0]["action"], "Enter credentials");

    let case = work_item_body(&requests, "TestCases");
    assert_eq!(case["projectId"], json!(PROJECT));
    assert_eq!(case["sectionId"], json!(CHECKOUT));
    assert_eq!(case["priority"], "High");
    assert_eq!(case["state"], "NotReady");
    assert_eq!(case["duration"], 60_000);
    assert_eq!(
        case["steps"][0]["action"],
        format!(r#"Open <p><img src="/api/Attachments/{ATTACHMENT}"></p>"#)
    );
    assert_eq!(case["steps"][1]["workItemId"], json!(SHARED_WORK_ITEM));
    assert_eq!(case["attachments"], json!([{"id": ATTACHMENT}]));
    assert_eq!(case["attributes"][ATTRIBUTE.to_string()], json!(OPTION_API.to_string()));
    assert_eq!(case["iterations"][0]["parameters"][0]["id"], json!(PARAMETER));
}

#[tokio::test]
async fn test_failed_section_falls_back_to_parent() {
    let server = MockServer::start().await;
    mount_target(&server).await;
    mount_post(
        &server,
        "/api/v2/sections",
        json!({"name": "Web"}),
        ResponseTemplate::new(400).set_body_string("name rejected"),
    )
    .await;
    mount_post(
        &server,
        "/api/v2/sections",
        json!({"name": "Checkout", "parentId": ROOT_SECTION}),
        json(json!({"id": CHECKOUT, "name": "Checkout", "parentId": ROOT_SECTION})),
    )
    .await;

    let dir = write_export();
    let reader = ExportReader::open(dir.path()).unwrap();
    let importer = Importer::new(config(&server, false)).unwrap();
    let report = importer
        .import(&reader, &ImportOptions::default().with_attachments(false))
        .await
        .unwrap();

    assert!(!report.is_successful());
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].category, "sections");
    assert_eq!(report.sections_imported, 1);
    assert_eq!(report.test_cases_imported, 1);
    assert_eq!(report.attachments_uploaded, 0);

    let requests = server.received_requests().await.unwrap();
    let shared = work_item_body(&requests, "SharedSteps");
    assert_eq!(shared["sectionId"], json!(ROOT_SECTION));
    let case = work_item_body(&requests, "TestCases");
    assert_eq!(case["sectionId"], json!(CHECKOUT));
    // Without an upload the placeholder is left as is.
    assert_eq!(case["steps"][0]["action"], "Open <<<cart.png>>>");
}

#[tokio::test]
async fn test_missing_existing_project_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/projects"))
        .respond_with(json(json!([{"id": PROJECT, "name": "Other"}])))
        .mount(&server)
        .await;

    let dir = write_export();
    let reader = ExportReader::open(dir.path()).unwrap();
    let importer = Importer::new(config(&server, true)).unwrap();
    let result = importer.import(&reader, &ImportOptions::default()).await;
    assert!(matches!(result, Err(ImportError::ProjectNotFound(name)) if name == "Shop"));
}

#[tokio::test]
async fn test_rejected_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/projects"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let dir = write_export();
    let reader = ExportReader::open(dir.path()).unwrap();
    let importer = Importer::new(config(&server, false)).unwrap();
    let result = importer.import(&reader, &ImportOptions::default()).await;
    assert!(matches!(result, Err(ImportError::AuthenticationFailed(_))));
}
