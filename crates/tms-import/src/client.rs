//! Test IT API client for import operations.

use crate::error::{ImportError, Result};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Client for the Test IT REST API.
pub struct TestItClient {
    client: Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Serialize)]
struct CreateProjectRequest {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectResponse {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionResponse {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSectionRequest {
    pub name: String,
    pub parent_id: Uuid,
    pub project_id: Uuid,
    pub precondition_steps: Vec<StepRequest>,
    pub postcondition_steps: Vec<StepRequest>,
    pub attachments: Vec<IdRef>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAttributeRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub attribute_type: String,
    pub is_enabled: bool,
    pub is_required: bool,
    pub is_global: bool,
    pub options: Vec<AttributeOptionRequest>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeOptionRequest {
    pub value: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttributeResponse {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub options: Vec<AttributeOptionResponse>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttributeOptionResponse {
    pub id: Uuid,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateParameterRequest {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParameterResponse {
    pub id: Uuid,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttachmentResponse {
    pub id: Uuid,
}

/// Reference to an entity by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdRef {
    pub id: Uuid,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRequest {
    pub action: String,
    pub expected: String,
    pub test_data: String,
    pub comments: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_item_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRequest {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub link_type: String,
    pub has_info: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TagRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IterationRequest {
    pub parameters: Vec<IdRef>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkItemRequest {
    pub entity_type_name: String,
    pub project_id: Uuid,
    pub section_id: Uuid,
    pub name: String,
    pub description: String,
    pub state: String,
    pub priority: String,
    pub steps: Vec<StepRequest>,
    pub precondition_steps: Vec<StepRequest>,
    pub postcondition_steps: Vec<StepRequest>,
    /// Milliseconds.
    pub duration: u64,
    pub attributes: HashMap<Uuid, Value>,
    pub tags: Vec<TagRequest>,
    pub links: Vec<LinkRequest>,
    pub attachments: Vec<IdRef>,
    pub iterations: Vec<IterationRequest>,
    pub auto_tests: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemResponse {
    pub id: Uuid,
    #[serde(default)]
    pub global_id: Option<u64>,
}

impl TestItClient {
    /// Create a new Test IT client.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("tms-import/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| ImportError::NetworkError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    /// Get the authorization header value.
    fn auth_header(&self) -> String {
        format!("PrivateToken {}", self.token)
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> Result<Response> {
        let response = request
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| ImportError::NetworkError(e.to_string()))?;

        let status = response.status();
        match status {
            s if s.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ImportError::AuthenticationFailed(
                format!("Test IT rejected the token ({status})"),
            )),
            StatusCode::NOT_FOUND => Err(ImportError::NotFound(url.to_string())),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(ImportError::ApiError(format!(
                    "Request failed with status {status}: {body}"
                )))
            }
        }
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T> {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ImportError::NetworkError(e.to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Make a GET request.
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "GET");
        let response = self.send(self.client.get(&url), &url).await?;
        Self::json(response).await
    }

    /// Make a POST request.
    async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "POST");
        let response = self.send(self.client.post(&url).json(body), &url).await?;
        Self::json(response).await
    }

    /// List all projects.
    pub async fn list_projects(&self) -> Result<Vec<ProjectResponse>> {
        self.get("/api/v2/projects").await
    }

    /// Create a project.
    pub async fn create_project(&self, name: &str, description: Option<&str>) -> Result<ProjectResponse> {
        self.post(
            "/api/v2/projects",
            &CreateProjectRequest {
                name: name.to_string(),
                description: description.map(|s| s.to_string()),
            },
        )
        .await
    }

    /// List the sections of a project, the root section included.
    pub async fn project_sections(&self, project_id: Uuid) -> Result<Vec<SectionResponse>> {
        self.get(&format!("/api/v2/projects/{project_id}/sections")).await
    }

    /// Create a section.
    pub async fn create_section(&self, request: &CreateSectionRequest) -> Result<SectionResponse> {
        self.post("/api/v2/sections", request).await
    }

    /// Create a global custom attribute.
    pub async fn create_attribute(&self, request: &CreateAttributeRequest) -> Result<AttributeResponse> {
        self.post("/api/v2/customAttributes/global", request).await
    }

    /// Enable global attributes in a project.
    pub async fn add_attributes_to_project(&self, project_id: Uuid, attribute_ids: &[Uuid]) -> Result<()> {
        let url = format!("{}/api/v2/projects/{project_id}/attributes", self.base_url);
        debug!(%url, count = attribute_ids.len(), "POST");
        self.send(self.client.post(&url).json(attribute_ids), &url).await?;
        Ok(())
    }

    /// Create a parameter value.
    pub async fn create_parameter(&self, name: &str, value: &str) -> Result<ParameterResponse> {
        self.post(
            "/api/v2/parameters",
            &CreateParameterRequest {
                name: name.to_string(),
                value: value.to_string(),
            },
        )
        .await
    }

    /// Upload an attachment file.
    pub async fn upload_attachment(&self, file_name: &str, data: Vec<u8>) -> Result<AttachmentResponse> {
        let url = format!("{}/api/Attachments", self.base_url);
        debug!(%url, file_name, size = data.len(), "POST multipart");
        let form = Form::new().part("file", Part::bytes(data).file_name(file_name.to_string()));
        let response = self.send(self.client.post(&url).multipart(form), &url).await?;
        Self::json(response).await
    }

    /// Create a test case or shared steps work item.
    pub async fn create_work_item(&self, request: &CreateWorkItemRequest) -> Result<WorkItemResponse> {
        self.post("/api/v2/workItems", request).await
    }
}
