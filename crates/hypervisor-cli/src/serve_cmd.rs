use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;

use hypervisor_core::authz::{self, Action, Resource, Role};
use hypervisor_core::dependency;
use hypervisor_core::scheduler::dispatch;
use hypervisor_db::models::{Cluster, Deployment, DeploymentStatus};
use hypervisor_db::queries::{clusters as cluster_db, deployments as deployment_db};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: msg.into(),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }
}

impl From<hypervisor_core::SchedulerError> for AppError {
    fn from(err: hypervisor_core::SchedulerError) -> Self {
        use hypervisor_core::SchedulerError::*;
        match err {
            NotFound(msg) => Self::not_found(msg),
            Validation(msg) => Self::bad_request(msg),
            CyclicDependency => {
                Self::bad_request("dependency edge would introduce a cycle".to_string())
            }
            TransientStore(e) => Self::internal(e.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Role extraction
// ---------------------------------------------------------------------------

/// Read the caller's role from the `X-Hypervisor-Role` header. Missing or
/// unrecognized values default to `Viewer`, the least-privileged role.
fn role_from_headers(headers: &HeaderMap) -> Role {
    headers
        .get("X-Hypervisor-Role")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| match s.to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "developer" => Some(Role::Developer),
            "viewer" => Some(Role::Viewer),
            _ => None,
        })
        .unwrap_or(Role::Viewer)
}

fn require(role: Role, action: Action, resource: Resource) -> Result<(), AppError> {
    if authz::authorize(role, action, resource) {
        Ok(())
    } else {
        Err(AppError::forbidden(format!(
            "role {role:?} may not {action:?} {resource:?}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateClusterRequest {
    pub name: String,
    pub total_ram: i32,
    pub total_cpu: i32,
    pub total_gpu: i32,
    pub created_by: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateDeploymentRequest {
    pub docker_image_path: String,
    pub required_ram: i32,
    pub required_cpu: i32,
    pub required_gpu: i32,
    pub priority: String,
    pub cluster_id: i64,
    pub created_by: i64,
    #[serde(default = "default_retry_max")]
    pub retry_max: i32,
}

fn default_retry_max() -> i32 {
    20
}

#[derive(Debug, Deserialize)]
pub struct AddDependencyRequest {
    pub dependency_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct ListDeploymentsQuery {
    pub cluster_id: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(pool: PgPool) -> Router {
    Router::new()
        .route("/clusters/", post(create_cluster).get(list_clusters))
        .route("/clusters/{id}/", get(get_cluster))
        .route(
            "/deployments/",
            post(create_deployment).get(list_deployments),
        )
        .route("/deployments/{id}/", get(get_deployment))
        .route("/deployments/{id}/complete", post(complete_deployment))
        .route("/deployments/{id}/dependencies", post(add_dependency))
        .layer(CorsLayer::permissive())
        .with_state(pool)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(pool: PgPool, bind: &str, port: u16) -> Result<()> {
    let app = build_router(pool);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("hypervisor serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("hypervisor serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

// ---------------------------------------------------------------------------
// Handlers: clusters
// ---------------------------------------------------------------------------

async fn create_cluster(
    State(pool): State<PgPool>,
    headers: HeaderMap,
    Json(req): Json<CreateClusterRequest>,
) -> Result<(StatusCode, Json<Cluster>), AppError> {
    require(role_from_headers(&headers), Action::Create, Resource::Cluster)?;

    let cluster = cluster_db::insert_cluster(
        &pool,
        &req.name,
        req.total_ram,
        req.total_cpu,
        req.total_gpu,
        req.created_by,
    )
    .await
    .map_err(AppError::internal)?;

    Ok((StatusCode::CREATED, Json(cluster)))
}

async fn list_clusters(
    State(pool): State<PgPool>,
    headers: HeaderMap,
) -> Result<Json<Vec<Cluster>>, AppError> {
    require(role_from_headers(&headers), Action::Read, Resource::Cluster)?;

    let clusters = cluster_db::list_clusters(&pool).await.map_err(AppError::internal)?;
    Ok(Json(clusters))
}

async fn get_cluster(
    State(pool): State<PgPool>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Cluster>, AppError> {
    require(role_from_headers(&headers), Action::Read, Resource::Cluster)?;

    let cluster = cluster_db::get_cluster(&pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("cluster {id} not found")))?;

    Ok(Json(cluster))
}

// ---------------------------------------------------------------------------
// Handlers: deployments
// ---------------------------------------------------------------------------

async fn create_deployment(
    State(pool): State<PgPool>,
    headers: HeaderMap,
    Json(req): Json<CreateDeploymentRequest>,
) -> Result<(StatusCode, Json<Deployment>), AppError> {
    require(role_from_headers(&headers), Action::Create, Resource::Deployment)?;

    let deployment = dispatch::create_deployment(
        &pool,
        &req.docker_image_path,
        req.required_ram,
        req.required_cpu,
        req.required_gpu,
        &req.priority,
        req.cluster_id,
        req.created_by,
        req.retry_max,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(deployment)))
}

async fn list_deployments(
    State(pool): State<PgPool>,
    headers: HeaderMap,
    Query(query): Query<ListDeploymentsQuery>,
) -> Result<Json<Vec<Deployment>>, AppError> {
    require(role_from_headers(&headers), Action::Read, Resource::Deployment)?;

    let status = query
        .status
        .as_deref()
        .map(DeploymentStatus::from_str)
        .transpose()
        .map_err(|e| AppError::bad_request(format!("invalid status: {}", e.0)))?;

    let deployments = deployment_db::list_deployments(&pool, query.cluster_id, status)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(deployments))
}

async fn get_deployment(
    State(pool): State<PgPool>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Deployment>, AppError> {
    require(role_from_headers(&headers), Action::Read, Resource::Deployment)?;

    let deployment = deployment_db::get_deployment(&pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("deployment {id} not found")))?;

    Ok(Json(deployment))
}

async fn complete_deployment(
    State(pool): State<PgPool>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, AppError> {
    require(role_from_headers(&headers), Action::Complete, Resource::Deployment)?;

    dispatch::complete(&pool, id).await?;

    Ok(Json(MessageResponse {
        message: format!("deployment {id} marked complete"),
    }))
}

async fn add_dependency(
    State(pool): State<PgPool>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(req): Json<AddDependencyRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    require(
        role_from_headers(&headers),
        Action::Create,
        Resource::DependencyEdge,
    )?;

    dependency::validate_edge_addition(&pool, id, req.dependency_id).await?;

    Ok(Json(MessageResponse {
        message: format!("deployment {id} now depends on {}", req.dependency_id),
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
