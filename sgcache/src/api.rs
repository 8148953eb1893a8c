//! API HTTP du démon d'aperçu
//!
//! Trois opérations : sélectionner un fichier (`POST /display`), fermer un
//! aperçu (`POST /close`) et arrêter le démon (`POST /stop`). Toutes
//! répondent `{"status": "success"}` ou `{"status": "error"}` accompagné
//! d'un message. La sélection répond dès que la conversion est lancée, sans
//! en attendre le résultat : c'est la diffusion WebSocket qui préviendra la
//! page quand la ressource sera prête.

use crate::cache::key_for_path;
use crate::sgserver_ext::PreviewState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Demande d'affichage d'un fichier
#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct DisplayRequest {
    /// Chemin du fichier sélectionné
    #[cfg_attr(feature = "openapi", schema(example = "/home/user/photo.jpg"))]
    pub file: String,
    /// Clé d'identité du fichier ; recalculée côté serveur si absente
    #[cfg_attr(feature = "openapi", schema(example = "1a2b3c4d5e6f7a8b1a2b3c4d5e6f7a8b"))]
    pub hash: Option<String>,
}

/// Demande de fermeture d'un aperçu
#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct CloseRequest {
    /// Clé d'identité de l'aperçu à fermer
    #[cfg_attr(feature = "openapi", schema(example = "1a2b3c4d5e6f7a8b1a2b3c4d5e6f7a8b"))]
    pub hash: String,
}

/// Réponse commune des opérations de l'API
#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct StatusResponse {
    /// `"success"` ou `"error"`
    #[cfg_attr(feature = "openapi", schema(example = "success"))]
    pub status: String,
    /// Détail en cas d'erreur
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusResponse {
    pub fn success() -> Self {
        Self {
            status: "success".to_string(),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: Some(message.into()),
        }
    }
}

/// Sélectionne un fichier pour affichage
///
/// Garantit qu'une entrée de cache existe pour le fichier, lance sa
/// conversion en tâche de fond si nécessaire et le marque comme ressource
/// courante.
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/display",
    tag = "preview",
    request_body = DisplayRequest,
    responses(
        (status = 200, description = "Fichier sélectionné, conversion lancée", body = StatusResponse),
        (status = 400, description = "Requête invalide", body = StatusResponse),
        (status = 404, description = "Fichier introuvable", body = StatusResponse),
    )
))]
pub async fn display(
    State(state): State<PreviewState>,
    Json(request): Json<DisplayRequest>,
) -> impl IntoResponse {
    if request.file.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(StatusResponse::error("file cannot be empty")),
        );
    }
    let file = PathBuf::from(&request.file);
    if !file.is_file() {
        return (
            StatusCode::NOT_FOUND,
            Json(StatusResponse::error(format!(
                "no such file: {}",
                request.file
            ))),
        );
    }

    let key = match request.hash.as_deref() {
        Some(hash) if !hash.is_empty() => hash.to_string(),
        _ => key_for_path(&file),
    };
    state.cache.put(&key, file).await;
    state.cache.set_current(&key).await;
    (StatusCode::OK, Json(StatusResponse::success()))
}

/// Ferme un aperçu
///
/// Évince l'entrée du cache et coupe son flux d'octets ; si c'était la
/// ressource courante, plus rien n'est affiché.
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/close",
    tag = "preview",
    request_body = CloseRequest,
    responses(
        (status = 200, description = "Aperçu fermé (ou déjà absent)", body = StatusResponse),
    )
))]
pub async fn close(
    State(state): State<PreviewState>,
    Json(request): Json<CloseRequest>,
) -> impl IntoResponse {
    state.cache.evict(&request.hash).await;
    (StatusCode::OK, Json(StatusResponse::success()))
}

/// Arrête le démon
///
/// Prévient les pages connectées, vide le cache puis déclenche l'arrêt du
/// serveur HTTP.
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/stop",
    tag = "preview",
    responses(
        (status = 200, description = "Arrêt en cours", body = StatusResponse),
    )
))]
pub async fn stop(State(state): State<PreviewState>) -> impl IntoResponse {
    info!("stop requested over HTTP");
    state.hub.broadcast(json!({"action": "shutdown"}));
    state.cache.clear().await;
    state.shutdown.notify_one();
    (StatusCode::OK, Json(StatusResponse::success()))
}
