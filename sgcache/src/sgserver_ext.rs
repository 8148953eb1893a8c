//! Extension sgserver : routes HTTP et diffusion WebSocket du cache
//!
//! Ce module relie le cache d'aperçus au serveur HTTP : la page d'aperçu,
//! l'API de sélection/fermeture, le flux d'octets de la ressource courante
//! et la diffusion périodique de son statut aux pages connectées.
//!
//! ## Routes montées
//!
//! - `GET /` — la page d'aperçu, ou la connexion WebSocket si l'en-tête
//!   `Upgrade` est présent (même URL pour les deux)
//! - `POST /display`, `POST /close`, `POST /stop` — l'API (voir [`crate::api`])
//! - `GET /src/{key}` — les octets de la ressource courante ; la clé dans
//!   l'URL change avec la ressource pour court-circuiter le cache du
//!   navigateur, mais c'est toujours la ressource courante qui est servie
//!
//! ## Diffusion
//!
//! Une tâche périodique publie `{"action": "update", "hash", "ready"}` à
//! toutes les pages ; chaque page compare avec ce qu'elle affiche et se
//! recharge si nécessaire. Les pages renvoient `{"action": "close", "hash"}`
//! quand elles abandonnent une ressource, ce qui l'évince du cache.

use crate::api;
use crate::cache::{PreviewCache, Status};
use crate::config_ext::PreviewConfigExt;
use crate::html;
use crate::reader::CancelReader;
use axum::Router;
use axum::body::Body;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::path::Path as FilePath;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// Nombre de messages en attente par page avant d'en perdre.
const HUB_CAPACITY: usize = 32;

/// Canal de diffusion vers toutes les pages connectées.
///
/// Publication sans garantie de réception : une page absente ou en retard
/// sera resynchronisée par la diffusion périodique suivante.
#[derive(Clone)]
pub struct Hub {
    tx: broadcast::Sender<Value>,
}

impl Hub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(HUB_CAPACITY);
        Self { tx }
    }

    /// Publie un message à toutes les pages. Sans effet si aucune page
    /// n'est connectée.
    pub fn broadcast(&self, message: Value) {
        let _ = self.tx.send(message);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.tx.subscribe()
    }

    /// Nombre de pages actuellement connectées.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

/// État partagé par tous les handlers HTTP du démon.
#[derive(Clone)]
pub struct PreviewState {
    /// Le cache des aperçus
    pub cache: Arc<PreviewCache>,
    /// Le canal de diffusion WebSocket
    pub hub: Hub,
    /// Signal d'arrêt du serveur, déclenché par `POST /stop`
    pub shutdown: Arc<Notify>,
}

impl PreviewState {
    pub fn new(cache: Arc<PreviewCache>) -> Self {
        Self {
            cache,
            hub: Hub::new(),
            shutdown: Arc::new(Notify::new()),
        }
    }
}

/// Crée le router complet du démon d'aperçu, à monter à la racine.
pub fn create_preview_router(state: PreviewState) -> Router {
    Router::new()
        .route("/", get(page_or_ws))
        .route("/display", post(api::display))
        .route("/close", post(api::close))
        .route("/stop", post(api::stop))
        .route("/src/{key}", get(serve_src))
        .with_state(state)
}

/// `GET /` : la page d'aperçu, ou la connexion WebSocket de cette page si
/// la requête demande l'upgrade.
async fn page_or_ws(
    State(state): State<PreviewState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match ws {
        Ok(upgrade) => upgrade.on_upgrade(move |socket| handle_socket(socket, state)),
        Err(_) => render_current_page(&state).await.into_response(),
    }
}

/// Rend la page avec l'instantané courant du cache.
async fn render_current_page(state: &PreviewState) -> Html<String> {
    let config = state.cache.config();
    let (key, status, resource) = state.cache.current_entry().await;
    let ready = status == Status::Ready;
    let fragment = resource.as_ref().filter(|_| ready).map(|r| r.html.clone());
    let page = html::render_page(
        &config.get_page_title(),
        &config.get_page_style(),
        key.as_deref().unwrap_or(""),
        ready,
        config.get_broadcast_interval().as_millis() as u64,
        fragment.as_deref(),
    );
    Html(page)
}

/// Boucle WebSocket d'une page : lui relaie les diffusions du hub et
/// traite ses notifications de fermeture.
async fn handle_socket(socket: WebSocket, state: PreviewState) {
    debug!("preview page connected");
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.hub.subscribe();

    let mut forward_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(message) => {
                    if sender
                        .send(Message::Text(message.to_string().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                // Page en retard : la diffusion périodique suivante la
                // resynchronisera
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    debug!("preview page lagged by {} messages", count);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let cache = Arc::clone(&state.cache);
    let mut inbound_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if let Message::Text(text) = message {
                handle_page_message(&cache, text.as_str()).await;
            }
        }
    });

    tokio::select! {
        _ = &mut forward_task => inbound_task.abort(),
        _ = &mut inbound_task => forward_task.abort(),
    }
    debug!("preview page disconnected");
}

/// Message entrant d'une page : seule l'action `close` est comprise, elle
/// évince la ressource que la page vient d'abandonner.
async fn handle_page_message(cache: &Arc<PreviewCache>, text: &str) {
    let Ok(message) = serde_json::from_str::<Value>(text) else {
        debug!("ignoring malformed page message: {}", text);
        return;
    };
    if message.get("action").and_then(Value::as_str) != Some("close") {
        return;
    }
    let Some(hash) = message.get("hash").and_then(Value::as_str) else {
        return;
    };
    if !hash.is_empty() {
        cache.evict(hash).await;
    }
}

/// `GET /src/{key}` : les octets de la ressource courante.
///
/// `503` tant que la conversion est en cours ou qu'aucune ressource n'est
/// sélectionnée, `404` si la ressource n'a pas de flux (fichier illisible
/// ou vide). Les requêtes de plage simple (`bytes=a-b`) sont honorées pour
/// la lecture de médias.
async fn serve_src(
    State(state): State<PreviewState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Response {
    let (current, status, resource) = state.cache.current_entry().await;
    if current.as_deref() != Some(key.as_str()) {
        debug!(
            requested = %key,
            current = current.as_deref().unwrap_or("-"),
            "src request for a non-current key"
        );
    }
    if status != Status::Ready {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::RETRY_AFTER, "1")],
            "resource not ready",
        )
            .into_response();
    }
    let Some(resource) = resource else {
        return (StatusCode::SERVICE_UNAVAILABLE, "resource not ready").into_response();
    };
    let Some(reader) = &resource.reader else {
        return (StatusCode::NOT_FOUND, "resource has no byte stream").into_response();
    };
    stream_reader(reader, &resource.src_file, &headers)
}

/// Construit la réponse de flux, complète ou partielle selon l'en-tête
/// `Range`.
fn stream_reader(reader: &Arc<CancelReader>, src_file: &FilePath, headers: &HeaderMap) -> Response {
    let total = reader.len();
    let content_type = content_type_for(src_file);

    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| parse_range(value, total));

    match range {
        Some((start, end)) => {
            let mut cursor = reader.cursor();
            if let Err(e) = std::io::Seek::seek(&mut cursor, std::io::SeekFrom::Start(start)) {
                warn!("cannot seek in resource stream: {}", e);
                return (StatusCode::SERVICE_UNAVAILABLE, "stream closed").into_response();
            }
            let length = end - start + 1;
            let body = Body::from_stream(ReaderStream::new(cursor.take(length)));
            build_stream_response(StatusCode::PARTIAL_CONTENT, content_type, length, body, |b| {
                b.header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", start, end, total),
                )
            })
        }
        None => {
            let body = Body::from_stream(ReaderStream::new(reader.cursor()));
            build_stream_response(StatusCode::OK, content_type, total, body, |b| b)
        }
    }
}

fn build_stream_response(
    status: StatusCode,
    content_type: &'static str,
    length: u64,
    body: Body,
    extra: impl FnOnce(axum::http::response::Builder) -> axum::http::response::Builder,
) -> Response {
    let builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, length)
        .header(header::ACCEPT_RANGES, "bytes");
    match extra(builder).body(body) {
        Ok(response) => response,
        Err(e) => {
            warn!("cannot build stream response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Interprète une plage simple `bytes=a-b`, `bytes=a-` ou `bytes=-n`.
/// `None` pour une plage absente, malformée ou insatisfiable, auquel cas
/// la ressource est servie en entier.
fn parse_range(value: &str, total: u64) -> Option<(u64, u64)> {
    let spec = value.strip_prefix("bytes=")?;
    // Les plages multiples ne sont pas gérées
    if spec.contains(',') {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    let last = total.checked_sub(1)?;
    if start.is_empty() {
        // Suffixe : les n derniers octets
        let count: u64 = end.parse().ok()?;
        if count == 0 {
            return None;
        }
        return Some((total.saturating_sub(count), last));
    }
    let start: u64 = start.parse().ok()?;
    let end: u64 = if end.is_empty() {
        last
    } else {
        end.parse().ok()?
    };
    if start > end || end > last {
        return None;
    }
    Some((start, end))
}

/// Type de contenu déduit de l'extension du fichier servi.
/// Les navigateurs tolèrent mal un flux média sans type explicite.
fn content_type_for(path: &FilePath) -> &'static str {
    match crate::rules::file_extension(path).as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "txt" | "md" | "log" => "text/plain; charset=utf-8",
        "css" => "text/css",
        "js" => "text/javascript",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "bmp" => "image/bmp",
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        _ => "application/octet-stream",
    }
}

/// Lance la tâche de diffusion périodique du statut de la ressource
/// courante.
///
/// À chaque période, publie `{"action": "update", "hash", "ready"}` — avec
/// une clé vide si rien n'est sélectionné, pour que les pages affichant une
/// ressource évincée se vident. La période est relue à chaque tour, une
/// modification de configuration s'applique donc sans redémarrage.
pub fn spawn_status_broadcast(state: PreviewState) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(state.cache.config().get_broadcast_interval()).await;
            let (key, status, _) = state.cache.current_entry().await;
            let message = serde_json::json!({
                "action": "update",
                "hash": key.as_deref().unwrap_or(""),
                "ready": status == Status::Ready,
            });
            state.hub.broadcast(message);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range_bounded() {
        assert_eq!(parse_range("bytes=0-99", 1000), Some((0, 99)));
        assert_eq!(parse_range("bytes=500-999", 1000), Some((500, 999)));
    }

    #[test]
    fn test_parse_range_open_ended() {
        assert_eq!(parse_range("bytes=200-", 1000), Some((200, 999)));
    }

    #[test]
    fn test_parse_range_suffix() {
        assert_eq!(parse_range("bytes=-100", 1000), Some((900, 999)));
        assert_eq!(parse_range("bytes=-2000", 1000), Some((0, 999)));
    }

    #[test]
    fn test_parse_range_rejects_invalid() {
        assert_eq!(parse_range("bytes=700-400", 1000), None);
        assert_eq!(parse_range("bytes=0-1000", 1000), None);
        assert_eq!(parse_range("bytes=abc-", 1000), None);
        assert_eq!(parse_range("bytes=0-10,20-30", 1000), None);
        assert_eq!(parse_range("items=0-10", 1000), None);
        assert_eq!(parse_range("bytes=0-0", 0), None);
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for(FilePath::new("/tmp/x.mp4")), "video/mp4");
        assert_eq!(content_type_for(FilePath::new("/tmp/x.JPG")), "image/jpeg");
        assert_eq!(
            content_type_for(FilePath::new("/tmp/preview-abc")),
            "application/octet-stream"
        );
    }

    #[test]
    fn test_hub_broadcast_without_subscribers() {
        let hub = Hub::new();
        // Ne doit pas paniquer ni échouer
        hub.broadcast(serde_json::json!({"action": "update"}));
        assert_eq!(hub.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_hub_delivers_to_subscribers() {
        let hub = Hub::new();
        let mut rx = hub.subscribe();
        hub.broadcast(serde_json::json!({"action": "update", "hash": "k1"}));
        let message = rx.recv().await.unwrap();
        assert_eq!(message["action"], "update");
        assert_eq!(message["hash"], "k1");
    }
}
