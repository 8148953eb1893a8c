//! # Module Server - API de haut niveau pour Axum
//!
//! Ce module fournit une abstraction simple pour créer le serveur HTTP du démon
//! d'aperçu, en cachant la configuration d'Axum, l'écoute TCP et la gestion de
//! l'arrêt.
//!
//! ## Fonctionnalités
//!
//! - 🔀 **Montage de routers** : Ajoutez des sous-routers avec `add_router()`
//! - 🔒 **Écoute locale** : Le serveur ne s'attache qu'à la boucle locale (127.0.0.1)
//! - ⚡ **Gestion gracieuse** : Arrêt propre sur Ctrl+C ou via un [`StopHandle`]
//! - 🩺 **Diagnostic de port** : Si le port est déjà pris, l'erreur nomme le
//!   processus fautif
//! - 📚 **Documentation API** : OpenAPI/Swagger optionnel avec `add_openapi()`

use anyhow::{Result, anyhow};
use axum::Router;
use sgconfig::get_config;
use sgutils::find_port_owner;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{
    signal,
    sync::{RwLock, watch},
    task::JoinHandle,
};
use tracing::{error, info};
#[cfg(feature = "openapi")]
use utoipa_swagger_ui::SwaggerUi;

/// Serveur principal
pub struct Server {
    name: String,
    base_url: String,
    http_port: u16,
    router: Arc<RwLock<Router>>,
    stop_tx: Arc<watch::Sender<bool>>,
    join_handle: Option<JoinHandle<()>>,
}

impl Server {
    /// Crée une nouvelle instance de serveur
    ///
    /// # Arguments
    ///
    /// * `name` - Nom du serveur (pour les logs)
    /// * `base_url` - URL de base (ex: "http://127.0.0.1:8792")
    /// * `http_port` - Port HTTP à écouter sur la boucle locale
    ///
    /// # Exemple
    ///
    /// ```rust
    /// # use sgserver::Server;
    /// let server = Server::new("spyglass", "http://127.0.0.1:8792", 8792);
    /// ```
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, http_port: u16) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            name: name.into(),
            base_url: base_url.into(),
            http_port,
            router: Arc::new(RwLock::new(Router::new())),
            stop_tx: Arc::new(stop_tx),
            join_handle: None,
        }
    }

    pub fn new_configured() -> Self {
        let config = get_config();
        let url = config.get_root_url();
        let port = config.get_http_port();
        Self::new("spyglass", url, port)
    }

    /// Ajoute un sous-router au serveur
    ///
    /// - Si `path` est "/", merge directement au router principal
    /// - Sinon, nest le router sous le chemin donné
    pub async fn add_router(&mut self, path: &str, sub_router: Router) {
        let mut r = self.router.write().await;

        let combined = if path == "/" {
            // Merge directement à la racine
            r.clone().merge(sub_router)
        } else {
            // Sous-chemin => nest
            let normalized = format!("/{}", path.trim_start_matches('/'));
            r.clone().nest(&normalized, sub_router)
        };

        *r = combined;
    }

    /// Ajoute la documentation Swagger UI d'une API déjà montée
    ///
    /// Contrairement au montage des routes lui-même (voir [`Server::add_router`]),
    /// cette méthode n'enregistre que l'interface de documentation : les routes
    /// de l'API restent servies là où elles ont été montées.
    ///
    /// # Arguments
    ///
    /// * `openapi` - Spécification OpenAPI générée par `utoipa`
    /// * `name` - Nom unique, utilisé pour le chemin Swagger UI et le JSON OpenAPI
    ///
    /// Résultat :
    ///
    /// - `/swagger-ui/{name}` affiche la documentation Swagger
    /// - `/api-docs/{name}.json` fournit la spécification OpenAPI
    #[cfg(feature = "openapi")]
    pub async fn add_openapi(&mut self, openapi: utoipa::openapi::OpenApi, name: &str) {
        let swagger_path = format!("/swagger-ui/{}", name);
        let swagger_path_static: &'static str = Box::leak(swagger_path.into_boxed_str());

        let openapi_json_path = format!("/api-docs/{}.json", name);
        let openapi_json_path_static: &'static str = Box::leak(openapi_json_path.into_boxed_str());

        let swagger = SwaggerUi::new(swagger_path_static).url(openapi_json_path_static, openapi);

        let mut r = self.router.write().await;
        *r = std::mem::take(&mut *r).merge(swagger);
    }

    /// Démarre le serveur HTTP
    ///
    /// Attache le serveur au port configuré sur la boucle locale et met en place
    /// l'arrêt gracieux, déclenché soit par Ctrl+C, soit par un [`StopHandle`].
    ///
    /// Si le port est déjà occupé, l'erreur retournée identifie le processus
    /// qui le détient.
    ///
    /// # Exemple
    ///
    /// ```rust,no_run
    /// # use sgserver::Server;
    /// # #[tokio::main]
    /// # async fn main() -> anyhow::Result<()> {
    /// # let mut server = Server::new("spyglass", "http://127.0.0.1:8792", 8792);
    /// server.start().await?;
    /// server.wait().await; // Attend Ctrl+C ou un stop()
    /// # Ok(())
    /// # }
    /// ```
    pub async fn start(&mut self) -> Result<()> {
        let addr = SocketAddr::from(([127, 0, 0, 1], self.http_port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| bind_error(self.http_port, e))?;

        info!("Server {} listening at {}", self.name, self.base_url);

        let router = self.router.read().await.clone();
        let mut stop_rx = self.stop_tx.subscribe();

        self.join_handle = Some(tokio::spawn(async move {
            let shutdown = async move {
                tokio::select! {
                    _ = signal::ctrl_c() => {
                        info!("Ctrl+C reçu, arrêt gracieux");
                    }
                    _ = stop_rx.changed() => {
                        info!("Stop demandé, arrêt gracieux");
                    }
                }
            };

            if let Err(e) = axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!("HTTP server error: {e}");
            }
        }));

        Ok(())
    }

    /// Retourne une poignée d'arrêt utilisable depuis n'importe quelle tâche
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.stop_tx.clone(),
        }
    }

    /// Attend la fin du serveur
    pub async fn wait(&mut self) {
        if let Some(h) = self.join_handle.take() {
            let _ = h.await;
        }
    }
}

/// Poignée d'arrêt programmatique du serveur
///
/// Clonable à volonté ; le premier `stop()` déclenche l'arrêt gracieux,
/// les suivants sont sans effet.
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}

/// Habille l'erreur de bind avec l'identité du processus qui occupe le port.
fn bind_error(port: u16, err: std::io::Error) -> anyhow::Error {
    if err.kind() == std::io::ErrorKind::AddrInUse {
        return match find_port_owner(port) {
            Some(owner) => anyhow!("port {} is already in use by {}", port, owner),
            None => anyhow!("port {} is already in use", port),
        };
    }
    anyhow::Error::new(err).context(format!("cannot bind 127.0.0.1:{}", port))
}

/// Builder pattern
pub struct ServerBuilder {
    name: String,
    base_url: String,
    http_port: u16,
}

impl ServerBuilder {
    /// Crée un nouveau builder
    ///
    /// # Arguments
    ///
    /// * `name` - Nom du serveur
    /// * `base_url` - URL de base (ex: "http://127.0.0.1:8792")
    /// * `http_port` - Port HTTP
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, http_port: u16) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            http_port,
        }
    }

    pub fn new_configured() -> Self {
        let config = get_config();
        Self {
            name: "spyglass".to_string(),
            base_url: config.get_root_url(),
            http_port: config.get_http_port(),
        }
    }

    /// Construit le serveur
    ///
    /// Consomme le builder et retourne une instance de `Server` prête à l'emploi.
    ///
    /// # Exemple
    ///
    /// ```rust
    /// # use sgserver::ServerBuilder;
    /// let mut server = ServerBuilder::new("spyglass", "http://127.0.0.1:8792", 8792)
    ///     .build();
    /// ```
    pub fn build(self) -> Server {
        Server::new(self.name, self.base_url, self.http_port)
    }
}
