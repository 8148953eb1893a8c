//! # sgserver - Serveur web haut niveau basé sur Axum
//!
//! Cette crate fournit une abstraction simple pour créer le serveur HTTP du
//! démon d'aperçu : montage de routers, écoute sur la boucle locale et arrêt
//! gracieux, sans exposer la plomberie d'Axum au code appelant.
//!
//! ## Fonctionnalités
//!
//! - 🚀 **API de haut niveau** : Interface simple pour monter des routers Axum
//! - 🔒 **Boucle locale uniquement** : Le serveur n'écoute jamais ailleurs que
//!   sur 127.0.0.1
//! - ⚡ **Arrêt gracieux** : Ctrl+C ou arrêt programmatique via [`StopHandle`]
//! - 🩺 **Diagnostic de port** : Un port occupé est rapporté avec le processus
//!   qui le détient
//! - 📋 **Logging** : Initialisation de `tracing` pilotée par la configuration
//! - 📚 **Documentation OpenAPI** : Génération de Swagger UI (feature `openapi`)
//!
//! ## Architecture
//!
//! La crate est organisée en deux modules :
//!
//! - [`server`] : Implémentation du serveur principal et du builder
//! - [`logs`] : Initialisation du système de logs console
//!
//! ## Exemple d'utilisation
//!
//! ```rust,no_run
//! use sgserver::{ServerBuilder, logs::{LoggingOptions, init_logging}};
//! use axum::{Router, routing::get};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Logs console, niveau lu dans la configuration
//!     init_logging(LoggingOptions::from_config());
//!
//!     // Création du serveur depuis la configuration
//!     let mut server = ServerBuilder::new_configured().build();
//!
//!     // Montage des routes
//!     let routes = Router::new().route("/", get(|| async { "ok" }));
//!     server.add_router("/", routes).await;
//!
//!     // Démarrage, puis attente de Ctrl+C ou d'un stop()
//!     server.start().await?;
//!     server.wait().await;
//!     Ok(())
//! }
//! ```

pub mod logs;
pub mod server;

pub use logs::{LoggingOptions, init_logging};
pub use server::{Server, ServerBuilder, StopHandle};
