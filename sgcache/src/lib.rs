//! # sgcache - Cache d'aperçus et moteur de conversion de Spyglass
//!
//! Cette crate est le cœur du démon d'aperçu : elle transforme un fichier
//! sélectionné dans un gestionnaire de fichiers en une ressource affichable
//! dans un navigateur (fragment HTML + flux d'octets), et maintient ces
//! ressources dans un cache concurrent alimenté en tâche de fond.
//!
//! ## Vue d'ensemble
//!
//! `sgcache` fournit les composants de base pour :
//! - Sélectionner une règle de conversion d'après l'extension ou le type
//!   MIME du fichier
//! - Exécuter des commandes de conversion externes sous délai borné
//! - Se replier sur un aperçu texte brut quand tout le reste échoue
//! - Servir les octets convertis en flux annulable (mmap), y compris par
//!   plages pour les médias
//! - Diffuser la disponibilité de la ressource courante aux pages ouvertes
//!
//! ## Architecture
//!
//! ```text
//! sgcache
//!     ├── rules.rs         - Règles de conversion et sélection
//!     ├── command.rs       - Commandes externes sous timeout
//!     ├── resource.rs      - Conversion d'un fichier en ressource
//!     ├── reader.rs        - Lecteur mmap annulable
//!     ├── cache.rs         - Cache concurrent à population unique
//!     ├── config_ext.rs    - Accesseurs de configuration (sgconfig)
//!     ├── html.rs          - Page d'aperçu
//!     ├── api.rs           - Handlers HTTP          [feature sgserver]
//!     └── sgserver_ext.rs  - Router et WebSocket    [feature sgserver]
//! ```
//!
//! ## Utilisation
//!
//! ```rust,no_run
//! use sgcache::{PreviewCache, key_for_path};
//! use sgconfig::Config;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(Config::load_config("")?);
//!     let cache = PreviewCache::new(config);
//!
//!     // Sélectionner un fichier : la conversion part en tâche de fond
//!     let file = Path::new("/home/user/photo.jpg");
//!     let key = key_for_path(file);
//!     cache.put(&key, file.to_path_buf()).await;
//!     cache.set_current(&key).await;
//!
//!     // Attendre le résultat (les handlers HTTP ne le font jamais)
//!     cache.wait_until_ready(&key).await?;
//!     let (_, resource) = cache.get(&key).await;
//!     println!("html: {}", resource.unwrap().html);
//!     Ok(())
//! }
//! ```
//!
//! ## Cycle de vie d'une entrée
//!
//! ```text
//!   put(key)          conversion terminée        evict(key) / clear()
//! Absent ──────► Pending ─────────────► Ready ─────────────► Absent
//!                   │                                           ▲
//!                   └───────────────────────────────────────────┘
//!                            (éviction pendant la conversion)
//! ```
//!
//! Une clé n'est convertie qu'une seule fois quel que soit le nombre de
//! sélections concurrentes ; la conversion n'échoue jamais, elle dégrade
//! vers un aperçu texte brut.
//!
//! ## Dépendances principales
//!
//! - `tokio` : tâches de fond, processus externes, synchronisation
//! - `memmap2` : vue mémoire des fichiers servis
//! - `sha2` : clés d'identité
//! - `axum` (feature `sgserver`) : routes HTTP et WebSocket

pub mod cache;
pub mod command;
pub mod config_ext;
pub mod html;
pub mod reader;
pub mod resource;
pub mod rules;

#[cfg(feature = "sgserver")]
pub mod api;

#[cfg(feature = "sgserver")]
pub mod sgserver_ext;

#[cfg(all(feature = "openapi", feature = "sgserver"))]
pub mod openapi;

pub use cache::{CacheEntry, PreviewCache, Status, key_for_path};
pub use config_ext::PreviewConfigExt;
pub use reader::{CancelReader, ReaderCursor, ReaderError};
pub use resource::{ConvertOptions, RAW_PREVIEW_LIMIT, Resource};
pub use rules::{ConversionRule, file_extension, matching_rules};

#[cfg(feature = "sgserver")]
pub use sgserver_ext::{
    Hub, PreviewState, create_preview_router, spawn_status_broadcast,
};

#[cfg(feature = "sgserver")]
pub use api::{CloseRequest, DisplayRequest, StatusResponse};
