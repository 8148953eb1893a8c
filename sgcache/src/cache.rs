//! Cache concurrent des ressources d'aperçu
//!
//! Le cache associe une clé d'identité (empreinte du chemin absolu du
//! fichier) à une [`Resource`] convertie. Chaque entrée suit un cycle de vie
//! à trois états : absente, en cours de conversion, prête. La conversion
//! s'exécute en tâche de fond, une seule fois par clé quel que soit le
//! nombre de demandes concurrentes ; les demandeurs qui ont besoin du
//! résultat attendent le signal de complétion de l'entrée.
//!
//! Le verrou du cache ne protège que la table des entrées : il n'est jamais
//! tenu pendant une conversion, chaque entrée gérant son propre état.

use crate::config_ext::PreviewConfigExt;
use crate::resource::{ConvertOptions, Resource};
use anyhow::{Result, anyhow};
use sgconfig::Config;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::collections::hash_map::Entry as MapEntry;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, error, info};

/// Statut d'une clé du cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Conversion en cours, pas encore de ressource
    Pending,
    /// Ressource convertie et disponible
    Ready,
    /// Clé inconnue du cache
    Absent,
}

/// Clé d'identité d'un fichier : empreinte SHA-256 de son chemin absolu,
/// tronquée à 16 octets et encodée en hexadécimal (32 caractères).
///
/// La clé ne dépend que du chemin : re-sélectionner le même fichier retombe
/// sur la même entrée du cache.
pub fn key_for_path(path: &Path) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut hasher = Sha256::new();
    hasher.update(absolute.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

#[derive(Default)]
struct EntryState {
    ready: bool,
    resource: Option<Arc<Resource>>,
}

/// Une entrée du cache et son signal de complétion.
///
/// L'état de l'entrée ne progresse que dans un sens : créée en attente,
/// elle devient prête exactement une fois, quand la tâche de conversion
/// installe la ressource.
pub struct CacheEntry {
    key: String,
    state: RwLock<EntryState>,
    done: Notify,
}

impl CacheEntry {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            state: RwLock::new(EntryState::default()),
            done: Notify::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn status(&self) -> Status {
        if self.state.read().await.ready {
            Status::Ready
        } else {
            Status::Pending
        }
    }

    /// Ressource installée, `None` tant que l'entrée n'est pas prête.
    pub async fn resource(&self) -> Option<Arc<Resource>> {
        self.state.read().await.resource.clone()
    }

    /// Installe la ressource, marque l'entrée prête et réveille tous les
    /// demandeurs en attente.
    async fn complete(&self, resource: Arc<Resource>) {
        {
            let mut state = self.state.write().await;
            state.resource = Some(resource);
            state.ready = true;
        }
        self.done.notify_waiters();
    }

    /// Attend que l'entrée soit prête. Retourne immédiatement si elle
    /// l'est déjà.
    pub async fn wait_until_ready(&self) {
        loop {
            // S'enregistrer avant de vérifier l'état, sinon une complétion
            // entre les deux passerait inaperçue
            let notified = self.done.notified();
            if self.state.read().await.ready {
                return;
            }
            notified.await;
        }
    }
}

/// Cache des aperçus, partagé entre les handlers HTTP et les tâches de fond.
///
/// Construit une fois au démarrage et passé en [`Arc`] à tout le monde. La
/// construction enregistre la réaction au rechargement de configuration :
/// l'événement `"reload"` vide intégralement le cache. À construire depuis
/// le runtime tokio.
pub struct PreviewCache {
    config: Arc<Config>,
    entries: RwLock<HashMap<String, Arc<CacheEntry>>>,
    current: RwLock<Option<String>>,
    // Répertoire des artefacts de conversion, créé au premier usage et
    // supprimé en bloc par clear()
    temp: Mutex<Option<TempDir>>,
}

impl PreviewCache {
    pub fn new(config: Arc<Config>) -> Arc<Self> {
        let cache = Arc::new(Self {
            config,
            entries: RwLock::new(HashMap::new()),
            current: RwLock::new(None),
            temp: Mutex::new(None),
        });

        let weak = Arc::downgrade(&cache);
        let handle = tokio::runtime::Handle::current();
        cache.config.register_callback(move |event: &str| {
            if event != "reload" {
                return;
            }
            let Some(cache) = weak.upgrade() else { return };
            handle.spawn(async move {
                cache.clear().await;
            });
        });

        cache
    }

    /// Configuration consultée par le cache.
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Garantit qu'une entrée existe pour `key` et lance sa conversion en
    /// tâche de fond. Sans effet si la clé est déjà connue, que sa
    /// conversion soit en cours ou terminée : une clé n'est jamais
    /// convertie deux fois.
    pub async fn put(self: &Arc<Self>, key: &str, file: PathBuf) {
        {
            let entries = self.entries.read().await;
            if entries.contains_key(key) {
                debug!(key = %key, "already cached, population skipped");
                return;
            }
        }
        let entry = {
            let mut entries = self.entries.write().await;
            match entries.entry(key.to_string()) {
                // Course perdue : une autre tâche vient de créer l'entrée
                MapEntry::Occupied(_) => return,
                MapEntry::Vacant(slot) => slot.insert(Arc::new(CacheEntry::new(key))).clone(),
            }
        };

        info!(key = %key, file = %file.display(), "population started");
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let options = cache.convert_options();
            let tmp_output = cache.temp_output_path(entry.key());
            let resource = Resource::convert(file, entry.key().to_string(), &options, tmp_output).await;
            entry.complete(Arc::new(resource)).await;
            debug!(key = %entry.key(), "resource ready");
        });
    }

    /// Consultation non bloquante d'une clé.
    pub async fn get(&self, key: &str) -> (Status, Option<Arc<Resource>>) {
        let entry = { self.entries.read().await.get(key).cloned() };
        match entry {
            None => (Status::Absent, None),
            Some(entry) => {
                let state = entry.state.read().await;
                if state.ready {
                    (Status::Ready, state.resource.clone())
                } else {
                    (Status::Pending, None)
                }
            }
        }
    }

    /// Attend la fin de la conversion de `key`. Erreur si la clé est
    /// inconnue du cache.
    pub async fn wait_until_ready(&self, key: &str) -> Result<()> {
        let entry = { self.entries.read().await.get(key).cloned() }
            .ok_or_else(|| anyhow!("unknown cache key '{}'", key))?;
        entry.wait_until_ready().await;
        Ok(())
    }

    /// Retire une entrée du cache, en annulant d'abord son flux d'octets
    /// pour couper les transferts en cours. Si la clé retirée était la clé
    /// courante, celle-ci est oubliée. Sans effet sur une clé inconnue.
    pub async fn evict(&self, key: &str) -> bool {
        let removed = { self.entries.write().await.remove(key) };
        let Some(entry) = removed else {
            return false;
        };
        if let Some(resource) = entry.resource().await {
            resource.cancel();
        }
        {
            let mut current = self.current.write().await;
            if current.as_deref() == Some(key) {
                *current = None;
            }
        }
        info!(key = %key, "evicted");
        true
    }

    /// Vide intégralement le cache : annule tous les flux, oublie la clé
    /// courante et supprime le répertoire temporaire. Appelé au
    /// rechargement de la configuration et à l'arrêt du démon.
    pub async fn clear(&self) {
        let drained: Vec<Arc<CacheEntry>> = {
            let mut entries = self.entries.write().await;
            entries.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &drained {
            if let Some(resource) = entry.resource().await {
                resource.cancel();
            }
        }
        *self.current.write().await = None;

        let temp = self.temp.lock().unwrap().take();
        if let Some(dir) = temp {
            if let Err(e) = dir.close() {
                error!("cannot remove temp directory: {}", e);
            }
        }
        info!("cache cleared ({} entries)", drained.len());
    }

    /// Marque `key` comme la clé actuellement affichée.
    pub async fn set_current(&self, key: &str) {
        *self.current.write().await = Some(key.to_string());
    }

    /// Clé actuellement affichée, s'il y en a une.
    pub async fn current(&self) -> Option<String> {
        self.current.read().await.clone()
    }

    /// Statut et ressource de la clé courante, pour la page d'aperçu et la
    /// diffusion périodique. `(None, Absent, None)` si aucune clé n'est
    /// sélectionnée ou si la clé courante a été évincée entre-temps.
    pub async fn current_entry(&self) -> (Option<String>, Status, Option<Arc<Resource>>) {
        let Some(key) = self.current().await else {
            return (None, Status::Absent, None);
        };
        let (status, resource) = self.get(&key).await;
        (Some(key), status, resource)
    }

    /// Nombre d'entrées présentes, tous états confondus.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Instantané des paramètres de conversion ; pris au lancement de
    /// chaque conversion, si bien qu'un rechargement de configuration ne
    /// touche que les conversions suivantes.
    fn convert_options(&self) -> ConvertOptions {
        ConvertOptions {
            rules: self.config.get_rules(),
            timeout: self.config.get_convert_timeout(),
            mime_command: self.config.get_mime_command(),
        }
    }

    /// Réserve un chemin de sortie pour une conversion, unique et privé.
    /// Le répertoire temporaire du processus est créé au premier appel.
    fn temp_output_path(&self, key: &str) -> PathBuf {
        let mut guard = self.temp.lock().unwrap();
        if guard.is_none() {
            match tempfile::Builder::new().prefix("spyglass").tempdir() {
                Ok(dir) => {
                    debug!("temp directory created at {:?}", dir.path());
                    *guard = Some(dir);
                }
                Err(e) => {
                    error!("cannot create temp directory: {}", e);
                    return std::env::temp_dir().join(format!("spyglass-{}-{}", std::process::id(), key));
                }
            }
        }
        let dir = guard.as_ref().unwrap();
        match tempfile::Builder::new().prefix("preview").tempfile_in(dir.path()) {
            Ok(file) => match file.keep() {
                Ok((_, path)) => path,
                Err(e) => {
                    error!("cannot keep temp file: {}", e);
                    dir.path().join(format!("preview-{}", key))
                }
            },
            Err(e) => {
                error!("cannot create temp file: {}", e);
                dir.path().join(format!("preview-{}", key))
            }
        }
    }
}

impl std::fmt::Debug for PreviewCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewCache").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_for_path_is_stable() {
        let first = key_for_path(Path::new("/tmp/a.txt"));
        let second = key_for_path(Path::new("/tmp/a.txt"));
        assert_eq!(first, second);
        assert_eq!(first.len(), 32);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_key_for_path_discriminates() {
        assert_ne!(
            key_for_path(Path::new("/tmp/a.txt")),
            key_for_path(Path::new("/tmp/b.txt"))
        );
    }

    #[test]
    fn test_key_for_relative_path_matches_absolute() {
        let cwd = std::env::current_dir().unwrap();
        let relative = key_for_path(Path::new("somewhere.txt"));
        let absolute = key_for_path(&cwd.join("somewhere.txt"));
        assert_eq!(relative, absolute);
    }
}
