//! Surveillance du fichier de configuration.
//!
//! notify exécute ses callbacks sur un thread interne (inotify sous Linux).
//! On y filtre les événements sur le chemin du fichier avant de déclencher
//! [`Config::reload`], qui invoque à son tour les callbacks enregistrés
//! avec l'événement `"reload"`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error};

use crate::Config;

/// Garde de surveillance : le watch s'arrête quand cette valeur est droppée.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

/// Démarre la surveillance du fichier de configuration de `config`.
///
/// inotify perd le watch lors d'un rename (sauvegarde atomique des
/// éditeurs), on surveille donc le répertoire parent en NonRecursive et on
/// filtre les événements par chemin. Les créations comptent comme des
/// modifications pour la même raison.
pub fn watch_config(config: Arc<Config>) -> Result<ConfigWatcher> {
    let target: PathBuf = PathBuf::from(config.get_path())
        .canonicalize()
        .with_context(|| format!("cannot resolve config file {}", config.get_path()))?;
    let parent = target
        .parent()
        .ok_or_else(|| anyhow!("config file has no parent directory"))?
        .to_path_buf();

    let filter = target.clone();
    let mut watcher = RecommendedWatcher::new(
        move |res: Result<notify::Event, notify::Error>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    error!("config watch error: {}", e);
                    return;
                }
            };
            let concerned = event.paths.iter().any(|p| p == &filter);
            if concerned && (event.kind.is_modify() || event.kind.is_create()) {
                debug!("config file changed on disk, reloading");
                if let Err(e) = config.reload() {
                    error!("config reload failed: {}", e);
                }
            }
        },
        notify::Config::default(),
    )?;
    watcher.watch(&parent, RecursiveMode::NonRecursive)?;
    debug!("watching config file {:?}", target);

    Ok(ConfigWatcher { _watcher: watcher })
}
