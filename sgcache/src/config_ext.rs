//! Extension de [`sgconfig::Config`] pour les réglages d'aperçu
//!
//! Les règles de conversion et les paramètres du moteur vivent dans l'arbre
//! de configuration ; ce module fournit des accesseurs typés, avec valeurs
//! par défaut quand une clé manque ou est mal typée.
//!
//! Les jeux de règles sont superposés : un jeu nommé d'après le nom d'hôte
//! de la machine prime sur le jeu de la plateforme (`linux`, `macos`,
//! `windows`), qui prime sur le jeu `default`. Le premier jeu existant est
//! pris dans son intégralité, sans fusion avec les suivants.

use crate::rules::ConversionRule;
use serde_yaml::Value;
use sgconfig::Config;
use std::time::Duration;
use tracing::warn;

/// Délai par défaut accordé aux commandes de conversion (ms).
pub const DEFAULT_CONVERT_TIMEOUT_MS: u64 = 10_000;

/// Période par défaut de diffusion du statut courant (ms).
pub const DEFAULT_BROADCAST_INTERVAL_MS: u64 = 250;

/// Titre par défaut de la page d'aperçu.
pub const DEFAULT_PAGE_TITLE: &str = "spyglass preview";

/// Accesseurs des réglages d'aperçu sur l'arbre de configuration.
pub trait PreviewConfigExt {
    /// Jeu de règles résolu pour cette machine : hôte, puis plateforme,
    /// puis `default`. Vide si aucun jeu n'est déclaré.
    fn get_rules(&self) -> Vec<ConversionRule>;

    /// Jeu de règles nommé, tel que déclaré sous `rules.<name>`.
    fn get_rule_set(&self, name: &str) -> Option<Vec<ConversionRule>>;

    /// Délai maximal accordé à une commande de conversion.
    fn get_convert_timeout(&self) -> Duration;

    /// Période de diffusion du statut de la ressource courante.
    fn get_broadcast_interval(&self) -> Duration;

    /// Commande de détection du type MIME (`{input}` substitué).
    /// Vide si la détection est désactivée.
    fn get_mime_command(&self) -> Vec<String>;

    /// Commande d'ouverture du navigateur (`{url}` substitué).
    /// Vide si le navigateur ne doit pas être lancé.
    fn get_browser_command(&self) -> Vec<String>;

    /// Titre de la page d'aperçu.
    fn get_page_title(&self) -> String;

    /// Feuille de style additionnelle de la page d'aperçu.
    fn get_page_style(&self) -> String;
}

impl PreviewConfigExt for Config {
    fn get_rules(&self) -> Vec<ConversionRule> {
        if let Some(host) = sgutils::hostname() {
            if let Some(rules) = self.get_rule_set(&host) {
                return rules;
            }
        }
        if let Some(rules) = self.get_rule_set(sgutils::platform()) {
            return rules;
        }
        self.get_rule_set("default").unwrap_or_default()
    }

    fn get_rule_set(&self, name: &str) -> Option<Vec<ConversionRule>> {
        let value = self.get_value(&["rules", name]).ok()?;
        if value.is_null() {
            return None;
        }
        match serde_yaml::from_value(value) {
            Ok(rules) => Some(rules),
            Err(e) => {
                warn!("Invalid rule set 'rules.{}', ignoring it: {}", name, e);
                None
            }
        }
    }

    fn get_convert_timeout(&self) -> Duration {
        Duration::from_millis(millis_at(
            self,
            &["preview", "timeout"],
            DEFAULT_CONVERT_TIMEOUT_MS,
        ))
    }

    fn get_broadcast_interval(&self) -> Duration {
        Duration::from_millis(millis_at(
            self,
            &["preview", "interval"],
            DEFAULT_BROADCAST_INTERVAL_MS,
        ))
    }

    fn get_mime_command(&self) -> Vec<String> {
        argv_at(self, &["preview", "mime"])
    }

    fn get_browser_command(&self) -> Vec<String> {
        argv_at(self, &["preview", "browser"])
    }

    fn get_page_title(&self) -> String {
        match self.get_value(&["preview", "title"]) {
            Ok(Value::String(title)) => title,
            _ => DEFAULT_PAGE_TITLE.to_string(),
        }
    }

    fn get_page_style(&self) -> String {
        match self.get_value(&["preview", "style"]) {
            Ok(Value::String(style)) => style,
            _ => String::new(),
        }
    }
}

/// Lit une durée en millisecondes, avec valeur par défaut si la clé manque
/// ou n'est pas un entier positif.
fn millis_at(config: &Config, path: &[&str], default: u64) -> u64 {
    match config.get_value(path) {
        Ok(Value::Number(n)) => match n.as_u64() {
            Some(ms) => ms,
            None => {
                warn!(
                    "Invalid duration at '{}', using default {} ms",
                    path.join("."),
                    default
                );
                default
            }
        },
        _ => default,
    }
}

/// Lit une ligne de commande (séquence de chaînes). Vide si la clé manque
/// ou est mal typée.
fn argv_at(config: &Config, path: &[&str]) -> Vec<String> {
    match config.get_value(path) {
        Ok(value) => {
            if value.is_null() {
                return Vec::new();
            }
            match serde_yaml::from_value(value) {
                Ok(argv) => argv,
                Err(e) => {
                    warn!("Invalid command at '{}', ignoring it: {}", path.join("."), e);
                    Vec::new()
                }
            }
        }
        Err(_) => Vec::new(),
    }
}
