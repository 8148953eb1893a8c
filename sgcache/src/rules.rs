//! Règles de conversion des fichiers en aperçus
//!
//! Une règle associe un ensemble d'extensions et/ou de types MIME à une
//! stratégie d'affichage : servir le fichier tel quel, exécuter une commande
//! de conversion, ou injecter un fragment HTML. Les règles sont déclarées
//! dans la configuration et évaluées dans leur ordre de déclaration.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Une règle de conversion telle que déclarée dans la configuration.
///
/// Une règle s'applique à un fichier si son extension figure dans `ext`
/// **ou** si son type MIME détecté figure dans `mime`. Tous les champs sont
/// optionnels : une règle sans `cmd` mais avec `html` sert le fichier
/// original directement, une règle avec `cmd` le convertit d'abord.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionRule {
    /// Extensions concernées, sans le point (ex: `["jpg", "png"]`)
    #[serde(default)]
    pub ext: Vec<String>,
    /// Types MIME concernés (ex: `["application/pdf"]`)
    #[serde(default)]
    pub mime: Vec<String>,
    /// Commande de conversion ; `{input}` et `{output}` y sont substitués
    #[serde(default)]
    pub cmd: Vec<String>,
    /// Chemin du fichier à servir, s'il diffère de l'artefact produit
    #[serde(default)]
    pub src: Option<String>,
    /// Fragment HTML inséré dans la page d'aperçu
    #[serde(default)]
    pub html: Option<String>,
}

impl ConversionRule {
    /// Indique si la règle s'applique à un fichier d'extension `ext` et de
    /// type MIME `mime`. La comparaison ignore la casse dans les deux cas.
    pub fn matches(&self, ext: &str, mime: Option<&str>) -> bool {
        let ext_match = !ext.is_empty() && self.ext.iter().any(|e| e.eq_ignore_ascii_case(ext));
        let mime_match = match mime {
            Some(mime) => self.mime.iter().any(|m| m.eq_ignore_ascii_case(mime)),
            None => false,
        };
        ext_match || mime_match
    }

    /// Vrai si la règle a besoin du type MIME pour être évaluée.
    pub fn needs_mime(&self) -> bool {
        !self.mime.is_empty()
    }
}

/// Extension d'un fichier, en minuscules et sans le point.
/// Chaîne vide si le fichier n'a pas d'extension.
pub fn file_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Retourne les règles applicables à un fichier, dans l'ordre de déclaration.
/// La première règle retournée est celle qui gouverne la conversion.
pub fn matching_rules<'a>(
    rules: &'a [ConversionRule],
    ext: &str,
    mime: Option<&str>,
) -> Vec<&'a ConversionRule> {
    rules.iter().filter(|r| r.matches(ext, mime)).collect()
}
