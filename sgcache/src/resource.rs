//! Conversion d'un fichier en ressource d'aperçu
//!
//! Une [`Resource`] est le résultat de la conversion d'un fichier : un
//! fragment HTML pour la page d'aperçu et, si possible, un fichier servi en
//! flux d'octets sous `/src/{clé}`. Trois stratégies sont essayées dans
//! l'ordre : service direct du fichier original, commande de conversion
//! externe, et enfin repli texte brut. La conversion n'échoue jamais : au
//! pire la ressource affiche le début du fichier tel quel.

use crate::command::{self, CommandOutput};
use crate::reader::CancelReader;
use crate::rules::{self, ConversionRule};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Nombre maximal d'octets affichés par le repli texte brut.
pub const RAW_PREVIEW_LIMIT: usize = 4096;

/// Marqueur ajouté quand le repli brut tronque le fichier.
pub const RAW_TRUNCATION_MARK: &str = "\n\n[...]";

/// Paramètres de conversion, figés au lancement d'une conversion.
///
/// C'est un instantané de la configuration : une modification des règles ne
/// concerne que les conversions suivantes, jamais celles en cours.
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Règles applicables, dans leur ordre de déclaration
    pub rules: Vec<ConversionRule>,
    /// Délai maximal accordé aux commandes externes
    pub timeout: Duration,
    /// Commande de détection du type MIME (`{input}` substitué)
    pub mime_command: Vec<String>,
}

/// Une ressource d'aperçu prête à être servie.
#[derive(Debug)]
pub struct Resource {
    /// Fichier original sélectionné
    pub file: PathBuf,
    /// Clé d'identité de la ressource
    pub key: String,
    /// Base de sortie pré-allouée passée aux commandes via `{output}`
    pub tmp_output: PathBuf,
    /// Fichier réellement servi sous `/src/{clé}`
    pub src_file: PathBuf,
    /// Fragment HTML inséré dans la page d'aperçu
    pub html: String,
    /// Sortie standard de la commande de conversion
    pub stdout: String,
    /// Sortie d'erreur de la commande de conversion
    pub stderr: String,
    /// Flux d'octets attaché, absent si le fichier servi est illisible
    pub reader: Option<Arc<CancelReader>>,
}

impl Resource {
    /// Convertit `file` selon les règles d'`options` et attache le flux.
    ///
    /// `tmp_output` est la base de sortie réservée à cette conversion ;
    /// les commandes y écrivent leur artefact, éventuellement en y
    /// ajoutant une extension de leur choix.
    pub async fn convert(
        file: PathBuf,
        key: String,
        options: &ConvertOptions,
        tmp_output: PathBuf,
    ) -> Resource {
        let mut resource = Resource {
            src_file: file.clone(),
            file,
            key,
            tmp_output,
            html: String::new(),
            stdout: String::new(),
            stderr: String::new(),
            reader: None,
        };
        resource.populate(options).await;
        resource.attach_reader();
        resource
    }

    /// URL relative du flux d'octets de cette ressource.
    pub fn url(&self) -> String {
        format!("/src/{}", self.key)
    }

    async fn populate(&mut self, options: &ConvertOptions) {
        let ext = rules::file_extension(&self.file);
        // La sonde MIME n'est lancée que si une règle en a besoin
        let mime = if options.rules.iter().any(|r| r.needs_mime()) {
            command::detect_mime(&options.mime_command, &self.file, options.timeout).await
        } else {
            None
        };

        let matched = rules::matching_rules(&options.rules, &ext, mime.as_deref());
        if let Some(rule) = matched.first() {
            debug!(
                key = %self.key,
                ext = %ext,
                mime = mime.as_deref().unwrap_or("-"),
                "conversion rule selected"
            );
            if self.serve_direct(rule) {
                return;
            }
            if self.serve_command(rule, options).await {
                return;
            }
        }
        self.serve_raw().await;
    }

    /// Service direct : pas de commande, le fichier original est servi et
    /// le fragment HTML référence son flux via `{url}`.
    fn serve_direct(&mut self, rule: &ConversionRule) -> bool {
        if !rule.cmd.is_empty() {
            return false;
        }
        let Some(template) = &rule.html else {
            return false;
        };
        self.src_file = self.file.clone();
        self.html = command::fill_placeholders(template, &[("{url}", &self.url())]);
        true
    }

    /// Conversion par commande externe. Retourne `false` si la commande ne
    /// peut pas être lancée, échoue ou dépasse son délai, auquel cas le
    /// repli brut prend le relais.
    async fn serve_command(&mut self, rule: &ConversionRule, options: &ConvertOptions) -> bool {
        if rule.cmd.is_empty() {
            return false;
        }
        let input = self.file.to_string_lossy().into_owned();
        let output = self.tmp_output.to_string_lossy().into_owned();
        let argv = command::fill_argv(&rule.cmd, &[("{input}", &input), ("{output}", &output)]);

        let result = match command::run_with_timeout(&argv, options.timeout).await {
            Ok(result) => result,
            Err(e) => {
                warn!(key = %self.key, "cannot run conversion command: {:#}", e);
                return false;
            }
        };
        self.stdout = result.stdout.clone();
        self.stderr = result.stderr.clone();
        if !result.success() {
            self.log_command_failure(&argv, &result);
            return false;
        }

        // Les convertisseurs ajoutent souvent une extension au chemin de
        // sortie qu'on leur donne ; on retrouve l'artefact réellement écrit.
        let artifact = find_output_artifact(&self.tmp_output);
        self.src_file = match &rule.src {
            Some(template) => PathBuf::from(command::fill_placeholders(
                template,
                &[("{input}", &input), ("{output}", &output)],
            )),
            None => artifact.clone(),
        };

        let template = rule.html.clone().unwrap_or_default();
        let mut html = command::fill_placeholders(
            &template,
            &[
                ("{url}", &self.url()),
                ("{output}", &output),
                ("{outputext}", &artifact.to_string_lossy()),
                ("{stdout}", &self.stdout),
                ("{stderr}", &self.stderr),
            ],
        );
        // {content} en dernier : le contenu inséré n'est pas re-substitué
        if html.contains("{content}") {
            let content = match tokio::fs::read(&artifact).await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    warn!(key = %self.key, "cannot inline {:?}: {}", artifact, e);
                    String::new()
                }
            };
            html = html.replace("{content}", &content);
        }
        self.html = html;
        true
    }

    fn log_command_failure(&self, argv: &[String], result: &CommandOutput) {
        if result.timed_out {
            warn!(key = %self.key, "conversion command timed out: {:?}", argv);
        } else {
            warn!(
                key = %self.key,
                "conversion command exited with status {}: {}",
                result.status,
                result.stderr.trim()
            );
        }
    }

    /// Repli final : les premiers octets du fichier dans un bloc verbatim.
    /// Les fichiers binaires sont affichés quand même, octets invalides et
    /// NUL remplacés par U+FFFD.
    async fn serve_raw(&mut self) {
        self.src_file = self.file.clone();
        let head = match read_head(&self.file, RAW_PREVIEW_LIMIT).await {
            Ok(head) => head,
            Err(e) => {
                warn!(key = %self.key, "cannot read {:?}: {}", self.file, e);
                Vec::new()
            }
        };
        let mut text = String::from_utf8_lossy(&head).into_owned();
        if head.contains(&0) {
            text = text.replace('\0', "\u{FFFD}");
        }
        let mut body = escape_html(&text);
        if head.len() >= RAW_PREVIEW_LIMIT {
            body.push_str(RAW_TRUNCATION_MARK);
        }
        self.html = format!("<xmp>{}</xmp>", body);
    }

    fn attach_reader(&mut self) {
        match CancelReader::open(&self.src_file) {
            Ok(reader) => self.reader = Some(Arc::new(reader)),
            Err(e) => {
                warn!(
                    key = %self.key,
                    "no byte stream for {:?}: {}",
                    self.src_file,
                    e
                );
            }
        }
    }

    /// Annule le flux attaché, s'il existe. Idempotent.
    pub fn cancel(&self) {
        if let Some(reader) = &self.reader {
            reader.cancel();
        }
    }
}

/// Lit au plus `budget` octets au début de `path`.
async fn read_head(path: &Path, budget: usize) -> std::io::Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; budget];
    let mut filled = 0;
    while filled < budget {
        let count = file.read(&mut buf[filled..]).await?;
        if count == 0 {
            break;
        }
        filled += count;
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Retrouve l'artefact écrit par une commande de conversion : le fichier du
/// même répertoire dont le nom commence par celui de `tmp_output`, le plus
/// long en cas d'ambiguïté. `tmp_output` lui-même est retourné si la
/// commande a écrit directement dedans.
fn find_output_artifact(tmp_output: &Path) -> PathBuf {
    let Some(dir) = tmp_output.parent() else {
        return tmp_output.to_path_buf();
    };
    let Some(base) = tmp_output.file_name().and_then(|n| n.to_str()) else {
        return tmp_output.to_path_buf();
    };
    let mut best = tmp_output.to_path_buf();
    let mut best_len = base.len();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return best;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(base) && name.len() > best_len {
            best_len = name.len();
            best = entry.path();
        }
    }
    best
}

/// Échappe `&`, `<` et `>` pour insertion dans la page d'aperçu.
pub(crate) fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
