//! Exécution des commandes externes de conversion
//!
//! Les commandes sont décrites par un vecteur d'arguments dont certains
//! contiennent des marqueurs (`{input}`, `{output}`, ...) substitués avant
//! l'exécution. Toute commande est bornée par un délai au-delà duquel le
//! processus est tué.

use anyhow::{Context, Result, bail};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

/// Code de sortie rapporté quand le processus est tué ou interrompu
/// par un signal.
const KILLED_STATUS: i32 = 255;

/// Résultat d'une commande externe, sorties capturées.
#[derive(Debug, Default)]
pub struct CommandOutput {
    /// Code de sortie du processus
    pub status: i32,
    /// Sortie standard, décodée avec remplacement des octets invalides
    pub stdout: String,
    /// Sortie d'erreur, décodée de la même façon
    pub stderr: String,
    /// Vrai si le processus a été tué pour dépassement du délai
    pub timed_out: bool,
}

impl CommandOutput {
    /// Vrai si la commande s'est terminée d'elle-même avec le code 0.
    pub fn success(&self) -> bool {
        self.status == 0 && !self.timed_out
    }
}

/// Substitue chaque paire `(marqueur, valeur)` dans un gabarit.
pub fn fill_placeholders(template: &str, vars: &[(&str, &str)]) -> String {
    let mut filled = template.to_string();
    for (marker, value) in vars {
        filled = filled.replace(marker, value);
    }
    filled
}

/// Substitue les marqueurs dans chaque argument d'une ligne de commande.
pub fn fill_argv(argv: &[String], vars: &[(&str, &str)]) -> Vec<String> {
    argv.iter().map(|arg| fill_placeholders(arg, vars)).collect()
}

/// Exécute `argv` et attend sa terminaison, au plus `limit`.
///
/// Au-delà du délai le processus est tué et le résultat est marqué
/// `timed_out`. Les sorties standard et d'erreur sont capturées, l'entrée
/// standard est fermée. L'erreur retournée ne concerne que l'impossibilité
/// de lancer ou d'attendre le processus, jamais son code de sortie.
pub async fn run_with_timeout(argv: &[String], limit: Duration) -> Result<CommandOutput> {
    let Some((program, args)) = argv.split_first() else {
        bail!("empty command line");
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command
        .spawn()
        .with_context(|| format!("cannot spawn '{}'", program))?;

    match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(result) => {
            let output = result.with_context(|| format!("cannot wait for '{}'", program))?;
            Ok(CommandOutput {
                status: output.status.code().unwrap_or(KILLED_STATUS),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                timed_out: false,
            })
        }
        // Le délai a expiré : l'abandon du futur détruit le Child,
        // ce qui tue le processus (kill_on_drop).
        Err(_) => Ok(CommandOutput {
            status: KILLED_STATUS,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: true,
        }),
    }
}

/// Sonde le type MIME d'un fichier via la commande configurée.
///
/// `{input}` est substitué par le chemin du fichier. Retourne `None` si
/// aucune commande n'est configurée ou si la sonde échoue, auquel cas seules
/// les extensions permettront de sélectionner une règle.
pub async fn detect_mime(mime_command: &[String], file: &Path, limit: Duration) -> Option<String> {
    if mime_command.is_empty() {
        return None;
    }
    let input = file.to_string_lossy();
    let argv = fill_argv(mime_command, &[("{input}", &input)]);
    match run_with_timeout(&argv, limit).await {
        Ok(output) if output.success() => {
            let mime = output.stdout.trim();
            if mime.is_empty() {
                None
            } else {
                Some(mime.to_string())
            }
        }
        Ok(output) => {
            warn!(
                "mime probe exited with status {}: {}",
                output.status,
                output.stderr.trim()
            );
            None
        }
        Err(e) => {
            warn!("cannot probe mime type of {:?}: {:#}", file, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fill_placeholders() {
        let filled = fill_placeholders(
            "convert {input} to {output} and {output}.png",
            &[("{input}", "/a/photo.raw"), ("{output}", "/tmp/out")],
        );
        assert_eq!(filled, "convert /a/photo.raw to /tmp/out and /tmp/out.png");
    }

    #[test]
    fn test_fill_argv_leaves_plain_args() {
        let filled = fill_argv(
            &argv(&["ffmpeg", "-i", "{input}", "{output}.mp4"]),
            &[("{input}", "in.mkv"), ("{output}", "out")],
        );
        assert_eq!(filled, argv(&["ffmpeg", "-i", "in.mkv", "out.mp4"]));
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let output = run_with_timeout(&argv(&["echo", "hello"]), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.status, 0);
        assert_eq!(output.stdout.trim(), "hello");
        assert!(!output.timed_out);
    }

    #[tokio::test]
    async fn test_run_reports_exit_code() {
        let output = run_with_timeout(&argv(&["sh", "-c", "echo oops >&2; exit 3"]), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!output.success());
        assert_eq!(output.status, 3);
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_run_kills_on_timeout() {
        let started = std::time::Instant::now();
        let output = run_with_timeout(&argv(&["sleep", "30"]), Duration::from_millis(100))
            .await
            .unwrap();
        assert!(output.timed_out);
        assert!(!output.success());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_run_rejects_empty_argv() {
        assert!(run_with_timeout(&[], Duration::from_secs(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_run_missing_program() {
        let result = run_with_timeout(
            &argv(&["/nonexistent/bin/converter"]),
            Duration::from_secs(1),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_detect_mime_trims_newline() {
        let mime = detect_mime(
            &argv(&["sh", "-c", "echo text/plain"]),
            Path::new("/tmp/x"),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(mime.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_detect_mime_unconfigured() {
        assert!(detect_mime(&[], Path::new("/tmp/x"), Duration::from_secs(1)).await.is_none());
    }

    #[tokio::test]
    async fn test_detect_mime_failing_probe() {
        let mime = detect_mime(
            &argv(&["sh", "-c", "exit 1"]),
            Path::new("/tmp/x"),
            Duration::from_secs(5),
        )
        .await;
        assert!(mime.is_none());
    }
}
