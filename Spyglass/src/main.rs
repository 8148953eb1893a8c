use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use serde_json::Value;
use sgcache::command::fill_argv;
use sgcache::{
    PreviewCache, PreviewConfigExt, PreviewState, create_preview_router, key_for_path,
    spawn_status_broadcast,
};
use sgconfig::{Config, get_config, watch::watch_config};
use sgserver::{
    ServerBuilder,
    logs::{LoggingOptions, init_logging},
};
use sgutils::PidLock;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tracing::{info, warn};
use ureq::Agent;

/// Aperçus de fichiers dans le navigateur, pilotés depuis un gestionnaire de
/// fichiers du terminal. Sans option, le chemin donné est envoyé au démon en
/// cours d'exécution.
#[derive(Parser)]
#[command(
    name = "spyglass",
    version,
    about = "File previews in the browser, for terminal file managers"
)]
struct Cli {
    /// File to display in the preview tab
    file: Option<PathBuf>,

    /// Start the preview daemon (foreground)
    #[arg(short, long)]
    start: bool,

    /// Stop the running preview daemon
    #[arg(short = 'p', long)]
    stop: bool,

    /// Stop the daemon if it is running, start it otherwise
    #[arg(short, long)]
    toggle: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.start {
        run_daemon()
    } else if cli.stop {
        client_stop()
    } else if cli.toggle {
        if PidLock::running_pid().is_some() {
            client_stop()
        } else {
            run_daemon()
        }
    } else if let Some(file) = cli.file.as_deref() {
        client_display(file)
    } else {
        Cli::command().print_help()?;
        Ok(())
    }
}

/// Fait tourner le démon d'aperçu au premier plan jusqu'à son arrêt.
#[tokio::main]
async fn run_daemon() -> Result<()> {
    // ========== PHASE 1 : Infrastructure ==========

    init_logging(LoggingOptions::from_config());

    let _pid = PidLock::acquire()?;

    let config = get_config();
    let _watcher = watch_config(config.clone())?;

    // ========== PHASE 2 : Cache et routes ==========

    info!("🗂️ Initializing preview cache...");
    let cache = PreviewCache::new(config.clone());
    let state = PreviewState::new(cache.clone());

    let mut server = ServerBuilder::new_configured().build();
    server
        .add_router("/", create_preview_router(state.clone()))
        .await;

    #[cfg(feature = "openapi")]
    {
        use utoipa::OpenApi;
        server
            .add_openapi(sgcache::openapi::ApiDoc::openapi(), "preview")
            .await;
    }

    // ========== PHASE 3 : Démarrage du serveur ==========

    info!("🌐 Starting HTTP server...");
    server.start().await?;

    let tick = spawn_status_broadcast(state.clone());

    // Relaie POST /stop vers l'arrêt gracieux du serveur
    let stop = server.stop_handle();
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        shutdown.notified().await;
        stop.stop();
    });

    launch_browser(&config);

    info!("✅ Spyglass is ready at {}", config.get_root_url());
    info!("Press Ctrl+C to stop...");
    server.wait().await;

    // ========== PHASE 4 : Nettoyage ==========

    tick.abort();
    cache.clear().await;

    Ok(())
}

/// Ouvre la page d'aperçu dans le navigateur configuré, détaché.
///
/// L'échec n'est pas fatal : l'utilisateur a peut-être déjà un onglet ouvert,
/// ou préfère l'ouvrir lui-même.
fn launch_browser(config: &Config) {
    let argv = config.get_browser_command();
    if argv.is_empty() {
        return;
    }

    let argv = fill_argv(&argv, &[("{url}", &config.get_root_url())]);
    info!("🌍 Opening browser: {}", argv.join(" "));
    if let Err(e) = tokio::process::Command::new(&argv[0])
        .args(&argv[1..])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        warn!("cannot launch browser {}: {}", argv[0], e);
    }
}

/// Envoie le fichier sélectionné au démon en cours d'exécution.
fn client_display(file: &Path) -> Result<()> {
    let file = std::path::absolute(file)
        .with_context(|| format!("cannot resolve path {}", file.display()))?;
    if !file.is_file() {
        bail!("{} is not a regular file", file.display());
    }

    let body = post_json(
        "display",
        serde_json::json!({
            "file": file.to_string_lossy(),
            "hash": key_for_path(&file),
        }),
    )?;
    ensure_success(&body)
}

/// Demande au démon de s'arrêter.
fn client_stop() -> Result<()> {
    if PidLock::running_pid().is_none() {
        bail!("no running preview daemon");
    }
    let body = post_json("stop", serde_json::json!({}))?;
    ensure_success(&body)
}

/// POST une requête JSON au démon et décode sa réponse.
fn post_json(route: &str, payload: Value) -> Result<Value> {
    let config = get_config();
    let url = format!("{}/{}", config.get_root_url(), route);
    let agent = build_agent(Duration::from_secs(5));

    let mut response = agent.post(&url).send_json(&payload).with_context(|| {
        format!("cannot reach the preview daemon at {url} (start it with `spyglass --start`)")
    })?;
    let text = response
        .body_mut()
        .read_to_string()
        .context("cannot read the daemon response")?;
    serde_json::from_str(&text).context("daemon response is not valid JSON")
}

fn ensure_success(body: &Value) -> Result<()> {
    if body["status"] == "success" {
        return Ok(());
    }
    bail!(
        "the daemon refused the request: {}",
        body["message"].as_str().unwrap_or("unknown error")
    )
}

/// Construit un agent HTTP avec timeout global.
///
/// Les statuts d'erreur ne sont pas convertis en `Err` : la réponse JSON du
/// démon porte déjà le détail, même en 4xx.
fn build_agent(timeout: Duration) -> Agent {
    Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build()
        .into()
}
