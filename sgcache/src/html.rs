//! Page d'aperçu servie au navigateur
//!
//! Une seule page, gardée ouverte dans un onglet : elle affiche le fragment
//! HTML de la ressource courante et écoute les diffusions WebSocket du
//! démon. Quand la clé courante ou sa disponibilité change, la page se
//! recharge ; tant que la conversion est en cours, elle montre un spinner.
//! À l'arrêt du démon la page affiche un message et tente périodiquement de
//! se reconnecter, ce qui la fait revivre si le démon redémarre.

use crate::resource::escape_html;

/// Fragment affiché tant que la ressource courante n'est pas prête.
pub(crate) const SPINNER_HTML: &str = r#"<div class="spinner"></div>"#;

/// Gabarit de la page d'aperçu. Les marqueurs `{title}`, `{style}`,
/// `{hash}`, `{ready}`, `{interval}` et `{html}` sont substitués au rendu.
const PAGE_TEMPLATE: &str = r##"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
html, body { margin: 0; padding: 0; height: 100%; }
#content { height: 100%; display: flex; align-items: center; justify-content: center; }
#content img, #content video { max-width: 100%; max-height: 100%; }
#content iframe { width: 100%; height: 100%; border: none; }
#content xmp { align-self: flex-start; margin: 1em; white-space: pre-wrap; }
.notice { opacity: 0.6; }
.spinner {
  width: 48px; height: 48px;
  border: 5px solid #888; border-bottom-color: transparent; border-radius: 50%;
  animation: rotation 1s linear infinite;
}
@keyframes rotation { from { transform: rotate(0deg); } to { transform: rotate(360deg); } }
{style}
</style>
</head>
<body>
<div id="content">{html}</div>
<script>
const hash = "{hash}";
const ready = {ready};
const interval = {interval};

function connect() {
  const socket = new WebSocket("ws://" + location.host + "/");
  socket.onmessage = (event) => {
    const data = JSON.parse(event.data);
    if (data.action === "update") {
      if (data.hash !== hash || data.ready !== ready) {
        if (hash && hash !== data.hash) {
          socket.send(JSON.stringify({ action: "close", hash: hash }));
        }
        location.reload();
      }
    } else if (data.action === "shutdown") {
      document.getElementById("content").innerHTML =
        '<p class="notice">spyglass stopped</p>';
    }
  };
  socket.onclose = () => { setTimeout(connect, interval); };
}
connect();
</script>
</body>
</html>
"##;

/// Rend la page d'aperçu complète.
///
/// `hash` et `ready` décrivent la ressource courante telle que la page la
/// connaît ; la page se recharge dès qu'une diffusion annonce autre chose.
/// `fragment` est inséré tel quel : c'est du HTML déjà résolu par le moteur
/// de conversion, le spinner remplace un fragment absent.
pub fn render_page(
    title: &str,
    style: &str,
    hash: &str,
    ready: bool,
    interval_ms: u64,
    fragment: Option<&str>,
) -> String {
    let content = match fragment {
        Some(html) => html,
        None => SPINNER_HTML,
    };
    PAGE_TEMPLATE
        .replace("{title}", &escape_html(title))
        .replace("{style}", style)
        .replace("{hash}", hash)
        .replace("{ready}", if ready { "true" } else { "false" })
        .replace("{interval}", &interval_ms.to_string())
        .replace("{html}", content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_ready_page() {
        let page = render_page(
            "previews",
            "body { color: red; }",
            "abcd1234",
            true,
            250,
            Some("<img src=\"/src/abcd1234\">"),
        );
        assert!(page.contains("<title>previews</title>"));
        assert!(page.contains("body { color: red; }"));
        assert!(page.contains("const hash = \"abcd1234\";"));
        assert!(page.contains("const ready = true;"));
        assert!(page.contains("const interval = 250;"));
        assert!(page.contains("<img src=\"/src/abcd1234\">"));
        assert!(!page.contains("spinner\"></div>"));
    }

    #[test]
    fn test_render_pending_page_shows_spinner() {
        let page = render_page("previews", "", "abcd1234", false, 250, None);
        assert!(page.contains("const ready = false;"));
        assert!(page.contains(SPINNER_HTML));
    }

    #[test]
    fn test_render_escapes_title() {
        let page = render_page("a < b", "", "", false, 100, None);
        assert!(page.contains("<title>a &lt; b</title>"));
    }

    #[test]
    fn test_no_placeholder_left_behind() {
        let page = render_page("t", "s", "h", true, 1, Some("x"));
        for marker in ["{title}", "{style}", "{hash}", "{ready}", "{interval}", "{html}"] {
            assert!(!page.contains(marker), "marker {} not substituted", marker);
        }
    }
}
