/// Identité de la machine locale (hostname, plateforme).
///
/// Ces valeurs servent à résoudre le jeu de règles de conversion applicable :
/// un jeu nommé d'après le hostname prime sur le jeu de la plateforme,
/// qui prime sur le jeu `default`.
mod host;

/// Verrou singleton par fichier PID.
///
/// Garantit qu'un seul démon tourne par utilisateur. Le fichier est placé
/// dans le répertoire runtime (`$XDG_RUNTIME_DIR`) ou, à défaut, dans le
/// répertoire temporaire du système.
mod pid;

/// Diagnostic des ports réseau occupés.
mod process;

pub use host::{hostname, platform};
pub use pid::PidLock;
pub use process::{PortOwner, find_port_owner};
