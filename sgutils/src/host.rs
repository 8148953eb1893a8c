use sysinfo::System;

/// Retourne le hostname de la machine, en minuscules.
///
/// Retourne `None` si le système ne peut pas fournir de hostname
/// (cas rare, typiquement un environnement conteneurisé minimal).
pub fn hostname() -> Option<String> {
    System::host_name().map(|h| h.to_lowercase())
}

/// Retourne le nom de plateforme utilisé pour la résolution des règles.
///
/// Valeurs possibles : `windows`, `macos`, `linux`. Les Unix exotiques
/// sont rangés avec `linux`, ils retombent de toute façon sur le jeu
/// de règles `default` si aucun jeu `linux` n'est défini.
pub fn platform() -> &'static str {
    match os_info::get().os_type() {
        os_info::Type::Windows => "windows",
        os_info::Type::Macos => "macos",
        _ => "linux",
    }
}
