use netstat2::{AddressFamilyFlags, ProtocolFlags, ProtocolSocketInfo, get_sockets_info};
use sysinfo::{Pid, System};

/// Processus détenant un port TCP local.
#[derive(Debug, Clone)]
pub struct PortOwner {
    pub pid: u32,
    pub process_name: String,
    pub owner: String,
    pub port: u16,
}

impl std::fmt::Display for PortOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (pid {}, user {})",
            self.process_name, self.pid, self.owner
        )
    }
}

/// Tente d'identifier le processus qui écoute sur `port` en TCP.
///
/// Sert uniquement au diagnostic de démarrage : si le port du démon est
/// déjà occupé, on nomme le coupable dans le message d'erreur.
pub fn find_port_owner(port: u16) -> Option<PortOwner> {
    let sockets = get_sockets_info(
        AddressFamilyFlags::IPV4 | AddressFamilyFlags::IPV6,
        ProtocolFlags::TCP,
    )
    .ok()?;

    let mut system = System::new_all();
    system.refresh_all();

    for socket in sockets {
        if let ProtocolSocketInfo::Tcp(ref tcp_info) = socket.protocol_socket_info {
            if tcp_info.local_port == port {
                if let Some(info) = build_owner(&mut system, port, socket.associated_pids.first()) {
                    return Some(info);
                }
            }
        }
    }

    None
}

fn build_owner(system: &mut System, port: u16, pid_opt: Option<&u32>) -> Option<PortOwner> {
    let pid = *pid_opt?;
    let process = system.process(Pid::from_u32(pid))?;
    let process_name = process.name().to_string();

    let owner = process
        .user_id()
        .and_then(|uid| {
            users::get_user_by_uid(**uid).map(|user| user.name().to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "unknown".to_string());

    Some(PortOwner {
        pid,
        process_name,
        owner,
        port,
    })
}
