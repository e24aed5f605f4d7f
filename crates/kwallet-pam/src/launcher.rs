//! Wallet daemon launch and key handoff.
//!
//! The launcher turns a derived wallet key into a running, unprivileged
//! wallet daemon that already knows the key. The handoff has three legs:
//!
//! - an anonymous pipe the key travels over, read end handed to the daemon
//! - a listening Unix socket the session's wallet clients will connect to,
//!   created and published before the daemon exists so clients can never
//!   observe a socket-less session
//! - the spawned daemon itself, which drops to the target user's ids before
//!   it execs
//!
//! The daemon inherits the pipe read end on descriptor 3 and the socket on
//! descriptor 4, announced as positional arguments. Everything here is
//! fire-and-forget: once the key bytes are written the login stack moves on,
//! and the daemon's further fate belongs to the session.

use std::fs;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use nix::fcntl::OFlag;
use nix::sys::signal::{signal, SigHandler, Signal};
use nix::sys::socket::{bind, listen, socket, AddressFamily, Backlog, SockFlag, SockType, UnixAddr};
use nix::unistd::{chown, pipe2};
use thiserror::Error;
use tracing::{debug, info, warn};

use kwallet_pam_core::config::ModuleConfig;
use kwallet_pam_core::host::{HostError, HostSession, SOCKET_ENV_VAR};
use kwallet_pam_core::secret::WalletKey;
use kwallet_pam_core::user::TargetUser;

/// Descriptor the daemon reads the wallet key from.
pub const KEY_FD: RawFd = 3;

/// Descriptor the daemon accepts wallet connections on.
pub const SOCKET_FD: RawFd = 4;

/// Flag announcing the key/socket descriptor pair on the daemon's command
/// line.
pub const PAM_LOGIN_FLAG: &str = "--pam-login";

/// Listen backlog of the rendezvous socket, from the daemon's accept model.
const SOCKET_BACKLOG: i32 = 5;

/// Scratch area for the child's descriptor shuffle, above both fixed slots.
const TEMP_FD_FLOOR: RawFd = 10;

/// Upper sweep bound when `close_range` is unavailable.
const FALLBACK_SWEEP_MAX: RawFd = 1024;

/// Errors from provisioning the handoff or spawning the daemon.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// SIGPIPE could not be ignored for the handoff.
    #[error("failed to adjust the SIGPIPE disposition")]
    SigPipe(#[source] nix::Error),

    /// The handoff pipe could not be created.
    #[error("failed to create the handoff pipe")]
    Pipe(#[source] nix::Error),

    /// The socket path cannot be expressed as a socket address.
    #[error("socket path {path:?} is not usable")]
    SocketPath {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    /// The rendezvous socket could not be created.
    #[error("failed to create the rendezvous socket")]
    Socket(#[source] nix::Error),

    /// The rendezvous socket could not be bound.
    #[error("failed to bind the rendezvous socket at {path:?}")]
    Bind {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    /// The rendezvous socket could not start listening.
    #[error("failed to listen on the rendezvous socket")]
    Listen(#[source] nix::Error),

    /// The socket path could not be published to the session environment.
    #[error("could not publish the socket path to the session")]
    Publish(#[source] HostError),

    /// The daemon process could not be spawned.
    #[error("failed to spawn the wallet daemon {command:?}")]
    Spawn {
        command: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The key bytes could not be delivered over the pipe.
    #[error("failed to deliver the wallet key to the daemon")]
    KeyWrite(#[source] std::io::Error),
}

/// Launch the wallet daemon for `user` and hand it `key`.
///
/// Consumes the key: after this returns the only copy left in this process
/// is wiped, whether or not the launch succeeded. The rendezvous socket path
/// is published as [`SOCKET_ENV_VAR`] before the daemon is spawned.
///
/// The call never blocks on the daemon; a successful return means the key
/// bytes were written, not that the daemon initialized.
pub fn launch_walletd(
    session: &mut dyn HostSession,
    config: &ModuleConfig,
    user: &TargetUser,
    key: WalletKey,
) -> Result<(), LaunchError> {
    // A daemon that dies before reading the key must not take the login
    // stack down with a SIGPIPE. Previous disposition comes back on return.
    let _sigpipe = SigPipeGuard::install()?;

    let (pipe_read, pipe_write) = pipe2(OFlag::O_CLOEXEC).map_err(LaunchError::Pipe)?;

    let socket_path = config.socket_path(&user.name);
    let path_str = socket_path.to_string_lossy();
    session
        .set_env(SOCKET_ENV_VAR, path_str.as_ref())
        .map_err(LaunchError::Publish)?;

    let listener = provision_socket(&socket_path, user)?;
    debug!(
        socket = %socket_path.display(),
        user = %user.name,
        "rendezvous socket listening"
    );

    let mut command = Command::new(&config.kwalletd);
    command
        .arg(PAM_LOGIN_FLAG)
        .arg(KEY_FD.to_string())
        .arg(SOCKET_FD.to_string())
        .env(SOCKET_ENV_VAR, &socket_path);

    let pipe_fd = pipe_read.as_raw_fd();
    let socket_fd = listener.as_raw_fd();
    let uid = user.uid.as_raw();
    let gid = user.gid.as_raw();
    // Safety: the child setup only makes async-signal-safe calls (fcntl,
    // dup2, close, setgid/setuid and friends).
    unsafe {
        command.pre_exec(move || daemon_child_setup(pipe_fd, socket_fd, uid, gid));
    }

    let child = command.spawn().map_err(|source| LaunchError::Spawn {
        command: config.kwalletd.clone(),
        source,
    })?;

    // The child owns its copies now.
    drop(pipe_read);
    drop(listener);

    write_key(pipe_write, &key)?;

    info!(
        pid = child.id(),
        user = %user.name,
        daemon = %config.kwalletd.display(),
        "wallet daemon launched"
    );
    // The daemon outlives the login stack; it is never waited on.
    Ok(())
}

/// Create, bind and start listening on the rendezvous socket.
///
/// A stale socket file from an earlier session is removed first. The bound
/// socket file is handed to the target user so the daemon, which runs under
/// the user's ids, can unlink it on shutdown.
fn provision_socket(path: &Path, user: &TargetUser) -> Result<OwnedFd, LaunchError> {
    let addr = UnixAddr::new(path).map_err(|source| LaunchError::SocketPath {
        path: path.to_owned(),
        source,
    })?;

    let fd = socket(
        AddressFamily::Unix,
        SockType::Stream,
        SockFlag::SOCK_CLOEXEC,
        None,
    )
    .map_err(LaunchError::Socket)?;

    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed stale rendezvous socket"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(
            path = %path.display(),
            error = %err,
            "could not remove stale rendezvous socket"
        ),
    }

    bind(fd.as_raw_fd(), &addr).map_err(|source| LaunchError::Bind {
        path: path.to_owned(),
        source,
    })?;

    let backlog = Backlog::new(SOCKET_BACKLOG).map_err(LaunchError::Listen)?;
    listen(&fd, backlog).map_err(LaunchError::Listen)?;

    if let Err(err) = chown(path, Some(user.uid), Some(user.gid)) {
        warn!(
            path = %path.display(),
            error = %err,
            "could not hand rendezvous socket to user"
        );
    }

    Ok(fd)
}

/// Child-side setup between fork and exec.
///
/// Runs in the forked child, so everything here must be async-signal-safe:
/// raw libc calls only, no allocation, no locking. Any error aborts the
/// child before exec.
fn daemon_child_setup(
    pipe_fd: RawFd,
    socket_fd: RawFd,
    uid: libc::uid_t,
    gid: libc::gid_t,
) -> std::io::Result<()> {
    // Re-seat the two kept descriptors on their fixed slots, via duplicates
    // above TEMP_FD_FLOOR so neither dup2 target can clobber a source.
    let pipe_tmp = unsafe { libc::fcntl(pipe_fd, libc::F_DUPFD, TEMP_FD_FLOOR) };
    if pipe_tmp < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let sock_tmp = unsafe { libc::fcntl(socket_fd, libc::F_DUPFD, TEMP_FD_FLOOR) };
    if sock_tmp < 0 {
        return Err(std::io::Error::last_os_error());
    }
    if unsafe { libc::dup2(pipe_tmp, KEY_FD) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    if unsafe { libc::dup2(sock_tmp, SOCKET_FD) } < 0 {
        return Err(std::io::Error::last_os_error());
    }

    // Everything above the kept slots goes, the temporaries included. The
    // daemon must not inherit stray login-stack descriptors.
    let sweep_from = (SOCKET_FD + 1) as libc::c_uint;
    if unsafe { libc::close_range(sweep_from, libc::c_uint::MAX, 0) } < 0 {
        for fd in (SOCKET_FD + 1)..=FALLBACK_SWEEP_MAX {
            unsafe { libc::close(fd) };
        }
    }

    // Real and effective ids both, group before user; setuid would be
    // irreversible the other way around. The daemon must never run with the
    // login stack's ids, so any failure aborts the child.
    let dropped = unsafe {
        libc::setgid(gid) == 0
            && libc::setuid(uid) == 0
            && libc::setegid(gid) == 0
            && libc::seteuid(uid) == 0
    };
    if !dropped {
        return Err(std::io::Error::last_os_error());
    }

    Ok(())
}

/// Write all key bytes, riding out transient errors, then close the pipe.
///
/// Interrupted and would-block writes are retried; anything else is a real
/// delivery failure. Only successfully written bytes advance the count.
fn write_key(fd: OwnedFd, key: &WalletKey) -> Result<(), LaunchError> {
    use std::io::Write;

    let mut pipe = std::fs::File::from(fd);
    let bytes = key.as_bytes();
    let mut written = 0;
    while written < bytes.len() {
        match pipe.write(&bytes[written..]) {
            Ok(0) => {
                return Err(LaunchError::KeyWrite(std::io::ErrorKind::WriteZero.into()));
            }
            Ok(n) => written += n,
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
                ) =>
            {
                continue
            }
            Err(err) => return Err(LaunchError::KeyWrite(err)),
        }
    }
    Ok(())
}

/// Ignores SIGPIPE on install, restores the previous disposition on drop.
struct SigPipeGuard {
    previous: SigHandler,
}

impl SigPipeGuard {
    fn install() -> Result<Self, LaunchError> {
        // Safety: SIG_IGN carries no handler state into the signal context.
        let previous =
            unsafe { signal(Signal::SIGPIPE, SigHandler::SigIgn) }.map_err(LaunchError::SigPipe)?;
        Ok(Self { previous })
    }
}

impl Drop for SigPipeGuard {
    fn drop(&mut self) {
        // Safety: restoring a disposition observed moments ago.
        let _ = unsafe { signal(Signal::SIGPIPE, self.previous) };
    }
}
