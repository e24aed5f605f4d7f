//! kwalletd-stub - wallet daemon stand-in for handoff tests.
//!
//! Speaks the provisioning side of kwalletd's `--pam-login` mode: read the
//! wallet key from one inherited descriptor, serve the session socket on the
//! other. Instead of opening a wallet it records the key beside the
//! rendezvous socket (as `<socket>.key`) so a test can check what arrived,
//! then accepts a single client and exits.
//!
//! Point the module's `kwalletd=` argument at this binary to exercise the
//! full spawn and handoff without a real wallet daemon.

use std::fs::File;
use std::io::Read;
use std::os::fd::{FromRawFd, RawFd};
use std::os::unix::net::UnixListener;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kwallet_pam_core::host::SOCKET_ENV_VAR;
use kwallet_pam_core::secret::KEY_SIZE;
use kwallet_pam_core::wipe::wipe_bytes;

fn setup_logging() {
    // Quiet by default; RUST_LOG overrides when debugging a test run
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    setup_logging();

    let (key_fd, socket_fd) = parse_args()?;
    debug!(key_fd, socket_fd, "starting in pam-login mode");

    let mut key = read_key(key_fd)?;

    if let Some(dump_path) = dump_path() {
        std::fs::write(&dump_path, &key)
            .with_context(|| format!("cannot record the key at {}", dump_path.display()))?;
        info!(path = %dump_path.display(), "received key recorded");
    }
    wipe_bytes(&mut key);

    // Safety: the launcher seats the listening socket on this descriptor
    // before exec and nothing else here owns it.
    let listener = unsafe { UnixListener::from_raw_fd(socket_fd) };
    let (_stream, _addr) = listener
        .accept()
        .context("cannot accept a client on the session socket")?;
    info!("client connected, shutting down");

    Ok(())
}

/// Expect exactly `--pam-login <key-fd> <socket-fd>`, the argv the launcher
/// builds.
fn parse_args() -> Result<(RawFd, RawFd)> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let [mode, key_fd, socket_fd] = args.as_slice() else {
        bail!("usage: kwalletd-stub --pam-login <key-fd> <socket-fd>");
    };
    if mode != "--pam-login" {
        bail!("only the --pam-login mode is supported, got {mode:?}");
    }

    let key_fd: RawFd = key_fd
        .parse()
        .with_context(|| format!("bad key descriptor {key_fd:?}"))?;
    let socket_fd: RawFd = socket_fd
        .parse()
        .with_context(|| format!("bad socket descriptor {socket_fd:?}"))?;
    Ok((key_fd, socket_fd))
}

/// Read the fixed-size wallet key from the inherited pipe end.
fn read_key(key_fd: RawFd) -> Result<[u8; KEY_SIZE]> {
    // Safety: the launcher seats the pipe's read end on this descriptor
    // before exec and nothing else here owns it.
    let mut pipe = unsafe { File::from_raw_fd(key_fd) };

    let mut key = [0u8; KEY_SIZE];
    pipe.read_exact(&mut key)
        .context("cannot read the wallet key from the handoff pipe")?;
    Ok(key)
}

/// Where to record the received key: next to the rendezvous socket, whose
/// path the launcher publishes into our environment.
fn dump_path() -> Option<PathBuf> {
    let socket_path = std::env::var_os(SOCKET_ENV_VAR)?;
    let mut path = socket_path.into_string().ok()?;
    path.push_str(".key");
    Some(PathBuf::from(path))
}
