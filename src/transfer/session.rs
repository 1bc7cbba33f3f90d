use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::PublishError;
use crate::transfer::publish::PublishTarget;

/// Public-key fallback: the usual key files under `~/.ssh`.
fn try_key_authentication(sess: &mut ssh2::Session, username: &str) -> bool {
    if sess.authenticated() {
        return true;
    }
    if let Some(home_p) = dirs::home_dir() {
        for name in ["id_ed25519", "id_rsa", "id_ecdsa"] {
            let p = home_p.join(".ssh").join(name);
            if p.exists() {
                let _ = sess.userauth_pubkey_file(username, None, &p, None);
                if sess.authenticated() {
                    tracing::debug!("authenticated with {}", p.display());
                    return true;
                }
            }
        }
    }
    false
}

fn create_tcp_connection(addr: &str, io_timeout: Duration) -> anyhow::Result<TcpStream> {
    let mut addrs = addr.to_socket_addrs()?;
    let sock = addrs.next().ok_or_else(|| PublishError::NoAddress(addr.to_string()))?;
    let tcp = TcpStream::connect_timeout(&sock, Duration::from_secs(10))?;
    let _ = tcp.set_read_timeout(Some(io_timeout));
    let _ = tcp.set_write_timeout(Some(io_timeout));
    Ok(tcp)
}

/// Open an authenticated session to the storage account: password first
/// when a credential is configured, key files otherwise or as fallback.
pub fn connect_session(target: &PublishTarget, io_timeout: Duration) -> anyhow::Result<ssh2::Session> {
    let addr = target.addr();
    let tcp = create_tcp_connection(&addr, io_timeout)?;
    let mut sess = ssh2::Session::new().map_err(|_| PublishError::Handshake(addr.clone()))?;
    sess.set_tcp_stream(tcp);
    sess.set_timeout(io_timeout.as_millis().min(u32::MAX as u128) as u32);
    sess.handshake().map_err(|_| PublishError::Handshake(addr.clone()))?;

    if let Some(password) = target.credential.as_deref()
        && let Err(e) = sess.userauth_password(&target.user, password)
    {
        tracing::debug!("password authentication for {} failed: {}", target.user, e);
    }
    if try_key_authentication(&mut sess, &target.user) {
        tracing::info!("connected to {} as {}", addr, target.user);
        Ok(sess)
    } else {
        Err(PublishError::Auth { user: target.user.clone(), addr }.into())
    }
}
