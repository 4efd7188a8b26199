//! Translation of an HTTP request into CGI/1.1 meta-variables

use crate::fastcgi::Params;
use crate::filesystem::join;
use crate::server::RequestHead;

use std::os::unix::ffi::OsStrExt;
use std::path::Path;

const SERVER_SOFTWARE: &str = concat!(env!("CARGO_PKG_NAME"), "/",
                                      env!("CARGO_PKG_VERSION"));

/// Host reported to the application when the request names none
const FALLBACK_HOST: &[u8] = b"127.0.0.1";

const DIRECTORY_INDEX: &[u8] = b"index.php";

/// Builds the parameters for one request against `document_root`
pub fn build(document_root: &Path, head: &RequestHead) -> Params {
    let document_root = document_root.as_os_str().as_bytes();
    let host = head.host().unwrap_or(b"");
    let mut env = Params::new();

    env.insert("CONTENT_TYPE", head.headers.get("Content-Type").unwrap_or(b""));
    env.insert("CONTENT_LENGTH",
               head.headers.get("Content-Length").unwrap_or(b""));
    env.insert("GATEWAY_INTERFACE", "CGI/1.1");

    if let Some((addr, port)) = split_host_port(head.remote_addr.as_bytes()) {
        env.insert("REMOTE_ADDR", addr);
        env.insert("REMOTE_PORT", port);
    }

    let (server_name, server_port) = match split_host_port(host) {
        Some((name, port)) => (name, port),
        None => {
            let default_port: &[u8] = if head.secure { b"443" } else { b"80" };
            (strip_brackets(host), default_port)
        }
    };
    env.insert("SERVER_PORT", server_port);
    env.insert("SERVER_NAME", server_name);
    env.insert("SERVER_PROTOCOL", head.protocol());
    env.insert("SERVER_SOFTWARE", SERVER_SOFTWARE);
    env.insert("REDIRECT_STATUS", "200");
    env.insert("REQUEST_SCHEME", head.scheme.as_str());
    env.insert("REQUEST_METHOD", head.method.as_str());
    env.insert("REQUEST_URI", head.target.as_str());
    env.insert("QUERY_STRING", head.query());
    env.insert("HTTP_HOST", if host.is_empty() { FALLBACK_HOST } else { host });

    let (script_name, path_info) = split_script(&head.path)
        .unwrap_or((&head.path[..], &b""[..]));

    env.insert("PATH_INFO", path_info);
    env.insert("PATH_TRANSLATED", join(document_root, path_info));
    env.insert("SCRIPT_NAME", script_name);
    env.insert("DOCUMENT_URI", head.path.as_slice());
    env.insert("DOCUMENT_ROOT", document_root);

    let script_path = if head.path.ends_with(b"/") {
        join(&head.path, DIRECTORY_INDEX)
    } else {
        head.path.clone()
    };
    env.insert("SCRIPT_FILENAME", join(document_root, &script_path));

    for (name, value) in head.headers.iter() {
        if name.eq_ignore_ascii_case("Host") {
            continue;
        }

        let key = name.to_ascii_uppercase().replace('-', "_");
        if key == "CONTENT_TYPE" || key == "CONTENT_LENGTH" {
            continue;
        }

        env.insert(format!("HTTP_{}", key), value.as_slice());
    }

    env
}

/// Splits a path after the last `.php` that has something on both sides
///
/// Paths containing a newline never split.
fn split_script(path: &[u8]) -> Option<(&[u8], &[u8])> {
    const SUFFIX: &[u8] = b".php";

    if path.contains(&b'\n') || path.len() < SUFFIX.len() + 2 {
        return None;
    }

    (1 ..= path.len() - SUFFIX.len() - 1).rev()
        .find(|&i| &path[i .. i + SUFFIX.len()] == SUFFIX)
        .map(|i| path.split_at(i + SUFFIX.len()))
}

/// Splits `host:port`, `[v6]:port` or `[v6%zone]:port`
///
/// Returns `None` when there is no port, or when an unbracketed host has more
/// than one colon.
fn split_host_port(hostport: &[u8]) -> Option<(&[u8], &[u8])> {
    let colon = hostport.iter().rposition(|&b| b == b':')?;
    let (host, port) = (&hostport[.. colon], &hostport[colon + 1 ..]);

    if host.first() == Some(&b'[') {
        if host.last() != Some(&b']') {
            return None;
        }
        let inner = &host[1 .. host.len() - 1];
        if inner.contains(&b'[') || inner.contains(&b']') {
            return None;
        }
        return Some((inner, port));
    }

    if host.contains(&b':') || host.contains(&b'[') || host.contains(&b']') {
        return None;
    }

    Some((host, port))
}

fn strip_brackets(host: &[u8]) -> &[u8] {
    match (host.first(), host.last()) {
        (Some(&b'['), Some(&b']')) if host.len() >= 2 => &host[1 .. host.len() - 1],
        _ => host
    }
}
