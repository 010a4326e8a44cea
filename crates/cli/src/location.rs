//! Endpoint location parsing.
//!
//! Accepted forms, tried in order:
//!
//! - `-` — the pipe endpoint (destination only).
//! - `file://dir` — a directory of raw stream dumps.
//! - `ssh://[user@]host[:port]/path` — explicit SSH URL; the path keeps
//!   its leading slash.
//! - `user@host:path` / `host:path` — scp-style remote, recognised by a
//!   colon before any slash.
//! - anything else — a local path.

use thiserror::Error;

/// A parsed endpoint location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Location {
    /// A local btrfs path.
    Local {
        /// The mount or subvolume path.
        path: String,
    },
    /// A btrfs path on a remote host.
    Ssh {
        /// Login user, when given.
        user: Option<String>,
        /// Remote host name or address.
        host: String,
        /// Remote port, when given.
        port: Option<u16>,
        /// Path on the remote host.
        path: String,
    },
    /// A local directory of raw send-stream dumps.
    Dump {
        /// The dump directory.
        path: String,
    },
    /// This process's stdout.
    Pipe,
}

/// Errors from location parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocationError {
    /// The SSH host component was empty.
    #[error("ssh location `{0}` has an empty host")]
    EmptyHost(String),

    /// The user component was present but empty.
    #[error("ssh location `{0}` has an empty user")]
    EmptyUser(String),

    /// The port component was present but not a valid port number.
    #[error("ssh location `{0}` has an invalid port")]
    InvalidPort(String),
}

/// Parses one endpoint location string.
///
/// # Errors
///
/// Returns a [`LocationError`] for malformed SSH locations; anything
/// that is not recognisably remote falls back to a local path and cannot
/// fail.
///
/// # Examples
///
/// ```
/// use cowsync_cli::{parse_location, Location};
///
/// assert_eq!(
///     parse_location("backup@nas:/pool/snaps").unwrap(),
///     Location::Ssh {
///         user: Some("backup".into()),
///         host: "nas".into(),
///         port: None,
///         path: "/pool/snaps".into(),
///     }
/// );
/// assert_eq!(
///     parse_location("./snapshots").unwrap(),
///     Location::Local { path: "./snapshots".into() }
/// );
/// ```
pub fn parse_location(input: &str) -> Result<Location, LocationError> {
    if input == "-" {
        return Ok(Location::Pipe);
    }
    if let Some(path) = input.strip_prefix("file://") {
        return Ok(Location::Dump {
            path: path.to_owned(),
        });
    }
    if let Some(rest) = input.strip_prefix("ssh://") {
        return parse_ssh_url(input, rest);
    }
    if let Some((head, path)) = split_scp_style(input) {
        let (user, host) = split_user(head);
        if host.is_empty() {
            return Err(LocationError::EmptyHost(input.to_owned()));
        }
        if let Some(user) = &user {
            if user.is_empty() {
                return Err(LocationError::EmptyUser(input.to_owned()));
            }
        }
        return Ok(Location::Ssh {
            user,
            host: host.to_owned(),
            port: None,
            path: path.to_owned(),
        });
    }
    Ok(Location::Local {
        path: input.to_owned(),
    })
}

/// `user@host:path` detection: a colon before any slash marks a remote.
fn split_scp_style(input: &str) -> Option<(&str, &str)> {
    let colon = input.find(':')?;
    match input.find('/') {
        Some(slash) if slash < colon => None,
        _ => Some((&input[..colon], &input[colon + 1..])),
    }
}

fn split_user(head: &str) -> (Option<String>, &str) {
    match head.split_once('@') {
        Some((user, host)) => (Some(user.to_owned()), host),
        None => (None, head),
    }
}

fn parse_ssh_url(input: &str, rest: &str) -> Result<Location, LocationError> {
    let (netloc, path) = match rest.find('/') {
        Some(slash) => (&rest[..slash], &rest[slash..]),
        None => (rest, ""),
    };
    let (user, hostport) = split_user(netloc);
    if let Some(user) = &user {
        if user.is_empty() {
            return Err(LocationError::EmptyUser(input.to_owned()));
        }
    }
    let (host, port) = match hostport.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| LocationError::InvalidPort(input.to_owned()))?;
            (host, Some(port))
        }
        None => (hostport, None),
    };
    if host.is_empty() {
        return Err(LocationError::EmptyHost(input.to_owned()));
    }
    Ok(Location::Ssh {
        user,
        host: host.to_owned(),
        port,
        path: path.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_paths_are_local() {
        assert_eq!(
            parse_location("/mnt/pool").unwrap(),
            Location::Local {
                path: "/mnt/pool".into()
            }
        );
        assert_eq!(
            parse_location("relative/dir").unwrap(),
            Location::Local {
                path: "relative/dir".into()
            }
        );
    }

    #[test]
    fn a_colon_after_a_slash_stays_local() {
        assert_eq!(
            parse_location("/mnt/odd:name").unwrap(),
            Location::Local {
                path: "/mnt/odd:name".into()
            }
        );
    }

    #[test]
    fn scp_style_remotes_parse_user_and_host() {
        assert_eq!(
            parse_location("nas:/pool").unwrap(),
            Location::Ssh {
                user: None,
                host: "nas".into(),
                port: None,
                path: "/pool".into(),
            }
        );
        assert_eq!(
            parse_location("backup@nas:pool/snaps").unwrap(),
            Location::Ssh {
                user: Some("backup".into()),
                host: "nas".into(),
                port: None,
                path: "pool/snaps".into(),
            }
        );
    }

    #[test]
    fn ssh_urls_carry_ports() {
        assert_eq!(
            parse_location("ssh://backup@nas:2222/pool/snaps").unwrap(),
            Location::Ssh {
                user: Some("backup".into()),
                host: "nas".into(),
                port: Some(2222),
                path: "/pool/snaps".into(),
            }
        );
        assert_eq!(
            parse_location("ssh://nas/pool").unwrap(),
            Location::Ssh {
                user: None,
                host: "nas".into(),
                port: None,
                path: "/pool".into(),
            }
        );
    }

    #[test]
    fn file_urls_are_dump_directories() {
        assert_eq!(
            parse_location("file:///var/dumps").unwrap(),
            Location::Dump {
                path: "/var/dumps".into()
            }
        );
    }

    #[test]
    fn dash_is_the_pipe() {
        assert_eq!(parse_location("-").unwrap(), Location::Pipe);
    }

    #[test]
    fn malformed_ssh_locations_are_rejected() {
        assert_eq!(
            parse_location("ssh://user@:22/p"),
            Err(LocationError::EmptyHost("ssh://user@:22/p".into()))
        );
        assert_eq!(
            parse_location("ssh://nas:notaport/p"),
            Err(LocationError::InvalidPort("ssh://nas:notaport/p".into()))
        );
        assert_eq!(
            parse_location("@nas:/pool"),
            Err(LocationError::EmptyUser("@nas:/pool".into()))
        );
    }
}
