use crate::error::{NfsError, Result};

/// URL scheme for remote files and exports
pub const NFS_SCHEME: &str = "nfs";

/// URL utilities
pub mod url {
    use super::*;

    /// Server and export directory parsed from an NFS URL
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct NfsUrl {
        /// Server host name or address
        pub server: String,

        /// Port, when given explicitly
        pub port: Option<u16>,

        /// Absolute export path on the server
        pub path: String,

        /// Query arguments in the order they appeared
        pub params: Vec<(String, String)>,
    }

    impl NfsUrl {
        /// Look up a query argument
        pub fn param(&self, key: &str) -> Option<&str> {
            self.params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        }

        /// Server name including the port, as handed to mount
        pub fn server_address(&self) -> String {
            match self.port {
                Some(port) => format!("{}:{}", self.server, port),
                None => self.server.clone(),
            }
        }
    }

    /// Parse `nfs://server/export[?k=v]` or `server:/export` into an [`NfsUrl`]
    /// whose path names a directory
    pub fn parse_url_dir(input: &str) -> Result<NfsUrl> {
        let input = input.trim();
        if input.is_empty() {
            return Err(NfsError::InvalidUrl("URL cannot be empty".to_string()));
        }

        if input.contains("://") {
            parse_scheme_url(input)
        } else {
            parse_server_export(input)
        }
    }

    fn parse_scheme_url(input: &str) -> Result<NfsUrl> {
        let parsed = ::url::Url::parse(input)
            .map_err(|e| NfsError::InvalidUrl(format!("{}: {}", input, e)))?;

        if parsed.scheme() != NFS_SCHEME {
            return Err(NfsError::InvalidUrl(format!(
                "Unsupported scheme '{}' in {}",
                parsed.scheme(),
                input
            )));
        }

        let server = parsed
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| NfsError::InvalidUrl(format!("No server in {}", input)))?
            .to_string();

        let path = normalize_dir(parsed.path());
        let params = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        Ok(NfsUrl {
            server,
            port: parsed.port(),
            path,
            params,
        })
    }

    fn parse_server_export(input: &str) -> Result<NfsUrl> {
        let (server, export) = input.split_once(':').ok_or_else(|| {
            NfsError::InvalidUrl(format!("Expected server:/export, got {}", input))
        })?;

        if server.is_empty() {
            return Err(NfsError::InvalidUrl(format!("No server in {}", input)));
        }
        if !export.starts_with('/') {
            return Err(NfsError::InvalidUrl(format!(
                "Export must be an absolute path in {}",
                input
            )));
        }

        Ok(NfsUrl {
            server: server.to_string(),
            port: None,
            path: normalize_dir(export),
            params: Vec::new(),
        })
    }

    fn normalize_dir(path: &str) -> String {
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            "/".to_string()
        } else {
            trimmed.to_string()
        }
    }

    /// Split `host:port` as produced by [`NfsUrl::server_address`].
    ///
    /// A suffix that is not a valid port leaves the whole input as the host.
    pub fn split_server_port(address: &str) -> (&str, Option<u16>) {
        match address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && !host.ends_with(':') => {
                match port.parse::<u16>() {
                    Ok(port) => (host, Some(port)),
                    Err(_) => (address, None),
                }
            }
            _ => (address, None),
        }
    }

    /// Check if a string is a scheme-qualified NFS URL
    pub fn is_nfs_url(input: &str) -> bool {
        input.starts_with("nfs://")
    }

    /// Split a file URL into its directory URL and a `/name` relative path.
    ///
    /// Query arguments stay with the directory part.
    pub fn split_file_url(input: &str) -> Result<(String, String)> {
        if !is_nfs_url(input) {
            return Err(NfsError::InvalidUrl(format!("Not an nfs:// URL: {}", input)));
        }

        let (location, query) = match input.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (input, None),
        };

        let pos = location.rfind('/').unwrap_or(0);
        if pos < "nfs://".len() {
            return Err(NfsError::InvalidUrl(format!("No file path in {}", input)));
        }

        let name = &location[pos..];
        if name.len() < 2 {
            return Err(NfsError::InvalidUrl(format!("No file name in {}", input)));
        }

        let dir = match query {
            Some(query) => format!("{}?{}", &location[..pos], query),
            None => location[..pos].to_string(),
        };

        Ok((dir, name.to_string()))
    }
}

/// Path utilities
pub mod path {
    /// Join a directory and an entry name
    pub fn join(dir: &str, name: &str) -> String {
        let name = name.trim_start_matches('/');
        if dir.is_empty() || dir == "/" {
            format!("/{}", name)
        } else {
            format!("{}/{}", dir.trim_end_matches('/'), name)
        }
    }

    /// Make a path absolute, dropping empty and `.` components and
    /// resolving `..` lexically. `..` never climbs above the root.
    pub fn normalize(path: &str) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for part in path.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                other => parts.push(other),
            }
        }
        format!("/{}", parts.join("/"))
    }

    /// Split an absolute path into parent directory and final component
    pub fn split_parent(path: &str) -> (String, String) {
        let normalized = normalize(path);
        match normalized.rfind('/') {
            Some(0) => ("/".to_string(), normalized[1..].to_string()),
            Some(pos) => (normalized[..pos].to_string(), normalized[pos + 1..].to_string()),
            None => ("/".to_string(), normalized),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::url::*;
    use super::*;

    #[test]
    fn test_parse_nfs_url() {
        let url = parse_url_dir("nfs://filer.example.com/exports/data/").unwrap();
        assert_eq!(url.server, "filer.example.com");
        assert_eq!(url.path, "/exports/data");
        assert_eq!(url.port, None);
        assert!(url.params.is_empty());
    }

    #[test]
    fn test_parse_nfs_url_with_port_and_args() {
        let url = parse_url_dir("nfs://10.0.0.1:2049/export?version=4&uid=1000").unwrap();
        assert_eq!(url.server, "10.0.0.1");
        assert_eq!(url.port, Some(2049));
        assert_eq!(url.server_address(), "10.0.0.1:2049");
        assert_eq!(url.param("version"), Some("4"));
        assert_eq!(url.param("uid"), Some("1000"));
        assert_eq!(url.param("gid"), None);
    }

    #[test]
    fn test_split_server_port() {
        assert_eq!(split_server_port("filer"), ("filer", None));
        assert_eq!(split_server_port("filer:2049"), ("filer", Some(2049)));
        assert_eq!(split_server_port("10.0.0.1:111"), ("10.0.0.1", Some(111)));
        assert_eq!(split_server_port("filer:nfs"), ("filer:nfs", None));
        assert_eq!(split_server_port("::1"), ("::1", None));

        let url = parse_url_dir("nfs://filer:2049/export").unwrap();
        assert_eq!(split_server_port(&url.server_address()), ("filer", Some(2049)));
    }

    #[test]
    fn test_parse_server_export() {
        let url = parse_url_dir("filer:/srv/share").unwrap();
        assert_eq!(url.server, "filer");
        assert_eq!(url.path, "/srv/share");

        let root = parse_url_dir("filer:/").unwrap();
        assert_eq!(root.path, "/");
    }

    #[test]
    fn test_parse_rejects_bad_urls() {
        assert!(parse_url_dir("").is_err());
        assert!(parse_url_dir("http://host/export").is_err());
        assert!(parse_url_dir("filer:relative").is_err());
        assert!(parse_url_dir(":/export").is_err());
        assert!(parse_url_dir("just-a-host").is_err());
    }

    #[test]
    fn test_split_file_url() {
        let (dir, name) = split_file_url("nfs://filer/export/dir/file.txt").unwrap();
        assert_eq!(dir, "nfs://filer/export/dir");
        assert_eq!(name, "/file.txt");

        let (dir, name) = split_file_url("nfs://filer/export/file.txt?uid=0").unwrap();
        assert_eq!(dir, "nfs://filer/export?uid=0");
        assert_eq!(name, "/file.txt");

        assert!(split_file_url("filer:/export/file").is_err());
        assert!(split_file_url("nfs://filer/export/").is_err());
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(path::join("/", "a"), "/a");
        assert_eq!(path::join("/a/", "/b"), "/a/b");
        assert_eq!(path::normalize("a//b/./c/"), "/a/b/c");
        assert_eq!(path::normalize(""), "/");
        assert_eq!(path::normalize("/a/b/../c"), "/a/c");
        assert_eq!(path::normalize("/../../x"), "/x");
        assert_eq!(path::split_parent("/a/./b/../c"), ("/a".to_string(), "c".to_string()));
        assert_eq!(path::split_parent("/a/b"), ("/a".to_string(), "b".to_string()));
        assert_eq!(path::split_parent("/a"), ("/".to_string(), "a".to_string()));
    }
}
