//! Confined filesystem resolution for resource routes.
//!
//! A logical path is checked lexically first: `..` segments, NUL bytes and
//! paths outside every permitted root are refused before the filesystem is
//! touched. Survivors are canonicalized and checked again so symlinks cannot
//! lead out of a root.

use std::path::{Component, Path, PathBuf};

use {
    axum::{
        body::Body,
        http::{
            HeaderValue, StatusCode,
            header::{CONTENT_LENGTH, CONTENT_TYPE},
        },
        response::{IntoResponse, Response},
    },
    tokio_util::io::ReaderStream,
    tracing::{debug, warn},
};

use crate::error::{GatewayError, Result};

/// Fallback content type for unknown extensions.
pub const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Clone)]
struct Root {
    lexical: PathBuf,
    canonical: PathBuf,
}

impl Root {
    fn anchor(root: &Path) -> Option<Self> {
        if root.as_os_str().is_empty() {
            warn!("ignoring empty resource root");
            return None;
        }
        let absolute = match std::path::absolute(root) {
            Ok(path) => path,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "ignoring unresolvable resource root");
                return None;
            },
        };
        let lexical = collapse(&absolute);
        let canonical = std::fs::canonicalize(&lexical).unwrap_or_else(|_| lexical.clone());
        Some(Self { lexical, canonical })
    }
}

/// A canonical path known to live inside a permitted root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedResourcePath(PathBuf);

impl ResolvedResourcePath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for ResolvedResourcePath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// Resolves logical paths against an ordered set of roots.
///
/// Relative logical paths are joined onto the first root.
#[derive(Debug, Clone, Default)]
pub struct ResourceResolver {
    roots: Vec<Root>,
}

impl ResourceResolver {
    /// Relative roots are anchored at the working directory. Empty roots are
    /// dropped.
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        let roots = roots.into_iter().filter_map(|root| Root::anchor(&root)).collect();
        Self { roots }
    }

    pub fn roots(&self) -> impl Iterator<Item = &Path> {
        self.roots.iter().map(|r| r.lexical.as_path())
    }

    /// Lexical confinement only; performs no filesystem access.
    pub fn confine(&self, logical: &str) -> Result<PathBuf> {
        if logical.contains('\0') || has_parent_segment(logical) {
            return Err(reject(logical, "traversal segment"));
        }
        let requested = Path::new(logical);
        let candidate = if requested.is_absolute() {
            normalize(requested)
        } else {
            let Some(primary) = self.roots.first() else {
                return Err(reject(logical, "no permitted roots"));
            };
            normalize(&primary.lexical.join(requested))
        };
        if !self.roots.iter().any(|r| candidate.starts_with(&r.lexical)) {
            return Err(reject(logical, "outside permitted roots"));
        }
        Ok(candidate)
    }

    /// Confine, canonicalize and re-check `logical`.
    pub async fn resolve(&self, logical: &str) -> Result<ResolvedResourcePath> {
        let candidate = self.confine(logical)?;
        let canonical = match tokio::fs::canonicalize(&candidate).await {
            Ok(path) => path,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(GatewayError::NotFound(candidate));
            },
            Err(e) => return Err(GatewayError::Io(e)),
        };
        if !self.roots.iter().any(|r| canonical.starts_with(&r.canonical)) {
            return Err(reject(logical, "symlink leaves permitted roots"));
        }
        debug!(path = %canonical.display(), "resolved resource path");
        Ok(ResolvedResourcePath(canonical))
    }
}

fn reject(logical: &str, reason: &str) -> GatewayError {
    warn!(security = true, path = %logical, reason, "rejected resource path");
    GatewayError::PathSecurity(logical.to_string())
}

fn has_parent_segment(logical: &str) -> bool {
    logical.split(['/', '\\']).any(|segment| segment == "..")
}

/// Drop `.` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Like [`normalize`], but also folds `..` into its parent. Only used on
/// configured roots, never on request paths.
fn collapse(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => {
                out.pop();
            },
            other => out.push(other),
        }
    }
    out
}

/// Content type from the extension of `path`.
pub fn content_type_for(path: &str) -> &'static str {
    mime_guess::from_path(path).first_raw().unwrap_or(OCTET_STREAM)
}

/// Stream `resolved` back as the response body.
pub async fn file_response(resolved: &ResolvedResourcePath, content_type: &str) -> Result<Response> {
    let path = resolved.as_path();
    let metadata = tokio::fs::metadata(path).await?;
    if !metadata.is_file() {
        return Err(GatewayError::NotFound(path.to_path_buf()));
    }
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(GatewayError::NotFound(path.to_path_buf()));
        },
        Err(e) => return Err(e.into()),
    };

    let content_type =
        HeaderValue::from_str(content_type).unwrap_or(HeaderValue::from_static(OCTET_STREAM));
    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, content_type),
            (CONTENT_LENGTH, HeaderValue::from(metadata.len())),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(dir: &Path) -> ResourceResolver {
        ResourceResolver::new([dir.to_path_buf()])
    }

    #[test]
    fn traversal_is_rejected_lexically() {
        let resolver = ResourceResolver::new([PathBuf::from("/srv/does-not-exist")]);
        for logical in [
            "../etc/passwd",
            "/srv/does-not-exist/../../etc/passwd",
            "a/../../b",
            "..\\windows",
        ] {
            assert!(
                matches!(resolver.confine(logical), Err(GatewayError::PathSecurity(_))),
                "{logical} should be rejected"
            );
        }
    }

    #[test]
    fn absolute_path_outside_roots_is_rejected() {
        let resolver = ResourceResolver::new([PathBuf::from("/srv/project")]);
        assert!(matches!(
            resolver.confine("/etc/passwd"),
            Err(GatewayError::PathSecurity(_))
        ));
        // Sibling directory sharing a name prefix.
        assert!(matches!(
            resolver.confine("/srv/project-secrets/key"),
            Err(GatewayError::PathSecurity(_))
        ));
    }

    #[test]
    fn relative_paths_join_the_primary_root() {
        let resolver = ResourceResolver::new([
            PathBuf::from("/srv/project"),
            PathBuf::from("/opt/editor"),
        ]);
        assert_eq!(
            resolver.confine("src/./main.rs").unwrap(),
            PathBuf::from("/srv/project/src/main.rs")
        );
        assert_eq!(
            resolver.confine("/opt/editor/out/index.js").unwrap(),
            PathBuf::from("/opt/editor/out/index.js")
        );
    }

    #[test]
    fn dot_root_is_anchored_at_the_working_directory() {
        let cwd = std::env::current_dir().unwrap();
        let resolver = ResourceResolver::new([PathBuf::from(".")]);
        assert_eq!(resolver.roots().collect::<Vec<_>>(), vec![cwd.as_path()]);

        assert!(matches!(
            resolver.confine("/etc/passwd"),
            Err(GatewayError::PathSecurity(_))
        ));
        let inside = cwd.join("Cargo.toml");
        assert_eq!(resolver.confine(inside.to_str().unwrap()).unwrap(), inside);
        assert_eq!(resolver.confine("Cargo.toml").unwrap(), inside);
    }

    #[tokio::test]
    async fn dot_root_does_not_serve_foreign_files() {
        let resolver = ResourceResolver::new([PathBuf::from("./")]);
        let err = resolver.resolve("/etc/passwd").await.unwrap_err();
        assert!(matches!(err, GatewayError::PathSecurity(_)));
        assert!(resolver.resolve("Cargo.toml").await.is_ok());
    }

    #[tokio::test]
    async fn relative_root_accepts_absolute_paths_inside_it() {
        let dir = tempfile::Builder::new()
            .prefix("resource-root")
            .tempdir_in(".")
            .unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        let relative = PathBuf::from(dir.path().file_name().unwrap());
        let cwd = std::env::current_dir().unwrap();
        let absolute = cwd.join(&relative).join("a.txt");

        let resolver = ResourceResolver::new([relative]);
        assert!(resolver.resolve(absolute.to_str().unwrap()).await.is_ok());
        assert!(resolver.resolve("a.txt").await.is_ok());
        assert!(matches!(
            resolver.confine("/etc/passwd"),
            Err(GatewayError::PathSecurity(_))
        ));
        let sibling = cwd.join("Cargo.toml");
        assert!(matches!(
            resolver.confine(sibling.to_str().unwrap()),
            Err(GatewayError::PathSecurity(_))
        ));
    }

    #[test]
    fn root_with_parent_segments_is_collapsed() {
        let resolver = ResourceResolver::new([PathBuf::from("/srv/project/../editor")]);
        assert_eq!(
            resolver.confine("/srv/editor/index.html").unwrap(),
            PathBuf::from("/srv/editor/index.html")
        );
        assert!(resolver.confine("/srv/project/secret").is_err());
    }

    #[test]
    fn empty_root_is_dropped() {
        let resolver = ResourceResolver::new([PathBuf::new()]);
        assert_eq!(resolver.roots().count(), 0);
        assert!(resolver.confine("/etc/passwd").is_err());
    }

    #[test]
    fn no_roots_means_nothing_resolves() {
        let resolver = ResourceResolver::default();
        assert!(resolver.confine("file.txt").is_err());
        assert!(resolver.confine("/file.txt").is_err());
    }

    #[tokio::test]
    async fn resolve_finds_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "# hi").unwrap();
        let resolved = resolver(dir.path()).resolve("notes.md").await.unwrap();
        assert!(resolved.as_path().ends_with("notes.md"));
    }

    #[tokio::test]
    async fn resolve_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolver(dir.path()).resolve("missing.txt").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resolve_refuses_symlink_escape() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret"), "x").unwrap();
        let root = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret"), root.path().join("link")).unwrap();

        let err = resolver(root.path()).resolve("link").await.unwrap_err();
        assert!(matches!(err, GatewayError::PathSecurity(_)));
    }

    #[test]
    fn content_types_come_from_the_extension() {
        assert_eq!(content_type_for("/a/b/style.css"), "text/css");
        assert_eq!(content_type_for("index.html"), "text/html");
        assert_eq!(content_type_for("logo.png"), "image/png");
        assert_eq!(content_type_for("blob.unknownext"), OCTET_STREAM);
        assert_eq!(content_type_for("Makefile"), OCTET_STREAM);
    }

    #[tokio::test]
    async fn file_response_sets_headers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let resolved = resolver(dir.path()).resolve("a.txt").await.unwrap();
        let response = file_response(&resolved, "text/plain").await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(response.headers()[CONTENT_LENGTH], "5");
    }

    #[tokio::test]
    async fn directories_are_not_served() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let resolved = resolver(dir.path()).resolve("sub").await.unwrap();
        let err = file_response(&resolved, OCTET_STREAM).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }
}
