use super::manifest::Manifest;
use super::templates;

/// Closed set of project shapes, selected once per session from the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectShape {
    NextJs,
    Vite,
    /// A manifest without either known toolchain.
    Generic,
    /// No readable manifest.
    Unknown,
}

impl ProjectShape {
    pub fn detect(manifest: Option<&Manifest>) -> Self {
        match manifest {
            None => ProjectShape::Unknown,
            Some(m) if m.depends_on("next") => ProjectShape::NextJs,
            Some(m) if m.depends_on("vite") => ProjectShape::Vite,
            Some(_) => ProjectShape::Generic,
        }
    }

    /// Framework-specific files injected for this shape, as `(path, contents)`.
    /// Existing files with these names are never overwritten.
    pub fn framework_files(self) -> &'static [(&'static str, &'static str)] {
        match self {
            ProjectShape::NextJs => &[
                ("next.config.js", templates::NEXT_CONFIG),
                ("middleware.ts", templates::NEXT_MIDDLEWARE),
            ],
            ProjectShape::Vite | ProjectShape::Generic | ProjectShape::Unknown => &[],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProjectShape::NextJs => "next.js",
            ProjectShape::Vite => "vite",
            ProjectShape::Generic => "generic",
            ProjectShape::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ProjectShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(json: &str) -> Manifest {
        Manifest::parse(json).unwrap()
    }

    #[test]
    fn test_next_wins_over_vite() {
        let m = manifest(r#"{"dependencies":{"next":"14"},"devDependencies":{"vite":"5"}}"#);
        assert_eq!(ProjectShape::detect(Some(&m)), ProjectShape::NextJs);
    }

    #[test]
    fn test_vite_dev_dependency() {
        let m = manifest(r#"{"devDependencies":{"vite":"5"}}"#);
        assert_eq!(ProjectShape::detect(Some(&m)), ProjectShape::Vite);
    }

    #[test]
    fn test_generic_and_unknown() {
        let m = manifest(r#"{"dependencies":{"express":"4"}}"#);
        assert_eq!(ProjectShape::detect(Some(&m)), ProjectShape::Generic);
        assert_eq!(ProjectShape::detect(None), ProjectShape::Unknown);
    }

    #[test]
    fn test_only_next_injects_framework_files() {
        let names: Vec<&str> = ProjectShape::NextJs
            .framework_files()
            .iter()
            .map(|(name, _)| *name)
            .collect();
        assert_eq!(names, vec!["next.config.js", "middleware.ts"]);
        assert!(ProjectShape::Vite.framework_files().is_empty());
        assert!(ProjectShape::Generic.framework_files().is_empty());
    }
}
