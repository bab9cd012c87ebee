use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::sandbox::EnvMap;

/// Fixed overrides applied to every dev-server launch. They win over caller
/// identifiers on a key collision.
pub const FIXED_OVERRIDES: &[(&str, &str)] = &[
    ("NODE_ENV", "development"),
    ("CI", "false"),
    ("DISABLE_ESLINT_PLUGIN", "true"),
    ("TSC_COMPILE_ON_ERROR", "true"),
    ("ESLINT_NO_DEV_ERRORS", "true"),
    ("GENERATE_SOURCEMAP", "false"),
    ("SWC_DISABLE_MMAP", "1"),
    ("NEXT_TELEMETRY_DISABLED", "1"),
    ("WASM_BINDGEN_FALLBACK", "1"),
    ("CORS_ENABLED", "true"),
    ("CORS_ORIGIN", "*"),
    ("VITE_CORS_PROXY", "true"),
    ("COOP", "same-origin"),
    ("COEP", "require-corp"),
    ("CORP", "cross-origin"),
];

const ENV_FILE_HEADER: &str = "\
# Asset serving
VITE_BASE_URL=/
PUBLIC_URL=/
VITE_ASSET_URL=/
VITE_DEV_SERVER_CORS=true
";

/// Caller-supplied identifiers exposed to the project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentifiers {
    #[serde(default)]
    pub project_token: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl SessionIdentifiers {
    fn token(&self) -> Option<&str> {
        self.project_token.as_deref().filter(|v| !v.is_empty())
    }

    fn project(&self) -> Option<&str> {
        self.project_id.as_deref().filter(|v| !v.is_empty())
    }
}

/// Environment handed to the dev server process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentVariables(BTreeMap<String, String>);

impl EnvironmentVariables {
    pub fn assemble(ids: &SessionIdentifiers) -> Self {
        let mut vars = BTreeMap::new();
        if let Some(token) = ids.token() {
            for key in ["BASEBASE_TOKEN", "VITE_BASEBASE_TOKEN", "NEXT_PUBLIC_BASEBASE_TOKEN"] {
                vars.insert(key.to_string(), token.to_string());
            }
        }
        if let Some(project) = ids.project() {
            for key in ["BASEBASE_PROJECT", "VITE_BASEBASE_PROJECT", "NEXT_PUBLIC_BASEBASE_PROJECT"] {
                vars.insert(key.to_string(), project.to_string());
            }
        }
        for (key, value) in FIXED_OVERRIDES {
            vars.insert((*key).to_string(), (*value).to_string());
        }
        Self(vars)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &EnvMap {
        &self.0
    }
}

/// Render `.env.local`. Values are written verbatim.
pub fn render_env_file(ids: &SessionIdentifiers) -> String {
    let mut out = String::from(ENV_FILE_HEADER);
    if let Some(token) = ids.token() {
        out.push_str("\n# Project credentials\n");
        out.push_str(&format!("BASEBASE_TOKEN={token}\n"));
        out.push_str(&format!("NEXT_PUBLIC_BASEBASE_TOKEN={token}\n"));
    }
    if let Some(project) = ids.project() {
        out.push_str(&format!("BASEBASE_PROJECT={project}\n"));
        out.push_str(&format!("NEXT_PUBLIC_BASEBASE_PROJECT={project}\n"));
    }
    out
}
