// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! User-supplied templates for Dockerfiles and proxy routes.
//!
//! Templates may reference exactly three variables: `AppName`, `ContainerName`
//! and `Port`. Both the dotted form `{{.Port}}` and the plain form `{{ Port }}`
//! are accepted. Referencing anything else is an error, so a template that
//! renders with [`TemplateVars::placeholder`] renders with any real app.

use std::borrow::Cow;
use std::sync::LazyLock;

use minijinja::{Environment, UndefinedBehavior, context};
use regex::Regex;

/// Matches the dotted variable form `{{ .Name }}`.
static DOTTED_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{(-?)\s*\.([A-Za-z_][A-Za-z0-9_]*)\s*(-?)\}\}").expect("valid regex")
});

/// Errors from parsing or rendering a template.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// The template has a syntax error.
    #[error("invalid {kind} template: {message}")]
    Syntax {
        /// Which template failed (`dockerfile`, `caddy_config`)
        kind: &'static str,
        /// Engine message
        message: String,
    },

    /// The template parsed but failed to render.
    #[error("failed to render {kind} template: {message}")]
    Render {
        /// Which template failed
        kind: &'static str,
        /// Engine message
        message: String,
    },
}

/// The closed substitution context for every template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateVars {
    /// App name, also the proxy path segment
    pub app_name: String,
    /// Container name, `app-<id>`
    pub container_name: String,
    /// Port the app listens on
    pub port: u16,
}

impl TemplateVars {
    /// Variables used to validate templates at submission time.
    pub fn placeholder() -> Self {
        Self {
            app_name: "test".to_string(),
            container_name: "test-container".to_string(),
            port: 8080,
        }
    }
}

/// Render `source` with `vars`.
///
/// `kind` names the template in error messages.
pub fn render(kind: &'static str, source: &str, vars: &TemplateVars) -> Result<String, TemplateError> {
    let source = normalize(source);

    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    env.add_template("tmpl", &source)
        .map_err(|e| TemplateError::Syntax {
            kind,
            message: e.to_string(),
        })?;

    let tmpl = env.get_template("tmpl").map_err(|e| TemplateError::Syntax {
        kind,
        message: e.to_string(),
    })?;

    tmpl.render(context! {
        AppName => vars.app_name,
        ContainerName => vars.container_name,
        Port => vars.port,
    })
    .map_err(|e| TemplateError::Render {
        kind,
        message: e.to_string(),
    })
}

/// Check that `source` renders against the placeholder variables.
pub fn validate(kind: &'static str, source: &str) -> Result<(), TemplateError> {
    render(kind, source, &TemplateVars::placeholder()).map(|_| ())
}

/// Rewrite `{{.Name}}` into `{{ Name }}`, keeping whitespace-control dashes.
fn normalize(source: &str) -> Cow<'_, str> {
    DOTTED_VAR.replace_all(source, "{{$1 $2 $3}}")
}
