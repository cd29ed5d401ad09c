//! Tool registry: name → async handler plus declared metadata.
//!
//! Handlers receive the call's `kwargs` object and return a JSON result.
//! Whether a handler wants the caller's session id is a declared capability
//! ([`ToolRegistration::with_session_id`]) rather than something inspected at
//! call time; when set, the dispatcher injects the id into kwargs under
//! `server_session_id` before invocation.

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::types::{ParamDescription, ParamSpec, ToolDescription};
use crate::{Error, DESCRIBE_TOOLS};

/// Boxed async tool handler.
pub type ToolHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, Error>> + Send + Sync>;

/// One registered tool: handler plus the metadata `describe_tools` reports.
#[derive(Clone)]
pub struct ToolRegistration {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    pub returns: Option<String>,
    /// When set, the caller's session id is injected into kwargs as
    /// `server_session_id` before the handler runs.
    pub needs_session: bool,
    pub handler: ToolHandler,
}

impl std::fmt::Debug for ToolRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistration")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("params", &self.params)
            .field("needs_session", &self.needs_session)
            .finish_non_exhaustive()
    }
}

impl ToolRegistration {
    /// Creates a registration for `name` backed by an async handler.
    pub fn new<F, Fut>(name: &str, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, Error>> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            description: String::new(),
            params: Vec::new(),
            returns: None,
            needs_session: false,
            handler: Arc::new(move |kwargs| Box::pin(handler(kwargs))),
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    /// Return-type hint shown in `describe_tools` output.
    pub fn returns(mut self, hint: &str) -> Self {
        self.returns = Some(hint.to_string());
        self
    }

    /// Declares that this handler wants the caller's session id.
    pub fn with_session_id(mut self) -> Self {
        self.needs_session = true;
        self
    }

    fn describe(&self) -> ToolDescription {
        let parameters = self
            .params
            .iter()
            .map(|spec| {
                (
                    spec.name.clone(),
                    ParamDescription {
                        type_name: spec.type_name.clone(),
                        required: spec.required,
                        default: spec.default.clone(),
                    },
                )
            })
            .collect();
        ToolDescription {
            description: self.description.clone(),
            parameters,
            returns: self.returns.clone(),
        }
    }
}

/// Registry of tools available on one server.
///
/// `describe_tools` is built in: it always appears in [`names`](Self::names)
/// and cannot be registered over.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<ToolRegistration>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool. Re-registering an existing name logs a warning and
    /// overwrites (last registration wins).
    pub fn register(&self, registration: ToolRegistration) {
        if registration.name == DESCRIBE_TOOLS {
            tracing::warn!(
                "Tool '{DESCRIBE_TOOLS}' is built in and cannot be overridden; registration ignored"
            );
            return;
        }
        let name = registration.name.clone();
        let mut tools = self.tools.write().unwrap_or_else(|e| e.into_inner());
        if tools.contains_key(&name) {
            tracing::warn!(%name, "Tool is being overwritten");
        } else {
            tracing::info!(%name, "Registering tool");
        }
        tools.insert(name, Arc::new(registration));
    }

    pub fn get(&self, name: &str) -> Option<Arc<ToolRegistration>> {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Every registered tool name, plus the built-in `describe_tools`, sorted.
    pub fn names(&self) -> Vec<String> {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = tools.keys().cloned().collect();
        names.push(DESCRIBE_TOOLS.to_string());
        names.sort();
        names
    }

    /// Builds the `describe_tools` result: every registered tool's metadata,
    /// excluding `describe_tools` itself.
    pub fn describe(&self) -> HashMap<String, ToolDescription> {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        tools
            .iter()
            .map(|(name, registration)| (name.clone(), registration.describe()))
            .collect()
    }
}
