use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, ServiceError},
    AppState,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Scanner,
    Viewer,
}

/// What an endpoint demands of its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Any authenticated caller.
    Any,
    Role(Role),
}

/// An authenticated caller and the roles its token grants.
#[derive(Debug, Clone)]
pub struct Caller {
    roles: Arc<[Role]>,
}

impl Caller {
    pub fn new(roles: impl Into<Arc<[Role]>>) -> Self {
        Self { roles: roles.into() }
    }

    pub fn allows(&self, access: Access) -> bool {
        match access {
            Access::Any => true,
            Access::Role(role) => self.roles.contains(&role),
        }
    }

    pub fn require(&self, access: Access) -> Result<()> {
        if self.allows(access) {
            Ok(())
        } else {
            Err(ServiceError::Forbidden)
        }
    }
}

/// Static bearer tokens from configuration.
#[derive(Clone, Default)]
pub struct TokenStore {
    inner: Arc<HashMap<String, Caller>>,
}

impl TokenStore {
    pub fn from_config(tokens: &HashMap<String, Vec<Role>>) -> Self {
        let inner = tokens
            .iter()
            .map(|(token, roles)| (token.clone(), Caller::new(roles.as_slice())))
            .collect();
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn get(&self, token: &str) -> Option<Caller> {
        self.inner.get(token).cloned()
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Caller> {
        bearer(headers)
            .and_then(|token| self.get(token))
            .ok_or(ServiceError::Unauthorized)
    }
}

/// Resolves the bearer token and stores the [`Caller`] in request extensions.
pub async fn auth_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    match state.tokens.authenticate(req.headers()) {
        Ok(caller) => {
            req.extensions_mut().insert(caller);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
}
