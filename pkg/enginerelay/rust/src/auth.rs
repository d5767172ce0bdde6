// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Request gate: bearer extraction, single-tenant admission and token checks.

use crate::error::EngineError;
use crate::http::AppState;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use log::warn;
use std::collections::HashSet;

pub const ERROR_MISSING_OR_INVALID_HEADER: &str = "Missing or invalid Authorization header";
pub const ERROR_SERVER_IS_BUSY: &str = "Server is busy";
pub const ERROR_INVALID_TOKEN: &str = "Invalid token";

/// Decides whether a bearer token is genuine. Issuing tokens is someone
/// else's job.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> bool;
}

/// Fixed allow-list. An empty list accepts any non-empty token.
#[derive(Debug, Default, Clone)]
pub struct StaticTokens {
    tokens: HashSet<String>,
}

impl StaticTokens {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }
}

impl TokenVerifier for StaticTokens {
    fn verify(&self, token: &str) -> bool {
        !token.is_empty() && (self.tokens.is_empty() || self.tokens.contains(token))
    }
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Middleware in front of every gated route.
pub async fn require_lease(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(token) = bearer_token(request.headers()) else {
        warn!("[auth] {ERROR_MISSING_OR_INVALID_HEADER}");
        return (StatusCode::UNAUTHORIZED, ERROR_MISSING_OR_INVALID_HEADER).into_response();
    };

    if !state.lease.check_admission(token) {
        return (StatusCode::SERVICE_UNAVAILABLE, ERROR_SERVER_IS_BUSY).into_response();
    }

    if !state.verifier.verify(token) {
        warn!("[auth] {ERROR_INVALID_TOKEN}");
        return (StatusCode::UNAUTHORIZED, ERROR_INVALID_TOKEN).into_response();
    }

    // Another caller may have taken the lease since the first check.
    if let Err(EngineError::AdmissionDenied) = state.lease.admit(token) {
        return (StatusCode::SERVICE_UNAVAILABLE, ERROR_SERVER_IS_BUSY).into_response();
    }

    next.run(request).await
}
