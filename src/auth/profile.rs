// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity normalization.
//!
//! User identity reaches the bridge in three shapes: verified JWT claims, the
//! user object returned by the provider's token endpoint, and the identity
//! block a host page attaches to `AUTH_COMPLETE`. Each shape is its own
//! variant with its own mapping into [`UserProfile`]; callers pick the
//! variant from where the data came from instead of probing fields.

use serde::{Deserialize, Serialize};

use super::claims::IdpClaims;
use crate::models::UserProfile;

/// User object returned by the OAuth token endpoint.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenEndpointUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default, alias = "locationId")]
    pub company_id: Option<String>,
}

/// Identity block exchanged with the embedding host page.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostIdentity {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, alias = "userName", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
}

impl From<&UserProfile> for HostIdentity {
    fn from(profile: &UserProfile) -> Self {
        Self {
            user_id: profile.user_id.clone(),
            email: profile.email.clone(),
            name: profile.display_name.clone(),
            location_id: profile.tenant_id.clone(),
        }
    }
}

/// Every identity shape the bridge accepts.
#[derive(Debug, Clone)]
pub enum ProfileSource {
    Claims(IdpClaims),
    TokenEndpoint(TokenEndpointUser),
    Host(HostIdentity),
}

impl ProfileSource {
    pub fn normalize(self) -> UserProfile {
        match self {
            ProfileSource::Claims(claims) => UserProfile {
                user_id: claims.sub,
                email: non_blank(claims.email),
                display_name: non_blank(claims.name),
                tenant_id: non_blank(claims.tenant),
            },
            ProfileSource::TokenEndpoint(user) => {
                let display_name = match (non_blank(user.first_name), non_blank(user.last_name)) {
                    (Some(first), Some(last)) => Some(format!("{first} {last}")),
                    (first, last) => first.or(last),
                };
                UserProfile {
                    user_id: user.id,
                    email: non_blank(user.email),
                    display_name,
                    tenant_id: non_blank(user.company_id),
                }
            }
            ProfileSource::Host(host) => UserProfile {
                user_id: host.user_id,
                email: non_blank(host.email),
                display_name: non_blank(host.name),
                tenant_id: non_blank(host.location_id),
            },
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
