use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::UserId;
use crate::errors::AccessError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Buyer,
    Seller,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buyer => "buyer",
            Self::Seller => "seller",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "buyer" => Ok(Self::Buyer),
            "seller" => Ok(Self::Seller),
            other => Err(format!("unsupported role `{other}` (expected buyer|seller)")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub role: Role,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Caller context handed to every workflow operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub principal: Option<Principal>,
    pub correlation_id: String,
    pub client: ClientInfo,
}

impl Session {
    pub fn anonymous() -> Self {
        Self {
            principal: None,
            correlation_id: new_correlation_id(),
            client: ClientInfo::default(),
        }
    }

    pub fn buyer(user_id: impl Into<String>) -> Self {
        Self::authenticated(Principal { user_id: UserId(user_id.into()), role: Role::Buyer })
    }

    pub fn seller(user_id: impl Into<String>) -> Self {
        Self::authenticated(Principal { user_id: UserId(user_id.into()), role: Role::Seller })
    }

    pub fn authenticated(principal: Principal) -> Self {
        Self {
            principal: Some(principal),
            correlation_id: new_correlation_id(),
            client: ClientInfo::default(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_client(mut self, client: ClientInfo) -> Self {
        self.client = client;
        self
    }

    pub fn actor(&self) -> String {
        match &self.principal {
            Some(principal) => format!("{}:{}", principal.role.as_str(), principal.user_id),
            None => "anonymous".to_string(),
        }
    }

    pub fn require_buyer(&self) -> Result<&UserId, AccessError> {
        self.require(Role::Buyer)
    }

    pub fn require_seller(&self) -> Result<&UserId, AccessError> {
        self.require(Role::Seller)
    }

    fn require(&self, role: Role) -> Result<&UserId, AccessError> {
        match &self.principal {
            Some(principal) if principal.role == role => Ok(&principal.user_id),
            _ => Err(AccessError::NotAuthenticated { expected: role.as_str() }),
        }
    }
}

fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}
