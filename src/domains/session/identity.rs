use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Driver,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Driver => "driver",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Role {required:?} required, session has {actual:?}")]
    Forbidden { required: Role, actual: Role },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub role: Role,
}

/// Who is acting, resolved once when the session starts.
///
/// `Simulated` sessions drive the demo mode: they are never backed by the
/// authentication service and their agents report simulated fixes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Session {
    Authenticated(Identity),
    Simulated(Identity),
}

impl Session {
    /// A throwaway demo identity for `role`.
    pub fn simulated(role: Role) -> Self {
        let stamp = Utc::now().timestamp_millis();
        let display_name = match role {
            Role::Admin => "Demo Admin",
            Role::Driver => "Demo Driver",
        };
        Session::Simulated(Identity {
            user_id: format!("demo-{}-{}", role.as_str(), stamp),
            display_name: display_name.to_string(),
            email: Some(format!("demo-{}@tracksure.local", role.as_str())),
            role,
        })
    }

    pub fn identity(&self) -> &Identity {
        match self {
            Session::Authenticated(identity) | Session::Simulated(identity) => identity,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.identity().user_id
    }

    pub fn role(&self) -> Role {
        self.identity().role
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self, Session::Simulated(_))
    }

    pub fn require(&self, role: Role) -> Result<&Identity, SessionError> {
        let identity = self.identity();
        if identity.role == role {
            Ok(identity)
        } else {
            Err(SessionError::Forbidden {
                required: role,
                actual: identity.role,
            })
        }
    }
}
