//! Service accounts and login identity resolution.

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

const LOCAL_SERVICE: &str = r"NT AUTHORITY\LocalService";
const NETWORK_SERVICE: &str = r"NT AUTHORITY\NetworkService";

/// Security context under which the service process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceAccount {
    /// Non-privileged local account; anonymous credentials on the network.
    #[default]
    LocalService,
    /// Local account that presents the computer's credentials on the network.
    NetworkService,
    /// Highly privileged local account used by the service manager itself.
    LocalSystem,
    /// A specific user account, see [`Credentials`].
    User,
}

/// User name and password for [`ServiceAccount::User`].
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: None,
        }
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

// Never print the password.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Identity passed to the service manager when creating a record.
///
/// `account_name == None` means LocalSystem; `password == None` lets the
/// service manager keep whatever (if anything) it already has.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoginIdentity {
    pub account_name: Option<String>,
    pub password: Option<String>,
}

impl ServiceAccount {
    /// Resolve this account plus optional credentials into a login identity.
    pub fn resolve(self, credentials: Option<&Credentials>) -> Result<LoginIdentity, ServiceError> {
        match (self, credentials) {
            (ServiceAccount::User, None) => Err(ServiceError::UnsupportedAccount(
                "a user name is required for the user account".to_string(),
            )),
            (ServiceAccount::User, Some(creds)) => {
                if creds.username.is_empty() {
                    return Err(ServiceError::UnsupportedAccount(
                        "the user name must not be empty".to_string(),
                    ));
                }
                let account_name = if creds.username.contains('\\') {
                    creds.username.clone()
                } else {
                    format!(r".\{}", creds.username)
                };
                Ok(LoginIdentity {
                    account_name: Some(account_name),
                    password: creds.password.clone(),
                })
            }
            (builtin, Some(_)) => Err(ServiceError::UnsupportedAccount(format!(
                "credentials must not be supplied for the {builtin:?} account"
            ))),
            (ServiceAccount::LocalService, None) => Ok(LoginIdentity {
                account_name: Some(LOCAL_SERVICE.to_string()),
                password: None,
            }),
            (ServiceAccount::NetworkService, None) => Ok(LoginIdentity {
                account_name: Some(NETWORK_SERVICE.to_string()),
                password: None,
            }),
            (ServiceAccount::LocalSystem, None) => Ok(LoginIdentity::default()),
        }
    }
}
