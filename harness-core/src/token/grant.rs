use secrecy::{ExposeSecret, SecretString};

pub const PASSWORD: &str = "password";
pub const CLIENT_CREDENTIALS: &str = "client_credentials";
pub const REFRESH_TOKEN: &str = "refresh_token";
pub const JWT_BEARER: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// The grant flows the samples exercise.
///
/// Picking a grant the endpoint does not accept is the caller's mistake; the
/// server's rejection comes back as an ordinary `Auth` error.
#[derive(Clone)]
pub enum Grant {
    Password {
        username: String,
        password: SecretString,
        /// Appended to the password by the caller when bimodal auth is on.
        second_factor: Option<String>,
    },
    ClientCredentials,
    RefreshToken {
        token: String,
    },
    JwtBearer {
        token: String,
    },
    /// Client authenticates with an X.509 pair in the TLS handshake.
    Certificate {
        certificate: String,
        key: SecretString,
    },
}

impl Grant {
    pub fn password(username: impl Into<String>, password: SecretString) -> Self {
        Grant::Password {
            username: username.into(),
            password,
            second_factor: None,
        }
    }

    pub fn with_second_factor(self, code: impl Into<String>) -> Self {
        match self {
            Grant::Password {
                username, password, ..
            } => {
                let code = code.into();
                Grant::Password {
                    username,
                    password,
                    second_factor: (!code.is_empty()).then_some(code),
                }
            }
            other => other,
        }
    }

    pub fn grant_type(&self) -> &'static str {
        match self {
            Grant::Password { .. } => PASSWORD,
            Grant::ClientCredentials | Grant::Certificate { .. } => CLIENT_CREDENTIALS,
            Grant::RefreshToken { .. } => REFRESH_TOKEN,
            Grant::JwtBearer { .. } => JWT_BEARER,
        }
    }

    /// `grant_type` plus the grant's own form fields.
    pub(crate) fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![("grant_type", self.grant_type().to_string())];
        match self {
            Grant::Password {
                username,
                password,
                second_factor,
            } => {
                let mut secret = password.expose_secret().clone();
                if let Some(code) = second_factor {
                    secret.push_str(code);
                }
                fields.push(("username", username.clone()));
                fields.push(("password", secret));
            }
            Grant::RefreshToken { token } => fields.push(("refresh_token", token.clone())),
            Grant::JwtBearer { token } => fields.push(("assertion", token.clone())),
            Grant::ClientCredentials | Grant::Certificate { .. } => {}
        }
        fields
    }
}

impl std::fmt::Debug for Grant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Grant::Password {
                username,
                second_factor,
                ..
            } => f
                .debug_struct("Password")
                .field("username", username)
                .field("second_factor", &second_factor.is_some())
                .finish(),
            Grant::ClientCredentials => f.write_str("ClientCredentials"),
            Grant::RefreshToken { .. } => f.write_str("RefreshToken"),
            Grant::JwtBearer { .. } => f.write_str("JwtBearer"),
            Grant::Certificate { .. } => f.write_str("Certificate"),
        }
    }
}
