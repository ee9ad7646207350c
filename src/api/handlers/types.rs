use secrecy::SecretString;
use serde::Deserialize;
use utoipa::ToSchema;

/// Body of signup and signin requests.
#[derive(Debug, Deserialize, ToSchema)]
pub struct Credentials {
    pub name: String,
    #[schema(value_type = String, format = Password)]
    pub password: SecretString,
}

impl Credentials {
    /// Both fields present and non-blank.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        use secrecy::ExposeSecret;
        !self.name.trim().is_empty() && !self.password.expose_secret().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Option<Credentials> {
        serde_json::from_str(json).ok()
    }

    #[test]
    fn complete_credentials() {
        let credentials = parse(r#"{"name":"alice","password":"p@ss123"}"#);
        assert!(credentials.is_some_and(|c| c.is_complete()));
    }

    #[test]
    fn blank_fields_are_incomplete() {
        for json in [
            r#"{"name":"","password":"p@ss123"}"#,
            r#"{"name":"   ","password":"p@ss123"}"#,
            r#"{"name":"alice","password":""}"#,
        ] {
            assert!(parse(json).is_some_and(|c| !c.is_complete()), "{json}");
        }
    }

    #[test]
    fn debug_does_not_leak_password() {
        let credentials = parse(r#"{"name":"alice","password":"p@ss123"}"#);
        let debug = format!("{credentials:?}");
        assert!(debug.contains("alice"));
        assert!(!debug.contains("p@ss123"));
    }
}
