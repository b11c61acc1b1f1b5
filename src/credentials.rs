use rand::distributions::Alphanumeric;
use rand::Rng;

const GENERATED_PASSWORD_LEN: usize = 24;

/// Admin credentials for the web service. Created transiently during init and
/// displayed once; never persisted by stackctl.
#[derive(Debug, Clone)]
pub struct WebCredentials {
    pub username: String,
    pub password: String,
    pub token: Option<String>,
}

impl WebCredentials {
    pub fn generated() -> Self {
        Self {
            username: "admin".to_string(),
            password: generate_password(),
            token: None,
        }
    }
}

pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_password_length_and_charset() {
        let pw = generate_password();
        assert_eq!(pw.len(), GENERATED_PASSWORD_LEN);
        assert!(pw.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_generated_passwords_are_distinct() {
        assert_ne!(generate_password(), generate_password());
    }
}
