use bcrypt::{hash, verify};

use super::AuthError;

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// bcrypt only reads the first 72 bytes
pub const MAX_PASSWORD_LENGTH: usize = 72;

pub fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::WeakPassword(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(AuthError::WeakPassword(format!(
            "Password must be at most {} bytes",
            MAX_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

/// Hash on the blocking pool; bcrypt is CPU-bound.
pub async fn hash_password(password: &str, cost: u32) -> Result<String, AuthError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hash(password, cost).map_err(|e| AuthError::Hashing(e.to_string())))
        .await
        .map_err(|e| AuthError::Hashing(format!("task join error: {}", e)))?
}

pub async fn verify_password(password: &str, password_hash: &str) -> Result<bool, AuthError> {
    let password = password.to_string();
    let password_hash = password_hash.to_string();
    tokio::task::spawn_blocking(move || verify(password, &password_hash).map_err(|e| AuthError::Hashing(e.to_string())))
        .await
        .map_err(|e| AuthError::Hashing(format!("task join error: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashes_verify_and_reject_other_passwords() {
        let hashed = hash_password("correct horse", 4).await.unwrap();
        assert_ne!(hashed, "correct horse");
        assert!(verify_password("correct horse", &hashed).await.unwrap());
        assert!(!verify_password("battery staple", &hashed).await.unwrap());
    }

    #[test]
    fn length_bounds() {
        assert!(validate_password("short").is_err());
        assert!(validate_password(&"x".repeat(73)).is_err());
        assert!(validate_password("long enough").is_ok());
    }
}
